//! Testing utilities for the reportform workspace
//!
//! Fixture schemas and in-memory collaborators with call recording and
//! failure injection.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::NaiveDate;
use reportform_engine::{
    AssetService, EngineConfig, FixedClock, ImageRef, LookupError, ReferenceDataService,
    ReloadSummary, RenderEngine, Services, SubmissionError, SubmissionReceipt, SubmissionService,
    TemplateService, UploadError,
};
use reportform_schema::Schema;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Penetration-test report template covering every engine feature
pub const PENTEST: &str = r##"
id: pentest
name: 渗透测试报告
version: 1.0.0
field_groups:
  - {id: basic, name: 基本信息, order: 1}
  - {id: targets, name: 测试目标, order: 2}
  - {id: findings, name: 漏洞详情, order: 3}
  - {id: summary, name: 测试结论, order: 4, collapsed: true}
data_sources:
  - {id: vulnerabilities, type: database, description: 漏洞库}
  - {id: risk_levels, type: config, config_key: risk_levels, value: [超危, 高危, 中危, 低危, 信息性]}
fields:
  - {key: report_no, group: basic, label: 报告编号, readonly: true, auto_generate: true, auto_generate_rule: "PT-{date}-{seq}"}
  - {key: system_name, group: basic, label: 系统名称, required: true}
  - key: url
    group: basic
    label: 网址
    validation: {pattern: "https?://", message: "网址需以 http:// 或 https:// 开头"}
  - {key: domain, group: basic, label: 域名, readonly: true}
  - {key: unit_name, group: basic, label: 单位名称}
  - {key: test_date, group: basic, label: 测试日期, type: date, default: today}
  - {key: tester, group: basic, label: 测试人员, type: searchable_select, options: [张三, 李四, 王五]}
  - key: target_list
    group: targets
    label: 测试目标
    type: target_list
    required: true
    item_label: "目标 {n}"
    count_field: target_count
    columns:
      - {key: url, label: URL}
      - {key: ip, label: IP}
  - {key: target_count, group: targets, label: 目标数量, readonly: true, default: 0}
  - key: vuln_list
    group: findings
    label: 漏洞列表
    type: vuln_list
    item_label: "漏洞 {n}"
    library:
      endpoint: vulnerability
      mapping: {vuln_name: name, vuln_level: level, description: detail.description}
    columns:
      - {key: vuln_name, label: 漏洞名称, type: searchable_select, source: vulnerabilities}
      - {key: vuln_level, label: 风险等级, type: select, source: risk_levels}
      - {key: description, label: 漏洞描述, type: textarea}
      - {key: evidence, label: 漏洞截图, type: image_list}
  - {key: screenshot, group: findings, label: 首页截图, type: image}
  - {key: attachments, group: findings, label: 附件截图, type: image_list, max_count: 2}
  - {key: critical_count, group: summary, label: 超危, readonly: true}
  - {key: high_count, group: summary, label: 高危, readonly: true}
  - {key: medium_count, group: summary, label: 中危, readonly: true}
  - {key: low_count, group: summary, label: 低危, readonly: true}
  - {key: info_count, group: summary, label: 信息性, readonly: true}
  - {key: total_count, group: summary, label: 漏洞总数, readonly: true}
  - {key: vuln_summary, group: summary, label: 漏洞概述, readonly: true}
  - key: risk_rating
    group: summary
    label: 风险等级
    readonly: true
    presets:
      高风险: {conclusion: "#system_name# 存在高风险，建议立即整改"}
  - {key: conclusion, group: summary, label: 测试结论, type: textarea}
behaviors:
  - id: process_url
    trigger: {field: url}
    actions:
      - type: api_call
        endpoint: process-url
        params: {id: "${url}"}
        result_mapping: {domain: domain, unit_name: icp_info.unitName}
validation:
  rules:
    - {fields: [system_name, unit_name], rule: required, message: 请填写系统名称和单位名称}
aggregates:
  counts: {critical: critical_count, high: high_count, medium: medium_count, low: low_count, info: info_count}
  total: total_count
  summary: vuln_summary
  rating: risk_rating
  rating_labels: {high: 高风险, medium: 中风险, low: 低风险}
  source_list: vuln_list
"##;

/// Hazard report template with computed fields and presets
pub const HAZARD: &str = r##"
id: hazard
name: 隐患通报
fields:
  - {key: vulnerability_id, label: 隐患编号, auto_generate: true, auto_generate_rule: "YHBH-{date}-{seq}"}
  - {key: system_name, label: 系统名称, required: true}
  - {key: hazard_level, label: 隐患级别, type: select, options: [高危, 中危, 低危]}
  - key: alert_level
    label: 预警级别
    readonly: true
    computed: true
    compute_from: hazard_level
    compute_rule: {高危: 2级, 中危: 3级, 低危: 4级}
  - key: vul_type
    label: 隐患类型
    type: select
    options: [弱口令, 信息泄露]
    presets:
      弱口令:
        hazard_level: 高危
        description: "#system_name# 存在弱口令"
      信息泄露:
        hazard_level: 中危
        description: "#system_name# 存在信息泄露"
  - {key: description, label: 隐患描述, type: textarea}
"##;

/// Date pinned by [`fixed_clock`]
pub fn fixed_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(fixed_date()))
}

pub fn pentest_schema() -> Schema {
    Schema::load(PENTEST).unwrap()
}

pub fn hazard_schema() -> Schema {
    Schema::load(HAZARD).unwrap()
}

#[derive(Debug, Default)]
pub struct FakeTemplates {
    documents: Mutex<HashMap<String, String>>,
    sources: Mutex<HashMap<String, Value>>,
    fetches: AtomicUsize,
    reloads: AtomicUsize,
    fail_sources: AtomicBool,
}

impl FakeTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, id: &str, document: &str) -> Self {
        self.set_template(id, document);
        self
    }

    pub fn with_source(self, source_id: &str, payload: Value) -> Self {
        self.set_source(source_id, payload);
        self
    }

    pub fn set_template(&self, id: &str, document: &str) {
        self.documents
            .lock()
            .unwrap()
            .insert(id.to_string(), document.to_string());
    }

    pub fn set_source(&self, source_id: &str, payload: Value) {
        self.sources
            .lock()
            .unwrap()
            .insert(source_id.to_string(), payload);
    }

    /// Data-source fetches served so far, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn fail_sources(&self, fail: bool) {
        self.fail_sources.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TemplateService for FakeTemplates {
    async fn fetch_schema(&self, template_id: &str) -> Result<String, LookupError> {
        self.documents
            .lock()
            .unwrap()
            .get(template_id)
            .cloned()
            .ok_or_else(|| LookupError::not_found("templates", template_id))
    }

    async fn fetch_data_source(&self, template_id: &str, source_id: &str) -> Result<Value, LookupError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_sources.load(Ordering::SeqCst) {
            return Err(LookupError::Unavailable("database unreachable".to_string()));
        }
        self.sources
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .ok_or_else(|| LookupError::not_found(template_id, source_id))
    }

    async fn reload(&self) -> Result<ReloadSummary, LookupError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(ReloadSummary {
            loaded_count: self.documents.lock().unwrap().len(),
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeReference {
    entities: Mutex<HashMap<(String, String), Value>>,
    calls: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl FakeReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(self, endpoint: &str, id: &str, entity: Value) -> Self {
        self.entities
            .lock()
            .unwrap()
            .insert((endpoint.to_string(), id.to_string()), entity);
        self
    }

    /// Endpoint/id pairs queried, in order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReferenceDataService for FakeReference {
    async fn lookup_entity(&self, endpoint: &str, id: &str) -> Result<Value, LookupError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), id.to_string()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(LookupError::Unavailable("reference service down".to_string()));
        }
        self.entities
            .lock()
            .unwrap()
            .get(&(endpoint.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| LookupError::not_found(endpoint, id))
    }
}

#[derive(Debug, Default)]
pub struct FakeAssets {
    uploads: AtomicUsize,
    failing: AtomicBool,
}

impl FakeAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AssetService for FakeAssets {
    async fn upload_image(&self, bytes: Vec<u8>, filename: &str) -> Result<ImageRef, UploadError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UploadError::Failed("storage full".to_string()));
        }
        if bytes.is_empty() {
            return Err(UploadError::Failed(format!("{filename} is empty")));
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ImageRef {
            path: format!("uploads/{n}-{filename}"),
            url: format!("/files/uploads/{n}-{filename}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitMode {
    Succeed,
    Reject(String),
    Fail(String),
}

#[derive(Debug)]
pub struct FakeSubmission {
    payloads: Mutex<Vec<(String, Map<String, Value>)>>,
    mode: Mutex<SubmitMode>,
}

impl Default for FakeSubmission {
    fn default() -> Self {
        Self {
            payloads: Mutex::new(Vec::new()),
            mode: Mutex::new(SubmitMode::Succeed),
        }
    }
}

impl FakeSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: SubmitMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Template id and payload of every generation request
    pub fn payloads(&self) -> Vec<(String, Map<String, Value>)> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionService for FakeSubmission {
    async fn generate(
        &self,
        template_id: &str,
        payload: Map<String, Value>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let n = {
            let mut payloads = self.payloads.lock().unwrap();
            payloads.push((template_id.to_string(), payload));
            payloads.len()
        };
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            SubmitMode::Succeed => Ok(SubmissionReceipt {
                success: true,
                report_path: format!("output/{template_id}-{n}.docx"),
                message: "报告生成成功".to_string(),
            }),
            SubmitMode::Reject(message) => Ok(SubmissionReceipt {
                success: false,
                report_path: String::new(),
                message,
            }),
            SubmitMode::Fail(message) => Err(SubmissionError::Failed(message)),
        }
    }
}

/// The four fakes, preloaded with the fixture templates and reference data
#[derive(Debug, Clone)]
pub struct Harness {
    pub templates: Arc<FakeTemplates>,
    pub reference: Arc<FakeReference>,
    pub assets: Arc<FakeAssets>,
    pub submission: Arc<FakeSubmission>,
}

impl Harness {
    pub fn new() -> Self {
        let templates = FakeTemplates::new()
            .with_template("pentest", PENTEST)
            .with_template("hazard", HAZARD)
            .with_source("vulnerabilities", json!(["SQL注入", "XSS跨站脚本", "弱口令"]));
        let reference = FakeReference::new()
            .with_entity(
                "process-url",
                "https://oa.example.com",
                json!({
                    "domain": "oa.example.com",
                    "icp_info": {"unitName": "示例科技有限公司"}
                }),
            )
            .with_entity(
                "vulnerability",
                "SQL注入",
                json!({
                    "name": "SQL注入",
                    "level": "高危",
                    "detail": {"description": "参数未过滤导致数据库可被查询"}
                }),
            );
        Self {
            templates: Arc::new(templates),
            reference: Arc::new(reference),
            assets: Arc::new(FakeAssets::new()),
            submission: Arc::new(FakeSubmission::new()),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(
            self.templates.clone(),
            self.reference.clone(),
            self.assets.clone(),
            self.submission.clone(),
        )
    }

    /// Engine on the fixed clock without a loaded template
    pub fn engine(&self) -> RenderEngine {
        RenderEngine::new(EngineConfig::new(), self.services()).with_clock(fixed_clock())
    }

    /// Engine with `template_id` loaded
    pub async fn loaded(&self, template_id: &str) -> RenderEngine {
        let mut engine = self.engine();
        engine.load_template(template_id).await.unwrap();
        engine
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
