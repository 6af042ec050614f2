//! Collaborators for running a session without any backend
//!
//! The schema and data-source payloads come from local files; reference
//! lookups, uploads and report generation are unavailable.

use async_trait::async_trait;
use reportform_engine::{
    AssetService, ImageRef, LookupError, ReferenceDataService, ReloadSummary, Services,
    SubmissionError, SubmissionReceipt, SubmissionService, TemplateService, UploadError,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Template service over one schema file and an optional payload file
pub(crate) struct LocalTemplates {
    schema_path: PathBuf,
    sources: Map<String, Value>,
}

impl LocalTemplates {
    pub(crate) fn new(schema_path: PathBuf, sources: Map<String, Value>) -> Self {
        Self {
            schema_path,
            sources,
        }
    }
}

#[async_trait]
impl TemplateService for LocalTemplates {
    async fn fetch_schema(&self, _template_id: &str) -> Result<String, LookupError> {
        tokio::fs::read_to_string(&self.schema_path)
            .await
            .map_err(|e| LookupError::Unavailable(format!("{}: {e}", self.schema_path.display())))
    }

    async fn fetch_data_source(&self, template_id: &str, source_id: &str) -> Result<Value, LookupError> {
        self.sources
            .get(source_id)
            .cloned()
            .ok_or_else(|| LookupError::not_found(template_id, source_id))
    }

    async fn reload(&self) -> Result<ReloadSummary, LookupError> {
        Ok(ReloadSummary { loaded_count: 1 })
    }
}

struct Offline;

#[async_trait]
impl ReferenceDataService for Offline {
    async fn lookup_entity(&self, endpoint: &str, _id: &str) -> Result<Value, LookupError> {
        Err(LookupError::Unavailable(format!("{endpoint} is not reachable offline")))
    }
}

#[async_trait]
impl AssetService for Offline {
    async fn upload_image(&self, _bytes: Vec<u8>, filename: &str) -> Result<ImageRef, UploadError> {
        Err(UploadError::Failed(format!("cannot store {filename} offline")))
    }
}

#[async_trait]
impl SubmissionService for Offline {
    async fn generate(
        &self,
        _template_id: &str,
        _payload: Map<String, Value>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        Err(SubmissionError::Failed("report generation is not available offline".to_string()))
    }
}

/// Services for a local session
pub(crate) fn services(schema_path: PathBuf, sources: Map<String, Value>) -> Services {
    let offline = Arc::new(Offline);
    Services::new(
        Arc::new(LocalTemplates::new(schema_path, sources)),
        offline.clone(),
        offline.clone(),
        offline,
    )
}
