//! Repeating lists, library fills and vulnerability statistics.

use pretty_assertions::assert_eq;
use reportform_engine::{EngineError, ItemId, ListError, RenderEngine, Widget};
use reportform_test_utils::Harness;
use serde_json::json;

async fn pentest() -> (Harness, RenderEngine) {
    let harness = Harness::new();
    let engine = harness.loaded("pentest").await;
    (harness, engine)
}

fn labels(engine: &RenderEngine, list: &str) -> Vec<String> {
    engine
        .state()
        .unwrap()
        .records(list)
        .unwrap()
        .iter()
        .map(|item| item.label.clone())
        .collect()
}

fn ids(engine: &RenderEngine, list: &str) -> Vec<ItemId> {
    engine.state().unwrap().records(list).unwrap().ids()
}

/// Removing an item renumbers labels but never identities.
#[tokio::test]
async fn remove_middle_item_relabels() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("target_list").unwrap();
    let b = engine.add_item("target_list").unwrap();
    let c = engine.add_item("target_list").unwrap();
    engine
        .set_item_field("target_list", c, "url", json!("http://c.example.com"))
        .unwrap();

    let cascade = engine.remove_item("target_list", b).unwrap();

    assert_eq!(labels(&engine, "target_list"), vec!["目标 1", "目标 2"]);
    assert_eq!(ids(&engine, "target_list"), vec![a, c]);
    assert_eq!(
        engine.item_field("target_list", c, "url").unwrap(),
        Some(&json!("http://c.example.com"))
    );
    assert_eq!(engine.state().unwrap().value("target_count"), Some(&json!(2)));
    assert!(cascade.touched("target_count"));
}

/// Identities keep increasing after removals and resets.
#[tokio::test]
async fn identities_are_never_reused() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();
    engine.remove_item("vuln_list", a).unwrap();
    let b = engine.add_item("vuln_list").unwrap();
    engine.reset().unwrap();
    let c = engine.add_item("vuln_list").unwrap();

    assert!(a < b && b < c);
    assert!(matches!(
        engine.remove_item("vuln_list", a),
        Err(EngineError::List(ListError::UnknownItem { .. }))
    ));
}

/// Moving reorders the list and the labels follow the new positions.
#[tokio::test]
async fn move_item_reorders() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();
    let b = engine.add_item("vuln_list").unwrap();
    let c = engine.add_item("vuln_list").unwrap();

    engine.move_item("vuln_list", c, 0).unwrap();
    assert_eq!(ids(&engine, "vuln_list"), vec![c, a, b]);
    assert_eq!(labels(&engine, "vuln_list"), vec!["漏洞 1", "漏洞 2", "漏洞 3"]);

    // past the end clamps
    engine.move_item("vuln_list", c, 99).unwrap();
    assert_eq!(ids(&engine, "vuln_list"), vec![a, b, c]);
}

/// Cell writes are checked against the declared columns.
#[tokio::test]
async fn item_field_addressing() {
    let (_harness, mut engine) = pentest().await;
    let id = engine.add_item("vuln_list").unwrap();

    assert!(matches!(
        engine.set_item_field("vuln_list", id, "ghost", json!("x")),
        Err(EngineError::List(ListError::UnknownColumn { .. }))
    ));
    assert!(matches!(
        engine.add_item("system_name"),
        Err(EngineError::List(ListError::NotAList(_)))
    ));
    assert_eq!(
        engine.item_field("vuln_list", id, "evidence").unwrap(),
        Some(&json!([]))
    );
}

/// Severity edits recompute counts, summary and rating, and the rating preset fires.
#[tokio::test]
async fn statistics_follow_vulnerability_levels() {
    let (_harness, mut engine) = pentest().await;
    engine.set_field("system_name", json!("OA系统")).await.unwrap();

    let a = engine.add_item("vuln_list").unwrap();
    let b = engine.add_item("vuln_list").unwrap();
    engine
        .set_item_field("vuln_list", a, "vuln_level", json!("中危"))
        .unwrap();
    {
        let state = engine.state().unwrap();
        assert_eq!(state.value("medium_count"), Some(&json!(1)));
        assert_eq!(state.text("vuln_summary"), "中危1个");
        assert_eq!(state.text("risk_rating"), "中风险");
        assert_eq!(state.text("conclusion"), "");
    }

    let cascade = engine
        .set_item_field("vuln_list", b, "vuln_level", json!("高危"))
        .unwrap();
    let state = engine.state().unwrap();
    assert_eq!(state.value("high_count"), Some(&json!(1)));
    assert_eq!(state.value("total_count"), Some(&json!(2)));
    assert_eq!(state.text("vuln_summary"), "高危1个 中危1个");
    assert_eq!(state.text("risk_rating"), "高风险");
    assert_eq!(state.text("conclusion"), "OA系统 存在高风险，建议立即整改");
    assert!(cascade.touched("conclusion"));
}

/// Other columns do not recompute statistics.
#[tokio::test]
async fn non_level_columns_leave_statistics() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();
    let cascade = engine
        .set_item_field("vuln_list", a, "description", json!("描述"))
        .unwrap();
    assert_eq!(cascade.changed, vec!["vuln_list"]);
}

/// Removing the last finding drops the rating back.
#[tokio::test]
async fn removing_findings_recomputes() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();
    engine
        .set_item_field("vuln_list", a, "vuln_level", json!("超危"))
        .unwrap();
    assert_eq!(engine.state().unwrap().text("vuln_summary"), "超危1个");

    engine.remove_item("vuln_list", a).unwrap();
    let state = engine.state().unwrap();
    assert_eq!(state.value("critical_count"), Some(&json!(0)));
    assert_eq!(state.text("vuln_summary"), "无漏洞");
    assert_eq!(state.text("risk_rating"), "低风险");
}

/// A library fill maps the reference record into the addressed item only.
#[tokio::test]
async fn library_fill_writes_one_item() {
    let (harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();
    let b = engine.add_item("vuln_list").unwrap();

    assert!(engine
        .fill_item_from_library("vuln_list", b, "SQL注入")
        .await
        .unwrap());

    assert_eq!(
        engine.item_field("vuln_list", b, "description").unwrap(),
        Some(&json!("参数未过滤导致数据库可被查询"))
    );
    assert_eq!(
        engine.item_field("vuln_list", b, "vuln_level").unwrap(),
        Some(&json!("高危"))
    );
    assert_eq!(
        engine.item_field("vuln_list", a, "vuln_name").unwrap(),
        Some(&json!(""))
    );
    assert_eq!(engine.state().unwrap().value("high_count"), Some(&json!(1)));
    assert_eq!(
        harness.reference.calls(),
        vec![("vulnerability".to_string(), "SQL注入".to_string())]
    );
}

/// A failed library lookup leaves the item as it was.
#[tokio::test]
async fn library_fill_failure() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();

    let err = engine
        .fill_item_from_library("vuln_list", a, "不存在的漏洞")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Lookup(_)));
    assert_eq!(
        engine.item_field("vuln_list", a, "vuln_name").unwrap(),
        Some(&json!(""))
    );

    assert!(matches!(
        engine.fill_item_from_library("target_list", a, "SQL注入").await,
        Err(EngineError::List(ListError::NoLibrary(_)))
    ));
}

/// A record arriving after its item was removed is dropped; siblings are untouched.
#[tokio::test]
async fn library_fill_for_removed_item_is_dropped() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();
    let b = engine.add_item("vuln_list").unwrap();

    let ticket = engine.begin_library_fill("vuln_list", a, "SQL注入").unwrap();
    engine.remove_item("vuln_list", a).unwrap();
    let applied =
        engine.complete_library_fill(&ticket, &json!({"name": "SQL注入", "level": "高危"}));

    assert!(!applied);
    assert_eq!(
        engine.item_field("vuln_list", b, "vuln_name").unwrap(),
        Some(&json!(""))
    );
    assert_eq!(engine.state().unwrap().value("high_count"), Some(&json!(0)));
}

/// Evidence uploads land in the addressed item's image column.
#[tokio::test]
async fn item_evidence_upload() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();

    let image = engine
        .upload_item_image("vuln_list", a, "evidence", vec![7], "poc.png")
        .await
        .unwrap();
    assert_eq!(image.path, "uploads/1-poc.png");
    assert_eq!(
        engine.item_field("vuln_list", a, "evidence").unwrap(),
        Some(&json!([{"path": "uploads/1-poc.png", "url": "/files/uploads/1-poc.png"}]))
    );

    assert!(engine
        .upload_item_image("vuln_list", a, "description", vec![7], "x.png")
        .await
        .is_err());
}

/// Item cells render with the list's column options.
#[tokio::test]
async fn item_cells_render() {
    let (_harness, mut engine) = pentest().await;
    let a = engine.add_item("vuln_list").unwrap();
    let tree = engine.tree().unwrap();

    let Widget::List { items } = &tree.field("vuln_list").unwrap().widget else {
        panic!("expected a populated list");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, a);
    assert_eq!(items[0].label, "漏洞 1");

    let cell = tree
        .cell(&reportform_engine::list::cell_widget_id("vuln_list", a, "vuln_level"))
        .unwrap();
    let Widget::Select { options, .. } = &cell.widget else {
        panic!("expected select cell");
    };
    assert_eq!(options.len(), 5);
}
