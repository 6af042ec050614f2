//! `reportform` - inspect, render and validate report templates locally

mod offline;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reportform_engine::{EngineConfig, RenderEngine, RenderTree, Widget};
use reportform_schema::{Provenance, Schema};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "reportform", version, about = "Schema-driven report form engine")]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summarize a template document
    Inspect {
        /// Schema file (YAML or JSON)
        schema: PathBuf,
    },
    /// Render the form after applying values
    Render {
        /// Schema file (YAML or JSON)
        schema: PathBuf,
        /// JSON object of field values
        #[arg(long)]
        values: Option<PathBuf>,
        /// JSON object of data-source payloads by source id
        #[arg(long)]
        sources: Option<PathBuf>,
        /// Print the render tree as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate values against a template
    Validate {
        /// Schema file (YAML or JSON)
        schema: PathBuf,
        /// JSON object of field values
        #[arg(long)]
        values: Option<PathBuf>,
        /// JSON object of data-source payloads by source id
        #[arg(long)]
        sources: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn read_object(path: Option<&Path>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<Value>(&text).with_context(|| format!("invalid JSON in {}", path.display()))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} must contain a JSON object", path.display()),
    }
}

fn inspect(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let schema = Schema::load_path(path, &text).with_context(|| format!("invalid schema {}", path.display()))?;
    let meta = schema.meta();

    let mut out = String::new();
    writeln!(out, "{} ({}) v{}", meta.name, meta.id, meta.version)?;
    if !meta.description.is_empty() {
        writeln!(out, "{}", meta.description)?;
    }
    writeln!(out, "groups:")?;
    for group in schema.groups() {
        let fields = schema.fields_in_group(&group.id);
        writeln!(out, "  {} {} ({} fields)", group.id, group.name, fields.len())?;
    }
    writeln!(out, "data sources:")?;
    for source in schema.data_sources() {
        let kind = match &source.provenance {
            Provenance::Config { .. } if source.inline_value().is_some() => "config (inline)",
            Provenance::Config { .. } => "config",
            Provenance::Database => "database",
            Provenance::Api { .. } => "api",
        };
        writeln!(out, "  {} [{}]", source.id, kind)?;
    }
    writeln!(out, "behaviors: {}", schema.behaviors().len())?;
    writeln!(out, "validation rules: {}", schema.validation_rules().len())?;
    writeln!(
        out,
        "statistics: {}",
        if schema.aggregates().is_some() { "yes" } else { "no" }
    )?;
    Ok(out)
}

/// Load the schema into a local session and apply `values`
async fn session(
    config: EngineConfig,
    schema: &Path,
    values: Option<&Path>,
    sources: Option<&Path>,
) -> Result<RenderEngine> {
    let services = offline::services(schema.to_path_buf(), read_object(sources)?);
    let mut engine = RenderEngine::new(config, services);
    let template_id = schema
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    engine
        .load_template(&template_id)
        .await
        .with_context(|| format!("failed to load {}", schema.display()))?;

    for warning in apply_values(&mut engine, read_object(values)?).await {
        tracing::warn!("{}", warning);
    }
    Ok(engine)
}

/// Write values into the form; repeating lists take arrays of records
async fn apply_values(engine: &mut RenderEngine, values: Map<String, Value>) -> Vec<String> {
    let mut warnings = Vec::new();
    let Some(schema) = engine.session().map(|s| s.schema().clone()) else {
        return warnings;
    };
    for (key, value) in values {
        let repeating = schema.field(&key).is_some_and(|f| f.field_type.is_repeating());
        if !repeating {
            match engine.set_field(&key, value).await {
                Ok(cascade) => warnings.extend(cascade.warnings),
                Err(e) => warnings.push(format!("{key}: {e}")),
            }
            continue;
        }
        let Value::Array(records) = value else {
            warnings.push(format!("{key}: expected an array of records"));
            continue;
        };
        for record in records {
            let item = match engine.add_item(&key) {
                Ok(item) => item,
                Err(e) => {
                    warnings.push(format!("{key}: {e}"));
                    break;
                }
            };
            let Value::Object(cells) = record else {
                continue;
            };
            for (column, cell) in cells {
                if let Err(e) = engine.set_item_field(&key, item, &column, cell) {
                    warnings.push(format!("{key}: {e}"));
                }
            }
        }
    }
    warnings
}

fn describe(widget: &Widget) -> String {
    match widget {
        Widget::Text { value, .. } | Widget::Date { value } => value.clone(),
        Widget::Select { selected, .. } => selected.clone(),
        Widget::Checkbox { checked } => (if *checked { "[x]" } else { "[ ]" }).to_string(),
        Widget::CheckboxGroup { selected, .. } => selected.join(", "),
        Widget::Image { image } => image.as_ref().map(|i| i.path.clone()).unwrap_or_default(),
        Widget::ImageList { images, max } => format!("{}/{} images", images.len(), max),
        Widget::List { items } => format!("{} items", items.len()),
        Widget::EmptyList { message } => message.clone(),
    }
}

fn outline(tree: &RenderTree) -> String {
    let mut out = format!("{} ({})\n", tree.template_name, tree.template_id);
    for group in &tree.groups {
        let marker = if group.collapsed { '+' } else { '-' };
        out.push_str(&format!("[{marker}] {}\n", group.name));
        if group.collapsed {
            continue;
        }
        for field in &group.fields {
            let required = if field.required { " *" } else { "" };
            out.push_str(&format!("    {}{}: {}\n", field.label, required, describe(&field.widget)));
            if let Widget::List { items } = &field.widget {
                for item in items {
                    out.push_str(&format!("      {}\n", item.label));
                    for cell in &item.cells {
                        out.push_str(&format!("        {}: {}\n", cell.label, describe(&cell.widget)));
                    }
                }
            }
        }
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { schema } => {
            print!("{}", inspect(&schema)?);
        }
        Commands::Render {
            schema,
            values,
            sources,
            json,
        } => {
            let engine = session(config, &schema, values.as_deref(), sources.as_deref()).await?;
            let tree = engine.tree()?;
            if json {
                println!("{}", serde_json::to_string_pretty(tree)?);
            } else {
                print!("{}", outline(tree));
            }
        }
        Commands::Validate {
            schema,
            values,
            sources,
        } => {
            let engine = session(config, &schema, values.as_deref(), sources.as_deref()).await?;
            let report = engine.validate()?;
            if report.valid {
                println!("valid");
            } else {
                for error in &report.errors {
                    println!("{error}");
                }
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SCHEMA: &str = r#"
id: demo
name: 演示报告
version: 1.2.0
field_groups:
  - {id: basic, name: 基本信息, order: 1}
  - {id: extra, name: 附加, order: 2, collapsed: true}
data_sources:
  - {id: levels, type: config, value: [高危, 中危]}
  - {id: vulns, type: database}
fields:
  - {key: system_name, group: basic, label: 系统名称, required: true}
  - {key: level, group: basic, label: 等级, type: select, source: levels}
  - {key: targets, group: basic, label: 目标, type: target_list, columns: [{key: url, label: URL}]}
  - {key: note, group: extra, label: 备注}
"#;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
        let cli = Cli::try_parse_from(["reportform", "render", "a.yaml", "--json", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Render { json: true, .. }));
    }

    #[test]
    fn config_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "engine.toml", "cache_ttl_secs = 60\nempty_list_message = \"暂无\"\n");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.empty_list_message, "暂无");
        assert_eq!(config.cache_capacity, 1024);

        assert_eq!(load_config(None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn inspect_summarizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "demo.yaml", SCHEMA);
        let text = inspect(&path).unwrap();
        assert!(text.starts_with("演示报告 (demo) v1.2.0\n"));
        assert!(text.contains("  basic 基本信息 (3 fields)"));
        assert!(text.contains("  levels [config (inline)]"));
        assert!(text.contains("  vulns [database]"));
        assert!(text.contains("statistics: no"));
    }

    #[test]
    fn values_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "values.json", "[1, 2]");
        assert!(read_object(Some(&path)).is_err());
    }

    #[tokio::test]
    async fn render_outline_with_values() {
        let dir = tempfile::tempdir().unwrap();
        let schema = write(dir.path(), "demo.yaml", SCHEMA);
        let values = write(
            dir.path(),
            "values.json",
            &json!({
                "system_name": "OA系统",
                "level": "高危",
                "targets": [{"url": "http://10.0.0.1"}]
            })
            .to_string(),
        );
        let sources = write(dir.path(), "sources.json", &json!({"vulns": ["SQL注入"]}).to_string());

        let engine = session(EngineConfig::default(), &schema, Some(&values), Some(&sources))
            .await
            .unwrap();
        let text = outline(engine.tree().unwrap());
        assert_eq!(
            text,
            "演示报告 (demo)\n\
             [-] 基本信息\n\
             \x20   系统名称 *: OA系统\n\
             \x20   等级: 高危\n\
             \x20   目标: 1 items\n\
             \x20     Item 1\n\
             \x20       URL: http://10.0.0.1\n\
             [+] 附加\n"
        );
        assert!(engine.validate().unwrap().valid);
    }

    #[tokio::test]
    async fn bad_values_become_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let schema = write(dir.path(), "demo.yaml", SCHEMA);
        let services = offline::services(schema, Map::new());
        let mut engine = RenderEngine::new(EngineConfig::default(), services);
        engine.load_template("demo").await.unwrap();

        let mut values = Map::new();
        values.insert("ghost".to_string(), json!("x"));
        values.insert("targets".to_string(), json!("not a list"));
        let warnings = apply_values(&mut engine, values).await;
        assert_eq!(warnings.len(), 2);
    }
}
