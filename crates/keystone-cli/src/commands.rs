use std::fs;
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use keystone_sdk::{GetOptions, KeyStore, KeyStoreConfig, KeyStoreOptions, Node, SetOptions};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let output = execute(&cli)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Run `cli` and return what should be printed.
pub fn execute(cli: &Cli) -> anyhow::Result<String> {
    let config = load_config(cli.config.as_deref())?;
    let store = open(&cli.file, config)?;
    match &cli.command {
        Command::Get(args) => cmd_get(&store, args, cli.format),
        Command::Set(args) => cmd_set(&store, &cli.file, args, cli.format),
        Command::Remove(args) => cmd_remove(&store, &cli.file, args, cli.format),
        Command::Resolve(args) => cmd_resolve(&store, args, cli.format),
        Command::Dump => Ok(render(&store.dump()?, cli.format)),
        Command::Export(args) => cmd_export(&store, args, cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KeyStoreConfig> {
    let Some(path) = path else {
        return Ok(KeyStoreConfig::default());
    };
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let mut config = KeyStoreConfig::from_toml_str(&source)?;
    if config.is_fetchable {
        warn!("ignoring is_fetchable: the command line has no transport");
        config.is_fetchable = false;
    }
    Ok(config)
}

/// Load the document at `path`; a missing file starts an empty one.
fn open(path: &Path, config: KeyStoreConfig) -> anyhow::Result<KeyStore> {
    let data = if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        Node::from(value)
    } else {
        debug!(file = %path.display(), "document does not exist yet");
        Node::empty_mapping()
    };
    Ok(KeyStoreOptions::new().config(config).data(data).build()?)
}

/// Write the raw tree back, references as marker strings.
fn save(store: &KeyStore, path: &Path) -> anyhow::Result<()> {
    let raw = store.store().read()?.root().to_json();
    let text = serde_json::to_string_pretty(&raw)?;
    fs::write(path, text + "\n").with_context(|| format!("writing {}", path.display()))?;
    debug!(file = %path.display(), "document saved");
    Ok(())
}

fn cmd_get(store: &KeyStore, args: &GetArgs, format: OutputFormat) -> anyhow::Result<String> {
    let options = GetOptions {
        reference_depth: args.depth,
    };
    let value = store.get(args.path.as_deref(), options)?;
    Ok(match (value, format) {
        (Some(node), _) => render(&node.to_json(), format),
        (None, OutputFormat::Json) => "null".to_string(),
        (None, OutputFormat::Text) => "(undefined)".dimmed().to_string(),
    })
}

fn cmd_set(
    store: &KeyStore,
    file: &Path,
    args: &SetArgs,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let value = parse_value(&args.value);
    let options = SetOptions {
        immutable: Some(args.immutable),
    };
    store.set(&args.path, Some(value), options)?;
    save(store, file)?;
    let canonical = store.resolve_ref_key(&args.path)?;
    Ok(match format {
        OutputFormat::Json => serde_json::json!({ "set": canonical.to_string() }).to_string(),
        OutputFormat::Text => format!("{} Set {}", "✓".green(), canonical.to_string().bold()),
    })
}

fn cmd_remove(
    store: &KeyStore,
    file: &Path,
    args: &RemoveArgs,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let canonical = store.resolve_ref_key(&args.path)?;
    store.remove(&args.path, SetOptions::default())?;
    save(store, file)?;
    Ok(match format {
        OutputFormat::Json => serde_json::json!({ "removed": canonical.to_string() }).to_string(),
        OutputFormat::Text => format!("{} Removed {}", "✓".green(), canonical.to_string().bold()),
    })
}

fn cmd_resolve(
    store: &KeyStore,
    args: &ResolveArgs,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let resolved = store.resolve_ref_keys(&args.paths[..])?;
    Ok(match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, Value> = args
                .paths
                .iter()
                .zip(&resolved)
                .map(|(path, canonical)| (path.clone(), Value::String(canonical.to_string())))
                .collect();
            Value::Object(map).to_string()
        }
        OutputFormat::Text => args
            .paths
            .iter()
            .zip(&resolved)
            .map(|(path, canonical)| format!("{path} → {}", canonical.to_string().cyan()))
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

fn cmd_export(store: &KeyStore, args: &ExportArgs, format: OutputFormat) -> anyhow::Result<String> {
    store.set_serialisability_of_keys(args.exclude.iter().map(|path| (path.as_str(), false)))?;
    let value = store.to_json(args.path.as_deref())?;
    Ok(render(&value, format))
}

/// JSON when it parses, otherwise a literal string.
fn parse_value(raw: &str) -> Node {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Node::from(value),
        Err(_) => Node::from(raw),
    }
}

fn render(value: &Value, format: OutputFormat) -> String {
    match (format, value) {
        (OutputFormat::Json, value) => value.to_string(),
        (OutputFormat::Text, Value::String(s)) => s.clone(),
        (OutputFormat::Text, Value::Null) => "null".dimmed().to_string(),
        (OutputFormat::Text, value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use tempfile::TempDir;

    fn document(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("doc.json");
        let doc = json!({
            "users": { "ada": { "name": "Ada" } },
            "me": "__ref:users/ada"
        });
        fs::write(&path, doc.to_string()).unwrap();
        path
    }

    fn run_json(file: &Path, args: &[&str]) -> anyhow::Result<String> {
        let mut argv = vec!["keystone", "--format", "json", "--file", file.to_str().unwrap()];
        argv.extend_from_slice(args);
        execute(&Cli::try_parse_from(argv).unwrap())
    }

    fn on_disk(file: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(file).unwrap()).unwrap()
    }

    #[test]
    fn get_expands_references() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let out = run_json(&file, &["get", "me"]).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({ "name": "Ada" }));

        let out = run_json(&file, &["get", "me/name"]).unwrap();
        assert_eq!(out, "\"Ada\"");
        assert_eq!(run_json(&file, &["get", "nobody"]).unwrap(), "null");
    }

    #[test]
    fn get_respects_depth() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let out = run_json(&file, &["get", "--depth", "0"]).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["me"], json!("__ref:users/ada"));
    }

    #[test]
    fn set_writes_through_references_and_saves() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let out = run_json(&file, &["set", "me/age", "36"]).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({ "set": "users/ada/age" }));

        let saved = on_disk(&file);
        assert_eq!(saved["users"]["ada"]["age"], json!(36));
        assert_eq!(saved["me"], json!("__ref:users/ada"));
    }

    #[test]
    fn set_stores_unparsable_values_as_strings() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        run_json(&file, &["set", "note", "hello world", "--immutable"]).unwrap();
        assert_eq!(on_disk(&file)["note"], json!("hello world"));
    }

    #[test]
    fn set_creates_missing_document() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("new.json");
        run_json(&file, &["set", "a/b", "true"]).unwrap();
        assert_eq!(on_disk(&file), json!({ "a": { "b": true } }));
    }

    #[test]
    fn remove_deletes_and_tolerates_absent_keys() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        run_json(&file, &["remove", "me/name"]).unwrap();
        assert_eq!(on_disk(&file)["users"]["ada"], json!({}));
        run_json(&file, &["remove", "users/ghost"]).unwrap();
    }

    #[test]
    fn resolve_prints_canonical_paths() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let out = run_json(&file, &["resolve", "me/name", "users"]).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&out).unwrap(),
            json!({ "me/name": "users/ada/name", "users": "users" })
        );
    }

    #[test]
    fn dump_resolves_everything() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let out = run_json(&file, &["dump"]).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["me"], json!({ "name": "Ada" }));
    }

    #[test]
    fn export_leaves_out_excluded_paths() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let out = run_json(&file, &["export", "--exclude", "me"]).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&out).unwrap(),
            json!({ "users": { "ada": { "name": "Ada" } } })
        );
    }

    #[test]
    fn config_file_makes_store_read_only() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let config = dir.path().join("store.toml");
        fs::write(&config, "[store]\nwriteable = false\n").unwrap();
        let argv = [
            "keystone",
            "--file",
            file.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            "set",
            "x",
            "1",
        ];
        let err = execute(&Cli::try_parse_from(argv).unwrap()).unwrap_err();
        assert!(err.to_string().contains("not writeable"));
    }

    #[test]
    fn text_format_prints_strings_plainly() {
        let dir = TempDir::new().unwrap();
        let file = document(&dir);
        let argv = ["keystone", "--file", file.to_str().unwrap(), "get", "me/name"];
        let out = execute(&Cli::try_parse_from(argv).unwrap()).unwrap();
        assert_eq!(out, "Ada");
    }

    #[test]
    fn invalid_document_is_reported() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("broken.json");
        fs::write(&file, "{ not json").unwrap();
        let err = run_json(&file, &["dump"]).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }
}
