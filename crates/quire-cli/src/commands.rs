use std::fmt::Write;
use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use quire_index::{DbPlatform, IndexTable, SqlDialect};
use quire_kernel::{FileIntentLog, IntentLog, QuireConfig};
use quire_types::{Qualifier, ResourceId};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let output = match cli.command {
        Command::Schema(args) => render_schema(&args)?,
        Command::Config(args) => render_config(args.file.as_deref())?,
        Command::CheckId(args) => render_id(&args.id, cli.format)?,
        Command::Intents(args) => render_intents(&args.file, cli.format)?,
    };
    print!("{output}");
    Ok(())
}

/// `--platform` wins, then the configuration's index platform, then the default.
pub(crate) fn schema_platform(args: &SchemaArgs) -> anyhow::Result<DbPlatform> {
    if let Some(platform) = args.platform {
        return Ok(platform);
    }
    Ok(match &args.config {
        Some(path) => QuireConfig::load(path)?.index.platform,
        None => DbPlatform::default(),
    })
}

pub(crate) fn render_schema(args: &SchemaArgs) -> anyhow::Result<String> {
    let platform = schema_platform(args)?;
    let dialect = SqlDialect::new(platform);
    let mut out = format!("-- quire index schema ({platform})\n");
    for statement in dialect.ddl() {
        let _ = writeln!(out, "{statement};");
    }
    if args.ddl_only {
        return Ok(out);
    }
    for table in IndexTable::ALL {
        let _ = writeln!(out, "\n-- commit {}", table.name());
        for statement in dialect.commit_statements(table) {
            let _ = writeln!(out, "{statement};");
        }
    }
    Ok(out)
}

pub(crate) fn render_config(file: Option<&Path>) -> anyhow::Result<String> {
    let config = match file {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            QuireConfig::load(path)?
        }
        None => QuireConfig::default(),
    };
    Ok(config.to_toml_string()?)
}

pub(crate) fn render_id(raw: &str, format: OutputFormat) -> anyhow::Result<String> {
    let id = ResourceId::parse(raw).with_context(|| format!("invalid resource id {raw:?}"))?;
    let qualifier = match id.qualifier() {
        None => "none".to_string(),
        Some(Qualifier::Description) => "description".to_string(),
        Some(Qualifier::Acl) => "acl".to_string(),
        Some(Qualifier::Memento(at)) => format!("memento {}", at.to_rfc3339()),
    };
    let parent = id.parent().map(|p| p.full_id());

    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "id": id.full_id(),
            "base": id.base_id(),
            "qualifier": qualifier,
            "parent": parent,
            "ancestors": id.ancestors().iter().map(ResourceId::full_id).collect::<Vec<_>>(),
        });
        return Ok(format!("{}\n", serde_json::to_string_pretty(&value)?));
    }

    let mut out = format!("{} {}\n", "✓".green().bold(), id.full_id().bold());
    let _ = writeln!(out, "  Base: {}", id.base_id());
    let _ = writeln!(out, "  Qualifier: {}", qualifier.cyan());
    let _ = writeln!(out, "  Parent: {}", parent.as_deref().unwrap_or("(none)"));
    Ok(out)
}

pub(crate) fn render_intents(file: &Path, format: OutputFormat) -> anyhow::Result<String> {
    let log = FileIntentLog::open(file).with_context(|| format!("cannot open intent log {}", file.display()))?;
    let mut intents = log.unresolved()?;
    intents.sort_by_key(|intent| intent.id);

    if format == OutputFormat::Json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&intents)?));
    }
    if intents.is_empty() {
        return Ok(format!("{} No unresolved intents.\n", "✓".green().bold()));
    }
    let mut out = format!("{} unresolved intent(s):\n", intents.len().to_string().yellow().bold());
    for intent in &intents {
        let _ = writeln!(out, "  #{} tx {} at {}", intent.id, intent.tx, intent.started.to_rfc3339());
        for root in &intent.roots {
            let _ = writeln!(out, "    {}", root.full_id().blue());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_types::{Clock, SystemClock, TxId};

    #[test]
    fn schema_lists_every_table() {
        colored::control::set_override(false);
        let out = render_schema(&SchemaArgs {
            platform: Some(DbPlatform::Postgres),
            config: None,
            ddl_only: false,
        })
        .unwrap();
        assert!(out.contains("postgres"));
        for table in IndexTable::ALL {
            assert!(out.contains(&format!("-- commit {}", table.name())));
        }
        let ddl_only = render_schema(&SchemaArgs {
            platform: Some(DbPlatform::Postgres),
            config: None,
            ddl_only: true,
        })
        .unwrap();
        assert!(!ddl_only.contains("-- commit"));
    }

    #[test]
    fn schema_platform_comes_from_the_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quire.toml");
        std::fs::write(&path, "[index]\nplatform = \"mysql\"\n").unwrap();
        let mut args = SchemaArgs {
            platform: None,
            config: Some(path),
            ddl_only: true,
        };
        assert_eq!(schema_platform(&args).unwrap(), DbPlatform::MySql);
        args.platform = Some(DbPlatform::MariaDb);
        assert_eq!(schema_platform(&args).unwrap(), DbPlatform::MariaDb);
        args.platform = None;
        args.config = None;
        assert_eq!(schema_platform(&args).unwrap(), DbPlatform::H2);
    }

    #[test]
    fn config_roundtrips_through_a_file() {
        let default = render_config(None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quire.toml");
        std::fs::write(&path, "[transaction]\nsession_timeout_secs = 42\n").unwrap();
        let loaded = render_config(Some(&path)).unwrap();
        assert_ne!(loaded, default);
        assert!(loaded.contains("session_timeout_secs = 42"));
        assert!(render_config(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn check_id_decomposes_qualifiers() {
        colored::control::set_override(false);
        let out = render_id("a/b/fcr:acl", OutputFormat::Text).unwrap();
        assert!(out.contains("Qualifier: acl"));
        assert!(out.contains("Base: info:fedora/a/b"));

        let json = render_id("a/b", OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["parent"], "info:fedora/a");
        assert!(render_id("a//b", OutputFormat::Text).is_err());
    }

    #[test]
    fn intents_show_only_unfinished_commits() {
        colored::control::set_override(false);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.wal");
        {
            let log = FileIntentLog::open(&path).unwrap();
            let a = ResourceId::parse("a").unwrap();
            let b = ResourceId::parse("b").unwrap();
            let now = SystemClock.now();
            let done = log.begin(TxId::new(), &[a], now).unwrap();
            log.begin(TxId::new(), &[b], now).unwrap();
            log.complete(done).unwrap();
        }
        let out = render_intents(&path, OutputFormat::Text).unwrap();
        assert!(out.starts_with("1 unresolved"));
        assert!(out.contains("info:fedora/b"));
        assert!(!out.contains("info:fedora/a\n"));
    }
}
