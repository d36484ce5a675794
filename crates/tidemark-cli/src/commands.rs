//! Command implementations. Each returns the text printed on success.

use crate::config::Settings;
use crate::error::CliError;
use crate::formatter::{create_formatter, format_report, OutputFormat};
use crate::{Args, Command};
use chrono::Utc;
use std::path::Path;
use tidemark_core::migration::{
    render_migration, Direction, DiffOptions, GeneratorOptions, MigrationError, MigrationId,
    MigrationRunner, MigrationSet, RunnerConfig, SchemaDiff, ScriptGenerator, Target,
};
use tidemark_core::{open_store, EntityDecl, SchemaSnapshot, SledStore, StoreConfig};
use tracing::debug;

/// Run the parsed command.
pub fn run(args: &Args) -> Result<String, CliError> {
    let settings = Settings::resolve(args)?;
    debug!(?settings, "resolved settings");

    match &args.command {
        Command::New {
            name,
            allow_destructive,
            accept_irreversible,
            rename_table,
            rename_column,
        } => {
            let mut options = DiffOptions::new().allow_destructive(*allow_destructive);
            for value in rename_table {
                let (from, to) = parse_table_rename(value)?;
                options = options.with_table_rename(from, to);
            }
            for value in rename_column {
                let (table, from, to) = parse_column_rename(value)?;
                options = options.with_column_rename(table, from, to);
            }
            let generator = GeneratorOptions::default().accept_irreversible(*accept_irreversible);
            new_migration(&settings, name, options, &generator)
        }
        Command::List { format } => list(&settings, *format),
        Command::Up { to } => up(&settings, to.as_deref()),
        Command::Down => down(&settings),
        Command::RemoveLast => remove_last(&settings),
        Command::Script { from, to } => script(&settings, from.as_deref(), to.as_deref()),
    }
}

fn open(settings: &Settings) -> Result<SledStore, CliError> {
    Ok(open_store(
        StoreConfig::new(&settings.store),
        settings.lock_timeout,
    )?)
}

fn runner(settings: &Settings) -> MigrationRunner {
    let mut config = RunnerConfig::default().lock_timeout(settings.lock_timeout);
    if let Some(timeout) = settings.transaction_timeout {
        config = config.transaction_timeout(timeout);
    }
    MigrationRunner::new(config)
}

/// Read the entity declarations file: a JSON array of entities.
fn load_declarations(path: &Path) -> Result<Vec<EntityDecl>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| CliError::Schema {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn new_migration(
    settings: &Settings,
    name: &str,
    mut options: DiffOptions,
    generator: &GeneratorOptions,
) -> Result<String, CliError> {
    // Reject a bad name before touching the store
    tidemark_core::migration::validate_name(name)?;

    let declarations = load_declarations(&settings.schema)?;
    let declared = SchemaSnapshot::from_declarations(&declarations)?;

    let store = open(settings)?;
    let mut set = MigrationSet::load(&settings.migrations_dir)?;
    let baseline = set.projected_snapshot(store.history())?;
    options.populated_tables = store.populated_tables()?;

    let up = SchemaDiff::compute(&declared, &baseline, &options)?;
    if up.is_empty() {
        return Ok("No changes".to_string());
    }

    let order_key = set.next_order_key(store.history(), Utc::now())?;
    let migration = ScriptGenerator::generate(MigrationId::new(order_key, name)?, up, generator)?;
    let operations = migration.up.len();
    let warnings = migration.warnings.clone();
    let path = set.write(migration)?;

    let mut output = format!("Created {} ({} operations)", path.display(), operations);
    for warning in warnings {
        output.push_str("\nwarning: ");
        output.push_str(&warning);
    }
    Ok(output)
}

fn list(settings: &Settings, format: OutputFormat) -> Result<String, CliError> {
    let store = open(settings)?;
    let set = MigrationSet::load(&settings.migrations_dir)?;
    let entries = set.status(store.history())?;
    Ok(create_formatter(format).format_entries(&entries))
}

fn up(settings: &Settings, to: Option<&str>) -> Result<String, CliError> {
    let store = open(settings)?;
    let set = MigrationSet::load(&settings.migrations_dir)?;
    let runner = runner(settings);

    let report = match to {
        Some(to) => {
            let target = match to.parse::<Target>() {
                Ok(target) => target,
                Err(never) => match never {},
            };
            runner.apply_up_to(&target, &set, &store)?
        }
        None => runner.apply_pending(&set, &store)?,
    };
    store.flush()?;
    Ok(format_report(&report))
}

fn down(settings: &Settings) -> Result<String, CliError> {
    let store = open(settings)?;
    let record = runner(settings).revert(&store)?;
    store.flush()?;
    Ok(format!("Reverted {}", record.id()))
}

fn remove_last(settings: &Settings) -> Result<String, CliError> {
    let store = open(settings)?;
    let mut set = MigrationSet::load(&settings.migrations_dir)?;
    let removed = set.remove_last(store.history())?;
    Ok(format!("Removed {}", removed.id.file_name()))
}

/// SQL moving the schema from just after `from` to just after `to`.
///
/// Both ends are migration names from the migrations directory; `0` or an
/// absent `from` means the empty schema, an absent `to` the newest
/// migration. When `from` is later than `to` the down steps are rendered.
fn script(settings: &Settings, from: Option<&str>, to: Option<&str>) -> Result<String, CliError> {
    let set = MigrationSet::load(&settings.migrations_dir)?;
    let position = |reference: Option<&str>, default: u64| -> Result<u64, MigrationError> {
        match reference {
            None => Ok(default),
            Some("0") => Ok(0),
            Some(name) => set
                .find(name)
                .map(|m| m.id.order_key)
                .ok_or_else(|| MigrationError::NotFound {
                    name: name.to_string(),
                }),
        }
    };

    let newest = set.last().map_or(0, |m| m.id.order_key);
    let from = position(from, 0)?;
    let to = position(to, newest)?;

    let sections: Vec<String> = if from <= to {
        set.migrations()
            .iter()
            .filter(|m| m.id.order_key > from && m.id.order_key <= to)
            .map(|m| render_migration(m, Direction::Up))
            .collect()
    } else {
        set.migrations()
            .iter()
            .rev()
            .filter(|m| m.id.order_key > to && m.id.order_key <= from)
            .map(|m| render_migration(m, Direction::Down))
            .collect()
    };

    if sections.is_empty() {
        return Ok("-- no migrations in range".to_string());
    }
    Ok(sections.join("\n"))
}

fn parse_table_rename(value: &str) -> Result<(String, String), CliError> {
    let invalid = || CliError::InvalidArgument {
        flag: "--rename-table",
        value: value.to_string(),
        expected: "OLD=NEW",
    };
    let (from, to) = value.split_once('=').ok_or_else(invalid)?;
    if from.is_empty() || to.is_empty() {
        return Err(invalid());
    }
    Ok((from.to_string(), to.to_string()))
}

fn parse_column_rename(value: &str) -> Result<(String, String, String), CliError> {
    let invalid = || CliError::InvalidArgument {
        flag: "--rename-column",
        value: value.to_string(),
        expected: "TABLE.OLD=NEW",
    };
    let (column, to) = value.split_once('=').ok_or_else(invalid)?;
    let (table, from) = column.split_once('.').ok_or_else(invalid)?;
    if table.is_empty() || from.is_empty() || to.is_empty() {
        return Err(invalid());
    }
    Ok((table.to_string(), from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_renames() {
        assert_eq!(
            parse_table_rename("Users=Accounts").unwrap(),
            ("Users".to_string(), "Accounts".to_string())
        );
        assert_eq!(
            parse_column_rename("Users.Mail=Email").unwrap(),
            ("Users".to_string(), "Mail".to_string(), "Email".to_string())
        );

        assert_eq!(parse_table_rename("Users").unwrap_err().exit_code(), 5);
        assert_eq!(parse_column_rename("Mail=Email").unwrap_err().exit_code(), 5);
        assert!(parse_column_rename("Users.=Email").is_err());
    }
}
