//! SQL rendering of operations, for review and for running migrations by hand.

use super::model::Migration;
use super::operation::Operation;

/// Which half of a migration to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward operations.
    Up,
    /// Reverse operations.
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Render one operation as SQL statements.
pub fn operation_sql(op: &Operation) -> String {
    match op {
        Operation::CreateTable { table } => table.to_sql(),
        Operation::DropTable { table } => format!("DROP TABLE \"{}\";", table.name),
        Operation::AddColumn { table, column } => {
            format!("ALTER TABLE \"{table}\" ADD COLUMN {};", column.to_sql())
        }
        Operation::DropColumn { table, column } => {
            format!("ALTER TABLE \"{table}\" DROP COLUMN \"{}\";", column.name)
        }
        Operation::AlterColumn { table, from, to } => {
            let prefix = format!("ALTER TABLE \"{table}\" ALTER COLUMN \"{}\"", to.name);
            let mut statements = Vec::new();
            if from.column_type != to.column_type {
                statements.push(format!(
                    "{prefix} TYPE {};",
                    to.column_type.to_string().to_uppercase()
                ));
            }
            if from.nullable != to.nullable {
                let action = if to.nullable { "DROP" } else { "SET" };
                statements.push(format!("{prefix} {action} NOT NULL;"));
            }
            if from.default != to.default {
                statements.push(match &to.default {
                    Some(default) => format!("{prefix} SET DEFAULT {};", default.to_sql()),
                    None => format!("{prefix} DROP DEFAULT;"),
                });
            }
            statements.join("\n")
        }
        Operation::AlterPrimaryKey { table, to, .. } => {
            let key = to
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "ALTER TABLE \"{table}\" DROP CONSTRAINT \"pk_{table}\";\n\
                 ALTER TABLE \"{table}\" ADD CONSTRAINT \"pk_{table}\" PRIMARY KEY ({key});"
            )
        }
        Operation::RenameTable { from, to } => {
            format!("ALTER TABLE \"{from}\" RENAME TO \"{to}\";")
        }
        Operation::RenameColumn { table, from, to } => {
            format!("ALTER TABLE \"{table}\" RENAME COLUMN \"{from}\" TO \"{to}\";")
        }
        Operation::AddConstraint { constraint } => format!(
            "ALTER TABLE \"{}\" ADD {};",
            constraint.table(),
            constraint.to_sql()
        ),
        Operation::DropConstraint { constraint } => format!(
            "ALTER TABLE \"{}\" DROP CONSTRAINT \"{}\";",
            constraint.table(),
            constraint.name()
        ),
        Operation::Irreversible { reason } => format!("-- irreversible: {reason}"),
    }
}

/// Render a list of operations under a header comment.
pub fn render_operations(title: &str, ops: &[Operation]) -> String {
    let mut script = format!("-- {title}\n");
    for op in ops {
        script.push_str(&operation_sql(op));
        script.push('\n');
    }
    script
}

/// Render one direction of a migration.
pub fn render_migration(migration: &Migration, direction: Direction) -> String {
    let ops = match direction {
        Direction::Up => &migration.up,
        Direction::Down => &migration.down,
    };
    render_operations(&format!("{} ({direction})", migration.id), ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, ConstraintDef, DefaultValue};
    use crate::migration::{GeneratorOptions, MigrationId, ScriptGenerator};

    #[test]
    fn test_alter_column_sql() {
        let op = Operation::AlterColumn {
            table: "Users".into(),
            from: ColumnDef::nullable("Email", ColumnType::Varchar(10)),
            to: ColumnDef::new("Email", ColumnType::Varchar(20))
                .with_default(DefaultValue::String(String::new())),
        };

        assert_eq!(
            operation_sql(&op),
            "ALTER TABLE \"Users\" ALTER COLUMN \"Email\" TYPE VARCHAR(20);\n\
             ALTER TABLE \"Users\" ALTER COLUMN \"Email\" SET NOT NULL;\n\
             ALTER TABLE \"Users\" ALTER COLUMN \"Email\" SET DEFAULT '';"
        );
    }

    #[test]
    fn test_constraint_sql() {
        let fk = ConstraintDef::foreign_key("fk_a_b", "A", "BId", "B", "Id");
        assert_eq!(
            operation_sql(&Operation::DropConstraint { constraint: fk }),
            "ALTER TABLE \"A\" DROP CONSTRAINT \"fk_a_b\";"
        );
    }

    #[test]
    fn test_render_migration_both_directions() {
        let migration = ScriptGenerator::generate(
            MigrationId::new(1, "AddEmail").unwrap(),
            vec![Operation::AddColumn {
                table: "Users".into(),
                column: ColumnDef::nullable("Email", ColumnType::Varchar(20)),
            }],
            &GeneratorOptions::default(),
        )
        .unwrap();

        assert_eq!(
            render_migration(&migration, Direction::Up),
            "-- 1_AddEmail (up)\nALTER TABLE \"Users\" ADD COLUMN \"Email\" VARCHAR(20);\n"
        );
        assert_eq!(
            render_migration(&migration, Direction::Down),
            "-- 1_AddEmail (down)\nALTER TABLE \"Users\" DROP COLUMN \"Email\";\n"
        );
    }
}
