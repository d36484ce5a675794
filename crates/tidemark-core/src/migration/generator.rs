//! Migration script generation - pairs forward operations with their inverses.

use super::error::MigrationError;
use super::model::{Migration, MigrationId};
use super::operation::{Inversion, Operation};
use tracing::warn;

/// Options for generating a migration.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratorOptions {
    /// Accept down steps that cannot restore the prior state.
    pub accept_irreversible: bool,
}

impl GeneratorOptions {
    /// Accept or refuse irreversible operations.
    pub fn accept_irreversible(mut self, accept: bool) -> Self {
        self.accept_irreversible = accept;
        self
    }
}

/// Builds migrations from operation lists.
pub struct ScriptGenerator;

impl ScriptGenerator {
    /// Generate a migration whose up steps are `up` and whose down steps are
    /// their inverses in reverse order.
    ///
    /// Fails with [`MigrationError::IrreversibleOperation`] when an operation
    /// has no exact inverse, unless `options.accept_irreversible` is set; in
    /// that case the best-effort inverse (or an [`Operation::Irreversible`]
    /// marker) is used and a warning recorded.
    pub fn generate(
        id: MigrationId,
        up: Vec<Operation>,
        options: &GeneratorOptions,
    ) -> Result<Migration, MigrationError> {
        let (down, warnings) = Self::invert_all(&up, options)?;

        for warning in &warnings {
            warn!(migration = %id, "{warning}");
        }

        Migration::new(id, up, down, warnings)
    }

    /// Compute the down steps for `up`, with the warnings they carry.
    pub fn invert_all(
        up: &[Operation],
        options: &GeneratorOptions,
    ) -> Result<(Vec<Operation>, Vec<String>), MigrationError> {
        let mut down = Vec::with_capacity(up.len());
        let mut warnings = Vec::new();
        let mut refused = Vec::new();

        for op in up.iter().rev() {
            match op.invert() {
                Inversion::Exact(inverse) => down.push(inverse),
                Inversion::DataLoss { operation, warning } => {
                    down.push(operation);
                    warnings.push(warning);
                }
                Inversion::Lossy { operation, reason } => {
                    if options.accept_irreversible {
                        down.push(operation);
                        warnings.push(reason);
                    } else {
                        refused.push(format!("{}: {reason}", op.describe()));
                    }
                }
                Inversion::Impossible { reason } => {
                    if options.accept_irreversible {
                        down.push(Operation::Irreversible {
                            reason: reason.clone(),
                        });
                        warnings.push(reason);
                    } else {
                        refused.push(format!("{}: {reason}", op.describe()));
                    }
                }
            }
        }

        if !refused.is_empty() {
            return Err(MigrationError::IrreversibleOperation { operations: refused });
        }

        Ok((down, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, TableDef};
    use pretty_assertions::assert_eq;

    fn id() -> MigrationId {
        MigrationId::new(20240101000000, "Test").unwrap()
    }

    fn users() -> TableDef {
        TableDef::new("Users")
            .with_column(ColumnDef::new("Id", ColumnType::Int))
            .with_primary_key(["Id"])
    }

    #[test]
    fn test_down_is_reversed_inverse() {
        let up = vec![
            Operation::CreateTable { table: users() },
            Operation::AddColumn {
                table: "Users".into(),
                column: ColumnDef::nullable("Email", ColumnType::Varchar(20)),
            },
        ];

        let migration = ScriptGenerator::generate(id(), up, &GeneratorOptions::default()).unwrap();

        assert_eq!(
            migration.down,
            vec![
                Operation::DropColumn {
                    table: "Users".into(),
                    column: ColumnDef::nullable("Email", ColumnType::Varchar(20)),
                },
                Operation::DropTable { table: users() },
            ]
        );
        assert!(migration.warnings.is_empty());
    }

    #[test]
    fn test_nullable_column_drop_warns() {
        let up = vec![Operation::DropColumn {
            table: "Users".into(),
            column: ColumnDef::nullable("LastName", ColumnType::Varchar(10)),
        }];

        let migration = ScriptGenerator::generate(id(), up, &GeneratorOptions::default()).unwrap();

        assert_eq!(
            migration.down,
            vec![Operation::AddColumn {
                table: "Users".into(),
                column: ColumnDef::nullable("LastName", ColumnType::Varchar(10)),
            }]
        );
        assert_eq!(migration.warnings.len(), 1);
    }

    #[test]
    fn test_narrowing_is_refused() {
        let up = vec![Operation::AlterColumn {
            table: "Users".into(),
            from: ColumnDef::new("Email", ColumnType::Varchar(20)),
            to: ColumnDef::new("Email", ColumnType::Varchar(10)),
        }];

        let err =
            ScriptGenerator::generate(id(), up.clone(), &GeneratorOptions::default()).unwrap_err();
        assert!(matches!(err, MigrationError::IrreversibleOperation { .. }));

        let migration = ScriptGenerator::generate(
            id(),
            up,
            &GeneratorOptions::default().accept_irreversible(true),
        )
        .unwrap();
        assert_eq!(migration.warnings.len(), 1);
        assert!(matches!(migration.down[0], Operation::AlterColumn { .. }));
    }

    #[test]
    fn test_marker_inverse_becomes_irreversible() {
        let up = vec![Operation::Irreversible {
            reason: "data fix".into(),
        }];

        assert!(ScriptGenerator::generate(id(), up.clone(), &GeneratorOptions::default()).is_err());

        let migration = ScriptGenerator::generate(
            id(),
            up,
            &GeneratorOptions::default().accept_irreversible(true),
        )
        .unwrap();
        assert_eq!(
            migration.down,
            vec![Operation::Irreversible {
                reason: "data fix".into()
            }]
        );
    }
}
