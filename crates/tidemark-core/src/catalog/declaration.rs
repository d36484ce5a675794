//! Entity declarations and their conversion into a schema snapshot.

use super::{
    ColumnDef, ColumnType, ConstraintDef, DefaultValue, DeleteBehavior, SchemaError,
    SchemaSnapshot, TableDef,
};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::BTreeMap;

/// Declaration of one entity: the table it maps to, its fields, key and relationships.
///
/// Several declarations may target the same table; they are merged when the
/// snapshot is built.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct EntityDecl {
    /// Table name.
    pub table: String,
    /// Primary key columns. Fields flagged with `key` are appended.
    #[serde(default)]
    pub key: Vec<String>,
    /// Field declarations.
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    /// Outgoing relationships.
    #[serde(default)]
    pub relationships: Vec<RelationshipDecl>,
    /// Check constraints.
    #[serde(default)]
    pub checks: Vec<CheckDecl>,
}

/// Declaration of a single field.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct FieldDecl {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    #[serde(default)]
    pub nullable: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Whether values must be unique.
    #[serde(default)]
    pub unique: bool,
    /// Whether this field is part of the primary key.
    #[serde(default)]
    pub key: bool,
}

/// Declaration of a relationship (foreign key) to another table.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct RelationshipDecl {
    /// Constraint name. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Referencing columns on the declaring table.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references: String,
    /// Referenced columns. Defaults to the referenced table's primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references_columns: Option<Vec<String>>,
    /// Referential action on delete.
    #[serde(default)]
    pub on_delete: DeleteBehavior,
}

/// Declaration of a check constraint.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct CheckDecl {
    /// Constraint name.
    pub name: String,
    /// Boolean SQL expression.
    pub expression: String,
}

impl EntityDecl {
    /// Create a new entity declaration.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: Vec::new(),
            fields: Vec::new(),
            relationships: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Set the primary key.
    pub fn with_key(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a relationship.
    pub fn with_relationship(mut self, relationship: RelationshipDecl) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Add a check constraint.
    pub fn with_check(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.checks.push(CheckDecl {
            name: name.into(),
            expression: expression.into(),
        });
        self
    }
}

impl FieldDecl {
    /// Create a non-nullable field.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
            unique: false,
            key: false,
        }
    }

    /// Mark the field nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the field as (part of) the primary key.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark the field unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    fn to_column(&self) -> ColumnDef {
        ColumnDef {
            name: self.name.clone(),
            column_type: self.column_type.clone(),
            nullable: self.nullable,
            default: self.default.clone(),
        }
    }
}

impl RelationshipDecl {
    /// A relationship from `column` to the primary key of `references`.
    pub fn new(column: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            name: None,
            columns: vec![column.into()],
            references: references.into(),
            references_columns: None,
            on_delete: DeleteBehavior::default(),
        }
    }

    /// Set an explicit constraint name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reference explicit columns instead of the primary key.
    pub fn to_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.references_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the delete behavior.
    pub fn on_delete(mut self, behavior: DeleteBehavior) -> Self {
        self.on_delete = behavior;
        self
    }
}

/// Check that a name is a plain identifier.
pub fn validate_identifier(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_string()))
    }
}

impl SchemaSnapshot {
    /// Build a canonical snapshot from entity declarations.
    ///
    /// Declarations of the same table are merged. Key columns are forced
    /// non-nullable, unique fields become `uq_<table>_<column>` constraints and
    /// unnamed relationships become `fk_<table>_<referenced>_<columns>`.
    pub fn from_declarations<'a>(
        declarations: impl IntoIterator<Item = &'a EntityDecl>,
    ) -> Result<Self, SchemaError> {
        let mut tables: BTreeMap<String, TableDef> = BTreeMap::new();
        let mut relationships: Vec<(String, RelationshipDecl)> = Vec::new();

        for decl in declarations {
            validate_identifier(&decl.table)?;
            let table = tables
                .entry(decl.table.clone())
                .or_insert_with(|| TableDef::new(&decl.table));

            for field in &decl.fields {
                validate_identifier(&field.name)?;
                let column = field.to_column();
                match table.columns.get(&field.name) {
                    Some(existing) if *existing != column => {
                        return Err(SchemaError::ConflictingColumn {
                            table: decl.table.clone(),
                            column: field.name.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        table.columns.insert(field.name.clone(), column);
                    }
                }

                if field.unique {
                    let name = format!("uq_{}_{}", decl.table, field.name);
                    insert_constraint(
                        table,
                        ConstraintDef::unique(name, &decl.table, &field.name),
                    )?;
                }
            }

            let mut key = decl.key.clone();
            for field in decl.fields.iter().filter(|f| f.key) {
                if !key.contains(&field.name) {
                    key.push(field.name.clone());
                }
            }
            if !key.is_empty() {
                if table.primary_key.is_empty() {
                    table.primary_key = key;
                } else if table.primary_key != key {
                    return Err(SchemaError::ConflictingPrimaryKey {
                        table: decl.table.clone(),
                        first: table.primary_key.join(", "),
                        second: key.join(", "),
                    });
                }
            }

            for check in &decl.checks {
                validate_identifier(&check.name)?;
                insert_constraint(
                    table,
                    ConstraintDef::check(&check.name, &decl.table, &check.expression),
                )?;
            }

            relationships.extend(
                decl.relationships
                    .iter()
                    .map(|r| (decl.table.clone(), r.clone())),
            );
        }

        for table in tables.values_mut() {
            if table.primary_key.is_empty() {
                return Err(SchemaError::MissingPrimaryKey {
                    table: table.name.clone(),
                });
            }
            for key in &table.primary_key {
                let column =
                    table
                        .columns
                        .get_mut(key)
                        .ok_or_else(|| SchemaError::UnknownColumn {
                            table: table.name.clone(),
                            column: key.clone(),
                        })?;
                column.nullable = false;
            }
        }

        for (owner, relationship) in relationships {
            let constraint = resolve_relationship(&tables, &owner, relationship)?;
            let table = tables
                .get_mut(&owner)
                .ok_or_else(|| SchemaError::UnknownTable {
                    table: owner.clone(),
                })?;
            insert_constraint(table, constraint)?;
        }

        let snapshot = SchemaSnapshot { tables };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

fn resolve_relationship(
    tables: &BTreeMap<String, TableDef>,
    owner: &str,
    relationship: RelationshipDecl,
) -> Result<ConstraintDef, SchemaError> {
    let name = relationship.name.unwrap_or_else(|| {
        format!(
            "fk_{owner}_{}_{}",
            relationship.references,
            relationship.columns.join("_")
        )
    });
    validate_identifier(&name)?;

    let target =
        tables
            .get(&relationship.references)
            .ok_or_else(|| SchemaError::InvalidReference {
                constraint: name.clone(),
                reason: format!("table '{}' does not exist", relationship.references),
            })?;

    if relationship.columns.is_empty() {
        return Err(SchemaError::InvalidReference {
            constraint: name,
            reason: "no referencing columns".to_string(),
        });
    }

    let references_columns = relationship
        .references_columns
        .unwrap_or_else(|| target.primary_key.clone());

    Ok(ConstraintDef::ForeignKey {
        name,
        table: owner.to_string(),
        columns: relationship.columns,
        references_table: relationship.references,
        references_columns,
        on_delete: relationship.on_delete,
    })
}

fn insert_constraint(table: &mut TableDef, constraint: ConstraintDef) -> Result<(), SchemaError> {
    match table.constraints.get(constraint.name()) {
        Some(existing) if *existing != constraint => Err(SchemaError::ConstraintExists {
            table: table.name.clone(),
            constraint: constraint.name().to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            table
                .constraints
                .insert(constraint.name().to_string(), constraint);
            Ok(())
        }
    }
}
