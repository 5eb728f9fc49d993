//! Custom table mappings: an aspect map stored as one row per entity in a
//! caller-named table instead of the EAV tables.
//!
//! The table shape follows two independent flags:
//!
//! | catalog_id | entity_id | primary key              | cleanup before write       |
//! |------------|-----------|--------------------------|----------------------------|
//! | no         | no        | none                     | whole table                |
//! | yes        | no        | none                     | rows of the saved catalog  |
//! | no         | yes       | `(entity_id)`            | none, rows are upserted    |
//! | yes        | yes       | `(catalog_id, entity_id)`| none, rows are upserted    |

use lazy_static::lazy_static;
use regex::Regex;

use super::ddl;
use crate::codec;
use crate::error::{AspectraError, Result};
use crate::schema::AspectDef;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap();
}

const RESERVED_COLUMNS: [&str; 2] = ["catalog_id", "entity_id"];

fn check_identifier(kind: &str, identifier: &str) -> Result<()> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(AspectraError::SchemaViolation(format!(
            "'{}' is not a usable {} name",
            identifier, kind
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    aspect_def_name: String,
    table_name: String,
    property_to_column: Vec<(String, String)>,
    has_catalog_id: bool,
    has_entity_id: bool,
}

impl TableMapping {
    /// Validates every identifier since they are interpolated into SQL.
    pub fn new<I, P, C>(
        aspect_def_name: impl Into<String>,
        table_name: impl Into<String>,
        property_to_column: I,
        has_catalog_id: bool,
        has_entity_id: bool,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let table_name = table_name.into();
        check_identifier("table", &table_name)?;
        let lowered = table_name.to_ascii_lowercase();
        if ddl::TABLES.contains(&lowered.as_str()) || lowered.starts_with("sqlite_") {
            return Err(AspectraError::SchemaViolation(format!(
                "table '{}' belongs to the store and cannot hold mapped aspects",
                table_name
            )));
        }
        let mut columns: Vec<(String, String)> = Vec::new();
        for (property, column) in property_to_column {
            let (property, column) = (property.into(), column.into());
            check_identifier("column", &column)?;
            if RESERVED_COLUMNS.contains(&column.as_str()) {
                return Err(AspectraError::SchemaViolation(format!(
                    "column '{}' of table '{}' is reserved",
                    column, table_name
                )));
            }
            if columns.iter().any(|(p, c)| *p == property || *c == column) {
                return Err(AspectraError::SchemaViolation(format!(
                    "property '{}' or column '{}' is mapped twice in table '{}'",
                    property, column, table_name
                )));
            }
            columns.push((property, column));
        }
        Ok(Self {
            aspect_def_name: aspect_def_name.into(),
            table_name,
            property_to_column: columns,
            has_catalog_id,
            has_entity_id,
        })
    }
    pub fn aspect_def_name(&self) -> &str {
        &self.aspect_def_name
    }
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
    pub fn has_catalog_id(&self) -> bool {
        self.has_catalog_id
    }
    pub fn has_entity_id(&self) -> bool {
        self.has_entity_id
    }
    pub fn column_for(&self, property: &str) -> Option<&str> {
        self.property_to_column
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, c)| c.as_str())
    }

    /// `(property, column)` pairs in the definition's declared order. Every
    /// mapped property must exist on `def` and be single-valued.
    pub fn columns(&self, def: &AspectDef) -> Result<Vec<(String, String)>> {
        for (property, _) in &self.property_to_column {
            match def.property(property) {
                None => {
                    return Err(AspectraError::SchemaViolation(format!(
                        "table '{}' maps '{}', which '{}' does not declare",
                        self.table_name,
                        property,
                        def.name()
                    )));
                }
                Some(p) if p.is_multivalued() => {
                    return Err(AspectraError::SchemaViolation(format!(
                        "multivalued property '{}' cannot be mapped to a column of '{}'",
                        property, self.table_name
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(def
            .properties()
            .iter()
            .filter_map(|p| {
                self.column_for(p.name())
                    .map(|c| (p.name().to_owned(), c.to_owned()))
            })
            .collect())
    }

    fn key_columns(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.has_catalog_id {
            keys.push("catalog_id");
        }
        if self.has_entity_id {
            keys.push("entity_id");
        }
        keys
    }

    pub(crate) fn create_table_sql(&self, def: &AspectDef) -> Result<String> {
        let mut lines: Vec<String> = self
            .key_columns()
            .into_iter()
            .map(|k| format!("{} text not null", k))
            .collect();
        for (property, column) in self.columns(def)? {
            // columns() already checked the property exists
            if let Some(p) = def.property(&property) {
                lines.push(format!("{} {} null", column, codec::sql_type(p.property_type())));
            }
        }
        if self.has_entity_id {
            // never keyed on catalog_id alone
            lines.push(format!(
                "constraint {}_key primary key ({})",
                self.table_name,
                self.key_columns().join(", ")
            ));
        }
        Ok(format!(
            "create table if not exists {} (\n    {}\n)",
            self.table_name,
            lines.join(",\n    ")
        ))
    }

    /// The statement that writes one row, with `?` placeholders in column order.
    pub(crate) fn insert_sql(&self, def: &AspectDef) -> Result<String> {
        let mapped = self.columns(def)?;
        let mut names: Vec<String> = self.key_columns().into_iter().map(str::to_owned).collect();
        names.extend(mapped.iter().map(|(_, c)| c.clone()));
        let placeholders = vec!["?"; names.len()].join(", ");
        let mut sql = format!(
            "insert into {} ({}) values ({})",
            self.table_name,
            names.join(", "),
            placeholders
        );
        if self.has_entity_id {
            let conflict = self.key_columns().join(", ");
            if mapped.is_empty() {
                sql.push_str(&format!(" on conflict ({}) do nothing", conflict));
            } else {
                let updates: Vec<String> = mapped
                    .iter()
                    .map(|(_, c)| format!("{} = excluded.{}", c, c))
                    .collect();
                sql.push_str(&format!(
                    " on conflict ({}) do update set {}",
                    conflict,
                    updates.join(", ")
                ));
            }
        }
        Ok(sql)
    }

    /// Cleanup run before rows are written; `None` for upserting shapes.
    pub(crate) fn cleanup_sql(&self) -> Option<String> {
        match (self.has_catalog_id, self.has_entity_id) {
            (false, false) => Some(format!("delete from {}", self.table_name)),
            (true, false) => Some(format!("delete from {} where catalog_id = ?", self.table_name)),
            _ => None,
        }
    }

    pub(crate) fn select_sql(&self, def: &AspectDef) -> Result<String> {
        let mut names: Vec<String> = self.key_columns().into_iter().map(str::to_owned).collect();
        names.extend(self.columns(def)?.into_iter().map(|(_, c)| c));
        let filter = if self.has_catalog_id { " where catalog_id = ?" } else { "" };
        Ok(format!(
            "select {} from {}{} order by rowid",
            names.join(", "),
            self.table_name,
            filter
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Mutability, PropertyDef, PropertyType};

    fn item() -> AspectDef {
        AspectDef::new(
            "item",
            vec![
                PropertyDef::new("name", PropertyType::String).unwrap(),
                PropertyDef::new("weight", PropertyType::Float).unwrap(),
            ],
            Mutability::Immutable,
        )
        .unwrap()
    }

    #[test]
    fn identifiers_are_checked() {
        assert!(TableMapping::new("item", "items; drop table x", [("name", "name")], true, true).is_err());
        assert!(TableMapping::new("item", "items", [("name", "na me")], true, true).is_err());
        assert!(TableMapping::new("item", "items", [("name", "entity_id")], true, true).is_err());
        assert!(TableMapping::new("item", "items", [("name", "name")], true, true).is_ok());
    }

    #[test]
    fn store_tables_cannot_be_mapped() {
        for table in ["catalog", "property_value", "Property_Value", "sqlite_master"] {
            assert!(matches!(
                TableMapping::new("item", table, [("name", "name")], false, false),
                Err(AspectraError::SchemaViolation(_))
            ));
        }
    }

    #[test]
    fn columns_follow_declared_order() {
        let mapping =
            TableMapping::new("item", "items", [("weight", "w"), ("name", "n")], false, true).unwrap();
        let columns = mapping.columns(&item()).unwrap();
        assert_eq!(columns[0], ("name".to_owned(), "n".to_owned()));
        assert_eq!(columns[1], ("weight".to_owned(), "w".to_owned()));
    }

    #[test]
    fn catalog_id_alone_is_never_a_key() {
        let mapping = TableMapping::new("item", "items", [("name", "n")], true, false).unwrap();
        let ddl = mapping.create_table_sql(&item()).unwrap();
        assert!(!ddl.contains("primary key"));
        assert!(mapping.cleanup_sql().unwrap().contains("where catalog_id = ?"));
    }
}
