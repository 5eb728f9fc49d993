//! SQLite persistence for catalogs.
//!
//! The [`Persistor`] owns one connection. Each [`Persistor::save_catalog`]
//! runs in exactly one transaction, so a save either lands completely or not
//! at all. Loads never write and never open a transaction.
//!
//! Aspect maps are stored in the generic EAV tables unless a
//! [`TableMapping`] is registered for their aspect definition, in which case
//! they go to a table of their own, one row per entity.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{Catalog, Species};
use crate::construct::{OtherHasher, Session};
use crate::datatype::Uri;
use crate::error::{AspectraError, Result, ResultExt};
use crate::schema::AspectDef;

mod ddl;
mod load;
mod mapping;
mod save;

pub use mapping::TableMapping;

pub(crate) type Mappings = HashMap<String, TableMapping, OtherHasher>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    #[default]
    InMemory,
    File(PathBuf),
}

pub struct Persistor {
    connection: Connection,
    table_mappings: Mappings,
}

impl Persistor {
    pub fn open(mode: &PersistenceMode) -> Result<Self> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        info!(?mode, "opened store");
        Self::from_connection(connection)
    }
    /// Wraps an existing connection and makes sure the schema exists.
    pub fn from_connection(connection: Connection) -> Result<Self> {
        let persistor = Self {
            connection,
            table_mappings: HashMap::default(),
        };
        persistor.bootstrap()?;
        Ok(persistor)
    }
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    // ------------- DDL -------------
    pub fn bootstrap(&self) -> Result<()> {
        ddl::bootstrap(&self.connection)
    }
    /// Drops the core tables and every registered mapped table.
    pub fn drop_all(&self) -> Result<()> {
        for mapping in self.table_mappings.values() {
            self.connection
                .execute_batch(&format!("drop table if exists {}", mapping.table_name()))?;
        }
        ddl::drop_all(&self.connection)
    }
    pub fn truncate_all(&self) -> Result<()> {
        for mapping in self.table_mappings.values() {
            if ddl::table_exists(&self.connection, mapping.table_name())? {
                self.connection
                    .execute_batch(&format!("delete from {}", mapping.table_name()))?;
            }
        }
        ddl::truncate_all(&self.connection)
    }
    pub fn create_mapped_table(&self, mapping: &TableMapping, def: &AspectDef) -> Result<()> {
        self.connection.execute_batch(&mapping.create_table_sql(def)?)?;
        Ok(())
    }

    // ------------- table mappings -------------
    pub fn register_table_mapping<I, P, C>(
        &mut self,
        aspect_def_name: &str,
        table_name: &str,
        property_to_column: I,
        has_catalog_id: bool,
        has_entity_id: bool,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let mapping = TableMapping::new(
            aspect_def_name,
            table_name,
            property_to_column,
            has_catalog_id,
            has_entity_id,
        )?;
        self.add_table_mapping(mapping);
        Ok(())
    }
    /// Replaces any mapping already registered for the same aspect def.
    pub fn add_table_mapping(&mut self, mapping: TableMapping) {
        debug!(
            aspect_def = mapping.aspect_def_name(),
            table = mapping.table_name(),
            "registered table mapping"
        );
        self.table_mappings
            .insert(mapping.aspect_def_name().to_owned(), mapping);
    }
    pub fn table_mapping(&self, aspect_def_name: &str) -> Result<&TableMapping> {
        self.table_mappings
            .get(aspect_def_name)
            .ok_or_else(|| AspectraError::not_found("table mapping", aspect_def_name))
    }
    pub fn unregister_table_mapping(&mut self, aspect_def_name: &str) -> Option<TableMapping> {
        self.table_mappings.remove(aspect_def_name)
    }

    // ------------- catalogs -------------
    /// Builds a catalog with one aspect map per definition, saves it and
    /// hands it back.
    pub fn create_catalog(
        &mut self,
        session: &Session,
        species: Species,
        upstream: Option<Uuid>,
        uri: Option<Uri>,
        aspect_defs: Vec<Arc<AspectDef>>,
    ) -> Result<Catalog> {
        let mut shared = Vec::with_capacity(aspect_defs.len());
        for def in aspect_defs {
            shared.push(session.register_aspect_def(def)?);
        }
        let mut catalog = Catalog::new(species, upstream)?.with_aspect_defs(shared)?;
        catalog.set_uri(uri);
        self.save_catalog(&catalog)?;
        Ok(catalog)
    }

    pub fn save_catalog(&mut self, catalog: &Catalog) -> Result<()> {
        let catalog_id = catalog.id();
        info!(catalog = %catalog_id, hierarchies = catalog.hierarchy_count(), "saving catalog");
        let transaction = self.connection.transaction().context("begin save", catalog_id)?;
        save::write_catalog(&transaction, catalog, &self.table_mappings).context("save", catalog_id)?;
        // dropping an uncommitted transaction rolls it back
        transaction.commit().context("commit save", catalog_id)?;
        info!(catalog = %catalog_id, "saved catalog");
        Ok(())
    }

    pub fn load_catalog(&self, session: &Session, catalog_id: Uuid) -> Result<Catalog> {
        info!(catalog = %catalog_id, "loading catalog");
        let catalog = load::load_catalog(&self.connection, session, catalog_id, &self.table_mappings)
            .context("load", catalog_id)?;
        info!(catalog = %catalog_id, hierarchies = catalog.hierarchy_count(), "loaded catalog");
        Ok(catalog)
    }

    /// Refreshes an in-memory catalog from storage, reusing hierarchies that
    /// already exist under the stored names.
    pub fn load_into(&self, session: &Session, catalog: &mut Catalog) -> Result<()> {
        let catalog_id = catalog.id();
        info!(catalog = %catalog_id, "reloading catalog");
        load::load_into(&self.connection, session, catalog, &self.table_mappings).context("load", catalog_id)
    }

    pub fn catalog_exists(&self, catalog_id: Uuid) -> Result<bool> {
        Ok(load::read_catalog_row(&self.connection, catalog_id)
            .context("check catalog", catalog_id)?
            .is_some())
    }

    pub fn list_catalogs(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<String> = self
            .connection
            .prepare("select catalog_id from catalog order by rowid")?
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        ids.iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map_err(|_| AspectraError::corruption(format!("'{}' is not a catalog id", id)))
            })
            .collect()
    }

    pub fn delete_catalog(&mut self, catalog_id: Uuid) -> Result<()> {
        if !self.catalog_exists(catalog_id)? {
            return Err(AspectraError::not_found("catalog", catalog_id.to_string()));
        }
        let transaction = self.connection.transaction().context("begin delete", catalog_id)?;
        save::delete_catalog_rows(&transaction, catalog_id, &self.table_mappings)
            .context("delete", catalog_id)?;
        transaction.commit().context("commit delete", catalog_id)?;
        info!(catalog = %catalog_id, "deleted catalog");
        Ok(())
    }
}
