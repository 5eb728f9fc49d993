//! Layered settings: built-in defaults, then an optional TOML file, then
//! `ASPECTRA_*` environment variables (`__` separates nested keys).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::aspect::{CachingEntity, EvictionPolicy};
use crate::catalog::Catalog;
use crate::construct::Entity;
use crate::error::Result;
use crate::persist::{PersistenceMode, Persistor, TableMapping};

pub const DEFAULT_CONFIG_FILE: &str = "aspectra.toml";
const ENV_PREFIX: &str = "ASPECTRA";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    Weak,
    MaxEntries(usize),
    Ttl(u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    #[serde(default)]
    pub policy: CachePolicy,
}

impl CacheSettings {
    pub fn eviction_policy(&self) -> EvictionPolicy {
        match self.policy {
            CachePolicy::Weak => EvictionPolicy::WeakRef,
            CachePolicy::MaxEntries(n) => EvictionPolicy::MaxEntries(n),
            CachePolicy::Ttl(seconds) => EvictionPolicy::Ttl(Duration::from_secs(seconds)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMappingSettings {
    pub aspect_def: String,
    pub table: String,
    /// property name to column name
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub has_catalog_id: bool,
    #[serde(default)]
    pub has_entity_id: bool,
}

impl TableMappingSettings {
    pub fn to_mapping(&self) -> Result<TableMapping> {
        TableMapping::new(
            self.aspect_def.as_str(),
            self.table.as_str(),
            self.columns.iter().map(|(p, c)| (p.as_str(), c.as_str())),
            self.has_catalog_id,
            self.has_entity_id,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: PersistenceMode,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub table_mappings: Vec<TableMappingSettings>,
}

fn default_log_filter() -> String {
    "info".to_owned()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PersistenceMode::default(),
            log_filter: default_log_filter(),
            cache: CacheSettings::default(),
            table_mappings: Vec::new(),
        }
    }
}

impl Settings {
    /// Reads `path` if given (it must then exist), otherwise `aspectra.toml`
    /// in the working directory if present, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };
        let settings = Config::builder()
            .set_default("log_filter", default_log_filter())?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parses settings from TOML text alone, without file or environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Opens the configured store with every configured table mapping registered.
    pub fn open_persistor(&self) -> Result<Persistor> {
        let mut persistor = Persistor::open(&self.database)?;
        for mapping in &self.table_mappings {
            persistor.add_table_mapping(mapping.to_mapping()?);
        }
        Ok(persistor)
    }

    /// Wraps `entity` in an aspect cache evicting by the configured policy.
    pub fn caching_entity(&self, entity: Arc<Entity>, catalog: Arc<RwLock<Catalog>>) -> CachingEntity {
        CachingEntity::with_policy(entity, catalog, self.cache.eviction_policy())
    }
}
