//! Aspects: property bags bound to one entity and one aspect definition.
//!
//! Reads of an unset property fall back to the definition's default. The
//! `*_unchecked` variants skip membership and type checks and exist for
//! trusted bulk paths such as loading from storage.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::construct::{Entity, OtherHasher};
use crate::datatype::Value;
use crate::error::{AspectraError, Result};
use crate::schema::{AspectDef, PropertyDef};

pub type AspectRef = Arc<RwLock<Aspect>>;

// ------------- Aspect -------------
#[derive(Debug, Clone)]
pub struct Aspect {
    def: Arc<AspectDef>,
    entity: Option<Arc<Entity>>,
    transferable: bool,
    // a present key holding None is an explicit null
    values: HashMap<String, Option<Value>, OtherHasher>,
}

impl Aspect {
    pub fn new(def: Arc<AspectDef>) -> Self {
        Self {
            def,
            entity: None,
            transferable: false,
            values: HashMap::default(),
        }
    }
    pub fn for_entity(def: Arc<AspectDef>, entity: Arc<Entity>) -> Self {
        let mut aspect = Self::new(def);
        aspect.entity = Some(entity);
        aspect
    }
    pub fn transferable(mut self, transferable: bool) -> Self {
        self.transferable = transferable;
        self
    }
    pub fn into_ref(self) -> AspectRef {
        Arc::new(RwLock::new(self))
    }
    pub fn aspect_def(&self) -> &Arc<AspectDef> {
        &self.def
    }
    pub fn entity(&self) -> Option<&Arc<Entity>> {
        self.entity.as_ref()
    }
    pub fn is_transferable(&self) -> bool {
        self.transferable
    }

    /// Binds the aspect to `entity`. Once bound, a non-transferable aspect
    /// only accepts the same entity again.
    pub fn set_entity(&mut self, entity: Arc<Entity>) -> Result<()> {
        match &self.entity {
            Some(bound) if **bound != *entity && !self.transferable => {
                Err(AspectraError::IdentityConflict(format!(
                    "aspect '{}' is bound to entity {} and is not transferable to {}",
                    self.def.name(),
                    bound,
                    entity
                )))
            }
            _ => {
                self.entity = Some(entity);
                Ok(())
            }
        }
    }

    fn declared(&self, name: &str) -> Result<Arc<PropertyDef>> {
        self.def.property(name).ok_or_else(|| {
            AspectraError::SchemaViolation(format!(
                "'{}' is not a property of aspect def '{}'",
                name,
                self.def.name()
            ))
        })
    }

    /// True if the property was explicitly set or has a declared default.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
            || self.def.property(name).is_some_and(|p| p.has_default_value())
    }
    pub fn is_explicitly_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn read(&self, name: &str) -> Result<Option<Value>> {
        let property = self.declared(name)?;
        if !property.is_readable() {
            return Err(AspectraError::SchemaViolation(format!(
                "property '{}' of '{}' is not readable",
                name,
                self.def.name()
            )));
        }
        Ok(match self.values.get(name) {
            Some(stored) => stored.clone(),
            None => property.fallback(),
        })
    }
    pub fn read_unchecked(&self, name: &str) -> Option<Value> {
        match self.values.get(name) {
            Some(stored) => stored.clone(),
            None => self.def.property(name).and_then(|p| p.fallback()),
        }
    }

    pub fn write(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.write_opt(name, Some(value.into()))
    }
    pub fn write_null(&mut self, name: &str) -> Result<()> {
        self.write_opt(name, None)
    }
    /// Validates membership and writability, then coerces to the declared type.
    pub fn write_opt(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        let property = self.declared(name)?;
        if !property.is_writable() {
            return Err(AspectraError::SchemaViolation(format!(
                "property '{}' of '{}' is not writable",
                name,
                self.def.name()
            )));
        }
        let coerced = property.coerce(value)?;
        self.values.insert(name.to_owned(), coerced);
        Ok(())
    }
    pub fn write_unchecked(&mut self, name: &str, value: Option<Value>) {
        self.values.insert(name.to_owned(), value);
    }

    /// Forgets an explicit value, so the default applies again.
    pub fn remove(&mut self, name: &str) -> Result<Option<Value>> {
        let property = self.declared(name)?;
        if !property.is_removable() {
            return Err(AspectraError::SchemaViolation(format!(
                "property '{}' of '{}' is not removable",
                name,
                self.def.name()
            )));
        }
        Ok(self.values.remove(name).flatten())
    }
    pub fn clear(&mut self) {
        self.values.clear();
    }
    /// Explicitly set property names, in declaration order.
    pub fn property_names(&self) -> Vec<String> {
        self.def
            .properties()
            .iter()
            .filter(|p| self.values.contains_key(p.name()))
            .map(|p| p.name().to_owned())
            .collect()
    }
}

// ------------- AspectCache -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Entries live as long as the catalog holds the aspect.
    WeakRef,
    /// Oldest entries go first once the bound is reached.
    MaxEntries(usize),
    Ttl(Duration),
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::WeakRef
    }
}

#[derive(Debug)]
enum Slot {
    Strong(AspectRef),
    Weak(Weak<RwLock<Aspect>>),
}

#[derive(Debug)]
struct CacheEntry {
    slot: Slot,
    stored_at: Instant,
}

/// Aspects of one entity keyed by aspect def name.
#[derive(Debug)]
pub struct AspectCache {
    policy: EvictionPolicy,
    entries: HashMap<String, CacheEntry, OtherHasher>,
    arrival: VecDeque<String>,
}

impl AspectCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::default(),
            arrival: VecDeque::new(),
        }
    }
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }
    /// A live entry, or `None` if missing, expired or collected.
    pub fn lookup(&self, name: &str) -> Option<AspectRef> {
        let entry = self.entries.get(name)?;
        match (&entry.slot, self.policy) {
            (_, EvictionPolicy::Ttl(ttl)) if entry.stored_at.elapsed() > ttl => None,
            (Slot::Strong(aspect), _) => Some(Arc::clone(aspect)),
            (Slot::Weak(aspect), _) => aspect.upgrade(),
        }
    }
    pub fn insert(&mut self, name: &str, aspect: &AspectRef) {
        let slot = match self.policy {
            EvictionPolicy::WeakRef => Slot::Weak(Arc::downgrade(aspect)),
            _ => Slot::Strong(Arc::clone(aspect)),
        };
        let entry = CacheEntry { slot, stored_at: Instant::now() };
        if self.entries.insert(name.to_owned(), entry).is_none() {
            self.arrival.push_back(name.to_owned());
        }
        if let EvictionPolicy::MaxEntries(bound) = self.policy {
            while self.entries.len() > bound.max(1) {
                match self.arrival.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
    }
    pub fn invalidate(&mut self, name: &str) -> bool {
        self.arrival.retain(|n| n != name);
        self.entries.remove(name).is_some()
    }
    /// Drops expired and collected entries.
    pub fn purge(&mut self) {
        let dead: Vec<String> = self
            .entries
            .keys()
            .filter(|name| self.lookup(name).is_none())
            .cloned()
            .collect();
        for name in dead {
            self.invalidate(&name);
        }
    }
    /// Number of entries that would currently hit.
    pub fn len(&self) -> usize {
        self.entries.keys().filter(|name| self.lookup(name).is_some()).count()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ------------- CachingEntity -------------
/// An entity that remembers its aspects, refetching from the owning catalog
/// whenever the cache no longer holds one.
#[derive(Debug)]
pub struct CachingEntity {
    entity: Arc<Entity>,
    catalog: Arc<RwLock<Catalog>>,
    policy: EvictionPolicy,
    cache: OnceLock<RwLock<AspectCache>>,
}

impl CachingEntity {
    pub fn new(entity: Arc<Entity>, catalog: Arc<RwLock<Catalog>>) -> Self {
        Self::with_policy(entity, catalog, EvictionPolicy::default())
    }
    pub fn with_policy(entity: Arc<Entity>, catalog: Arc<RwLock<Catalog>>, policy: EvictionPolicy) -> Self {
        Self {
            entity,
            catalog,
            policy,
            cache: OnceLock::new(),
        }
    }
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }
    fn cache(&self) -> &RwLock<AspectCache> {
        self.cache.get_or_init(|| RwLock::new(AspectCache::new(self.policy)))
    }
    pub fn is_allocated(&self) -> bool {
        self.cache.get().is_some()
    }

    /// The entity's aspect of the named definition, `None` if the catalog's
    /// aspect map has no entry for this entity.
    pub fn aspect(&self, aspect_def_name: &str) -> Result<Option<AspectRef>> {
        let cache = self.cache();
        if let Some(hit) = cache.read().lookup(aspect_def_name) {
            return Ok(Some(hit));
        }
        let mut cache = cache.write();
        // another caller may have populated it while we waited
        if let Some(hit) = cache.lookup(aspect_def_name) {
            return Ok(Some(hit));
        }
        let fetched = {
            let catalog = self.catalog.read();
            let map = catalog.aspect_map(aspect_def_name)?;
            map.get(&self.entity)
        };
        match &fetched {
            Some(aspect) => {
                debug!(entity = %self.entity, aspect_def = aspect_def_name, "aspect cache refilled");
                cache.insert(aspect_def_name, aspect);
            }
            None => {
                warn!(entity = %self.entity, aspect_def = aspect_def_name, "no aspect in catalog");
                cache.invalidate(aspect_def_name);
            }
        }
        Ok(fetched)
    }

    /// Writes the aspect through to the catalog and caches it.
    pub fn put_aspect(&self, aspect: Aspect) -> Result<AspectRef> {
        let name = aspect.aspect_def().name().to_owned();
        let stored = {
            let mut catalog = self.catalog.write();
            let map = catalog.aspect_map_mut(&name)?;
            map.put(Arc::clone(&self.entity), aspect)?
        };
        self.cache().write().insert(&name, &stored);
        Ok(stored)
    }

    pub fn invalidate(&self, aspect_def_name: &str) -> bool {
        match self.cache.get() {
            Some(cache) => cache.write().invalidate(aspect_def_name),
            None => false,
        }
    }
    pub fn cached_len(&self) -> usize {
        self.cache.get().map(|c| c.read().len()).unwrap_or(0)
    }
}
