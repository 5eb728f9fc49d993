//! Identity constructs and the session that keeps them.
//!
//! An [`Entity`] is nothing but a UUID. Entities and aspect definitions are
//! owned by "keeper" structures inside a [`Session`] so that every occurrence
//! of the same identity resolves to one shared `Arc` within that session.
//! Sessions are explicit values: two sessions never share a keeper, which
//! keeps independent loads (and tests) from contaminating each other.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use seahash::SeaHasher;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AspectraError, Result};
use crate::schema::AspectDef;

pub type IdentityHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- Entity -------------
#[derive(Debug)]
enum Identity {
    Eager(Uuid),
    // generated on first access; OnceLock gives us the double-checked init
    Lazy(OnceLock<Uuid>),
}

#[derive(Debug)]
pub struct Entity {
    identity: Identity,
}

impl Entity {
    /// An entity with a fresh random id fixed at construction.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }
    pub fn with_id(id: Uuid) -> Self {
        Self { identity: Identity::Eager(id) }
    }
    /// An entity whose id is only generated when first asked for.
    pub fn lazy() -> Self {
        Self { identity: Identity::Lazy(OnceLock::new()) }
    }
    pub fn global_id(&self) -> Uuid {
        match &self.identity {
            Identity::Eager(id) => *id,
            Identity::Lazy(cell) => *cell.get_or_init(Uuid::new_v4),
        }
    }
    pub fn is_lazy(&self) -> bool {
        matches!(self.identity, Identity::Lazy(_))
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.global_id() == other.global_id()
    }
}
impl Eq for Entity {}
impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.global_id().hash(state);
    }
}
impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.global_id())
    }
}

// ------------- EntityKeeper -------------
#[derive(Debug, Default)]
pub struct EntityKeeper {
    kept: HashMap<Uuid, Arc<Entity>, IdentityHasher>,
}

impl EntityKeeper {
    pub fn new() -> Self {
        Self { kept: HashMap::default() }
    }
    /// Keeps the entity unless one with the same id is already kept; either
    /// way the kept instance is returned, flagged if it was there before.
    pub fn keep(&mut self, entity: Entity) -> (Arc<Entity>, bool) {
        match self.kept.entry(entity.global_id()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), true),
            Entry::Vacant(e) => (Arc::clone(e.insert(Arc::new(entity))), false),
        }
    }
    pub fn get_or_register_new_entity(&mut self, id: Uuid) -> Arc<Entity> {
        let (kept, _) = self.keep(Entity::with_id(id));
        kept
    }
    pub fn get(&self, id: &Uuid) -> Option<Arc<Entity>> {
        self.kept.get(id).cloned()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

// ------------- AspectDefKeeper -------------
#[derive(Debug, Default)]
pub struct AspectDefKeeper {
    kept: HashMap<String, Arc<AspectDef>, OtherHasher>,
}

impl AspectDefKeeper {
    pub fn new() -> Self {
        Self { kept: HashMap::default() }
    }
    /// Keeps a definition by name. A structurally identical definition that
    /// is already kept wins, so shared `Arc`s stay shared; a differing one
    /// replaces it.
    pub fn keep(&mut self, def: AspectDef) -> (Arc<AspectDef>, bool) {
        match self.kept.entry(def.name().to_owned()) {
            Entry::Occupied(mut e) => {
                if e.get().id() == def.id() && e.get().matches(&def) {
                    (Arc::clone(e.get()), true)
                } else {
                    warn!(aspect_def = def.name(), "replacing kept aspect def with a differing one");
                    e.insert(Arc::new(def));
                    (Arc::clone(e.get()), false)
                }
            }
            Entry::Vacant(e) => (Arc::clone(e.insert(Arc::new(def))), false),
        }
    }
    /// Registers an already shared definition; fails if a different
    /// definition instance holds the name.
    pub fn register(&mut self, def: Arc<AspectDef>) -> Result<Arc<AspectDef>> {
        match self.kept.entry(def.name().to_owned()) {
            Entry::Occupied(e) if Arc::ptr_eq(e.get(), &def) => Ok(def),
            Entry::Occupied(e) if e.get().id() == def.id() && e.get().matches(&def) => {
                Ok(Arc::clone(e.get()))
            }
            Entry::Occupied(_) => Err(AspectraError::IdentityConflict(format!(
                "aspect def name '{}' is already registered to another definition",
                def.name()
            ))),
            Entry::Vacant(e) => Ok(Arc::clone(e.insert(def))),
        }
    }
    pub fn get(&self, name: &str) -> Option<Arc<AspectDef>> {
        self.kept.get(name).cloned()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

// ------------- Session -------------
/// The context every model and persistence operation runs in.
#[derive(Debug, Default, Clone)]
pub struct Session {
    pub entity_keeper: Arc<Mutex<EntityKeeper>>,
    pub aspect_def_keeper: Arc<Mutex<AspectDefKeeper>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn entity_keeper(&self) -> Arc<Mutex<EntityKeeper>> {
        Arc::clone(&self.entity_keeper)
    }
    pub fn aspect_def_keeper(&self) -> Arc<Mutex<AspectDefKeeper>> {
        Arc::clone(&self.aspect_def_keeper)
    }
    /// A new random-id entity, kept by this session.
    pub fn create_entity(&self) -> Arc<Entity> {
        let (kept, _) = self.entity_keeper.lock().keep(Entity::new());
        kept
    }
    /// The entity for `id`; the kept one if this session has seen it already.
    pub fn create_entity_with(&self, id: Uuid) -> Arc<Entity> {
        self.get_or_register_new_entity(id)
    }
    pub fn get_or_register_new_entity(&self, id: Uuid) -> Arc<Entity> {
        let (kept, previously_kept) = self.entity_keeper.lock().keep(Entity::with_id(id));
        if !previously_kept {
            debug!(entity = %id, "registered entity");
        }
        kept
    }
    pub fn entity(&self, id: &Uuid) -> Option<Arc<Entity>> {
        self.entity_keeper.lock().get(id)
    }
    /// Keeps a freshly built definition and returns the shared instance.
    pub fn define_aspect_def(&self, def: AspectDef) -> Arc<AspectDef> {
        let (kept, _) = self.aspect_def_keeper.lock().keep(def);
        kept
    }
    pub fn register_aspect_def(&self, def: Arc<AspectDef>) -> Result<Arc<AspectDef>> {
        self.aspect_def_keeper.lock().register(def)
    }
    pub fn aspect_def(&self, name: &str) -> Result<Arc<AspectDef>> {
        self.aspect_def_keeper
            .lock()
            .get(name)
            .ok_or_else(|| AspectraError::not_found("aspect def", name))
    }
}
