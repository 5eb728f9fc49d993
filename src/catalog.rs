//! Catalogs: versioned containers of hierarchies and the aspect definitions
//! those hierarchies use.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::datatype::Uri;
use crate::error::{AspectraError, Result};
use crate::hierarchy::{
    AspectMapHierarchy, EntityDirectory, EntityList, EntitySet, EntityTree, Hierarchy,
    OrderedIndex,
};
use crate::schema::AspectDef;

// ------------- Species -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Species {
    Source,
    Sink,
    Mirror,
    Fork,
    Cache,
    Clone,
}

impl Species {
    /// Sources and sinks stand alone; every other species derives from an upstream catalog.
    pub fn requires_upstream(&self) -> bool {
        !matches!(self, Species::Source | Species::Sink)
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Source => "SOURCE",
            Species::Sink => "SINK",
            Species::Mirror => "MIRROR",
            Species::Fork => "FORK",
            Species::Cache => "CACHE",
            Species::Clone => "CLONE",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Species {
    type Err = AspectraError;
    fn from_str(s: &str) -> Result<Species> {
        match s {
            "SOURCE" => Ok(Species::Source),
            "SINK" => Ok(Species::Sink),
            "MIRROR" => Ok(Species::Mirror),
            "FORK" => Ok(Species::Fork),
            "CACHE" => Ok(Species::Cache),
            "CLONE" => Ok(Species::Clone),
            other => Err(AspectraError::corruption(format!("unknown species '{}'", other))),
        }
    }
}

fn check_upstream(species: Species, upstream: Option<Uuid>) -> Result<()> {
    match (species.requires_upstream(), upstream) {
        (true, None) => Err(AspectraError::IdentityConflict(format!(
            "a {} catalog needs an upstream catalog",
            species
        ))),
        (false, Some(upstream)) => Err(AspectraError::IdentityConflict(format!(
            "a {} catalog cannot have an upstream catalog (got {})",
            species, upstream
        ))),
        _ => Ok(()),
    }
}

// ------------- Catalog -------------
#[derive(Debug)]
pub struct Catalog {
    id: Uuid,
    species: Species,
    upstream: Option<Uuid>,
    uri: Option<Uri>,
    version: i64,
    hierarchies: OrderedIndex<String, Hierarchy>,
    aspect_defs: OrderedIndex<String, Arc<AspectDef>>,
    last_hierarchy_version: i64,
}

impl Catalog {
    pub fn new(species: Species, upstream: Option<Uuid>) -> Result<Self> {
        Self::with_id(Uuid::new_v4(), species, upstream)
    }
    /// Fails before anything is built if the species/upstream pairing is invalid.
    pub fn with_id(id: Uuid, species: Species, upstream: Option<Uuid>) -> Result<Self> {
        check_upstream(species, upstream)?;
        Ok(Self {
            id,
            species,
            upstream,
            uri: None,
            version: 1,
            hierarchies: OrderedIndex::new(),
            aspect_defs: OrderedIndex::new(),
            last_hierarchy_version: 0,
        })
    }
    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = Some(uri);
        self
    }
    /// Declares the definitions and creates an aspect map for each of them.
    pub fn with_aspect_defs(mut self, defs: impl IntoIterator<Item = Arc<AspectDef>>) -> Result<Self> {
        for def in defs {
            self.create_aspect_map(def)?;
        }
        Ok(self)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
    pub fn species(&self) -> Species {
        self.species
    }
    pub fn upstream(&self) -> Option<Uuid> {
        self.upstream
    }
    pub fn uri(&self) -> Option<&Uri> {
        self.uri.as_ref()
    }
    pub fn set_uri(&mut self, uri: Option<Uri>) {
        self.uri = uri;
    }
    pub fn version(&self) -> i64 {
        self.version
    }
    pub fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    // ------------- aspect directory -------------
    /// Adds a definition to the aspect directory without creating a map for it.
    pub fn declare_aspect_def(&mut self, def: Arc<AspectDef>) {
        self.aspect_defs.insert(def.name().to_owned(), def);
    }
    pub fn aspect_defs(&self) -> impl Iterator<Item = &Arc<AspectDef>> {
        self.aspect_defs.values()
    }
    pub fn aspect_def(&self, name: &str) -> Option<Arc<AspectDef>> {
        self.aspect_defs.get(&name.to_owned()).cloned()
    }

    // ------------- hierarchies -------------
    /// Adds (or replaces) a hierarchy and assigns it the next version. An
    /// aspect map is never silently replaced.
    pub fn add_hierarchy(&mut self, hierarchy: impl Into<Hierarchy>) -> Result<&mut Hierarchy> {
        let mut hierarchy = hierarchy.into();
        if hierarchy.catalog_id() != self.id {
            return Err(AspectraError::IdentityConflict(format!(
                "hierarchy '{}' belongs to catalog {}, not {}",
                hierarchy.name(),
                hierarchy.catalog_id(),
                self.id
            )));
        }
        let name = hierarchy.name().to_owned();
        if self.hierarchy(&name).is_some_and(|h| h.is_aspect_map()) {
            return Err(AspectraError::IdentityConflict(format!(
                "catalog {} already holds aspect map '{}'",
                self.id, name
            )));
        }
        if let Some(map) = hierarchy.as_aspect_map() {
            self.declare_aspect_def(Arc::clone(map.aspect_def()));
        }
        self.last_hierarchy_version += 1;
        hierarchy.set_version(self.last_hierarchy_version);
        debug!(catalog = %self.id, hierarchy = %name, kind = %hierarchy.hierarchy_type(), "added hierarchy");
        self.hierarchies.insert(name.clone(), hierarchy);
        self.hierarchies
            .get_mut(&name)
            .ok_or_else(|| AspectraError::not_found("hierarchy", name))
    }

    /// Re-attaches a hierarchy read from storage, keeping its stored version.
    pub(crate) fn restore_hierarchy(&mut self, mut hierarchy: Hierarchy, version: i64) {
        hierarchy.set_version(version);
        self.last_hierarchy_version = self.last_hierarchy_version.max(version);
        if let Some(map) = hierarchy.as_aspect_map() {
            self.declare_aspect_def(Arc::clone(map.aspect_def()));
        }
        self.hierarchies.insert(hierarchy.name().to_owned(), hierarchy);
    }
    /// Keeps later additions numbered above a version restored in place.
    pub(crate) fn observe_hierarchy_version(&mut self, version: i64) {
        self.last_hierarchy_version = self.last_hierarchy_version.max(version);
    }

    pub fn create_entity_list(&mut self, name: &str) -> Result<&mut EntityList> {
        let list = EntityList::new(name, self.id);
        self.add_hierarchy(list)?
            .as_list_mut()
            .ok_or_else(|| AspectraError::not_found("entity list", name))
    }
    pub fn create_entity_set(&mut self, name: &str) -> Result<&mut EntitySet> {
        let set = EntitySet::new(name, self.id);
        self.add_hierarchy(set)?
            .as_set_mut()
            .ok_or_else(|| AspectraError::not_found("entity set", name))
    }
    pub fn create_entity_directory(&mut self, name: &str) -> Result<&mut EntityDirectory> {
        let directory = EntityDirectory::new(name, self.id);
        self.add_hierarchy(directory)?
            .as_directory_mut()
            .ok_or_else(|| AspectraError::not_found("entity directory", name))
    }
    pub fn create_entity_tree(&mut self, name: &str) -> Result<&EntityTree> {
        let tree = EntityTree::new(name, self.id);
        self.add_hierarchy(tree)?;
        self.tree(name)
    }
    pub fn create_aspect_map(&mut self, def: Arc<AspectDef>) -> Result<&mut AspectMapHierarchy> {
        let name = def.name().to_owned();
        let map = AspectMapHierarchy::new(self.id, def);
        self.add_hierarchy(map)?
            .as_aspect_map_mut()
            .ok_or_else(|| AspectraError::not_found("aspect map", name))
    }

    pub fn hierarchy(&self, name: &str) -> Option<&Hierarchy> {
        self.hierarchies.get(&name.to_owned())
    }
    pub fn hierarchy_mut(&mut self, name: &str) -> Option<&mut Hierarchy> {
        self.hierarchies.get_mut(&name.to_owned())
    }
    /// Hierarchies in the order they were added.
    pub fn hierarchies(&self) -> impl Iterator<Item = &Hierarchy> {
        self.hierarchies.values()
    }
    pub fn hierarchy_count(&self) -> usize {
        self.hierarchies.len()
    }
    /// Removing an aspect map discards aspect data, so it takes `force`.
    pub fn remove_hierarchy(&mut self, name: &str, force: bool) -> Result<Option<Hierarchy>> {
        if !force && self.hierarchy(name).is_some_and(|h| h.is_aspect_map()) {
            return Err(AspectraError::IdentityConflict(format!(
                "refusing to remove aspect map '{}' without force",
                name
            )));
        }
        Ok(self.hierarchies.remove(&name.to_owned()))
    }

    fn typed<'a, T>(&'a self, name: &str, kind: &'static str, pick: impl Fn(&'a Hierarchy) -> Option<&'a T>) -> Result<&'a T> {
        self.hierarchy(name)
            .and_then(pick)
            .ok_or_else(|| AspectraError::not_found(kind, name))
    }
    pub fn list(&self, name: &str) -> Result<&EntityList> {
        self.typed(name, "entity list", Hierarchy::as_list)
    }
    pub fn set(&self, name: &str) -> Result<&EntitySet> {
        self.typed(name, "entity set", Hierarchy::as_set)
    }
    pub fn directory(&self, name: &str) -> Result<&EntityDirectory> {
        self.typed(name, "entity directory", Hierarchy::as_directory)
    }
    pub fn tree(&self, name: &str) -> Result<&EntityTree> {
        self.typed(name, "entity tree", Hierarchy::as_tree)
    }
    pub fn aspect_map(&self, name: &str) -> Result<&AspectMapHierarchy> {
        self.typed(name, "aspect map", Hierarchy::as_aspect_map)
    }
    pub fn list_mut(&mut self, name: &str) -> Result<&mut EntityList> {
        self.hierarchy_mut(name)
            .and_then(Hierarchy::as_list_mut)
            .ok_or_else(|| AspectraError::not_found("entity list", name))
    }
    pub fn set_mut(&mut self, name: &str) -> Result<&mut EntitySet> {
        self.hierarchy_mut(name)
            .and_then(Hierarchy::as_set_mut)
            .ok_or_else(|| AspectraError::not_found("entity set", name))
    }
    pub fn directory_mut(&mut self, name: &str) -> Result<&mut EntityDirectory> {
        self.hierarchy_mut(name)
            .and_then(Hierarchy::as_directory_mut)
            .ok_or_else(|| AspectraError::not_found("entity directory", name))
    }
    pub fn aspect_map_mut(&mut self, name: &str) -> Result<&mut AspectMapHierarchy> {
        self.hierarchy_mut(name)
            .and_then(Hierarchy::as_aspect_map_mut)
            .ok_or_else(|| AspectraError::not_found("aspect map", name))
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} [{}, v{}, {} hierarchies, {} aspect defs]",
            self.id,
            self.species,
            self.version,
            self.hierarchies.len(),
            self.aspect_defs.len()
        )
    }
}
