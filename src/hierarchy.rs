//! Hierarchies: the five named collections a catalog is made of.
//!
//! Each kind exposes only its own contract (no backing-collection API leaks
//! out). A hierarchy carries the id of the catalog that owns it; the catalog
//! assigns its version when the hierarchy is added.

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::aspect::{Aspect, AspectRef};
use crate::construct::{Entity, IdentityHasher, OtherHasher};
use crate::datatype::Value;
use crate::error::{AspectraError, Result};
use crate::schema::AspectDef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HierarchyType {
    EntityList,
    EntitySet,
    EntityDirectory,
    EntityTree,
    AspectMap,
}

impl fmt::Display for HierarchyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ------------- OrderedIndex -------------
/// A map that remembers insertion order. Replacing a value keeps its position.
#[derive(Debug, Clone)]
pub struct OrderedIndex<K, V, H = OtherHasher> {
    entries: Vec<(K, V)>,
    positions: HashMap<K, usize, H>,
}

impl<K: Eq + Hash + Clone, V, H: BuildHasher + Default> OrderedIndex<K, V, H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::default(),
        }
    }
    /// Returns the replaced value, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.positions.get(&key) {
            Some(&position) => Some(std::mem::replace(&mut self.entries[position].1, value)),
            None => {
                self.positions.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let position = self.positions.remove(key)?;
        let (_, value) = self.entries.remove(position);
        for (_, p) in self.positions.iter_mut() {
            if *p > position {
                *p -= 1;
            }
        }
        Some(value)
    }
    pub fn get(&self, key: &K) -> Option<&V> {
        self.positions.get(key).map(|&p| &self.entries[p].1)
    }
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.positions.get(key) {
            Some(&p) => Some(&mut self.entries[p].1),
            None => None,
        }
    }
    pub fn contains_key(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }
}

impl<K: Eq + Hash + Clone, V, H: BuildHasher + Default> Default for OrderedIndex<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- HierarchyMeta -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyMeta {
    name: String,
    catalog_id: Uuid,
    version: i64,
}

impl HierarchyMeta {
    fn new(name: impl Into<String>, catalog_id: Uuid) -> Self {
        Self {
            name: name.into(),
            catalog_id,
            version: 0,
        }
    }
}

// ------------- EntityList -------------
/// Ordered entities, duplicates allowed.
#[derive(Debug, Clone)]
pub struct EntityList {
    meta: HierarchyMeta,
    items: Vec<Arc<Entity>>,
}

impl EntityList {
    pub fn new(name: impl Into<String>, catalog_id: Uuid) -> Self {
        Self {
            meta: HierarchyMeta::new(name, catalog_id),
            items: Vec::new(),
        }
    }
    pub fn push(&mut self, entity: Arc<Entity>) {
        self.items.push(entity);
    }
    pub fn insert(&mut self, index: usize, entity: Arc<Entity>) -> Result<()> {
        if index > self.items.len() {
            return Err(AspectraError::not_found("list position", index.to_string()));
        }
        self.items.insert(index, entity);
        Ok(())
    }
    pub fn remove_at(&mut self, index: usize) -> Option<Arc<Entity>> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }
    pub fn get(&self, index: usize) -> Option<&Arc<Entity>> {
        self.items.get(index)
    }
    pub fn contains(&self, entity: &Entity) -> bool {
        self.items.iter().any(|e| **e == *entity)
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.items.iter()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ------------- EntitySet -------------
/// Unique entities in insertion order.
#[derive(Debug, Clone)]
pub struct EntitySet {
    meta: HierarchyMeta,
    items: OrderedIndex<Uuid, Arc<Entity>, IdentityHasher>,
}

impl EntitySet {
    pub fn new(name: impl Into<String>, catalog_id: Uuid) -> Self {
        Self {
            meta: HierarchyMeta::new(name, catalog_id),
            items: OrderedIndex::new(),
        }
    }
    /// False if the entity was already a member.
    pub fn insert(&mut self, entity: Arc<Entity>) -> bool {
        let id = entity.global_id();
        if self.items.contains_key(&id) {
            return false;
        }
        self.items.insert(id, entity);
        true
    }
    pub fn remove(&mut self, entity: &Entity) -> bool {
        self.items.remove(&entity.global_id()).is_some()
    }
    pub fn contains(&self, entity: &Entity) -> bool {
        self.items.contains_key(&entity.global_id())
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.items.values()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ------------- EntityDirectory -------------
/// String keys to entities, insertion order preserved.
#[derive(Debug, Clone)]
pub struct EntityDirectory {
    meta: HierarchyMeta,
    items: OrderedIndex<String, Arc<Entity>>,
}

impl EntityDirectory {
    pub fn new(name: impl Into<String>, catalog_id: Uuid) -> Self {
        Self {
            meta: HierarchyMeta::new(name, catalog_id),
            items: OrderedIndex::new(),
        }
    }
    pub fn put(&mut self, key: impl Into<String>, entity: Arc<Entity>) -> Option<Arc<Entity>> {
        self.items.insert(key.into(), entity)
    }
    pub fn get(&self, key: &str) -> Option<&Arc<Entity>> {
        self.items.get(&key.to_owned())
    }
    pub fn remove(&mut self, key: &str) -> Option<Arc<Entity>> {
        self.items.remove(&key.to_owned())
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(&key.to_owned())
    }
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Entity>)> {
        self.items.iter()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ------------- EntityTree -------------
pub type NodeRef = Arc<RwLock<TreeNode>>;

#[derive(Debug)]
enum NodeKind {
    Branch(OrderedIndex<String, NodeRef>),
    Leaf,
}

#[derive(Debug)]
pub struct TreeNode {
    value: Option<Arc<Entity>>,
    kind: NodeKind,
}

impl TreeNode {
    pub fn branch(value: Option<Arc<Entity>>) -> Self {
        Self {
            value,
            kind: NodeKind::Branch(OrderedIndex::new()),
        }
    }
    pub fn leaf(value: Option<Arc<Entity>>) -> Self {
        Self { value, kind: NodeKind::Leaf }
    }
    pub fn into_ref(self) -> NodeRef {
        Arc::new(RwLock::new(self))
    }
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }
    pub fn value(&self) -> Option<&Arc<Entity>> {
        self.value.as_ref()
    }
    pub fn set_value(&mut self, value: Option<Arc<Entity>>) -> Option<Arc<Entity>> {
        std::mem::replace(&mut self.value, value)
    }
    pub fn child(&self, key: &str) -> Option<NodeRef> {
        match &self.kind {
            NodeKind::Branch(children) => children.get(&key.to_owned()).cloned(),
            NodeKind::Leaf => None,
        }
    }
    /// Children in insertion order; always empty for a leaf.
    pub fn children(&self) -> Vec<(String, NodeRef)> {
        match &self.kind {
            NodeKind::Branch(children) => children
                .iter()
                .map(|(k, n)| (k.clone(), Arc::clone(n)))
                .collect(),
            NodeKind::Leaf => Vec::new(),
        }
    }
    fn branch_children(&mut self) -> Result<&mut OrderedIndex<String, NodeRef>> {
        match &mut self.kind {
            NodeKind::Branch(children) => Ok(children),
            NodeKind::Leaf => Err(AspectraError::SchemaViolation(
                "leaf tree nodes cannot hold children".into(),
            )),
        }
    }
    pub fn put_child(&mut self, key: impl Into<String>, node: NodeRef) -> Result<Option<NodeRef>> {
        Ok(self.branch_children()?.insert(key.into(), node))
    }
    pub fn remove_child(&mut self, key: &str) -> Result<Option<NodeRef>> {
        Ok(self.branch_children()?.remove(&key.to_owned()))
    }
    /// Swaps in a whole new set of children, keeping this node object.
    pub fn replace_children(&mut self, children: Vec<(String, NodeRef)>) -> Result<()> {
        let slot = self.branch_children()?;
        slot.clear();
        for (key, node) in children {
            slot.insert(key, node);
        }
        Ok(())
    }
}

/// A rooted tree of keyed nodes. The root node object lives as long as the
/// hierarchy; loading refreshes its contents in place.
#[derive(Debug, Clone)]
pub struct EntityTree {
    meta: HierarchyMeta,
    root: NodeRef,
}

impl EntityTree {
    pub fn new(name: impl Into<String>, catalog_id: Uuid) -> Self {
        Self {
            meta: HierarchyMeta::new(name, catalog_id),
            root: TreeNode::branch(None).into_ref(),
        }
    }
    pub fn root(&self) -> NodeRef {
        Arc::clone(&self.root)
    }
    fn segments(path: &str) -> impl Iterator<Item = &str> {
        path.split('/').filter(|s| !s.is_empty())
    }
    /// Follows `/`-joined child keys from the root; stops at the first missing key.
    pub fn find(&self, path: &str) -> Option<NodeRef> {
        let mut node = self.root();
        for key in Self::segments(path) {
            let next = node.read().child(key)?;
            node = next;
        }
        Some(node)
    }
    /// Sets the value at `path`, creating branch nodes along the way.
    pub fn put_path(&self, path: &str, value: Option<Arc<Entity>>) -> Result<NodeRef> {
        self.put_node(path, value, false)
    }
    /// Like [`put_path`](Self::put_path) but the final node is a leaf.
    pub fn put_leaf(&self, path: &str, value: Option<Arc<Entity>>) -> Result<NodeRef> {
        self.put_node(path, value, true)
    }
    fn put_node(&self, path: &str, value: Option<Arc<Entity>>, leaf: bool) -> Result<NodeRef> {
        let keys: Vec<&str> = Self::segments(path).collect();
        let Some((last, parents)) = keys.split_last() else {
            self.root.write().set_value(value);
            return Ok(self.root());
        };
        let mut node = self.root();
        for key in parents {
            let existing = node.read().child(key);
            let next = match existing {
                Some(child) => child,
                None => {
                    let child = TreeNode::branch(None).into_ref();
                    node.write().put_child(*key, Arc::clone(&child))?;
                    child
                }
            };
            node = next;
        }
        let target = (if leaf { TreeNode::leaf(value) } else { TreeNode::branch(value) }).into_ref();
        node.write().put_child(*last, Arc::clone(&target))?;
        Ok(target)
    }
    pub fn remove_path(&self, path: &str) -> Result<Option<NodeRef>> {
        let keys: Vec<&str> = Self::segments(path).collect();
        let Some((last, parents)) = keys.split_last() else {
            return Err(AspectraError::SchemaViolation("the tree root cannot be removed".into()));
        };
        let Some(parent) = self.find(&parents.join("/")) else {
            return Ok(None);
        };
        let mut parent = parent.write();
        parent.remove_child(last)
    }
    /// Depth-first, pre-order walk yielding `(path, node)`; the root has path "".
    pub fn walk(&self) -> Vec<(String, NodeRef)> {
        let mut visited = Vec::new();
        let mut stack = vec![(String::new(), self.root())];
        while let Some((path, node)) = stack.pop() {
            let children = node.read().children();
            for (key, child) in children.into_iter().rev() {
                let child_path = if path.is_empty() { key } else { format!("{}/{}", path, key) };
                stack.push((child_path, child));
            }
            visited.push((path, node));
        }
        visited
    }
    pub fn node_count(&self) -> usize {
        self.walk().len()
    }
}

// ------------- AspectMap -------------
/// Entity to aspect, all aspects of one definition. By convention the
/// hierarchy is named after the definition.
#[derive(Debug, Clone)]
pub struct AspectMapHierarchy {
    meta: HierarchyMeta,
    def: Arc<AspectDef>,
    entries: OrderedIndex<Uuid, (Arc<Entity>, AspectRef), IdentityHasher>,
}

pub type Upsert = Vec<(String, Option<Value>)>;

impl AspectMapHierarchy {
    pub fn new(catalog_id: Uuid, def: Arc<AspectDef>) -> Self {
        let name = def.name().to_owned();
        Self::with_name(name, catalog_id, def)
    }
    pub fn with_name(name: impl Into<String>, catalog_id: Uuid, def: Arc<AspectDef>) -> Self {
        Self {
            meta: HierarchyMeta::new(name, catalog_id),
            def,
            entries: OrderedIndex::new(),
        }
    }
    pub fn aspect_def(&self) -> &Arc<AspectDef> {
        &self.def
    }
    fn check_def(&self, other: &Arc<AspectDef>) -> Result<()> {
        if Arc::ptr_eq(&self.def, other)
            || (self.def.name() == other.name() && self.def.matches(other))
        {
            Ok(())
        } else {
            Err(AspectraError::SchemaViolation(format!(
                "aspect of '{}' does not belong in aspect map '{}'",
                other.name(),
                self.meta.name
            )))
        }
    }
    /// Binds `aspect` to `entity` and stores it, replacing any previous one.
    pub fn put(&mut self, entity: Arc<Entity>, mut aspect: Aspect) -> Result<AspectRef> {
        self.check_def(aspect.aspect_def())?;
        aspect.set_entity(Arc::clone(&entity))?;
        let stored = aspect.into_ref();
        self.entries
            .insert(entity.global_id(), (entity, Arc::clone(&stored)));
        Ok(stored)
    }
    /// Stores an aspect as is; used by trusted load paths.
    pub fn put_unchecked(&mut self, entity: Arc<Entity>, aspect: AspectRef) {
        self.entries.insert(entity.global_id(), (entity, aspect));
    }
    pub fn get(&self, entity: &Entity) -> Option<AspectRef> {
        self.entries
            .get(&entity.global_id())
            .map(|(_, aspect)| Arc::clone(aspect))
    }
    pub fn contains(&self, entity: &Entity) -> bool {
        self.entries.contains_key(&entity.global_id())
    }
    /// Writes every value into the entity's aspect, creating it if needed.
    /// Either all values apply or none do.
    pub fn upsert(&mut self, entity: Arc<Entity>, values: Upsert) -> Result<AspectRef> {
        match self.get(&entity) {
            Some(existing) => {
                let mut staged = existing.read().clone();
                for (name, value) in values {
                    staged.write_opt(&name, value)?;
                }
                *existing.write() = staged;
                Ok(existing)
            }
            None => {
                let mut aspect = Aspect::for_entity(Arc::clone(&self.def), Arc::clone(&entity));
                for (name, value) in values {
                    aspect.write_opt(&name, value)?;
                }
                self.put(entity, aspect)
            }
        }
    }
    /// Batch form of [`upsert`](Self::upsert); each entity succeeds or fails on its own.
    pub fn upsert_many(
        &mut self,
        items: impl IntoIterator<Item = (Arc<Entity>, Upsert)>,
    ) -> HashMap<Uuid, Result<AspectRef>> {
        items
            .into_iter()
            .map(|(entity, values)| (entity.global_id(), self.upsert(entity, values)))
            .collect()
    }
    pub fn remove(&mut self, entity: &Entity) -> Option<AspectRef> {
        self.entries
            .remove(&entity.global_id())
            .map(|(_, aspect)| aspect)
    }
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entries.values().map(|(e, _)| Arc::clone(e)).collect()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Entity>, &AspectRef)> {
        self.entries.values().map(|(e, a)| (e, a))
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ------------- Hierarchy -------------
#[derive(Debug, Clone)]
pub enum Hierarchy {
    EntityList(EntityList),
    EntitySet(EntitySet),
    EntityDirectory(EntityDirectory),
    EntityTree(EntityTree),
    AspectMap(AspectMapHierarchy),
}

impl Hierarchy {
    fn meta(&self) -> &HierarchyMeta {
        match self {
            Hierarchy::EntityList(h) => &h.meta,
            Hierarchy::EntitySet(h) => &h.meta,
            Hierarchy::EntityDirectory(h) => &h.meta,
            Hierarchy::EntityTree(h) => &h.meta,
            Hierarchy::AspectMap(h) => &h.meta,
        }
    }
    fn meta_mut(&mut self) -> &mut HierarchyMeta {
        match self {
            Hierarchy::EntityList(h) => &mut h.meta,
            Hierarchy::EntitySet(h) => &mut h.meta,
            Hierarchy::EntityDirectory(h) => &mut h.meta,
            Hierarchy::EntityTree(h) => &mut h.meta,
            Hierarchy::AspectMap(h) => &mut h.meta,
        }
    }
    pub fn name(&self) -> &str {
        &self.meta().name
    }
    pub fn catalog_id(&self) -> Uuid {
        self.meta().catalog_id
    }
    pub fn version(&self) -> i64 {
        self.meta().version
    }
    pub(crate) fn set_version(&mut self, version: i64) {
        self.meta_mut().version = version;
    }
    pub fn hierarchy_type(&self) -> HierarchyType {
        match self {
            Hierarchy::EntityList(_) => HierarchyType::EntityList,
            Hierarchy::EntitySet(_) => HierarchyType::EntitySet,
            Hierarchy::EntityDirectory(_) => HierarchyType::EntityDirectory,
            Hierarchy::EntityTree(_) => HierarchyType::EntityTree,
            Hierarchy::AspectMap(_) => HierarchyType::AspectMap,
        }
    }
    pub fn is_aspect_map(&self) -> bool {
        matches!(self, Hierarchy::AspectMap(_))
    }
    pub fn as_list(&self) -> Option<&EntityList> {
        match self {
            Hierarchy::EntityList(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_list_mut(&mut self) -> Option<&mut EntityList> {
        match self {
            Hierarchy::EntityList(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_set(&self) -> Option<&EntitySet> {
        match self {
            Hierarchy::EntitySet(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_set_mut(&mut self) -> Option<&mut EntitySet> {
        match self {
            Hierarchy::EntitySet(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_directory(&self) -> Option<&EntityDirectory> {
        match self {
            Hierarchy::EntityDirectory(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_directory_mut(&mut self) -> Option<&mut EntityDirectory> {
        match self {
            Hierarchy::EntityDirectory(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_tree(&self) -> Option<&EntityTree> {
        match self {
            Hierarchy::EntityTree(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_aspect_map(&self) -> Option<&AspectMapHierarchy> {
        match self {
            Hierarchy::AspectMap(h) => Some(h),
            _ => None,
        }
    }
    pub fn as_aspect_map_mut(&mut self) -> Option<&mut AspectMapHierarchy> {
        match self {
            Hierarchy::AspectMap(h) => Some(h),
            _ => None,
        }
    }
}

impl From<EntityList> for Hierarchy {
    fn from(h: EntityList) -> Self {
        Hierarchy::EntityList(h)
    }
}
impl From<EntitySet> for Hierarchy {
    fn from(h: EntitySet) -> Self {
        Hierarchy::EntitySet(h)
    }
}
impl From<EntityDirectory> for Hierarchy {
    fn from(h: EntityDirectory) -> Self {
        Hierarchy::EntityDirectory(h)
    }
}
impl From<EntityTree> for Hierarchy {
    fn from(h: EntityTree) -> Self {
        Hierarchy::EntityTree(h)
    }
}
impl From<AspectMapHierarchy> for Hierarchy {
    fn from(h: AspectMapHierarchy) -> Self {
        Hierarchy::AspectMap(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_index_keeps_order_across_removal() {
        let mut index: OrderedIndex<String, i32> = OrderedIndex::new();
        index.insert("a".into(), 1);
        index.insert("b".into(), 2);
        index.insert("c".into(), 3);
        index.remove(&"a".to_owned());
        index.insert("b".into(), 20);
        let seen: Vec<(String, i32)> = index.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(seen, vec![("b".into(), 20), ("c".into(), 3)]);
        assert_eq!(index.get(&"c".to_owned()), Some(&3));
    }

    #[test]
    fn leaves_reject_children() {
        let mut leaf = TreeNode::leaf(None);
        assert!(leaf.children().is_empty());
        assert!(leaf.put_child("x", TreeNode::leaf(None).into_ref()).is_err());
        assert!(leaf.remove_child("x").is_err());
    }

    #[test]
    fn find_stops_at_first_missing_key() {
        let tree = EntityTree::new("t", Uuid::new_v4());
        tree.put_path("a/b", None).unwrap();
        assert!(tree.find("a/b").is_some());
        assert!(tree.find("a/x/b").is_none());
        assert!(Arc::ptr_eq(&tree.find("").unwrap(), &tree.root()));
    }
}
