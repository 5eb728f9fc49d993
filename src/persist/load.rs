//! Reads catalogs back. Everything is read and staged first; the catalog is
//! only touched once the whole read has succeeded.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ddl;
use super::mapping::TableMapping;
use super::save::LIST_MARKER;
use super::Mappings;
use crate::aspect::Aspect;
use crate::catalog::{Catalog, Species};
use crate::codec;
use crate::construct::{Entity, Session};
use crate::datatype::{self, PropertyValue, Uri, Value};
use crate::error::{AspectraError, Result};
use crate::hierarchy::{
    AspectMapHierarchy, EntityDirectory, EntityList, EntitySet, EntityTree, Hierarchy,
    HierarchyType, NodeRef, TreeNode,
};
use crate::schema::{AspectDef, Mutability, PropertyDef};

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|_| AspectraError::corruption(format!("'{}' is not a uuid", text)))
}

fn entity(session: &Session, text: &str) -> Result<Arc<Entity>> {
    Ok(session.get_or_register_new_entity(parse_uuid(text)?))
}

pub(crate) struct CatalogRow {
    pub species: Species,
    pub uri: Option<Uri>,
    pub upstream: Option<Uuid>,
    pub version: i64,
}

pub(crate) fn read_catalog_row(connection: &Connection, catalog_id: Uuid) -> Result<Option<CatalogRow>> {
    let row: Option<(String, Option<String>, Option<String>, i64)> = connection
        .query_row(
            "
            select species, uri, upstream_catalog_id, version_number
                from catalog
                where catalog_id = ?
            ",
            [catalog_id.to_string()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((species, uri, upstream, version)) = row else {
        return Ok(None);
    };
    Ok(Some(CatalogRow {
        species: Species::from_str(&species)?,
        uri: uri.map(|u| Uri::parse(&u)).transpose()?,
        upstream: upstream.map(|u| parse_uuid(&u)).transpose()?,
        version,
    }))
}

// ------------- aspect defs -------------
fn read_property_defs(connection: &Connection, aspect_def_id: &str) -> Result<Vec<PropertyDef>> {
    let mut statement = connection.prepare_cached(
        "
        select name, property_type, default_value, has_default_value,
               is_readable, is_writable, is_nullable, is_removable, is_multivalued
            from property_def
            where aspect_def_id = ?
            order by property_order
        ",
    )?;
    let rows: Vec<(String, String, Option<String>, bool, bool, bool, bool, bool, bool)> = statement
        .query_map([aspect_def_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;
    let mut properties = Vec::with_capacity(rows.len());
    for (name, code, default, has_default, readable, writable, nullable, removable, multivalued) in rows {
        let property_type = codec::property_type_from_code(&code)?;
        let mut builder = PropertyDef::builder(name, property_type)
            .readable(readable)
            .writable(writable)
            .nullable(nullable)
            .removable(removable)
            .multivalued(multivalued);
        if has_default {
            builder = match default {
                Some(text) => builder.default_value(codec::decode_default(property_type, &text)?),
                None => builder.null_default(),
            };
        }
        properties.push(builder.build()?);
    }
    Ok(properties)
}

pub(crate) fn read_aspect_def(connection: &Connection, aspect_def_id: &str) -> Result<AspectDef> {
    let (name, stored_hash, readable, writable, can_add, can_remove): (String, i64, bool, bool, bool, bool) =
        connection
            .query_row(
                "
                select name, hash_version, is_readable, is_writable,
                       can_add_properties, can_remove_properties
                    from aspect_def
                    where aspect_def_id = ?
                ",
                [aspect_def_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?
            .ok_or_else(|| AspectraError::not_found("aspect def", aspect_def_id))?;
    let properties = read_property_defs(connection, aspect_def_id)?;
    // the stored flag pair picks the variant, whatever it is
    let mutability = Mutability::from_flags(can_add, can_remove);
    let def = AspectDef::with_id(parse_uuid(aspect_def_id)?, name, properties, mutability)?
        .with_access(readable, writable);
    if def.hash() as i64 != stored_hash {
        warn!(aspect_def = def.name(), "stored hash differs from the recomputed one");
    }
    Ok(def)
}

/// One shared instance per definition: the catalog's own if it matches,
/// then the session's, else the rebuilt one is kept by the session.
fn resolve_aspect_def(session: &Session, catalog: &Catalog, def: AspectDef) -> Arc<AspectDef> {
    if let Some(existing) = catalog.aspect_def(def.name()).filter(|d| d.matches(&def)) {
        return existing;
    }
    match session.aspect_def(def.name()) {
        Ok(existing) if existing.matches(&def) => existing,
        _ => session.define_aspect_def(def),
    }
}

fn read_linked_aspect_defs(
    connection: &Connection,
    session: &Session,
    catalog: &Catalog,
) -> Result<Vec<(String, Arc<AspectDef>)>> {
    let ids: Vec<String> = connection
        .prepare(
            "
            select aspect_def_id
                from catalog_aspect_def
                where catalog_id = ?
                order by rowid
            ",
        )?
        .query_map([catalog.id().to_string()], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    let mut defs = Vec::with_capacity(ids.len());
    for id in ids {
        let def = resolve_aspect_def(session, catalog, read_aspect_def(connection, &id)?);
        defs.push((id, def));
    }
    Ok(defs)
}

// ------------- staged hierarchy content -------------
enum Content {
    List(Vec<Arc<Entity>>),
    Set(Vec<Arc<Entity>>),
    Directory(Vec<(String, Arc<Entity>)>),
    Tree {
        value: Option<Arc<Entity>>,
        children: Vec<(String, NodeRef)>,
    },
    AspectMap {
        def: Arc<AspectDef>,
        aspects: Vec<(Arc<Entity>, Aspect)>,
    },
}

struct Staged {
    name: String,
    version: i64,
    kind: HierarchyType,
    content: Content,
}

fn read_entity_rows(
    connection: &Connection,
    session: &Session,
    sql: &str,
    catalog_id: &str,
    name: &str,
) -> Result<Vec<Arc<Entity>>> {
    let ids: Vec<String> = connection
        .prepare_cached(sql)?
        .query_map(params![catalog_id, name], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    ids.iter().map(|id| entity(session, id)).collect()
}

fn read_directory(connection: &Connection, session: &Session, catalog_id: &str, name: &str) -> Result<Content> {
    let rows: Vec<(String, String)> = connection
        .prepare_cached(
            "
            select entity_key, entity_id
                from hierarchy_entity_directory
                where catalog_id = ?1
                and hierarchy_name = ?2
                order by item_order
            ",
        )?
        .query_map(params![catalog_id, name], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    let mut entries = Vec::with_capacity(rows.len());
    for (key, id) in rows {
        entries.push((key, entity(session, &id)?));
    }
    Ok(Content::Directory(entries))
}

struct NodeRecord {
    parent: Option<String>,
    key: String,
    order: i64,
    node: NodeRef,
}

/// Rebuilds the tree from its node rows in whatever order they come back:
/// one pass indexes every row by node id, a second links each to its parent.
fn read_tree(connection: &Connection, session: &Session, catalog_id: &str, name: &str) -> Result<Content> {
    let rows: Vec<(String, Option<String>, String, Option<String>, i64, bool)> = connection
        .prepare_cached(
            "
            select node_id, parent_node_id, node_key, entity_id, item_order, is_leaf
                from hierarchy_entity_tree_node
                where catalog_id = ?1
                and hierarchy_name = ?2
            ",
        )?
        .query_map(params![catalog_id, name], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut records: HashMap<String, NodeRecord> = HashMap::with_capacity(rows.len());
    let mut root: Option<(String, Option<Arc<Entity>>)> = None;
    for (node_id, parent, key, entity_id, order, leaf) in rows {
        let value = entity_id.map(|id| entity(session, &id)).transpose()?;
        if parent.is_none() {
            if root.is_some() {
                return Err(AspectraError::corruption(format!("tree '{}' has more than one root", name)));
            }
            root = Some((node_id.clone(), value.clone()));
        }
        let node = if leaf { TreeNode::leaf(value) } else { TreeNode::branch(value) };
        records.insert(
            node_id,
            NodeRecord {
                parent,
                key,
                order,
                node: node.into_ref(),
            },
        );
    }
    let Some((root_id, root_value)) = root else {
        if !records.is_empty() {
            return Err(AspectraError::corruption(format!("tree '{}' has no root", name)));
        }
        return Ok(Content::Tree {
            value: None,
            children: Vec::new(),
        });
    };

    let mut children_of: HashMap<&str, Vec<(i64, &str, &NodeRef)>> = HashMap::new();
    for record in records.values() {
        if let Some(parent) = &record.parent {
            if !records.contains_key(parent) {
                return Err(AspectraError::corruption(format!(
                    "tree '{}' node '{}' points at missing parent {}",
                    name, record.key, parent
                )));
            }
            children_of
                .entry(parent.as_str())
                .or_default()
                .push((record.order, record.key.as_str(), &record.node));
        }
    }
    let mut root_children = Vec::new();
    for (parent, mut children) in children_of {
        children.sort_by_key(|(order, _, _)| *order);
        let children: Vec<(String, NodeRef)> = children
            .into_iter()
            .map(|(_, key, node)| (key.to_owned(), Arc::clone(node)))
            .collect();
        if parent == root_id {
            root_children = children;
            continue;
        }
        let mut parent_node = records[parent].node.write();
        for (key, node) in children {
            parent_node.put_child(key, node).map_err(|_| {
                AspectraError::corruption(format!("tree '{}' has children under a leaf", name))
            })?;
        }
    }
    Ok(Content::Tree {
        value: root_value,
        children: root_children,
    })
}

/// Property rows of one (entity, property) pair, gathered until the pair changes.
struct PendingProperty {
    entity_id: String,
    property: Arc<PropertyDef>,
    touched: bool,
    values: Vec<Option<PropertyValue>>,
}

impl PendingProperty {
    fn flush(self, aspect: &mut Aspect) -> Result<()> {
        let property = self.property;
        let value = if property.is_multivalued() {
            if !self.touched && self.values.is_empty() {
                return Ok(());
            }
            Some(Value::Many(self.values.into_iter().flatten().collect()))
        } else {
            match self.values.len() {
                0 => return Ok(()),
                1 => self.values.into_iter().next().flatten().map(Value::One),
                n => {
                    return Err(AspectraError::corruption(format!(
                        "{} rows stored for single-valued property '{}' of entity {}",
                        n,
                        property.name(),
                        self.entity_id
                    )));
                }
            }
        };
        let value = match value {
            Some(value) => property.coerce(Some(value))?,
            None => None,
        };
        aspect.write_unchecked(property.name(), value);
        Ok(())
    }
}

fn read_eav(
    connection: &Connection,
    session: &Session,
    catalog_id: &str,
    name: &str,
    aspect_def_id: &str,
    def: &Arc<AspectDef>,
) -> Result<Vec<(Arc<Entity>, Aspect)>> {
    let members = read_entity_rows(
        connection,
        session,
        "
        select entity_id
            from hierarchy_aspect_map
            where catalog_id = ?1
            and hierarchy_name = ?2
            order by item_order
        ",
        catalog_id,
        name,
    )?;
    let mut aspects: Vec<(Arc<Entity>, Aspect)> = members
        .into_iter()
        .map(|e| (Arc::clone(&e), Aspect::for_entity(Arc::clone(def), e)))
        .collect();
    let positions: HashMap<String, usize> = aspects
        .iter()
        .enumerate()
        .map(|(i, (e, _))| (e.global_id().to_string(), i))
        .collect();

    let mut statement = connection.prepare_cached(
        "
        select entity_id, property_name, value_index, value_text, value_binary
            from property_value
            where catalog_id = ?1
            and aspect_def_id = ?2
            order by entity_id, property_name, value_index
        ",
    )?;
    let mut rows = statement.query(params![catalog_id, aspect_def_id])?;
    let mut pending: Option<PendingProperty> = None;
    while let Some(row) = rows.next()? {
        let entity_id: String = row.get(0)?;
        let property_name: String = row.get(1)?;
        let index: i64 = row.get(2)?;
        let continues = pending
            .as_ref()
            .is_some_and(|p| p.entity_id == entity_id && p.property.name() == property_name);
        if !continues {
            if let Some(done) = pending.take() {
                if let Some(&position) = positions.get(&done.entity_id) {
                    done.flush(&mut aspects[position].1)?;
                }
            }
            if !positions.contains_key(&entity_id) {
                continue;
            }
            let Some(property) = def.property(&property_name) else {
                warn!(aspect_def = def.name(), property = %property_name, "skipping rows of undeclared property");
                continue;
            };
            pending = Some(PendingProperty {
                entity_id,
                property,
                touched: false,
                values: Vec::new(),
            });
        }
        let Some(current) = pending.as_mut() else {
            continue;
        };
        if index == LIST_MARKER {
            current.touched = true;
            continue;
        }
        let text: Option<String> = row.get(3)?;
        let binary: Option<Vec<u8>> = row.get(4)?;
        let value = codec::decode_columns(current.property.property_type(), text.as_deref(), binary.as_deref())?;
        current.values.push(value);
    }
    if let Some(done) = pending.take() {
        if let Some(&position) = positions.get(&done.entity_id) {
            done.flush(&mut aspects[position].1)?;
        }
    }
    Ok(aspects)
}

fn read_mapped(
    connection: &Connection,
    session: &Session,
    catalog_id: &str,
    def: &Arc<AspectDef>,
    mapping: &TableMapping,
) -> Result<Vec<(Arc<Entity>, Aspect)>> {
    if !ddl::table_exists(connection, mapping.table_name())? {
        return Ok(Vec::new());
    }
    let columns = mapping.columns(def)?;
    let mut statement = connection.prepare(&mapping.select_sql(def)?)?;
    let mut rows = if mapping.has_catalog_id() {
        statement.query([catalog_id])?
    } else {
        statement.query([])?
    };
    let first_value = mapping.has_catalog_id() as usize + mapping.has_entity_id() as usize;
    let mut aspects = Vec::new();
    while let Some(row) = rows.next()? {
        let entity = if mapping.has_entity_id() {
            let id: String = row.get(mapping.has_catalog_id() as usize)?;
            entity(session, &id)?
        } else {
            // nothing stored identifies the entity
            session.create_entity()
        };
        let mut aspect = Aspect::for_entity(Arc::clone(def), Arc::clone(&entity));
        for (i, (property_name, _)) in columns.iter().enumerate() {
            let Some(property) = def.property(property_name) else {
                continue;
            };
            let value = datatype::from_sql_ref(property.property_type(), row.get_ref(first_value + i)?)?;
            let value = match value {
                Some(value) => property.coerce(Some(Value::One(value)))?,
                None => None,
            };
            aspect.write_unchecked(property_name, value);
        }
        aspects.push((entity, aspect));
    }
    Ok(aspects)
}

fn read_hierarchies(
    connection: &Connection,
    session: &Session,
    catalog: &Catalog,
    linked: &[(String, Arc<AspectDef>)],
    mappings: &Mappings,
) -> Result<Vec<Staged>> {
    let catalog_id = catalog.id().to_string();
    let rows: Vec<(String, String, i64, Option<String>)> = connection
        .prepare(
            "
            select name, hierarchy_type, version_number, aspect_def_id
                from hierarchy
                where catalog_id = ?
                order by version_number, rowid
            ",
        )?
        .query_map([&catalog_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
        .collect::<rusqlite::Result<_>>()?;

    let mut staged = Vec::with_capacity(rows.len());
    for (name, code, version, aspect_def_id) in rows {
        let kind = codec::hierarchy_type_from_code(&code)?;
        let content = match kind {
            HierarchyType::EntityList => Content::List(read_entity_rows(
                connection,
                session,
                "
                select entity_id
                    from hierarchy_entity_list
                    where catalog_id = ?1
                    and hierarchy_name = ?2
                    order by item_order
                ",
                &catalog_id,
                &name,
            )?),
            HierarchyType::EntitySet => Content::Set(read_entity_rows(
                connection,
                session,
                "
                select entity_id
                    from hierarchy_entity_set
                    where catalog_id = ?1
                    and hierarchy_name = ?2
                    order by item_order
                ",
                &catalog_id,
                &name,
            )?),
            HierarchyType::EntityDirectory => read_directory(connection, session, &catalog_id, &name)?,
            HierarchyType::EntityTree => read_tree(connection, session, &catalog_id, &name)?,
            HierarchyType::AspectMap => {
                let aspect_def_id = aspect_def_id.ok_or_else(|| {
                    AspectraError::corruption(format!("aspect map '{}' has no aspect def", name))
                })?;
                let def = match linked.iter().find(|(id, _)| *id == aspect_def_id) {
                    Some((_, def)) => Arc::clone(def),
                    None => resolve_aspect_def(session, catalog, read_aspect_def(connection, &aspect_def_id)?),
                };
                // keep the map the caller already holds if its definition still fits
                let def = match catalog.hierarchy(&name).and_then(Hierarchy::as_aspect_map) {
                    Some(existing) if existing.aspect_def().matches(&def) => Arc::clone(existing.aspect_def()),
                    _ => def,
                };
                let aspects = match mappings.get(def.name()) {
                    Some(mapping) => read_mapped(connection, session, &catalog_id, &def, mapping)?,
                    None => read_eav(connection, session, &catalog_id, &name, &aspect_def_id, &def)?,
                };
                Content::AspectMap { def, aspects }
            }
        };
        debug!(catalog = %catalog_id, hierarchy = %name, kind = %kind, "read hierarchy");
        staged.push(Staged {
            name,
            version,
            kind,
            content,
        });
    }
    Ok(staged)
}

fn fill(hierarchy: &mut Hierarchy, content: Content) -> Result<()> {
    match (hierarchy, content) {
        (Hierarchy::EntityList(list), Content::List(entities)) => {
            list.clear();
            entities.into_iter().for_each(|e| list.push(e));
        }
        (Hierarchy::EntitySet(set), Content::Set(entities)) => {
            set.clear();
            for e in entities {
                set.insert(e);
            }
        }
        (Hierarchy::EntityDirectory(directory), Content::Directory(entries)) => {
            directory.clear();
            for (key, e) in entries {
                directory.put(key, e);
            }
        }
        (Hierarchy::EntityTree(tree), Content::Tree { value, children }) => {
            // splice into the root the caller may already hold
            let root = tree.root();
            let mut root = root.write();
            root.set_value(value);
            root.replace_children(children)?;
        }
        (Hierarchy::AspectMap(map), Content::AspectMap { aspects, .. }) => {
            map.clear();
            for (e, aspect) in aspects {
                map.put_unchecked(e, aspect.into_ref());
            }
        }
        (hierarchy, _) => {
            return Err(AspectraError::corruption(format!(
                "stored content does not fit hierarchy '{}'",
                hierarchy.name()
            )));
        }
    }
    Ok(())
}

fn empty_hierarchy(staged: &Staged, catalog_id: Uuid) -> Hierarchy {
    let name = staged.name.as_str();
    match &staged.content {
        Content::List(_) => EntityList::new(name, catalog_id).into(),
        Content::Set(_) => EntitySet::new(name, catalog_id).into(),
        Content::Directory(_) => EntityDirectory::new(name, catalog_id).into(),
        Content::Tree { .. } => EntityTree::new(name, catalog_id).into(),
        Content::AspectMap { def, .. } => AspectMapHierarchy::with_name(name, catalog_id, Arc::clone(def)).into(),
    }
}

fn reusable(existing: &Hierarchy, staged: &Staged) -> bool {
    if existing.hierarchy_type() != staged.kind {
        return false;
    }
    match (existing.as_aspect_map(), &staged.content) {
        (Some(map), Content::AspectMap { def, .. }) => Arc::ptr_eq(map.aspect_def(), def),
        _ => true,
    }
}

/// Refreshes `catalog` from storage. Hierarchies that already exist under
/// the stored name and kind are refilled in place.
pub(crate) fn load_into(
    connection: &Connection,
    session: &Session,
    catalog: &mut Catalog,
    mappings: &Mappings,
) -> Result<()> {
    let catalog_id = catalog.id();
    let row = read_catalog_row(connection, catalog_id)?
        .ok_or_else(|| AspectraError::not_found("catalog", catalog_id.to_string()))?;
    if row.species != catalog.species() || row.upstream != catalog.upstream() {
        return Err(AspectraError::IdentityConflict(format!(
            "stored catalog {} is a {} and cannot be loaded into a {}",
            catalog_id,
            row.species,
            catalog.species()
        )));
    }
    let linked = read_linked_aspect_defs(connection, session, catalog)?;
    let staged = read_hierarchies(connection, session, catalog, &linked, mappings)?;

    catalog.set_uri(row.uri);
    catalog.set_version(row.version);
    for (_, def) in linked {
        catalog.declare_aspect_def(def);
    }
    for item in staged {
        let reuse = catalog.hierarchy(&item.name).is_some_and(|h| reusable(h, &item));
        if reuse {
            if let Some(existing) = catalog.hierarchy_mut(&item.name) {
                fill(existing, item.content)?;
                existing.set_version(item.version);
            }
            catalog.observe_hierarchy_version(item.version);
        } else {
            let mut hierarchy = empty_hierarchy(&item, catalog_id);
            fill(&mut hierarchy, item.content)?;
            catalog.restore_hierarchy(hierarchy, item.version);
        }
    }
    Ok(())
}

pub(crate) fn load_catalog(
    connection: &Connection,
    session: &Session,
    catalog_id: Uuid,
    mappings: &Mappings,
) -> Result<Catalog> {
    let row = read_catalog_row(connection, catalog_id)?
        .ok_or_else(|| AspectraError::not_found("catalog", catalog_id.to_string()))?;
    let mut catalog = Catalog::with_id(catalog_id, row.species, row.upstream)?;
    load_into(connection, session, &mut catalog, mappings)?;
    Ok(catalog)
}
