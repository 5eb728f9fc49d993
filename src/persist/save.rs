use std::collections::{HashMap, HashSet};

use rusqlite::types::Null;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ddl::{self, HIERARCHY_CONTENT_TABLES};
use super::mapping::TableMapping;
use super::Mappings;
use crate::aspect::Aspect;
use crate::catalog::Catalog;
use crate::codec;
use crate::datatype::{PropertyValue, Value};
use crate::error::{AspectraError, Result};
use crate::hierarchy::{
    AspectMapHierarchy, EntityDirectory, EntityList, EntitySet, EntityTree, Hierarchy, NodeRef,
};
use crate::schema::{AspectDef, PropertyDef};

/// `value_index` of the row that marks a multivalued property as set, so an
/// empty list survives a reload.
pub(crate) const LIST_MARKER: i64 = -1;

fn register_entity(connection: &Connection, entity_id: &str) -> Result<()> {
    connection
        .prepare_cached("insert or ignore into entity (entity_id) values (?)")?
        .execute([entity_id])?;
    Ok(())
}

/// Writes the whole catalog. Runs inside the caller's transaction and is
/// safe to repeat: every step either upserts or deletes before rewriting.
pub(crate) fn write_catalog(connection: &Connection, catalog: &Catalog, mappings: &Mappings) -> Result<()> {
    let catalog_id = catalog.id().to_string();
    register_entity(connection, &catalog_id)?;
    connection.execute(
        "
        insert into catalog (
            catalog_id,
            species,
            uri,
            upstream_catalog_id,
            version_number
        ) values (?1, ?2, ?3, ?4, ?5)
        on conflict (catalog_id) do update set
            species = excluded.species,
            uri = excluded.uri,
            upstream_catalog_id = excluded.upstream_catalog_id,
            version_number = excluded.version_number
        ",
        params![
            catalog_id,
            catalog.species().as_str(),
            catalog.uri().map(|u| u.as_str()),
            catalog.upstream().map(|u| u.to_string()),
            catalog.version()
        ],
    )?;

    let mut aspect_def_ids: HashMap<String, String> = HashMap::new();
    for def in catalog.aspect_defs() {
        let aspect_def_id = write_aspect_def(connection, &catalog_id, def)?;
        connection.execute(
            "insert or ignore into catalog_aspect_def (catalog_id, aspect_def_id) values (?1, ?2)",
            params![catalog_id, aspect_def_id],
        )?;
        aspect_def_ids.insert(def.name().to_owned(), aspect_def_id);
    }
    prune_aspect_def_links(connection, &catalog_id, &aspect_def_ids)?;

    let mut mapped_defs: HashSet<String> = HashSet::new();
    for hierarchy in catalog.hierarchies() {
        if let Some(map) = hierarchy.as_aspect_map() {
            let def_name = map.aspect_def().name();
            if !mapped_defs.insert(def_name.to_owned()) {
                return Err(AspectraError::IdentityConflict(format!(
                    "catalog {} holds more than one aspect map for '{}'",
                    catalog_id, def_name
                )));
            }
        }
    }

    prune_hierarchies(connection, catalog)?;
    for hierarchy in catalog.hierarchies() {
        let aspect_def_id = match hierarchy.as_aspect_map() {
            Some(map) => match aspect_def_ids.get(map.aspect_def().name()) {
                Some(id) => Some(id.clone()),
                None => Some(write_aspect_def(connection, &catalog_id, map.aspect_def())?),
            },
            None => None,
        };
        write_hierarchy(connection, &catalog_id, hierarchy, aspect_def_id.as_deref(), mappings)?;
    }
    Ok(())
}

/// Upserts the definition by name and returns the id it is stored under.
///
/// A stored definition only grows: dropping a property or changing its type
/// is refused while another catalog uses the definition, and otherwise
/// needs a definition that may remove properties.
fn write_aspect_def(connection: &Connection, catalog_id: &str, def: &AspectDef) -> Result<String> {
    check_stored_properties(connection, catalog_id, def)?;
    connection.execute(
        "
        insert into aspect_def (
            aspect_def_id,
            name,
            hash_version,
            is_readable,
            is_writable,
            can_add_properties,
            can_remove_properties
        ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        on conflict (name) do update set
            hash_version = excluded.hash_version,
            is_readable = excluded.is_readable,
            is_writable = excluded.is_writable,
            can_add_properties = excluded.can_add_properties,
            can_remove_properties = excluded.can_remove_properties
        ",
        params![
            def.id().to_string(),
            def.name(),
            def.hash() as i64,
            def.is_readable(),
            def.is_writable(),
            def.can_add_properties(),
            def.can_remove_properties()
        ],
    )?;
    let aspect_def_id: String = connection.query_row(
        "select aspect_def_id from aspect_def where name = ?",
        [def.name()],
        |r| r.get(0),
    )?;
    if aspect_def_id != def.id().to_string() {
        debug!(aspect_def = def.name(), stored = %aspect_def_id, "aspect def stored under an earlier id");
    }

    let properties = def.properties();
    for (order, property) in properties.iter().enumerate() {
        connection
            .prepare_cached(
                "
            insert into property_def (
                aspect_def_id,
                name,
                property_order,
                property_type,
                default_value,
                has_default_value,
                is_readable,
                is_writable,
                is_nullable,
                is_removable,
                is_multivalued
            ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            on conflict (aspect_def_id, name) do update set
                property_order = excluded.property_order,
                property_type = excluded.property_type,
                default_value = excluded.default_value,
                has_default_value = excluded.has_default_value,
                is_readable = excluded.is_readable,
                is_writable = excluded.is_writable,
                is_nullable = excluded.is_nullable,
                is_removable = excluded.is_removable,
                is_multivalued = excluded.is_multivalued
            ",
            )?
            .execute(params![
                aspect_def_id,
                property.name(),
                order as i64,
                codec::property_type_code(property.property_type()),
                property.default_value().map(codec::encode_default),
                property.has_default_value(),
                property.is_readable(),
                property.is_writable(),
                property.is_nullable(),
                property.is_removable(),
                property.is_multivalued()
            ])?;
    }
    let stored: Vec<String> = connection
        .prepare_cached("select name from property_def where aspect_def_id = ?")?
        .query_map([&aspect_def_id], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    for name in stored {
        if def.property(&name).is_none() {
            debug!(aspect_def = def.name(), property = %name, "dropping removed property def");
            connection.execute(
                "delete from property_def where aspect_def_id = ?1 and name = ?2",
                params![aspect_def_id, name],
            )?;
        }
    }
    Ok(aspect_def_id)
}

fn check_stored_properties(connection: &Connection, catalog_id: &str, def: &AspectDef) -> Result<()> {
    let aspect_def_id: Option<String> = connection
        .query_row(
            "select aspect_def_id from aspect_def where name = ?",
            [def.name()],
            |r| r.get(0),
        )
        .optional()?;
    let Some(aspect_def_id) = aspect_def_id else {
        return Ok(());
    };
    let stored: Vec<(String, String)> = connection
        .prepare_cached("select name, property_type from property_def where aspect_def_id = ?")?
        .query_map([&aspect_def_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    let shared: i64 = connection.query_row(
        "
        select count(*) from (
            select catalog_id from catalog_aspect_def
            where aspect_def_id = ?1 and catalog_id <> ?2
            union
            select catalog_id from hierarchy
            where aspect_def_id = ?1 and catalog_id <> ?2
        )
        ",
        params![aspect_def_id, catalog_id],
        |r| r.get(0),
    )?;
    for (name, code) in stored {
        let conflict = match def.property(&name) {
            Some(property) if codec::property_type_code(property.property_type()) == code => continue,
            Some(property) => format!(
                "property '{}' is stored as {} and cannot become {}",
                name,
                code,
                property.property_type()
            ),
            None if shared > 0 => format!(
                "property '{}' is still used by {} other catalog(s)",
                name, shared
            ),
            None if !def.can_remove_properties() => format!("property '{}' would be dropped", name),
            None => continue,
        };
        return Err(AspectraError::IdentityConflict(format!(
            "aspect def '{}' differs from the stored one: {}",
            def.name(),
            conflict
        )));
    }
    Ok(())
}

fn prune_aspect_def_links(
    connection: &Connection,
    catalog_id: &str,
    kept: &HashMap<String, String>,
) -> Result<()> {
    let linked: Vec<String> = connection
        .prepare("select aspect_def_id from catalog_aspect_def where catalog_id = ?")?
        .query_map([catalog_id], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    for aspect_def_id in linked {
        if !kept.values().any(|id| *id == aspect_def_id) {
            connection.execute(
                "delete from catalog_aspect_def where catalog_id = ?1 and aspect_def_id = ?2",
                params![catalog_id, aspect_def_id],
            )?;
        }
    }
    Ok(())
}

fn clear_hierarchy_rows(connection: &Connection, catalog_id: &str, name: &str) -> Result<()> {
    for table in HIERARCHY_CONTENT_TABLES {
        connection.execute(
            &format!("delete from {} where catalog_id = ?1 and hierarchy_name = ?2", table),
            params![catalog_id, name],
        )?;
    }
    Ok(())
}

/// Removes EAV rows of entities no longer held by any aspect map of the definition.
fn purge_orphaned_values(connection: &Connection, catalog_id: &str, aspect_def_id: &str) -> Result<usize> {
    let purged = connection.execute(
        "
        delete from property_value
        where catalog_id = ?1
        and aspect_def_id = ?2
        and entity_id not in (
            select entity_id
                from hierarchy_aspect_map
                where catalog_id = ?1
                and aspect_def_id = ?2
        )
        ",
        params![catalog_id, aspect_def_id],
    )?;
    Ok(purged)
}

/// Deletes stored hierarchies the in-memory catalog no longer holds.
fn prune_hierarchies(connection: &Connection, catalog: &Catalog) -> Result<()> {
    let catalog_id = catalog.id().to_string();
    let stored: Vec<(String, Option<String>)> = connection
        .prepare("select name, aspect_def_id from hierarchy where catalog_id = ?")?
        .query_map([&catalog_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    for (name, aspect_def_id) in stored {
        if catalog.hierarchy(&name).is_some() {
            continue;
        }
        debug!(catalog = %catalog_id, hierarchy = %name, "pruning stored hierarchy");
        clear_hierarchy_rows(connection, &catalog_id, &name)?;
        if let Some(aspect_def_id) = aspect_def_id {
            purge_orphaned_values(connection, &catalog_id, &aspect_def_id)?;
        }
        connection.execute(
            "delete from hierarchy where catalog_id = ?1 and name = ?2",
            params![catalog_id, name],
        )?;
    }
    Ok(())
}

fn write_hierarchy(
    connection: &Connection,
    catalog_id: &str,
    hierarchy: &Hierarchy,
    aspect_def_id: Option<&str>,
    mappings: &Mappings,
) -> Result<()> {
    let name = hierarchy.name();
    let code = codec::hierarchy_type_code(hierarchy.hierarchy_type());
    let stored_code: Option<String> = connection
        .query_row(
            "select hierarchy_type from hierarchy where catalog_id = ?1 and name = ?2",
            params![catalog_id, name],
            |r| r.get(0),
        )
        .optional()?;
    if stored_code.is_some_and(|stored| stored != code) {
        // the name now holds a different kind of hierarchy
        clear_hierarchy_rows(connection, catalog_id, name)?;
    }
    connection.execute(
        "
        insert into hierarchy (
            catalog_id,
            name,
            hierarchy_type,
            version_number,
            aspect_def_id
        ) values (?1, ?2, ?3, ?4, ?5)
        on conflict (catalog_id, name) do update set
            hierarchy_type = excluded.hierarchy_type,
            version_number = excluded.version_number,
            aspect_def_id = excluded.aspect_def_id
        ",
        params![catalog_id, name, code, hierarchy.version(), aspect_def_id],
    )?;

    let rows = match hierarchy {
        Hierarchy::EntityList(list) => write_list(connection, catalog_id, name, list)?,
        Hierarchy::EntitySet(set) => write_set(connection, catalog_id, name, set)?,
        Hierarchy::EntityDirectory(directory) => write_directory(connection, catalog_id, name, directory)?,
        Hierarchy::EntityTree(tree) => write_tree(connection, catalog_id, name, tree)?,
        Hierarchy::AspectMap(map) => {
            let aspect_def_id = aspect_def_id.unwrap_or_default();
            match mappings.get(map.aspect_def().name()) {
                Some(mapping) => write_mapped(connection, catalog_id, map, mapping)?,
                None => write_eav(connection, catalog_id, name, aspect_def_id, map)?,
            }
        }
    };
    debug!(catalog = %catalog_id, hierarchy = %name, kind = code, rows, "wrote hierarchy");
    Ok(())
}

fn write_list(connection: &Connection, catalog_id: &str, name: &str, list: &EntityList) -> Result<usize> {
    connection.execute(
        "delete from hierarchy_entity_list where catalog_id = ?1 and hierarchy_name = ?2",
        params![catalog_id, name],
    )?;
    let mut insert = connection.prepare_cached(
        "
        insert into hierarchy_entity_list (
            catalog_id,
            hierarchy_name,
            entity_id,
            item_order
        ) values (?1, ?2, ?3, ?4)
        ",
    )?;
    for (order, entity) in list.iter().enumerate() {
        let entity_id = entity.global_id().to_string();
        register_entity(connection, &entity_id)?;
        insert.execute(params![catalog_id, name, entity_id, order as i64])?;
    }
    Ok(list.len())
}

fn write_set(connection: &Connection, catalog_id: &str, name: &str, set: &EntitySet) -> Result<usize> {
    connection.execute(
        "delete from hierarchy_entity_set where catalog_id = ?1 and hierarchy_name = ?2",
        params![catalog_id, name],
    )?;
    let mut insert = connection.prepare_cached(
        "
        insert into hierarchy_entity_set (
            catalog_id,
            hierarchy_name,
            entity_id,
            item_order
        ) values (?1, ?2, ?3, ?4)
        ",
    )?;
    for (order, entity) in set.iter().enumerate() {
        let entity_id = entity.global_id().to_string();
        register_entity(connection, &entity_id)?;
        insert.execute(params![catalog_id, name, entity_id, order as i64])?;
    }
    Ok(set.len())
}

fn write_directory(
    connection: &Connection,
    catalog_id: &str,
    name: &str,
    directory: &EntityDirectory,
) -> Result<usize> {
    let mut upsert = connection.prepare_cached(
        "
        insert into hierarchy_entity_directory (
            catalog_id,
            hierarchy_name,
            entity_key,
            entity_id,
            item_order
        ) values (?1, ?2, ?3, ?4, ?5)
        on conflict (catalog_id, hierarchy_name, entity_key) do update set
            entity_id = excluded.entity_id,
            item_order = excluded.item_order
        ",
    )?;
    for (order, (key, entity)) in directory.iter().enumerate() {
        let entity_id = entity.global_id().to_string();
        register_entity(connection, &entity_id)?;
        upsert.execute(params![catalog_id, name, key, entity_id, order as i64])?;
    }
    let stored: Vec<String> = connection
        .prepare_cached(
            "select entity_key from hierarchy_entity_directory where catalog_id = ?1 and hierarchy_name = ?2",
        )?
        .query_map(params![catalog_id, name], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    for key in stored {
        if !directory.contains_key(&key) {
            connection.execute(
                "
                delete from hierarchy_entity_directory
                where catalog_id = ?1
                and hierarchy_name = ?2
                and entity_key = ?3
                ",
                params![catalog_id, name, key],
            )?;
        }
    }
    Ok(directory.len())
}

/// Node ids are derived from the parent's id and the child key, so an
/// unchanged tree is written with the same ids every time.
pub(crate) fn tree_node_id(parent: &[u8], key: &str) -> Uuid {
    let mut hasher = blake3::Hasher::new();
    hasher.update(parent);
    hasher.update(&[0]);
    hasher.update(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

struct TreeWriter<'a> {
    connection: &'a Connection,
    catalog_id: &'a str,
    name: &'a str,
    written: usize,
}

impl TreeWriter<'_> {
    fn write_node(
        &mut self,
        node: &NodeRef,
        node_id: Uuid,
        parent: Option<Uuid>,
        key: &str,
        path: &str,
        order: usize,
    ) -> Result<()> {
        let (value, leaf, children) = {
            let node = node.read();
            (node.value().cloned(), node.is_leaf(), node.children())
        };
        let entity_id = value.map(|e| e.global_id().to_string());
        if let Some(entity_id) = &entity_id {
            register_entity(self.connection, entity_id)?;
        }
        self.connection
            .prepare_cached(
                "
            insert into hierarchy_entity_tree_node (
                node_id,
                catalog_id,
                hierarchy_name,
                parent_node_id,
                node_key,
                entity_id,
                node_path,
                item_order,
                is_leaf
            ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            )?
            .execute(params![
                node_id.to_string(),
                self.catalog_id,
                self.name,
                parent.map(|p| p.to_string()),
                key,
                entity_id,
                path,
                order as i64,
                leaf
            ])?;
        self.written += 1;
        for (position, (child_key, child)) in children.iter().enumerate() {
            let child_path = if path.is_empty() {
                child_key.clone()
            } else {
                format!("{}/{}", path, child_key)
            };
            let child_id = tree_node_id(node_id.as_bytes(), child_key);
            self.write_node(child, child_id, Some(node_id), child_key, &child_path, position)?;
        }
        Ok(())
    }
}

fn write_tree(connection: &Connection, catalog_id: &str, name: &str, tree: &EntityTree) -> Result<usize> {
    connection.execute(
        "delete from hierarchy_entity_tree_node where catalog_id = ?1 and hierarchy_name = ?2",
        params![catalog_id, name],
    )?;
    let mut root_seed = catalog_id.as_bytes().to_vec();
    root_seed.push(0);
    let root_id = tree_node_id(&root_seed, name);
    let mut writer = TreeWriter {
        connection,
        catalog_id,
        name,
        written: 0,
    };
    writer.write_node(&tree.root(), root_id, None, "", "", 0)?;
    Ok(writer.written)
}

/// The `(value_index, value)` rows one property of one aspect is stored as.
pub(crate) fn property_rows(property: &PropertyDef, aspect: &Aspect) -> Result<Vec<(i64, Option<PropertyValue>)>> {
    let name = property.name();
    let stored = if aspect.is_explicitly_set(name) {
        Some(aspect.read_unchecked(name))
    } else {
        None
    };
    let rows = match (property.is_multivalued(), stored) {
        // the default applies at read time
        (false, None) if property.has_default_value() => Vec::new(),
        (false, None) | (false, Some(None)) => vec![(0, None)],
        (false, Some(Some(Value::One(value)))) => vec![(0, Some(value))],
        (false, Some(Some(Value::Many(_)))) => {
            return Err(AspectraError::SchemaViolation(format!(
                "single-valued property '{}' holds a list",
                name
            )));
        }
        (true, None) | (true, Some(None)) => Vec::new(),
        (true, Some(Some(Value::One(value)))) => vec![(LIST_MARKER, None), (0, Some(value))],
        (true, Some(Some(Value::Many(values)))) => std::iter::once((LIST_MARKER, None))
            .chain(values.into_iter().enumerate().map(|(i, v)| (i as i64, Some(v))))
            .collect(),
    };
    Ok(rows)
}

fn write_eav(
    connection: &Connection,
    catalog_id: &str,
    name: &str,
    aspect_def_id: &str,
    map: &AspectMapHierarchy,
) -> Result<usize> {
    connection.execute(
        "delete from hierarchy_aspect_map where catalog_id = ?1 and hierarchy_name = ?2",
        params![catalog_id, name],
    )?;
    connection.execute(
        "delete from aspect where catalog_id = ?1 and hierarchy_name = ?2",
        params![catalog_id, name],
    )?;
    let properties = map.aspect_def().properties();
    let mut written = 0;
    for (order, (entity, aspect)) in map.iter().enumerate() {
        let entity_id = entity.global_id().to_string();
        register_entity(connection, &entity_id)?;
        connection
            .prepare_cached(
                "
            insert into hierarchy_aspect_map (
                catalog_id,
                hierarchy_name,
                entity_id,
                aspect_def_id,
                item_order
            ) values (?1, ?2, ?3, ?4, ?5)
            ",
            )?
            .execute(params![catalog_id, name, entity_id, aspect_def_id, order as i64])?;
        connection
            .prepare_cached(
                "
            insert or replace into aspect (
                entity_id,
                aspect_def_id,
                catalog_id,
                hierarchy_name
            ) values (?1, ?2, ?3, ?4)
            ",
            )?
            .execute(params![entity_id, aspect_def_id, catalog_id, name])?;
        connection
            .prepare_cached(
                "
            delete from property_value
            where entity_id = ?1
            and aspect_def_id = ?2
            and catalog_id = ?3
            ",
            )?
            .execute(params![entity_id, aspect_def_id, catalog_id])?;

        let aspect = aspect.read();
        let mut insert = connection.prepare_cached(
            "
            insert into property_value (
                entity_id,
                aspect_def_id,
                catalog_id,
                property_name,
                value_index,
                value_text,
                value_binary
            ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )?;
        for property in &properties {
            for (index, value) in property_rows(property, &aspect)? {
                let (text, binary) = match &value {
                    Some(value) => codec::encode(value).into_columns(),
                    None => (None, None),
                };
                insert.execute(params![
                    entity_id,
                    aspect_def_id,
                    catalog_id,
                    property.name(),
                    index,
                    text,
                    binary
                ])?;
                written += 1;
            }
        }
    }
    let purged = purge_orphaned_values(connection, catalog_id, aspect_def_id)?;
    if purged > 0 {
        debug!(catalog = %catalog_id, hierarchy = %name, purged, "purged values of departed entities");
    }
    Ok(written)
}

fn write_mapped(
    connection: &Connection,
    catalog_id: &str,
    map: &AspectMapHierarchy,
    mapping: &TableMapping,
) -> Result<usize> {
    let def = map.aspect_def();
    connection.execute_batch(&mapping.create_table_sql(def)?)?;
    if let Some(cleanup) = mapping.cleanup_sql() {
        if mapping.has_catalog_id() {
            connection.execute(&cleanup, [catalog_id])?;
        } else {
            connection.execute(&cleanup, [])?;
        }
    }
    let columns = mapping.columns(def)?;
    let mut insert = connection.prepare(&mapping.insert_sql(def)?)?;
    for (entity, aspect) in map.iter() {
        let aspect = aspect.read();
        let mut values: Vec<Box<dyn ToSql>> = Vec::with_capacity(columns.len() + 2);
        if mapping.has_catalog_id() {
            values.push(Box::new(catalog_id.to_owned()));
        }
        if mapping.has_entity_id() {
            values.push(Box::new(entity.global_id().to_string()));
        }
        for (property, column) in &columns {
            match aspect.read_unchecked(property) {
                Some(Value::One(value)) => values.push(Box::new(value)),
                None => values.push(Box::new(Null)),
                Some(Value::Many(_)) => {
                    return Err(AspectraError::SchemaViolation(format!(
                        "column '{}' of '{}' cannot hold a list",
                        column,
                        mapping.table_name()
                    )));
                }
            }
        }
        insert.execute(params_from_iter(values.iter()))?;
    }
    Ok(map.len())
}

/// Removes every row the catalog owns, mapped tables included.
pub(crate) fn delete_catalog_rows(connection: &Connection, catalog_id: Uuid, mappings: &Mappings) -> Result<()> {
    let id = catalog_id.to_string();
    connection.execute("delete from property_value where catalog_id = ?", [&id])?;
    for table in HIERARCHY_CONTENT_TABLES {
        connection.execute(&format!("delete from {} where catalog_id = ?", table), [&id])?;
    }
    connection.execute("delete from hierarchy where catalog_id = ?", [&id])?;
    connection.execute("delete from catalog_aspect_def where catalog_id = ?", [&id])?;
    for mapping in mappings.values().filter(|m| m.has_catalog_id()) {
        if ddl::table_exists(connection, mapping.table_name())? {
            let removed = connection.execute(
                &format!("delete from {} where catalog_id = ?", mapping.table_name()),
                [&id],
            )?;
            debug!(catalog = %id, table = mapping.table_name(), removed, "cleared mapped rows");
        } else {
            warn!(table = mapping.table_name(), "mapped table was never created");
        }
    }
    connection.execute("delete from catalog where catalog_id = ?", [&id])?;
    connection.execute("delete from entity where entity_id = ?", [&id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::schema::{Mutability, PropertyType};

    fn def() -> Arc<AspectDef> {
        Arc::new(
            AspectDef::new(
                "thing",
                vec![
                    PropertyDef::new("label", PropertyType::String).unwrap(),
                    PropertyDef::builder("size", PropertyType::Integer)
                        .default_value(3)
                        .build()
                        .unwrap(),
                    PropertyDef::builder("tags", PropertyType::String)
                        .multivalued(true)
                        .build()
                        .unwrap(),
                ],
                Mutability::Immutable,
            )
            .unwrap(),
        )
    }

    fn rows(aspect: &Aspect, name: &str) -> Vec<(i64, Option<PropertyValue>)> {
        let property = aspect.aspect_def().property(name).unwrap();
        property_rows(&property, aspect).unwrap()
    }

    #[test]
    fn unset_single_values_depend_on_the_default() {
        let aspect = Aspect::new(def());
        assert_eq!(rows(&aspect, "label"), vec![(0, None)]);
        assert!(rows(&aspect, "size").is_empty());
        assert!(rows(&aspect, "tags").is_empty());
    }

    #[test]
    fn lists_carry_a_marker_row() {
        let mut aspect = Aspect::new(def());
        aspect.write("tags", Vec::<PropertyValue>::new()).unwrap();
        assert_eq!(rows(&aspect, "tags"), vec![(LIST_MARKER, None)]);
        aspect
            .write("tags", vec![PropertyValue::from("a"), PropertyValue::from("b")])
            .unwrap();
        assert_eq!(
            rows(&aspect, "tags"),
            vec![
                (LIST_MARKER, None),
                (0, Some(PropertyValue::from("a"))),
                (1, Some(PropertyValue::from("b")))
            ]
        );
        aspect.write_null("tags").unwrap();
        assert!(rows(&aspect, "tags").is_empty());
    }

    #[test]
    fn node_ids_are_stable() {
        let root = tree_node_id(b"catalog", "tree");
        assert_eq!(root, tree_node_id(b"catalog", "tree"));
        assert_ne!(tree_node_id(root.as_bytes(), "a"), tree_node_id(root.as_bytes(), "b"));
    }
}
