// The "STRICT" keyword is left out so that external tools can still open the
// file, same as the column affinities being kept loose.
use rusqlite::Connection;

use crate::error::Result;

/// Core tables in dependency order; dropped in reverse.
pub(crate) const TABLES: [&str; 13] = [
    "entity",
    "catalog",
    "aspect_def",
    "property_def",
    "catalog_aspect_def",
    "hierarchy",
    "hierarchy_entity_list",
    "hierarchy_entity_set",
    "hierarchy_entity_directory",
    "hierarchy_entity_tree_node",
    "hierarchy_aspect_map",
    "aspect",
    "property_value",
];

/// Tables whose rows all carry `catalog_id` and `hierarchy_name`.
pub(crate) const HIERARCHY_CONTENT_TABLES: [&str; 6] = [
    "hierarchy_entity_list",
    "hierarchy_entity_set",
    "hierarchy_entity_directory",
    "hierarchy_entity_tree_node",
    "hierarchy_aspect_map",
    "aspect",
];

const SCHEMA: &str = "
create table if not exists entity (
    entity_id text not null,
    constraint referenceable_entity_id primary key (
        entity_id
    )
);
create table if not exists catalog (
    catalog_id text not null,
    species text not null,
    uri text null,
    upstream_catalog_id text null,
    version_number integer not null,
    constraint catalog_is_entity foreign key (
        catalog_id
    ) references entity(entity_id),
    constraint referenceable_catalog_id primary key (
        catalog_id
    )
);
create table if not exists aspect_def (
    aspect_def_id text not null,
    name text not null,
    hash_version integer not null,
    is_readable integer not null,
    is_writable integer not null,
    can_add_properties integer not null,
    can_remove_properties integer not null,
    constraint referenceable_aspect_def_id primary key (
        aspect_def_id
    ),
    constraint unique_aspect_def_name unique (
        name
    )
);
create table if not exists property_def (
    aspect_def_id text not null,
    name text not null,
    property_order integer not null,
    property_type text not null,
    default_value text null,
    has_default_value integer not null,
    is_readable integer not null,
    is_writable integer not null,
    is_nullable integer not null,
    is_removable integer not null,
    is_multivalued integer not null,
    constraint property_def_of_aspect_def foreign key (
        aspect_def_id
    ) references aspect_def(aspect_def_id),
    constraint unique_property_def unique (
        aspect_def_id,
        name
    )
);
create table if not exists catalog_aspect_def (
    catalog_id text not null,
    aspect_def_id text not null,
    constraint catalog_aspect_def_is_catalog foreign key (
        catalog_id
    ) references catalog(catalog_id),
    constraint catalog_aspect_def_is_aspect_def foreign key (
        aspect_def_id
    ) references aspect_def(aspect_def_id),
    constraint unique_catalog_aspect_def primary key (
        catalog_id,
        aspect_def_id
    )
);
create table if not exists hierarchy (
    catalog_id text not null,
    name text not null,
    hierarchy_type text not null,
    version_number integer not null,
    aspect_def_id text null,
    constraint hierarchy_of_catalog foreign key (
        catalog_id
    ) references catalog(catalog_id),
    constraint unique_hierarchy primary key (
        catalog_id,
        name
    )
);
create table if not exists hierarchy_entity_list (
    catalog_id text not null,
    hierarchy_name text not null,
    entity_id text not null,
    item_order integer not null,
    constraint unique_list_position primary key (
        catalog_id,
        hierarchy_name,
        item_order
    )
);
create table if not exists hierarchy_entity_set (
    catalog_id text not null,
    hierarchy_name text not null,
    entity_id text not null,
    item_order integer not null,
    constraint unique_set_member primary key (
        catalog_id,
        hierarchy_name,
        entity_id
    )
);
create table if not exists hierarchy_entity_directory (
    catalog_id text not null,
    hierarchy_name text not null,
    entity_key text not null,
    entity_id text not null,
    item_order integer not null,
    constraint unique_directory_key primary key (
        catalog_id,
        hierarchy_name,
        entity_key
    )
);
create table if not exists hierarchy_entity_tree_node (
    node_id text not null,
    catalog_id text not null,
    hierarchy_name text not null,
    parent_node_id text null,
    node_key text not null,
    entity_id text null,
    node_path text not null,
    item_order integer not null,
    is_leaf integer not null,
    constraint referenceable_node_id primary key (
        node_id
    )
);
create table if not exists hierarchy_aspect_map (
    catalog_id text not null,
    hierarchy_name text not null,
    entity_id text not null,
    aspect_def_id text not null,
    item_order integer not null,
    constraint unique_aspect_map_entry primary key (
        catalog_id,
        hierarchy_name,
        entity_id
    )
);
create table if not exists aspect (
    entity_id text not null,
    aspect_def_id text not null,
    catalog_id text not null,
    hierarchy_name text not null,
    constraint unique_aspect primary key (
        entity_id,
        aspect_def_id,
        catalog_id
    )
);
create table if not exists property_value (
    entity_id text not null,
    aspect_def_id text not null,
    catalog_id text not null,
    property_name text not null,
    value_index integer not null,
    value_text text null,
    value_binary blob null,
    constraint unique_property_value primary key (
        entity_id,
        aspect_def_id,
        catalog_id,
        property_name,
        value_index
    )
);
create index if not exists property_value_by_aspect on property_value (
    catalog_id,
    aspect_def_id,
    entity_id
);
create index if not exists tree_node_by_hierarchy on hierarchy_entity_tree_node (
    catalog_id,
    hierarchy_name
);
";

pub(crate) fn bootstrap(connection: &Connection) -> Result<()> {
    connection.execute_batch(SCHEMA)?;
    Ok(())
}

pub(crate) fn drop_all(connection: &Connection) -> Result<()> {
    let mut batch = String::new();
    for table in TABLES.iter().rev() {
        batch.push_str(&format!("drop table if exists {};\n", table));
    }
    connection.execute_batch(&batch)?;
    Ok(())
}

pub(crate) fn truncate_all(connection: &Connection) -> Result<()> {
    let mut batch = String::new();
    for table in TABLES.iter().rev() {
        batch.push_str(&format!("delete from {};\n", table));
    }
    connection.execute_batch(&batch)?;
    Ok(())
}

pub(crate) fn table_exists(connection: &Connection, table: &str) -> Result<bool> {
    let count: i64 = connection.query_row(
        "select count(*) from sqlite_master where type = 'table' and name = ?",
        [table],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}
