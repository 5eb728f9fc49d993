use std::sync::Arc;

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use aspectra::AspectraError;
use aspectra::catalog::{Catalog, Species};
use aspectra::construct::Session;
use aspectra::persist::{PersistenceMode, Persistor};

fn setup() -> (Session, Persistor, Catalog) {
    let session = Session::new();
    let mut catalog = Catalog::new(Species::Source, None).unwrap();
    let tree = catalog.create_entity_tree("fs").unwrap();
    tree.root().write().set_value(Some(session.create_entity()));
    tree.put_path("usr/local/bin", Some(session.create_entity())).unwrap();
    tree.put_path("usr/lib", None).unwrap();
    tree.put_leaf("usr/local/bin/tool", Some(session.create_entity())).unwrap();
    tree.put_path("etc", Some(session.create_entity())).unwrap();
    (session, Persistor::open(&PersistenceMode::InMemory).unwrap(), catalog)
}

/// Rewrites the node rows so the deepest nodes come back first.
fn reverse_node_rows(persistor: &Persistor) {
    let connection = persistor.connection();
    let rows: Vec<Vec<SqlValue>> = connection
        .prepare(
            "select node_id, catalog_id, hierarchy_name, parent_node_id, node_key, entity_id, node_path, item_order, is_leaf
                from hierarchy_entity_tree_node
                order by node_path desc",
        )
        .unwrap()
        .query_map([], |r| (0..9).map(|i| r.get::<_, SqlValue>(i)).collect())
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    connection.execute("delete from hierarchy_entity_tree_node", []).unwrap();
    for row in rows {
        connection
            .execute(
                "insert into hierarchy_entity_tree_node (node_id, catalog_id, hierarchy_name, parent_node_id, node_key, entity_id, node_path, item_order, is_leaf)
                    values (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params_from_iter(row.iter()),
            )
            .unwrap();
    }
}

fn shape(catalog: &Catalog) -> Vec<(String, bool, Option<uuid::Uuid>)> {
    catalog
        .tree("fs")
        .unwrap()
        .walk()
        .into_iter()
        .map(|(path, node)| {
            let node = node.read();
            (path, node.is_leaf(), node.value().map(|e| e.global_id()))
        })
        .collect()
}

#[test]
fn rows_in_any_order_rebuild_the_same_tree() {
    let (_, mut persistor, catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();
    reverse_node_rows(&persistor);

    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    assert_eq!(shape(&reloaded), shape(&catalog));
    let paths: Vec<String> = shape(&reloaded).into_iter().map(|(p, _, _)| p).collect();
    assert_eq!(
        paths,
        vec!["", "usr", "usr/local", "usr/local/bin", "usr/local/bin/tool", "usr/lib", "etc"]
    );
}

#[test]
fn reloading_keeps_the_root_object() {
    let (session, mut persistor, mut catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();
    let root = catalog.tree("fs").unwrap().root();
    let before = shape(&catalog);

    catalog.tree("fs").unwrap().remove_path("usr").unwrap();
    catalog.tree("fs").unwrap().put_path("tmp", None).unwrap();
    reverse_node_rows(&persistor);
    persistor.load_into(&session, &mut catalog).unwrap();

    assert!(Arc::ptr_eq(&root, &catalog.tree("fs").unwrap().root()));
    assert_eq!(shape(&catalog), before);
    assert!(root.read().child("tmp").is_none());
}

#[test]
fn leaves_refuse_children_after_reload() {
    let (_, mut persistor, catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();
    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    let tree = reloaded.tree("fs").unwrap();
    assert!(tree.find("usr/local/bin/tool").unwrap().read().is_leaf());
    assert!(matches!(
        tree.put_path("usr/local/bin/tool/deeper", None),
        Err(AspectraError::SchemaViolation(_))
    ));
}

#[test]
fn a_second_root_is_corruption_and_changes_nothing() {
    let (session, mut persistor, mut catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();
    persistor
        .connection()
        .execute(
            "insert into hierarchy_entity_tree_node (node_id, catalog_id, hierarchy_name, parent_node_id, node_key, entity_id, node_path, item_order, is_leaf)
                values (?1, ?2, 'fs', null, 'fs', null, '', 0, 0)",
            [uuid::Uuid::new_v4().to_string(), catalog.id().to_string()],
        )
        .unwrap();

    assert!(matches!(
        persistor.load_catalog(&Session::new(), catalog.id()),
        Err(AspectraError::DataCorruption { .. })
    ));
    catalog.tree("fs").unwrap().put_path("scratch", None).unwrap();
    let before = shape(&catalog);
    assert!(persistor.load_into(&session, &mut catalog).is_err());
    assert_eq!(shape(&catalog), before);
}

#[test]
fn a_missing_parent_is_corruption() {
    let (_, mut persistor, catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();
    persistor
        .connection()
        .execute(
            "delete from hierarchy_entity_tree_node where node_path = 'usr/local'",
            [],
        )
        .unwrap();
    assert!(matches!(
        persistor.load_catalog(&Session::new(), catalog.id()),
        Err(AspectraError::DataCorruption { .. })
    ));
}
