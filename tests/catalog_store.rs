use std::sync::Arc;

use rusqlite::Connection;
use uuid::Uuid;

use aspectra::AspectraError;
use aspectra::catalog::{Catalog, Species};
use aspectra::construct::Session;
use aspectra::datatype::{Uri, Value};
use aspectra::persist::{PersistenceMode, Persistor};
use aspectra::schema::{AspectDef, PropertyDef, PropertyType};

const TABLES: [&str; 13] = [
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

fn setup() -> (Session, Persistor) {
    (Session::new(), Persistor::open(&PersistenceMode::InMemory).unwrap())
}

fn person(session: &Session) -> Arc<AspectDef> {
    session.define_aspect_def(
        AspectDef::immutable(
            "person",
            vec![
                PropertyDef::new("name", PropertyType::String).unwrap(),
                PropertyDef::builder("nicknames", PropertyType::String)
                    .multivalued(true)
                    .build()
                    .unwrap(),
            ],
        )
        .unwrap(),
    )
}

/// Every row of every core table, rendered and sorted so storage order does not matter.
fn dump(connection: &Connection) -> Vec<String> {
    let mut rows = Vec::new();
    for table in TABLES {
        let mut statement = connection.prepare(&format!("select * from {}", table)).unwrap();
        let width = statement.column_count();
        let mut cursor = statement.query([]).unwrap();
        while let Some(row) = cursor.next().unwrap() {
            let cells: Vec<String> = (0..width)
                .map(|i| format!("{:?}", row.get::<_, rusqlite::types::Value>(i).unwrap()))
                .collect();
            rows.push(format!("{}|{}", table, cells.join("|")));
        }
    }
    rows.sort();
    rows
}

fn populated(session: &Session) -> Catalog {
    let def = person(session);
    let mut catalog = Catalog::new(Species::Source, None)
        .unwrap()
        .with_uri(Uri::parse("urn:catalog:people").unwrap());
    let alice = session.create_entity();
    let bob = session.create_entity();
    catalog
        .create_aspect_map(def)
        .unwrap()
        .upsert_many(vec![
            (
                Arc::clone(&alice),
                vec![
                    ("name".into(), Some("Alice".into())),
                    ("nicknames".into(), Some(Value::Many(vec!["Al".into(), "Ali".into()]))),
                ],
            ),
            (Arc::clone(&bob), vec![("name".into(), None)]),
        ]);
    let list = catalog.create_entity_list("queue").unwrap();
    list.push(Arc::clone(&bob));
    list.push(Arc::clone(&alice));
    list.push(Arc::clone(&bob));
    catalog.create_entity_set("members").unwrap().insert(Arc::clone(&alice));
    catalog
        .create_entity_directory("by_name")
        .unwrap()
        .put("alice", Arc::clone(&alice));
    let tree = catalog.create_entity_tree("org").unwrap();
    tree.put_path("eng/backend", Some(Arc::clone(&alice))).unwrap();
    tree.put_leaf("eng/backend/oncall", Some(bob)).unwrap();
    catalog
}

#[test]
fn saving_twice_changes_nothing() {
    let (session, mut persistor) = setup();
    let catalog = populated(&session);
    persistor.save_catalog(&catalog).unwrap();
    let first = dump(persistor.connection());
    persistor.save_catalog(&catalog).unwrap();
    assert_eq!(dump(persistor.connection()), first);
}

#[test]
fn reloaded_catalog_saves_to_the_same_rows() {
    let (session, mut persistor) = setup();
    let catalog = populated(&session);
    persistor.save_catalog(&catalog).unwrap();
    let first = dump(persistor.connection());

    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    persistor.save_catalog(&reloaded).unwrap();
    assert_eq!(dump(persistor.connection()), first);
}

#[test]
fn catalog_identity_survives_a_round_trip() {
    let (session, mut persistor) = setup();
    let catalog = populated(&session);
    persistor.save_catalog(&catalog).unwrap();

    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    assert_eq!(reloaded.id(), catalog.id());
    assert_eq!(reloaded.species(), Species::Source);
    assert_eq!(reloaded.upstream(), None);
    assert_eq!(reloaded.uri().map(|u| u.as_str()), Some("urn:catalog:people"));
    assert_eq!(reloaded.hierarchy_count(), 5);
    let names: Vec<&str> = reloaded.hierarchies().map(|h| h.name()).collect();
    assert_eq!(names, vec!["person", "queue", "members", "by_name", "org"]);
    for (before, after) in catalog.hierarchies().zip(reloaded.hierarchies()) {
        assert_eq!(before.version(), after.version(), "{}", before.name());
    }
    let queue: Vec<Uuid> = reloaded.list("queue").unwrap().iter().map(|e| e.global_id()).collect();
    let expected: Vec<Uuid> = catalog.list("queue").unwrap().iter().map(|e| e.global_id()).collect();
    assert_eq!(queue, expected);
}

#[test]
fn removed_hierarchies_are_removed_from_storage() {
    let (session, mut persistor) = setup();
    let mut catalog = populated(&session);
    persistor.save_catalog(&catalog).unwrap();

    catalog.remove_hierarchy("members", false).unwrap();
    assert!(matches!(
        catalog.remove_hierarchy("person", false),
        Err(AspectraError::IdentityConflict(_))
    ));
    catalog.remove_hierarchy("person", true).unwrap();
    persistor.save_catalog(&catalog).unwrap();

    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    assert!(reloaded.hierarchy("members").is_none());
    assert!(reloaded.hierarchy("person").is_none());
    let values: i64 = persistor
        .connection()
        .query_row("select count(*) from property_value", [], |r| r.get(0))
        .unwrap();
    assert_eq!(values, 0);
}

#[test]
fn new_hierarchies_get_increasing_versions() {
    let (session, mut persistor) = setup();
    let catalog = populated(&session);
    persistor.save_catalog(&catalog).unwrap();

    let mut reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    let highest = reloaded.hierarchies().map(|h| h.version()).max().unwrap();
    reloaded.create_entity_list("later").unwrap();
    assert!(reloaded.hierarchy("later").unwrap().version() > highest);
}

#[test]
fn catalogs_are_listed_checked_and_deleted() {
    let (session, mut persistor) = setup();
    let first = populated(&session);
    let second = Catalog::new(Species::Sink, None).unwrap();
    persistor.save_catalog(&first).unwrap();
    persistor.save_catalog(&second).unwrap();

    assert_eq!(persistor.list_catalogs().unwrap(), vec![first.id(), second.id()]);
    assert!(persistor.catalog_exists(first.id()).unwrap());

    persistor.delete_catalog(first.id()).unwrap();
    assert!(!persistor.catalog_exists(first.id()).unwrap());
    assert_eq!(persistor.list_catalogs().unwrap(), vec![second.id()]);
    for table in ["hierarchy", "hierarchy_entity_tree_node", "property_value", "catalog_aspect_def"] {
        let rows: i64 = persistor
            .connection()
            .query_row(
                &format!("select count(*) from {} where catalog_id = ?1", table),
                [first.id().to_string()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 0, "{} still holds rows", table);
    }

    assert!(matches!(
        persistor.delete_catalog(first.id()),
        Err(AspectraError::NotFound { .. })
    ));
    assert!(matches!(
        persistor.load_catalog(&session, first.id()),
        Err(AspectraError::NotFound { .. })
    ));
}

#[test]
fn create_catalog_builds_and_saves_aspect_maps() {
    let (session, mut persistor) = setup();
    let def = Arc::new(AspectDef::immutable("tag", vec![PropertyDef::new("label", PropertyType::Text).unwrap()]).unwrap());
    let catalog = persistor
        .create_catalog(&session, Species::Source, None, None, vec![def])
        .unwrap();
    assert!(catalog.aspect_map("tag").unwrap().is_empty());
    assert!(session.aspect_def("tag").is_ok());

    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    let map = reloaded.aspect_map("tag").unwrap();
    assert!(map.is_empty());
    assert!(map.aspect_def().has_property("label"));
}

#[test]
fn aspect_defs_are_shared_between_catalogs_by_name() {
    let (session, mut persistor) = setup();
    let def = person(&session);
    let mut first = Catalog::new(Species::Source, None).unwrap();
    first.create_aspect_map(Arc::clone(&def)).unwrap();
    let mut second = Catalog::new(Species::Source, None).unwrap();
    second.create_aspect_map(Arc::clone(&def)).unwrap();
    persistor.save_catalog(&first).unwrap();
    persistor.save_catalog(&second).unwrap();

    let stored: i64 = persistor
        .connection()
        .query_row("select count(*) from aspect_def where name = 'person'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(stored, 1);

    let fresh = Session::new();
    let a = persistor.load_catalog(&fresh, first.id()).unwrap();
    let b = persistor.load_catalog(&fresh, second.id()).unwrap();
    assert!(Arc::ptr_eq(
        a.aspect_map("person").unwrap().aspect_def(),
        b.aspect_map("person").unwrap().aspect_def()
    ));
}

fn item(properties: Vec<PropertyDef>) -> Arc<AspectDef> {
    Arc::new(AspectDef::immutable("item", properties).unwrap())
}

#[test]
fn another_catalog_cannot_rewrite_a_shared_aspect_def() {
    let (session, mut persistor) = setup();
    let mut first = Catalog::new(Species::Source, None).unwrap();
    let widget = session.create_entity();
    first
        .create_aspect_map(item(vec![PropertyDef::new("name", PropertyType::String).unwrap()]))
        .unwrap()
        .upsert(Arc::clone(&widget), vec![("name".into(), Some("widget".into()))])
        .unwrap();
    persistor.save_catalog(&first).unwrap();

    let mut second = Catalog::new(Species::Source, None).unwrap();
    second
        .create_aspect_map(item(vec![PropertyDef::new("sku", PropertyType::Integer).unwrap()]))
        .unwrap();
    assert!(matches!(
        persistor.save_catalog(&second),
        Err(AspectraError::IdentityConflict(_))
    ));
    assert!(!persistor.catalog_exists(second.id()).unwrap());

    let reloaded = persistor.load_catalog(&Session::new(), first.id()).unwrap();
    let map = reloaded.aspect_map("item").unwrap();
    assert!(map.aspect_def().property("sku").is_none());
    let aspect = map.get(&widget).unwrap();
    assert_eq!(aspect.read().read("name").unwrap(), Some(Value::from("widget")));
}

#[test]
fn a_shared_aspect_def_may_only_grow() {
    let (session, mut persistor) = setup();
    let mut first = Catalog::new(Species::Source, None).unwrap();
    let widget = session.create_entity();
    first
        .create_aspect_map(item(vec![PropertyDef::new("name", PropertyType::String).unwrap()]))
        .unwrap()
        .upsert(Arc::clone(&widget), vec![("name".into(), Some("widget".into()))])
        .unwrap();
    persistor.save_catalog(&first).unwrap();

    let mut retyped = Catalog::new(Species::Source, None).unwrap();
    retyped
        .create_aspect_map(item(vec![PropertyDef::new("name", PropertyType::Integer).unwrap()]))
        .unwrap();
    assert!(matches!(
        persistor.save_catalog(&retyped),
        Err(AspectraError::IdentityConflict(_))
    ));

    let mut wider = Catalog::new(Species::Source, None).unwrap();
    wider
        .create_aspect_map(item(vec![
            PropertyDef::new("name", PropertyType::String).unwrap(),
            PropertyDef::new("sku", PropertyType::Integer).unwrap(),
        ]))
        .unwrap();
    persistor.save_catalog(&wider).unwrap();

    let reloaded = persistor.load_catalog(&Session::new(), first.id()).unwrap();
    let map = reloaded.aspect_map("item").unwrap();
    assert!(map.aspect_def().property("sku").is_some());
    let aspect = map.get(&widget).unwrap();
    assert_eq!(aspect.read().read("name").unwrap(), Some(Value::from("widget")));
    assert_eq!(aspect.read().read("sku").unwrap(), None);
}

#[test]
fn only_removable_defs_drop_stored_properties() {
    let (_, mut persistor) = setup();
    let mut catalog = Catalog::new(Species::Source, None).unwrap();
    let def = Arc::new(
        AspectDef::mutable(
            "note",
            vec![
                PropertyDef::new("title", PropertyType::String).unwrap(),
                PropertyDef::new("body", PropertyType::Text).unwrap(),
            ],
        )
        .unwrap(),
    );
    catalog.create_aspect_map(Arc::clone(&def)).unwrap();
    persistor.save_catalog(&catalog).unwrap();

    def.remove_property("body").unwrap();
    persistor.save_catalog(&catalog).unwrap();
    let count = |persistor: &Persistor| -> i64 {
        persistor
            .connection()
            .query_row("select count(*) from property_def", [], |r| r.get(0))
            .unwrap()
    };
    assert_eq!(count(&persistor), 1);

    let mut frozen = Catalog::with_id(catalog.id(), Species::Source, None).unwrap();
    frozen
        .create_aspect_map(Arc::new(AspectDef::immutable("note", vec![]).unwrap()))
        .unwrap();
    assert!(matches!(
        persistor.save_catalog(&frozen),
        Err(AspectraError::IdentityConflict(_))
    ));
    assert_eq!(count(&persistor), 1);
}
