use std::sync::Arc;

use aspectra::catalog::{Catalog, Species};
use aspectra::construct::Session;
use aspectra::persist::{PersistenceMode, Persistor};
use aspectra::schema::{AspectDef, PropertyDef, PropertyType};

fn setup() -> (Session, Persistor, Catalog) {
    let session = Session::new();
    let def = session.define_aspect_def(
        AspectDef::immutable("badge", vec![PropertyDef::new("number", PropertyType::Integer).unwrap()]).unwrap(),
    );
    let mut catalog = Catalog::new(Species::Source, None).unwrap();
    let shared = session.create_entity();
    catalog
        .create_aspect_map(def)
        .unwrap()
        .upsert(Arc::clone(&shared), vec![("number".into(), Some(7.into()))])
        .unwrap();
    catalog.create_entity_list("line").unwrap().push(Arc::clone(&shared));
    catalog.create_entity_set("crew").unwrap().insert(Arc::clone(&shared));
    catalog
        .create_entity_directory("roster")
        .unwrap()
        .put("lead", Arc::clone(&shared));
    catalog
        .create_entity_tree("chart")
        .unwrap()
        .put_path("top/lead", Some(shared))
        .unwrap();
    (session, Persistor::open(&PersistenceMode::InMemory).unwrap(), catalog)
}

#[test]
fn one_entity_is_one_object_after_load() {
    let (_, mut persistor, catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();

    let session = Session::new();
    let reloaded = persistor.load_catalog(&session, catalog.id()).unwrap();
    let from_list = Arc::clone(reloaded.list("line").unwrap().get(0).unwrap());
    let from_set = Arc::clone(reloaded.set("crew").unwrap().iter().next().unwrap());
    let from_directory = Arc::clone(reloaded.directory("roster").unwrap().get("lead").unwrap());
    let from_tree = reloaded
        .tree("chart")
        .unwrap()
        .find("top/lead")
        .unwrap()
        .read()
        .value()
        .cloned()
        .unwrap();
    let from_map = reloaded.aspect_map("badge").unwrap().entities()[0].clone();

    assert!(Arc::ptr_eq(&from_list, &from_set));
    assert!(Arc::ptr_eq(&from_list, &from_directory));
    assert!(Arc::ptr_eq(&from_list, &from_tree));
    assert!(Arc::ptr_eq(&from_list, &from_map));
    assert!(Arc::ptr_eq(&from_list, &session.entity(&from_list.global_id()).unwrap()));
}

#[test]
fn sessions_do_not_share_entities() {
    let (_, mut persistor, catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();

    let first = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    let second = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    let a = first.list("line").unwrap().get(0).unwrap();
    let b = second.list("line").unwrap().get(0).unwrap();
    assert_eq!(a, b);
    assert!(!Arc::ptr_eq(a, b));
}

#[test]
fn loading_reuses_entities_the_session_already_holds() {
    let (session, mut persistor, catalog) = setup();
    persistor.save_catalog(&catalog).unwrap();

    let original = Arc::clone(catalog.list("line").unwrap().get(0).unwrap());
    let reloaded = persistor.load_catalog(&session, catalog.id()).unwrap();
    assert!(Arc::ptr_eq(&original, reloaded.list("line").unwrap().get(0).unwrap()));
}

#[test]
fn keepers_hand_out_one_arc_per_id() {
    let session = Session::new();
    let created = session.create_entity();
    let again = session.get_or_register_new_entity(created.global_id());
    assert!(Arc::ptr_eq(&created, &again));
    assert_eq!(session.entity_keeper().lock().len(), 1);
}
