use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use aspectra::catalog::{Catalog, Species};
use aspectra::config::Settings;
use aspectra::construct::{Entity, Session};
use aspectra::datatype::Value;
use aspectra::persist::{PersistenceMode, Persistor};
use aspectra::schema::{AspectDef, PropertyDef, PropertyType};

fn setup() -> (TempDir, PersistenceMode) {
    let dir = tempfile::tempdir().unwrap();
    let mode = PersistenceMode::File(dir.path().join("store.db"));
    (dir, mode)
}

#[test]
fn a_sink_catalog_outlives_its_process_state() {
    let (_dir, mode) = setup();
    let (catalog_id, widget_id) = {
        let session = Session::new();
        let item = session.define_aspect_def(
            AspectDef::immutable("item", vec![PropertyDef::new("name", PropertyType::String).unwrap()]).unwrap(),
        );
        let mut catalog = Catalog::new(Species::Sink, None).unwrap();
        let widget = session.create_entity();
        catalog
            .create_aspect_map(item)
            .unwrap()
            .upsert(Arc::clone(&widget), vec![("name".into(), Some("widget".into()))])
            .unwrap();
        let mut persistor = Persistor::open(&mode).unwrap();
        persistor.save_catalog(&catalog).unwrap();
        (catalog.id(), widget.global_id())
    };

    let session = Session::new();
    let persistor = Persistor::open(&mode).unwrap();
    assert_eq!(persistor.list_catalogs().unwrap(), vec![catalog_id]);
    let catalog = persistor.load_catalog(&session, catalog_id).unwrap();
    assert_eq!(catalog.species(), Species::Sink);
    let map = catalog.aspect_map("item").unwrap();
    assert_eq!(map.len(), 1);
    let aspect = map.get(&Entity::with_id(widget_id)).unwrap();
    assert_eq!(aspect.read().read("name").unwrap(), Some(Value::from("widget")));
    assert!(Arc::ptr_eq(map.aspect_def(), &session.aspect_def("item").unwrap()));
}

#[test]
fn settings_file_points_at_the_store() {
    let (dir, _) = setup();
    let db = dir.path().join("configured.db");
    let settings_path = dir.path().join("aspectra.toml");
    fs::write(
        &settings_path,
        format!(
            "log_filter = \"aspectra=debug\"\n\n[database]\nfile = {:?}\n",
            db.to_string_lossy()
        ),
    )
    .unwrap();

    let settings = Settings::load(Some(settings_path.as_path())).unwrap();
    assert_eq!(settings.database, PersistenceMode::File(db.clone()));
    assert_eq!(settings.log_filter, "aspectra=debug");
    let mut persistor = settings.open_persistor().unwrap();
    persistor.save_catalog(&Catalog::new(Species::Source, None).unwrap()).unwrap();
    assert!(db.exists());
}

#[test]
fn a_named_settings_file_must_exist() {
    let (dir, _) = setup();
    assert!(Settings::load(Some(dir.path().join("absent.toml").as_path())).is_err());
}

#[test]
fn dropped_tables_are_recreated_by_bootstrap() {
    let (_dir, mode) = setup();
    let mut persistor = Persistor::open(&mode).unwrap();
    let catalog = Catalog::new(Species::Source, None).unwrap();
    persistor.save_catalog(&catalog).unwrap();

    persistor.truncate_all().unwrap();
    assert!(persistor.list_catalogs().unwrap().is_empty());
    persistor.save_catalog(&catalog).unwrap();

    persistor.drop_all().unwrap();
    assert!(persistor.list_catalogs().is_err());
    persistor.bootstrap().unwrap();
    assert!(persistor.list_catalogs().unwrap().is_empty());
}
