use std::sync::Arc;

use uuid::Uuid;

use aspectra::AspectraError;
use aspectra::catalog::{Catalog, Species};
use aspectra::construct::Session;
use aspectra::persist::{PersistenceMode, Persistor};
use aspectra::schema::{AspectDef, Mutability, PropertyDef, PropertyType};

fn properties() -> Vec<PropertyDef> {
    vec![
        PropertyDef::new("title", PropertyType::String).unwrap(),
        PropertyDef::builder("pages", PropertyType::Integer)
            .nullable(false)
            .default_value(1)
            .build()
            .unwrap(),
        PropertyDef::builder("tags", PropertyType::Text)
            .multivalued(true)
            .build()
            .unwrap(),
    ]
}

#[test]
fn declaration_order_does_not_change_the_hash() {
    let forward = AspectDef::immutable("book", properties()).unwrap();
    let mut reversed = properties();
    reversed.reverse();
    let backward = AspectDef::immutable("book", reversed).unwrap();
    assert_eq!(forward.hash(), backward.hash());
    assert!(forward.matches(&backward));
}

#[test]
fn adding_then_removing_restores_the_hash() {
    let def = AspectDef::mutable("book", properties()).unwrap();
    let before = def.hash();
    def.add_property(PropertyDef::new("isbn", PropertyType::String).unwrap()).unwrap();
    assert_ne!(def.hash(), before);
    def.remove_property("isbn").unwrap();
    assert_eq!(def.hash(), before);
}

#[test]
fn flags_count_and_defaults_do_not() {
    let plain = AspectDef::immutable("n", vec![PropertyDef::new("x", PropertyType::Integer).unwrap()]).unwrap();
    let defaulted = AspectDef::immutable(
        "n",
        vec![PropertyDef::builder("x", PropertyType::Integer).default_value(5).build().unwrap()],
    )
    .unwrap();
    let multivalued = AspectDef::immutable(
        "n",
        vec![PropertyDef::builder("x", PropertyType::Integer).multivalued(true).build().unwrap()],
    )
    .unwrap();
    assert_eq!(plain.hash(), defaulted.hash());
    assert_ne!(plain.hash(), multivalued.hash());
}

#[test]
fn immutable_defs_refuse_changes() {
    let def = AspectDef::immutable("book", properties()).unwrap();
    assert!(matches!(
        def.add_property(PropertyDef::new("isbn", PropertyType::String).unwrap()),
        Err(AspectraError::SchemaViolation(_))
    ));
    assert!(def.remove_property("title").is_err());
}

#[test]
fn stored_defs_come_back_with_hash_and_flags() {
    let session = Session::new();
    let def = session.define_aspect_def(
        AspectDef::new("book", properties(), Mutability::AddOnly)
            .unwrap()
            .with_access(true, false),
    );
    let mut catalog = Catalog::new(Species::Source, None).unwrap();
    catalog.create_aspect_map(Arc::clone(&def)).unwrap();
    let mut persistor = Persistor::open(&PersistenceMode::InMemory).unwrap();
    persistor.save_catalog(&catalog).unwrap();

    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
    let loaded = reloaded.aspect_def("book").unwrap();
    assert_eq!(loaded.id(), def.id());
    assert_eq!(loaded.hash(), def.hash());
    assert_eq!(loaded.mutability(), Mutability::AddOnly);
    assert!(loaded.is_readable() && !loaded.is_writable());
    let names: Vec<String> = loaded.properties().iter().map(|p| p.name().to_owned()).collect();
    assert_eq!(names, vec!["title", "pages", "tags"]);
    let pages = loaded.property("pages").unwrap();
    assert!(!pages.is_nullable());
    assert_eq!(pages.default_value(), Some(&1.into()));
    assert!(loaded.property("tags").unwrap().is_multivalued());
}

#[test]
fn species_decides_whether_an_upstream_is_required() {
    let upstream = Some(Uuid::new_v4());
    for species in [Species::Source, Species::Sink] {
        assert!(Catalog::new(species, None).is_ok());
        assert!(matches!(
            Catalog::new(species, upstream),
            Err(AspectraError::IdentityConflict(_))
        ));
    }
    for species in [Species::Mirror, Species::Fork, Species::Cache, Species::Clone] {
        assert!(Catalog::new(species, upstream).is_ok());
        assert!(matches!(
            Catalog::new(species, None),
            Err(AspectraError::IdentityConflict(_))
        ));
    }
}

#[test]
fn species_and_upstream_survive_storage() {
    let mut persistor = Persistor::open(&PersistenceMode::InMemory).unwrap();
    let source = Catalog::new(Species::Source, None).unwrap();
    let fork = Catalog::new(Species::Fork, Some(source.id())).unwrap();
    persistor.save_catalog(&source).unwrap();
    persistor.save_catalog(&fork).unwrap();

    let reloaded = persistor.load_catalog(&Session::new(), fork.id()).unwrap();
    assert_eq!(reloaded.species(), Species::Fork);
    assert_eq!(reloaded.upstream(), Some(source.id()));
    assert_eq!(reloaded.species().to_string(), "FORK");
}

#[test]
fn loading_into_a_catalog_of_another_species_is_refused() {
    let mut persistor = Persistor::open(&PersistenceMode::InMemory).unwrap();
    let source = Catalog::new(Species::Source, None).unwrap();
    persistor.save_catalog(&source).unwrap();

    let mut sink = Catalog::with_id(source.id(), Species::Sink, None).unwrap();
    assert!(matches!(
        persistor.load_into(&Session::new(), &mut sink),
        Err(AspectraError::IdentityConflict(_))
    ));
    assert_eq!(sink.hierarchy_count(), 0);
}
