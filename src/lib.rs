//! Aspectra – a catalog engine for entity-centric data.
//!
//! Aspectra stores *aspects*: typed property bags attached to bare identities.
//! * An [`construct::Entity`] is an opaque identity (a UUID) and nothing else.
//! * An [`schema::AspectDef`] declares a named set of typed [`schema::PropertyDef`]s.
//! * An [`aspect::Aspect`] binds one aspect definition to one entity and holds its values.
//! * A [`hierarchy::Hierarchy`] is a named collection inside a catalog: an entity
//!   list, set, directory or tree, or an aspect map from entities to aspects.
//! * A [`catalog::Catalog`] owns hierarchies and the aspect definitions they use,
//!   and records where it came from (its species and upstream catalog).
//!
//! Identities and aspect definitions are deduplicated by "keeper" structures
//! inside a [`construct::Session`], so every occurrence of one UUID resolves to
//! one shared `Arc` no matter how many hierarchies reference it.
//!
//! ## Modules
//! * [`construct`] – Entities, keepers and the session.
//! * [`schema`] – Property types, property and aspect definitions, structural hashing.
//! * [`datatype`] – The twelve-variant [`datatype::PropertyValue`] and type coercion.
//! * [`codec`] – Persisted text forms of values and the type codes.
//! * [`aspect`] – Aspects and the per-entity aspect cache.
//! * [`hierarchy`] – The five hierarchy kinds.
//! * [`catalog`] – Catalogs and species.
//! * [`persist`] – SQLite persistence, EAV by default or custom mapped tables.
//! * [`config`] – Layered settings for the binary and embedders.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use aspectra::catalog::{Catalog, Species};
//! use aspectra::construct::Session;
//! use aspectra::persist::{PersistenceMode, Persistor};
//! use aspectra::schema::{AspectDef, PropertyDef, PropertyType};
//!
//! let session = Session::new();
//! let item = session.define_aspect_def(
//!     AspectDef::immutable("item", vec![PropertyDef::new("name", PropertyType::String).unwrap()]).unwrap(),
//! );
//! let mut catalog = Catalog::new(Species::Sink, None).unwrap();
//! let widget = session.create_entity();
//! catalog
//!     .create_aspect_map(Arc::clone(&item))
//!     .unwrap()
//!     .upsert(Arc::clone(&widget), vec![("name".into(), Some("widget".into()))])
//!     .unwrap();
//!
//! let mut persistor = Persistor::open(&PersistenceMode::InMemory).unwrap();
//! persistor.save_catalog(&catalog).unwrap();
//! let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();
//! assert_eq!(reloaded.aspect_map("item").unwrap().len(), 1);
//! ```

pub mod aspect;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod hierarchy;
pub mod persist;
pub mod schema;

pub use error::{AspectraError, Result};
