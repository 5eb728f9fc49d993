//! Schema model: property declarations and the aspect definitions that group them.
//!
//! An [`AspectDef`] is shared (`Arc`) by every aspect and aspect map built on it.
//! Its structural hash is computed order-independently from the per-property
//! digests, so two definitions declaring the same properties in a different
//! order are interchangeable.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::datatype::{coerce_scalar, PropertyValue, Value};
use crate::error::{AspectraError, Result};

// ------------- PropertyType -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyType {
    Integer,
    Float,
    Boolean,
    String,
    Text,
    BigInteger,
    BigDecimal,
    DateTime,
    Uri,
    Uuid,
    Clob,
    Blob,
}

impl PropertyType {
    pub const ALL: [PropertyType; 12] = [
        PropertyType::Integer,
        PropertyType::Float,
        PropertyType::Boolean,
        PropertyType::String,
        PropertyType::Text,
        PropertyType::BigInteger,
        PropertyType::BigDecimal,
        PropertyType::DateTime,
        PropertyType::Uri,
        PropertyType::Uuid,
        PropertyType::Clob,
        PropertyType::Blob,
    ];
    /// Character-like types, all held as a Rust `String`.
    pub fn is_textual(&self) -> bool {
        matches!(self, PropertyType::String | PropertyType::Text | PropertyType::Clob)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ------------- PropertyDef -------------
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDef {
    name: String,
    property_type: PropertyType,
    readable: bool,
    writable: bool,
    nullable: bool,
    removable: bool,
    multivalued: bool,
    has_default_value: bool,
    default_value: Option<PropertyValue>,
}

impl PropertyDef {
    /// A readable, writable, nullable, removable, single-valued property without a default.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Result<Self> {
        PropertyDefBuilder::new(name, property_type).build()
    }
    pub fn builder(name: impl Into<String>, property_type: PropertyType) -> PropertyDefBuilder {
        PropertyDefBuilder::new(name, property_type)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }
    pub fn is_readable(&self) -> bool {
        self.readable
    }
    pub fn is_writable(&self) -> bool {
        self.writable
    }
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
    pub fn is_removable(&self) -> bool {
        self.removable
    }
    pub fn is_multivalued(&self) -> bool {
        self.multivalued
    }
    pub fn has_default_value(&self) -> bool {
        self.has_default_value
    }
    pub fn default_value(&self) -> Option<&PropertyValue> {
        self.default_value.as_ref()
    }
    /// The value an unset property reads as.
    pub fn fallback(&self) -> Option<Value> {
        if self.has_default_value {
            self.default_value.clone().map(Value::One)
        } else {
            None
        }
    }

    /// Coerces a candidate value to what this property mandates; `None` is null.
    pub fn coerce(&self, value: Option<Value>) -> Result<Option<Value>> {
        match value {
            None => {
                if self.nullable {
                    Ok(None)
                } else {
                    Err(AspectraError::SchemaViolation(format!(
                        "property '{}' is not nullable",
                        self.name
                    )))
                }
            }
            Some(Value::One(v)) if self.multivalued => {
                Ok(Some(Value::Many(vec![coerce_scalar(self.property_type, v)?])))
            }
            Some(Value::One(v)) => Ok(Some(Value::One(coerce_scalar(self.property_type, v)?))),
            Some(Value::Many(values)) if self.multivalued => {
                let coerced = values
                    .into_iter()
                    .map(|v| coerce_scalar(self.property_type, v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Value::Many(coerced)))
            }
            Some(Value::Many(_)) => Err(AspectraError::SchemaViolation(format!(
                "property '{}' is single-valued but was given a list",
                self.name
            ))),
        }
    }

    /// Stable digest of name, type and flags. Defaults do not take part.
    pub fn digest(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.name.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(crate::codec::property_type_code(self.property_type).as_bytes());
        hasher.update(&[
            self.readable as u8,
            self.writable as u8,
            self.nullable as u8,
            self.removable as u8,
            self.multivalued as u8,
        ]);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}

/// Free-standing form of [`PropertyDef::coerce`], used alike by direct writes,
/// bulk upserts and load paths.
pub fn coerce(property_def: &PropertyDef, value: Option<Value>) -> Result<Option<Value>> {
    property_def.coerce(value)
}

#[derive(Debug)]
pub struct PropertyDefBuilder {
    def: PropertyDef,
}

impl PropertyDefBuilder {
    fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            def: PropertyDef {
                name: name.into(),
                property_type,
                readable: true,
                writable: true,
                nullable: true,
                removable: true,
                multivalued: false,
                has_default_value: false,
                default_value: None,
            },
        }
    }
    pub fn readable(mut self, readable: bool) -> Self {
        self.def.readable = readable;
        self
    }
    pub fn writable(mut self, writable: bool) -> Self {
        self.def.writable = writable;
        self
    }
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.def.nullable = nullable;
        self
    }
    pub fn removable(mut self, removable: bool) -> Self {
        self.def.removable = removable;
        self
    }
    pub fn multivalued(mut self, multivalued: bool) -> Self {
        self.def.multivalued = multivalued;
        self
    }
    pub fn default_value(mut self, value: impl Into<PropertyValue>) -> Self {
        self.def.has_default_value = true;
        self.def.default_value = Some(value.into());
        self
    }
    /// Declares an explicit null default.
    pub fn null_default(mut self) -> Self {
        self.def.has_default_value = true;
        self.def.default_value = None;
        self
    }
    pub fn build(self) -> Result<PropertyDef> {
        let mut def = self.def;
        if def.name.is_empty() {
            return Err(AspectraError::SchemaViolation("property name must not be empty".into()));
        }
        if def.has_default_value {
            if def.multivalued {
                return Err(AspectraError::SchemaViolation(format!(
                    "multivalued property '{}' cannot declare a default",
                    def.name
                )));
            }
            match def.default_value.take() {
                Some(v) => def.default_value = Some(coerce_scalar(def.property_type, v)?),
                None if !def.nullable => {
                    return Err(AspectraError::SchemaViolation(format!(
                        "non-nullable property '{}' cannot default to null",
                        def.name
                    )));
                }
                None => (),
            }
        }
        Ok(def)
    }
}

// ------------- Mutability -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mutability {
    Immutable,
    Mutable,
    AddOnly,
    RemoveOnly,
}

impl Mutability {
    /// Picks the variant matching the stored flag pair exactly.
    pub fn from_flags(can_add_properties: bool, can_remove_properties: bool) -> Self {
        match (can_add_properties, can_remove_properties) {
            (false, false) => Mutability::Immutable,
            (true, true) => Mutability::Mutable,
            (true, false) => Mutability::AddOnly,
            (false, true) => Mutability::RemoveOnly,
        }
    }
    pub fn can_add_properties(&self) -> bool {
        matches!(self, Mutability::Mutable | Mutability::AddOnly)
    }
    pub fn can_remove_properties(&self) -> bool {
        matches!(self, Mutability::Mutable | Mutability::RemoveOnly)
    }
}

// ------------- AspectDef -------------
const UNCOMPUTED: u64 = 0;

#[derive(Debug)]
pub struct AspectDef {
    id: Uuid,
    name: String,
    readable: bool,
    writable: bool,
    mutability: Mutability,
    properties: RwLock<Vec<Arc<PropertyDef>>>,
    hash: AtomicU64,
}

impl AspectDef {
    pub fn new(
        name: impl Into<String>,
        properties: Vec<PropertyDef>,
        mutability: Mutability,
    ) -> Result<Self> {
        Self::with_id(Uuid::new_v4(), name, properties, mutability)
    }
    pub fn with_id(
        id: Uuid,
        name: impl Into<String>,
        properties: Vec<PropertyDef>,
        mutability: Mutability,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(AspectraError::SchemaViolation("aspect def name must not be empty".into()));
        }
        let mut kept: Vec<Arc<PropertyDef>> = Vec::with_capacity(properties.len());
        for property in properties {
            if kept.iter().any(|p| p.name() == property.name()) {
                return Err(AspectraError::SchemaViolation(format!(
                    "aspect def '{}' declares property '{}' twice",
                    name,
                    property.name()
                )));
            }
            kept.push(Arc::new(property));
        }
        Ok(Self {
            id,
            name,
            readable: true,
            writable: true,
            mutability,
            properties: RwLock::new(kept),
            hash: AtomicU64::new(UNCOMPUTED),
        })
    }
    pub fn immutable(name: impl Into<String>, properties: Vec<PropertyDef>) -> Result<Self> {
        Self::new(name, properties, Mutability::Immutable)
    }
    pub fn mutable(name: impl Into<String>, properties: Vec<PropertyDef>) -> Result<Self> {
        Self::new(name, properties, Mutability::Mutable)
    }
    pub fn with_access(mut self, readable: bool, writable: bool) -> Self {
        self.readable = readable;
        self.writable = writable;
        self
    }
    pub fn id(&self) -> Uuid {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_readable(&self) -> bool {
        self.readable
    }
    pub fn is_writable(&self) -> bool {
        self.writable
    }
    pub fn mutability(&self) -> Mutability {
        self.mutability
    }
    pub fn can_add_properties(&self) -> bool {
        self.mutability.can_add_properties()
    }
    pub fn can_remove_properties(&self) -> bool {
        self.mutability.can_remove_properties()
    }
    pub fn property(&self, name: &str) -> Option<Arc<PropertyDef>> {
        self.properties.read().iter().find(|p| p.name() == name).cloned()
    }
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.read().iter().any(|p| p.name() == name)
    }
    /// Snapshot of the properties in declaration order.
    pub fn properties(&self) -> Vec<Arc<PropertyDef>> {
        self.properties.read().clone()
    }
    pub fn len(&self) -> usize {
        self.properties.read().len()
    }
    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }

    pub fn add_property(&self, property: PropertyDef) -> Result<()> {
        if !self.can_add_properties() {
            return Err(AspectraError::SchemaViolation(format!(
                "aspect def '{}' does not allow adding properties",
                self.name
            )));
        }
        let mut properties = self.properties.write();
        if properties.iter().any(|p| p.name() == property.name()) {
            return Err(AspectraError::SchemaViolation(format!(
                "aspect def '{}' already declares property '{}'",
                self.name,
                property.name()
            )));
        }
        properties.push(Arc::new(property));
        self.hash.store(UNCOMPUTED, Ordering::Release);
        Ok(())
    }

    pub fn remove_property(&self, name: &str) -> Result<Arc<PropertyDef>> {
        if !self.can_remove_properties() {
            return Err(AspectraError::SchemaViolation(format!(
                "aspect def '{}' does not allow removing properties",
                self.name
            )));
        }
        let mut properties = self.properties.write();
        let position = properties
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| AspectraError::not_found("property", format!("{}.{}", self.name, name)))?;
        if !properties[position].is_removable() {
            return Err(AspectraError::SchemaViolation(format!(
                "property '{}' of '{}' is not removable",
                name, self.name
            )));
        }
        let removed = properties.remove(position);
        self.hash.store(UNCOMPUTED, Ordering::Release);
        Ok(removed)
    }

    /// Structural hash; computed once and cached until the property set changes.
    pub fn hash(&self) -> u64 {
        let cached = self.hash.load(Ordering::Acquire);
        if cached != UNCOMPUTED {
            return cached;
        }
        // stored under the read guard; resets happen under the write guard
        let properties = self.properties.read();
        let computed = structural_hash(properties.iter().map(|p| p.as_ref()));
        self.hash.store(computed, Ordering::Release);
        computed
    }

    pub fn matches(&self, other: &AspectDef) -> bool {
        self.hash() == other.hash()
    }
}

/// XOR of per-property digests, so declaration order does not matter.
/// Zero is reserved for "uncomputed" and is remapped.
pub fn structural_hash<'a>(properties: impl IntoIterator<Item = &'a PropertyDef>) -> u64 {
    let combined = properties.into_iter().fold(0u64, |acc, p| acc ^ p.digest());
    if combined == UNCOMPUTED { 1 } else { combined }
}

impl fmt::Display for AspectDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let properties = self.properties.read();
        let declared: Vec<String> = properties
            .iter()
            .map(|p| {
                let suffix = if p.is_multivalued() { "[]" } else { "" };
                format!("{}:{}{}", p.name(), p.property_type(), suffix)
            })
            .collect();
        write!(f, "{}{{{}}}", self.name, declared.join(","))
    }
}
