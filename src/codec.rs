//! Value codec: the persisted forms of property values and type tags.
//!
//! Every non-BLOB value is stored in `property_value.value_text` using the
//! canonical encoding below, and [`decode_text`] is its exact inverse. BLOB
//! values travel in `value_binary` untouched.
//!
//! | type       | text form                                  | SQL column |
//! |------------|--------------------------------------------|------------|
//! | Integer    | decimal `i64`                              | INTEGER    |
//! | Float      | shortest round-trip `f64`                  | REAL       |
//! | Boolean    | `true` / `false`                           | INTEGER    |
//! | String     | as is                                      | TEXT       |
//! | Text       | as is                                      | TEXT       |
//! | BigInteger | decimal digits                             | TEXT       |
//! | BigDecimal | `BigDecimal` display form                  | TEXT       |
//! | DateTime   | RFC 3339 in UTC, `Z` suffix, sub-seconds as needed | TEXT |
//! | URI        | as is                                      | TEXT       |
//! | UUID       | hyphenated lowercase                       | TEXT       |
//! | CLOB       | as is                                      | TEXT       |
//! | BLOB       | (binary column)                            | BLOB       |

use std::str::FromStr;

use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use bimap::BiMap;
use chrono::{SecondsFormat, Utc};
use lazy_static::lazy_static;
use uuid::Uuid;

use crate::datatype::{parse_zoned, PropertyValue, Uri};
use crate::error::{AspectraError, Result};
use crate::hierarchy::HierarchyType;
use crate::schema::PropertyType;

lazy_static! {
    static ref PROPERTY_TYPE_CODES: BiMap<PropertyType, &'static str> = {
        let mut codes = BiMap::new();
        codes.insert(PropertyType::Integer, "INT");
        codes.insert(PropertyType::Float, "FLT");
        codes.insert(PropertyType::Boolean, "BLN");
        codes.insert(PropertyType::String, "STR");
        codes.insert(PropertyType::Text, "TXT");
        codes.insert(PropertyType::BigInteger, "BGI");
        codes.insert(PropertyType::BigDecimal, "BGF");
        codes.insert(PropertyType::DateTime, "DAT");
        codes.insert(PropertyType::Uri, "URI");
        codes.insert(PropertyType::Uuid, "UID");
        codes.insert(PropertyType::Clob, "CLB");
        codes.insert(PropertyType::Blob, "BLB");
        codes
    };
    static ref HIERARCHY_TYPE_CODES: BiMap<HierarchyType, &'static str> = {
        let mut codes = BiMap::new();
        codes.insert(HierarchyType::EntityList, "EL");
        codes.insert(HierarchyType::EntitySet, "ES");
        codes.insert(HierarchyType::EntityDirectory, "ED");
        codes.insert(HierarchyType::EntityTree, "ET");
        codes.insert(HierarchyType::AspectMap, "AM");
        codes
    };
}

pub fn property_type_code(property_type: PropertyType) -> &'static str {
    PROPERTY_TYPE_CODES
        .get_by_left(&property_type)
        .copied()
        .unwrap_or("???")
}

pub fn property_type_from_code(code: &str) -> Result<PropertyType> {
    PROPERTY_TYPE_CODES
        .get_by_right(code)
        .copied()
        .ok_or_else(|| AspectraError::corruption(format!("unknown property type code '{}'", code)))
}

pub fn hierarchy_type_code(hierarchy_type: HierarchyType) -> &'static str {
    HIERARCHY_TYPE_CODES
        .get_by_left(&hierarchy_type)
        .copied()
        .unwrap_or("??")
}

pub fn hierarchy_type_from_code(code: &str) -> Result<HierarchyType> {
    HIERARCHY_TYPE_CODES
        .get_by_right(code)
        .copied()
        .ok_or_else(|| AspectraError::corruption(format!("unknown hierarchy type code '{}'", code)))
}

/// Backend column type used for custom table mappings.
pub fn sql_type(property_type: PropertyType) -> &'static str {
    match property_type {
        PropertyType::Integer | PropertyType::Boolean => "integer",
        PropertyType::Float => "real",
        PropertyType::Blob => "blob",
        _ => "text",
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoded {
    Text(String),
    Binary(Vec<u8>),
}

impl Encoded {
    /// Splits into the (value_text, value_binary) column pair.
    pub fn into_columns(self) -> (Option<String>, Option<Vec<u8>>) {
        match self {
            Encoded::Text(text) => (Some(text), None),
            Encoded::Binary(bytes) => (None, Some(bytes)),
        }
    }
}

pub fn encode(value: &PropertyValue) -> Encoded {
    let text = match value {
        PropertyValue::Integer(i) => i.to_string(),
        PropertyValue::Float(f) => f.to_string(),
        PropertyValue::Boolean(b) => b.to_string(),
        PropertyValue::String(s) | PropertyValue::Text(s) | PropertyValue::Clob(s) => s.clone(),
        PropertyValue::BigInteger(b) => b.to_string(),
        PropertyValue::BigDecimal(d) => d.to_string(),
        PropertyValue::DateTime(t) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        PropertyValue::Uri(u) => u.as_str().to_owned(),
        PropertyValue::Uuid(u) => u.hyphenated().to_string(),
        PropertyValue::Blob(b) => return Encoded::Binary(b.clone()),
    };
    Encoded::Text(text)
}

/// Strict inverse of [`encode`] for every non-BLOB type.
pub fn decode_text(property_type: PropertyType, text: &str) -> Result<PropertyValue> {
    let corrupt = || {
        AspectraError::corruption(format!(
            "stored text '{}' is not a valid {}",
            text, property_type
        ))
    };
    let value = match property_type {
        PropertyType::Integer => PropertyValue::Integer(text.parse().map_err(|_| corrupt())?),
        PropertyType::Float => PropertyValue::Float(text.parse().map_err(|_| corrupt())?),
        PropertyType::Boolean => match text {
            "true" => PropertyValue::Boolean(true),
            "false" => PropertyValue::Boolean(false),
            _ => return Err(corrupt()),
        },
        PropertyType::String => PropertyValue::String(text.to_owned()),
        PropertyType::Text => PropertyValue::Text(text.to_owned()),
        PropertyType::Clob => PropertyValue::Clob(text.to_owned()),
        PropertyType::BigInteger => {
            PropertyValue::BigInteger(BigInt::from_str(text).map_err(|_| corrupt())?)
        }
        PropertyType::BigDecimal => {
            PropertyValue::BigDecimal(BigDecimal::from_str(text).map_err(|_| corrupt())?)
        }
        PropertyType::DateTime => PropertyValue::DateTime(
            parse_zoned(text).ok_or_else(|| corrupt())?.with_timezone(&Utc),
        ),
        PropertyType::Uri => PropertyValue::Uri(Uri::parse(text).map_err(|_| corrupt())?),
        PropertyType::Uuid => PropertyValue::Uuid(Uuid::parse_str(text).map_err(|_| corrupt())?),
        PropertyType::Blob => PropertyValue::Blob(hex::decode(text).map_err(|_| corrupt())?),
    };
    Ok(value)
}

/// Decodes an EAV row; both columns null means a null value.
pub fn decode_columns(
    property_type: PropertyType,
    text: Option<&str>,
    binary: Option<&[u8]>,
) -> Result<Option<PropertyValue>> {
    match (property_type, text, binary) {
        (PropertyType::Blob, _, Some(bytes)) => Ok(Some(PropertyValue::Blob(bytes.to_vec()))),
        (_, Some(text), _) => decode_text(property_type, text).map(Some),
        (_, None, None) => Ok(None),
        (_, None, Some(_)) => Err(AspectraError::corruption(format!(
            "binary payload stored for a {} property",
            property_type
        ))),
    }
}

/// Text form for the `property_def.default_value` column; BLOB defaults are hex.
pub fn encode_default(value: &PropertyValue) -> String {
    match encode(value) {
        Encoded::Text(text) => text,
        Encoded::Binary(bytes) => hex::encode(bytes),
    }
}

pub fn decode_default(property_type: PropertyType, text: &str) -> Result<PropertyValue> {
    decode_text(property_type, text)
}
