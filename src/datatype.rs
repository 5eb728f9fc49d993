// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};

// used for timestamps
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
// used for arbitrary precision numbers
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use uuid::Uuid;

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::{AspectraError, Result};
use crate::schema::PropertyType;

lazy_static! {
    // scheme ":" followed by anything without whitespace
    static ref URI: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:\S*$").unwrap();
}

// ------------- Uri -------------
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri(String);

impl Uri {
    pub fn parse(s: &str) -> Result<Uri> {
        if URI.is_match(s) {
            Ok(Uri(s.to_owned()))
        } else {
            Err(AspectraError::SchemaViolation(format!("'{}' is not a URI", s)))
        }
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    pub fn scheme(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }
}
impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl FromStr for Uri {
    type Err = AspectraError;
    fn from_str(s: &str) -> Result<Uri> {
        Uri::parse(s)
    }
}

// ------------- Moment -------------
/// The temporal inputs a DateTime property accepts; all normalize to a UTC instant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Moment {
    /// A wall-clock timestamp without zone, taken as UTC.
    Timestamp(NaiveDateTime),
    /// A calendar date, taken as midnight UTC.
    Date(NaiveDate),
    Instant(DateTime<Utc>),
    Zoned(DateTime<FixedOffset>),
}

impl Moment {
    pub fn normalize(&self) -> DateTime<Utc> {
        match self {
            Moment::Timestamp(t) => t.and_utc(),
            Moment::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
            Moment::Instant(i) => *i,
            Moment::Zoned(z) => z.with_timezone(&Utc),
        }
    }
    /// Accepts RFC 3339, `YYYY-MM-DD[T ]HH:MM:SS[.f]` and `YYYY-MM-DD`.
    pub fn parse(s: &str) -> Option<Moment> {
        let s = s.trim();
        if let Some(zoned) = parse_zoned(s) {
            return Some(Moment::Zoned(zoned));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
                return Some(Moment::Timestamp(t));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Moment::Date)
    }
}

/// RFC 3339, plus the signed years (`+11476-…`, `-0050-…`) RFC 3339 cannot express.
pub fn parse_zoned(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(zoned) = DateTime::parse_from_rfc3339(s) {
        return Some(zoned);
    }
    let offset = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(rest) => format!("{}+00:00", rest),
        None => s.to_owned(),
    };
    DateTime::parse_from_str(&offset, "%Y-%m-%dT%H:%M:%S%.f%:z").ok()
}

// ------------- PropertyValue -------------
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Text(String),
    BigInteger(BigInt),
    BigDecimal(BigDecimal),
    DateTime(DateTime<Utc>),
    Uri(Uri),
    Uuid(Uuid),
    Clob(String),
    Blob(Vec<u8>),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Integer(_) => PropertyType::Integer,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Boolean(_) => PropertyType::Boolean,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Text(_) => PropertyType::Text,
            PropertyValue::BigInteger(_) => PropertyType::BigInteger,
            PropertyValue::BigDecimal(_) => PropertyType::BigDecimal,
            PropertyValue::DateTime(_) => PropertyType::DateTime,
            PropertyValue::Uri(_) => PropertyType::Uri,
            PropertyValue::Uuid(_) => PropertyType::Uuid,
            PropertyValue::Clob(_) => PropertyType::Clob,
            PropertyValue::Blob(_) => PropertyType::Blob,
        }
    }
    /// Borrowed text of the character-like variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Text(s) | PropertyValue::Clob(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PropertyValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
            other => match crate::codec::encode(other) {
                crate::codec::Encoded::Text(text) => write!(f, "{}", text),
                crate::codec::Encoded::Binary(_) => write!(f, "<binary>"),
            },
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}
impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Integer(v as i64)
    }
}
impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}
impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Boolean(v)
    }
}
impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_owned())
    }
}
impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}
impl From<BigInt> for PropertyValue {
    fn from(v: BigInt) -> Self {
        PropertyValue::BigInteger(v)
    }
}
impl From<BigDecimal> for PropertyValue {
    fn from(v: BigDecimal) -> Self {
        PropertyValue::BigDecimal(v)
    }
}
impl From<Moment> for PropertyValue {
    fn from(v: Moment) -> Self {
        PropertyValue::DateTime(v.normalize())
    }
}
impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        Moment::Instant(v).into()
    }
}
impl From<DateTime<FixedOffset>> for PropertyValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Moment::Zoned(v).into()
    }
}
impl From<NaiveDateTime> for PropertyValue {
    fn from(v: NaiveDateTime) -> Self {
        Moment::Timestamp(v).into()
    }
}
impl From<NaiveDate> for PropertyValue {
    fn from(v: NaiveDate) -> Self {
        Moment::Date(v).into()
    }
}
impl From<Uri> for PropertyValue {
    fn from(v: Uri) -> Self {
        PropertyValue::Uri(v)
    }
}
impl From<Uuid> for PropertyValue {
    fn from(v: Uuid) -> Self {
        PropertyValue::Uuid(v)
    }
}
impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        PropertyValue::Blob(v)
    }
}

// ------------- Value -------------
/// A non-null property slot: one scalar, or an ordered list for multivalued properties.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    One(PropertyValue),
    Many(Vec<PropertyValue>),
}

impl Value {
    pub fn one(&self) -> Option<&PropertyValue> {
        match self {
            Value::One(v) => Some(v),
            Value::Many(_) => None,
        }
    }
    pub fn many(&self) -> Option<&[PropertyValue]> {
        match self {
            Value::Many(v) => Some(v),
            Value::One(_) => None,
        }
    }
}

macro_rules! scalar_into_value {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::One(v.into())
                }
            }
        )+
    };
}
scalar_into_value!(
    PropertyValue, i64, i32, f64, bool, &str, String, BigInt, BigDecimal, Moment,
    DateTime<Utc>, DateTime<FixedOffset>, NaiveDateTime, NaiveDate, Uri, Uuid, Vec<u8>
);
impl From<Vec<PropertyValue>> for Value {
    fn from(v: Vec<PropertyValue>) -> Self {
        Value::Many(v)
    }
}

// ------------- Coercion -------------
fn violation(target: PropertyType, value: &PropertyValue) -> AspectraError {
    AspectraError::SchemaViolation(format!(
        "cannot coerce {} value '{}' to {}",
        value.property_type(),
        value,
        target
    ))
}

/// Converts `value` into the canonical representation of `target`.
pub fn coerce_scalar(target: PropertyType, value: PropertyValue) -> Result<PropertyValue> {
    if value.property_type() == target {
        return Ok(value);
    }
    let coerced = match (target, &value) {
        (PropertyType::Integer, PropertyValue::Float(f)) if f.fract() == 0.0 => f
            .to_i64()
            .map(PropertyValue::Integer),
        (PropertyType::Integer, PropertyValue::BigInteger(b)) => b.to_i64().map(PropertyValue::Integer),
        (PropertyType::Integer, PropertyValue::BigDecimal(d)) if d.is_integer() => {
            d.to_i64().map(PropertyValue::Integer)
        }
        (PropertyType::Float, PropertyValue::Integer(i)) => Some(PropertyValue::Float(*i as f64)),
        (PropertyType::Float, PropertyValue::BigInteger(b)) => b.to_f64().map(PropertyValue::Float),
        (PropertyType::Float, PropertyValue::BigDecimal(d)) => d.to_f64().map(PropertyValue::Float),
        (PropertyType::BigInteger, PropertyValue::Integer(i)) => {
            Some(PropertyValue::BigInteger(BigInt::from(*i)))
        }
        (PropertyType::BigInteger, PropertyValue::BigDecimal(d)) if d.is_integer() => {
            let (digits, scale) = d.with_scale(0).into_bigint_and_exponent();
            debug_assert_eq!(scale, 0);
            Some(PropertyValue::BigInteger(digits))
        }
        (PropertyType::BigDecimal, PropertyValue::Integer(i)) => {
            Some(PropertyValue::BigDecimal(BigDecimal::from(*i)))
        }
        (PropertyType::BigDecimal, PropertyValue::Float(f)) => {
            BigDecimal::from_f64(*f).map(PropertyValue::BigDecimal)
        }
        (PropertyType::BigDecimal, PropertyValue::BigInteger(b)) => {
            Some(PropertyValue::BigDecimal(BigDecimal::new(b.clone(), 0)))
        }
        (PropertyType::DateTime, PropertyValue::Integer(millis)) => {
            DateTime::<Utc>::from_timestamp_millis(*millis).map(PropertyValue::DateTime)
        }
        (t, PropertyValue::String(_) | PropertyValue::Text(_) | PropertyValue::Clob(_)) if t.is_textual() => {
            value.as_str().map(|s| textual(t, s.to_owned()))
        }
        (t, PropertyValue::Blob(_)) if t.is_textual() => None,
        (t, _) if t.is_textual() => Some(textual(t, value.to_string())),
        (t, PropertyValue::String(s) | PropertyValue::Text(s) | PropertyValue::Clob(s)) => {
            return parse_scalar(t, s).map_err(|_| violation(target, &value));
        }
        _ => None,
    };
    coerced.ok_or_else(|| violation(target, &value))
}

fn textual(target: PropertyType, s: String) -> PropertyValue {
    match target {
        PropertyType::Text => PropertyValue::Text(s),
        PropertyType::Clob => PropertyValue::Clob(s),
        _ => PropertyValue::String(s),
    }
}

/// Parses text into a value of `target`, accepting the lenient input forms
/// (any supported temporal layout, either boolean case).
pub fn parse_scalar(target: PropertyType, s: &str) -> Result<PropertyValue> {
    let bad = || AspectraError::SchemaViolation(format!("cannot parse '{}' as {}", s, target));
    let parsed = match target {
        PropertyType::Integer => PropertyValue::Integer(s.trim().parse().map_err(|_| bad())?),
        PropertyType::Float => PropertyValue::Float(s.trim().parse().map_err(|_| bad())?),
        PropertyType::Boolean => match s.trim().to_ascii_lowercase().as_str() {
            "true" => PropertyValue::Boolean(true),
            "false" => PropertyValue::Boolean(false),
            _ => return Err(bad()),
        },
        PropertyType::String | PropertyType::Text | PropertyType::Clob => textual(target, s.to_owned()),
        PropertyType::BigInteger => PropertyValue::BigInteger(BigInt::from_str(s.trim()).map_err(|_| bad())?),
        PropertyType::BigDecimal => {
            PropertyValue::BigDecimal(BigDecimal::from_str(s.trim()).map_err(|_| bad())?)
        }
        PropertyType::DateTime => Moment::parse(s).ok_or_else(bad)?.into(),
        PropertyType::Uri => PropertyValue::Uri(Uri::parse(s.trim())?),
        PropertyType::Uuid => PropertyValue::Uuid(Uuid::parse_str(s.trim()).map_err(|_| bad())?),
        PropertyType::Blob => return Err(bad()),
    };
    Ok(parsed)
}

// ------------- SQL glue -------------
// Native column binding, used by custom table mappings.
impl ToSql for PropertyValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            PropertyValue::Integer(i) => ToSqlOutput::from(*i),
            PropertyValue::Float(f) => ToSqlOutput::from(*f),
            PropertyValue::Boolean(b) => ToSqlOutput::from(*b),
            PropertyValue::String(s) | PropertyValue::Text(s) | PropertyValue::Clob(s) => {
                ToSqlOutput::from(s.as_str())
            }
            PropertyValue::Blob(b) => ToSqlOutput::from(b.as_slice()),
            other => match crate::codec::encode(other) {
                crate::codec::Encoded::Text(text) => ToSqlOutput::Owned(SqlValue::Text(text)),
                crate::codec::Encoded::Binary(bytes) => ToSqlOutput::Owned(SqlValue::Blob(bytes)),
            },
        })
    }
}

/// Reads a natively bound column back into `target`; SQL null is `None`.
pub fn from_sql_ref(target: PropertyType, value: ValueRef<'_>) -> Result<Option<PropertyValue>> {
    let mismatch = || AspectraError::corruption(format!("column value {:?} does not hold a {}", value, target));
    let decoded = match (target, value) {
        (_, ValueRef::Null) => return Ok(None),
        (PropertyType::Integer, ValueRef::Integer(i)) => PropertyValue::Integer(i),
        (PropertyType::Float, ValueRef::Real(f)) => PropertyValue::Float(f),
        (PropertyType::Float, ValueRef::Integer(i)) => PropertyValue::Float(i as f64),
        (PropertyType::Boolean, ValueRef::Integer(i)) => PropertyValue::Boolean(i != 0),
        (PropertyType::Blob, ValueRef::Blob(b)) => PropertyValue::Blob(b.to_vec()),
        (t, ValueRef::Text(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|_| mismatch())?;
            return crate::codec::decode_text(t, text).map(Some);
        }
        _ => return Err(mismatch()),
    };
    Ok(Some(decoded))
}
