use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use bigdecimal::num_bigint::BigInt;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use aspectra::catalog::{Catalog, Species};
use aspectra::codec::{self, Encoded};
use aspectra::construct::{Entity, Session};
use aspectra::datatype::{self, PropertyValue, Uri, Value};
use aspectra::persist::{PersistenceMode, Persistor};
use aspectra::schema::{AspectDef, PropertyDef, PropertyType};

fn samples() -> Vec<PropertyValue> {
    vec![
        PropertyValue::Integer(i64::MIN),
        PropertyValue::Integer(42),
        PropertyValue::Float(0.1),
        PropertyValue::Float(-1.5e300),
        PropertyValue::Boolean(true),
        PropertyValue::Boolean(false),
        PropertyValue::String(String::new()),
        PropertyValue::String("plain".into()),
        PropertyValue::Text("multi\nline ✓".into()),
        PropertyValue::BigInteger(BigInt::from_str("-98765432109876543210987654321").unwrap()),
        PropertyValue::BigDecimal(BigDecimal::from_str("123456789012345678901234567890.000123").unwrap()),
        PropertyValue::DateTime(Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap()),
        PropertyValue::DateTime(Utc.with_ymd_and_hms(11476, 8, 15, 5, 20, 0).unwrap()),
        PropertyValue::DateTime(Utc.with_ymd_and_hms(-50, 1, 1, 0, 0, 0).unwrap()),
        PropertyValue::Uri(Uri::parse("https://example.com/a?b=c#d").unwrap()),
        PropertyValue::Uuid(Uuid::new_v4()),
        PropertyValue::Clob("x".repeat(10_000)),
    ]
}

#[test]
fn text_forms_decode_to_the_same_value() {
    for value in samples() {
        let Encoded::Text(text) = codec::encode(&value) else {
            panic!("{} should encode as text", value.property_type());
        };
        let decoded = codec::decode_text(value.property_type(), &text).unwrap();
        assert_eq!(decoded, value, "text form was '{}'", text);
    }
}

#[test]
fn instants_beyond_four_digit_years_survive_the_text_form() {
    let far = datatype::coerce_scalar(PropertyType::DateTime, PropertyValue::Integer(300_000_000_000_000)).unwrap();
    let Encoded::Text(text) = codec::encode(&far) else {
        panic!("a DateTime should encode as text");
    };
    assert!(text.starts_with("+11476-"), "text form was '{}'", text);
    assert_eq!(codec::decode_text(PropertyType::DateTime, &text).unwrap(), far);

    let ancient = PropertyValue::DateTime(Utc.with_ymd_and_hms(-50, 1, 1, 0, 0, 0).unwrap());
    let Encoded::Text(text) = codec::encode(&ancient) else {
        panic!("a DateTime should encode as text");
    };
    assert_eq!(text, "-0050-01-01T00:00:00Z");
    assert_eq!(codec::decode_text(PropertyType::DateTime, &text).unwrap(), ancient);
}

#[test]
fn blobs_use_the_binary_column() {
    let bytes = vec![0u8, 1, 127, 255, 0];
    let encoded = codec::encode(&PropertyValue::Blob(bytes.clone()));
    assert_eq!(encoded.clone().into_columns(), (None, Some(bytes.clone())));
    let decoded = codec::decode_columns(PropertyType::Blob, None, Some(&bytes)).unwrap();
    assert_eq!(decoded, Some(PropertyValue::Blob(bytes)));
}

#[test]
fn both_columns_null_is_a_null_value() {
    for property_type in PropertyType::ALL {
        assert_eq!(codec::decode_columns(property_type, None, None).unwrap(), None);
    }
}

#[test]
fn malformed_text_is_corruption() {
    let cases = [
        (PropertyType::Integer, "4x"),
        (PropertyType::Boolean, "TRUE"),
        (PropertyType::Uuid, "not-a-uuid"),
        (PropertyType::DateTime, "yesterday"),
        (PropertyType::BigDecimal, "1.2.3"),
    ];
    for (property_type, text) in cases {
        let err = codec::decode_text(property_type, text).unwrap_err();
        assert!(
            matches!(err, aspectra::AspectraError::DataCorruption { .. }),
            "{} '{}' gave {:?}",
            property_type,
            text,
            err
        );
    }
}

#[test]
fn type_codes_are_stable() {
    for property_type in PropertyType::ALL {
        let code = codec::property_type_code(property_type);
        assert_eq!(codec::property_type_from_code(code).unwrap(), property_type);
    }
    assert!(codec::property_type_from_code("Nope").is_err());
}

#[test]
fn every_type_survives_a_save_and_load() {
    let session = Session::new();
    let properties: Vec<PropertyDef> = PropertyType::ALL
        .iter()
        .map(|t| PropertyDef::new(t.to_string().to_lowercase(), *t).unwrap())
        .collect();
    let def = session.define_aspect_def(AspectDef::immutable("sample", properties).unwrap());

    let mut expected: Vec<(String, PropertyValue)> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for value in samples() {
        let name = value.property_type().to_string().to_lowercase();
        if seen.insert(name.clone()) {
            expected.push((name, value));
        }
    }
    expected.push(("blob".into(), PropertyValue::Blob(vec![9, 8, 7, 0, 255])));
    assert_eq!(expected.len(), PropertyType::ALL.len());

    let mut catalog = Catalog::new(Species::Source, None).unwrap();
    let entity = session.create_entity();
    catalog
        .create_aspect_map(Arc::clone(&def))
        .unwrap()
        .upsert(
            Arc::clone(&entity),
            expected
                .iter()
                .map(|(name, value)| (name.clone(), Some(Value::One(value.clone()))))
                .collect(),
        )
        .unwrap();

    let mut persistor = Persistor::open(&PersistenceMode::InMemory).unwrap();
    persistor.save_catalog(&catalog).unwrap();
    let reloaded = persistor.load_catalog(&Session::new(), catalog.id()).unwrap();

    let map = reloaded.aspect_map("sample").unwrap();
    let aspect = map.get(&Entity::with_id(entity.global_id())).unwrap();
    let aspect = aspect.read();
    for (name, value) in expected {
        assert_eq!(aspect.read(&name).unwrap(), Some(Value::One(value)), "property {}", name);
    }
}
