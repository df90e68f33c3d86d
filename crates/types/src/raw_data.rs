//! Typed values exchanged across the provider boundary.
//!
//! [`RawData`] pairs a [`Value`] with the exact [`Type`] its consumer expects.
//! Its JSON form is `{"type": <escaped tag>, "value": ...}`; times travel as
//! unix seconds and resource references as `{"name", "id"}` objects.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::type_tag::Type;

/// JSON numbers are only exact up to 2^53; larger timestamps clamp to the ends of time.
const MAX_EXACT_JSON_INT: i64 = 1 << 53;

/// Reference to a resource instance by name and identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub name: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Untyped payload of a [`RawData`]; the accompanying [`Type`] decides how it is read.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Strings, regular expressions and semantic versions.
    String(String),
    Time(DateTime<Utc>),
    Dict(serde_json::Value),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    IntMap(IndexMap<i64, Value>),
    Resource(ResourceRef),
}

/// Errors raised while reading a value against its declared type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("expected {expected} value, found {found}")]
    Mismatch { expected: String, found: String },

    #[error("values of type '{label}' cannot be carried as data")]
    Unsupported { label: String },

    #[error("invalid int map key '{key}'")]
    InvalidIntKey { key: String },
}

/// A value together with its type information.
#[derive(Debug, Clone, PartialEq)]
pub struct RawData {
    pub typ: Type,
    pub value: Value,
}

impl RawData {
    pub fn new(typ: Type, value: Value) -> Self {
        Self { typ, value }
    }

    pub fn bool(value: bool) -> Self {
        Self::new(Type::BOOL, Value::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(Type::INT, Value::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(Type::FLOAT, Value::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(Type::STRING, Value::String(value.into()))
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(Type::REGEX, Value::String(pattern.into()))
    }

    pub fn semver(version: impl Into<String>) -> Self {
        Self::new(Type::SEMVER, Value::String(version.into()))
    }

    pub fn time(value: DateTime<Utc>) -> Self {
        Self::new(Type::TIME, Value::Time(value))
    }

    pub fn dict(value: serde_json::Value) -> Self {
        Self::new(Type::DICT, Value::Dict(value))
    }

    /// Array of `child` typed values.
    pub fn array(child: &Type, values: Vec<Value>) -> Self {
        Self::new(Type::array(child), Value::Array(values))
    }

    /// Map keyed by strings.
    pub fn map(value_type: &Type, values: IndexMap<String, Value>) -> Self {
        Self::new(Type::map(&Type::STRING, value_type), Value::Map(values))
    }

    /// Map keyed by integers.
    pub fn int_map(value_type: &Type, values: IndexMap<i64, Value>) -> Self {
        Self::new(Type::map(&Type::INT, value_type), Value::IntMap(values))
    }

    pub fn resource(reference: ResourceRef) -> Self {
        Self::new(Type::resource(&reference.name), Value::Resource(reference))
    }

    /// Array of references to resources of the same kind.
    pub fn resources(name: &str, ids: impl IntoIterator<Item = String>) -> Self {
        let values = ids
            .into_iter()
            .map(|id| Value::Resource(ResourceRef::new(name, id)))
            .collect();
        Self::array(&Type::resource(name), values)
    }

    /// The untyped nil value.
    pub fn nil() -> Self {
        Self::new(Type::NIL, Value::Null)
    }

    /// A value of type `typ` that is intentionally absent.
    pub fn null(typ: Type) -> Self {
        Self::new(typ, Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            Value::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceRef> {
        match &self.value {
            Value::Resource(reference) => Some(reference),
            _ => None,
        }
    }

    /// Decode a JSON payload against the type it was declared with.
    pub fn from_json(typ: Type, json: serde_json::Value) -> Result<Self, ValueError> {
        let value = value_from_json(&typ, json)?;
        Ok(Self { typ, value })
    }

    /// Whether the data counts as success in a check.
    ///
    /// The first flag is the verdict, the second tells whether a verdict
    /// could be reached at all. Empty arrays are falsy; resources are truthy.
    pub fn is_truthy(&self) -> (bool, bool) {
        is_truthy(&self.typ, &self.value)
    }
}

fn mismatch(typ: &Type, json: &serde_json::Value) -> ValueError {
    ValueError::Mismatch {
        expected: typ.label(),
        found: json.to_string(),
    }
}

fn time_from_seconds(seconds: i64) -> DateTime<Utc> {
    if seconds > MAX_EXACT_JSON_INT {
        return DateTime::<Utc>::MAX_UTC;
    }
    if seconds < -MAX_EXACT_JSON_INT {
        return DateTime::<Utc>::MIN_UTC;
    }
    DateTime::from_timestamp(seconds, 0).unwrap_or(if seconds > 0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

fn value_from_json(typ: &Type, json: serde_json::Value) -> Result<Value, ValueError> {
    use serde_json::Value as Json;

    if json.is_null() {
        return Ok(Value::Null);
    }

    let underlying = typ.underlying();
    if underlying == Type::BOOL {
        json.as_bool().map(Value::Bool).ok_or_else(|| mismatch(typ, &json))
    } else if underlying == Type::INT || underlying == Type::SCORE {
        json.as_i64()
            .or_else(|| json.as_f64().filter(|number| number.fract() == 0.0).map(|number| number as i64))
            .map(Value::Int)
            .ok_or_else(|| mismatch(typ, &json))
    } else if underlying == Type::FLOAT {
        json.as_f64().map(Value::Float).ok_or_else(|| mismatch(typ, &json))
    } else if underlying == Type::STRING || underlying == Type::REGEX || underlying == Type::SEMVER {
        match json {
            Json::String(text) => Ok(Value::String(text)),
            other => Err(mismatch(typ, &other)),
        }
    } else if underlying == Type::TIME {
        let seconds = json
            .as_i64()
            .or_else(|| json.as_f64().map(|number| number as i64))
            .ok_or_else(|| mismatch(typ, &json))?;
        Ok(Value::Time(time_from_seconds(seconds)))
    } else if underlying == Type::DICT || underlying == Type::ANY {
        Ok(Value::Dict(json))
    } else if underlying == Type::NIL {
        Err(mismatch(typ, &json))
    } else if typ.is_array() {
        let child = typ.child().ok_or_else(|| mismatch(typ, &json))?;
        match json {
            Json::Array(items) => items
                .into_iter()
                .map(|item| value_from_json(&child, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Err(mismatch(typ, &other)),
        }
    } else if typ.is_map() {
        let child = typ.child().ok_or_else(|| mismatch(typ, &json))?;
        let int_keys = typ.key() == Some(Type::INT);
        let Json::Object(entries) = json else {
            return Err(mismatch(typ, &json));
        };
        if int_keys {
            let mut values = IndexMap::with_capacity(entries.len());
            for (key, item) in entries {
                let parsed = key.parse::<i64>().map_err(|_| ValueError::InvalidIntKey { key: key.clone() })?;
                values.insert(parsed, value_from_json(&child, item)?);
            }
            Ok(Value::IntMap(values))
        } else {
            let mut values = IndexMap::with_capacity(entries.len());
            for (key, item) in entries {
                values.insert(key, value_from_json(&child, item)?);
            }
            Ok(Value::Map(values))
        }
    } else if typ.is_resource() {
        serde_json::from_value::<ResourceRef>(json.clone())
            .map(Value::Resource)
            .map_err(|_| mismatch(typ, &json))
    } else {
        Err(ValueError::Unsupported { label: typ.label() })
    }
}

fn is_truthy(typ: &Type, value: &Value) -> (bool, bool) {
    match value {
        Value::Null => (false, true),
        Value::Bool(flag) => (*flag, true),
        Value::Int(number) => (*number != 0, true),
        Value::Float(number) => (*number != 0.0, true),
        Value::String(text) => (!text.is_empty(), true),
        Value::Time(time) => (time.timestamp() != 0, true),
        Value::Resource(_) => (true, true),
        Value::Dict(json) => match json {
            serde_json::Value::Bool(flag) => (*flag, true),
            _ => (false, false),
        },
        Value::Array(items) => {
            if items.is_empty() {
                return (false, true);
            }
            let child = typ.child().unwrap_or(Type::ANY);
            let verdict = items
                .iter()
                .map(|item| is_truthy(&child, item))
                .filter(|(_, decided)| *decided)
                .all(|(truthy, _)| truthy);
            (verdict, true)
        }
        Value::Map(entries) => {
            let child = typ.child().unwrap_or(Type::ANY);
            let verdict = entries
                .values()
                .map(|item| is_truthy(&child, item))
                .filter(|(_, decided)| *decided)
                .all(|(truthy, _)| truthy);
            (verdict, true)
        }
        Value::IntMap(entries) => {
            let child = typ.child().unwrap_or(Type::ANY);
            let verdict = entries
                .values()
                .map(|item| is_truthy(&child, item))
                .filter(|(_, decided)| *decided)
                .all(|(truthy, _)| truthy);
            (verdict, true)
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(flag) => serializer.serialize_bool(*flag),
            Value::Int(number) => serializer.serialize_i64(*number),
            Value::Float(number) => serializer.serialize_f64(*number),
            Value::String(text) => serializer.serialize_str(text),
            Value::Time(time) => serializer.serialize_i64(time.timestamp()),
            Value::Dict(json) => json.serialize(serializer),
            Value::Array(items) => items.serialize(serializer),
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, item) in entries {
                    map.serialize_entry(key, item)?;
                }
                map.end()
            }
            Value::IntMap(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, item) in entries {
                    map.serialize_entry(&key.to_string(), item)?;
                }
                map.end()
            }
            Value::Resource(reference) => reference.serialize(serializer),
        }
    }
}

impl Serialize for RawData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RawData", 2)?;
        state.serialize_field("type", &self.typ)?;
        state.serialize_field("value", &self.value)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for RawData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "type")]
            typ: Type,
            #[serde(default)]
            value: serde_json::Value,
        }

        let wire = Wire::deserialize(deserializer)?;
        RawData::from_json(wire.typ, wire.value).map_err(D::Error::custom)
    }
}

/// Outcome of one field as stored in recordings and returned over the wire.
///
/// A failed field serializes as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldResult {
    Error { error: String },
    Data(RawData),
}

impl FieldResult {
    pub fn into_result(self) -> Result<RawData, String> {
        match self {
            FieldResult::Data(data) => Ok(data),
            FieldResult::Error { error } => Err(error),
        }
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, typ: &Type, value: &Value) -> fmt::Result {
    match value {
        Value::Null => f.write_str("<null>"),
        Value::Bool(flag) => write!(f, "{flag}"),
        Value::Int(number) => write!(f, "{number}"),
        Value::Float(number) => write!(f, "{number}"),
        Value::String(text) if typ.underlying() == Type::REGEX => write!(f, "/{text}/"),
        Value::String(text) => write!(f, "{text:?}"),
        Value::Time(time) => write!(f, "{time}"),
        Value::Dict(json) => write!(f, "{json}"),
        Value::Resource(reference) => write!(f, "{} id = {}", reference.name, reference.id),
        Value::Array(items) => {
            let child = typ.child().unwrap_or(Type::ANY);
            f.write_str("[")?;
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write_value(f, &child, item)?;
            }
            f.write_str("]")
        }
        Value::Map(entries) => {
            let child = typ.child().unwrap_or(Type::ANY);
            f.write_str("{")?;
            for (index, (key, item)) in entries.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key:?}:")?;
                write_value(f, &child, item)?;
            }
            f.write_str("}")
        }
        Value::IntMap(entries) => {
            let child = typ.child().unwrap_or(Type::ANY);
            f.write_str("{")?;
            for (index, (key, item)) in entries.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key}:")?;
                write_value(f, &child, item)?;
            }
            f.write_str("}")
        }
    }
}

impl fmt::Display for RawData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, &self.typ, &self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_carry_exact_types() {
        assert_eq!(RawData::string("a").typ, Type::STRING);
        assert_eq!(RawData::resources("k8s.node", ["n1".to_string()]).typ, Type::array(&Type::resource("k8s.node")));
        assert_eq!(RawData::null(Type::array(&Type::INT)).typ, Type::array(&Type::INT));
        assert!(RawData::null(Type::STRING).is_null());
        assert!(!RawData::string("").is_null());
    }

    #[test]
    fn json_form_keeps_type_and_value() {
        let mut users = IndexMap::new();
        users.insert("alice".to_string(), Value::Array(vec![Value::Resource(ResourceRef::new("user", "alice"))]));
        let data = RawData::map(&Type::array(&Type::resource("user")), users);

        let text = serde_json::to_string(&data).expect("serialize");
        let restored: RawData = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(restored, data);
    }

    #[test]
    fn time_travels_as_unix_seconds() {
        let time = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp");
        let encoded = serde_json::to_value(RawData::time(time)).expect("serialize");
        assert_eq!(encoded["value"], json!(1_700_000_000));

        let far_future = RawData::from_json(Type::TIME, json!(9.1e15)).expect("decode");
        assert_eq!(far_future.value, Value::Time(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn ints_decode_from_float_json() {
        let data = RawData::from_json(Type::INT, json!(42.0)).expect("decode");
        assert_eq!(data.as_int(), Some(42));
        assert!(RawData::from_json(Type::INT, json!("42")).is_err());
    }

    #[test]
    fn int_maps_use_string_keys_in_json() {
        let mut ports = IndexMap::new();
        ports.insert(22, Value::String("ssh".into()));
        let data = RawData::int_map(&Type::STRING, ports);
        let encoded = serde_json::to_value(&data).expect("serialize");
        assert_eq!(encoded["value"], json!({"22": "ssh"}));
        let restored: RawData = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(restored, data);
    }

    #[test]
    fn field_results_distinguish_errors() {
        let failed: FieldResult = serde_json::from_value(json!({"error": "access denied"})).expect("decode");
        assert_eq!(failed.into_result(), Err("access denied".to_string()));

        let ok = FieldResult::Data(RawData::bool(true));
        let encoded = serde_json::to_value(&ok).expect("encode");
        let decoded: FieldResult = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, ok);
    }

    #[test]
    fn truthiness_follows_query_rules() {
        assert_eq!(RawData::array(&Type::BOOL, vec![]).is_truthy(), (false, true));
        assert_eq!(RawData::array(&Type::BOOL, vec![Value::Bool(true), Value::Bool(false)]).is_truthy(), (false, true));
        assert_eq!(RawData::resource(ResourceRef::new("os", "os")).is_truthy(), (true, true));
        assert_eq!(RawData::string("x").is_truthy(), (true, true));
        assert_eq!(RawData::dict(json!({"a": 1})).is_truthy(), (false, false));
    }

    #[test]
    fn display_renders_diagnostic_forms() {
        assert_eq!(RawData::regex("^a").to_string(), "/^a/");
        assert_eq!(RawData::string("a").to_string(), "\"a\"");
        assert_eq!(RawData::null(Type::INT).to_string(), "<null>");
        assert_eq!(RawData::array(&Type::INT, vec![Value::Int(1), Value::Int(2)]).to_string(), "[1,2]");
    }
}
