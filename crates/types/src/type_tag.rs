//! Compact type descriptors.
//!
//! A [`Type`] is a short byte string whose first byte names the shape of a
//! value. Composite shapes append their children: arrays append the element
//! type, maps append a one-byte key type and the value type, resources append
//! their name and functions append a one-byte required arity followed by every
//! argument type terminated by a NUL separator.
//!
//! The tag bytes are part of the persisted format. Compiled bundles stored as
//! JSON keep decoding only as long as these values never change, so new tags
//! must only ever be appended.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const BYTE_UNSET: u8 = 0;
const BYTE_ANY: u8 = 1;
const BYTE_NIL: u8 = 2;
const BYTE_REF: u8 = 3;
const BYTE_BOOL: u8 = 4;
const BYTE_INT: u8 = 5;
const BYTE_FLOAT: u8 = 6;
const BYTE_STRING: u8 = 7;
const BYTE_REGEX: u8 = 8;
const BYTE_TIME: u8 = 9;
const BYTE_DICT: u8 = 10;
const BYTE_SCORE: u8 = 11;
const BYTE_BLOCK: u8 = 12;
const BYTE_EMPTY: u8 = 13;
const BYTE_SEMVER: u8 = 14;
const BYTE_ARRAY: u8 = 25;
const BYTE_MAP: u8 = 26;
const BYTE_RESOURCE: u8 = 27;
const BYTE_FUNCTION: u8 = 28;
const BYTE_STRING_SLICE: u8 = 29;
const BYTE_RANGE: u8 = 30;

/// Separator placed after every function argument type.
pub const ARG_SEPARATOR: char = '\0';

/// Text form of [`ARG_SEPARATOR`] used when a type is stored as JSON text.
pub const ESCAPED_SEPARATOR: &str = "\\u0000";

/// Errors raised while decoding or building a [`Type`] from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("type information is empty")]
    Empty,

    #[error("unknown type tag 0x{tag:02x}")]
    UnknownTag { tag: u8 },

    #[error("unexpected trailing bytes after scalar type '{label}'")]
    TrailingBytes { label: String },

    #[error("unsupported map key type '{label}', expected string or int")]
    InvalidMapKey { label: String },

    #[error("invalid resource name '{name}'")]
    InvalidResourceName { name: String },

    #[error("invalid function signature: {reason}")]
    InvalidFunction { reason: String },

    #[error("type bytes are not valid UTF-8")]
    InvalidEncoding,
}

/// Encoded type information.
///
/// The empty type means "no type information available"; it is distinct from
/// [`Type::UNSET`], which marks a type that has not been resolved yet.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Type(Cow<'static, str>);

impl Type {
    pub const UNSET: Type = Type(Cow::Borrowed("\u{0}"));
    pub const ANY: Type = Type(Cow::Borrowed("\u{1}"));
    pub const NIL: Type = Type(Cow::Borrowed("\u{2}"));
    pub const REF: Type = Type(Cow::Borrowed("\u{3}"));
    pub const BOOL: Type = Type(Cow::Borrowed("\u{4}"));
    pub const INT: Type = Type(Cow::Borrowed("\u{5}"));
    pub const FLOAT: Type = Type(Cow::Borrowed("\u{6}"));
    pub const STRING: Type = Type(Cow::Borrowed("\u{7}"));
    pub const REGEX: Type = Type(Cow::Borrowed("\u{8}"));
    pub const TIME: Type = Type(Cow::Borrowed("\u{9}"));
    pub const DICT: Type = Type(Cow::Borrowed("\u{a}"));
    pub const SCORE: Type = Type(Cow::Borrowed("\u{b}"));
    pub const BLOCK: Type = Type(Cow::Borrowed("\u{c}"));
    pub const EMPTY: Type = Type(Cow::Borrowed("\u{d}"));
    pub const SEMVER: Type = Type(Cow::Borrowed("\u{e}"));
    pub const STRING_SLICE: Type = Type(Cow::Borrowed("\u{1d}"));
    pub const RANGE: Type = Type(Cow::Borrowed("\u{1e}"));

    /// Underlying type of every array.
    pub const ARRAY_LIKE: Type = Type(Cow::Borrowed("\u{19}"));
    /// Underlying type of every map.
    pub const MAP_LIKE: Type = Type(Cow::Borrowed("\u{1a}"));
    /// Underlying type of every resource.
    pub const RESOURCE_LIKE: Type = Type(Cow::Borrowed("\u{1b}"));
    /// Underlying type of every function signature.
    pub const FUNCTION_LIKE: Type = Type(Cow::Borrowed("\u{1c}"));

    /// The "no type information" value.
    pub const fn none() -> Self {
        Type(Cow::Borrowed(""))
    }

    /// Array of `child` values.
    ///
    /// # Panics
    /// Panics when `child` carries no type information.
    pub fn array(child: &Type) -> Type {
        assert!(child.is_set(), "cannot build an array of an empty type");
        Type(Cow::Owned(format!("{}{}", char::from(BYTE_ARRAY), child.0)))
    }

    /// Map from `key` to `value`.
    ///
    /// # Panics
    /// Panics unless `key` is [`Type::STRING`] or [`Type::INT`].
    pub fn map(key: &Type, value: &Type) -> Type {
        if *key != Type::STRING && *key != Type::INT {
            panic!("unsupported map on key type {}", key.label());
        }
        assert!(value.is_set(), "cannot build a map with an empty value type");
        Type(Cow::Owned(format!("{}{}{}", char::from(BYTE_MAP), key.0, value.0)))
    }

    /// Reference to the resource called `name`.
    ///
    /// # Panics
    /// Panics when the name is empty or contains the argument separator.
    pub fn resource(name: &str) -> Type {
        if let Err(error) = validate_resource_name(name) {
            panic!("{error}");
        }
        Type(Cow::Owned(format!("{}{}", char::from(BYTE_RESOURCE), name)))
    }

    /// Function signature with `required` mandatory arguments out of `args`.
    ///
    /// # Panics
    /// Panics when `required` does not fit in a single tag byte, exceeds the
    /// number of arguments, when an argument is itself a function (its
    /// separators would be ambiguous), or when an argument is or contains
    /// [`Type::UNSET`].
    pub fn function(required: u8, args: &[Type]) -> Type {
        if let Err(error) = validate_function(required, args) {
            panic!("{error}");
        }
        let mut encoded = String::with_capacity(2 + args.iter().map(|arg| arg.0.len() + 1).sum::<usize>());
        encoded.push(char::from(BYTE_FUNCTION));
        encoded.push(char::from(required));
        for arg in args {
            encoded.push_str(&arg.0);
            encoded.push(ARG_SEPARATOR);
        }
        Type(Cow::Owned(encoded))
    }

    /// Rebuild a type from raw bytes, validating the full encoding.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Type, TypeError> {
        let text = String::from_utf8(bytes).map_err(|_| TypeError::InvalidEncoding)?;
        let typ = Type(Cow::Owned(text));
        typ.decode()?;
        Ok(typ)
    }

    /// Raw encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_set(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn not_set(&self) -> bool {
        self.0.is_empty()
    }

    fn tag(&self) -> Option<u8> {
        self.0.as_bytes().first().copied()
    }

    /// The basic type, e.g. [`Type::MAP_LIKE`] for any map.
    pub fn underlying(&self) -> Type {
        match self.tag() {
            Some(tag) => Type(Cow::Owned(char::from(tag).to_string())),
            None => Type::none(),
        }
    }

    pub fn is_array(&self) -> bool {
        self.tag() == Some(BYTE_ARRAY)
    }

    pub fn is_map(&self) -> bool {
        self.tag() == Some(BYTE_MAP)
    }

    pub fn is_resource(&self) -> bool {
        self.tag() == Some(BYTE_RESOURCE)
    }

    pub fn is_function(&self) -> bool {
        self.tag() == Some(BYTE_FUNCTION)
    }

    /// Element type of arrays and value type of maps; dicts are their own child.
    pub fn child(&self) -> Option<Type> {
        match self.tag()? {
            BYTE_DICT => Some(Type::DICT),
            BYTE_ARRAY => Some(Type(Cow::Owned(self.0.get(1..)?.to_string()))),
            BYTE_MAP => Some(Type(Cow::Owned(self.0.get(2..)?.to_string()))),
            _ => None,
        }
    }

    /// Key type of a map.
    pub fn key(&self) -> Option<Type> {
        if self.tag()? != BYTE_MAP {
            return None;
        }
        self.0.get(1..2).map(|key| Type(Cow::Owned(key.to_string())))
    }

    /// Name of the referenced resource.
    pub fn resource_name(&self) -> Option<&str> {
        if self.tag()? != BYTE_RESOURCE {
            return None;
        }
        self.0.get(1..)
    }

    /// Required arity and argument types of a function signature.
    pub fn function_signature(&self) -> Option<(u8, Vec<Type>)> {
        match self.decode().ok()? {
            Shape::Function { required, args } => Some((required, args.iter().map(Type::encode_unchecked).collect())),
            _ => None,
        }
    }

    /// True when this type or any nested child is a resource.
    pub fn contains_resource(&self) -> bool {
        let mut current = self.clone();
        loop {
            if current.is_resource() {
                return true;
            }
            if !current.is_array() && !current.is_map() {
                return false;
            }
            match current.child() {
                Some(child) => current = child,
                None => return false,
            }
        }
    }

    /// Reconcile two types that should be identical.
    ///
    /// Returns the common type and `true` when both agree. An unset or nil
    /// position on one side yields to the other side.
    pub fn enforce(left: &Type, right: &Type) -> (Type, bool) {
        let left_bytes = left.as_bytes();
        let right_bytes = right.as_bytes();
        for (left_byte, right_byte) in left_bytes.iter().zip(right_bytes) {
            if left_byte == right_byte {
                continue;
            }
            if *right_byte == BYTE_UNSET || *right_byte == BYTE_NIL {
                return (left.clone(), true);
            }
            if *left_byte == BYTE_UNSET || *left_byte == BYTE_NIL {
                return (right.clone(), true);
            }
            return (right.clone(), false);
        }
        (right.clone(), left_bytes.len() == right_bytes.len())
    }

    /// Human-readable label, e.g. `[]string` or `map[string]int`.
    pub fn label(&self) -> String {
        let Some(tag) = self.tag() else {
            return "EMPTY".to_string();
        };
        if let Some(label) = scalar_label(tag) {
            return label.to_string();
        }
        let rest = self.0.get(1..).unwrap_or_default();
        match tag {
            BYTE_ARRAY => format!("[]{}", Type(Cow::Owned(rest.to_string())).label()),
            BYTE_MAP => {
                let key = rest.get(..1).unwrap_or_default();
                let value = rest.get(1..).unwrap_or_default();
                format!(
                    "map[{}]{}",
                    Type(Cow::Owned(key.to_string())).label(),
                    Type(Cow::Owned(value.to_string())).label()
                )
            }
            BYTE_RESOURCE => rest.to_string(),
            BYTE_FUNCTION => "function(..)".to_string(),
            other => format!("unknown(0x{other:02x})"),
        }
    }

    /// Decode the full shape, rejecting unknown tags and malformed payloads.
    pub fn decode(&self) -> Result<Shape, TypeError> {
        parse_shape(&self.0)
    }

    /// Encode a shape description, validating composite constraints.
    pub fn encode(shape: &Shape) -> Result<Type, TypeError> {
        match shape {
            Shape::Array(child) => Ok(Type::array(&Type::encode(child)?)),
            Shape::Map { key, value } => {
                let key = Type::encode(key)?;
                if key != Type::STRING && key != Type::INT {
                    return Err(TypeError::InvalidMapKey { label: key.label() });
                }
                Ok(Type::map(&key, &Type::encode(value)?))
            }
            Shape::Resource(name) => {
                validate_resource_name(name)?;
                Ok(Type::resource(name))
            }
            Shape::Function { required, args } => {
                let args = args.iter().map(Type::encode).collect::<Result<Vec<_>, _>>()?;
                validate_function(*required, &args)?;
                Ok(Type::function(*required, &args))
            }
            scalar => Ok(scalar_type(scalar)),
        }
    }

    fn encode_unchecked(shape: &Shape) -> Type {
        Type::encode(shape).unwrap_or_default()
    }

    /// JSON-safe text: every NUL separator is replaced by its escaped form.
    pub fn escaped(&self) -> String {
        self.0.replace(ARG_SEPARATOR, ESCAPED_SEPARATOR)
    }

    /// Inverse of [`Type::escaped`].
    pub fn from_escaped(text: &str) -> Type {
        Type(Cow::Owned(text.replace(ESCAPED_SEPARATOR, "\0")))
    }
}

fn scalar_label(tag: u8) -> Option<&'static str> {
    let label = match tag {
        BYTE_UNSET => "unset",
        BYTE_ANY => "any",
        BYTE_NIL => "null",
        BYTE_REF => "ref",
        BYTE_BOOL => "bool",
        BYTE_INT => "int",
        BYTE_FLOAT => "float",
        BYTE_STRING => "string",
        BYTE_REGEX => "regex",
        BYTE_TIME => "time",
        BYTE_DICT => "dict",
        BYTE_SCORE => "score",
        BYTE_BLOCK => "block",
        BYTE_EMPTY => "empty",
        BYTE_SEMVER => "semver",
        BYTE_STRING_SLICE => "stringslice",
        BYTE_RANGE => "range",
        _ => return None,
    };
    Some(label)
}

fn scalar_type(shape: &Shape) -> Type {
    match shape {
        Shape::Unset => Type::UNSET,
        Shape::Any => Type::ANY,
        Shape::Nil => Type::NIL,
        Shape::Ref => Type::REF,
        Shape::Bool => Type::BOOL,
        Shape::Int => Type::INT,
        Shape::Float => Type::FLOAT,
        Shape::String => Type::STRING,
        Shape::Regex => Type::REGEX,
        Shape::Time => Type::TIME,
        Shape::Dict => Type::DICT,
        Shape::Score => Type::SCORE,
        Shape::Block => Type::BLOCK,
        Shape::Empty => Type::EMPTY,
        Shape::Semver => Type::SEMVER,
        Shape::StringSlice => Type::STRING_SLICE,
        Shape::Range => Type::RANGE,
        Shape::Array(_) | Shape::Map { .. } | Shape::Resource(_) | Shape::Function { .. } => Type::none(),
    }
}

fn validate_resource_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() || name.contains(ARG_SEPARATOR) {
        return Err(TypeError::InvalidResourceName { name: name.to_string() });
    }
    Ok(())
}

fn validate_function(required: u8, args: &[Type]) -> Result<(), TypeError> {
    if required >= 0x80 {
        return Err(TypeError::InvalidFunction {
            reason: format!("required arity {required} does not fit in one tag byte"),
        });
    }
    if usize::from(required) > args.len() {
        return Err(TypeError::InvalidFunction {
            reason: format!("{required} required arguments but only {} declared", args.len()),
        });
    }
    for arg in args {
        if arg.not_set() {
            return Err(TypeError::InvalidFunction {
                reason: "argument without type information".to_string(),
            });
        }
        if arg.0.contains(ARG_SEPARATOR) {
            let reason = match arg.decode() {
                Ok(Shape::Unset) => "argument without type information".to_string(),
                Ok(shape) if !shape_contains(&shape, &|s| matches!(s, Shape::Function { .. })) => {
                    format!("argument '{}' has a component without type information", arg.label())
                }
                _ => format!("argument '{}' embeds a function signature", arg.label()),
            };
            return Err(TypeError::InvalidFunction { reason });
        }
    }
    Ok(())
}

fn shape_contains(shape: &Shape, predicate: &dyn Fn(&Shape) -> bool) -> bool {
    if predicate(shape) {
        return true;
    }
    match shape {
        Shape::Array(child) => shape_contains(child, predicate),
        Shape::Map { key, value } => shape_contains(key, predicate) || shape_contains(value, predicate),
        Shape::Function { args, .. } => args.iter().any(|arg| shape_contains(arg, predicate)),
        _ => false,
    }
}

fn parse_shape(encoded: &str) -> Result<Shape, TypeError> {
    let tag = *encoded.as_bytes().first().ok_or(TypeError::Empty)?;
    let rest = encoded.get(1..).ok_or(TypeError::InvalidEncoding)?;

    if let Some(label) = scalar_label(tag) {
        if !rest.is_empty() {
            return Err(TypeError::TrailingBytes { label: label.to_string() });
        }
        let shape = match tag {
            BYTE_UNSET => Shape::Unset,
            BYTE_ANY => Shape::Any,
            BYTE_NIL => Shape::Nil,
            BYTE_REF => Shape::Ref,
            BYTE_BOOL => Shape::Bool,
            BYTE_INT => Shape::Int,
            BYTE_FLOAT => Shape::Float,
            BYTE_STRING => Shape::String,
            BYTE_REGEX => Shape::Regex,
            BYTE_TIME => Shape::Time,
            BYTE_DICT => Shape::Dict,
            BYTE_SCORE => Shape::Score,
            BYTE_BLOCK => Shape::Block,
            BYTE_EMPTY => Shape::Empty,
            BYTE_SEMVER => Shape::Semver,
            BYTE_STRING_SLICE => Shape::StringSlice,
            _ => Shape::Range,
        };
        return Ok(shape);
    }

    match tag {
        BYTE_ARRAY => Ok(Shape::Array(Box::new(parse_shape(rest)?))),
        BYTE_MAP => {
            let key = rest.get(..1).ok_or(TypeError::Empty)?;
            let key = parse_shape(key)?;
            if key != Shape::String && key != Shape::Int {
                return Err(TypeError::InvalidMapKey {
                    label: scalar_type(&key).label(),
                });
            }
            let value = rest.get(1..).ok_or(TypeError::InvalidEncoding)?;
            Ok(Shape::Map {
                key: Box::new(key),
                value: Box::new(parse_shape(value)?),
            })
        }
        BYTE_RESOURCE => {
            validate_resource_name(rest)?;
            Ok(Shape::Resource(rest.to_string()))
        }
        BYTE_FUNCTION => {
            let required = *rest.as_bytes().first().ok_or_else(|| TypeError::InvalidFunction {
                reason: "missing required arity".to_string(),
            })?;
            let signature = rest.get(1..).ok_or(TypeError::InvalidEncoding)?;
            let args = if signature.is_empty() {
                Vec::new()
            } else {
                let terminated = signature.strip_suffix(ARG_SEPARATOR).ok_or_else(|| TypeError::InvalidFunction {
                    reason: "argument list is not separator-terminated".to_string(),
                })?;
                terminated.split(ARG_SEPARATOR).map(parse_shape).collect::<Result<Vec<_>, _>>()?
            };
            if usize::from(required) > args.len() {
                return Err(TypeError::InvalidFunction {
                    reason: format!("{required} required arguments but only {} declared", args.len()),
                });
            }
            Ok(Shape::Function { required, args })
        }
        other => Err(TypeError::UnknownTag { tag: other }),
    }
}

/// Decoded shape of a [`Type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Unset,
    Any,
    Nil,
    Ref,
    Bool,
    Int,
    Float,
    String,
    Regex,
    Time,
    Dict,
    Score,
    Block,
    Empty,
    Semver,
    StringSlice,
    Range,
    Array(Box<Shape>),
    Map { key: Box<Shape>, value: Box<Shape> },
    Resource(String),
    Function { required: u8, args: Vec<Shape> },
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({} {:?})", self.label(), self.0.as_bytes())
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.escaped())
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Type::from_escaped(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_round_trip(typ: &Type) -> Type {
        let text = serde_json::to_string(typ).expect("serialize type");
        serde_json::from_str(&text).expect("deserialize type")
    }

    #[test]
    fn labels_are_human_readable() {
        assert_eq!(Type::STRING.label(), "string");
        assert_eq!(Type::array(&Type::STRING).label(), "[]string");
        assert_eq!(Type::map(&Type::STRING, &Type::INT).label(), "map[string]int");
        assert_eq!(Type::resource("foo").label(), "foo");
        assert_eq!(Type::function(2, &[Type::STRING, Type::INT]).label(), "function(..)");
        assert_eq!(Type::none().label(), "EMPTY");
    }

    #[test]
    fn representative_shapes_round_trip_through_json() {
        let shapes = [
            Shape::String,
            Shape::Array(Box::new(Shape::Int)),
            Shape::Map {
                key: Box::new(Shape::String),
                value: Box::new(Shape::Array(Box::new(Shape::Resource("foo".into())))),
            },
            Shape::Function {
                required: 2,
                args: vec![Shape::String, Shape::Int],
            },
            Shape::Array(Box::new(Shape::Map {
                key: Box::new(Shape::Int),
                value: Box::new(Shape::Resource("k8s.namespace".into())),
            })),
        ];

        for shape in shapes {
            let encoded = Type::encode(&shape).expect("encode shape");
            let restored = json_round_trip(&encoded);
            assert_eq!(restored, encoded);
            assert_eq!(restored.decode().expect("decode shape"), shape);
        }
    }

    #[test]
    fn separator_is_escaped_in_json_text() {
        let function = Type::function(1, &[Type::resource("user"), Type::array(&Type::STRING)]);
        assert!(function.as_bytes().contains(&0));

        let text = serde_json::to_string(&function).expect("serialize");
        assert!(text.contains("\\\\u0000"), "escaped form expected in {text}");

        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        let reparsed = serde_json::to_string(&value).expect("reserialize");
        let restored: Type = serde_json::from_str(&reparsed).expect("deserialize");
        assert_eq!(restored, function);
        assert_eq!(restored.function_signature(), Some((1, vec![Type::resource("user"), Type::array(&Type::STRING)])));
    }

    #[test]
    fn child_key_and_resource_accessors() {
        let typ = Type::map(&Type::STRING, &Type::array(&Type::resource("foo")));
        assert_eq!(typ.key(), Some(Type::STRING));
        assert_eq!(typ.child(), Some(Type::array(&Type::resource("foo"))));
        assert!(typ.contains_resource());
        assert_eq!(Type::resource("foo").resource_name(), Some("foo"));
        assert_eq!(Type::STRING.resource_name(), None);
        assert_eq!(Type::DICT.child(), Some(Type::DICT));
        assert_eq!(Type::array(&Type::INT).underlying(), Type::ARRAY_LIKE);
    }

    #[test]
    #[should_panic(expected = "unsupported map on key type bool")]
    fn map_rejects_non_scalar_keys() {
        let _ = Type::map(&Type::BOOL, &Type::STRING);
    }

    #[test]
    #[should_panic(expected = "embeds a function signature")]
    fn function_rejects_nested_functions() {
        let inner = Type::function(0, &[Type::INT]);
        let _ = Type::function(1, &[inner]);
    }

    #[test]
    #[should_panic(expected = "component without type information")]
    fn function_rejects_arrays_of_unset() {
        let _ = Type::function(1, &[Type::array(&Type::UNSET)]);
    }

    #[test]
    #[should_panic(expected = "argument without type information")]
    fn function_rejects_unset_arguments() {
        let _ = Type::function(1, &[Type::UNSET]);
    }

    #[test]
    fn encode_reports_invalid_shapes_as_errors() {
        let shape = Shape::Map {
            key: Box::new(Shape::Float),
            value: Box::new(Shape::Int),
        };
        assert_eq!(Type::encode(&shape), Err(TypeError::InvalidMapKey { label: "float".into() }));
        assert!(matches!(
            Type::encode(&Shape::Resource(String::new())),
            Err(TypeError::InvalidResourceName { .. })
        ));
    }

    #[test]
    fn decode_rejects_unknown_tags() {
        let typ = Type::from_escaped("\u{1f}");
        assert_eq!(typ.decode(), Err(TypeError::UnknownTag { tag: 0x1f }));
        assert!(Type::from_bytes(vec![BYTE_STRING, BYTE_INT]).is_err());
        assert_eq!(Type::from_bytes(vec![BYTE_ARRAY, BYTE_INT]), Ok(Type::array(&Type::INT)));
    }

    #[test]
    fn zero_argument_functions_decode() {
        let typ = Type::function(0, &[]);
        assert_eq!(typ.decode(), Ok(Shape::Function { required: 0, args: vec![] }));
    }

    #[test]
    fn enforce_prefers_the_resolved_side() {
        let left = Type::array(&Type::UNSET);
        let right = Type::array(&Type::STRING);
        assert_eq!(Type::enforce(&left, &right), (right.clone(), true));
        assert_eq!(Type::enforce(&right, &left), (right.clone(), true));
        assert_eq!(Type::enforce(&Type::INT, &Type::STRING).1, false);
    }
}
