//! Implementation of the Tern runtime values.
//!
//! Values form a tagged sum mirroring the type lattice, plus the `unknown`
//! and `error` markers that participate in propagation. Capabilities
//! (addition, comparison, indexing, sizing, and so on) are methods whose
//! match arms double as the capability check: a value without the
//! capability falls through to a "no such overload" error value.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::DateTime;
use chrono::FixedOffset;
use chrono::TimeDelta;
use indexmap::IndexMap;
use itertools::Itertools;
use tern_analysis::types::PrimitiveTypeKind;
use tern_analysis::types::Type;

use crate::error;
use crate::error::EvalError;

/// The maximum magnitude of a duration, in seconds (10,000 years).
pub const MAX_DURATION_SECONDS: i64 = 315_576_000_000;

/// The minimum timestamp, in seconds since the Unix epoch
/// (`0001-01-01T00:00:00Z`).
pub const MIN_TIMESTAMP_SECONDS: i64 = -62_135_596_800;

/// The maximum timestamp, in seconds since the Unix epoch
/// (`9999-12-31T23:59:59Z`).
pub const MAX_TIMESTAMP_SECONDS: i64 = 253_402_300_799;

/// Represents a Tern runtime value.
///
/// Values are cheap to clone: compound payloads are reference counted.
#[derive(Debug, Clone)]
pub enum Value {
    /// The `null` value.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer value.
    Int(i64),
    /// A 64-bit unsigned integer value.
    Uint(u64),
    /// A 64-bit IEEE double value.
    Double(f64),
    /// A string value.
    String(Arc<str>),
    /// A bytes value.
    Bytes(Arc<[u8]>),
    /// A duration value.
    Duration(TimeDelta),
    /// A timestamp value.
    Timestamp(DateTime<FixedOffset>),
    /// A list value.
    List(List),
    /// A map value.
    Map(Map),
    /// A message value.
    Message(Message),
    /// A type value, as produced by `type(x)`.
    Type(Type),
    /// An optional value, as produced by the `.?` and `[?]` forms.
    Optional(OptionalValue),
    /// A marker for an input deliberately left undetermined by the caller.
    Unknown(Unknown),
    /// A runtime error propagating as a value.
    Error(Arc<EvalError>),
}

impl Value {
    /// Creates a new error value.
    pub fn error(error: EvalError) -> Self {
        Self::Error(Arc::new(error))
    }

    /// Creates a new string value.
    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Self::String(value.into())
    }

    /// Creates a new bytes value.
    pub fn bytes(value: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(value.into())
    }

    /// Determines if the value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Determines if the value is an unknown marker.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// Gets the boolean payload of the value, if it is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the integer payload of the value, if it is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Gets the string payload of the value, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Gets the runtime type of the value.
    ///
    /// Containers are heterogeneous at runtime, so lists and maps report
    /// `dyn` parameters.
    pub fn ty(&self) -> Type {
        match self {
            Self::Null => Type::Null,
            Self::Bool(_) => Type::Primitive(PrimitiveTypeKind::Bool),
            Self::Int(_) => Type::Primitive(PrimitiveTypeKind::Int),
            Self::Uint(_) => Type::Primitive(PrimitiveTypeKind::Uint),
            Self::Double(_) => Type::Primitive(PrimitiveTypeKind::Double),
            Self::String(_) => Type::Primitive(PrimitiveTypeKind::String),
            Self::Bytes(_) => Type::Primitive(PrimitiveTypeKind::Bytes),
            Self::Duration(_) => Type::Duration,
            Self::Timestamp(_) => Type::Timestamp,
            Self::List(_) => Type::list(Type::Dyn),
            Self::Map(_) => Type::map(Type::Dyn, Type::Dyn),
            Self::Message(message) => Type::Message(message.name.clone()),
            Self::Type(ty) => Type::type_of(ty.clone()),
            Self::Optional(optional) => Type::optional(
                optional
                    .value()
                    .map(|value| value.ty())
                    .unwrap_or(Type::Dyn),
            ),
            Self::Unknown(_) => Type::Dyn,
            Self::Error(_) => Type::Error,
        }
    }

    /// Determines if the value is an instance of the given type.
    ///
    /// This is the runtime counterpart of static assignability and is used
    /// for message construction and runtime overload dispatch over `dyn`.
    pub fn is_instance_of(&self, ty: &Type) -> bool {
        match (self, ty) {
            (_, Type::Dyn | Type::Error | Type::Any | Type::TypeParam(_)) => true,
            (Self::Error(_) | Self::Unknown(_), _) => false,
            (Self::Null, ty) => ty.accepts_null(),
            (Self::Bool(_), Type::Primitive(PrimitiveTypeKind::Bool)) => true,
            (Self::Int(_), Type::Primitive(PrimitiveTypeKind::Int)) => true,
            (Self::Uint(_), Type::Primitive(PrimitiveTypeKind::Uint)) => true,
            (Self::Double(_), Type::Primitive(PrimitiveTypeKind::Double)) => true,
            (Self::String(_), Type::Primitive(PrimitiveTypeKind::String)) => true,
            (Self::Bytes(_), Type::Primitive(PrimitiveTypeKind::Bytes)) => true,
            (Self::Bool(_), Type::Wrapper(PrimitiveTypeKind::Bool)) => true,
            (Self::Int(_), Type::Wrapper(PrimitiveTypeKind::Int)) => true,
            (Self::Uint(_), Type::Wrapper(PrimitiveTypeKind::Uint)) => true,
            (Self::Double(_), Type::Wrapper(PrimitiveTypeKind::Double)) => true,
            (Self::String(_), Type::Wrapper(PrimitiveTypeKind::String)) => true,
            (Self::Bytes(_), Type::Wrapper(PrimitiveTypeKind::Bytes)) => true,
            (Self::Duration(_), Type::Duration) => true,
            (Self::Timestamp(_), Type::Timestamp) => true,
            (
                Self::Null
                | Self::Bool(_)
                | Self::Int(_)
                | Self::Uint(_)
                | Self::Double(_)
                | Self::String(_)
                | Self::List(_)
                | Self::Map(_),
                Type::Json,
            ) => true,
            (Self::List(list), Type::List(element)) => {
                element.is_dyn() || list.iter().all(|value| value.is_instance_of(element))
            }
            (Self::Map(map), Type::Map(map_ty)) => {
                map.iter().all(|(key, value)| {
                    key.to_value().is_instance_of(map_ty.key_type())
                        && value.is_instance_of(map_ty.value_type())
                })
            }
            (Self::Message(message), Type::Message(name)) => *message.name == **name,
            (Self::Type(_), Type::Type(_)) => true,
            (Self::Optional(optional), Type::Optional(inner)) => match optional.value() {
                Some(value) => value.is_instance_of(inner),
                None => true,
            },
            _ => false,
        }
    }

    /// Compares the value to another for equality.
    ///
    /// Numeric values of distinct kinds compare by mathematical value when
    /// finite; NaN is never equal to anything, including itself. Values of
    /// otherwise distinct kinds are unequal. Errors and unknowns propagate,
    /// with errors dominating unknowns.
    pub fn equals(&self, other: &Self) -> Self {
        if let Some(propagated) = propagate(self, other) {
            return propagated;
        }

        match (self, other) {
            (Self::Null, Self::Null) => Self::Bool(true),
            (Self::Bool(a), Self::Bool(b)) => Self::Bool(a == b),
            (Self::String(a), Self::String(b)) => Self::Bool(a == b),
            (Self::Bytes(a), Self::Bytes(b)) => Self::Bool(a == b),
            (Self::Duration(a), Self::Duration(b)) => Self::Bool(a == b),
            (Self::Timestamp(a), Self::Timestamp(b)) => Self::Bool(a == b),
            (Self::Type(a), Self::Type(b)) => Self::Bool(a == b),
            (
                Self::Int(_) | Self::Uint(_) | Self::Double(_),
                Self::Int(_) | Self::Uint(_) | Self::Double(_),
            ) => Self::Bool(numeric_compare(self, other) == Some(Ordering::Equal)),
            (Self::List(a), Self::List(b)) => {
                if a.len() != b.len() {
                    return Self::Bool(false);
                }

                for (x, y) in a.iter().zip(b.iter()) {
                    match x.equals(y) {
                        Self::Bool(true) => {}
                        other => return other,
                    }
                }

                Self::Bool(true)
            }
            (Self::Map(a), Self::Map(b)) => {
                if a.len() != b.len() {
                    return Self::Bool(false);
                }

                for (key, x) in a.iter() {
                    let Some(y) = b.get(key) else {
                        return Self::Bool(false);
                    };
                    match x.equals(y) {
                        Self::Bool(true) => {}
                        other => return other,
                    }
                }

                Self::Bool(true)
            }
            (Self::Message(a), Self::Message(b)) => {
                if a.name != b.name || a.fields.len() != b.fields.len() {
                    return Self::Bool(false);
                }

                for (name, x) in a.fields.iter() {
                    let Some(y) = b.fields.get(name) else {
                        return Self::Bool(false);
                    };
                    match x.equals(y) {
                        Self::Bool(true) => {}
                        other => return other,
                    }
                }

                Self::Bool(true)
            }
            (Self::Optional(a), Self::Optional(b)) => match (a.value(), b.value()) {
                (None, None) => Self::Bool(true),
                (Some(x), Some(y)) => x.equals(y),
                _ => Self::Bool(false),
            },
            _ => Self::Bool(false),
        }
    }

    /// Compares the value to another for ordering.
    ///
    /// Numeric values of distinct kinds compare by mathematical value. A
    /// NaN operand is an error for ordered comparison. Values that do not
    /// support ordering yield an error.
    pub fn compare(&self, other: &Self) -> Result<Ordering, Self> {
        if let Some(propagated) = propagate(self, other) {
            return Err(propagated);
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Ok(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Ok(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Ok(a.cmp(b)),
            (Self::Duration(a), Self::Duration(b)) => Ok(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Ok(a.cmp(b)),
            (
                Self::Int(_) | Self::Uint(_) | Self::Double(_),
                Self::Int(_) | Self::Uint(_) | Self::Double(_),
            ) => numeric_compare(self, other)
                .ok_or_else(|| Self::error(error::nan_comparison())),
            _ => Err(Self::error(error::no_such_overload())),
        }
    }

    /// Adds another value to this value.
    ///
    /// Integer addition is overflow-checked; string, bytes, and list
    /// addition concatenate; duration and timestamp addition is
    /// range-checked.
    pub fn add(&self, other: &Self) -> Self {
        if let Some(propagated) = propagate(self, other) {
            return propagated;
        }

        match (self, other) {
            (Self::Int(a), Self::Int(b)) => match a.checked_add(*b) {
                Some(value) => Self::Int(value),
                None => Self::error(error::integer_overflow()),
            },
            (Self::Uint(a), Self::Uint(b)) => match a.checked_add(*b) {
                Some(value) => Self::Uint(value),
                None => Self::error(error::unsigned_overflow()),
            },
            (Self::Double(a), Self::Double(b)) => Self::Double(a + b),
            (Self::String(a), Self::String(b)) => {
                let mut value = String::with_capacity(a.len() + b.len());
                value.push_str(a);
                value.push_str(b);
                Self::string(value)
            }
            (Self::Bytes(a), Self::Bytes(b)) => {
                let mut value = Vec::with_capacity(a.len() + b.len());
                value.extend_from_slice(a);
                value.extend_from_slice(b);
                Self::bytes(value)
            }
            (Self::List(a), Self::List(b)) => Self::List(List::concat(a.clone(), b.clone())),
            (Self::Duration(a), Self::Duration(b)) => match a.checked_add(b) {
                Some(value) => check_duration(value),
                None => Self::error(error::duration_overflow()),
            },
            (Self::Timestamp(a), Self::Duration(b)) | (Self::Duration(b), Self::Timestamp(a)) => {
                match a.checked_add_signed(*b) {
                    Some(value) => check_timestamp(value),
                    None => Self::error(error::timestamp_overflow()),
                }
            }
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Subtracts another value from this value.
    pub fn subtract(&self, other: &Self) -> Self {
        if let Some(propagated) = propagate(self, other) {
            return propagated;
        }

        match (self, other) {
            (Self::Int(a), Self::Int(b)) => match a.checked_sub(*b) {
                Some(value) => Self::Int(value),
                None => Self::error(error::integer_overflow()),
            },
            (Self::Uint(a), Self::Uint(b)) => match a.checked_sub(*b) {
                Some(value) => Self::Uint(value),
                None => Self::error(error::unsigned_overflow()),
            },
            (Self::Double(a), Self::Double(b)) => Self::Double(a - b),
            (Self::Duration(a), Self::Duration(b)) => match a.checked_sub(b) {
                Some(value) => check_duration(value),
                None => Self::error(error::duration_overflow()),
            },
            (Self::Timestamp(a), Self::Duration(b)) => match a.checked_sub_signed(*b) {
                Some(value) => check_timestamp(value),
                None => Self::error(error::timestamp_overflow()),
            },
            (Self::Timestamp(a), Self::Timestamp(b)) => {
                check_duration(a.signed_duration_since(*b))
            }
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Multiplies this value by another value.
    pub fn multiply(&self, other: &Self) -> Self {
        if let Some(propagated) = propagate(self, other) {
            return propagated;
        }

        match (self, other) {
            (Self::Int(a), Self::Int(b)) => match a.checked_mul(*b) {
                Some(value) => Self::Int(value),
                None => Self::error(error::integer_overflow()),
            },
            (Self::Uint(a), Self::Uint(b)) => match a.checked_mul(*b) {
                Some(value) => Self::Uint(value),
                None => Self::error(error::unsigned_overflow()),
            },
            (Self::Double(a), Self::Double(b)) => Self::Double(a * b),
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Divides this value by another value.
    ///
    /// Integer division by zero and `i64::MIN / -1` are errors; double
    /// division follows IEEE semantics.
    pub fn divide(&self, other: &Self) -> Self {
        if let Some(propagated) = propagate(self, other) {
            return propagated;
        }

        match (self, other) {
            (Self::Int(_), Self::Int(0)) => Self::error(error::division_by_zero()),
            (Self::Int(a), Self::Int(b)) => match a.checked_div(*b) {
                Some(value) => Self::Int(value),
                None => Self::error(error::integer_overflow()),
            },
            (Self::Uint(_), Self::Uint(0)) => Self::error(error::division_by_zero()),
            (Self::Uint(a), Self::Uint(b)) => Self::Uint(a / b),
            (Self::Double(a), Self::Double(b)) => Self::Double(a / b),
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Computes the remainder of dividing this value by another value.
    pub fn remainder(&self, other: &Self) -> Self {
        if let Some(propagated) = propagate(self, other) {
            return propagated;
        }

        match (self, other) {
            (Self::Int(_), Self::Int(0)) => Self::error(error::modulus_by_zero()),
            (Self::Int(a), Self::Int(b)) => match a.checked_rem(*b) {
                Some(value) => Self::Int(value),
                None => Self::error(error::integer_overflow()),
            },
            (Self::Uint(_), Self::Uint(0)) => Self::error(error::modulus_by_zero()),
            (Self::Uint(a), Self::Uint(b)) => Self::Uint(a % b),
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Negates this value.
    ///
    /// Negating `i64::MIN` is an error.
    pub fn negate(&self) -> Self {
        match self {
            Self::Error(_) | Self::Unknown(_) => self.clone(),
            Self::Int(value) => match value.checked_neg() {
                Some(value) => Self::Int(value),
                None => Self::error(error::integer_overflow()),
            },
            Self::Double(value) => Self::Double(-value),
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Determines if this container value contains the given value.
    ///
    /// For lists, membership uses the equality relation; for maps, the
    /// value is converted to a key and looked up.
    pub fn contains(&self, item: &Self) -> Self {
        if let Some(propagated) = propagate(self, item) {
            return propagated;
        }

        match self {
            Self::List(list) => {
                let mut pending: Option<Self> = None;
                for element in list.iter() {
                    match item.equals(element) {
                        Self::Bool(true) => return Self::Bool(true),
                        Self::Bool(false) => {}
                        other => {
                            // Errors dominate unknowns in the pending slot
                            pending = match (pending.take(), other) {
                                (Some(e @ Self::Error(_)), _) => Some(e),
                                (_, e) => Some(e),
                            };
                        }
                    }
                }

                pending.unwrap_or(Self::Bool(false))
            }
            Self::Map(map) => match MapKey::from_value(item) {
                Ok(key) => Self::Bool(map.get(&key).is_some()),
                Err(error) => error,
            },
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Gets the size of this value.
    ///
    /// String size is counted in characters; bytes, list, and map sizes in
    /// elements.
    pub fn size(&self) -> Self {
        match self {
            Self::Error(_) | Self::Unknown(_) => self.clone(),
            Self::String(value) => Self::Int(value.chars().count() as i64),
            Self::Bytes(value) => Self::Int(value.len() as i64),
            Self::List(list) => Self::Int(list.len() as i64),
            Self::Map(map) => Self::Int(map.len() as i64),
            _ => Self::error(error::no_such_overload()),
        }
    }

    /// Converts a JSON value into a Tern value.
    ///
    /// Integral numbers convert to `int`/`uint`; other numbers convert to
    /// `double`; objects convert to string-keyed maps.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(v) => Self::Bool(*v),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Self::Int(v)
                } else if let Some(v) = n.as_u64() {
                    Self::Uint(v)
                } else {
                    Self::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(v) => Self::string(v.as_str()),
            serde_json::Value::Array(values) => {
                Self::List(List::new(values.iter().map(Self::from_json).collect()))
            }
            serde_json::Value::Object(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(MapKey::String(key.as_str().into()), Self::from_json(value));
                }

                Self::Map(Map::new(map))
            }
        }
    }

    /// Converts this value into a JSON value.
    ///
    /// Bytes encode as base64 strings; timestamps as RFC 3339 strings;
    /// durations as their seconds rendering. Errors, unknowns, and type
    /// values are not representable.
    pub fn to_json(&self) -> Result<serde_json::Value, EvalError> {
        match self {
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(v) => Ok(serde_json::Value::Bool(*v)),
            Self::Int(v) => Ok(serde_json::Value::Number((*v).into())),
            Self::Uint(v) => Ok(serde_json::Value::Number((*v).into())),
            Self::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    error::conversion(format!("cannot convert `{v}` to a JSON number"))
                }),
            Self::String(v) => Ok(serde_json::Value::String(v.to_string())),
            Self::Bytes(v) => Ok(serde_json::Value::String(BASE64.encode(v))),
            Self::Duration(_) | Self::Timestamp(_) => {
                Ok(serde_json::Value::String(self.to_string()))
            }
            Self::List(list) => Ok(serde_json::Value::Array(
                list.iter()
                    .map(|value| value.to_json())
                    .collect::<Result<_, _>>()?,
            )),
            Self::Map(map) => {
                let mut object = serde_json::Map::with_capacity(map.len());
                for (key, value) in map.iter() {
                    object.insert(key.to_string(), value.to_json()?);
                }

                Ok(serde_json::Value::Object(object))
            }
            Self::Message(message) => {
                let mut object = serde_json::Map::with_capacity(message.fields.len());
                for (name, value) in message.fields.iter() {
                    object.insert(name.clone(), value.to_json()?);
                }

                Ok(serde_json::Value::Object(object))
            }
            Self::Optional(optional) => match optional.value() {
                Some(value) => value.to_json(),
                None => Ok(serde_json::Value::Null),
            },
            Self::Type(_) | Self::Unknown(_) | Self::Error(_) => Err(error::conversion(
                format!("value of type `{ty}` is not representable as JSON", ty = self.ty()),
            )),
        }
    }
}

/// Propagates error and unknown operands, with errors dominating unknowns.
///
/// Returns `None` when both operands are determined.
fn propagate(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (e @ Value::Error(_), _) => Some(e.clone()),
        (_, e @ Value::Error(_)) => Some(e.clone()),
        (Value::Unknown(x), Value::Unknown(y)) => Some(Value::Unknown(x.merge(y))),
        (u @ Value::Unknown(_), _) => Some(u.clone()),
        (_, u @ Value::Unknown(_)) => Some(u.clone()),
        _ => None,
    }
}

/// Compares two numeric values of possibly distinct kinds by mathematical
/// value.
///
/// Returns `None` if either operand is NaN.
fn numeric_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Uint(b)) => Some(compare_int_uint(*a, *b)),
        (Value::Uint(a), Value::Int(b)) => Some(compare_int_uint(*b, *a).reverse()),
        (Value::Int(a), Value::Double(b)) => compare_int_double(*a, *b),
        (Value::Double(a), Value::Int(b)) => compare_int_double(*b, *a).map(Ordering::reverse),
        (Value::Uint(a), Value::Double(b)) => compare_uint_double(*a, *b),
        (Value::Double(a), Value::Uint(b)) => compare_uint_double(*b, *a).map(Ordering::reverse),
        _ => None,
    }
}

/// Compares a signed integer to an unsigned integer.
fn compare_int_uint(a: i64, b: u64) -> Ordering {
    if a < 0 {
        return Ordering::Less;
    }

    (a as u64).cmp(&b)
}

/// Compares a signed integer to a double without losing precision.
fn compare_int_double(a: i64, b: f64) -> Option<Ordering> {
    if b.is_nan() {
        return None;
    }

    // 2^63 and -2^63 are exactly representable
    if b >= 9_223_372_036_854_775_808.0 {
        return Some(Ordering::Less);
    }

    if b < -9_223_372_036_854_775_808.0 {
        return Some(Ordering::Greater);
    }

    let truncated = b.trunc();
    match a.cmp(&(truncated as i64)) {
        Ordering::Equal => {
            if b == truncated {
                Some(Ordering::Equal)
            } else if b > truncated {
                Some(Ordering::Less)
            } else {
                Some(Ordering::Greater)
            }
        }
        other => Some(other),
    }
}

/// Compares an unsigned integer to a double without losing precision.
fn compare_uint_double(a: u64, b: f64) -> Option<Ordering> {
    if b.is_nan() {
        return None;
    }

    // 2^64 is exactly representable
    if b >= 18_446_744_073_709_551_616.0 {
        return Some(Ordering::Less);
    }

    if b < 0.0 {
        return Some(Ordering::Greater);
    }

    let truncated = b.trunc();
    match a.cmp(&(truncated as u64)) {
        Ordering::Equal => {
            if b == truncated {
                Some(Ordering::Equal)
            } else if b > truncated {
                Some(Ordering::Less)
            } else {
                Some(Ordering::Greater)
            }
        }
        other => Some(other),
    }
}

/// Validates that a duration is within the supported range.
pub(crate) fn check_duration(value: TimeDelta) -> Value {
    let seconds = value.num_seconds();
    if !(-MAX_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&seconds) {
        return Value::error(error::duration_overflow());
    }

    Value::Duration(value)
}

/// Validates that a timestamp is within the supported range.
pub(crate) fn check_timestamp(value: DateTime<FixedOffset>) -> Value {
    let seconds = value.timestamp();
    if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&seconds) {
        return Value::error(error::timestamp_overflow());
    }

    Value::Timestamp(value)
}

/// Gets the default value for an unset message field of the given type.
///
/// Scalars default to their kind's zero value; lists and maps to empty
/// containers; wrappers, messages, and well-known types to `null`.
pub fn default_value(ty: &Type) -> Value {
    match ty {
        Type::Primitive(PrimitiveTypeKind::Bool) => Value::Bool(false),
        Type::Primitive(PrimitiveTypeKind::Int) => Value::Int(0),
        Type::Primitive(PrimitiveTypeKind::Uint) => Value::Uint(0),
        Type::Primitive(PrimitiveTypeKind::Double) => Value::Double(0.0),
        Type::Primitive(PrimitiveTypeKind::String) => Value::string(""),
        Type::Primitive(PrimitiveTypeKind::Bytes) => Value::bytes(Vec::new()),
        Type::List(_) => Value::List(List::empty()),
        Type::Map(_) => Value::Map(Map::new(IndexMap::new())),
        _ => Value::Null,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Bytes(v) => {
                write!(f, "b\"")?;
                for byte in v.iter() {
                    write!(f, "{}", std::ascii::escape_default(*byte))?;
                }
                write!(f, "\"")
            }
            Self::Duration(v) => write!(f, "{}", format_duration(*v)),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::List(v) => write!(f, "[{}]", v.iter().format(", ")),
            Self::Map(v) => write!(
                f,
                "{{{}}}",
                v.iter()
                    .map(|(key, value)| format!("{key}: {value}"))
                    .format(", ")
            ),
            Self::Message(v) => write!(
                f,
                "{name}{{{fields}}}",
                name = v.name,
                fields = v
                    .fields
                    .iter()
                    .map(|(field, value)| format!("{field}: {value}"))
                    .format(", ")
            ),
            Self::Type(v) => write!(f, "{v}"),
            Self::Optional(v) => match v.value() {
                Some(value) => write!(f, "optional({value})"),
                None => write!(f, "optional.none"),
            },
            Self::Unknown(_) => write!(f, "unknown"),
            Self::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Formats a duration as seconds with an optional fractional part.
pub(crate) fn format_duration(value: TimeDelta) -> String {
    let seconds = value.num_seconds();
    let nanos = value.subsec_nanos();
    if nanos == 0 {
        format!("{seconds}s")
    } else {
        let total = seconds as f64 + nanos as f64 / 1_000_000_000.0;
        format!("{total}s")
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::bytes(value)
    }
}

impl From<EvalError> for Value {
    fn from(value: EvalError) -> Self {
        Self::error(value)
    }
}

impl TryFrom<&Value> for bool {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(v) => Ok(*v),
            _ => bail_conversion(value, "bool"),
        }
    }
}

impl TryFrom<&Value> for i64 {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int(v) => Ok(*v),
            _ => bail_conversion(value, "i64"),
        }
    }
}

impl TryFrom<&Value> for u64 {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Uint(v) => Ok(*v),
            _ => bail_conversion(value, "u64"),
        }
    }
}

impl TryFrom<&Value> for f64 {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Double(v) => Ok(*v),
            _ => bail_conversion(value, "f64"),
        }
    }
}

impl TryFrom<&Value> for String {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(v) => Ok(v.to_string()),
            _ => bail_conversion(value, "String"),
        }
    }
}

/// Produces the error for an unsupported host conversion.
fn bail_conversion<T>(value: &Value, target: &str) -> anyhow::Result<T> {
    anyhow::bail!(
        "cannot convert value of type `{ty}` to `{target}`",
        ty = value.ty()
    )
}

/// The interior of a list value.
#[derive(Debug)]
enum ListInner {
    /// The list owns its elements directly.
    Concrete(Vec<Value>),
    /// The list is a lazy concatenation view over two lists.
    ///
    /// The view preserves element identity and materializes nothing;
    /// random access walks the view and iteration is restartable.
    Concat {
        /// The left operand.
        left: List,
        /// The right operand.
        right: List,
        /// The total length, cached for O(1) size queries.
        len: usize,
    },
}

/// Represents a list value.
///
/// Lists are ordered, zero-indexed, possibly heterogeneous, and cheap to
/// clone. Concatenation produces a lazy view; see [`List::concat`].
#[derive(Debug, Clone)]
pub struct List(Arc<ListInner>);

impl List {
    /// Creates a new list from the given values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(Arc::new(ListInner::Concrete(values)))
    }

    /// Creates a new, empty list.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Concatenates two lists into a lazy view.
    ///
    /// Concatenation is associative and does not copy elements.
    pub fn concat(left: List, right: List) -> Self {
        let len = left.len() + right.len();
        Self(Arc::new(ListInner::Concat { left, right, len }))
    }

    /// Gets the length of the list.
    pub fn len(&self) -> usize {
        match &*self.0 {
            ListInner::Concrete(values) => values.len(),
            ListInner::Concat { len, .. } => *len,
        }
    }

    /// Determines if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets an element of the list by index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        let mut list = self;
        let mut index = index;
        loop {
            match &*list.0 {
                ListInner::Concrete(values) => return values.get(index),
                ListInner::Concat { left, right, .. } => {
                    if index < left.len() {
                        list = left;
                    } else {
                        index -= left.len();
                        list = right;
                    }
                }
            }
        }
    }

    /// Iterates the elements of the list in order.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter {
            stack: vec![self],
            front: [].iter(),
        }
    }
}

/// An iterator over the elements of a list.
///
/// The iterator walks concatenation views without materializing them.
#[derive(Debug)]
pub struct ListIter<'a> {
    /// The stack of pending lists, in reverse iteration order.
    stack: Vec<&'a List>,
    /// The iterator over the current concrete segment.
    front: std::slice::Iter<'a, Value>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.front.next() {
                return Some(value);
            }

            let list = self.stack.pop()?;
            match &*list.0 {
                ListInner::Concrete(values) => self.front = values.iter(),
                ListInner::Concat { left, right, .. } => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
    }
}

/// Represents a map key.
///
/// Keys are restricted to the hashable primitive kinds. Signed and unsigned
/// integer keys that are mathematically equal are the same key.
#[derive(Debug, Clone)]
pub enum MapKey {
    /// A boolean key.
    Bool(bool),
    /// A signed integer key.
    Int(i64),
    /// An unsigned integer key.
    Uint(u64),
    /// A string key.
    String(Arc<str>),
}

impl MapKey {
    /// Converts a value into a map key.
    ///
    /// Returns a propagatable error value for unsupported key types and
    /// propagates unknown keys.
    pub fn from_value(value: &Value) -> Result<Self, Value> {
        match value {
            Value::Bool(v) => Ok(Self::Bool(*v)),
            Value::Int(v) => Ok(Self::Int(*v)),
            Value::Uint(v) => Ok(Self::Uint(*v)),
            Value::String(v) => Ok(Self::String(v.clone())),
            Value::Error(_) | Value::Unknown(_) => Err(value.clone()),
            other => Err(Value::error(error::conversion(format!(
                "value of type `{ty}` cannot be a map key",
                ty = other.ty()
            )))),
        }
    }

    /// Converts the key back into a value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(v) => Value::Bool(*v),
            Self::Int(v) => Value::Int(*v),
            Self::Uint(v) => Value::Uint(*v),
            Self::String(v) => Value::String(v.clone()),
        }
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Uint(b)) | (Self::Uint(b), Self::Int(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            _ => false,
        }
    }
}

impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Nonnegative signed keys hash identically to unsigned keys so that
        // mathematically equal keys collide
        match self {
            Self::Bool(v) => {
                state.write_u8(0);
                v.hash(state);
            }
            Self::Int(v) if *v >= 0 => {
                state.write_u8(1);
                state.write_u64(*v as u64);
            }
            Self::Int(v) => {
                state.write_u8(2);
                state.write_i64(*v);
            }
            Self::Uint(v) => {
                state.write_u8(1);
                state.write_u64(*v);
            }
            Self::String(v) => {
                state.write_u8(3);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
        }
    }
}

/// Represents a map value.
///
/// Maps preserve insertion order, making iteration deterministic within an
/// evaluation. Maps are cheap to clone.
#[derive(Debug, Clone)]
pub struct Map(Arc<IndexMap<MapKey, Value>>);

impl Map {
    /// Creates a new map from the given entries.
    pub fn new(entries: IndexMap<MapKey, Value>) -> Self {
        Self(Arc::new(entries))
    }

    /// Gets a value of the map by key.
    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.0.get(key)
    }

    /// Gets the number of entries in the map.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Determines if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the entries of the map in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&MapKey, &Value)> {
        self.0.iter()
    }

    /// Iterates the keys of the map in insertion order.
    pub fn keys(&self) -> impl ExactSizeIterator<Item = &MapKey> {
        self.0.keys()
    }
}

/// Represents a message value.
///
/// A message holds only its explicitly-set fields; reading an unset field
/// goes through the registry schema for default-value semantics.
#[derive(Debug, Clone)]
pub struct Message {
    /// The fully-qualified name of the message type.
    name: Arc<str>,
    /// The explicitly-set fields of the message.
    fields: Arc<IndexMap<String, Value>>,
}

impl Message {
    /// Creates a new message value.
    pub fn new(name: impl Into<Arc<str>>, fields: IndexMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            fields: Arc::new(fields),
        }
    }

    /// Gets the fully-qualified name of the message type.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Gets an explicitly-set field of the message by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Determines if the given field is explicitly set.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates the explicitly-set fields of the message.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

/// Represents an optional value.
///
/// Optionals are produced by the presence-safe `.?` and `[?]` forms: a
/// present value is engaged, a missing field or key is absent.
#[derive(Debug, Clone)]
pub struct OptionalValue(Option<Arc<Value>>);

impl OptionalValue {
    /// Creates a new engaged optional holding the given value.
    pub fn of(value: Value) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Creates a new absent optional.
    pub fn none() -> Self {
        Self(None)
    }

    /// Determines if the optional holds a value.
    pub fn has_value(&self) -> bool {
        self.0.is_some()
    }

    /// Gets the held value, if any.
    pub fn value(&self) -> Option<&Value> {
        self.0.as_deref()
    }
}

/// Represents an unknown marker.
///
/// An unknown carries the trail of attribute names whose values were
/// deliberately left undetermined by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unknown {
    /// The attribute names that are unknown.
    attributes: Vec<Arc<str>>,
}

impl Unknown {
    /// Creates a new unknown for the given attribute name.
    pub fn new(attribute: impl Into<Arc<str>>) -> Self {
        Self {
            attributes: vec![attribute.into()],
        }
    }

    /// Gets the attribute names that are unknown.
    pub fn attributes(&self) -> &[Arc<str>] {
        &self.attributes
    }

    /// Merges two unknowns into one carrying both attribute trails.
    pub fn merge(&self, other: &Self) -> Self {
        let mut attributes = self.attributes.clone();
        for attribute in &other.attributes {
            if !attributes.contains(attribute) {
                attributes.push(attribute.clone());
            }
        }

        Self { attributes }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Asserts that a value is a boolean with the given payload.
    fn assert_bool(value: Value, expected: bool) {
        match value {
            Value::Bool(actual) => assert_eq!(actual, expected),
            other => panic!("expected a boolean, found {other:?}"),
        }
    }

    #[test]
    fn cross_numeric_equality_uses_mathematical_value() {
        assert_bool(Value::Int(1).equals(&Value::Uint(1)), true);
        assert_bool(Value::Int(1).equals(&Value::Double(1.0)), true);
        assert_bool(Value::Uint(2).equals(&Value::Double(2.5)), false);
        assert_bool(Value::Int(-1).equals(&Value::Uint(u64::MAX)), false);
        // 2^63 is not representable as i64; it must not wrap around
        assert_bool(
            Value::Int(i64::MAX).equals(&Value::Double(9_223_372_036_854_775_808.0)),
            false,
        );
    }

    #[test]
    fn nan_is_never_equal() {
        assert_bool(Value::Double(f64::NAN).equals(&Value::Double(f64::NAN)), false);
        assert_bool(Value::Double(f64::NAN).equals(&Value::Int(1)), false);
    }

    #[test]
    fn nan_comparison_is_an_error() {
        let result = Value::Double(f64::NAN).compare(&Value::Int(1));
        match result {
            Err(Value::Error(e)) => assert_eq!(e.message(), "NaN comparison"),
            other => panic!("expected a NaN comparison error, found {other:?}"),
        }
    }

    #[test]
    fn mismatched_kinds_are_unequal() {
        assert_bool(Value::string("a").equals(&Value::Int(1)), false);
        assert_bool(Value::Null.equals(&Value::Bool(false)), false);
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let result = Value::Int(i64::MAX).add(&Value::Int(1));
        match result {
            Value::Error(e) => assert_eq!(e.message(), "integer overflow"),
            other => panic!("expected an overflow error, found {other:?}"),
        }

        let result = Value::Int(i64::MIN).negate();
        assert!(result.is_error());

        let result = Value::Uint(0).subtract(&Value::Uint(1));
        match result {
            Value::Error(e) => assert_eq!(e.message(), "unsigned integer overflow"),
            other => panic!("expected an overflow error, found {other:?}"),
        }
    }

    #[test]
    fn double_arithmetic_follows_ieee() {
        use approx::assert_relative_eq;

        match Value::Double(0.1).add(&Value::Double(0.2)) {
            Value::Double(v) => assert_relative_eq!(v, 0.3, epsilon = 1e-12),
            other => panic!("expected a double, found {other:?}"),
        }

        match Value::Double(1.0).subtract(&Value::Double(0.75)) {
            Value::Double(v) => assert_relative_eq!(v, 0.25),
            other => panic!("expected a double, found {other:?}"),
        }
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let result = Value::Int(1).divide(&Value::Int(0));
        match result {
            Value::Error(e) => assert_eq!(e.message(), "division by zero"),
            other => panic!("expected a division error, found {other:?}"),
        }

        // Double division follows IEEE semantics
        match Value::Double(1.0).divide(&Value::Double(0.0)) {
            Value::Double(v) => assert!(v.is_infinite()),
            other => panic!("expected an infinite double, found {other:?}"),
        }
    }

    #[test]
    fn errors_dominate_unknowns() {
        let error = Value::error(error::division_by_zero());
        let unknown = Value::Unknown(Unknown::new("x"));
        assert!(error.add(&unknown).is_error());
        assert!(unknown.add(&error).is_error());
        assert!(unknown.add(&Value::Int(1)).is_unknown());
    }

    #[test]
    fn list_concatenation_is_lazy_and_associative() {
        let a = List::new(vec![Value::Int(1)]);
        let b = List::new(vec![Value::Int(2)]);
        let c = List::new(vec![Value::Int(3)]);

        let left = List::concat(List::concat(a.clone(), b.clone()), c.clone());
        let right = List::concat(a, List::concat(b, c));

        assert_eq!(left.len(), 3);
        assert_bool(
            Value::List(left.clone()).equals(&Value::List(right)),
            true,
        );

        // Random access walks the view
        assert_bool(left.get(2).unwrap().equals(&Value::Int(3)), true);
        assert!(left.get(3).is_none());
    }

    #[test]
    fn map_keys_unify_across_numeric_kinds() {
        let mut entries = IndexMap::new();
        entries.insert(MapKey::Int(1), Value::string("one"));
        let map = Map::new(entries);

        assert!(map.get(&MapKey::Uint(1)).is_some());
        assert!(map.get(&MapKey::Uint(2)).is_none());
        assert!(map.get(&MapKey::Int(-1)).is_none());
    }

    #[test]
    fn map_equality_ignores_insertion_order() {
        let mut a = IndexMap::new();
        a.insert(MapKey::String("x".into()), Value::Int(1));
        a.insert(MapKey::String("y".into()), Value::Int(2));

        let mut b = IndexMap::new();
        b.insert(MapKey::String("y".into()), Value::Int(2));
        b.insert(MapKey::String("x".into()), Value::Int(1));

        assert_bool(Value::Map(Map::new(a)).equals(&Value::Map(Map::new(b))), true);
    }

    #[test]
    fn duration_arithmetic_is_range_checked() {
        let max = TimeDelta::new(MAX_DURATION_SECONDS, 0).unwrap();
        let result = Value::Duration(max).add(&Value::Duration(TimeDelta::new(1, 0).unwrap()));
        match result {
            Value::Error(e) => assert_eq!(e.message(), "duration overflow"),
            other => panic!("expected a duration overflow, found {other:?}"),
        }
    }

    #[test]
    fn json_round_trips_structured_values() {
        let json = serde_json::json!({"a": [1, 2.5, "three"], "b": null});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json().unwrap(), json);
    }
}
