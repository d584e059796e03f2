//! Type-safe extraction of flag values from the untyped JSON returned by the remote store.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, FlagValueType, Result};

/// How a non-boolean remote value is converted when a boolean is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BooleanCastStrategy {
    /// Only JSON booleans are accepted. Anything else is a coercion error.
    Strict,
    /// Truthy conversion of strings, numbers and `null`.
    #[default]
    Lax,
}

/// A flag value after coercion to a [`FlagValueType`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    /// A `BOOLEAN` flag.
    Boolean(bool),
    /// `None` when the flag is disabled on the remote store.
    String(Option<String>),
    /// Both `INTEGER` and `DOUBLE` flags are represented as `f64`.
    Number(Option<f64>),
    /// An `OBJECT` flag, parsed from its JSON payload.
    Object(Option<Value>),
}

/// Coerce a raw remote value to `value_type`.
///
/// `null` stands for a disabled non-boolean flag and is preserved as `None`.
pub fn coerce(
    value_type: FlagValueType,
    raw: &Value,
    boolean_cast: BooleanCastStrategy,
) -> Result<FlagValue> {
    match value_type {
        FlagValueType::Boolean => cast_boolean(raw, boolean_cast).map(FlagValue::Boolean),
        FlagValueType::String => Ok(FlagValue::String(match raw {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
                Some(raw.to_string())
            }
        })),
        FlagValueType::Integer => cast_number(raw, value_type).map(FlagValue::Number),
        FlagValueType::Double => cast_number(raw, value_type).map(FlagValue::Number),
        FlagValueType::Object => match raw {
            Value::Null => Ok(FlagValue::Object(None)),
            Value::String(payload) => serde_json::from_str(payload)
                .map(|parsed| FlagValue::Object(Some(parsed)))
                .map_err(Error::invalid_json),
            _ => Ok(FlagValue::Object(Some(raw.clone()))),
        },
    }
}

fn cast_boolean(raw: &Value, strategy: BooleanCastStrategy) -> Result<bool> {
    let invalid = || Error::InvalidType {
        expected: FlagValueType::Boolean,
        found: json_type_name(raw).to_owned(),
    };

    match (raw, strategy) {
        (Value::Bool(b), _) => Ok(*b),
        (_, BooleanCastStrategy::Strict) => Err(invalid()),
        (Value::Null, BooleanCastStrategy::Lax) => Ok(false),
        (Value::Number(n), BooleanCastStrategy::Lax) => {
            Ok(n.as_f64().map_or(false, |n| n != 0.0))
        }
        (Value::String(s), BooleanCastStrategy::Lax) => match s.trim().to_ascii_lowercase().as_str()
        {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            _ => Err(invalid()),
        },
        (Value::Array(_) | Value::Object(_), BooleanCastStrategy::Lax) => Err(invalid()),
    }
}

fn cast_number(raw: &Value, value_type: FlagValueType) -> Result<Option<f64>> {
    let number = match raw {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() && (value_type != FlagValueType::Integer || n.fract() == 0.0) => {
            Ok(Some(n))
        }
        _ => Err(Error::InvalidType {
            expected: value_type,
            found: json_type_name(raw).to_owned(),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalize a configured default value so that it agrees with `value_type`. Returns `None` if
/// the value cannot represent `value_type`.
///
/// Object defaults may be given either as a JSON value or as a string holding JSON.
pub(crate) fn normalize_default(value_type: FlagValueType, value: Value) -> Option<Value> {
    match value_type {
        FlagValueType::Boolean => value.is_boolean().then_some(value),
        FlagValueType::String => value.is_string().then_some(value),
        FlagValueType::Integer => {
            let n = value.as_f64()?;
            (n.fract() == 0.0).then_some(value)
        }
        FlagValueType::Double => value.is_number().then_some(value),
        FlagValueType::Object => match value {
            Value::String(payload) => serde_json::from_str(&payload).ok(),
            other => Some(other),
        },
    }
}

/// A default value coerced once for every type slot, so it can be served whatever type the
/// caller asks for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefaultSlots {
    /// Served to boolean getters. `false` when the default is not truthy.
    pub boolean: bool,
    /// Served to string getters.
    pub string: Option<String>,
    /// Served to number getters.
    pub number: Option<f64>,
    /// Served to object getters.
    pub object: Option<Value>,
}

impl DefaultSlots {
    /// Coerce `default` once per slot. Slots the default cannot represent are empty.
    pub fn from_default(default: Option<&Value>) -> DefaultSlots {
        let Some(default) = default else {
            return DefaultSlots::default();
        };

        DefaultSlots {
            boolean: cast_boolean(default, BooleanCastStrategy::Lax).unwrap_or(false),
            string: match coerce(FlagValueType::String, default, BooleanCastStrategy::Lax) {
                Ok(FlagValue::String(s)) => s,
                _ => None,
            },
            number: cast_number(default, FlagValueType::Double).ok().flatten(),
            object: match default {
                Value::Null => None,
                other => Some(other.clone()),
            },
        }
    }

    /// The default as the store would have returned it for a flag of `value_type`.
    pub fn to_raw(&self, value_type: FlagValueType) -> Value {
        match value_type {
            FlagValueType::Boolean => Value::Bool(self.boolean),
            FlagValueType::String => self.string.clone().map_or(Value::Null, Value::String),
            FlagValueType::Integer | FlagValueType::Double => {
                self.number.map_or(Value::Null, Value::from)
            }
            // Object payloads travel as JSON strings.
            FlagValueType::Object => self
                .object
                .as_ref()
                .map_or(Value::Null, |object| Value::String(object.to_string())),
        }
    }

    /// The slot for `T`.
    pub fn get<T: TypedValue>(&self) -> T {
        T::from_defaults(self)
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for bool {}
    impl Sealed for Option<String> {}
    impl Sealed for Option<f64> {}
    impl Sealed for Option<serde_json::Value> {}
}

/// Rust types flag values can be extracted into.
///
/// This trait is sealed. It is implemented for `bool`, `Option<String>`, `Option<f64>` and
/// `Option<serde_json::Value>`.
pub trait TypedValue: private::Sealed + Sized + Clone + std::fmt::Debug + Send + 'static {
    /// Type to coerce the remote value to, given the type configured for the flag.
    fn coercion_type(configured: FlagValueType) -> FlagValueType;

    /// Unwrap a coerced value. `None` if it holds another type.
    fn from_flag_value(value: FlagValue) -> Option<Self>;

    /// Pick the matching default slot.
    fn from_defaults(defaults: &DefaultSlots) -> Self;

    /// Value reported for flags that are not in the registry.
    fn not_found() -> Self;

    /// Whether this value means "the flag is disabled".
    fn is_disabled(&self) -> bool;

    /// Rendering of the value for logs and metadata.
    fn to_metadata_string(&self) -> String;
}

impl TypedValue for bool {
    fn coercion_type(_configured: FlagValueType) -> FlagValueType {
        FlagValueType::Boolean
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    fn from_defaults(defaults: &DefaultSlots) -> Self {
        defaults.boolean
    }

    fn not_found() -> Self {
        false
    }

    fn is_disabled(&self) -> bool {
        !*self
    }

    fn to_metadata_string(&self) -> String {
        self.to_string()
    }
}

impl TypedValue for Option<String> {
    fn coercion_type(_configured: FlagValueType) -> FlagValueType {
        FlagValueType::String
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn from_defaults(defaults: &DefaultSlots) -> Self {
        defaults.string.clone()
    }

    fn not_found() -> Self {
        Some(String::new())
    }

    fn is_disabled(&self) -> bool {
        self.is_none()
    }

    fn to_metadata_string(&self) -> String {
        self.clone().unwrap_or_default()
    }
}

impl TypedValue for Option<f64> {
    fn coercion_type(configured: FlagValueType) -> FlagValueType {
        match configured {
            FlagValueType::Integer => FlagValueType::Integer,
            _ => FlagValueType::Double,
        }
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::Number(n) => Some(n),
            _ => None,
        }
    }

    fn from_defaults(defaults: &DefaultSlots) -> Self {
        defaults.number
    }

    fn not_found() -> Self {
        Some(0.0)
    }

    fn is_disabled(&self) -> bool {
        self.is_none()
    }

    fn to_metadata_string(&self) -> String {
        self.map(|n| n.to_string()).unwrap_or_default()
    }
}

impl TypedValue for Option<Value> {
    fn coercion_type(_configured: FlagValueType) -> FlagValueType {
        FlagValueType::Object
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::Object(v) => Some(v),
            _ => None,
        }
    }

    fn from_defaults(defaults: &DefaultSlots) -> Self {
        defaults.object.clone()
    }

    fn not_found() -> Self {
        None
    }

    fn is_disabled(&self) -> bool {
        self.is_none()
    }

    fn to_metadata_string(&self) -> String {
        self.as_ref().map(Value::to_string).unwrap_or_default()
    }
}

/// Extract a typed value from a raw remote value.
pub(crate) fn extract<T: TypedValue>(
    configured: FlagValueType,
    raw: &Value,
    boolean_cast: BooleanCastStrategy,
) -> Result<T> {
    let value_type = T::coercion_type(configured);
    let value = coerce(value_type, raw, boolean_cast)?;
    T::from_flag_value(value).ok_or_else(|| Error::InvalidType {
        expected: value_type,
        found: json_type_name(raw).to_owned(),
    })
}
