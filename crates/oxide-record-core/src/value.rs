//! Binding values and their inline rendering.
//!
//! Every value that reaches a statement travels as a positional binding. The
//! inline rendering exists for diagnostics only and escapes text the way the
//! storage engine would.

use chrono::NaiveDateTime;

/// Format used for datetime values, both inline and when bound.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A value that can be bound to a positional placeholder or stored as an
/// entity attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// Calendar date and wall-clock time, without zone.
    DateTime(NaiveDateTime),
    /// Decoded JSON document (object or array casts).
    Json(serde_json::Value),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the SQL representation for inline use (escaped).
    ///
    /// **Warning**: only for diagnostics. Statements are always executed
    /// with positional bindings.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => {
                if *b {
                    String::from("TRUE")
                } else {
                    String::from("FALSE")
                }
            }
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Text(s) => quote(s),
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
            Self::DateTime(dt) => quote(&dt.format(DATETIME_FORMAT).to_string()),
            Self::Json(json) => quote(&json.to_string()),
        }
    }

    /// Returns a canonical string used to match values across tables.
    ///
    /// Integers, integral floats, booleans and numeric text with the same
    /// magnitude share a key, so a foreign key read back as `Int(3)` matches
    /// a parent key stored as `Text("3")`. NULL has no key.
    #[must_use]
    pub fn as_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(String::from(if *b { "1" } else { "0" })),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    Some(format!("{f:.0}"))
                } else {
                    Some(f.to_string())
                }
            }
            Self::Text(s) => Some(s.clone()),
            Self::Blob(b) => Some(b.iter().map(|byte| format!("{byte:02x}")).collect()),
            Self::DateTime(dt) => Some(dt.format(DATETIME_FORMAT).to_string()),
            Self::Json(json) => Some(json.to_string()),
        }
    }

    /// Returns the integer payload, converting booleans.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Returns the numeric payload as a float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the text payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    /// Converts the value into a JSON document for serialization.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Blob(b) => {
                serde_json::Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect())
            }
            Self::DateTime(dt) => serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string()),
            Self::Json(json) => json.clone(),
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::DateTime(_) => "datetime",
            Self::Json(_) => "json",
        }
    }
}

fn quote(s: &str) -> String {
    // Escape single quotes by doubling them
    let escaped = s.replace('\'', "''");
    format!("'{escaped}'")
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Self::Int(i64::from(n))
                }
            }
        )*
    };
}

value_from_int!(i64, i32, i16, i8, u32, u16, u8);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f64::from(f))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(String::from(s))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Self::DateTime(dt)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::Json(json)
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// The right-hand side of a filter: a single value or a list for `IN`.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// One binding.
    Single(Value),
    /// One binding per element, in element order.
    List(Vec<Value>),
}

macro_rules! operand_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Self::Single(Value::from(v))
                }
            }
        )*
    };
}

operand_from_scalar!(
    Value,
    &Value,
    bool,
    i64,
    i32,
    i16,
    i8,
    u32,
    u16,
    u8,
    f64,
    f32,
    String,
    &String,
    &str,
    NaiveDateTime,
    serde_json::Value
);

impl<T: Into<Value>> From<Option<T>> for Operand {
    fn from(v: Option<T>) -> Self {
        Self::Single(Value::from(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Operand {
    fn from(values: [T; N]) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}
