//! Attribute casting.
//!
//! Casts run when an attribute is set and once when a row is hydrated, so
//! reads never convert. Hashed secrets are only hashed on set; values coming
//! back from storage are already hashes.

use std::str::FromStr;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use oxide_record_core::Value;
use password_hash::rand_core::OsRng;

use crate::error::{OrmError, Result};

/// Declared kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    Integer,
    Float,
    Boolean,
    String,
    DateTime,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// Argon2id PHC string.
    Hashed,
}

impl FromStr for Cast {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "int" | "integer" => Ok(Self::Integer),
            "float" | "double" | "real" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "datetime" | "date" => Ok(Self::DateTime),
            "object" | "json" => Ok(Self::Object),
            "array" => Ok(Self::Array),
            "hashed" => Ok(Self::Hashed),
            other => Err(OrmError::Config(format!("unknown cast `{other}`"))),
        }
    }
}

impl Cast {
    /// Casts a value being assigned to `attribute`. NULL passes through.
    ///
    /// # Errors
    ///
    /// [`OrmError::Cast`] when the value cannot represent the declared kind,
    /// [`OrmError::PasswordHash`] when hashing fails.
    pub fn apply(self, attribute: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            Self::Integer => to_integer(attribute, value),
            Self::Float => to_float(attribute, value),
            Self::Boolean => to_boolean(attribute, value),
            Self::String => to_string(attribute, value),
            Self::DateTime => to_datetime(attribute, value),
            Self::Object => to_json(attribute, value, serde_json::Value::is_object, "object"),
            Self::Array => to_json(attribute, value, serde_json::Value::is_array, "array"),
            Self::Hashed => match value {
                Value::Text(s) if is_hashed(&s) => Ok(Value::Text(s)),
                Value::Text(s) => Ok(Value::Text(hash_secret(&s)?)),
                other => Err(mismatch(attribute, &other, "secret")),
            },
        }
    }

    /// Casts a value read from storage.
    ///
    /// # Errors
    ///
    /// Same as [`Cast::apply`], minus hashing.
    pub fn hydrate(self, attribute: &str, value: Value) -> Result<Value> {
        match self {
            Self::Hashed => Ok(value),
            other => other.apply(attribute, value),
        }
    }
}

fn mismatch(attribute: &str, value: &Value, expected: &str) -> OrmError {
    OrmError::Cast {
        attribute: String::from(attribute),
        message: format!("expected {expected}, got {}", value.type_name()),
    }
}

fn invalid(attribute: &str, text: &str, expected: &str) -> OrmError {
    OrmError::Cast {
        attribute: String::from(attribute),
        message: format!("`{text}` is not a valid {expected}"),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_integer(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .map(Value::Int)
                .ok_or_else(|| invalid(attribute, &s, "integer"))
        }
        other => Err(mismatch(attribute, &other, "integer")),
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_float(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(n) => Ok(Value::Float(n as f64)),
        Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(b)))),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid(attribute, &s, "float")),
        other => Err(mismatch(attribute, &other, "float")),
    }
}

fn to_boolean(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(n) => Ok(Value::Bool(n != 0)),
        Value::Float(f) => Ok(Value::Bool(f != 0.0)),
        Value::Text(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Value::Bool(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Value::Bool(false)),
            _ => Err(invalid(attribute, &s, "boolean")),
        },
        other => Err(mismatch(attribute, &other, "boolean")),
    }
}

fn to_string(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::Text(s) => Ok(Value::Text(s)),
        Value::Int(n) => Ok(Value::Text(n.to_string())),
        Value::Float(f) => Ok(Value::Text(f.to_string())),
        Value::Bool(b) => Ok(Value::Text(String::from(if b { "1" } else { "0" }))),
        Value::Blob(bytes) => String::from_utf8(bytes).map(Value::Text).map_err(|e| OrmError::Cast {
            attribute: String::from(attribute),
            message: e.to_string(),
        }),
        other @ (Value::DateTime(_) | Value::Json(_)) => other
            .as_key()
            .map(Value::Text)
            .ok_or_else(|| mismatch(attribute, &other, "string")),
        Value::Null => Ok(Value::Null),
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses the datetime spellings accepted by datetime casts.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn to_datetime(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::DateTime(dt) => Ok(Value::DateTime(dt)),
        Value::Text(s) => parse_datetime(&s)
            .map(Value::DateTime)
            .ok_or_else(|| invalid(attribute, &s, "datetime")),
        Value::Int(secs) => DateTime::from_timestamp(secs, 0)
            .map(|dt| Value::DateTime(dt.naive_utc()))
            .ok_or_else(|| invalid(attribute, &secs.to_string(), "timestamp")),
        other => Err(mismatch(attribute, &other, "datetime")),
    }
}

fn to_json(
    attribute: &str,
    value: Value,
    accepts: fn(&serde_json::Value) -> bool,
    expected: &str,
) -> Result<Value> {
    let json = match value {
        Value::Json(json) => json,
        Value::Text(s) => serde_json::from_str(&s).map_err(|e| OrmError::Cast {
            attribute: String::from(attribute),
            message: e.to_string(),
        })?,
        other => return Err(mismatch(attribute, &other, expected)),
    };
    if accepts(&json) {
        Ok(Value::Json(json))
    } else {
        Err(OrmError::Cast {
            attribute: String::from(attribute),
            message: format!("expected a JSON {expected}"),
        })
    }
}

/// Hashes a secret with Argon2id.
///
/// Returns the PHC string, which embeds the salt.
///
/// # Errors
///
/// [`OrmError::PasswordHash`] if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|_| OrmError::PasswordHash)?;
    Ok(hash.to_string())
}

/// Whether `value` already is a PHC hash string.
#[must_use]
pub fn is_hashed(value: &str) -> bool {
    PasswordHash::new(value).is_ok()
}

/// Verifies a secret against a stored PHC hash.
#[must_use]
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}
