//! Configuration lookup and database connection settings.
//!
//! [`Config`] is a JSON tree addressed with dotted keys such as
//! `database.connections.main.driver`. The `database` subtree deserializes
//! into a [`DatabaseConfig`].

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};

/// Driver name accepted by the connection registry.
pub const SQLITE_DRIVER: &str = "sqlite";

/// Name a model uses when it does not pick a connection.
pub const DEFAULT_CONNECTION: &str = "default";

/// Dotted-key view over a JSON configuration tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    root: serde_json::Value,
}

impl Config {
    /// Wraps an existing JSON tree.
    #[must_use]
    pub const fn new(root: serde_json::Value) -> Self {
        Self { root }
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Config`] when the text is not valid JSON.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let root = serde_json::from_str(text).map_err(|e| OrmError::Config(e.to_string()))?;
        Ok(Self { root })
    }

    /// Looks up a dotted key. Missing segments yield `None`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        key.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| node.get(segment))
    }

    /// Looks up a dotted key and deserializes it.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Config`] when the value exists but does not
    /// deserialize into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|value| {
                T::deserialize(value).map_err(|e| OrmError::Config(format!("{key}: {e}")))
            })
            .transpose()
    }

    /// Sets a dotted key, creating intermediate objects.
    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        let mut node = &mut self.root;
        for segment in key.split('.').filter(|segment| !segment.is_empty()) {
            if !node.is_object() {
                *node = serde_json::Value::Object(serde_json::Map::new());
            }
            let serde_json::Value::Object(map) = node else {
                return;
            };
            node = map
                .entry(String::from(segment))
                .or_insert(serde_json::Value::Null);
        }
        *node = value;
    }

    /// Reads the `database` subtree.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Config`] when the subtree is missing or malformed.
    pub fn database(&self) -> Result<DatabaseConfig> {
        self.get_as("database")?
            .ok_or_else(|| OrmError::Config(String::from("missing `database` section")))
    }
}

/// Named database connections and the name `default` maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection used when a model asks for `default`.
    #[serde(default = "default_connection_name")]
    pub default: String,
    /// Connection settings by name.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

fn default_connection_name() -> String {
    String::from(DEFAULT_CONNECTION)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default: default_connection_name(),
            connections: BTreeMap::new(),
        }
    }
}

impl DatabaseConfig {
    /// A single in-memory SQLite connection named `default`.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default().with_connection(DEFAULT_CONNECTION, ConnectionConfig::sqlite(":memory:"))
    }

    /// Adds or replaces a named connection.
    #[must_use]
    pub fn with_connection(mut self, name: &str, connection: ConnectionConfig) -> Self {
        self.connections.insert(String::from(name), connection);
        self
    }

    /// Maps `default` to the configured default name.
    #[must_use]
    pub fn resolve_name<'a>(&'a self, name: &'a str) -> &'a str {
        if name == DEFAULT_CONNECTION {
            &self.default
        } else {
            name
        }
    }

    /// Settings for a connection, after resolving `default`.
    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.get(self.resolve_name(name))
    }
}

/// Parameters for one named connection.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver name; only `sqlite` is supported.
    pub driver: String,
    /// Database file path, or `:memory:`.
    pub database: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Driver options. For SQLite each entry becomes a pragma.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl ConnectionConfig {
    /// SQLite settings for a file path or `:memory:`.
    #[must_use]
    pub fn sqlite(database: &str) -> Self {
        Self {
            driver: String::from(SQLITE_DRIVER),
            database: String::from(database),
            host: None,
            port: None,
            username: None,
            password: None,
            options: BTreeMap::new(),
        }
    }

    /// Adds a driver option.
    #[must_use]
    pub fn option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(String::from(key), value.into());
        self
    }

    /// Option values rendered the way pragmas expect them.
    #[must_use]
    pub fn pragmas(&self) -> Vec<(String, String)> {
        self.options
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Bool(true) => String::from("ON"),
                    serde_json::Value::Bool(false) => String::from("OFF"),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver", &self.driver)
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Config {
        Config::new(json!({
            "database": {
                "default": "main",
                "connections": {
                    "main": {
                        "driver": "sqlite",
                        "database": ":memory:",
                        "password": "hunter2",
                        "options": { "foreign_keys": true, "busy_timeout": 500 }
                    }
                }
            }
        }))
    }

    #[test]
    fn test_dotted_lookup() {
        let config = sample();
        assert_eq!(
            config.get("database.connections.main.driver"),
            Some(&json!("sqlite"))
        );
        assert_eq!(config.get("database.connections.other"), None);
        assert_eq!(config.get("database.default.deeper"), None);
    }

    #[test]
    fn test_get_as() {
        let config = sample();
        let name: Option<String> = config.get_as("database.default").unwrap();
        assert_eq!(name.as_deref(), Some("main"));
        let bad: Result<Option<u32>> = config.get_as("database.default");
        assert!(matches!(bad, Err(OrmError::Config(_))));
    }

    #[test]
    fn test_set_creates_path() {
        let mut config = Config::default();
        config.set("app.name", json!("demo"));
        config.set("app.debug", json!(true));
        assert_eq!(config.get("app.name"), Some(&json!("demo")));
        assert_eq!(config.get("app.debug"), Some(&json!(true)));
    }

    #[test]
    fn test_database_section_resolves_default() {
        let db = sample().database().unwrap();
        assert_eq!(db.resolve_name("default"), "main");
        assert_eq!(db.resolve_name("reporting"), "reporting");
        let main = db.connection("default").unwrap();
        assert_eq!(main.database, ":memory:");
        assert_eq!(
            main.pragmas(),
            vec![
                (String::from("busy_timeout"), String::from("500")),
                (String::from("foreign_keys"), String::from("ON")),
            ]
        );
    }

    #[test]
    fn test_missing_database_section() {
        assert!(matches!(
            Config::default().database(),
            Err(OrmError::Config(_))
        ));
    }

    #[test]
    fn test_password_is_redacted() {
        let db = sample().database().unwrap();
        let rendered = format!("{:?}", db.connection("main").unwrap());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
    }
}
