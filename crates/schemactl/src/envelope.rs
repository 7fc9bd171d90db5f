//! The value carrier used across the provider boundary.
//!
//! Every provider operation returns an [`Envelope`]: a JSON object holding a
//! `result`, an accumulated `log`, and an optional `error` message. Collapsing
//! semantic and infrastructural failure into the `error` field keeps the
//! engine's no-retry policy uniform across in-process and out-of-process
//! transports; the engine never inspects transport exceptions directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A tabular query result returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Column names, in select order.
    pub header: Vec<String>,

    /// Data rows; every cell is rendered as text.
    pub rows: Vec<Vec<String>>,
}

/// One row of the database version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Application version the database serves.
    pub app_version: String,

    /// Database schema version.
    pub db_version: String,

    /// Human-readable description of the change.
    pub description: String,

    /// Where the release scripts came from (repo URI + release path).
    pub source: String,

    /// When the row was written.
    pub time: DateTime<Utc>,
}

/// General information about the database server behind a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInfo {
    /// Server product and version banner.
    pub version: String,

    /// Database the provider is connected to.
    pub database: String,

    /// User the provider connects as.
    pub user: String,
}

/// Structured request/response value exchanged with providers.
///
/// The envelope serializes to a single JSON object so that an out-of-process
/// transport can ship it as one string. The `error` field is the sole failure
/// signal; `log` may carry partial output even on failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    value: Map<String, Value>,
}

impl Envelope {
    /// Create an empty envelope.
    pub fn new() -> Self {
        Self { value: Map::new() }
    }

    /// Parse an envelope from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Map<String, Value> = serde_json::from_str(json)?;
        Ok(Self { value })
    }

    /// Create an envelope carrying a result value.
    pub fn with_result(result: Value) -> Self {
        let mut e = Self::new();
        e.set("result", result);
        e
    }

    /// Create an envelope carrying an error message.
    pub fn from_error(message: impl std::fmt::Display) -> Self {
        let mut e = Self::new();
        e.set_error(message);
        e
    }

    /// Set an arbitrary key.
    pub fn set(&mut self, key: &str, value: Value) {
        self.value.insert(key.to_string(), value);
    }

    /// Set the result value.
    pub fn set_result(&mut self, result: Value) {
        self.set("result", result);
    }

    /// Set the error message.
    pub fn set_error(&mut self, message: impl std::fmt::Display) {
        self.set("error", Value::String(message.to_string()));
    }

    /// Append a line to the envelope log.
    pub fn append_log(&mut self, message: impl AsRef<str>) {
        let log = self
            .value
            .entry("log")
            .or_insert_with(|| Value::String(String::new()));
        if let Value::String(s) = log {
            s.push_str(message.as_ref());
            s.push('\n');
        }
    }

    /// Get a raw value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Get a top-level string value by key.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Decode the result as a query [`Table`].
    pub fn get_table(&self) -> Option<Table> {
        self.value
            .get("result")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Decode the result as a [`VersionRecord`].
    pub fn get_version(&self) -> Option<VersionRecord> {
        self.value
            .get("result")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Decode the result as [`DbInfo`].
    pub fn get_db_info(&self) -> Option<DbInfo> {
        self.value
            .get("result")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Whether the envelope carries an error.
    pub fn has_error(&self) -> bool {
        self.value.get("error").is_some_and(|v| !v.is_null())
    }

    /// The error message, if any.
    pub fn error(&self) -> Option<String> {
        self.get_string("error")
    }

    /// The accumulated log. A trailing blank line is trimmed.
    pub fn log(&self) -> String {
        let mut log = self.get_string("log").unwrap_or_default();
        if log.ends_with("\n\n") {
            log.truncate(log.len() - 1);
        }
        log
    }

    /// Serialize the envelope to its JSON wire form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.value).unwrap_or_else(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip() {
        let mut e = Envelope::new();
        e.set_result(json!({"appVersion": "0.0.2"}));
        e.append_log("first line");
        e.append_log("second line");

        let parsed = Envelope::from_json(&e.to_json()).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn test_error_is_sole_failure_signal() {
        let mut e = Envelope::new();
        e.append_log("partial output");
        assert!(!e.has_error());

        e.set_error("command failed");
        assert!(e.has_error());
        assert_eq!(e.error().as_deref(), Some("command failed"));
        // log survives alongside the error
        assert_eq!(e.log(), "partial output\n");
    }

    #[test]
    fn test_log_trims_trailing_blank_line() {
        let mut e = Envelope::new();
        e.append_log("done");
        e.append_log("");
        assert_eq!(e.log(), "done\n");
    }

    #[test]
    fn test_get_table() {
        let e = Envelope::with_result(json!({
            "header": ["name", "value"],
            "rows": [["a", "1"], ["b", "2"]],
        }));
        let table = e.get_table().unwrap();
        assert_eq!(table.header, vec!["name", "value"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_get_version() {
        let e = Envelope::with_result(json!({
            "appVersion": "0.0.2",
            "dbVersion": "2",
            "description": "Created database version 2",
            "source": "https://releases.example.com/app/v2",
            "time": "2024-05-01T10:00:00Z",
        }));
        let v = e.get_version().unwrap();
        assert_eq!(v.app_version, "0.0.2");
        assert_eq!(v.db_version, "2");
    }

    #[test]
    fn test_get_version_absent() {
        let e = Envelope::new();
        assert!(e.get_version().is_none());
        assert!(e.get_table().is_none());
    }
}
