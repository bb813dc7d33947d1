//! Run Parameters
//!
//! Loads the JSON params file passed with `--params`.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Keys that must be present, checked in this order
const REQUIRED_KEYS: &[&str] = &["subscription_ids", "query", "export_file_path"];

/// Parameters for a single export run
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Subscriptions the query is scoped to
    pub subscription_ids: Vec<String>,
    /// Resource Graph query text
    pub query: String,
    /// Destination CSV file
    pub export_file_path: PathBuf,
}

impl Config {
    /// Load parameters from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read params file {}: {}", path.display(), e))
        })?;

        Self::from_json(&content)
    }

    /// Parse and validate parameters from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::config(format!("Invalid JSON in params file: {}", e)))?;

        let Some(map) = value.as_object() else {
            return Err(Error::config("Params file must contain a JSON object"));
        };

        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !map.contains_key(**key)) {
            return Err(Error::config(format!("Missing {} parameter", missing)));
        }

        let config: Config = serde_json::from_value(value)
            .map_err(|e| Error::config(format!("Invalid parameter: {}", e)))?;

        if config.subscription_ids.is_empty() {
            return Err(Error::config("subscription_ids must not be empty"));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_valid_params() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"subscription_ids": ["sub1", "sub2"], "query": "Resources", "export_file_path": "out.csv"}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.subscription_ids, vec!["sub1", "sub2"]);
        assert_eq!(config.query, "Resources");
        assert_eq!(config.export_file_path, PathBuf::from("out.csv"));
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let config = Config::from_json(
            r#"{"subscription_ids": ["sub1"], "query": "Resources", "export_file_path": "o.csv", "note": 1}"#,
        )
        .unwrap();
        assert_eq!(config.subscription_ids, vec!["sub1"]);
    }

    #[test]
    fn test_missing_key_is_named() {
        let cases = [
            (r#"{"query": "q", "export_file_path": "o.csv"}"#, "subscription_ids"),
            (r#"{"subscription_ids": ["s"], "export_file_path": "o.csv"}"#, "query"),
            (r#"{"subscription_ids": ["s"], "query": "q"}"#, "export_file_path"),
        ];

        for (json, key) in cases {
            let err = Config::from_json(json).unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains(key), "{} not named in: {}", key, err);
        }
    }

    #[test]
    fn test_first_missing_key_reported() {
        let err = Config::from_json("{}").unwrap_err();
        assert!(err.to_string().contains("Missing subscription_ids parameter"));
    }

    #[test]
    fn test_invalid_json() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_not_an_object() {
        let err = Config::from_json(r#"["sub1"]"#).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_wrong_type() {
        let err = Config::from_json(
            r#"{"subscription_ids": "sub1", "query": "q", "export_file_path": "o.csv"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_subscriptions_rejected() {
        let err = Config::from_json(
            r#"{"subscription_ids": [], "query": "q", "export_file_path": "o.csv"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
