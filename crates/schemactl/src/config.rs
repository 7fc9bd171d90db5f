//! Typed configuration for the release engine and providers.
//!
//! The configuration is an explicit value passed into constructors rather
//! than a process-wide store. Loading and persisting configuration files is
//! the front-end's concern; this module only defines the record and its
//! JSON/YAML parsing.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Root configuration for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target application version for release actions.
    pub app_version: String,

    /// Name of the database managed by the engine.
    pub db_name: String,

    /// Base URI of the release source (HTTP(S) or a local path).
    pub repo_uri: String,

    /// Provider selector. A leading underscore selects a native in-process
    /// provider (e.g. `_pgsql`); any other name resolves to a provider
    /// binary `schemactl-db-<name>` in the working directory.
    pub provider: String,

    /// Connection settings handed to the provider at setup.
    pub db: ProviderConfig,
}

/// Database connection settings for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Database server host.
    pub host: String,

    /// Database server port.
    pub port: u16,

    /// Regular user name.
    pub user: String,

    /// Regular user password.
    pub password: String,

    /// Administrative user name (DDL, database creation).
    pub admin_user: String,

    /// Administrative user password.
    pub admin_password: String,

    /// Schema the managed objects live in.
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_schema() -> String {
    "public".to_string()
}

impl Config {
    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| SchemaError::Config(format!("failed to parse JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| SchemaError::Config(format!("failed to parse YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.app_version.is_empty() {
            return Err(SchemaError::Config("app_version must not be empty".into()));
        }
        if self.repo_uri.is_empty() {
            return Err(SchemaError::Config("repo_uri must not be empty".into()));
        }
        if self.provider.is_empty() {
            return Err(SchemaError::Config("provider must not be empty".into()));
        }
        if self.db_name.is_empty() {
            return Err(SchemaError::Config("db_name must not be empty".into()));
        }
        Ok(())
    }

    /// Serialize the full configuration to JSON for the provider boundary.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r#"
app_version: "0.0.4"
db_name: appdb
repo_uri: https://releases.example.com/app
provider: _pgsql
db:
  host: localhost
  port: 5432
  user: appuser
  password: secret
  admin_user: postgres
  admin_password: supersecret
"#;

    #[test]
    fn test_from_yaml_valid() {
        let config = Config::from_yaml(VALID_YAML).unwrap();
        assert_eq!(config.app_version, "0.0.4");
        assert_eq!(config.provider, "_pgsql");
        assert_eq!(config.db.port, 5432);
        // schema defaults to public when omitted
        assert_eq!(config.db.schema, "public");
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::from_yaml(VALID_YAML).unwrap();
        let json = config.to_json().unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.db_name, config.db_name);
        assert_eq!(parsed.db.admin_user, config.db.admin_user);
    }

    #[test]
    fn test_empty_app_version_rejected() {
        let yaml = VALID_YAML.replace("\"0.0.4\"", "\"\"");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(SchemaError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(Config::from_json("{ not json").is_err());
    }
}
