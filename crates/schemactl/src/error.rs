//! Error types for release and diff operations.

use thiserror::Error;

/// Main error type for schemactl operations.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Configuration error (missing repo URI, unknown provider name, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The release source or the database could not be reached.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Input validation failed before any database mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider returned an error envelope.
    #[error("Provider error running '{command}': {message}")]
    Provider { command: String, message: String },

    /// Create/Deploy called against a database that already has a version.
    #[error("database version {db_version} already exists for application version {app_version}")]
    AlreadyExists {
        app_version: String,
        db_version: String,
    },

    /// Upgrade called against a database with no readable version.
    #[error("the database does not exist")]
    NotDeployed,

    /// The requested upgrade window is not a forward move through the plan.
    #[error("cannot upgrade: target version {target} is not past the current version {current}")]
    InvalidUpgrade { current: String, target: String },

    /// Any other unexpected condition.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error (local release source reads).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Database error from a direct connection (diff reader, native provider).
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

impl SchemaError {
    /// Create a Provider error carrying the originating command name.
    pub fn provider(command: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::Provider {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an AlreadyExists error from the version found in the database.
    pub fn already_exists(app_version: impl Into<String>, db_version: impl Into<String>) -> Self {
        SchemaError::AlreadyExists {
            app_version: app_version.into(),
            db_version: db_version.into(),
        }
    }

    /// Create an InvalidUpgrade error for a backward or unknown window.
    pub fn invalid_upgrade(current: impl Into<String>, target: impl Into<String>) -> Self {
        SchemaError::InvalidUpgrade {
            current: current.into(),
            target: target.into(),
        }
    }
}

/// Result type alias for schemactl operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
