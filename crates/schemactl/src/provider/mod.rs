//! Database provider contract and discovery.
//!
//! A provider is the only thing that touches a database on behalf of the
//! release engine. The contract is six operations, each answering with an
//! [`Envelope`]; the envelope's `error` field is the sole failure signal, so
//! in-process and out-of-process implementations are interchangeable from
//! the engine's point of view.

pub mod pgsql;
pub mod remote;

pub use pgsql::PgsqlProvider;
pub use remote::RemoteProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::envelope::{Envelope, VersionRecord};
use crate::error::{Result, SchemaError};
use crate::manifest::{Command, Query};

/// Reserved prefix marking an in-process native provider name.
pub const NATIVE_PREFIX: char = '_';

/// File name prefix of out-of-process provider binaries.
pub const PROVIDER_BINARY_PREFIX: &str = "schemactl-db-";

/// The contract a concrete database backend must satisfy.
///
/// Transport faults must be folded into an error envelope; implementations
/// never surface them as panics or transport-level errors.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Hand the engine configuration to the provider.
    async fn setup(&self, config: &Config) -> Envelope;

    /// Get general information about the database server.
    async fn get_info(&self) -> Envelope;

    /// Get the latest database version history entry, if any.
    async fn get_version(&self) -> Envelope;

    /// Append a new version history row. Never updates an existing row.
    async fn set_version(&self, version: &VersionRecord) -> Envelope;

    /// Execute a command (an ordered list of scripts).
    async fn run_command(&self, command: &Command) -> Envelope;

    /// Execute a query and return its result table.
    async fn run_query(&self, query: &Query) -> Envelope;
}

/// Resolve the provider named by the configuration.
///
/// Names starting with `_` select a native in-process provider; any other
/// name resolves to an executable `schemactl-db-<name>` in the current
/// working directory, driven over the remote transport.
pub fn discover(config: &Config) -> Result<Arc<dyn DatabaseProvider>> {
    if let Some(native) = config.provider.strip_prefix(NATIVE_PREFIX) {
        return match native {
            "pgsql" => Ok(Arc::new(PgsqlProvider::new())),
            other => Err(SchemaError::Config(format!(
                "'_{}' is not a known native provider; check the provider name in the configuration",
                other
            ))),
        };
    }
    let path = std::env::current_dir()?.join(format!(
        "{}{}",
        PROVIDER_BINARY_PREFIX, config.provider
    ));
    if !path.is_file() {
        return Err(SchemaError::Config(format!(
            "cannot find provider binary '{}'; check that the file exists in the working \
             directory and that the provider name in the configuration is correct",
            path.display()
        )));
    }
    Ok(Arc::new(RemoteProvider::spawn(&path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn make_config(provider: &str) -> Config {
        Config {
            app_version: "0.0.1".into(),
            db_name: "appdb".into(),
            repo_uri: "/tmp/releases".into(),
            provider: provider.into(),
            db: ProviderConfig {
                host: "localhost".into(),
                port: 5432,
                user: "app".into(),
                password: "pw".into(),
                admin_user: "postgres".into(),
                admin_password: "pw".into(),
                schema: "public".into(),
            },
        }
    }

    #[test]
    fn test_discover_native_pgsql() {
        assert!(discover(&make_config("_pgsql")).is_ok());
    }

    #[test]
    fn test_discover_unknown_native() {
        assert!(matches!(
            discover(&make_config("_nosql")),
            Err(SchemaError::Config(_))
        ));
    }

    #[test]
    fn test_discover_missing_binary() {
        assert!(matches!(
            discover(&make_config("not-installed")),
            Err(SchemaError::Config(_))
        ));
    }
}
