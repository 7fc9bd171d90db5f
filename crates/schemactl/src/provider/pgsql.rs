//! Native in-process PostgreSQL provider.
//!
//! Commands and queries run over short-lived connections opened per call:
//! lifecycle commands routinely switch between the administrative and the
//! regular role, and between the server maintenance database and the managed
//! database, so a shared pool would fight the four connection shapes.
//!
//! Version history lives in a `version` table inside the managed database;
//! the table itself is created by the release's own deploy scripts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use crate::config::{Config, ProviderConfig};
use crate::envelope::{DbInfo, Envelope, Table, VersionRecord};
use crate::error::{Result, SchemaError};
use crate::manifest::{Command, Query};
use crate::provider::DatabaseProvider;

/// Database the provider connects to when a command does not use the
/// managed database (server-level work such as CREATE DATABASE).
const MAINTENANCE_DB: &str = "postgres";

#[derive(Clone)]
struct ConnectionSettings {
    db: ProviderConfig,
    db_name: String,
}

/// Native PostgreSQL implementation of [`DatabaseProvider`].
pub struct PgsqlProvider {
    settings: tokio::sync::RwLock<Option<ConnectionSettings>>,
}

impl Default for PgsqlProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PgsqlProvider {
    pub fn new() -> Self {
        Self {
            settings: tokio::sync::RwLock::new(None),
        }
    }

    async fn settings(&self) -> Result<ConnectionSettings> {
        self.settings
            .read()
            .await
            .clone()
            .ok_or_else(|| SchemaError::Config("the pgsql provider has not been set up".into()))
    }

    /// Open a connection with the requested role and database.
    async fn connect(&self, as_admin: bool, use_db: bool) -> Result<Client> {
        let settings = self.settings().await?;
        let (user, password) = if as_admin {
            (&settings.db.admin_user, &settings.db.admin_password)
        } else {
            (&settings.db.user, &settings.db.password)
        };
        let dbname = if use_db {
            settings.db_name.as_str()
        } else {
            MAINTENANCE_DB
        };

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.db.host)
            .port(settings.db.port)
            .dbname(dbname)
            .user(user)
            .password(password);

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| SchemaError::Connectivity(format!("connecting to {}: {}", dbname, e)))?;

        // the connection task ends when the client is dropped
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("pgsql connection error: {}", e);
            }
        });
        Ok(client)
    }

    async fn try_get_version(&self) -> Result<Option<VersionRecord>> {
        let client = self.connect(true, true).await?;
        let rows = client
            .query(
                "SELECT application_version, database_version, description, source, time \
                 FROM version ORDER BY time DESC LIMIT 1",
                &[],
            )
            .await?;
        Ok(rows.first().map(|row| VersionRecord {
            app_version: row.get(0),
            db_version: row.get(1),
            description: row.get(2),
            source: row.get(3),
            time: row.get::<_, DateTime<Utc>>(4),
        }))
    }

    async fn try_set_version(&self, version: &VersionRecord) -> Result<()> {
        let client = self.connect(true, true).await?;
        client
            .execute(
                "INSERT INTO version (application_version, database_version, description, source, time) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &version.app_version,
                    &version.db_version,
                    &version.description,
                    &version.source,
                    &version.time,
                ],
            )
            .await?;
        Ok(())
    }

    async fn try_run_command(&self, command: &Command, log: &mut Envelope) -> Result<()> {
        let client = self.connect(command.as_admin, command.use_db).await?;
        if command.transactional {
            client.batch_execute("BEGIN").await?;
        }
        for script in &command.scripts {
            debug!("running script '{}' of command '{}'", script.name, command.name);
            if let Err(e) = client.batch_execute(&script.content).await {
                if command.transactional {
                    let _ = client.batch_execute("ROLLBACK").await;
                }
                return Err(SchemaError::Runtime(format!(
                    "script '{}' failed: {}",
                    script.name, e
                )));
            }
            log.append_log(format!("script '{}' applied", script.name));
        }
        if command.transactional {
            client.batch_execute("COMMIT").await?;
        }
        Ok(())
    }

    async fn try_run_query(&self, query: &Query) -> Result<Table> {
        let client = self.connect(false, true).await?;
        let messages = client.simple_query(&query.content).await?;

        let mut table = Table::default();
        for message in messages {
            if let tokio_postgres::SimpleQueryMessage::Row(row) = message {
                if table.header.is_empty() {
                    table.header = row
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect();
                }
                let cells = (0..row.len())
                    .map(|i| row.get(i).unwrap_or_default().to_string())
                    .collect();
                table.rows.push(cells);
            }
        }
        Ok(table)
    }

    async fn try_get_info(&self) -> Result<DbInfo> {
        let client = self.connect(false, true).await?;
        let row = client
            .query_one(
                "SELECT version(), current_database()::text, current_user::text",
                &[],
            )
            .await?;
        Ok(DbInfo {
            version: row.get(0),
            database: row.get(1),
            user: row.get(2),
        })
    }
}

#[async_trait]
impl DatabaseProvider for PgsqlProvider {
    async fn setup(&self, config: &Config) -> Envelope {
        let mut settings = self.settings.write().await;
        *settings = Some(ConnectionSettings {
            db: config.db.clone(),
            db_name: config.db_name.clone(),
        });
        info!(
            "pgsql provider configured for database '{}' on {}:{}",
            config.db_name, config.db.host, config.db.port
        );
        let mut envelope = Envelope::new();
        envelope.append_log(format!(
            "pgsql provider ready for database '{}' on {}:{}",
            config.db_name, config.db.host, config.db.port
        ));
        envelope
    }

    async fn get_info(&self) -> Envelope {
        match self.try_get_info().await {
            Ok(info) => Envelope::with_result(json!(info)),
            Err(e) => Envelope::from_error(e),
        }
    }

    async fn get_version(&self) -> Envelope {
        match self.try_get_version().await {
            Ok(Some(version)) => Envelope::with_result(json!(version)),
            Ok(None) => Envelope::new(),
            Err(e) => Envelope::from_error(e),
        }
    }

    async fn set_version(&self, version: &VersionRecord) -> Envelope {
        match self.try_set_version(version).await {
            Ok(()) => Envelope::new(),
            Err(e) => Envelope::from_error(e),
        }
    }

    async fn run_command(&self, command: &Command) -> Envelope {
        let mut envelope = Envelope::new();
        if let Err(e) = self.try_run_command(command, &mut envelope).await {
            envelope.set_error(e);
        }
        envelope
    }

    async fn run_query(&self, query: &Query) -> Envelope {
        match self.try_run_query(query).await {
            Ok(table) => Envelope::with_result(json!(table)),
            Err(e) => Envelope::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_before_setup_return_error_envelopes() {
        let provider = PgsqlProvider::new();
        let envelope = provider.get_version().await;
        assert!(envelope.has_error());

        let envelope = provider.get_info().await;
        assert!(envelope.has_error());
    }

    #[tokio::test]
    async fn test_setup_returns_log() {
        let provider = PgsqlProvider::new();
        let config = crate::config::Config {
            app_version: "0.0.1".into(),
            db_name: "appdb".into(),
            repo_uri: "/tmp/releases".into(),
            provider: "_pgsql".into(),
            db: ProviderConfig {
                host: "localhost".into(),
                port: 5432,
                user: "app".into(),
                password: "pw".into(),
                admin_user: "postgres".into(),
                admin_password: "pw".into(),
                schema: "public".into(),
            },
        };
        let envelope = provider.setup(&config).await;
        assert!(!envelope.has_error());
        assert!(envelope.log().contains("appdb"));
    }
}
