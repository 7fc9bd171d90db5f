//! Release engine - plans and applies lifecycle actions against a provider.
//!
//! Every action follows the same shape: read the current database version to
//! establish whether a database exists, fetch what it needs from the release
//! source, then drive the provider command by command. Commands execute in
//! manifest order; the first failure aborts the action and prior commands are
//! not compensated. Version history rows are written only after the command
//! batch of a stage completes without error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use crate::config::Config;
use crate::envelope::{DbInfo, Table, VersionRecord};
use crate::error::{Result, SchemaError};
use crate::fetcher::ScriptFetcher;
use crate::manifest::{Command, Manifest, Plan, Query, Release};
use crate::provider::DatabaseProvider;

/// Outcome of one lifecycle action.
///
/// The log is always safe to emit to the caller, including on failure, where
/// it carries the output of every command that ran before the error.
#[derive(Debug)]
pub struct ActionReport {
    /// Accumulated, caller-facing action log.
    pub log: String,

    /// The failure, if the action did not complete.
    pub error: Option<SchemaError>,

    /// Wall-clock duration of the action.
    pub elapsed: Duration,
}

impl ActionReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a named query execution.
#[derive(Debug)]
pub struct QueryOutcome {
    /// The decoded result table.
    pub table: Table,

    /// The query definition, with its resolved content.
    pub query: Query,

    /// Wall-clock duration of the query.
    pub elapsed: Duration,
}

/// Orchestrates Create/Deploy/Upgrade/Run/Query against a provider.
///
/// The engine is single-threaded per action: commands execute sequentially
/// and synchronously, suspending only on provider calls and fetcher reads.
/// Callers sharing one engine must serialize actions externally.
pub struct ReleaseEngine {
    config: Config,
    fetcher: ScriptFetcher,
    provider: Arc<dyn DatabaseProvider>,
}

impl ReleaseEngine {
    /// Create an engine and hand the configuration to the provider.
    pub async fn new(config: Config, provider: Arc<dyn DatabaseProvider>) -> Result<Self> {
        config.validate()?;
        let fetcher = ScriptFetcher::new(&config.repo_uri)?;
        let setup = provider.setup(&config).await;
        if setup.has_error() {
            return Err(SchemaError::provider(
                "setup",
                setup.error().unwrap_or_default(),
            ));
        }
        let log = setup.log();
        if !log.is_empty() {
            info!("provider setup: {}", log.trim_end());
        }
        Ok(Self {
            config,
            fetcher,
            provider,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the ordered release plan from the release source.
    pub async fn get_release_plan(&self) -> Result<Plan> {
        self.fetcher.fetch_plan().await
    }

    /// Load the manifest for an application version.
    pub async fn get_release_info(&self, app_version: &str) -> Result<(Release, Manifest)> {
        self.fetcher.fetch_manifest(app_version).await
    }

    /// Get general information about the database server.
    pub async fn get_db_info(&self) -> Result<DbInfo> {
        let envelope = self.provider.get_info().await;
        if envelope.has_error() {
            return Err(SchemaError::provider(
                "get info",
                envelope.error().unwrap_or_default(),
            ));
        }
        if envelope.get("result").is_none() {
            return Err(SchemaError::Runtime(
                "the database provider did not return a result".into(),
            ));
        }
        envelope.get_db_info().ok_or_else(|| {
            SchemaError::Runtime(
                "the database provider did not return a result of the expected shape".into(),
            )
        })
    }

    /// Create the database. Only valid when no version is readable.
    pub async fn create(&self) -> ActionReport {
        let start = Instant::now();
        let mut log = String::new();
        let error = self.create_inner(&mut log).await.err();
        ActionReport {
            log,
            error,
            elapsed: start.elapsed(),
        }
    }

    async fn create_inner(&self, log: &mut String) -> Result<()> {
        let app_version = &self.config.app_version;
        log.push_str(&format!(
            "? I am checking that the database '{}' does not already exist\n",
            self.config.db_name
        ));
        self.ensure_no_version().await?;

        log.push_str(&format!(
            "? I am retrieving the release manifest for application version '{}'\n",
            app_version
        ));
        let (_, manifest) = self.fetcher.fetch_manifest(app_version).await?;
        let commands = manifest.get_commands(&manifest.create.commands)?;
        self.run_commands(&commands, &manifest, log).await
    }

    /// Deploy schema and objects into an empty database, then record the
    /// deployed version.
    pub async fn deploy(&self) -> ActionReport {
        let start = Instant::now();
        let mut log = String::new();
        let error = self.deploy_inner(&mut log).await.err();
        ActionReport {
            log,
            error,
            elapsed: start.elapsed(),
        }
    }

    async fn deploy_inner(&self, log: &mut String) -> Result<()> {
        let app_version = &self.config.app_version;
        self.ensure_no_version().await?;

        let (info, manifest) = self.fetcher.fetch_manifest(app_version).await?;
        let commands = manifest.get_commands(&manifest.deploy.commands)?;
        self.run_commands(&commands, &manifest, log).await?;

        self.set_db_version(
            app_version,
            &manifest.db_version,
            &format!("Created database version {}", manifest.db_version),
            &info.path,
        )
        .await?;
        log.push_str("? I am updating the release version history\n");
        Ok(())
    }

    /// Roll a deployed database forward through the release plan to the
    /// configured target application version.
    pub async fn upgrade(&self) -> ActionReport {
        let start = Instant::now();
        let mut log = String::new();
        let error = self.upgrade_inner(&mut log).await.err();
        ActionReport {
            log,
            error,
            elapsed: start.elapsed(),
        }
    }

    async fn upgrade_inner(&self, log: &mut String) -> Result<()> {
        let target = &self.config.app_version;

        let envelope = self.provider.get_version().await;
        if envelope.has_error() {
            return Err(SchemaError::provider(
                "get version",
                envelope.error().unwrap_or_default(),
            ));
        }
        let current = envelope.get_version().ok_or(SchemaError::NotDeployed)?;

        let plan = self.fetcher.fetch_plan().await?;

        if *target == current.app_version {
            log.push_str(&format!(
                "? I have nothing to do: the target version {} matches the version deployed\n",
                target
            ));
            return Ok(());
        }

        let (current_ix, target_ix) = plan
            .upgrade_window(&current.app_version, target)
            .ok_or_else(|| {
                SchemaError::Validation(format!(
                    "cannot resolve an upgrade window from version {} to {} in the release plan",
                    current.app_version, target
                ))
            })?;
        if target_ix <= current_ix {
            return Err(SchemaError::invalid_upgrade(current.app_version, target));
        }

        for i in current_ix..=target_ix {
            let release = &plan.releases[i];
            log.push_str(&format!(
                "? I am applying the manifest for application version {}, db version {}\n",
                release.app_version, release.db_version
            ));
            let (_, manifest) = self.fetcher.fetch_manifest(&release.app_version).await?;

            if i == current_ix {
                // the release being upgraded only prepares (drops objects)
                let commands =
                    manifest.get_commands(std::slice::from_ref(&manifest.upgrade.prepare))?;
                self.run_commands(&commands, &manifest, log).await?;
                continue;
            }

            if manifest.upgrade.alter.is_empty() {
                log.push_str(
                    "? there is no alter command in the manifest, so I am not changing the schema\n",
                );
            } else {
                let commands =
                    manifest.get_commands(std::slice::from_ref(&manifest.upgrade.alter))?;
                self.run_commands(&commands, &manifest, log).await?;
            }

            if i == target_ix {
                let commands =
                    manifest.get_commands(std::slice::from_ref(&manifest.upgrade.deploy))?;
                self.run_commands(&commands, &manifest, log).await?;
                // the target row is written only after every phase succeeded
                self.set_db_version(
                    target,
                    &manifest.db_version,
                    &format!(
                        "Upgraded database from version {} to {}",
                        current.db_version, manifest.db_version
                    ),
                    &release.path,
                )
                .await?;
            } else {
                self.set_db_version(
                    &release.app_version,
                    &manifest.db_version,
                    &format!(
                        "Updated database schema only to version {}",
                        manifest.db_version
                    ),
                    &release.path,
                )
                .await?;
            }
            log.push_str("? I am updating the release version history\n");
        }
        Ok(())
    }

    /// Execute a comma-separated list of commands declared in the current
    /// manifest, in the order given.
    pub async fn run(&self, command_names: &str) -> ActionReport {
        let start = Instant::now();
        let mut log = String::new();
        let error = self.run_inner(command_names, &mut log).await.err();
        ActionReport {
            log,
            error,
            elapsed: start.elapsed(),
        }
    }

    async fn run_inner(&self, command_names: &str, log: &mut String) -> Result<()> {
        let names: Vec<String> = command_names
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            return Err(SchemaError::Validation(
                "no command names were supplied".into(),
            ));
        }
        let (_, manifest) = self.fetcher.fetch_manifest(&self.config.app_version).await?;
        let commands = manifest.get_commands(&names)?;
        self.run_commands(&commands, &manifest, log).await
    }

    /// Execute a named query declared in the current manifest.
    ///
    /// The caller's parameter map must have exactly the cardinality of the
    /// declared vars, and every `from_input` binding must be satisfied.
    pub async fn query(
        &self,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<QueryOutcome> {
        let start = Instant::now();
        let (_, manifest) = self.fetcher.fetch_manifest(&self.config.app_version).await?;
        let query = manifest.get_query(name).ok_or_else(|| {
            SchemaError::Validation(format!("cannot find query '{}' in the manifest", name))
        })?;

        if query.vars.len() != params.len() {
            return Err(SchemaError::Validation(format!(
                "the query expects {} parameter(s) but {} were provided",
                query.vars.len(),
                params.len()
            )));
        }
        for var in &query.vars {
            if !var.from_input.is_empty() && !params.contains_key(&var.from_input) {
                return Err(SchemaError::Validation(format!(
                    "the required query parameter '{}' has not been provided",
                    var.from_input
                )));
            }
        }

        let resolved = self
            .fetcher
            .fetch_query_content(
                &self.config.app_version,
                &manifest.queries_path,
                query,
                params,
            )
            .await?;
        let envelope = self.provider.run_query(&resolved).await;
        if envelope.has_error() {
            return Err(SchemaError::provider(
                name,
                envelope.error().unwrap_or_default(),
            ));
        }
        let table = envelope.get_table().ok_or_else(|| {
            SchemaError::Runtime("the database provider did not return a result table".into())
        })?;
        Ok(QueryOutcome {
            table,
            query: resolved,
            elapsed: start.elapsed(),
        })
    }

    /// Run the configured connectivity checks, one entry per check.
    ///
    /// Each entry is `"OK"` or a diagnostic string.
    pub async fn check_config_set(&self) -> BTreeMap<String, String> {
        let mut results = BTreeMap::new();

        results.insert(
            "release source".to_string(),
            match self.fetcher.fetch_plan().await {
                Ok(_) => "OK".to_string(),
                Err(e) => e.to_string(),
            },
        );

        // a synthetic command with no scripts exercises connectivity only
        let envelope = self.provider.run_command(&test_connection_command()).await;
        results.insert(
            "db connection".to_string(),
            match envelope.error() {
                None => "OK".to_string(),
                Some(e) => format!("FAILED: {}", e),
            },
        );
        results
    }

    /// Ready iff every configured check reports OK.
    pub async fn check_ready(&self) -> Result<()> {
        for (check, result) in self.check_config_set().await {
            if !result.to_lowercase().contains("ok") {
                return Err(SchemaError::Connectivity(format!("{}: {}", check, result)));
            }
        }
        Ok(())
    }

    /// Wait until the database accepts connections.
    ///
    /// Retries at most `attempts` times with a fixed `interval` sleep, and
    /// returns the last provider error if every attempt fails.
    pub async fn wait_for_connection(&self, attempts: u32, interval: Duration) -> Result<()> {
        let command = test_connection_command();
        let mut last_error = String::new();
        for attempt in 0..attempts {
            let envelope = self.provider.run_command(&command).await;
            match envelope.error() {
                None => return Ok(()),
                Some(e) => {
                    last_error = e;
                    info!(
                        "attempt {} waiting for database connection, retrying in {:?}",
                        attempt, interval
                    );
                    tokio::time::sleep(interval).await;
                }
            }
        }
        Err(SchemaError::Connectivity(format!(
            "failed to connect to the database after {} attempts: {}",
            attempts, last_error
        )))
    }

    /// Fail with `AlreadyExists` when the database reports a version.
    ///
    /// A provider error from `get_version` is acceptable here: it is how a
    /// not-yet-created database answers.
    async fn ensure_no_version(&self) -> Result<()> {
        let envelope = self.provider.get_version().await;
        if !envelope.has_error() {
            if let Some(version) = envelope.get_version() {
                return Err(SchemaError::already_exists(
                    version.app_version,
                    version.db_version,
                ));
            }
        }
        Ok(())
    }

    /// Fetch script bodies for every command, then execute them in order.
    ///
    /// Content resolution happens up front so a missing script fails the
    /// action before any command touches the database.
    async fn run_commands(
        &self,
        commands: &[Command],
        manifest: &Manifest,
        log: &mut String,
    ) -> Result<()> {
        let mut resolved = Vec::with_capacity(commands.len());
        for command in commands {
            let command = self
                .fetcher
                .fetch_command_content(&self.config.app_version, &manifest.commands_path, command)
                .await?;
            resolved.push(command);
        }

        for command in &resolved {
            log.push_str(&format!(
                "? I have started execution of the command '{}'\n",
                command.name
            ));
            debug!("running command '{}'", command.name);
            let envelope = self.provider.run_command(command).await;
            if let Some(error) = envelope.error() {
                log.push_str(&format!(
                    "!!! the execution of the command '{}' has failed: {}\n",
                    command.name, error
                ));
                return Err(SchemaError::provider(command.name.clone(), error));
            }
            log.push_str(&envelope.log());
            log.push_str(&format!(
                "? the execution of the command '{}' has succeeded\n",
                command.name
            ));
        }
        Ok(())
    }

    /// Append a row to the database version history.
    async fn set_db_version(
        &self,
        app_version: &str,
        db_version: &str,
        description: &str,
        path: &str,
    ) -> Result<()> {
        let record = VersionRecord {
            app_version: app_version.to_string(),
            db_version: db_version.to_string(),
            description: description.to_string(),
            source: format!("{}/{}", self.config.repo_uri.trim_end_matches('/'), path),
            time: Utc::now(),
        };
        let envelope = self.provider.set_version(&record).await;
        if let Some(error) = envelope.error() {
            return Err(SchemaError::provider("set version", error));
        }
        Ok(())
    }
}

/// A command with no scripts, used only to probe connectivity.
fn test_connection_command() -> Command {
    Command {
        name: "test connection".to_string(),
        description: String::new(),
        transactional: false,
        as_admin: true,
        use_db: false,
        scripts: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::envelope::Envelope;
    use crate::provider::DatabaseProvider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted provider that records the sequence of calls it receives.
    struct MockProvider {
        version: Mutex<Option<VersionRecord>>,
        calls: Mutex<Vec<String>>,
        failing_command: Option<String>,
    }

    impl MockProvider {
        fn new(version: Option<VersionRecord>) -> Self {
            Self {
                version: Mutex::new(version),
                calls: Mutex::new(Vec::new()),
                failing_command: None,
            }
        }

        fn failing(version: Option<VersionRecord>, command: &str) -> Self {
            Self {
                failing_command: Some(command.to_string()),
                ..Self::new(version)
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DatabaseProvider for MockProvider {
        async fn setup(&self, _config: &Config) -> Envelope {
            self.record("setup".into());
            Envelope::new()
        }

        async fn get_info(&self) -> Envelope {
            self.record("getInfo".into());
            Envelope::with_result(json!({
                "version": "PostgreSQL 16.2",
                "database": "appdb",
                "user": "app",
            }))
        }

        async fn get_version(&self) -> Envelope {
            self.record("getVersion".into());
            match self.version.lock().unwrap().as_ref() {
                Some(v) => Envelope::with_result(json!(v)),
                None => Envelope::new(),
            }
        }

        async fn set_version(&self, version: &VersionRecord) -> Envelope {
            self.record(format!("setVersion:{}", version.app_version));
            *self.version.lock().unwrap() = Some(version.clone());
            Envelope::new()
        }

        async fn run_command(&self, command: &Command) -> Envelope {
            self.record(format!("runCommand:{}", command.name));
            if self.failing_command.as_deref() == Some(command.name.as_str()) {
                return Envelope::from_error("syntax error at or near \"BOOM\"");
            }
            let mut envelope = Envelope::new();
            envelope.append_log(format!("applied {} script(s)", command.scripts.len()));
            envelope
        }

        async fn run_query(&self, query: &Query) -> Envelope {
            self.record(format!("runQuery:{}", query.name));
            Envelope::with_result(json!({
                "header": ["count"],
                "rows": [["42"]],
            }))
        }
    }

    fn make_version(app: &str, db: &str) -> VersionRecord {
        VersionRecord {
            app_version: app.to_string(),
            db_version: db.to_string(),
            description: format!("Created database version {}", db),
            source: "test".to_string(),
            time: Utc::now(),
        }
    }

    fn write_manifest(dir: &std::path::Path, body: &str, scripts: &[&str]) {
        fs::create_dir_all(dir.join("commands")).unwrap();
        fs::write(dir.join("manifest.json"), body).unwrap();
        for script in scripts {
            fs::write(dir.join("commands").join(script), "SELECT 1;").unwrap();
        }
    }

    fn command_json(name: &str, file: &str) -> String {
        format!(
            r#""{name}": {{"name": "{name}", "transactional": true, "useDb": true,
                "scripts": [{{"name": "{name}", "file": "{file}"}}]}}"#
        )
    }

    /// Three-release source tree exercising every upgrade phase.
    fn make_release_source() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("plan.json"),
            r#"{"releases": [
                {"appVersion": "0.0.1", "dbVersion": "1", "path": "v1"},
                {"appVersion": "0.0.2", "dbVersion": "2", "path": "v2"},
                {"appVersion": "0.0.3", "dbVersion": "3", "path": "v3"}
            ]}"#,
        )
        .unwrap();

        let v1 = format!(
            r#"{{"appVersion": "0.0.1", "dbVersion": "1",
                "create": {{"commands": ["create-db"]}},
                "deploy": {{"commands": ["deploy-schema", "deploy-objects"]}},
                "upgrade": {{"prepare": "v1-prepare"}},
                "commands": {{
                    {create}, {schema}, {objects}, {prepare}
                }},
                "queries": {{
                    "user-count": {{"name": "user-count",
                        "vars": [{{"name": "role", "fromInput": "role"}}]}}
                }}}}"#,
            create = command_json("create-db", "create.sql"),
            schema = command_json("deploy-schema", "schema.sql"),
            objects = command_json("deploy-objects", "objects.sql"),
            prepare = command_json("v1-prepare", "prepare.sql"),
        );
        write_manifest(
            &dir.path().join("v1"),
            &v1,
            &["create.sql", "schema.sql", "objects.sql", "prepare.sql"],
        );
        fs::create_dir_all(dir.path().join("v1/queries")).unwrap();
        fs::write(
            dir.path().join("v1/queries/user-count.sql"),
            "SELECT count(*) FROM users WHERE role = '{{role}}';",
        )
        .unwrap();

        for (version, db_version, path) in [("0.0.2", "2", "v2"), ("0.0.3", "3", "v3")] {
            let short = path;
            let manifest = format!(
                r#"{{"appVersion": "{version}", "dbVersion": "{db_version}",
                    "upgrade": {{"prepare": "{short}-prepare", "alter": "{short}-alter",
                                 "deploy": "{short}-deploy"}},
                    "commands": {{ {prepare}, {alter}, {deploy} }}}}"#,
                prepare = command_json(&format!("{short}-prepare"), "prepare.sql"),
                alter = command_json(&format!("{short}-alter"), "alter.sql"),
                deploy = command_json(&format!("{short}-deploy"), "deploy.sql"),
            );
            write_manifest(
                &dir.path().join(path),
                &manifest,
                &["prepare.sql", "alter.sql", "deploy.sql"],
            );
        }
        dir
    }

    fn make_config(dir: &TempDir, target: &str) -> Config {
        Config {
            app_version: target.to_string(),
            db_name: "appdb".into(),
            repo_uri: dir.path().to_str().unwrap().to_string(),
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
        }
    }

    async fn make_engine(
        dir: &TempDir,
        target: &str,
        provider: MockProvider,
    ) -> (ReleaseEngine, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let engine = ReleaseEngine::new(make_config(dir, target), provider.clone())
            .await
            .unwrap();
        (engine, provider)
    }

    #[tokio::test]
    async fn test_create_on_fresh_database() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let report = engine.create().await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(
            provider.calls(),
            vec!["setup", "getVersion", "runCommand:create-db"]
        );
        assert!(report.log.contains("create-db"));
    }

    #[tokio::test]
    async fn test_create_fails_when_version_exists() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.1",
            MockProvider::new(Some(make_version("0.0.1", "1"))),
        )
        .await;

        let report = engine.create().await;
        assert!(matches!(
            report.error,
            Some(SchemaError::AlreadyExists { .. })
        ));
        // no command ran and no history was written
        assert_eq!(provider.calls(), vec!["setup", "getVersion"]);
    }

    #[tokio::test]
    async fn test_deploy_runs_commands_then_writes_history() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let report = engine.deploy().await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(
            provider.calls(),
            vec![
                "setup",
                "getVersion",
                "runCommand:deploy-schema",
                "runCommand:deploy-objects",
                "setVersion:0.0.1",
            ]
        );
        let version = provider.version.lock().unwrap().clone().unwrap();
        assert_eq!(version.description, "Created database version 1");
        assert!(version.source.ends_with("/v1"));
    }

    #[tokio::test]
    async fn test_deploy_fails_when_version_exists() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.1",
            MockProvider::new(Some(make_version("0.0.1", "1"))),
        )
        .await;

        let report = engine.deploy().await;
        assert!(matches!(
            report.error,
            Some(SchemaError::AlreadyExists { .. })
        ));
        assert_eq!(provider.calls(), vec!["setup", "getVersion"]);
    }

    #[tokio::test]
    async fn test_deploy_aborts_on_failing_command() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.1",
            MockProvider::failing(None, "deploy-objects"),
        )
        .await;

        let report = engine.deploy().await;
        assert!(matches!(report.error, Some(SchemaError::Provider { .. })));
        // the failing command aborts before any history write
        assert_eq!(
            provider.calls(),
            vec![
                "setup",
                "getVersion",
                "runCommand:deploy-schema",
                "runCommand:deploy-objects",
            ]
        );
        // the log still carries the successful command's output
        assert!(report.log.contains("deploy-schema"));
        assert!(report.log.contains("has failed"));
    }

    #[tokio::test]
    async fn test_upgrade_across_two_releases() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.3",
            MockProvider::new(Some(make_version("0.0.1", "1"))),
        )
        .await;

        let report = engine.upgrade().await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(
            provider.calls(),
            vec![
                "setup",
                "getVersion",
                "runCommand:v1-prepare",
                "runCommand:v2-alter",
                "setVersion:0.0.2",
                "runCommand:v3-alter",
                "runCommand:v3-deploy",
                "setVersion:0.0.3",
            ]
        );
        let version = provider.version.lock().unwrap().clone().unwrap();
        assert_eq!(version.app_version, "0.0.3");
        assert_eq!(
            version.description,
            "Upgraded database from version 1 to 3"
        );
    }

    #[tokio::test]
    async fn test_upgrade_to_current_version_is_a_noop() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.2",
            MockProvider::new(Some(make_version("0.0.2", "2"))),
        )
        .await;

        let report = engine.upgrade().await;
        assert!(report.is_success());
        assert!(report.log.contains("nothing to do"));
        assert_eq!(provider.calls(), vec!["setup", "getVersion"]);
    }

    #[tokio::test]
    async fn test_create_deploy_noop_upgrade_matches_deploy_history() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        assert!(engine.create().await.is_success());
        assert!(engine.deploy().await.is_success());
        assert!(engine.upgrade().await.is_success());

        // the whole sequence wrote exactly the history a deploy alone writes
        let history: Vec<String> = provider
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("setVersion"))
            .collect();
        assert_eq!(history, vec!["setVersion:0.0.1"]);
    }

    #[tokio::test]
    async fn test_upgrade_backward_is_invalid() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.1",
            MockProvider::new(Some(make_version("0.0.3", "3"))),
        )
        .await;

        let report = engine.upgrade().await;
        assert!(matches!(
            report.error,
            Some(SchemaError::InvalidUpgrade { .. })
        ));
        assert_eq!(provider.calls(), vec!["setup", "getVersion"]);
    }

    #[tokio::test]
    async fn test_upgrade_requires_a_deployed_database() {
        let dir = make_release_source();
        let (engine, _) = make_engine(&dir, "0.0.3", MockProvider::new(None)).await;

        let report = engine.upgrade().await;
        assert!(matches!(report.error, Some(SchemaError::NotDeployed)));
    }

    #[tokio::test]
    async fn test_upgrade_with_empty_plan_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plan.json"), r#"{"releases": []}"#).unwrap();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.3",
            MockProvider::new(Some(make_version("0.0.1", "1"))),
        )
        .await;

        let report = engine.upgrade().await;
        assert!(matches!(report.error, Some(SchemaError::Validation(_))));
        assert_eq!(provider.calls(), vec!["setup", "getVersion"]);
    }

    #[tokio::test]
    async fn test_upgrade_aborts_midway_without_history_write() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.3",
            MockProvider::failing(Some(make_version("0.0.1", "1")), "v2-alter"),
        )
        .await;

        let report = engine.upgrade().await;
        assert!(matches!(report.error, Some(SchemaError::Provider { .. })));
        assert_eq!(
            provider.calls(),
            vec![
                "setup",
                "getVersion",
                "runCommand:v1-prepare",
                "runCommand:v2-alter",
            ]
        );
        // the failed stage never reached the version history
        let version = provider.version.lock().unwrap().clone().unwrap();
        assert_eq!(version.app_version, "0.0.1");
    }

    #[tokio::test]
    async fn test_run_executes_commands_in_the_order_given() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let report = engine.run("deploy-objects, deploy-schema").await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(
            provider.calls(),
            vec![
                "setup",
                "runCommand:deploy-objects",
                "runCommand:deploy-schema",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_without_names_is_rejected() {
        let dir = make_release_source();
        let (engine, _) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let report = engine.run("  ").await;
        assert!(matches!(report.error, Some(SchemaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_run_with_unknown_name_is_rejected() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let report = engine.run("no-such-command").await;
        assert!(matches!(report.error, Some(SchemaError::Validation(_))));
        assert_eq!(provider.calls(), vec!["setup"]);
    }

    #[tokio::test]
    async fn test_query_returns_table_and_metadata() {
        let dir = make_release_source();
        let (engine, _) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let mut params = HashMap::new();
        params.insert("role".to_string(), "admin".to_string());
        let outcome = engine.query("user-count", &params).await.unwrap();
        assert_eq!(outcome.table.rows, vec![vec!["42".to_string()]]);
        assert!(outcome.query.content.contains("'admin'"));
    }

    #[tokio::test]
    async fn test_query_parameter_cardinality_is_checked() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let err = engine.query("user-count", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
        // validation failed before any provider call
        assert_eq!(provider.calls(), vec!["setup"]);
    }

    #[tokio::test]
    async fn test_query_unknown_name() {
        let dir = make_release_source();
        let (engine, _) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let err = engine
            .query("no-such-query", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }

    #[tokio::test]
    async fn test_check_ready() {
        let dir = make_release_source();
        let (engine, _) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let results = engine.check_config_set().await;
        assert_eq!(results["release source"], "OK");
        assert_eq!(results["db connection"], "OK");
        assert!(engine.check_ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_check_ready_reports_failing_connection() {
        let dir = make_release_source();
        let (engine, _) = make_engine(
            &dir,
            "0.0.1",
            MockProvider::failing(None, "test connection"),
        )
        .await;

        let err = engine.check_ready().await.unwrap_err();
        assert!(matches!(err, SchemaError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_wait_for_connection_returns_last_error() {
        let dir = make_release_source();
        let (engine, provider) = make_engine(
            &dir,
            "0.0.1",
            MockProvider::failing(None, "test connection"),
        )
        .await;

        let err = engine
            .wait_for_connection(2, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Connectivity(_)));
        assert_eq!(
            provider.calls(),
            vec![
                "setup",
                "runCommand:test connection",
                "runCommand:test connection",
            ]
        );
    }

    #[tokio::test]
    async fn test_get_db_info() {
        let dir = make_release_source();
        let (engine, _) = make_engine(&dir, "0.0.1", MockProvider::new(None)).await;

        let info = engine.get_db_info().await.unwrap();
        assert_eq!(info.database, "appdb");
        assert!(info.version.starts_with("PostgreSQL"));
    }
}
