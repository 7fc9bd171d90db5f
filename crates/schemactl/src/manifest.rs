//! Release manifest and release plan model.
//!
//! A manifest describes everything one application version needs from the
//! database: the commands behind each lifecycle action and the named queries
//! it exposes. The plan is the ordered list of releases defining the canonical
//! upgrade path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Declarative description of one release.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Application version this manifest belongs to.
    pub app_version: String,

    /// Database schema version deployed by this release.
    pub db_version: String,

    /// Human-readable release description.
    #[serde(default)]
    pub description: String,

    /// Directory (relative to the release path) holding command scripts.
    #[serde(default = "default_commands_path")]
    pub commands_path: String,

    /// Directory (relative to the release path) holding query bodies.
    #[serde(default = "default_queries_path")]
    pub queries_path: String,

    /// Commands run to create an empty database.
    #[serde(default)]
    pub create: ActionBinding,

    /// Commands run to deploy schema and objects into an empty database.
    #[serde(default)]
    pub deploy: ActionBinding,

    /// Named command slots for the upgrade phases.
    #[serde(default)]
    pub upgrade: UpgradeBinding,

    /// Command definitions keyed by identifier.
    #[serde(default)]
    pub commands: BTreeMap<String, Command>,

    /// Query definitions keyed by identifier.
    #[serde(default)]
    pub queries: BTreeMap<String, Query>,
}

fn default_commands_path() -> String {
    "commands".to_string()
}

fn default_queries_path() -> String {
    "queries".to_string()
}

/// Ordered command identifiers bound to a lifecycle action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionBinding {
    #[serde(default)]
    pub commands: Vec<String>,
}

/// The three named command slots of an upgrade. Any slot may be empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeBinding {
    /// Drops pre-existing objects in preparation for altering the schema.
    #[serde(default)]
    pub prepare: String,

    /// Alters the schema of an intermediate or target release.
    #[serde(default)]
    pub alter: String,

    /// Re-creates objects on the target release.
    #[serde(default)]
    pub deploy: String,
}

/// An ordered list of scripts executed as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Execute all scripts inside a single transaction.
    #[serde(default)]
    pub transactional: bool,

    /// Execute with administrative credentials.
    #[serde(default)]
    pub as_admin: bool,

    /// Execute against the managed database (as opposed to the server).
    #[serde(default)]
    pub use_db: bool,

    #[serde(default)]
    pub scripts: Vec<Script>,
}

/// A script body reference; `content` is resolved lazily by the fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub name: String,

    /// File name under the manifest's `commands_path`.
    pub file: String,

    /// Script body, empty until fetched.
    #[serde(default)]
    pub content: String,
}

/// A named query with declared input bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// File name under the manifest's `queries_path`; defaults to `<name>.sql`.
    #[serde(default)]
    pub file: String,

    #[serde(default)]
    pub vars: Vec<Var>,

    /// Query body, empty until fetched.
    #[serde(default)]
    pub content: String,
}

impl Query {
    /// The file the query body lives in.
    pub fn file_name(&self) -> String {
        if self.file.is_empty() {
            format!("{}.sql", self.name)
        } else {
            self.file.clone()
        }
    }
}

/// One declared query variable.
///
/// A non-empty `from_input` names a key the caller must supply; otherwise
/// `from_value` provides a fixed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Var {
    pub name: String,

    #[serde(default)]
    pub from_input: String,

    #[serde(default)]
    pub from_value: String,
}

impl Manifest {
    /// Resolve command identifiers into command definitions, preserving order.
    ///
    /// Empty identifiers are skipped (an unbound upgrade slot); an unknown
    /// identifier is a validation error.
    pub fn get_commands(&self, names: &[String]) -> Result<Vec<Command>> {
        let mut commands = Vec::with_capacity(names.len());
        for name in names {
            if name.is_empty() {
                continue;
            }
            match self.commands.get(name) {
                Some(cmd) => commands.push(cmd.clone()),
                None => {
                    return Err(SchemaError::Validation(format!(
                        "command '{}' is not defined in the manifest for version {}",
                        name, self.app_version
                    )))
                }
            }
        }
        Ok(commands)
    }

    /// Look up a query definition by identifier.
    pub fn get_query(&self, name: &str) -> Option<&Query> {
        self.queries.get(name)
    }
}

/// One entry of the release plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub app_version: String,
    pub db_version: String,

    /// Release directory relative to the source root.
    pub path: String,
}

/// The ordered sequence of releases defining the canonical upgrade path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub releases: Vec<Release>,
}

impl Plan {
    /// Index of the release for an application version, if it is in the plan.
    pub fn index_of(&self, app_version: &str) -> Option<usize> {
        self.releases
            .iter()
            .position(|r| r.app_version == app_version)
    }

    /// Resolve the `(current, target)` index pair for an upgrade.
    ///
    /// Returns `None` when either version is not in the plan (including the
    /// empty plan). A valid forward upgrade additionally requires
    /// `target > current`, which is the engine's check.
    pub fn upgrade_window(&self, current: &str, target: &str) -> Option<(usize, usize)> {
        Some((self.index_of(current)?, self.index_of(target)?))
    }

    /// Find a release by application version.
    pub fn release(&self, app_version: &str) -> Option<&Release> {
        self.releases.iter().find(|r| r.app_version == app_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_plan(versions: &[&str]) -> Plan {
        Plan {
            releases: versions
                .iter()
                .enumerate()
                .map(|(i, v)| Release {
                    app_version: v.to_string(),
                    db_version: (i + 1).to_string(),
                    path: format!("v{}", i + 1),
                })
                .collect(),
        }
    }

    #[test]
    fn test_upgrade_window_forward() {
        let plan = make_plan(&["0.0.1", "0.0.2", "0.0.3"]);
        assert_eq!(plan.upgrade_window("0.0.1", "0.0.3"), Some((0, 2)));
    }

    #[test]
    fn test_upgrade_window_backward_resolves_but_is_not_forward() {
        let plan = make_plan(&["0.0.1", "0.0.2", "0.0.3"]);
        let (current, target) = plan.upgrade_window("0.0.3", "0.0.1").unwrap();
        assert!(target <= current);
    }

    #[test]
    fn test_upgrade_window_unknown_version() {
        let plan = make_plan(&["0.0.1", "0.0.2"]);
        assert_eq!(plan.upgrade_window("0.0.1", "9.9.9"), None);
        assert_eq!(plan.upgrade_window("9.9.9", "0.0.2"), None);
    }

    #[test]
    fn test_upgrade_window_empty_plan() {
        let plan = Plan::default();
        assert_eq!(plan.upgrade_window("0.0.1", "0.0.2"), None);
    }

    #[test]
    fn test_get_commands_preserves_order_and_skips_empty() {
        let mut commands = BTreeMap::new();
        for name in ["b", "a"] {
            commands.insert(
                name.to_string(),
                Command {
                    name: name.to_string(),
                    description: String::new(),
                    transactional: false,
                    as_admin: false,
                    use_db: true,
                    scripts: vec![],
                },
            );
        }
        let manifest = Manifest {
            app_version: "0.0.1".into(),
            db_version: "1".into(),
            description: String::new(),
            commands_path: default_commands_path(),
            queries_path: default_queries_path(),
            create: ActionBinding::default(),
            deploy: ActionBinding::default(),
            upgrade: UpgradeBinding::default(),
            commands,
            queries: BTreeMap::new(),
        };

        let cmds = manifest
            .get_commands(&["b".into(), String::new(), "a".into()])
            .unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].name, "b");
        assert_eq!(cmds[1].name, "a");
    }

    #[test]
    fn test_get_commands_unknown_name() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"appVersion": "0.0.1", "dbVersion": "1"}"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.get_commands(&["missing".into()]),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_manifest_parses_from_yaml() {
        let yaml = r#"
appVersion: "0.0.2"
dbVersion: "2"
description: second release
create:
  commands: [create-db]
deploy:
  commands: [deploy-schema, deploy-objects]
upgrade:
  prepare: drop-objects
  alter: alter-schema
  deploy: deploy-objects
commands:
  create-db:
    name: create-db
    transactional: false
    asAdmin: true
    useDb: false
    scripts:
      - name: create
        file: create_db.sql
  deploy-schema:
    name: deploy-schema
    transactional: true
    useDb: true
    scripts:
      - name: schema
        file: schema.sql
  deploy-objects:
    name: deploy-objects
    transactional: true
    useDb: true
    scripts:
      - name: objects
        file: objects.sql
  drop-objects:
    name: drop-objects
    transactional: true
    useDb: true
    scripts:
      - name: drop
        file: drop_objects.sql
  alter-schema:
    name: alter-schema
    transactional: true
    useDb: true
    scripts:
      - name: alter
        file: alter.sql
queries:
  list-users:
    name: list-users
    vars:
      - name: role
        fromInput: role
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.deploy.commands.len(), 2);
        assert_eq!(manifest.upgrade.prepare, "drop-objects");
        assert!(manifest.get_query("list-users").is_some());
        let q = manifest.get_query("list-users").unwrap();
        assert_eq!(q.file_name(), "list-users.sql");
        assert_eq!(q.vars[0].from_input, "role");
    }
}
