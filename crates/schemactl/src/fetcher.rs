//! Release source resolution and script retrieval.
//!
//! The fetcher resolves everything under a single source root: the release
//! plan at `plan.<fmt>`, one manifest per release at
//! `<release-path>/manifest.<fmt>`, and script bodies under the manifest's
//! `commands_path`/`queries_path`. The root is either an HTTP(S) URI or a
//! local directory; JSON and YAML are auto-detected by extension.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::{Result, SchemaError};
use crate::manifest::{Command, Manifest, Plan, Query, Release};

/// Candidate extensions probed for plan and manifest documents, in order.
const DOCUMENT_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

enum SourceRoot {
    Remote(String),
    Local(PathBuf),
}

/// Retrieves plans, manifests, and script bodies from the release source.
pub struct ScriptFetcher {
    root: SourceRoot,
    client: reqwest::Client,
}

impl ScriptFetcher {
    /// Create a fetcher for a source root URI.
    ///
    /// `http://` and `https://` roots are fetched over the network; anything
    /// else (including `file://`) is treated as a local directory.
    pub fn new(repo_uri: &str) -> Result<Self> {
        if repo_uri.is_empty() {
            return Err(SchemaError::Config(
                "the release source URI has not been set".into(),
            ));
        }
        let root = match Url::parse(repo_uri) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                SourceRoot::Remote(repo_uri.trim_end_matches('/').to_string())
            }
            Ok(url) if url.scheme() == "file" => SourceRoot::Local(PathBuf::from(url.path())),
            _ => SourceRoot::Local(PathBuf::from(repo_uri)),
        };
        Ok(Self {
            root,
            client: reqwest::Client::new(),
        })
    }

    /// Load the ordered release plan from the source root.
    pub async fn fetch_plan(&self) -> Result<Plan> {
        self.fetch_document("plan").await
    }

    /// Retrieve and parse the manifest for a release.
    ///
    /// The returned [`Release`] carries the canonical path used by
    /// subsequent script lookups.
    pub async fn fetch_manifest(&self, app_version: &str) -> Result<(Release, Manifest)> {
        let release = self.find_release(app_version).await?;
        let manifest = self
            .fetch_document(&format!("{}/manifest", release.path))
            .await?;
        Ok((release, manifest))
    }

    /// Materialize the script bodies for a command.
    pub async fn fetch_command_content(
        &self,
        app_version: &str,
        commands_path: &str,
        command: &Command,
    ) -> Result<Command> {
        let release = self.find_release(app_version).await?;
        let mut command = command.clone();
        for script in &mut command.scripts {
            let rel = format!("{}/{}/{}", release.path, commands_path, script.file);
            script.content = self.read_required(&rel).await?;
        }
        Ok(command)
    }

    /// Materialize a query body with parameter substitution applied.
    ///
    /// Each declared var binds either to a caller-supplied parameter
    /// (`from_input`) or to a fixed value; `{{name}}` tokens in the body are
    /// replaced with the bound value. A missing required parameter fails
    /// before anything touches the database.
    pub async fn fetch_query_content(
        &self,
        app_version: &str,
        queries_path: &str,
        query: &Query,
        params: &HashMap<String, String>,
    ) -> Result<Query> {
        let release = self.find_release(app_version).await?;
        let rel = format!("{}/{}/{}", release.path, queries_path, query.file_name());
        let mut query = query.clone();
        let mut content = self.read_required(&rel).await?;
        for var in &query.vars {
            let value = if !var.from_input.is_empty() {
                params.get(&var.from_input).ok_or_else(|| {
                    SchemaError::Validation(format!(
                        "the required query parameter '{}' has not been provided",
                        var.from_input
                    ))
                })?
            } else {
                &var.from_value
            };
            content = content.replace(&format!("{{{{{}}}}}", var.name), value);
        }
        query.content = content;
        Ok(query)
    }

    async fn find_release(&self, app_version: &str) -> Result<Release> {
        let plan = self.fetch_plan().await?;
        plan.release(app_version).cloned().ok_or_else(|| {
            SchemaError::Validation(format!(
                "application version '{}' is not in the release plan",
                app_version
            ))
        })
    }

    /// Probe `<base>.<ext>` for each known extension and parse the first hit.
    async fn fetch_document<T: DeserializeOwned>(&self, base: &str) -> Result<T> {
        for ext in DOCUMENT_EXTENSIONS {
            let rel = format!("{}.{}", base, ext);
            let Some(content) = self.read_optional(&rel).await? else {
                continue;
            };
            debug!("fetched release document {}", rel);
            let parsed = if ext == "json" {
                serde_json::from_str(&content)
                    .map_err(|e| SchemaError::Validation(format!("cannot parse {}: {}", rel, e)))?
            } else {
                serde_yaml::from_str(&content)
                    .map_err(|e| SchemaError::Validation(format!("cannot parse {}: {}", rel, e)))?
            };
            return Ok(parsed);
        }
        Err(SchemaError::Connectivity(format!(
            "cannot find '{}.(json|yaml|yml)' under the release source",
            base
        )))
    }

    async fn read_required(&self, rel: &str) -> Result<String> {
        self.read_optional(rel).await?.ok_or_else(|| {
            SchemaError::Connectivity(format!("'{}' is missing from the release source", rel))
        })
    }

    /// Read a file relative to the source root.
    ///
    /// Returns `Ok(None)` when the file does not exist; network and IO
    /// failures other than not-found are connectivity errors.
    async fn read_optional(&self, rel: &str) -> Result<Option<String>> {
        match &self.root {
            SourceRoot::Local(dir) => {
                let path = dir.join(rel);
                if !path.is_file() {
                    return Ok(None);
                }
                Ok(Some(std::fs::read_to_string(path)?))
            }
            SourceRoot::Remote(base) => {
                let url = format!("{}/{}", base, rel);
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| SchemaError::Connectivity(format!("GET {}: {}", url, e)))?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(SchemaError::Connectivity(format!(
                        "GET {}: unexpected status {}",
                        url,
                        response.status()
                    )));
                }
                let body = response
                    .text()
                    .await
                    .map_err(|e| SchemaError::Connectivity(format!("GET {}: {}", url, e)))?;
                Ok(Some(body))
            }
        }
    }
}
