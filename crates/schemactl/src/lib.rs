//! # schemactl
//!
//! Manifest-driven database release lifecycle manager and schema differ.
//!
//! The crate has two halves:
//!
//! - **The release engine** resolves a declarative release manifest for an
//!   application version into a sequence of idempotent actions (create,
//!   deploy, upgrade, run named commands, execute named queries) and applies
//!   them to a target database through a pluggable provider, recording
//!   version history as it goes.
//! - **The schema differ** reads the authoritative structure of two live
//!   schemas, computes a typed delta, and emits a forward/reverse migration
//!   script pair with warnings for non-reversible operations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use schemactl::{Config, ReleaseEngine};
//!
//! #[tokio::main]
//! async fn main() -> schemactl::Result<()> {
//!     let raw = std::fs::read_to_string("config.yaml")?;
//!     let config = Config::from_yaml(&raw)?;
//!     let provider = schemactl::provider::discover(&config)?;
//!     let engine = ReleaseEngine::new(config, provider).await?;
//!
//!     let report = engine.deploy().await;
//!     print!("{}", report.log);
//!     match report.error {
//!         None => println!("deployed in {:?}", report.elapsed),
//!         Some(e) => eprintln!("{}", e),
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod diff;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fetcher;
pub mod manifest;
pub mod provider;

// Re-exports for convenient access
pub use config::{Config, ProviderConfig};
pub use engine::{ActionReport, QueryOutcome, ReleaseEngine};
pub use envelope::{DbInfo, Envelope, Table, VersionRecord};
pub use error::{Result, SchemaError};
pub use fetcher::ScriptFetcher;
pub use manifest::{Command, Manifest, Plan, Query, Release, Script, Var};
pub use provider::{DatabaseProvider, PgsqlProvider, RemoteProvider};
