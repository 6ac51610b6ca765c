//! Core library for orgstats.
//!
//! Counts commits and pull request reviews per contributor for every
//! repository of a GitHub organization, split into a recent window and an
//! all-time total.
//!
//! # Modules
//!
//! - [`walker`] - Nested GraphQL pagination with retries
//! - [`executor`] - The query seam and its GitHub implementation
//! - [`query`] - GraphQL documents and typed responses
//! - [`aggregate`] - Last-year and all-time counters
//! - [`collect`] - A full walk-and-aggregate run
//! - [`report`] - Text, CSV, and JSON rendering
//! - [`credentials`] - Token lookup from the keyring or environment
//! - [`config`] - Configuration loading and management
//! - [`error`] - Error types and result aliases
//! - `testing` - In-memory executors for tests (`testing` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use orgstats_core::{Aggregator, ConfigLoader, GithubExecutor, Walker, collect};
//! use orgstats_core::credentials::{EnvStore, KeyringStore, SecretStore, load_credential};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_user_config(true).load()?;
//! let stores: [&dyn SecretStore; 2] = [&EnvStore::default(), &KeyringStore];
//! let credential = load_credential(&stores)?;
//! let executor = GithubExecutor::new(credential, &config.github)?;
//! let walker = Walker::new(executor, config.github.walk_options());
//!
//! let aggregator = Aggregator::new(config.report.lookback());
//! let collected = collect(&walker, "rust-lang", aggregator, chrono::Utc::now(), |_| {}).await?;
//! println!("{} contributions", collected.events);
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]

pub mod aggregate;

pub mod collect;

pub mod config;

pub mod credentials;

pub mod error;

pub mod executor;

pub mod model;

pub mod query;

pub mod report;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod walker;

pub use aggregate::{Aggregator, ContributionCounts, ContributionTotals, LookbackWindow};

pub use collect::{Collected, collect};

pub use config::{Config, ConfigLoader, GithubConfig, LogLevel, ReportConfig};

pub use credentials::{Credential, CredentialError};

pub use error::{ConfigError, ConfigResult};

pub use executor::{ExecutorError, GithubExecutor, QueryExecutor};

pub use model::{Author, ContributionEvent, ContributionKind};

pub use report::{ReportFormat, ReportOptions, render};

pub use walker::{WalkError, WalkOptions, WalkSummary, Walker};
