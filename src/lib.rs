//! reliefweb-import - reconciles documents from external humanitarian data
//! APIs into ReliefWeb.
//!
//! # Overview
//!
//! Every importer runs the same loop:
//!
//! ```text
//! Fetcher -> Deduplicator -> Field Mapper -> Attempt Tracker -> Submitter
//! ```
//!
//! A source adapter fetches raw documents. Each document gets a UUID from its
//! canonical URL and a hash over its meaningful fields; unchanged documents
//! are skipped. Changed or new ones are mapped onto ReliefWeb terms with
//! static lookup tables and handed to an external submitter. Every outcome is
//! tracked per document so failures are retried a bounded number of times.
//!
//! # Secrets
//!
//! API keys, passwords and tokens are redacted from every error message and
//! never logged.
//!
//! # Modules
//!
//! - [`config`]: Environment configuration
//! - [`data_sources`]: Source adapters (ECHO, World Bank, Inoreader, Logistics Cluster, WorkDay)
//! - [`fetcher`]: HTTP sessions and authentication
//! - [`dedup`]: Item UUIDs, content hashes and the re-import decision
//! - [`taxonomy`]: ReliefWeb lookup tables
//! - [`model`]: Documents, submissions, import records and run summaries
//! - [`submitter`]: Outbound submission
//! - [`storage`]: SQLite storage for import records
//! - [`reconcile`]: The reconciliation loop
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod config;
pub mod data_sources;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod reconcile;
pub mod storage;
pub mod submitter;
pub mod taxonomy;
