//! Ingest, retention and drain service for the stumbler report store.
//!
//! This crate provides a service that:
//! - Reads reports as JSON lines and inserts them into the store
//! - Purges stored batches once they exceed the retention window
//! - Drains queued batches into an outbox directory for upload
//! - Reports queue and upload statistics
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/stumbler/service.toml`:
//!
//! ```toml
//! [storage]
//! base_dir = "/var/lib/stumbler"
//! max_bytes_stored_on_disk = 256000
//! max_weeks_data_stored = 2
//! max_reports_in_memory = 50
//! flush_delay_secs = 180
//! framing = "lines"
//!
//! [retention]
//! sweep_interval_secs = 3600
//!
//! [upload]
//! outbox = "/var/spool/stumbler"
//! ```

pub mod config;
pub mod drain;
pub mod ingest;
pub mod status;
pub mod sweeper;

pub use config::{Config, ConfigError, RetentionConfig, UploadConfig};
pub use drain::{DrainError, DrainSummary, drain};
pub use ingest::{IngestError, IngestSummary, ingest, parse_line};
pub use status::StatusReport;
pub use sweeper::Sweeper;
