//! Core library for the AltMount health & repair pipeline.
//!
//! The pipeline continuously proves that every tracked virtual file is
//! still fetchable from its NNTP providers, and escalates files that are
//! not to the owning media manager for replacement. See `health` for the
//! worker, `metadata` for the on-disk record store, and `database` for the
//! durable health table.
#![allow(missing_docs)]

pub mod arr;
pub mod database;
pub mod error;
pub mod health;
pub mod metadata;
pub mod nntp;
pub mod vfs;

pub use arr::{ArrError, ArrService, HttpArrService};
pub use database::ports::health::HealthRepository;
pub use database::sqlite::repositories::health::SqliteHealthRepository;
pub use error::{HealthError, Result};
pub use health::checker::{CheckOptions, FileChecker, HealthChecker};
pub use health::repair::{RepairOrchestrator, RepairOutcome};
pub use health::worker::HealthWorker;
pub use metadata::store::MetadataStore;
pub use nntp::{NntpClient, NntpError, NntpPool};
pub use vfs::{NoopVfsNotifier, VfsNotifier};
