//! Core data model definitions shared across AltMount crates.
#![allow(missing_docs)]

pub mod error;
pub mod events;
pub mod health;
pub mod metadata;
pub mod worker;

// Intentionally curated re-exports for downstream consumers.
pub use error::SegmentMapError;
pub use events::{HealthEvent, HealthEventType};
pub use health::{
    FileHealth, HealthStatus, HealthStatusUpdate, UpdateType, priority,
};
pub use metadata::{FileMetadata, MetadataStatus, Segment};
pub use worker::{WorkerStats, WorkerStatus};
