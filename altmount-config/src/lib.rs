//! Configuration models and loading for AltMount.
//!
//! The rest of the system consumes configuration through a [`ConfigGetter`]
//! closure that always returns the current immutable snapshot; hot-reload
//! machinery lives outside this crate and simply swaps the snapshot the
//! getter hands out.
#![allow(missing_docs)]

pub mod models;

use std::sync::Arc;

pub use models::{
    ArrInstanceConfig, ArrKind, ArrsConfig, Config, ConfigSource, HealthConfig,
    ImportConfig, MetadataConfig, SabnzbdCategory, SabnzbdConfig,
};

/// Cheap accessor for the current configuration snapshot.
pub type ConfigGetter = Arc<dyn Fn() -> Arc<Config> + Send + Sync>;

/// Wraps a fixed configuration in a [`ConfigGetter`]. Useful for tests and
/// for deployments that do not hot-reload.
pub fn static_config(config: Config) -> ConfigGetter {
    let snapshot = Arc::new(config);
    Arc::new(move || Arc::clone(&snapshot))
}
