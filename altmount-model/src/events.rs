use std::fmt;

use serde::{Deserialize, Serialize};

/// Verdict of one health check over a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventType {
    /// Every sampled segment was reachable.
    FileHealthy,
    /// The metadata contradicts itself or at least one article is
    /// definitively gone from the providers.
    FileCorrupted,
    /// The check could not complete; the environment is suspect, not the
    /// file.
    CheckFailed,
    /// The metadata record has vanished; the row is a zombie.
    FileRemoved,
}

impl HealthEventType {
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::FileHealthy => "health.file_healthy",
            Self::FileCorrupted => "health.file_corrupted",
            Self::CheckFailed => "health.check_failed",
            Self::FileRemoved => "health.file_removed",
        }
    }
}

impl fmt::Display for HealthEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Outcome of the health checker for one file, carried to the worker's
/// state machine and to the VFS invalidation hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub event_type: HealthEventType,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl HealthEvent {
    pub fn healthy() -> Self {
        Self {
            event_type: HealthEventType::FileHealthy,
            error: None,
            details: None,
        }
    }

    pub fn corrupted(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            event_type: HealthEventType::FileCorrupted,
            error: Some(error.into()),
            details,
        }
    }

    pub fn check_failed(error: impl Into<String>) -> Self {
        Self {
            event_type: HealthEventType::CheckFailed,
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn removed() -> Self {
        Self {
            event_type: HealthEventType::FileRemoved,
            error: None,
            details: None,
        }
    }
}
