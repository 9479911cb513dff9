pub mod http;

pub use http::HttpArrService;

use async_trait::async_trait;

/// Errors from the ARR integration. The repair orchestrator interprets
/// exactly three categories: the two sentinels (the file has left ARR's
/// world), and everything else (the repair attempt failed and will be
/// retried).
#[derive(Debug, thiserror::Error)]
pub enum ArrError {
    /// The episode or movie is already satisfied by a different file; ARR
    /// will not replace anything.
    #[error("already satisfied by another file")]
    EpisodeAlreadySatisfied,

    /// No configured ARR instance recognises the path.
    #[error("no ARR path matched: {0}")]
    PathMatchFailed(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ArrError {
    /// Sentinels mean the file is no longer tracked by ARR: the health row
    /// must be deleted, not retried.
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            ArrError::EpisodeAlreadySatisfied | ArrError::PathMatchFailed(_)
        )
    }
}

/// Capability the repair orchestrator needs from a media manager: ask it
/// to re-evaluate one file so a broken release gets replaced.
#[async_trait]
pub trait ArrService: Send + Sync {
    /// `path_for_rescan` is the absolute path the ARR instance knows the
    /// file by; `relative_path` is the virtual path inside the mount, kept
    /// for logging and instance routing.
    async fn trigger_file_rescan(
        &self,
        path_for_rescan: &str,
        relative_path: &str,
    ) -> Result<(), ArrError>;
}
