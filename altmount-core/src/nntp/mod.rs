use std::sync::Arc;

use async_trait::async_trait;

/// Errors surfaced by NNTP probes. The health checker only distinguishes
/// definitive misses (the article is gone from the provider) from
/// transient conditions (the environment is suspect, not the file).
#[derive(Debug, thiserror::Error)]
pub enum NntpError {
    #[error("article not found: {0}")]
    ArticleNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),
}

impl NntpError {
    /// True when the provider definitively reported the article missing,
    /// as opposed to failing to answer.
    pub fn is_definitive_miss(&self) -> bool {
        matches!(self, NntpError::ArticleNotFound(_))
    }
}

/// One pooled NNTP connection's worth of capability. The checker never
/// downloads bodies; it proves reachability.
#[async_trait]
pub trait NntpClient: Send + Sync {
    /// Header-level existence query (`STAT`) for an article id.
    async fn stat(&self, article_id: &str) -> Result<(), NntpError>;

    /// Fetches exactly one byte of the article body. Defends against
    /// indexes that advertise articles which cannot actually be retrieved.
    async fn body_first_byte(&self, article_id: &str) -> Result<(), NntpError>;
}

/// Access to the shared provider connection pool.
#[async_trait]
pub trait NntpPool: Send + Sync {
    async fn get_pool(&self) -> Result<Arc<dyn NntpClient>, NntpError>;
}
