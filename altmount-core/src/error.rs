use thiserror::Error;

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<altmount_model::SegmentMapError> for HealthError {
    fn from(err: altmount_model::SegmentMapError) -> Self {
        HealthError::InvalidMetadata(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HealthError>;
