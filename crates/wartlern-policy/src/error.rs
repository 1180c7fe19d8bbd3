use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Snapshot deserialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Unsupported snapshot version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
