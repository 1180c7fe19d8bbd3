use thiserror::Error;
use wartlern_policy::PolicyError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The caller must fix the request and retry.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("A training session is already running")]
    AlreadyRunning,
    #[error("Not found: {0}")]
    NotFound(String),
    /// The in-memory state is intact; only durability is affected.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<PolicyError> for EngineError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::InvalidInput(msg) => EngineError::InvalidInput(msg),
            PolicyError::PersistenceUnavailable(msg) => EngineError::PersistenceUnavailable(msg),
            PolicyError::Io(e) => EngineError::PersistenceUnavailable(e.to_string()),
            PolicyError::Snapshot(e) => {
                EngineError::PersistenceUnavailable(format!("stored knowledge is unreadable: {e}"))
            }
            e @ PolicyError::UnsupportedVersion { .. } => {
                EngineError::PersistenceUnavailable(e.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
