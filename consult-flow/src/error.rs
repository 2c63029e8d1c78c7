use thiserror::Error;

/// Errors surfaced by the intake flow.
///
/// Model and voice transport failures are deliberately absent here: those are
/// absorbed at their client boundaries and turned into fallback text or
/// sentinel values (see `llm` and `voice`), so they never travel as errors.
#[derive(Error, Debug)]
pub enum ConsultError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<csv::Error> for ConsultError {
    fn from(err: csv::Error) -> Self {
        ConsultError::Directory(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsultError>;
