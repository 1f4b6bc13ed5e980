use thiserror::Error;
use zbus::zvariant;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),
    #[error("failed to decode portal payload: {0}")]
    Variant(#[from] zvariant::Error),
    #[error("{operation} canceled")]
    Cancelled { operation: &'static str },
    #[error("{operation} failed (response code {response})")]
    ResponseFailed {
        operation: &'static str,
        response: u32,
    },
    #[error("result of `{found}` passed to the finish of `{expected}`")]
    OperationMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{operation} response is missing `{key}`")]
    MissingResult {
        operation: &'static str,
        key: &'static str,
    },
    #[error("the bus connection has no unique name")]
    NoUniqueName,
    #[error("failed to export parent window: {0}")]
    ParentExport(String),
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("request task ended without delivering an outcome")]
    Abandoned,
    #[error("portal requests must be started from within a tokio runtime")]
    NoRuntime,
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the user (or the caller's cancellation token) dismissed the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
