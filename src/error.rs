use crate::request::{Request, RequestId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(RequestId),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Json(_) => -2,
            Error::Config(_) => -3,
            Error::RequestNotFound(_) => -4,
            Error::DuplicateRequest(_) => -5,
            Error::Metrics(_) => -6,
            Error::InvariantViolation(_) => -99,
        }
    }

    /// Build an invariant violation and report it loudly.
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(violation = %message, "scheduler invariant violated");
        Error::InvariantViolation(message)
    }
}

/// A request the scheduler refused to admit, handed back to the host.
#[derive(Error, Debug)]
#[error("{} rejected: {error}", .request.id)]
pub struct Rejected {
    #[source]
    pub error: Error,
    pub request: Request,
}

impl Rejected {
    pub(crate) fn new(error: Error, request: Request) -> Self {
        Self { error, request }
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

impl From<Rejected> for Error {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}
