use crate::upload::UploadRejection;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PortalError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    Upload(#[from] UploadRejection),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unknown belt: {0}")]
    UnknownBelt(String),
    #[error("Finish the readiness tracker before requesting a test: {}", .0.join("; "))]
    NotReady(Vec<String>),
    #[error("cannot {action} while test request is {from}")]
    InvalidTransition { from: &'static str, action: &'static str },
}

impl PortalError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
