use crate::GroupVersionKind;

/// API error taxonomy. Every failure a caller can act on is one of these;
/// parse failures during scans are logged and never surface here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("git: {0}")]
    Git(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(gvk: &GroupVersionKind, name: &str) -> Self {
        Error::NotFound(format!("{}.{} \"{}\"", gvk.kind, gvk.group, name))
    }

    pub fn already_exists(gvk: &GroupVersionKind, name: &str) -> Self {
        Error::AlreadyExists(format!("{}.{} \"{}\"", gvk.kind, gvk.group, name))
    }

    pub fn conflict(gvk: &GroupVersionKind, name: &str, reason: impl std::fmt::Display) -> Self {
        Error::Conflict(format!("{}.{} \"{}\": {}", gvk.kind, gvk.group, name, reason))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
