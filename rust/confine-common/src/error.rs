use std::sync::Arc;

use thiserror::Error;

/// The error type shared by every confine-* crate.
///
/// A single fault is observed by every consumer of the future that captured it, so the
/// error is reference-counted rather than boxed: cloning an `Error` yields the *same*
/// error, which [`Error::same_as`] can confirm.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct Error(Arc<ErrorKind>);

pub type StdErrorShared = Arc<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    /// Returns `true` when both values originate from the same raised error.
    pub fn same_as(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn failed(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Failed {
                message: message.into(),
                source: None,
            }
            .into(),
        )
    }

    pub fn failed_with<E>(message: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::Failed {
                message: message.into(),
                source: Some(Arc::new(source)),
            }
            .into(),
        )
    }

    /// Converts a panic payload caught by `catch_unwind` into an error.
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Error {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "opaque panic payload".to_string()
        };
        Error(ErrorKind::Panicked { message }.into())
    }

    pub fn abandoned() -> Error {
        Error(ErrorKind::Abandoned.into())
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.kind(), ErrorKind::Panicked { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("action failed: {message}")]
    Failed {
        message: String,
        source: Option<StdErrorShared>,
    },

    #[error("action panicked: {message}")]
    Panicked { message: String },

    #[error("promise dropped without being resolved")]
    Abandoned,

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::failed_with("io", e)
    }
}
