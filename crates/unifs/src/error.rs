//! The error type shared by every filesystem operation.
//!
//! Failures that concern a particular path carry that path, so a caller
//! walking a tree can tell which entry misbehaved. Messages never contain
//! credential material; property errors name the offending key only.

use thiserror::Error;
use unifs_pool::AcquireError;

/// Errors produced by filesystem, registry and channel operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The path does not exist on the backend.
    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    /// The target exists and the requested options forbid overwriting it.
    #[error("file already exists: {path}")]
    AlreadyExists { path: String },

    /// A directory operation was applied to a non-directory.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// A non-recursive delete hit a directory that still has children.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// The permission check on the path failed.
    #[error("access denied: {path}")]
    AccessDenied { path: String },

    /// The backend cannot honor the requested operation.
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    /// The attribute selector named a view outside the vocabulary.
    #[error("unsupported attribute view: {view}")]
    UnsupportedView { view: String },

    /// The attribute selector named an attribute outside the chosen view.
    #[error("unsupported attribute: {attribute}")]
    UnsupportedAttribute { attribute: String },

    /// An open or copy option is not accepted by the operation.
    #[error("unsupported option: {option}")]
    UnsupportedOption { option: String },

    /// A malformed argument: a NUL in a path, an invalid option
    /// combination, mismatched relativize operands.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A path was handed to a filesystem it does not belong to.
    #[error("path belongs to a different file system")]
    ProviderMismatch,

    /// A filesystem is already registered under the URI.
    #[error("file system already exists: {uri}")]
    FileSystemAlreadyExists { uri: String },

    /// No filesystem is registered under the URI.
    #[error("file system not found: {uri}")]
    FileSystemNotFound { uri: String },

    /// The channel pool has been shut down (the filesystem is closed).
    #[error("file system is closed")]
    PoolShutdown,

    /// Waiting for a pooled channel exceeded the configured wait time.
    #[error("timed out waiting for a channel")]
    Timeout,

    /// A required environment property is missing or has an invalid value.
    #[error("invalid property: {property}")]
    InvalidProperty { property: String },

    /// A duration string does not match the accepted grammar.
    #[error("invalid duration: {value}")]
    InvalidDuration { value: String },

    /// A URI is malformed or violates the constraints of the call.
    #[error("invalid URI {uri}: {message}")]
    InvalidUri { uri: String, message: String },

    /// A transport or local I/O failure, wrapping the underlying cause.
    #[error("{}", io_message(.path, .source))]
    Io {
        path: Option<String>,
        #[source]
        source: std::io::Error,
    },
}

fn io_message(path: &Option<String>, source: &std::io::Error) -> String {
    match path {
        Some(path) => format!("I/O error on {path}: {source}"),
        None => format!("I/O error: {source}"),
    }
}

impl Error {
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Error::AlreadyExists { path: path.into() }
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Error::NotADirectory { path: path.into() }
    }

    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Error::DirectoryNotEmpty { path: path.into() }
    }

    pub fn access_denied(path: impl Into<String>) -> Self {
        Error::AccessDenied { path: path.into() }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn invalid_property(property: impl Into<String>) -> Self {
        Error::InvalidProperty {
            property: property.into(),
        }
    }

    pub fn invalid_uri(uri: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Error::InvalidUri {
            uri: uri.to_string(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Attaches `path` to errors that qualify a path but do not carry one
    /// yet. Errors already annotated keep their original path.
    pub(crate) fn for_path(self, path: &str) -> Self {
        match self {
            Error::Io { path: None, source } => Error::Io {
                path: Some(path.to_string()),
                source,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { path: None, source }
    }
}

impl<E: Into<Error>> From<AcquireError<E>> for Error {
    fn from(err: AcquireError<E>) -> Self {
        match err {
            AcquireError::Shutdown => Error::PoolShutdown,
            AcquireError::Timeout => Error::Timeout,
            AcquireError::Create(e) => e.into(),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        let kind = match &err {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::NotADirectory { .. } => ErrorKind::NotADirectory,
            Error::DirectoryNotEmpty { .. } => ErrorKind::DirectoryNotEmpty,
            Error::AccessDenied { .. } => ErrorKind::PermissionDenied,
            Error::UnsupportedOperation { .. } => ErrorKind::Unsupported,
            Error::Timeout => ErrorKind::TimedOut,
            Error::InvalidArgument { .. } => ErrorKind::InvalidInput,
            Error::Io { .. } => ErrorKind::Other,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
