use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Errors raised while loading, validating or executing a service definition.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid command data: {0}")]
    Validation(String),

    #[error("no usable presentation backend: {0}")]
    BackendUnavailable(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot find Bible verse '{reference}' in version '{version}'")]
    VerseNotFound { reference: String, version: String },

    #[error("cannot find lyrics '{0}'")]
    LyricNotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{path}:{line}:{column}: {message}")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid slide range: {0}")]
    InvalidRange(String),

    #[error("no presentation is open")]
    NoPresentation,

    #[error("automation backend failed: {0}")]
    Backend(String),

    #[error("XML error in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("aborted by user")]
    Aborted,
}

impl ServiceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ServiceError::FileNotFound(path)
        } else {
            ServiceError::Io { path, source }
        }
    }

    pub fn xml(part: impl Into<String>, message: impl ToString) -> Self {
        ServiceError::Xml {
            part: part.into(),
            message: message.to_string(),
        }
    }

    /// Recoverable errors are reported and the pipeline moves on to the next
    /// enabled command. Everything else ends the run. An unsupported export
    /// format only fails its own command.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation(_)
                | ServiceError::VerseNotFound { .. }
                | ServiceError::LyricNotFound(_)
                | ServiceError::UnsupportedFormat(_)
        )
    }
}

/// A failure attributed to the command at `index` in the service definition.
#[derive(Debug, Error)]
#[error("command #{index} ({command}) failed: {source}")]
pub struct RunError {
    pub index: usize,
    pub command: String,
    #[source]
    pub source: ServiceError,
}

impl RunError {
    pub fn new(index: usize, command: impl Into<String>, source: ServiceError) -> Self {
        Self {
            index,
            command: command.into(),
            source,
        }
    }
}
