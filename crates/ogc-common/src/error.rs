//! Error types for the OGC raster provider.

use thiserror::Error;

/// Result type alias using OgcError.
pub type OgcResult<T> = Result<T, OgcError>;

/// Primary error type for provider operations.
#[derive(Debug, Clone, Error)]
pub enum OgcError {
    // === Configuration ===
    #[error("Invalid source configuration: {0}")]
    Config(String),

    #[error("Unknown CRS: {0}")]
    UnknownCrs(String),

    // === Capabilities ===
    #[error("Capabilities error: {0}")]
    Capabilities(String),

    #[error("XML parse error at line {line}, column {column}: {message}")]
    Xml {
        line: usize,
        column: usize,
        message: String,
    },

    // === Server-reported ===
    #[error("Service exception {code}: {text}")]
    ServiceException { code: String, text: String },

    // === Transport ===
    #[error("Network error: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    // === Response content ===
    #[error("Content error: {0}")]
    Content(String),

    // === Extent ===
    #[error("Extent error: {0}")]
    Extent(String),

    #[error("View would need {required} tiles; tile requests per draw are limited to {limit}")]
    TileBudget { required: usize, limit: usize },
}

impl OgcError {
    /// Whether the retry policy may re-dispatch the failed request.
    ///
    /// Only plain network errors are retriable; an HTTP status >= 400 and
    /// server-reported exceptions are terminal.
    pub fn is_retriable(&self) -> bool {
        matches!(self, OgcError::Transport(_))
    }

    /// Whether this error invalidates the provider as a whole.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OgcError::Config(_)
                | OgcError::UnknownCrs(_)
                | OgcError::Capabilities(_)
                | OgcError::Xml { .. }
        )
    }

    /// Short caption for the user-visible error surface.
    pub fn title(&self) -> &'static str {
        match self {
            OgcError::Config(_) | OgcError::UnknownCrs(_) => "Configuration error",
            OgcError::Capabilities(_) | OgcError::Xml { .. } => "Capabilities error",
            OgcError::ServiceException { .. } => "Service Exception",
            OgcError::Transport(_) | OgcError::HttpStatus { .. } => "Request error",
            OgcError::Content(_) => "Content error",
            OgcError::Extent(_) => "Extent error",
            OgcError::TileBudget { .. } => "Tile request limit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(OgcError::Transport("connection reset".into()).is_retriable());
        assert!(!OgcError::HttpStatus {
            status: 404,
            reason: "Not Found".into()
        }
        .is_retriable());
        assert!(!OgcError::ServiceException {
            code: "InvalidCRS".into(),
            text: "".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(OgcError::Config("layers/styles mismatch".into()).is_fatal());
        assert!(!OgcError::Transport("timeout".into()).is_fatal());
    }
}
