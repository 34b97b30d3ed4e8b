//! Top-level error types for Gembot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Slack API and file-transfer errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("bot identity not initialized; call initialize() first")]
    NotInitialized,

    #[error("slack {method} failed: {message}")]
    Api {
        method: &'static str,
        message: String,
    },

    #[error("slack {method} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        method: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("image fetch returned HTTP {status} for {url}")]
    ImageStatus { status: u16, url: String },

    #[error("image fetch failed: {0}")]
    ImageFetch(#[from] reqwest::Error),
}

/// Generative-model errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no generative models configured")]
    NoModels,

    #[error("failed to load system instruction from {path}: {source}")]
    SystemInstruction {
        path: String,
        source: std::io::Error,
    },

    #[error("{model} returned HTTP {status}: {message}")]
    HttpStatus {
        model: String,
        status: u16,
        message: String,
    },

    #[error("request to {model} failed: {source}")]
    Http {
        model: String,
        source: reqwest::Error,
    },

    #[error("invalid response from {model}: {message}")]
    InvalidResponse { model: String, message: String },
}
