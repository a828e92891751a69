use thiserror::Error;

/// Core error type for chatstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChatStreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by provider {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("response from {provider} has no readable body")]
    MissingBody { provider: String },

    #[error("stream from {provider} failed: {message}")]
    Stream { provider: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatStreamError {
    /// Stable label for logs and completion records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderError { .. } => "provider_error",
            Self::MissingBody { .. } => "missing_body",
            Self::Stream { .. } => "stream",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// Re-attribute a transport-level error to the named provider.
    pub fn with_provider(mut self, name: &str) -> Self {
        match &mut self {
            Self::RateLimited { provider, .. }
            | Self::ProviderUnavailable { provider }
            | Self::ProviderError { provider, .. }
            | Self::MissingBody { provider }
            | Self::Stream { provider, .. } => *provider = name.to_string(),
            _ => {}
        }
        self
    }
}

pub type CoreResult<T> = std::result::Result<T, ChatStreamError>;
