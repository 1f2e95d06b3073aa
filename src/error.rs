//! Crate-wide error type and its mapping onto inbound HTTP statuses.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Bad or missing configuration, including unresolved credentials.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Transport failure or an upstream that broke off mid-response.
    #[error("Upstream error: {message}")]
    Provider { message: String },

    /// Valid JSON that is not a Messages request we can translate.
    #[error("Translation error: {message}")]
    Translation { message: String },

    /// Inbound body that is not JSON at all.
    #[error("Malformed request body: {message}")]
    MalformedRequest { message: String },

    #[error("Upstream returned status {status} with no body")]
    UpstreamStreamMissing { status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { message: msg.into() }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider { message: msg.into() }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation { message: msg.into() }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest { message: msg.into() }
    }

    /// Status returned to the Anthropic client when this error ends a request.
    ///
    /// Unparseable bodies are a 500 rather than a 400; anything that went
    /// wrong talking to the backend is a 502.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest { .. } | Self::Config { .. } | Self::Io(_) | Self::Toml(_) => 500,
            Self::Translation { .. } => 400,
            Self::Provider { .. }
            | Self::UpstreamStreamMissing { .. }
            | Self::Http(_)
            | Self::Json(_) => 502,
        }
    }

    /// Anthropic `error.type` reported alongside [`status_code`](Self::status_code).
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } | Self::Translation { .. } => "invalid_request_error",
            _ => "api_error",
        }
    }

    /// Client-facing message. Upstream detail is kept for transport errors
    /// and dropped for an empty upstream body.
    pub fn client_message(&self) -> String {
        match self {
            Self::MalformedRequest { message } => format!("Invalid JSON body: {message}"),
            Self::Translation { message } => message.clone(),
            Self::UpstreamStreamMissing { .. } => "upstream returned no body".to_string(),
            Self::Config { .. } => self.to_string(),
            _ => format!("Proxy error: {self}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
