// Error taxonomy for the detection engines
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unexpected config shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Missing CLI binary, non-zero exit, or a tool that cannot be run here.
    #[error("Tool unavailable: {tool}: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// HTTP or DNS probe failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Access to a resource was refused (container socket, proc entries).
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ToolUnavailable {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Network(format!("request timed out: {}", err))
        } else {
            Error::Network(err.to_string())
        }
    }
}
