//! Error taxonomy for API calls.

/// Classified failure of a WeChat API operation.
///
/// Transport failures (bad HTTP status) are never retried by this crate.
/// Application failures carry the error code the API embedded in the response
/// body; the stale-token codes surface here too, after their one forced
/// refresh of the cached token.
#[derive(Debug, thiserror::Error)]
pub enum WxError {
    /// The server answered with an HTTP status >= 300.
    #[error("HTTP {status}: {reason}")]
    Transport { status: u16, reason: String },

    /// The response body carried a nonzero error code.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// A local operation failed (scratch file, stream copy).
    #[error("local I/O error: {0}")]
    Local(#[from] std::io::Error),

    /// The request never produced a status line (connect, timeout, body read).
    #[error("request failed: {0}")]
    Http(#[from] anyhow::Error),
}

impl WxError {
    /// Returns the embedded application error code, if this is an API error.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            WxError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}
