//! Decoding of the `{errcode, errmsg}` envelope the API wraps around errors.
//!
//! Successful responses usually carry a business payload with no `errcode`
//! field at all, so decoding is deliberately tolerant: anything that does not
//! parse as an envelope is treated as code 0 (success) and passed through.

use serde::Deserialize;

/// Application error codes that mean "the access token is no longer accepted".
const STALE_TOKEN_CODES: [i64; 3] = [42001, 40001, 40014];

/// Returns true if `code` means the access token is invalid or expired.
pub fn is_stale_token_code(code: i64) -> bool {
    STALE_TOKEN_CODES.contains(&code)
}

/// JSON error envelope embedded in 2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

impl ErrorEnvelope {
    /// Decodes a response body, defaulting to success for anything that is
    /// not an envelope (binary payloads, business JSON without `errcode`).
    pub fn decode(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    pub fn is_ok(&self) -> bool {
        self.errcode == 0
    }
}

/// Outcome of classifying a response body.
///
/// Stale-token codes get their own variant so the executor can branch on them
/// explicitly instead of catching a thrown signal mid-parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Code 0 or no envelope at all; the body is the payload.
    Success,
    /// One of the stale-token codes; the caller should force a token refresh.
    StaleToken { code: i64, message: String },
    /// Any other nonzero code.
    Failure { code: i64, message: String },
}

/// Classifies a response body by its embedded error code.
pub fn classify(body: &str) -> Verdict {
    let envelope = ErrorEnvelope::decode(body);
    if envelope.is_ok() {
        Verdict::Success
    } else if is_stale_token_code(envelope.errcode) {
        Verdict::StaleToken {
            code: envelope.errcode,
            message: envelope.errmsg,
        }
    } else {
        Verdict::Failure {
            code: envelope.errcode,
            message: envelope.errmsg,
        }
    }
}
