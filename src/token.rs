//! Access token lifecycle: expiry tracking and the single-flight cache.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::WxError;

/// Safety margin subtracted from the server-declared lifetime so a refresh
/// happens before the token actually stops working server-side.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// A bearer token with its computed expiry instant.
///
/// Immutable once constructed; the cache replaces it wholesale on refresh.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: String,
    lifetime_secs: i64,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a token issued now with the server-declared lifetime.
    pub fn new(value: impl Into<String>, lifetime_secs: i64) -> Self {
        Self::issued_at(value, lifetime_secs, Utc::now())
    }

    /// Creates a token issued at a specific instant. The expiry instant is
    /// derived here and nowhere else, so it always matches the lifetime.
    pub fn issued_at(value: impl Into<String>, lifetime_secs: i64, issued: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            lifetime_secs,
            expires_at: issued + Duration::seconds(lifetime_secs - EXPIRY_MARGIN_SECS),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_secs
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Checks if the token has passed its (margin-adjusted) expiry.
    pub fn expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Wire form of the token endpoint's success response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

impl From<TokenResponse> for AccessToken {
    fn from(response: TokenResponse) -> Self {
        AccessToken::new(response.access_token, response.expires_in)
    }
}

/// Exchanges the configured credentials for a fresh token.
///
/// Implemented by the executor over its HTTP seam; mocked in cache tests.
/// Issuance has no side effects beyond the network call, caching is the
/// caller's job.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, WxError>;
}

/// A token value handed out by the cache, tagged with the cache generation it
/// was read from. The generation lets a forced refresh tell whether the token
/// it observed as stale has already been replaced by a concurrent caller.
#[derive(Debug, Clone)]
pub struct Lease {
    value: String,
    generation: u64,
}

impl Lease {
    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Debug, Default)]
struct CacheState {
    token: Option<AccessToken>,
    generation: u64,
}

/// Holds the current token behind a single async mutex.
///
/// The mutex guards both the expiry check and the issuance call, so
/// concurrent callers that find the cache invalid block on one in-flight
/// issuance and share its result instead of each hitting the token endpoint.
#[derive(Debug, Default)]
pub struct TokenCache {
    state: Mutex<CacheState>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token, issuing a replacement first if none is held
    /// or the held one has expired.
    pub async fn ensure_valid<I>(&self, issuer: &I) -> Result<Lease, WxError>
    where
        I: TokenIssuer + ?Sized,
    {
        let mut state = self.state.lock().await;

        if let Some(token) = state.token.as_ref().filter(|t| !t.expired()) {
            return Ok(Lease {
                value: token.value().to_string(),
                generation: state.generation,
            });
        }

        tracing::debug!("requesting a new access token");
        let token = issuer.fetch().await?;
        tracing::debug!("received access token valid for {}s", token.lifetime_secs());

        state.generation = state.generation.wrapping_add(1);
        let lease = Lease {
            value: token.value().to_string(),
            generation: state.generation,
        };
        state.token = Some(token);
        Ok(lease)
    }

    /// Replaces the token the given lease was taken from, regardless of its
    /// remaining validity. If the cache has already moved past that
    /// generation, a concurrent refresh won the race and this is a no-op, so
    /// simultaneous forced refreshes collapse to one issuance.
    pub async fn force_refresh<I>(&self, seen: &Lease, issuer: &I) -> Result<(), WxError>
    where
        I: TokenIssuer + ?Sized,
    {
        let mut state = self.state.lock().await;

        if state.generation != seen.generation {
            tracing::debug!("stale token already replaced, skipping refresh");
            return Ok(());
        }

        tracing::debug!("forcing access token refresh");
        let token = issuer.fetch().await?;
        state.generation = state.generation.wrapping_add(1);
        state.token = Some(token);
        Ok(())
    }
}
