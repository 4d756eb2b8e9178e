//! The request executor: token injection, envelope classification, stale-token
//! refresh, downloads, and multipart uploads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::envelope::{classify, ErrorEnvelope, Verdict};
use crate::error::WxError;
use crate::http::{HttpClient, HttpResponse, ReqwestClient};
use crate::token::{AccessToken, Lease, TokenCache, TokenIssuer, TokenResponse};

/// Application code used when a download endpoint answers without a
/// content-disposition header; the body is then an error description rather
/// than file content.
const DOWNLOAD_ERROR_CODE: i64 = 999;

/// Credentials and the token endpoint template.
///
/// The template carries literal `{id}` and `{secret}` placeholders, e.g.
/// `https://api.weixin.qq.com/cgi-bin/token?grant_type=client_credential&appid={id}&secret={secret}`.
/// Immutable for the lifetime of the executor.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    token_url_template: String,
    client_id: String,
    client_secret: String,
}

impl ClientConfig {
    pub fn new(
        token_url_template: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url_template: token_url_template.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn token_url(&self) -> String {
        self.token_url_template
            .replace("{id}", &self.client_id)
            .replace("{secret}", &self.client_secret)
    }
}

/// Executor for WeChat API calls.
///
/// Owns its token cache outright; two executors never share token state, so
/// multi-tenant setups are a matter of constructing one per account. All
/// methods take `&self` and are safe to call from concurrent tasks.
pub struct WxClient<H: HttpClient = ReqwestClient> {
    http: H,
    config: ClientConfig,
    cache: TokenCache,
    download_dir: PathBuf,
}

impl WxClient<ReqwestClient> {
    /// Creates an executor with the default transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_http_client(config, ReqwestClient::new())
    }

    /// Creates an executor whose calls time out after `timeout`.
    pub fn with_timeout(config: ClientConfig, timeout: std::time::Duration) -> Self {
        Self::with_http_client(config, ReqwestClient::with_timeout(timeout))
    }
}

impl<H: HttpClient> WxClient<H> {
    /// Creates an executor over a custom transport.
    pub fn with_http_client(config: ClientConfig, http: H) -> Self {
        Self {
            http,
            config,
            cache: TokenCache::new(),
            download_dir: std::env::temp_dir(),
        }
    }

    /// Overrides where downloaded files are written (defaults to the OS temp
    /// directory).
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Returns the current access token, issuing one if none is cached.
    ///
    /// Exposed for callers that need the raw token outside of a request, such
    /// as JS-SDK signature computation.
    pub async fn access_token(&self) -> Result<String, WxError> {
        let lease = self.cache.ensure_valid(self).await?;
        Ok(lease.value().to_string())
    }

    /// Performs a GET, injecting the access token when `need_token` is set,
    /// and returns the raw body on a success envelope.
    ///
    /// A stale-token code on a call made with `need_token = false` surfaces
    /// as [`WxError::Api`] without touching the token cache; the call carried
    /// no token, so there is nothing to invalidate.
    pub async fn get(&self, url: &str, need_token: bool) -> Result<String, WxError> {
        let lease = self.lease_if(need_token).await?;
        let url = tokened_url(url, lease.as_ref());

        let response = self.http.get(&url).await?;
        check_status(&response)?;

        self.finish_text(response, lease.as_ref()).await
    }

    /// Performs a GET expecting binary content.
    ///
    /// The API sometimes delivers a JSON error with a `text/plain` content
    /// type where a binary payload was expected; exactly that content type
    /// triggers an envelope check. Genuinely binary content types are passed
    /// through untouched.
    pub async fn get_binary(&self, url: &str, need_token: bool) -> Result<Vec<u8>, WxError> {
        let lease = self.lease_if(need_token).await?;
        let url = tokened_url(url, lease.as_ref());

        let response = self.http.get(&url).await?;
        check_status(&response)?;

        if response.content_type() == Some("text/plain") {
            let envelope = ErrorEnvelope::decode(&response.text());
            if !envelope.is_ok() {
                return Err(WxError::Api {
                    code: envelope.errcode,
                    message: envelope.errmsg,
                });
            }
        }

        Ok(response.body)
    }

    /// Performs a token-injected POST with an optional text body, with the
    /// same envelope handling as [`get`](Self::get).
    pub async fn post(&self, url: &str, body: Option<&str>) -> Result<String, WxError> {
        let lease = self.cache.ensure_valid(self).await?;
        let url = with_access_token(url, lease.value());

        let response = self.http.post(&url, body.map(str::to_string)).await?;
        check_status(&response)?;

        self.finish_text(response, Some(&lease)).await
    }

    /// Uploads a stream as a multipart form.
    ///
    /// The reader is staged to a scratch file named `file_name` so the upload
    /// carries that name; the file lives in a temp directory that is removed
    /// on every exit path. The multipart endpoints return opaque payloads, so
    /// the response body is returned without envelope decoding.
    pub async fn post_stream<R>(
        &self,
        url: &str,
        reader: &mut R,
        file_name: &str,
        form: &HashMap<String, String>,
    ) -> Result<String, WxError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let lease = self.cache.ensure_valid(self).await?;
        let url = with_access_token(url, lease.value());

        let (_scratch, path) = stage_scratch(reader, file_name).await?;

        let response = self.http.post_multipart(&url, &path, form).await?;
        check_status(&response)?;

        Ok(response.text())
    }

    /// Downloads a file, naming it from the `Content-Disposition` header.
    ///
    /// A present header with an empty or missing `filename` only falls back
    /// to a generated name; a response without the header at all is an error
    /// signal for this endpoint class, and its body is the error text.
    pub async fn download(&self, url: &str) -> Result<PathBuf, WxError> {
        let lease = self.cache.ensure_valid(self).await?;
        let url = with_access_token(url, lease.value());

        let response = self.http.get(&url).await?;
        check_status(&response)?;

        let Some(disposition) = response.content_disposition().map(str::to_string) else {
            let body = response.text();
            tracing::warn!("download failed: {}", body);
            return Err(WxError::Api {
                code: DOWNLOAD_ERROR_CODE,
                message: body,
            });
        };

        let file_name = match extract_file_name(&disposition) {
            Some(name) if usable_file_name(&name) => name,
            _ => {
                tracing::warn!("no usable filename in content-disposition, generating one");
                Uuid::new_v4().to_string()
            }
        };

        let path = self.download_dir.join(&file_name);
        tokio::fs::write(&path, &response.body).await?;
        Ok(path)
    }

    /// Fetches binary content from the permanent-material endpoint, whose
    /// protocol returns either the bytes or a JSON error under an unreliable
    /// content type. The body is sniffed for the literal substring `errcode`
    /// instead of dispatching on the content type; this matches the server's
    /// actual behavior and must not be tightened to strict parsing.
    pub async fn copy_stream(&self, url: &str, post: Option<&str>) -> Result<Vec<u8>, WxError> {
        let lease = self.cache.ensure_valid(self).await?;
        let url = with_access_token(url, lease.value());

        let response = self.http.post(&url, post.map(str::to_string)).await?;
        check_status(&response)?;

        let text = response.text();
        if text.contains("errcode") {
            let envelope = ErrorEnvelope::decode(&text);
            return Err(WxError::Api {
                code: envelope.errcode,
                message: envelope.errmsg,
            });
        }

        Ok(response.body)
    }

    async fn lease_if(&self, need_token: bool) -> Result<Option<Lease>, WxError> {
        if need_token {
            Ok(Some(self.cache.ensure_valid(self).await?))
        } else {
            Ok(None)
        }
    }

    /// Classifies a textual response body and applies the stale-token rule:
    /// a stale code forces one token refresh but the call still fails with
    /// that same response's code. The refreshed token only takes effect on
    /// the next call; the request is not replayed here.
    async fn finish_text(
        &self,
        response: HttpResponse,
        lease: Option<&Lease>,
    ) -> Result<String, WxError> {
        let body = response.text();
        match classify(&body) {
            Verdict::Success => Ok(body),
            Verdict::StaleToken { code, message } => {
                tracing::debug!("server reported stale token (code {}), refreshing", code);
                if let Some(lease) = lease {
                    self.cache.force_refresh(lease, self).await?;
                }
                Err(WxError::Api { code, message })
            }
            Verdict::Failure { code, message } => Err(WxError::Api { code, message }),
        }
    }
}

#[async_trait]
impl<H: HttpClient> TokenIssuer for WxClient<H> {
    /// Exchanges the configured credentials for a fresh token.
    ///
    /// Error envelopes from the token endpoint are hard failures; there is no
    /// stale-token handling here, so a rejected credential cannot trigger a
    /// refresh loop.
    async fn fetch(&self) -> Result<AccessToken, WxError> {
        let response = self.http.get(&self.config.token_url()).await?;
        check_status(&response)?;

        let body = response.text();
        match classify(&body) {
            Verdict::Success => {}
            Verdict::StaleToken { code, message } | Verdict::Failure { code, message } => {
                return Err(WxError::Api { code, message });
            }
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).context("Failed to decode token response")?;
        Ok(parsed.into())
    }
}

fn check_status(response: &HttpResponse) -> Result<(), WxError> {
    if response.is_success() {
        Ok(())
    } else {
        Err(WxError::Transport {
            status: response.status,
            reason: response.reason.clone(),
        })
    }
}

fn tokened_url(url: &str, lease: Option<&Lease>) -> String {
    match lease {
        Some(lease) => with_access_token(url, lease.value()),
        None => url.to_string(),
    }
}

/// Appends the token as an `access_token` query parameter, picking the
/// separator by whether the URL already has a query string.
fn with_access_token(url: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}access_token={}", url, separator, token)
}

/// Pulls the quoted filename out of a `Content-Disposition` header value.
fn extract_file_name(disposition: &str) -> Option<String> {
    static FILENAME: OnceLock<Regex> = OnceLock::new();
    let pattern = FILENAME
        .get_or_init(|| Regex::new(r#"filename="([^"]*)""#).expect("filename pattern compiles"));
    pattern
        .captures(disposition)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// A server-supplied filename is used verbatim only when it cannot escape
/// the download directory; anything empty or carrying path separators gets a
/// generated name instead.
fn usable_file_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

/// Copies the reader into a scratch file named `file_name` inside a fresh
/// temp directory. Dropping the returned [`TempDir`] removes the file, so the
/// scratch is cleaned up on success and failure alike.
async fn stage_scratch<R>(reader: &mut R, file_name: &str) -> Result<(TempDir, PathBuf), WxError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let scratch = tempfile::tempdir()?;
    let path = scratch.path().join(file_name);

    let mut content = Vec::new();
    reader.read_to_end(&mut content).await?;
    tokio::fs::write(&path, content).await?;

    Ok((scratch, path))
}
