//! HTTP seam: a small trait over the transport so the executor can be
//! exercised against canned responses in tests.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};

/// Trait for the HTTP requests the executor needs.
///
/// Bodies are buffered in full; the API's payloads are small (JSON envelopes,
/// media files) and the error protocol requires inspecting complete bodies
/// anyway.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;

    async fn post(&self, url: &str, body: Option<String>) -> Result<HttpResponse>;

    /// Sends a multipart form with a binary part named `media` carrying the
    /// file's content (and its name), plus one text part per form entry.
    async fn post_multipart(
        &self,
        url: &str,
        file: &Path,
        form: &HashMap<String, String>,
    ) -> Result<HttpResponse>;
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for any status below 300; redirects are treated as
    /// failures, matching the API's behavior of never redirecting on success.
    pub fn is_success(&self) -> bool {
        self.status < 300
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn content_disposition(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
    }
}

/// Production HTTP client using reqwest.
///
/// One instance shares a connection pool across every call from the executor
/// that owns it.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// Creates a client with a per-call timeout.
    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn into_response(response: reqwest::Response) -> Result<HttpResponse> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .context("Failed to read response body")?
        .to_vec();

    Ok(HttpResponse {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body,
    })
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .inner
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        into_response(response).await
    }

    async fn post(&self, url: &str, body: Option<String>) -> Result<HttpResponse> {
        let mut builder = self.inner.post(url);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.context("Failed to send request")?;

        into_response(response).await
    }

    async fn post_multipart(
        &self,
        url: &str,
        file: &Path,
        form: &HashMap<String, String>,
    ) -> Result<HttpResponse> {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media")
            .to_string();
        let content = tokio::fs::read(file)
            .await
            .context("Failed to read scratch file for upload")?;

        let mut multipart = reqwest::multipart::Form::new()
            .part("media", reqwest::multipart::Part::bytes(content).file_name(file_name));
        for (key, value) in form {
            multipart = multipart.text(key.clone(), value.clone());
        }

        let response = self
            .inner
            .post(url)
            .multipart(multipart)
            .send()
            .await
            .context("Failed to send request")?;

        into_response(response).await
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use reqwest::header::HeaderName;
    use std::sync::{Arc, RwLock};

    /// Mock HTTP client for testing.
    ///
    /// Canned responses are keyed by full URL; every request is recorded so
    /// tests can assert how often an endpoint was hit and with what.
    #[derive(Debug, Clone, Default)]
    pub struct MockHttpClient {
        responses: Arc<RwLock<HashMap<String, MockResponse>>>,
        requests: Arc<RwLock<Vec<RecordedRequest>>>,
    }

    /// A recorded HTTP request.
    #[derive(Debug, Clone)]
    pub enum RecordedRequest {
        Get {
            url: String,
        },
        Post {
            url: String,
            body: Option<String>,
        },
        Multipart {
            url: String,
            file_name: String,
            form: HashMap<String, String>,
        },
    }

    impl RecordedRequest {
        pub fn url(&self) -> &str {
            match self {
                RecordedRequest::Get { url }
                | RecordedRequest::Post { url, .. }
                | RecordedRequest::Multipart { url, .. } => url,
            }
        }
    }

    #[derive(Debug, Clone)]
    struct MockResponse {
        status: u16,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    fn canned_reason(status: u16) -> String {
        match status {
            200 => "OK",
            302 => "Found",
            403 => "Forbidden",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "",
        }
        .to_string()
    }

    impl MockHttpClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configures a response for a URL, any method.
        pub fn on(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
            self.responses.write().unwrap().insert(
                url.to_string(),
                MockResponse {
                    status,
                    headers: HeaderMap::new(),
                    body: body.into(),
                },
            );
            self
        }

        /// Configures a response carrying one header.
        pub fn on_with_header(
            self,
            url: &str,
            status: u16,
            header: &str,
            value: &str,
            body: impl Into<Vec<u8>>,
        ) -> Self {
            let mut headers = HeaderMap::new();
            headers.insert(
                HeaderName::from_bytes(header.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
            self.responses.write().unwrap().insert(
                url.to_string(),
                MockResponse {
                    status,
                    headers,
                    body: body.into(),
                },
            );
            self
        }

        /// Returns all recorded requests.
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.read().unwrap().clone()
        }

        /// Returns how many requests were made to a URL.
        pub fn hits(&self, url: &str) -> usize {
            self.requests
                .read()
                .unwrap()
                .iter()
                .filter(|r| r.url() == url)
                .count()
        }

        fn respond(&self, url: &str) -> Result<HttpResponse> {
            let responses = self.responses.read().unwrap();
            let mock = responses
                .get(url)
                .ok_or_else(|| anyhow::anyhow!("No mock response configured for URL: {}", url))?;

            Ok(HttpResponse {
                status: mock.status,
                reason: canned_reason(mock.status),
                headers: mock.headers.clone(),
                body: mock.body.clone(),
            })
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            self.requests
                .write()
                .unwrap()
                .push(RecordedRequest::Get { url: url.to_string() });
            self.respond(url)
        }

        async fn post(&self, url: &str, body: Option<String>) -> Result<HttpResponse> {
            self.requests.write().unwrap().push(RecordedRequest::Post {
                url: url.to_string(),
                body,
            });
            self.respond(url)
        }

        async fn post_multipart(
            &self,
            url: &str,
            file: &Path,
            form: &HashMap<String, String>,
        ) -> Result<HttpResponse> {
            let file_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            self.requests
                .write()
                .unwrap()
                .push(RecordedRequest::Multipart {
                    url: url.to_string(),
                    file_name,
                    form: form.clone(),
                });
            self.respond(url)
        }
    }
}
