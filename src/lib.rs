//! Resilient HTTP access layer for the WeChat platform API.
//!
//! The WeChat API reports application errors inside otherwise-successful HTTP
//! responses as a JSON envelope (`{"errcode": ..., "errmsg": ...}`), and
//! authenticates calls with a short-lived access token passed as a query
//! parameter. This crate handles the plumbing that every endpoint needs:
//!
//! - obtaining, caching, and refreshing the access token (single-flight under
//!   concurrent callers),
//! - attaching the token to outbound requests,
//! - decoding the error envelope and distinguishing transport failures,
//!   application failures, and the stale-token codes that trigger a refresh,
//! - binary downloads with content-disposition file naming, and
//! - multipart uploads staged through a scratch file.

pub mod client;
pub mod envelope;
pub mod error;
pub mod http;
pub mod token;

pub use client::{ClientConfig, WxClient};
pub use envelope::{is_stale_token_code, ErrorEnvelope, Verdict};
pub use error::WxError;
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use token::{AccessToken, Lease, TokenCache, TokenIssuer};
