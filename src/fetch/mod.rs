//! HTTP plumbing shared by every Telraam call.

mod basic;
mod client;
pub mod auth;
pub mod retry;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use retry::{RetryPolicy, with_retry};

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};
use serde::Serialize;
use serde_json::Value;

/// Maximum length of a response body kept in a [`FetchError::Status`].
const BODY_PREVIEW_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

/// Joins `path` onto `base` (e.g. `https://telraam-api.net` + `/v1/segments/all`).
pub fn endpoint(base: &str, path: &str) -> Result<Url, FetchError> {
    let joined = format!("{}{}", base.trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| FetchError::InvalidUrl(format!("{joined}: {e}")))
}

pub fn get_request(url: Url) -> Request {
    Request::new(Method::GET, url)
}

/// Builds a POST request carrying `body` as JSON.
pub fn post_json_request(url: Url, body: &impl Serialize) -> Result<Request, FetchError> {
    let mut req = Request::new(Method::POST, url);
    *req.body_mut() = Some(serde_json::to_vec(body)?.into());
    req.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(req)
}

/// Executes `req` and decodes a successful response body as JSON.
///
/// Non-2xx responses become [`FetchError::Status`] with a preview of the body.
pub async fn send_json<C: HttpClient + ?Sized>(client: &C, req: Request) -> Result<Value, FetchError> {
    let resp = client.execute(req).await?;
    let status = resp.status();

    if !status.is_success() {
        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > BODY_PREVIEW_LEN {
            let cut = (0..=BODY_PREVIEW_LEN)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        return Err(FetchError::Status { status, body });
    }

    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
