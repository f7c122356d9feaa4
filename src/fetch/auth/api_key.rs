use crate::fetch::FetchError;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// Header used by the Telraam API.
pub const TELRAAM_HEADER: &str = "X-Api-Key";

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header name and value are validated once at construction so
/// every request can reuse them.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, FetchError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| FetchError::InvalidHeader(format!("{header_name}: {e}")))?;
        let mut key = HeaderValue::from_str(key)
            .map_err(|e| FetchError::InvalidHeader(format!("api key: {e}")))?;
        key.set_sensitive(true);

        Ok(Self {
            inner,
            header_name,
            key,
        })
    }

    /// Uses the `X-Api-Key` header expected by Telraam.
    pub fn telraam(inner: C, key: &str) -> Result<Self, FetchError> {
        Self::new(inner, TELRAAM_HEADER, key)
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn test_rejects_invalid_key() {
        let client = BasicClient::new().unwrap();
        assert!(ApiKey::telraam(client, "bad\nkey").is_err());
    }

    #[test]
    fn test_rejects_invalid_header_name() {
        let client = BasicClient::new().unwrap();
        assert!(ApiKey::new(client, "bad header", "key").is_err());
    }
}
