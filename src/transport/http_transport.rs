use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::HttpClientConfig;
use crate::error::RelayError;

fn build_reqwest_client(
    config: &HttpClientConfig,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, RelayError> {
    let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
    };
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_pool_max_idle_per_host.max(1))
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout));

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.http_use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the model-serving endpoint.
///
/// Cheap to clone; clones share one connection pool. Every call is a single
/// attempt: retry decisions belong to the caller.
#[derive(Clone)]
pub struct HttpTransport {
    client: Arc<reqwest::Client>,
}

impl HttpTransport {
    /// Create a transport with pooling and timeouts from the given config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the proxy URL is invalid or the
    /// TLS backend cannot be initialised.
    pub fn new(config: &HttpClientConfig, proxy_url: Option<&str>) -> Result<Self, RelayError> {
        Ok(Self {
            client: Arc::new(build_reqwest_client(config, proxy_url)?),
        })
    }

    /// POST a JSON body with bearer authentication.
    ///
    /// Non-success statuses are returned as responses, not errors, so the
    /// caller can inspect the error body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent.
    pub async fn post_json(
        &self,
        url: &url::Url,
        api_key: &str,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let headers = build_headers(api_key)?;
        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers;
        *request.body_mut() = Some(reqwest::Body::from(body));

        self.client.execute(request).await.map_err(|err| {
            tracing::debug!(error = %err, url = %url, "upstream request failed");
            RelayError::Transport(err.to_string())
        })
    }
}

fn build_headers(api_key: &str) -> Result<HeaderMap, RelayError> {
    let mut headers = HeaderMap::with_capacity(2);
    let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| RelayError::Config("api_key contains invalid header characters".into()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_headers() {
        let headers = build_headers("cf-token").unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer cf-token");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_build_headers_rejects_newline() {
        assert!(build_headers("bad\ntoken").is_err());
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let result = HttpTransport::new(&HttpClientConfig::default(), Some("::not a url::"));
        assert!(result.is_err());
    }

    #[test]
    fn test_transport_builds_with_defaults() {
        assert!(HttpTransport::new(&HttpClientConfig::default(), None).is_ok());
    }
}
