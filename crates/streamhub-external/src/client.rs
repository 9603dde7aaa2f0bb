//! HTTP implementation of [`StreamingService`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use streamhub_core::config::ExternalServiceConfig;
use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;

use crate::StreamingService;
use crate::types::{ChannelDetails, ChannelPage, ExternalChannel};

/// Header carrying the registered client id.
const CLIENT_ID_HEADER: &str = "client-id";

/// reqwest-based client for the upstream streaming service.
#[derive(Debug, Clone)]
pub struct HttpStreamingClient {
    http: Client,
    base_url: Url,
}

impl HttpStreamingClient {
    /// Build a client from configuration.
    pub fn new(config: &ExternalServiceConfig) -> AppResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AppError::with_source(
                ErrorKind::Configuration,
                format!("Invalid external base URL '{}'", config.base_url),
                e,
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::configuration(format!(
                "External base URL '{}' cannot be a base",
                config.base_url
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(default_headers(config)?)
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to build HTTP client", e)
            })?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::configuration("External base URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn default_headers(config: &ExternalServiceConfig) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(client_id) = &config.client_id {
        let value = HeaderValue::from_str(client_id)
            .map_err(|_| AppError::configuration("Client id is not a valid header value"))?;
        headers.insert(HeaderName::from_static(CLIENT_ID_HEADER), value);
    }
    if let Some(token) = &config.access_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| AppError::configuration("Access token is not a valid header value"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

fn request_failed(e: reqwest::Error) -> AppError {
    AppError::with_source(
        ErrorKind::ExternalService,
        format!("Streaming service request failed: {e}"),
        e,
    )
}

#[async_trait]
impl StreamingService for HttpStreamingClient {
    async fn list_live_channels(&self, offset: u32, limit: u32) -> AppResult<Vec<ExternalChannel>> {
        let mut url = self.endpoint(&["streams"])?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());

        debug!(offset, limit, "Listing live channels");
        let page: ChannelPage = self
            .http
            .get(url)
            .send()
            .await
            .map_err(request_failed)?
            .error_for_status()
            .map_err(request_failed)?
            .json()
            .await
            .map_err(request_failed)?;

        Ok(page.data)
    }

    async fn get_channel(&self, name: &str) -> AppResult<Option<ChannelDetails>> {
        let url = self.endpoint(&["streams", name])?;
        let response = self.http.get(url).send().await.map_err(request_failed)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(channel = name, "Channel is offline");
            return Ok(None);
        }

        let details = response
            .error_for_status()
            .map_err(request_failed)?
            .json()
            .await
            .map_err(request_failed)?;
        Ok(Some(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpStreamingClient {
        HttpStreamingClient::new(&ExternalServiceConfig {
            base_url: base_url.to_string(),
            client_id: Some("abc".into()),
            access_token: Some("token".into()),
            ..ExternalServiceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_escapes_channel_names() {
        let c = client("https://upstream.example/api/");
        let url = c.endpoint(&["streams", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "https://upstream.example/api/streams/a%20b%2Fc");
    }

    #[test]
    fn test_endpoint_without_trailing_slash() {
        let c = client("https://upstream.example/api");
        let url = c.endpoint(&["streams"]).unwrap();
        assert_eq!(url.as_str(), "https://upstream.example/api/streams");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpStreamingClient::new(&ExternalServiceConfig {
            base_url: "not a url".into(),
            ..ExternalServiceConfig::default()
        })
        .unwrap_err();
        assert!(err.is(ErrorKind::Configuration));
    }

    #[test]
    fn test_channel_page_decodes_with_defaults() {
        let page: ChannelPage = serde_json::from_str(
            r#"{"data":[{"name":"alice","external_id":"e1","category":"Art"}]}"#,
        )
        .unwrap();
        assert_eq!(page.data[0].viewers, 0);
        assert_eq!(page.data[0].title, "");
    }
}
