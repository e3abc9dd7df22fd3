use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("invalid relay URL: {0}")]
    Relay(#[from] url::ParseError),

    /// The relay answered but carried no document.
    #[error("relay returned no contents")]
    EmptyRelayResponse,
}

/// Retrieves the raw text behind a feed URL.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Envelope returned by an allorigins-style CORS relay.
#[derive(Debug, Deserialize)]
struct RelayResponse {
    contents: Option<String>,
}

/// Build the relay request URL for `target`, with caching disabled.
pub fn proxied_url(relay: &Url, target: &str) -> Url {
    let mut url = relay.clone();
    url.query_pairs_mut()
        .append_pair("disableCache", "true")
        .append_pair("url", target);
    url
}

pub struct HttpTransport {
    client: Client,
    relay: Option<Url>,
}

impl HttpTransport {
    pub fn new(relay: Option<&str>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("FeedPulse/1.0 (RSS Aggregator)")
            .build()?;
        let relay = relay.map(Url::parse).transpose()?;

        Ok(Self { client, relay })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let request_url = match &self.relay {
            Some(relay) => proxied_url(relay, url).to_string(),
            None => url.to_string(),
        };
        debug!(url = %url, request = %request_url, "Fetching feed");

        let response = self.client.get(&request_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if self.relay.is_some() {
            let envelope: RelayResponse = response.json().await?;
            envelope.contents.ok_or(FetchError::EmptyRelayResponse)
        } else {
            Ok(response.text().await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = "<rss><channel><title>T</title></channel></rss>";

    fn transport(relay: Option<&str>) -> HttpTransport {
        HttpTransport::new(relay, Duration::from_secs(5)).unwrap()
    }

    mod proxied_url_tests {
        use super::*;

        #[test]
        fn test_adds_query_parameters() {
            let relay = Url::parse("https://allorigins.hexlet.app/get").unwrap();
            let url = proxied_url(&relay, "https://a.test/feed.xml?x=1&y=2");

            let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
            assert_eq!(
                pairs,
                vec![
                    ("disableCache".to_string(), "true".to_string()),
                    ("url".to_string(), "https://a.test/feed.xml?x=1&y=2".to_string()),
                ]
            );
            assert_eq!(url.host_str(), Some("allorigins.hexlet.app"));
            assert_eq!(url.path(), "/get");
        }

        #[test]
        fn test_invalid_relay_is_rejected() {
            let result = HttpTransport::new(Some("not a url"), Duration::from_secs(1));
            assert!(matches!(result, Err(FetchError::Relay(_))));
        }
    }

    mod direct_tests {
        use super::*;

        #[tokio::test]
        async fn test_fetch_returns_body() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed.xml"))
                .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
                .mount(&server)
                .await;

            let body = transport(None)
                .fetch(&format!("{}/feed.xml", server.uri()))
                .await
                .unwrap();
            assert_eq!(body, RSS);
        }

        #[tokio::test]
        async fn test_fetch_error_status() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let result = transport(None)
                .fetch(&format!("{}/feed.xml", server.uri()))
                .await;
            assert!(matches!(result, Err(FetchError::Status(503))));
        }

        #[tokio::test]
        async fn test_fetch_unreachable_host() {
            // Port 9 (discard) on localhost is not served by anything in tests
            let result = transport(None).fetch("http://127.0.0.1:9/feed.xml").await;
            assert!(matches!(result, Err(FetchError::Request(_))));
        }
    }

    mod relay_tests {
        use super::*;

        #[tokio::test]
        async fn test_fetch_through_relay() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/get"))
                .and(query_param("disableCache", "true"))
                .and(query_param("url", "https://a.test/feed.xml"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({ "contents": RSS })),
                )
                .mount(&server)
                .await;

            let relay = format!("{}/get", server.uri());
            let body = transport(Some(&relay))
                .fetch("https://a.test/feed.xml")
                .await
                .unwrap();
            assert_eq!(body, RSS);
        }

        #[tokio::test]
        async fn test_relay_without_contents() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/get"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({ "contents": null })),
                )
                .mount(&server)
                .await;

            let relay = format!("{}/get", server.uri());
            let result = transport(Some(&relay)).fetch("https://a.test/feed.xml").await;
            assert!(matches!(result, Err(FetchError::EmptyRelayResponse)));
        }
    }
}
