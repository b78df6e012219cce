//! Consul HTTP API backend.
//!
//! Uses the KV endpoints (`/v1/kv/...`) for reads and writes and
//! `/v1/status/leader` for reachability. Values listed with `?recurse` come
//! back base64-encoded and are decoded here.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{KvStore, StoreError};

/// Connection settings for [`ConsulKvStore`].
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// Agent address, e.g. `http://127.0.0.1:8500`. A bare `host:port` is
    /// treated as plain HTTP.
    pub address: String,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
    /// Per-request timeout (default: 5s)
    pub request_timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// One element of a `GET /v1/kv/<prefix>?recurse` response.
#[derive(Debug, Deserialize)]
struct KvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// [`KvStore`] backed by a Consul agent.
///
/// Holds one long-lived HTTP client; clone the surrounding `Arc` rather than
/// building a new store per request.
#[derive(Debug, Clone)]
pub struct ConsulKvStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ConsulKvStore {
    pub fn new(config: ConsulConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_address(&config.address),
            token: config.token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        self.request(builder)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

async fn http_error(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StoreError::Http { status, message }
}

fn decode_pairs(pairs: Vec<KvPair>) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
    let engine = base64::engine::general_purpose::STANDARD;
    pairs
        .into_iter()
        .map(|pair| {
            let value = match pair.value {
                Some(encoded) => engine
                    .decode(encoded.as_bytes())
                    .map_err(|e| StoreError::Decode(format!("{}: {}", pair.key, e)))?,
                None => Vec::new(),
            };
            Ok((pair.key, value))
        })
        .collect()
}

#[async_trait]
impl KvStore for ConsulKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let response = self
            .send(self.client.get(self.kv_url(key)).query(&[("raw", "true")]))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                Ok(Some(bytes.to_vec()))
            }
            _ => Err(http_error(response).await),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let response = self
            .send(self.client.get(self.kv_url(prefix)).query(&[("recurse", "true")]))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(prefix, "Consul prefix is empty");
                Ok(Vec::new())
            }
            s if s.is_success() => {
                let pairs: Vec<KvPair> = response
                    .json()
                    .await
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                decode_pairs(pairs)
            }
            _ => Err(http_error(response).await),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let response = self
            .send(self.client.put(self.kv_url(key)).body(value.to_vec()))
            .await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if body.trim() != "true" {
            warn!(key, body = %body.trim(), "Consul rejected write");
            return Err(StoreError::Rejected(key.to_string()));
        }
        Ok(())
    }

    async fn leader(&self) -> Result<String, StoreError> {
        let url = format!("{}/v1/status/leader", self.base_url);
        let response = self.send(self.client.get(url)).await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        // The endpoint answers with a JSON string such as "10.0.0.1:8300".
        Ok(serde_json::from_str::<String>(body.trim()).unwrap_or_else(|_| body.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> ConsulKvStore {
        ConsulKvStore::new(ConsulConfig {
            address: server.uri(),
            token: None,
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("consul:8500"), "http://consul:8500");
        assert_eq!(normalize_address("https://c.example/"), "https://c.example");
    }

    #[tokio::test]
    async fn test_list_decodes_base64_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/config/"))
            .and(query_param("recurse", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"Key": "config/", "Value": null},
                {"Key": "config/S3_BUCKET", "Value": "YmFja3Vwcw=="}
            ])))
            .mount(&server)
            .await;

        let pairs = store_for(&server).list("config/").await.unwrap();
        assert_eq!(
            pairs,
            vec![
                ("config/".to_string(), Vec::new()),
                ("config/S3_BUCKET".to_string(), b"backups".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/config/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(store_for(&server).list("config/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_key_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/servers/app"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(store_for(&server).get("servers/app").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_sends_raw_body_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/config/DEBUG"))
            .and(header("X-Consul-Token", "secret"))
            .and(body_bytes(b"true".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .expect(1)
            .mount(&server)
            .await;

        let store = ConsulKvStore::new(ConsulConfig {
            address: server.uri(),
            token: Some("secret".to_string()),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();
        store.put("config/DEBUG", b"true").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_false_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_string("false"))
            .mount(&server)
            .await;

        let err = store_for(&server).put("config/A", b"1").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_leader_unquotes_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/status/leader"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"10.0.0.1:8300\""))
            .mount(&server)
            .await;

        assert_eq!(store_for(&server).leader().await.unwrap(), "10.0.0.1:8300");
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        let store = ConsulKvStore::new(ConsulConfig {
            address: "http://127.0.0.1:1".to_string(),
            token: None,
            request_timeout: Duration::from_millis(500),
        })
        .unwrap();
        assert!(matches!(
            store.leader().await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
