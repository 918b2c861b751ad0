//! The authenticated REST client of section 4.2: a single `request`
//! operation, retried up to a configured number of attempts, backed by a
//! mutual-TLS `reqwest::Client`.

pub mod options;

use std::path::Path;
use std::time::Duration;

use dynamo_errors::{AttemptError, DynamoError, DynamoResult};
pub use options::RequestOptions;
use reqwest::{Identity, Url};
use tracing::{debug, warn};

/// Each REST request has an implicit 300s timeout (section 5).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Url,
    Json,
}

/// An authenticated REST endpoint. One `RestClient` per remote catalog
/// (data-catalog, dataset-catalog, site-status); all three commonly share
/// the same client credential file.
pub struct RestClient {
    base_url: Url,
    client: reqwest::Client,
    num_attempts: u8,
}

impl RestClient {
    /// `x509_key` is a single file used both as client key and certificate,
    /// as section 6 describes.
    pub fn new(base_url: &str, x509_key: &Path, num_attempts: u8) -> DynamoResult<RestClient> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DynamoError::config(format!("invalid REST base url {base_url:?}: {e}")))?;
        let pem = std::fs::read(x509_key)
            .map_err(|e| DynamoError::config(format!("cannot read x509 credential {}: {e}", x509_key.display())))?;
        let identity = Identity::from_pem(&pem)
            .map_err(|e| DynamoError::config(format!("invalid x509 credential {}: {e}", x509_key.display())))?;
        let client = reqwest::Client::builder()
            .identity(identity)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DynamoError::config(format!("failed to build REST client: {e}")))?;
        Ok(RestClient {
            base_url,
            client,
            num_attempts: num_attempts.max(1),
        })
    }

    #[cfg(test)]
    fn with_client(base_url: &str, client: reqwest::Client, num_attempts: u8) -> RestClient {
        RestClient {
            base_url: Url::parse(base_url).unwrap(),
            client,
            num_attempts: num_attempts.max(1),
        }
    }

    /// Issue `resource` with `options`, retrying transient failures up to
    /// `num_attempts` times. The decoded JSON body is returned on success;
    /// after exhausting retries, [`DynamoError::TransientNetwork`] carries
    /// every attempt's (error kind, message) pair.
    pub async fn request(
        &self,
        resource: &str,
        options: &RequestOptions,
        method: Method,
        encoding: Encoding,
    ) -> DynamoResult<serde_json::Value> {
        let mut attempts = Vec::new();
        for attempt in 0..self.num_attempts {
            match self.try_once(resource, options, method, encoding).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(resource, attempt, error = %e, "REST request attempt failed");
                    attempts.push(e);
                }
            }
        }
        Err(DynamoError::TransientNetwork { attempts })
    }

    async fn try_once(
        &self,
        resource: &str,
        options: &RequestOptions,
        method: Method,
        encoding: Encoding,
    ) -> Result<serde_json::Value, AttemptError> {
        let url = self
            .base_url
            .join(resource)
            .map_err(|e| AttemptError::new("UrlError", e.to_string()))?;

        let request = match method {
            Method::Get => {
                let mut url = url;
                if !options.is_empty() {
                    url.set_query(Some(&options.to_url_encoded()));
                }
                self.client.get(url)
            }
            Method::Post => {
                let builder = self.client.post(url);
                match encoding {
                    Encoding::Url => builder
                        .header("Content-Type", "application/x-www-form-urlencoded")
                        .body(options.to_url_encoded()),
                    Encoding::Json => builder.json(&options.to_json_object()),
                }
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::new("HttpError", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::new("HttpStatus", format!("{status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttemptError::new("HttpError", e.to_string()))?;
        // Remote bodies are UTF-8 JSON; downstream code assumes plain
        // strings once decoded (section 4.2).
        let text = String::from_utf8_lossy(&bytes);
        debug!(resource, bytes = bytes.len(), "REST request succeeded");
        serde_json::from_str(&text).map_err(|e| AttemptError::new("DecodeError", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_to_url_encoded_is_reused_for_get_and_post() {
        let options = RequestOptions::new().push("node", "T1_US_FNAL");
        assert_eq!(options.to_url_encoded(), "node=T1_US_FNAL");
    }

    #[tokio::test]
    async fn exhausting_retries_carries_every_attempt() {
        // No server is listening on this port; every attempt fails at the
        // transport layer, exercising the retry/accumulate path without a
        // live HTTP server.
        let client = RestClient::with_client(
            "http://127.0.0.1:1/",
            reqwest::Client::builder()
                .timeout(Duration::from_millis(200))
                .build()
                .unwrap(),
            3,
        );
        let err = client
            .request("nodes", &RequestOptions::new(), Method::Get, Encoding::Json)
            .await
            .unwrap_err();
        match err {
            DynamoError::TransientNetwork { attempts } => assert_eq!(attempts.len(), 3),
            other => panic!("expected TransientNetwork, got {other:?}"),
        }
    }
}
