//! Thin HTTP client for the two rendezvous URIs used to exchange
//! offer/answer blobs (component E). No retries — failures surface
//! immediately to the caller, which treats them as fatal.

use thiserror::Error;

const USER_AGENT: &str = concat!("pair/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_PREFIX_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned {status}: {body_prefix}")]
    BadGet {
        url: String,
        status: u16,
        body_prefix: String,
    },
    #[error("PUT {url} returned {status}: {body_prefix}")]
    BadPut {
        url: String,
        status: u16,
        body_prefix: String,
    },
}

pub struct SignalingClient {
    http: reqwest::Client,
}

impl SignalingClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn get(&self, url: &str) -> Result<String, SignalingError> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|source| SignalingError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status.as_u16() != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::BadGet {
                url: url.to_string(),
                status: status.as_u16(),
                body_prefix: truncate(&body),
            });
        }

        response.text().await.map_err(|source| SignalingError::Request {
            url: url.to_string(),
            source,
        })
    }

    pub async fn put(&self, url: &str, body: String) -> Result<(), SignalingError> {
        let response = self
            .http
            .put(url)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|source| SignalingError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::BadPut {
                url: url.to_string(),
                status: status.as_u16(),
                body_prefix: truncate(&body),
            });
        }
        Ok(())
    }
}

impl Default for SignalingClient {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREFIX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_caps_body_prefix_length() {
        let long = "x".repeat(1000);
        assert_eq!(truncate(&long).len(), ERROR_BODY_PREFIX_LEN);
    }

    #[test]
    fn truncate_leaves_short_body_untouched() {
        assert_eq!(truncate("short"), "short");
    }
}
