//! HTTP client handle onto one log node.
//!
//! Every peer in the cluster registry owns a `LogClient` bound to that
//! peer's published `http://hostname:port` endpoint. The replication
//! machinery uses it to pull tree heads and entries; the cluster state
//! controller only manages its lifecycle, replacing the client whenever a
//! peer's endpoint changes.

use url::Url;

use log_api::SignedTreeHead;

#[derive(Debug, thiserror::Error)]
pub enum LogClientError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("peer returned HTTP {status} from {url}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },
}

/// Async client for one log node's public endpoint.
#[derive(Clone, Debug)]
pub struct LogClient {
    // reqwest::Client is an Arc'd connection pool internally, so cloning
    // the LogClient along with its peer entry is cheap.
    http: reqwest::Client,
    base: Url,
}

impl LogClient {
    /// Binds a client to `http://hostname:port`.
    ///
    /// The hostname must be nonempty and the port nonzero; peers publish
    /// both, and a record violating that is corrupt.
    pub fn new(hostname: &str, port: u16) -> Self {
        assert!(!hostname.is_empty(), "peer hostname must not be empty");
        assert!(port > 0, "peer log_port must not be zero");
        // TODO(ct/https): support https endpoints once nodes publish a scheme.
        let base = Url::parse(&format!("http://{hostname}:{port}"))
            .expect("hostname and port must form a valid URL");
        LogClient {
            http: reqwest::Client::new(),
            base,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn host_port(&self) -> (&str, u16) {
        (
            self.base.host_str().expect("base URL always has a host"),
            self.base
                .port_or_known_default()
                .expect("base URL always has a port"),
        )
    }

    /// Fetches the peer's newest signed tree head.
    pub async fn get_sth(&self) -> Result<SignedTreeHead, LogClientError> {
        let url = self
            .base
            .join("ct/v1/get-sth")
            .expect("joining a fixed path cannot fail");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| LogClientError::Request {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(LogClientError::Status {
                url,
                status: response.status(),
            });
        }
        response
            .json()
            .await
            .map_err(|source| LogClientError::Request { url, source })
    }
}
