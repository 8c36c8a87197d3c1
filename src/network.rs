//! Fetch boundary: how the gateway reaches the network.

use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::http::{CachedResponse, GatewayRequest};

/// Anything that can perform a request.
///
/// A rejected future means the network could not be reached (offline, DNS,
/// connection reset). Any HTTP status, including 5xx, is a response.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &GatewayRequest) -> impl Future<Output = Result<CachedResponse>> + Send;
}

/// `reqwest`-backed network adapter.
#[derive(Clone)]
pub struct HttpNetwork {
  client: Client,
}

impl HttpNetwork {
  /// Client used by the caching strategies.
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("vasa-gateway/", env!("CARGO_PKG_VERSION")))
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Client for forwarding requests the gateway does not intercept.
  ///
  /// No user agent and no transparent decompression: the request leaves as
  /// given and the response comes back with its original encoding.
  pub fn passthrough(config: &NetworkConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .no_gzip()
      .no_deflate()
      .build()
      .map_err(|e| eyre!("Failed to create pass-through HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: &GatewayRequest) -> impl Future<Output = Result<CachedResponse>> + Send {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }
    let url = request.url.clone();

    async move {
      debug!("Fetching {} from network", url);

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Network request to {} failed: {}", url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
        .to_vec();

      Ok(CachedResponse {
        status,
        headers,
        body,
      })
    }
  }
}
