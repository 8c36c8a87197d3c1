//! Control messages posted by clients, and the replies sent back.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::lifecycle::fetch_all;
use super::Gateway;
use crate::cache::CacheStore;
use crate::http::GatewayRequest;
use crate::network::Network;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SkipWaiting,
  GetVersion,
  CacheUrls { urls: Vec<String> },
}

/// Reply delivered over the message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageReply {
  SkipWaiting {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  Version {
    version: String,
  },
  CacheUrls {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  Error {
    success: bool,
    error: String,
  },
}

impl<S: CacheStore, N: Network> Gateway<S, N> {
  pub async fn handle_message(&self, message: &Value) -> MessageReply {
    let message = match ClientMessage::deserialize(message) {
      Ok(message) => message,
      Err(e) => {
        warn!("Ignoring unrecognised client message: {}", e);
        return MessageReply::Error {
          success: false,
          error: format!("unknown message: {}", e),
        };
      }
    };

    match message {
      ClientMessage::SkipWaiting => match self.skip_waiting() {
        Ok(_) => MessageReply::SkipWaiting {
          success: true,
          error: None,
        },
        Err(e) => MessageReply::SkipWaiting {
          success: false,
          error: Some(format!("{:#}", e)),
        },
      },
      ClientMessage::GetVersion => MessageReply::Version {
        version: self.current_version(),
      },
      ClientMessage::CacheUrls { urls } => match self.cache_urls(&urls).await {
        Ok(()) => MessageReply::CacheUrls {
          success: true,
          error: None,
        },
        Err(e) => {
          warn!("CACHE_URLS failed: {:#}", e);
          MessageReply::CacheUrls {
            success: false,
            error: Some(format!("{:#}", e)),
          }
        }
      },
    }
  }

  /// Version of the active generation, or the configured one before activation.
  fn current_version(&self) -> String {
    match self.current_generation() {
      Ok(Some(generation)) => generation.version().to_string(),
      Ok(None) => self.config.version.clone(),
      Err(e) => {
        warn!("Failed to resolve cache generation: {}", e);
        self.config.version.clone()
      }
    }
  }

  /// Add URLs to the current generation. All are fetched before any is
  /// stored; one failure means none is added.
  pub async fn cache_urls(&self, urls: &[String]) -> Result<()> {
    let generation = self
      .current_generation()?
      .ok_or_else(|| eyre!("No active cache generation"))?;

    let requests = urls
      .iter()
      .map(|u| {
        self
          .origin
          .join(u)
          .map(GatewayRequest::get)
          .map_err(|e| eyre!("Invalid URL '{}': {}", u, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let entries = fetch_all(self.network.as_ref(), requests).await?;
    generation.put_all(&entries)?;

    info!("Cached {} URLs into {}", entries.len(), generation.name());
    Ok(())
  }
}
