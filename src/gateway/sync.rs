//! Background sync: replaying mutating requests queued while offline.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Gateway;
use crate::cache::{CacheStore, PendingAction};
use crate::config::SyncConfig;
use crate::http::GatewayRequest;
use crate::network::Network;

/// The only sync tag that triggers a replay.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Upper bound on any retry delay, whatever the config says (ten years).
const MAX_BACKOFF_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Counts from one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  /// Delivered and removed from the queue
  pub replayed: usize,
  /// Failed, rescheduled with backoff
  pub retried: usize,
  /// Failed for the last allowed time and discarded
  pub dropped: usize,
  /// Not yet due
  pub skipped: usize,
}

impl<S: CacheStore, N: Network> Gateway<S, N> {
  /// Queue a mutating request for replay on the next sync.
  pub fn enqueue_action(&self, request: &GatewayRequest) -> Result<String> {
    let action = PendingAction::from_request(request);
    self.store.queue_action(&action)?;
    info!("Queued {} {} for background sync", action.method, action.url);
    Ok(action.id)
  }

  /// Replay every due queued action, in queue order.
  ///
  /// A response below 500 counts as delivered. Network failures and 5xx
  /// responses leave the action queued with exponential backoff until
  /// `max_attempts` is reached.
  pub async fn background_sync(&self, tag: &str) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    if tag != BACKGROUND_SYNC_TAG {
      debug!("Ignoring sync tag '{}'", tag);
      return Ok(report);
    }

    let now = Utc::now();
    for action in self.store.queued_actions()? {
      if action.next_attempt_at > now {
        report.skipped += 1;
        continue;
      }

      let error = match action.to_request() {
        Ok(request) => match self.network.fetch(&request).await {
          Ok(response) if response.status < 500 => None,
          Ok(response) => Some(format!("server responded {}", response.status)),
          Err(e) => Some(e.to_string()),
        },
        Err(e) => {
          // Unparseable rows can never succeed
          warn!("Discarding malformed offline action {}: {}", action.id, e);
          self.store.remove_action(&action.id)?;
          report.dropped += 1;
          continue;
        }
      };

      match error {
        None => {
          self.store.remove_action(&action.id)?;
          info!("Replayed {} {}", action.method, action.url);
          report.replayed += 1;
        }
        Some(reason) => {
          let attempts = action.attempts + 1;
          if attempts >= self.config.sync.max_attempts {
            warn!(
              "Dropping {} {} after {} failed attempts: {}",
              action.method, action.url, attempts, reason
            );
            self.store.remove_action(&action.id)?;
            report.dropped += 1;
          } else {
            let delay = backoff(&self.config.sync, attempts);
            warn!(
              "Replay of {} {} failed ({}), retrying in {}s",
              action.method,
              action.url,
              reason,
              delay.num_seconds()
            );
            let retry_at = now
              .checked_add_signed(delay)
              .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.store.record_attempt(&action.id, retry_at)?;
            report.retried += 1;
          }
        }
      }
    }

    Ok(report)
  }
}

/// Delay before the next attempt: `base * 2^(attempts - 1)`, capped by
/// `backoff_max_secs` and by `MAX_BACKOFF_SECS`.
fn backoff(config: &SyncConfig, attempts: u32) -> Duration {
  let factor = 2u64.saturating_pow(attempts.saturating_sub(1));
  let secs = config
    .backoff_base_secs
    .saturating_mul(factor)
    .min(config.backoff_max_secs)
    .min(MAX_BACKOFF_SECS);
  Duration::seconds(i64::try_from(secs).unwrap_or(0))
}
