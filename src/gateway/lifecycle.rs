//! Generation lifecycle: installing -> waiting -> active -> superseded.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::Gateway;
use crate::cache::{CacheGeneration, CacheStore, GenerationState};
use crate::http::{CachedResponse, GatewayRequest};
use crate::network::Network;

/// Result of an install event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InstallOutcome {
  /// Populated; the previous generation keeps serving until activation
  Waiting { generation: String },
  /// Populated and immediately activated
  Activated(Activation),
  /// This version is already the active generation; nothing was fetched
  AlreadyActive { generation: String },
}

/// Result of activating a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activation {
  pub generation: String,
  /// Generations deleted on the way in
  pub purged: Vec<String>,
}

impl<S: CacheStore, N: Network> Gateway<S, N> {
  fn own_generation(&self) -> CacheGeneration<S> {
    CacheGeneration::new(
      self.store.clone(),
      self.config.generation_name(),
      self.config.version.clone(),
    )
  }

  /// Install this gateway's generation from the precache manifest.
  ///
  /// Every manifest entry must fetch with a 2xx status. If any does not, the
  /// half-built generation is deleted and whatever was active stays active.
  pub async fn install(&self) -> Result<InstallOutcome> {
    let generation = self.own_generation();
    let name = generation.name().to_string();
    let existing = self.store.generations()?;

    if existing
      .iter()
      .any(|g| g.name == name && g.state == GenerationState::Active)
    {
      info!("Generation {} is already active", name);
      return Ok(InstallOutcome::AlreadyActive { generation: name });
    }

    self.store.create_generation(&name, generation.version())?;
    info!(
      "Installing generation {} ({} manifest entries)",
      name,
      self.config.precache.len()
    );

    if let Err(e) = self.populate(&generation).await {
      if let Err(cleanup) = self.store.delete_generation(&name) {
        warn!("Failed to discard generation {}: {}", name, cleanup);
      }
      return Err(e.wrap_err(format!("Install of generation {} failed", name)));
    }

    self
      .store
      .set_generation_state(&name, GenerationState::Waiting)?;

    let has_active = existing
      .iter()
      .any(|g| g.name != name && g.state == GenerationState::Active);

    if !has_active || self.config.skip_waiting {
      return Ok(InstallOutcome::Activated(self.activate()?));
    }

    info!("Generation {} installed and waiting", name);
    Ok(InstallOutcome::Waiting { generation: name })
  }

  async fn populate(&self, generation: &CacheGeneration<S>) -> Result<()> {
    let requests = self
      .config
      .precache
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map(GatewayRequest::get)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let entries = fetch_all(self.network.as_ref(), requests).await?;
    generation.put_all(&entries)
  }

  /// Make this gateway's generation the only one.
  ///
  /// Every other generation is deleted before ours is marked active, so no
  /// request is ever answered from a superseded generation.
  pub fn activate(&self) -> Result<Activation> {
    let name = self.config.generation_name();
    let generations = self.store.generations()?;

    match generations.iter().find(|g| g.name == name).map(|g| g.state) {
      Some(GenerationState::Waiting) | Some(GenerationState::Active) => {}
      Some(GenerationState::Installing) => {
        return Err(eyre!("Generation {} has not finished installing", name));
      }
      None => return Err(eyre!("Generation {} is not installed", name)),
    }

    let mut purged = Vec::new();
    for other in generations.iter().filter(|g| g.name != name) {
      if self.store.delete_generation(&other.name)? {
        purged.push(other.name.clone());
      }
    }

    self
      .store
      .set_generation_state(&name, GenerationState::Active)?;

    info!(
      "Generation {} active, purged {:?}, claiming clients",
      name, purged
    );
    Ok(Activation {
      generation: name,
      purged,
    })
  }

  /// Force a waiting generation to take over.
  pub fn skip_waiting(&self) -> Result<Activation> {
    self.activate()
  }
}

/// Fetch every request; fail if any fails or returns a non-2xx status.
pub(crate) async fn fetch_all<N: Network>(
  network: &N,
  requests: Vec<GatewayRequest>,
) -> Result<Vec<(GatewayRequest, CachedResponse)>> {
  try_join_all(requests.into_iter().map(|request| async move {
    let response = network.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!(
        "Fetching {} returned status {}",
        request.url,
        response.status
      ));
    }
    Ok((request, response))
  }))
  .await
}
