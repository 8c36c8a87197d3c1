//! The offline cache gateway.
//!
//! One `Gateway` owns an explicit cache store, a network adapter and the
//! configuration. Every external stimulus arrives as a [`GatewayEvent`] and
//! is answered with a [`GatewayEffect`]:
//!
//! ```ignore
//! let gateway = Gateway::new(config, store, network)?;
//! gateway.dispatch(GatewayEvent::Install).await?;
//! match gateway.dispatch(GatewayEvent::Fetch(request)).await? {
//!     GatewayEffect::Respond(response) => render(response),
//!     GatewayEffect::PassThrough(request) => forward(request),
//!     _ => {}
//! }
//! ```

mod background;
pub mod classify;
pub mod fallback;
mod lifecycle;
pub mod messages;
pub mod push;
pub mod share;
pub mod strategy;
mod sync;

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheGeneration, CacheStore, GenerationState};
use crate::config::Config;
use crate::http::{CachedResponse, GatewayRequest};
use crate::network::Network;

pub use background::BackgroundTasks;
pub use classify::ResourceClass;
pub use lifecycle::{Activation, InstallOutcome};
pub use messages::MessageReply;
pub use push::{ClickEffect, ClientWindow, Notification};
pub use sync::{SyncReport, BACKGROUND_SYNC_TAG};

/// Events the gateway reacts to.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
  /// A new generation version was deployed
  Install,
  /// The installed generation should take over
  Activate,
  /// An outbound request from the client application
  Fetch(GatewayRequest),
  /// A control message posted by a client
  Message(Value),
  /// A push payload (absent for empty pushes)
  Push(Option<Vec<u8>>),
  /// The user clicked a notification or one of its actions
  NotificationClick {
    action: Option<String>,
    data: Value,
    clients: Vec<ClientWindow>,
  },
  /// The platform signalled connectivity for a sync tag
  Sync { tag: String },
}

/// What the gateway did, or wants its host to do, in response to an event.
#[derive(Debug, Clone)]
pub enum GatewayEffect {
  Installed(InstallOutcome),
  /// A generation took over; all open clients are claimed
  Activated(Activation),
  Respond(CachedResponse),
  /// Not intercepted: the host sends the request unchanged
  PassThrough(GatewayRequest),
  Reply(MessageReply),
  ShowNotification(Notification),
  Click(ClickEffect),
  Synced(SyncReport),
}

/// Outcome of a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  Respond(CachedResponse),
  PassThrough(GatewayRequest),
}

pub struct Gateway<S: CacheStore, N: Network> {
  store: Arc<S>,
  network: Arc<N>,
  config: Config,
  origin: Url,
  background: BackgroundTasks,
}

impl<S: CacheStore, N: Network> Gateway<S, N> {
  pub fn new(config: Config, store: Arc<S>, network: Arc<N>) -> Result<Self> {
    let origin = config.origin_url()?;

    Ok(Self {
      store,
      network,
      config,
      origin,
      background: BackgroundTasks::new(),
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Route an event to its handler.
  pub async fn dispatch(&self, event: GatewayEvent) -> Result<GatewayEffect> {
    match event {
      GatewayEvent::Install => Ok(GatewayEffect::Installed(self.install().await?)),
      GatewayEvent::Activate => Ok(GatewayEffect::Activated(self.activate()?)),
      GatewayEvent::Fetch(request) => Ok(match self.handle_fetch(request).await {
        FetchOutcome::Respond(response) => GatewayEffect::Respond(response),
        FetchOutcome::PassThrough(request) => GatewayEffect::PassThrough(request),
      }),
      GatewayEvent::Message(message) => Ok(GatewayEffect::Reply(
        self.handle_message(&message).await,
      )),
      GatewayEvent::Push(payload) => Ok(GatewayEffect::ShowNotification(
        push::build_notification(payload.as_deref()),
      )),
      GatewayEvent::NotificationClick {
        action,
        data,
        clients,
      } => Ok(GatewayEffect::Click(push::handle_click(
        action.as_deref(),
        &data,
        &clients,
        &self.origin,
      ))),
      GatewayEvent::Sync { tag } => Ok(GatewayEffect::Synced(self.background_sync(&tag).await?)),
    }
  }

  /// The generation currently answering requests, if any.
  pub fn current_generation(&self) -> Result<Option<CacheGeneration<S>>> {
    Ok(
      self
        .store
        .generations()?
        .into_iter()
        .find(|g| g.state == GenerationState::Active)
        .map(|g| CacheGeneration::new(Arc::clone(&self.store), g.name, g.version)),
    )
  }

  /// Answer an outbound request.
  ///
  /// Network failures never escape: they end in the fallback chain.
  pub async fn handle_fetch(&self, request: GatewayRequest) -> FetchOutcome {
    if share::is_share_target(&request, &self.origin, &self.config.share_target) {
      return FetchOutcome::Respond(share::handle_share(&request));
    }

    if !classify::should_intercept(&request, &self.origin) {
      return FetchOutcome::PassThrough(request);
    }

    let generation = match self.current_generation() {
      Ok(Some(generation)) => generation,
      Ok(None) => {
        debug!("No active cache generation, passing {} through", request.url);
        return FetchOutcome::PassThrough(request);
      }
      Err(e) => {
        warn!("Failed to resolve cache generation: {}", e);
        return FetchOutcome::PassThrough(request);
      }
    };

    let class = classify::classify(request.url.path(), &self.config.routes);
    debug!("{} {} -> {}", request.method, request.url, class.as_str());

    let result = match class {
      ResourceClass::StaticAsset => {
        strategy::cache_first(&generation, self.network.as_ref(), &request).await
      }
      ResourceClass::DynamicPage => {
        strategy::stale_while_revalidate(&generation, &self.network, &request, &self.background)
          .await
      }
      ResourceClass::Api | ResourceClass::Other => {
        strategy::network_first(&generation, self.network.as_ref(), &request).await
      }
    };

    match result {
      Ok(response) => FetchOutcome::Respond(response),
      Err(e) => {
        info!("Serving offline fallback for {}: {}", request.url, e);
        FetchOutcome::Respond(fallback::offline_response(
          &generation,
          &request,
          &self.config.offline_page,
          &self.config.routes.api_prefix,
        ))
      }
    }
  }

  /// Wait for detached background work (revalidations) to finish.
  pub async fn settle(&self) -> usize {
    self.background.settle().await
  }
}
