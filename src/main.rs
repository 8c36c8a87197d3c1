mod cache;
mod config;
mod gateway;
mod http;
mod logging;
mod network;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use cache::{CacheGeneration, CacheStore, GenerationInfo, SqliteStorage};
use gateway::{ClientWindow, Gateway, GatewayEffect, GatewayEvent, BACKGROUND_SYNC_TAG};
use http::{CachedResponse, GatewayRequest};
use network::{HttpNetwork, Network};

#[derive(Parser, Debug)]
#[command(name = "vasa-gateway")]
#[command(about = "Offline cache gateway for the VASA trade marketplace")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vasa-gateway/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin of the marketplace app
  #[arg(long)]
  origin: Option<String>,

  /// Cache generation version to install and serve
  #[arg(long = "version-tag")]
  version_tag: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured generation from the precache manifest
  Install,
  /// Activate the installed generation and purge all others
  Activate,
  /// Send a request through the gateway
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat as a top-level page navigation (always GET)
    #[arg(long, conflicts_with = "method")]
    navigate: bool,
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Post a control message, e.g. '{"type":"GET_VERSION"}'
  Message { json: String },
  /// Deliver a push payload
  Push { payload: Option<String> },
  /// Click a notification whose data is the given JSON
  Click {
    data: String,
    /// Notification action, e.g. "dismiss"
    #[arg(long)]
    action: Option<String>,
    /// URL of an open client window (repeatable)
    #[arg(long = "client")]
    clients: Vec<String>,
  },
  /// Replay queued offline actions
  Sync {
    #[arg(long, default_value = BACKGROUND_SYNC_TAG)]
    tag: String,
  },
  /// Queue a mutating request for the next sync
  Enqueue {
    url: String,
    #[arg(short = 'X', long, default_value = "POST")]
    method: String,
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Post form-encoded content to the share target
  Share {
    #[arg(long)]
    body: String,
  },
  /// Remove a cached GET response from the active generation
  Evict { url: String },
  /// Show cache generations, their keys and queued actions
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration, command line wins
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(version) = args.version_tag {
    config.version = version;
  }

  let _log_guard = logging::init(&config.logging)?;

  let store = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  let forward = HttpNetwork::passthrough(&config.network)?;
  let gateway = Gateway::new(config, store, network)?;

  let result = run(&gateway, &forward, args.command).await;

  // Let detached revalidations finish before the process exits
  gateway.settle().await;

  result
}

async fn run<S: CacheStore, N: Network>(
  gateway: &Gateway<S, N>,
  forward: &HttpNetwork,
  command: Command,
) -> Result<()> {
  let origin = gateway.config().origin_url()?;
  let resolve = |url: &str| {
    origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  };

  let event = match command {
    Command::Install => GatewayEvent::Install,
    Command::Activate => GatewayEvent::Activate,
    Command::Fetch {
      url,
      method,
      navigate,
      body,
    } => {
      let url = resolve(&url)?;
      let mut request = if navigate {
        GatewayRequest::navigate(url)
      } else {
        GatewayRequest::parse(&method, url.as_str())?
      };
      if let Some(body) = body {
        request = request.with_body(body);
      }
      GatewayEvent::Fetch(request)
    }
    Command::Message { json } => GatewayEvent::Message(
      serde_json::from_str(&json).map_err(|e| eyre!("Invalid message JSON: {}", e))?,
    ),
    Command::Push { payload } => GatewayEvent::Push(payload.map(String::into_bytes)),
    Command::Click {
      data,
      action,
      clients,
    } => GatewayEvent::NotificationClick {
      action,
      data: serde_json::from_str(&data)
        .map_err(|e| eyre!("Invalid notification data: {}", e))?,
      clients: clients
        .into_iter()
        .enumerate()
        .map(|(i, url)| ClientWindow {
          id: format!("client-{}", i + 1),
          url,
        })
        .collect(),
    },
    Command::Sync { tag } => GatewayEvent::Sync { tag },
    Command::Enqueue { url, method, body } => {
      let mut request = GatewayRequest::parse(&method, resolve(&url)?.as_str())?;
      if let Some(body) = body {
        request = request.with_body(body);
      }
      let id = gateway.enqueue_action(&request)?;
      println!("queued {}", id);
      return Ok(());
    }
    Command::Share { body } => GatewayEvent::Fetch(
      GatewayRequest::parse("POST", resolve(&gateway.config().share_target)?.as_str())?
        .with_header("content-type", "application/x-www-form-urlencoded")
        .with_body(body),
    ),
    Command::Evict { url } => {
      let request = GatewayRequest::get(resolve(&url)?);
      let removed = match gateway.current_generation()? {
        Some(generation) => generation.delete(&request)?,
        None => false,
      };
      println!("{} {}", if removed { "evicted" } else { "not cached" }, request.url);
      return Ok(());
    }
    Command::Status => return print_status(gateway.store()),
  };

  match gateway.dispatch(event).await? {
    GatewayEffect::Installed(outcome) => print_json(&outcome),
    GatewayEffect::Activated(activation) => print_json(&activation),
    GatewayEffect::Respond(response) => {
      print_response(&response);
      Ok(())
    }
    GatewayEffect::PassThrough(request) => {
      // Not ours to answer: forward untouched
      let response = forward.fetch(&request).await?;
      print_response(&response);
      Ok(())
    }
    GatewayEffect::Reply(reply) => print_json(&reply),
    GatewayEffect::ShowNotification(notification) => print_json(&notification),
    GatewayEffect::Click(effect) => print_json(&effect),
    GatewayEffect::Synced(report) => print_json(&report),
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", json);
  Ok(())
}

fn print_response(response: &CachedResponse) {
  println!("HTTP {}", response.status);
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", response.body_text());
}

fn print_status<S: CacheStore>(store: &Arc<S>) -> Result<()> {
  let generations = store.generations()?;
  if generations.is_empty() {
    println!("no cache generations");
  }
  for info in &generations {
    print_generation(store, info)?;
  }

  let actions = store.queued_actions()?;
  println!("{} queued offline action(s)", actions.len());
  for action in actions {
    println!(
      "  {} {} {} (attempts: {}, next: {})",
      &action.id[..12.min(action.id.len())],
      action.method,
      action.url,
      action.attempts,
      action.next_attempt_at.format("%Y-%m-%d %H:%M:%S")
    );
  }

  Ok(())
}

fn print_generation<S: CacheStore>(store: &Arc<S>, info: &GenerationInfo) -> Result<()> {
  println!(
    "{:<24} {:<10} {:>6} entries  created {}",
    info.name,
    info.state.as_str(),
    info.entries,
    info.created_at.format("%Y-%m-%d %H:%M:%S")
  );

  let generation = CacheGeneration::new(Arc::clone(store), info.name.as_str(), info.version.as_str());
  for key in generation.keys()? {
    println!("  {}", key);
  }

  Ok(())
}
