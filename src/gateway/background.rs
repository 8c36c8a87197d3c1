//! Detached work that outlives the response it was started for.

use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinSet;
use tracing::warn;

/// Fire-and-forget tasks (stale-while-revalidate refreshes).
///
/// Callers never wait on these. `settle` exists so a short-lived process can
/// let them finish before exiting.
#[derive(Default)]
pub struct BackgroundTasks {
  tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn spawn<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match self.tasks.lock() {
      Ok(mut tasks) => {
        // Reap whatever already finished
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
      }
      Err(_) => {
        tokio::spawn(task);
      }
    }
  }

  /// Wait for every outstanding task. Returns how many were awaited.
  pub async fn settle(&self) -> usize {
    let mut tasks = match self.tasks.lock() {
      Ok(mut tasks) => std::mem::take(&mut *tasks),
      Err(_) => return 0,
    };

    let mut settled = 0;
    while let Some(result) = tasks.join_next().await {
      if let Err(e) = result {
        warn!("Background task failed: {}", e);
      }
      settled += 1;
    }
    settled
  }
}
