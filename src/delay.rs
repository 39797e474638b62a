//! Injectable delay hook.
//!
//! Retry/backoff waits go through a `Delayer` trait object passed through
//! client options, with a default real-sleep implementation, so tests can
//! substitute an instrumented delayer instead of relying on global state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// A pluggable delay primitive. The default implementation performs a real
/// `tokio::time::sleep`; tests substitute a no-op or instrumented delayer to
/// run retry/backoff logic without waiting in wall-clock time.
#[async_trait]
pub trait Delayer: Send + Sync {
    async fn delay(&self, duration: Duration);
}

/// Default delayer backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealDelayer;

#[async_trait]
impl Delayer for RealDelayer {
    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub type SharedDelayer = Arc<dyn Delayer>;

pub fn default_delayer() -> SharedDelayer {
    Arc::new(RealDelayer)
}
