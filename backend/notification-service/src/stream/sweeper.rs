/// Liveness sweeper
///
/// Every `period`, closes and removes sessions that have been idle for
/// longer than the registry's inactivity timeout. A connected writer keeps
/// its session fresh with heartbeats, so only stalled streams are swept.
use super::registry::SessionRegistry;
use crate::metrics;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub fn spawn_sweeper(
    registry: SessionRegistry,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        info!(
            period_secs = period.as_secs(),
            timeout_secs = registry.inactivity_timeout().as_secs(),
            "Stream sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Stream sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = registry.evict_idle().await;
                    if !evicted.is_empty() {
                        metrics::sessions_swept(evicted.len());
                    }
                    let remaining = registry.len().await;
                    debug!(evicted = evicted.len(), remaining, "Stream sweep finished");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_silent_session() {
        let registry = SessionRegistry::new(Duration::from_secs(300));
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(registry.clone(), Duration::from_secs(120), shutdown.clone());

        let registration = registry.register(5, 50).await;

        // sweeps at 2m and 4m see an idle time below the timeout
        tokio::time::sleep(Duration::from_secs(270)).await;
        assert!(registry.lookup(5).await.is_some());
        assert!(registration.session.is_open());

        // the 6m sweep sees 360s of silence
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(registry.lookup(5).await.is_none());
        assert!(!registration.session.is_open());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_touched_session() {
        let registry = SessionRegistry::new(Duration::from_secs(300));
        let shutdown = CancellationToken::new();
        let _handle = spawn_sweeper(registry.clone(), Duration::from_secs(120), shutdown.clone());

        let registration = registry.register(5, 50).await;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(30)).await;
            registration.session.touch();
        }

        assert!(registry.lookup(5).await.is_some());
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let registry = SessionRegistry::default();
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(registry, Duration::from_secs(120), shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
