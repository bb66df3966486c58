//! Idle connection reaper

use std::sync::Arc;

use futures::future::join_all;
use kvpool_core::CacheClient;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::pool::{Shared, close_quietly};

/// Spawn the periodic sweep.
///
/// The task holds only a weak reference to the pool and exits when the pool
/// is dropped or its cancellation token fires.
pub(super) fn spawn<C: CacheClient>(shared: &Arc<Shared<C>>) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    let cancel = shared.cancel.clone();
    let period = shared.config.reap_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(shared) = weak.upgrade() else {
                break;
            };
            sweep(&shared).await;
        }

        tracing::debug!("idle reaper stopped");
    })
}

/// Evict connections idle past the timeout, oldest first, without taking
/// the idle count below `min_connections`. Returns the number evicted.
pub(super) async fn sweep<C: CacheClient>(shared: &Shared<C>) -> usize {
    let expired = shared.registry.lock().take_expired(
        Instant::now(),
        shared.config.idle_timeout(),
        shared.config.min_connections(),
    );
    if expired.is_empty() {
        return 0;
    }

    join_all(
        expired
            .iter()
            .map(|(id, client)| close_quietly(*id, client.as_ref())),
    )
    .await;

    let remaining = shared.registry.lock().available_len();
    tracing::debug!(evicted = expired.len(), remaining_idle = remaining, "reaped idle connections");
    expired.len()
}
