//! Process-termination hooks
//!
//! Hosts own the process lifecycle; these helpers connect its termination
//! signals to [`ConnectionPool::shutdown`].

use kvpool_core::CacheClient;
use tokio::task::JoinHandle;

use crate::pool::ConnectionPool;

/// Resolve when the process receives Ctrl+C, or SIGTERM on unix
pub async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                        }
                        tracing::info!("SIGINT received");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("SIGTERM received");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler, waiting for Ctrl+C only");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("SIGINT received"),
        Err(e) => {
            // No handler, no signal: never resolve.
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Spawn a task that shuts `pool` down on the first termination signal.
///
/// The task holds a weak handle, so it does not keep the pool alive: once
/// every other handle is dropped the pool is torn down as usual and a later
/// signal finds nothing to drain. The pool's own shutdown is idempotent, so
/// a host that also calls [`ConnectionPool::shutdown`] directly on exit is
/// unaffected.
pub fn install_signal_handlers<C: CacheClient>(pool: &ConnectionPool<C>) -> JoinHandle<()> {
    let pool = pool.downgrade();
    tokio::spawn(async move {
        wait_for_termination().await;
        match pool.upgrade() {
            Some(pool) => {
                tracing::info!("termination signal received, draining connection pool");
                pool.shutdown().await;
            }
            None => tracing::debug!("termination signal received, connection pool already dropped"),
        }
    })
}
