//! Acquire-run-release helpers with error containment

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use kvpool_core::{CacheClient, PoolError, Result};

use super::pool::ConnectionPool;

/// A boxed caller operation, used where several operations of different
/// closure types run in one call.
pub type Operation<C, T> = Box<dyn FnOnce(Arc<C>) -> BoxFuture<'static, Result<T>> + Send>;

impl<C: CacheClient> ConnectionPool<C> {
    /// Run `op` against a pooled connection, returning its error.
    ///
    /// The connection is acquired once and released exactly once, whether
    /// `op` succeeds, fails or panics. A panic is reported as
    /// [`PoolError::Operation`]; other errors pass through unchanged.
    pub async fn try_execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let conn = self.acquire().await?;
        let client = conn.client().clone();
        let outcome = contain(async move { op(client).await }).await;
        conn.release().await;
        outcome
    }

    /// Run `op` against a pooled connection, degrading any failure to `None`.
    ///
    /// Acquire errors, operation errors and panics are logged and swallowed:
    /// `None` means "treat the cache as unavailable". Use
    /// [`try_execute`](Self::try_execute) to see the error.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Option<T>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.try_execute(op).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "cache operation failed");
                None
            }
        }
    }

    /// Run several operations on one connection.
    ///
    /// Each slot of the result holds that operation's value, or `None` if it
    /// failed; a failure does not stop the rest of the batch. If no
    /// connection can be acquired every slot is `None`.
    pub async fn batch<T>(&self, ops: Vec<Operation<C, T>>) -> Vec<Option<T>> {
        let conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, operations = ops.len(), "cache batch could not acquire a connection");
                return ops.iter().map(|_| None).collect();
            }
        };

        let mut results = Vec::with_capacity(ops.len());
        for (index, op) in ops.into_iter().enumerate() {
            let client = conn.client().clone();
            match contain(async move { op(client).await }).await {
                Ok(value) => results.push(Some(value)),
                Err(e) => {
                    tracing::warn!(index, error = %e, "cache batch operation failed");
                    results.push(None);
                }
            }
        }

        conn.release().await;
        results
    }
}

/// Await `fut`, turning a panic into an operation error
async fn contain<T, Fut>(fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(PoolError::Operation(format!(
            "operation panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
