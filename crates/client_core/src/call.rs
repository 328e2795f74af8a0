use std::{
    fmt,
    future::{Future, IntoFuture},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{future::BoxFuture, FutureExt};
use shared::error::RpcError;
use tokio::task::JoinHandle;
use tracing::debug;

/// A built, not yet issued, remote call. Awaiting it (or spawning it)
/// performs the round-trip and yields exactly one `Result`.
#[must_use = "an RpcCall does nothing until awaited or spawned"]
pub struct RpcCall<T> {
    future: BoxFuture<'static, Result<T, RpcError>>,
}

impl<T: Send + 'static> RpcCall<T> {
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, RpcError>> + Send + 'static,
    {
        Self {
            future: future.boxed(),
        }
    }

    /// A call whose outcome is already known; no request is issued.
    pub fn failed(error: RpcError) -> Self {
        Self::new(async move { Err(error) })
    }

    pub fn map<U, F>(self, f: F) -> RpcCall<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        RpcCall::new(async move { self.future.await.map(f) })
    }

    pub fn spawn<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<T, RpcError>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.future.await) })
    }

    /// Like [`RpcCall::spawn`], but the callback is skipped when `liveness`
    /// was invalidated before the call completed.
    pub fn spawn_guarded<F>(self, liveness: Liveness, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<T, RpcError>) + Send + 'static,
    {
        tokio::spawn(async move {
            let result = self.future.await;
            if liveness.is_live() {
                callback(result);
            } else {
                debug!("rest: dropping completion for a closed session");
            }
        })
    }
}

impl<T> IntoFuture for RpcCall<T> {
    type Output = Result<T, RpcError>;
    type IntoFuture = BoxFuture<'static, Result<T, RpcError>>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

impl<T> fmt::Debug for RpcCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcCall").finish_non_exhaustive()
    }
}

/// Shared flag marking whether the owner of pending completions still
/// wants them.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/call_tests.rs"]
mod tests;
