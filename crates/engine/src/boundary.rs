//! Async boundary: executor hand-off and context propagation.
//!
//! Methods declared with the asynchronous return shape run the pipeline on a
//! worker task. Around the hand-off, registered [`ContextInterceptor`]s run
//! in three phases over an explicit [`ContextSnapshot`] — no ambient
//! thread-local state is involved:
//!
//! - `prepare` on the calling thread, before control returns to the caller;
//! - `apply` on the worker, before the transport call;
//! - `remove` on the worker, after response-filter processing.
//!
//! Worker threads are reused, so `remove` must fully reverse whatever
//! `apply` installed; the boundary runs `remove` even when the pipeline
//! fails. `prepare`/`apply` run in ascending priority order across
//! interceptor instances; `remove` runs in descending order (cleanup has no
//! specified cross-interceptor dependency).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use restbind_types::{ClientError, ProcessingError};
use tokio::runtime::Handle;
use tokio::task::{self, JoinHandle};
use tracing::debug;

use crate::provider::DEFAULT_PROVIDER_PRIORITY;

/// Explicit key/value context carried across the executor hand-off.
pub type ContextSnapshot = IndexMap<String, String>;

/// Three-phase hook propagating caller context across the async boundary.
pub trait ContextInterceptor: Send + Sync {
    fn priority(&self) -> u32 {
        DEFAULT_PROVIDER_PRIORITY
    }

    /// Capture caller state into the snapshot. Runs on the calling thread.
    fn prepare(&self, snapshot: &mut ContextSnapshot);

    /// Install the snapshot on the worker. Runs before the transport call.
    fn apply(&self, snapshot: &ContextSnapshot);

    /// Reverse whatever `apply` installed. Runs on the worker after
    /// response-filter processing, also on error.
    fn remove(&self, snapshot: &ContextSnapshot);
}

/// Worker execution unit for asynchronous invocations.
///
/// Holds an optional [`Handle`]; without one, the runtime ambient at spawn
/// time is used.
#[derive(Clone, Debug, Default)]
pub struct Executor {
    handle: Option<Handle>,
}

impl Executor {
    /// Use whatever Tokio runtime is current when a task is spawned.
    pub fn ambient() -> Self {
        Self { handle: None }
    }

    /// Pin all worker tasks to a specific runtime.
    pub fn on(handle: Handle) -> Self {
        Self { handle: Some(handle) }
    }

    fn spawn<F, T>(&self, future: F) -> Result<JoinHandle<T>, ProcessingError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match &self.handle {
            Some(handle) => Ok(handle.spawn(future)),
            None => {
                let handle = Handle::try_current().map_err(|error| ProcessingError::Executor {
                    message: error.to_string(),
                })?;
                Ok(handle.spawn(future))
            }
        }
    }
}

/// A dispatched asynchronous invocation; await [`outcome`](Self::outcome)
/// for the result. Dropping it detaches the in-flight call.
pub struct PendingInvocation<T> {
    join: JoinHandle<Result<T, ClientError>>,
}

impl<T> fmt::Debug for PendingInvocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInvocation")
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

impl<T> PendingInvocation<T> {
    /// Wait for the worker task and surface its result. Failures travel
    /// through this channel exactly as the sync path would raise them.
    pub async fn outcome(self) -> Result<T, ClientError> {
        match self.join.await {
            Ok(result) => result,
            Err(join_error) => Err(ProcessingError::Executor {
                message: join_error.to_string(),
            }
            .into()),
        }
    }
}

/// Run `work` on the executor with the three-phase interceptor contract.
///
/// `interceptors` must be sorted ascending by priority. `prepare` completes
/// on the calling thread before this function returns.
pub fn dispatch<F, T>(
    interceptors: &[Arc<dyn ContextInterceptor>],
    executor: &Executor,
    work: F,
) -> Result<PendingInvocation<T>, ClientError>
where
    F: Future<Output = Result<T, ClientError>> + Send + 'static,
    T: Send + 'static,
{
    let mut snapshot = ContextSnapshot::new();
    for interceptor in interceptors {
        interceptor.prepare(&mut snapshot);
    }
    debug!(
        interceptor_count = interceptors.len(),
        snapshot_keys = snapshot.len(),
        "async invocation prepared"
    );

    let interceptors: Vec<Arc<dyn ContextInterceptor>> = interceptors.to_vec();
    let join = executor.spawn(async move {
        for interceptor in &interceptors {
            interceptor.apply(&snapshot);
        }
        let result = work.await;
        for interceptor in interceptors.iter().rev() {
            interceptor.remove(&snapshot);
        }
        result
    })?;
    Ok(PendingInvocation { join })
}

/// Execute an async future from synchronous code, reusing the current Tokio
/// runtime when available and falling back to a throwaway current-thread
/// runtime otherwise.
pub fn block_on_future<F, T>(future: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>> + Send,
    T: Send,
{
    if let Ok(handle) = Handle::try_current() {
        task::block_in_place(|| handle.block_on(future))
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ClientError::from(ProcessingError::Executor {
                    message: error.to_string(),
                })
            })?
            .block_on(future)
    }
}
