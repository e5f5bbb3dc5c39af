//! Keyed single-flight execution.
//!
//! A [`Group`] deduplicates concurrent work by string key: for any key, at
//! most one execution is in flight at a time. Callers that arrive while an
//! execution is running join it and observe the exact same `Result` -- the
//! same value on success, the same error on failure. Once an execution
//! completes its key is cleared, so later callers start a fresh execution.
//!
//! Execution is detached from the caller: the work future runs in its own
//! task, so cancelling a caller does not cancel work that other callers may
//! be joined on (and work that has already started always runs to
//! completion).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::trace;

type Outcome<T, E> = Option<Result<T, E>>;

struct Inner<T, E> {
    calls: Mutex<HashMap<String, watch::Receiver<Outcome<T, E>>>>,
}

/// A keyed single-flight execution group.
///
/// Cheap to clone; all clones share the same in-flight call table. Both the
/// success and error types must be `Clone` so every joined caller can
/// receive the shared result.
pub struct Group<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Group<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for Group<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Group<T, E> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of executions currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.calls.lock().expect("flight lock poisoned").len()
    }
}

impl<T, E> Group<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Run `work` under `key`, or join an execution already in flight for it.
    ///
    /// `work` is only invoked if no execution is in flight for `key`. The
    /// returned result is shared: every caller joined on the same execution
    /// observes the same value or the same error.
    ///
    /// # Panics
    ///
    /// Panics in all joined callers if the work future itself panics; the
    /// panic is not converted into an error value.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut rx = {
            let mut calls = self.inner.calls.lock().expect("flight lock poisoned");
            if let Some(rx) = calls.get(key) {
                trace!(key, "joining in-flight call");
                rx.clone()
            } else {
                trace!(key, "starting new call");
                let (tx, rx) = watch::channel(None);
                calls.insert(key.to_string(), rx.clone());
                let inner = Arc::clone(&self.inner);
                let key = key.to_string();
                let fut = work();
                tokio::spawn(async move {
                    let result = fut.await;
                    // Clear the key before publishing, so a caller that
                    // observes the result and immediately re-runs starts a
                    // fresh execution instead of joining a finished one.
                    inner
                        .calls
                        .lock()
                        .expect("flight lock poisoned")
                        .remove(&key);
                    let _ = tx.send(Some(result));
                });
                rx
            }
        };

        let outcome = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .expect("in-flight call dropped without publishing a result");
        (*outcome).clone().expect("outcome is Some past wait_for")
    }
}
