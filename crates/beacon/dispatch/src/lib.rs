//! Fan-out/fan-in dispatcher
//!
//! A [`Dispatcher`] accepts any number of independent operations, runs each as
//! its own spawned task, and lets the caller drain the results in completion
//! order.
//!
//! ## Short-circuit without cancellation
//!
//! [`Dispatcher::first_error`] returns as soon as one task reports an error.
//! Tasks that were already registered are **not** cancelled: they run to
//! completion unobserved, so their side effects (e.g. storage writes) persist
//! even though the caller only saw the first failure.
//!
//! ## Concurrency bound
//!
//! By default every registered task runs immediately. A [`DispatchLimit`]
//! shared between dispatchers caps how many of their tasks are in flight at
//! once; tasks beyond the cap are spawned but wait for a permit.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

/// Dispatch settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum tasks in flight across dispatchers sharing one limit.
    /// `None` keeps fan-out unbounded.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

/// Shared in-flight cap. Cloning shares the same permits.
#[derive(Debug, Clone, Default)]
pub struct DispatchLimit {
    permits: Option<Arc<Semaphore>>,
}

impl DispatchLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_in_flight: usize) -> Self {
        Self {
            permits: Some(Arc::new(Semaphore::new(max_in_flight.max(1)))),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        match config.max_in_flight {
            Some(max) => Self::bounded(max),
            None => Self::unbounded(),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.permits.is_some()
    }
}

/// Registers independent operations and aggregates their results.
pub struct Dispatcher<T> {
    pending: FuturesUnordered<JoinHandle<T>>,
    limit: DispatchLimit,
    registered: usize,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self::with_limit(DispatchLimit::unbounded())
    }

    pub fn with_limit(limit: DispatchLimit) -> Self {
        Self {
            pending: FuturesUnordered::new(),
            limit,
            registered: 0,
        }
    }

    /// Spawn `task` immediately (subject to the limit).
    pub fn register<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = self.limit.permits.clone();
        let handle = tokio::spawn(async move {
            let _permit = match permits {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            task.await
        });
        self.pending.push(handle);
        self.registered += 1;
    }

    /// Number of registrations so far.
    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Results not yet drained.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain every result, in completion order.
    pub async fn collect(mut self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.pending.len());
        while let Some(joined) = self.pending.next().await {
            if let Some(value) = settle(joined) {
                results.push(value);
            }
        }
        results
    }
}

impl<V, E> Dispatcher<Result<V, E>>
where
    V: Send + 'static,
    E: Send + 'static,
{
    /// Drain until the first error and return it; otherwise return all values
    /// in completion order. Tasks still running when an error is returned keep
    /// running detached.
    pub async fn first_error(mut self) -> Result<Vec<V>, E> {
        let mut values = Vec::with_capacity(self.pending.len());
        while let Some(joined) = self.pending.next().await {
            match settle(joined) {
                Some(Ok(value)) => values.push(value),
                Some(Err(err)) => {
                    if !self.pending.is_empty() {
                        tracing::debug!(
                            in_flight = self.pending.len(),
                            "returning first error; remaining tasks continue detached"
                        );
                    }
                    return Err(err);
                }
                None => {}
            }
        }
        Ok(values)
    }
}

impl<T: Send + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn settle<T>(joined: Result<T, JoinError>) -> Option<T> {
    match joined {
        Ok(value) => Some(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => {
            tracing::warn!(error = %err, "dispatched task cancelled before completion");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn collects_one_result_per_registration() {
        let mut dispatch = Dispatcher::new();
        for i in 0..25u32 {
            dispatch.register(async move { i * 2 });
        }
        assert_eq!(dispatch.registered(), 25);

        let mut results = dispatch.collect().await;
        results.sort_unstable();
        assert_eq!(results, (0..25u32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn first_error_returns_all_values_on_success() {
        let mut dispatch: Dispatcher<Result<u8, String>> = Dispatcher::new();
        dispatch.register(async { Ok(1) });
        dispatch.register(async { Ok(2) });

        let mut values = dispatch.first_error().await.unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_does_not_cancel_siblings() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut dispatch: Dispatcher<Result<(), &'static str>> = Dispatcher::new();

        let flag = finished.clone();
        dispatch.register(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        dispatch.register(async { Err("boom") });

        assert_eq!(dispatch.first_error().await, Err("boom"));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_limit_caps_in_flight_tasks() {
        let limit = DispatchLimit::bounded(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut dispatch = Dispatcher::with_limit(limit);
        for _ in 0..6 {
            let current = current.clone();
            let peak = peak.clone();
            dispatch.register(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }

        assert_eq!(dispatch.collect().await.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn limit_from_config() {
        assert!(!DispatchLimit::from_config(&DispatchConfig::default()).is_bounded());
        assert!(DispatchLimit::from_config(&DispatchConfig {
            max_in_flight: Some(8)
        })
        .is_bounded());
    }
}
