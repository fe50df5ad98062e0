//! Bounded pool: a fixed-capacity async task runner shared by every pipeline stage
//! and the bulk job actions.
//!
//! Workers are plain futures joined on the caller's task (no spawning), each pulling
//! the next unclaimed index from a shared counter. Results come back in input order.
//!
//! Capacity is clamped into `[1, MAX_CONCURRENCY]` for every call. Callers that want
//! per-item isolation must turn failures into values inside their task. An `Err`
//! from the task aborts the whole run.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::try_join_all;
use tracing::warn;

/// Hard ceiling on in-flight tasks for any single pool run.
pub const MAX_CONCURRENCY: usize = 10;

type StopFn<'a> = Box<dyn Fn() -> bool + Send + Sync + 'a>;
type StartedFn<'a, I> = Box<dyn Fn(&I, usize) + Send + Sync + 'a>;
type SettledFn<'a, I, T, E> = Box<dyn Fn(&I, usize, Result<&T, &E>) + Send + Sync + 'a>;

/// Rounds and clamps a requested concurrency into `[1, MAX_CONCURRENCY]`.
/// NaN and infinities collapse to 1.
pub fn clamp_concurrency(requested: f64) -> usize {
    if !requested.is_finite() {
        return 1;
    }
    requested.round().clamp(1.0, MAX_CONCURRENCY as f64) as usize
}

/// A single configured pool run. Build with [`BoundedPool::new`], attach optional
/// hooks, then call [`BoundedPool::run`].
pub struct BoundedPool<'a, I, T, E> {
    concurrency: usize,
    should_stop: Option<StopFn<'a>>,
    on_task_started: Option<StartedFn<'a, I>>,
    on_task_settled: Option<SettledFn<'a, I, T, E>>,
}

impl<'a, I, T, E> BoundedPool<'a, I, T, E>
where
    I: Clone,
{
    pub fn new(concurrency: f64) -> Self {
        Self {
            concurrency: clamp_concurrency(concurrency),
            should_stop: None,
            on_task_started: None,
            on_task_settled: None,
        }
    }

    /// Polled by each idle worker right before it claims the next item.
    pub fn should_stop(mut self, predicate: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.should_stop = Some(Box::new(predicate));
        self
    }

    pub fn on_task_started(mut self, hook: impl Fn(&I, usize) + Send + Sync + 'a) -> Self {
        self.on_task_started = Some(Box::new(hook));
        self
    }

    pub fn on_task_settled(
        mut self,
        hook: impl Fn(&I, usize, Result<&T, &E>) + Send + Sync + 'a,
    ) -> Self {
        self.on_task_settled = Some(Box::new(hook));
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `task` over `items` with at most `min(concurrency, items.len())` tasks in
    /// flight. Items never claimed (because `should_stop` fired) are left out of the
    /// result rather than padded.
    pub async fn run<F, Fut>(&self, items: &[I], task: F) -> Result<Vec<T>, E>
    where
        F: Fn(I, usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let total = items.len();
        let next_index = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<T>>> = Mutex::new((0..total).map(|_| None).collect());
        let worker_count = self.concurrency.min(total);

        let next_index = &next_index;
        let slots = &slots;
        let task = &task;

        let workers = (0..worker_count).map(|_| async move {
            loop {
                if self.stop_requested() {
                    return Ok::<(), E>(());
                }

                let index = next_index.fetch_add(1, Ordering::SeqCst);
                if index >= total {
                    return Ok(());
                }

                let item = &items[index];
                self.notify_started(item, index);
                let outcome = task(item.clone(), index).await;
                self.notify_settled(item, index, outcome.as_ref());

                let value = outcome?;
                slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(value);
            }
        });

        try_join_all(workers).await?;

        let slots = std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(slots.into_iter().flatten().collect())
    }

    fn stop_requested(&self) -> bool {
        self.should_stop.as_ref().is_some_and(|stop| stop())
    }

    fn notify_started(&self, item: &I, index: usize) {
        if let Some(hook) = &self.on_task_started {
            if catch_unwind(AssertUnwindSafe(|| hook(item, index))).is_err() {
                warn!(index, "on_task_started hook panicked; ignoring");
            }
        }
    }

    fn notify_settled(&self, item: &I, index: usize, outcome: Result<&T, &E>) {
        if let Some(hook) = &self.on_task_settled {
            if catch_unwind(AssertUnwindSafe(|| hook(item, index, outcome))).is_err() {
                warn!(index, "on_task_settled hook panicked; ignoring");
            }
        }
    }
}
