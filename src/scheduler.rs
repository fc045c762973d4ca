use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future;
use futures::task::{waker, ArcWake, AtomicWaker};

use crate::error::LoadError;

/// Type-erased view of a loader worker, as seen by the scheduler.
#[async_trait]
pub(crate) trait Flush: Send {
    fn name(&self) -> &'static str;

    /// Drains the worker's request queue, registering `cx` to be woken by later requests. Returns
    /// true if any load was answered from the cache.
    fn poll_stage(&mut self, cx: &mut Context<'_>) -> bool;

    fn has_staged(&self) -> bool;

    async fn flush(&mut self) -> Result<(), LoadError>;
}

/// Waker handed to the request future. Records that the request can make progress, and forwards
/// the wake-up to the task running the scheduler.
#[derive(Default)]
struct SweepProgress {
    woken: AtomicBool,
    task: AtomicWaker,
}

impl ArcWake for SweepProgress {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
        arc_self.task.wake();
    }
}

enum Sweep<T> {
    Done(T),
    Flush,
}

/// Decides when the keys staged by a request's loaders are fetched.
///
/// The scheduler polls the request future and the loader workers on the same task. A sweep polls
/// the request until it parks, then drains every loader's queue. As long as something can still
/// run without data (a cache hit was answered, or part of the request woke itself) the request is
/// polled again. A sweep that parks with staged keys yields to the runtime once, and only if the
/// request stays asleep across that turn has it settled. Then every loader holding staged keys is
/// flushed exactly once, concurrently. Results wake the parked resolvers, which may load the next level of the tree in
/// the following sweep.
///
/// This yields one `BatchFunction` call per loader per tree level.
pub(crate) struct FlushScheduler {
    workers: Vec<Box<dyn Flush>>,
    frames: usize,
}

impl FlushScheduler {
    pub(crate) fn new(workers: Vec<Box<dyn Flush>>) -> Self {
        Self { workers, frames: 0 }
    }

    /// Number of flush frames run so far, across every `drive` call.
    pub(crate) fn frames(&self) -> usize {
        self.frames
    }

    /// Polls `request` to completion, flushing loaders whenever it parks on staged keys.
    ///
    /// A contract violation from any loader ends the drive; the request future is dropped.
    pub(crate) async fn drive<F>(&mut self, request: F) -> Result<F::Output, LoadError>
    where
        F: Future,
    {
        let mut request = pin!(request);
        let progress = Arc::new(SweepProgress::default());
        let request_waker = waker(progress.clone());

        loop {
            let workers = &mut self.workers;
            let mut settling = false;
            let sweep = future::poll_fn(|cx| {
                progress.task.register(cx.waker());
                // A wake delivered while we were parked means the request moved on.
                if progress.woken.swap(false, Ordering::AcqRel) {
                    settling = false;
                }
                let mut request_cx = Context::from_waker(&request_waker);
                loop {
                    progress.woken.store(false, Ordering::Release);
                    if let Poll::Ready(output) = request.as_mut().poll(&mut request_cx) {
                        return Poll::Ready(Sweep::Done(output));
                    }
                    let mut answered = false;
                    for worker in workers.iter_mut() {
                        answered |= worker.poll_stage(cx);
                    }
                    if answered || progress.woken.load(Ordering::Acquire) {
                        settling = false;
                        continue;
                    }
                    if !workers.iter().any(|worker| worker.has_staged()) {
                        return Poll::Pending;
                    }
                    if settling {
                        return Poll::Ready(Sweep::Flush);
                    }
                    // Give the runtime one turn to deliver deferred wakes (`yield_now`) first.
                    settling = true;
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
            })
            .await;

            match sweep {
                Sweep::Done(output) => return Ok(output),
                Sweep::Flush => self.flush().await?,
            }
        }
    }

    async fn flush(&mut self) -> Result<(), LoadError> {
        self.frames += 1;
        let staged = self.workers.iter_mut().filter(|worker| worker.has_staged()).collect::<Vec<_>>();
        tracing::debug!(
            frame = self.frames,
            loaders = ?staged.iter().map(|worker| worker.name()).collect::<Vec<_>>(),
            "flushing staged keys"
        );
        future::join_all(staged.into_iter().map(|worker| worker.flush()))
            .await
            .into_iter()
            .collect()
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        tracing::trace!(frames = self.frames, loaders = self.workers.len(), "request loaders discarded");
    }
}
