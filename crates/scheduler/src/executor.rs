//! Single-threaded control executor.
//!
//! One background task owns the state and runs submitted closures in order.
//! Callers get their result back through a one-shot channel, so nothing
//! outside the loop ever touches the state.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("control executor is shut down")]
    Shutdown,

    #[error("control executor dropped the reply")]
    ReplyDropped,

    #[error("control task panicked: {0}")]
    Panicked(String),
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Serializes all access to `S` on one background task.
pub struct ControlExecutor<S> {
    queue: mpsc::Sender<Job<S>>,
    handle: JoinHandle<S>,
}

impl<S: Send + 'static> ControlExecutor<S> {
    /// Spawn the event loop. Must be called from within a Tokio runtime.
    pub fn spawn(state: S, capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(Self::event_loop(state, rx));
        info!(capacity, "Control executor started");
        Self { queue, handle }
    }

    async fn event_loop(mut state: S, mut rx: mpsc::Receiver<Job<S>>) -> S {
        let mut processed: u64 = 0;
        while let Some(job) = rx.recv().await {
            job(&mut state);
            processed += 1;
        }
        debug!(processed, "Control executor queue closed");
        state
    }

    /// Run `f` on the executor and wait for its result.
    ///
    /// A panic inside `f` is reported as [`ExecutorError::Panicked`]; the
    /// loop keeps serving later requests.
    #[instrument(skip_all)]
    pub async fn submit<F, R>(&self, f: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |state| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(state)))
                .map_err(|payload| ExecutorError::Panicked(panic_message(payload.as_ref())));
            if let Err(ExecutorError::Panicked(message)) = &outcome {
                error!(message = %message, "Control task panicked");
            }
            let _ = tx.send(outcome);
        });

        self.queue
            .send(job)
            .await
            .map_err(|_| ExecutorError::Shutdown)?;
        rx.await.map_err(|_| ExecutorError::ReplyDropped)?
    }

    /// Stop accepting work, drain the queue and hand the state back.
    #[instrument(skip_all)]
    pub async fn shutdown(self) -> Result<S, ExecutorError> {
        drop(self.queue);
        let state = self
            .handle
            .await
            .map_err(|e| ExecutorError::Panicked(e.to_string()))?;
        info!("Control executor stopped");
        Ok(state)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ── Countdown ─────────────────────────────────────────────────

/// Completes once it has been counted down `n` times.
#[derive(Debug, Clone)]
pub struct Countdown {
    inner: Arc<CountdownInner>,
}

#[derive(Debug)]
struct CountdownInner {
    remaining: AtomicUsize,
    notify: Notify,
}

impl Countdown {
    pub fn new(n: usize) -> Self {
        Self {
            inner: Arc::new(CountdownInner {
                remaining: AtomicUsize::new(n),
                notify: Notify::new(),
            }),
        }
    }

    /// Record one signal. Extra signals after reaching zero are ignored.
    pub fn count_down(&self) -> usize {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            self.inner.notify.notify_waiters();
        }
        previous.saturating_sub(1)
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Wait until every signal has arrived.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn submit_runs_in_order_and_returns_results() {
        let executor = ControlExecutor::spawn(Vec::<u32>::new(), 4);
        for i in 0..10 {
            executor.submit(move |log| log.push(i)).await.unwrap();
        }
        let len = executor.submit(|log| log.len()).await.unwrap();
        assert_eq!(len, 10);

        let state = executor.shutdown().await.unwrap();
        assert_eq!(state, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_task_does_not_stop_the_loop() {
        let executor = ControlExecutor::spawn(0u32, 4);
        let err = executor
            .submit(|_: &mut u32| -> u32 { panic!("bad task") })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Panicked(ref m) if m.contains("bad task")));

        let value = executor
            .submit(|n| {
                *n += 1;
                *n
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn countdown_completes_after_n_signals() {
        let countdown = Countdown::new(2);
        let waiter = {
            let countdown = countdown.clone();
            tokio::spawn(async move { countdown.wait().await })
        };

        assert_eq!(countdown.count_down(), 1);
        assert!(!countdown.is_done());
        assert_eq!(countdown.count_down(), 0);
        assert_eq!(countdown.count_down(), 0);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(countdown.is_done());
    }

    #[tokio::test]
    async fn zero_countdown_is_already_done() {
        let countdown = Countdown::new(0);
        countdown.wait().await;
        assert_eq!(countdown.remaining(), 0);
    }
}
