//! Background I/O reactor.
//!
//! The core never assumes more than one reactor thread; it only relies on
//! the contract below. This implementation is a thin wrapper over a
//! `tokio::runtime::Handle`, so a single multi-threaded Tokio runtime serves
//! as the default reactor.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Outcome of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerResult {
    Elapsed,
    Cancelled,
}

/// A handle to a pending timer; dropping it without calling `cancel` lets the
/// timer run to completion.
pub struct TimerHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl TimerHandle {
    /// Cancel the timer. The timer's callback observes `TimerResult::Cancelled`.
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Reactor contract: `post`, `async_read/write` (via the caller's own
/// `tokio::io` calls on the reactor's runtime), and `timer.after`.
#[derive(Clone)]
pub struct Reactor {
    handle: Handle,
}

impl Reactor {
    /// Build a reactor bound to the current Tokio runtime. Must be called
    /// from within a runtime context (e.g. inside `#[tokio::main]` or a test
    /// annotated with `#[tokio::test]`).
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Schedule `f` for execution on a reactor thread. FIFO per spawning
    /// thread is provided by Tokio's scheduler for tasks spawned from the
    /// same task.
    pub fn post<F>(&self, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(f);
    }

    /// Arm a timer that fires `cb(TimerResult)` after `delay`, or sooner with
    /// `Cancelled` if the returned handle is cancelled first.
    pub fn after<F>(&self, delay: Duration, cb: F) -> TimerHandle
    where
        F: FnOnce(TimerResult) + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => cb(TimerResult::Elapsed),
                _ = cancel_rx => cb(TimerResult::Cancelled),
            }
        });
        TimerHandle {
            cancel_tx: Some(cancel_tx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn timer_fires_elapsed_when_not_cancelled() {
        let reactor = Reactor::current();
        let (tx, rx) = oneshot::channel();
        reactor.after(Duration::from_millis(10), move |r| {
            let _ = tx.send(r);
        });
        assert_eq!(rx.await.unwrap(), TimerResult::Elapsed);
    }

    #[tokio::test]
    async fn cancelling_a_timer_reports_cancelled() {
        let reactor = Reactor::current();
        let (tx, rx) = oneshot::channel();
        let handle = reactor.after(Duration::from_secs(5), move |r| {
            let _ = tx.send(r);
        });
        handle.cancel();
        assert_eq!(rx.await.unwrap(), TimerResult::Cancelled);
    }

    #[tokio::test]
    async fn post_runs_the_future() {
        let reactor = Reactor::current();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let (tx, rx) = oneshot::channel();
        reactor.post(async move {
            ran2.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
