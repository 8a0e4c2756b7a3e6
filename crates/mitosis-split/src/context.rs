//! OperationContext: deadline and cancellation for one split run.
//!
//! Each phase runs through [`OperationContext::run`]; a cancel signal or an
//! expired deadline abandons the in-flight work and fails the phase.
//! Nothing already committed is undone.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{SplitError, SplitErrorKind, SplitPhase, SplitResult};

/// Deadline and cancellation signal shared by every step of a run.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Sender half of a context's cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context plus the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self::new().with_cancellation(rx), CancelHandle(tx))
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancel the run once `signal` reads `true`.
    pub fn with_cancellation(mut self, signal: watch::Receiver<bool>) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Drive `work` to completion unless the run is cancelled or its
    /// deadline passes first; either of those fails `phase`.
    pub async fn run<T, F>(&self, phase: SplitPhase, work: F) -> SplitResult<T>
    where
        F: Future<Output = SplitResult<T>>,
    {
        if self.is_cancelled() {
            return Err(SplitError::new(phase, SplitErrorKind::Cancelled));
        }
        let deadline = self.deadline;

        tokio::select! {
            biased;
            _ = cancelled(self.cancel.clone()) => {
                Err(SplitError::new(phase, SplitErrorKind::Cancelled))
            }
            _ = expired(deadline) => {
                Err(SplitError::new(phase, SplitErrorKind::DeadlineExceeded))
            }
            result = work => result,
        }
    }
}

async fn cancelled(signal: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = signal else {
        return std::future::pending().await;
    };
    loop {
        let now = *rx.borrow_and_update();
        if now {
            return;
        }
        // Sender gone: cancellation can no longer happen.
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
