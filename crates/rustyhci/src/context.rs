//! Cancellation and deadlines for blocking operations
//!
//! Every call that can suspend takes a [`Context`]. A context is cancelled
//! explicitly through [`Context::cancel`] or implicitly once its deadline
//! passes. Child contexts observe the cancellation of their parents but not
//! the other way round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Granularity used by blocking waits that poll a context
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Why a context is done
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

struct Inner {
    canceled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

/// Cancellation handle with an optional deadline
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("done", &self.err())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never done unless cancelled
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// A cancellable child of this context
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                deadline: None,
                parent: Some(self.clone()),
            }),
        }
    }

    /// A child context that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A child context that expires at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                deadline: Some(deadline),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this context and every child derived from it
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
    }

    /// The earliest deadline on the chain, if any
    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.inner.parent.as_ref().and_then(|p| p.deadline());
        match (self.inner.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// `Some` once the context is done
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.canceled.load(Ordering::SeqCst) {
            return Some(ContextError::Canceled);
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Some(ContextError::DeadlineExceeded);
            }
        }
        self.inner.parent.as_ref().and_then(|p| p.err())
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Block until the context is done
    pub fn wait(&self) -> ContextError {
        loop {
            if let Some(err) = self.err() {
                return err;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Sleep for `duration` unless the context finishes first
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let until = Instant::now() + duration;
        loop {
            if let Some(err) = self.err() {
                return Err(err);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep((until - now).min(POLL_INTERVAL));
        }
    }
}

/// One-shot flag that never resets once fired
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signal({})", self.is_set())
    }
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, returning false if it had already fired
    pub fn fire(&self) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap_or_else(|e| e.into_inner());
        let first = !*set;
        *set = true;
        cvar.notify_all();
        first
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait up to `timeout` for the signal, returning whether it fired
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let set = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (set, _) = cvar
            .wait_timeout_while(set, timeout, |set| !*set)
            .unwrap_or_else(|e| e.into_inner());
        *set
    }
}
