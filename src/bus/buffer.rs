//! Shared receive buffer between the transport and synchronous waiters
//!
//! The transport's notification context appends text whenever the link
//! delivers bytes; a waiter clears the buffer right before it writes a
//! frame and then blocks until the terminator shows up, the deadline passes,
//! or someone interrupts the wait.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct State {
    text: String,
    interrupted: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

/// How a wait on the buffer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The pattern arrived; carries the buffered text
    Matched(String),
    /// The deadline passed; carries whatever had accumulated
    TimedOut(String),
    /// [`ReceiveBuffer::interrupt`] was called during the wait
    Interrupted,
}

/// Append-only text accumulator shared by the transport and waiters
#[derive(Debug, Clone, Default)]
pub struct ReceiveBuffer {
    shared: Arc<Shared>,
}

impl ReceiveBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking appender cannot leave the text half-written
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append received text and wake any waiter
    pub fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.lock().text.push_str(text);
        self.shared.changed.notify_all();
    }

    /// Drop all buffered text and reset a pending interrupt
    pub fn clear(&self) {
        let mut state = self.lock();
        state.text.clear();
        state.interrupted = false;
    }

    /// Copy of the buffered text
    pub fn snapshot(&self) -> String {
        self.lock().text.clone()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.lock().text.len()
    }

    /// Whether nothing has been received since the last clear
    pub fn is_empty(&self) -> bool {
        self.lock().text.is_empty()
    }

    /// Whether the buffered text contains `pattern`
    pub fn contains(&self, pattern: char) -> bool {
        self.lock().text.contains(pattern)
    }

    /// Abort the current wait, if any
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.shared.changed.notify_all();
    }

    /// Block until `pattern` is buffered, `timeout` elapses, or the wait is
    /// interrupted
    pub fn wait_for(&self, pattern: char, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.interrupted {
                state.interrupted = false;
                return WaitOutcome::Interrupted;
            }
            if state.text.contains(pattern) {
                return WaitOutcome::Matched(state.text.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut(state.text.clone());
            }
            state = match self.shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
