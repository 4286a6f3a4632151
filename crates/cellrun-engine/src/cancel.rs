//! Cross-thread interrupt delivery.
//!
//! The engine calls [`CancelSignal::deliver`] from any thread; the worker
//! observes the interrupt at its next checkpoint or inside an
//! interruptible sleep. Repeated deliveries before the interrupt is
//! consumed coalesce into one. Once closed for shutdown, every checkpoint
//! cancels.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use cellrun_script::{Cancelled, Control};
use thiserror::Error;

/// Why `stop()` could not deliver an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StopError {
    #[error("execution worker is not running")]
    WorkerGone,
    /// Internal fatal condition; the engine panics rather than return it.
    #[error("interrupt delivery is ambiguous: {0} workers attached")]
    AmbiguousDelivery(usize),
}

/// Result of a successful `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// An execution was running and will be interrupted.
    Delivered,
    /// Nothing was running; nothing happens.
    Idle,
}

#[derive(Debug, Default)]
struct SignalState {
    attached: usize,
    executing: bool,
    pending: bool,
    closed: bool,
}

impl SignalState {
    /// Consume a pending interrupt. A closed signal always cancels.
    fn take_interrupt(&mut self) -> bool {
        std::mem::take(&mut self.pending) || self.closed
    }
}

#[derive(Debug, Default)]
pub(crate) struct CancelSignal {
    state: Mutex<SignalState>,
    wake: Condvar,
}

impl CancelSignal {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the calling worker as the interrupt target.
    pub fn attach(self: &Arc<Self>) -> Attachment {
        self.lock().attached += 1;
        Attachment {
            signal: Arc::clone(self),
        }
    }

    /// Interrupt the running execution, if any.
    pub fn deliver(&self) -> Result<Delivery, StopError> {
        let mut state = self.lock();
        match state.attached {
            0 => Err(StopError::WorkerGone),
            1 if !state.executing => Ok(Delivery::Idle),
            1 => {
                state.pending = true;
                self.wake.notify_all();
                Ok(Delivery::Delivered)
            }
            n => {
                state.pending = false;
                Err(StopError::AmbiguousDelivery(n))
            }
        }
    }

    /// Cancel the running execution and every later one. Returns whether
    /// an execution was running.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        state.closed = true;
        self.wake.notify_all();
        state.executing
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.lock().pending
    }
}

impl Control for CancelSignal {
    fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.lock().take_interrupt() {
            return Err(Cancelled);
        }
        Ok(())
    }

    fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now().checked_add(duration);
        let mut state = self.lock();
        loop {
            if state.take_interrupt() {
                return Err(Cancelled);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    deadline - now
                }
                None => Duration::from_secs(3600),
            };
            state = match self.wake.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// A worker's registration on the signal. Dropping it detaches.
pub(crate) struct Attachment {
    signal: Arc<CancelSignal>,
}

impl Attachment {
    /// Open the delivery window, discarding any stale interrupt.
    pub fn begin_execution(&self) {
        let mut state = self.signal.lock();
        state.executing = true;
        state.pending = false;
    }

    /// Close the delivery window; an unconsumed interrupt is dropped.
    pub fn end_execution(&self) {
        let mut state = self.signal.lock();
        state.executing = false;
        state.pending = false;
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let mut state = self.signal.lock();
        state.attached = state.attached.saturating_sub(1);
        state.executing = false;
        state.pending = false;
    }
}
