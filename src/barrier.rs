use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Counts down the messages still expected before the session may exit.
///
/// Armed once with the target count; every accepted message takes one off.
/// The count never goes below zero, extra decrements after the drain are
/// ignored.
#[derive(Debug)]
pub struct CompletionBarrier {
    remaining: Mutex<Option<usize>>,
    drained: Condvar,
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self {
            remaining: Mutex::new(None),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<usize>> {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the count. Only the first call has any effect.
    pub fn arm(&self, n: usize) -> bool {
        let mut remaining = self.lock();
        if remaining.is_some() {
            return false;
        }
        *remaining = Some(n);
        if n == 0 {
            self.drained.notify_all();
        }
        true
    }

    /// Takes one message off the count and returns what is left.
    pub fn decrement(&self) -> usize {
        let mut remaining = self.lock();
        let left = match *remaining {
            Some(n) => n.saturating_sub(1),
            None => {
                log::warn!("message counted before the barrier was armed");
                return 0;
            }
        };
        *remaining = Some(left);
        if left == 0 {
            self.drained.notify_all();
        }
        left
    }

    pub fn remaining(&self) -> Option<usize> {
        *self.lock()
    }

    pub fn is_drained(&self) -> bool {
        *self.lock() == Some(0)
    }

    /// Blocks until the count reaches zero. No timeout.
    pub fn await_drained(&self) {
        let mut remaining = self.lock();
        while *remaining != Some(0) {
            remaining = self
                .drained
                .wait(remaining)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
