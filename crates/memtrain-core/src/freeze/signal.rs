use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A one-shot stop flag with interruptible waits.
///
/// Freeze tasks wait on it between writes, so a trigger ends the wait
/// immediately instead of after the next tick.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter.
    pub fn trigger(&self) {
        *self.lock() = true;
        self.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `duration` unless triggered first.
    ///
    /// Returns `true` when the signal fired.
    pub fn wait(&self, duration: Duration) -> bool {
        let guard = self.lock();
        match self
            .condvar
            .wait_timeout_while(guard, duration, |triggered| !*triggered)
        {
            Ok((triggered, _)) => *triggered,
            // poisoned: treat as stop
            Err(_) => true,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.triggered.lock().unwrap_or_else(|e| e.into_inner())
    }
}
