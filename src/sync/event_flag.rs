//! Binary latch used for the global `stop` and `pause` signals.
//!
//! Atomic flag plus a blocking wait primitive, in the thread-blocking form:
//! node workers are plain OS threads, so `wait_until_lowered` blocks the
//! calling thread on a `Condvar` rather than awaiting an async notifier.
//!
//! Callers distinguish in-group (observable only within one worker group)
//! from cross-group (observable across groups) event flags; since this
//! crate hosts every segment as a thread-group within a single process (see
//! `worker::segment_worker`), both variants share one implementation here —
//! the distinction is purely nominal and kept only so call sites document
//! which scope they mean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

#[derive(Clone)]
pub struct EventFlag {
    raised: Arc<AtomicBool>,
    lowered: Arc<(Mutex<()>, Condvar)>,
}

impl EventFlag {
    pub fn new() -> Self {
        Self {
            raised: Arc::new(AtomicBool::new(false)),
            lowered: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    /// In-group flag: observable only by peers in the same worker group.
    /// See the module docs for why this is currently identical to `cross_group`.
    pub fn in_group() -> Self {
        Self::new()
    }

    /// Cross-group flag: observable across worker groups.
    pub fn cross_group() -> Self {
        Self::new()
    }

    /// Is the flag currently raised?
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Raise the flag, waking any thread blocked in `wait_until_lowered`
    /// callers that are polling (they re-check `is_raised`). Idempotent.
    ///
    /// The store and the notify happen with the condvar's mutex held, not
    /// just the notify: otherwise a waiter that already re-checked
    /// `is_raised` but hasn't yet called `condvar.wait` can miss the
    /// notification entirely and block forever.
    pub fn raise(&self) {
        let (lock, condvar) = &*self.lowered;
        let _guard = lock.lock().unwrap();
        self.raised.store(true, Ordering::SeqCst);
        condvar.notify_all();
    }

    /// Lower the flag, waking any thread blocked in `wait_until_lowered`.
    pub fn lower(&self) {
        let (lock, condvar) = &*self.lowered;
        let _guard = lock.lock().unwrap();
        self.raised.store(false, Ordering::SeqCst);
        condvar.notify_all();
    }

    /// Toggle the flag and return the new state.
    pub fn toggle(&self) -> bool {
        if self.is_raised() {
            self.lower();
            false
        } else {
            self.raise();
            true
        }
    }

    /// Block the calling thread until the flag is lowered. Returns
    /// immediately if it's already lowered.
    pub fn wait_until_lowered(&self) {
        let (lock, condvar) = &*self.lowered;
        let mut guard = lock.lock().unwrap();
        while self.is_raised() {
            guard = condvar.wait(guard).unwrap();
        }
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_lowered() {
        let flag = EventFlag::new();
        assert!(!flag.is_raised());
    }

    #[test]
    fn raise_and_lower_round_trip() {
        let flag = EventFlag::new();
        flag.raise();
        assert!(flag.is_raised());
        flag.lower();
        assert!(!flag.is_raised());
    }

    #[test]
    fn toggle_flips_state() {
        let flag = EventFlag::new();
        assert!(flag.toggle());
        assert!(!flag.toggle());
    }

    #[test]
    fn wait_until_lowered_unblocks_on_lower() {
        let flag = EventFlag::new();
        flag.raise();

        let waiter_flag = flag.clone();
        let handle = std::thread::spawn(move || {
            waiter_flag.wait_until_lowered();
        });

        std::thread::sleep(Duration::from_millis(20));
        flag.lower();

        handle.join().unwrap();
    }
}
