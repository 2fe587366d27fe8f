//! Back-off policies for stalled producers and consumers.
//!
//! The core never blocks on the OS; whenever a claim, publish or next cannot
//! make progress it hands control to the strategy and retries.

use std::time::Duration;

use crate::sync::{hint, sleep, thread};

/// Invoked on every unsuccessful attempt of a wait round. `first` is true on
/// the round's first call so strategies can reset escalation state. Must be
/// cheap, infallible and safe to call from the hot path.
pub trait YieldStrategy: Send {
    fn wait(&mut self, first: bool, queue_name: &str, actor_name: &str);
}

/// Tight busy loop with a CPU hint. Appropriate when every producer and
/// consumer is pinned to its own hardware thread.
pub struct SpinWait;

impl YieldStrategy for SpinWait {
    #[inline]
    fn wait(&mut self, _first: bool, _queue_name: &str, _actor_name: &str) {
        hint::spin_loop();
    }
}

/// Brief spin burst, then deschedules the current thread.
pub struct Threaded {
    spins: u32,
}

impl Threaded {
    const SPIN_LIMIT: u32 = 128;

    pub fn new() -> Self {
        Self { spins: 0 }
    }
}

impl Default for Threaded {
    fn default() -> Self {
        Self::new()
    }
}

impl YieldStrategy for Threaded {
    #[inline]
    fn wait(&mut self, first: bool, _queue_name: &str, _actor_name: &str) {
        if first {
            self.spins = 0;
        }
        if self.spins < Self::SPIN_LIMIT {
            self.spins += 1;
            hint::spin_loop();
        } else {
            thread::yield_now();
        }
    }
}

/// Escalating back-off: a short spin burst, then a window of thread yields,
/// then brief sleeps until progress resumes.
pub struct Hybrid {
    rounds: u32,
}

impl Hybrid {
    const SPIN_LIMIT: u32 = 16;
    const YIELD_LIMIT: u32 = 128;
    const SLEEP: Duration = Duration::from_micros(50);

    pub fn new() -> Self {
        Self { rounds: 0 }
    }
}

impl Default for Hybrid {
    fn default() -> Self {
        Self::new()
    }
}

impl YieldStrategy for Hybrid {
    #[inline]
    fn wait(&mut self, first: bool, _queue_name: &str, _actor_name: &str) {
        if first {
            self.rounds = 0;
        }
        if self.rounds < Self::SPIN_LIMIT {
            self.rounds += 1;
            hint::spin_loop();
        } else if self.rounds < Self::YIELD_LIMIT {
            self.rounds += 1;
            thread::yield_now();
        } else {
            sleep(Self::SLEEP);
        }
    }
}
