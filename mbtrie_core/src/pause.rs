//! Pause/backoff used by writers while readers drain.

use crate::constants::DEFAULT_YIELD_AFTER;

/// Spin-then-yield policy for grace-period waits.
///
/// Every idle poll issues a CPU pause hint. After `yield_after` consecutive
/// idle polls the thread yields to the scheduler and the count restarts.
/// `yield_after == 0` means spin forever and never yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    yield_after: u32,
}

impl Backoff {
    #[inline]
    pub const fn new(yield_after: u32) -> Self {
        Self { yield_after }
    }

    /// Pure spinning, the behaviour of a zero threshold.
    #[inline]
    pub const fn spin_only() -> Self {
        Self::new(0)
    }

    #[inline]
    pub const fn yield_after(&self) -> u32 {
        self.yield_after
    }

    /// Fresh per-wait state.
    #[inline]
    pub fn start(&self) -> SpinWait {
        SpinWait {
            limit: self.yield_after,
            polls: 0,
            yields: 0,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_YIELD_AFTER)
    }
}

/// State of one wait loop.
#[derive(Debug)]
pub struct SpinWait {
    limit: u32,
    polls: u32,
    yields: u64,
}

impl SpinWait {
    /// Back off once after an idle poll.
    #[inline]
    pub fn snooze(&mut self) {
        std::hint::spin_loop();
        if self.limit != 0 {
            self.polls += 1;
            if self.polls == self.limit {
                self.polls = 0;
                self.yields += 1;
                std::thread::yield_now();
            }
        }
    }

    /// Cooperative yields performed so far.
    #[inline]
    pub fn yields(&self) -> u64 {
        self.yields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threshold_never_yields() {
        let mut w = Backoff::spin_only().start();
        for _ in 0..10_000 {
            w.snooze();
        }
        assert_eq!(w.yields(), 0);
    }

    #[test]
    fn yields_every_threshold_polls() {
        let mut w = Backoff::new(8).start();
        for _ in 0..8 * 5 + 3 {
            w.snooze();
        }
        assert_eq!(w.yields(), 5);
    }

    #[test]
    fn default_matches_constant() {
        assert_eq!(Backoff::default().yield_after(), DEFAULT_YIELD_AFTER);
    }
}
