//! Domain clocks and the overflow guard.
//!
//! Every clock domain (a machine CPU, each drive CPU) counts its own cycles
//! in a [`Clock`]. The counter is 32 bits wide, so a long session will
//! eventually approach the end of its range. Before that happens the
//! [`ClockGuard`] picks an amount to subtract, and every component holding an
//! absolute clock value rebases by the same amount in one step.

/// A cycle count within one clock domain.
pub type Clock = u32;

/// Default distance between the guard limit and the end of the clock range.
///
/// No component ever schedules further ahead than this, so `clk + delay`
/// cannot wrap while the clock is below the limit.
pub const DEFAULT_HEADROOM: Clock = 0x1000_0000;

/// Cycles of history kept after a rebase.
pub const DEFAULT_KEEP: Clock = 0x0100_0000;

/// Decides when a domain clock must be rebased, and by how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClockGuard {
    limit: Clock,
    keep: Clock,
}

impl ClockGuard {
    /// Guard firing at `limit`, leaving the clock at `keep` afterwards.
    ///
    /// `keep` is clamped below `limit`.
    #[must_use]
    pub const fn new(limit: Clock, keep: Clock) -> Self {
        let keep = if keep >= limit { limit / 2 } else { keep };
        Self { limit, keep }
    }

    #[must_use]
    pub const fn limit(&self) -> Clock {
        self.limit
    }

    #[must_use]
    pub const fn keep(&self) -> Clock {
        self.keep
    }

    /// Amount to subtract from every absolute clock, if `clk` has reached
    /// the limit.
    #[must_use]
    pub const fn check(&self, clk: Clock) -> Option<Clock> {
        if clk >= self.limit {
            Some(clk - self.keep)
        } else {
            None
        }
    }
}

impl Default for ClockGuard {
    fn default() -> Self {
        Self::new(Clock::MAX - DEFAULT_HEADROOM, DEFAULT_KEEP)
    }
}

/// A component holding absolute clock values of some domain.
///
/// Called once per rebase with the amount subtracted from the domain clock.
/// Values older than `sub` clamp to zero; see [`rebase_clock`].
pub trait ClockRebase {
    fn rebase(&mut self, sub: Clock);
}

/// Rebase a single stored clock value.
#[inline]
#[must_use]
pub const fn rebase_clock(clk: Clock, sub: Clock) -> Clock {
    clk.saturating_sub(sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_quiet_below_limit() {
        let guard = ClockGuard::new(1000, 100);
        assert_eq!(guard.check(0), None);
        assert_eq!(guard.check(999), None);
    }

    #[test]
    fn guard_rebases_to_keep() {
        let guard = ClockGuard::new(1000, 100);
        assert_eq!(guard.check(1000), Some(900));
        assert_eq!(guard.check(1234), Some(1134));
    }

    #[test]
    fn keep_clamped_below_limit() {
        let guard = ClockGuard::new(1000, 5000);
        assert_eq!(guard.keep(), 500);
    }

    #[test]
    fn default_guard_leaves_headroom() {
        let guard = ClockGuard::default();
        assert!(guard.limit().checked_add(DEFAULT_HEADROOM - 1).is_some());
        assert_eq!(guard.check(guard.limit()), Some(guard.limit() - DEFAULT_KEEP));
    }

    #[test]
    fn stale_clocks_clamp_to_zero() {
        assert_eq!(rebase_clock(50, 100), 0);
        assert_eq!(rebase_clock(150, 100), 50);
    }
}
