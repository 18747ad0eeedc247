//! Interval timer state shared by Timer A and Timer B.

use emu_core::{AlarmId, Clock, Scheduler, rebase_clock};

pub(crate) const CR_START: u8 = 0x01;
pub(crate) const CR_PBON: u8 = 0x02;
pub(crate) const CR_TOGGLE: u8 = 0x04;
pub(crate) const CR_ONESHOT: u8 = 0x08;
pub(crate) const CR_LOAD: u8 = 0x10;

/// What a timer counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerInput {
    /// System clock, one per cycle.
    Phi2,
    /// Rising edges on CNT.
    Cnt,
    /// Timer A underflows (Timer B only).
    TimerA,
    /// Timer A underflows while CNT is high (Timer B only).
    TimerACnt,
}

impl TimerInput {
    pub(crate) const fn timer_a(cra: u8) -> Self {
        if cra & 0x20 == 0 { Self::Phi2 } else { Self::Cnt }
    }

    pub(crate) const fn timer_b(crb: u8) -> Self {
        match (crb >> 5) & 0x03 {
            0 => Self::Phi2,
            1 => Self::Cnt,
            2 => Self::TimerA,
            _ => Self::TimerACnt,
        }
    }
}

/// A 16-bit down-counter.
///
/// While counting the system clock the live value is not stored; it is
/// derived from the value at `base` and the elapsed cycles, and the
/// underflow is an alarm at `base + counter + 1`.
#[derive(Debug, Clone)]
pub(crate) struct Timer {
    pub(crate) latch: u16,
    counter: u16,
    base: Clock,
    counting: bool,
    pub(crate) alarm: AlarmId,
    /// PB6/PB7 toggle flip-flop.
    pub(crate) toggle: bool,
    /// Cycle of the last underflow, for the one-cycle PB pulse.
    pub(crate) pulse_at: Option<Clock>,
}

impl Timer {
    pub(crate) fn new(alarm: AlarmId) -> Self {
        Self {
            latch: 0xFFFF,
            counter: 0xFFFF,
            base: 0,
            counting: false,
            alarm,
            toggle: false,
            pulse_at: None,
        }
    }

    pub(crate) fn reset<K: Copy>(&mut self, sched: &mut Scheduler<K>) {
        sched.unset_alarm(self.alarm);
        *self = Self::new(self.alarm);
    }

    pub(crate) fn is_counting(&self) -> bool {
        self.counting
    }

    /// Counter value at `clk`.
    pub(crate) fn value(&self, clk: Clock) -> u16 {
        if !self.counting {
            return self.counter;
        }
        let elapsed = clk.wrapping_sub(self.base);
        let counter = Clock::from(self.counter);
        if elapsed <= counter {
            return (counter - elapsed) as u16;
        }
        // Past an underflow that has not been dispatched yet.
        let period = Clock::from(self.latch) + 1;
        let over = (elapsed - counter - 1) % period;
        (Clock::from(self.latch) - over) as u16
    }

    /// Stop system-clock counting, keeping the value reached at `clk`.
    pub(crate) fn freeze<K: Copy>(&mut self, sched: &mut Scheduler<K>, clk: Clock) {
        if self.counting {
            self.counter = self.value(clk);
            self.counting = false;
            sched.unset_alarm(self.alarm);
        }
    }

    /// Count the system clock from `clk`, arming the underflow alarm.
    pub(crate) fn run_from<K: Copy>(&mut self, sched: &mut Scheduler<K>, clk: Clock) {
        self.base = clk;
        self.counting = true;
        sched.set_alarm(self.alarm, clk + Clock::from(self.counter) + 1);
    }

    pub(crate) fn load(&mut self) {
        self.counter = self.latch;
    }

    pub(crate) fn set_counter(&mut self, value: u16) {
        self.counter = value;
    }

    /// One external count event. Returns true on underflow, with the
    /// counter reloaded.
    pub(crate) fn count(&mut self) -> bool {
        if self.counter == 0 {
            self.counter = self.latch;
            true
        } else {
            self.counter -= 1;
            false
        }
    }

    pub(crate) fn rebase(&mut self, sub: Clock) {
        self.base = rebase_clock(self.base, sub);
        self.pulse_at = self.pulse_at.map(|c| rebase_clock(c, sub));
    }
}
