//! A clock domain: one clock, its alarms, its interrupt lines and its guard.
//!
//! The domain's execution loop is the only writer of the clock. After each
//! advance every due alarm is dispatched, earliest first, and then the clock
//! is checked against the overflow guard.

use crate::{
    AlarmContext, AlarmHandler, AlarmId, Clock, ClockGuard, ClockRebase, InterruptKind,
    InterruptSource, InterruptStatus,
};

#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    name: &'static str,
    clk: Clock,
    alarms: AlarmContext<K>,
    interrupts: InterruptStatus,
    guard: ClockGuard,
}

impl<K: Copy> Scheduler<K> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self::with_guard(name, ClockGuard::default())
    }

    #[must_use]
    pub fn with_guard(name: &'static str, guard: ClockGuard) -> Self {
        Self {
            name,
            clk: 0,
            alarms: AlarmContext::new(),
            interrupts: InterruptStatus::new(),
            guard,
        }
    }

    /// Start the domain at `clk` instead of zero.
    #[must_use]
    pub fn starting_at(mut self, clk: Clock) -> Self {
        self.clk = clk;
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn clk(&self) -> Clock {
        self.clk
    }

    #[must_use]
    pub fn guard(&self) -> ClockGuard {
        self.guard
    }

    // ------------------------------------------------------------------
    // Alarms
    // ------------------------------------------------------------------

    pub fn register_alarm(&mut self, name: &'static str, key: K) -> AlarmId {
        self.alarms.register(name, key)
    }

    pub fn set_alarm(&mut self, id: AlarmId, trigger: Clock) {
        log::trace!(
            "{}: arm {} at {trigger} (now {})",
            self.name,
            self.alarms.name(id),
            self.clk
        );
        self.alarms.set(id, trigger);
    }

    pub fn unset_alarm(&mut self, id: AlarmId) {
        self.alarms.unset(id);
    }

    #[must_use]
    pub fn alarm_pending(&self, id: AlarmId) -> Option<Clock> {
        self.alarms.pending(id)
    }

    #[must_use]
    pub fn next_alarm(&self) -> Option<Clock> {
        self.alarms.next_pending()
    }

    #[must_use]
    pub fn alarms(&self) -> &AlarmContext<K> {
        &self.alarms
    }

    // ------------------------------------------------------------------
    // Interrupts
    // ------------------------------------------------------------------

    pub fn register_interrupt(&mut self, name: &'static str) -> InterruptSource {
        self.interrupts.register(name)
    }

    pub fn set_interrupt(&mut self, source: InterruptSource, kind: InterruptKind, requesting: bool) {
        self.interrupts.set(source, kind, requesting, self.clk);
    }

    #[must_use]
    pub fn interrupt_line(&self, kind: InterruptKind) -> bool {
        self.interrupts.line(kind)
    }

    #[must_use]
    pub fn interrupts(&self) -> &InterruptStatus {
        &self.interrupts
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run the clock forward by `cycles`, dispatching alarms as they fall due.
    ///
    /// The advance is split at the guard limit so the clock never runs past
    /// it unrebased.
    pub fn advance<H>(&mut self, cycles: Clock, handler: &mut H)
    where
        H: AlarmHandler<K> + ClockRebase,
    {
        let mut remaining = cycles;
        loop {
            let room = self.guard.limit().saturating_sub(self.clk).max(1);
            let step = remaining.min(room);
            self.clk += step;
            remaining -= step;
            self.dispatch(handler);
            self.prevent_overflow(handler);
            if remaining == 0 {
                break;
            }
        }
    }

    /// Run the clock forward to `target`. A target in the past only
    /// dispatches what is already due.
    pub fn advance_to<H>(&mut self, target: Clock, handler: &mut H)
    where
        H: AlarmHandler<K> + ClockRebase,
    {
        self.advance(target.saturating_sub(self.clk), handler);
    }

    /// Fire every alarm due at the current clock, in trigger order.
    pub fn dispatch<H: AlarmHandler<K>>(&mut self, handler: &mut H) {
        while let Some((id, key, trigger)) = self.alarms.pop_due(self.clk) {
            let offset = self.clk - trigger;
            log::trace!(
                "{}: {} fired at {} (offset {offset})",
                self.name,
                self.alarms.name(id),
                self.clk
            );
            handler.on_alarm(self, key, offset);
        }
    }

    /// Rebase the domain if the clock has reached the guard limit.
    ///
    /// Returns the amount subtracted. Call only after [`Self::dispatch`] so
    /// nothing due is carried across the rebase.
    pub fn prevent_overflow<H: ClockRebase>(&mut self, handler: &mut H) -> Option<Clock> {
        let sub = self.guard.check(self.clk)?;
        log::debug!("{}: clock rebase by {sub} at {}", self.name, self.clk);
        self.clk -= sub;
        self.alarms.rebase(sub);
        self.interrupts.rebase(sub);
        handler.rebase(sub);
        Some(sub)
    }

    /// Power-on state: clock at zero, alarms disarmed, lines released.
    pub fn reset(&mut self) {
        self.clk = 0;
        self.alarms.clear();
        self.interrupts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key {
        A,
        B,
        Periodic,
    }

    #[derive(Default)]
    struct Recorder {
        fired: Vec<(Key, Clock, Clock)>,
        periodic: Option<(AlarmId, Clock)>,
        rebased: Vec<Clock>,
    }

    impl AlarmHandler<Key> for Recorder {
        fn on_alarm(&mut self, sched: &mut Scheduler<Key>, key: Key, offset: Clock) {
            self.fired.push((key, sched.clk(), offset));
            if let (Key::Periodic, Some((id, period))) = (key, self.periodic) {
                let at = sched.clk() - offset + period;
                sched.set_alarm(id, at);
            }
        }
    }

    impl ClockRebase for Recorder {
        fn rebase(&mut self, sub: Clock) {
            self.rebased.push(sub);
        }
    }

    #[test]
    fn fires_in_trigger_order() {
        let mut sched = Scheduler::new("test");
        let a = sched.register_alarm("a", Key::A);
        let b = sched.register_alarm("b", Key::B);
        sched.set_alarm(a, 10);
        sched.set_alarm(b, 5);

        let mut rec = Recorder::default();
        sched.advance(12, &mut rec);
        assert_eq!(rec.fired, vec![(Key::B, 12, 7), (Key::A, 12, 2)]);
    }

    #[test]
    fn ties_fire_in_registration_order() {
        let mut sched = Scheduler::new("test");
        let a = sched.register_alarm("a", Key::A);
        let b = sched.register_alarm("b", Key::B);
        sched.set_alarm(b, 10);
        sched.set_alarm(a, 10);

        let mut rec = Recorder::default();
        sched.advance(10, &mut rec);
        let keys: Vec<Key> = rec.fired.iter().map(|f| f.0).collect();
        assert_eq!(keys, vec![Key::A, Key::B]);
    }

    #[test]
    fn rearm_replaces_pending_trigger() {
        let mut sched = Scheduler::new("test");
        let a = sched.register_alarm("a", Key::A);
        sched.set_alarm(a, 10);
        sched.set_alarm(a, 20);

        let mut rec = Recorder::default();
        sched.advance(15, &mut rec);
        assert!(rec.fired.is_empty(), "old trigger must not fire");
        sched.advance(5, &mut rec);
        assert_eq!(rec.fired, vec![(Key::A, 20, 0)]);
        sched.advance(100, &mut rec);
        assert_eq!(rec.fired.len(), 1, "fires once per arming");
    }

    #[test]
    fn unset_alarm_never_fires() {
        let mut sched = Scheduler::new("test");
        let a = sched.register_alarm("a", Key::A);
        sched.set_alarm(a, 3);
        sched.unset_alarm(a);
        let mut rec = Recorder::default();
        sched.advance(10, &mut rec);
        assert!(rec.fired.is_empty());
    }

    #[test]
    fn past_trigger_fires_on_next_dispatch() {
        let mut sched = Scheduler::new("test").starting_at(100);
        let a = sched.register_alarm("a", Key::A);
        sched.set_alarm(a, 90);
        let mut rec = Recorder::default();
        sched.dispatch(&mut rec);
        assert_eq!(rec.fired, vec![(Key::A, 100, 10)]);
    }

    #[test]
    fn periodic_rearm_catches_up_within_one_dispatch() {
        let mut sched = Scheduler::new("test");
        let p = sched.register_alarm("periodic", Key::Periodic);
        sched.set_alarm(p, 10);
        let mut rec = Recorder {
            periodic: Some((p, 10)),
            ..Recorder::default()
        };
        sched.advance(35, &mut rec);
        let offsets: Vec<Clock> = rec.fired.iter().map(|f| f.2).collect();
        assert_eq!(offsets, vec![25, 15, 5]);
        assert_eq!(sched.alarm_pending(p), Some(40));
    }

    #[test]
    fn overflow_rebases_clock_and_alarms() {
        let guard = ClockGuard::new(1_000, 100);
        let mut sched = Scheduler::with_guard("test", guard).starting_at(990);
        let a = sched.register_alarm("a", Key::A);
        let b = sched.register_alarm("b", Key::B);
        sched.set_alarm(a, 995);
        sched.set_alarm(b, 1_050);

        let mut rec = Recorder::default();
        sched.advance(20, &mut rec);

        assert_eq!(rec.fired, vec![(Key::A, 1_000, 5)], "due alarm fires before rebase");
        assert_eq!(rec.rebased, vec![900]);
        assert_eq!(sched.clk(), 110);
        assert_eq!(sched.alarm_pending(b), Some(150));

        sched.advance(40, &mut rec);
        assert_eq!(rec.fired.last(), Some(&(Key::B, 150, 0)));
    }

    #[test]
    fn overflow_stops_at_limit_even_for_long_advances() {
        let guard = ClockGuard::new(1_000, 100);
        let mut sched: Scheduler<Key> = Scheduler::with_guard("test", guard);
        let mut rec = Recorder::default();
        sched.advance(2_500, &mut rec);
        assert_eq!(rec.rebased, vec![900, 900]);
        assert_eq!(sched.clk(), 700);
    }

    #[test]
    fn interrupt_lines_follow_sources() {
        let mut sched: Scheduler<Key> = Scheduler::new("test").starting_at(42);
        let cia = sched.register_interrupt("CIA");
        sched.set_interrupt(cia, InterruptKind::Irq, true);
        assert!(sched.interrupt_line(InterruptKind::Irq));
        assert_eq!(sched.interrupts().asserted_at(InterruptKind::Irq), Some(42));
        sched.set_interrupt(cia, InterruptKind::Irq, false);
        assert!(!sched.interrupt_line(InterruptKind::Irq));
    }

    #[test]
    fn reset_clears_clock_and_alarms() {
        let mut sched = Scheduler::new("test").starting_at(500);
        let a = sched.register_alarm("a", Key::A);
        sched.set_alarm(a, 600);
        sched.reset();
        assert_eq!(sched.clk(), 0);
        assert_eq!(sched.alarm_pending(a), None);
    }
}
