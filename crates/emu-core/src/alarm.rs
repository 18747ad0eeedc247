//! Alarm bookkeeping for one clock domain.
//!
//! An alarm is a named slot registered once by its owner. At any moment it
//! is either disarmed or holds exactly one trigger clock. Dispatch order is
//! by trigger clock, ties broken by registration order.

use crate::{Clock, Scheduler};

/// Handle to a registered alarm. Only meaningful in the context that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmId(u16);

impl AlarmId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Receives alarm callbacks.
///
/// `key` is the value given at registration, `offset` is how many cycles the
/// domain clock has already run past the trigger. The handler may arm or
/// disarm any alarm, including the one that just fired.
pub trait AlarmHandler<K> {
    fn on_alarm(&mut self, sched: &mut Scheduler<K>, key: K, offset: Clock);
}

#[derive(Debug, Clone)]
struct Alarm<K> {
    name: &'static str,
    key: K,
    trigger: Option<Clock>,
}

/// The set of alarms belonging to one clock domain.
#[derive(Debug, Clone)]
pub struct AlarmContext<K> {
    alarms: Vec<Alarm<K>>,
    /// Earliest pending trigger, `None` when nothing is armed.
    next: Option<Clock>,
}

impl<K: Copy> AlarmContext<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            alarms: Vec::new(),
            next: None,
        }
    }

    /// Register a new, disarmed alarm.
    pub fn register(&mut self, name: &'static str, key: K) -> AlarmId {
        let id = AlarmId(self.alarms.len() as u16);
        log::trace!("alarm {name} registered as #{}", id.0);
        self.alarms.push(Alarm {
            name,
            key,
            trigger: None,
        });
        id
    }

    /// Arm `id` at `trigger`, replacing any pending trigger.
    pub fn set(&mut self, id: AlarmId, trigger: Clock) {
        let Some(alarm) = self.alarms.get_mut(id.index()) else {
            return;
        };
        let replaced = alarm.trigger.replace(trigger);
        match (replaced, self.next) {
            (Some(old), Some(next)) if old == next && trigger > old => self.update_next(),
            (_, Some(next)) if next <= trigger => {}
            _ => self.next = Some(trigger),
        }
    }

    /// Disarm `id`. Disarming an idle alarm does nothing.
    pub fn unset(&mut self, id: AlarmId) {
        let Some(alarm) = self.alarms.get_mut(id.index()) else {
            return;
        };
        if alarm.trigger.take() == self.next && self.next.is_some() {
            self.update_next();
        }
    }

    #[must_use]
    pub fn pending(&self, id: AlarmId) -> Option<Clock> {
        self.alarms.get(id.index()).and_then(|a| a.trigger)
    }

    #[must_use]
    pub fn next_pending(&self) -> Option<Clock> {
        self.next
    }

    #[must_use]
    pub fn name(&self, id: AlarmId) -> &'static str {
        self.alarms.get(id.index()).map_or("?", |a| a.name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    /// Disarm and return the earliest alarm due at `clk`.
    pub fn pop_due(&mut self, clk: Clock) -> Option<(AlarmId, K, Clock)> {
        match self.next {
            Some(next) if next <= clk => {}
            _ => return None,
        }
        let (index, trigger) = self
            .alarms
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.trigger.map(|t| (i, t)))
            .min_by_key(|&(i, t)| (t, i))?;
        let alarm = &mut self.alarms[index];
        alarm.trigger = None;
        let key = alarm.key;
        self.update_next();
        Some((AlarmId(index as u16), key, trigger))
    }

    /// Subtract `sub` from every pending trigger.
    pub fn rebase(&mut self, sub: Clock) {
        for alarm in &mut self.alarms {
            if let Some(t) = alarm.trigger.as_mut() {
                *t = t.saturating_sub(sub);
            }
        }
        self.next = self.next.map(|t| t.saturating_sub(sub));
    }

    /// Disarm everything. Registrations survive.
    pub fn clear(&mut self) {
        for alarm in &mut self.alarms {
            alarm.trigger = None;
        }
        self.next = None;
    }

    fn update_next(&mut self) {
        self.next = self.alarms.iter().filter_map(|a| a.trigger).min();
    }
}

impl<K: Copy> Default for AlarmContext<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_does_not_arm() {
        let mut ctx = AlarmContext::new();
        let a = ctx.register("a", 1u8);
        assert_eq!(ctx.pending(a), None);
        assert_eq!(ctx.next_pending(), None);
        assert_eq!(ctx.name(a), "a");
    }

    #[test]
    fn next_pending_tracks_earliest() {
        let mut ctx = AlarmContext::new();
        let a = ctx.register("a", 1u8);
        let b = ctx.register("b", 2u8);
        ctx.set(a, 50);
        ctx.set(b, 20);
        assert_eq!(ctx.next_pending(), Some(20));
        ctx.unset(b);
        assert_eq!(ctx.next_pending(), Some(50));
        ctx.set(a, 70);
        assert_eq!(ctx.next_pending(), Some(70));
    }

    #[test]
    fn pop_due_orders_by_clock_then_registration() {
        let mut ctx = AlarmContext::new();
        let a = ctx.register("a", 'a');
        let b = ctx.register("b", 'b');
        let c = ctx.register("c", 'c');
        ctx.set(c, 10);
        ctx.set(b, 10);
        ctx.set(a, 12);

        let order: Vec<char> = std::iter::from_fn(|| ctx.pop_due(20).map(|(_, k, _)| k)).collect();
        assert_eq!(order, vec!['b', 'c', 'a']);
        assert_eq!(ctx.next_pending(), None);
    }

    #[test]
    fn pop_due_ignores_future_alarms() {
        let mut ctx = AlarmContext::new();
        let a = ctx.register("a", 0u8);
        ctx.set(a, 100);
        assert!(ctx.pop_due(99).is_none());
        assert_eq!(ctx.pop_due(100), Some((a, 0, 100)));
    }

    #[test]
    fn rebase_shifts_triggers() {
        let mut ctx = AlarmContext::new();
        let a = ctx.register("a", 0u8);
        ctx.set(a, 1_000);
        ctx.rebase(900);
        assert_eq!(ctx.pending(a), Some(100));
        assert_eq!(ctx.next_pending(), Some(100));
    }

    #[test]
    fn clear_keeps_registrations() {
        let mut ctx = AlarmContext::new();
        let a = ctx.register("a", 0u8);
        ctx.set(a, 5);
        ctx.clear();
        assert_eq!(ctx.pending(a), None);
        assert_eq!(ctx.len(), 1);
    }
}
