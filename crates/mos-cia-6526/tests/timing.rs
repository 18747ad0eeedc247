use emu_core::{AlarmHandler, Clock, ClockGuard, ClockRebase, InterruptKind, Scheduler};
use mos_cia_6526::{Cia6526, CiaAlarm, CiaConfig, NoPorts};
use pretty_assertions::assert_eq;

struct Board {
    cia: Cia6526,
}

impl AlarmHandler<CiaAlarm> for Board {
    fn on_alarm(&mut self, sched: &mut Scheduler<CiaAlarm>, key: CiaAlarm, offset: Clock) {
        self.cia.alarm(sched, &mut NoPorts, key, offset);
    }
}

impl ClockRebase for Board {
    fn rebase(&mut self, sub: Clock) {
        self.cia.rebase(sub);
    }
}

fn board_at(start: Clock, guard: ClockGuard) -> (Scheduler<CiaAlarm>, Board) {
    let mut sched = Scheduler::with_guard("cpu", guard).starting_at(start);
    let cia = Cia6526::new(&mut sched, "CIA1", CiaConfig::pal_irq(), |a| a);
    (sched, Board { cia })
}

/// Program a continuous Timer A and a cascaded Timer B, then record at
/// which elapsed cycle each interrupt arrives and what the ICR said.
fn scripted_run(start: Clock) -> (Vec<(u32, u8, u16)>, u32) {
    let guard = ClockGuard::new(20_000, 2_000);
    let (mut sched, mut b) = board_at(start, guard);
    let script = [
        (0x04, 0x63),
        (0x05, 0x00),
        (0x06, 0x02),
        (0x07, 0x00),
        (0x0D, 0x83),
        (0x0F, 0x41),
        (0x0E, 0x01),
    ];
    for (reg, value) in script {
        b.cia.store(&mut sched, &mut NoPorts, reg, value);
    }

    let mut events = Vec::new();
    let mut rebases = 0;
    for elapsed in 1..=2_000u32 {
        let before = sched.clk();
        sched.advance(1, &mut b);
        if sched.clk() < before {
            rebases += 1;
        }
        if sched.interrupt_line(InterruptKind::Irq) {
            let timer_a = b.cia.timer_a(sched.clk());
            let icr = b.cia.read(&mut sched, &mut NoPorts, 0x0D);
            events.push((elapsed, icr, timer_a));
        }
    }
    (events, rebases)
}

#[test]
fn clock_overflow_is_transparent() {
    let (from_zero, rebases_zero) = scripted_run(0);
    let (across_limit, rebases_limit) = scripted_run(19_500);

    assert_eq!(rebases_zero, 0);
    assert_eq!(rebases_limit, 1, "run must cross the guard limit once");
    assert_eq!(from_zero.len(), 20);
    assert_eq!(from_zero, across_limit);
}

#[test]
fn cascaded_interrupts_carry_both_flags() {
    let (events, _) = scripted_run(0);
    // Timer A every 100 cycles, Timer B on every third Timer A underflow.
    assert_eq!(events[0], (100, 0x81, 99));
    assert_eq!(events[2], (300, 0x83, 99));
}

#[test]
fn snapshot_restores_pending_timer_relative_to_new_clock() {
    let (mut sched, mut b) = board_at(0, ClockGuard::default());
    for (reg, value) in [(0x04, 0xE8), (0x05, 0x03), (0x0D, 0x81), (0x0E, 0x01)] {
        b.cia.store(&mut sched, &mut NoPorts, reg, value);
    }
    sched.advance(400, &mut b);
    let saved = b.cia.write_snapshot(&sched, "CIA1");

    let (mut sched2, mut b2) = board_at(70_000, ClockGuard::default());
    b2.cia
        .read_snapshot(&mut sched2, "CIA1", &saved)
        .expect("snapshot restores");
    assert_eq!(b2.cia.timer_a(sched2.clk()), b.cia.timer_a(sched.clk()));

    sched.advance(600, &mut b);
    sched2.advance(600, &mut b2);
    assert!(!sched2.interrupt_line(InterruptKind::Irq));
    sched.advance(1, &mut b);
    sched2.advance(1, &mut b2);
    assert!(sched.interrupt_line(InterruptKind::Irq));
    assert!(sched2.interrupt_line(InterruptKind::Irq));
}

#[test]
fn snapshot_rejects_other_module() {
    let (sched, b) = board_at(0, ClockGuard::default());
    let saved = b.cia.write_snapshot(&sched, "CIA1");
    let (mut sched2, mut b2) = board_at(0, ClockGuard::default());
    assert!(b2.cia.read_snapshot(&mut sched2, "CIA2", &saved).is_err());
}

#[test]
fn one_shot_shows_latch_on_underflow_cycle() {
    let (mut sched, mut b) = board_at(0, ClockGuard::default());
    b.cia.store(&mut sched, &mut NoPorts, 0x04, 5);
    b.cia.store(&mut sched, &mut NoPorts, 0x05, 0);
    b.cia.store(&mut sched, &mut NoPorts, 0x0E, 0x19);
    let start = sched.clk();
    assert_eq!(b.cia.timer_a(start + 5), 0);
    // The reload is visible before the underflow alarm is dispatched.
    assert_eq!(b.cia.timer_a(start + 6), 5);

    sched.advance(6, &mut b);
    assert_eq!(b.cia.timer_a(sched.clk()), 5);
    assert_eq!(b.cia.read(&mut sched, &mut NoPorts, 0x0E) & 0x01, 0, "one-shot stops");
    assert_eq!(b.cia.read(&mut sched, &mut NoPorts, 0x0D) & 0x01, 0x01);

    sched.advance(10, &mut b);
    assert_eq!(b.cia.timer_a(sched.clk()), 5, "held at the latch");
}
