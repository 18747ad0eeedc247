use emu_core::{AlarmHandler, Clock, ClockGuard, ClockRebase, Scheduler};
use pretty_assertions::assert_eq;
use wd_1770::{MemoryDisk, Wd1770, Wd1770Config, Wd1770Status};

struct Drive {
    fdc: Wd1770,
    rebases: Vec<Clock>,
}

impl AlarmHandler<()> for Drive {
    fn on_alarm(&mut self, sched: &mut Scheduler<()>, _key: (), offset: Clock) {
        self.fdc.alarm(sched, offset);
    }
}

impl ClockRebase for Drive {
    fn rebase(&mut self, sub: Clock) {
        self.rebases.push(sub);
        self.fdc.rebase(sub);
    }
}

fn drive(sched: &mut Scheduler<()>) -> Drive {
    let mut fdc = Wd1770::new(sched, "WD1770", Wd1770Config::default(), ());
    fdc.reset(sched);
    Drive { fdc, rebases: Vec::new() }
}

#[test]
fn restore_then_force_interrupt() {
    let mut sched = Scheduler::new("drive");
    let mut d = drive(&mut sched);
    let window = d.fdc.config().busy_window;

    d.fdc.store(&mut sched, 0, 0x03);
    assert_eq!(d.fdc.read(&mut sched, 0) & 0x01, 0x01, "busy right after the command");
    sched.advance(window, &mut d);
    assert_eq!(d.fdc.track_register(), 0);
    assert_eq!(d.fdc.read(&mut sched, 0) & 0x01, 0, "busy clears after the window");

    // A long seek is in flight when the host forces an interrupt.
    d.fdc.store(&mut sched, 3, 60);
    d.fdc.store(&mut sched, 0, 0x13);
    sched.advance(window * 10, &mut d);
    assert!(d.fdc.is_busy(sched.clk()));
    d.fdc.store(&mut sched, 0, 0xD8);
    assert_eq!(d.fdc.read(&mut sched, 0), 0);
    assert!(d.fdc.intrq());
}

#[test]
fn command_timing_survives_clock_rebase() {
    let guard = ClockGuard::new(1_000_000, 10_000);
    let mut sched = Scheduler::with_guard("drive", guard).starting_at(990_000);
    let mut d = drive(&mut sched);
    d.fdc.insert_media(Box::new(MemoryDisk::formatted_1581()));

    // Seek 3 tracks at 6 ms per step: 36_100 cycles of busy.
    d.fdc.store(&mut sched, 3, 3);
    d.fdc.store(&mut sched, 0, 0x18);
    let mut elapsed = 0;
    while d.fdc.is_busy(sched.clk()) {
        sched.advance(1, &mut d);
        elapsed += 1;
    }
    assert_eq!(elapsed, 36_100);
    assert_eq!(d.rebases.len(), 1);
    assert!(d.fdc.motor_on(sched.clk()));
    let status = d.fdc.status(sched.clk());
    assert_eq!(status & Wd1770Status::SEEK_ERROR_RNF, Wd1770Status::empty());
}
