use commodore_fdc::{
    BUFFER_SIZE, JobFdc, JobFdcConfig, SECTOR_SIZE, SectorImage, ZoneLayout, data_page, disk_id_addr,
    header_addr, job_code_addr, status,
};
use emu_core::{AlarmHandler, Clock, ClockGuard, ClockRebase, Scheduler};
use pretty_assertions::assert_eq;

struct Unit {
    fdc: JobFdc,
    shared: Vec<u8>,
    polls: Vec<Clock>,
}

impl AlarmHandler<()> for Unit {
    fn on_alarm(&mut self, sched: &mut Scheduler<()>, _key: (), offset: Clock) {
        self.polls.push(sched.clk() - offset);
        self.fdc.alarm(sched, &mut self.shared, offset);
    }
}

impl ClockRebase for Unit {
    fn rebase(&mut self, sub: Clock) {
        self.fdc.rebase(sub);
    }
}

fn unit(sched: &mut Scheduler<()>) -> Unit {
    let mut fdc = JobFdc::new(sched, "FDC", JobFdcConfig::dual(), ());
    fdc.insert(0, Box::new(SectorImage::blank(ZoneLayout::CBM_8050, *b"AA")));
    fdc.insert(1, Box::new(SectorImage::blank(ZoneLayout::CBM_8050, *b"BB")));
    fdc.attach(sched);
    Unit { fdc, shared: vec![0; BUFFER_SIZE], polls: Vec::new() }
}

fn post(u: &mut Unit, slot: usize, code: u8, track: u8, sector: u8) {
    u.shared[header_addr(slot)] = track;
    u.shared[header_addr(slot) + 1] = sector;
    u.shared[job_code_addr(slot)] = code;
}

#[test]
fn copy_between_drives_in_one_poll() {
    let mut sched = Scheduler::new("fdc");
    let mut u = unit(&mut sched);
    let interval = JobFdcConfig::dual().poll_interval;
    sched.advance(interval, &mut u);

    // Seek both drives, write a block to drive 0, read it back, and write
    // the page to drive 1, all queued together.
    post(&mut u, 0, 0xB0, 1, 0);
    post(&mut u, 1, 0xB1, 1, 0);
    u.shared[data_page(2)..data_page(2) + SECTOR_SIZE].fill(0xA5);
    post(&mut u, 2, 0x90, 18, 0);
    post(&mut u, 3, 0x80, 18, 0);
    sched.advance(interval, &mut u);

    let codes: Vec<u8> = (0..4).map(|s| u.shared[job_code_addr(s)]).collect();
    assert_eq!(codes, vec![status::OK; 4]);
    assert_eq!(&u.shared[disk_id_addr(1)..disk_id_addr(1) + 2], b"BB");
    assert_eq!(u.shared[data_page(3) + 100], 0xA5);

    // Drive 1 has not seen that block.
    post(&mut u, 3, 0x81, 18, 0);
    sched.advance(interval, &mut u);
    assert_eq!(u.shared[job_code_addr(3)], status::OK);
    assert_eq!(u.shared[data_page(3) + 100], 0x00);
}

#[test]
fn polling_period_holds_across_rebase() {
    let guard = ClockGuard::new(100_000, 5_000);
    let mut sched = Scheduler::with_guard("fdc", guard).starting_at(60_000);
    let mut u = unit(&mut sched);
    sched.advance(100_000, &mut u);

    // Rebased by 95_000 once the clock reaches the limit at 100_000.
    assert_eq!(
        u.polls,
        vec![70_000, 80_000, 90_000, 100_000, 15_000, 25_000, 35_000, 45_000, 55_000, 65_000]
    );
}
