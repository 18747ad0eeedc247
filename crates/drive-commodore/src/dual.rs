//! IEEE-488 dual drive with a job-queue controller.
//!
//! Address map of the DOS CPU:
//!
//!   $0000-$007F: RIOT1 RAM (mirrored at $0100)
//!   $0080-$00FF: RIOT2 RAM (mirrored at $0180)
//!   $0200-$021F: RIOT1 I/O (mirrored through $027F)
//!   $0280-$029F: RIOT2 I/O (mirrored through $02FF)
//!   $1000-$1FFF: 4KB RAM shared with the controller
//!   $C000-$FFFF: 16KB DOS ROM
//!
//! RIOT1 latches the IEEE data bus: port A in, port B out.
//!
//! RIOT2 port A holds the IEEE control lines; bit 7 is ATN (0 = asserted)
//! and feeds the PA7 edge detector. Port B:
//!   bits 0-2 = device number jumpers (in, device - 8)
//!   bit 3 = drive 1 LED, bit 4 = drive 0 LED, bit 5 = error LED (out)
//!
//! The controller side is not a CPU here: a [`JobFdc`] polls the shared
//! RAM from its own alarm in the drive's clock domain.

use commodore_fdc::{BUFFER_SIZE, JobFdc, JobFdcConfig, JobMedia};
use emu_core::snapshot::split_modules;
use emu_core::{
    AlarmHandler, Clock, ClockGuard, ClockRebase, InterruptKind, ModuleReader, ModuleWriter, Scheduler,
    SnapshotError, SnapshotResult,
};
use mos_riot_6532::{Riot6532, RiotConfig, RiotPorts};

use crate::{DriveError, DriveLeds, FIRST_DEVICE, Rom, open_bus};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

pub const ROM_SIZE: usize = 0x4000;
const SHARED_BASE: u16 = 0x1000;

const PB_JUMPERS: u8 = 0x07;
const PB_LED_DRIVE1: u8 = 0x08;
const PB_LED_DRIVE0: u8 = 0x10;
const PB_LED_ERROR: u8 = 0x20;
const PA_ATN: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DualAlarm {
    Riot1,
    Riot2,
    Fdc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DualDriveConfig {
    /// Bus device number, 8-15.
    pub device: u8,
    pub riot: RiotConfig,
    pub fdc: JobFdcConfig,
    pub guard: ClockGuard,
}

impl DualDriveConfig {
    #[must_use]
    pub fn new(device: u8) -> Self {
        Self {
            device,
            riot: RiotConfig::default(),
            fdc: JobFdcConfig::dual(),
            guard: ClockGuard::default(),
        }
    }
}

impl Default for DualDriveConfig {
    fn default() -> Self {
        Self::new(FIRST_DEVICE)
    }
}

#[derive(Debug, Clone)]
struct IeeeLatches {
    jumpers: u8,
    data_in: u8,
    data_out: u8,
    control_in: u8,
    control_out: u8,
    panel: u8,
}

struct DataPort<'a>(&'a mut IeeeLatches);

impl RiotPorts for DataPort<'_> {
    fn store_pb(&mut self, value: u8) {
        self.0.data_out = value;
    }

    fn read_pa(&mut self) -> u8 {
        self.0.data_in
    }
}

struct ControlPort<'a>(&'a mut IeeeLatches);

impl RiotPorts for ControlPort<'_> {
    fn store_pa(&mut self, value: u8) {
        self.0.control_out = value;
    }

    fn store_pb(&mut self, value: u8) {
        self.0.panel = value;
    }

    fn read_pa(&mut self) -> u8 {
        self.0.control_in
    }

    fn read_pb(&mut self) -> u8 {
        !PB_JUMPERS | (self.0.jumpers & PB_JUMPERS)
    }
}

struct Board {
    rom: Rom,
    riot1: Riot6532,
    riot2: Riot6532,
    fdc: JobFdc,
    shared: Box<[u8; BUFFER_SIZE]>,
    latches: IeeeLatches,
}

impl AlarmHandler<DualAlarm> for Board {
    fn on_alarm(&mut self, sched: &mut Scheduler<DualAlarm>, key: DualAlarm, offset: Clock) {
        match key {
            DualAlarm::Riot1 => self.riot1.alarm(sched, offset),
            DualAlarm::Riot2 => self.riot2.alarm(sched, offset),
            DualAlarm::Fdc => self.fdc.alarm(sched, &mut self.shared[..], offset),
        }
    }
}

impl ClockRebase for Board {
    fn rebase(&mut self, sub: Clock) {
        self.riot1.rebase(sub);
        self.riot2.rebase(sub);
        self.fdc.rebase(sub);
    }
}

/// Dual drive of the IEEE family.
pub struct DualDrive {
    config: DualDriveConfig,
    sched: Scheduler<DualAlarm>,
    board: Board,
}

impl DualDrive {
    #[must_use]
    pub fn new(config: DualDriveConfig) -> Self {
        let mut sched = Scheduler::with_guard("dual drive", config.guard);
        let riot1 = Riot6532::new(&mut sched, "RIOT1", config.riot, DualAlarm::Riot1);
        let riot2 = Riot6532::new(&mut sched, "RIOT2", config.riot, DualAlarm::Riot2);
        let mut fdc = JobFdc::new(&mut sched, "FDC", config.fdc, DualAlarm::Fdc);
        fdc.attach(&mut sched);
        let mut drive = Self {
            config,
            sched,
            board: Board {
                rom: Rom::default(),
                riot1,
                riot2,
                fdc,
                shared: Box::new([0; BUFFER_SIZE]),
                latches: IeeeLatches {
                    jumpers: config.device.wrapping_sub(FIRST_DEVICE) & PB_JUMPERS,
                    data_in: 0xFF,
                    data_out: 0xFF,
                    control_in: 0xFF,
                    control_out: 0xFF,
                    panel: 0xFF,
                },
            },
        };
        drive.reset();
        drive
    }

    #[must_use]
    pub fn config(&self) -> &DualDriveConfig {
        &self.config
    }

    #[must_use]
    pub fn device(&self) -> u8 {
        self.config.device
    }

    /// Load the 16KB DOS ROM.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), DriveError> {
        self.board.rom.load(image, ROM_SIZE)
    }

    #[must_use]
    pub fn clk(&self) -> Clock {
        self.sched.clk()
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<DualAlarm> {
        &self.sched
    }

    pub fn run(&mut self, cycles: Clock) {
        self.sched.advance(cycles, &mut self.board);
    }

    /// Reset both processors. The controller clears its queue on the
    /// next poll.
    pub fn reset(&mut self) {
        let b = &mut self.board;
        b.riot1.reset(&mut self.sched, &mut DataPort(&mut b.latches));
        b.riot2.reset(&mut self.sched, &mut ControlPort(&mut b.latches));
        b.fdc.reset(&mut self.sched);
    }

    // ------------------------------------------------------------------
    // Memory map
    // ------------------------------------------------------------------

    pub fn read(&mut self, addr: u16) -> u8 {
        let b = &mut self.board;
        match addr {
            0x0200..=0x027F => b.riot1.read(&mut self.sched, &mut DataPort(&mut b.latches), addr as u8 & 0x1F),
            0x0280..=0x02FF => b.riot2.read(&mut self.sched, &mut ControlPort(&mut b.latches), addr as u8 & 0x1F),
            _ => self.peek(addr),
        }
    }

    pub fn peek(&mut self, addr: u16) -> u8 {
        let b = &mut self.board;
        match addr {
            0x0000..=0x01FF if addr & 0x80 == 0 => b.riot1.ram_read(addr as u8),
            0x0000..=0x01FF => b.riot2.ram_read(addr as u8),
            0x0200..=0x027F => b.riot1.peek(&self.sched, &mut DataPort(&mut b.latches), addr as u8 & 0x1F),
            0x0280..=0x02FF => b.riot2.peek(&self.sched, &mut ControlPort(&mut b.latches), addr as u8 & 0x1F),
            0x1000..=0x1FFF => b.shared[usize::from(addr - SHARED_BASE)],
            0xC000..=0xFFFF => b.rom.read(usize::from(addr - 0xC000), addr),
            _ => open_bus(addr),
        }
    }

    pub fn store(&mut self, addr: u16, value: u8) {
        let b = &mut self.board;
        match addr {
            0x0000..=0x01FF if addr & 0x80 == 0 => b.riot1.ram_write(addr as u8, value),
            0x0000..=0x01FF => b.riot2.ram_write(addr as u8, value),
            0x0200..=0x027F => {
                b.riot1.store(&mut self.sched, &mut DataPort(&mut b.latches), addr as u8 & 0x1F, value);
            }
            0x0280..=0x02FF => {
                b.riot2.store(&mut self.sched, &mut ControlPort(&mut b.latches), addr as u8 & 0x1F, value);
            }
            0x1000..=0x1FFF => b.shared[usize::from(addr - SHARED_BASE)] = value,
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Outside connections
    // ------------------------------------------------------------------

    /// Insert media into mechanism 0 or 1.
    pub fn attach_disk(&mut self, drive: usize, media: Box<dyn JobMedia>) {
        log::debug!("dual drive {}: disk inserted in drive {drive}", self.config.device);
        self.board.fdc.insert(drive, media);
    }

    pub fn detach_disk(&mut self, drive: usize) -> Option<Box<dyn JobMedia>> {
        self.board.fdc.eject(drive)
    }

    /// RAM shared by the DOS and the controller.
    #[must_use]
    pub fn shared_ram(&self) -> &[u8] {
        &self.board.shared[..]
    }

    pub fn set_ieee_data_in(&mut self, value: u8) {
        self.board.latches.data_in = value;
    }

    #[must_use]
    pub fn ieee_data_out(&self) -> u8 {
        self.board.latches.data_out
    }

    /// Drive the control lines seen by RIOT2 port A.
    pub fn set_ieee_control_in(&mut self, value: u8) {
        self.board.latches.control_in = value;
        self.board.riot2.set_flag_input(&mut self.sched, value & PA_ATN != 0);
    }

    #[must_use]
    pub fn ieee_control_out(&self) -> u8 {
        self.board.latches.control_out
    }

    /// Both RIOTs share the CPU IRQ input.
    #[must_use]
    pub fn irq(&self) -> bool {
        self.sched.interrupt_line(InterruptKind::Irq)
    }

    #[must_use]
    pub fn leds(&self) -> DriveLeds {
        let panel = self.board.latches.panel;
        let mut leds = DriveLeds::empty();
        leds.set(DriveLeds::DRIVE0, panel & PB_LED_DRIVE0 != 0);
        leds.set(DriveLeds::DRIVE1, panel & PB_LED_DRIVE1 != 0);
        leds.set(DriveLeds::ERROR, panel & PB_LED_ERROR != 0);
        leds
    }

    #[must_use]
    pub fn fdc(&self) -> &JobFdc {
        &self.board.fdc
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    fn module_names(&self) -> [String; 4] {
        let device = self.config.device;
        [
            format!("DUAL{device}"),
            format!("DUAL{device}RIOT1"),
            format!("DUAL{device}RIOT2"),
            format!("DUAL{device}FDC"),
        ]
    }

    /// Board, RIOT and controller modules. Inserted media is not included.
    #[must_use]
    pub fn write_snapshot(&self) -> Vec<u8> {
        let [board, riot1, riot2, fdc] = self.module_names();
        let l = &self.board.latches;
        let mut w = ModuleWriter::new(&board, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_bytes(&self.board.shared[..]);
        for latch in [l.data_in, l.data_out, l.control_in, l.control_out, l.panel] {
            w.write_u8(latch);
        }
        let mut out = w.finish();
        out.extend(self.board.riot1.write_snapshot(&self.sched, &riot1));
        out.extend(self.board.riot2.write_snapshot(&self.sched, &riot2));
        out.extend(self.board.fdc.write_snapshot(&self.sched, &fdc));
        out
    }

    pub fn read_snapshot(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let names = self.module_names();
        let modules = split_modules(bytes)?;
        let module = |i: usize| {
            modules.get(i).map(|&(_, m)| m).ok_or_else(|| SnapshotError::Truncated {
                module: names[i].clone(),
            })
        };

        let board = module(0)?;
        let mut r = ModuleReader::open(board, &names[0], SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        self.board.shared.copy_from_slice(r.read_bytes(BUFFER_SIZE)?);
        let [data_in, data_out, control_in, control_out, panel] = r.read_array()?;
        let l = &mut self.board.latches;
        (l.data_in, l.data_out, l.control_in, l.control_out, l.panel) =
            (data_in, data_out, control_in, control_out, panel);

        self.board.riot1.read_snapshot(&mut self.sched, &names[1], module(1)?)?;
        self.board.riot2.read_snapshot(&mut self.sched, &names[2], module(2)?)?;
        self.board.fdc.read_snapshot(&mut self.sched, &names[3], module(3)?)?;
        Ok(())
    }
}
