//! 1581-style serial drive.
//!
//! Address map of the drive CPU:
//!
//!   $0000-$1FFF: 8KB RAM
//!   $4000-$400F: CIA (mirrored through $5FFF)
//!   $6000-$6003: WD1770 (mirrored through $7FFF)
//!   $8000-$FFFF: 32KB ROM
//!
//! CIA port A:
//!   bit 0 = side select (out, 0 = side 1)
//!   bit 1 = /READY (in, 0 = disk spinning)
//!   bit 2 = /MOTOR (out, 0 = on)
//!   bits 3-4 = device number jumpers (in, device - 8)
//!   bit 5 = power LED (out, 1 = lit)
//!   bit 6 = activity LED (out, 1 = lit)
//!   bit 7 = /DISK CHANGE (in, 0 = changed since the head last moved)
//!
//! CIA port B carries the IEC lines in the standard drive layout, plus
//! bit 6 = /WRITE PROTECT (in). ATN is also wired to the CIA FLAG input,
//! so asserting ATN sets ICR bit 4.
//!
//! The WD1770's INTRQ is not wired to the CPU; DOS polls the status
//! register.

use commodore_iec::DrivePortLayout;
use emu_core::snapshot::split_modules;
use emu_core::{
    AlarmHandler, Clock, ClockGuard, ClockRebase, ModuleReader, ModuleWriter, Scheduler, SnapshotError,
    SnapshotResult,
};
use mos_cia_6526::{Cia6526, CiaAlarm, CiaConfig, CiaPin, CiaPorts, NoPorts};
use wd_1770::{SectorMedia, Wd1770, Wd1770Config};

use crate::{DriveError, DriveLeds, FIRST_DEVICE, Rom, open_bus};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

pub const RAM_SIZE: usize = 0x2000;
pub const ROM_SIZE: usize = 0x8000;

const PA_SIDE: u8 = 0x01;
const PA_READY: u8 = 0x02;
const PA_MOTOR: u8 = 0x04;
const PA_DEVICE: u8 = 0x18;
const PA_POWER_LED: u8 = 0x20;
const PA_ACTIVITY_LED: u8 = 0x40;
const PA_DISK_CHANGE: u8 = 0x80;
const PB_WRITE_PROTECT: u8 = 0x40;

/// Alarm keys of the drive's clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveAlarm {
    Cia(CiaAlarm),
    Fdc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Drive1581Config {
    /// Bus device number, 8-11.
    pub device: u8,
    pub cia: CiaConfig,
    pub fdc: Wd1770Config,
    pub guard: ClockGuard,
}

impl Drive1581Config {
    #[must_use]
    pub fn new(device: u8) -> Self {
        Self {
            device,
            cia: CiaConfig::drive(),
            fdc: Wd1770Config::drive_1581(),
            guard: ClockGuard::default(),
        }
    }
}

impl Default for Drive1581Config {
    fn default() -> Self {
        Self::new(FIRST_DEVICE)
    }
}

/// Pin state the CIA does not hold itself.
#[derive(Debug, Clone, Default)]
struct PortState {
    /// Jumper value, device - 8.
    jumpers: u8,
    /// Drive-side IEC input bits, 1 = line low.
    iec_in: u8,
    /// Last port A output.
    pa_out: u8,
    /// Head position when the disk was last changed.
    disk_change: Option<u8>,
    /// Port B output moved since the bus last looked.
    pb_changed: bool,
}

/// The CIA's view of the board.
struct CiaLines<'a> {
    fdc: &'a mut Wd1770,
    io: &'a mut PortState,
}

impl CiaPorts for CiaLines<'_> {
    fn store_pa(&mut self, value: u8) {
        self.io.pa_out = value;
        self.fdc.set_side(u8::from(value & PA_SIDE == 0));
    }

    fn store_pb(&mut self, _value: u8) {
        self.io.pb_changed = true;
    }

    fn read_pa(&mut self) -> u8 {
        let mut value = !(PA_READY | PA_DEVICE | PA_DISK_CHANGE);
        if !(self.fdc.has_media() && self.io.pa_out & PA_MOTOR == 0) {
            value |= PA_READY;
        }
        value |= (self.io.jumpers << 3) & PA_DEVICE;
        if self.io.disk_change.is_none() {
            value |= PA_DISK_CHANGE;
        }
        value
    }

    fn read_pb(&mut self) -> u8 {
        let layout = DrivePortLayout::standard();
        let mut value = !(layout.input_mask() | PB_WRITE_PROTECT) | self.io.iec_in;
        if !self.fdc.write_protected() {
            value |= PB_WRITE_PROTECT;
        }
        value
    }
}

/// Everything in the drive except its clock.
struct Board {
    ram: Box<[u8; RAM_SIZE]>,
    rom: Rom,
    cia: Cia6526,
    fdc: Wd1770,
    io: PortState,
}

impl Board {
    fn lines(&mut self) -> (&mut Cia6526, CiaLines<'_>) {
        (
            &mut self.cia,
            CiaLines {
                fdc: &mut self.fdc,
                io: &mut self.io,
            },
        )
    }

    /// A disk change is forgotten once the head moves.
    fn track_head(&mut self) {
        if self.io.disk_change.is_some_and(|at| at != self.fdc.head_position()) {
            self.io.disk_change = None;
        }
    }
}

impl AlarmHandler<DriveAlarm> for Board {
    fn on_alarm(&mut self, sched: &mut Scheduler<DriveAlarm>, key: DriveAlarm, offset: Clock) {
        match key {
            DriveAlarm::Cia(which) => {
                let (cia, mut lines) = self.lines();
                cia.alarm(sched, &mut lines, which, offset);
            }
            DriveAlarm::Fdc => {
                self.fdc.alarm(sched, offset);
                self.track_head();
            }
        }
    }
}

impl ClockRebase for Board {
    fn rebase(&mut self, sub: Clock) {
        self.cia.rebase(sub);
        self.fdc.rebase(sub);
    }
}

/// 1581-style serial drive.
pub struct Drive1581 {
    config: Drive1581Config,
    sched: Scheduler<DriveAlarm>,
    board: Board,
}

impl Drive1581 {
    /// Modules written by [`Drive1581::write_snapshot`].
    pub const SNAPSHOT_MODULES: usize = 3;

    #[must_use]
    pub fn new(config: Drive1581Config) -> Self {
        let mut sched = Scheduler::with_guard("1581", config.guard);
        let cia = Cia6526::new(&mut sched, "1581 CIA", config.cia, DriveAlarm::Cia);
        let fdc = Wd1770::new(&mut sched, "1581 WD1770", config.fdc, DriveAlarm::Fdc);
        let mut drive = Self {
            config,
            sched,
            board: Board {
                ram: Box::new([0; RAM_SIZE]),
                rom: Rom::default(),
                cia,
                fdc,
                io: PortState {
                    jumpers: config.device.wrapping_sub(FIRST_DEVICE) & 0x03,
                    ..PortState::default()
                },
            },
        };
        drive.reset();
        drive
    }

    #[must_use]
    pub fn config(&self) -> &Drive1581Config {
        &self.config
    }

    #[must_use]
    pub fn device(&self) -> u8 {
        self.config.device
    }

    /// Load the 32KB DOS ROM.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), DriveError> {
        self.board.rom.load(image, ROM_SIZE)
    }

    #[must_use]
    pub fn clk(&self) -> Clock {
        self.sched.clk()
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<DriveAlarm> {
        &self.sched
    }

    /// Run the drive clock forward, firing chip alarms as they fall due.
    pub fn run(&mut self, cycles: Clock) {
        self.sched.advance(cycles, &mut self.board);
    }

    pub fn reset(&mut self) {
        let (cia, mut lines) = self.board.lines();
        cia.reset(&mut self.sched, &mut lines);
        self.board.fdc.reset(&mut self.sched);
    }

    // ------------------------------------------------------------------
    // Memory map
    // ------------------------------------------------------------------

    pub fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x4000..=0x5FFF => {
                let (cia, mut lines) = self.board.lines();
                cia.read(&mut self.sched, &mut lines, addr as u8)
            }
            0x6000..=0x7FFF => self.board.fdc.read(&mut self.sched, addr as u8),
            _ => self.peek(addr),
        }
    }

    /// Memory read without side effects.
    pub fn peek(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.board.ram[usize::from(addr)],
            0x2000..=0x3FFF => open_bus(addr),
            0x4000..=0x5FFF => {
                let (cia, mut lines) = self.board.lines();
                cia.peek(&self.sched, &mut lines, addr as u8)
            }
            0x6000..=0x7FFF => self.board.fdc.peek(&self.sched, addr as u8),
            _ => self.board.rom.read(usize::from(addr - 0x8000), addr),
        }
    }

    pub fn store(&mut self, addr: u16, value: u8) {
        match addr {
            0x0000..=0x1FFF => self.board.ram[usize::from(addr)] = value,
            0x4000..=0x5FFF => {
                let (cia, mut lines) = self.board.lines();
                cia.store(&mut self.sched, &mut lines, addr as u8, value);
            }
            0x6000..=0x7FFF => {
                self.board.fdc.store(&mut self.sched, addr as u8, value);
                self.board.track_head();
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Outside connections
    // ------------------------------------------------------------------

    pub fn attach_disk(&mut self, media: Box<dyn SectorMedia>) {
        log::debug!("drive {}: disk inserted", self.config.device);
        self.board.fdc.insert_media(media);
        self.board.io.disk_change = Some(self.board.fdc.head_position());
    }

    pub fn detach_disk(&mut self) -> Option<Box<dyn SectorMedia>> {
        let media = self.board.fdc.eject_media();
        if media.is_some() {
            log::debug!("drive {}: disk ejected", self.config.device);
            self.board.io.disk_change = Some(self.board.fdc.head_position());
        }
        media
    }

    #[must_use]
    pub fn has_disk(&self) -> bool {
        self.board.fdc.has_media()
    }

    /// Whether port B output changed since the last call. Whoever owns
    /// the bus calls this after every access to the drive.
    pub fn take_port_change(&mut self) -> bool {
        std::mem::take(&mut self.board.io.pb_changed)
    }

    /// Port B bits the CIA actively drives, for the IEC bus.
    pub fn iec_port(&mut self) -> u8 {
        let ddrb = self.board.cia.peek(&self.sched, &mut NoPorts, 0x03);
        self.board.cia.port_b_out(self.sched.clk()) & ddrb
    }

    /// Latch the bus state seen by the drive. An ATN edge reaches the CIA
    /// FLAG pin.
    pub fn set_iec_input(&mut self, port_in: u8, atn_edge: Option<bool>) {
        self.board.io.iec_in = port_in;
        if let Some(asserted) = atn_edge {
            let (cia, mut lines) = self.board.lines();
            cia.set_flag_input(&mut self.sched, &mut lines, CiaPin::Flag, !asserted);
        }
    }

    /// Pulse the CIA FLAG input low, as a parallel cable strobe does.
    /// FLAG returns to the level ATN holds it at.
    pub fn pulse_flag(&mut self) {
        let atn_released = self.board.io.iec_in & DrivePortLayout::standard().atn_in == 0;
        let (cia, mut lines) = self.board.lines();
        cia.set_flag_input(&mut self.sched, &mut lines, CiaPin::Flag, false);
        cia.set_flag_input(&mut self.sched, &mut lines, CiaPin::Flag, atn_released);
    }

    /// CPU IRQ input.
    #[must_use]
    pub fn irq(&self) -> bool {
        self.board.cia.irq_asserted()
    }

    #[must_use]
    pub fn leds(&self) -> DriveLeds {
        let pa = self.board.io.pa_out;
        let mut leds = DriveLeds::empty();
        leds.set(DriveLeds::POWER, pa & PA_POWER_LED != 0);
        leds.set(DriveLeds::ACTIVITY, pa & PA_ACTIVITY_LED != 0);
        leds
    }

    /// Spindle motor as commanded by port A.
    #[must_use]
    pub fn motor(&self) -> bool {
        self.board.io.pa_out & PA_MOTOR == 0
    }

    #[must_use]
    pub fn cia(&self) -> &Cia6526 {
        &self.board.cia
    }

    #[must_use]
    pub fn fdc(&self) -> &Wd1770 {
        &self.board.fdc
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    fn module_names(&self) -> [String; Self::SNAPSHOT_MODULES] {
        let device = self.config.device;
        [
            format!("DRIVE{device}"),
            format!("DRIVE{device}CIA"),
            format!("DRIVE{device}WD1770"),
        ]
    }

    /// Board, CIA and WD1770 modules. Inserted media is not included.
    #[must_use]
    pub fn write_snapshot(&self) -> Vec<u8> {
        let [board, cia, fdc] = self.module_names();
        let io = &self.board.io;
        let mut w = ModuleWriter::new(&board, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_bytes(&self.board.ram[..]);
        w.write_u8(io.iec_in);
        w.write_u8(io.pa_out);
        w.write_bool(io.disk_change.is_some());
        w.write_u8(io.disk_change.unwrap_or(0));
        let mut out = w.finish();
        out.extend(self.board.cia.write_snapshot(&self.sched, &cia));
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
        self.board.ram.copy_from_slice(r.read_bytes(RAM_SIZE)?);
        self.board.io.iec_in = r.read_u8()?;
        self.board.io.pa_out = r.read_u8()?;
        let changed = r.read_bool()?;
        let at = r.read_u8()?;
        self.board.io.disk_change = changed.then_some(at);

        self.board.cia.read_snapshot(&mut self.sched, &names[1], module(1)?)?;
        self.board.fdc.read_snapshot(&mut self.sched, &names[2], module(2)?)?;
        let side = u8::from(self.board.io.pa_out & PA_SIDE == 0);
        self.board.fdc.set_side(side);
        Ok(())
    }
}
