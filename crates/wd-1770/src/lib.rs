//! Western Digital WD1770 floppy disk controller.
//!
//! Four registers on the host bus:
//!
//! | Reg | Read    | Write   |
//! |-----|---------|---------|
//! | 0   | Status  | Command |
//! | 1   | Track   | Track   |
//! | 2   | Sector  | Sector  |
//! | 3   | Data    | Data    |
//!
//! # Timing
//!
//! Every command holds BUSY for the configured busy window, plus one step
//! period per head step and the settle delay when requested. BUSY, motor,
//! spin-up and index status are computed from recorded clocks when the
//! status register is read; a single completion alarm ends the command
//! phase and raises INTRQ. Spin-up runs alongside the command and does not
//! extend BUSY.
//!
//! Data transfers are paced by the host: DRQ stays up while bytes remain,
//! so lost data is never reported.

pub mod commands;
pub mod disk;
pub mod track;

pub use commands::{Command, Direction, StepFlags, TransferFlags};
pub use disk::{MemoryDisk, Sector, SectorId, SectorMedia, crc16};

use bitflags::bitflags;
use emu_core::{
    AlarmId, Clock, ClockRebase, InterruptKind, InterruptSource, ModuleReader, ModuleWriter,
    Scheduler, SnapshotResult, rebase_clock,
};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

/// Revolutions before spin-up completes.
const SPIN_UP_REVS: Clock = 6;
/// Idle revolutions before the motor stops.
const MOTOR_OFF_REVS: Clock = 9;
const INDEX_PULSE_MS: u32 = 2;

bitflags! {
    /// Status register. Several bits change meaning between type I and
    /// type II/III commands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Wd1770Status: u8 {
        const BUSY = 0x01;
        /// Index pulse (type I) or data request (type II/III).
        const INDEX_DRQ = 0x02;
        /// Head on track 0 (type I) or lost data (type II/III).
        const TRACK0_LOST_DATA = 0x04;
        const CRC_ERROR = 0x08;
        /// Seek error (type I) or record not found (type II/III).
        const SEEK_ERROR_RNF = 0x10;
        /// Spin-up complete (type I) or deleted data mark (type II/III).
        const SPIN_UP_RECORD_TYPE = 0x20;
        const WRITE_PROTECT = 0x40;
        const MOTOR_ON = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Wd1770Config {
    /// Clock of the owning domain.
    pub clock_hz: u32,
    pub rpm: u32,
    /// Cycles every command stays busy before anything else.
    pub busy_window: Clock,
    /// Step periods for r1r0.
    pub step_ms: [u32; 4],
    /// Head settle delay for V and E.
    pub settle_ms: u32,
    pub max_track: u8,
    /// CPU line INTRQ drives, `None` when the board leaves it unconnected
    /// and only the status register reports completion.
    pub interrupt: Option<InterruptKind>,
}

impl Wd1770Config {
    /// Controller in a 1581: 2 MHz domain, 300 rpm, INTRQ not connected.
    #[must_use]
    pub const fn drive_1581() -> Self {
        Self {
            clock_hz: 2_000_000,
            rpm: 300,
            busy_window: 100,
            step_ms: [6, 12, 20, 30],
            settle_ms: 30,
            max_track: 83,
            interrupt: None,
        }
    }

    #[must_use]
    pub const fn revolution(&self) -> Clock {
        (self.clock_hz as u64 * 60 / self.rpm as u64) as Clock
    }

    #[must_use]
    pub const fn ms(&self, ms: u32) -> Clock {
        (self.clock_hz as u64 * ms as u64 / 1000) as Clock
    }
}

impl Default for Wd1770Config {
    /// 1581 timing with INTRQ on the IRQ line.
    fn default() -> Self {
        Self {
            interrupt: Some(InterruptKind::Irq),
            ..Self::drive_1581()
        }
    }
}

/// What the status register currently reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKind {
    TypeOne,
    TypeTwo,
    /// After Force Interrupt, until the next command.
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Busy window and head movement.
    Command,
    /// Data moving through the data register.
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    None,
    ReadSector,
    WriteSector,
    ReadAddress,
    ReadTrack,
    WriteTrack,
}

/// WD1770 floppy disk controller.
pub struct Wd1770 {
    name: &'static str,
    config: Wd1770Config,
    source: Option<InterruptSource>,
    alarm: AlarmId,

    command: u8,
    track: u8,
    sector: u8,
    data: u8,
    /// Error and record bits latched by the last command.
    errors: Wd1770Status,
    kind: StatusKind,
    phase: Phase,
    transfer: Transfer,
    multiple: bool,
    deleted_mark: bool,
    verify: bool,

    /// Physical head position.
    head: u8,
    side: u8,
    step_dir: Direction,

    busy_clk: Clock,
    busy_len: Clock,
    idle_clk: Clock,
    motor_clk: Option<Clock>,
    spin_up_skipped: bool,
    intrq: bool,

    buffer: Vec<u8>,
    /// Forward position for sector and track data, remaining count for
    /// the ID field of Read Address.
    index: usize,

    media: Option<Box<dyn SectorMedia>>,
}

impl Wd1770 {
    pub fn new<K: Copy>(sched: &mut Scheduler<K>, name: &'static str, config: Wd1770Config, key: K) -> Self {
        let alarm = sched.register_alarm("WD1770", key);
        let source = config.interrupt.map(|_| sched.register_interrupt(name));
        Self {
            name,
            config,
            source,
            alarm,
            command: 0,
            track: 0,
            sector: 1,
            data: 0,
            errors: Wd1770Status::empty(),
            kind: StatusKind::TypeOne,
            phase: Phase::Idle,
            transfer: Transfer::None,
            multiple: false,
            deleted_mark: false,
            verify: false,
            head: 0,
            side: 0,
            step_dir: Direction::In,
            busy_clk: 0,
            busy_len: 0,
            idle_clk: 0,
            motor_clk: None,
            spin_up_skipped: false,
            intrq: false,
            buffer: Vec::new(),
            index: 0,
            media: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn config(&self) -> &Wd1770Config {
        &self.config
    }

    /// Master reset. The head stays where it is; inserted media stays.
    pub fn reset<K: Copy>(&mut self, sched: &mut Scheduler<K>) {
        sched.unset_alarm(self.alarm);
        self.command = 0;
        self.track = 0;
        self.sector = 1;
        self.data = 0;
        self.errors = Wd1770Status::empty();
        self.kind = StatusKind::TypeOne;
        self.phase = Phase::Idle;
        self.transfer = Transfer::None;
        self.multiple = false;
        self.deleted_mark = false;
        self.verify = false;
        self.step_dir = Direction::In;
        self.busy_len = 0;
        self.idle_clk = sched.clk();
        self.motor_clk = None;
        self.spin_up_skipped = false;
        self.buffer.clear();
        self.index = 0;
        self.set_intrq(sched, false);
    }

    // -----------------------------------------------------------------------
    // Media
    // -----------------------------------------------------------------------

    pub fn insert_media(&mut self, media: Box<dyn SectorMedia>) {
        self.media = Some(media);
    }

    pub fn eject_media(&mut self) -> Option<Box<dyn SectorMedia>> {
        self.media.take()
    }

    #[must_use]
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    #[must_use]
    pub fn write_protected(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.write_protected())
    }

    /// Side select from the drive's port.
    pub fn set_side(&mut self, side: u8) {
        self.side = side & 1;
    }

    #[must_use]
    pub fn side(&self) -> u8 {
        self.side
    }

    // -----------------------------------------------------------------------
    // Register interface
    // -----------------------------------------------------------------------

    pub fn store<K: Copy>(&mut self, sched: &mut Scheduler<K>, addr: u8, value: u8) {
        match addr & 0x03 {
            0 => self.write_command(sched, value),
            1 => self.track = value,
            2 => self.sector = value,
            _ => {
                self.data = value;
                if self.phase == Phase::Transfer {
                    self.write_data(sched, value);
                }
            }
        }
    }

    pub fn read<K: Copy>(&mut self, sched: &mut Scheduler<K>, addr: u8) -> u8 {
        match addr & 0x03 {
            0 => {
                let value = self.status(sched.clk()).bits();
                self.set_intrq(sched, false);
                value
            }
            3 if self.phase == Phase::Transfer => self.read_data(sched),
            reg => self.peek(sched, reg),
        }
    }

    /// Register read without clearing INTRQ or consuming data.
    #[must_use]
    pub fn peek<K: Copy>(&self, sched: &Scheduler<K>, addr: u8) -> u8 {
        match addr & 0x03 {
            0 => self.status(sched.clk()).bits(),
            1 => self.track,
            2 => self.sector,
            _ => match self.transfer {
                Transfer::ReadSector | Transfer::ReadTrack if self.phase == Phase::Transfer => {
                    self.buffer.get(self.index).copied().unwrap_or(self.data)
                }
                Transfer::ReadAddress if self.phase == Phase::Transfer => self
                    .buffer
                    .get(self.buffer.len() - self.index)
                    .copied()
                    .unwrap_or(self.data),
                _ => self.data,
            },
        }
    }

    /// Status as the host would read it at `clk`.
    #[must_use]
    pub fn status(&self, clk: Clock) -> Wd1770Status {
        let mut status = match self.kind {
            StatusKind::Cleared => return self.errors,
            StatusKind::TypeOne => {
                let mut s = self.errors;
                s.set(Wd1770Status::INDEX_DRQ, self.index_pulse(clk));
                s.set(Wd1770Status::TRACK0_LOST_DATA, self.head == 0);
                s.set(Wd1770Status::SPIN_UP_RECORD_TYPE, self.spin_up_done(clk));
                s.set(Wd1770Status::WRITE_PROTECT, self.write_protected());
                s
            }
            StatusKind::TypeTwo => {
                let mut s = self.errors;
                s.set(Wd1770Status::INDEX_DRQ, self.drq());
                s
            }
        };
        status.set(Wd1770Status::BUSY, self.is_busy(clk));
        status.set(Wd1770Status::MOTOR_ON, self.motor_on(clk));
        status
    }

    #[must_use]
    pub fn is_busy(&self, clk: Clock) -> bool {
        match self.phase {
            Phase::Idle => false,
            Phase::Transfer => true,
            Phase::Command => {
                self.kind != StatusKind::TypeOne || clk.saturating_sub(self.busy_clk) < self.busy_len
            }
        }
    }

    #[must_use]
    pub fn drq(&self) -> bool {
        self.phase == Phase::Transfer
            && match self.transfer {
                Transfer::ReadSector | Transfer::ReadTrack => self.index < self.buffer.len(),
                Transfer::ReadAddress => self.index > 0,
                Transfer::WriteSector | Transfer::WriteTrack => true,
                Transfer::None => false,
            }
    }

    #[must_use]
    pub fn intrq(&self) -> bool {
        self.intrq
    }

    #[must_use]
    pub fn motor_on(&self, clk: Clock) -> bool {
        self.motor_clk.is_some()
            && self
                .idle_since(clk)
                .is_none_or(|idle| clk.saturating_sub(idle) < MOTOR_OFF_REVS * self.config.revolution())
    }

    #[must_use]
    pub fn track_register(&self) -> u8 {
        self.track
    }

    #[must_use]
    pub fn sector_register(&self) -> u8 {
        self.sector
    }

    /// Physical cylinder under the head.
    #[must_use]
    pub fn head_position(&self) -> u8 {
        self.head
    }

    // -----------------------------------------------------------------------
    // Alarm
    // -----------------------------------------------------------------------

    /// Completion of the command phase.
    pub fn alarm<K: Copy>(&mut self, sched: &mut Scheduler<K>, offset: Clock) {
        let at = sched.clk() - offset;
        if self.phase != Phase::Command {
            return;
        }
        if self.kind == StatusKind::TypeOne {
            if self.verify && !self.track_on_media() {
                self.errors |= Wd1770Status::SEEK_ERROR_RNF;
            }
            self.finish(sched, at);
        } else {
            self.start_transfer(sched, at);
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn write_command<K: Copy>(&mut self, sched: &mut Scheduler<K>, value: u8) {
        let now = sched.clk();
        let cmd = Command::decode(value);
        if let Command::ForceInterrupt(conditions) = cmd {
            self.force_interrupt(sched, conditions);
            return;
        }
        if self.is_busy(now) {
            log::debug!("{}: command ${value:02X} ignored while busy", self.name);
            return;
        }
        log::debug!("{}: command ${value:02X} {cmd:?}", self.name);

        self.command = value;
        self.errors = Wd1770Status::empty();
        self.set_intrq(sched, false);
        if !self.motor_on(now) {
            self.motor_clk = Some(now);
            self.spin_up_skipped = !cmd.spin_up();
        }
        self.busy_clk = now;
        self.verify = false;

        match cmd {
            Command::Restore(flags) => {
                let steps = self.head;
                self.head = 0;
                self.track = 0;
                self.step_dir = Direction::Out;
                self.begin_type_one(flags, Clock::from(steps));
            }
            Command::Seek(flags) => {
                let target = self.data;
                let delta = i16::from(target) - i16::from(self.track);
                self.step_dir = if delta < 0 { Direction::Out } else { Direction::In };
                let head = (i16::from(self.head) + delta).clamp(0, i16::from(self.config.max_track));
                self.head = head as u8;
                self.track = target;
                self.begin_type_one(flags, Clock::from(delta.unsigned_abs()));
            }
            Command::Step { flags, update } => self.step(flags, update, self.step_dir),
            Command::StepDir { flags, update, dir } => self.step(flags, update, dir),
            Command::ReadSector { flags, multiple } => {
                self.multiple = multiple;
                self.begin_transfer(Transfer::ReadSector, flags);
            }
            Command::WriteSector { flags, multiple, deleted } => {
                self.multiple = multiple;
                self.deleted_mark = deleted;
                self.begin_transfer(Transfer::WriteSector, flags);
            }
            Command::ReadAddress(flags) => self.begin_transfer(Transfer::ReadAddress, flags),
            Command::ReadTrack(flags) => self.begin_transfer(Transfer::ReadTrack, flags),
            Command::WriteTrack(flags) => self.begin_transfer(Transfer::WriteTrack, flags),
            Command::ForceInterrupt(_) => {}
        }
        sched.set_alarm(self.alarm, now + self.busy_len);
    }

    fn step(&mut self, flags: StepFlags, update: bool, dir: Direction) {
        self.step_dir = dir;
        match dir {
            Direction::In => {
                self.head = self.head.saturating_add(1).min(self.config.max_track);
                if update {
                    self.track = self.track.wrapping_add(1);
                }
            }
            Direction::Out => {
                self.head = self.head.saturating_sub(1);
                if update {
                    self.track = self.track.wrapping_sub(1);
                }
            }
        }
        self.begin_type_one(flags, 1);
    }

    fn begin_type_one(&mut self, flags: StepFlags, steps: Clock) {
        self.kind = StatusKind::TypeOne;
        self.phase = Phase::Command;
        self.transfer = Transfer::None;
        self.verify = flags.verify;
        let step = self.config.ms(self.config.step_ms[usize::from(flags.rate)]);
        let settle = if flags.verify { self.config.ms(self.config.settle_ms) } else { 0 };
        self.busy_len = self.config.busy_window + steps * step + settle;
    }

    fn begin_transfer(&mut self, transfer: Transfer, flags: TransferFlags) {
        self.kind = StatusKind::TypeTwo;
        self.phase = Phase::Command;
        self.transfer = transfer;
        self.buffer.clear();
        self.index = 0;
        let settle = if flags.settle { self.config.ms(self.config.settle_ms) } else { 0 };
        self.busy_len = self.config.busy_window + settle;
    }

    fn force_interrupt<K: Copy>(&mut self, sched: &mut Scheduler<K>, conditions: u8) {
        let now = sched.clk();
        log::debug!("{}: force interrupt ${conditions:X}", self.name);
        sched.unset_alarm(self.alarm);
        self.idle_clk = self.idle_since(now).unwrap_or(now);
        self.phase = Phase::Idle;
        self.transfer = Transfer::None;
        self.buffer.clear();
        self.index = 0;
        self.errors = Wd1770Status::empty();
        self.kind = StatusKind::Cleared;
        // I0-I2 wait for index or ready transitions, which nothing drives.
        self.set_intrq(sched, conditions & 0x08 != 0);
    }

    fn start_transfer<K: Copy>(&mut self, sched: &mut Scheduler<K>, at: Clock) {
        match self.transfer {
            Transfer::ReadSector => self.load_sector(sched, at),
            Transfer::WriteSector => {
                if self.write_protected() {
                    self.errors |= Wd1770Status::WRITE_PROTECT;
                    self.finish(sched, at);
                } else if self.locate().is_some() {
                    self.phase = Phase::Transfer;
                } else {
                    self.errors |= Wd1770Status::SEEK_ERROR_RNF;
                    self.finish(sched, at);
                }
            }
            Transfer::ReadAddress => {
                let ids = self.ids();
                if ids.is_empty() {
                    self.errors |= Wd1770Status::SEEK_ERROR_RNF;
                    self.finish(sched, at);
                    return;
                }
                let id = ids[self.rotation_slot(at, ids.len())];
                let [crc_hi, crc_lo] = id.crc().to_be_bytes();
                self.buffer = vec![id.track, id.side, id.sector, id.size_code, crc_hi, crc_lo];
                self.index = self.buffer.len();
                self.sector = id.track;
                self.phase = Phase::Transfer;
            }
            Transfer::ReadTrack => {
                let Some(media) = &self.media else {
                    self.finish(sched, at);
                    return;
                };
                let sectors: Vec<Sector> = media
                    .ids(self.head, self.side)
                    .iter()
                    .filter_map(|id| media.read_sector(self.head, self.side, id))
                    .collect();
                self.buffer = track::build(&sectors);
                self.phase = Phase::Transfer;
            }
            Transfer::WriteTrack => {
                if self.media.is_none() {
                    self.finish(sched, at);
                } else if self.write_protected() {
                    self.errors |= Wd1770Status::WRITE_PROTECT;
                    self.finish(sched, at);
                } else {
                    self.phase = Phase::Transfer;
                }
            }
            Transfer::None => self.finish(sched, at),
        }
    }

    /// Fetch the sector named by the track and sector registers.
    fn load_sector<K: Copy>(&mut self, sched: &mut Scheduler<K>, at: Clock) {
        let sector = self.locate().and_then(|id| {
            self.media
                .as_ref()
                .and_then(|m| m.read_sector(self.head, self.side, &id))
        });
        match sector {
            Some(sector) => {
                self.errors.set(Wd1770Status::SPIN_UP_RECORD_TYPE, sector.deleted);
                self.buffer = sector.data;
                self.index = 0;
                self.phase = Phase::Transfer;
            }
            None => {
                self.errors |= Wd1770Status::SEEK_ERROR_RNF;
                self.finish(sched, at);
            }
        }
    }

    fn read_data<K: Copy>(&mut self, sched: &mut Scheduler<K>) -> u8 {
        let now = sched.clk();
        match self.transfer {
            Transfer::ReadSector | Transfer::ReadTrack => {
                let Some(&value) = self.buffer.get(self.index) else {
                    return self.data;
                };
                self.data = value;
                self.index += 1;
                if self.index == self.buffer.len() {
                    if self.transfer == Transfer::ReadSector && self.multiple {
                        self.sector = self.sector.wrapping_add(1);
                        self.load_sector(sched, now);
                    } else {
                        self.finish(sched, now);
                    }
                }
            }
            Transfer::ReadAddress => {
                if self.index > 0 {
                    self.data = self.buffer[self.buffer.len() - self.index];
                    self.index -= 1;
                    if self.index == 0 {
                        self.finish(sched, now);
                    }
                }
            }
            _ => {}
        }
        self.data
    }

    fn write_data<K: Copy>(&mut self, sched: &mut Scheduler<K>, value: u8) {
        let now = sched.clk();
        match self.transfer {
            Transfer::WriteSector => {
                let Some(id) = self.locate() else {
                    self.errors |= Wd1770Status::SEEK_ERROR_RNF;
                    self.finish(sched, now);
                    return;
                };
                self.buffer.push(value);
                if self.buffer.len() < id.len() {
                    return;
                }
                let (head, side, deleted) = (self.head, self.side, self.deleted_mark);
                if let Some(media) = self.media.as_mut() {
                    media.write_sector(head, side, &id, &self.buffer, deleted);
                }
                self.buffer.clear();
                if self.multiple {
                    self.sector = self.sector.wrapping_add(1);
                    if self.locate().is_none() {
                        self.errors |= Wd1770Status::SEEK_ERROR_RNF;
                        self.finish(sched, now);
                    }
                } else {
                    self.finish(sched, now);
                }
            }
            Transfer::WriteTrack => {
                self.buffer.push(value);
                if self.buffer.len() < track::TRACK_BYTES {
                    return;
                }
                let sectors = track::parse(&self.buffer);
                if sectors.is_empty() {
                    log::warn!(
                        "{}: write track on cylinder {} carried no ID fields",
                        self.name,
                        self.head
                    );
                }
                let (head, side) = (self.head, self.side);
                if let Some(media) = self.media.as_mut() {
                    media.format_track(head, side, sectors);
                }
                self.finish(sched, now);
            }
            _ => {}
        }
    }

    fn finish<K: Copy>(&mut self, sched: &mut Scheduler<K>, at: Clock) {
        sched.unset_alarm(self.alarm);
        self.phase = Phase::Idle;
        self.transfer = Transfer::None;
        self.buffer.clear();
        self.index = 0;
        self.idle_clk = at;
        self.set_intrq(sched, true);
    }

    // -----------------------------------------------------------------------
    // Media lookup
    // -----------------------------------------------------------------------

    fn ids(&self) -> Vec<SectorId> {
        self.media
            .as_ref()
            .map(|m| m.ids(self.head, self.side))
            .unwrap_or_default()
    }

    /// ID on the current track matching the track and sector registers.
    fn locate(&self) -> Option<SectorId> {
        self.ids()
            .into_iter()
            .find(|id| id.track == self.track && id.sector == self.sector)
    }

    fn track_on_media(&self) -> bool {
        self.ids().iter().any(|id| id.track == self.track)
    }

    // -----------------------------------------------------------------------
    // Rotation and motor
    // -----------------------------------------------------------------------

    /// Clock the controller went idle, if it is idle at `clk`.
    fn idle_since(&self, clk: Clock) -> Option<Clock> {
        match self.phase {
            Phase::Idle => Some(self.idle_clk),
            Phase::Command if !self.is_busy(clk) => Some(self.busy_clk + self.busy_len),
            _ => None,
        }
    }

    fn spin_up_done(&self, clk: Clock) -> bool {
        let Some(start) = self.motor_clk else {
            return false;
        };
        self.motor_on(clk)
            && (self.spin_up_skipped
                || clk.saturating_sub(start) >= SPIN_UP_REVS * self.config.revolution())
    }

    fn rotation(&self, clk: Clock) -> Option<Clock> {
        let start = self.motor_clk?;
        if !self.motor_on(clk) {
            return None;
        }
        Some(clk.saturating_sub(start) % self.config.revolution().max(1))
    }

    fn index_pulse(&self, clk: Clock) -> bool {
        self.has_media()
            && self
                .rotation(clk)
                .is_some_and(|pos| pos < self.config.ms(INDEX_PULSE_MS))
    }

    /// Which of `count` evenly spaced ID fields passes the head next.
    fn rotation_slot(&self, clk: Clock, count: usize) -> usize {
        let rev = u64::from(self.config.revolution().max(1));
        let pos = u64::from(self.rotation(clk).unwrap_or(0));
        ((pos * count as u64 / rev) as usize).min(count - 1)
    }

    fn set_intrq<K: Copy>(&mut self, sched: &mut Scheduler<K>, level: bool) {
        self.intrq = level;
        if let (Some(source), Some(kind)) = (self.source, self.config.interrupt) {
            sched.set_interrupt(source, kind, level);
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Controller state. Media contents are not part of the module.
    #[must_use]
    pub fn write_snapshot<K: Copy>(&self, sched: &Scheduler<K>, name: &str) -> Vec<u8> {
        let now = sched.clk();
        let mut w = ModuleWriter::new(name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_bytes(&[self.command, self.track, self.sector, self.data, self.errors.bits()]);
        w.write_u8(match self.kind {
            StatusKind::TypeOne => 0,
            StatusKind::TypeTwo => 1,
            StatusKind::Cleared => 2,
        });
        w.write_u8(match self.phase {
            Phase::Idle => 0,
            Phase::Command => 1,
            Phase::Transfer => 2,
        });
        w.write_u8(match self.transfer {
            Transfer::None => 0,
            Transfer::ReadSector => 1,
            Transfer::WriteSector => 2,
            Transfer::ReadAddress => 3,
            Transfer::ReadTrack => 4,
            Transfer::WriteTrack => 5,
        });
        w.write_bool(self.multiple);
        w.write_bool(self.deleted_mark);
        w.write_bool(self.verify);
        w.write_u8(self.head);
        w.write_u8(self.side);
        w.write_bool(self.step_dir == Direction::In);
        w.write_age(self.busy_clk, now);
        w.write_u32(self.busy_len);
        w.write_age(self.idle_clk, now);
        w.write_bool(self.motor_clk.is_some());
        w.write_age(self.motor_clk.unwrap_or(now), now);
        w.write_bool(self.spin_up_skipped);
        w.write_bool(self.intrq);
        w.write_u16(self.buffer.len() as u16);
        w.write_bytes(&self.buffer);
        w.write_u16(self.index as u16);
        w.write_alarm(sched.alarm_pending(self.alarm), now);
        w.finish()
    }

    pub fn read_snapshot<K: Copy>(&mut self, sched: &mut Scheduler<K>, name: &str, bytes: &[u8]) -> SnapshotResult<()> {
        let now = sched.clk();
        let mut r = ModuleReader::open(bytes, name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        let [command, track, sector, data, errors] = r.read_array::<5>()?;
        self.command = command;
        self.track = track;
        self.sector = sector;
        self.data = data;
        self.errors = Wd1770Status::from_bits_retain(errors);
        self.kind = match r.read_u8()? {
            0 => StatusKind::TypeOne,
            1 => StatusKind::TypeTwo,
            2 => StatusKind::Cleared,
            _ => return Err(r.bad_value("status kind")),
        };
        self.phase = match r.read_u8()? {
            0 => Phase::Idle,
            1 => Phase::Command,
            2 => Phase::Transfer,
            _ => return Err(r.bad_value("phase")),
        };
        self.transfer = match r.read_u8()? {
            0 => Transfer::None,
            1 => Transfer::ReadSector,
            2 => Transfer::WriteSector,
            3 => Transfer::ReadAddress,
            4 => Transfer::ReadTrack,
            5 => Transfer::WriteTrack,
            _ => return Err(r.bad_value("transfer")),
        };
        self.multiple = r.read_bool()?;
        self.deleted_mark = r.read_bool()?;
        self.verify = r.read_bool()?;
        self.head = r.read_u8()?;
        self.side = r.read_u8()? & 1;
        self.step_dir = if r.read_bool()? { Direction::In } else { Direction::Out };
        self.busy_clk = r.read_age(now)?;
        self.busy_len = r.read_u32()?;
        self.idle_clk = r.read_age(now)?;
        let motor = r.read_bool()?;
        let motor_clk = r.read_age(now)?;
        self.motor_clk = motor.then_some(motor_clk);
        self.spin_up_skipped = r.read_bool()?;
        let intrq = r.read_bool()?;
        let len = usize::from(r.read_u16()?);
        self.buffer = r.read_bytes(len)?.to_vec();
        self.index = usize::from(r.read_u16()?);
        if self.index > self.buffer.len() {
            return Err(r.bad_value("buffer index"));
        }
        match r.read_alarm(now)? {
            Some(at) => sched.set_alarm(self.alarm, at),
            None => sched.unset_alarm(self.alarm),
        }
        self.set_intrq(sched, intrq);
        Ok(())
    }
}

impl ClockRebase for Wd1770 {
    fn rebase(&mut self, sub: Clock) {
        self.busy_clk = rebase_clock(self.busy_clk, sub);
        self.idle_clk = rebase_clock(self.idle_clk, sub);
        self.motor_clk = self.motor_clk.map(|clk| rebase_clock(clk, sub));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::AlarmHandler;

    struct Board {
        fdc: Wd1770,
    }

    impl AlarmHandler<()> for Board {
        fn on_alarm(&mut self, sched: &mut Scheduler<()>, _key: (), offset: Clock) {
            self.fdc.alarm(sched, offset);
        }
    }

    impl ClockRebase for Board {
        fn rebase(&mut self, sub: Clock) {
            self.fdc.rebase(sub);
        }
    }

    fn board() -> (Scheduler<()>, Board) {
        let mut sched = Scheduler::new("drive");
        let mut fdc = Wd1770::new(&mut sched, "WD1770", Wd1770Config::default(), ());
        fdc.reset(&mut sched);
        (sched, Board { fdc })
    }

    fn board_with_disk() -> (Scheduler<()>, Board) {
        let (sched, mut b) = board();
        let mut disk = MemoryDisk::formatted_1581();
        if let Some(s) = disk.sector_mut(2, 0, 3) {
            s.data[0] = 0xC3;
            s.data[511] = 0x3C;
        }
        b.fdc.insert_media(Box::new(disk));
        (sched, b)
    }

    fn run_until_idle(sched: &mut Scheduler<()>, b: &mut Board) {
        while b.fdc.is_busy(sched.clk()) && b.fdc.phase == Phase::Command {
            sched.advance(100, b);
        }
    }

    fn seek(sched: &mut Scheduler<()>, b: &mut Board, track: u8) {
        b.fdc.store(sched, 3, track);
        b.fdc.store(sched, 0, 0x18);
        run_until_idle(sched, b);
    }

    fn window() -> Clock {
        Wd1770Config::default().busy_window
    }

    #[test]
    fn restore_busy_for_window() {
        let (mut sched, mut b) = board();
        b.fdc.store(&mut sched, 0, 0x03);
        assert!(b.fdc.status(sched.clk()).contains(Wd1770Status::BUSY));
        sched.advance(window() - 1, &mut b);
        assert!(b.fdc.status(sched.clk()).contains(Wd1770Status::BUSY));
        sched.advance(1, &mut b);
        let status = b.fdc.status(sched.clk());
        assert!(!status.contains(Wd1770Status::BUSY));
        assert!(status.contains(Wd1770Status::TRACK0_LOST_DATA));
        assert!(b.fdc.intrq());
        assert_eq!(b.fdc.track_register(), 0);
    }

    #[test]
    fn restore_steps_back_from_track() {
        let (mut sched, mut b) = board();
        seek(&mut sched, &mut b, 5);
        assert_eq!(b.fdc.head_position(), 5);

        b.fdc.store(&mut sched, 0, 0x03);
        let cfg = Wd1770Config::default();
        let expected = cfg.busy_window + 5 * cfg.ms(30);
        sched.advance(expected - 1, &mut b);
        assert!(b.fdc.is_busy(sched.clk()));
        sched.advance(1, &mut b);
        assert!(!b.fdc.is_busy(sched.clk()));
        assert_eq!(b.fdc.head_position(), 0);
    }

    #[test]
    fn seek_clamps_head_and_sets_track() {
        let (mut sched, mut b) = board();
        seek(&mut sched, &mut b, 200);
        assert_eq!(b.fdc.track_register(), 200);
        assert_eq!(b.fdc.head_position(), 83);
    }

    #[test]
    fn seek_verify_reports_missing_track() {
        let (mut sched, mut b) = board_with_disk();
        b.fdc.store(&mut sched, 3, 10);
        b.fdc.store(&mut sched, 0, 0x1C);
        run_until_idle(&mut sched, &mut b);
        assert!(!b.fdc.status(sched.clk()).contains(Wd1770Status::SEEK_ERROR_RNF));

        b.fdc.store(&mut sched, 3, 90);
        b.fdc.store(&mut sched, 0, 0x1C);
        run_until_idle(&mut sched, &mut b);
        assert!(b.fdc.status(sched.clk()).contains(Wd1770Status::SEEK_ERROR_RNF));
    }

    #[test]
    fn step_repeats_direction_and_updates_track() {
        let (mut sched, mut b) = board();
        b.fdc.store(&mut sched, 0, 0x58);
        run_until_idle(&mut sched, &mut b);
        b.fdc.store(&mut sched, 0, 0x38);
        run_until_idle(&mut sched, &mut b);
        assert_eq!(b.fdc.head_position(), 2);
        assert_eq!(b.fdc.track_register(), 2);

        b.fdc.store(&mut sched, 0, 0x68);
        run_until_idle(&mut sched, &mut b);
        assert_eq!(b.fdc.head_position(), 1);
        assert_eq!(b.fdc.track_register(), 2, "u = 0 leaves the track register");
    }

    #[test]
    fn force_interrupt_zeroes_status_mid_command() {
        let (mut sched, mut b) = board();
        seek(&mut sched, &mut b, 40);
        b.fdc.store(&mut sched, 0, 0x03);
        sched.advance(1000, &mut b);
        assert!(b.fdc.is_busy(sched.clk()));

        b.fdc.store(&mut sched, 0, 0xD8);
        assert_eq!(b.fdc.read(&mut sched, 0), 0);
        assert!(!b.fdc.is_busy(sched.clk()));
        assert!(sched.next_alarm().is_none());
    }

    #[test]
    fn force_interrupt_i3_raises_intrq() {
        let (mut sched, mut b) = board();
        b.fdc.store(&mut sched, 0, 0xD8);
        assert!(b.fdc.intrq());
        assert!(sched.interrupt_line(InterruptKind::Irq));
        b.fdc.store(&mut sched, 0, 0xD0);
        assert!(!b.fdc.intrq());
    }

    #[test]
    fn commands_ignored_while_busy() {
        let (mut sched, mut b) = board();
        b.fdc.store(&mut sched, 3, 30);
        b.fdc.store(&mut sched, 0, 0x10);
        b.fdc.store(&mut sched, 0, 0x03);
        assert_eq!(b.fdc.track_register(), 30);
    }

    #[test]
    fn read_sector_streams_data() {
        let (mut sched, mut b) = board_with_disk();
        seek(&mut sched, &mut b, 2);
        b.fdc.store(&mut sched, 2, 3);
        b.fdc.store(&mut sched, 0, 0x80);
        sched.advance(window(), &mut b);
        assert!(b.fdc.drq());

        let data: Vec<u8> = (0..512).map(|_| b.fdc.read(&mut sched, 3)).collect();
        assert_eq!(data[0], 0xC3);
        assert_eq!(data[511], 0x3C);
        assert!(!b.fdc.is_busy(sched.clk()));
        assert!(b.fdc.intrq());
        assert_eq!(b.fdc.status(sched.clk()) & Wd1770Status::SEEK_ERROR_RNF, Wd1770Status::empty());
    }

    #[test]
    fn read_sector_not_found() {
        let (mut sched, mut b) = board_with_disk();
        b.fdc.store(&mut sched, 2, 11);
        b.fdc.store(&mut sched, 0, 0x80);
        sched.advance(window(), &mut b);
        let status = b.fdc.status(sched.clk());
        assert!(status.contains(Wd1770Status::SEEK_ERROR_RNF));
        assert!(!status.contains(Wd1770Status::BUSY));
    }

    #[test]
    fn multi_sector_read_runs_to_end_of_track() {
        let (mut sched, mut b) = board_with_disk();
        b.fdc.store(&mut sched, 2, 9);
        b.fdc.store(&mut sched, 0, 0x90);
        sched.advance(window(), &mut b);
        for _ in 0..1024 {
            b.fdc.read(&mut sched, 3);
        }
        assert_eq!(b.fdc.sector_register(), 11);
        let status = b.fdc.status(sched.clk());
        assert!(status.contains(Wd1770Status::SEEK_ERROR_RNF));
        assert!(!status.contains(Wd1770Status::BUSY));
    }

    #[test]
    fn write_sector_reaches_media() {
        let (mut sched, mut b) = board_with_disk();
        b.fdc.store(&mut sched, 2, 1);
        b.fdc.store(&mut sched, 0, 0xA0);
        sched.advance(window(), &mut b);
        for i in 0..512u32 {
            b.fdc.store(&mut sched, 3, i as u8);
        }
        assert!(!b.fdc.is_busy(sched.clk()));

        b.fdc.store(&mut sched, 0, 0x80);
        sched.advance(window(), &mut b);
        assert_eq!(b.fdc.read(&mut sched, 3), 0);
        assert_eq!(b.fdc.read(&mut sched, 3), 1);
    }

    #[test]
    fn write_protect_aborts_write() {
        let (mut sched, mut b) = board();
        let mut disk = MemoryDisk::formatted_1581();
        disk.set_write_protect(true);
        b.fdc.insert_media(Box::new(disk));
        b.fdc.store(&mut sched, 0, 0xA0);
        sched.advance(window(), &mut b);
        let status = b.fdc.status(sched.clk());
        assert!(status.contains(Wd1770Status::WRITE_PROTECT));
        assert!(!status.contains(Wd1770Status::BUSY));
    }

    #[test]
    fn read_address_counts_down_id_field() {
        let (mut sched, mut b) = board_with_disk();
        seek(&mut sched, &mut b, 4);
        b.fdc.store(&mut sched, 0, 0xC0);
        sched.advance(window(), &mut b);
        let id: Vec<u8> = (0..6).map(|_| b.fdc.read(&mut sched, 3)).collect();
        assert_eq!(&id[..2], &[4, 0]);
        assert_eq!(id[3], 2);
        let crc = SectorId { track: 4, side: 0, sector: id[2], size_code: 2 }.crc();
        assert_eq!(u16::from_be_bytes([id[4], id[5]]), crc);
        assert_eq!(b.fdc.sector_register(), 4, "ID track lands in the sector register");
        assert!(!b.fdc.is_busy(sched.clk()));
    }

    #[test]
    fn write_track_formats_media() {
        let (mut sched, mut b) = board_with_disk();
        b.fdc.store(&mut sched, 0, 0xF0);
        sched.advance(window(), &mut b);
        let mut stream = vec![0x4E; 60];
        stream.extend_from_slice(&[0xF5, 0xF5, 0xF5, 0xFE, 0, 0, 7, 2, 0xF7]);
        stream.extend_from_slice(&[0xF5, 0xF5, 0xF5, 0xFB]);
        stream.extend(std::iter::repeat_n(0x77, 512));
        stream.push(0xF7);
        stream.resize(track::TRACK_BYTES, 0x4E);
        for byte in stream {
            b.fdc.store(&mut sched, 3, byte);
        }
        assert!(!b.fdc.is_busy(sched.clk()));

        b.fdc.store(&mut sched, 2, 7);
        b.fdc.store(&mut sched, 0, 0x80);
        sched.advance(window(), &mut b);
        assert_eq!(b.fdc.read(&mut sched, 3), 0x77);
    }

    #[test]
    fn read_track_returns_full_image() {
        let (mut sched, mut b) = board_with_disk();
        b.fdc.store(&mut sched, 0, 0xE0);
        sched.advance(window(), &mut b);
        let mut count = 0;
        while b.fdc.drq() {
            b.fdc.read(&mut sched, 3);
            count += 1;
        }
        assert_eq!(count, track::TRACK_BYTES);
        assert!(b.fdc.intrq());
    }

    #[test]
    fn motor_spin_up_and_timeout() {
        let (mut sched, mut b) = board();
        let rev = Wd1770Config::default().revolution();
        b.fdc.store(&mut sched, 0, 0x00);
        let status = b.fdc.status(sched.clk());
        assert!(status.contains(Wd1770Status::MOTOR_ON));
        assert!(!status.contains(Wd1770Status::SPIN_UP_RECORD_TYPE));

        sched.advance(6 * rev, &mut b);
        assert!(b.fdc.status(sched.clk()).contains(Wd1770Status::SPIN_UP_RECORD_TYPE));

        // Idle since busy_window; the motor stops nine revolutions later.
        sched.advance(3 * rev + window() - 1, &mut b);
        assert!(b.fdc.motor_on(sched.clk()));
        sched.advance(1, &mut b);
        assert!(!b.fdc.motor_on(sched.clk()));
    }

    #[test]
    fn h_flag_skips_spin_up() {
        let (mut sched, mut b) = board();
        b.fdc.store(&mut sched, 0, 0x08);
        assert!(b.fdc.status(sched.clk()).contains(Wd1770Status::SPIN_UP_RECORD_TYPE));
    }

    #[test]
    fn status_read_clears_intrq() {
        let (mut sched, mut b) = board();
        b.fdc.store(&mut sched, 0, 0x00);
        sched.advance(window(), &mut b);
        assert!(sched.interrupt_line(InterruptKind::Irq));
        b.fdc.read(&mut sched, 0);
        assert!(!sched.interrupt_line(InterruptKind::Irq));
    }

    #[test]
    fn unconnected_intrq_leaves_cpu_lines_alone() {
        let mut sched = Scheduler::new("drive");
        let mut fdc = Wd1770::new(&mut sched, "WD1770", Wd1770Config::drive_1581(), ());
        fdc.reset(&mut sched);
        let mut b = Board { fdc };
        b.fdc.store(&mut sched, 0, 0x03);
        sched.advance(window(), &mut b);
        assert!(b.fdc.intrq());
        assert!(!sched.interrupt_line(InterruptKind::Irq));
        assert!(!sched.interrupt_line(InterruptKind::Nmi));
    }

    #[test]
    fn snapshot_resumes_command() {
        let (mut sched, mut b) = board();
        seek(&mut sched, &mut b, 3);
        b.fdc.store(&mut sched, 0, 0x03);
        sched.advance(500, &mut b);
        let saved = b.fdc.write_snapshot(&sched, "WD1770");

        let (mut sched2, mut b2) = board();
        sched2.advance(12_345, &mut b2);
        b2.fdc.read_snapshot(&mut sched2, "WD1770", &saved).expect("restore");
        let remaining = sched.next_alarm().expect("pending") - sched.clk();
        assert_eq!(sched2.next_alarm().expect("pending") - sched2.clk(), remaining);
        assert_eq!(b2.fdc.status(sched2.clk()), b.fdc.status(sched.clk()));
    }
}
