//! Commodore job-queue floppy disk controller.
//!
//! Dual drives of the IEEE family split the work between a DOS processor
//! and a controller processor that share a block of RAM. The DOS posts
//! jobs there; the controller polls the queue, runs each job and writes a
//! completion code back over it.
//!
//! Shared buffer layout:
//!
//! | Offset          | Contents                                  |
//! |-----------------|-------------------------------------------|
//! | $03 + slot      | Job code (bit 7 = pending, bit 0 = drive) |
//! | $12 + 2 * drive | Master disk ID                            |
//! | $21 + 8 * slot  | Job header: track, sector                 |
//! | $100 * (slot+1) | Job data page                             |
//!
//! Job codes: $80 read, $90 write, $A0 verify, $B0 seek, $C0 bump,
//! $D0 jump, $E0 execute, $F0 format. Jump and execute run controller
//! code, which is not emulated; they complete with "no sync".

pub mod media;

pub use media::{JobMedia, SECTOR_SIZE, SectorImage, ZoneLayout};

use emu_core::{AlarmId, Clock, ClockRebase, ModuleReader, ModuleWriter, Scheduler, SnapshotResult};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

pub const JOB_SLOTS: usize = 15;
pub const JOB_CODE_BASE: usize = 0x03;
pub const DISK_ID_BASE: usize = 0x12;
pub const HEADER_BASE: usize = 0x21;
pub const HEADER_STRIDE: usize = 8;
/// Shared RAM needed for every slot's data page.
pub const BUFFER_SIZE: usize = 0x100 * (JOB_SLOTS + 1);

#[must_use]
pub const fn job_code_addr(slot: usize) -> usize {
    JOB_CODE_BASE + slot
}

#[must_use]
pub const fn header_addr(slot: usize) -> usize {
    HEADER_BASE + HEADER_STRIDE * slot
}

#[must_use]
pub const fn disk_id_addr(drive: usize) -> usize {
    DISK_ID_BASE + 2 * drive
}

#[must_use]
pub const fn data_page(slot: usize) -> usize {
    0x100 * (slot + 1)
}

/// Job operation, the high nibble of a job code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Read,
    Write,
    Verify,
    Seek,
    Bump,
    Jump,
    Execute,
    Format,
}

impl Job {
    #[must_use]
    pub const fn decode(code: u8) -> Option<Self> {
        Some(match code & 0xF0 {
            0x80 => Self::Read,
            0x90 => Self::Write,
            0xA0 => Self::Verify,
            0xB0 => Self::Seek,
            0xC0 => Self::Bump,
            0xD0 => Self::Jump,
            0xE0 => Self::Execute,
            0xF0 => Self::Format,
            _ => return None,
        })
    }
}

/// Completion codes written over the job code.
pub mod status {
    pub const OK: u8 = 0x01;
    pub const HEADER_NOT_FOUND: u8 = 0x02;
    pub const NO_SYNC: u8 = 0x03;
    pub const DATA_NOT_FOUND: u8 = 0x04;
    pub const VERIFY_ERROR: u8 = 0x07;
    pub const WRITE_PROTECTED: u8 = 0x08;
    pub const DISK_ID_MISMATCH: u8 = 0x0B;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcState {
    /// Not attached to a drive; no polling.
    Idle,
    /// First poll clears the job queue.
    Reset,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobFdcConfig {
    /// Cycles between queue polls.
    pub poll_interval: Clock,
    /// Mechanisms behind the controller, 1 or 2.
    pub drives: usize,
}

impl JobFdcConfig {
    /// 8050 dual drive on a 1 MHz domain, polled every 10 ms.
    #[must_use]
    pub const fn dual() -> Self {
        Self {
            poll_interval: 10_000,
            drives: 2,
        }
    }
}

impl Default for JobFdcConfig {
    fn default() -> Self {
        Self::dual()
    }
}

/// Job-queue controller for up to two mechanisms.
pub struct JobFdc {
    name: &'static str,
    config: JobFdcConfig,
    alarm: AlarmId,
    state: FdcState,
    /// Track under each head, 1-based.
    heads: [u8; 2],
    media: [Option<Box<dyn JobMedia>>; 2],
}

impl JobFdc {
    pub fn new<K: Copy>(sched: &mut Scheduler<K>, name: &'static str, config: JobFdcConfig, key: K) -> Self {
        let alarm = sched.register_alarm("FDC poll", key);
        Self {
            name,
            config: JobFdcConfig {
                drives: config.drives.clamp(1, 2),
                ..config
            },
            alarm,
            state: FdcState::Idle,
            heads: [1; 2],
            media: [None, None],
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn state(&self) -> FdcState {
        self.state
    }

    /// Start polling; the first poll clears the queue.
    pub fn attach<K: Copy>(&mut self, sched: &mut Scheduler<K>) {
        log::debug!("{}: attached", self.name);
        self.state = FdcState::Reset;
        let now = sched.clk();
        sched.set_alarm(self.alarm, now + self.config.poll_interval);
    }

    pub fn detach<K: Copy>(&mut self, sched: &mut Scheduler<K>) {
        log::debug!("{}: detached", self.name);
        self.state = FdcState::Idle;
        sched.unset_alarm(self.alarm);
    }

    pub fn reset<K: Copy>(&mut self, sched: &mut Scheduler<K>) {
        self.heads = [1; 2];
        if self.state != FdcState::Idle {
            self.attach(sched);
        }
    }

    pub fn insert(&mut self, drive: usize, media: Box<dyn JobMedia>) {
        if drive < self.config.drives {
            self.media[drive] = Some(media);
        }
    }

    pub fn eject(&mut self, drive: usize) -> Option<Box<dyn JobMedia>> {
        self.media.get_mut(drive)?.take()
    }

    #[must_use]
    pub fn media(&self, drive: usize) -> Option<&dyn JobMedia> {
        self.media.get(drive)?.as_deref()
    }

    #[must_use]
    pub fn head(&self, drive: usize) -> Option<u8> {
        self.heads.get(drive).copied()
    }

    /// Poll alarm: scan the queue in `buffer` and re-arm.
    pub fn alarm<K: Copy>(&mut self, sched: &mut Scheduler<K>, buffer: &mut [u8], offset: Clock) {
        let at = sched.clk() - offset;
        match self.state {
            FdcState::Idle => return,
            FdcState::Reset => {
                for slot in 0..JOB_SLOTS {
                    if let Some(code) = buffer.get_mut(job_code_addr(slot)) {
                        *code = 0;
                    }
                }
                self.state = FdcState::Run;
            }
            FdcState::Run => self.poll(buffer),
        }
        sched.set_alarm(self.alarm, at + self.config.poll_interval);
    }

    /// Run every pending job once, lowest slot first.
    pub fn poll(&mut self, buffer: &mut [u8]) {
        for slot in 0..JOB_SLOTS {
            let Some(&code) = buffer.get(job_code_addr(slot)) else {
                break;
            };
            if code & 0x80 == 0 {
                continue;
            }
            let result = self.execute(slot, code, buffer);
            log::debug!("{}: job ${code:02X} in slot {slot} -> ${result:02X}", self.name);
            buffer[job_code_addr(slot)] = result;
        }
    }

    fn execute(&mut self, slot: usize, code: u8, buffer: &mut [u8]) -> u8 {
        let drive = usize::from(code & 0x01);
        let Some(job) = Job::decode(code) else {
            return status::NO_SYNC;
        };
        if matches!(job, Job::Jump | Job::Execute) {
            log::warn!("{}: job ${code:02X} needs controller code; reporting no sync", self.name);
            return status::NO_SYNC;
        }
        if drive >= self.config.drives {
            return status::NO_SYNC;
        }
        let Some(media) = self.media[drive].as_deref_mut() else {
            return status::NO_SYNC;
        };

        let header = header_addr(slot);
        let (track, sector) = match buffer.get(header..header + 2) {
            Some(&[t, s]) => (t, s),
            _ => return status::HEADER_NOT_FOUND,
        };
        let id_at = disk_id_addr(drive);
        let page = data_page(slot);
        if buffer.len() < page + SECTOR_SIZE {
            return status::DATA_NOT_FOUND;
        }

        match job {
            Job::Bump => {
                self.heads[drive] = 1;
                status::OK
            }
            Job::Seek => {
                if media.sectors(track) == 0 {
                    return status::HEADER_NOT_FOUND;
                }
                self.heads[drive] = track;
                buffer[id_at..id_at + 2].copy_from_slice(&media.disk_id());
                status::OK
            }
            Job::Format => {
                if media.write_protected() {
                    return status::WRITE_PROTECTED;
                }
                let id = [buffer[id_at], buffer[id_at + 1]];
                media.format(id);
                self.heads[drive] = 1;
                status::OK
            }
            Job::Read | Job::Write | Job::Verify => {
                if sector >= media.sectors(track) {
                    return status::HEADER_NOT_FOUND;
                }
                self.heads[drive] = track;
                if buffer[id_at..id_at + 2] != media.disk_id() {
                    return status::DISK_ID_MISMATCH;
                }
                let data = &mut buffer[page..page + SECTOR_SIZE];
                match job {
                    Job::Read => match media.read(track, sector) {
                        Some(src) => {
                            data.copy_from_slice(src);
                            status::OK
                        }
                        None => status::DATA_NOT_FOUND,
                    },
                    Job::Write => {
                        if media.write_protected() {
                            status::WRITE_PROTECTED
                        } else if media.write(track, sector, data) {
                            status::OK
                        } else {
                            status::DATA_NOT_FOUND
                        }
                    }
                    _ => match media.read(track, sector) {
                        Some(src) if src == &data[..] => status::OK,
                        Some(_) => status::VERIFY_ERROR,
                        None => status::DATA_NOT_FOUND,
                    },
                }
            }
            Job::Jump | Job::Execute => status::NO_SYNC,
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn write_snapshot<K: Copy>(&self, sched: &Scheduler<K>, name: &str) -> Vec<u8> {
        let now = sched.clk();
        let mut w = ModuleWriter::new(name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_u8(match self.state {
            FdcState::Idle => 0,
            FdcState::Reset => 1,
            FdcState::Run => 2,
        });
        w.write_bytes(&self.heads);
        w.write_alarm(sched.alarm_pending(self.alarm), now);
        w.finish()
    }

    pub fn read_snapshot<K: Copy>(&mut self, sched: &mut Scheduler<K>, name: &str, bytes: &[u8]) -> SnapshotResult<()> {
        let now = sched.clk();
        let mut r = ModuleReader::open(bytes, name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        self.state = match r.read_u8()? {
            0 => FdcState::Idle,
            1 => FdcState::Reset,
            2 => FdcState::Run,
            _ => return Err(r.bad_value("state")),
        };
        self.heads = r.read_array::<2>()?;
        match r.read_alarm(now)? {
            Some(at) => sched.set_alarm(self.alarm, at),
            None => sched.unset_alarm(self.alarm),
        }
        Ok(())
    }
}

impl ClockRebase for JobFdc {
    fn rebase(&mut self, _sub: Clock) {}
}
