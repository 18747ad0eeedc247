//! Parallel cable between a host user port and a drive.
//!
//! Each side owns one output byte; the other side reads it unchanged. A
//! strobed write pulses the opposite side's handshake flag. Nothing here is
//! open-collector.

use emu_core::{ModuleReader, ModuleWriter, SnapshotResult};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableSide {
    Host,
    Drive,
}

impl CableSide {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Host => Self::Drive,
            Self::Drive => Self::Host,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParallelCable {
    host_out: u8,
    drive_out: u8,
}

impl Default for ParallelCable {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelCable {
    /// Both sides idle with all data lines high.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host_out: 0xFF,
            drive_out: 0xFF,
        }
    }

    /// Store `from`'s output byte. Returns the side whose flag pin must be
    /// pulsed when `strobe` is set.
    pub fn write(&mut self, from: CableSide, value: u8, strobe: bool) -> Option<CableSide> {
        match from {
            CableSide::Host => self.host_out = value,
            CableSide::Drive => self.drive_out = value,
        }
        strobe.then(|| from.other())
    }

    /// The byte `side` sees, which is what the other end last wrote.
    #[must_use]
    pub fn read(&self, side: CableSide) -> u8 {
        match side {
            CableSide::Host => self.drive_out,
            CableSide::Drive => self.host_out,
        }
    }

    #[must_use]
    pub fn write_snapshot(&self, name: &str) -> Vec<u8> {
        let mut w = ModuleWriter::new(name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_u8(self.host_out);
        w.write_u8(self.drive_out);
        w.finish()
    }

    pub fn read_snapshot(&mut self, name: &str, bytes: &[u8]) -> SnapshotResult<()> {
        let mut r = ModuleReader::open(bytes, name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        self.host_out = r.read_u8()?;
        self.drive_out = r.read_u8()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_side_reads_the_other() {
        let mut cable = ParallelCable::new();
        assert_eq!(cable.write(CableSide::Host, 0x42, false), None);
        assert_eq!(cable.read(CableSide::Drive), 0x42);
        assert_eq!(cable.read(CableSide::Host), 0xFF);
    }

    #[test]
    fn strobe_targets_opposite_flag() {
        let mut cable = ParallelCable::new();
        assert_eq!(cable.write(CableSide::Drive, 0x00, true), Some(CableSide::Host));
        assert_eq!(cable.write(CableSide::Host, 0x00, true), Some(CableSide::Drive));
    }

    #[test]
    fn outputs_are_not_combined() {
        let mut cable = ParallelCable::new();
        cable.write(CableSide::Host, 0x0F, false);
        cable.write(CableSide::Drive, 0xF0, false);
        assert_eq!(cable.read(CableSide::Drive), 0x0F);
        assert_eq!(cable.read(CableSide::Host), 0xF0);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut cable = ParallelCable::new();
        cable.write(CableSide::Host, 0x12, false);
        cable.write(CableSide::Drive, 0x34, false);
        let saved = cable.write_snapshot("PARCABLE");
        let mut restored = ParallelCable::new();
        restored.read_snapshot("PARCABLE", &saved).expect("restore");
        assert_eq!(restored.read(CableSide::Drive), 0x12);
        assert_eq!(restored.read(CableSide::Host), 0x34);
    }
}
