//! Commodore disk drive contexts.
//!
//! A drive is a computer of its own: a CPU, RAM, ROM and peripheral chips
//! on a clock that is not the host's. Each context here owns its clock
//! domain and every chip instance in it, and exposes the drive CPU's
//! memory map. The CPU itself is driven from outside through
//! `read`/`store` and `run`.
//!
//! - [`Drive1581`]: serial drive with a 6526 CIA and a WD1770.
//! - [`DualDrive`]: IEEE dual drive with two 6532 RIOTs and a job-queue
//!   controller sharing 4 KiB of RAM with the DOS processor.
//! - [`SerialSystem`]: the IEC bus, the parallel cable and up to four
//!   serial drives, kept in step with the host clock.

mod drive1581;
mod dual;
mod sync;
mod system;

pub use drive1581::{Drive1581, Drive1581Config, DriveAlarm};
pub use dual::{DualAlarm, DualDrive, DualDriveConfig};
pub use sync::DriveSync;
pub use system::SerialSystem;

use bitflags::bitflags;
use emu_core::SnapshotError;
use thiserror::Error;

/// First device number on the bus.
pub const FIRST_DEVICE: u8 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriveError {
    #[error("device {0} is outside the bus range 8-11")]
    DeviceOutOfRange(u8),
    #[error("device {0} is already attached")]
    DeviceInUse(u8),
    #[error("ROM image is {found} bytes, expected {expected}")]
    RomSize { expected: usize, found: usize },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

bitflags! {
    /// Front panel lamps that are lit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriveLeds: u8 {
        const POWER = 0x01;
        const ACTIVITY = 0x02;
        const DRIVE0 = 0x04;
        const DRIVE1 = 0x08;
        const ERROR = 0x10;
    }
}

/// ROM contents, or open bus when none is loaded.
#[derive(Debug, Clone, Default)]
struct Rom {
    bytes: Vec<u8>,
}

impl Rom {
    fn load(&mut self, image: &[u8], expected: usize) -> Result<(), DriveError> {
        if image.len() != expected {
            return Err(DriveError::RomSize {
                expected,
                found: image.len(),
            });
        }
        self.bytes = image.to_vec();
        Ok(())
    }

    fn read(&self, offset: usize, addr: u16) -> u8 {
        self.bytes.get(offset).copied().unwrap_or(open_bus(addr))
    }
}

/// Value floating on an undriven data bus.
const fn open_bus(addr: u16) -> u8 {
    (addr >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_size_checked() {
        let mut rom = Rom::default();
        assert_eq!(
            rom.load(&[0; 100], 0x4000),
            Err(DriveError::RomSize {
                expected: 0x4000,
                found: 100
            })
        );
        assert_eq!(rom.read(5, 0xC005), 0xC0);
        rom.load(&[0xEA; 0x4000], 0x4000).expect("ROM fits");
        assert_eq!(rom.read(5, 0xC005), 0xEA);
    }
}
