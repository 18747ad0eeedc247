//! WD1770 command decoding.
//!
//! The command is fully decoded when it is written; the upper nibble picks
//! the command and the lower bits carry its flags.
//!
//! | Bits      | Command          | Type |
//! |-----------|------------------|------|
//! | 0000 hVrr | Restore          | I    |
//! | 0001 hVrr | Seek             | I    |
//! | 001u hVrr | Step             | I    |
//! | 010u hVrr | Step in          | I    |
//! | 011u hVrr | Step out         | I    |
//! | 100m hE00 | Read sector      | II   |
//! | 101m hEPa | Write sector     | II   |
//! | 1100 hE00 | Read address     | III  |
//! | 1101 IIII | Force interrupt  | IV   |
//! | 1110 hE00 | Read track       | III  |
//! | 1111 hEP0 | Write track      | III  |

/// Flags shared by the stepping commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepFlags {
    /// h = 0: spin the motor up first.
    pub spin_up: bool,
    /// V: read an ID field after stepping.
    pub verify: bool,
    /// r1r0 step rate index.
    pub rate: u8,
}

impl StepFlags {
    const fn decode(cmd: u8) -> Self {
        Self {
            spin_up: cmd & 0x08 == 0,
            verify: cmd & 0x04 != 0,
            rate: cmd & 0x03,
        }
    }
}

/// Flags shared by the data transfer commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFlags {
    pub spin_up: bool,
    /// E: add the head settle delay.
    pub settle: bool,
}

impl TransferFlags {
    const fn decode(cmd: u8) -> Self {
        Self {
            spin_up: cmd & 0x08 == 0,
            settle: cmd & 0x04 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restore(StepFlags),
    Seek(StepFlags),
    /// Step in the last direction, `update` moves the track register too.
    Step { flags: StepFlags, update: bool },
    StepDir { flags: StepFlags, update: bool, dir: Direction },
    ReadSector { flags: TransferFlags, multiple: bool },
    WriteSector { flags: TransferFlags, multiple: bool, deleted: bool },
    ReadAddress(TransferFlags),
    /// I0-I3 interrupt conditions.
    ForceInterrupt(u8),
    ReadTrack(TransferFlags),
    WriteTrack(TransferFlags),
}

impl Command {
    #[must_use]
    pub const fn decode(cmd: u8) -> Self {
        let update = cmd & 0x10 != 0;
        let multiple = cmd & 0x10 != 0;
        match cmd >> 4 {
            0x0 => Self::Restore(StepFlags::decode(cmd)),
            0x1 => Self::Seek(StepFlags::decode(cmd)),
            0x2 | 0x3 => Self::Step { flags: StepFlags::decode(cmd), update },
            0x4 | 0x5 => Self::StepDir { flags: StepFlags::decode(cmd), update, dir: Direction::In },
            0x6 | 0x7 => Self::StepDir { flags: StepFlags::decode(cmd), update, dir: Direction::Out },
            0x8 | 0x9 => Self::ReadSector { flags: TransferFlags::decode(cmd), multiple },
            0xA | 0xB => Self::WriteSector {
                flags: TransferFlags::decode(cmd),
                multiple,
                deleted: cmd & 0x01 != 0,
            },
            0xC => Self::ReadAddress(TransferFlags::decode(cmd)),
            // Force interrupt is $Dx; $18 is a Seek with h set.
            0xD => Self::ForceInterrupt(cmd & 0x0F),
            0xE => Self::ReadTrack(TransferFlags::decode(cmd)),
            _ => Self::WriteTrack(TransferFlags::decode(cmd)),
        }
    }

    /// Type I commands report head status in the status register.
    #[must_use]
    pub const fn is_type_one(&self) -> bool {
        matches!(
            self,
            Self::Restore(_) | Self::Seek(_) | Self::Step { .. } | Self::StepDir { .. }
        )
    }

    /// Whether the command asks for motor spin-up before it runs.
    #[must_use]
    pub const fn spin_up(&self) -> bool {
        match self {
            Self::Restore(f) | Self::Seek(f) => f.spin_up,
            Self::Step { flags, .. } | Self::StepDir { flags, .. } => flags.spin_up,
            Self::ReadSector { flags, .. } | Self::WriteSector { flags, .. } => flags.spin_up,
            Self::ReadAddress(f) | Self::ReadTrack(f) | Self::WriteTrack(f) => f.spin_up,
            Self::ForceInterrupt(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_flags() {
        assert_eq!(
            Command::decode(0x03),
            Command::Restore(StepFlags { spin_up: true, verify: false, rate: 3 })
        );
        assert_eq!(
            Command::decode(0x0C),
            Command::Restore(StepFlags { spin_up: false, verify: true, rate: 0 })
        );
    }

    #[test]
    fn step_update_bit() {
        let Command::StepDir { update, dir, .. } = Command::decode(0x58) else {
            panic!("0x58 is step in");
        };
        assert!(update);
        assert_eq!(dir, Direction::In);
        assert!(matches!(Command::decode(0x20), Command::Step { update: false, .. }));
    }

    #[test]
    fn sixteen_nibbles_decode() {
        assert!(matches!(Command::decode(0x18), Command::Seek(_)));
        assert!(matches!(Command::decode(0x90), Command::ReadSector { multiple: true, .. }));
        assert!(matches!(Command::decode(0xA1), Command::WriteSector { deleted: true, multiple: false, .. }));
        assert!(matches!(Command::decode(0xC0), Command::ReadAddress(_)));
        assert_eq!(Command::decode(0xD8), Command::ForceInterrupt(0x08));
        assert!(matches!(Command::decode(0xE4), Command::ReadTrack(TransferFlags { settle: true, .. })));
        assert!(matches!(Command::decode(0xF0), Command::WriteTrack(_)));
    }

    #[test]
    fn type_one_classification() {
        assert!(Command::decode(0x00).is_type_one());
        assert!(Command::decode(0x7F).is_type_one());
        assert!(!Command::decode(0x80).is_type_one());
        assert!(!Command::decode(0xD0).is_type_one());
    }
}
