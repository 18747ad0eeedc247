//! Commodore IEC serial bus.
//!
//! Three open-collector lines: ATN, CLK, DATA. Every participant can pull
//! a line low; a line reads high only when nobody pulls it. The bus keeps
//! only what each participant last wrote to its port and derives the line
//! levels from that on every query.
//!
//! Host side (C64 CIA2 port A):
//!   Output: bit 3 ATN, bit 4 CLK, bit 5 DATA (1 = pull low)
//!   Input:  bit 6 CLK, bit 7 DATA (1 = line high)
//!
//! Drive side (1541 VIA1 port B, 1581 CIA port B) is described by a
//! [`DrivePortLayout`]. Drive inputs read 1 while the line is low. The
//! ATN acknowledge output pulls DATA low whenever it disagrees with ATN,
//! which is how a drive answers ATN without firmware involvement.
//!
//! A parallel "speeder" cable runs beside the bus as a plain pair of byte
//! registers; see [`ParallelCable`].

mod bus;
mod cable;

pub use bus::{DrivePortLayout, IecBus, IecListener, MAX_DRIVES};
pub use cable::{CableSide, ParallelCable};

use bitflags::bitflags;

bitflags! {
    /// Lines currently pulled low.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IecLines: u8 {
        const ATN = 0x01;
        const CLK = 0x02;
        const DATA = 0x04;
    }
}

/// Host port output bits.
pub const HOST_ATN_OUT: u8 = 0x08;
pub const HOST_CLK_OUT: u8 = 0x10;
pub const HOST_DATA_OUT: u8 = 0x20;
/// Host port input bits.
pub const HOST_CLK_IN: u8 = 0x40;
pub const HOST_DATA_IN: u8 = 0x80;
