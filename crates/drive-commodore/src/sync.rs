//! Host clock to drive clock conversion.

use emu_core::Clock;

/// Converts host cycles into drive cycles at a fixed rate ratio.
///
/// The ratio is 16.16 fixed point. The fractional cycle left over from
/// each conversion is carried into the next, so converting in many small
/// steps yields the same total as one large step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveSync {
    ratio: u32,
    frac: u32,
}

impl DriveSync {
    #[must_use]
    pub const fn new(host_hz: u32, drive_hz: u32) -> Self {
        let host = if host_hz == 0 { 1 } else { host_hz as u64 };
        Self {
            ratio: (((drive_hz as u64) << 16) / host) as u32,
            frac: 0,
        }
    }

    /// PAL C64 host, 2 MHz drive.
    #[must_use]
    pub const fn pal_2mhz() -> Self {
        Self::new(985_248, 2_000_000)
    }

    /// PAL C64 host, 1 MHz drive.
    #[must_use]
    pub const fn pal_1mhz() -> Self {
        Self::new(985_248, 1_000_000)
    }

    /// Drive cycles per host cycle, 16.16.
    #[must_use]
    pub const fn ratio(&self) -> u32 {
        self.ratio
    }

    /// Fraction of a drive cycle owed from earlier conversions.
    #[must_use]
    pub const fn remainder(&self) -> u32 {
        self.frac
    }

    pub fn set_remainder(&mut self, frac: u32) {
        self.frac = frac & 0xFFFF;
    }

    /// Drive cycles that elapse during `host_cycles`.
    pub fn convert(&mut self, host_cycles: Clock) -> Clock {
        let total = u64::from(host_cycles) * u64::from(self.ratio) + u64::from(self.frac);
        self.frac = (total & 0xFFFF) as u32;
        (total >> 16) as Clock
    }

    pub fn reset(&mut self) {
        self.frac = 0;
    }
}

impl Default for DriveSync {
    fn default() -> Self {
        Self::pal_2mhz()
    }
}
