//! Time-of-day clock.
//!
//! Four BCD registers (tenths, seconds, minutes, hours with PM in bit 7)
//! advanced by the mains frequency. The chip divides mains ticks by 6
//! (60 Hz, CRA bit 7 clear) or 5 (50 Hz, CRA bit 7 set) to get tenths.
//!
//! Register access quirks:
//! - reading hours freezes the visible value until tenths is read;
//! - writing hours stops the clock until tenths is written;
//! - writing hour 12 to the clock flips the PM flag.

pub(crate) const TENTHS: usize = 0;
pub(crate) const HOURS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tod {
    pub(crate) time: [u8; 4],
    pub(crate) alarm: [u8; 4],
    pub(crate) latched: Option<[u8; 4]>,
    pub(crate) halted: bool,
    /// Mains ticks since the last tenth.
    pub(crate) divider: u8,
}

impl Tod {
    pub(crate) fn new() -> Self {
        Self {
            time: [0, 0, 0, 0x01],
            alarm: [0; 4],
            latched: None,
            halted: true,
            divider: 0,
        }
    }

    /// Register read. `reg` is 0..=3.
    pub(crate) fn read(&mut self, reg: usize) -> u8 {
        if reg == HOURS && self.latched.is_none() {
            self.latched = Some(self.time);
        }
        let value = self.visible()[reg];
        if reg == TENTHS {
            self.latched = None;
        }
        value
    }

    pub(crate) fn peek(&self, reg: usize) -> u8 {
        self.visible()[reg]
    }

    fn visible(&self) -> [u8; 4] {
        self.latched.unwrap_or(self.time)
    }

    /// Register write. Returns true if time and alarm now match.
    pub(crate) fn write(&mut self, reg: usize, value: u8, set_alarm: bool) -> bool {
        let value = match reg {
            TENTHS => value & 0x0F,
            HOURS => {
                let hours = value & 0x9F;
                if !set_alarm && hours & 0x1F == 0x12 {
                    hours ^ 0x80
                } else {
                    hours
                }
            }
            _ => value & 0x7F,
        };
        if set_alarm {
            self.alarm[reg] = value;
        } else {
            match reg {
                TENTHS if self.halted => {
                    self.halted = false;
                    self.divider = 0;
                }
                HOURS => self.halted = true,
                _ => {}
            }
            self.time[reg] = value;
        }
        self.matches()
    }

    /// One mains tick. Returns true if a tenth elapsed and the new time
    /// matches the alarm.
    pub(crate) fn mains_tick(&mut self, fifty_hz: bool) -> bool {
        if self.halted {
            return false;
        }
        let ticks_per_tenth = if fifty_hz { 5 } else { 6 };
        self.divider += 1;
        if self.divider < ticks_per_tenth {
            return false;
        }
        self.divider = 0;
        self.advance_tenth();
        self.matches()
    }

    pub(crate) fn matches(&self) -> bool {
        self.time == self.alarm
    }

    fn advance_tenth(&mut self) {
        let [tenths, seconds, minutes, hours] = self.time;
        let (tenths, carry) = step_digit(tenths, 9);
        self.time[0] = tenths;
        if !carry {
            return;
        }
        let (seconds, carry) = step_sexagesimal(seconds);
        self.time[1] = seconds;
        if !carry {
            return;
        }
        let (minutes, carry) = step_sexagesimal(minutes);
        self.time[2] = minutes;
        if carry {
            self.time[3] = step_hours(hours);
        }
    }
}

/// Increment a 4-bit BCD digit that wraps after `last`.
fn step_digit(digit: u8, last: u8) -> (u8, bool) {
    if digit & 0x0F == last {
        (0, true)
    } else {
        ((digit + 1) & 0x0F, false)
    }
}

/// Seconds or minutes: 00..=59, with the 4-bit/3-bit counters wrapping
/// independently on out-of-range values.
fn step_sexagesimal(value: u8) -> (u8, bool) {
    let (low, carry) = step_digit(value, 9);
    let mut high = (value >> 4) & 0x07;
    if !carry {
        return (low | (high << 4), false);
    }
    if high == 5 {
        return (0, true);
    }
    high = (high + 1) & 0x07;
    (high << 4, false)
}

/// Hours: 1..=12 with PM flipping on the 11 → 12 transition.
fn step_hours(hours: u8) -> u8 {
    let pm = hours & 0x80;
    match hours & 0x1F {
        0x11 => 0x12 | (pm ^ 0x80),
        0x12 => 0x01 | pm,
        0x09 => 0x10 | pm,
        h => (((h & 0x0F) + 1) & 0x0F) | (h & 0x10) | pm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(time: [u8; 4]) -> Tod {
        let mut tod = Tod::new();
        tod.time = time;
        tod.halted = false;
        tod
    }

    fn tenth(tod: &mut Tod) {
        for _ in 0..6 {
            tod.mains_tick(false);
        }
    }

    #[test]
    fn powers_up_halted_at_one_am() {
        let mut tod = Tod::new();
        assert!(tod.halted);
        tod.mains_tick(true);
        assert_eq!(tod.time, [0, 0, 0, 1]);
    }

    #[test]
    fn divider_follows_mains_frequency() {
        let mut tod = running([0, 0, 0, 1]);
        for _ in 0..4 {
            tod.mains_tick(true);
        }
        assert_eq!(tod.time[0], 0);
        tod.mains_tick(true);
        assert_eq!(tod.time[0], 1, "five ticks per tenth at 50 Hz");

        let mut tod = running([0, 0, 0, 1]);
        for _ in 0..5 {
            tod.mains_tick(false);
        }
        assert_eq!(tod.time[0], 0);
        tod.mains_tick(false);
        assert_eq!(tod.time[0], 1, "six ticks per tenth at 60 Hz");
    }

    #[test]
    fn carries_through_seconds_and_minutes() {
        let mut tod = running([9, 0x59, 0x59, 0x01]);
        tenth(&mut tod);
        assert_eq!(tod.time, [0, 0, 0, 0x02]);
    }

    #[test]
    fn eleven_fifty_nine_rolls_to_twelve_pm() {
        let mut tod = running([9, 0x59, 0x59, 0x11]);
        tenth(&mut tod);
        assert_eq!(tod.time[3], 0x92);
        tod.time = [9, 0x59, 0x59, 0x92];
        tenth(&mut tod);
        assert_eq!(tod.time[3], 0x81, "12 PM is followed by 1 PM");
    }

    #[test]
    fn hours_latch_until_tenths_read() {
        let mut tod = running([3, 0x10, 0x20, 0x05]);
        assert_eq!(tod.read(HOURS), 0x05);
        tod.time = [4, 0x11, 0x21, 0x06];
        assert_eq!(tod.read(2), 0x20);
        assert_eq!(tod.read(1), 0x10);
        assert_eq!(tod.read(TENTHS), 3);
        assert_eq!(tod.read(TENTHS), 4, "latch released");
    }

    #[test]
    fn writing_hours_halts_until_tenths() {
        let mut tod = running([0, 0, 0, 1]);
        tod.write(HOURS, 0x03, false);
        assert!(tod.halted);
        tenth(&mut tod);
        assert_eq!(tod.time[0], 0);
        tod.write(TENTHS, 0x05, false);
        assert!(!tod.halted);
    }

    #[test]
    fn writing_twelve_flips_pm() {
        let mut tod = Tod::new();
        tod.write(HOURS, 0x12, false);
        assert_eq!(tod.time[3], 0x92);
        tod.write(HOURS, 0x12, true);
        assert_eq!(tod.alarm[3], 0x12, "alarm writes are not flipped");
    }

    #[test]
    fn alarm_match_reported() {
        let mut tod = running([0, 0, 0, 1]);
        tod.alarm = [1, 0, 0, 1];
        for _ in 0..5 {
            assert!(!tod.mains_tick(false));
        }
        assert!(tod.mains_tick(false));
    }
}
