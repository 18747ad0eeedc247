//! MOS 6532 RAM-I/O-Timer (RIOT).
//!
//! 128 bytes of RAM, two 8-bit ports and an 8-bit interval timer with a
//! selectable prescaler. The chip is selected as RAM or I/O by its RS pin;
//! in I/O space the low address bits pick the function:
//!
//! | A4 | A3 | A2 | A1 | A0 | Read            | Write                        |
//! |----|----|----|----|----|-----------------|------------------------------|
//! | -  | -  | 0  | 0  | 0  | Port A          | Port A data                  |
//! | -  | -  | 0  | 0  | 1  | DDR A           | DDR A                        |
//! | -  | -  | 0  | 1  | 0  | Port B          | Port B data                  |
//! | -  | -  | 0  | 1  | 1  | DDR B           | DDR B                        |
//! | 1  | E  | 1  | P  | P  | -               | Timer, prescale PP, IRQ E    |
//! | 0  | -  | 1  | I  | R  | -               | PA7 edge: R rising, I enable |
//! | -  | E  | 1  | -  | 0  | Timer, IRQ E    | -                            |
//! | -  | -  | 1  | -  | 1  | Interrupt flags | -                            |
//!
//! Prescale `PP`: 00 = 1, 01 = 8, 10 = 64, 11 = 1024 cycles per count.
//! Interrupt flags: bit 7 timer, bit 6 PA7 edge. Reading them clears the
//! PA7 flag; reading or writing the timer clears the timer flag.

use emu_core::{
    AlarmId, Clock, ClockRebase, InterruptKind, InterruptSource, ModuleReader, ModuleWriter,
    Scheduler, SnapshotResult,
};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

/// Prescale shift for each `PP` value.
const PRESCALE_SHIFT: [u8; 4] = [0, 3, 6, 10];

pub const RAM_SIZE: usize = 128;

/// Port hookup of one RIOT instance.
pub trait RiotPorts {
    fn store_pa(&mut self, _value: u8) {}
    fn store_pb(&mut self, _value: u8) {}
    fn read_pa(&mut self) -> u8 {
        0xFF
    }
    fn read_pb(&mut self) -> u8 {
        0xFF
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPorts;

impl RiotPorts for NoPorts {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiotConfig {
    pub interrupt: InterruptKind,
}

impl Default for RiotConfig {
    fn default() -> Self {
        Self {
            interrupt: InterruptKind::Irq,
        }
    }
}

/// MOS 6532 RIOT.
#[derive(Debug, Clone)]
pub struct Riot6532 {
    name: &'static str,
    config: RiotConfig,
    source: InterruptSource,
    alarm: AlarmId,

    ram: [u8; RAM_SIZE],

    ora: u8,
    orb: u8,
    ddra: u8,
    ddrb: u8,

    /// Value written to the timer.
    timer_start: u8,
    /// Clock of the timer write.
    timer_clk: Clock,
    /// Log2 of the prescale period.
    prescale: u8,
    /// Clock of the first underflow; from there the timer counts every cycle.
    underflow_clk: Option<Clock>,
    timer_irq_enabled: bool,
    timer_flag: bool,

    /// PA7 edge detector: true = rising edge.
    pa7_rising: bool,
    pa7_irq_enabled: bool,
    pa7_flag: bool,
    /// Last seen PA7 level.
    pa7_level: bool,

    irq: bool,
}

impl Riot6532 {
    pub fn new<K: Copy>(sched: &mut Scheduler<K>, name: &'static str, config: RiotConfig, key: K) -> Self {
        let alarm = sched.register_alarm("RIOT timer", key);
        let source = sched.register_interrupt(name);
        Self {
            name,
            config,
            source,
            alarm,
            ram: [0; RAM_SIZE],
            ora: 0,
            orb: 0,
            ddra: 0,
            ddrb: 0,
            timer_start: 0,
            timer_clk: 0,
            prescale: 0,
            underflow_clk: None,
            timer_irq_enabled: false,
            timer_flag: false,
            pa7_rising: false,
            pa7_irq_enabled: false,
            pa7_flag: false,
            pa7_level: true,
            irq: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Reset clears the I/O registers and interrupt state. RAM and the
    /// timer count survive; the timer interrupt is disabled.
    pub fn reset<K: Copy, P: RiotPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P) {
        self.ora = 0;
        self.orb = 0;
        self.ddra = 0;
        self.ddrb = 0;
        self.timer_irq_enabled = false;
        self.timer_flag = false;
        self.pa7_rising = false;
        self.pa7_irq_enabled = false;
        self.pa7_flag = false;
        self.update_irq(sched);
        ports.store_pa(self.port_a_out());
        ports.store_pb(self.port_b_out());
    }

    // ------------------------------------------------------------------
    // RAM
    // ------------------------------------------------------------------

    #[must_use]
    pub fn ram_read(&self, addr: u8) -> u8 {
        self.ram[usize::from(addr) & (RAM_SIZE - 1)]
    }

    pub fn ram_write(&mut self, addr: u8, value: u8) {
        self.ram[usize::from(addr) & (RAM_SIZE - 1)] = value;
    }

    // ------------------------------------------------------------------
    // I/O registers
    // ------------------------------------------------------------------

    pub fn store<K: Copy, P: RiotPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        addr: u8,
        value: u8,
    ) {
        if addr & 0x04 == 0 {
            match addr & 0x03 {
                0 => {
                    self.ora = value;
                    self.port_a_changed(sched, ports);
                }
                1 => {
                    self.ddra = value;
                    self.port_a_changed(sched, ports);
                }
                2 => {
                    self.orb = value;
                    ports.store_pb(self.port_b_out());
                }
                _ => {
                    self.ddrb = value;
                    ports.store_pb(self.port_b_out());
                }
            }
        } else if addr & 0x10 != 0 {
            self.write_timer(sched, value, addr & 0x03, addr & 0x08 != 0);
        } else {
            self.pa7_rising = addr & 0x01 != 0;
            self.pa7_irq_enabled = addr & 0x02 != 0;
            self.update_irq(sched);
        }
    }

    pub fn read<K: Copy, P: RiotPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P, addr: u8) -> u8 {
        if addr & 0x04 == 0 {
            return self.peek(sched, ports, addr);
        }
        if addr & 0x01 == 0 {
            let value = self.timer_value(sched.clk());
            self.timer_irq_enabled = addr & 0x08 != 0;
            self.timer_flag = false;
            self.update_irq(sched);
            value
        } else {
            let value = self.flags();
            self.pa7_flag = false;
            self.update_irq(sched);
            value
        }
    }

    /// Register read without side effects.
    pub fn peek<K: Copy, P: RiotPorts>(&self, sched: &Scheduler<K>, ports: &mut P, addr: u8) -> u8 {
        if addr & 0x04 == 0 {
            match addr & 0x03 {
                0 => (self.ora & self.ddra) | (ports.read_pa() & !self.ddra),
                1 => self.ddra,
                2 => (self.orb & self.ddrb) | (ports.read_pb() & !self.ddrb),
                _ => self.ddrb,
            }
        } else if addr & 0x01 == 0 {
            self.timer_value(sched.clk())
        } else {
            self.flags()
        }
    }

    /// Drive the PA7 input to `level`.
    pub fn set_flag_input<K: Copy>(&mut self, sched: &mut Scheduler<K>, level: bool) {
        if self.ddra & 0x80 != 0 {
            return;
        }
        self.pa7_edge(sched, level);
    }

    /// Handle the timer alarm.
    pub fn alarm<K: Copy>(&mut self, sched: &mut Scheduler<K>, offset: Clock) {
        let at = sched.clk() - offset;
        if self.underflow_clk.is_none() {
            self.underflow_clk = Some(at);
        }
        self.timer_flag = true;
        sched.set_alarm(self.alarm, at + 256);
        self.update_irq(sched);
    }

    #[must_use]
    pub fn irq_asserted(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn port_a_out(&self) -> u8 {
        self.ora | !self.ddra
    }

    #[must_use]
    pub fn port_b_out(&self) -> u8 {
        self.orb | !self.ddrb
    }

    /// Timer value at `clk`.
    #[must_use]
    pub fn timer_value(&self, clk: Clock) -> u8 {
        if let Some(underflow) = self.underflow_clk {
            return 0xFFu8.wrapping_sub(clk.wrapping_sub(underflow) as u8);
        }
        let elapsed = clk.wrapping_sub(self.timer_clk);
        if elapsed == 0 {
            return self.timer_start;
        }
        let decrements = 1 + ((elapsed - 1) >> self.prescale);
        let start = Clock::from(self.timer_start);
        if decrements <= start {
            (start - decrements) as u8
        } else {
            let underflow = self.first_underflow();
            0xFFu8.wrapping_sub(clk.wrapping_sub(underflow) as u8)
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn first_underflow(&self) -> Clock {
        self.timer_clk
            .wrapping_add(1)
            .wrapping_add(Clock::from(self.timer_start) << self.prescale)
    }

    fn write_timer<K: Copy>(&mut self, sched: &mut Scheduler<K>, value: u8, prescale: u8, irq_enabled: bool) {
        self.timer_start = value;
        self.timer_clk = sched.clk();
        self.prescale = PRESCALE_SHIFT[usize::from(prescale & 0x03)];
        self.underflow_clk = None;
        self.timer_irq_enabled = irq_enabled;
        self.timer_flag = false;
        sched.set_alarm(self.alarm, self.first_underflow());
        self.update_irq(sched);
    }

    fn flags(&self) -> u8 {
        (if self.timer_flag { 0x80 } else { 0 }) | (if self.pa7_flag { 0x40 } else { 0 })
    }

    fn port_a_changed<K: Copy, P: RiotPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P) {
        let out = self.port_a_out();
        ports.store_pa(out);
        if self.ddra & 0x80 != 0 {
            self.pa7_edge(sched, out & 0x80 != 0);
        }
    }

    fn pa7_edge<K: Copy>(&mut self, sched: &mut Scheduler<K>, level: bool) {
        let edge = if self.pa7_rising {
            !self.pa7_level && level
        } else {
            self.pa7_level && !level
        };
        self.pa7_level = level;
        if edge {
            self.pa7_flag = true;
            self.update_irq(sched);
        }
    }

    fn update_irq<K: Copy>(&mut self, sched: &mut Scheduler<K>) {
        let irq = (self.timer_flag && self.timer_irq_enabled) || (self.pa7_flag && self.pa7_irq_enabled);
        self.irq = irq;
        sched.set_interrupt(self.source, self.config.interrupt, irq);
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    #[must_use]
    pub fn write_snapshot<K: Copy>(&self, sched: &Scheduler<K>, name: &str) -> Vec<u8> {
        let now = sched.clk();
        let mut w = ModuleWriter::new(name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_bytes(&self.ram);
        for reg in [self.ora, self.orb, self.ddra, self.ddrb] {
            w.write_u8(reg);
        }
        w.write_u8(self.timer_start);
        w.write_u32(now.wrapping_sub(self.timer_clk));
        w.write_u8(self.prescale);
        w.write_bool(self.underflow_clk.is_some());
        w.write_u32(self.underflow_clk.map_or(0, |u| now.wrapping_sub(u)));
        w.write_alarm(sched.alarm_pending(self.alarm), now);
        for flag in [
            self.timer_irq_enabled,
            self.timer_flag,
            self.pa7_rising,
            self.pa7_irq_enabled,
            self.pa7_flag,
            self.pa7_level,
        ] {
            w.write_bool(flag);
        }
        w.finish()
    }

    pub fn read_snapshot<K: Copy>(&mut self, sched: &mut Scheduler<K>, name: &str, bytes: &[u8]) -> SnapshotResult<()> {
        let now = sched.clk();
        let mut r = ModuleReader::open(bytes, name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        self.ram = r.read_array()?;
        [self.ora, self.orb, self.ddra, self.ddrb] = r.read_array()?;
        self.timer_start = r.read_u8()?;
        self.timer_clk = now.wrapping_sub(r.read_u32()?);
        self.prescale = r.read_u8()?;
        if !PRESCALE_SHIFT.contains(&self.prescale) {
            return Err(r.bad_value("prescale"));
        }
        let underflowed = r.read_bool()?;
        let age = r.read_u32()?;
        self.underflow_clk = underflowed.then_some(now.wrapping_sub(age));
        match r.read_alarm(now)? {
            Some(at) => sched.set_alarm(self.alarm, at),
            None => sched.unset_alarm(self.alarm),
        }
        self.timer_irq_enabled = r.read_bool()?;
        self.timer_flag = r.read_bool()?;
        self.pa7_rising = r.read_bool()?;
        self.pa7_irq_enabled = r.read_bool()?;
        self.pa7_flag = r.read_bool()?;
        self.pa7_level = r.read_bool()?;
        self.update_irq(sched);
        Ok(())
    }
}

impl ClockRebase for Riot6532 {
    fn rebase(&mut self, sub: Clock) {
        // Only differences of these clocks are observed.
        self.timer_clk = self.timer_clk.wrapping_sub(sub);
        self.underflow_clk = self.underflow_clk.map(|u| u.wrapping_sub(sub));
    }
}
