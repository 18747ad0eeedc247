//! MOS 6525 Tri-Port Interface (TPI).
//!
//! Three 8-bit ports. With CR bit 0 (MC) set, port C turns into an
//! interrupt controller with five edge-triggered inputs and two handshake
//! lines.
//!
//! | Reg | Name | MC = 0             | MC = 1                             |
//! |-----|------|--------------------|------------------------------------|
//! | $0  | PRA  | Port A             | Port A (CA handshake on read)      |
//! | $1  | PRB  | Port B             | Port B (CB handshake on write)     |
//! | $2  | PRC  | Port C             | I0-I4 latches, /IRQ, CA, CB        |
//! | $3  | DDRA | DDR A              | DDR A                              |
//! | $4  | DDRB | DDR B              | DDR B                              |
//! | $5  | DDRC | DDR C              | Interrupt mask                     |
//! | $6  | CR   | Control            | Control                            |
//! | $7  | AIR  | Active interrupt   | Active interrupt                   |
//!
//! CR: bit 0 MC, bit 1 IP (priority), bit 2 I3 edge (1 = rising), bit 3
//! I4 edge, bits 5-4 CA mode, bits 7-6 CB mode. CA/CB modes:
//! 00 handshake, 01 pulse, 10 low, 11 high.
//!
//! I0-I2 latch on falling edges. With IP set, I4 has the highest priority;
//! reading AIR takes the highest pending interrupt into service and writing
//! AIR ends it, returning to the one it preempted.

use emu_core::{
    AlarmId, Clock, ClockRebase, InterruptKind, InterruptSource, ModuleReader, ModuleWriter,
    Scheduler, SnapshotResult,
};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

const CR_MC: u8 = 0x01;
const CR_IP: u8 = 0x02;
const CR_IE3: u8 = 0x04;
const CR_IE4: u8 = 0x08;

const INPUT_MASK: u8 = 0x1F;

pub trait TpiPorts {
    fn store_pa(&mut self, _value: u8) {}
    fn store_pb(&mut self, _value: u8) {}
    fn store_pc(&mut self, _value: u8) {}
    fn read_pa(&mut self) -> u8 {
        0xFF
    }
    fn read_pb(&mut self) -> u8 {
        0xFF
    }
    fn read_pc(&mut self) -> u8 {
        0xFF
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPorts;

impl TpiPorts for NoPorts {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpiAlarm {
    CaPulse,
    CbPulse,
}

/// Interrupt inputs on PC0-PC4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpiInput {
    I0,
    I1,
    I2,
    I3,
    I4,
}

impl TpiInput {
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TpiConfig {
    pub interrupt: InterruptKind,
}

impl Default for TpiConfig {
    fn default() -> Self {
        Self {
            interrupt: InterruptKind::Irq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineMode {
    Handshake,
    Pulse,
    Low,
    High,
}

impl LineMode {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Handshake,
            1 => Self::Pulse,
            2 => Self::Low,
            _ => Self::High,
        }
    }
}

/// MOS 6525 TPI.
#[derive(Debug, Clone)]
pub struct Tpi6525 {
    name: &'static str,
    config: TpiConfig,
    source: InterruptSource,
    ca_alarm: AlarmId,
    cb_alarm: AlarmId,

    pra: u8,
    prb: u8,
    prc: u8,
    ddra: u8,
    ddrb: u8,
    ddrc: u8,
    cr: u8,

    /// Interrupt latches I0-I4.
    latches: u8,
    /// Interrupt currently in service (priority mode).
    air: u8,
    /// Preempted service levels.
    stack: Vec<u8>,
    /// Last levels seen on I0-I4.
    inputs: u8,

    ca: bool,
    cb: bool,
    irq: bool,
}

impl Tpi6525 {
    pub fn new<K: Copy>(
        sched: &mut Scheduler<K>,
        name: &'static str,
        config: TpiConfig,
        key: impl Fn(TpiAlarm) -> K,
    ) -> Self {
        let ca_alarm = sched.register_alarm("TPI CA", key(TpiAlarm::CaPulse));
        let cb_alarm = sched.register_alarm("TPI CB", key(TpiAlarm::CbPulse));
        let source = sched.register_interrupt(name);
        Self {
            name,
            config,
            source,
            ca_alarm,
            cb_alarm,
            pra: 0,
            prb: 0,
            prc: 0,
            ddra: 0,
            ddrb: 0,
            ddrc: 0,
            cr: 0,
            latches: 0,
            air: 0,
            stack: Vec::with_capacity(5),
            inputs: INPUT_MASK,
            ca: true,
            cb: true,
            irq: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn reset<K: Copy, P: TpiPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P) {
        self.pra = 0;
        self.prb = 0;
        self.prc = 0;
        self.ddra = 0;
        self.ddrb = 0;
        self.ddrc = 0;
        self.cr = 0;
        self.latches = 0;
        self.air = 0;
        self.stack.clear();
        self.ca = true;
        self.cb = true;
        sched.unset_alarm(self.ca_alarm);
        sched.unset_alarm(self.cb_alarm);
        self.update_irq(sched);
        ports.store_pa(self.pra | !self.ddra);
        ports.store_pb(self.prb | !self.ddrb);
        ports.store_pc(self.port_c_out());
    }

    pub fn store<K: Copy, P: TpiPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        addr: u8,
        value: u8,
    ) {
        match addr & 0x07 {
            0 => {
                self.pra = value;
                ports.store_pa(self.pra | !self.ddra);
            }
            1 => {
                self.prb = value;
                ports.store_pb(self.prb | !self.ddrb);
                if self.interrupt_mode() {
                    self.strobe_cb(sched, ports);
                }
            }
            2 => {
                self.prc = value;
                ports.store_pc(self.port_c_out());
            }
            3 => {
                self.ddra = value;
                ports.store_pa(self.pra | !self.ddra);
            }
            4 => {
                self.ddrb = value;
                ports.store_pb(self.prb | !self.ddrb);
            }
            5 => {
                self.ddrc = value;
                self.update_irq(sched);
                ports.store_pc(self.port_c_out());
            }
            6 => {
                self.cr = value;
                match LineMode::from_bits(value >> 4) {
                    LineMode::Low => self.ca = false,
                    LineMode::High => self.ca = true,
                    _ => {}
                }
                match LineMode::from_bits(value >> 6) {
                    LineMode::Low => self.cb = false,
                    LineMode::High => self.cb = true,
                    _ => {}
                }
                if value & CR_IP == 0 {
                    self.air = 0;
                    self.stack.clear();
                }
                self.update_irq(sched);
                ports.store_pc(self.port_c_out());
            }
            _ => {
                if self.cr & CR_IP != 0 {
                    self.air = self.stack.pop().unwrap_or(0);
                } else {
                    self.air = 0;
                }
                self.update_irq(sched);
                ports.store_pc(self.port_c_out());
            }
        }
    }

    pub fn read<K: Copy, P: TpiPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P, addr: u8) -> u8 {
        match addr & 0x07 {
            0 => {
                let value = self.peek(sched, ports, 0);
                if self.interrupt_mode() {
                    self.strobe_ca(sched, ports);
                }
                value
            }
            7 => {
                let pending = self.pending();
                if self.cr & CR_IP != 0 {
                    let top = highest(pending);
                    if top > self.air {
                        self.stack.push(self.air);
                        self.air = top;
                        self.latches &= !top;
                    }
                } else {
                    self.air = pending;
                    self.latches &= !pending;
                }
                let value = self.air;
                self.update_irq(sched);
                ports.store_pc(self.port_c_out());
                value
            }
            reg => self.peek(sched, ports, reg),
        }
    }

    /// Register read without side effects.
    pub fn peek<K: Copy, P: TpiPorts>(&self, _sched: &Scheduler<K>, ports: &mut P, addr: u8) -> u8 {
        match addr & 0x07 {
            0 => (self.pra & self.ddra) | (ports.read_pa() & !self.ddra),
            1 => (self.prb & self.ddrb) | (ports.read_pb() & !self.ddrb),
            2 => {
                if self.interrupt_mode() {
                    self.latches
                        | if self.irq { 0 } else { 0x20 }
                        | if self.ca { 0x40 } else { 0 }
                        | if self.cb { 0x80 } else { 0 }
                } else {
                    (self.prc & self.ddrc) | (ports.read_pc() & !self.ddrc)
                }
            }
            3 => self.ddra,
            4 => self.ddrb,
            5 => self.ddrc,
            6 => self.cr,
            _ => self.air,
        }
    }

    /// Drive one of the interrupt inputs to `level`.
    pub fn set_flag_input<K: Copy, P: TpiPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        input: TpiInput,
        level: bool,
    ) {
        let bit = input.bit();
        let was = self.inputs & bit != 0;
        if level {
            self.inputs |= bit;
        } else {
            self.inputs &= !bit;
        }
        let rising = match input {
            TpiInput::I3 => self.cr & CR_IE3 != 0,
            TpiInput::I4 => self.cr & CR_IE4 != 0,
            _ => false,
        };
        let active = if rising { !was && level } else { was && !level };
        if !active || !self.interrupt_mode() {
            return;
        }
        self.latches |= bit;
        match input {
            TpiInput::I3 if LineMode::from_bits(self.cr >> 4) == LineMode::Handshake => self.ca = true,
            TpiInput::I4 if LineMode::from_bits(self.cr >> 6) == LineMode::Handshake => self.cb = true,
            _ => {}
        }
        self.update_irq(sched);
        ports.store_pc(self.port_c_out());
    }

    /// Handle a CA/CB pulse alarm: the line returns high.
    pub fn alarm<K: Copy, P: TpiPorts>(
        &mut self,
        _sched: &mut Scheduler<K>,
        ports: &mut P,
        which: TpiAlarm,
        _offset: Clock,
    ) {
        match which {
            TpiAlarm::CaPulse => self.ca = true,
            TpiAlarm::CbPulse => self.cb = true,
        }
        ports.store_pc(self.port_c_out());
    }

    #[must_use]
    pub fn irq_asserted(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn ca(&self) -> bool {
        self.ca
    }

    #[must_use]
    pub fn cb(&self) -> bool {
        self.cb
    }

    fn interrupt_mode(&self) -> bool {
        self.cr & CR_MC != 0
    }

    fn pending(&self) -> u8 {
        self.latches & self.ddrc & INPUT_MASK
    }

    fn port_c_out(&self) -> u8 {
        if self.interrupt_mode() {
            INPUT_MASK
                | if self.irq { 0 } else { 0x20 }
                | if self.ca { 0x40 } else { 0 }
                | if self.cb { 0x80 } else { 0 }
        } else {
            self.prc | !self.ddrc
        }
    }

    fn strobe_ca<K: Copy, P: TpiPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P) {
        match LineMode::from_bits(self.cr >> 4) {
            LineMode::Handshake => self.ca = false,
            LineMode::Pulse => {
                self.ca = false;
                let now = sched.clk();
                sched.set_alarm(self.ca_alarm, now + 1);
            }
            _ => return,
        }
        ports.store_pc(self.port_c_out());
    }

    fn strobe_cb<K: Copy, P: TpiPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P) {
        match LineMode::from_bits(self.cr >> 6) {
            LineMode::Handshake => self.cb = false,
            LineMode::Pulse => {
                self.cb = false;
                let now = sched.clk();
                sched.set_alarm(self.cb_alarm, now + 1);
            }
            _ => return,
        }
        ports.store_pc(self.port_c_out());
    }

    fn update_irq<K: Copy>(&mut self, sched: &mut Scheduler<K>) {
        let pending = self.pending();
        let irq = if !self.interrupt_mode() {
            false
        } else if self.cr & CR_IP != 0 {
            highest(pending) > self.air
        } else {
            pending != 0
        };
        if irq != self.irq {
            log::trace!("{}: IRQ {}", self.name, if irq { "asserted" } else { "released" });
        }
        self.irq = irq;
        sched.set_interrupt(self.source, self.config.interrupt, irq);
    }

    #[must_use]
    pub fn write_snapshot<K: Copy>(&self, sched: &Scheduler<K>, name: &str) -> Vec<u8> {
        let now = sched.clk();
        let mut w = ModuleWriter::new(name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_bytes(&[self.pra, self.prb, self.prc, self.ddra, self.ddrb, self.ddrc, self.cr]);
        w.write_u8(self.latches);
        w.write_u8(self.air);
        w.write_u8(self.stack.len() as u8);
        w.write_bytes(&self.stack);
        w.write_u8(self.inputs);
        w.write_bool(self.ca);
        w.write_bool(self.cb);
        w.write_alarm(sched.alarm_pending(self.ca_alarm), now);
        w.write_alarm(sched.alarm_pending(self.cb_alarm), now);
        w.finish()
    }

    pub fn read_snapshot<K: Copy>(&mut self, sched: &mut Scheduler<K>, name: &str, bytes: &[u8]) -> SnapshotResult<()> {
        let now = sched.clk();
        let mut r = ModuleReader::open(bytes, name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        [self.pra, self.prb, self.prc, self.ddra, self.ddrb, self.ddrc, self.cr] = r.read_array::<7>()?;
        self.latches = r.read_u8()? & INPUT_MASK;
        self.air = r.read_u8()?;
        let depth = usize::from(r.read_u8()?);
        if depth > 5 {
            return Err(r.bad_value("priority stack depth"));
        }
        self.stack = r.read_bytes(depth)?.to_vec();
        self.inputs = r.read_u8()? & INPUT_MASK;
        self.ca = r.read_bool()?;
        self.cb = r.read_bool()?;
        for alarm in [self.ca_alarm, self.cb_alarm] {
            match r.read_alarm(now)? {
                Some(at) => sched.set_alarm(alarm, at),
                None => sched.unset_alarm(alarm),
            }
        }
        self.update_irq(sched);
        Ok(())
    }
}

impl ClockRebase for Tpi6525 {
    fn rebase(&mut self, _sub: Clock) {}
}

/// Highest set bit of `bits`, or 0.
fn highest(bits: u8) -> u8 {
    if bits == 0 { 0 } else { 0x80 >> bits.leading_zeros() }
}
