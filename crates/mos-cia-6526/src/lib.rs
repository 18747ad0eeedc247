//! MOS 6526 Complex Interface Adapter (CIA).
//!
//! Two 8-bit ports, two 16-bit interval timers, a BCD time-of-day clock, a
//! serial shift register and an interrupt control register.
//!
//! | Reg | Read                         | Write                              |
//! |-----|------------------------------|------------------------------------|
//! | $0  | Port A                       | Port A data                        |
//! | $1  | Port B (PB6/PB7 timer out)   | Port B data                        |
//! | $2  | DDR A                        | DDR A (1 = output)                 |
//! | $3  | DDR B                        | DDR B                              |
//! | $4  | Timer A low                  | Timer A latch low                  |
//! | $5  | Timer A high                 | Timer A latch high                 |
//! | $6  | Timer B low                  | Timer B latch low                  |
//! | $7  | Timer B high                 | Timer B latch high                 |
//! | $8  | TOD tenths (releases latch)  | TOD/alarm tenths (restarts clock)  |
//! | $9  | TOD seconds                  | TOD/alarm seconds                  |
//! | $A  | TOD minutes                  | TOD/alarm minutes                  |
//! | $B  | TOD hours (latches)          | TOD/alarm hours (stops clock)      |
//! | $C  | Serial data                  | Serial data                        |
//! | $D  | ICR flags, cleared on read   | ICR mask (bit 7 = set/clear)       |
//! | $E  | CRA                          | CRA                                |
//! | $F  | CRB                          | CRB                                |
//!
//! The chip does no per-cycle work. Timers counting the system clock and
//! the TOD divider are alarms in the owning clock domain; the owner routes
//! those alarms back through [`Cia6526::alarm`].

mod timer;
mod tod;

use bitflags::bitflags;
use emu_core::{
    AlarmId, Clock, ClockRebase, InterruptKind, InterruptSource, ModuleReader, ModuleWriter, Scheduler,
    SnapshotResult,
};

use timer::{CR_LOAD, CR_ONESHOT, CR_PBON, CR_START, CR_TOGGLE, Timer};
pub use timer::TimerInput;
use tod::Tod;

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

bitflags! {
    /// Interrupt sources in the ICR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Icr: u8 {
        const TIMER_A = 0x01;
        const TIMER_B = 0x02;
        const TOD_ALARM = 0x04;
        const SERIAL = 0x08;
        const FLAG = 0x10;
        /// Read only: the chip is asserting its interrupt output.
        const IR = 0x80;
    }
}

/// Port hookup of one CIA instance.
///
/// The store hooks receive the externally visible output (`data | !ddr`)
/// every time the data or direction register is written. The read hooks
/// return the level the outside world puts on the pins.
pub trait CiaPorts {
    fn store_pa(&mut self, _value: u8) {}
    fn store_pb(&mut self, _value: u8) {}
    fn read_pa(&mut self) -> u8 {
        0xFF
    }
    fn read_pb(&mut self) -> u8 {
        0xFF
    }
    /// One bit shifted out on SP in output mode, MSB first.
    fn serial_out(&mut self, _bit: bool) {}
    /// SDR written in output mode.
    fn store_sdr(&mut self, _value: u8) {}
}

/// Ports with nothing attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPorts;

impl CiaPorts for NoPorts {}

/// Alarms owned by one CIA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CiaAlarm {
    TimerA,
    TimerB,
    Tod,
}

/// External input pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiaPin {
    /// Falling edge sets ICR bit 4.
    Flag,
    /// Rising edge counts timers and clocks the shift register in input mode.
    Cnt,
    /// Serial data input.
    Sp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CiaConfig {
    /// Which merged line the chip's interrupt output drives.
    pub interrupt: InterruptKind,
    /// Clock rate of the owning domain.
    pub clock_hz: u32,
    /// Mains frequency feeding the TOD input.
    pub power_freq: u32,
}

impl CiaConfig {
    /// C64 CIA1 on a PAL machine.
    pub const fn pal_irq() -> Self {
        Self {
            interrupt: InterruptKind::Irq,
            clock_hz: 985_248,
            power_freq: 50,
        }
    }

    /// C64 CIA2 on a PAL machine.
    pub const fn pal_nmi() -> Self {
        Self {
            interrupt: InterruptKind::Nmi,
            ..Self::pal_irq()
        }
    }

    pub const fn ntsc_irq() -> Self {
        Self {
            interrupt: InterruptKind::Irq,
            clock_hz: 1_022_727,
            power_freq: 60,
        }
    }

    /// 2 MHz drive CIA.
    pub const fn drive() -> Self {
        Self {
            interrupt: InterruptKind::Irq,
            clock_hz: 2_000_000,
            power_freq: 50,
        }
    }

    /// Mains period in 24.8 fixed point cycles.
    const fn mains_period(&self) -> u64 {
        let freq = if self.power_freq == 0 { 50 } else { self.power_freq };
        let period = ((self.clock_hz as u64) << 8) / freq as u64;
        if period < 0x100 { 0x100 } else { period }
    }
}

impl Default for CiaConfig {
    fn default() -> Self {
        Self::pal_irq()
    }
}

/// MOS 6526 CIA.
#[derive(Debug, Clone)]
pub struct Cia6526 {
    name: &'static str,
    config: CiaConfig,
    source: InterruptSource,

    pra: u8,
    prb: u8,
    ddra: u8,
    ddrb: u8,
    cra: u8,
    crb: u8,

    ta: Timer,
    tb: Timer,

    tod: Tod,
    tod_alarm: AlarmId,
    /// Fractional cycles carried between mains ticks.
    tod_frac: u32,

    sdr: u8,
    shift: u8,
    shift_bits: u8,
    sdr_queued: bool,

    icr_flags: u8,
    icr_mask: u8,
    irq: bool,

    cnt: bool,
    sp: bool,
    flag: bool,
}

impl Cia6526 {
    /// Create a CIA in the domain `sched`, registering its alarms and
    /// interrupt source. `key` maps each of the chip's alarms to the
    /// domain's alarm key type.
    pub fn new<K: Copy>(
        sched: &mut Scheduler<K>,
        name: &'static str,
        config: CiaConfig,
        key: impl Fn(CiaAlarm) -> K,
    ) -> Self {
        let ta = sched.register_alarm("CIA timer A", key(CiaAlarm::TimerA));
        let tb = sched.register_alarm("CIA timer B", key(CiaAlarm::TimerB));
        let tod_alarm = sched.register_alarm("CIA TOD", key(CiaAlarm::Tod));
        let source = sched.register_interrupt(name);
        let mut cia = Self {
            name,
            config,
            source,
            pra: 0,
            prb: 0,
            ddra: 0,
            ddrb: 0,
            cra: 0,
            crb: 0,
            ta: Timer::new(ta),
            tb: Timer::new(tb),
            tod: Tod::new(),
            tod_alarm,
            tod_frac: 0,
            sdr: 0,
            shift: 0,
            shift_bits: 0,
            sdr_queued: false,
            icr_flags: 0,
            icr_mask: 0,
            irq: false,
            cnt: true,
            sp: true,
            flag: true,
        };
        let now = sched.clk();
        cia.arm_tod(sched, now);
        cia
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn config(&self) -> CiaConfig {
        self.config
    }

    /// Power-on state. The TOD keeps counting from its reset value.
    pub fn reset<K: Copy, P: CiaPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P) {
        self.pra = 0;
        self.prb = 0;
        self.ddra = 0;
        self.ddrb = 0;
        self.cra = 0;
        self.crb = 0;
        self.ta.reset(sched);
        self.tb.reset(sched);
        self.tod = Tod::new();
        self.tod_frac = 0;
        let now = sched.clk();
        self.arm_tod(sched, now);
        self.sdr = 0;
        self.shift = 0;
        self.shift_bits = 0;
        self.sdr_queued = false;
        self.icr_flags = 0;
        self.icr_mask = 0;
        self.set_irq(sched, false);
        ports.store_pa(self.port_a_out());
        ports.store_pb(self.port_b_out(sched.clk()));
    }

    // ------------------------------------------------------------------
    // Register access
    // ------------------------------------------------------------------

    pub fn store<K: Copy, P: CiaPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        addr: u8,
        value: u8,
    ) {
        let clk = sched.clk();
        match addr & 0x0F {
            0x00 => {
                self.pra = value;
                ports.store_pa(self.port_a_out());
            }
            0x01 => {
                self.prb = value;
                ports.store_pb(self.port_b_out(clk));
            }
            0x02 => {
                self.ddra = value;
                ports.store_pa(self.port_a_out());
            }
            0x03 => {
                self.ddrb = value;
                ports.store_pb(self.port_b_out(clk));
            }
            0x04 => self.ta.latch = (self.ta.latch & 0xFF00) | u16::from(value),
            0x05 => {
                self.ta.latch = (self.ta.latch & 0x00FF) | (u16::from(value) << 8);
                if self.cra & CR_START == 0 {
                    self.ta.load();
                }
            }
            0x06 => self.tb.latch = (self.tb.latch & 0xFF00) | u16::from(value),
            0x07 => {
                self.tb.latch = (self.tb.latch & 0x00FF) | (u16::from(value) << 8);
                if self.crb & CR_START == 0 {
                    self.tb.load();
                }
            }
            reg @ 0x08..=0x0B => {
                let set_alarm = self.crb & 0x80 != 0;
                if self.tod.write(usize::from(reg - 0x08), value, set_alarm) {
                    self.raise(sched, Icr::TOD_ALARM);
                }
            }
            0x0C => {
                self.sdr = value;
                if self.cra & 0x40 != 0 {
                    ports.store_sdr(value);
                    if self.shift_bits == 0 {
                        self.shift = value;
                        self.shift_bits = 8;
                    } else {
                        self.sdr_queued = true;
                    }
                }
            }
            0x0D => {
                let bits = value & 0x1F;
                if value & 0x80 != 0 {
                    self.icr_mask |= bits;
                } else {
                    self.icr_mask &= !bits;
                }
                if self.icr_flags & self.icr_mask != 0 {
                    self.set_irq(sched, true);
                }
            }
            0x0E => self.write_cra(sched, ports, value),
            _ => self.write_crb(sched, ports, value),
        }
    }

    pub fn read<K: Copy, P: CiaPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        addr: u8,
    ) -> u8 {
        match addr & 0x0F {
            reg @ 0x08..=0x0B => self.tod.read(usize::from(reg - 0x08)),
            0x0D => {
                let value = self.icr_flags | if self.irq { Icr::IR.bits() } else { 0 };
                self.icr_flags = 0;
                self.set_irq(sched, false);
                value
            }
            reg => self.peek(sched, ports, reg),
        }
    }

    /// Register read without side effects.
    pub fn peek<K: Copy, P: CiaPorts>(&self, sched: &Scheduler<K>, ports: &mut P, addr: u8) -> u8 {
        let clk = sched.clk();
        match addr & 0x0F {
            0x00 => (self.pra & self.ddra) | (ports.read_pa() & !self.ddra),
            0x01 => {
                let value = (self.prb & self.ddrb) | (ports.read_pb() & !self.ddrb);
                self.with_timer_outputs(value, clk)
            }
            0x02 => self.ddra,
            0x03 => self.ddrb,
            0x04 => self.ta.value(clk) as u8,
            0x05 => (self.ta.value(clk) >> 8) as u8,
            0x06 => self.tb.value(clk) as u8,
            0x07 => (self.tb.value(clk) >> 8) as u8,
            reg @ 0x08..=0x0B => self.tod.peek(usize::from(reg - 0x08)),
            0x0C => self.sdr,
            0x0D => self.icr_flags | if self.irq { Icr::IR.bits() } else { 0 },
            0x0E => self.cra,
            _ => self.crb,
        }
    }

    // ------------------------------------------------------------------
    // Alarms and pins
    // ------------------------------------------------------------------

    /// Handle one of this chip's alarms. `offset` is how far the domain
    /// clock has run past the trigger.
    pub fn alarm<K: Copy, P: CiaPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        which: CiaAlarm,
        offset: Clock,
    ) {
        let at = sched.clk() - offset;
        match which {
            CiaAlarm::TimerA => self.underflow_a(sched, ports, at),
            CiaAlarm::TimerB => self.underflow_b(sched, ports, at),
            CiaAlarm::Tod => {
                self.arm_tod(sched, at);
                if self.tod.mains_tick(self.cra & 0x80 != 0) {
                    self.raise(sched, Icr::TOD_ALARM);
                }
            }
        }
    }

    /// Drive an external input pin to `level` (true = high).
    pub fn set_flag_input<K: Copy, P: CiaPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        pin: CiaPin,
        level: bool,
    ) {
        match pin {
            CiaPin::Flag => {
                if self.flag && !level {
                    self.raise(sched, Icr::FLAG);
                }
                self.flag = level;
            }
            CiaPin::Sp => self.sp = level,
            CiaPin::Cnt => {
                let rising = !self.cnt && level;
                self.cnt = level;
                if rising {
                    self.cnt_edge(sched, ports);
                }
            }
        }
    }

    /// Shift one bit into SDR (input mode only).
    pub fn receive_bit<K: Copy>(&mut self, sched: &mut Scheduler<K>, bit: bool) {
        if self.cra & 0x40 != 0 {
            return;
        }
        self.shift = (self.shift << 1) | u8::from(bit);
        self.shift_bits += 1;
        if self.shift_bits == 8 {
            self.sdr = self.shift;
            self.shift_bits = 0;
            self.raise(sched, Icr::SERIAL);
        }
    }

    /// Load a whole byte into SDR as if eight bits had arrived.
    pub fn receive_byte<K: Copy>(&mut self, sched: &mut Scheduler<K>, byte: u8) {
        if self.cra & 0x40 != 0 {
            return;
        }
        self.sdr = byte;
        self.shift_bits = 0;
        self.raise(sched, Icr::SERIAL);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn irq_asserted(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn icr_flags(&self) -> Icr {
        Icr::from_bits_truncate(self.icr_flags)
    }

    #[must_use]
    pub fn icr_mask(&self) -> Icr {
        Icr::from_bits_truncate(self.icr_mask)
    }

    #[must_use]
    pub fn timer_a(&self, clk: Clock) -> u16 {
        self.ta.value(clk)
    }

    #[must_use]
    pub fn timer_b(&self, clk: Clock) -> u16 {
        self.tb.value(clk)
    }

    /// Externally visible port A output.
    #[must_use]
    pub fn port_a_out(&self) -> u8 {
        self.pra | !self.ddra
    }

    /// Externally visible port B output, including timer outputs.
    #[must_use]
    pub fn port_b_out(&self, clk: Clock) -> u8 {
        self.with_timer_outputs(self.prb | !self.ddrb, clk)
    }

    #[must_use]
    pub fn tod_running(&self) -> bool {
        !self.tod.halted
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn write_cra<K: Copy, P: CiaPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P, value: u8) {
        let clk = sched.clk();
        let old = self.cra;
        self.ta.freeze(sched, clk);
        if value & CR_LOAD != 0 {
            self.ta.load();
        }
        if value & CR_START != 0 && old & CR_START == 0 {
            self.ta.toggle = true;
        }
        if (value ^ old) & 0x40 != 0 {
            self.shift_bits = 0;
            self.sdr_queued = false;
        }
        self.cra = value & !CR_LOAD;
        if self.cra & CR_START != 0 && TimerInput::timer_a(self.cra) == TimerInput::Phi2 {
            self.ta.run_from(sched, clk);
        }
        if (value ^ old) & (CR_PBON | CR_TOGGLE | CR_START) != 0 && (value | old) & CR_PBON != 0 {
            ports.store_pb(self.port_b_out(clk));
        }
    }

    fn write_crb<K: Copy, P: CiaPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P, value: u8) {
        let clk = sched.clk();
        let old = self.crb;
        self.tb.freeze(sched, clk);
        if value & CR_LOAD != 0 {
            self.tb.load();
        }
        if value & CR_START != 0 && old & CR_START == 0 {
            self.tb.toggle = true;
        }
        self.crb = value & !CR_LOAD;
        if self.crb & CR_START != 0 && TimerInput::timer_b(self.crb) == TimerInput::Phi2 {
            self.tb.run_from(sched, clk);
        }
        if (value ^ old) & (CR_PBON | CR_TOGGLE | CR_START) != 0 && (value | old) & CR_PBON != 0 {
            ports.store_pb(self.port_b_out(clk));
        }
    }

    fn underflow_a<K: Copy, P: CiaPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P, at: Clock) {
        self.timer_underflow(sched, ports, at, true);

        if self.cra & 0x40 != 0 && self.shift_bits > 0 {
            ports.serial_out(self.shift & 0x80 != 0);
            self.shift <<= 1;
            self.shift_bits -= 1;
            if self.shift_bits == 0 {
                self.raise(sched, Icr::SERIAL);
                if self.sdr_queued {
                    self.sdr_queued = false;
                    self.shift = self.sdr;
                    self.shift_bits = 8;
                }
            }
        }

        if self.crb & CR_START != 0 {
            let cascade = match TimerInput::timer_b(self.crb) {
                TimerInput::TimerA => true,
                TimerInput::TimerACnt => self.cnt,
                _ => false,
            };
            if cascade && self.tb.count() {
                self.underflow_b(sched, ports, at);
            }
        }
    }

    fn underflow_b<K: Copy, P: CiaPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P, at: Clock) {
        self.timer_underflow(sched, ports, at, false);
    }

    fn timer_underflow<K: Copy, P: CiaPorts>(
        &mut self,
        sched: &mut Scheduler<K>,
        ports: &mut P,
        at: Clock,
        is_a: bool,
    ) {
        let (timer, cr, flag) = if is_a {
            (&mut self.ta, &mut self.cra, Icr::TIMER_A)
        } else {
            (&mut self.tb, &mut self.crb, Icr::TIMER_B)
        };
        let phi2 = timer.is_counting();
        timer.load();
        timer.pulse_at = Some(at);
        if *cr & CR_TOGGLE != 0 {
            timer.toggle = !timer.toggle;
        }
        if *cr & CR_ONESHOT != 0 {
            *cr &= !CR_START;
            timer.freeze(sched, at);
            timer.load();
        } else if phi2 {
            timer.run_from(sched, at);
        }
        let pb_out = *cr & CR_PBON != 0;
        self.raise(sched, flag);
        if pb_out {
            ports.store_pb(self.port_b_out(sched.clk()));
        }
    }

    fn cnt_edge<K: Copy, P: CiaPorts>(&mut self, sched: &mut Scheduler<K>, ports: &mut P) {
        let at = sched.clk();
        if self.cra & CR_START != 0 && TimerInput::timer_a(self.cra) == TimerInput::Cnt && self.ta.count() {
            self.underflow_a(sched, ports, at);
        }
        if self.crb & CR_START != 0 && TimerInput::timer_b(self.crb) == TimerInput::Cnt && self.tb.count() {
            self.underflow_b(sched, ports, at);
        }
        if self.cra & 0x40 == 0 {
            self.receive_bit(sched, self.sp);
        }
    }

    fn with_timer_outputs(&self, mut value: u8, clk: Clock) -> u8 {
        for (timer, cr, bit) in [(&self.ta, self.cra, 0x40u8), (&self.tb, self.crb, 0x80u8)] {
            if cr & CR_PBON == 0 {
                continue;
            }
            let high = if cr & CR_TOGGLE != 0 {
                timer.toggle
            } else {
                timer.pulse_at == Some(clk)
            };
            value = if high { value | bit } else { value & !bit };
        }
        value
    }

    fn raise<K: Copy>(&mut self, sched: &mut Scheduler<K>, bits: Icr) {
        self.icr_flags |= bits.bits();
        if self.icr_flags & self.icr_mask != 0 {
            self.set_irq(sched, true);
        }
    }

    fn set_irq<K: Copy>(&mut self, sched: &mut Scheduler<K>, asserted: bool) {
        if self.irq != asserted {
            log::trace!("{}: IRQ {}", self.name, if asserted { "asserted" } else { "released" });
        }
        self.irq = asserted;
        sched.set_interrupt(self.source, self.config.interrupt, asserted);
    }

    fn arm_tod<K: Copy>(&mut self, sched: &mut Scheduler<K>, from: Clock) {
        let step = self.config.mains_period() + u64::from(self.tod_frac);
        self.tod_frac = (step & 0xFF) as u32;
        sched.set_alarm(self.tod_alarm, from + (step >> 8) as Clock);
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    #[must_use]
    pub fn write_snapshot<K: Copy>(&self, sched: &Scheduler<K>, name: &str) -> Vec<u8> {
        let now = sched.clk();
        let mut w = ModuleWriter::new(name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        for reg in [self.pra, self.prb, self.ddra, self.ddrb, self.cra, self.crb] {
            w.write_u8(reg);
        }
        for timer in [&self.ta, &self.tb] {
            w.write_u16(timer.latch);
            w.write_u16(timer.value(now));
            w.write_bool(timer.toggle);
            w.write_bool(timer.pulse_at == Some(now));
        }
        w.write_bytes(&self.tod.time);
        w.write_bytes(&self.tod.alarm);
        w.write_bool(self.tod.latched.is_some());
        w.write_bytes(&self.tod.latched.unwrap_or_default());
        w.write_bool(self.tod.halted);
        w.write_u8(self.tod.divider);
        w.write_alarm(sched.alarm_pending(self.tod_alarm), now);
        w.write_u8(self.tod_frac as u8);
        w.write_u8(self.sdr);
        w.write_u8(self.shift);
        w.write_u8(self.shift_bits);
        w.write_bool(self.sdr_queued);
        w.write_u8(self.icr_flags);
        w.write_u8(self.icr_mask);
        w.write_bool(self.irq);
        w.write_bool(self.cnt);
        w.write_bool(self.sp);
        w.write_bool(self.flag);
        w.finish()
    }

    pub fn read_snapshot<K: Copy>(
        &mut self,
        sched: &mut Scheduler<K>,
        name: &str,
        bytes: &[u8],
    ) -> SnapshotResult<()> {
        let now = sched.clk();
        let mut r = ModuleReader::open(bytes, name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        let [pra, prb, ddra, ddrb, cra, crb] = r.read_array()?;
        (self.pra, self.prb, self.ddra, self.ddrb) = (pra, prb, ddra, ddrb);
        (self.cra, self.crb) = (cra, crb);

        let phi2 = [
            cra & CR_START != 0 && TimerInput::timer_a(cra) == TimerInput::Phi2,
            crb & CR_START != 0 && TimerInput::timer_b(crb) == TimerInput::Phi2,
        ];
        for (timer, phi2) in [&mut self.ta, &mut self.tb].into_iter().zip(phi2) {
            timer.freeze(sched, now);
            timer.latch = r.read_u16()?;
            timer.set_counter(r.read_u16()?);
            timer.toggle = r.read_bool()?;
            timer.pulse_at = r.read_bool()?.then_some(now);
            if phi2 {
                timer.run_from(sched, now);
            }
        }

        self.tod.time = r.read_array()?;
        self.tod.alarm = r.read_array()?;
        let latched = r.read_bool()?;
        let latch: [u8; 4] = r.read_array()?;
        self.tod.latched = latched.then_some(latch);
        self.tod.halted = r.read_bool()?;
        self.tod.divider = r.read_u8()?;
        match r.read_alarm(now)? {
            Some(at) => sched.set_alarm(self.tod_alarm, at),
            None => sched.unset_alarm(self.tod_alarm),
        }
        self.tod_frac = u32::from(r.read_u8()?);

        self.sdr = r.read_u8()?;
        self.shift = r.read_u8()?;
        self.shift_bits = r.read_u8()?;
        if self.shift_bits > 8 {
            return Err(r.bad_value("shift count"));
        }
        self.sdr_queued = r.read_bool()?;
        self.icr_flags = r.read_u8()? & 0x1F;
        self.icr_mask = r.read_u8()? & 0x1F;
        let irq = r.read_bool()?;
        self.set_irq(sched, irq);
        self.cnt = r.read_bool()?;
        self.sp = r.read_bool()?;
        self.flag = r.read_bool()?;
        Ok(())
    }
}

impl ClockRebase for Cia6526 {
    fn rebase(&mut self, sub: Clock) {
        self.ta.rebase(sub);
        self.tb.rebase(sub);
    }
}
