//! Serial bus with its drives, kept causal with the host.
//!
//! The host and every drive run on separate clocks. Before the host
//! touches anything shared (the IEC port, the parallel cable) every drive
//! is first run up to the host's current instant, so the host never sees
//! a bus state from the drives' past or future.

use commodore_iec::{CableSide, DrivePortLayout, IecBus, IecListener, MAX_DRIVES, ParallelCable};
use emu_core::snapshot::split_modules;
use emu_core::{Clock, ClockRebase, ModuleReader, ModuleWriter, SnapshotError, SnapshotResult, rebase_clock};

use crate::{Drive1581, DriveError, DriveSync, FIRST_DEVICE};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

struct Slot {
    drive: Drive1581,
    sync: DriveSync,
    /// Host clock the drive has been run up to.
    host_clk: Clock,
}

/// Forwards bus changes to the drives' CIA inputs.
struct Drives<'a>(&'a mut [Option<Slot>; MAX_DRIVES]);

impl IecListener for Drives<'_> {
    fn drive_bus_changed(&mut self, unit: usize, port_in: u8, atn_edge: Option<bool>) {
        if let Some(Some(slot)) = self.0.get_mut(unit) {
            slot.drive.set_iec_input(port_in, atn_edge);
        }
    }
}

/// IEC bus, parallel cable and up to four serial drives.
pub struct SerialSystem {
    bus: IecBus,
    cable: ParallelCable,
    /// Unit whose drive end the parallel cable is plugged into.
    cable_unit: Option<usize>,
    slots: [Option<Slot>; MAX_DRIVES],
}

impl Default for SerialSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialSystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus: IecBus::new(),
            cable: ParallelCable::new(),
            cable_unit: None,
            slots: [None, None, None, None],
        }
    }

    /// Plug a drive into the bus. Its clock starts following the host
    /// from `host_clk`.
    pub fn attach_drive(&mut self, drive: Drive1581, sync: DriveSync, host_clk: Clock) -> Result<(), DriveError> {
        let device = drive.device();
        let unit = unit_of(device)?;
        if self.slots[unit].is_some() {
            return Err(DriveError::DeviceInUse(device));
        }
        log::debug!("serial: drive {device} attached");
        self.bus.attach(unit, DrivePortLayout::standard());
        self.slots[unit] = Some(Slot { drive, sync, host_clk });
        self.sync_drive_port(unit);
        Ok(())
    }

    pub fn detach_drive(&mut self, device: u8) -> Option<Drive1581> {
        let unit = unit_of(device).ok()?;
        let slot = self.slots[unit].take()?;
        log::debug!("serial: drive {device} detached");
        self.bus.detach(unit);
        if self.cable_unit == Some(unit) {
            self.cable_unit = None;
        }
        self.refresh_inputs();
        Some(slot.drive)
    }

    #[must_use]
    pub fn drive(&self, device: u8) -> Option<&Drive1581> {
        let unit = unit_of(device).ok()?;
        self.slots[unit].as_ref().map(|s| &s.drive)
    }

    /// Run `f` on a drive, then put any change to its IEC outputs on
    /// the bus.
    pub fn with_drive<R>(&mut self, device: u8, f: impl FnOnce(&mut Drive1581) -> R) -> Option<R> {
        let unit = unit_of(device).ok()?;
        let result = f(&mut self.slots[unit].as_mut()?.drive);
        self.sync_changed_ports();
        Some(result)
    }

    #[must_use]
    pub fn bus(&self) -> &IecBus {
        &self.bus
    }

    /// Run every drive up to `host_clk`.
    pub fn catch_up(&mut self, host_clk: Clock) {
        for slot in self.slots.iter_mut().flatten() {
            let elapsed = host_clk.saturating_sub(slot.host_clk);
            if elapsed > 0 {
                let cycles = slot.sync.convert(elapsed);
                slot.drive.run(cycles);
            }
            slot.host_clk = slot.host_clk.max(host_clk);
        }
        self.sync_changed_ports();
    }

    pub fn reset(&mut self) {
        self.bus.host_port_write(0, &mut Drives(&mut self.slots));
        self.cable = ParallelCable::new();
        for unit in 0..MAX_DRIVES {
            if let Some(slot) = self.slots[unit].as_mut() {
                slot.drive.reset();
                slot.sync.reset();
            }
            self.sync_drive_port(unit);
        }
    }

    // ------------------------------------------------------------------
    // Host side
    // ------------------------------------------------------------------

    /// Host IEC output byte (CIA2 port A layout).
    pub fn host_port_write(&mut self, host_clk: Clock, value: u8) {
        self.catch_up(host_clk);
        self.bus.host_port_write(value, &mut Drives(&mut self.slots));
    }

    /// Host IEC input bits 6 and 7.
    pub fn host_port_read(&mut self, host_clk: Clock) -> u8 {
        self.catch_up(host_clk);
        self.bus.host_port_in()
    }

    // ------------------------------------------------------------------
    // Drive side
    // ------------------------------------------------------------------

    /// Drive CPU read at the drive's own clock.
    pub fn drive_read(&mut self, device: u8, addr: u16) -> u8 {
        self.with_drive(device, |drive| drive.read(addr)).unwrap_or(0xFF)
    }

    /// Drive CPU write at the drive's own clock. A change to the drive's
    /// IEC outputs is visible to the host and the other drives at once.
    pub fn drive_store(&mut self, device: u8, addr: u16, value: u8) {
        let Ok(unit) = unit_of(device) else {
            return;
        };
        let Some(slot) = self.slots[unit].as_mut() else {
            return;
        };
        slot.drive.store(addr, value);
        self.sync_drive_port(unit);
    }

    /// Put a drive's IEC outputs on the bus and show every drive the
    /// result.
    fn sync_drive_port(&mut self, unit: usize) {
        if let Some(slot) = self.slots[unit].as_mut() {
            slot.drive.take_port_change();
            self.bus.drive_port_write(unit, slot.drive.iec_port());
        }
        self.refresh_inputs();
    }

    fn sync_changed_ports(&mut self) {
        for unit in 0..MAX_DRIVES {
            let changed = self.slots[unit]
                .as_mut()
                .is_some_and(|slot| slot.drive.take_port_change());
            if changed {
                self.sync_drive_port(unit);
            }
        }
    }

    fn refresh_inputs(&mut self) {
        for (unit, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                slot.drive.set_iec_input(self.bus.drive_port_in(unit), None);
            }
        }
    }

    // ------------------------------------------------------------------
    // Parallel cable
    // ------------------------------------------------------------------

    /// Plug the drive end of the cable into `device`, or unplug it.
    pub fn connect_cable(&mut self, device: Option<u8>) -> Result<(), DriveError> {
        self.cable_unit = device.map(unit_of).transpose()?;
        Ok(())
    }

    /// Host user port write. A strobe pulses the drive CIA's FLAG input.
    pub fn parallel_host_write(&mut self, host_clk: Clock, value: u8, strobe: bool) {
        self.catch_up(host_clk);
        if self.cable.write(CableSide::Host, value, strobe) == Some(CableSide::Drive)
            && let Some(Some(slot)) = self.cable_unit.map(|u| self.slots[u].as_mut())
        {
            slot.drive.pulse_flag();
        }
    }

    pub fn parallel_host_read(&mut self, host_clk: Clock) -> u8 {
        self.catch_up(host_clk);
        self.cable.read(CableSide::Host)
    }

    /// Drive side write. Returns true when the host's FLAG input must be
    /// pulsed.
    pub fn parallel_drive_write(&mut self, value: u8, strobe: bool) -> bool {
        self.cable.write(CableSide::Drive, value, strobe) == Some(CableSide::Host)
    }

    #[must_use]
    pub fn parallel_drive_read(&self) -> u8 {
        self.cable.read(CableSide::Drive)
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    /// System module, bus, cable, then each attached drive's modules.
    #[must_use]
    pub fn write_snapshot(&self, host_clk: Clock) -> Vec<u8> {
        let mut w = ModuleWriter::new("SERIAL", SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_u8(self.cable_unit.map_or(0xFF, |u| u as u8));
        for slot in &self.slots {
            w.write_bool(slot.is_some());
            let (age, frac) = slot
                .as_ref()
                .map_or((0, 0), |s| (host_clk.saturating_sub(s.host_clk), s.sync.remainder()));
            w.write_u32(age);
            w.write_u16(frac as u16);
        }
        let mut out = w.finish();
        out.extend(self.bus.write_snapshot("IECBUS"));
        out.extend(self.cable.write_snapshot("PARCABLE"));
        for slot in self.slots.iter().flatten() {
            out.extend(slot.drive.write_snapshot());
        }
        out
    }

    /// Restore into a system with the same drives attached.
    pub fn read_snapshot(&mut self, host_clk: Clock, bytes: &[u8]) -> SnapshotResult<()> {
        let modules = split_modules(bytes)?;
        let missing = |name: &str| SnapshotError::Truncated { module: name.to_string() };

        let (_, system) = modules.first().ok_or_else(|| missing("SERIAL"))?;
        let mut r = ModuleReader::open(system, "SERIAL", SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        let cable_unit = r.read_u8()?;
        self.cable_unit = match usize::from(cable_unit) {
            0xFF => None,
            u if u < MAX_DRIVES => Some(u),
            _ => return Err(r.bad_value("cable unit")),
        };
        for slot in &mut self.slots {
            let attached = r.read_bool()?;
            let age = r.read_u32()?;
            let frac = r.read_u16()?;
            if attached != slot.is_some() {
                return Err(r.bad_value("drive attachment"));
            }
            if let Some(slot) = slot {
                slot.host_clk = host_clk.saturating_sub(age);
                slot.sync.set_remainder(u32::from(frac));
            }
        }

        let (_, bus) = modules.get(1).ok_or_else(|| missing("IECBUS"))?;
        self.bus.read_snapshot("IECBUS", bus)?;
        let (_, cable) = modules.get(2).ok_or_else(|| missing("PARCABLE"))?;
        self.cable.read_snapshot("PARCABLE", cable)?;

        let mut rest = modules[3..].iter();
        for slot in self.slots.iter_mut().flatten() {
            let mut chunk = Vec::new();
            for _ in 0..Drive1581::SNAPSHOT_MODULES {
                let (_, module) = rest.next().ok_or_else(|| missing("DRIVE"))?;
                chunk.extend_from_slice(module);
            }
            slot.drive.read_snapshot(&chunk)?;
        }
        Ok(())
    }
}

impl ClockRebase for SerialSystem {
    /// The host clock was wound back by `sub`.
    fn rebase(&mut self, sub: Clock) {
        for slot in self.slots.iter_mut().flatten() {
            slot.host_clk = rebase_clock(slot.host_clk, sub);
        }
    }
}

fn unit_of(device: u8) -> Result<usize, DriveError> {
    let unit = usize::from(device.wrapping_sub(FIRST_DEVICE));
    if unit < MAX_DRIVES {
        Ok(unit)
    } else {
        Err(DriveError::DeviceOutOfRange(device))
    }
}
