//! Bus state and line combination.

use emu_core::{ModuleReader, ModuleWriter, SnapshotResult};

use crate::{HOST_ATN_OUT, HOST_CLK_IN, HOST_CLK_OUT, HOST_DATA_IN, HOST_DATA_OUT, IecLines};

const SNAPSHOT_MAJOR: u8 = 1;
const SNAPSHOT_MINOR: u8 = 0;

/// Drive units 8-11.
pub const MAX_DRIVES: usize = 4;

/// Bit masks of the IEC lines on a drive's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DrivePortLayout {
    pub data_in: u8,
    pub data_out: u8,
    pub clk_in: u8,
    pub clk_out: u8,
    pub atn_ack: u8,
    pub atn_in: u8,
    /// Only some boards can drive ATN themselves.
    pub atn_out: Option<u8>,
}

impl DrivePortLayout {
    /// 1541 VIA1 port B and 1581 CIA port B.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            data_in: 0x01,
            data_out: 0x02,
            clk_in: 0x04,
            clk_out: 0x08,
            atn_ack: 0x10,
            atn_in: 0x80,
            atn_out: None,
        }
    }

    /// Bits the bus drives into the port.
    #[must_use]
    pub const fn input_mask(&self) -> u8 {
        self.data_in | self.clk_in | self.atn_in
    }
}

impl Default for DrivePortLayout {
    fn default() -> Self {
        Self::standard()
    }
}

/// Receives the drive-side view after the host changes the bus.
pub trait IecListener {
    /// `port_in` holds the drive's input bits per its layout. `atn_edge` is
    /// `Some(asserted)` when this write changed ATN.
    fn drive_bus_changed(&mut self, unit: usize, port_in: u8, atn_edge: Option<bool>);
}

#[derive(Debug, Clone, Copy)]
struct DriveSlot {
    layout: DrivePortLayout,
    port: u8,
}

impl DriveSlot {
    fn pulls(&self, atn_low: bool) -> IecLines {
        let mut lines = IecLines::empty();
        let l = &self.layout;
        if let Some(atn_out) = l.atn_out
            && self.port & atn_out != 0
        {
            lines |= IecLines::ATN;
        }
        if self.port & l.clk_out != 0 {
            lines |= IecLines::CLK;
        }
        let acked = self.port & l.atn_ack != 0;
        if self.port & l.data_out != 0 || atn_low != acked {
            lines |= IecLines::DATA;
        }
        lines
    }
}

/// IEC bus with one host and up to [`MAX_DRIVES`] drives.
#[derive(Debug, Clone, Default)]
pub struct IecBus {
    host_port: u8,
    drives: [Option<DriveSlot>; MAX_DRIVES],
}

impl IecBus {
    /// Create a bus with all lines released.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a drive at `unit` (0 = device 8). Out-of-range units are
    /// ignored.
    pub fn attach(&mut self, unit: usize, layout: DrivePortLayout) {
        if let Some(slot) = self.drives.get_mut(unit) {
            log::debug!("IEC: drive {} attached", unit + 8);
            *slot = Some(DriveSlot { layout, port: 0 });
        }
    }

    pub fn detach(&mut self, unit: usize) {
        if let Some(slot) = self.drives.get_mut(unit)
            && slot.take().is_some()
        {
            log::debug!("IEC: drive {} detached", unit + 8);
        }
    }

    #[must_use]
    pub fn is_attached(&self, unit: usize) -> bool {
        self.drives.get(unit).is_some_and(Option::is_some)
    }

    // --- Host side ---

    /// Store the host port byte and notify every attached drive.
    pub fn host_port_write<L: IecListener>(&mut self, value: u8, listener: &mut L) {
        let before = self.lines();
        self.host_port = value;
        let after = self.lines();
        let atn_edge = (before.contains(IecLines::ATN) != after.contains(IecLines::ATN))
            .then(|| after.contains(IecLines::ATN));
        if let Some(asserted) = atn_edge {
            log::debug!("IEC: ATN {}", if asserted { "asserted" } else { "released" });
        }
        for unit in 0..MAX_DRIVES {
            if self.is_attached(unit) {
                listener.drive_bus_changed(unit, self.drive_port_in(unit), atn_edge);
            }
        }
    }

    /// Host input bits 6 (CLK) and 7 (DATA), 1 = line high.
    #[must_use]
    pub fn host_port_in(&self) -> u8 {
        let lines = self.lines();
        let mut value = 0;
        if !lines.contains(IecLines::CLK) {
            value |= HOST_CLK_IN;
        }
        if !lines.contains(IecLines::DATA) {
            value |= HOST_DATA_IN;
        }
        value
    }

    #[must_use]
    pub fn host_port(&self) -> u8 {
        self.host_port
    }

    // --- Drive side ---

    /// Store a drive's port byte and return the host input bits.
    pub fn drive_port_write(&mut self, unit: usize, value: u8) -> u8 {
        if let Some(Some(slot)) = self.drives.get_mut(unit) {
            slot.port = value;
        }
        self.host_port_in()
    }

    /// A drive's input bits, 1 = line low. Zero for a unit not attached.
    #[must_use]
    pub fn drive_port_in(&self, unit: usize) -> u8 {
        let Some(Some(slot)) = self.drives.get(unit) else {
            return 0;
        };
        let lines = self.lines();
        let l = &slot.layout;
        let mut value = 0;
        if lines.contains(IecLines::DATA) {
            value |= l.data_in;
        }
        if lines.contains(IecLines::CLK) {
            value |= l.clk_in;
        }
        if lines.contains(IecLines::ATN) {
            value |= l.atn_in;
        }
        value
    }

    // --- Line state ---

    /// Lines pulled low by anyone.
    #[must_use]
    pub fn lines(&self) -> IecLines {
        let mut lines = IecLines::empty();
        if self.host_port & HOST_ATN_OUT != 0 {
            lines |= IecLines::ATN;
        }
        if self.host_port & HOST_CLK_OUT != 0 {
            lines |= IecLines::CLK;
        }
        if self.host_port & HOST_DATA_OUT != 0 {
            lines |= IecLines::DATA;
        }
        let drives = self.drives.iter().flatten();
        for slot in drives.clone() {
            if let Some(atn_out) = slot.layout.atn_out
                && slot.port & atn_out != 0
            {
                lines |= IecLines::ATN;
            }
        }
        let atn_low = lines.contains(IecLines::ATN);
        for slot in drives {
            lines |= slot.pulls(atn_low);
        }
        lines
    }

    /// ATN level, true = high.
    #[must_use]
    pub fn atn(&self) -> bool {
        !self.lines().contains(IecLines::ATN)
    }

    #[must_use]
    pub fn clk(&self) -> bool {
        !self.lines().contains(IecLines::CLK)
    }

    #[must_use]
    pub fn data(&self) -> bool {
        !self.lines().contains(IecLines::DATA)
    }

    // --- Snapshot ---

    #[must_use]
    pub fn write_snapshot(&self, name: &str) -> Vec<u8> {
        let mut w = ModuleWriter::new(name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR);
        w.write_u8(self.host_port);
        for slot in &self.drives {
            w.write_bool(slot.is_some());
            w.write_u8(slot.map_or(0, |s| s.port));
        }
        w.finish()
    }

    /// Restore port bytes. Drives keep their current attachment and layout.
    pub fn read_snapshot(&mut self, name: &str, bytes: &[u8]) -> SnapshotResult<()> {
        let mut r = ModuleReader::open(bytes, name, SNAPSHOT_MAJOR, SNAPSHOT_MINOR)?;
        self.host_port = r.read_u8()?;
        for slot in &mut self.drives {
            let attached = r.read_bool()?;
            let port = r.read_u8()?;
            if attached != slot.is_some() {
                return Err(r.bad_value("drive attachment"));
            }
            if let Some(slot) = slot {
                slot.port = port;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(usize, u8, Option<bool>)>,
    }

    impl IecListener for Recorder {
        fn drive_bus_changed(&mut self, unit: usize, port_in: u8, atn_edge: Option<bool>) {
            self.calls.push((unit, port_in, atn_edge));
        }
    }

    fn bus_with_drive() -> IecBus {
        let mut bus = IecBus::new();
        bus.attach(0, DrivePortLayout::standard());
        // Acknowledge ATN released so the drive leaves DATA alone.
        bus.drive_port_write(0, 0x00);
        bus
    }

    #[test]
    fn lines_start_high() {
        let bus = bus_with_drive();
        assert!(bus.atn());
        assert!(bus.clk());
        assert!(bus.data());
        assert_eq!(bus.host_port_in(), HOST_CLK_IN | HOST_DATA_IN);
    }

    #[test]
    fn atn_is_low_while_any_driver_pulls() {
        let mut bus = IecBus::new();
        bus.attach(
            0,
            DrivePortLayout {
                atn_out: Some(0x40),
                ..DrivePortLayout::standard()
            },
        );
        let mut rec = Recorder::default();

        bus.host_port_write(HOST_ATN_OUT, &mut rec);
        bus.drive_port_write(0, 0x40 | 0x10);
        assert!(!bus.atn(), "both pulling");

        bus.host_port_write(0, &mut rec);
        assert!(!bus.atn(), "drive still pulling");

        bus.host_port_write(HOST_ATN_OUT, &mut rec);
        bus.drive_port_write(0, 0x10);
        assert!(!bus.atn(), "host still pulling");

        bus.host_port_write(0, &mut rec);
        bus.drive_port_write(0, 0x00);
        assert!(bus.atn(), "both released");
    }

    #[test]
    fn host_write_notifies_drives_with_atn_edge() {
        let mut bus = bus_with_drive();
        bus.attach(2, DrivePortLayout::standard());
        let mut rec = Recorder::default();

        bus.host_port_write(HOST_ATN_OUT, &mut rec);
        bus.host_port_write(HOST_ATN_OUT | HOST_CLK_OUT, &mut rec);

        // ATN low while unacknowledged also pulls DATA low.
        let port_in = 0x80 | 0x01;
        assert_eq!(
            rec.calls,
            vec![
                (0, port_in, Some(true)),
                (2, port_in, Some(true)),
                (0, port_in | 0x04, None),
                (2, port_in | 0x04, None),
            ]
        );
    }

    #[test]
    fn atn_acknowledge_releases_data() {
        let mut bus = bus_with_drive();
        let mut rec = Recorder::default();
        bus.host_port_write(HOST_ATN_OUT, &mut rec);
        assert!(!bus.data());
        assert_eq!(bus.drive_port_write(0, 0x10) & HOST_DATA_IN, HOST_DATA_IN);
        assert!(bus.data());

        // Releasing ATN with ATNA still set now disagrees again.
        bus.host_port_write(0, &mut rec);
        assert!(!bus.data());
    }

    #[test]
    fn drive_outputs_reach_host() {
        let mut bus = bus_with_drive();
        assert_eq!(bus.drive_port_write(0, 0x08), HOST_DATA_IN);
        assert_eq!(bus.drive_port_write(0, 0x02), HOST_CLK_IN);
        assert_eq!(bus.drive_port_in(0), 0x01, "drive sees its own DATA");
    }

    #[test]
    fn detached_drive_releases_lines() {
        let mut bus = bus_with_drive();
        bus.drive_port_write(0, 0x0A);
        assert!(!bus.clk());
        bus.detach(0);
        assert!(bus.clk());
        assert!(bus.data());
        assert_eq!(bus.drive_port_in(0), 0);
    }

    #[test]
    fn snapshot_restores_port_bytes() {
        let mut bus = bus_with_drive();
        let mut rec = Recorder::default();
        bus.host_port_write(HOST_CLK_OUT, &mut rec);
        bus.drive_port_write(0, 0x02);
        let saved = bus.write_snapshot("IECBUS");

        let mut restored = bus_with_drive();
        restored.read_snapshot("IECBUS", &saved).expect("restore");
        assert_eq!(restored.lines(), bus.lines());
        assert_eq!(restored.host_port(), HOST_CLK_OUT);

        let mut other = IecBus::new();
        assert!(other.read_snapshot("IECBUS", &saved).is_err());
    }
}
