//! Zoned 256-byte sector media for the job-queue controller.
//!
//! Commodore GCR drives put more sectors on the outer tracks. A layout is a
//! list of zones, each the last track it covers and its sector count:
//!
//! | Layout | Zones                                             |
//! |--------|---------------------------------------------------|
//! | 8050   | 1-39: 29, 40-53: 27, 54-64: 25, 65-77: 23         |
//! | 1541   | 1-17: 21, 18-24: 19, 25-30: 18, 31-35: 17         |

pub const SECTOR_SIZE: usize = 256;

/// Sector storage as the controller addresses it.
pub trait JobMedia {
    /// Sectors on `track`, 0 when the track does not exist.
    fn sectors(&self, track: u8) -> u8;

    fn read(&self, track: u8, sector: u8) -> Option<&[u8]>;

    /// Returns false when the sector does not exist.
    fn write(&mut self, track: u8, sector: u8, data: &[u8]) -> bool;

    /// ID written in every header on the disk.
    fn disk_id(&self) -> [u8; 2];

    /// Clear every sector and stamp a new ID.
    fn format(&mut self, id: [u8; 2]);

    fn write_protected(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLayout {
    zones: &'static [(u8, u8)],
}

impl ZoneLayout {
    pub const CBM_8050: Self = Self {
        zones: &[(39, 29), (53, 27), (64, 25), (77, 23)],
    };

    pub const CBM_1541: Self = Self {
        zones: &[(17, 21), (24, 19), (30, 18), (35, 17)],
    };

    #[must_use]
    pub fn tracks(&self) -> u8 {
        self.zones.last().map_or(0, |&(last, _)| last)
    }

    #[must_use]
    pub fn sectors(&self, track: u8) -> u8 {
        if track == 0 {
            return 0;
        }
        self.zones
            .iter()
            .find(|&&(last, _)| track <= last)
            .map_or(0, |&(_, count)| count)
    }

    #[must_use]
    pub fn total_sectors(&self) -> usize {
        (1..=self.tracks()).map(|t| usize::from(self.sectors(t))).sum()
    }

    /// Byte offset of a sector in a linear dump of the disk.
    #[must_use]
    pub fn offset(&self, track: u8, sector: u8) -> Option<usize> {
        if sector >= self.sectors(track) {
            return None;
        }
        let before: usize = (1..track).map(|t| usize::from(self.sectors(t))).sum();
        Some((before + usize::from(sector)) * SECTOR_SIZE)
    }
}

/// Sector media held in memory.
#[derive(Debug, Clone)]
pub struct SectorImage {
    layout: ZoneLayout,
    data: Vec<u8>,
    id: [u8; 2],
    write_protect: bool,
}

impl SectorImage {
    /// A freshly formatted disk.
    #[must_use]
    pub fn blank(layout: ZoneLayout, id: [u8; 2]) -> Self {
        Self {
            layout,
            data: vec![0; layout.total_sectors() * SECTOR_SIZE],
            id,
            write_protect: false,
        }
    }

    #[must_use]
    pub fn layout(&self) -> ZoneLayout {
        self.layout
    }

    pub fn set_write_protect(&mut self, protect: bool) {
        self.write_protect = protect;
    }

    pub fn sector_mut(&mut self, track: u8, sector: u8) -> Option<&mut [u8]> {
        let start = self.layout.offset(track, sector)?;
        self.data.get_mut(start..start + SECTOR_SIZE)
    }
}

impl JobMedia for SectorImage {
    fn sectors(&self, track: u8) -> u8 {
        self.layout.sectors(track)
    }

    fn read(&self, track: u8, sector: u8) -> Option<&[u8]> {
        let start = self.layout.offset(track, sector)?;
        self.data.get(start..start + SECTOR_SIZE)
    }

    fn write(&mut self, track: u8, sector: u8, data: &[u8]) -> bool {
        let Some(dst) = self.sector_mut(track, sector) else {
            return false;
        };
        let len = data.len().min(SECTOR_SIZE);
        dst[..len].copy_from_slice(&data[..len]);
        true
    }

    fn disk_id(&self) -> [u8; 2] {
        self.id
    }

    fn format(&mut self, id: [u8; 2]) {
        self.data.fill(0);
        self.id = id;
    }

    fn write_protected(&self) -> bool {
        self.write_protect
    }
}
