//! Sector-level media seen by the controller.

use std::collections::BTreeMap;

/// ID field contents: C, H, R, N.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorId {
    pub track: u8,
    pub side: u8,
    pub sector: u8,
    /// Size code; the sector holds `128 << size_code` bytes.
    pub size_code: u8,
}

impl SectorId {
    #[must_use]
    pub const fn len(&self) -> usize {
        128 << (self.size_code & 0x03)
    }

    /// CRC over the address mark and the four ID bytes.
    #[must_use]
    pub fn crc(&self) -> u16 {
        crc16(&[0xA1, 0xA1, 0xA1, 0xFE, self.track, self.side, self.sector, self.size_code])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    pub id: SectorId,
    pub data: Vec<u8>,
    /// Written with a deleted data mark ($F8).
    pub deleted: bool,
}

/// Sectors under the head, addressed by physical cylinder and side.
///
/// The controller never sees a file format; anything that can list ID
/// fields and move sector payloads can be inserted.
pub trait SectorMedia {
    /// ID fields on a track in rotational order.
    fn ids(&self, cylinder: u8, side: u8) -> Vec<SectorId>;

    fn read_sector(&self, cylinder: u8, side: u8, id: &SectorId) -> Option<Sector>;

    /// Returns false when no such sector exists.
    fn write_sector(&mut self, cylinder: u8, side: u8, id: &SectorId, data: &[u8], deleted: bool) -> bool;

    /// Replace a whole track.
    fn format_track(&mut self, cylinder: u8, side: u8, sectors: Vec<Sector>);

    fn write_protected(&self) -> bool;
}

/// Sector media held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDisk {
    tracks: BTreeMap<(u8, u8), Vec<Sector>>,
    write_protect: bool,
}

impl MemoryDisk {
    /// An unformatted disk.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A disk with identical tracks, sectors numbered from `first_sector`
    /// and filled with zeros. ID track and side match the physical ones.
    #[must_use]
    pub fn formatted(cylinders: u8, sides: u8, sectors: u8, size_code: u8, first_sector: u8) -> Self {
        let mut disk = Self::new();
        for cylinder in 0..cylinders {
            for side in 0..sides {
                let track = (0..sectors)
                    .map(|n| {
                        let id = SectorId {
                            track: cylinder,
                            side,
                            sector: first_sector + n,
                            size_code,
                        };
                        Sector {
                            data: vec![0; id.len()],
                            id,
                            deleted: false,
                        }
                    })
                    .collect();
                disk.tracks.insert((cylinder, side), track);
            }
        }
        disk
    }

    /// 1581 layout: 80 cylinders, two sides, ten 512-byte sectors from 1.
    #[must_use]
    pub fn formatted_1581() -> Self {
        Self::formatted(80, 2, 10, 2, 1)
    }

    pub fn set_write_protect(&mut self, protect: bool) {
        self.write_protect = protect;
    }

    #[must_use]
    pub fn sector(&self, cylinder: u8, side: u8, sector: u8) -> Option<&Sector> {
        self.tracks
            .get(&(cylinder, side))?
            .iter()
            .find(|s| s.id.sector == sector)
    }

    pub fn sector_mut(&mut self, cylinder: u8, side: u8, sector: u8) -> Option<&mut Sector> {
        self.tracks
            .get_mut(&(cylinder, side))?
            .iter_mut()
            .find(|s| s.id.sector == sector)
    }
}

impl SectorMedia for MemoryDisk {
    fn ids(&self, cylinder: u8, side: u8) -> Vec<SectorId> {
        self.tracks
            .get(&(cylinder, side))
            .map(|t| t.iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    fn read_sector(&self, cylinder: u8, side: u8, id: &SectorId) -> Option<Sector> {
        self.tracks
            .get(&(cylinder, side))?
            .iter()
            .find(|s| s.id == *id)
            .cloned()
    }

    fn write_sector(&mut self, cylinder: u8, side: u8, id: &SectorId, data: &[u8], deleted: bool) -> bool {
        let Some(sector) = self
            .tracks
            .get_mut(&(cylinder, side))
            .and_then(|t| t.iter_mut().find(|s| s.id == *id))
        else {
            return false;
        };
        sector.data.clear();
        sector.data.extend_from_slice(data);
        sector.deleted = deleted;
        true
    }

    fn format_track(&mut self, cylinder: u8, side: u8, sectors: Vec<Sector>) {
        self.tracks.insert((cylinder, side), sectors);
    }

    fn write_protected(&self) -> bool {
        self.write_protect
    }
}

/// CRC-16/CCITT as the controller computes it, preset to $FFFF.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}
