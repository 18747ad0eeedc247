//! Raw track images for Read Track and Write Track.
//!
//! Read Track returns an IBM System 34 (MFM) layout built from the ID
//! fields on the media. Write Track receives the byte stream the CPU
//! feeds, where $F5 writes an A1 sync mark and $F7 writes the two CRC
//! bytes.

use crate::disk::{Sector, SectorId, crc16};

/// Unformatted capacity of a double density track at 300 rpm.
pub const TRACK_BYTES: usize = 6250;

const GAP4A: usize = 80;
const GAP1: usize = 50;
const GAP2: usize = 22;
const GAP3: usize = 35;
const SYNC: usize = 12;

/// Build the track image for the sectors on a track.
#[must_use]
pub fn build(sectors: &[Sector]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TRACK_BYTES);
    out.extend(std::iter::repeat_n(0x4E, GAP4A));
    out.extend(std::iter::repeat_n(0x00, SYNC));
    out.extend_from_slice(&[0xC2, 0xC2, 0xC2, 0xFC]);
    out.extend(std::iter::repeat_n(0x4E, GAP1));
    for sector in sectors {
        let id = sector.id;
        out.extend(std::iter::repeat_n(0x00, SYNC));
        out.extend_from_slice(&[0xA1, 0xA1, 0xA1, 0xFE, id.track, id.side, id.sector, id.size_code]);
        out.extend_from_slice(&id.crc().to_be_bytes());
        out.extend(std::iter::repeat_n(0x4E, GAP2));
        out.extend(std::iter::repeat_n(0x00, SYNC));
        let mark = if sector.deleted { 0xF8 } else { 0xFB };
        let start = out.len();
        out.extend_from_slice(&[0xA1, 0xA1, 0xA1, mark]);
        out.extend_from_slice(&sector.data);
        let crc = crc16(&out[start..]);
        out.extend_from_slice(&crc.to_be_bytes());
        out.extend(std::iter::repeat_n(0x4E, GAP3));
    }
    if out.len() < TRACK_BYTES {
        out.resize(TRACK_BYTES, 0x4E);
    }
    out
}

/// Extract the sectors a Write Track stream formats.
///
/// An ID field is `F5 F5 F5 FE c h r n F7`; the data field that follows
/// is `F5 F5 F5 FB|F8` plus `128 << n` bytes. ID fields without a data
/// field become sectors filled with the format filler $E5.
#[must_use]
pub fn parse(stream: &[u8]) -> Vec<Sector> {
    let mut sectors = Vec::new();
    let mut i = 0;
    while let Some(pos) = find_mark(stream, i, &[0xFE]) {
        let Some(&[track, side, sector, size_code]) = stream.get(pos..pos + 4) else {
            break;
        };
        let id = SectorId { track, side, sector, size_code };
        i = pos + 4;
        let next_id = find_mark(stream, i, &[0xFE]).unwrap_or(stream.len());
        let (data, deleted) = match find_mark(stream, i, &[0xFB, 0xF8]) {
            Some(start) if start < next_id && start + id.len() <= stream.len() => {
                i = start + id.len();
                (stream[start..start + id.len()].to_vec(), stream[start - 1] == 0xF8)
            }
            _ => (vec![0xE5; id.len()], false),
        };
        sectors.push(Sector { id, data, deleted });
    }
    sectors
}

/// Position just after `F5 F5 F5 <mark>` at or after `from`.
fn find_mark(stream: &[u8], from: usize, marks: &[u8]) -> Option<usize> {
    stream
        .get(from..)?
        .windows(4)
        .position(|w| w[..3] == [0xF5, 0xF5, 0xF5] && marks.contains(&w[3]))
        .map(|p| from + p + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector(n: u8, fill: u8) -> Sector {
        let id = SectorId { track: 3, side: 0, sector: n, size_code: 0 };
        Sector { id, data: vec![fill; 128], deleted: false }
    }

    #[test]
    fn built_track_is_full_length_and_carries_ids() {
        let image = build(&[sector(1, 0x11), sector(2, 0x22)]);
        assert_eq!(image.len(), TRACK_BYTES);
        let id_pos = image
            .windows(4)
            .position(|w| w == [0xA1, 0xA1, 0xA1, 0xFE])
            .expect("ID mark present");
        assert_eq!(&image[id_pos + 4..id_pos + 8], &[3, 0, 1, 0]);
    }

    #[test]
    fn parse_write_track_stream() {
        let mut stream = vec![0x4E; 40];
        for (n, fill, mark) in [(1u8, 0xAAu8, 0xFBu8), (2, 0xBB, 0xF8)] {
            stream.extend_from_slice(&[0x00; 12]);
            stream.extend_from_slice(&[0xF5, 0xF5, 0xF5, 0xFE, 7, 1, n, 0, 0xF7]);
            stream.extend_from_slice(&[0x4E; 22]);
            stream.extend_from_slice(&[0x00; 12]);
            stream.extend_from_slice(&[0xF5, 0xF5, 0xF5, mark]);
            stream.extend(std::iter::repeat_n(fill, 128));
            stream.extend_from_slice(&[0xF7, 0x4E, 0x4E]);
        }
        let sectors = parse(&stream);
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].id, SectorId { track: 7, side: 1, sector: 1, size_code: 0 });
        assert_eq!(sectors[0].data, vec![0xAA; 128]);
        assert!(!sectors[0].deleted);
        assert!(sectors[1].deleted);
    }

    #[test]
    fn id_without_data_is_filled() {
        let stream = [0xF5, 0xF5, 0xF5, 0xFE, 0, 0, 5, 1, 0xF7];
        let sectors = parse(&stream);
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].data, vec![0xE5; 256]);
    }

    #[test]
    fn garbage_has_no_sectors() {
        assert!(parse(&[0x4E; 300]).is_empty());
    }
}
