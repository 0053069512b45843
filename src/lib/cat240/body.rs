use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use serde::Serialize;
use std::fmt;

use super::bits::{read_2bits, read_4bits, read_bit, read_u16, read_u24, read_u32};
use super::header::{HEADER_LENGTH, Header};
use super::{DecodeError, DecodeOptions};

const AZIMUTH_STEPS: f64 = 65536.;
const TIME_OF_DAY_TICKS: u32 = 128; // I240/140 is in 1/128 s

pub fn azimuth_to_degrees(raw: u16) -> f64 {
    raw as f64 * 360. / AZIMUTH_STEPS
}

pub fn degrees_to_azimuth(degrees: f64) -> u16 {
    ((degrees * AZIMUTH_STEPS / 360.).round() as i64).rem_euclid(AZIMUTH_STEPS as i64) as u16
}

#[derive(Copy, Clone, Debug, Primitive, PartialEq, Eq, Serialize)]
pub enum MessageType {
    VideoSummary = 1,
    Video = 2,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// The cell duration is one of exactly two literal scales, so comparing
// these never involves computed floating point values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DurationUnit {
    Nanoseconds,
    Femtoseconds,
}

impl DurationUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            DurationUnit::Nanoseconds => 1e-9,
            DurationUnit::Femtoseconds => 1e-15,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DataSource {
    pub sac: u8,
    pub sic: u8,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.sac, self.sic)
    }
}

///
/// The decoded fields of one CAT240 record. Fields whose FRN flag was not set
/// are `None`, or zero for the numeric members of the video header group.
///
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    pub data_source: Option<DataSource>,
    pub message_type: Option<u8>,
    pub message_index: Option<u32>,
    pub summary: Option<String>,

    pub start_azimuth: u16,
    pub end_azimuth: u16,
    pub start_azimuth_in_degree: f64,
    pub end_azimuth_in_degree: f64,
    pub start_range: u32,
    pub cell_duration: u32,
    pub duration_unit: Option<DurationUnit>,

    pub compression: bool,
    pub resolution_exponent: u8,
    /// Bits per cell; 0 when the exponent is not one of 1..=6
    pub video_resolution: u32,

    pub valid_bytes: u16,
    pub valid_cells: u32,

    pub block_count: u8,
    pub block_size: usize,
    pub video_block_length: usize,
    pub cells: Vec<u8>,

    pub time_of_day: Option<u32>,
    pub time_of_day_seconds: Option<u32>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    // Returns the offset of `len` octets for `field`, or fails if the
    // datagram does not contain them.
    fn take(&mut self, len: usize, field: &'static str) -> Result<usize, DecodeError> {
        let available = self.buf.len().saturating_sub(self.offset);
        if len > available {
            return Err(DecodeError::Truncated {
                field,
                offset: self.offset,
                needed: len,
                available,
            });
        }
        let start = self.offset;
        self.offset += len;
        Ok(start)
    }
}

fn resolution_bits(exponent: u8) -> u32 {
    match exponent {
        1..=6 => 1 << (exponent - 1),
        _ => 0,
    }
}

impl Body {
    pub fn parse(
        header: &Header,
        buf: &[u8],
        options: &DecodeOptions,
    ) -> Result<Body, DecodeError> {
        let mut cur = Cursor {
            buf,
            offset: HEADER_LENGTH,
        };

        let mut body = Body {
            data_source: None,
            message_type: None,
            message_index: None,
            summary: None,
            start_azimuth: 0,
            end_azimuth: 0,
            start_azimuth_in_degree: 0.,
            end_azimuth_in_degree: 0.,
            start_range: 0,
            cell_duration: 0,
            duration_unit: None,
            compression: false,
            resolution_exponent: 0,
            video_resolution: 0,
            valid_bytes: 0,
            valid_cells: 0,
            block_count: 0,
            block_size: 0,
            video_block_length: 0,
            cells: Vec::new(),
            time_of_day: None,
            time_of_day_seconds: None,
        };

        if header.has_data_source() {
            let i = cur.take(2, "data source")?;
            body.data_source = Some(DataSource {
                sac: buf[i],
                sic: buf[i + 1],
            });
        }

        if header.has_message_type() {
            let i = cur.take(1, "message type")?;
            body.message_type = Some(buf[i]);
        }

        if header.has_record_header() {
            let i = cur.take(4, "record header")?;
            body.message_index = Some(read_u32(buf, i));
        }

        if header.has_summary() {
            let i = cur.take(1, "summary length")?;
            let len = buf[i] as usize;
            let i = cur.take(len, "summary")?;
            body.summary = Some(String::from_utf8_lossy(&buf[i..i + len]).into_owned());
        }

        // I240/040 and I240/041 are separate items; on a malformed FSPEC with
        // both set each is consumed and the femtosecond one is kept.
        let video_headers = [
            (header.has_nano_header(), DurationUnit::Nanoseconds),
            (header.has_femto_header(), DurationUnit::Femtoseconds),
        ];
        for (_, unit) in video_headers.into_iter().filter(|(present, _)| *present) {
            let i = cur.take(12, "video header")?;
            body.start_azimuth = read_u16(buf, i);
            body.end_azimuth = read_u16(buf, i + 2);
            body.start_range = read_u32(buf, i + 4);
            body.cell_duration = read_u32(buf, i + 8);
            body.start_azimuth_in_degree = azimuth_to_degrees(body.start_azimuth);
            body.end_azimuth_in_degree = azimuth_to_degrees(body.end_azimuth);
            body.duration_unit = Some(unit);
        }

        if header.has_resolution() {
            let i = cur.take(2, "resolution")?;
            body.compression = buf[i] & 0x80 != 0;
            body.resolution_exponent = buf[i + 1];
            body.video_resolution = resolution_bits(body.resolution_exponent);
            if body.video_resolution == 0 {
                if !options.lenient {
                    return Err(DecodeError::InvalidResolution(body.resolution_exponent));
                }
                log::debug!(
                    "Resolution exponent {} out of range, reading whole bytes",
                    body.resolution_exponent
                );
            }
        }

        if header.has_counters() {
            let i = cur.take(5, "counters")?;
            body.valid_bytes = read_u16(buf, i);
            body.valid_cells = read_u24(buf, i + 2);
        }

        // Likewise every flagged volume class is its own item, last one wins
        let volumes = [
            (header.has_low_volume(), 4),
            (header.has_medium_volume(), 64),
            (header.has_high_volume(), 256),
        ];
        for (_, block_size) in volumes.into_iter().filter(|(present, _)| *present) {
            let i = cur.take(1, "block count")?;
            body.block_count = buf[i];
            body.block_size = block_size;
            body.video_block_length = body.block_count as usize * block_size;
            let i = cur.take(body.video_block_length, "video blocks")?;
            body.cells = buf[i..i + body.video_block_length].to_vec();
        }

        if header.has_time_of_day() {
            let i = cur.take(3, "time of day")?;
            let raw = read_u24(buf, i);
            body.time_of_day = Some(raw);
            body.time_of_day_seconds = Some(raw / TIME_OF_DAY_TICKS);
        }

        if cur.offset != buf.len() {
            log::trace!(
                "{} trailing octets after CAT240 record",
                buf.len() - cur.offset
            );
        }

        Ok(body)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type.and_then(MessageType::from_u8)
    }

    pub fn duration_unit(&self) -> Option<f64> {
        self.duration_unit.map(|u| u.seconds())
    }

    /// Bits actually used per cell, whole bytes for unknown resolutions.
    fn access_bits(&self) -> usize {
        match self.video_resolution {
            1 | 2 | 4 | 8 | 16 | 32 => self.video_resolution as usize,
            _ => 8,
        }
    }

    /// Number of cells: the valid cell counter when present, bounded by what
    /// the video blocks can hold.
    pub fn cell_count(&self) -> usize {
        let capacity = self.cells.len() * 8 / self.access_bits();
        if self.valid_cells > 0 {
            capacity.min(self.valid_cells as usize)
        } else {
            capacity
        }
    }

    ///
    /// Sample `index` at the message resolution. Cells are packed MSB first,
    /// so cell 0 of a 2 bit message is the top two bits of the first octet.
    ///
    pub fn cell(&self, index: usize) -> Option<u32> {
        let cells = &self.cells;
        match self.video_resolution {
            1 => {
                let byte = index / 8;
                (byte < cells.len()).then(|| read_bit(cells, byte, index % 8) as u32)
            }
            2 => {
                let byte = index / 4;
                (byte < cells.len()).then(|| read_2bits(cells, byte, (index % 4) * 2) as u32)
            }
            4 => {
                let byte = index / 2;
                (byte < cells.len()).then(|| read_4bits(cells, byte, (index % 2) * 4) as u32)
            }
            16 => {
                let byte = index.checked_mul(2)?;
                (byte.checked_add(2)? <= cells.len()).then(|| read_u16(cells, byte) as u32)
            }
            32 => {
                let byte = index.checked_mul(4)?;
                (byte.checked_add(4)? <= cells.len()).then(|| read_u32(cells, byte))
            }
            _ => cells.get(index).map(|b| *b as u32),
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.cell_count()).filter_map(|i| self.cell(i))
    }

    pub fn layout(&self) -> CellLayout {
        CellLayout {
            cell_duration: self.cell_duration,
            duration_unit: self.duration_unit,
            compression: self.compression,
            video_resolution: self.video_resolution,
            valid_bytes: self.valid_bytes,
            valid_cells: self.valid_cells,
            video_block_length: self.video_block_length,
        }
    }

    ///
    /// Whether the cell layout differs from `prior`, so a consumer has to
    /// reconfigure. Always true without a prior message.
    ///
    pub fn is_spec_changed(&self, prior: Option<&Body>) -> bool {
        prior.is_none_or(|p| self.layout() != p.layout())
    }
}

/// The members of a record that determine how its cells are laid out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CellLayout {
    pub cell_duration: u32,
    pub duration_unit: Option<DurationUnit>,
    pub compression: bool,
    pub video_resolution: u32,
    pub valid_bytes: u16,
    pub valid_cells: u32,
    pub video_block_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cat240::testdata::VideoDatagram;

    fn parse(buf: &[u8]) -> Result<Body, DecodeError> {
        let header = Header::parse(buf)?;
        Body::parse(&header, buf, &DecodeOptions::default())
    }

    #[test]
    fn azimuth_round_trip() {
        for v in 0..=u16::MAX {
            let degrees = azimuth_to_degrees(v);
            assert_eq!(degrees, v as f64 * 360. / 65536.);
            let back = degrees_to_azimuth(degrees);
            let diff = (back as i32 - v as i32).abs();
            assert!(diff <= 1, "{} -> {} -> {}", v, degrees, back);
        }
        assert_eq!(degrees_to_azimuth(360.), 0);
        assert_eq!(degrees_to_azimuth(90.), 16384);
    }

    #[test]
    fn resolution_mapping() {
        let expected = [(1u8, 1u32), (2, 2), (3, 4), (4, 8), (5, 16), (6, 32)];
        for (exponent, bits) in expected {
            assert_eq!(resolution_bits(exponent), bits);
        }
        assert_eq!(resolution_bits(0), 0);
        assert_eq!(resolution_bits(7), 0);
    }

    #[test]
    fn cell_access_per_resolution() {
        let payload = vec![0b1100_0000, 0xA5, 0x12, 0x34];
        let cases: [(u8, usize, u32); 10] = [
            (1, 0, 1),
            (1, 2, 0),
            (1, 8, 1), // 0xA5 = 1010_0101
            (2, 0, 3),
            (2, 3, 0),
            (3, 2, 0xA),
            (3, 3, 0x5),
            (4, 1, 0xA5),
            (5, 1, 0x1234),
            (6, 0, 0xC0A51234),
        ];
        for (exponent, index, value) in cases {
            let datagram = VideoDatagram {
                resolution_exponent: exponent,
                volume: 4,
                payload: payload.clone(),
                ..Default::default()
            }
            .encode();
            let body = parse(&datagram).unwrap();
            assert_eq!(body.video_resolution, resolution_bits(exponent));
            assert_eq!(
                body.cell(index),
                Some(value),
                "exponent {} index {}",
                exponent,
                index
            );
        }
    }

    #[test]
    fn cell_access_past_end() {
        let datagram = VideoDatagram {
            resolution_exponent: 5,
            volume: 4,
            payload: vec![1, 2, 3, 4],
            ..Default::default()
        }
        .encode();
        let body = parse(&datagram).unwrap();
        assert_eq!(body.cell(1), Some(0x0304));
        assert_eq!(body.cell(2), None);
        assert_eq!(body.cell(usize::MAX), None);
    }

    #[test]
    fn cell_count_and_iterator() {
        let datagram = VideoDatagram {
            resolution_exponent: 3,
            volume: 4,
            payload: vec![0x12, 0x34, 0x56, 0x78],
            valid_bytes: 3,
            valid_cells: 5,
            ..Default::default()
        }
        .encode();
        let body = parse(&datagram).unwrap();
        assert_eq!(body.cell_count(), 5);
        assert_eq!(body.cells().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn nano_and_femto_headers() {
        let nano = VideoDatagram {
            nano: true,
            cell_duration: 1000,
            start_range: 7,
            ..Default::default()
        }
        .encode();
        let body = parse(&nano).unwrap();
        assert_eq!(body.duration_unit, Some(DurationUnit::Nanoseconds));
        assert_eq!(body.duration_unit(), Some(1e-9));
        assert_eq!(body.cell_duration, 1000);
        assert_eq!(body.start_range, 7);

        let femto = VideoDatagram {
            nano: false,
            ..Default::default()
        }
        .encode();
        let body = parse(&femto).unwrap();
        assert_eq!(body.duration_unit(), Some(1e-15));
    }

    #[test]
    fn time_of_day_truncates() {
        let datagram = VideoDatagram {
            time_of_day: Some(128 * 3600 + 127),
            ..Default::default()
        }
        .encode();
        let body = parse(&datagram).unwrap();
        assert_eq!(body.time_of_day, Some(128 * 3600 + 127));
        assert_eq!(body.time_of_day_seconds, Some(3600));
    }

    #[test]
    fn video_summary() {
        // FRN 1, 2, 4
        let mut buf = vec![0xF0, 0x00, 0x00, 0xD0, 0x00, 0x01, 0x02, 0x01, 0x05];
        buf.extend_from_slice(b"hello");
        let len = buf.len() as u16;
        buf[1..3].copy_from_slice(&len.to_be_bytes());

        let header = Header::parse(&buf).unwrap();
        assert!(header.is_video_summary());
        let body = Body::parse(&header, &buf, &DecodeOptions::default()).unwrap();
        assert_eq!(body.data_source, Some(DataSource { sac: 1, sic: 2 }));
        assert_eq!(body.message_type(), Some(MessageType::VideoSummary));
        assert_eq!(body.summary.as_deref(), Some("hello"));
        assert!(body.cells.is_empty());
        assert_eq!(body.duration_unit, None);
    }

    #[test]
    fn duplicate_items_stay_aligned() {
        // FRN 1, 5, 6, 10, 11, 13: not a valid layout, but every item is there
        let mut buf = vec![0xF0, 0x00, 0x00, 0x8C, 0x68, 0x01, 0x02];
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0, 0, 0, 3, 0, 0, 0, 4]);
        buf.extend_from_slice(&[0x00, 0x10, 0x00, 0x20, 0, 0, 0, 0x30, 0, 0, 0, 0x40]);
        buf.extend_from_slice(&[1, 1, 2, 3, 4]);
        buf.push(1);
        buf.extend_from_slice(&[9; 64]);
        buf.extend_from_slice(&[0x00, 0x01, 0x00]);
        let len = buf.len() as u16;
        buf[1..3].copy_from_slice(&len.to_be_bytes());

        let header = Header::parse(&buf).unwrap();
        assert!(!header.is_valid());
        assert_eq!(header.block_size(), Some(64));

        let body = parse(&buf).unwrap();
        assert_eq!(body.data_source, Some(DataSource { sac: 1, sic: 2 }));
        assert_eq!(body.duration_unit, Some(DurationUnit::Femtoseconds));
        assert_eq!(body.start_azimuth, 0x10);
        assert_eq!(body.end_azimuth, 0x20);
        assert_eq!(body.start_range, 0x30);
        assert_eq!(body.cell_duration, 0x40);
        assert_eq!(body.block_count, 1);
        assert_eq!(body.block_size, 64);
        assert_eq!(body.cells, vec![9; 64]);
        assert_eq!(body.time_of_day, Some(256));
        assert_eq!(body.time_of_day_seconds, Some(2));
    }

    #[test]
    fn truncated_blocks() {
        let mut datagram = VideoDatagram {
            volume: 64,
            payload: vec![0; 128],
            ..Default::default()
        }
        .encode();
        datagram.truncate(datagram.len() - 10);
        match parse(&datagram) {
            Err(DecodeError::Truncated { field, needed, .. }) => {
                assert_eq!(field, "video blocks");
                assert_eq!(needed, 128);
            }
            r => panic!("Unexpected {:?}", r),
        }
    }

    #[test]
    fn truncated_summary() {
        let buf = vec![0xF0, 0x00, 0x0A, 0xD0, 0x00, 0x01, 0x02, 0x01, 0x05, b'h'];
        assert!(matches!(
            parse(&buf),
            Err(DecodeError::Truncated {
                field: "summary",
                ..
            })
        ));
    }

    #[test]
    fn invalid_resolution() {
        let datagram = VideoDatagram {
            resolution_exponent: 9,
            payload: vec![0x10, 0x20, 0x30, 0x40],
            volume: 4,
            ..Default::default()
        }
        .encode();
        assert!(matches!(
            parse(&datagram),
            Err(DecodeError::InvalidResolution(9))
        ));

        let header = Header::parse(&datagram).unwrap();
        let body = Body::parse(&header, &datagram, &DecodeOptions { lenient: true }).unwrap();
        assert_eq!(body.video_resolution, 0);
        assert_eq!(body.cell(2), Some(0x30));
        assert_eq!(body.cell_count(), 4);
    }

    #[test]
    fn spec_change() {
        let base = VideoDatagram {
            start_azimuth: 0,
            end_azimuth: 100,
            ..Default::default()
        };
        let a = parse(&base.encode()).unwrap();
        assert!(a.is_spec_changed(None));

        let moved = VideoDatagram {
            start_azimuth: 100,
            end_azimuth: 200,
            ..base.clone()
        };
        let b = parse(&moved.encode()).unwrap();
        assert!(!b.is_spec_changed(Some(&a)));

        let finer = VideoDatagram {
            resolution_exponent: 3,
            ..base.clone()
        };
        let c = parse(&finer.encode()).unwrap();
        assert!(c.is_spec_changed(Some(&a)));

        let femto = VideoDatagram {
            nano: !base.nano,
            ..base.clone()
        };
        let d = parse(&femto.encode()).unwrap();
        assert!(d.is_spec_changed(Some(&a)));
    }
}
