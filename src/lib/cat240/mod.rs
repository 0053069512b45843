//! ASTERIX category 240, radar video transmission.
//!
//! Every UDP datagram carries exactly one data block holding one record:
//! a five octet preamble (category, length, two octet FSPEC) followed by the
//! fields whose FRN flag is set, in FRN order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bits;
pub mod body;
pub mod header;

pub use body::{
    Body, CellLayout, DataSource, DurationUnit, MessageType, azimuth_to_degrees,
    degrees_to_azimuth,
};
pub use header::{CAT240, FieldSpec, HEADER_LENGTH, Header};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Datagram of {0} octets is shorter than the CAT240 header")]
    TooShort(usize),
    #[error("Datagram truncated in {field} at offset {offset}: need {needed} octets, have {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Category {0} is not CAT240")]
    InvalidCategory(u8),
    #[error("Video resolution exponent {0} is not in 1..=6")]
    InvalidResolution(u8),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Accept a wrong category octet and out of range resolution exponents,
    /// for senders that do not conform.
    pub lenient: bool,
}

/// One decoded datagram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cat240Message {
    pub header: Header,
    pub body: Body,
}

impl Cat240Message {
    ///
    /// Decode one datagram. Nothing is returned for a datagram that is
    /// shorter than the fields it announces.
    ///
    pub fn decode(buf: &[u8], options: &DecodeOptions) -> Result<Cat240Message, DecodeError> {
        let header = Header::parse(buf)?;

        if !header.is_category_valid() && !options.lenient {
            return Err(DecodeError::InvalidCategory(header.category));
        }
        if header.length as usize != buf.len() {
            log::trace!(
                "CAT240 block length {} but datagram has {} octets",
                header.length,
                buf.len()
            );
        }

        let body = Body::parse(&header, buf, options)?;

        Ok(Cat240Message { header, body })
    }

    pub fn is_valid(&self) -> bool {
        self.header.is_valid()
    }

    pub fn cell(&self, index: usize) -> Option<u32> {
        self.body.cell(index)
    }

    pub fn is_spec_changed(&self, prior: Option<&Cat240Message>) -> bool {
        self.body.is_spec_changed(prior.map(|p| &p.body))
    }
}

///
/// Remembers the cell layout of the previous message of one source, so a
/// consumer can skip reconfiguration when nothing structural changed.
/// Owned by whoever consumes the messages; one tracker per source.
///
#[derive(Debug, Default)]
pub struct SpecTracker {
    previous: Option<CellLayout>,
}

impl SpecTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare with the previous message and remember this one.
    pub fn observe(&mut self, message: &Cat240Message) -> bool {
        let layout = message.body.layout();
        let changed = self.previous != Some(layout);
        self.previous = Some(layout);
        changed
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}


#[cfg(test)]
mod tests {
    use super::testdata::VideoDatagram;
    use super::*;

    #[test]
    fn decode_video_message() {
        let payload: Vec<u8> = (0..128u32).map(|i| ((i * 3 + 7) % 256) as u8).collect();
        let datagram = VideoDatagram {
            message_index: 42,
            start_azimuth: 0,
            end_azimuth: 100,
            resolution_exponent: 4,
            volume: 64,
            payload: payload.clone(),
            valid_bytes: 128,
            valid_cells: 128,
            ..Default::default()
        }
        .encode();
        // FRN 1, 2, 3, 6, 7, 9, 11
        assert_eq!(&datagram[3..5], &[0xE6, 0xA0]);

        let message = Cat240Message::decode(&datagram, &DecodeOptions::default()).unwrap();
        assert!(message.is_valid());
        assert!(message.header.is_video_message());
        assert_eq!(message.header.length as usize, datagram.len());

        let body = &message.body;
        assert_eq!(body.data_source, Some(DataSource { sac: 1, sic: 2 }));
        assert_eq!(body.message_type(), Some(MessageType::Video));
        assert_eq!(body.message_index, Some(42));
        assert_eq!(body.video_resolution, 8);
        assert_eq!(body.start_azimuth_in_degree, 0.0);
        assert_eq!(body.end_azimuth, 100);
        assert_eq!(body.end_azimuth_in_degree, 100. * 360. / 65536.);
        assert_eq!(body.duration_unit, Some(DurationUnit::Femtoseconds));
        assert_eq!(body.block_count, 2);
        assert_eq!(body.block_size, 64);
        assert_eq!(body.video_block_length, 128);
        assert_eq!(body.cells, payload);
        assert_eq!(message.cell(0), Some(payload[0] as u32));
        assert_eq!(message.cell(127), Some(payload[127] as u32));
        assert_eq!(message.cell(128), None);
        assert_eq!(body.time_of_day, None);
    }

    #[test]
    fn decode_is_idempotent() {
        let datagram = VideoDatagram {
            payload: (0..=255).collect(),
            volume: 256,
            time_of_day: Some(0x123456),
            ..Default::default()
        }
        .encode();
        let a = Cat240Message::decode(&datagram, &DecodeOptions::default()).unwrap();
        let b = Cat240Message::decode(&datagram, &DecodeOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_category() {
        let datagram = VideoDatagram {
            category: 0x30,
            ..Default::default()
        }
        .encode();
        assert_eq!(
            Cat240Message::decode(&datagram, &DecodeOptions::default()),
            Err(DecodeError::InvalidCategory(0x30))
        );
        let message = Cat240Message::decode(&datagram, &DecodeOptions { lenient: true }).unwrap();
        assert!(!message.header.is_category_valid());
        assert_eq!(message.body.video_resolution, 8);
    }

    #[test]
    fn too_short() {
        assert_eq!(
            Cat240Message::decode(&[0xF0, 0x00, 0x04, 0xE6], &DecodeOptions::default()),
            Err(DecodeError::TooShort(4))
        );
        assert_eq!(
            Cat240Message::decode(&[], &DecodeOptions::default()),
            Err(DecodeError::TooShort(0))
        );
    }

    #[test]
    fn invalid_spec_still_decodes() {
        // FRN 1, 2 only: neither layout, but both fields are there
        let datagram = [0xF0, 0x00, 0x08, 0xC0, 0x00, 0x07, 0x08, 0x02];
        let message = Cat240Message::decode(&datagram, &DecodeOptions::default()).unwrap();
        assert!(!message.is_valid());
        assert_eq!(
            message.body.data_source,
            Some(DataSource { sac: 7, sic: 8 })
        );
        assert_eq!(message.body.message_type(), Some(MessageType::Video));
    }

    #[test]
    fn spec_tracker() {
        let base = VideoDatagram::default();
        let options = DecodeOptions::default();
        let first = Cat240Message::decode(&base.encode(), &options).unwrap();
        let rotated = Cat240Message::decode(
            &VideoDatagram {
                start_azimuth: 500,
                end_azimuth: 600,
                ..base.clone()
            }
            .encode(),
            &options,
        )
        .unwrap();
        let coarser = Cat240Message::decode(
            &VideoDatagram {
                resolution_exponent: 2,
                ..base.clone()
            }
            .encode(),
            &options,
        )
        .unwrap();

        let mut tracker = SpecTracker::new();
        assert!(tracker.observe(&first));
        assert!(!tracker.observe(&rotated));
        assert!(tracker.observe(&coarser));
        assert!(!tracker.observe(&coarser));
        tracker.reset();
        assert!(tracker.observe(&coarser));

        assert!(!rotated.is_spec_changed(Some(&first)));
        assert!(coarser.is_spec_changed(Some(&first)));
    }
}
