use bitflags::bitflags;
use serde::{Serialize, Serializer};

use super::DecodeError;
use super::bits::read_u16;

pub const CAT240: u8 = 0xF0;
pub const HEADER_LENGTH: usize = 5;

bitflags! {
    /// The two octet FSPEC, FRN1 in the most significant bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldSpec: u16 {
        /// FRN1, I240/010 SAC/SIC
        const DATA_SOURCE = 1 << 15;
        /// FRN2, I240/000
        const MESSAGE_TYPE = 1 << 14;
        /// FRN3, I240/020 message index
        const RECORD_HEADER = 1 << 13;
        /// FRN4, I240/030
        const SUMMARY = 1 << 12;
        /// FRN5, I240/040 cell duration in nanoseconds
        const HEADER_NANO = 1 << 11;
        /// FRN6, I240/041 cell duration in femtoseconds
        const HEADER_FEMTO = 1 << 10;
        /// FRN7, I240/048
        const RESOLUTION = 1 << 9;
        /// FRN8, field extension
        const EXTEND_1 = 1 << 8;
        /// FRN9, I240/049 valid octets and cells
        const COUNTERS = 1 << 7;
        /// FRN10, I240/050 blocks of 4 octets
        const BLOCK_LOW = 1 << 6;
        /// FRN11, I240/051 blocks of 64 octets
        const BLOCK_MEDIUM = 1 << 5;
        /// FRN12, I240/052 blocks of 256 octets
        const BLOCK_HIGH = 1 << 4;
        /// FRN13, I240/140
        const TIME_OF_DAY = 1 << 3;
        /// FRN14, reserved expansion indicator
        const RESERVED_EXPANSION = 1 << 2;
        /// FRN15, special purpose indicator
        const SPECIAL_PURPOSE = 1 << 1;
        /// FRN16, field extension
        const EXTEND_2 = 1;
    }
}

const VIDEO_MANDATORY: FieldSpec = FieldSpec::DATA_SOURCE
    .union(FieldSpec::MESSAGE_TYPE)
    .union(FieldSpec::RECORD_HEADER)
    .union(FieldSpec::RESOLUTION)
    .union(FieldSpec::COUNTERS);

const SUMMARY_MANDATORY: FieldSpec = FieldSpec::DATA_SOURCE
    .union(FieldSpec::MESSAGE_TYPE)
    .union(FieldSpec::SUMMARY);

const SUMMARY_FORBIDDEN: FieldSpec = FieldSpec::RECORD_HEADER
    .union(FieldSpec::HEADER_NANO)
    .union(FieldSpec::HEADER_FEMTO)
    .union(FieldSpec::RESOLUTION)
    .union(FieldSpec::COUNTERS)
    .union(FieldSpec::BLOCK_LOW)
    .union(FieldSpec::BLOCK_MEDIUM)
    .union(FieldSpec::BLOCK_HIGH);

const VOLUME_CLASSES: [FieldSpec; 3] = [
    FieldSpec::BLOCK_LOW,
    FieldSpec::BLOCK_MEDIUM,
    FieldSpec::BLOCK_HIGH,
];

impl FieldSpec {
    /// Presence of field reference number `frn` (1..=16).
    pub fn frn(&self, frn: usize) -> bool {
        match frn {
            1..=16 => self.bits() & (1 << (16 - frn)) != 0,
            _ => false,
        }
    }

    /// The 16 flags in FRN order.
    pub fn flags(&self) -> [bool; 16] {
        let mut flags = [false; 16];
        for (i, flag) in flags.iter_mut().enumerate() {
            *flag = self.frn(i + 1);
        }
        flags
    }

    pub fn is_video_message(&self) -> bool {
        let time_units = [FieldSpec::HEADER_NANO, FieldSpec::HEADER_FEMTO];

        self.contains(VIDEO_MANDATORY)
            && !self.contains(FieldSpec::SUMMARY)
            && time_units.iter().filter(|f| self.contains(**f)).count() == 1
            && VOLUME_CLASSES.iter().filter(|f| self.contains(**f)).count() == 1
    }

    pub fn is_video_summary(&self) -> bool {
        self.contains(SUMMARY_MANDATORY) && !self.intersects(SUMMARY_FORBIDDEN)
    }

    pub fn is_valid(&self) -> bool {
        self.is_video_message() || self.is_video_summary()
    }

    /// Octets per video block. With more than one volume class flag set the
    /// highest one is the block item decoded last, and so the one kept.
    pub fn block_size(&self) -> Option<usize> {
        if self.contains(FieldSpec::BLOCK_HIGH) {
            Some(256)
        } else if self.contains(FieldSpec::BLOCK_MEDIUM) {
            Some(64)
        } else if self.contains(FieldSpec::BLOCK_LOW) {
            Some(4)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub category: u8,
    pub length: u16,
    #[serde(serialize_with = "serialize_field_spec")]
    pub field_spec: FieldSpec,
    valid: bool,
}

fn serialize_field_spec<S>(field_spec: &FieldSpec, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u16(field_spec.bits())
}

impl Header {
    ///
    /// Parse the fixed preamble. A category other than 240 is logged but the
    /// header is still returned; the decoder decides whether to reject it.
    ///
    pub fn parse(buf: &[u8]) -> Result<Header, DecodeError> {
        if buf.len() < HEADER_LENGTH {
            return Err(DecodeError::TooShort(buf.len()));
        }

        let category = buf[0];
        let length = read_u16(buf, 1);
        let field_spec = FieldSpec::from_bits_retain(read_u16(buf, 3));

        if category != CAT240 {
            log::warn!(
                "Category {} (0x{:02X}) is not CAT240, length {} fspec {:04X}",
                category,
                category,
                length,
                field_spec.bits()
            );
        }

        Ok(Header {
            category,
            length,
            field_spec,
            valid: field_spec.is_valid(),
        })
    }

    pub fn is_category_valid(&self) -> bool {
        self.category == CAT240
    }

    /// True when the field specification matches the video message or the
    /// video summary layout.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_video_message(&self) -> bool {
        self.field_spec.is_video_message()
    }

    pub fn is_video_summary(&self) -> bool {
        self.field_spec.is_video_summary()
    }

    pub fn has_data_source(&self) -> bool {
        self.field_spec.contains(FieldSpec::DATA_SOURCE)
    }

    pub fn has_message_type(&self) -> bool {
        self.field_spec.contains(FieldSpec::MESSAGE_TYPE)
    }

    pub fn has_record_header(&self) -> bool {
        self.field_spec.contains(FieldSpec::RECORD_HEADER)
    }

    pub fn has_summary(&self) -> bool {
        self.field_spec.contains(FieldSpec::SUMMARY)
    }

    pub fn has_nano_header(&self) -> bool {
        self.field_spec.contains(FieldSpec::HEADER_NANO)
    }

    pub fn has_femto_header(&self) -> bool {
        self.field_spec.contains(FieldSpec::HEADER_FEMTO)
    }

    pub fn has_video_header(&self) -> bool {
        self.has_nano_header() || self.has_femto_header()
    }

    pub fn has_resolution(&self) -> bool {
        self.field_spec.contains(FieldSpec::RESOLUTION)
    }

    pub fn has_counters(&self) -> bool {
        self.field_spec.contains(FieldSpec::COUNTERS)
    }

    pub fn has_low_volume(&self) -> bool {
        self.field_spec.contains(FieldSpec::BLOCK_LOW)
    }

    pub fn has_medium_volume(&self) -> bool {
        self.field_spec.contains(FieldSpec::BLOCK_MEDIUM)
    }

    pub fn has_high_volume(&self) -> bool {
        self.field_spec.contains(FieldSpec::BLOCK_HIGH)
    }

    pub fn has_video_blocks(&self) -> bool {
        self.field_spec.block_size().is_some()
    }

    pub fn has_time_of_day(&self) -> bool {
        self.field_spec.contains(FieldSpec::TIME_OF_DAY)
    }

    pub fn block_size(&self) -> Option<usize> {
        self.field_spec.block_size()
    }
}
