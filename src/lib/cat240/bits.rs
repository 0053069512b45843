//! Big-endian extraction primitives used on the decode hot path.
//!
//! Bit offsets count from the most significant bit of a byte, so offset 0
//! is bit 7 in the usual LSB-numbering. Callers guarantee the buffer is long
//! enough; indexing past the end panics.

#[inline]
fn sub_byte(byte: u8, bit_offset: usize, width: usize) -> u8 {
    debug_assert!(bit_offset + width <= 8);
    let mask = ((1u16 << width) - 1) as u8;
    (byte >> (8 - bit_offset - width)) & mask
}

/// One bit at `bit_offset` (0..=7) of `buf[index]`.
#[inline]
pub fn read_bit(buf: &[u8], index: usize, bit_offset: usize) -> u8 {
    sub_byte(buf[index], bit_offset, 1)
}

/// Two bits starting at `bit_offset` (0, 2, 4 or 6 for aligned cells).
#[inline]
pub fn read_2bits(buf: &[u8], index: usize, bit_offset: usize) -> u8 {
    sub_byte(buf[index], bit_offset, 2)
}

/// A nibble starting at `bit_offset` (0 = high nibble, 4 = low nibble).
#[inline]
pub fn read_4bits(buf: &[u8], index: usize, bit_offset: usize) -> u8 {
    sub_byte(buf[index], bit_offset, 4)
}

#[inline]
pub fn read_u16(buf: &[u8], index: usize) -> u16 {
    u16::from_be_bytes([buf[index], buf[index + 1]])
}

#[inline]
pub fn read_u24(buf: &[u8], index: usize) -> u32 {
    u32::from_be_bytes([0, buf[index], buf[index + 1], buf[index + 2]])
}

#[inline]
pub fn read_u32(buf: &[u8], index: usize) -> u32 {
    u32::from_be_bytes([buf[index], buf[index + 1], buf[index + 2], buf[index + 3]])
}
