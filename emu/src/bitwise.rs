use std::ops::RangeInclusive;

/// Bit helpers for the 32-bit system registers.
/// Indexes go from lsb to msb (right to left).
pub trait Bits: Copy {
    fn get_bit(self, bit_idx: u8) -> bool;

    fn set_bit(&mut self, bit_idx: u8, value: bool);

    /// Extracts `bits_range` and moves it to bit 0.
    fn get_bits(self, bits_range: RangeInclusive<u8>) -> Self;

    /// Deposits the low bits of `value` into `bits_range`.
    fn set_bits(&mut self, bits_range: RangeInclusive<u8>, value: Self);

    #[must_use]
    fn with_bit(mut self, bit_idx: u8, value: bool) -> Self {
        self.set_bit(bit_idx, value);
        self
    }
}

const fn field_mask(start: u8, end: u8) -> u32 {
    let length = end - start + 1;
    if length >= 32 {
        u32::MAX
    } else {
        ((1_u32 << length) - 1) << start
    }
}

impl Bits for u32 {
    fn get_bit(self, bit_idx: u8) -> bool {
        debug_assert!(bit_idx < 32);
        (self >> bit_idx) & 1 == 1
    }

    fn set_bit(&mut self, bit_idx: u8, value: bool) {
        debug_assert!(bit_idx < 32);
        if value {
            *self |= 1 << bit_idx;
        } else {
            *self &= !(1 << bit_idx);
        }
    }

    fn get_bits(self, bits_range: RangeInclusive<u8>) -> Self {
        let (start, end) = (*bits_range.start(), *bits_range.end());
        debug_assert!(start <= end && end < 32);
        (self & field_mask(start, end)) >> start
    }

    fn set_bits(&mut self, bits_range: RangeInclusive<u8>, value: Self) {
        let (start, end) = (*bits_range.start(), *bits_range.end());
        debug_assert!(start <= end && end < 32);
        let mask = field_mask(start, end);
        *self = (*self & !mask) | ((value << start) & mask);
    }
}

/// Splits a double-precision register into its (low, high) words.
pub const fn split_u64(value: u64) -> (u32, u32) {
    (value as u32, (value >> 32) as u32)
}

pub const fn join_u64(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}
