//! Width- and signedness-aware enum values.
//!
//! An [`EnumValue`] is a tag ([`IntegerKind`]) plus the value's bits, masked to the
//! kind's width. Ordering, increments, bit unions and the CIL stack representation all
//! go through the tag, so a `uint8` 255 and an `int8` -1 never compare equal by accident.

use std::{cmp::Ordering, fmt};

use crate::{assembly::Instruction, metadata::signatures::TypeSignature};

/// The integer representation underlying an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegerKind {
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
}

impl IntegerKind {
    /// Maps an element type to its integer kind. `bool` and `char` are not enum-capable
    /// here.
    #[must_use]
    pub fn from_signature(signature: &TypeSignature) -> Option<Self> {
        Some(match signature {
            TypeSignature::I1 => IntegerKind::I1,
            TypeSignature::U1 => IntegerKind::U1,
            TypeSignature::I2 => IntegerKind::I2,
            TypeSignature::U2 => IntegerKind::U2,
            TypeSignature::I4 => IntegerKind::I4,
            TypeSignature::U4 => IntegerKind::U4,
            TypeSignature::I8 => IntegerKind::I8,
            TypeSignature::U8 => IntegerKind::U8,
            _ => return None,
        })
    }

    /// The element type of this kind.
    #[must_use]
    pub fn signature(self) -> TypeSignature {
        match self {
            IntegerKind::I1 => TypeSignature::I1,
            IntegerKind::U1 => TypeSignature::U1,
            IntegerKind::I2 => TypeSignature::I2,
            IntegerKind::U2 => TypeSignature::U2,
            IntegerKind::I4 => TypeSignature::I4,
            IntegerKind::U4 => TypeSignature::U4,
            IntegerKind::I8 => TypeSignature::I8,
            IntegerKind::U8 => TypeSignature::U8,
        }
    }

    /// Width in bytes.
    #[must_use]
    pub fn width(self) -> u32 {
        match self {
            IntegerKind::I1 | IntegerKind::U1 => 1,
            IntegerKind::I2 | IntegerKind::U2 => 2,
            IntegerKind::I4 | IntegerKind::U4 => 4,
            IntegerKind::I8 | IntegerKind::U8 => 8,
        }
    }

    /// Width in bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.width() * 8
    }

    /// Returns `true` for signed kinds.
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntegerKind::I1 | IntegerKind::I2 | IntegerKind::I4 | IntegerKind::I8
        )
    }

    /// Returns `true` if values live on the CIL stack as `int64` rather than `int32`.
    #[must_use]
    pub fn is_wide(self) -> bool {
        self.width() == 8
    }

    /// Mask of all bits of this width.
    #[must_use]
    pub fn mask(self) -> u64 {
        if self.bits() == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits()) - 1
        }
    }
}

/// A tagged enum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumValue {
    kind: IntegerKind,
    raw: u64,
}

impl EnumValue {
    /// Creates a value from raw bits, truncated to the width of `kind`.
    #[must_use]
    pub fn from_bits(kind: IntegerKind, raw: u64) -> Self {
        EnumValue {
            kind,
            raw: raw & kind.mask(),
        }
    }

    /// Creates a value from a signed integer, truncated (two's complement) to `kind`.
    #[must_use]
    pub fn from_i64(kind: IntegerKind, value: i64) -> Self {
        Self::from_bits(kind, value as u64)
    }

    /// Smallest value of `kind`.
    #[must_use]
    pub fn min(kind: IntegerKind) -> Self {
        if kind.is_signed() {
            Self::from_bits(kind, 1u64 << (kind.bits() - 1))
        } else {
            Self::from_bits(kind, 0)
        }
    }

    /// Largest value of `kind`.
    #[must_use]
    pub fn max(kind: IntegerKind) -> Self {
        if kind.is_signed() {
            Self::from_bits(kind, kind.mask() >> 1)
        } else {
            Self::from_bits(kind, kind.mask())
        }
    }

    /// The integer kind.
    #[must_use]
    pub fn kind(&self) -> IntegerKind {
        self.kind
    }

    /// The bits of the value, zero-extended.
    #[must_use]
    pub fn bits(&self) -> u64 {
        self.raw
    }

    /// The mathematical value.
    #[must_use]
    pub fn as_i128(&self) -> i128 {
        if self.kind.is_signed() {
            let shift = 128 - self.kind.bits();
            (i128::from(self.raw) << shift) >> shift
        } else {
            i128::from(self.raw)
        }
    }

    /// Returns `true` for zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    /// Returns `true` if exactly one bit is set.
    #[must_use]
    pub fn is_single_bit(&self) -> bool {
        self.raw.count_ones() == 1
    }

    /// The next larger value, `None` at the maximum.
    #[must_use]
    pub fn checked_next(&self) -> Option<Self> {
        (*self != Self::max(self.kind)).then(|| Self::from_bits(self.kind, self.raw.wrapping_add(1)))
    }

    /// The next smaller value, `None` at the minimum.
    #[must_use]
    pub fn checked_prev(&self) -> Option<Self> {
        (*self != Self::min(self.kind)).then(|| Self::from_bits(self.kind, self.raw.wrapping_sub(1)))
    }

    /// Bitwise union.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::from_bits(self.kind, self.raw | other.raw)
    }

    /// Distance from `base` up to `self`. `self` must not be smaller than `base`.
    #[must_use]
    pub fn offset_from(&self, base: &Self) -> u64 {
        (self.as_i128() - base.as_i128()) as u64
    }

    /// The `int32` stack representation: sign-extended for signed kinds, zero-extended
    /// for unsigned kinds, bit-reinterpreted for `uint32`.
    #[must_use]
    pub fn stack_i32(&self) -> i32 {
        self.as_i128() as i32
    }

    /// The `int64` stack representation of a wide value.
    #[must_use]
    pub fn stack_i64(&self) -> i64 {
        self.raw as i64
    }

    /// Reads a value back from its stack representation.
    #[must_use]
    pub fn from_stack(kind: IntegerKind, value: i64) -> Self {
        Self::from_i64(kind, value)
    }

    /// The `ldc.i4` or `ldc.i8` that pushes this value.
    #[must_use]
    pub fn load(&self) -> Instruction {
        if self.kind.is_wide() {
            Instruction::ldc_i8(self.stack_i64())
        } else {
            Instruction::ldc_i4(self.stack_i32())
        }
    }
}

impl PartialOrd for EnumValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EnumValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_i128().cmp(&other.as_i128())
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i128())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_ordering_and_display() {
        let minus_one = EnumValue::from_i64(IntegerKind::I1, -1);
        let one = EnumValue::from_i64(IntegerKind::I1, 1);
        assert!(minus_one < one);
        assert_eq!(minus_one.bits(), 0xFF);
        assert_eq!(minus_one.to_string(), "-1");

        let big = EnumValue::from_i64(IntegerKind::U1, -1);
        assert!(big > EnumValue::from_i64(IntegerKind::U1, 1));
        assert_eq!(big.to_string(), "255");
    }

    #[test]
    fn test_bounds() {
        assert_eq!(EnumValue::min(IntegerKind::I2).as_i128(), i128::from(i16::MIN));
        assert_eq!(EnumValue::max(IntegerKind::U8).as_i128(), i128::from(u64::MAX));
        assert_eq!(EnumValue::max(IntegerKind::I8).checked_next(), None);
        assert_eq!(EnumValue::min(IntegerKind::U4).checked_prev(), None);
        assert_eq!(
            EnumValue::max(IntegerKind::I1).checked_prev(),
            Some(EnumValue::from_i64(IntegerKind::I1, 126))
        );
    }

    #[test]
    fn test_stack_representation() {
        let value = EnumValue::from_i64(IntegerKind::U4, 0xFFFF_FFFF);
        assert_eq!(value.stack_i32(), -1);
        assert_eq!(EnumValue::from_stack(IntegerKind::U4, -1), value);
        assert_eq!(EnumValue::from_i64(IntegerKind::U2, 65535).stack_i32(), 65535);
        assert_eq!(EnumValue::from_i64(IntegerKind::I2, -2).stack_i32(), -2);
        assert_eq!(EnumValue::from_i64(IntegerKind::U8, -1).stack_i64(), -1);
        assert_eq!(
            EnumValue::from_i64(IntegerKind::I8, -5).load(),
            Instruction::ldc_i8(-5)
        );
    }

    #[test]
    fn test_offsets_and_union() {
        let low = EnumValue::from_i64(IntegerKind::I4, -3);
        let high = EnumValue::from_i64(IntegerKind::I4, 4);
        assert_eq!(high.offset_from(&low), 7);
        let a = EnumValue::from_i64(IntegerKind::U1, 1);
        let c = EnumValue::from_i64(IntegerKind::U1, 4);
        assert_eq!(a.union(&c).bits(), 5);
        assert!(c.is_single_bit());
        assert!(!a.union(&c).is_single_bit());
    }
}
