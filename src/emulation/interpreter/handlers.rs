//! Value-level instruction semantics.
//!
//! Pure functions over [`EmValue`] operands. Control flow and frame access live in the
//! interpreter; everything here maps input values to an output value or a fault.

use crate::{assembly::OpCode, emulation::EmValue, Error, Result};

fn fault(message: impl Into<String>) -> Error {
    Error::Emulation(message.into())
}

/// Executes a binary arithmetic or bitwise instruction.
///
/// # Errors
/// Returns [`Error::Emulation`] for mixed operand widths, division by zero or
/// overflowing division.
pub fn binary(opcode: OpCode, left: &EmValue, right: &EmValue) -> Result<EmValue> {
    if matches!(opcode, OpCode::Shl | OpCode::Shr | OpCode::ShrUn) {
        return shift(opcode, left, right.as_i32()?);
    }
    match (left, right) {
        (EmValue::I32(a), EmValue::I32(b)) => {
            let (a, b) = (*a, *b);
            let value = match opcode {
                OpCode::Add => a.wrapping_add(b),
                OpCode::Sub => a.wrapping_sub(b),
                OpCode::Mul => a.wrapping_mul(b),
                OpCode::Div => a.checked_div(b).ok_or_else(|| fault("arithmetic fault in div"))?,
                OpCode::Rem => a.checked_rem(b).ok_or_else(|| fault("arithmetic fault in rem"))?,
                OpCode::And => a & b,
                OpCode::Or => a | b,
                OpCode::Xor => a ^ b,
                other => return Err(fault(format!("{} is not binary", other.mnemonic()))),
            };
            Ok(EmValue::I32(value))
        }
        (EmValue::I64(a), EmValue::I64(b)) => {
            let (a, b) = (*a, *b);
            let value = match opcode {
                OpCode::Add => a.wrapping_add(b),
                OpCode::Sub => a.wrapping_sub(b),
                OpCode::Mul => a.wrapping_mul(b),
                OpCode::Div => a.checked_div(b).ok_or_else(|| fault("arithmetic fault in div"))?,
                OpCode::Rem => a.checked_rem(b).ok_or_else(|| fault("arithmetic fault in rem"))?,
                OpCode::And => a & b,
                OpCode::Or => a | b,
                OpCode::Xor => a ^ b,
                other => return Err(fault(format!("{} is not binary", other.mnemonic()))),
            };
            Ok(EmValue::I64(value))
        }
        _ => Err(fault(format!(
            "{} operands {left} and {right} have different types",
            opcode.mnemonic()
        ))),
    }
}

fn shift(opcode: OpCode, value: &EmValue, amount: i32) -> Result<EmValue> {
    let amount = amount as u32;
    match value {
        EmValue::I32(v) => Ok(EmValue::I32(match opcode {
            OpCode::Shl => v.wrapping_shl(amount),
            OpCode::Shr => v.wrapping_shr(amount),
            _ => (*v as u32).wrapping_shr(amount) as i32,
        })),
        EmValue::I64(v) => Ok(EmValue::I64(match opcode {
            OpCode::Shl => v.wrapping_shl(amount),
            OpCode::Shr => v.wrapping_shr(amount),
            _ => (*v as u64).wrapping_shr(amount) as i64,
        })),
        other => Err(fault(format!("cannot shift {other}"))),
    }
}

/// Executes `neg` or `not`.
///
/// # Errors
/// Returns [`Error::Emulation`] for non-integer operands.
pub fn unary(opcode: OpCode, value: &EmValue) -> Result<EmValue> {
    match (opcode, value) {
        (OpCode::Neg, EmValue::I32(v)) => Ok(EmValue::I32(v.wrapping_neg())),
        (OpCode::Neg, EmValue::I64(v)) => Ok(EmValue::I64(v.wrapping_neg())),
        (OpCode::Not, EmValue::I32(v)) => Ok(EmValue::I32(!v)),
        (OpCode::Not, EmValue::I64(v)) => Ok(EmValue::I64(!v)),
        _ => Err(fault(format!("cannot apply {} to {value}", opcode.mnemonic()))),
    }
}

/// Executes a `conv.*` instruction.
///
/// # Errors
/// Returns [`Error::Emulation`] for non-integer operands.
pub fn convert(opcode: OpCode, value: &EmValue) -> Result<EmValue> {
    let (wide, narrow) = match value {
        EmValue::I32(v) => (i64::from(*v), *v),
        EmValue::I64(v) => (*v, *v as i32),
        other => return Err(fault(format!("cannot convert {other}"))),
    };
    let converted = match opcode {
        OpCode::ConvI1 => EmValue::I32(i32::from(narrow as i8)),
        OpCode::ConvU1 => EmValue::I32(i32::from(narrow as u8)),
        OpCode::ConvI2 => EmValue::I32(i32::from(narrow as i16)),
        OpCode::ConvU2 => EmValue::I32(i32::from(narrow as u16)),
        OpCode::ConvI4 | OpCode::ConvU4 => EmValue::I32(narrow),
        OpCode::ConvI8 => EmValue::I64(wide),
        OpCode::ConvU8 => match value {
            EmValue::I32(v) => EmValue::I64(i64::from(*v as u32)),
            _ => EmValue::I64(wide),
        },
        other => return Err(fault(format!("{} is not a conversion", other.mnemonic()))),
    };
    Ok(converted)
}

/// Evaluates the comparison of a `c*` instruction or conditional branch.
///
/// Branches compare the way their `c*` counterpart does; `bne.un` is the negation of
/// `beq`.
///
/// # Errors
/// Returns [`Error::Emulation`] for operands of different widths.
pub fn compare(opcode: OpCode, left: &EmValue, right: &EmValue) -> Result<bool> {
    if matches!(opcode, OpCode::Ceq | OpCode::Beq | OpCode::BneUn) {
        let equal = match (left, right) {
            (EmValue::I32(a), EmValue::I32(b)) => a == b,
            (EmValue::I64(a), EmValue::I64(b)) => a == b,
            (EmValue::Null, EmValue::Null) => true,
            (EmValue::Null, _) | (_, EmValue::Null) => false,
            _ => return Err(fault(format!("cannot compare {left} and {right}"))),
        };
        return Ok(equal != (opcode == OpCode::BneUn));
    }

    let unsigned = matches!(
        opcode,
        OpCode::CgtUn | OpCode::CltUn | OpCode::BgeUn | OpCode::BgtUn | OpCode::BleUn | OpCode::BltUn
    );
    let ordering = match (left, right) {
        (EmValue::I32(a), EmValue::I32(b)) if unsigned => (*a as u32).cmp(&(*b as u32)),
        (EmValue::I32(a), EmValue::I32(b)) => a.cmp(b),
        (EmValue::I64(a), EmValue::I64(b)) if unsigned => (*a as u64).cmp(&(*b as u64)),
        (EmValue::I64(a), EmValue::I64(b)) => a.cmp(b),
        _ => return Err(fault(format!("cannot order {left} and {right}"))),
    };
    Ok(match opcode {
        OpCode::Cgt | OpCode::CgtUn | OpCode::Bgt | OpCode::BgtUn => ordering.is_gt(),
        OpCode::Clt | OpCode::CltUn | OpCode::Blt | OpCode::BltUn => ordering.is_lt(),
        OpCode::Bge | OpCode::BgeUn => ordering.is_ge(),
        OpCode::Ble | OpCode::BleUn => ordering.is_le(),
        other => return Err(fault(format!("{} is not a comparison", other.mnemonic()))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_wraps_and_faults() -> Result<()> {
        assert_eq!(
            binary(OpCode::Add, &EmValue::I32(i32::MAX), &EmValue::I32(1))?,
            EmValue::I32(i32::MIN)
        );
        assert_eq!(
            binary(OpCode::And, &EmValue::I64(0b1110), &EmValue::I64(0b0111))?,
            EmValue::I64(0b0110)
        );
        assert!(binary(OpCode::Div, &EmValue::I32(1), &EmValue::I32(0)).is_err());
        assert!(binary(OpCode::Add, &EmValue::I32(1), &EmValue::I64(1)).is_err());
        assert_eq!(
            binary(OpCode::ShrUn, &EmValue::I32(-1), &EmValue::I32(28))?,
            EmValue::I32(0xF)
        );
        Ok(())
    }

    #[test]
    fn test_conversions() -> Result<()> {
        assert_eq!(convert(OpCode::ConvU1, &EmValue::I32(0x1FF))?, EmValue::I32(0xFF));
        assert_eq!(convert(OpCode::ConvI1, &EmValue::I32(0xFF))?, EmValue::I32(-1));
        assert_eq!(convert(OpCode::ConvU8, &EmValue::I32(-1))?, EmValue::I64(0xFFFF_FFFF));
        assert_eq!(convert(OpCode::ConvI8, &EmValue::I32(-1))?, EmValue::I64(-1));
        assert_eq!(
            convert(OpCode::ConvU4, &EmValue::I64(0x1_0000_0002))?,
            EmValue::I32(2)
        );
        Ok(())
    }

    #[test]
    fn test_signed_and_unsigned_compare() -> Result<()> {
        let minus_one = EmValue::I32(-1);
        let one = EmValue::I32(1);
        assert!(compare(OpCode::Blt, &minus_one, &one)?);
        assert!(!compare(OpCode::BltUn, &minus_one, &one)?);
        assert!(compare(OpCode::BgeUn, &minus_one, &one)?);
        assert!(compare(OpCode::BneUn, &minus_one, &one)?);
        assert!(compare(OpCode::Ceq, &EmValue::I64(3), &EmValue::I64(3))?);
        Ok(())
    }
}
