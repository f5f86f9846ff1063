//! Runtime value representation for CIL emulation.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    codegen::{EnumValue, IntegerKind},
    metadata::signatures::{TypeName, TypeSignature},
    Error, Result,
};

/// Contents of an emulated array.
#[derive(Clone, Debug, PartialEq)]
pub struct EmArray {
    /// Element type
    pub element: TypeSignature,
    /// Elements in stack representation
    pub values: Vec<EmValue>,
}

/// Runtime value during CIL emulation.
///
/// # CIL Type Mapping
///
/// | CIL Type | EmValue Variant |
/// |----------|-----------------|
/// | `int8` .. `uint32`, `bool`, `char`, enums of those | [`EmValue::I32`] |
/// | `int64`, `uint64`, enums of those | [`EmValue::I64`] |
/// | `string` | [`EmValue::Str`] |
/// | boxed value type | [`EmValue::Boxed`] |
/// | `T[]` | [`EmValue::Array`] |
/// | `RuntimeTypeHandle` | [`EmValue::TypeHandle`] |
/// | `System.Type` | [`EmValue::Type`] |
/// | other objects | [`EmValue::Object`] |
/// | managed pointer to a local or argument | [`EmValue::LocalAddress`], [`EmValue::ArgumentAddress`] |
///
/// Unsigned values keep their bit pattern.
#[derive(Clone, Debug, PartialEq)]
pub enum EmValue {
    /// 32-bit stack integer.
    I32(i32),

    /// 64-bit stack integer.
    I64(i64),

    /// String reference.
    Str(Rc<str>),

    /// Null reference.
    Null,

    /// A boxed value type.
    Boxed {
        /// The boxed type
        ty: TypeSignature,
        /// The value in stack representation
        value: Box<EmValue>,
    },

    /// Array reference; copies share the elements.
    Array(Rc<RefCell<EmArray>>),

    /// Result of `ldtoken`.
    TypeHandle(TypeSignature),

    /// A `System.Type` instance.
    Type(TypeSignature),

    /// An object that is only ever constructed and thrown.
    Object(TypeName),

    /// Address of a local.
    LocalAddress(u16),

    /// Address of an argument.
    ArgumentAddress(u16),
}

impl EmValue {
    /// A string value.
    #[must_use]
    pub fn string(value: &str) -> Self {
        EmValue::Str(Rc::from(value))
    }

    /// The stack form of `value`.
    #[must_use]
    pub fn from_enum(value: EnumValue) -> Self {
        if value.kind().is_wide() {
            EmValue::I64(value.stack_i64())
        } else {
            EmValue::I32(value.stack_i32())
        }
    }

    /// The zero value of a local of type `ty`.
    #[must_use]
    pub fn default_for(ty: &TypeSignature) -> Self {
        match ty {
            TypeSignature::I8 | TypeSignature::U8 => EmValue::I64(0),
            TypeSignature::Boolean
            | TypeSignature::Char
            | TypeSignature::I1
            | TypeSignature::U1
            | TypeSignature::I2
            | TypeSignature::U2
            | TypeSignature::I4
            | TypeSignature::U4
            | TypeSignature::ValueType(_) => EmValue::I32(0),
            _ => EmValue::Null,
        }
    }

    /// The value as a 32-bit stack integer.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] for other values.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            EmValue::I32(value) => Ok(*value),
            other => Err(Error::Emulation(format!("expected int32, found {other}"))),
        }
    }

    /// The value widened to 64 bits, sign-extending 32-bit integers.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] for non-integers.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            EmValue::I32(value) => Ok(i64::from(*value)),
            EmValue::I64(value) => Ok(*value),
            other => Err(Error::Emulation(format!("expected integer, found {other}"))),
        }
    }

    /// The value as an enum value of `kind`.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] for non-integers.
    pub fn as_enum(&self, kind: IntegerKind) -> Result<EnumValue> {
        Ok(EnumValue::from_stack(kind, self.as_i64()?))
    }

    /// Truthiness as tested by `brtrue`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            EmValue::I32(value) => *value != 0,
            EmValue::I64(value) => *value != 0,
            EmValue::Null => false,
            _ => true,
        }
    }

    /// The string contents.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EmValue::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::I32(value) => write!(f, "{value}"),
            EmValue::I64(value) => write!(f, "{value}L"),
            EmValue::Str(value) => write!(f, "\"{value}\""),
            EmValue::Null => f.write_str("null"),
            EmValue::Boxed { ty, value } => write!(f, "box {ty}({value})"),
            EmValue::Array(array) => {
                let array = array.borrow();
                let values: Vec<String> = array.values.iter().map(ToString::to_string).collect();
                write!(f, "{}[{}]", array.element, values.join(", "))
            }
            EmValue::TypeHandle(ty) => write!(f, "token {ty}"),
            EmValue::Type(ty) => write!(f, "typeof({ty})"),
            EmValue::Object(ty) => write!(f, "object {ty}"),
            EmValue::LocalAddress(index) => write!(f, "&V_{index}"),
            EmValue::ArgumentAddress(index) => write!(f, "&A_{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip_keeps_bit_pattern() -> Result<()> {
        let value = EnumValue::from_i64(IntegerKind::U4, 0xFFFF_FFFF);
        let stack = EmValue::from_enum(value);
        assert_eq!(stack, EmValue::I32(-1));
        assert_eq!(stack.as_enum(IntegerKind::U4)?, value);

        let wide = EnumValue::from_i64(IntegerKind::U8, -1);
        assert_eq!(EmValue::from_enum(wide), EmValue::I64(-1));
        Ok(())
    }

    #[test]
    fn test_defaults_and_display() {
        assert_eq!(EmValue::default_for(&TypeSignature::U8), EmValue::I64(0));
        assert_eq!(EmValue::default_for(&TypeSignature::String), EmValue::Null);
        assert_eq!(EmValue::string("Red").to_string(), "\"Red\"");
        assert!(!EmValue::I32(0).is_true());
        assert!(EmValue::I64(2).is_true());
    }
}
