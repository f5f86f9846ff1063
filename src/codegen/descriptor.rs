//! Enum descriptors: the constant set an enum type declares.

use crate::{
    codegen::value::{EnumValue, IntegerKind},
    metadata::{
        module::{FieldAttributes, TypeDef},
        signatures::{TypeName, TypeSignature},
    },
    Error, Result,
};

/// A named enum constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumConstant {
    /// Field name
    pub name: String,
    /// Field value
    pub value: EnumValue,
}

/// The constant set and representation of one enum type.
#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    /// Identity of the enum type
    pub name: TypeName,
    /// Underlying integer representation
    pub kind: IntegerKind,
    /// Declared constants, duplicate values collapsed to the first-declared name
    pub constants: Vec<EnumConstant>,
    /// Every declared constant, in declaration order
    pub declared: Vec<EnumConstant>,
    /// The type carries `System.FlagsAttribute`
    pub is_flags: bool,
}

impl EnumDescriptor {
    /// Reads the descriptor of the enum `ty` named `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Unsupported`] if `ty` is not an enum, is generic, or has a
    /// `bool`, `char` or otherwise non-integer underlying type.
    pub fn from_type(name: &TypeName, ty: &TypeDef) -> Result<Self> {
        if !ty.is_enum() {
            return Err(Error::Unsupported(format!("{name} is not an enum")));
        }
        if ty.generic_params > 0 {
            return Err(Error::Unsupported(format!("{name} is generic")));
        }

        let underlying = ty
            .fields
            .iter()
            .find(|field| field.name == "value__" && field.flags & FieldAttributes::STATIC == 0)
            .map(|field| &field.signature)
            .ok_or_else(|| Error::Unsupported(format!("{name} has no value__ field")))?;
        let kind = IntegerKind::from_signature(underlying).ok_or_else(|| {
            Error::Unsupported(format!("{name} has unsupported underlying type {underlying}"))
        })?;

        let mut declared = Vec::new();
        for field in ty.fields.iter().filter(|field| field.is_literal()) {
            let Some(raw) = field.constant.as_ref().and_then(|c| c.as_i64()) else {
                return Err(Error::Unsupported(format!(
                    "{name}::{} has a non-integer constant",
                    field.name
                )));
            };
            declared.push(EnumConstant {
                name: field.name.clone(),
                value: EnumValue::from_i64(kind, raw),
            });
        }

        let mut constants: Vec<EnumConstant> = Vec::with_capacity(declared.len());
        for constant in &declared {
            if !constants.iter().any(|known| known.value == constant.value) {
                constants.push(constant.clone());
            }
        }

        Ok(EnumDescriptor {
            name: name.clone(),
            kind,
            constants,
            declared,
            is_flags: ty.has_attribute(&TypeName::new("System", "FlagsAttribute")),
        })
    }

    /// The `valuetype` signature of the enum.
    #[must_use]
    pub fn signature(&self) -> TypeSignature {
        TypeSignature::ValueType(self.name.clone())
    }

    /// Declared constants in the order the runtime's value enumeration returns them:
    /// sorted by unsigned magnitude, duplicates kept.
    #[must_use]
    pub fn values_in_runtime_order(&self) -> Vec<EnumValue> {
        let mut values: Vec<EnumValue> = self.declared.iter().map(|c| c.value).collect();
        values.sort_by_key(EnumValue::bits);
        values
    }

    /// The name the runtime prints for `value` of a non-flags enum, `None` for unnamed
    /// values.
    #[must_use]
    pub fn name_of(&self, value: EnumValue) -> Option<&str> {
        self.constants
            .iter()
            .find(|constant| constant.value == value)
            .map(|constant| constant.name.as_str())
    }

    /// Renders `value` the way the runtime's enum formatter does.
    ///
    /// Exact matches print their name. Flag enums decompose other values greedily from
    /// the largest constant down and join the names in ascending order; any remainder, or
    /// an unnamed value of a non-flags enum, prints as decimal.
    #[must_use]
    pub fn format(&self, value: EnumValue) -> String {
        if let Some(name) = self.name_of(value) {
            return name.to_string();
        }
        if !self.is_flags || value.is_zero() {
            return value.to_string();
        }

        let mut descending: Vec<&EnumConstant> = self
            .constants
            .iter()
            .filter(|constant| !constant.value.is_zero())
            .collect();
        descending.sort_by(|a, b| b.value.bits().cmp(&a.value.bits()));

        let mut remaining = value.bits();
        let mut names = Vec::new();
        for constant in descending {
            let bits = constant.value.bits();
            if remaining & bits == bits {
                names.push(constant.name.as_str());
                remaining &= !bits;
                if remaining == 0 {
                    break;
                }
            }
        }

        if remaining != 0 {
            return value.to_string();
        }
        names.reverse();
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::module::{EnumBuilder, Module, TypeAttributes};

    fn describe(module: &Module, id: crate::metadata::module::TypeId) -> Result<EnumDescriptor> {
        let ty = module
            .get_type(id)
            .ok_or_else(|| Error::Error("missing type".into()))?;
        EnumDescriptor::from_type(&module.type_name(id), ty)
    }

    #[test]
    fn test_duplicates_collapse_to_first_declared() -> Result<()> {
        let mut module = Module::new("test");
        let id = EnumBuilder::new("Dup")
            .value("B", 2)
            .value("A", 1)
            .value("Second", 2)
            .build(&mut module)?;
        let descriptor = describe(&module, id)?;

        assert_eq!(descriptor.constants.len(), 2);
        assert_eq!(descriptor.declared.len(), 3);
        assert_eq!(
            descriptor.name_of(EnumValue::from_i64(IntegerKind::I4, 2)),
            Some("B")
        );
        let order: Vec<i128> = descriptor
            .values_in_runtime_order()
            .iter()
            .map(EnumValue::as_i128)
            .collect();
        assert_eq!(order, vec![1, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_flags_formatting() -> Result<()> {
        let mut module = Module::new("test");
        let id = EnumBuilder::new("Access")
            .flags()
            .value("Read", 1)
            .value("Write", 2)
            .value("ReadWrite", 3)
            .value("Exec", 4)
            .build(&mut module)?;
        let descriptor = describe(&module, id)?;
        let value = |raw| EnumValue::from_i64(IntegerKind::I4, raw);

        assert_eq!(descriptor.format(value(3)), "ReadWrite");
        assert_eq!(descriptor.format(value(7)), "ReadWrite, Exec");
        assert_eq!(descriptor.format(value(5)), "Read, Exec");
        assert_eq!(descriptor.format(value(8)), "8");
        assert_eq!(descriptor.format(value(0)), "0");
        Ok(())
    }

    #[test]
    fn test_rejects_non_enums_and_char() -> Result<()> {
        let mut module = Module::new("test");
        let class = module.add_type(TypeDef::new("", "C", TypeAttributes::PUBLIC, None))?;
        assert!(matches!(describe(&module, class), Err(Error::Unsupported(_))));

        let chars = EnumBuilder::new("Chars")
            .underlying_type(TypeSignature::Char)
            .value("A", 65)
            .build(&mut module)?;
        assert!(matches!(describe(&module, chars), Err(Error::Unsupported(_))));
        Ok(())
    }
}
