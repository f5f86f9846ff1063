//! Runtime intrinsics.
//!
//! Models the framework methods that reflection-style enum code and generated helpers
//! call: type handle conversion, the `System.Enum` statics, the virtual `ToString` and
//! `Equals` on boxed values, the primitive `Convert.ToString` formatters and the
//! exception constructor used by flattened handlers. Enum semantics come from the
//! [`EnumDescriptor`] of the resolved type, so emulated reflection and generated
//! helpers are compared against the same formatter.

use std::{cell::RefCell, rc::Rc};

use crate::{
    codegen::{EnumDescriptor, EnumValue, IntegerKind},
    emulation::{EmArray, EmValue},
    metadata::{
        module::Module,
        platform::PlatformTypes,
        resolver::Resolver,
        signatures::{MethodRef, TypeSignature},
    },
    Error, Result,
};

/// Dispatches intrinsic calls.
pub struct Runtime<'a> {
    module: &'a Module,
    resolver: &'a Resolver,
    platform: &'a PlatformTypes,
}

fn expect_type(value: &EmValue) -> Result<&TypeSignature> {
    match value {
        EmValue::Type(ty) => Ok(ty),
        other => Err(Error::Emulation(format!("expected System.Type, found {other}"))),
    }
}

fn boolean(value: bool) -> EmValue {
    EmValue::I32(i32::from(value))
}

impl<'a> Runtime<'a> {
    /// Creates a runtime over `module`.
    #[must_use]
    pub fn new(module: &'a Module, resolver: &'a Resolver, platform: &'a PlatformTypes) -> Self {
        Runtime {
            module,
            resolver,
            platform,
        }
    }

    /// The enum descriptor of `ty`, `None` if `ty` is not an enum.
    fn descriptor(&self, ty: &TypeSignature) -> Option<EnumDescriptor> {
        let TypeSignature::ValueType(name) = ty else {
            return None;
        };
        let resolved = self.resolver.resolve(self.module, name).ok()?;
        EnumDescriptor::from_type(name, resolved.definition).ok()
    }

    fn require_descriptor(&self, ty: &TypeSignature) -> Result<EnumDescriptor> {
        self.descriptor(ty)
            .ok_or_else(|| Error::Emulation(format!("{ty} is not an enum")))
    }

    fn unbox<'v>(value: &'v EmValue) -> Result<(&'v TypeSignature, &'v EmValue)> {
        match value {
            EmValue::Boxed { ty, value } => Ok((ty, value)),
            EmValue::Null => Err(Error::Emulation("null reference".to_string())),
            other => Err(Error::Emulation(format!("expected boxed value, found {other}"))),
        }
    }

    /// The integer kind and value of a boxed enum or primitive.
    fn boxed_integer(&self, value: &EmValue) -> Result<(TypeSignature, EnumValue)> {
        let (ty, inner) = Self::unbox(value)?;
        let kind = match IntegerKind::from_signature(ty) {
            Some(kind) => kind,
            None => self.require_descriptor(ty)?.kind,
        };
        Ok((ty.clone(), inner.as_enum(kind)?))
    }

    /// Executes `method` if it is an intrinsic; `None` if it is not.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] for intrinsic calls with ill-typed arguments.
    pub fn invoke(&self, method: &MethodRef, args: &[EmValue]) -> Option<Result<Option<EmValue>>> {
        let platform = self.platform;
        let result = if platform.is_get_type_from_handle(method) {
            self.get_type_from_handle(args)
        } else if platform.is_enum_get_values(method) {
            self.get_values(args)
        } else if platform.is_enum_is_defined(method) {
            self.is_defined(args)
        } else if platform.is_enum_get_underlying_type(method) {
            self.get_underlying_type(args)
        } else if platform.is_enum_has_flag(method) {
            self.has_flag(args)
        } else if platform.is_virtual_to_string(method) {
            self.to_string(args)
        } else if platform.is_virtual_equals(method) {
            self.equals(args)
        } else if method.is("System", "Convert", "ToString", 1) {
            Self::convert_to_string(method, args)
        } else if *method == *platform.invalid_operation_ctor {
            Ok(EmValue::Object(method.declaring.clone()))
        } else {
            return None;
        };
        Some(result.map(Some))
    }

    fn get_type_from_handle(&self, args: &[EmValue]) -> Result<EmValue> {
        match args {
            [EmValue::TypeHandle(ty)] => Ok(EmValue::Type(ty.clone())),
            _ => Err(Error::Emulation("GetTypeFromHandle expects a type handle".to_string())),
        }
    }

    fn get_values(&self, args: &[EmValue]) -> Result<EmValue> {
        let [ty] = args else {
            return Err(Error::Emulation("GetValues expects one argument".to_string()));
        };
        let ty = expect_type(ty)?;
        let descriptor = self.require_descriptor(ty)?;
        let values = descriptor
            .values_in_runtime_order()
            .into_iter()
            .map(EmValue::from_enum)
            .collect();
        Ok(EmValue::Array(Rc::new(RefCell::new(EmArray {
            element: ty.clone(),
            values,
        }))))
    }

    fn is_defined(&self, args: &[EmValue]) -> Result<EmValue> {
        let [ty, value] = args else {
            return Err(Error::Emulation("IsDefined expects two arguments".to_string()));
        };
        let descriptor = self.require_descriptor(expect_type(ty)?)?;
        if let EmValue::Str(name) = value {
            let found = descriptor
                .declared
                .iter()
                .any(|constant| constant.name == **name);
            return Ok(boolean(found));
        }

        let (boxed, value) = self.boxed_integer(value)?;
        if boxed != descriptor.signature() && boxed != descriptor.kind.signature() {
            return Err(Error::Emulation(format!(
                "IsDefined argument type {boxed} does not match {}",
                descriptor.name
            )));
        }
        let value = EnumValue::from_bits(descriptor.kind, value.bits());
        Ok(boolean(descriptor.name_of(value).is_some()))
    }

    fn get_underlying_type(&self, args: &[EmValue]) -> Result<EmValue> {
        let [ty] = args else {
            return Err(Error::Emulation("GetUnderlyingType expects one argument".to_string()));
        };
        let descriptor = self.require_descriptor(expect_type(ty)?)?;
        Ok(EmValue::Type(descriptor.kind.signature()))
    }

    fn has_flag(&self, args: &[EmValue]) -> Result<EmValue> {
        let [this, flag] = args else {
            return Err(Error::Emulation("HasFlag expects two arguments".to_string()));
        };
        let (this_ty, value) = self.boxed_integer(this)?;
        let (flag_ty, flag) = self.boxed_integer(flag)?;
        if this_ty != flag_ty {
            return Err(Error::Emulation(format!(
                "HasFlag type mismatch: {this_ty} and {flag_ty}"
            )));
        }
        Ok(boolean(value.bits() & flag.bits() == flag.bits()))
    }

    fn to_string(&self, args: &[EmValue]) -> Result<EmValue> {
        let [this] = args else {
            return Err(Error::Emulation("ToString expects a receiver".to_string()));
        };
        if let EmValue::Str(_) = this {
            return Ok(this.clone());
        }
        let (ty, inner) = Self::unbox(this)?;
        let text = match (IntegerKind::from_signature(ty), self.descriptor(ty)) {
            (Some(kind), _) => inner.as_enum(kind)?.to_string(),
            (None, Some(descriptor)) => descriptor.format(inner.as_enum(descriptor.kind)?),
            (None, None) => {
                return Err(Error::Emulation(format!("no ToString model for {ty}")));
            }
        };
        Ok(EmValue::string(&text))
    }

    fn equals(&self, args: &[EmValue]) -> Result<EmValue> {
        let [this, other] = args else {
            return Err(Error::Emulation("Equals expects two arguments".to_string()));
        };
        if matches!(other, EmValue::Null) {
            return Ok(boolean(false));
        }
        let (this_ty, this_value) = self.boxed_integer(this)?;
        let (other_ty, other_value) = self.boxed_integer(other)?;
        Ok(boolean(
            this_ty == other_ty && this_value.bits() == other_value.bits(),
        ))
    }

    fn convert_to_string(method: &MethodRef, args: &[EmValue]) -> Result<EmValue> {
        let kind = IntegerKind::from_signature(&method.signature.params[0])
            .ok_or_else(|| Error::Emulation(format!("no formatter model for {method}")))?;
        let [value] = args else {
            return Err(Error::Emulation("Convert.ToString expects one argument".to_string()));
        };
        Ok(EmValue::string(&value.as_enum(kind)?.to_string()))
    }
}
