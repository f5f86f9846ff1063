//! Platform method references consulted by the rewriter.
//!
//! [`PlatformTypes`] names the framework entry points that reflection-style enum code
//! calls, and the primitive formatting providers generated code defers to. It is built
//! once and passed explicitly to every component that needs it.

use crate::{
    codegen::IntegerKind,
    metadata::signatures::{MethodRef, MethodRefRc, SignatureMethod, TypeName, TypeSignature},
};

/// Framework method references used when matching and generating code.
#[derive(Debug, Clone)]
pub struct PlatformTypes {
    /// `System.Type System.Type::GetTypeFromHandle(System.RuntimeTypeHandle)`
    pub get_type_from_handle: MethodRefRc,
    /// `System.Array System.Enum::GetValues(System.Type)`
    pub enum_get_values: MethodRefRc,
    /// `bool System.Enum::IsDefined(System.Type, object)`
    pub enum_is_defined: MethodRefRc,
    /// `System.Type System.Enum::GetUnderlyingType(System.Type)`
    pub enum_get_underlying_type: MethodRefRc,
    /// `instance bool System.Enum::HasFlag(System.Enum)`
    pub enum_has_flag: MethodRefRc,
    /// `instance string System.Object::ToString()`
    pub object_to_string: MethodRefRc,
    /// `instance bool System.Object::Equals(object)`
    pub object_equals: MethodRefRc,
    /// `instance void System.InvalidOperationException::.ctor()`
    pub invalid_operation_ctor: MethodRefRc,
    /// `System.FlagsAttribute`
    pub flags_attribute: TypeName,
}

fn system(name: &str) -> TypeName {
    TypeName::new("System", name)
}

fn class(name: &str) -> TypeSignature {
    TypeSignature::Class(system(name))
}

impl Default for PlatformTypes {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformTypes {
    /// References into the core library.
    #[must_use]
    pub fn new() -> Self {
        PlatformTypes {
            get_type_from_handle: MethodRef::new(
                system("Type"),
                "GetTypeFromHandle",
                SignatureMethod::static_method(
                    class("Type"),
                    vec![TypeSignature::ValueType(system("RuntimeTypeHandle"))],
                ),
            ),
            enum_get_values: MethodRef::new(
                system("Enum"),
                "GetValues",
                SignatureMethod::static_method(class("Array"), vec![class("Type")]),
            ),
            enum_is_defined: MethodRef::new(
                system("Enum"),
                "IsDefined",
                SignatureMethod::static_method(
                    TypeSignature::Boolean,
                    vec![class("Type"), TypeSignature::Object],
                ),
            ),
            enum_get_underlying_type: MethodRef::new(
                system("Enum"),
                "GetUnderlyingType",
                SignatureMethod::static_method(class("Type"), vec![class("Type")]),
            ),
            enum_has_flag: MethodRef::new(
                system("Enum"),
                "HasFlag",
                SignatureMethod::instance_method(TypeSignature::Boolean, vec![class("Enum")]),
            ),
            object_to_string: MethodRef::new(
                system("Object"),
                "ToString",
                SignatureMethod::instance_method(TypeSignature::String, vec![]),
            ),
            object_equals: MethodRef::new(
                system("Object"),
                "Equals",
                SignatureMethod::instance_method(TypeSignature::Boolean, vec![TypeSignature::Object]),
            ),
            invalid_operation_ctor: MethodRef::new(
                system("InvalidOperationException"),
                ".ctor",
                SignatureMethod::instance_method(TypeSignature::Void, vec![]),
            ),
            flags_attribute: system("FlagsAttribute"),
        }
    }

    /// The primitive formatter for `kind`: `string System.Convert::ToString(<kind>)`.
    #[must_use]
    pub fn convert_to_string(&self, kind: IntegerKind) -> MethodRefRc {
        MethodRef::new(
            system("Convert"),
            "ToString",
            SignatureMethod::static_method(TypeSignature::String, vec![kind.signature()]),
        )
    }

    /// Returns `true` for `Type::GetTypeFromHandle`.
    #[must_use]
    pub fn is_get_type_from_handle(&self, method: &MethodRef) -> bool {
        method.is("System", "Type", "GetTypeFromHandle", 1)
    }

    /// Returns `true` for `Enum::GetValues(Type)`.
    #[must_use]
    pub fn is_enum_get_values(&self, method: &MethodRef) -> bool {
        method.is("System", "Enum", "GetValues", 1) && !method.signature.has_this
    }

    /// Returns `true` for `Enum::IsDefined(Type, object)`.
    #[must_use]
    pub fn is_enum_is_defined(&self, method: &MethodRef) -> bool {
        method.is("System", "Enum", "IsDefined", 2) && !method.signature.has_this
    }

    /// Returns `true` for `Enum::GetUnderlyingType(Type)`.
    #[must_use]
    pub fn is_enum_get_underlying_type(&self, method: &MethodRef) -> bool {
        method.is("System", "Enum", "GetUnderlyingType", 1)
    }

    /// Returns `true` for `Enum::HasFlag(Enum)`.
    #[must_use]
    pub fn is_enum_has_flag(&self, method: &MethodRef) -> bool {
        method.is("System", "Enum", "HasFlag", 1) && method.signature.has_this
    }

    /// Returns `true` for the virtual `ToString()` as declared on `Object`, `ValueType`
    /// or `Enum`.
    #[must_use]
    pub fn is_virtual_to_string(&self, method: &MethodRef) -> bool {
        method.signature.has_this
            && method.name == "ToString"
            && method.signature.params.is_empty()
            && Self::is_enum_base(&method.declaring)
    }

    /// Returns `true` for the virtual `Equals(object)` as declared on `Object`,
    /// `ValueType` or `Enum`.
    #[must_use]
    pub fn is_virtual_equals(&self, method: &MethodRef) -> bool {
        method.signature.has_this
            && method.name == "Equals"
            && method.signature.params == [TypeSignature::Object]
            && Self::is_enum_base(&method.declaring)
    }

    fn is_enum_base(name: &TypeName) -> bool {
        name.is("System", "Object") || name.is("System", "ValueType") || name.is("System", "Enum")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matchers_accept_own_references() {
        let platform = PlatformTypes::new();
        assert!(platform.is_get_type_from_handle(&platform.get_type_from_handle));
        assert!(platform.is_enum_get_values(&platform.enum_get_values));
        assert!(platform.is_enum_is_defined(&platform.enum_is_defined));
        assert!(platform.is_enum_get_underlying_type(&platform.enum_get_underlying_type));
        assert!(platform.is_enum_has_flag(&platform.enum_has_flag));
        assert!(platform.is_virtual_to_string(&platform.object_to_string));
        assert!(platform.is_virtual_equals(&platform.object_equals));
        assert!(!platform.is_virtual_equals(&platform.object_to_string));
    }

    #[test]
    fn test_to_string_on_enum_base_types() {
        let platform = PlatformTypes::new();
        let on_enum = MethodRef::new(
            TypeName::new("System", "Enum"),
            "ToString",
            SignatureMethod::instance_method(TypeSignature::String, vec![]),
        );
        let formatted = MethodRef::new(
            TypeName::new("System", "Enum"),
            "ToString",
            SignatureMethod::instance_method(TypeSignature::String, vec![TypeSignature::String]),
        );
        assert!(platform.is_virtual_to_string(&on_enum));
        assert!(!platform.is_virtual_to_string(&formatted));
        assert_eq!(
            platform.convert_to_string(IntegerKind::U2).to_string(),
            "string System.Convert::ToString(uint16)"
        );
    }
}
