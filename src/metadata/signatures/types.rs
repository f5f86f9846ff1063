use std::fmt;
use std::sync::Arc;

/// Namespace-qualified identity of a type.
///
/// Nested types carry the namespace of their outermost enclosing type and a name of the
/// form `Outer/Inner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TypeName {
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name, `/`-separated for nested types
    pub name: String,
}

impl TypeName {
    /// Creates a new type name.
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        TypeName {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Parses a full name such as `System.Enum` or `App.Outer/Inner`.
    ///
    /// The namespace ends at the last `.` before the first `/`.
    #[must_use]
    pub fn parse(full_name: &str) -> Self {
        let outer_end = full_name.find('/').unwrap_or(full_name.len());
        match full_name[..outer_end].rfind('.') {
            Some(dot) => TypeName::new(&full_name[..dot], &full_name[dot + 1..]),
            None => TypeName::new("", full_name),
        }
    }

    /// Returns the full name, `Namespace.Name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Returns `true` if this names `namespace.name`.
    #[must_use]
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// The type of a local, field, parameter or type operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeSignature {
    /// void
    #[default]
    Void,
    /// bool
    Boolean,
    /// char
    Char,
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
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// signed integer, sized to executing platform
    I,
    /// unsigned integer, sized to executing platform
    U,
    /// System.String
    String,
    /// System.Object
    Object,
    /// CIL value-type
    ValueType(TypeName),
    /// CIL Class
    Class(TypeName),
    /// Generic type and its arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Generic type parameter
    GenericParamType(u32),
    /// Generic method parameter
    GenericParamMethod(u32),
    /// Single dimension array
    SzArray(Box<TypeSignature>),
    /// Type by reference
    ByRef(Box<TypeSignature>),
}

impl TypeSignature {
    /// Returns the name of a `valuetype` or `class` signature.
    #[must_use]
    pub fn type_name(&self) -> Option<&TypeName> {
        match self {
            TypeSignature::ValueType(name) | TypeSignature::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the `System` type that backs a primitive element type.
    #[must_use]
    pub fn primitive_name(&self) -> Option<TypeName> {
        let name = match self {
            TypeSignature::Boolean => "Boolean",
            TypeSignature::Char => "Char",
            TypeSignature::I1 => "SByte",
            TypeSignature::U1 => "Byte",
            TypeSignature::I2 => "Int16",
            TypeSignature::U2 => "UInt16",
            TypeSignature::I4 => "Int32",
            TypeSignature::U4 => "UInt32",
            TypeSignature::I8 => "Int64",
            TypeSignature::U8 => "UInt64",
            TypeSignature::R4 => "Single",
            TypeSignature::R8 => "Double",
            TypeSignature::I => "IntPtr",
            TypeSignature::U => "UIntPtr",
            TypeSignature::String => "String",
            TypeSignature::Object => "Object",
            _ => return None,
        };
        Some(TypeName::new("System", name))
    }

    /// Returns `true` if this signature is, or names, the given type.
    ///
    /// Primitive element types match their `System` names, so `int32` matches
    /// `System.Int32`.
    #[must_use]
    pub fn names(&self, name: &TypeName) -> bool {
        match self.type_name() {
            Some(own) => own == name,
            None => self.primitive_name().as_ref() == Some(name),
        }
    }

    /// Returns `true` for generic instantiations and generic parameters.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        matches!(
            self,
            TypeSignature::GenericInst(..)
                | TypeSignature::GenericParamType(_)
                | TypeSignature::GenericParamMethod(_)
        )
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSignature::Void => write!(f, "void"),
            TypeSignature::Boolean => write!(f, "bool"),
            TypeSignature::Char => write!(f, "char"),
            TypeSignature::I1 => write!(f, "int8"),
            TypeSignature::U1 => write!(f, "uint8"),
            TypeSignature::I2 => write!(f, "int16"),
            TypeSignature::U2 => write!(f, "uint16"),
            TypeSignature::I4 => write!(f, "int32"),
            TypeSignature::U4 => write!(f, "uint32"),
            TypeSignature::I8 => write!(f, "int64"),
            TypeSignature::U8 => write!(f, "uint64"),
            TypeSignature::R4 => write!(f, "float32"),
            TypeSignature::R8 => write!(f, "float64"),
            TypeSignature::I => write!(f, "native int"),
            TypeSignature::U => write!(f, "native uint"),
            TypeSignature::String => write!(f, "string"),
            TypeSignature::Object => write!(f, "object"),
            TypeSignature::ValueType(name) => write!(f, "valuetype {name}"),
            TypeSignature::Class(name) => write!(f, "class {name}"),
            TypeSignature::GenericInst(base, args) => {
                write!(f, "{base}<")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ">")
            }
            TypeSignature::GenericParamType(index) => write!(f, "!{index}"),
            TypeSignature::GenericParamMethod(index) => write!(f, "!!{index}"),
            TypeSignature::SzArray(element) => write!(f, "{element}[]"),
            TypeSignature::ByRef(inner) => write!(f, "{inner}&"),
        }
    }
}

/// Method signature (II.23.2.1), reduced to what rewriting needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureMethod {
    /// Used to encode the keyword instance in the calling convention, see §II.15.3
    pub has_this: bool,
    /// The return type of this `Method`
    pub return_type: TypeSignature,
    /// The parameters of this `Method`
    pub params: Vec<TypeSignature>,
}

impl SignatureMethod {
    /// Signature of a static method.
    #[must_use]
    pub fn static_method(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        SignatureMethod {
            has_this: false,
            return_type,
            params,
        }
    }

    /// Signature of an instance method.
    #[must_use]
    pub fn instance_method(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        SignatureMethod {
            has_this: true,
            return_type,
            params,
        }
    }

    /// Number of values a call pops, including `this`.
    #[must_use]
    pub fn pop_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// Number of values a call pushes.
    #[must_use]
    pub fn push_count(&self) -> usize {
        usize::from(self.return_type != TypeSignature::Void)
    }
}

/// A reference to a method, used as the operand of `call`, `callvirt` and `newobj`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring type
    pub declaring: TypeName,
    /// Method name
    pub name: String,
    /// Method signature
    pub signature: SignatureMethod,
}

/// Shared method reference
pub type MethodRefRc = Arc<MethodRef>;

impl MethodRef {
    /// Creates a new shared method reference.
    #[must_use]
    pub fn new(declaring: TypeName, name: &str, signature: SignatureMethod) -> MethodRefRc {
        Arc::new(MethodRef {
            declaring,
            name: name.to_string(),
            signature,
        })
    }

    /// Returns `true` if this references `namespace.type_name::name` with `param_count`
    /// parameters.
    #[must_use]
    pub fn is(&self, namespace: &str, type_name: &str, name: &str, param_count: usize) -> bool {
        self.declaring.is(namespace, type_name)
            && self.name == name
            && self.signature.params.len() == param_count
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signature.has_this {
            write!(f, "instance ")?;
        }
        write!(
            f,
            "{} {}::{}(",
            self.signature.return_type, self.declaring, self.name
        )?;
        for (index, param) in self.signature.params.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")")
    }
}

/// A reference to a field, used as the operand of field access instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type
    pub declaring: TypeName,
    /// Field name
    pub name: String,
    /// Field type
    pub signature: TypeSignature,
}

/// Shared field reference
pub type FieldRefRc = Arc<FieldRef>;

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.signature, self.declaring, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_parse() {
        assert_eq!(TypeName::parse("System.Enum"), TypeName::new("System", "Enum"));
        assert_eq!(
            TypeName::parse("App.Models.Outer/Inner.Deep"),
            TypeName::new("App.Models", "Outer/Inner.Deep")
        );
        assert_eq!(TypeName::parse("Global"), TypeName::new("", "Global"));
        assert_eq!(TypeName::new("", "Global").full_name(), "Global");
    }

    #[test]
    fn test_primitive_names() {
        let int32 = TypeName::new("System", "Int32");
        assert!(TypeSignature::I4.names(&int32));
        assert!(TypeSignature::ValueType(int32.clone()).names(&int32));
        assert!(!TypeSignature::U4.names(&int32));
    }

    #[test]
    fn test_method_ref_display() {
        let method = MethodRef::new(
            TypeName::new("System", "Enum"),
            "IsDefined",
            SignatureMethod::static_method(
                TypeSignature::Boolean,
                vec![
                    TypeSignature::Class(TypeName::new("System", "Type")),
                    TypeSignature::Object,
                ],
            ),
        );
        assert_eq!(
            method.to_string(),
            "bool System.Enum::IsDefined(class System.Type, object)"
        );
        assert!(method.is("System", "Enum", "IsDefined", 2));
        assert_eq!(method.signature.pop_count(), 2);
        assert_eq!(method.signature.push_count(), 1);
    }
}
