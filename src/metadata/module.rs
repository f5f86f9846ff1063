//! Structural, in-memory model of a managed module.
//!
//! A [`Module`] is the mutable view the rewriter works on: an arena of [`TypeDef`]s
//! addressed by [`TypeId`], each owning its fields and methods. Nested types are regular
//! arena entries linked to their enclosing type. The module-I/O collaborator produces and
//! consumes this model (see [`crate::project::ModuleFormat`]); the rewriter never touches
//! the binary container itself.
//!
//! # Examples
//!
//! ```rust
//! use dotrewrite::prelude::*;
//!
//! let mut module = Module::new("App.dll");
//! let color = EnumBuilder::new("Color")
//!     .namespace("App")
//!     .value("Red", 0)
//!     .value("Green", 1)
//!     .build(&mut module)?;
//!
//! let ty = module.get_type(color).unwrap();
//! assert!(ty.is_enum());
//! assert_eq!(module.type_name(color).full_name(), "App.Color");
//! # Ok::<(), dotrewrite::Error>(())
//! ```

use std::fmt;

use crate::{
    metadata::{
        method::MethodBody,
        signatures::{MethodRef, MethodRefRc, SignatureMethod, TypeName, TypeSignature},
        token::Token,
    },
    Result,
};

#[allow(non_snake_case)]
/// All possible flags for `TypeAttributes` used by the rewriter
pub mod TypeAttributes {
    /// Type has no public scope
    pub const NOT_PUBLIC: u32 = 0x0000_0000;
    /// Type has public scope
    pub const PUBLIC: u32 = 0x0000_0001;
    /// Nested type with public visibility
    pub const NESTED_PUBLIC: u32 = 0x0000_0002;
    /// Nested type with assembly visibility
    pub const NESTED_ASSEMBLY: u32 = 0x0000_0005;
    /// Type is abstract
    pub const ABSTRACT: u32 = 0x0000_0080;
    /// Type cannot be derived from
    pub const SEALED: u32 = 0x0000_0100;
    /// Do not initialize the type before a static field is accessed
    pub const BEFORE_FIELD_INIT: u32 = 0x0010_0000;
}

#[allow(non_snake_case)]
/// All possible flags for `FieldAttributes` used by the rewriter
pub mod FieldAttributes {
    /// Accessible only by the parent type
    pub const PRIVATE: u32 = 0x0001;
    /// Accessibly by anyone who has visibility to this scope
    pub const PUBLIC: u32 = 0x0006;
    /// Defined on type, else per instance
    pub const STATIC: u32 = 0x0010;
    /// Value is compile time constant
    pub const LITERAL: u32 = 0x0040;
    /// Field is special
    pub const SPECIAL_NAME: u32 = 0x0200;
    /// CLI provides 'special' behavior, depending upon the name of the field
    pub const RTSPECIAL_NAME: u32 = 0x0400;
    /// Field has default
    pub const HAS_DEFAULT: u32 = 0x8000;
}

#[allow(non_snake_case)]
/// All possible flags for `MethodAttributes` used by the rewriter
pub mod MethodAttributes {
    /// Accessible only by the parent type
    pub const PRIVATE: u32 = 0x0001;
    /// Accessibly by anyone in the Assembly
    pub const ASSEMBLY: u32 = 0x0003;
    /// Accessibly by anyone who has visibility to this scope
    pub const PUBLIC: u32 = 0x0006;
    /// Defined on type, else per instance
    pub const STATIC: u32 = 0x0010;
    /// Method hides by name and signature
    pub const HIDE_BY_SIG: u32 = 0x0080;
}

/// A compile-time constant attached to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// bool
    Boolean(bool),
    /// char
    Char(u16),
    /// signed 8bit integer
    I1(i8),
    /// unsigned 8bit integer
    U1(u8),
    /// signed 16bit integer
    I2(i16),
    /// unsigned 16bit integer
    U2(u16),
    /// signed 32bit integer
    I4(i32),
    /// unsigned 32bit integer
    U4(u32),
    /// signed 64bit integer
    I8(i64),
    /// unsigned 64bit integer
    U8(u64),
    /// string
    String(String),
    /// null reference
    Null,
}

impl Constant {
    /// The constant as a signed 64-bit integer, sign- or zero-extended by its own type.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Constant::Boolean(value) => Some(i64::from(value)),
            Constant::Char(value) => Some(i64::from(value)),
            Constant::I1(value) => Some(i64::from(value)),
            Constant::U1(value) => Some(i64::from(value)),
            Constant::I2(value) => Some(i64::from(value)),
            Constant::U2(value) => Some(i64::from(value)),
            Constant::I4(value) => Some(i64::from(value)),
            Constant::U4(value) => Some(i64::from(value)),
            Constant::I8(value) => Some(value),
            Constant::U8(value) => Some(value as i64),
            Constant::String(_) | Constant::Null => None,
        }
    }

    /// Builds an integer constant of the element type `ty`, truncating `value`.
    #[must_use]
    pub fn integer(ty: &TypeSignature, value: i64) -> Option<Constant> {
        Some(match ty {
            TypeSignature::Boolean => Constant::Boolean(value != 0),
            TypeSignature::Char => Constant::Char(value as u16),
            TypeSignature::I1 => Constant::I1(value as i8),
            TypeSignature::U1 => Constant::U1(value as u8),
            TypeSignature::I2 => Constant::I2(value as i16),
            TypeSignature::U2 => Constant::U2(value as u16),
            TypeSignature::I4 => Constant::I4(value as i32),
            TypeSignature::U4 => Constant::U4(value as u32),
            TypeSignature::I8 => Constant::I8(value),
            TypeSignature::U8 => Constant::U8(value as u64),
            _ => return None,
        })
    }
}

/// Index of a type within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

/// Index of a method: its declaring type and position within that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    /// Declaring type
    pub ty: TypeId,
    /// Position in the declaring type's method list
    pub index: usize,
}

/// A field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// `FieldAttributes` bits
    pub flags: u32,
    /// Field type
    pub signature: TypeSignature,
    /// Default value of a literal field
    pub constant: Option<Constant>,
}

impl FieldDef {
    /// Returns `true` for a `static literal` field with a constant.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.flags & FieldAttributes::STATIC != 0
            && self.flags & FieldAttributes::LITERAL != 0
            && self.constant.is_some()
    }
}

/// A method definition.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Assigned when added to a module
    pub token: Token,
    /// Method name
    pub name: String,
    /// `MethodAttributes` bits
    pub flags: u32,
    /// Method signature
    pub signature: SignatureMethod,
    /// Body, `None` for abstract and runtime-provided methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// A method with the given body; the token is assigned by [`Module::add_method`].
    #[must_use]
    pub fn new(name: &str, flags: u32, signature: SignatureMethod, body: Option<MethodBody>) -> Self {
        MethodDef {
            token: Token::default(),
            name: name.to_string(),
            flags,
            signature,
            body,
        }
    }
}

/// A type definition.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Assigned when added to a module
    pub token: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// `TypeAttributes` bits
    pub flags: u32,
    /// Base type
    pub base: Option<TypeName>,
    /// Enclosing type of a nested type
    pub enclosing: Option<TypeId>,
    /// Nested types
    pub nested: Vec<TypeId>,
    /// Number of generic parameters
    pub generic_params: u32,
    /// Fields
    pub fields: Vec<FieldDef>,
    /// Methods
    pub methods: Vec<MethodDef>,
    /// Types of the custom attributes applied to this type
    pub custom_attributes: Vec<TypeName>,
}

impl TypeDef {
    /// A top-level type without members.
    #[must_use]
    pub fn new(namespace: &str, name: &str, flags: u32, base: Option<TypeName>) -> Self {
        TypeDef {
            token: Token::default(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags,
            base,
            enclosing: None,
            nested: Vec::new(),
            generic_params: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            custom_attributes: Vec::new(),
        }
    }

    /// Returns `true` if the base type is `System.Enum`.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.base
            .as_ref()
            .is_some_and(|base| base.is("System", "Enum"))
    }

    /// Returns `true` for enums and other `System.ValueType` derivatives.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.is_enum()
            || self
                .base
                .as_ref()
                .is_some_and(|base| base.is("System", "ValueType"))
    }

    /// Returns `true` if a custom attribute of type `name` is applied.
    #[must_use]
    pub fn has_attribute(&self, name: &TypeName) -> bool {
        self.custom_attributes.iter().any(|attr| attr == name)
    }

    /// Position of the method called `name`.
    #[must_use]
    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|method| method.name == name)
    }
}

/// A managed module: the unit read, rewritten and written back by the rewriter.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Module name, usually the file name
    pub name: String,
    types: Vec<TypeDef>,
    method_rows: u32,
}

impl Module {
    /// An empty module.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            types: Vec::new(),
            method_rows: 0,
        }
    }

    /// Number of types, nested ones included.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Iterates every type with its id, in definition order.
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> {
        self.types
            .iter()
            .enumerate()
            .map(|(index, ty)| (TypeId(index), ty))
    }

    /// The type behind `id`.
    #[must_use]
    pub fn get_type(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.0)
    }

    /// The type behind `id`, mutably.
    pub fn get_type_mut(&mut self, id: TypeId) -> Option<&mut TypeDef> {
        self.types.get_mut(id.0)
    }

    /// The method behind `id`.
    #[must_use]
    pub fn method(&self, id: MethodId) -> Option<&MethodDef> {
        self.get_type(id.ty)?.methods.get(id.index)
    }

    /// The method behind `id`, mutably.
    pub fn method_mut(&mut self, id: MethodId) -> Option<&mut MethodDef> {
        self.get_type_mut(id.ty)?.methods.get_mut(id.index)
    }

    /// Adds a type, assigning its `TypeDef` token. A type with `enclosing` set is
    /// registered as nested type of its enclosing type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if the enclosing type does not exist.
    pub fn add_type(&mut self, mut ty: TypeDef) -> Result<TypeId> {
        let id = TypeId(self.types.len());
        if let Some(enclosing) = ty.enclosing {
            self.get_type_mut(enclosing)
                .ok_or_else(|| invariant_error!("Enclosing type {} does not exist", enclosing.0))?
                .nested
                .push(id);
        }
        ty.token = Token::type_def(id.0 as u32 + 1);
        self.types.push(ty);
        Ok(id)
    }

    /// Adds a method to `ty`, assigning its `MethodDef` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if the type does not exist.
    pub fn add_method(&mut self, ty: TypeId, mut method: MethodDef) -> Result<MethodId> {
        let row = self.method_rows + 1;
        let owner = self
            .get_type_mut(ty)
            .ok_or_else(|| invariant_error!("Type {} does not exist", ty.0))?;
        method.token = Token::method_def(row);
        owner.methods.push(method);
        let index = owner.methods.len() - 1;
        self.method_rows = row;
        Ok(MethodId { ty, index })
    }

    /// Every type, each followed by its nested types, recursively.
    #[must_use]
    pub fn type_ids_depth_first(&self) -> Vec<TypeId> {
        fn visit(module: &Module, id: TypeId, order: &mut Vec<TypeId>) {
            order.push(id);
            if let Some(ty) = module.get_type(id) {
                for nested in &ty.nested {
                    visit(module, *nested, order);
                }
            }
        }

        let mut order = Vec::with_capacity(self.types.len());
        for (id, ty) in self.types() {
            if ty.enclosing.is_none() {
                visit(self, id, &mut order);
            }
        }
        order
    }

    /// The full identity of a type; nested names are joined with `/`.
    #[must_use]
    pub fn type_name(&self, id: TypeId) -> TypeName {
        let mut names = Vec::new();
        let mut cursor = self.get_type(id);
        let mut namespace = String::new();
        while let Some(ty) = cursor {
            names.push(ty.name.as_str());
            namespace.clone_from(&ty.namespace);
            cursor = ty.enclosing.and_then(|enclosing| self.get_type(enclosing));
        }
        names.reverse();
        TypeName {
            namespace,
            name: names.join("/"),
        }
    }

    /// Finds a type by its full identity.
    #[must_use]
    pub fn find_type(&self, name: &TypeName) -> Option<TypeId> {
        self.types()
            .map(|(id, _)| id)
            .find(|id| self.type_name(*id) == *name)
    }

    /// A reference to the method behind `id`, usable as a call operand.
    #[must_use]
    pub fn method_ref(&self, id: MethodId) -> Option<MethodRefRc> {
        let method = self.method(id)?;
        Some(MethodRef::new(
            self.type_name(id.ty),
            &method.name,
            method.signature.clone(),
        ))
    }

    /// Renders every method body of the module, keyed by `Type::Method`.
    #[must_use]
    pub fn listing(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for id in self.type_ids_depth_first() {
            let Some(ty) = self.get_type(id) else {
                continue;
            };
            let name = self.type_name(id);
            for method in &ty.methods {
                lines.push(format!("{}::{}", name, method.name));
                if let Some(body) = &method.body {
                    lines.extend(body.listing().into_iter().map(|line| format!("  {line}")));
                }
            }
        }
        lines
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.listing() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Enum value definition for the enum builder.
struct EnumValueDefinition {
    name: String,
    value: i64,
}

/// High-level builder for enum type definitions.
///
/// Creates a sealed `System.Enum` subtype with the special `value__` instance field and
/// one `static literal` field per value.
pub struct EnumBuilder {
    name: String,
    namespace: String,
    flags: u32,
    underlying_type: TypeSignature,
    enclosing: Option<TypeId>,
    is_flags: bool,
    values: Vec<EnumValueDefinition>,
}

impl EnumBuilder {
    /// Creates a new enum builder with the given name and an `int32` underlying type.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: String::new(),
            flags: TypeAttributes::PUBLIC | TypeAttributes::SEALED,
            underlying_type: TypeSignature::I4,
            enclosing: None,
            is_flags: false,
            values: Vec::new(),
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Sets the underlying integer type.
    #[must_use]
    pub fn underlying_type(mut self, underlying_type: TypeSignature) -> Self {
        self.underlying_type = underlying_type;
        self
    }

    /// Nests the enum inside `enclosing`.
    #[must_use]
    pub fn nested_in(mut self, enclosing: TypeId) -> Self {
        self.enclosing = Some(enclosing);
        self.flags = TypeAttributes::NESTED_PUBLIC | TypeAttributes::SEALED;
        self
    }

    /// Applies `System.FlagsAttribute`.
    #[must_use]
    pub fn flags(mut self) -> Self {
        self.is_flags = true;
        self
    }

    /// Adds a named value. The value is truncated to the underlying type.
    #[must_use]
    pub fn value(mut self, name: &str, value: i64) -> Self {
        self.values.push(EnumValueDefinition {
            name: name.to_string(),
            value,
        });
        self
    }

    /// Adds the enum to `module`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Unsupported`] if the underlying type is not an integer
    /// element type, or an invariant error if the enclosing type does not exist.
    pub fn build(self, module: &mut Module) -> Result<TypeId> {
        let mut ty = TypeDef::new(
            if self.enclosing.is_some() {
                ""
            } else {
                self.namespace.as_str()
            },
            &self.name,
            self.flags,
            Some(TypeName::new("System", "Enum")),
        );
        ty.enclosing = self.enclosing;
        if self.is_flags {
            ty.custom_attributes
                .push(TypeName::new("System", "FlagsAttribute"));
        }

        ty.fields.push(FieldDef {
            name: "value__".to_string(),
            flags: FieldAttributes::PUBLIC
                | FieldAttributes::SPECIAL_NAME
                | FieldAttributes::RTSPECIAL_NAME,
            signature: self.underlying_type.clone(),
            constant: None,
        });

        let signature = TypeSignature::ValueType(match self.enclosing {
            Some(enclosing) => {
                let outer = module.type_name(enclosing);
                TypeName::new(&outer.namespace, &format!("{}/{}", outer.name, self.name))
            }
            None => TypeName::new(&self.namespace, &self.name),
        });
        for value in self.values {
            let constant = Constant::integer(&self.underlying_type, value.value).ok_or_else(
                || {
                    crate::Error::Unsupported(format!(
                        "Enum underlying type {} is not an integer",
                        self.underlying_type
                    ))
                },
            )?;
            ty.fields.push(FieldDef {
                name: value.name,
                flags: FieldAttributes::PUBLIC
                    | FieldAttributes::STATIC
                    | FieldAttributes::LITERAL
                    | FieldAttributes::HAS_DEFAULT,
                signature: signature.clone(),
                constant: Some(constant),
            });
        }

        module.add_type(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_types_depth_first() -> Result<()> {
        let mut module = Module::new("test");
        let outer = module.add_type(TypeDef::new("App", "Outer", TypeAttributes::PUBLIC, None))?;
        let other = module.add_type(TypeDef::new("App", "Other", TypeAttributes::PUBLIC, None))?;
        let inner = EnumBuilder::new("Inner")
            .nested_in(outer)
            .value("A", 1)
            .build(&mut module)?;

        assert_eq!(module.type_ids_depth_first(), vec![outer, inner, other]);
        assert_eq!(module.type_name(inner).full_name(), "App.Outer/Inner");
        assert_eq!(
            module.find_type(&TypeName::parse("App.Outer/Inner")),
            Some(inner)
        );

        let field = &module.get_type(inner).unwrap().fields[1];
        assert!(field.is_literal());
        assert_eq!(
            field.signature,
            TypeSignature::ValueType(TypeName::new("App", "Outer/Inner"))
        );
        Ok(())
    }

    #[test]
    fn test_tokens_assigned() -> Result<()> {
        let mut module = Module::new("test");
        let ty = module.add_type(TypeDef::new("", "C", TypeAttributes::PUBLIC, None))?;
        let first = module.add_method(
            ty,
            MethodDef::new("A", MethodAttributes::STATIC, SignatureMethod::default(), None),
        )?;
        let second = module.add_method(
            ty,
            MethodDef::new("B", MethodAttributes::STATIC, SignatureMethod::default(), None),
        )?;

        assert_eq!(module.get_type(ty).unwrap().token, Token::type_def(1));
        assert_eq!(module.method(first).unwrap().token, Token::method_def(1));
        assert_eq!(module.method(second).unwrap().token, Token::method_def(2));
        assert!(module.add_method(TypeId(9), MethodDef::new("X", 0, SignatureMethod::default(), None)).is_err());
        Ok(())
    }

    #[test]
    fn test_enum_builder_truncates_to_underlying_type() -> Result<()> {
        let mut module = Module::new("test");
        let id = EnumBuilder::new("Small")
            .underlying_type(TypeSignature::U1)
            .value("Max", 255)
            .value("Wrapped", 256)
            .build(&mut module)?;

        let ty = module.get_type(id).unwrap();
        assert_eq!(ty.fields[1].constant, Some(Constant::U1(255)));
        assert_eq!(ty.fields[2].constant, Some(Constant::U1(0)));
        assert!(EnumBuilder::new("Bad")
            .underlying_type(TypeSignature::String)
            .value("A", 1)
            .build(&mut module)
            .is_err());
        Ok(())
    }
}
