//! Type and member signatures.
//!
//! Signatures describe the types of locals, fields and method parameters, and identify
//! the targets of `call`, `ldfld` and `ldtoken` operands. Types are identified by name
//! rather than by table row so that references into platform modules resolve the same
//! way as references into the module being rewritten.
//!
//! # Key Components
//!
//! - [`crate::metadata::signatures::TypeSignature`] - An element type or named type
//! - [`crate::metadata::signatures::TypeName`] - Namespace-qualified type identity
//! - [`crate::metadata::signatures::SignatureMethod`] - Parameter and return types of a method
//! - [`crate::metadata::signatures::MethodRef`] / [`crate::metadata::signatures::FieldRef`] -
//!   Member references used as instruction operands

mod types;

pub use types::*;
