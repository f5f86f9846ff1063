//! Structural metadata of managed modules.
//!
//! This module holds the in-memory model the rewriter mutates: types, fields, methods and
//! their bodies, plus the signatures and references that instruction operands carry.
//!
//! # Key Components
//!
//! - [`module`] - [`module::Module`] arena of type definitions with fields and methods
//! - [`method`] - Method bodies, the instruction stream and exception handler regions
//! - [`signatures`] - Type and member signatures used by operands
//! - [`token`] - Metadata tokens identifying definitions
//! - [`resolver`] - Type resolution across the module and its platform modules
//! - [`platform`] - Framework method references used for matching and code generation

/// Implementation of method bodies and their instruction streams
pub mod method;
/// Implementation of the structural module model
pub mod module;
/// Implementation of the platform method references
pub mod platform;
/// Implementation of the type resolver
pub mod resolver;
/// Implementation of method and type signatures
pub mod signatures;
/// Implementation of metadata tokens
pub mod token;
