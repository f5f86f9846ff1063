//! # dotrewrite Prelude
//!
//! This module provides a convenient prelude for the most commonly used types of the
//! dotrewrite library. Import it to get quick access to the essential types for building
//! modules, rewriting method bodies and verifying the result.
//!
//! ```rust
//! use dotrewrite::prelude::*;
//!
//! let body = MethodBodyBuilder::new()
//!     .implementation(|asm| {
//!         asm.nop()?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//! assert_eq!(body.listing(), vec!["IL_0000: nop", "IL_0001: ret"]);
//! # Ok::<(), dotrewrite::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotrewrite operations
pub use crate::Error;

/// The result type used throughout dotrewrite
pub use crate::Result;

// ================================================================================================
// Instructions and Method Bodies
// ================================================================================================

/// Instruction model
pub use crate::assembly::{FlowType, Instruction, OpCode, Operand};

/// Fluent body construction
pub use crate::assembly::{InstructionAssembler, MethodBodyBuilder};

/// Instruction stream and protected regions
pub use crate::metadata::method::{ExceptionHandler, ExceptionHandlerFlags, InstrId, MethodBody};

// ================================================================================================
// Module Model
// ================================================================================================

/// Types, methods and fields of a module
pub use crate::metadata::module::{
    EnumBuilder, FieldDef, MethodDef, MethodId, Module, TypeDef, TypeId,
};

/// Attribute flag constants
pub use crate::metadata::module::{FieldAttributes, MethodAttributes, TypeAttributes};

/// Signatures and references
pub use crate::metadata::signatures::{MethodRef, MethodRefRc, SignatureMethod, TypeName, TypeSignature};

/// Metadata tokens
pub use crate::metadata::token::Token;

/// Platform references and type resolution
pub use crate::metadata::{platform::PlatformTypes, resolver::Resolver};

// ================================================================================================
// Code Generation
// ================================================================================================

/// Enum descriptors and values
pub use crate::codegen::{EnumDescriptor, EnumValue, IntegerKind};

/// Helper generation
pub use crate::codegen::{EnumCodeGenerator, Operation};

// ================================================================================================
// Rewriting
// ================================================================================================

/// Configuration, context and scheduling
pub use crate::compiler::{CompilerContext, PassScheduler, RewriterConfig, Stage, Strategy};

/// Rewrite events
pub use crate::compiler::{EventKind, EventLog};

/// Batch driver
pub use crate::project::{ModuleFormat, ProcessResult, Rewriter};

// ================================================================================================
// Verification
// ================================================================================================

/// CIL emulation
pub use crate::emulation::{EmValue, Host, Interpreter, NullHost, Outcome, RecordingHost};
