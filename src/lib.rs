// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0


#![doc(html_no_source)]
#![deny(missing_docs)]

//! # dotrewrite
//!
//! A rewriter for CIL method bodies of managed modules. It replaces reflection-style enum
//! operations with specialized, statically generated code, and removes try/finally
//! regions from methods that must run where exception handling is unavailable.
//!
//! ## Features
//!
//! - **Call-site specialization** - `Enum.GetValues`, `Enum.IsDefined`,
//!   `Enum.GetUnderlyingType`, `HasFlag`, boxed `ToString` and `Equals` on enum values
//!   become direct calls to generated helpers, or constants when the arguments are literals
//! - **Decision-tree code generation** - per-enum `ToString`, `IsDefined`, `GetValues` and
//!   `Equals` built from jump tables and binary searches over contiguous value runs
//! - **Handler flattening** - nested try/finally regions become explicit state stores and
//!   switch dispatch, with every cleanup run exactly once, innermost first
//! - **Safe editing** - instructions live in an arena and are addressed by stable handles;
//!   branch targets, switch tables and region boundaries follow every edit
//! - **Verification** - a small CIL emulator executes original and rewritten bodies
//!
//! ## Quick Start
//!
//! ```rust
//! use dotrewrite::prelude::*;
//!
//! let mut module = Module::new("App");
//! let color = EnumBuilder::new("Color")
//!     .namespace("App")
//!     .value("Red", 0)
//!     .value("Green", 1)
//!     .value("Blue", 2)
//!     .build(&mut module)?;
//!
//! let platform = PlatformTypes::new();
//! let descriptor = EnumDescriptor::from_type(
//!     &module.type_name(color),
//!     module.get_type(color).ok_or(Error::Error("missing".into()))?,
//! )?;
//! let generator = EnumCodeGenerator::new(&platform, 2, 256);
//! let to_string = generator.generate(Operation::ToString, &descriptor)?;
//! assert!(to_string.len() > 3);
//! # Ok::<(), dotrewrite::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - opcodes, instructions, stack effects and the label-based assembler
//! - [`metadata`] - the module model: types, methods, bodies, signatures and resolution
//! - [`codegen`] - enum descriptors and the decision-tree code generator
//! - [`compiler`] - rewrite strategies, the stage scheduler and the event log
//! - [`emulation`] - the CIL interpreter used to verify rewrites
//! - [`file`] and [`project`] - locked module files and the batch driver
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Errors raised inside one method or
//! call site never abandon more than that method or site:
//!
//! ```rust
//! use dotrewrite::Error;
//!
//! let error = Error::Unsupported("fault region".to_string());
//! assert!(error.is_local());
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// Opcodes, instructions and method body assembly.
pub mod assembly;

/// Enum descriptors and specialized code generation.
pub mod codegen;

/// Rewrite strategies and their scheduling.
pub mod compiler;

/// CIL emulation for behavioral verification.
pub mod emulation;

/// Module file backends.
pub mod file;

/// The in-memory module model.
pub mod metadata;

/// Batch processing of module files.
pub mod project;

/// `dotrewrite` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotrewrite` Error type
///
/// Its variants describe the failure taxonomy of the rewriter.
pub use error::Error;
