//! CIL emulation for behavioral verification.
//!
//! The emulator executes method bodies of an in-memory [`crate::metadata::module::Module`]
//! so that a body can be compared against its rewritten form: same inputs, same return
//! value, same sequence of observable external calls.
//!
//! # Architecture
//!
//! - [`EmValue`] - the runtime value model (stack integers, strings, boxes, arrays,
//!   type handles)
//! - [`Interpreter`] - frame-based execution with exact `leave`/`endfinally` semantics
//! - [`Runtime`] - intrinsic models of the framework's reflection-style enum API
//! - [`Host`] - receiver for every other external call
//!
//! # Example
//!
//! ```rust
//! use dotrewrite::emulation::{EmValue, Interpreter, NullHost};
//! use dotrewrite::prelude::*;
//!
//! let platform = PlatformTypes::new();
//! let to_string = platform.convert_to_string(IntegerKind::I4);
//! let body = MethodBodyBuilder::new()
//!     .implementation(move |asm| {
//!         asm.ldc_i4(-7)?.call(to_string.clone())?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let module = Module::new("demo");
//! let resolver = Resolver::new();
//! let mut host = NullHost;
//! let mut interpreter = Interpreter::new(&module, &resolver, &platform, &mut host);
//! let text = interpreter.execute(&body, vec![])?.value()?;
//! assert_eq!(text, EmValue::string("-7"));
//! # Ok::<(), dotrewrite::Error>(())
//! ```

mod host;
mod interpreter;
mod runtime;
mod value;

pub use host::{Host, NullHost, RecordingHost};
pub use interpreter::{binary, compare, convert, unary, EmulationLimits, Interpreter, Outcome};
pub use runtime::Runtime;
pub use value::{EmArray, EmValue};
