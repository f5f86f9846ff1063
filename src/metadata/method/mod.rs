//! Method bodies: instruction streams, locals and exception handler regions.
//!
//! # Key Components
//!
//! - [`MethodBody`] - Owns a body and is its only mutation gateway
//! - [`InstructionStream`] / [`InstrId`] - Arena-backed instruction sequence with stable handles
//! - [`ExceptionHandler`] / [`ExceptionHandlerFlags`] - Protected regions

mod body;
mod exceptions;
mod stream;

pub use body::MethodBody;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use stream::{InstrId, InstructionStream, StreamIter};
