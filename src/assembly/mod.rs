//! CIL instructions and the tools to build and analyze them.
//!
//! # Key Components
//!
//! - [`OpCode`] - The supported opcode subset with mnemonics and flow metadata
//! - [`Instruction`] / [`Operand`] - Opcode plus typed operand
//! - [`InstructionAssembler`] / [`MethodBodyBuilder`] - Label-based body construction
//! - [`stack`] - Stack effects and depth analysis

mod assembler;
mod instruction;
mod opcodes;
pub mod stack;

pub use assembler::{InstructionAssembler, MethodBodyBuilder};
pub use instruction::{
    FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior,
};
pub use opcodes::OpCode;
