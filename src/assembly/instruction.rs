//! Instruction, operand and stack effect representation.
//!
//! An [`crate::assembly::instruction::Instruction`] is an opcode plus a typed operand.
//! Branch operands hold [`crate::metadata::method::InstrId`] handles of other
//! instructions in the same [`crate::metadata::method::MethodBody`], never offsets, so an
//! instruction carries no position of its own and edits elsewhere in the body never
//! invalidate it.
//!
//! # Key Components
//!
//! - [`crate::assembly::instruction::Instruction`] - Opcode and operand
//! - [`crate::assembly::instruction::Operand`] - Type-safe operand representation
//! - [`crate::assembly::instruction::Immediate`] - Numeric immediates
//! - [`crate::assembly::instruction::FlowType`] - Control flow behavior classification
//! - [`crate::assembly::instruction::StackBehavior`] - Stack effect metadata

use std::fmt;

use crate::{
    assembly::opcodes::OpCode,
    metadata::{
        method::InstrId,
        signatures::{FieldRefRc, MethodRefRc, TypeSignature},
    },
};

/// Operand shape expected by an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// String literal
    String,
    /// Type reference
    Type,
    /// Field reference
    Field,
    /// Method reference
    Method,
    /// Local variable index
    Local,
    /// Argument index
    Argument,
    /// Single branch target
    Target,
    /// Branch target table
    Switch,
}

/// A numeric immediate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 32-bit integer immediate value
    Int32(i32),
    /// Signed 64-bit integer immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate constant value
    Immediate(Immediate),
    /// String literal
    String(String),
    /// Type reference
    Type(TypeSignature),
    /// Field reference
    Field(FieldRefRc),
    /// Method reference
    Method(MethodRefRc),
    /// Local variable index
    Local(u16),
    /// Argument index
    Argument(u16),
    /// Single branch target
    Target(InstrId),
    /// Branch target table of a `switch`
    Switch(Vec<InstrId>),
}

impl Operand {
    /// Returns the shape of this operand.
    #[must_use]
    pub fn operand_type(&self) -> OperandType {
        match self {
            Operand::None => OperandType::None,
            Operand::Immediate(Immediate::Int32(_)) => OperandType::Int32,
            Operand::Immediate(Immediate::Int64(_)) => OperandType::Int64,
            Operand::Immediate(Immediate::Float32(_)) => OperandType::Float32,
            Operand::Immediate(Immediate::Float64(_)) => OperandType::Float64,
            Operand::String(_) => OperandType::String,
            Operand::Type(_) => OperandType::Type,
            Operand::Field(_) => OperandType::Field,
            Operand::Method(_) => OperandType::Method,
            Operand::Local(_) => OperandType::Local,
            Operand::Argument(_) => OperandType::Argument,
            Operand::Target(_) => OperandType::Target,
            Operand::Switch(_) => OperandType::Switch,
        }
    }
}

/// Control flow behavior of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
}

/// Stack effect of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: i8,
}

impl StackBehavior {
    /// Creates a stack behavior from its pop and push counts.
    #[must_use]
    pub fn new(pops: u8, pushes: u8) -> Self {
        StackBehavior {
            pops,
            pushes,
            net_effect: pushes as i8 - pops as i8,
        }
    }
}

/// A CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The operand, shaped as `opcode.operand_type()` demands
    pub operand: Operand,
}

impl Instruction {
    /// An instruction without operand.
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// An instruction with an operand.
    #[must_use]
    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Self::with_operand(OpCode::LdcI4, Operand::Immediate(Immediate::Int32(value)))
    }

    /// `ldc.i8 value`
    #[must_use]
    pub fn ldc_i8(value: i64) -> Self {
        Self::with_operand(OpCode::LdcI8, Operand::Immediate(Immediate::Int64(value)))
    }

    /// `ldstr value`
    #[must_use]
    pub fn ldstr(value: &str) -> Self {
        Self::with_operand(OpCode::Ldstr, Operand::String(value.to_string()))
    }

    /// `ldloc index`
    #[must_use]
    pub fn ldloc(index: u16) -> Self {
        Self::with_operand(OpCode::Ldloc, Operand::Local(index))
    }

    /// `stloc index`
    #[must_use]
    pub fn stloc(index: u16) -> Self {
        Self::with_operand(OpCode::Stloc, Operand::Local(index))
    }

    /// `ldarg index`
    #[must_use]
    pub fn ldarg(index: u16) -> Self {
        Self::with_operand(OpCode::Ldarg, Operand::Argument(index))
    }

    /// A single-target branch, also used for `leave`.
    #[must_use]
    pub fn branch(opcode: OpCode, target: InstrId) -> Self {
        Self::with_operand(opcode, Operand::Target(target))
    }

    /// `switch (targets...)`
    #[must_use]
    pub fn switch(targets: Vec<InstrId>) -> Self {
        Self::with_operand(OpCode::Switch, Operand::Switch(targets))
    }

    /// `call`, `callvirt` or `newobj` of a method reference.
    #[must_use]
    pub fn call(opcode: OpCode, method: MethodRefRc) -> Self {
        Self::with_operand(opcode, Operand::Method(method))
    }

    /// An instruction with a type operand, e.g. `box` or `ldtoken`.
    #[must_use]
    pub fn typed(opcode: OpCode, ty: TypeSignature) -> Self {
        Self::with_operand(opcode, Operand::Type(ty))
    }

    /// Control flow behavior of the opcode.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Returns `true` if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.opcode.is_terminal()
    }

    /// Returns `true` if the operand shape matches what the opcode expects.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.opcode.operand_type() == self.operand.operand_type()
    }

    /// All branch targets, in operand order.
    #[must_use]
    pub fn targets(&self) -> Vec<InstrId> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// The target of a single-target branch.
    #[must_use]
    pub fn target(&self) -> Option<InstrId> {
        match self.operand {
            Operand::Target(target) => Some(target),
            _ => None,
        }
    }

    /// Rewrites every branch target equal to `from` into `to`, returning how many
    /// slots changed.
    pub(crate) fn retarget(&mut self, from: InstrId, to: InstrId) -> usize {
        match &mut self.operand {
            Operand::Target(target) if *target == from => {
                *target = to;
                1
            }
            Operand::Switch(targets) => {
                let mut changed = 0;
                for target in targets.iter_mut().filter(|target| **target == from) {
                    *target = to;
                    changed += 1;
                }
                changed
            }
            _ => 0,
        }
    }

    /// The value of an `ldc.i4`.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match (self.opcode, &self.operand) {
            (OpCode::LdcI4, Operand::Immediate(Immediate::Int32(value))) => Some(*value),
            _ => None,
        }
    }

    /// The value of an `ldc.i4` or `ldc.i8`, widened to 64 bits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match (self.opcode, &self.operand) {
            (OpCode::LdcI8, Operand::Immediate(Immediate::Int64(value))) => Some(*value),
            _ => self.as_i32().map(i64::from),
        }
    }

    /// The type operand, if any.
    #[must_use]
    pub fn type_operand(&self) -> Option<&TypeSignature> {
        match &self.operand {
            Operand::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// The method operand, if any.
    #[must_use]
    pub fn method_operand(&self) -> Option<&MethodRefRc> {
        match &self.operand {
            Operand::Method(method) => Some(method),
            _ => None,
        }
    }

    /// The string operand of an `ldstr`.
    #[must_use]
    pub fn string_operand(&self) -> Option<&str> {
        match &self.operand {
            Operand::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` for `opcode` applied to exactly the type `ty`.
    #[must_use]
    pub fn is_typed(&self, opcode: OpCode, ty: &TypeSignature) -> bool {
        self.opcode == opcode && self.type_operand() == Some(ty)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(Immediate::Int32(value)) => write!(f, " {value}"),
            Operand::Immediate(Immediate::Int64(value)) => write!(f, " {value}"),
            Operand::Immediate(Immediate::Float32(value)) => write!(f, " {value}"),
            Operand::Immediate(Immediate::Float64(value)) => write!(f, " {value}"),
            Operand::String(value) => write!(f, " {value:?}"),
            Operand::Type(ty) => write!(f, " {ty}"),
            Operand::Field(field) => write!(f, " {field}"),
            Operand::Method(method) => write!(f, " {method}"),
            Operand::Local(index) => write!(f, " V_{index}"),
            Operand::Argument(index) => write!(f, " A_{index}"),
            Operand::Target(target) => write!(f, " {target}"),
            Operand::Switch(targets) => {
                write!(f, " (")?;
                for (index, target) in targets.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{target}")?;
                }
                write!(f, ")")
            }
        }
    }
}
