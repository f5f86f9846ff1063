//! The CIL opcode subset read and written by the rewriter.
//!
//! Opcodes are kept in their long form: branch and local/argument operands are typed
//! handles and indices rather than encoded offsets, so the short encodings carry no
//! information at this level. Every opcode knows its mnemonic, operand shape, control
//! flow behavior and (when it does not depend on a signature) its stack effect.

use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::assembly::instruction::{FlowType, OperandType, StackBehavior};

/// A CIL opcode.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter, EnumCount)]
pub enum OpCode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "ldarga")]
    Ldarga,
    #[strum(serialize = "starg")]
    Starg,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "ldloca")]
    Ldloca,
    #[strum(serialize = "stloc")]
    Stloc,
    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "ldstr")]
    Ldstr,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    Brfalse,
    #[strum(serialize = "brtrue")]
    Brtrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bge")]
    Bge,
    #[strum(serialize = "bgt")]
    Bgt,
    #[strum(serialize = "ble")]
    Ble,
    #[strum(serialize = "blt")]
    Blt,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "bge.un")]
    BgeUn,
    #[strum(serialize = "bgt.un")]
    BgtUn,
    #[strum(serialize = "ble.un")]
    BleUn,
    #[strum(serialize = "blt.un")]
    BltUn,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "leave")]
    Leave,
    #[strum(serialize = "endfinally")]
    Endfinally,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "shl")]
    Shl,
    #[strum(serialize = "shr")]
    Shr,
    #[strum(serialize = "shr.un")]
    ShrUn,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "cgt.un")]
    CgtUn,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "clt.un")]
    CltUn,
    #[strum(serialize = "conv.i1")]
    ConvI1,
    #[strum(serialize = "conv.i2")]
    ConvI2,
    #[strum(serialize = "conv.i4")]
    ConvI4,
    #[strum(serialize = "conv.i8")]
    ConvI8,
    #[strum(serialize = "conv.u1")]
    ConvU1,
    #[strum(serialize = "conv.u2")]
    ConvU2,
    #[strum(serialize = "conv.u4")]
    ConvU4,
    #[strum(serialize = "conv.u8")]
    ConvU8,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "unbox")]
    Unbox,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "ldobj")]
    Ldobj,
    #[strum(serialize = "stobj")]
    Stobj,
    #[strum(serialize = "ldtoken")]
    Ldtoken,
    #[strum(serialize = "ldfld")]
    Ldfld,
    #[strum(serialize = "ldflda")]
    Ldflda,
    #[strum(serialize = "stfld")]
    Stfld,
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    #[strum(serialize = "ldsflda")]
    Ldsflda,
    #[strum(serialize = "stsfld")]
    Stsfld,
    #[strum(serialize = "newarr")]
    Newarr,
    #[strum(serialize = "ldlen")]
    Ldlen,
    #[strum(serialize = "ldelem")]
    Ldelem,
    #[strum(serialize = "stelem")]
    Stelem,
    #[strum(serialize = "castclass")]
    Castclass,
    #[strum(serialize = "isinst")]
    Isinst,
    #[strum(serialize = "initobj")]
    Initobj,
    #[strum(serialize = "constrained.")]
    Constrained,
}

impl OpCode {
    /// Returns the assembler mnemonic, e.g. `ldc.i4` or `bge.un`.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Returns the operand shape this opcode expects.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        match self {
            OpCode::Ldarg | OpCode::Ldarga | OpCode::Starg => OperandType::Argument,
            OpCode::Ldloc | OpCode::Ldloca | OpCode::Stloc => OperandType::Local,
            OpCode::LdcI4 => OperandType::Int32,
            OpCode::LdcI8 => OperandType::Int64,
            OpCode::LdcR4 => OperandType::Float32,
            OpCode::LdcR8 => OperandType::Float64,
            OpCode::Ldstr => OperandType::String,
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj => OperandType::Method,
            OpCode::Br
            | OpCode::Brfalse
            | OpCode::Brtrue
            | OpCode::Beq
            | OpCode::Bge
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Blt
            | OpCode::BneUn
            | OpCode::BgeUn
            | OpCode::BgtUn
            | OpCode::BleUn
            | OpCode::BltUn
            | OpCode::Leave => OperandType::Target,
            OpCode::Switch => OperandType::Switch,
            OpCode::Box
            | OpCode::Unbox
            | OpCode::UnboxAny
            | OpCode::Ldobj
            | OpCode::Stobj
            | OpCode::Ldtoken
            | OpCode::Newarr
            | OpCode::Ldelem
            | OpCode::Stelem
            | OpCode::Castclass
            | OpCode::Isinst
            | OpCode::Initobj
            | OpCode::Constrained => OperandType::Type,
            OpCode::Ldfld
            | OpCode::Ldflda
            | OpCode::Stfld
            | OpCode::Ldsfld
            | OpCode::Ldsflda
            | OpCode::Stsfld => OperandType::Field,
            _ => OperandType::None,
        }
    }

    /// Returns how control leaves an instruction with this opcode.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        match self {
            OpCode::Br => FlowType::UnconditionalBranch,
            OpCode::Brfalse
            | OpCode::Brtrue
            | OpCode::Beq
            | OpCode::Bge
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Blt
            | OpCode::BneUn
            | OpCode::BgeUn
            | OpCode::BgtUn
            | OpCode::BleUn
            | OpCode::BltUn => FlowType::ConditionalBranch,
            OpCode::Switch => FlowType::Switch,
            OpCode::Leave => FlowType::Leave,
            OpCode::Endfinally => FlowType::EndFinally,
            OpCode::Throw => FlowType::Throw,
            OpCode::Ret => FlowType::Return,
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj => FlowType::Call,
            _ => FlowType::Sequential,
        }
    }

    /// Returns the stack effect, or `None` when it depends on the method signature.
    #[must_use]
    pub fn stack_behavior(self) -> Option<StackBehavior> {
        let (pops, pushes) = match self {
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj | OpCode::Ret => return None,
            OpCode::Nop
            | OpCode::Br
            | OpCode::Leave
            | OpCode::Endfinally
            | OpCode::Constrained => (0, 0),
            OpCode::Ldarg
            | OpCode::Ldarga
            | OpCode::Ldloc
            | OpCode::Ldloca
            | OpCode::Ldnull
            | OpCode::LdcI4
            | OpCode::LdcI8
            | OpCode::LdcR4
            | OpCode::LdcR8
            | OpCode::Ldstr
            | OpCode::Ldtoken
            | OpCode::Ldsfld
            | OpCode::Ldsflda => (0, 1),
            OpCode::Starg
            | OpCode::Stloc
            | OpCode::Pop
            | OpCode::Brfalse
            | OpCode::Brtrue
            | OpCode::Switch
            | OpCode::Throw
            | OpCode::Stsfld
            | OpCode::Initobj => (1, 0),
            OpCode::Dup => (1, 2),
            OpCode::Beq
            | OpCode::Bge
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Blt
            | OpCode::BneUn
            | OpCode::BgeUn
            | OpCode::BgtUn
            | OpCode::BleUn
            | OpCode::BltUn
            | OpCode::Stobj
            | OpCode::Stfld => (2, 0),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::ShrUn
            | OpCode::Ceq
            | OpCode::Cgt
            | OpCode::CgtUn
            | OpCode::Clt
            | OpCode::CltUn
            | OpCode::Ldelem => (2, 1),
            OpCode::Stelem => (3, 0),
            OpCode::Neg
            | OpCode::Not
            | OpCode::ConvI1
            | OpCode::ConvI2
            | OpCode::ConvI4
            | OpCode::ConvI8
            | OpCode::ConvU1
            | OpCode::ConvU2
            | OpCode::ConvU4
            | OpCode::ConvU8
            | OpCode::Box
            | OpCode::Unbox
            | OpCode::UnboxAny
            | OpCode::Ldobj
            | OpCode::Ldfld
            | OpCode::Ldflda
            | OpCode::Newarr
            | OpCode::Ldlen
            | OpCode::Castclass
            | OpCode::Isinst => (1, 1),
        };

        Some(StackBehavior::new(pops, pushes))
    }

    /// Returns `true` for conditional branches, unconditional branches, `leave` and `switch`.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Leave
                | FlowType::Switch
        )
    }

    /// Returns `true` if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::UnconditionalBranch
                | FlowType::Leave
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
        )
    }
}
