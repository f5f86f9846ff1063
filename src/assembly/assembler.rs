//! Fluent, label-based construction of method bodies.
//!
//! [`InstructionAssembler`] collects instructions whose branch operands name string
//! labels, and resolves every label to an [`crate::metadata::method::InstrId`] when the
//! body is finished. [`MethodBodyBuilder`] wraps it with local variable declarations.
//!
//! # Examples
//!
//! ```rust
//! use dotrewrite::prelude::*;
//!
//! let mut asm = InstructionAssembler::new();
//! asm.ldarg_0()?
//!     .brtrue("nonzero")?
//!     .ldc_i4(0)?
//!     .ret()?
//!     .label("nonzero")?
//!     .ldc_i4(1)?
//!     .ret()?;
//! let body = asm.finish()?;
//! assert_eq!(body.len(), 6);
//! # Ok::<(), dotrewrite::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{Instruction, OpCode, Operand},
    metadata::{
        method::{ExceptionHandler, InstrId, MethodBody},
        signatures::{MethodRefRc, TypeSignature},
    },
    Result,
};

/// Type alias for method body implementation closures
type ImplementationFn = Box<dyn FnOnce(&mut InstructionAssembler) -> Result<()>>;

enum Pending {
    Plain(Instruction),
    Branch(OpCode, String),
    Switch(Vec<String>),
}

struct PendingRegion {
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
}

/// Label-based instruction assembler.
#[derive(Default)]
pub struct InstructionAssembler {
    pending: Vec<Pending>,
    labels: HashMap<String, usize>,
    regions: Vec<PendingRegion>,
    locals: Vec<TypeSignature>,
}

impl InstructionAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Declares a local variable and returns its index.
    pub fn declare_local(&mut self, ty: TypeSignature) -> u16 {
        self.locals.push(ty);
        (self.locals.len() - 1) as u16
    }

    /// Binds `name` to the next emitted instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if the label is already bound.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        if self.labels.insert(name.to_string(), self.pending.len()).is_some() {
            return Err(invariant_error!("Label '{}' defined twice", name));
        }
        Ok(self)
    }

    /// Emits a complete instruction. Branches must use label-based methods instead.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] for branch instructions or mismatched operands.
    pub fn emit(&mut self, instr: Instruction) -> Result<&mut Self> {
        if instr.opcode.is_branch() || !instr.is_well_formed() {
            return Err(invariant_error!("Cannot emit '{}' directly", instr));
        }
        self.pending.push(Pending::Plain(instr));
        Ok(self)
    }

    /// Emits an operand-less instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `opcode` requires an operand.
    pub fn op(&mut self, opcode: OpCode) -> Result<&mut Self> {
        self.emit(Instruction::new(opcode))
    }

    /// Emits a single-target branch (or `leave`) to `label`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `opcode` is not a single-target branch.
    pub fn branch(&mut self, opcode: OpCode, label: &str) -> Result<&mut Self> {
        if opcode.operand_type() != crate::assembly::OperandType::Target {
            return Err(invariant_error!("'{}' is not a branch", opcode.mnemonic()));
        }
        self.pending
            .push(Pending::Branch(opcode, label.to_string()));
        Ok(self)
    }

    /// Emits a `switch` over `labels`.
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn switch<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<&mut Self> {
        self.pending.push(Pending::Switch(
            labels.iter().map(|label| label.as_ref().to_string()).collect(),
        ));
        Ok(self)
    }

    /// Registers a try/finally region delimited by four labels. End labels may be bound
    /// past the last instruction.
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn try_finally(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> Result<&mut Self> {
        self.regions.push(PendingRegion {
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
        });
        Ok(self)
    }

    /// `ldarg index`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::ldarg(index))
    }

    /// `ldarg 0`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ldarg_0(&mut self) -> Result<&mut Self> {
        self.ldarg(0)
    }

    /// `ldarg 1`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ldarg_1(&mut self) -> Result<&mut Self> {
        self.ldarg(1)
    }

    /// `ldloc index`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::ldloc(index))
    }

    /// `stloc index`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        self.emit(Instruction::stloc(index))
    }

    /// `ldc.i4 value`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        self.emit(Instruction::ldc_i4(value))
    }

    /// `ldc.i8 value`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.emit(Instruction::ldc_i8(value))
    }

    /// `ldstr value`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ldstr(&mut self, value: &str) -> Result<&mut Self> {
        self.emit(Instruction::ldstr(value))
    }

    /// `call method`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn call(&mut self, method: MethodRefRc) -> Result<&mut Self> {
        self.emit(Instruction::call(OpCode::Call, method))
    }

    /// `callvirt method`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn callvirt(&mut self, method: MethodRefRc) -> Result<&mut Self> {
        self.emit(Instruction::call(OpCode::Callvirt, method))
    }

    /// `newobj ctor`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn newobj(&mut self, ctor: MethodRefRc) -> Result<&mut Self> {
        self.emit(Instruction::call(OpCode::Newobj, ctor))
    }

    /// An instruction with a type operand, e.g. `box`, `newarr` or `ldtoken`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `opcode` takes no type operand.
    pub fn typed(&mut self, opcode: OpCode, ty: TypeSignature) -> Result<&mut Self> {
        self.emit(Instruction::typed(opcode, ty))
    }

    /// `ret`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Ret)
    }

    /// `pop`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn pop(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Pop)
    }

    /// `dup`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn dup(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Dup)
    }

    /// `nop`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn nop(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Nop)
    }

    /// `add`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn add(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Add)
    }

    /// `sub`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn sub(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Sub)
    }

    /// `and`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn and(&mut self) -> Result<&mut Self> {
        self.op(OpCode::And)
    }

    /// `or`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn or(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Or)
    }

    /// `ceq`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn ceq(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Ceq)
    }

    /// `stelem type`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn stelem(&mut self, ty: TypeSignature) -> Result<&mut Self> {
        self.typed(OpCode::Stelem, ty)
    }

    /// `endfinally`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn endfinally(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Endfinally)
    }

    /// `throw`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn throw(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Throw)
    }

    /// `br label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn br(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Br, label)
    }

    /// `brtrue label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn brtrue(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Brtrue, label)
    }

    /// `brfalse label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn brfalse(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Brfalse, label)
    }

    /// `beq label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn beq(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Beq, label)
    }

    /// `blt label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn blt(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Blt, label)
    }

    /// `blt.un label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn blt_un(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::BltUn, label)
    }

    /// `bge.un label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn bge_un(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::BgeUn, label)
    }

    /// `leave label`
    ///
    /// # Errors
    /// Never fails; returns `Result` for chaining.
    pub fn leave(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Leave, label)
    }

    /// Resolves every label and produces the method body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] for unbound labels, or for branches to a label
    /// bound past the last instruction.
    pub fn finish(self) -> Result<MethodBody> {
        let mut body = MethodBody::new();
        for local in self.locals {
            body.add_local(local)?;
        }

        let mut ids = Vec::with_capacity(self.pending.len());
        let mut fixups = Vec::new();
        for pending in self.pending {
            let id = match pending {
                Pending::Plain(instr) => body.push(instr)?,
                Pending::Branch(opcode, label) => {
                    let id = body.push(Instruction::new(opcode))?;
                    fixups.push((id, vec![label], false));
                    id
                }
                Pending::Switch(labels) => {
                    let id = body.push(Instruction::new(OpCode::Switch))?;
                    fixups.push((id, labels, true));
                    id
                }
            };
            ids.push(id);
        }

        let resolve = |label: &str| -> Result<Option<InstrId>> {
            match self.labels.get(label) {
                Some(position) => Ok(ids.get(*position).copied()),
                None => Err(invariant_error!("Label '{}' is never defined", label)),
            }
        };
        let resolve_target = |label: &str| -> Result<InstrId> {
            resolve(label)?
                .ok_or_else(|| invariant_error!("Branch to label '{}' past the end", label))
        };

        for (id, labels, is_switch) in fixups {
            let operand = if is_switch {
                Operand::Switch(
                    labels
                        .iter()
                        .map(|label| resolve_target(label.as_str()))
                        .collect::<Result<Vec<_>>>()?,
                )
            } else {
                Operand::Target(resolve_target(labels[0].as_str())?)
            };
            body.set_operand(id, operand)?;
        }

        for region in self.regions {
            body.add_exception_handler(ExceptionHandler::finally(
                resolve_target(region.try_start.as_str())?,
                resolve(region.try_end.as_str())?,
                resolve_target(region.handler_start.as_str())?,
                resolve(region.handler_end.as_str())?,
            ))?;
        }

        Ok(body)
    }
}

/// Builder for complete method bodies.
///
/// # Examples
///
/// ```rust
/// use dotrewrite::prelude::*;
///
/// let body = MethodBodyBuilder::new()
///     .local("temp", TypeSignature::I4)
///     .implementation(|asm| {
///         asm.ldarg_0()?.stloc(0)?.ldloc(0)?.ret()?;
///         Ok(())
///     })
///     .build()?;
/// assert_eq!(body.locals(), &[TypeSignature::I4]);
/// # Ok::<(), dotrewrite::Error>(())
/// ```
#[derive(Default)]
pub struct MethodBodyBuilder {
    init_locals: bool,
    locals: Vec<(String, TypeSignature)>,
    implementation: Option<ImplementationFn>,
}

impl MethodBodyBuilder {
    /// Create a new method body builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            init_locals: true,
            locals: Vec::new(),
            implementation: None,
        }
    }

    /// Declares a named local variable; locals are numbered in declaration order.
    #[must_use]
    pub fn local(mut self, name: &str, ty: TypeSignature) -> Self {
        self.locals.push((name.to_string(), ty));
        self
    }

    /// Sets whether locals are zero-initialized.
    #[must_use]
    pub fn init_locals(mut self, init_locals: bool) -> Self {
        self.init_locals = init_locals;
        self
    }

    /// Sets the closure that emits the instructions.
    #[must_use]
    pub fn implementation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(f));
        self
    }

    /// Builds the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] without implementation, or any assembler error.
    pub fn build(self) -> Result<MethodBody> {
        let implementation = self
            .implementation
            .ok_or_else(|| crate::Error::Error("Method body has no implementation".to_string()))?;

        let mut asm = InstructionAssembler::new();
        for (_, ty) in self.locals {
            asm.declare_local(ty);
        }
        implementation(&mut asm)?;

        let mut body = asm.finish()?;
        body.init_locals = self.init_locals;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_labels_resolve_to_handles() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldarg_0()?
            .switch(&["a", "b"])?
            .br("a")?
            .label("a")?
            .ldc_i4(1)?
            .ret()?
            .label("b")?
            .ldc_i4(2)?
            .ret()?;
        let body = asm.finish()?;
        assert_eq!(
            body.listing(),
            vec![
                "IL_0000: ldarg A_0",
                "IL_0001: switch (IL_0003, IL_0005)",
                "IL_0002: br IL_0003",
                "IL_0003: ldc.i4 1",
                "IL_0004: ret",
                "IL_0005: ldc.i4 2",
                "IL_0006: ret",
            ]
        );
        body.validate()
    }

    #[test]
    fn test_region_end_past_last_instruction() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.label("try")?
            .leave("done")?
            .label("finally")?
            .endfinally()?
            .label("done")?
            .ret()?
            .label("end")?;
        asm.try_finally("try", "finally", "finally", "done")?;
        let body = asm.finish()?;
        assert_eq!(body.exception_handlers().len(), 1);
        assert!(body.exception_handlers()[0].handler_end.is_some());

        let mut asm = InstructionAssembler::new();
        asm.label("t")?.nop()?.label("h")?.endfinally()?.label("end")?;
        asm.try_finally("t", "h", "h", "end")?;
        let body = asm.finish()?;
        assert_eq!(body.exception_handlers()[0].handler_end, None);
        Ok(())
    }

    #[test]
    fn test_label_errors() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.label("x")?;
        assert!(asm.label("x").is_err());

        let mut asm = InstructionAssembler::new();
        asm.br("missing")?;
        assert!(matches!(asm.finish(), Err(Error::Invariant { .. })));

        let mut asm = InstructionAssembler::new();
        asm.br("end")?.label("end")?;
        assert!(asm.finish().is_err());

        let mut asm = InstructionAssembler::new();
        assert!(asm.emit(Instruction::new(OpCode::Br)).is_err());
        Ok(())
    }
}
