//! The mutable body of a method and its single mutation gateway.
//!
//! [`MethodBody`] owns the instruction sequence, the local variable slots and the
//! exception handler regions of one method. Every structural edit goes through its
//! methods, which keep the cross references consistent in the same step:
//!
//! - single-target branch operands,
//! - every slot of every `switch` table,
//! - every exception region boundary.
//!
//! [`MethodBody::replace`] moves all references from the old instruction to its
//! replacement. [`MethodBody::remove`] moves branch references to the logical successor
//! (the structural next instruction, or the jump target when the removed instruction is
//! `br` or `leave`) and region boundaries to the structural next instruction. Requests
//! that cannot be honored, such as removing the referenced last instruction, fail with
//! [`crate::Error::Invariant`] and leave the body unchanged.
//!
//! # Examples
//!
//! ```rust
//! use dotrewrite::prelude::*;
//!
//! let mut body = MethodBody::new();
//! let load = body.push(Instruction::ldc_i4(1))?;
//! let ret = body.push(Instruction::new(OpCode::Ret))?;
//! body.insert_after(load, Instruction::new(OpCode::Pop))?;
//! body.insert_before(ret, Instruction::ldc_i4(2))?;
//! assert_eq!(body.len(), 4);
//! # Ok::<(), dotrewrite::Error>(())
//! ```

use std::{collections::HashMap, fmt};

use crate::{
    assembly::{Instruction, OpCode, Operand},
    metadata::{
        method::{ExceptionHandler, InstrId, InstructionStream, StreamIter},
        signatures::TypeSignature,
    },
    Result,
};

/// Describes one method that has been compiled to CIL bytecode.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    stream: InstructionStream,
    locals: Vec<TypeSignature>,
    exception_handlers: Vec<ExceptionHandler>,
    /// Flag, indicating to call default constructor on all local variables
    pub init_locals: bool,
}

impl MethodBody {
    /// An empty body.
    #[must_use]
    pub fn new() -> Self {
        MethodBody {
            init_locals: true,
            ..MethodBody::default()
        }
    }

    /// The underlying instruction sequence.
    #[must_use]
    pub fn instructions(&self) -> &InstructionStream {
        &self.stream
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    /// Returns `true` if the body has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// First instruction.
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.stream.first()
    }

    /// Last instruction.
    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.stream.last()
    }

    /// Structural successor of `id`.
    #[must_use]
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.stream.next(id)
    }

    /// Structural predecessor of `id`.
    #[must_use]
    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.stream.prev(id)
    }

    /// The instruction behind `id`.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.stream.get(id)
    }

    /// Returns `true` if `id` is part of this body.
    #[must_use]
    pub fn contains(&self, id: InstrId) -> bool {
        self.stream.contains(id)
    }

    /// Iterates `(handle, instruction)` pairs in order.
    pub fn iter(&self) -> StreamIter<'_> {
        self.stream.iter()
    }

    /// Handles in order.
    #[must_use]
    pub fn ids(&self) -> Vec<InstrId> {
        self.stream.ids()
    }

    /// Maps handles to ordinal positions.
    #[must_use]
    pub fn positions(&self) -> HashMap<InstrId, usize> {
        self.stream.positions()
    }

    /// Declared local variable types.
    #[must_use]
    pub fn locals(&self) -> &[TypeSignature] {
        &self.locals
    }

    /// Declares a new local variable and returns its index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] when the local table is full.
    pub fn add_local(&mut self, ty: TypeSignature) -> Result<u16> {
        let index = u16::try_from(self.locals.len())
            .map_err(|_| invariant_error!("Too many locals in method body"))?;
        self.locals.push(ty);
        Ok(index)
    }

    /// Exception handler regions.
    #[must_use]
    pub fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.exception_handlers
    }

    /// Registers an exception handler region.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if a boundary is not part of this body.
    pub fn add_exception_handler(&mut self, handler: ExceptionHandler) -> Result<()> {
        for boundary in handler.boundaries() {
            self.require(boundary)?;
        }
        self.exception_handlers.push(handler);
        Ok(())
    }

    /// Drops every exception handler region.
    pub fn clear_exception_handlers(&mut self) {
        self.exception_handlers.clear();
    }

    /// Appends an instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if a branch target is not part of this body.
    pub fn push(&mut self, instr: Instruction) -> Result<InstrId> {
        self.require_targets(&instr)?;
        Ok(self.stream.push_back(instr))
    }

    /// Inserts an instruction after `anchor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `anchor` or a branch target is missing.
    pub fn insert_after(&mut self, anchor: InstrId, instr: Instruction) -> Result<InstrId> {
        self.require(anchor)?;
        self.require_targets(&instr)?;
        Ok(self.stream.link_after(anchor, instr))
    }

    /// Inserts an instruction before `anchor`.
    ///
    /// References to `anchor` keep pointing at `anchor`, so branches to it skip the
    /// inserted instruction. Use [`MethodBody::replace`] to take over its references.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `anchor` or a branch target is missing.
    pub fn insert_before(&mut self, anchor: InstrId, instr: Instruction) -> Result<InstrId> {
        self.require(anchor)?;
        self.require_targets(&instr)?;
        Ok(self.stream.link_before(anchor, instr))
    }

    /// Replaces `target` with `replacement`, moving every reference along.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `target` or a branch target is missing.
    pub fn replace(&mut self, target: InstrId, replacement: Instruction) -> Result<InstrId> {
        self.require(target)?;
        self.require_targets(&replacement)?;

        let new_id = self.stream.link_after(target, replacement);
        self.retarget_branches(target, new_id);
        self.retarget_boundaries(target, Some(new_id));
        self.stream.unlink(target);
        Ok(new_id)
    }

    /// Removes `target`, moving references to its successor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `target` is missing, or if it is still
    /// referenced but has no successor to take its place.
    pub fn remove(&mut self, target: InstrId) -> Result<()> {
        let instr = self.require(target)?;
        let structural = self.stream.next(target);
        let logical = match instr.opcode {
            OpCode::Br | OpCode::Leave => instr.target(),
            _ => structural,
        };

        if self.is_branch_target(target) {
            match logical {
                Some(successor) if successor != target => {
                    self.retarget_branches(target, successor);
                }
                _ => {
                    return Err(invariant_error!(
                        "Cannot remove {} - branch references have no successor",
                        target
                    ))
                }
            }
        }

        for handler in &self.exception_handlers {
            if structural.is_none()
                && (handler.try_start == target
                    || handler.handler_start == target
                    || handler.filter_start == Some(target))
            {
                return Err(invariant_error!(
                    "Cannot remove {} - region start has no successor",
                    target
                ));
            }
        }

        self.retarget_boundaries(target, structural);
        self.stream.unlink(target);
        Ok(())
    }

    /// Sets the operand of `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if `id` or a new branch target is missing.
    pub fn set_operand(&mut self, id: InstrId, operand: Operand) -> Result<()> {
        let probe = Instruction::with_operand(OpCode::Nop, operand);
        self.require_targets(&probe)?;
        match self.stream.get_mut(id) {
            Some(instr) => {
                instr.operand = probe.operand;
                Ok(())
            }
            None => Err(invariant_error!("Instruction {} is not part of this body", id)),
        }
    }

    /// Redirects every branch operand and region boundary from `from` to `to`.
    ///
    /// Returns the number of branch slots that changed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if either handle is missing.
    pub fn retarget(&mut self, from: InstrId, to: InstrId) -> Result<usize> {
        self.require(from)?;
        self.require(to)?;
        let changed = self.retarget_branches(from, to);
        self.retarget_boundaries(from, Some(to));
        Ok(changed)
    }

    /// Instructions whose branch operand references `id`.
    #[must_use]
    pub fn referrers(&self, id: InstrId) -> Vec<InstrId> {
        self.stream
            .iter()
            .filter(|(_, instr)| instr.targets().contains(&id))
            .map(|(referrer, _)| referrer)
            .collect()
    }

    /// Returns `true` if some branch operand references `id`.
    #[must_use]
    pub fn is_branch_target(&self, id: InstrId) -> bool {
        self.stream
            .iter()
            .any(|(_, instr)| instr.targets().contains(&id))
    }

    /// Returns `true` if some region boundary references `id`.
    #[must_use]
    pub fn is_region_boundary(&self, id: InstrId) -> bool {
        self.exception_handlers
            .iter()
            .any(|handler| handler.boundaries().contains(&id))
    }

    /// Checks every structural invariant of the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        let positions = self.positions();
        for (id, instr) in self.iter() {
            if !instr.is_well_formed() {
                return Err(invariant_error!("Malformed operand at {}: {}", id, instr));
            }
            for target in instr.targets() {
                if !positions.contains_key(&target) {
                    return Err(invariant_error!("Dangling branch target {} at {}", target, id));
                }
            }
            if let Operand::Local(index) = instr.operand {
                if usize::from(index) >= self.locals.len() {
                    return Err(invariant_error!("Undeclared local {} at {}", index, id));
                }
            }
        }

        let end = positions.len();
        for handler in &self.exception_handlers {
            let position = |boundary: Option<InstrId>| -> Result<usize> {
                match boundary {
                    None => Ok(end),
                    Some(id) => positions
                        .get(&id)
                        .copied()
                        .ok_or_else(|| invariant_error!("Dangling region boundary {}", id)),
                }
            };
            let try_start = position(Some(handler.try_start))?;
            let try_end = position(handler.try_end)?;
            let handler_start = position(Some(handler.handler_start))?;
            let handler_end = position(handler.handler_end)?;
            position(handler.filter_start)?;
            if try_start >= try_end || handler_start >= handler_end {
                return Err(invariant_error!(
                    "Empty or inverted region at {}",
                    handler.try_start
                ));
            }
        }

        Ok(())
    }

    /// Renders the body with positional labels, one line per instruction.
    ///
    /// Two bodies with the same listing have identical opcode and operand sequences.
    #[must_use]
    pub fn listing(&self) -> Vec<String> {
        let positions = self.positions();
        let label = |id: &InstrId| match positions.get(id) {
            Some(position) => format!("IL_{position:04}"),
            None => format!("?{id}"),
        };

        let mut lines: Vec<String> = self
            .iter()
            .enumerate()
            .map(|(position, (_, instr))| {
                let text = match &instr.operand {
                    Operand::Target(target) => {
                        format!("{} {}", instr.opcode.mnemonic(), label(target))
                    }
                    Operand::Switch(targets) => format!(
                        "{} ({})",
                        instr.opcode.mnemonic(),
                        targets.iter().map(label).collect::<Vec<_>>().join(", ")
                    ),
                    _ => instr.to_string(),
                };
                format!("IL_{position:04}: {text}")
            })
            .collect();

        let end_label = |id: &Option<InstrId>| match id {
            Some(id) => label(id),
            None => "end".to_string(),
        };
        for handler in &self.exception_handlers {
            lines.push(format!(
                ".try {} to {} {:?} {} to {}",
                label(&handler.try_start),
                end_label(&handler.try_end),
                handler.flags,
                label(&handler.handler_start),
                end_label(&handler.handler_end)
            ));
        }
        lines
    }

    fn require(&self, id: InstrId) -> Result<&Instruction> {
        self.stream
            .get(id)
            .ok_or_else(|| invariant_error!("Instruction {} is not part of this body", id))
    }

    fn require_targets(&self, instr: &Instruction) -> Result<()> {
        for target in instr.targets() {
            self.require(target)?;
        }
        Ok(())
    }

    fn retarget_branches(&mut self, from: InstrId, to: InstrId) -> usize {
        self.stream
            .instructions_mut()
            .map(|instr| instr.retarget(from, to))
            .sum()
    }

    fn retarget_boundaries(&mut self, from: InstrId, to: Option<InstrId>) {
        for handler in &mut self.exception_handlers {
            if handler.try_end == Some(from) {
                handler.try_end = to;
            }
            if handler.handler_end == Some(from) {
                handler.handler_end = to;
            }
            if let Some(to) = to {
                for boundary in handler.boundaries_mut() {
                    if *boundary == from {
                        *boundary = to;
                    }
                }
            }
        }
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.listing() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::method::ExceptionHandler, Error};

    fn body_with_branch() -> Result<(MethodBody, InstrId, InstrId, InstrId)> {
        let mut body = MethodBody::new();
        let a = body.push(Instruction::ldc_i4(0))?;
        let b = body.push(Instruction::new(OpCode::Pop))?;
        let c = body.push(Instruction::new(OpCode::Ret))?;
        body.insert_before(a, Instruction::branch(OpCode::Br, b))?;
        Ok((body, a, b, c))
    }

    #[test]
    fn test_replace_moves_branches_and_regions() -> Result<()> {
        let (mut body, _, b, c) = body_with_branch()?;
        let first = body.first().ok_or_else(|| invariant_error!("empty"))?;
        body.add_exception_handler(ExceptionHandler::finally(b, Some(c), c, None))?;

        let new_b = body.replace(b, Instruction::new(OpCode::Nop))?;
        assert_eq!(body.get(first).and_then(Instruction::target), Some(new_b));
        assert_eq!(body.exception_handlers()[0].try_start, new_b);
        assert!(!body.contains(b));
        body.validate()
    }

    #[test]
    fn test_remove_retargets_to_successor() -> Result<()> {
        let (mut body, _, b, c) = body_with_branch()?;
        let first = body.first().ok_or_else(|| invariant_error!("empty"))?;
        body.remove(b)?;
        assert_eq!(body.get(first).and_then(Instruction::target), Some(c));
        assert_eq!(body.referrers(c), vec![first]);
        body.validate()
    }

    #[test]
    fn test_remove_jump_uses_own_target() -> Result<()> {
        let mut body = MethodBody::new();
        let jump_in = body.push(Instruction::new(OpCode::Nop))?;
        let end = body.push(Instruction::new(OpCode::Ret))?;
        let jump = body.insert_after(jump_in, Instruction::branch(OpCode::Br, end))?;
        let dead = body.insert_after(jump, Instruction::new(OpCode::Nop))?;
        let table = body.insert_before(jump_in, Instruction::switch(vec![jump, dead, jump]))?;

        body.remove(jump)?;
        assert_eq!(
            body.get(table).map(Instruction::targets),
            Some(vec![end, dead, end])
        );
        body.validate()
    }

    #[test]
    fn test_remove_referenced_tail_is_invariant_violation() -> Result<()> {
        let mut body = MethodBody::new();
        let first = body.push(Instruction::new(OpCode::Nop))?;
        let last = body.push(Instruction::new(OpCode::Ret))?;
        body.insert_before(first, Instruction::branch(OpCode::Brtrue, last))?;

        let before = body.listing();
        assert!(matches!(body.remove(last), Err(Error::Invariant { .. })));
        assert_eq!(body.listing(), before);
        Ok(())
    }

    #[test]
    fn test_missing_handles_are_rejected() -> Result<()> {
        let mut body = MethodBody::new();
        let only = body.push(Instruction::new(OpCode::Ret))?;
        body.remove(only)?;
        assert!(body.is_empty());
        assert!(body.remove(only).is_err());
        assert!(body.push(Instruction::branch(OpCode::Br, only)).is_err());
        assert!(body.set_operand(only, Operand::None).is_err());
        Ok(())
    }

    #[test]
    fn test_remove_region_end_extends_to_method_end() -> Result<()> {
        let mut body = MethodBody::new();
        let start = body.push(Instruction::new(OpCode::Nop))?;
        let handler = body.push(Instruction::new(OpCode::Endfinally))?;
        let tail = body.push(Instruction::new(OpCode::Nop))?;
        body.add_exception_handler(ExceptionHandler::finally(
            start,
            Some(handler),
            handler,
            Some(tail),
        ))?;
        body.remove(tail)?;
        assert_eq!(body.exception_handlers()[0].handler_end, None);
        Ok(())
    }

    #[test]
    fn test_listing_uses_positions() -> Result<()> {
        let (body, _, _, _) = body_with_branch()?;
        assert_eq!(
            body.listing(),
            vec![
                "IL_0000: br IL_0002",
                "IL_0001: ldc.i4 0",
                "IL_0002: pop",
                "IL_0003: ret"
            ]
        );
        Ok(())
    }
}
