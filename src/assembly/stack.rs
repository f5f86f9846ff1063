//! Evaluation stack effects and depth analysis.

use std::collections::{HashMap, VecDeque};

use crate::{
    assembly::{FlowType, Instruction, OpCode, StackBehavior},
    metadata::method::{InstrId, MethodBody},
    Error, Result,
};

/// Stack effect of `instr`, taking call signatures into account.
///
/// `ret` is reported as neutral: it ends the method, so its operand never matters for
/// the depth of another instruction.
#[must_use]
pub fn stack_behavior(instr: &Instruction) -> StackBehavior {
    if let Some(behavior) = instr.opcode.stack_behavior() {
        return behavior;
    }

    match (instr.opcode, instr.method_operand()) {
        (OpCode::Newobj, Some(method)) => {
            StackBehavior::new(method.signature.params.len() as u8, 1)
        }
        (OpCode::Call | OpCode::Callvirt, Some(method)) => StackBehavior::new(
            method.signature.pop_count() as u8,
            method.signature.push_count() as u8,
        ),
        _ => StackBehavior::new(0, 0),
    }
}

/// Computes the stack depth on entry to every reachable instruction.
///
/// Finally handlers are entered with an empty stack and `leave` empties the stack before
/// jumping.
///
/// # Errors
/// Returns [`crate::Error::Unsupported`] on stack underflow or when two paths reach an
/// instruction with different depths.
pub fn compute_depths(body: &MethodBody) -> Result<HashMap<InstrId, u32>> {
    let mut depths: HashMap<InstrId, u32> = HashMap::new();
    let mut worklist: VecDeque<(InstrId, u32)> = VecDeque::new();

    if let Some(first) = body.first() {
        worklist.push_back((first, 0));
    }
    for handler in body.exception_handlers() {
        let entry = u32::from(!handler.is_finally());
        worklist.push_back((handler.handler_start, entry));
        if let Some(filter) = handler.filter_start {
            worklist.push_back((filter, 1));
        }
    }

    while let Some((id, depth)) = worklist.pop_front() {
        match depths.get(&id) {
            Some(known) if *known == depth => continue,
            Some(known) => {
                return Err(Error::Unsupported(format!(
                    "Inconsistent stack depth at {id}: {known} and {depth}"
                )))
            }
            None => {
                depths.insert(id, depth);
            }
        }

        let Some(instr) = body.get(id) else {
            return Err(invariant_error!("Dangling instruction {} in depth scan", id));
        };
        let behavior = stack_behavior(instr);
        let after = depth
            .checked_sub(u32::from(behavior.pops))
            .ok_or_else(|| Error::Unsupported(format!("Stack underflow at {id}")))?
            + u32::from(behavior.pushes);

        match instr.flow_type() {
            FlowType::Sequential | FlowType::Call => {
                if let Some(next) = body.next(id) {
                    worklist.push_back((next, after));
                }
            }
            FlowType::ConditionalBranch | FlowType::Switch => {
                for target in instr.targets() {
                    worklist.push_back((target, after));
                }
                if let Some(next) = body.next(id) {
                    worklist.push_back((next, after));
                }
            }
            FlowType::UnconditionalBranch => {
                if let Some(target) = instr.target() {
                    worklist.push_back((target, after));
                }
            }
            FlowType::Leave => {
                if let Some(target) = instr.target() {
                    worklist.push_back((target, 0));
                }
            }
            FlowType::Return | FlowType::Throw | FlowType::EndFinally => {}
        }
    }

    Ok(depths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        metadata::signatures::{MethodRef, SignatureMethod, TypeName, TypeSignature},
    };

    #[test]
    fn test_call_effects_follow_signature() {
        let method = MethodRef::new(
            TypeName::new("System", "Object"),
            "Equals",
            SignatureMethod::instance_method(TypeSignature::Boolean, vec![TypeSignature::Object]),
        );
        let call = Instruction::call(OpCode::Callvirt, method.clone());
        assert_eq!(stack_behavior(&call), StackBehavior::new(2, 1));
        let ctor = Instruction::call(OpCode::Newobj, method);
        assert_eq!(stack_behavior(&ctor), StackBehavior::new(1, 1));
    }

    #[test]
    fn test_depths_across_branches() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldarg_0()?
            .brtrue("one")?
            .ldc_i4(0)?
            .br("done")?
            .label("one")?
            .ldc_i4(1)?
            .label("done")?
            .ret()?;
        let body = asm.finish()?;
        let depths = compute_depths(&body)?;
        let ids = body.ids();
        assert_eq!(depths[&ids[1]], 1);
        assert_eq!(depths[&ids[4]], 0);
        assert_eq!(depths[&ids[5]], 1);
        Ok(())
    }

    #[test]
    fn test_inconsistent_depth_is_unsupported() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldarg_0()?
            .brtrue("join")?
            .ldc_i4(0)?
            .label("join")?
            .ret()?;
        let body = asm.finish()?;
        assert!(matches!(compute_depths(&body), Err(Error::Unsupported(_))));
        Ok(())
    }
}
