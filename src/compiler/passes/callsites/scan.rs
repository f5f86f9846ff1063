//! Forward stack-depth scans between the instructions of an idiom.

use crate::{
    assembly::{stack::stack_behavior, FlowType, Instruction, OpCode},
    metadata::method::{InstrId, MethodBody},
};

/// Longest operand expression a scan walks over.
pub(crate) const MAX_SCAN: usize = 64;

/// Walks forward from `start` with `depth` values on the stack until `stop` accepts an
/// instruction.
///
/// The walk gives up on incoming branch targets and region boundaries, on any control
/// transfer other than a call, when an instruction would consume one of the bottom
/// `floor` values, or after [`MAX_SCAN`] instructions. `stop` sees each instruction with the depth before it.
pub(crate) fn scan_until<F>(
    body: &MethodBody,
    start: Option<InstrId>,
    mut depth: u32,
    floor: u32,
    mut stop: F,
) -> Option<InstrId>
where
    F: FnMut(InstrId, &Instruction, u32) -> bool,
{
    let mut cursor = start;
    for _ in 0..MAX_SCAN {
        let id = cursor?;
        let instr = body.get(id)?;
        if entered_from_elsewhere(body, id) {
            return None;
        }
        if stop(id, instr, depth) {
            return Some(id);
        }
        if !matches!(instr.flow_type(), FlowType::Sequential | FlowType::Call) {
            return None;
        }

        let behavior = stack_behavior(instr);
        let pops = u32::from(behavior.pops);
        if depth < pops || depth - pops < floor {
            return None;
        }
        depth = depth - pops + u32::from(behavior.pushes);
        cursor = body.next(id);
    }
    None
}

/// The integer an `ldc.i4` or `ldc.i8` pushes.
pub(crate) fn literal(instr: &Instruction) -> Option<i64> {
    match instr.opcode {
        OpCode::LdcI4 => instr.as_i32().map(i64::from),
        OpCode::LdcI8 => instr.as_i64(),
        _ => None,
    }
}

/// Control can reach `id` other than by falling through, or a region starts or ends
/// there.
fn entered_from_elsewhere(body: &MethodBody, id: InstrId) -> bool {
    body.is_branch_target(id) || body.is_region_boundary(id)
}

/// The instruction after `id`, unless something branches to it or a region boundary
/// sits on it.
pub(crate) fn plain_next(body: &MethodBody, id: InstrId) -> Option<(InstrId, &Instruction)> {
    let next = body.next(id)?;
    if entered_from_elsewhere(body, next) {
        return None;
    }
    Some((next, body.get(next)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::MethodBodyBuilder, metadata::signatures::TypeSignature, Result};

    #[test]
    fn test_scan_finds_single_value_expression() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg_0()?
                    .ldarg_1()?
                    .ldc_i4(2)?
                    .add()?
                    .typed(OpCode::Box, TypeSignature::I4)?
                    .pop()?
                    .ret()?;
                Ok(())
            })
            .build()?;

        let ids = body.ids();
        let found = scan_until(&body, Some(ids[1]), 1, 1, |_, instr, depth| {
            instr.opcode == OpCode::Box && depth == 2
        });
        assert_eq!(found, Some(ids[4]));
        Ok(())
    }

    #[test]
    fn test_scan_stops_at_floor_and_branch_targets() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg_0()?
                    .pop()?
                    .br("next")?
                    .label("next")?
                    .ldarg_0()?
                    .ret()?;
                Ok(())
            })
            .build()?;

        let ids = body.ids();
        // pop would consume the protected value
        assert!(scan_until(&body, Some(ids[1]), 1, 1, |_, _, _| false).is_none());
        // br is a control transfer
        assert!(scan_until(&body, Some(ids[2]), 0, 0, |_, _, _| false).is_none());
        // ldarg is a branch target
        assert!(scan_until(&body, Some(ids[3]), 0, 0, |_, _, _| true).is_none());
        Ok(())
    }

    #[test]
    fn test_scan_and_plain_next_stop_at_region_boundaries() -> Result<()> {
        let body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.ldarg_0()?
                    .pop()?
                    .label("try")?
                    .nop()?
                    .leave("exit")?
                    .label("handler")?
                    .endfinally()?
                    .label("exit")?
                    .ret()?
                    .try_finally("try", "handler", "handler", "exit")?;
                Ok(())
            })
            .build()?;

        let ids = body.ids();
        assert!(body.is_region_boundary(ids[2]));
        assert!(!body.is_branch_target(ids[2]));
        assert!(plain_next(&body, ids[0]).is_some());
        assert!(plain_next(&body, ids[1]).is_none());
        assert!(scan_until(&body, Some(ids[1]), 1, 0, |_, instr, _| instr.opcode == OpCode::Nop)
            .is_none());
        Ok(())
    }

    #[test]
    fn test_literal() {
        assert_eq!(literal(&Instruction::ldc_i4(-3)), Some(-3));
        assert_eq!(literal(&Instruction::ldc_i8(1 << 40)), Some(1 << 40));
        assert_eq!(literal(&Instruction::ldstr("3")), None);
    }
}
