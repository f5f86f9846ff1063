//! Flattening of try/finally regions into explicit state dispatch.
//!
//! Methods that must run without exception handling keep the cleanup semantics of their
//! finally regions through a small state machine:
//!
//! 1. **Discover** - Collect the regions, rejecting non-finally kinds, partial overlaps,
//!    handlers without `endfinally` and `leave`s with a non-empty stack
//! 2. **Build tree** - Nest regions by try-range containment
//! 3. **Allocate** - Record the exits of every `leave` and give each slot-bearing region
//!    an `int32` state local
//! 4. **Rewrite handlers** - `endfinally` becomes `ldloc slot; switch [...]; br dest0`
//! 5. **Rewrite try bodies** - `leave` stores one state per exited region, then branches
//!    to the innermost handler
//! 6. **Strip regions**
//!
//! Nothing is edited before discovery succeeded, so a rejected method is left exactly as
//! it was.

mod tree;

use std::collections::HashMap;

use crate::{
    assembly::{stack::compute_depths, Instruction, OpCode},
    compiler::{context::CompilerContext, events::EventKind},
    metadata::{
        method::{InstrId, MethodBody},
        platform::PlatformTypes,
        signatures::TypeSignature,
        token::Token,
    },
    Error, Result,
};

use tree::{HandlerTree, RegionSpans, Span};

/// Where a state store sends its region when the handler finishes.
#[derive(Debug, Clone, Copy)]
enum Destination {
    /// Index into the region's end destinations
    Own(usize),
    /// The extra switch slot leading to the parent handler
    Parent,
}

/// Rewrite of one `leave`.
#[derive(Debug)]
struct LeaveRewrite {
    leave: InstrId,
    target: InstrId,
    /// Exited regions, innermost first
    stores: Vec<(usize, Destination)>,
}

/// The complete, validated flattening of one method.
#[derive(Debug)]
struct FlatteningPlan {
    tree: HandlerTree,
    slots: u16,
    /// `endfinally` instructions per region node
    handler_ends: Vec<(usize, Vec<InstrId>)>,
    leaves: Vec<LeaveRewrite>,
}

impl FlatteningPlan {
    fn discover(body: &MethodBody) -> Result<Self> {
        let positions = body.positions();
        let len = body.len();
        let position = |id: InstrId| {
            positions
                .get(&id)
                .copied()
                .ok_or_else(|| invariant_error!("Region boundary {} is not linked", id))
        };
        let end_position = |end: Option<InstrId>| end.map_or(Ok(len), position);

        let mut regions = Vec::new();
        let mut handler_spans = Vec::new();
        for (index, handler) in body.exception_handlers().iter().enumerate() {
            if !handler.is_finally() {
                return Err(Error::Unsupported(format!(
                    "{:?} handler cannot be flattened",
                    handler.flags
                )));
            }
            let try_span = Span {
                start: position(handler.try_start)?,
                end: end_position(handler.try_end)?,
            };
            let handler_span = Span {
                start: position(handler.handler_start)?,
                end: end_position(handler.handler_end)?,
            };
            regions.push(RegionSpans {
                region: index,
                try_span,
                handler_span,
                handler_start: handler.handler_start,
            });
            handler_spans.push(handler_span);
        }

        for (i, first) in regions.iter().enumerate() {
            let a = &first.try_span;
            for second in &regions[i + 1..] {
                let b = &second.try_span;
                if a == b {
                    return Err(Error::Unsupported(
                        "Regions share a protected range".to_string(),
                    ));
                }
                if a.overlaps(b) && !a.encloses(b) && !b.encloses(a) {
                    return Err(Error::Unsupported(
                        "Regions partially overlap".to_string(),
                    ));
                }
            }
        }

        let mut tree = HandlerTree::build(len, &regions);
        let node_of_region: HashMap<usize, usize> = tree
            .regions()
            .filter_map(|node| tree.node(node).region.map(|region| (region, node)))
            .collect();

        let mut ends: HashMap<usize, Vec<InstrId>> = HashMap::new();
        for (ordinal, (id, instr)) in body.iter().enumerate() {
            if instr.opcode != OpCode::Endfinally {
                continue;
            }
            let owner = handler_spans
                .iter()
                .enumerate()
                .filter(|(_, span)| span.contains(ordinal))
                .min_by_key(|(_, span)| span.len())
                .map(|(region, _)| region)
                .ok_or_else(|| Error::Unsupported(format!("{id} is outside any handler")))?;
            ends.entry(owner).or_default().push(id);
        }

        let mut handler_ends = Vec::new();
        for region in 0..regions.len() {
            let ids = ends.remove(&region).unwrap_or_default();
            if ids.is_empty() {
                return Err(Error::Unsupported(format!(
                    "Finally handler {region} has no endfinally"
                )));
            }
            let node = node_of_region
                .get(&region)
                .copied()
                .ok_or_else(|| invariant_error!("Region {} missing from tree", region))?;
            handler_ends.push((node, ids));
        }

        let depths = compute_depths(body)?;
        let mut leaves = Vec::new();
        for (ordinal, (id, instr)) in body.iter().enumerate() {
            if instr.opcode != OpCode::Leave {
                continue;
            }
            if depths.get(&id).is_some_and(|depth| *depth != 0) {
                return Err(Error::Unsupported(format!(
                    "{id} leaves with a non-empty stack"
                )));
            }
            let target = instr
                .target()
                .ok_or_else(|| invariant_error!("{} has no target", id))?;

            let chain = tree.chain(ordinal, position(target)?);
            let mut stores = Vec::with_capacity(chain.len());
            for (depth, node) in chain.iter().enumerate() {
                if depth + 1 == chain.len() {
                    let index = tree.node_mut(*node).destination_index(target);
                    stores.push((*node, Destination::Own(index)));
                } else {
                    tree.node_mut(*node).forwards_to_parent = true;
                    stores.push((*node, Destination::Parent));
                }
            }
            leaves.push(LeaveRewrite {
                leave: id,
                target,
                stores,
            });
        }

        let slots = tree.allocate_slots();
        Ok(FlatteningPlan {
            tree,
            slots,
            handler_ends,
            leaves,
        })
    }

    fn apply(self, body: &mut MethodBody, platform: &PlatformTypes) -> Result<()> {
        let mut locals = Vec::with_capacity(usize::from(self.slots));
        for _ in 0..self.slots {
            locals.push(body.add_local(TypeSignature::I4)?);
        }
        let slot_local = |node: usize| {
            self.tree
                .node(node)
                .slot
                .and_then(|slot| locals.get(usize::from(slot)).copied())
                .ok_or_else(|| invariant_error!("Region node {} has no state slot", node))
        };

        let mut renamed: HashMap<InstrId, InstrId> = HashMap::new();
        let resolve = |renamed: &HashMap<InstrId, InstrId>, mut id: InstrId| {
            while let Some(next) = renamed.get(&id) {
                id = *next;
            }
            id
        };

        for (node, ends) in &self.handler_ends {
            let handler = self.tree.node(*node);
            let sequence = if handler.is_bearing() {
                let mut table: Vec<InstrId> = handler
                    .end_destinations
                    .iter()
                    .map(|destination| resolve(&renamed, *destination))
                    .collect();
                if handler.forwards_to_parent {
                    let parent = self
                        .tree
                        .node(handler.parent)
                        .handler_start
                        .ok_or_else(|| invariant_error!("Region node {} relays to the root", node))?;
                    table.push(resolve(&renamed, parent));
                }
                let fallthrough = table[0];
                vec![
                    Instruction::ldloc(slot_local(*node)?),
                    Instruction::switch(table),
                    Instruction::branch(OpCode::Br, fallthrough),
                ]
            } else {
                vec![
                    Instruction::call(OpCode::Newobj, platform.invalid_operation_ctor.clone()),
                    Instruction::new(OpCode::Throw),
                ]
            };

            for end in ends {
                let first = replace_with_sequence(body, *end, sequence.clone())?;
                renamed.insert(*end, first);
            }
        }

        for leave in &self.leaves {
            let mut sequence = Vec::with_capacity(leave.stores.len() * 2 + 1);
            for (node, destination) in &leave.stores {
                let index = match destination {
                    Destination::Own(index) => *index,
                    Destination::Parent => self.tree.node(*node).end_destinations.len(),
                };
                sequence.push(Instruction::ldc_i4(index as i32));
                sequence.push(Instruction::stloc(slot_local(*node)?));
            }

            let jump = match leave.stores.first() {
                Some((innermost, _)) => self
                    .tree
                    .node(*innermost)
                    .handler_start
                    .ok_or_else(|| invariant_error!("Leave {} exits the root", leave.leave))?,
                None => leave.target,
            };
            sequence.push(Instruction::branch(OpCode::Br, resolve(&renamed, jump)));

            let first = replace_with_sequence(body, leave.leave, sequence)?;
            renamed.insert(leave.leave, first);
        }

        body.clear_exception_handlers();
        Ok(())
    }
}

/// Replaces `target` with `sequence`; references move to the first instruction.
fn replace_with_sequence(
    body: &mut MethodBody,
    target: InstrId,
    sequence: Vec<Instruction>,
) -> Result<InstrId> {
    let mut instructions = sequence.into_iter();
    let head = instructions
        .next()
        .ok_or_else(|| invariant_error!("Empty replacement for {}", target))?;
    let first = body.replace(target, head)?;
    let mut cursor = first;
    for instr in instructions {
        cursor = body.insert_after(cursor, instr)?;
    }
    Ok(first)
}

/// Flattens the finally regions of a method.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerFlattener;

impl HandlerFlattener {
    /// Name used in events.
    pub const NAME: &'static str = "flatten";

    /// Flattens every region of `body`. Returns `false` for bodies without regions.
    ///
    /// # Errors
    /// Returns [`Error::Unsupported`] for bodies that cannot be flattened; the body is
    /// unchanged in that case.
    pub fn process_method(
        &self,
        ctx: &mut CompilerContext,
        method: Token,
        body: &mut MethodBody,
    ) -> Result<bool> {
        let regions = body.exception_handlers().len();
        if regions == 0 {
            return Ok(false);
        }

        let plan = FlatteningPlan::discover(body)?;
        let slots = plan.slots;
        plan.apply(body, &ctx.platform)?;

        log::debug!("{}: flattened {} finally regions", method, regions);
        ctx.events
            .record(EventKind::HandlersFlattened)
            .method(method)
            .pass(Self::NAME)
            .message(format!("{regions} regions, {slots} state slots"));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::MethodBodyBuilder,
        compiler::RewriterConfig,
        metadata::{method::ExceptionHandler, resolver::Resolver},
    };

    fn context() -> CompilerContext {
        CompilerContext::new(
            RewriterConfig::default(),
            PlatformTypes::new(),
            Resolver::new(),
        )
    }

    #[test]
    fn test_single_region_listing() -> Result<()> {
        let mut body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.label("try")?
                    .nop()?
                    .leave("exit")?
                    .label("handler")?
                    .nop()?
                    .endfinally()?
                    .label("exit")?
                    .ret()?
                    .try_finally("try", "handler", "handler", "exit")?;
                Ok(())
            })
            .build()?;

        let mut ctx = context();
        assert!(HandlerFlattener.process_method(&mut ctx, Token::method_def(1), &mut body)?);
        assert!(body.exception_handlers().is_empty());
        assert_eq!(body.locals(), &[TypeSignature::I4]);
        assert_eq!(
            body.listing(),
            vec![
                "IL_0000: nop",
                "IL_0001: ldc.i4 0",
                "IL_0002: stloc V_0",
                "IL_0003: br IL_0004",
                "IL_0004: nop",
                "IL_0005: ldloc V_0",
                "IL_0006: switch (IL_0008)",
                "IL_0007: br IL_0008",
                "IL_0008: ret",
            ]
        );
        assert!(ctx.events.has(EventKind::HandlersFlattened));
        body.validate()
    }

    #[test]
    fn test_rejects_catch_regions_untouched() -> Result<()> {
        let mut body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.label("try")?
                    .leave("exit")?
                    .label("handler")?
                    .endfinally()?
                    .label("exit")?
                    .ret()?;
                Ok(())
            })
            .build()?;
        let ids = body.ids();
        let mut handler = ExceptionHandler::finally(ids[0], Some(ids[1]), ids[1], Some(ids[2]));
        handler.flags = crate::metadata::method::ExceptionHandlerFlags::FAULT;
        body.add_exception_handler(handler)?;
        let before = body.listing();

        let result = HandlerFlattener.process_method(&mut context(), Token::method_def(1), &mut body);
        assert!(matches!(result, Err(Error::Unsupported(_))));
        assert_eq!(body.listing(), before);
        Ok(())
    }

    #[test]
    fn test_rejects_handler_without_endfinally() -> Result<()> {
        let mut body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.label("try")?
                    .leave("exit")?
                    .label("handler")?
                    .nop()?
                    .label("exit")?
                    .ret()?
                    .try_finally("try", "handler", "handler", "exit")?;
                Ok(())
            })
            .build()?;

        let result = HandlerFlattener.process_method(&mut context(), Token::method_def(1), &mut body);
        assert!(matches!(result, Err(Error::Unsupported(_))));
        assert_eq!(body.exception_handlers().len(), 1);
        Ok(())
    }

    #[test]
    fn test_rejects_partial_overlap() -> Result<()> {
        let mut body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.label("a")?
                    .nop()?
                    .label("b")?
                    .nop()?
                    .label("c")?
                    .leave("exit")?
                    .label("h1")?
                    .endfinally()?
                    .label("h2")?
                    .endfinally()?
                    .label("exit")?
                    .ret()?
                    .try_finally("a", "c", "h1", "h2")?
                    .try_finally("b", "h1", "h2", "exit")?;
                Ok(())
            })
            .build()?;

        let result = HandlerFlattener.process_method(&mut context(), Token::method_def(1), &mut body);
        assert!(matches!(result, Err(Error::Unsupported(_))));
        Ok(())
    }

    #[test]
    fn test_non_bearing_handler_throws() -> Result<()> {
        let ctx = context();
        let mut body = MethodBodyBuilder::new()
            .implementation(|asm| {
                asm.label("try")?
                    .op(OpCode::Ldnull)?
                    .throw()?
                    .label("handler")?
                    .endfinally()?
                    .label("exit")?
                    .ret()?
                    .try_finally("try", "handler", "handler", "exit")?;
                Ok(())
            })
            .build()?;

        let plan = FlatteningPlan::discover(&body)?;
        assert_eq!(plan.slots, 0);
        plan.apply(&mut body, &ctx.platform)?;
        let listing = body.listing();
        assert!(listing[2].starts_with("IL_0002: newobj"));
        assert_eq!(listing[3], "IL_0003: throw");
        body.validate()
    }
}
