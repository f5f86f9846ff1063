//! Call-site rewriting of reflection-style enum operations.
//!
//! Recognized idioms, each anchored at its first instruction:
//!
//! | Idiom | Rewritten to |
//! |-------|--------------|
//! | `ldtoken T; call GetTypeFromHandle; call Enum::GetValues` | `call GetValues_T` |
//! | `ldtoken T; call GetTypeFromHandle; <v>; box T; call Enum::IsDefined` | `<v>; call IsDefined_T` |
//! | `ldtoken T; call GetTypeFromHandle; call Enum::GetUnderlyingType` | `ldtoken <primitive>; call GetTypeFromHandle` |
//! | `<a>; box T; <b>; box T; call Enum::HasFlag` | `<a>; <b>; stloc t; ldloc t; and; ldloc t; ceq` |
//! | `box T; callvirt Object::ToString` | `call ToString_T` |
//! | `constrained. T; callvirt Object::ToString` | `ldobj T; call ToString_T` |
//! | `<a>; box T; <b>; box T; callvirt Object::Equals` | `<a>; <b>; call Equals_T` |
//!
//! Sites whose operands are literals are replaced by their constant result.

mod patterns;
mod scan;

pub use patterns::Pattern;

pub(crate) use patterns::{match_at, Action, Rewrite};

use crate::{
    assembly::{Instruction, OpCode},
    compiler::{context::CompilerContext, events::EventKind},
    metadata::{
        method::{InstrId, MethodBody},
        module::Module,
        token::Token,
    },
    Result,
};

/// Rewrites recognized call sites in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallSiteRewriter;

impl CallSiteRewriter {
    /// Name used in events.
    pub const NAME: &'static str = "call-sites";

    /// Rewrites every recognized site of `body`, visiting instructions in reverse order.
    ///
    /// A site that fails validation is left untouched; the remaining sites are still
    /// rewritten.
    ///
    /// # Errors
    /// Returns an error when an edit is refused by the instruction stream. The body may
    /// then be partially rewritten and has to be restored by the caller.
    pub fn process_method(
        &self,
        ctx: &mut CompilerContext,
        module: &mut Module,
        method: Token,
        body: &mut MethodBody,
    ) -> Result<bool> {
        let mut changed = false;
        let mut cursor = body.last();
        while let Some(id) = cursor {
            cursor = body.prev(id);

            match match_at(ctx, module, body, id) {
                Ok(Some(rewrite)) => {
                    let pattern: &'static str = rewrite.pattern.into();
                    let kind = if rewrite.is_fold() {
                        EventKind::ConstantFolded
                    } else {
                        EventKind::CallSiteRewritten
                    };
                    let message = format!("{} on {}", pattern, rewrite.descriptor.name);

                    Self::apply(ctx, module, body, rewrite)?;
                    log::debug!("{}: rewrote {}", method, message);
                    ctx.events
                        .record(kind)
                        .method(method)
                        .pass(Self::NAME)
                        .message(message);
                    changed = true;
                }
                Ok(None) => {}
                Err(error) if error.is_local() => {
                    log::debug!("{}: skipped site at {} - {}", method, id, error);
                    ctx.events
                        .record(EventKind::SiteSkipped)
                        .method(method)
                        .pass(Self::NAME)
                        .message(error.to_string());
                }
                Err(error) => return Err(error),
            }
        }
        Ok(changed)
    }

    /// Applies a validated rewrite.
    fn apply(
        ctx: &mut CompilerContext,
        module: &mut Module,
        body: &mut MethodBody,
        rewrite: Rewrite,
    ) -> Result<()> {
        let helper = match rewrite.helper {
            Some(operation) => Some(ctx.helper(module, operation, &rewrite.descriptor)?),
            None => None,
        };
        let call_helper = || {
            helper
                .clone()
                .map(|method| Instruction::call(OpCode::Call, method))
                .ok_or_else(|| invariant_error!("Rewrite without helper"))
        };

        match rewrite.action {
            Action::Fold {
                first,
                last,
                result,
            } => {
                let doomed = Self::range_after(body, first, last)?;
                body.replace(first, result)?;
                for id in doomed {
                    body.remove(id)?;
                }
            }
            Action::Redirect { scaffolding, call } => {
                for id in scaffolding {
                    body.remove(id)?;
                }
                body.replace(call, call_helper()?)?;
            }
            Action::Underlying {
                token,
                call,
                primitive,
            } => {
                body.replace(token, Instruction::typed(OpCode::Ldtoken, primitive))?;
                body.remove(call)?;
            }
            Action::HasFlag {
                first_box,
                second_box,
                call,
            } => {
                let temp = body.add_local(rewrite.descriptor.kind.signature())?;
                body.remove(first_box)?;
                let store = body.replace(second_box, Instruction::stloc(temp))?;
                let load = body.insert_after(store, Instruction::ldloc(temp))?;
                let and = body.insert_after(load, Instruction::new(OpCode::And))?;
                body.insert_after(and, Instruction::ldloc(temp))?;
                body.replace(call, Instruction::new(OpCode::Ceq))?;
            }
            Action::Constrained { prefix, call } => {
                body.replace(
                    prefix,
                    Instruction::typed(OpCode::Ldobj, rewrite.descriptor.signature()),
                )?;
                body.replace(call, call_helper()?)?;
            }
        }
        Ok(())
    }

    /// The instructions after `first` up to and including `last`.
    fn range_after(body: &MethodBody, first: InstrId, last: InstrId) -> Result<Vec<InstrId>> {
        let mut range = Vec::new();
        let mut cursor = body.next(first);
        while let Some(id) = cursor {
            range.push(id);
            if id == last {
                return Ok(range);
            }
            cursor = body.next(id);
        }
        Err(invariant_error!("{} does not follow {}", last, first))
    }
}

/// Generates the helpers recognized sites will call, ahead of the rewrite stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelperMaterializer;

impl HelperMaterializer {
    /// Name used in events.
    pub const NAME: &'static str = "materialize";

    /// Materializes the helper of every recognized site in `body`; the body itself is
    /// not modified.
    ///
    /// Sites that fail validation are skipped here and reported by the call-site stage.
    ///
    /// # Errors
    /// Propagates code generation and module errors.
    pub fn process_method(
        &self,
        ctx: &mut CompilerContext,
        module: &mut Module,
        method: Token,
        body: &MethodBody,
    ) -> Result<()> {
        let mut cursor = body.last();
        while let Some(id) = cursor {
            cursor = body.prev(id);
            let rewrite = match match_at(ctx, module, body, id) {
                Ok(Some(rewrite)) => rewrite,
                Ok(None) => continue,
                Err(error) if error.is_local() => {
                    log::trace!("{}: no helper for site at {} - {}", method, id, error);
                    continue;
                }
                Err(error) => return Err(error),
            };
            if let Some(operation) = rewrite.helper {
                ctx.helper(module, operation, &rewrite.descriptor)?;
            }
        }
        Ok(())
    }
}
