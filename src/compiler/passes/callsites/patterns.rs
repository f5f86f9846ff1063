//! Recognition of reflection-style enum idioms.
//!
//! Every matcher is anchored at the first instruction of its idiom and only inspects
//! instructions at or after the anchor. A match is returned as a [`Rewrite`] plan; nothing
//! is edited until the plan is applied.

use strum::IntoStaticStr;

use crate::{
    assembly::{Instruction, OpCode},
    codegen::{EnumDescriptor, EnumValue, Operation},
    compiler::{
        context::CompilerContext,
        passes::callsites::scan::{literal, plain_next, scan_until},
    },
    metadata::{
        method::{InstrId, MethodBody},
        module::Module,
        signatures::TypeSignature,
    },
    Error, Result,
};

/// The idiom a rewrite replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum Pattern {
    /// `Enum.GetValues(typeof(T))`
    GetValues,
    /// `Enum.IsDefined(typeof(T), value)`
    IsDefined,
    /// `Enum.GetUnderlyingType(typeof(T))`
    GetUnderlyingType,
    /// `a.HasFlag(b)`
    HasFlag,
    /// `value.ToString()` on a boxed enum
    ToString,
    /// `value.ToString()` through a constrained call
    ConstrainedToString,
    /// `a.Equals(b)` on boxed enums
    Equals,
}

/// The edit a rewrite performs.
#[derive(Debug, Clone)]
pub(crate) enum Action {
    /// Replace `first` through `last` with a single instruction.
    Fold {
        first: InstrId,
        last: InstrId,
        result: Instruction,
    },
    /// Remove `scaffolding` and call the helper in place of `call`.
    Redirect {
        scaffolding: Vec<InstrId>,
        call: InstrId,
    },
    /// Load the token of the underlying primitive instead.
    Underlying {
        token: InstrId,
        call: InstrId,
        primitive: TypeSignature,
    },
    /// Test the bits directly on the unboxed operands.
    HasFlag {
        first_box: InstrId,
        second_box: InstrId,
        call: InstrId,
    },
    /// Load the value behind the address and call the helper.
    Constrained { prefix: InstrId, call: InstrId },
}

/// A validated rewrite of one call site.
#[derive(Debug, Clone)]
pub(crate) struct Rewrite {
    pub pattern: Pattern,
    pub descriptor: EnumDescriptor,
    pub helper: Option<Operation>,
    pub action: Action,
}

impl Rewrite {
    fn new(pattern: Pattern, descriptor: EnumDescriptor, action: Action) -> Self {
        Rewrite {
            pattern,
            descriptor,
            helper: None,
            action,
        }
    }

    fn with_helper(mut self, operation: Operation) -> Self {
        self.helper = Some(operation);
        self
    }

    /// `true` when the site is replaced by its constant result.
    pub fn is_fold(&self) -> bool {
        matches!(self.action, Action::Fold { .. })
    }
}

/// Matches the idiom anchored at `anchor`.
///
/// Returns `Ok(None)` when no idiom starts here.
///
/// # Errors
/// Returns [`Error::Unsupported`] or [`Error::Unresolved`] when an idiom is recognized
/// but its enum operand fails validation.
pub(crate) fn match_at(
    ctx: &CompilerContext,
    module: &Module,
    body: &MethodBody,
    anchor: InstrId,
) -> Result<Option<Rewrite>> {
    let Some(instr) = body.get(anchor) else {
        return Ok(None);
    };

    match instr.opcode {
        OpCode::Ldtoken => match_type_token(ctx, module, body, anchor),
        OpCode::LdcI4 | OpCode::LdcI8 => match_literal(ctx, module, body, anchor),
        OpCode::Box => {
            if let Some(previous) = body.prev(anchor) {
                if let Ok(Some(_)) = match_literal(ctx, module, body, previous) {
                    // Folded from the literal's anchor.
                    return Ok(None);
                }
            }
            match_boxed(ctx, module, body, anchor)
        }
        OpCode::Constrained => match_constrained(ctx, module, body, anchor),
        _ => Ok(None),
    }
}

/// The enum operand of a `box` or `ldtoken`, if it names a value type at all.
fn value_type_operand(instr: &Instruction) -> Option<&TypeSignature> {
    instr
        .type_operand()
        .filter(|ty| matches!(ty, TypeSignature::ValueType(_) | TypeSignature::GenericInst(..)))
}

fn is_call(instr: &Instruction) -> bool {
    matches!(instr.opcode, OpCode::Call | OpCode::Callvirt)
}

/// `ldtoken T; call Type::GetTypeFromHandle; ...`
fn match_type_token(
    ctx: &CompilerContext,
    module: &Module,
    body: &MethodBody,
    anchor: InstrId,
) -> Result<Option<Rewrite>> {
    let platform = &ctx.platform;
    let Some(token) = body.get(anchor) else {
        return Ok(None);
    };
    let Some(enum_type) = value_type_operand(token) else {
        return Ok(None);
    };
    let Some((resolve, resolve_instr)) = plain_next(body, anchor) else {
        return Ok(None);
    };
    if resolve_instr.opcode != OpCode::Call
        || !resolve_instr
            .method_operand()
            .is_some_and(|method| platform.is_get_type_from_handle(method))
    {
        return Ok(None);
    }
    let Some((third, third_instr)) = plain_next(body, resolve) else {
        return Ok(None);
    };

    if let Some(method) = third_instr.method_operand().filter(|_| is_call(third_instr)) {
        if platform.is_enum_get_values(method) {
            let descriptor = ctx.enum_descriptor(module, enum_type)?;
            return Ok(Some(
                Rewrite::new(
                    Pattern::GetValues,
                    descriptor,
                    Action::Redirect {
                        scaffolding: vec![anchor, resolve],
                        call: third,
                    },
                )
                .with_helper(Operation::GetValues),
            ));
        }
        if platform.is_enum_get_underlying_type(method) {
            let descriptor = ctx.enum_descriptor(module, enum_type)?;
            let primitive = descriptor.kind.signature();
            return Ok(Some(Rewrite::new(
                Pattern::GetUnderlyingType,
                descriptor,
                Action::Underlying {
                    token: anchor,
                    call: third,
                    primitive,
                },
            )));
        }
    }

    let Some(call) = scan_until(body, Some(third), 1, 1, |_, instr, depth| {
        depth == 2
            && instr.opcode == OpCode::Call
            && instr
                .method_operand()
                .is_some_and(|method| platform.is_enum_is_defined(method))
    }) else {
        return Ok(None);
    };
    let Some(argument_end) = body.prev(call) else {
        return Ok(None);
    };
    let Some(argument) = body.get(argument_end) else {
        return Ok(None);
    };

    let descriptor = ctx.enum_descriptor(module, enum_type)?;

    if let (OpCode::Ldstr, Some(name)) = (argument.opcode, argument.string_operand()) {
        if argument_end != third {
            return Err(Error::Unsupported(
                "IsDefined with a computed string argument".to_string(),
            ));
        }
        let defined = descriptor.declared.iter().any(|constant| constant.name == name);
        return Ok(Some(Rewrite::new(
            Pattern::IsDefined,
            descriptor,
            Action::Fold {
                first: anchor,
                last: call,
                result: Instruction::ldc_i4(i32::from(defined)),
            },
        )));
    }

    if argument.opcode != OpCode::Box {
        return Err(Error::Unsupported(format!(
            "IsDefined argument produced by {}",
            argument.opcode.mnemonic()
        )));
    }
    let boxed = argument.type_operand();
    let underlying = descriptor.kind.signature();
    if boxed != Some(enum_type) && boxed != Some(&underlying) {
        return Err(Error::Unsupported(format!(
            "IsDefined argument is not a {} or {}",
            enum_type, underlying
        )));
    }

    if body.prev(argument_end) == Some(third) {
        if let Some(value) = body.get(third).and_then(literal) {
            let value = EnumValue::from_stack(descriptor.kind, value);
            let defined = descriptor.name_of(value).is_some();
            return Ok(Some(Rewrite::new(
                Pattern::IsDefined,
                descriptor,
                Action::Fold {
                    first: anchor,
                    last: call,
                    result: Instruction::ldc_i4(i32::from(defined)),
                },
            )));
        }
    }

    Ok(Some(
        Rewrite::new(
            Pattern::IsDefined,
            descriptor,
            Action::Redirect {
                scaffolding: vec![anchor, resolve, argument_end],
                call,
            },
        )
        .with_helper(Operation::IsDefined),
    ))
}

/// `ldc a; box T; callvirt ToString` and `ldc a; box T; ldc b; box T; call HasFlag|Equals`
fn match_literal(
    ctx: &CompilerContext,
    module: &Module,
    body: &MethodBody,
    anchor: InstrId,
) -> Result<Option<Rewrite>> {
    let platform = &ctx.platform;
    let Some(first) = body.get(anchor).and_then(literal) else {
        return Ok(None);
    };
    let Some((boxed, box_instr)) = plain_next(body, anchor) else {
        return Ok(None);
    };
    if box_instr.opcode != OpCode::Box {
        return Ok(None);
    }
    let Some(enum_type) = value_type_operand(box_instr) else {
        return Ok(None);
    };
    let Some((next, next_instr)) = plain_next(body, boxed) else {
        return Ok(None);
    };

    if next_instr.opcode == OpCode::Callvirt
        && next_instr
            .method_operand()
            .is_some_and(|method| platform.is_virtual_to_string(method))
    {
        let descriptor = ctx.enum_descriptor(module, enum_type)?;
        let text = descriptor.format(EnumValue::from_stack(descriptor.kind, first));
        return Ok(Some(Rewrite::new(
            Pattern::ToString,
            descriptor,
            Action::Fold {
                first: anchor,
                last: next,
                result: Instruction::ldstr(&text),
            },
        )));
    }

    let Some(second) = literal(next_instr) else {
        return Ok(None);
    };
    let Some((second_box, second_box_instr)) = plain_next(body, next) else {
        return Ok(None);
    };
    if !second_box_instr.is_typed(OpCode::Box, enum_type) {
        return Ok(None);
    }
    let Some((call, call_instr)) = plain_next(body, second_box) else {
        return Ok(None);
    };
    let Some(method) = call_instr.method_operand().filter(|_| is_call(call_instr)) else {
        return Ok(None);
    };

    let pattern = if platform.is_enum_has_flag(method) {
        Pattern::HasFlag
    } else if call_instr.opcode == OpCode::Callvirt && platform.is_virtual_equals(method) {
        Pattern::Equals
    } else {
        return Ok(None);
    };

    let descriptor = ctx.enum_descriptor(module, enum_type)?;
    let a = EnumValue::from_stack(descriptor.kind, first);
    let b = EnumValue::from_stack(descriptor.kind, second);
    let result = match pattern {
        Pattern::HasFlag => a.bits() & b.bits() == b.bits(),
        _ => a == b,
    };
    Ok(Some(Rewrite::new(
        pattern,
        descriptor,
        Action::Fold {
            first: anchor,
            last: call,
            result: Instruction::ldc_i4(i32::from(result)),
        },
    )))
}

/// `box T; callvirt ToString` and `box T; <b>; box T; call HasFlag|Equals`
fn match_boxed(
    ctx: &CompilerContext,
    module: &Module,
    body: &MethodBody,
    anchor: InstrId,
) -> Result<Option<Rewrite>> {
    let platform = &ctx.platform;
    let Some(box_instr) = body.get(anchor) else {
        return Ok(None);
    };
    let Some(enum_type) = value_type_operand(box_instr) else {
        return Ok(None);
    };
    let Some((next, next_instr)) = plain_next(body, anchor) else {
        return Ok(None);
    };

    if next_instr.opcode == OpCode::Callvirt
        && next_instr
            .method_operand()
            .is_some_and(|method| platform.is_virtual_to_string(method))
    {
        let descriptor = ctx.enum_descriptor(module, enum_type)?;
        return Ok(Some(
            Rewrite::new(
                Pattern::ToString,
                descriptor,
                Action::Redirect {
                    scaffolding: vec![anchor],
                    call: next,
                },
            )
            .with_helper(Operation::ToString),
        ));
    }

    let mut pattern = None;
    let Some(second_box) = scan_until(body, Some(next), 1, 1, |id, instr, depth| {
        if depth != 2 || !instr.is_typed(OpCode::Box, enum_type) {
            return false;
        }
        let Some((_, call)) = plain_next(body, id) else {
            return false;
        };
        let Some(method) = call.method_operand().filter(|_| is_call(call)) else {
            return false;
        };
        if platform.is_enum_has_flag(method) {
            pattern = Some(Pattern::HasFlag);
        } else if call.opcode == OpCode::Callvirt && platform.is_virtual_equals(method) {
            pattern = Some(Pattern::Equals);
        }
        pattern.is_some()
    }) else {
        return Ok(None);
    };
    let (Some(pattern), Some(call)) = (pattern, body.next(second_box)) else {
        return Ok(None);
    };

    let descriptor = ctx.enum_descriptor(module, enum_type)?;
    Ok(Some(match pattern {
        Pattern::HasFlag => Rewrite::new(
            pattern,
            descriptor,
            Action::HasFlag {
                first_box: anchor,
                second_box,
                call,
            },
        ),
        _ => Rewrite::new(
            pattern,
            descriptor,
            Action::Redirect {
                scaffolding: vec![anchor, second_box],
                call,
            },
        )
        .with_helper(Operation::Equals),
    }))
}

/// `constrained. T; callvirt ToString`
fn match_constrained(
    ctx: &CompilerContext,
    module: &Module,
    body: &MethodBody,
    anchor: InstrId,
) -> Result<Option<Rewrite>> {
    let Some(enum_type) = body.get(anchor).and_then(value_type_operand) else {
        return Ok(None);
    };
    let Some((call, call_instr)) = plain_next(body, anchor) else {
        return Ok(None);
    };
    if call_instr.opcode != OpCode::Callvirt
        || !call_instr
            .method_operand()
            .is_some_and(|method| ctx.platform.is_virtual_to_string(method))
    {
        return Ok(None);
    }

    let descriptor = ctx.enum_descriptor(module, enum_type)?;
    Ok(Some(
        Rewrite::new(
            Pattern::ConstrainedToString,
            descriptor,
            Action::Constrained {
                prefix: anchor,
                call,
            },
        )
        .with_helper(Operation::ToString),
    ))
}
