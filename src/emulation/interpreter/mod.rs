//! CIL interpreter.
//!
//! Executes one method body at a time on a private evaluation stack. Calls into methods
//! of the emulated module recurse into a fresh frame; framework calls go to the
//! [`Runtime`] intrinsics and everything else to the [`Host`].
//!
//! # Protected Regions
//!
//! `leave` runs the finally handlers of every region it exits, innermost first, before
//! reaching its target. The pending handlers and the final target are kept on a leave
//! stack; each `endfinally` resumes the next pending handler or, once none are left,
//! jumps to the target. `throw` ends execution with [`Outcome::Threw`] without running
//! handlers.

mod handlers;

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::{
    assembly::{Instruction, OpCode, Operand},
    emulation::{EmArray, EmValue, Host, Runtime},
    metadata::{
        method::{InstrId, MethodBody},
        module::Module,
        platform::PlatformTypes,
        resolver::Resolver,
        signatures::{MethodRef, TypeSignature},
    },
    Error, Result,
};

pub use handlers::{binary, compare, convert, unary};

/// Execution bounds.
#[derive(Debug, Clone, Copy)]
pub struct EmulationLimits {
    /// Instructions executed across all frames before giving up
    pub max_instructions: u64,
    /// Maximum nesting of emulated calls
    pub max_call_depth: usize,
}

impl Default for EmulationLimits {
    fn default() -> Self {
        EmulationLimits {
            max_instructions: 1_000_000,
            max_call_depth: 64,
        }
    }
}

/// How an emulated method finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `ret`, with the returned value for non-`void` methods
    Returned(Option<EmValue>),
    /// `throw` of the given object
    Threw(EmValue),
}

impl Outcome {
    /// The returned value.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] if the method threw or returned nothing.
    pub fn value(self) -> Result<EmValue> {
        match self {
            Outcome::Returned(Some(value)) => Ok(value),
            Outcome::Returned(None) => Err(Error::Emulation("method returned void".to_string())),
            Outcome::Threw(value) => Err(Error::Emulation(format!("method threw {value}"))),
        }
    }
}

/// Result of executing a single instruction.
enum StepResult {
    /// Fall through to the next instruction
    Continue,
    /// Continue at the given instruction
    Jump(InstrId),
    /// Leave the method
    Return(Option<EmValue>),
    /// Unwind with the given exception object
    Throw(EmValue),
}

/// A `leave` in progress.
struct PendingLeave {
    /// Handler entries still to run, innermost last
    handlers: Vec<InstrId>,
    target: InstrId,
}

/// State of one method activation.
struct Frame<'b> {
    body: &'b MethodBody,
    positions: HashMap<InstrId, usize>,
    stack: Vec<EmValue>,
    locals: Vec<EmValue>,
    args: Vec<EmValue>,
    leaves: Vec<PendingLeave>,
    constrained: Option<TypeSignature>,
}

impl<'b> Frame<'b> {
    fn new(body: &'b MethodBody, args: Vec<EmValue>) -> Self {
        Frame {
            body,
            positions: body.positions(),
            stack: Vec::new(),
            locals: body.locals().iter().map(EmValue::default_for).collect(),
            args,
            leaves: Vec::new(),
            constrained: None,
        }
    }

    fn push(&mut self, value: EmValue) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<EmValue> {
        self.stack
            .pop()
            .ok_or_else(|| Error::Emulation("evaluation stack underflow".to_string()))
    }

    fn pop_many(&mut self, count: usize) -> Result<Vec<EmValue>> {
        if self.stack.len() < count {
            return Err(Error::Emulation("evaluation stack underflow".to_string()));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn local(&self, index: u16) -> Result<&EmValue> {
        self.locals
            .get(usize::from(index))
            .ok_or_else(|| Error::Emulation(format!("no local V_{index}")))
    }

    fn local_mut(&mut self, index: u16) -> Result<&mut EmValue> {
        self.locals
            .get_mut(usize::from(index))
            .ok_or_else(|| Error::Emulation(format!("no local V_{index}")))
    }

    fn arg(&self, index: u16) -> Result<&EmValue> {
        self.args
            .get(usize::from(index))
            .ok_or_else(|| Error::Emulation(format!("no argument {index}")))
    }

    fn arg_mut(&mut self, index: u16) -> Result<&mut EmValue> {
        self.args
            .get_mut(usize::from(index))
            .ok_or_else(|| Error::Emulation(format!("no argument {index}")))
    }

    fn deref(&self, address: &EmValue) -> Result<EmValue> {
        match address {
            EmValue::LocalAddress(index) => self.local(*index).cloned(),
            EmValue::ArgumentAddress(index) => self.arg(*index).cloned(),
            other => Err(Error::Emulation(format!("{other} is not an address"))),
        }
    }

    fn store(&mut self, address: &EmValue, value: EmValue) -> Result<()> {
        match address {
            EmValue::LocalAddress(index) => *self.local_mut(*index)? = value,
            EmValue::ArgumentAddress(index) => *self.arg_mut(*index)? = value,
            other => return Err(Error::Emulation(format!("{other} is not an address"))),
        }
        Ok(())
    }

    fn position(&self, id: InstrId) -> Result<usize> {
        self.positions
            .get(&id)
            .copied()
            .ok_or_else(|| Error::Emulation(format!("no instruction {id}")))
    }

    /// Finally handlers run when leaving `from` for `to`, innermost first.
    fn exited_finally_handlers(&self, from: InstrId, to: InstrId) -> Result<Vec<InstrId>> {
        let from = self.position(from)?;
        let to = self.position(to)?;
        let mut exited = Vec::new();
        for handler in self.body.exception_handlers().iter().filter(|h| h.is_finally()) {
            let start = self.position(handler.try_start)?;
            let end = match handler.try_end {
                Some(end) => self.position(end)?,
                None => self.body.len(),
            };
            let inside = |pos: usize| pos >= start && pos < end;
            if inside(from) && !inside(to) {
                exited.push((end - start, handler.handler_start));
            }
        }
        exited.sort_by_key(|(size, _)| *size);
        Ok(exited.into_iter().map(|(_, handler)| handler).collect())
    }
}

fn operand_type(instr: &Instruction) -> Result<&TypeSignature> {
    instr
        .type_operand()
        .ok_or_else(|| Error::Emulation(format!("{instr} has no type operand")))
}

fn operand_method(instr: &Instruction) -> Result<&MethodRef> {
    instr
        .method_operand()
        .map(|method| &**method)
        .ok_or_else(|| Error::Emulation(format!("{instr} has no method operand")))
}

fn operand_index(instr: &Instruction) -> Result<u16> {
    match instr.operand {
        Operand::Local(index) | Operand::Argument(index) => Ok(index),
        _ => Err(Error::Emulation(format!("{instr} has no index operand"))),
    }
}

fn operand_target(instr: &Instruction) -> Result<InstrId> {
    instr
        .target()
        .ok_or_else(|| Error::Emulation(format!("{instr} has no target")))
}

fn is_reference(value: &EmValue) -> bool {
    matches!(
        value,
        EmValue::Str(_) | EmValue::Null | EmValue::Object(_) | EmValue::Array(_) | EmValue::Boxed { .. }
    )
}

fn is_reference_type(ty: &TypeSignature) -> bool {
    matches!(
        ty,
        TypeSignature::String
            | TypeSignature::Object
            | TypeSignature::Class(_)
            | TypeSignature::SzArray(_)
    )
}

/// Executes CIL method bodies.
///
/// # Examples
///
/// ```rust
/// use dotrewrite::emulation::{EmValue, Interpreter, NullHost};
/// use dotrewrite::prelude::*;
///
/// let body = MethodBodyBuilder::new()
///     .implementation(|asm| {
///         asm.ldarg_0()?.ldc_i4(2)?.add()?.ret()?;
///         Ok(())
///     })
///     .build()?;
///
/// let module = Module::new("demo");
/// let resolver = Resolver::new();
/// let platform = PlatformTypes::new();
/// let mut host = NullHost;
/// let mut interpreter = Interpreter::new(&module, &resolver, &platform, &mut host);
/// let result = interpreter.execute(&body, vec![EmValue::I32(40)])?.value()?;
/// assert_eq!(result, EmValue::I32(42));
/// # Ok::<(), dotrewrite::Error>(())
/// ```
pub struct Interpreter<'a> {
    module: &'a Module,
    runtime: Runtime<'a>,
    host: &'a mut dyn Host,
    limits: EmulationLimits,
    executed: u64,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    /// Creates an interpreter for bodies of `module`.
    pub fn new(
        module: &'a Module,
        resolver: &'a Resolver,
        platform: &'a PlatformTypes,
        host: &'a mut dyn Host,
    ) -> Self {
        Interpreter {
            module,
            runtime: Runtime::new(module, resolver, platform),
            host,
            limits: EmulationLimits::default(),
            executed: 0,
            depth: 0,
        }
    }

    /// Replaces the execution bounds.
    #[must_use]
    pub fn with_limits(mut self, limits: EmulationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Instructions executed so far.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Invokes a method defined in the emulated module.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] if the method is unknown, has no body, or faults.
    pub fn invoke(&mut self, method: &MethodRef, args: Vec<EmValue>) -> Result<Outcome> {
        let module = self.module;
        let body = Self::find_body(module, method)?
            .ok_or_else(|| Error::Emulation(format!("{method} is not defined in {}", module.name)))?;
        self.execute(body, args)
    }

    fn find_body<'m>(module: &'m Module, method: &MethodRef) -> Result<Option<&'m MethodBody>> {
        let Some(ty) = module.find_type(&method.declaring).and_then(|id| module.get_type(id))
        else {
            return Ok(None);
        };
        let Some(def) = ty
            .methods
            .iter()
            .find(|def| def.name == method.name && def.signature == method.signature)
        else {
            return Ok(None);
        };
        def.body
            .as_ref()
            .map(Some)
            .ok_or_else(|| Error::Emulation(format!("{method} has no body")))
    }

    /// Executes `body` with `args` until it returns or throws.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] on unsupported instructions, ill-typed operands or
    /// exhausted limits.
    pub fn execute(&mut self, body: &MethodBody, args: Vec<EmValue>) -> Result<Outcome> {
        if self.depth >= self.limits.max_call_depth {
            return Err(Error::Emulation("call depth limit exceeded".to_string()));
        }
        self.depth += 1;
        let result = self.run(body, args);
        self.depth -= 1;
        result
    }

    fn run(&mut self, body: &MethodBody, args: Vec<EmValue>) -> Result<Outcome> {
        let mut frame = Frame::new(body, args);
        let mut pc = body.first();

        while let Some(id) = pc {
            self.executed += 1;
            if self.executed > self.limits.max_instructions {
                return Err(Error::Emulation("instruction limit exceeded".to_string()));
            }
            let instr = body
                .get(id)
                .ok_or_else(|| Error::Emulation(format!("no instruction {id}")))?;

            pc = match self.step(&mut frame, id, instr)? {
                StepResult::Continue => body.next(id),
                StepResult::Jump(target) => Some(target),
                StepResult::Return(value) => return Ok(Outcome::Returned(value)),
                StepResult::Throw(value) => return Ok(Outcome::Threw(value)),
            };
        }
        Err(Error::Emulation("execution fell off the end of the method".to_string()))
    }

    fn step(&mut self, frame: &mut Frame<'_>, id: InstrId, instr: &Instruction) -> Result<StepResult> {
        if instr.opcode != OpCode::Callvirt && instr.opcode != OpCode::Constrained {
            frame.constrained = None;
        }

        match instr.opcode {
            OpCode::Nop => {}
            OpCode::Ldarg => {
                let value = frame.arg(operand_index(instr)?)?.clone();
                frame.push(value);
            }
            OpCode::Ldarga => frame.push(EmValue::ArgumentAddress(operand_index(instr)?)),
            OpCode::Starg => {
                let value = frame.pop()?;
                *frame.arg_mut(operand_index(instr)?)? = value;
            }
            OpCode::Ldloc => {
                let value = frame.local(operand_index(instr)?)?.clone();
                frame.push(value);
            }
            OpCode::Ldloca => frame.push(EmValue::LocalAddress(operand_index(instr)?)),
            OpCode::Stloc => {
                let value = frame.pop()?;
                *frame.local_mut(operand_index(instr)?)? = value;
            }
            OpCode::Ldnull => frame.push(EmValue::Null),
            OpCode::LdcI4 | OpCode::LdcI8 => {
                let value = match (instr.opcode, instr.as_i64()) {
                    (OpCode::LdcI4, Some(value)) => EmValue::I32(value as i32),
                    (_, Some(value)) => EmValue::I64(value),
                    _ => return Err(Error::Emulation(format!("malformed {instr}"))),
                };
                frame.push(value);
            }
            OpCode::Ldstr => {
                let value = instr
                    .string_operand()
                    .ok_or_else(|| Error::Emulation(format!("malformed {instr}")))?;
                frame.push(EmValue::string(value));
            }
            OpCode::Dup => {
                let value = frame.pop()?;
                frame.push(value.clone());
                frame.push(value);
            }
            OpCode::Pop => {
                frame.pop()?;
            }
            OpCode::Call | OpCode::Callvirt => {
                let constrained = frame.constrained.take();
                return self.call(frame, operand_method(instr)?, constrained);
            }
            OpCode::Newobj => {
                let method = operand_method(instr)?;
                let args = frame.pop_many(method.signature.params.len())?;
                let object = self
                    .dispatch(method, &args)?
                    .ok_or_else(|| Error::Emulation(format!("{method} produced no object")))?;
                frame.push(object);
            }
            OpCode::Ret => {
                let value = if frame.stack.is_empty() {
                    None
                } else {
                    Some(frame.pop()?)
                };
                return Ok(StepResult::Return(value));
            }
            OpCode::Br => return Ok(StepResult::Jump(operand_target(instr)?)),
            OpCode::Brfalse | OpCode::Brtrue => {
                let value = frame.pop()?;
                if value.is_true() == (instr.opcode == OpCode::Brtrue) {
                    return Ok(StepResult::Jump(operand_target(instr)?));
                }
            }
            OpCode::Beq
            | OpCode::Bge
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Blt
            | OpCode::BneUn
            | OpCode::BgeUn
            | OpCode::BgtUn
            | OpCode::BleUn
            | OpCode::BltUn => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                if compare(instr.opcode, &left, &right)? {
                    return Ok(StepResult::Jump(operand_target(instr)?));
                }
            }
            OpCode::Switch => {
                let index = frame.pop()?.as_i32()? as u32;
                if let Some(target) = instr.targets().get(index as usize) {
                    return Ok(StepResult::Jump(*target));
                }
            }
            OpCode::Leave => return self.leave(frame, id, operand_target(instr)?),
            OpCode::Endfinally => {
                let pending = frame.leaves.last_mut().ok_or_else(|| {
                    Error::Emulation("endfinally reached without a pending leave".to_string())
                })?;
                frame.stack.clear();
                if let Some(handler) = pending.handlers.pop() {
                    return Ok(StepResult::Jump(handler));
                }
                let target = pending.target;
                frame.leaves.pop();
                return Ok(StepResult::Jump(target));
            }
            OpCode::Throw => return Ok(StepResult::Throw(frame.pop()?)),
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
            | OpCode::ShrUn => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(binary(instr.opcode, &left, &right)?);
            }
            OpCode::Neg | OpCode::Not => {
                let value = frame.pop()?;
                frame.push(unary(instr.opcode, &value)?);
            }
            OpCode::Ceq | OpCode::Cgt | OpCode::CgtUn | OpCode::Clt | OpCode::CltUn => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let result = compare(instr.opcode, &left, &right)?;
                frame.push(EmValue::I32(i32::from(result)));
            }
            OpCode::ConvI1
            | OpCode::ConvI2
            | OpCode::ConvI4
            | OpCode::ConvI8
            | OpCode::ConvU1
            | OpCode::ConvU2
            | OpCode::ConvU4
            | OpCode::ConvU8 => {
                let value = frame.pop()?;
                frame.push(convert(instr.opcode, &value)?);
            }
            OpCode::Box => {
                let ty = operand_type(instr)?;
                let value = frame.pop()?;
                if is_reference_type(ty) {
                    frame.push(value);
                } else {
                    frame.push(EmValue::Boxed {
                        ty: ty.clone(),
                        value: Box::new(value),
                    });
                }
            }
            OpCode::UnboxAny => {
                let ty = operand_type(instr)?;
                match frame.pop()? {
                    EmValue::Boxed { value, .. } => frame.push(*value),
                    value if is_reference_type(ty) => frame.push(value),
                    other => {
                        return Err(Error::Emulation(format!("cannot unbox {other} as {ty}")));
                    }
                }
            }
            OpCode::Ldobj => {
                let address = frame.pop()?;
                let value = frame.deref(&address)?;
                frame.push(value);
            }
            OpCode::Stobj => {
                let value = frame.pop()?;
                let address = frame.pop()?;
                frame.store(&address, value)?;
            }
            OpCode::Initobj => {
                let ty = operand_type(instr)?;
                let address = frame.pop()?;
                frame.store(&address, EmValue::default_for(ty))?;
            }
            OpCode::Ldtoken => frame.push(EmValue::TypeHandle(operand_type(instr)?.clone())),
            OpCode::Newarr => {
                let element = operand_type(instr)?.clone();
                let count = frame.pop()?.as_i32()?;
                let count = usize::try_from(count)
                    .map_err(|_| Error::Emulation(format!("negative array size {count}")))?;
                let values = vec![EmValue::default_for(&element); count];
                frame.push(EmValue::Array(Rc::new(RefCell::new(EmArray { element, values }))));
            }
            OpCode::Ldlen => {
                let array = Self::array(frame.pop()?)?;
                let len = array.borrow().values.len();
                frame.push(EmValue::I32(len as i32));
            }
            OpCode::Ldelem => {
                let index = frame.pop()?.as_i32()?;
                let array = Self::array(frame.pop()?)?;
                let value = array
                    .borrow()
                    .values
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| Error::Emulation(format!("index {index} out of range")))?;
                frame.push(value);
            }
            OpCode::Stelem => {
                let value = frame.pop()?;
                let index = frame.pop()?.as_i32()?;
                let array = Self::array(frame.pop()?)?;
                let mut array = array.borrow_mut();
                let slot = array
                    .values
                    .get_mut(index as usize)
                    .ok_or_else(|| Error::Emulation(format!("index {index} out of range")))?;
                *slot = value;
            }
            OpCode::Constrained => frame.constrained = Some(operand_type(instr)?.clone()),
            other => {
                return Err(Error::Emulation(format!(
                    "{} is not supported by the emulator",
                    other.mnemonic()
                )));
            }
        }

        Ok(StepResult::Continue)
    }

    fn array(value: EmValue) -> Result<Rc<RefCell<EmArray>>> {
        match value {
            EmValue::Array(array) => Ok(array),
            other => Err(Error::Emulation(format!("{other} is not an array"))),
        }
    }

    fn leave(&mut self, frame: &mut Frame<'_>, id: InstrId, target: InstrId) -> Result<StepResult> {
        frame.stack.clear();
        let mut handlers = frame.exited_finally_handlers(id, target)?;
        if handlers.is_empty() {
            return Ok(StepResult::Jump(target));
        }
        handlers.reverse();
        let first = handlers.pop().ok_or_else(|| invariant_error!("empty handler list"))?;
        frame.leaves.push(PendingLeave { handlers, target });
        Ok(StepResult::Jump(first))
    }

    fn call(
        &mut self,
        frame: &mut Frame<'_>,
        method: &MethodRef,
        constrained: Option<TypeSignature>,
    ) -> Result<StepResult> {
        let mut args = frame.pop_many(method.signature.pop_count())?;
        if let (Some(ty), true) = (constrained, method.signature.has_this) {
            let receiver = frame.deref(&args[0])?;
            args[0] = if is_reference(&receiver) {
                receiver
            } else {
                EmValue::Boxed {
                    ty,
                    value: Box::new(receiver),
                }
            };
        }

        let result = self.dispatch(method, &args)?;
        match (result, method.signature.push_count()) {
            (Some(value), 1) => frame.push(value),
            (None, 0) => {}
            (Some(_), _) => {
                return Err(Error::Emulation(format!("{method} returned an unexpected value")));
            }
            (None, _) => return Err(Error::Emulation(format!("{method} returned no value"))),
        }
        Ok(StepResult::Continue)
    }

    fn dispatch(&mut self, method: &MethodRef, args: &[EmValue]) -> Result<Option<EmValue>> {
        let module = self.module;
        if let Some(body) = Self::find_body(module, method)? {
            return match self.execute(body, args.to_vec())? {
                Outcome::Returned(value) => Ok(value),
                Outcome::Threw(value) => Err(Error::Emulation(format!(
                    "{method} threw {value}"
                ))),
            };
        }
        if let Some(result) = self.runtime.invoke(method, args) {
            return result;
        }
        self.host.call(method, args)
    }
}
