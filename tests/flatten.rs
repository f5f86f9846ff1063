//! End-to-end checks of try/finally flattening.
//!
//! Each method logs through `App.Log::Write(int32)`, an external `void` method served by
//! a [`RecordingHost`]. A flattened method has to produce the same trace and result as
//! the original with its exception regions intact.

use dotrewrite::prelude::*;

fn log_write() -> MethodRefRc {
    MethodRef::new(
        TypeName::new("App", "Log"),
        "Write",
        SignatureMethod::static_method(TypeSignature::Void, vec![TypeSignature::I4]),
    )
}

/// `ldc.i4 value; call App.Log::Write(int32)`
fn log(asm: &mut InstructionAssembler, value: i32) -> Result<()> {
    asm.ldc_i4(value)?.call(log_write())?;
    Ok(())
}

struct Fixture {
    module: Module,
    worker: TypeId,
}

impl Fixture {
    fn new() -> Result<Self> {
        let mut module = Module::new("App");
        let worker = module.add_type(TypeDef::new(
            "App",
            "Worker",
            TypeAttributes::PUBLIC,
            Some(TypeName::new("System", "Object")),
        ))?;
        Ok(Fixture { module, worker })
    }

    fn add(&mut self, name: &str, params: usize, body: MethodBody) -> Result<MethodRefRc> {
        let id = self.module.add_method(
            self.worker,
            MethodDef::new(
                name,
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                SignatureMethod::static_method(TypeSignature::I4, vec![TypeSignature::I4; params]),
                Some(body),
            ),
        )?;
        self.module
            .method_ref(id)
            .ok_or_else(|| Error::Error(format!("{name} was not added")))
    }

    fn method<F>(&mut self, name: &str, params: usize, f: F) -> Result<MethodRefRc>
    where
        F: FnOnce(&mut InstructionAssembler) -> Result<()> + 'static,
    {
        let body = MethodBodyBuilder::new().implementation(f).build()?;
        self.add(name, params, body)
    }

    fn flattened(&self) -> Result<(Module, CompilerContext)> {
        flatten_with(&self.module, RewriterConfig::flattening_only())
    }
}

fn flatten_with(module: &Module, config: RewriterConfig) -> Result<(Module, CompilerContext)> {
    let mut module = module.clone();
    let scheduler = PassScheduler::new(Strategy::for_config(&config));
    let mut ctx = CompilerContext::new(config, PlatformTypes::new(), Resolver::new());
    scheduler.run(&mut ctx, &mut module)?;
    Ok((module, ctx))
}

fn trace(module: &Module, method: &MethodRef, args: &[i32]) -> Result<(Outcome, Vec<String>)> {
    let platform = PlatformTypes::new();
    let resolver = Resolver::new();
    let mut host = RecordingHost::new();
    let args = args.iter().copied().map(EmValue::I32).collect();
    let outcome = Interpreter::new(module, &resolver, &platform, &mut host).invoke(method, args)?;
    Ok((outcome, host.trace()))
}

fn assert_same_behavior(
    before: &Module,
    after: &Module,
    method: &MethodRef,
    args: &[i32],
) -> Result<Vec<String>> {
    let expected = trace(before, method, args)?;
    let actual = trace(after, method, args)?;
    assert_eq!(expected, actual, "{} diverged for {:?}", method.name, args);
    Ok(actual.1)
}

fn body<'m>(module: &'m Module, method: &MethodRef) -> Option<&'m MethodBody> {
    module
        .find_type(&method.declaring)
        .and_then(|id| module.get_type(id))
        .and_then(|ty| ty.methods.iter().find(|def| def.name == method.name))
        .and_then(|def| def.body.as_ref())
}

fn assert_flat(module: &Module, method: &MethodRef) -> Result<()> {
    let body = body(module, method).ok_or_else(|| Error::Error("missing body".to_string()))?;
    assert!(body.exception_handlers().is_empty());
    body.validate()?;
    let listing = body.listing();
    assert!(listing.iter().any(|line| line.contains("switch")));
    assert!(!listing.iter().any(|line| line.contains("endfinally")));
    assert!(!listing.iter().any(|line| line.contains("leave")));
    Ok(())
}

fn expected(calls: &[i32]) -> Vec<String> {
    calls
        .iter()
        .map(|value| format!("App.Log::Write({value})"))
        .collect()
}

#[test]
fn single_region_with_one_exit() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let method = fixture.method("Run", 0, |asm| {
        asm.label("try")?;
        log(asm, 1)?;
        asm.leave("exit")?.label("handler")?;
        log(asm, 2)?;
        asm.endfinally()?.label("exit")?;
        log(asm, 3)?;
        asm.ldc_i4(42)?
            .ret()?
            .try_finally("try", "handler", "handler", "exit")?;
        Ok(())
    })?;

    let (flattened, ctx) = fixture.flattened()?;
    let calls = assert_same_behavior(&fixture.module, &flattened, &method, &[])?;
    assert_eq!(calls, expected(&[1, 2, 3]));
    assert_eq!(
        trace(&flattened, &method, &[])?.0,
        Outcome::Returned(Some(EmValue::I32(42)))
    );
    assert_flat(&flattened, &method)?;
    assert_eq!(ctx.events.count_kind(EventKind::HandlersFlattened), 1);
    Ok(())
}

#[test]
fn sibling_regions_with_two_exits_each() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let method = fixture.method("Route", 2, |asm| {
        asm.label("try1")?.ldarg_0()?.brtrue("second1")?;
        log(asm, 1)?;
        asm.leave("exit_a")?.label("second1")?;
        log(asm, 2)?;
        asm.leave("exit_b")?.label("handler1")?;
        log(asm, 10)?;
        asm.endfinally()?.label("exit_a")?;
        log(asm, 100)?;
        asm.br("try2")?.label("exit_b")?;
        log(asm, 200)?;

        asm.label("try2")?.ldarg_1()?.brtrue("second2")?;
        log(asm, 3)?;
        asm.leave("exit_c")?.label("second2")?;
        log(asm, 4)?;
        asm.leave("exit_d")?.label("handler2")?;
        log(asm, 20)?;
        asm.endfinally()?.label("exit_c")?;
        log(asm, 300)?;
        asm.ldc_i4(3)?.ret()?.label("exit_d")?;
        log(asm, 400)?;
        asm.ldc_i4(4)?
            .ret()?
            .try_finally("try1", "handler1", "handler1", "exit_a")?
            .try_finally("try2", "handler2", "handler2", "exit_c")?;
        Ok(())
    })?;

    let (flattened, _) = fixture.flattened()?;
    for (x, y, calls) in [
        (0, 0, [1, 10, 100, 3, 20, 300]),
        (0, 1, [1, 10, 100, 4, 20, 400]),
        (1, 0, [2, 10, 200, 3, 20, 300]),
        (1, 1, [2, 10, 200, 4, 20, 400]),
    ] {
        let trace = assert_same_behavior(&fixture.module, &flattened, &method, &[x, y])?;
        assert_eq!(trace, expected(&calls));
    }
    assert_flat(&flattened, &method)?;
    Ok(())
}

#[test]
fn three_nested_regions_run_every_exited_finally() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let method = fixture.method("Nested", 1, |asm| {
        asm.label("outer_try")?;
        log(asm, 1)?;
        asm.label("middle_try")?;
        log(asm, 2)?;
        asm.label("inner_try")?.ldarg_0()?.brtrue("inner_second")?;
        log(asm, 3)?;
        asm.leave("done")?.label("inner_second")?;
        log(asm, 4)?;
        asm.leave("after_inner")?.label("inner_handler")?;
        log(asm, 30)?;
        asm.endfinally()?.label("after_inner")?;
        log(asm, 5)?;
        asm.leave("done")?.label("middle_handler")?;
        log(asm, 20)?;
        asm.endfinally()?.label("outer_handler")?;
        log(asm, 10)?;
        asm.endfinally()?.label("done")?;
        log(asm, 99)?;
        asm.ldc_i4(0)?
            .ret()?
            .try_finally("inner_try", "inner_handler", "inner_handler", "after_inner")?
            .try_finally("middle_try", "middle_handler", "middle_handler", "outer_handler")?
            .try_finally("outer_try", "outer_handler", "outer_handler", "done")?;
        Ok(())
    })?;

    let (flattened, _) = fixture.flattened()?;
    let direct = assert_same_behavior(&fixture.module, &flattened, &method, &[0])?;
    assert_eq!(direct, expected(&[1, 2, 3, 30, 20, 10, 99]));
    let relayed = assert_same_behavior(&fixture.module, &flattened, &method, &[1])?;
    assert_eq!(relayed, expected(&[1, 2, 4, 30, 5, 20, 10, 99]));
    assert_flat(&flattened, &method)?;
    Ok(())
}

#[test]
fn region_inside_a_finally_handler_keeps_its_own_state() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let method = fixture.method("Cleanup", 1, |asm| {
        asm.label("outer_try")?
            .label("inner_try")?
            .ldarg_0()?
            .brtrue("to_y")?;
        log(asm, 1)?;
        asm.leave("exit")?
            .label("to_y")?
            .leave("y")?
            .label("inner_handler")?
            .label("nested_try")?;
        log(asm, 10)?;
        asm.leave("after")?.label("nested_handler")?;
        log(asm, 11)?;
        asm.endfinally()?.label("after")?;
        log(asm, 12)?;
        asm.endfinally()?.label("y")?;
        log(asm, 2)?;
        asm.leave("exit")?.label("outer_handler")?;
        log(asm, 3)?;
        asm.endfinally()?.label("exit")?;
        log(asm, 4)?;
        asm.ldc_i4(0)?
            .ret()?
            .try_finally("nested_try", "nested_handler", "nested_handler", "after")?
            .try_finally("inner_try", "inner_handler", "inner_handler", "y")?
            .try_finally("outer_try", "outer_handler", "outer_handler", "exit")?;
        Ok(())
    })?;

    let (flattened, ctx) = fixture.flattened()?;
    let direct = assert_same_behavior(&fixture.module, &flattened, &method, &[0])?;
    assert_eq!(direct, expected(&[1, 10, 11, 12, 3, 4]));
    let through_y = assert_same_behavior(&fixture.module, &flattened, &method, &[1])?;
    assert_eq!(through_y, expected(&[10, 11, 12, 2, 3, 4]));
    assert_flat(&flattened, &method)?;

    let messages: Vec<&str> = ctx
        .events
        .filter_kind(EventKind::HandlersFlattened)
        .map(|event| event.message.as_str())
        .collect();
    assert_eq!(messages, ["3 regions, 3 state slots"]);
    Ok(())
}

#[test]
fn handler_reached_only_by_exceptions_is_replaced_by_a_throw() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let ctor = PlatformTypes::new().invalid_operation_ctor;
    let method = fixture.method("Fail", 0, move |asm| {
        asm.label("try")?;
        log(asm, 7)?;
        asm.newobj(ctor)?.throw()?.label("handler")?;
        log(asm, 8)?;
        asm.endfinally()?
            .label("end")?
            .try_finally("try", "handler", "handler", "end")?;
        Ok(())
    })?;

    let (flattened, _) = fixture.flattened()?;
    let calls = assert_same_behavior(&fixture.module, &flattened, &method, &[])?;
    assert_eq!(calls, expected(&[7]));

    let body = body(&flattened, &method).ok_or_else(|| Error::Error("missing body".to_string()))?;
    assert!(body.exception_handlers().is_empty());
    let throws = body
        .listing()
        .iter()
        .filter(|line| line.ends_with(": throw"))
        .count();
    assert_eq!(throws, 2);
    Ok(())
}

#[test]
fn unsupported_regions_leave_the_method_untouched() -> Result<()> {
    let mut fixture = Fixture::new()?;

    let mut fault = MethodBodyBuilder::new()
        .implementation(|asm| {
            asm.label("try")?;
            log(asm, 1)?;
            asm.leave("exit")?.label("handler")?;
            log(asm, 2)?;
            asm.endfinally()?
                .label("exit")?
                .ldc_i4(0)?
                .ret()?
                .try_finally("try", "handler", "handler", "exit")?;
            Ok(())
        })
        .build()?;
    let mut handler = fault.exception_handlers()[0].clone();
    handler.flags = ExceptionHandlerFlags::FAULT;
    fault.clear_exception_handlers();
    fault.add_exception_handler(handler)?;
    let fault = fixture.add("Fault", 0, fault)?;

    let no_endfinally = fixture.method("NoEndfinally", 0, |asm| {
        asm.label("try")?;
        log(asm, 1)?;
        asm.leave("exit")?.label("handler")?;
        log(asm, 2)?;
        asm.label("exit")?
            .ldc_i4(0)?
            .ret()?
            .try_finally("try", "handler", "handler", "exit")?;
        Ok(())
    })?;

    let (flattened, ctx) = fixture.flattened()?;
    for method in [&fault, &no_endfinally] {
        let before = body(&fixture.module, method).map(MethodBody::listing);
        let after = body(&flattened, method).map(MethodBody::listing);
        assert_eq!(before, after);
    }
    assert_eq!(ctx.events.count_kind(EventKind::MethodSkipped), 2);
    assert!(!ctx.events.has(EventKind::HandlersFlattened));
    Ok(())
}

#[test]
fn marker_attribute_restricts_flattening() -> Result<()> {
    let mut fixture = Fixture::new()?;
    let region = |asm: &mut InstructionAssembler| -> Result<()> {
        asm.label("try")?;
        log(asm, 1)?;
        asm.leave("exit")?.label("handler")?;
        log(asm, 2)?;
        asm.endfinally()?
            .label("exit")?
            .ldc_i4(0)?
            .ret()?
            .try_finally("try", "handler", "handler", "exit")?;
        Ok(())
    };
    let plain = fixture.method("Plain", 0, region)?;

    let mut marked_type = TypeDef::new(
        "App",
        "Marked",
        TypeAttributes::PUBLIC,
        Some(TypeName::new("System", "Object")),
    );
    marked_type
        .custom_attributes
        .push(TypeName::new("App", "FlattenAttribute"));
    let marked = fixture.module.add_type(marked_type)?;
    let id = fixture.module.add_method(
        marked,
        MethodDef::new(
            "Run",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            SignatureMethod::static_method(TypeSignature::I4, vec![]),
            Some(MethodBodyBuilder::new().implementation(region).build()?),
        ),
    )?;
    let run = fixture
        .module
        .method_ref(id)
        .ok_or_else(|| Error::Error("Run was not added".to_string()))?;

    let config = RewriterConfig::flattening_only().with_flatten_marker("App.FlattenAttribute");
    let (flattened, ctx) = flatten_with(&fixture.module, config)?;

    assert_flat(&flattened, &run)?;
    assert_eq!(
        body(&flattened, &plain).map(MethodBody::listing),
        body(&fixture.module, &plain).map(MethodBody::listing)
    );
    assert_eq!(ctx.events.count_kind(EventKind::HandlersFlattened), 1);
    assert_same_behavior(&fixture.module, &flattened, &run, &[])?;
    Ok(())
}
