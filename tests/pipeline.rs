//! Batch processing of module files through [`Rewriter`].
//!
//! Module images use a tiny shape format: the file names the kind of module it holds
//! (`region`, `plain` or `enum`), and writing a module stores the kind it has after the
//! rewrite. That is enough to observe which files are rewritten, skipped or left alone.

use std::{
    fs,
    path::{Path, PathBuf},
};

use dotrewrite::{file::Physical, prelude::*};

struct ShapeFormat;

fn worker(module: &mut Module, signature: SignatureMethod, body: MethodBody) -> Result<()> {
    let ty = module.add_type(TypeDef::new(
        "App",
        "Worker",
        TypeAttributes::PUBLIC,
        Some(TypeName::new("System", "Object")),
    ))?;
    module.add_method(
        ty,
        MethodDef::new(
            "Run",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            signature,
            Some(body),
        ),
    )?;
    Ok(())
}

fn void() -> SignatureMethod {
    SignatureMethod::static_method(TypeSignature::Void, vec![])
}

fn region_module() -> Result<Module> {
    let mut module = Module::new("Region");
    let body = MethodBodyBuilder::new()
        .implementation(|asm| {
            asm.label("try")?
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
    worker(&mut module, void(), body)?;
    Ok(module)
}

fn plain_module() -> Result<Module> {
    let mut module = Module::new("Plain");
    let body = MethodBodyBuilder::new()
        .implementation(|asm| {
            asm.nop()?.ret()?;
            Ok(())
        })
        .build()?;
    worker(&mut module, void(), body)?;
    Ok(module)
}

fn enum_module() -> Result<Module> {
    let mut module = Module::new("Enum");
    let id = EnumBuilder::new("Color")
        .namespace("App")
        .value("Red", 0)
        .value("Green", 1)
        .build(&mut module)?;
    let color = TypeSignature::ValueType(module.type_name(id));
    let to_string = PlatformTypes::new().object_to_string;
    let body = MethodBodyBuilder::new()
        .implementation(move |asm| {
            asm.ldc_i4(1)?
                .typed(OpCode::Box, color)?
                .callvirt(to_string)?
                .pop()?
                .ret()?;
            Ok(())
        })
        .build()?;
    worker(&mut module, void(), body)?;
    Ok(module)
}

fn has_regions(module: &Module) -> bool {
    module.types().any(|(_, ty)| {
        ty.methods.iter().any(|method| {
            method
                .body
                .as_ref()
                .is_some_and(|body| !body.exception_handlers().is_empty())
        })
    })
}

fn has_virtual_calls(module: &Module) -> bool {
    module.listing().iter().any(|line| line.contains("callvirt"))
}

impl ModuleFormat for ShapeFormat {
    fn read(&self, data: &[u8]) -> Result<Module> {
        match data {
            b"region" => region_module(),
            b"plain" => plain_module(),
            b"enum" => enum_module(),
            other => Err(Error::Malformed {
                message: format!("unknown module shape {:?}", String::from_utf8_lossy(other)),
                file: file!(),
                line: line!(),
            }),
        }
    }

    fn write(&self, module: &Module) -> Result<Vec<u8>> {
        let shape: &[u8] = if has_regions(module) {
            b"region"
        } else if has_virtual_calls(module) {
            b"enum"
        } else {
            b"plain"
        };
        Ok(shape.to_vec())
    }
}

/// A scratch directory unique to one test.
struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    fn new(name: &str) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!(
            "dotrewrite-pipeline-{}-{name}",
            std::process::id()
        ));
        fs::create_dir_all(&dir)?;
        Ok(Scratch { dir })
    }

    fn file(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn contents(path: &Path) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

#[test]
fn only_changed_modules_are_written() -> Result<()> {
    let scratch = Scratch::new("written")?;
    let region = scratch.file("Region.dll", b"region")?;
    let plain = scratch.file("Plain.dll", b"plain")?;

    let result = Rewriter::new(ShapeFormat).process(&[&region, &plain]);
    assert!(result.is_complete_success());
    assert_eq!(result.success_count(), 2);
    assert_eq!(result.written_count(), 1);

    let report = result
        .report(&region)
        .ok_or_else(|| Error::Error("no report for Region.dll".to_string()))?;
    assert!(report.changed);
    assert!(report.written);
    assert!(report.events.has(EventKind::HandlersFlattened));
    assert!(report.events.has(EventKind::ModuleRewritten));
    assert_eq!(contents(&region)?, b"plain");

    let report = result
        .report(&plain)
        .ok_or_else(|| Error::Error("no report for Plain.dll".to_string()))?;
    assert!(!report.changed);
    assert!(!report.written);
    assert_eq!(report.summary(), "Plain: unchanged");
    assert_eq!(contents(&plain)?, b"plain");
    Ok(())
}

#[test]
fn a_second_run_finds_nothing_to_do() -> Result<()> {
    let scratch = Scratch::new("second-run")?;
    let region = scratch.file("Region.dll", b"region")?;
    let rewriter = Rewriter::new(ShapeFormat);

    assert_eq!(rewriter.process(&[&region]).written_count(), 1);
    let again = rewriter.process(&[&region]);
    assert!(again.is_complete_success());
    assert_eq!(again.written_count(), 0);
    assert_eq!(contents(&region)?, b"plain");
    Ok(())
}

#[test]
fn folded_call_sites_are_written() -> Result<()> {
    let scratch = Scratch::new("helpers")?;
    let path = scratch.file("Enum.dll", b"enum")?;

    let result = Rewriter::new(ShapeFormat).process(&[&path]);
    let report = result
        .report(&path)
        .ok_or_else(|| Error::Error("no report for Enum.dll".to_string()))?;
    assert!(report.changed);
    assert!(report.events.has(EventKind::ConstantFolded));
    assert!(!report.events.has(EventKind::HelperGenerated));
    // the folded literal removes the only virtual call
    assert!(report.written);
    assert_eq!(contents(&path)?, b"plain");
    Ok(())
}

#[test]
fn failures_skip_only_the_failing_module() -> Result<()> {
    let scratch = Scratch::new("failures")?;
    let garbage = scratch.file("Garbage.dll", b"MZ garbage")?;
    let missing = scratch.dir.join("Missing.dll");
    let region = scratch.file("Region.dll", b"region")?;

    let result = Rewriter::new(ShapeFormat).process(&[&garbage, &missing, &region]);
    assert_eq!(result.failure_count(), 2);
    assert_eq!(result.success_count(), 1);
    assert_eq!(result.locked_count, 0);
    assert!(result.has_failures());

    let (path, message) = &result.failed_modules[0];
    assert_eq!(path, &garbage);
    assert!(message.starts_with("Malformed"));
    assert_eq!(result.failed_modules[1].0, missing);

    assert_eq!(contents(&garbage)?, b"MZ garbage");
    assert_eq!(contents(&region)?, b"plain");
    Ok(())
}

#[test]
fn locked_modules_are_reported_and_left_alone() -> Result<()> {
    let scratch = Scratch::new("locked")?;
    let region = scratch.file("Region.dll", b"region")?;
    let rewriter = Rewriter::new(ShapeFormat);

    {
        let _held = Physical::open(&region)?;
        let result = rewriter.process(&[&region]);
        assert_eq!(result.locked_count, 1);
        assert_eq!(result.failure_count(), 1);
        assert!(result.failed_modules[0].1.contains("locked"));
    }
    assert_eq!(contents(&region)?, b"region");

    let result = rewriter.process(&[&region]);
    assert!(result.is_complete_success());
    assert_eq!(contents(&region)?, b"plain");
    Ok(())
}

#[test]
fn disabled_strategies_leave_modules_alone() -> Result<()> {
    let rewriter = Rewriter::new(ShapeFormat).with_config(RewriterConfig::call_sites_only());
    assert!(!rewriter.config().enable_handler_flattening);

    let mut module = region_module()?;
    let before = module.listing();
    let report = rewriter.rewrite_module(&mut module)?;
    assert!(!report.changed);
    assert_eq!(module.listing(), before);

    let rewriter = Rewriter::new(ShapeFormat).with_config(RewriterConfig::flattening_only());
    let mut module = enum_module()?;
    let before = module.listing();
    let report = rewriter.rewrite_module(&mut module)?;
    assert!(!report.changed);
    assert_eq!(module.listing(), before);
    Ok(())
}

#[test]
fn custom_holder_type_receives_the_helpers() -> Result<()> {
    let mut module = Module::new("Holder");
    let id = EnumBuilder::new("Color")
        .namespace("App")
        .value("Red", 0)
        .value("Green", 1)
        .build(&mut module)?;
    let color = TypeSignature::ValueType(module.type_name(id));
    let signature = SignatureMethod::static_method(TypeSignature::String, vec![color.clone()]);
    let to_string = PlatformTypes::new().object_to_string;
    let body = MethodBodyBuilder::new()
        .implementation(move |asm| {
            asm.ldarg_0()?
                .typed(OpCode::Box, color)?
                .callvirt(to_string)?
                .ret()?;
            Ok(())
        })
        .build()?;
    worker(&mut module, signature, body)?;

    let rewriter = Rewriter::new(ShapeFormat)
        .with_config(RewriterConfig::default().with_holder("App.Generated", "EnumSupport"));
    let report = rewriter.rewrite_module(&mut module)?;
    assert!(report.changed);
    assert!(report.summary().starts_with("Holder: "));

    let holder = module
        .find_type(&TypeName::new("App.Generated", "EnumSupport"))
        .and_then(|id| module.get_type(id))
        .ok_or_else(|| Error::Error("holder type missing".to_string()))?;
    assert_eq!(holder.method_index("ToString_App_Color"), Some(0));
    assert!(module
        .find_type(&TypeName::new("", "<EnumHelpers>"))
        .is_none());
    Ok(())
}
