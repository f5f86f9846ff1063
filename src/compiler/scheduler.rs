//! Stage scheduler for running rewrite strategies over a module.
//!
//! The `PassScheduler` runs its strategies stage by stage. Within a stage every type is
//! visited depth-first, parents before their nested types, and every method body is
//! detached from its method while a strategy works on it.

use strum::IntoEnumIterator;

use crate::{
    compiler::{
        context::CompilerContext,
        events::EventKind,
        pass::{Stage, Strategy},
    },
    metadata::module::{MethodId, Module},
    Error, Result,
};

/// Orchestrates strategy execution over the types of a module.
///
/// Each method body is taken out of its method, processed, and put back. A pristine copy
/// is kept while the strategy runs; if the strategy fails, or the rewritten body fails
/// validation, the copy is put back instead and the failure is logged.
pub struct PassScheduler {
    strategies: Vec<Strategy>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(Strategy::for_config(&Default::default()))
    }
}

impl PassScheduler {
    /// Creates a scheduler for the given strategies.
    #[must_use]
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }

    /// The registered strategies.
    #[must_use]
    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Runs every stage in ascending order.
    ///
    /// # Returns
    ///
    /// `true` if any method body changed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the module itself is inconsistent; failures inside a
    /// method are contained to that method.
    pub fn run(&self, ctx: &mut CompilerContext, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for stage in Stage::iter() {
            if self.run_stage(ctx, module, stage)? {
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Runs the strategies of one stage over every type.
    ///
    /// # Errors
    ///
    /// See [`PassScheduler::run`].
    pub fn run_stage(
        &self,
        ctx: &mut CompilerContext,
        module: &mut Module,
        stage: Stage,
    ) -> Result<bool> {
        let strategies: Vec<&Strategy> = self
            .strategies
            .iter()
            .filter(|strategy| strategy.stage() == stage)
            .collect();
        if strategies.is_empty() {
            return Ok(false);
        }

        let mut changed = false;
        for ty in module.type_ids_depth_first() {
            for strategy in &strategies {
                if strategy.should_skip(ctx, module, ty) {
                    continue;
                }

                // Methods added while the type is visited are not revisited.
                let count = module.get_type(ty).map_or(0, |def| def.methods.len());
                for index in 0..count {
                    if Self::run_on_method(ctx, module, strategy, MethodId { ty, index })? {
                        changed = true;
                    }
                }
            }
        }
        Ok(changed)
    }

    fn run_on_method(
        ctx: &mut CompilerContext,
        module: &mut Module,
        strategy: &Strategy,
        id: MethodId,
    ) -> Result<bool> {
        let Some(method) = module.method_mut(id) else {
            return Ok(false);
        };
        let token = method.token;
        let Some(mut body) = method.body.take() else {
            return Ok(false);
        };
        let pristine = body.clone();

        let mut outcome = strategy.process(ctx, module, token, &mut body);
        if ctx.config.verify_bodies {
            if let Ok(true) = outcome {
                outcome = body.validate().map(|()| true);
            }
        }

        let (body, changed) = match outcome {
            Ok(changed) => (body, changed),
            Err(error) => {
                let name = module
                    .method(id)
                    .map(|method| format!("{}::{}", module.type_name(id.ty), method.name))
                    .unwrap_or_default();
                log::warn!("{} left unchanged by {}: {}", name, strategy.name(), error);

                let kind = match error {
                    Error::Invariant { .. } => EventKind::MethodRestored,
                    _ => EventKind::MethodSkipped,
                };
                ctx.events
                    .record(kind)
                    .method(token)
                    .pass(strategy.name())
                    .message(format!("{name}: {error}"));
                (pristine, false)
            }
        };

        module
            .method_mut(id)
            .ok_or_else(|| invariant_error!("Method {}:{} vanished", id.ty.0, id.index))?
            .body = Some(body);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::MethodBodyBuilder,
        compiler::RewriterConfig,
        metadata::{
            module::{MethodAttributes, MethodDef, TypeAttributes, TypeDef},
            platform::PlatformTypes,
            resolver::Resolver,
            signatures::{SignatureMethod, TypeName, TypeSignature},
        },
    };

    fn module_with_region(has_endfinally: bool) -> Result<Module> {
        let mut module = Module::new("App");
        let ty = module.add_type(TypeDef::new(
            "App",
            "Worker",
            TypeAttributes::PUBLIC,
            Some(TypeName::new("System", "Object")),
        ))?;
        let body = MethodBodyBuilder::new()
            .implementation(move |asm| {
                asm.label("try")?.nop()?.leave("exit")?.label("handler")?.nop()?;
                if has_endfinally {
                    asm.endfinally()?;
                } else {
                    asm.ret()?;
                }
                asm.label("exit")?
                    .ret()?
                    .try_finally("try", "handler", "handler", "exit")?;
                Ok(())
            })
            .build()?;
        module.add_method(
            ty,
            MethodDef::new(
                "Run",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                SignatureMethod::static_method(TypeSignature::Void, vec![]),
                Some(body),
            ),
        )?;
        Ok(module)
    }

    fn context() -> CompilerContext {
        CompilerContext::new(
            RewriterConfig::default(),
            PlatformTypes::new(),
            Resolver::new(),
        )
    }

    #[test]
    fn test_default_scheduler_has_every_stage() {
        let scheduler = PassScheduler::default();
        assert_eq!(scheduler.strategies().len(), 3);
    }

    #[test]
    fn test_run_flattens_and_reports() -> Result<()> {
        let mut module = module_with_region(true)?;
        let mut ctx = context();
        assert!(PassScheduler::default().run(&mut ctx, &mut module)?);

        let body = module
            .method(MethodId {
                ty: crate::metadata::module::TypeId(0),
                index: 0,
            })
            .and_then(|method| method.body.as_ref())
            .ok_or_else(|| crate::Error::Error("body missing".into()))?;
        assert!(body.exception_handlers().is_empty());
        assert_eq!(ctx.events.count_kind(EventKind::HandlersFlattened), 1);
        Ok(())
    }

    #[test]
    fn test_failed_method_is_restored() -> Result<()> {
        let mut module = module_with_region(false)?;
        let before = module.listing();
        let mut ctx = context();

        assert!(!PassScheduler::default().run(&mut ctx, &mut module)?);
        assert_eq!(module.listing(), before);
        assert_eq!(ctx.events.count_kind(EventKind::MethodSkipped), 1);
        Ok(())
    }

    #[test]
    fn test_flatten_marker_restricts_types() -> Result<()> {
        let mut module = module_with_region(true)?;
        let before = module.listing();
        let mut ctx = CompilerContext::new(
            RewriterConfig::default().with_flatten_marker("App.NoExceptionsAttribute"),
            PlatformTypes::new(),
            Resolver::new(),
        );

        assert!(!PassScheduler::default().run(&mut ctx, &mut module)?);
        assert_eq!(module.listing(), before);
        Ok(())
    }
}
