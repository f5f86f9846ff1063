//! The closed set of rewrite strategies and the stages they run in.

use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::{
    compiler::{
        config::RewriterConfig,
        context::CompilerContext,
        passes::{CallSiteRewriter, HandlerFlattener, HelperMaterializer},
    },
    metadata::{
        method::MethodBody,
        module::{Module, TypeId},
        signatures::TypeName,
        token::Token,
    },
    Result,
};

/// Pipeline stages, in execution order.
///
/// A strategy never observes partial results of a later stage: helpers are materialized
/// before any call site is redirected to them, and regions are flattened last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, EnumCount, IntoStaticStr,
)]
pub enum Stage {
    /// Generate helper methods on the holder type
    Materialize = 0,
    /// Rewrite call sites
    CallSites = 1,
    /// Flatten finally regions
    Flatten = 2,
}

impl Stage {
    /// Ordinal of the stage.
    #[must_use]
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// A rewrite strategy.
#[derive(Debug, Clone, Copy)]
pub enum Strategy {
    /// Generates helpers ahead of the call-site rewrite
    Materialize(HelperMaterializer),
    /// Rewrites enum call sites
    CallSites(CallSiteRewriter),
    /// Flattens finally regions
    Flatten(HandlerFlattener),
}

impl Strategy {
    /// The strategies enabled by `config`.
    #[must_use]
    pub fn for_config(config: &RewriterConfig) -> Vec<Strategy> {
        let mut strategies = Vec::with_capacity(Stage::COUNT);
        if config.enable_call_sites {
            strategies.push(Strategy::Materialize(HelperMaterializer));
            strategies.push(Strategy::CallSites(CallSiteRewriter));
        }
        if config.enable_handler_flattening {
            strategies.push(Strategy::Flatten(HandlerFlattener));
        }
        strategies
    }

    /// Stage the strategy runs in.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Strategy::Materialize(_) => Stage::Materialize,
            Strategy::CallSites(_) => Stage::CallSites,
            Strategy::Flatten(_) => Stage::Flatten,
        }
    }

    /// Name used in events and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Materialize(_) => HelperMaterializer::NAME,
            Strategy::CallSites(_) => CallSiteRewriter::NAME,
            Strategy::Flatten(_) => HandlerFlattener::NAME,
        }
    }

    /// Returns true if the strategy leaves every method of `ty` alone.
    ///
    /// The generated-code holder is never rewritten: its helpers box the enum for the
    /// generic formatter, which the call-site rewrite would redirect to the helper itself.
    #[must_use]
    pub fn should_skip(&self, ctx: &CompilerContext, module: &Module, ty: TypeId) -> bool {
        let Some(definition) = module.get_type(ty) else {
            return true;
        };
        if module.type_name(ty) == ctx.config.holder_type() {
            return true;
        }

        match self {
            Strategy::Materialize(_) | Strategy::CallSites(_) => !ctx.config.enable_call_sites,
            Strategy::Flatten(_) => {
                if !ctx.config.enable_handler_flattening {
                    return true;
                }
                match &ctx.config.flatten_marker {
                    Some(marker) => !definition.has_attribute(&TypeName::parse(marker)),
                    None => false,
                }
            }
        }
    }

    /// Runs the strategy on one method body. Returns true if the body changed.
    ///
    /// # Errors
    /// Returns the error that made the strategy give up on the method; the body may be
    /// partially rewritten and has to be restored.
    pub fn process(
        &self,
        ctx: &mut CompilerContext,
        module: &mut Module,
        method: Token,
        body: &mut MethodBody,
    ) -> Result<bool> {
        match self {
            Strategy::Materialize(strategy) => {
                strategy.process_method(ctx, module, method, body)?;
                Ok(false)
            }
            Strategy::CallSites(strategy) => strategy.process_method(ctx, module, method, body),
            Strategy::Flatten(strategy) => strategy.process_method(ctx, method, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_stage_order() {
        let stages: Vec<Stage> = Stage::iter().collect();
        assert_eq!(stages, vec![Stage::Materialize, Stage::CallSites, Stage::Flatten]);
        assert_eq!(Stage::Flatten.ordinal(), 2);
        let name: &'static str = Stage::CallSites.into();
        assert_eq!(name, "CallSites");
    }

    #[test]
    fn test_strategies_follow_config() {
        let all = Strategy::for_config(&RewriterConfig::default());
        let stages: Vec<Stage> = all.iter().map(Strategy::stage).collect();
        assert_eq!(stages, vec![Stage::Materialize, Stage::CallSites, Stage::Flatten]);

        let flatten = Strategy::for_config(&RewriterConfig::flattening_only());
        assert_eq!(flatten.len(), 1);
        assert_eq!(flatten[0].name(), "flatten");
    }
}
