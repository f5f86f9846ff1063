//! Per-module state shared by the rewrite strategies.

use crate::{
    codegen::{EnumCodeGenerator, EnumDescriptor, HelperCache, Operation},
    compiler::{
        config::RewriterConfig,
        events::{EventKind, EventLog},
    },
    metadata::{
        module::Module,
        platform::PlatformTypes,
        resolver::Resolver,
        signatures::{MethodRefRc, TypeSignature},
    },
    Error, Result,
};

/// Compiler context for the rewrite of one module.
///
/// Holds the configuration, the platform context object, the resolver and the helper
/// cache. A context belongs to exactly one module; helpers cached here refer to the
/// holder type of that module.
pub struct CompilerContext {
    /// Pipeline configuration.
    pub config: RewriterConfig,

    /// Primitive providers and reflection entry points.
    pub platform: PlatformTypes,

    /// Resolver for types defined outside the module.
    pub resolver: Resolver,

    /// Accumulated events from all strategies.
    pub events: EventLog,

    helpers: HelperCache,
}

impl CompilerContext {
    /// Creates a context for one module.
    #[must_use]
    pub fn new(config: RewriterConfig, platform: PlatformTypes, resolver: Resolver) -> Self {
        Self {
            config,
            platform,
            resolver,
            events: EventLog::new(),
            helpers: HelperCache::new(),
        }
    }

    /// The generated helpers cache.
    #[must_use]
    pub fn helpers(&self) -> &HelperCache {
        &self.helpers
    }

    /// A code generator configured from this context.
    #[must_use]
    pub fn generator(&self) -> EnumCodeGenerator<'_> {
        EnumCodeGenerator::new(
            &self.platform,
            self.config.table_density_ratio,
            self.config.max_flag_combinations,
        )
    }

    /// Reads the descriptor of the enum named by a type operand.
    ///
    /// # Errors
    /// Returns [`Error::Unsupported`] for operands that are not non-generic value types or
    /// not enums, and [`Error::Unresolved`] if the type is not defined anywhere.
    pub fn enum_descriptor(&self, module: &Module, ty: &TypeSignature) -> Result<EnumDescriptor> {
        let TypeSignature::ValueType(name) = ty else {
            return Err(Error::Unsupported(format!("{ty} is not a non-generic value type")));
        };
        let resolved = self.resolver.resolve(module, name)?;
        EnumDescriptor::from_type(name, resolved.definition)
    }

    /// Returns the helper implementing `operation` for `descriptor`, generating it on
    /// first use.
    ///
    /// # Errors
    /// Propagates code generation and module errors.
    pub fn helper(
        &mut self,
        module: &mut Module,
        operation: Operation,
        descriptor: &EnumDescriptor,
    ) -> Result<MethodRefRc> {
        let holder = self.config.holder_type();
        let generator = EnumCodeGenerator::new(
            &self.platform,
            self.config.table_density_ratio,
            self.config.max_flag_combinations,
        );

        let before = self.helpers.created().len();
        let helper =
            self.helpers
                .get_or_create(module, &holder, &generator, operation, descriptor)?;

        if let Some(id) = self.helpers.created().get(before) {
            if let Some(method) = module.method(*id) {
                self.events
                    .record(EventKind::HelperGenerated)
                    .method(method.token)
                    .message(format!("{}::{}", holder, method.name));
            }
        }
        Ok(helper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::module::EnumBuilder;

    #[test]
    fn test_helpers_are_cached() -> Result<()> {
        let mut module = Module::new("App");
        let id = EnumBuilder::new("Color")
            .namespace("App")
            .value("Red", 0)
            .value("Green", 1)
            .build(&mut module)?;
        let mut ctx = CompilerContext::new(
            RewriterConfig::default(),
            PlatformTypes::new(),
            Resolver::new(),
        );

        let ty = TypeSignature::ValueType(module.type_name(id));
        let descriptor = ctx.enum_descriptor(&module, &ty)?;
        let first = ctx.helper(&mut module, Operation::IsDefined, &descriptor)?;
        let second = ctx.helper(&mut module, Operation::IsDefined, &descriptor)?;

        assert_eq!(first, second);
        assert_eq!(first.name, "IsDefined_App_Color");
        assert_eq!(ctx.helpers().created().len(), 1);
        assert_eq!(ctx.events.count_kind(EventKind::HelperGenerated), 1);
        Ok(())
    }

    #[test]
    fn test_descriptor_rejects_non_enums() {
        let module = Module::new("App");
        let ctx = CompilerContext::new(
            RewriterConfig::default(),
            PlatformTypes::new(),
            Resolver::new(),
        );

        let int = TypeSignature::I4;
        assert!(matches!(
            ctx.enum_descriptor(&module, &int),
            Err(Error::Unsupported(_))
        ));
        let missing = TypeSignature::ValueType(crate::metadata::signatures::TypeName::new(
            "App", "Missing",
        ));
        assert!(matches!(
            ctx.enum_descriptor(&module, &missing),
            Err(Error::Unresolved(_))
        ));
    }
}
