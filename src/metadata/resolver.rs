//! Type resolution across the module being rewritten and its platform modules.

use std::sync::Arc;

use crate::{
    metadata::{
        module::{Module, TypeDef, TypeId},
        signatures::{TypeName, TypeSignature},
    },
    Error, Result,
};

/// A resolved type definition.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedType<'a> {
    /// The definition
    pub definition: &'a TypeDef,
    /// Its id, when it is defined in the module being rewritten
    pub local: Option<TypeId>,
}

/// Dereferences type identities.
///
/// Lookups try the module being rewritten first, then each platform module in the order
/// they were added.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    platform_modules: Vec<Arc<Module>>,
}

impl Resolver {
    /// A resolver without platform modules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a platform module.
    #[must_use]
    pub fn with_platform_module(mut self, module: Arc<Module>) -> Self {
        self.platform_modules.push(module);
        self
    }

    /// Adds a platform module.
    pub fn add_platform_module(&mut self, module: Arc<Module>) {
        self.platform_modules.push(module);
    }

    /// Resolves a type by name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Unresolved`] if no module defines the type.
    pub fn resolve<'a>(&'a self, module: &'a Module, name: &TypeName) -> Result<ResolvedType<'a>> {
        if let Some(id) = module.find_type(name) {
            if let Some(definition) = module.get_type(id) {
                return Ok(ResolvedType {
                    definition,
                    local: Some(id),
                });
            }
        }

        for platform in &self.platform_modules {
            if let Some(definition) = platform
                .find_type(name)
                .and_then(|id| platform.get_type(id))
            {
                return Ok(ResolvedType {
                    definition,
                    local: None,
                });
            }
        }

        Err(Error::Unresolved(name.full_name()))
    }

    /// Resolves the type a signature names.
    ///
    /// # Errors
    /// Returns [`crate::Error::Unresolved`] for signatures that name no type, or whose type
    /// is not defined anywhere.
    pub fn resolve_signature<'a>(
        &'a self,
        module: &'a Module,
        signature: &TypeSignature,
    ) -> Result<ResolvedType<'a>> {
        match signature.type_name() {
            Some(name) => self.resolve(module, name),
            None => Err(Error::Unresolved(signature.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::module::{EnumBuilder, TypeAttributes};

    #[test]
    fn test_local_before_platform() -> Result<()> {
        let mut platform = Module::new("System.Runtime");
        EnumBuilder::new("DayOfWeek")
            .namespace("System")
            .value("Sunday", 0)
            .build(&mut platform)?;
        let resolver = Resolver::new().with_platform_module(Arc::new(platform));

        let mut module = Module::new("App");
        let local = module.add_type(crate::metadata::module::TypeDef::new(
            "App",
            "Local",
            TypeAttributes::PUBLIC,
            None,
        ))?;

        let resolved = resolver.resolve(&module, &TypeName::new("App", "Local"))?;
        assert_eq!(resolved.local, Some(local));

        let resolved = resolver.resolve(&module, &TypeName::new("System", "DayOfWeek"))?;
        assert_eq!(resolved.local, None);
        assert!(resolved.definition.is_enum());

        assert!(matches!(
            resolver.resolve(&module, &TypeName::new("App", "Missing")),
            Err(Error::Unresolved(_))
        ));
        assert!(resolver.resolve_signature(&module, &TypeSignature::I4).is_err());
        Ok(())
    }
}
