//! Materialization of helper methods on the generated-code holder type.

use std::collections::HashMap;

use crate::{
    codegen::{
        descriptor::EnumDescriptor,
        generator::{EnumCodeGenerator, Operation},
    },
    metadata::{
        module::{MethodAttributes, MethodDef, MethodId, Module, TypeAttributes, TypeDef, TypeId},
        signatures::{MethodRefRc, SignatureMethod, TypeName},
    },
    Result,
};

/// Finds or creates helper methods, one per (operation, enum) pair.
///
/// Helpers are looked up by name on the holder type before they are generated, so a
/// module rewritten twice reuses the helpers of the first run.
#[derive(Debug, Default)]
pub struct HelperCache {
    holder: Option<TypeId>,
    helpers: HashMap<(Operation, TypeName), MethodRefRc>,
    created: Vec<MethodId>,
}

impl HelperCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the helper implementing `operation` for `enum_name`,
    /// e.g. `ToString_App_Outer_Color`.
    #[must_use]
    pub fn helper_name(operation: Operation, enum_name: &TypeName) -> String {
        format!(
            "{}_{}",
            operation.name(),
            enum_name.full_name().replace(['.', '/'], "_")
        )
    }

    /// Picks the helper name for `operation` on `descriptor` and the existing helper
    /// carrying it, if any.
    ///
    /// Distinct enums can flatten to the same base name (`App.Color` and `App_Color`).
    /// A method is only reused when its signature names this enum; otherwise the next
    /// free name among `{base}`, `{base}_2`, `{base}_3`... is taken.
    fn resolve_name(
        module: &Module,
        holder: TypeId,
        operation: Operation,
        descriptor: &EnumDescriptor,
        signature: &SignatureMethod,
    ) -> (String, Option<MethodId>) {
        let base = Self::helper_name(operation, &descriptor.name);
        let Some(ty) = module.get_type(holder) else {
            return (base, None);
        };

        let mut name = base.clone();
        let mut ordinal = 1usize;
        loop {
            match ty.methods.iter().position(|method| method.name == name) {
                None => return (name, None),
                Some(index) if ty.methods[index].signature == *signature => {
                    return (name, Some(MethodId { ty: holder, index }));
                }
                Some(_) => {
                    ordinal += 1;
                    name = format!("{base}_{ordinal}");
                }
            }
        }
    }

    /// Methods created through this cache, in creation order.
    #[must_use]
    pub fn created(&self) -> &[MethodId] {
        &self.created
    }

    /// The holder type, created on first use.
    ///
    /// # Errors
    /// Propagates module errors.
    pub fn holder(&mut self, module: &mut Module, holder_name: &TypeName) -> Result<TypeId> {
        if let Some(holder) = self.holder {
            return Ok(holder);
        }

        let holder = match module.find_type(holder_name) {
            Some(existing) => existing,
            None => module.add_type(TypeDef::new(
                &holder_name.namespace,
                &holder_name.name,
                TypeAttributes::NOT_PUBLIC
                    | TypeAttributes::ABSTRACT
                    | TypeAttributes::SEALED
                    | TypeAttributes::BEFORE_FIELD_INIT,
                Some(TypeName::new("System", "Object")),
            ))?,
        };
        self.holder = Some(holder);
        Ok(holder)
    }

    /// Returns a reference to the helper implementing `operation` for `descriptor`,
    /// generating it when neither the cache nor the holder type has it yet.
    ///
    /// # Errors
    /// Propagates code generation and module errors.
    pub fn get_or_create(
        &mut self,
        module: &mut Module,
        holder_name: &TypeName,
        generator: &EnumCodeGenerator<'_>,
        operation: Operation,
        descriptor: &EnumDescriptor,
    ) -> Result<MethodRefRc> {
        let key = (operation, descriptor.name.clone());
        if let Some(helper) = self.helpers.get(&key) {
            return Ok(helper.clone());
        }

        let holder = self.holder(module, holder_name)?;
        let signature = operation.signature(&descriptor.signature());
        let (name, existing) = Self::resolve_name(module, holder, operation, descriptor, &signature);

        let id = match existing {
            Some(id) => id,
            None => {
                let body = generator.generate(operation, descriptor)?;
                let id = module.add_method(
                    holder,
                    MethodDef::new(
                        &name,
                        MethodAttributes::ASSEMBLY
                            | MethodAttributes::STATIC
                            | MethodAttributes::HIDE_BY_SIG,
                        signature,
                        Some(body),
                    ),
                )?;
                log::debug!("Generated helper {}::{}", holder_name, name);
                self.created.push(id);
                id
            }
        };

        let helper = module
            .method_ref(id)
            .ok_or_else(|| invariant_error!("Helper {} vanished", name))?;
        self.helpers.insert(key, helper.clone());
        Ok(helper)
    }
}
