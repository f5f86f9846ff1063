//! Emission of enum helper method bodies.
//!
//! Lookups (ToString, IsDefined) are emitted as dispatch code over a
//! [`crate::codegen::DecisionPlan`], followed by a shared fallback block and one block per
//! recognized value:
//!
//! ```text
//!     <dispatch: equality tests, switch tables or binary search>
//! fallback:
//!     <primitive formatter | generic enum formatter | ldc.i4 0> ; ret
//! hit_N:
//!     ldstr "<name N>" ; ret          (IsDefined: one shared `ldc.i4 1 ; ret`)
//! gap_K:
//!     ldstr "<decimal>" ; ret         (ToString of non-flags dense tables only)
//! ```
//!
//! Every comparison uses the width and signedness of the underlying integer kind:
//! `ldc.i8` and 64-bit bounds checks for 8-byte enums, `blt.un` for unsigned kinds.

use strum::IntoStaticStr;

use crate::{
    assembly::{InstructionAssembler, OpCode},
    codegen::{
        descriptor::EnumDescriptor,
        plan::{DecisionPlan, Shape},
        value::EnumValue,
    },
    metadata::{
        method::MethodBody,
        platform::PlatformTypes,
        signatures::{SignatureMethod, TypeSignature},
    },
    Result,
};

/// An operation a helper method implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum Operation {
    /// `string (T value)`: the runtime's enum formatting
    ToString,
    /// `bool (T value)`: membership in the declared values
    IsDefined,
    /// `T[] ()`: every declared value
    GetValues,
    /// `bool (T a, T b)`: underlying integer equality
    Equals,
}

impl Operation {
    /// The operation name used in helper names.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// The helper method signature for an enum of type `enum_type`.
    #[must_use]
    pub fn signature(self, enum_type: &TypeSignature) -> SignatureMethod {
        match self {
            Operation::ToString => {
                SignatureMethod::static_method(TypeSignature::String, vec![enum_type.clone()])
            }
            Operation::IsDefined => {
                SignatureMethod::static_method(TypeSignature::Boolean, vec![enum_type.clone()])
            }
            Operation::GetValues => SignatureMethod::static_method(
                TypeSignature::SzArray(Box::new(enum_type.clone())),
                vec![],
            ),
            Operation::Equals => SignatureMethod::static_method(
                TypeSignature::Boolean,
                vec![enum_type.clone(), enum_type.clone()],
            ),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Names,
    Membership,
}

/// Generates helper method bodies for enum operations.
pub struct EnumCodeGenerator<'a> {
    platform: &'a PlatformTypes,
    density_ratio: u64,
    max_flag_combinations: usize,
}

impl<'a> EnumCodeGenerator<'a> {
    /// Creates a generator.
    ///
    /// `density_ratio` bounds gap-filled tables (`span <= ratio * count`);
    /// `max_flag_combinations` bounds the flag expansion of ToString plans.
    #[must_use]
    pub fn new(platform: &'a PlatformTypes, density_ratio: u64, max_flag_combinations: usize) -> Self {
        EnumCodeGenerator {
            platform,
            density_ratio,
            max_flag_combinations,
        }
    }

    /// The plan a lookup operation is generated from.
    #[must_use]
    pub fn plan(&self, operation: Operation, descriptor: &EnumDescriptor) -> DecisionPlan {
        match operation {
            Operation::ToString => {
                DecisionPlan::for_names(descriptor, self.max_flag_combinations)
            }
            _ => DecisionPlan::for_values(descriptor),
        }
    }

    /// Generates the body of `operation` for `descriptor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Invariant`] if the emitted code fails to assemble.
    pub fn generate(&self, operation: Operation, descriptor: &EnumDescriptor) -> Result<MethodBody> {
        let mut asm = InstructionAssembler::new();
        match operation {
            Operation::ToString | Operation::IsDefined => {
                let plan = self.plan(operation, descriptor);
                let mode = if operation == Operation::ToString {
                    Lookup::Names
                } else {
                    Lookup::Membership
                };
                LookupEmitter {
                    plan: &plan,
                    mode,
                    descriptor,
                    platform: self.platform,
                    gaps: Vec::new(),
                }
                .emit(&mut asm, self.density_ratio)?;
            }
            Operation::Equals => {
                asm.ldarg_0()?.ldarg_1()?.ceq()?.ret()?;
            }
            Operation::GetValues => {
                let values = descriptor.values_in_runtime_order();
                let element = descriptor.signature();
                asm.ldc_i4(values.len() as i32)?
                    .typed(OpCode::Newarr, element.clone())?;
                for (index, value) in values.iter().enumerate() {
                    asm.dup()?
                        .ldc_i4(index as i32)?
                        .emit(value.load())?
                        .stelem(element.clone())?;
                }
                asm.ret()?;
            }
        }
        asm.finish()
    }
}

struct LookupEmitter<'p> {
    plan: &'p DecisionPlan,
    mode: Lookup,
    descriptor: &'p EnumDescriptor,
    platform: &'p PlatformTypes,
    gaps: Vec<EnumValue>,
}

impl LookupEmitter<'_> {
    fn emit(mut self, asm: &mut InstructionAssembler, density_ratio: u64) -> Result<()> {
        match self.plan.shape(density_ratio) {
            Shape::Empty => {}
            Shape::Single | Shape::Pair => {
                let mut order: Vec<usize> = (0..self.plan.len()).collect();
                order.sort_by_key(|index| !self.plan.entries[*index].value.is_zero());
                for index in order {
                    self.equality_test(asm, index)?;
                }
            }
            Shape::Contiguous => {
                let labels: Vec<String> = (0..self.plan.len()).map(|i| self.hit_label(i)).collect();
                self.table(asm, self.plan.entries[0].value, &labels)?;
            }
            Shape::DenseTable => {
                let base = self.plan.entries[0].value;
                let mut labels = Vec::new();
                let mut cursor = Some(base);
                let mut next_entry = 0;
                while let Some(value) = cursor {
                    if next_entry >= self.plan.len() {
                        break;
                    }
                    if self.plan.entries[next_entry].value == value {
                        labels.push(self.hit_label(next_entry));
                        next_entry += 1;
                    } else {
                        labels.push(self.gap_label(value, &base));
                    }
                    cursor = value.checked_next();
                }
                self.table(asm, base, &labels)?;
            }
            Shape::BinarySearch => {
                self.search(asm, 0, self.plan.runs.len())?;
            }
        }

        asm.label("fallback")?;
        self.fallback(asm)?;

        match self.mode {
            Lookup::Names => {
                for (index, entry) in self.plan.entries.iter().enumerate() {
                    asm.label(&format!("hit_{index}"))?.ldstr(&entry.name)?.ret()?;
                }
            }
            Lookup::Membership => {
                if !self.plan.is_empty() {
                    asm.label("hit")?.ldc_i4(1)?.ret()?;
                }
            }
        }

        for gap in std::mem::take(&mut self.gaps) {
            let base = self.plan.entries[0].value;
            asm.label(&format!("gap_{}", gap.offset_from(&base)))?
                .ldstr(&gap.to_string())?
                .ret()?;
        }
        Ok(())
    }

    fn hit_label(&self, index: usize) -> String {
        match self.mode {
            Lookup::Names => format!("hit_{index}"),
            Lookup::Membership => "hit".to_string(),
        }
    }

    fn gap_label(&mut self, value: EnumValue, base: &EnumValue) -> String {
        if self.mode == Lookup::Names && !self.plan.is_flags {
            self.gaps.push(value);
            format!("gap_{}", value.offset_from(base))
        } else {
            "fallback".to_string()
        }
    }

    fn equality_test(&self, asm: &mut InstructionAssembler, index: usize) -> Result<()> {
        let value = self.plan.entries[index].value;
        let label = self.hit_label(index);
        asm.ldarg_0()?;
        if value.is_zero() {
            asm.brfalse(&label)?;
        } else {
            asm.emit(value.load())?.beq(&label)?;
        }
        Ok(())
    }

    /// `switch` indexed by `value - base`; falls through when out of range.
    fn table(&self, asm: &mut InstructionAssembler, base: EnumValue, labels: &[String]) -> Result<()> {
        let kind = self.plan.kind;
        let load_index = |asm: &mut InstructionAssembler| -> Result<()> {
            asm.ldarg_0()?;
            if !base.is_zero() {
                asm.emit(base.load())?.sub()?;
            }
            Ok(())
        };

        if kind.is_wide() {
            let skip = format!("table_end_{}", base.bits());
            load_index(asm)?;
            asm.ldc_i8(labels.len() as i64)?.bge_un(&skip)?;
            load_index(asm)?;
            asm.op(OpCode::ConvU4)?.switch(labels)?.label(&skip)?;
        } else {
            load_index(asm)?;
            asm.switch(labels)?;
        }
        Ok(())
    }

    /// Binary search over `runs[lo..hi]`; every path that matches nothing ends in
    /// `br fallback`.
    fn search(&mut self, asm: &mut InstructionAssembler, lo: usize, hi: usize) -> Result<()> {
        if lo == hi {
            asm.br("fallback")?;
            return Ok(());
        }

        let mid = lo + (hi - lo) / 2;
        let run = self.plan.runs[mid];
        let first = self.plan.entries[run.start].value;
        if run.len == 1 {
            self.equality_test(asm, run.start)?;
        } else {
            let labels: Vec<String> = (run.start..run.start + run.len)
                .map(|index| self.hit_label(index))
                .collect();
            self.table(asm, first, &labels)?;
        }

        let left = format!("left_{lo}_{mid}");
        if lo < mid {
            asm.ldarg_0()?.emit(first.load())?;
            if self.plan.kind.is_signed() {
                asm.blt(&left)?;
            } else {
                asm.blt_un(&left)?;
            }
        }
        self.search(asm, mid + 1, hi)?;
        if lo < mid {
            asm.label(&left)?;
            self.search(asm, lo, mid)?;
        }
        Ok(())
    }

    fn fallback(&self, asm: &mut InstructionAssembler) -> Result<()> {
        match self.mode {
            Lookup::Membership => {
                asm.ldc_i4(0)?.ret()?;
            }
            Lookup::Names if self.plan.is_flags && !self.plan.exhaustive => {
                asm.ldarg_0()?
                    .typed(OpCode::Box, self.descriptor.signature())?
                    .callvirt(self.platform.object_to_string.clone())?
                    .ret()?;
            }
            Lookup::Names => {
                asm.ldarg_0()?
                    .call(self.platform.convert_to_string(self.plan.kind))?
                    .ret()?;
            }
        }
        Ok(())
    }
}
