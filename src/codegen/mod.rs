//! Enum-specific code generation.
//!
//! Given the constant set of an enum, this module synthesizes method bodies that restate
//! the runtime's reflection-based enum operations as direct code: formatting
//! (`ToString`), membership (`IsDefined`), value enumeration (`GetValues`) and
//! equality (`Equals`).
//!
//! # Key Components
//!
//! - [`EnumValue`] / [`IntegerKind`] - Tagged, width-aware enum values
//! - [`EnumDescriptor`] - Constants, underlying kind and flags classification of an enum
//! - [`DecisionPlan`] / [`Shape`] - Sorted, run-partitioned lookup plans
//! - [`EnumCodeGenerator`] - Emits helper bodies
//! - [`HelperCache`] - Materializes helpers on the generated-code holder type
//!
//! # Examples
//!
//! ```rust
//! use dotrewrite::prelude::*;
//!
//! let mut module = Module::new("App.dll");
//! let id = EnumBuilder::new("Color")
//!     .namespace("App")
//!     .value("Red", 0)
//!     .value("Green", 1)
//!     .value("Blue", 2)
//!     .build(&mut module)?;
//! let ty = module.get_type(id).unwrap();
//! let descriptor = EnumDescriptor::from_type(&module.type_name(id), ty)?;
//!
//! let platform = PlatformTypes::new();
//! let generator = EnumCodeGenerator::new(&platform, 2, 256);
//! let body = generator.generate(Operation::ToString, &descriptor)?;
//! assert!(body.listing()[0].contains("ldarg"));
//! # Ok::<(), dotrewrite::Error>(())
//! ```

mod descriptor;
mod generator;
mod helpers;
mod plan;
mod value;

pub use descriptor::{EnumConstant, EnumDescriptor};
pub use generator::{EnumCodeGenerator, Operation};
pub use helpers::HelperCache;
pub use plan::{DecisionPlan, PlanEntry, Run, Shape};
pub use value::{EnumValue, IntegerKind};
