//! Rewrite strategies.
//!
//! - [`HelperMaterializer`] - Generates the helpers recognized call sites will call
//! - [`CallSiteRewriter`] - Rewrites reflection-style enum call sites
//! - [`HandlerFlattener`] - Flattens try/finally regions into state dispatch

mod callsites;
mod finally;

pub use callsites::{CallSiteRewriter, HelperMaterializer, Pattern};
pub use finally::HandlerFlattener;
