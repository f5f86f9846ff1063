//! Rewrite pipeline for enum call sites and finally regions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Rewrite Pipeline                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerContext             Per-module state                    │
//! │    ├─ RewriterConfig          (strategy toggles, thresholds)     │
//! │    ├─ PlatformTypes           (primitive providers)              │
//! │    ├─ Resolver                (platform module lookup)           │
//! │    ├─ HelperCache             (generated helpers)                │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler               Stage-ordered execution             │
//! │    ├─ Stage 0: Materialize    (helper generation)                │
//! │    ├─ Stage 1: CallSites      (enum idiom rewriting)             │
//! │    └─ Stage 2: Flatten        (try/finally flattening)           │
//! │    Each stage: every type depth-first, every method detached,    │
//! │    restored on failure                                           │
//! │                                                                  │
//! │  Strategy                    Closed set of strategies            │
//! │    ├─ stage()                                                    │
//! │    ├─ should_skip(type)                                          │
//! │    └─ process(method body)                                       │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod context;
mod events;
mod pass;
mod passes;
mod scheduler;

pub use config::RewriterConfig;
pub use context::CompilerContext;
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use pass::{Stage, Strategy};
pub use passes::{CallSiteRewriter, HandlerFlattener, HelperMaterializer, Pattern};
pub use scheduler::PassScheduler;
