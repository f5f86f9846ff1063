//! Batch driver for rewriting module files.
//!
//! [`Rewriter`] owns everything that stays fixed across a run (configuration, platform
//! references, resolver, strategies) and processes modules one at a time:
//!
//! 1. open and exclusively lock the file ([`crate::file::Physical`])
//! 2. parse it with the supplied [`ModuleFormat`]
//! 3. run every stage of the [`PassScheduler`] with a fresh [`CompilerContext`]
//! 4. serialize and store the module if anything changed
//!
//! Any failure abandons only the current module. It is logged with `log::warn!` and
//! listed in the [`ProcessResult`]; the remaining paths are still processed.
//!
//! # Examples
//!
//! ```rust
//! use dotrewrite::prelude::*;
//! use dotrewrite::project::{ModuleFormat, Rewriter};
//!
//! struct Listing;
//!
//! impl ModuleFormat for Listing {
//!     fn read(&self, data: &[u8]) -> dotrewrite::Result<Module> {
//!         Ok(Module::new(&String::from_utf8_lossy(data)))
//!     }
//!
//!     fn write(&self, module: &Module) -> dotrewrite::Result<Vec<u8>> {
//!         Ok(module.listing().join("\n").into_bytes())
//!     }
//! }
//!
//! let rewriter = Rewriter::new(Listing);
//! let result = rewriter.process(&["/nonexistent/App.dll"]);
//! assert_eq!(result.failure_count(), 1);
//! ```

mod result;

use std::path::Path;

pub use result::{ModuleReport, ProcessResult};

use crate::{
    compiler::{CompilerContext, EventKind, PassScheduler, RewriterConfig, Strategy},
    file::{Backend, Physical},
    metadata::{module::Module, platform::PlatformTypes, resolver::Resolver},
    Result,
};

/// Binary container format of a module.
///
/// Reading and writing the on-disk representation is delegated to the embedding
/// application; the rewriter only sees the structural [`Module`].
pub trait ModuleFormat {
    /// Parses a module image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for images that cannot be parsed.
    fn read(&self, data: &[u8]) -> Result<Module>;

    /// Serializes a module.
    ///
    /// # Errors
    /// Returns an error if the module cannot be represented in this format.
    fn write(&self, module: &Module) -> Result<Vec<u8>>;
}

/// Rewrites module files with a fixed configuration.
pub struct Rewriter<F: ModuleFormat> {
    format: F,
    config: RewriterConfig,
    platform: PlatformTypes,
    resolver: Resolver,
    scheduler: PassScheduler,
}

impl<F: ModuleFormat> Rewriter<F> {
    /// Creates a rewriter with the default configuration.
    pub fn new(format: F) -> Self {
        let config = RewriterConfig::default();
        Rewriter {
            format,
            scheduler: PassScheduler::new(Strategy::for_config(&config)),
            config,
            platform: PlatformTypes::new(),
            resolver: Resolver::new(),
        }
    }

    /// Replaces the configuration and the strategies derived from it.
    #[must_use]
    pub fn with_config(mut self, config: RewriterConfig) -> Self {
        self.scheduler = PassScheduler::new(Strategy::for_config(&config));
        self.config = config;
        self
    }

    /// Replaces the platform references.
    #[must_use]
    pub fn with_platform(mut self, platform: PlatformTypes) -> Self {
        self.platform = platform;
        self
    }

    /// Replaces the resolver used for types outside the rewritten module.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RewriterConfig {
        &self.config
    }

    /// Processes every module file in `paths`, one after another.
    pub fn process<P: AsRef<Path>>(&self, paths: &[P]) -> ProcessResult {
        let mut result = ProcessResult::new();
        for path in paths {
            let path = path.as_ref();
            match self.process_file(path) {
                Ok(report) => {
                    log::info!("{}", report.summary());
                    result.record_success(report);
                }
                Err(error) => {
                    log::warn!("Skipping {}: {}", path.display(), error);
                    result.record_failure(path, &error);
                }
            }
        }
        result
    }

    fn process_file(&self, path: &Path) -> Result<ModuleReport> {
        let mut file = Physical::open(path)?;
        let mut report = self.rewrite_backend(&mut file)?;
        report.path = Some(path.to_path_buf());
        Ok(report)
    }

    /// Reads, rewrites and stores the module held by `backend`.
    ///
    /// # Errors
    /// Returns the format's error for unreadable images and I/O errors from storing.
    pub fn rewrite_backend(&self, backend: &mut dyn Backend) -> Result<ModuleReport> {
        let mut module = self.format.read(backend.data())?;
        let mut report = self.rewrite_module(&mut module)?;
        if report.changed {
            let bytes = self.format.write(&module)?;
            report.written = backend.write_back(&bytes)?;
            if report.written {
                report
                    .events
                    .record(EventKind::ModuleRewritten)
                    .message(module.name.clone());
            }
        }
        Ok(report)
    }

    /// Runs every stage over `module`.
    ///
    /// # Errors
    /// Returns an error only if the module itself is inconsistent.
    pub fn rewrite_module(&self, module: &mut Module) -> Result<ModuleReport> {
        let mut ctx = CompilerContext::new(
            self.config.clone(),
            self.platform.clone(),
            self.resolver.clone(),
        );
        let bodies_changed = self.scheduler.run(&mut ctx, module)?;
        let changed = bodies_changed || !ctx.helpers().created().is_empty();

        Ok(ModuleReport {
            path: None,
            module: module.name.clone(),
            changed,
            written: false,
            events: ctx.events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::MethodBodyBuilder,
        file::Memory,
        metadata::{
            module::{MethodAttributes, MethodDef, TypeAttributes, TypeDef},
            signatures::{SignatureMethod, TypeName, TypeSignature},
        },
        Error,
    };

    struct Fixture;

    fn worker(with_region: bool) -> Result<Module> {
        let mut module = Module::new("App");
        let ty = module.add_type(TypeDef::new(
            "App",
            "Worker",
            TypeAttributes::PUBLIC,
            Some(TypeName::new("System", "Object")),
        ))?;
        let body = MethodBodyBuilder::new()
            .implementation(move |asm| {
                if with_region {
                    asm.label("try")?
                        .nop()?
                        .leave("exit")?
                        .label("handler")?
                        .endfinally()?
                        .label("exit")?
                        .ret()?
                        .try_finally("try", "handler", "handler", "exit")?;
                } else {
                    asm.nop()?.ret()?;
                }
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

    impl ModuleFormat for Fixture {
        fn read(&self, data: &[u8]) -> Result<Module> {
            match data {
                b"region" => worker(true),
                b"plain" => worker(false),
                _ => Err(malformed_error!("Unknown fixture")),
            }
        }

        fn write(&self, module: &Module) -> Result<Vec<u8>> {
            Ok(module.listing().join("\n").into_bytes())
        }
    }

    #[test]
    fn test_changed_module_is_written() -> Result<()> {
        let rewriter = Rewriter::new(Fixture);
        let mut backend = Memory::new(b"region".to_vec());
        let report = rewriter.rewrite_backend(&mut backend)?;

        assert!(report.changed);
        assert!(report.written);
        assert_eq!(backend.writes(), 1);
        assert!(report.events.has(EventKind::ModuleRewritten));
        assert!(report.summary().contains("1 methods flattened"));
        Ok(())
    }

    #[test]
    fn test_unchanged_module_is_not_written() -> Result<()> {
        let rewriter = Rewriter::new(Fixture);
        let mut backend = Memory::new(b"plain".to_vec());
        let report = rewriter.rewrite_backend(&mut backend)?;

        assert!(!report.changed);
        assert!(!report.written);
        assert_eq!(backend.writes(), 0);
        assert_eq!(report.summary(), "App: unchanged");
        Ok(())
    }

    #[test]
    fn test_disabled_strategies_leave_module_alone() -> Result<()> {
        let config = RewriterConfig {
            enable_call_sites: false,
            enable_handler_flattening: false,
            ..RewriterConfig::default()
        };
        let rewriter = Rewriter::new(Fixture).with_config(config);
        let mut backend = Memory::new(b"region".to_vec());
        assert!(!rewriter.rewrite_backend(&mut backend)?.changed);
        Ok(())
    }

    #[test]
    fn test_unreadable_image() {
        let rewriter = Rewriter::new(Fixture);
        let mut backend = Memory::new(b"garbage".to_vec());
        assert!(matches!(
            rewriter.rewrite_backend(&mut backend),
            Err(Error::Malformed { .. })
        ));
    }
}
