//! External call handling.
//!
//! Calls that neither resolve to a method body in the emulated module nor to a runtime
//! intrinsic are handed to a [`Host`]. Tests use [`RecordingHost`] to capture observable
//! side effects such as logging calls.

use crate::{emulation::EmValue, metadata::signatures::MethodRef, Error, Result};

/// Receiver of calls the emulator cannot execute itself.
pub trait Host {
    /// Executes `method` with `args` (`this` first for instance methods).
    ///
    /// Returns the pushed value, `None` for `void` methods.
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] if the call is not supported.
    fn call(&mut self, method: &MethodRef, args: &[EmValue]) -> Result<Option<EmValue>>;
}

/// A host that refuses every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl Host for NullHost {
    fn call(&mut self, method: &MethodRef, _args: &[EmValue]) -> Result<Option<EmValue>> {
        Err(Error::Emulation(format!("no host binding for {method}")))
    }
}

/// A host that records `void` calls and refuses everything else.
#[derive(Debug, Default, Clone)]
pub struct RecordingHost {
    /// Observed calls, in execution order
    pub calls: Vec<(String, Vec<EmValue>)>,
}

impl RecordingHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The names of the recorded calls, with their arguments.
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        self.calls
            .iter()
            .map(|(name, args)| {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                format!("{name}({})", args.join(", "))
            })
            .collect()
    }
}

impl Host for RecordingHost {
    fn call(&mut self, method: &MethodRef, args: &[EmValue]) -> Result<Option<EmValue>> {
        if method.signature.push_count() > 0 {
            return Err(Error::Emulation(format!(
                "recording host cannot produce a result for {method}"
            )));
        }
        self.calls
            .push((format!("{}::{}", method.declaring, method.name), args.to_vec()));
        Ok(None)
    }
}
