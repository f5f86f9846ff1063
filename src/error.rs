use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Invariant {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Invariant {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the failure taxonomy of the rewriter. None of them is fatal for a
/// whole batch: the pipeline decides, per variant, how much work to abandon.
///
/// # Error Categories
///
/// ## Rewrite Errors
/// - [`Error::Unresolved`] - A type, method or field reference could not be dereferenced.
///   The affected call-site or type rewrite is abandoned.
/// - [`Error::Unsupported`] - The code around a recognized idiom, or an exception handler,
///   has a shape the rewriter does not handle. The site or method is left untouched.
/// - [`Error::Invariant`] - The instruction stream gateway refused an edit that would have
///   corrupted control flow. The current method is restored to its original body.
///
/// ## I/O and Format Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Locked`] - Another process holds the module file
/// - [`Error::Malformed`] - The module format collaborator rejected the input
///
/// ## Verification Errors
/// - [`Error::Emulation`] - The CIL emulator hit an unsupported or faulting instruction
///
/// # Examples
///
/// ```rust
/// use dotrewrite::Error;
///
/// fn describe(error: &Error) -> &'static str {
///     match error {
///         Error::Unresolved(_) | Error::Unsupported(_) => "rewrite skipped",
///         Error::Invariant { .. } => "method restored",
///         Error::FileError(_) | Error::Locked(_) => "module skipped",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A reference could not be dereferenced.
    ///
    /// Raised when a type token of a recognized idiom does not resolve in the module being
    /// rewritten or in any of the platform modules known to the resolver.
    #[error("Unresolved reference - {0}")]
    Unresolved(String),

    /// The input has a structural shape that is not handled.
    ///
    /// Covers unexpected instruction sequences around a recognized idiom, exception handlers
    /// of unsupported kinds, and enums with an unsupported underlying type.
    #[error("Unsupported - {0}")]
    Unsupported(String),

    /// An instruction stream invariant would have been violated.
    ///
    /// Raised by the mutation gateway of [`crate::metadata::method::MethodBody`] for missing
    /// handles or retargets to a nonexistent instruction. The error includes the source
    /// location where the violation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invariant violation - {file}:{line}: {message}")]
    Invariant {
        /// The message to be printed for the Invariant error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The module data is damaged and could not be read.
    ///
    /// Produced by [`crate::project::ModuleFormat`] implementations.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The module file is exclusively locked by someone else.
    #[error("File is locked by another process - {0}")]
    Locked(PathBuf),

    /// The emulator could not execute a method body.
    #[error("Emulation failed - {0}")]
    Emulation(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` if this error only abandons a single rewrite site or method.
    ///
    /// I/O level errors abandon a whole module instead.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::Unresolved(_) | Error::Unsupported(_) | Error::Invariant { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_macro_captures_location() {
        let error = invariant_error!("dangling target {}", 7);
        match error {
            Error::Invariant {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "dangling target 7");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            _ => panic!("expected invariant error"),
        }
    }

    #[test]
    fn test_error_locality() {
        assert!(Error::Unsupported("x".into()).is_local());
        assert!(Error::Unresolved("x".into()).is_local());
        assert!(invariant_error!("x").is_local());
        assert!(!Error::Locked(PathBuf::from("a.dll")).is_local());
        assert!(!malformed_error!("bad header").is_local());
    }
}
