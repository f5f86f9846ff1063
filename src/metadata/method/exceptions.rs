//! Exception handler regions of a method body.
//!
//! Region boundaries are instruction handles. `try_end` and `handler_end` are exclusive:
//! they name the first instruction after the range, or `None` when the range extends to
//! the end of the method.

use bitflags::bitflags;

use crate::metadata::{method::InstrId, signatures::TypeSignature};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    ///
    /// These flags determine how the exception handler processes exceptions and
    /// control flow within try/catch/finally blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause.
        const FILTER = 0x0001;
        /// A finally clause.
        ///
        /// Code that executes regardless of whether an exception occurs. This is the only
        /// kind the handler flattening pass rewrites.
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a protected range and its handler code.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the try block.
    pub try_start: InstrId,
    /// First instruction after the try block, `None` for end of method.
    pub try_end: Option<InstrId>,
    /// First instruction of the handler.
    pub handler_start: InstrId,
    /// First instruction after the handler, `None` for end of method.
    pub handler_end: Option<InstrId>,
    /// If flags == EXCEPTION, then this type will handle the exception.
    pub catch_type: Option<TypeSignature>,
    /// First instruction of the filter block of a FILTER clause.
    pub filter_start: Option<InstrId>,
}

impl ExceptionHandler {
    /// A finally clause.
    #[must_use]
    pub fn finally(
        try_start: InstrId,
        try_end: Option<InstrId>,
        handler_start: InstrId,
        handler_end: Option<InstrId>,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start,
            try_end,
            handler_start,
            handler_end,
            catch_type: None,
            filter_start: None,
        }
    }

    /// Returns `true` for a finally clause.
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags == ExceptionHandlerFlags::FINALLY
    }

    /// Every instruction boundary of this region.
    pub(crate) fn boundaries_mut(&mut self) -> impl Iterator<Item = &mut InstrId> {
        [
            Some(&mut self.try_start),
            self.try_end.as_mut(),
            Some(&mut self.handler_start),
            self.handler_end.as_mut(),
            self.filter_start.as_mut(),
        ]
        .into_iter()
        .flatten()
    }

    /// Every instruction boundary of this region.
    #[must_use]
    pub fn boundaries(&self) -> Vec<InstrId> {
        [
            Some(self.try_start),
            self.try_end,
            Some(self.handler_start),
            self.handler_end,
            self.filter_start,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
