//! Module file access.
//!
//! Rewriting needs the raw bytes of a module for the [`crate::project::ModuleFormat`]
//! reader and a way to put the rewritten bytes back. Two backends implement [`Backend`]:
//!
//! - [`Physical`] - a file on disk, opened read-write, locked exclusively and
//!   memory-mapped for the duration of one module's rewrite
//! - [`Memory`] - bytes already in memory, used for in-process rewriting and tests
//!
//! # Examples
//!
//! ```rust
//! use dotrewrite::file::{Backend, Memory};
//!
//! let mut backend = Memory::new(vec![1, 2, 3]);
//! assert_eq!(backend.data_slice(1, 2)?, &[2, 3]);
//! assert!(!backend.write_back(&[1, 2, 3])?);
//! assert!(backend.write_back(&[4])?);
//! assert_eq!(backend.data(), &[4]);
//! # Ok::<(), dotrewrite::Error>(())
//! ```

mod memory;
mod physical;

pub use memory::Memory;
pub use physical::Physical;

use crate::Result;

/// Byte access to a module image.
pub trait Backend {
    /// The complete image.
    fn data(&self) -> &[u8];

    /// Replaces the image with `bytes` if they differ from the current contents.
    ///
    /// Returns `true` if anything was written.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the new contents could not be stored.
    fn write_back(&mut self, bytes: &[u8]) -> Result<bool>;

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let data = self.data();
        offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .ok_or_else(|| malformed_error!("Range {}+{} exceeds image of {} bytes", offset, len, data.len()))
    }

    /// Size of the image in bytes.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` for an empty image.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
