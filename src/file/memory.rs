//! In-memory module image.

use super::Backend;
use crate::Result;

/// A module image held in a byte vector.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    data: Vec<u8>,
    writes: usize,
}

impl Memory {
    /// Wraps `data`.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Memory { data, writes: 0 }
    }

    /// Number of times the contents were replaced.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Consumes the backend and returns the current contents.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn write_back(&mut self, bytes: &[u8]) -> Result<bool> {
        if self.data == bytes {
            return Ok(false);
        }
        self.data = bytes.to_vec();
        self.writes += 1;
        Ok(true)
    }
}
