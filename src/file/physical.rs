//! Exclusively locked, memory-mapped module files.
//!
//! [`Physical`] opens a module read-write and takes an exclusive advisory lock before
//! mapping it, so no other cooperating process reads or rewrites the module while it is
//! being processed. The lock is tied to the file handle and released when the backend is
//! dropped, on every exit path.

use std::{
    fs::{self, OpenOptions, TryLockError},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use super::Backend;
use crate::{Error, Result};

/// A locked module file on disk.
#[derive(Debug)]
pub struct Physical {
    path: PathBuf,
    file: fs::File,
    /// `None` once the contents were replaced and not yet remapped
    data: Option<Mmap>,
}

impl Physical {
    /// Opens and locks the module file at `path`.
    ///
    /// # Errors
    /// Returns [`Error::Locked`] if another handle holds the lock,
    /// [`Error::FileError`] if the file cannot be opened or mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Physical> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(Error::Locked(path)),
            Err(TryLockError::Error(error)) => return Err(Error::FileError(error)),
        }

        let data = Self::map(&file)?;
        Ok(Physical {
            path,
            file,
            data: Some(data),
        })
    }

    fn map(file: &fs::File) -> Result<Mmap> {
        // The exclusive lock keeps cooperating writers away for the lifetime of the map.
        let mmap = unsafe { Mmap::map(file) }?;
        Ok(mmap)
    }

    /// The path this backend was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    fn write_back(&mut self, bytes: &[u8]) -> Result<bool> {
        if self.data() == bytes {
            return Ok(false);
        }

        self.data = None;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(bytes)?;
        self.file.sync_all()?;
        self.data = Some(Self::map(&self.file)?);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str, contents: &[u8]) -> Result<PathBuf> {
        let dir = std::env::temp_dir().join(format!("dotrewrite-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn test_open_maps_contents() -> Result<()> {
        let path = scratch("physical-open.bin", b"module")?;
        let physical = Physical::open(&path)?;
        assert_eq!(physical.data(), b"module");
        assert_eq!(physical.len(), 6);
        assert_eq!(physical.path(), path.as_path());
        Ok(())
    }

    #[test]
    fn test_second_handle_is_refused_while_locked() -> Result<()> {
        let path = scratch("physical-lock.bin", b"module")?;
        let held = Physical::open(&path)?;
        assert!(matches!(Physical::open(&path), Err(Error::Locked(_))));
        drop(held);
        assert!(Physical::open(&path).is_ok());
        Ok(())
    }

    #[test]
    fn test_write_back_only_on_change() -> Result<()> {
        let path = scratch("physical-write.bin", b"before")?;
        {
            let mut physical = Physical::open(&path)?;
            assert!(!physical.write_back(b"before")?);
            assert!(physical.write_back(b"after!!")?);
            assert_eq!(physical.data(), b"after!!");
        }
        assert_eq!(fs::read(&path)?, b"after!!");
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Physical::open("/nonexistent/dotrewrite/module.bin"),
            Err(Error::FileError(_))
        ));
    }
}
