//! Database file wrapper.
//!
//! Owns the backing file and an OS-level advisory exclusive lock for
//! the lifetime of the handle. Everything above reads and writes
//! whole pages at page-aligned offsets; read and write errors are
//! fatal to the operation and never retried.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use log::debug;

use crate::error::Result;
use crate::page::PageBuf;
use crate::types::{PAGE_SIZE, PageNum};

/// Exclusive-locked page-granular file access.
pub struct DbFile {
    file: File,
}

impl DbFile {
    /// Open or create the database file and take the exclusive lock.
    /// A concurrent holder makes this fail with `Io`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive()?;
        debug!("opened {} ({} bytes)", path.display(), file.metadata()?.len());
        Ok(Self { file })
    }

    /// Number of whole pages currently in the file.
    pub fn num_pages(&self) -> Result<u32> {
        let len = self.file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    pub fn read_page(&mut self, page_num: PageNum) -> Result<PageBuf> {
        let mut page = PageBuf::new();
        self.file
            .seek(SeekFrom::Start(page_num.file_offset(PAGE_SIZE)))?;
        self.file.read_exact(page.as_bytes_mut())?;
        Ok(page)
    }

    pub fn write_page(&mut self, page_num: PageNum, page: &PageBuf) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(page_num.file_offset(PAGE_SIZE)))?;
        self.file.write_all(page.as_bytes())?;
        Ok(())
    }

    /// Shrink the file to `num_pages` pages.
    pub fn truncate(&mut self, num_pages: u32) -> Result<()> {
        self.file
            .set_len(num_pages as u64 * PAGE_SIZE as u64)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for DbFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
