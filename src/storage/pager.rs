//! The pager: a cache between the tree and the file.
//!
//! Exposes the file as a map from page number to a fixed-size
//! mutable buffer. Pages are read on first access and kept for the
//! pager's lifetime; dirty frames are written back on flush and
//! close. Whole-page recycling goes through the on-disk free-page
//! list, whose head lives in the file header.
//!
//! The pager provides no transactional atomicity: an aborted run may
//! leave the file inconsistent. Callers hold at most one page borrow
//! at a time, copy what they need, and re-fetch.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;

use log::debug;

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::{DbFile, FileHeader};
use crate::types::PageNum;

struct Frame {
    buf: PageBuf,
    dirty: bool,
}

/// Per-database page cache and allocator.
pub struct Pager {
    file: DbFile,
    frames: HashMap<u32, Frame>,
    num_pages: u32,
    free_list_head: PageNum,
    poisoned: bool,
    closed: bool,
}

impl Pager {
    /// Open a database file, initializing the header page and an
    /// empty catalog root when the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = DbFile::open(path)?;
        let disk_pages = file.num_pages()?;

        let (num_pages, free_list_head) = if disk_pages == 0 {
            let mut page0 = PageBuf::new();
            FileHeader::new().write(&mut page0);
            file.write_page(PageNum::HEADER, &page0)?;

            let mut root = PageBuf::new();
            root.init_leaf();
            root.set_is_root(true);
            file.write_page(PageNum::CATALOG_ROOT, &root)?;
            file.sync()?;
            debug!("initialized new database at {}", path.display());
            (2, PageNum::NONE)
        } else {
            if disk_pages < 2 {
                return Err(StorageError::invalid_db(format!(
                    "file holds {} pages, need at least 2",
                    disk_pages
                )));
            }
            let page0 = file.read_page(PageNum::HEADER)?;
            let header = FileHeader::read(&page0)?;
            (disk_pages, header.free_list_head)
        };

        Ok(Self {
            file,
            frames: HashMap::new(),
            num_pages,
            free_list_head,
            poisoned: false,
            closed: false,
        })
    }

    /// Pages currently in the file (header page included).
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Mark the session corrupt; subsequent writes fail.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    fn frame(&mut self, page_num: PageNum) -> Result<&mut Frame> {
        if page_num == PageNum::HEADER {
            return Err(StorageError::invariant(
                "page 0 is the file header, not a node",
            ));
        }
        if page_num.value() > self.num_pages {
            return Err(StorageError::corrupt_page(
                page_num.value(),
                format!("beyond end of file ({} pages)", self.num_pages),
            ));
        }
        if page_num.value() == self.num_pages {
            // Requesting one past the end extends the file by a page
            // of zeros.
            self.file.write_page(page_num, &PageBuf::new())?;
            self.num_pages += 1;
        }

        let Self { file, frames, .. } = self;
        match frames.entry(page_num.value()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let buf = file.read_page(page_num)?;
                Ok(v.insert(Frame { buf, dirty: false }))
            }
        }
    }

    /// Borrow a page for reading, loading it on first access.
    pub fn get_page(&mut self, page_num: PageNum) -> Result<&PageBuf> {
        Ok(&self.frame(page_num)?.buf)
    }

    /// Borrow a page for writing. Fails once the pager is poisoned.
    pub fn get_page_mut(&mut self, page_num: PageNum) -> Result<&mut PageBuf> {
        if self.poisoned {
            return Err(StorageError::invariant(
                "pager poisoned by page corruption, writes disabled",
            ));
        }
        let frame = self.frame(page_num)?;
        frame.dirty = true;
        Ok(&mut frame.buf)
    }

    /// Hand out a zeroed page: the free-list head when one is
    /// available, otherwise a fresh page at the end of the file.
    pub fn allocate_page(&mut self) -> Result<PageNum> {
        if !self.free_list_head.is_none() {
            let page_num = self.free_list_head;
            let next = PageNum::new(self.get_page(page_num)?.read_u32(0));
            self.free_list_head = next;
            self.get_page_mut(page_num)?.zero();
            debug!("allocated page {} from free list", page_num);
            Ok(page_num)
        } else {
            let page_num = PageNum::new(self.num_pages);
            self.get_page_mut(page_num)?;
            debug!("allocated page {} by extending the file", page_num);
            Ok(page_num)
        }
    }

    /// Push a page onto the on-disk free-page list.
    pub fn return_page(&mut self, page_num: PageNum) -> Result<()> {
        let head = self.free_list_head;
        let page = self.get_page_mut(page_num)?;
        page.zero();
        page.write_u32(0, head.value());
        self.free_list_head = page_num;
        debug!("returned page {} to free list", page_num);
        Ok(())
    }

    /// Walk the on-disk free-page list.
    pub fn collect_free_list(&mut self) -> Result<Vec<PageNum>> {
        let mut pages = Vec::new();
        let mut cur = self.free_list_head;
        while !cur.is_none() {
            if pages.len() >= self.num_pages as usize {
                return Err(StorageError::corrupt_page(
                    cur.value(),
                    "cycle in free-page list",
                ));
            }
            pages.push(cur);
            cur = PageNum::new(self.get_page(cur)?.read_u32(0));
        }
        Ok(pages)
    }

    pub fn free_page_count(&mut self) -> Result<usize> {
        Ok(self.collect_free_list()?.len())
    }

    /// Write every dirty frame and the file header.
    pub fn flush(&mut self) -> Result<()> {
        let Self { file, frames, .. } = self;
        for (&n, frame) in frames.iter_mut() {
            if frame.dirty {
                file.write_page(PageNum::new(n), &frame.buf)?;
                frame.dirty = false;
            }
        }
        let header = FileHeader {
            free_list_head: self.free_list_head,
            catalog_root: PageNum::CATALOG_ROOT,
        };
        let mut page0 = PageBuf::new();
        header.write(&mut page0);
        self.file.write_page(PageNum::HEADER, &page0)?;
        Ok(())
    }

    /// Flush, trim free pages from the end of the file, and sync.
    /// A poisoned pager only syncs what already reached the disk.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.poisoned {
            self.truncate_trailing_free_pages()?;
            self.flush()?;
        }
        self.file.sync()?;
        self.closed = true;
        Ok(())
    }

    /// Free pages sitting at the end of the file are dropped from
    /// the list and the file is shortened; the surviving chain is
    /// rewritten in order.
    fn truncate_trailing_free_pages(&mut self) -> Result<()> {
        let mut free = self.collect_free_list()?;
        let mut end = self.num_pages;
        while let Some(pos) = free.iter().position(|&p| p.value() == end - 1) {
            free.remove(pos);
            end -= 1;
        }
        if end == self.num_pages {
            return Ok(());
        }

        for n in end..self.num_pages {
            self.frames.remove(&n);
        }
        for i in 0..free.len() {
            let next = free.get(i + 1).copied().unwrap_or(PageNum::NONE);
            self.get_page_mut(free[i])?.write_u32(0, next.value());
        }
        debug!(
            "truncating {} trailing free pages ({} -> {})",
            self.num_pages - end,
            self.num_pages,
            end
        );
        self.free_list_head = free.first().copied().unwrap_or(PageNum::NONE);
        self.num_pages = end;
        self.file.truncate(end)?;
        Ok(())
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if !self.closed && !self.poisoned {
            let _ = self.flush();
        }
    }
}
