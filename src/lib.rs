//! # learndb
//!
//! A single-file embedded relational database storage engine.
//!
//! ## Architecture
//!
//! The engine is composed of modular layers, leaves first:
//!
//! - **Storage Layer** (`storage`): exclusive-locked file I/O, the
//!   file header, and the pager (page cache, allocation, on-disk
//!   free-page list)
//! - **Page Layer** (`page`): node layouts — leaf pages with
//!   variable-length cells, a sorted cell-pointer array and an
//!   intra-page free list; internal pages with packed fixed-size
//!   entries
//! - **Record Layer** (`record`): serial-type record serialization
//!   under a schema
//! - **B-Tree Layer** (`btree`): ordered key-to-record trees with
//!   out-of-place splits, ascending repair, and cursor iteration
//! - **Catalog** (`catalog`): a well-known tree at page 1 mapping
//!   table names to root pages and schemas
//!
//! ## Usage
//!
//! ```rust,ignore
//! use learndb::{Column, DataType, Db, Schema, Value};
//!
//! let db = Db::open("my_database.db")?;
//!
//! let schema = Schema::new(vec![
//!     Column::new("id", DataType::Integer).primary(),
//!     Column::new("name", DataType::Text),
//! ])?;
//! db.create_table("fruits", schema, "create table fruits (...)")?;
//!
//! db.insert("fruits", &[Value::Integer(1), Value::from("apple")])?;
//! let row = db.get("fruits", 1)?;
//! for (key, row) in db.scan("fruits")? {
//!     println!("{key} -> {row:?}");
//! }
//!
//! db.close()?;
//! ```
//!
//! One file holds one database; deleting the file drops it. There is
//! exactly one writer per file, enforced with an OS-level exclusive
//! lock. The engine provides no transactions: a run that dies midway
//! may leave the file inconsistent.

pub mod btree;
pub mod catalog;
pub mod error;
pub mod page;
pub mod record;
pub mod storage;
pub mod types;

pub use btree::{Cursor, Tree};
pub use catalog::{Catalog, TableInfo};
pub use error::{Result, StorageError};
pub use record::{
    Column, DataType, Schema, Value, deserialize_record, serialize_record,
};
pub use storage::Pager;
pub use types::{MAX_RECORD_SIZE, PAGE_SIZE, PageNum};

use std::collections::HashSet;
use std::path::Path;

use parking_lot::RwLock;

/// Main database handle.
///
/// This is the surface the SQL executor drives: catalog-level table
/// management plus per-table insert, point lookup, delete, and
/// ordered scans. Each call serializes on an internal lock; the
/// engine itself is single-threaded.
pub struct Db {
    pager: RwLock<Pager>,
}

impl Db {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pager = Pager::open(path.as_ref())?;
        Ok(Self {
            pager: RwLock::new(pager),
        })
    }

    /// Flush everything, trim trailing free pages, and release the
    /// file lock.
    pub fn close(self) -> Result<()> {
        self.pager.into_inner().close()
    }

    /// Allocate an empty tree and return its root page. The root
    /// keeps this page number for the tree's whole life.
    pub fn create_tree(&self) -> Result<PageNum> {
        let mut pager = self.pager.write();
        Self::create_tree_locked(&mut pager)
    }

    fn create_tree_locked(pager: &mut Pager) -> Result<PageNum> {
        let root = pager.allocate_page()?;
        let page = pager.get_page_mut(root)?;
        page.init_leaf();
        page.set_is_root(true);
        Ok(root)
    }

    /// Return every page of a tree to the pager.
    pub fn drop_tree(&self, root: PageNum) -> Result<()> {
        let mut pager = self.pager.write();
        let pages = Tree::new(&mut pager, root).collect_pages()?;
        for page in pages {
            pager.return_page(page)?;
        }
        Ok(())
    }

    /// Create a table: validates the name is free, allocates a root
    /// leaf, and registers the catalog row.
    pub fn create_table(&self, name: &str, schema: Schema, sql_text: &str) -> Result<TableInfo> {
        let mut pager = self.pager.write();
        if Catalog::lookup(&mut pager, name)?.is_some() {
            return Err(StorageError::TableExists(name.to_string()));
        }
        let root = Self::create_tree_locked(&mut pager)?;
        Catalog::register(&mut pager, name, root, sql_text, &schema)
    }

    /// Drop a table: returns every tree page to the pager and
    /// deletes the catalog row.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut pager = self.pager.write();
        let info = Catalog::lookup(&mut pager, name)?
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        let pages = Tree::new(&mut pager, info.root_page).collect_pages()?;
        for page in pages {
            pager.return_page(page)?;
        }
        Catalog::deregister(&mut pager, info.pkey)
    }

    /// Look up a table's catalog entry.
    pub fn table(&self, name: &str) -> Result<TableInfo> {
        let mut pager = self.pager.write();
        Catalog::lookup(&mut pager, name)?
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    /// All tables in the catalog.
    pub fn tables(&self) -> Result<Vec<TableInfo>> {
        let mut pager = self.pager.write();
        Catalog::all_tables(&mut pager)
    }

    /// Insert one row. An existing primary key fails with
    /// `DuplicateKey`; updates are the executor's delete-then-insert.
    pub fn insert(&self, table: &str, values: &[Value]) -> Result<()> {
        let mut pager = self.pager.write();
        let info = Catalog::lookup(&mut pager, table)?
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let key = info.schema.key_of(values)?;
        let record = serialize_record(&info.schema, values)?;
        Tree::new(&mut pager, info.root_page).insert(key, &record)
    }

    /// Fetch one row by primary key.
    pub fn get(&self, table: &str, key: i32) -> Result<Option<Vec<Value>>> {
        let mut pager = self.pager.write();
        let info = Catalog::lookup(&mut pager, table)?
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        match Tree::new(&mut pager, info.root_page).find(key)? {
            Some(record) => Ok(Some(deserialize_record(&info.schema, &record)?)),
            None => Ok(None),
        }
    }

    /// Delete one row by primary key.
    pub fn delete(&self, table: &str, key: i32) -> Result<()> {
        let mut pager = self.pager.write();
        let info = Catalog::lookup(&mut pager, table)?
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        Tree::new(&mut pager, info.root_page).delete(key)
    }

    /// Full scan in ascending key order.
    pub fn scan(&self, table: &str) -> Result<Vec<(i32, Vec<Value>)>> {
        let mut pager = self.pager.write();
        let info = Catalog::lookup(&mut pager, table)?
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let mut cursor = Tree::new(&mut pager, info.root_page).cursor_start()?;
        let rows = cursor.collect_remaining()?;
        rows.iter()
            .map(|(key, record)| Ok((*key, deserialize_record(&info.schema, record)?)))
            .collect()
    }

    /// Check every tree invariant for one table.
    pub fn validate(&self, table: &str) -> Result<()> {
        let mut pager = self.pager.write();
        let info = Catalog::lookup(&mut pager, table)?
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        Tree::new(&mut pager, info.root_page).validate()
    }

    /// Validate the catalog and every table, then check page
    /// accounting: live pages and free-list pages must cover the
    /// file exactly, without overlap.
    pub fn validate_all(&self) -> Result<()> {
        let mut pager = self.pager.write();

        Tree::new(&mut pager, PageNum::CATALOG_ROOT).validate()?;
        let tables = Catalog::all_tables(&mut pager)?;
        for table in &tables {
            Tree::new(&mut pager, table.root_page).validate()?;
        }

        let mut seen: HashSet<u32> = HashSet::new();
        let mut claim = |pages: Vec<PageNum>, what: &str| -> Result<()> {
            for page in pages {
                if !seen.insert(page.value()) {
                    return Err(StorageError::invariant(format!(
                        "page {} claimed twice (latest by {})",
                        page, what
                    )));
                }
            }
            Ok(())
        };
        claim(
            Tree::new(&mut pager, PageNum::CATALOG_ROOT).collect_pages()?,
            "catalog",
        )?;
        for table in &tables {
            claim(
                Tree::new(&mut pager, table.root_page).collect_pages()?,
                &table.name,
            )?;
        }
        claim(pager.collect_free_list()?, "free list")?;

        for n in 2..pager.num_pages() {
            if !seen.contains(&n) {
                return Err(StorageError::invariant(format!(
                    "page {} is neither live nor on the free list",
                    n
                )));
            }
        }
        Ok(())
    }

    /// Coarse statistics for tooling.
    pub fn stats(&self) -> Result<DbStats> {
        let mut pager = self.pager.write();
        let tables = Catalog::all_tables(&mut pager)?.len();
        let free_pages = pager.free_page_count()?;
        Ok(DbStats {
            num_pages: pager.num_pages(),
            free_pages,
            tables,
        })
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DbStats {
    /// Total pages in the file, header included.
    pub num_pages: u32,
    /// Pages on the on-disk free-page list.
    pub free_pages: usize,
    /// Registered tables.
    pub tables: usize,
}
