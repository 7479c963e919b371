//! Ordered iteration over a tree.
//!
//! A cursor is `(page_num, cell_idx, end_of_table)` plus the pager
//! borrow it inherited from the tree handle. Advancing walks the
//! current leaf's cells and follows `next_leaf` links; the chain
//! makes full scans independent of the internal levels.

use crate::btree::{MAX_DEPTH, Tree};
use crate::error::{Result, StorageError};
use crate::page::NodeType;
use crate::storage::Pager;
use crate::types::PageNum;

/// Iterator state over a tree in ascending key order.
pub struct Cursor<'p> {
    pager: &'p mut Pager,
    page_num: PageNum,
    cell_idx: usize,
    end_of_table: bool,
}

impl<'p> Cursor<'p> {
    /// Position at the smallest key in the tree.
    pub(crate) fn at_start(tree: Tree<'p>) -> Result<Self> {
        let Tree { pager, root_page } = tree;
        let mut cursor = Self {
            pager,
            page_num: root_page,
            cell_idx: 0,
            end_of_table: false,
        };
        cursor.descend_to_first(root_page)?;
        Ok(cursor)
    }

    /// Position at `key`, or at the next greater key if absent.
    pub(crate) fn at_key(tree: Tree<'p>, key: i32) -> Result<Self> {
        let Tree { pager, root_page } = tree;
        let mut cursor = Self {
            pager,
            page_num: root_page,
            cell_idx: 0,
            end_of_table: false,
        };

        let mut cur = root_page;
        for _ in 0..MAX_DEPTH {
            let ty = cursor.pager.get_page(cur)?.node_type();
            match ty {
                Some(NodeType::Internal) => {
                    cur = cursor.pager.get_page(cur)?.internal_child_for(key);
                }
                Some(NodeType::Leaf) => {
                    let page = cursor.pager.get_page(cur)?;
                    let (slot, _) = page.leaf_find_slot(key);
                    let num_cells = page.leaf_num_cells();
                    let next = page.leaf_next();
                    cursor.page_num = cur;
                    cursor.cell_idx = slot;
                    if slot >= num_cells {
                        // Past the last cell of this leaf; the target
                        // range starts on the next one, if any.
                        if next.is_none() {
                            cursor.end_of_table = true;
                        } else {
                            cursor.page_num = next;
                            cursor.cell_idx = 0;
                        }
                    }
                    return Ok(cursor);
                }
                None => {
                    cursor.pager.poison();
                    return Err(StorageError::corrupt_page(cur.value(), "unknown node type"));
                }
            }
        }
        cursor.pager.poison();
        Err(StorageError::corrupt_page(
            cur.value(),
            "descent exceeds maximum depth",
        ))
    }

    fn descend_to_first(&mut self, from: PageNum) -> Result<()> {
        let mut cur = from;
        for _ in 0..MAX_DEPTH {
            let ty = self.pager.get_page(cur)?.node_type();
            match ty {
                Some(NodeType::Leaf) => {
                    let num_cells = self.pager.get_page(cur)?.leaf_num_cells();
                    self.page_num = cur;
                    self.cell_idx = 0;
                    // Only an empty root leaf can be empty; there is
                    // nothing to iterate.
                    self.end_of_table = num_cells == 0;
                    return Ok(());
                }
                Some(NodeType::Internal) => {
                    let page = self.pager.get_page(cur)?;
                    cur = if page.internal_num_keys() > 0 {
                        page.internal_child(0)
                    } else {
                        page.internal_right_child()
                    };
                }
                None => {
                    self.pager.poison();
                    return Err(StorageError::corrupt_page(cur.value(), "unknown node type"));
                }
            }
        }
        self.pager.poison();
        Err(StorageError::corrupt_page(
            cur.value(),
            "descent exceeds maximum depth",
        ))
    }

    /// Whether the cursor has run off the last cell.
    pub fn end_of_table(&self) -> bool {
        self.end_of_table
    }

    /// The key and record bytes under the cursor.
    pub fn value(&mut self) -> Result<Option<(i32, Vec<u8>)>> {
        if self.end_of_table {
            return Ok(None);
        }
        let page = self.pager.get_page(self.page_num)?;
        let key = page.leaf_key_at(self.cell_idx);
        let record = page.leaf_record_at(self.cell_idx).to_vec();
        Ok(Some((key, record)))
    }

    /// Step to the next cell, following the sibling chain across
    /// leaves.
    pub fn advance(&mut self) -> Result<()> {
        if self.end_of_table {
            return Ok(());
        }
        let (num_cells, next) = {
            let page = self.pager.get_page(self.page_num)?;
            (page.leaf_num_cells(), page.leaf_next())
        };
        self.cell_idx += 1;
        if self.cell_idx >= num_cells {
            if next.is_none() {
                self.end_of_table = true;
            } else {
                self.page_num = next;
                self.cell_idx = 0;
            }
        }
        Ok(())
    }

    /// Drain the rest of the cursor into a vector.
    pub fn collect_remaining(&mut self) -> Result<Vec<(i32, Vec<u8>)>> {
        let mut rows = Vec::new();
        while let Some(row) = self.value()? {
            rows.push(row);
            self.advance()?;
        }
        Ok(rows)
    }
}
