//! B+-tree operations.
//!
//! A tree is a lightweight handle over a root page; all state lives
//! in pages reached through the pager. Keys are 4-byte integers,
//! values are variable-length records packed into leaf cells.
//!
//! Structural changes are out-of-place: a split writes both halves
//! to freshly allocated pages and recycles the original, except that
//! a splitting (or collapsing) root is rewritten in place so root
//! page numbers never move and the catalog stays valid without
//! rewrites. Ascending repair — separator updates, split
//! propagation, empty-node removal — walks parent back-pointers
//! stored in each non-root node header.

use log::debug;

use crate::btree::MAX_DEPTH;
use crate::btree::cursor::Cursor;
use crate::error::{Result, StorageError};
use crate::page::internal::ChildSlot;
use crate::page::NodeType;
use crate::record::{cell_key, make_cell};
use crate::storage::Pager;
use crate::types::{
    CELL_HEADER_SIZE, LEAF_COMPACT_THRESHOLD, MAX_INTERNAL_KEYS, MAX_RECORD_SIZE, MIN_FREE_BLOCK,
    PAGE_SIZE, PageNum,
};

/// A B+-tree rooted at a fixed page.
pub struct Tree<'p> {
    pub(crate) pager: &'p mut Pager,
    pub(crate) root_page: PageNum,
}

impl<'p> Tree<'p> {
    pub fn new(pager: &'p mut Pager, root_page: PageNum) -> Self {
        Self { pager, root_page }
    }

    pub fn root_page(&self) -> PageNum {
        self.root_page
    }

    /// Build a `CorruptPage` error and stop the pager from writing.
    fn corrupt(&mut self, page: PageNum, detail: impl Into<String>) -> StorageError {
        self.pager.poison();
        StorageError::corrupt_page(page.value(), detail)
    }

    fn node_type(&mut self, page_num: PageNum) -> Result<NodeType> {
        match self.pager.get_page(page_num)?.node_type() {
            Some(t) => Ok(t),
            None => Err(self.corrupt(page_num, "unknown node type")),
        }
    }

    /// Descend to the leaf covering `key`. Returns the leaf page,
    /// the key's slot (or insertion slot), and whether it matched.
    fn seek_leaf(&mut self, key: i32) -> Result<(PageNum, usize, bool)> {
        let mut page_num = self.root_page;
        for _ in 0..MAX_DEPTH {
            match self.node_type(page_num)? {
                NodeType::Leaf => {
                    let page = self.pager.get_page(page_num)?;
                    let (slot, found) = page.leaf_find_slot(key);
                    return Ok((page_num, slot, found));
                }
                NodeType::Internal => {
                    page_num = self.pager.get_page(page_num)?.internal_child_for(key);
                }
            }
        }
        Err(self.corrupt(page_num, "descent exceeds maximum depth"))
    }

    /// Look up a key, returning its record bytes.
    pub fn find(&mut self, key: i32) -> Result<Option<Vec<u8>>> {
        let (leaf, slot, found) = self.seek_leaf(key)?;
        if !found {
            return Ok(None);
        }
        let page = self.pager.get_page(leaf)?;
        Ok(Some(page.leaf_record_at(slot).to_vec()))
    }

    /// Insert a new key. An existing key fails with `DuplicateKey`;
    /// the executor expresses updates as delete-then-insert.
    pub fn insert(&mut self, key: i32, record: &[u8]) -> Result<()> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(StorageError::TooLarge {
                size: record.len(),
                max: MAX_RECORD_SIZE,
            });
        }
        let cell = make_cell(key, record);
        let (leaf, slot, found) = self.seek_leaf(key)?;
        if found {
            return Err(StorageError::DuplicateKey(key));
        }
        if self.pager.get_page_mut(leaf)?.leaf_insert_cell(slot, &cell) {
            return Ok(());
        }
        self.split_leaf(leaf, slot, &cell)
    }

    /// Split a full leaf around a cell that would not fit.
    ///
    /// All cells (old plus new) are redistributed between two fresh
    /// sibling pages so each side receives roughly half the bytes,
    /// the lower-keyed sibling taking the extra cell on a tie. The
    /// sibling chain is repaired through the predecessor leaf, the
    /// old page recycled, and the left sibling's maximum key
    /// propagated upward as the new separator.
    fn split_leaf(&mut self, old: PageNum, slot: usize, new_cell: &[u8]) -> Result<()> {
        let (mut cells, parent, was_root, next) = {
            let page = self.pager.get_page(old)?;
            let cells: Vec<Vec<u8>> = (0..page.leaf_num_cells())
                .map(|i| page.leaf_cell_at(i).to_vec())
                .collect();
            (cells, page.parent(), page.is_root(), page.leaf_next())
        };
        cells.insert(slot, new_cell.to_vec());

        let total: usize = cells.iter().map(|c| c.len()).sum();
        let half = (total + 1) / 2;
        let mut split = 0;
        let mut left_bytes = 0;
        while split < cells.len() - 1 && left_bytes < half {
            left_bytes += cells[split].len();
            split += 1;
        }
        let sep = cell_key(&cells[split - 1]);

        // Locate the predecessor while the parent still points at
        // the old page.
        let pred = if was_root {
            None
        } else {
            self.predecessor_leaf(old)?
        };

        let left = self.pager.allocate_page()?;
        let right = self.pager.allocate_page()?;
        {
            let page = self.pager.get_page_mut(left)?;
            page.init_leaf();
            page.set_parent(parent);
            page.leaf_write_cells(&cells[..split]);
            page.set_leaf_next(right);
        }
        {
            let page = self.pager.get_page_mut(right)?;
            page.init_leaf();
            page.set_parent(parent);
            page.leaf_write_cells(&cells[split..]);
            page.set_leaf_next(next);
        }
        if let Some(pred) = pred {
            self.pager.get_page_mut(pred)?.set_leaf_next(left);
        }
        debug!("split leaf {} into {}/{} at separator {}", old, left, right, sep);

        if was_root {
            self.make_root_internal(old, left, right, sep)
        } else {
            self.internal_insert(parent, sep, left, right, old)?;
            self.pager.return_page(old)
        }
    }

    /// Rewrite a just-split root page as the internal node over the
    /// two halves. The root keeps its page number.
    fn make_root_internal(
        &mut self,
        root: PageNum,
        left: PageNum,
        right: PageNum,
        sep: i32,
    ) -> Result<()> {
        {
            let page = self.pager.get_page_mut(root)?;
            page.init_internal();
            page.set_is_root(true);
            page.internal_write_entries(&[(left, sep)], right);
        }
        self.pager.get_page_mut(left)?.set_parent(root);
        self.pager.get_page_mut(right)?.set_parent(root);
        debug!("root {} grew into an internal node over {}/{}", root, left, right);
        Ok(())
    }

    /// Replace `old_child` in `parent` with `left` and `right`
    /// separated by `sep`, splitting the parent when it is full.
    fn internal_insert(
        &mut self,
        parent: PageNum,
        sep: i32,
        left: PageNum,
        right: PageNum,
        old_child: PageNum,
    ) -> Result<()> {
        let (slot, num_keys) = {
            let page = self.pager.get_page(parent)?;
            (page.internal_find_child_slot(old_child), page.internal_num_keys())
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                return Err(self.corrupt(
                    parent,
                    format!("no child pointer to split page {}", old_child),
                ));
            }
        };
        if num_keys >= MAX_INTERNAL_KEYS {
            return self.split_internal(parent, slot, sep, left, right);
        }
        let page = self.pager.get_page_mut(parent)?;
        match slot {
            ChildSlot::Entry(i) => {
                page.set_internal_child(i, right);
                page.internal_insert_entry(i, left, sep);
            }
            ChildSlot::Right => {
                page.set_internal_right_child(right);
                page.internal_insert_entry(num_keys, left, sep);
            }
        }
        Ok(())
    }

    /// Split a full internal node, promoting the median key. The
    /// median entry's child becomes the left half's right child.
    fn split_internal(
        &mut self,
        node: PageNum,
        slot: ChildSlot,
        sep: i32,
        left_child: PageNum,
        right_child: PageNum,
    ) -> Result<()> {
        let (mut entries, mut rc, parent, was_root) = {
            let page = self.pager.get_page(node)?;
            let entries: Vec<(PageNum, i32)> = (0..page.internal_num_keys())
                .map(|i| page.internal_entry(i))
                .collect();
            (entries, page.internal_right_child(), page.parent(), page.is_root())
        };
        match slot {
            ChildSlot::Entry(i) => {
                entries[i].0 = right_child;
                entries.insert(i, (left_child, sep));
            }
            ChildSlot::Right => {
                entries.push((left_child, sep));
                rc = right_child;
            }
        }

        let mid = entries.len() / 2;
        let (med_child, med_key) = entries[mid];
        let left_entries = entries[..mid].to_vec();
        let right_entries = entries[mid + 1..].to_vec();

        let left = self.pager.allocate_page()?;
        let right = self.pager.allocate_page()?;
        {
            let page = self.pager.get_page_mut(left)?;
            page.init_internal();
            page.set_parent(parent);
            page.internal_write_entries(&left_entries, med_child);
        }
        {
            let page = self.pager.get_page_mut(right)?;
            page.init_internal();
            page.set_parent(parent);
            page.internal_write_entries(&right_entries, rc);
        }
        self.reparent_children(left)?;
        self.reparent_children(right)?;
        debug!(
            "split internal {} into {}/{} promoting key {}",
            node, left, right, med_key
        );

        if was_root {
            {
                let page = self.pager.get_page_mut(node)?;
                page.init_internal();
                page.set_is_root(true);
                page.internal_write_entries(&[(left, med_key)], right);
            }
            self.pager.get_page_mut(left)?.set_parent(node);
            self.pager.get_page_mut(right)?.set_parent(node);
            Ok(())
        } else {
            self.internal_insert(parent, med_key, left, right, node)?;
            self.pager.return_page(node)
        }
    }

    /// Point every child of `node` back at it.
    fn reparent_children(&mut self, node: PageNum) -> Result<()> {
        let children = self.pager.get_page(node)?.internal_children();
        for child in children {
            self.pager.get_page_mut(child)?.set_parent(node);
        }
        Ok(())
    }

    /// The leaf holding the largest key below `node`'s subtree, found
    /// by climbing parent pointers past leftmost edges and descending
    /// the neighboring subtree. `None` when `node` leads the chain.
    fn predecessor_leaf(&mut self, node: PageNum) -> Result<Option<PageNum>> {
        let mut cur = node;
        for _ in 0..MAX_DEPTH {
            let (is_root, parent) = {
                let page = self.pager.get_page(cur)?;
                (page.is_root(), page.parent())
            };
            if is_root {
                return Ok(None);
            }
            let (slot, num_keys) = {
                let page = self.pager.get_page(parent)?;
                (page.internal_find_child_slot(cur), page.internal_num_keys())
            };
            let slot = match slot {
                Some(slot) => slot,
                None => {
                    return Err(
                        self.corrupt(parent, format!("no child pointer to page {}", cur))
                    );
                }
            };
            let neighbor = match slot {
                ChildSlot::Entry(0) => None,
                ChildSlot::Entry(i) => Some(self.pager.get_page(parent)?.internal_child(i - 1)),
                ChildSlot::Right if num_keys == 0 => None,
                ChildSlot::Right => {
                    Some(self.pager.get_page(parent)?.internal_child(num_keys - 1))
                }
            };
            match neighbor {
                Some(n) => return Ok(Some(self.rightmost_leaf(n)?)),
                None => cur = parent,
            }
        }
        Err(self.corrupt(node, "parent chain exceeds maximum depth"))
    }

    fn rightmost_leaf(&mut self, mut node: PageNum) -> Result<PageNum> {
        for _ in 0..MAX_DEPTH {
            match self.node_type(node)? {
                NodeType::Leaf => return Ok(node),
                NodeType::Internal => {
                    node = self.pager.get_page(node)?.internal_right_child();
                }
            }
        }
        Err(self.corrupt(node, "descent exceeds maximum depth"))
    }

    /// Delete a key.
    pub fn delete(&mut self, key: i32) -> Result<()> {
        let (leaf, slot, found) = self.seek_leaf(key)?;
        if !found {
            return Err(StorageError::NotFound(key));
        }

        let (remaining, was_max, is_root) = {
            let page = self.pager.get_page_mut(leaf)?;
            let was_max = slot + 1 == page.leaf_num_cells();
            page.leaf_delete_cell(slot);
            (page.leaf_num_cells(), was_max, page.is_root())
        };

        if remaining == 0 {
            if is_root {
                // The tree is empty; the root reverts to a fresh leaf.
                let page = self.pager.get_page_mut(leaf)?;
                page.init_leaf();
                page.set_is_root(true);
                return Ok(());
            }
            return self.remove_empty_leaf(leaf);
        }

        if was_max && !is_root {
            let new_max = self.pager.get_page(leaf)?.leaf_key_at(remaining - 1);
            self.propagate_max(leaf, new_max)?;
        }

        let page = self.pager.get_page_mut(leaf)?;
        if page.leaf_total_free() > LEAF_COMPACT_THRESHOLD && page.leaf_live_bytes() < PAGE_SIZE / 2
        {
            page.leaf_compact();
            debug!("compacted leaf {} after delete", leaf);
        }
        Ok(())
    }

    /// Unlink an emptied leaf from the sibling chain and its parent,
    /// then recycle its page.
    fn remove_empty_leaf(&mut self, leaf: PageNum) -> Result<()> {
        let (parent, next) = {
            let page = self.pager.get_page(leaf)?;
            (page.parent(), page.leaf_next())
        };
        if let Some(pred) = self.predecessor_leaf(leaf)? {
            self.pager.get_page_mut(pred)?.set_leaf_next(next);
        }
        self.remove_child(parent, leaf)?;
        self.pager.return_page(leaf)
    }

    /// Drop `parent`'s pointer to an emptied `child`, handling the
    /// degenerate survivors: a node reduced to only its right pointer
    /// (unary) is collapsed or spliced out, and a node stripped of
    /// every child (zeroary) is removed from its own parent in turn.
    fn remove_child(&mut self, parent: PageNum, child: PageNum) -> Result<()> {
        let (slot, num_keys, is_root) = {
            let page = self.pager.get_page(parent)?;
            (
                page.internal_find_child_slot(child),
                page.internal_num_keys(),
                page.is_root(),
            )
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                return Err(
                    self.corrupt(parent, format!("no child pointer to page {}", child))
                );
            }
        };
        match slot {
            ChildSlot::Entry(i) => {
                self.pager.get_page_mut(parent)?.internal_remove_entry(i);
            }
            ChildSlot::Right if num_keys == 0 => {
                // Zeroary: the right pointer was the last child.
                debug!("internal {} lost its last child", parent);
                if is_root {
                    let page = self.pager.get_page_mut(parent)?;
                    page.init_leaf();
                    page.set_is_root(true);
                    return Ok(());
                }
                let grandparent = self.pager.get_page(parent)?.parent();
                self.remove_child(grandparent, parent)?;
                return self.pager.return_page(parent);
            }
            ChildSlot::Right => {
                // The last entry's child becomes the right pointer;
                // its key was only ever a bound for the removed one.
                let page = self.pager.get_page_mut(parent)?;
                let (c, _) = page.internal_entry(num_keys - 1);
                page.set_internal_right_child(c);
                page.internal_remove_entry(num_keys - 1);
            }
        }

        if self.pager.get_page(parent)?.internal_num_keys() == 0 {
            self.collapse_unary(parent, is_root)?;
        }
        Ok(())
    }

    /// A unary internal node holds no keys and a single (right)
    /// child. The root absorbs that child in place; anywhere else the
    /// child is promoted into the node's own parent slot.
    fn collapse_unary(&mut self, node: PageNum, is_root: bool) -> Result<()> {
        let only = self.pager.get_page(node)?.internal_right_child();
        if is_root {
            let child_buf = self.pager.get_page(only)?.clone();
            {
                let page = self.pager.get_page_mut(node)?;
                *page = child_buf;
                page.set_is_root(true);
                page.set_parent(PageNum::NONE);
            }
            if self.node_type(node)? == NodeType::Internal {
                self.reparent_children(node)?;
            }
            debug!("collapsed unary root into page {}", node);
            self.pager.return_page(only)
        } else {
            let grandparent = self.pager.get_page(node)?.parent();
            let slot = self.pager.get_page(grandparent)?.internal_find_child_slot(node);
            let slot = match slot {
                Some(slot) => slot,
                None => {
                    return Err(
                        self.corrupt(grandparent, format!("no child pointer to page {}", node))
                    );
                }
            };
            {
                let page = self.pager.get_page_mut(grandparent)?;
                match slot {
                    ChildSlot::Entry(i) => page.set_internal_child(i, only),
                    ChildSlot::Right => page.set_internal_right_child(only),
                }
            }
            self.pager.get_page_mut(only)?.set_parent(grandparent);
            debug!("replaced unary internal {} with its child {}", node, only);
            self.pager.return_page(node)
        }
    }

    /// After a node's maximum key shrank, rewrite the separators that
    /// recorded the old maximum, climbing while the node is a right
    /// child.
    fn propagate_max(&mut self, node: PageNum, new_max: i32) -> Result<()> {
        let mut cur = node;
        for _ in 0..MAX_DEPTH {
            let (is_root, parent) = {
                let page = self.pager.get_page(cur)?;
                (page.is_root(), page.parent())
            };
            if is_root {
                return Ok(());
            }
            let slot = self.pager.get_page(parent)?.internal_find_child_slot(cur);
            match slot {
                Some(ChildSlot::Entry(i)) => {
                    self.pager.get_page_mut(parent)?.set_internal_key(i, new_max);
                    return Ok(());
                }
                Some(ChildSlot::Right) => cur = parent,
                None => {
                    return Err(
                        self.corrupt(parent, format!("no child pointer to page {}", cur))
                    );
                }
            }
        }
        Err(self.corrupt(node, "parent chain exceeds maximum depth"))
    }

    /// A cursor over the whole tree in ascending key order. Taking
    /// the cursor consumes the handle, so tree mutation while a
    /// cursor is live is a compile error rather than a stale read.
    pub fn cursor_start(self) -> Result<Cursor<'p>> {
        Cursor::at_start(self)
    }

    /// A cursor positioned at `key`, or at the next greater key.
    pub fn cursor_at(self, key: i32) -> Result<Cursor<'p>> {
        Cursor::at_key(self, key)
    }

    /// Levels from root to leaves.
    pub fn height(&mut self) -> Result<usize> {
        let mut height = 1;
        let mut cur = self.root_page;
        for _ in 0..MAX_DEPTH {
            match self.node_type(cur)? {
                NodeType::Leaf => return Ok(height),
                NodeType::Internal => {
                    cur = self.pager.get_page(cur)?.internal_right_child();
                    height += 1;
                }
            }
        }
        Err(self.corrupt(cur, "descent exceeds maximum depth"))
    }

    /// Every page reachable from the root, the root included.
    pub fn collect_pages(&mut self) -> Result<Vec<PageNum>> {
        let mut pages = Vec::new();
        let mut stack = vec![self.root_page];
        while let Some(n) = stack.pop() {
            if pages.len() > self.pager.num_pages() as usize {
                return Err(self.corrupt(n, "cycle among tree pages"));
            }
            pages.push(n);
            if self.node_type(n)? == NodeType::Internal {
                stack.extend(self.pager.get_page(n)?.internal_children());
            }
        }
        Ok(pages)
    }

    /// Walk the whole tree checking the structural invariants:
    /// unique ascending keys within separator bounds, exact
    /// free-space accounting, non-overlapping cell regions, parent
    /// back-pointer consistency, the root flag only at the root,
    /// no empty non-root nodes, and a sibling chain that mirrors the
    /// in-order leaf sequence.
    pub fn validate(&mut self) -> Result<()> {
        let root = self.root_page;
        if !self.pager.get_page(root)?.is_root() {
            return Err(StorageError::invariant(format!(
                "root page {} is missing its root flag",
                root
            )));
        }
        let mut leaves = Vec::new();
        self.validate_node(root, None, None, &mut leaves, 0)?;

        for (i, &leaf) in leaves.iter().enumerate() {
            let next = self.pager.get_page(leaf)?.leaf_next();
            let expected = leaves.get(i + 1).copied().unwrap_or(PageNum::NONE);
            if next != expected {
                return Err(StorageError::invariant(format!(
                    "leaf {} links to {} but the next leaf in order is {}",
                    leaf, next, expected
                )));
            }
        }
        Ok(())
    }

    fn validate_node(
        &mut self,
        n: PageNum,
        lower: Option<i32>,
        upper: Option<i32>,
        leaves: &mut Vec<PageNum>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(StorageError::invariant(format!(
                "page {} sits deeper than any valid tree",
                n
            )));
        }
        let page = self.pager.get_page(n)?;
        let is_root = n == self.root_page;
        if page.is_root() != is_root {
            return Err(StorageError::invariant(format!(
                "page {} root flag is {}, expected {}",
                n,
                page.is_root(),
                is_root
            )));
        }
        match page.node_type() {
            Some(NodeType::Leaf) => self.validate_leaf(n, lower, upper, is_root, leaves),
            Some(NodeType::Internal) => {
                self.validate_internal(n, lower, upper, leaves, depth)
            }
            None => Err(StorageError::invariant(format!(
                "page {} has no node header",
                n
            ))),
        }
    }

    fn validate_leaf(
        &mut self,
        n: PageNum,
        lower: Option<i32>,
        upper: Option<i32>,
        is_root: bool,
        leaves: &mut Vec<PageNum>,
    ) -> Result<()> {
        let page = self.pager.get_page(n)?.clone();
        let num_cells = page.leaf_num_cells();
        if num_cells == 0 && !is_root {
            return Err(StorageError::invariant(format!(
                "non-root leaf {} is empty",
                n
            )));
        }
        let alloc_ptr = page.leaf_alloc_ptr();
        if alloc_ptr > PAGE_SIZE || page.leaf_ptrs_end() > alloc_ptr {
            return Err(StorageError::invariant(format!(
                "leaf {} allocation pointer {} collides with its pointer array",
                n, alloc_ptr
            )));
        }

        let mut regions: Vec<(usize, usize)> = Vec::new();
        let mut prev = lower;
        for i in 0..num_cells {
            let off = page.leaf_cell_ptr(i);
            if off < alloc_ptr || off + CELL_HEADER_SIZE > PAGE_SIZE {
                return Err(StorageError::invariant(format!(
                    "leaf {} cell {} at offset {} is outside the cell area",
                    n, i, off
                )));
            }
            let size = page.leaf_cell_size_at(i);
            if off + size > PAGE_SIZE {
                return Err(StorageError::invariant(format!(
                    "leaf {} cell {} overruns the page",
                    n, i
                )));
            }
            let key = page.leaf_key_at(i);
            if let Some(p) = prev {
                if key <= p {
                    return Err(StorageError::invariant(format!(
                        "leaf {} key {} out of order after {}",
                        n, key, p
                    )));
                }
            }
            if let Some(u) = upper {
                if key > u {
                    return Err(StorageError::invariant(format!(
                        "leaf {} key {} above its separator {}",
                        n, key, u
                    )));
                }
            }
            prev = Some(key);
            regions.push((off, size));
        }

        let blocks = page.leaf_free_blocks();
        if blocks.len() > PAGE_SIZE / MIN_FREE_BLOCK {
            return Err(StorageError::invariant(format!(
                "leaf {} free list does not terminate",
                n
            )));
        }
        let mut listed_free = 0;
        for &(off, size) in &blocks {
            if size < MIN_FREE_BLOCK || off < alloc_ptr || off + size > PAGE_SIZE {
                return Err(StorageError::invariant(format!(
                    "leaf {} free block at {} (size {}) is malformed",
                    n, off, size
                )));
            }
            listed_free += size;
            regions.push((off, size));
        }
        if listed_free != page.leaf_total_free() {
            return Err(StorageError::invariant(format!(
                "leaf {} lists {} free bytes but accounts {}",
                n,
                listed_free,
                page.leaf_total_free()
            )));
        }

        regions.sort_unstable();
        for pair in regions.windows(2) {
            if pair[0].0 + pair[0].1 > pair[1].0 {
                return Err(StorageError::invariant(format!(
                    "leaf {} regions at {} and {} overlap",
                    n, pair[0].0, pair[1].0
                )));
            }
        }

        leaves.push(n);
        Ok(())
    }

    fn validate_internal(
        &mut self,
        n: PageNum,
        lower: Option<i32>,
        upper: Option<i32>,
        leaves: &mut Vec<PageNum>,
        depth: usize,
    ) -> Result<()> {
        let page = self.pager.get_page(n)?.clone();
        let num_keys = page.internal_num_keys();
        if num_keys == 0 {
            return Err(StorageError::invariant(format!(
                "internal {} has no separator keys",
                n
            )));
        }
        if num_keys > MAX_INTERNAL_KEYS {
            return Err(StorageError::invariant(format!(
                "internal {} claims {} keys (max {})",
                n, num_keys, MAX_INTERNAL_KEYS
            )));
        }
        if page.internal_right_child().is_none() {
            return Err(StorageError::invariant(format!(
                "internal {} has no right child",
                n
            )));
        }

        let mut prev = lower;
        for i in 0..num_keys {
            let key = page.internal_key(i);
            if let Some(p) = prev {
                if key <= p {
                    return Err(StorageError::invariant(format!(
                        "internal {} separator {} out of order after {}",
                        n, key, p
                    )));
                }
            }
            if let Some(u) = upper {
                if key > u {
                    return Err(StorageError::invariant(format!(
                        "internal {} separator {} above its bound {}",
                        n, key, u
                    )));
                }
            }
            prev = Some(key);
        }

        let mut lo = lower;
        for i in 0..num_keys {
            let child = page.internal_child(i);
            let key = page.internal_key(i);
            self.check_parent_pointer(child, n)?;
            self.validate_node(child, lo, Some(key), leaves, depth + 1)?;
            lo = Some(key);
        }
        let right = page.internal_right_child();
        self.check_parent_pointer(right, n)?;
        self.validate_node(right, lo, upper, leaves, depth + 1)
    }

    fn check_parent_pointer(&mut self, child: PageNum, parent: PageNum) -> Result<()> {
        let actual = self.pager.get_page(child)?.parent();
        if actual != parent {
            return Err(StorageError::invariant(format!(
                "page {} points at parent {} but hangs under {}",
                child, actual, parent
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use tempfile::{TempDir, tempdir};

    fn test_tree(pager: &mut Pager) -> PageNum {
        let root = pager.allocate_page().unwrap();
        let page = pager.get_page_mut(root).unwrap();
        page.init_leaf();
        page.set_is_root(true);
        root
    }

    fn open_pager() -> (Pager, TempDir) {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("test.db")).unwrap();
        (pager, dir)
    }

    fn record(key: i32, len: usize) -> Vec<u8> {
        let mut r = vec![(key % 251) as u8; len];
        r[..4].copy_from_slice(&key.to_le_bytes());
        r
    }

    fn scan_keys(pager: &mut Pager, root: PageNum) -> Vec<i32> {
        let mut cursor = Tree::new(pager, root).cursor_start().unwrap();
        cursor
            .collect_remaining()
            .unwrap()
            .iter()
            .map(|(k, _)| *k)
            .collect()
    }

    #[test]
    fn test_insert_and_find() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);
        let mut tree = Tree::new(&mut pager, root);

        tree.insert(3, b"three").unwrap();
        tree.insert(1, b"one").unwrap();
        tree.insert(2, b"two").unwrap();

        assert_eq!(tree.find(1).unwrap(), Some(b"one".to_vec()));
        assert_eq!(tree.find(2).unwrap(), Some(b"two".to_vec()));
        assert_eq!(tree.find(3).unwrap(), Some(b"three".to_vec()));
        assert_eq!(tree.find(4).unwrap(), None);
        tree.validate().unwrap();
    }

    #[test]
    fn test_duplicate_key_fails() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);
        let mut tree = Tree::new(&mut pager, root);

        tree.insert(1, b"first").unwrap();
        let err = tree.insert(1, b"second").unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey(1)));
        assert_eq!(tree.find(1).unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn test_oversized_record_fails() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);
        let mut tree = Tree::new(&mut pager, root);

        let err = tree.insert(1, &vec![0; MAX_RECORD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { .. }));
        assert_eq!(tree.find(1).unwrap(), None);
    }

    #[test]
    fn test_delete_missing_fails() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);
        let mut tree = Tree::new(&mut pager, root);

        assert!(matches!(
            tree.delete(9).unwrap_err(),
            StorageError::NotFound(9)
        ));
    }

    #[test]
    fn test_sequential_inserts_split() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);

        for key in 1..=200 {
            Tree::new(&mut pager, root)
                .insert(key, &record(key, 64))
                .unwrap();
        }

        let mut tree = Tree::new(&mut pager, root);
        tree.validate().unwrap();
        assert!(tree.height().unwrap() >= 2);
        assert_eq!(tree.root_page(), root);
        assert_eq!(scan_keys(&mut pager, root), (1..=200).collect::<Vec<_>>());
    }

    #[test]
    fn test_descending_inserts_split() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);

        for key in (1..=200).rev() {
            Tree::new(&mut pager, root)
                .insert(key, &record(key, 64))
                .unwrap();
        }

        Tree::new(&mut pager, root).validate().unwrap();
        assert_eq!(scan_keys(&mut pager, root), (1..=200).collect::<Vec<_>>());
    }

    #[test]
    fn test_variable_length_records_split() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);

        for key in 0..300 {
            let len = 16 + (key as usize * 13) % 180;
            Tree::new(&mut pager, root)
                .insert(key, &record(key, len))
                .unwrap();
        }

        Tree::new(&mut pager, root).validate().unwrap();
        for key in 0..300 {
            let len = 16 + (key as usize * 13) % 180;
            let found = Tree::new(&mut pager, root).find(key).unwrap().unwrap();
            assert_eq!(found.len(), len);
        }
    }

    #[test]
    fn test_delete_and_reinsert() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);

        for key in 1..=100 {
            Tree::new(&mut pager, root)
                .insert(key, &record(key, 48))
                .unwrap();
        }
        for key in [50, 25, 75, 10, 90] {
            Tree::new(&mut pager, root).delete(key).unwrap();
        }
        for key in [50, 25, 75, 10, 90] {
            assert_eq!(Tree::new(&mut pager, root).find(key).unwrap(), None);
        }

        for key in [50, 25, 75, 10, 90] {
            Tree::new(&mut pager, root)
                .insert(key, &record(key + 1000, 80))
                .unwrap();
        }

        Tree::new(&mut pager, root).validate().unwrap();
        assert_eq!(scan_keys(&mut pager, root), (1..=100).collect::<Vec<_>>());
        let fresh = Tree::new(&mut pager, root).find(50).unwrap().unwrap();
        assert_eq!(fresh, record(1050, 80));
    }

    #[test]
    fn test_delete_everything_empties_the_tree() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);

        for key in 0..250 {
            Tree::new(&mut pager, root)
                .insert(key, &record(key, 64))
                .unwrap();
        }
        assert!(Tree::new(&mut pager, root).height().unwrap() >= 2);

        for key in 0..250 {
            Tree::new(&mut pager, root).delete(key).unwrap();
        }

        let mut tree = Tree::new(&mut pager, root);
        tree.validate().unwrap();
        assert_eq!(tree.height().unwrap(), 1);
        assert_eq!(tree.root_page(), root);
        assert_eq!(scan_keys(&mut pager, root), Vec::<i32>::new());

        // Every page except the root went back to the free list.
        let live = Tree::new(&mut pager, root).collect_pages().unwrap();
        assert_eq!(live, vec![root]);
    }

    #[test]
    fn test_delete_in_reverse_order() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);

        for key in 0..250 {
            Tree::new(&mut pager, root)
                .insert(key, &record(key, 64))
                .unwrap();
        }
        for key in (0..250).rev() {
            Tree::new(&mut pager, root).delete(key).unwrap();
            if key % 50 == 0 {
                Tree::new(&mut pager, root).validate().unwrap();
            }
        }
        assert_eq!(scan_keys(&mut pager, root), Vec::<i32>::new());
    }

    #[test]
    fn test_random_workload_matches_model() {
        let (mut pager, _dir) = open_pager();
        let root = test_tree(&mut pager);

        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut model: BTreeMap<i32, Vec<u8>> = BTreeMap::new();

        for op in 0..10_000 {
            let key = rng.gen_range(0..1000);
            if rng.gen_bool(0.7) {
                let body = record(key, rng.gen_range(8..120));
                // Replace semantics: a duplicate becomes
                // delete-then-insert, as the executor would do.
                if model.contains_key(&key) {
                    Tree::new(&mut pager, root).delete(key).unwrap();
                }
                Tree::new(&mut pager, root).insert(key, &body).unwrap();
                model.insert(key, body);
            } else {
                match Tree::new(&mut pager, root).delete(key) {
                    Ok(()) => {
                        assert!(model.remove(&key).is_some());
                    }
                    Err(StorageError::NotFound(_)) => {
                        assert!(!model.contains_key(&key));
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }

            if op % 100 == 99 {
                Tree::new(&mut pager, root).validate().unwrap();
                let mut cursor = Tree::new(&mut pager, root).cursor_start().unwrap();
                let rows = cursor.collect_remaining().unwrap();
                assert_eq!(rows.len(), model.len());
                for ((key, body), (mk, mb)) in rows.iter().zip(model.iter()) {
                    assert_eq!(key, mk);
                    assert_eq!(body, mb);
                }
            }
        }
    }

    #[test]
    fn test_workload_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let root = {
            let mut pager = Pager::open(&path).unwrap();
            let root = test_tree(&mut pager);
            for key in 0..500 {
                Tree::new(&mut pager, root)
                    .insert(key, &record(key, 32))
                    .unwrap();
            }
            pager.close().unwrap();
            root
        };

        let mut pager = Pager::open(&path).unwrap();
        Tree::new(&mut pager, root).validate().unwrap();
        assert_eq!(scan_keys(&mut pager, root), (0..500).collect::<Vec<_>>());
    }
}
