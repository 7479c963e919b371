//! Internal node layout.
//!
//! After the common header: `num_keys` and the mandatory
//! `right_child`, then a packed array of fixed-size
//! `(child_page u32, key i32)` entries. All keys in the subtree of
//! `child_i` are `<= key_i`; the right child holds everything
//! greater than the last key.

use crate::page::PageBuf;
use crate::types::{
    INTERNAL_ENTRY_SIZE, INTERNAL_HEADER_SIZE, INTERNAL_NUM_KEYS_OFFSET,
    INTERNAL_RIGHT_CHILD_OFFSET, PageNum,
};

use super::NodeType;

/// Where a child page sits inside its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSlot {
    /// `child_i` of the packed entry array.
    Entry(usize),
    /// The mandatory right child.
    Right,
}

impl PageBuf {
    /// Reset this page to an empty internal node.
    pub fn init_internal(&mut self) {
        self.zero();
        self.set_node_type(NodeType::Internal);
    }

    pub fn internal_num_keys(&self) -> usize {
        self.read_u16(INTERNAL_NUM_KEYS_OFFSET) as usize
    }

    pub fn set_internal_num_keys(&mut self, n: usize) {
        self.write_u16(INTERNAL_NUM_KEYS_OFFSET, n as u16);
    }

    pub fn internal_right_child(&self) -> PageNum {
        PageNum::new(self.read_u32(INTERNAL_RIGHT_CHILD_OFFSET))
    }

    pub fn set_internal_right_child(&mut self, child: PageNum) {
        self.write_u32(INTERNAL_RIGHT_CHILD_OFFSET, child.value());
    }

    fn entry_offset(idx: usize) -> usize {
        INTERNAL_HEADER_SIZE + idx * INTERNAL_ENTRY_SIZE
    }

    pub fn internal_child(&self, idx: usize) -> PageNum {
        PageNum::new(self.read_u32(Self::entry_offset(idx)))
    }

    pub fn set_internal_child(&mut self, idx: usize, child: PageNum) {
        self.write_u32(Self::entry_offset(idx), child.value());
    }

    pub fn internal_key(&self, idx: usize) -> i32 {
        self.read_i32(Self::entry_offset(idx) + 4)
    }

    pub fn set_internal_key(&mut self, idx: usize, key: i32) {
        self.write_i32(Self::entry_offset(idx) + 4, key);
    }

    pub fn internal_entry(&self, idx: usize) -> (PageNum, i32) {
        (self.internal_child(idx), self.internal_key(idx))
    }

    /// Least entry index whose key is `>= key`, or `num_keys` when
    /// the search key belongs under the right child.
    pub fn internal_find_child_index(&self, key: i32) -> usize {
        let mut lo = 0;
        let mut hi = self.internal_num_keys();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if key <= self.internal_key(mid) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Child page to descend into for `key`.
    pub fn internal_child_for(&self, key: i32) -> PageNum {
        let idx = self.internal_find_child_index(key);
        if idx < self.internal_num_keys() {
            self.internal_child(idx)
        } else {
            self.internal_right_child()
        }
    }

    /// Locate `child` among this node's children.
    pub fn internal_find_child_slot(&self, child: PageNum) -> Option<ChildSlot> {
        if self.internal_right_child() == child {
            return Some(ChildSlot::Right);
        }
        (0..self.internal_num_keys())
            .find(|&i| self.internal_child(i) == child)
            .map(ChildSlot::Entry)
    }

    /// Splice `(child, key)` in at `idx`, shifting later entries up.
    /// The caller checks capacity.
    pub fn internal_insert_entry(&mut self, idx: usize, child: PageNum, key: i32) {
        let n = self.internal_num_keys();
        for i in (idx..n).rev() {
            let (c, k) = self.internal_entry(i);
            self.set_internal_child(i + 1, c);
            self.set_internal_key(i + 1, k);
        }
        self.set_internal_child(idx, child);
        self.set_internal_key(idx, key);
        self.set_internal_num_keys(n + 1);
    }

    /// Remove entry `idx`, shifting later entries down.
    pub fn internal_remove_entry(&mut self, idx: usize) {
        let n = self.internal_num_keys();
        for i in idx..n - 1 {
            let (c, k) = self.internal_entry(i + 1);
            self.set_internal_child(i, c);
            self.set_internal_key(i, k);
        }
        self.set_internal_num_keys(n - 1);
    }

    /// Overwrite the packed array and right child wholesale.
    pub fn internal_write_entries(&mut self, entries: &[(PageNum, i32)], right_child: PageNum) {
        for (i, &(c, k)) in entries.iter().enumerate() {
            self.set_internal_child(i, c);
            self.set_internal_key(i, k);
        }
        self.set_internal_num_keys(entries.len());
        self.set_internal_right_child(right_child);
    }

    /// All children in tree order: entry children, then the right
    /// child.
    pub fn internal_children(&self) -> Vec<PageNum> {
        let mut out: Vec<PageNum> = (0..self.internal_num_keys())
            .map(|i| self.internal_child(i))
            .collect();
        out.push(self.internal_right_child());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(entries: &[(u32, i32)], right: u32) -> PageBuf {
        let mut page = PageBuf::new();
        page.init_internal();
        let entries: Vec<(PageNum, i32)> =
            entries.iter().map(|&(c, k)| (PageNum::new(c), k)).collect();
        page.internal_write_entries(&entries, PageNum::new(right));
        page
    }

    #[test]
    fn test_child_routing() {
        let page = node(&[(10, 100), (20, 200)], 30);

        // Keys <= 100 descend left of the first separator.
        assert_eq!(page.internal_child_for(-5), PageNum::new(10));
        assert_eq!(page.internal_child_for(100), PageNum::new(10));
        assert_eq!(page.internal_child_for(101), PageNum::new(20));
        assert_eq!(page.internal_child_for(200), PageNum::new(20));
        assert_eq!(page.internal_child_for(201), PageNum::new(30));
    }

    #[test]
    fn test_insert_and_remove_entry() {
        let mut page = node(&[(10, 100), (30, 300)], 40);

        page.internal_insert_entry(1, PageNum::new(20), 200);
        assert_eq!(page.internal_num_keys(), 3);
        assert_eq!(page.internal_entry(0), (PageNum::new(10), 100));
        assert_eq!(page.internal_entry(1), (PageNum::new(20), 200));
        assert_eq!(page.internal_entry(2), (PageNum::new(30), 300));

        page.internal_remove_entry(0);
        assert_eq!(page.internal_num_keys(), 2);
        assert_eq!(page.internal_entry(0), (PageNum::new(20), 200));
        assert_eq!(page.internal_entry(1), (PageNum::new(30), 300));
        assert_eq!(page.internal_right_child(), PageNum::new(40));
    }

    #[test]
    fn test_find_child_slot() {
        let page = node(&[(10, 100), (20, 200)], 30);

        assert_eq!(
            page.internal_find_child_slot(PageNum::new(10)),
            Some(ChildSlot::Entry(0))
        );
        assert_eq!(
            page.internal_find_child_slot(PageNum::new(30)),
            Some(ChildSlot::Right)
        );
        assert_eq!(page.internal_find_child_slot(PageNum::new(99)), None);
    }

    #[test]
    fn test_children_in_order() {
        let page = node(&[(10, 100), (20, 200)], 30);
        let kids: Vec<u32> = page.internal_children().iter().map(|p| p.value()).collect();
        assert_eq!(kids, vec![10, 20, 30]);
    }
}
