/*!
 * Order-Segregated Free Lists
 * One ordered set of free block offsets per buddy order
 */

use crate::core::types::Offset;
use std::collections::BTreeSet;

/// Free lists indexed by order
///
/// Ordered sets keep allocation deterministic (lowest address first) and make
/// removing a specific buddy during coalescing O(log n).
#[derive(Debug, Clone)]
pub(super) struct OrderedFreeLists {
    lists: Vec<BTreeSet<Offset>>,
}

impl OrderedFreeLists {
    pub fn new(orders: usize) -> Self {
        Self {
            lists: vec![BTreeSet::new(); orders],
        }
    }

    pub fn push(&mut self, order: u32, offset: Offset) {
        self.lists[order as usize].insert(offset);
    }

    pub fn pop_lowest(&mut self, order: u32) -> Option<Offset> {
        self.lists[order as usize].pop_first()
    }

    /// Remove a specific block, returns whether it was free at this order
    pub fn take(&mut self, order: u32, offset: Offset) -> bool {
        self.lists[order as usize].remove(&offset)
    }

    /// Smallest order >= `order` with a free block
    pub fn first_nonempty_from(&self, order: u32) -> Option<u32> {
        (order as usize..self.lists.len())
            .find(|&o| !self.lists[o].is_empty())
            .map(|o| o as u32)
    }

    /// Highest order with a free block
    pub fn highest_nonempty(&self) -> Option<u32> {
        (0..self.lists.len())
            .rev()
            .find(|&o| !self.lists[o].is_empty())
            .map(|o| o as u32)
    }

    pub fn len(&self) -> usize {
        self.lists.iter().map(|l| l.len()).sum()
    }
}
