/*!
 * Local Sub-Allocator
 *
 * Power-of-two buddy allocator over one contiguous per-unit arena. It backs
 * segment 0 of every unit: purely local allocations that still get a global
 * pointer, without any coordination with other units.
 *
 * ## Layout
 *
 * - The arena is `min_block << max_order` bytes
 * - A block of order `k` spans `min_block << k` bytes and starts at a
 *   multiple of its own size
 * - The buddy of the block at `offset` with size `s` is at `offset ^ s`
 *
 * ## Invariants
 *
 * - Every live allocation is exactly one block, recorded in `live`
 * - Free blocks never overlap live blocks or each other
 * - Two buddies are merged only when both are free at the same order
 */

mod allocator;
mod free_lists;

use crate::core::limits::MAX_BUDDY_ORDER;
use crate::core::types::{Offset, Size};
use crate::core::{GasError, GasResult};
use ahash::AHashMap;
use free_lists::OrderedFreeLists;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Buddy allocator over offsets `[0, capacity)`
#[derive(Debug, Clone)]
pub struct BuddyAllocator {
    min_block: Size,
    min_shift: u32,
    max_order: u32,
    free: OrderedFreeLists,
    // Live block offset -> order
    live: AHashMap<Offset, u32>,
    used: Size,
}

/// Allocator statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: Size,
    pub used: Size,
    pub live_blocks: usize,
    pub free_blocks: usize,
    pub largest_free: Size,
}

impl BuddyAllocator {
    /// Create an allocator for `capacity` bytes handed out in blocks of at least `min_block`.
    /// Both must be powers of two with `min_block <= capacity`.
    pub fn new(capacity: Size, min_block: Size) -> GasResult<Self> {
        if !capacity.is_power_of_two() || !min_block.is_power_of_two() || min_block > capacity {
            return Err(GasError::InvalidArgument(format!(
                "buddy pool needs power-of-two sizes with min_block <= capacity (capacity {}, min_block {})",
                capacity, min_block
            )));
        }
        let min_shift = min_block.trailing_zeros();
        let max_order = capacity.trailing_zeros() - min_shift;
        if max_order > MAX_BUDDY_ORDER {
            return Err(GasError::InvalidArgument(format!(
                "buddy pool of {} bytes exceeds {} orders",
                capacity, MAX_BUDDY_ORDER
            )));
        }

        let mut free = OrderedFreeLists::new(max_order as usize + 1);
        free.push(max_order, 0);

        info!(capacity, min_block, max_order, "Buddy allocator initialized");

        Ok(Self {
            min_block,
            min_shift,
            max_order,
            free,
            live: AHashMap::new(),
            used: 0,
        })
    }

    pub fn capacity(&self) -> Size {
        self.min_block << self.max_order
    }

    pub fn min_block(&self) -> Size {
        self.min_block
    }

    /// Bytes consumed by live blocks (rounded sizes)
    pub fn used(&self) -> Size {
        self.used
    }

    /// Size of the live block at `offset`
    pub fn block_size(&self, offset: Offset) -> Option<Size> {
        self.live.get(&offset).map(|&order| self.order_size(order))
    }

    pub fn is_live(&self, offset: Offset) -> bool {
        self.live.contains_key(&offset)
    }

    /// Start and size of the live block that contains `offset`
    pub fn containing_block(&self, offset: Offset) -> Option<(Offset, Size)> {
        // Blocks are aligned to their size, so each order has one candidate
        (0..=self.max_order).find_map(|order| {
            let size = self.order_size(order);
            let start = offset & !(size as Offset - 1);
            (self.live.get(&start) == Some(&order)).then_some((start, size))
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            used: self.used,
            live_blocks: self.live.len(),
            free_blocks: self.free.len(),
            largest_free: self.largest_free(),
        }
    }

    /// Largest request that would currently succeed
    pub fn largest_free(&self) -> Size {
        self.free
            .highest_nonempty()
            .map(|order| self.order_size(order))
            .unwrap_or(0)
    }

    #[inline]
    fn order_size(&self, order: u32) -> Size {
        self.min_block << order
    }
}
