/*!
 * Buddy Allocation
 * Split on allocate, coalesce on free
 */

use super::BuddyAllocator;
use crate::core::types::{Offset, Size};
use crate::core::{GasError, GasResult};
use tracing::{debug, warn};

impl BuddyAllocator {
    /// Allocate a block of at least `nbytes`, returning its offset in the pool
    pub fn allocate(&mut self, nbytes: Size) -> GasResult<Offset> {
        if nbytes == 0 {
            return Err(GasError::InvalidArgument(
                "cannot allocate zero bytes from the local pool".to_string(),
            ));
        }

        let Some(order) = self.order_for(nbytes) else {
            return Err(self.exhausted(nbytes));
        };
        let Some(mut current) = self.free.first_nonempty_from(order) else {
            return Err(self.exhausted(nbytes));
        };
        let Some(offset) = self.free.pop_lowest(current) else {
            return Err(self.exhausted(nbytes));
        };

        // Split down, returning the upper halves to the free lists
        while current > order {
            current -= 1;
            let upper = offset + self.order_size(current) as Offset;
            self.free.push(current, upper);
        }

        self.live.insert(offset, order);
        self.used += self.order_size(order);

        debug!(
            nbytes,
            block = self.order_size(order),
            offset,
            used = self.used,
            "Buddy block allocated"
        );
        Ok(offset)
    }

    /// Release the block starting at `offset`
    pub fn free(&mut self, offset: Offset) -> GasResult<()> {
        let Some(order) = self.live.remove(&offset) else {
            warn!(offset, "Attempted to free an offset that is not a live block");
            return Err(GasError::InvalidOffset(offset));
        };
        self.used -= self.order_size(order);

        let mut block = offset;
        let mut current = order;
        while current < self.max_order {
            let buddy = block ^ self.order_size(current) as Offset;
            // A split buddy is absent from this order's list, so it is never merged
            if !self.free.take(current, buddy) {
                break;
            }
            block = block.min(buddy);
            current += 1;
        }
        self.free.push(current, block);

        debug!(
            offset,
            merged_order = current,
            merged_offset = block,
            used = self.used,
            "Buddy block freed"
        );
        Ok(())
    }

    /// Smallest order whose block size fits `nbytes`
    fn order_for(&self, nbytes: Size) -> Option<u32> {
        let rounded = nbytes.max(self.min_block).checked_next_power_of_two()?;
        let order = rounded.trailing_zeros() - self.min_shift;
        (order <= self.max_order).then_some(order)
    }

    fn exhausted(&self, nbytes: Size) -> GasError {
        let largest_free = self.largest_free();
        warn!(
            requested = nbytes,
            largest_free,
            used = self.used,
            capacity = self.capacity(),
            "Local pool exhausted"
        );
        GasError::PoolExhausted {
            requested: nbytes,
            largest_free,
        }
    }
}
