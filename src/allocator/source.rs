/*!
 * Local Memory Sources
 * Where the global allocator gets the memory it attaches
 */

use crate::buddy::{BuddyAllocator, PoolStats};
use crate::core::types::{LocalHandle, Offset, Size};
use crate::core::{GasError, GasResult};
use tracing::debug;

/// Provider of unit-owned memory
///
/// Handles returned by `allocate` stay valid until passed to `release`.
pub trait LocalMemorySource: Send {
    /// Logical pool identity; allocators on the same team and pool are interchangeable
    fn pool_id(&self) -> &str;

    fn allocate(&mut self, nbytes: Size) -> GasResult<LocalHandle>;

    fn release(&mut self, handle: LocalHandle) -> GasResult<()>;

    /// Copy `data` into `handle` at `offset`
    fn write(&mut self, handle: LocalHandle, offset: usize, data: &[u8]) -> GasResult<()>;

    /// Copy `len` bytes of `handle` starting at `offset`
    fn read(&self, handle: LocalHandle, offset: usize, len: usize) -> GasResult<Vec<u8>>;

    /// Make the contents of `handle` survive a restart
    fn persist(&mut self, _handle: LocalHandle) -> GasResult<()> {
        Ok(())
    }

    /// Regions restored from a previous run, handed out once
    fn recover(&mut self) -> GasResult<Vec<LocalHandle>> {
        Ok(Vec::new())
    }
}

/// Byte range `[offset, offset + len)` inside a region of `size` bytes
pub(crate) fn region_range(size: usize, offset: usize, len: usize) -> GasResult<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(GasError::InvalidArgument(format!(
            "{} bytes at offset {} overrun a {}-byte region",
            len, offset, size
        ))),
    }
}

/// Volatile source carved out of its own buddy-managed arena
pub struct PoolSource {
    pool_id: String,
    buddy: BuddyAllocator,
    arena: Box<[u8]>,
    base: u64,
}

impl PoolSource {
    pub fn new(pool_id: impl Into<String>, capacity: Size, min_block: Size) -> GasResult<Self> {
        let buddy = BuddyAllocator::new(capacity, min_block)?;
        let arena = vec![0u8; buddy.capacity()].into_boxed_slice();
        let base = arena.as_ptr() as u64;
        Ok(Self {
            pool_id: pool_id.into(),
            buddy,
            arena,
            base,
        })
    }

    pub fn stats(&self) -> PoolStats {
        self.buddy.stats()
    }

    fn offset_of(&self, handle: &LocalHandle) -> GasResult<Offset> {
        handle
            .addr
            .checked_sub(self.base)
            .filter(|&offset| offset < self.arena.len() as Offset)
            .ok_or(GasError::NotAllocated {
                addr: handle.addr,
                len: handle.len,
            })
    }

    fn block(&self, handle: &LocalHandle) -> GasResult<(usize, usize)> {
        let offset = self.offset_of(handle)?;
        let size = self.buddy.block_size(offset).ok_or(GasError::InvalidOffset(offset))?;
        Ok((offset as usize, size))
    }
}

impl LocalMemorySource for PoolSource {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn allocate(&mut self, nbytes: Size) -> GasResult<LocalHandle> {
        let offset = self.buddy.allocate(nbytes)?;
        Ok(LocalHandle::new(self.base + offset, nbytes))
    }

    fn release(&mut self, handle: LocalHandle) -> GasResult<()> {
        let offset = self.offset_of(&handle)?;
        self.buddy.free(offset)?;
        debug!(pool = %self.pool_id, offset, len = handle.len, "Pool block released");
        Ok(())
    }

    fn write(&mut self, handle: LocalHandle, offset: usize, data: &[u8]) -> GasResult<()> {
        let (start, size) = self.block(&handle)?;
        let range = region_range(size, offset, data.len())?;
        self.arena[start + range.start..start + range.end].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, handle: LocalHandle, offset: usize, len: usize) -> GasResult<Vec<u8>> {
        let (start, size) = self.block(&handle)?;
        let range = region_range(size, offset, len)?;
        Ok(self.arena[start + range.start..start + range.end].to_vec())
    }
}
