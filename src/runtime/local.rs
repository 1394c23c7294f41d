/*!
 * Local Memory Operations
 * Segment 0 allocation, address conversion and byte access for owned memory
 */

use super::GlobalMemory;
use crate::core::types::{Offset, SegmentId, Size};
use crate::core::{GasError, GasResult};
use crate::gptr::GlobalPointer;
use tracing::{debug, warn};

impl GlobalMemory {
    /// Allocate `nbytes` from the local pool. Not collective.
    pub fn memalloc(&self, nbytes: Size) -> GasResult<GlobalPointer> {
        self.ensure_initialized()?;
        let offset = self.pool.lock().buddy.allocate(nbytes)?;
        debug!(unit = %self.myid, nbytes, offset, "Local pool allocation");
        Ok(GlobalPointer::local(self.myid, offset))
    }

    /// Return a block obtained from [`memalloc`](Self::memalloc)
    pub fn memfree(&self, gptr: GlobalPointer) -> GasResult<()> {
        self.ensure_initialized()?;
        if !gptr.is_local_pool() || gptr.unit != self.myid {
            warn!(unit = %self.myid, %gptr, "memfree on memory outside this unit's local pool");
            return Err(GasError::InvalidArgument(format!(
                "{} does not point into the local pool of unit {}",
                gptr, self.myid
            )));
        }
        self.pool.lock().buddy.free(gptr.offset)
    }

    /// Local address of the byte `gptr` names, or `None` if another unit owns it
    pub fn gptr_getaddr(&self, gptr: GlobalPointer) -> GasResult<Option<u64>> {
        self.ensure_initialized()?;
        if gptr.unit != self.myid {
            return Ok(None);
        }
        let base = self.segment_base(gptr.segment)?;
        Ok(Some(base.wrapping_add(gptr.offset)))
    }

    /// Point `gptr` at the local address `addr` within its segment
    pub fn gptr_setaddr(&self, gptr: &mut GlobalPointer, addr: u64) -> GasResult<()> {
        self.ensure_initialized()?;
        if gptr.unit != self.myid {
            return Err(GasError::InvalidArgument(format!(
                "cannot set a local address on {} owned by unit {}",
                gptr, gptr.unit
            )));
        }
        let base = self.segment_base(gptr.segment)?;
        gptr.offset = addr.checked_sub(base).ok_or_else(|| {
            GasError::InvalidArgument(format!(
                "address 0x{:x} lies below the base 0x{:x} of segment {}",
                addr, base, gptr.segment
            ))
        })?;
        Ok(())
    }

    /// Copy `data` into owned memory at `gptr`
    pub fn write_local(&self, gptr: GlobalPointer, data: &[u8]) -> GasResult<()> {
        self.with_owned_bytes(gptr, data.len(), |bytes| bytes.copy_from_slice(data))
    }

    /// Copy `len` bytes of owned memory at `gptr`
    pub fn read_local(&self, gptr: GlobalPointer, len: Size) -> GasResult<Vec<u8>> {
        self.with_owned_bytes(gptr, len, |bytes| bytes.to_vec())
    }

    fn segment_base(&self, segment: SegmentId) -> GasResult<u64> {
        if segment.is_local_pool() {
            Ok(self.pool_base)
        } else {
            self.segments.resolve(segment).map(|local| local.addr)
        }
    }

    /// Run `f` on `len` bytes at `gptr`, bounds-checked against the block or segment
    fn with_owned_bytes<T>(
        &self,
        gptr: GlobalPointer,
        len: Size,
        f: impl FnOnce(&mut [u8]) -> T,
    ) -> GasResult<T> {
        self.ensure_initialized()?;
        if gptr.unit != self.myid {
            return Err(GasError::InvalidArgument(format!(
                "{} is owned by unit {}, not {}",
                gptr, gptr.unit, self.myid
            )));
        }

        if gptr.is_local_pool() {
            let mut pool = self.pool.lock();
            let (start, size) = pool
                .buddy
                .containing_block(gptr.offset)
                .ok_or(GasError::InvalidOffset(gptr.offset))?;
            let range = checked_range(gptr.offset, len, start, size)?;
            return Ok(f(&mut pool.arena[range]));
        }

        let entry = self.segments.entry(gptr.segment)?;
        let range = checked_range(gptr.offset, len, 0, entry.size)?;
        let mut regions = self.regions.lock();
        let region = regions.get_mut(&entry.local.addr).ok_or_else(|| {
            GasError::InvalidArgument(format!(
                "memory of segment {} is not owned by the runtime",
                gptr.segment
            ))
        })?;
        Ok(f(&mut region[range]))
    }
}

/// `[offset, offset + len)` as indices, provided it lies inside `[start, start + size)`
fn checked_range(
    offset: Offset,
    len: Size,
    start: Offset,
    size: Size,
) -> GasResult<std::ops::Range<usize>> {
    let end = offset.checked_add(len as Offset);
    match end {
        Some(end) if offset >= start && end <= start + size as Offset => {
            Ok(offset as usize..end as usize)
        }
        _ => Err(GasError::InvalidArgument(format!(
            "{} bytes at offset {} overrun the {}-byte block at {}",
            len, offset, size, start
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::solo;
    use super::*;
    use crate::core::types::UnitId;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memalloc_and_memfree() {
        let gm = solo();
        let a = gm.memalloc(100).unwrap();
        assert_eq!(a.unit, UnitId(0));
        assert!(a.is_local_pool());
        assert_eq!(a.team, None);

        let b = gm.memalloc(64).unwrap();
        assert_ne!(a.offset, b.offset);
        gm.memfree(a).unwrap();
        assert_eq!(gm.memfree(a), Err(GasError::InvalidOffset(a.offset)));
        assert!(gm.memfree(b.with_unit(UnitId(3))).is_err());
    }

    #[test]
    fn test_pool_exhaustion_is_local() {
        let gm = solo();
        let whole = gm.memalloc(4096).unwrap();
        let err = gm.memalloc(1).unwrap_err();
        assert!(matches!(err, GasError::PoolExhausted { .. }));
        assert!(err.is_local());
        gm.memfree(whole).unwrap();
        gm.memalloc(4096).unwrap();
    }

    #[test]
    fn test_read_write_local_pool() {
        let gm = solo();
        let gptr = gm.memalloc(64).unwrap();
        gm.write_local(gptr + 8, b"pgas").unwrap();
        assert_eq!(gm.read_local(gptr + 8, 4).unwrap(), b"pgas".to_vec());

        // 60 + 8 runs past the 64-byte block
        assert!(matches!(
            gm.write_local(gptr + 60, &[0u8; 8]),
            Err(GasError::InvalidArgument(_))
        ));
        gm.memfree(gptr).unwrap();
        assert!(matches!(gm.read_local(gptr, 1), Err(GasError::InvalidOffset(_))));
    }

    #[test]
    fn test_getaddr_setaddr() {
        let gm = solo();
        let gptr = gm.memalloc(256).unwrap();
        let addr = gm.gptr_getaddr(gptr).unwrap().unwrap();

        let mut moved = gptr;
        gm.gptr_setaddr(&mut moved, addr + 32).unwrap();
        assert_eq!(moved.offset, gptr.offset + 32);
        assert!(gm.gptr_setaddr(&mut moved, 0).is_err());

        assert_eq!(gm.gptr_getaddr(gptr.with_unit(UnitId(1))).unwrap(), None);
        let unknown = GlobalPointer::new(UnitId(0), SegmentId(42), None, 0);
        assert_eq!(
            gm.gptr_getaddr(unknown),
            Err(GasError::UnknownSegment(SegmentId(42)))
        );
    }
}
