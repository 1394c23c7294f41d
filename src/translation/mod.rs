/*!
 * Translation Table
 *
 * Per-unit registry mapping a segment id to the metadata needed to turn a
 * global pointer into something usable: the local memory behind the segment,
 * the base the transport exposed it under and, for collective segments, the
 * base of every member's share indexed by team-local rank.
 *
 * Segment 0 is the local pool and never appears here. Every other id comes
 * from a monotonic per-unit counter; collective registrations override the
 * counter with the id the team agreed on, which is never lower.
 */

use crate::core::types::{LocalHandle, LocalRank, SegmentId, Size, TeamId, Teardown, UnitId};
use crate::core::{GasError, GasResult, IdSpace};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::limits::FIRST_SEGMENT_ID;

/// Metadata of one registered segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub id: SegmentId,
    pub owner: UnitId,
    /// Team of a collective registration
    pub team: Option<TeamId>,
    pub size: Size,
    /// Local memory backing this unit's share
    pub local: LocalHandle,
    /// Base this unit's share was exposed under
    pub exposed_base: u64,
    /// Exposed base of every member's share, by team-local rank
    pub bases: Option<Arc<[u64]>>,
}

impl SegmentEntry {
    pub fn is_collective(&self) -> bool {
        self.bases.is_some()
    }

    /// Exposed base of `rank`'s share of a collective segment
    pub fn base_of(&self, rank: LocalRank) -> Option<u64> {
        self.bases
            .as_ref()
            .and_then(|bases| bases.get(rank.index()).copied())
    }
}

/// Per-unit segment registry
///
/// # Performance
/// - Cache-line aligned; the id counter is touched on every registration
#[repr(C, align(64))]
pub struct TranslationTable {
    segments: Arc<DashMap<SegmentId, SegmentEntry, RandomState>>,
    next_id: Arc<AtomicU32>,
    closed: Arc<AtomicBool>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self {
            segments: Arc::new(DashMap::with_hasher(RandomState::new())),
            next_id: Arc::new(AtomicU32::new(FIRST_SEGMENT_ID)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The id this unit proposes for the next collective registration
    pub fn proposed_id(&self) -> SegmentId {
        SegmentId(self.next_id.load(Ordering::SeqCst))
    }

    /// Register a segment owned only by this unit under a fresh id
    pub fn register_local(
        &self,
        owner: UnitId,
        size: Size,
        local: LocalHandle,
        exposed_base: u64,
    ) -> GasResult<SegmentId> {
        let raw = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| GasError::OutOfIdentifiers(IdSpace::Segment))?;
        let id = SegmentId(raw);

        self.insert(SegmentEntry {
            id,
            owner,
            team: None,
            size,
            local,
            exposed_base,
            bases: None,
        })?;
        Ok(id)
    }

    /// Register a collective segment under the id the team agreed on
    pub fn register_agreed(&self, entry: SegmentEntry) -> GasResult<SegmentId> {
        let id = entry.id;
        if id.is_local_pool() {
            return Err(GasError::InvalidArgument(
                "segment 0 is reserved for the local pool".to_string(),
            ));
        }
        let next = id
            .0
            .checked_add(1)
            .ok_or(GasError::OutOfIdentifiers(IdSpace::Segment))?;
        self.insert(entry)?;
        self.next_id.fetch_max(next, Ordering::SeqCst);
        Ok(id)
    }

    fn insert(&self, entry: SegmentEntry) -> GasResult<()> {
        let id = entry.id;
        match self.segments.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(segment = %id, "Refusing to register a segment id twice");
                Err(GasError::InvalidArgument(format!(
                    "segment {} is already registered",
                    id
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(
                    segment = %id,
                    owner = %entry.owner,
                    team = ?entry.team,
                    size = entry.size,
                    addr = entry.local.addr,
                    "Segment registered"
                );
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Local memory behind `id`
    pub fn resolve(&self, id: SegmentId) -> GasResult<LocalHandle> {
        self.segments
            .get(&id)
            .map(|entry| entry.local)
            .ok_or(GasError::UnknownSegment(id))
    }

    /// Full metadata of `id`
    pub fn entry(&self, id: SegmentId) -> GasResult<SegmentEntry> {
        self.segments
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(GasError::UnknownSegment(id))
    }

    /// Segment whose local memory shares a byte with `local`, if any
    pub fn find_overlapping(&self, local: &LocalHandle) -> Option<SegmentId> {
        self.segments
            .iter()
            .find(|entry| entry.local.overlaps(local))
            .map(|entry| *entry.key())
    }

    /// Remove `id`. After `close()` this is a silent no-op.
    pub fn unregister(&self, id: SegmentId) -> GasResult<Teardown> {
        if self.is_closed() {
            debug!(segment = %id, "Translation table closed, unregister ignored");
            return Ok(Teardown::ShutdownNoop);
        }
        match self.segments.remove(&id) {
            Some((_, entry)) => {
                info!(segment = %id, size = entry.size, "Segment unregistered");
                Ok(Teardown::Detached)
            }
            None => {
                warn!(segment = %id, "Unregister of unknown segment");
                Err(GasError::UnknownSegment(id))
            }
        }
    }

    /// Drop every entry and turn further unregistration into no-ops
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let abandoned = self.segments.len();
        self.segments.clear();
        if abandoned > 0 {
            info!(abandoned, "Translation table closed with segments still registered");
        }
        abandoned
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Registered ids in ascending order
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        let mut ids: Vec<SegmentId> = self.segments.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}

impl Default for TranslationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TranslationTable {
    fn clone(&self) -> Self {
        Self {
            segments: Arc::clone(&self.segments),
            next_id: Arc::clone(&self.next_id),
            closed: Arc::clone(&self.closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn handle(addr: u64) -> LocalHandle {
        LocalHandle::new(addr, 256)
    }

    fn collective(id: u32, bases: &[u64]) -> SegmentEntry {
        SegmentEntry {
            id: SegmentId(id),
            owner: UnitId(0),
            team: Some(TeamId::ALL),
            size: 256,
            local: handle(0x4000),
            exposed_base: bases[0],
            bases: Some(bases.to_vec().into()),
        }
    }

    #[test]
    fn test_local_ids_are_monotonic_and_skip_zero() {
        let table = TranslationTable::new();
        let a = table.register_local(UnitId(0), 256, handle(0x1000), 0x1000).unwrap();
        let b = table.register_local(UnitId(0), 256, handle(0x2000), 0x2000).unwrap();
        assert_eq!(a, SegmentId(1));
        assert_eq!(b, SegmentId(2));
        assert_eq!(table.resolve(a).unwrap(), handle(0x1000));
    }

    #[test]
    fn test_agreed_id_advances_counter() {
        let table = TranslationTable::new();
        table.register_agreed(collective(7, &[0x10, 0x20])).unwrap();
        assert_eq!(table.proposed_id(), SegmentId(8));

        let next = table.register_local(UnitId(0), 64, handle(0x9000), 0x9000).unwrap();
        assert_eq!(next, SegmentId(8));
    }

    #[test]
    fn test_agreed_id_colliding_with_local_is_rejected() {
        let table = TranslationTable::new();
        for addr in [0x1000, 0x2000, 0x3000] {
            table.register_local(UnitId(0), 64, handle(addr), addr).unwrap();
        }
        table.register_agreed(collective(2, &[0x10])).unwrap_err();
        assert_eq!(table.proposed_id(), SegmentId(4));
    }

    #[test]
    fn test_double_registration_rejected() {
        let table = TranslationTable::new();
        table.register_agreed(collective(3, &[0x10])).unwrap();
        assert!(matches!(
            table.register_agreed(collective(3, &[0x10])),
            Err(GasError::InvalidArgument(_))
        ));
        assert!(table.register_agreed(collective(0, &[0x10])).is_err());
    }

    #[test]
    fn test_unregister_twice() {
        let table = TranslationTable::new();
        let id = table.register_local(UnitId(1), 64, handle(0x1000), 0x1000).unwrap();
        assert_eq!(table.unregister(id), Ok(Teardown::Detached));
        assert_eq!(table.unregister(id), Err(GasError::UnknownSegment(id)));
        assert_eq!(table.resolve(id), Err(GasError::UnknownSegment(id)));
        assert_eq!(
            table.unregister(SegmentId(99)),
            Err(GasError::UnknownSegment(SegmentId(99)))
        );
    }

    #[test]
    fn test_unregister_after_close_is_noop() {
        let table = TranslationTable::new();
        let id = table.register_local(UnitId(1), 64, handle(0x1000), 0x1000).unwrap();
        assert_eq!(table.close(), 1);
        assert_eq!(table.unregister(id), Ok(Teardown::ShutdownNoop));
        assert_eq!(table.unregister(id), Ok(Teardown::ShutdownNoop));
    }

    #[test]
    fn test_per_rank_bases() {
        let table = TranslationTable::new();
        let id = table.register_agreed(collective(5, &[0x100, 0x200, 0x300])).unwrap();
        let entry = table.entry(id).unwrap();
        assert!(entry.is_collective());
        assert_eq!(entry.base_of(LocalRank(2)), Some(0x300));
        assert_eq!(entry.base_of(LocalRank(3)), None);
        assert_eq!(table.find_overlapping(&handle(0x4000)), Some(id));
        assert_eq!(table.find_overlapping(&LocalHandle::new(0x40f0, 8)), Some(id));
        assert_eq!(table.find_overlapping(&LocalHandle::new(0x4100, 8)), None);
    }
}
