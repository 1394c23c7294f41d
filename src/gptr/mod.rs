/*!
 * Global Pointer
 *
 * Value type naming one byte anywhere in the partitioned global address space:
 * the owning unit, the segment registered in that unit's translation table,
 * the team the segment was collectively created on (if any) and a byte offset.
 *
 * Arithmetic only moves the offset and is never checked against the segment
 * bound. A pointer is meaningful only while its segment stays registered.
 */

use crate::core::types::{Offset, SegmentId, TeamId, UnitId};
use crate::core::{GasError, GasResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// Handle to memory owned by any unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalPointer {
    pub unit: UnitId,
    pub segment: SegmentId,
    /// Team the segment was collectively allocated on, `None` for local memory
    pub team: Option<TeamId>,
    pub offset: Offset,
}

impl GlobalPointer {
    /// "No memory"
    pub const NULL: GlobalPointer = GlobalPointer {
        unit: UnitId::UNDEFINED,
        segment: SegmentId::LOCAL_POOL,
        team: None,
        offset: 0,
    };

    pub fn new(unit: UnitId, segment: SegmentId, team: Option<TeamId>, offset: Offset) -> Self {
        Self {
            unit,
            segment,
            team,
            offset,
        }
    }

    /// Pointer into the local pool of `unit`
    pub fn local(unit: UnitId, offset: Offset) -> Self {
        Self::new(unit, SegmentId::LOCAL_POOL, None, offset)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Whether the pointer addresses the owner's local pool
    #[inline]
    pub fn is_local_pool(&self) -> bool {
        self.segment.is_local_pool()
    }

    /// Same segment and offset, different owner
    #[inline]
    pub fn with_unit(mut self, unit: UnitId) -> Self {
        self.unit = unit;
        self
    }

    /// Move by a signed byte distance. Wraps like unsigned arithmetic would.
    #[inline]
    pub fn inc_offset(&mut self, delta: i64) {
        self.offset = self.offset.wrapping_add_signed(delta);
    }

    /// Whether both pointers name the same segment of the same unit
    #[inline]
    pub fn same_segment(&self, other: &GlobalPointer) -> bool {
        self.unit == other.unit && self.segment == other.segment
    }

    /// Compact wire form for handing pointers to other layers
    pub fn to_bytes(&self) -> GasResult<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GasError::InvalidArgument(format!("cannot encode global pointer: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> GasResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| GasError::InvalidArgument(format!("cannot decode global pointer: {}", e)))
    }
}

impl Default for GlobalPointer {
    fn default() -> Self {
        Self::NULL
    }
}

impl Add<u64> for GlobalPointer {
    type Output = GlobalPointer;

    #[inline]
    fn add(mut self, bytes: u64) -> GlobalPointer {
        self += bytes;
        self
    }
}

impl AddAssign<u64> for GlobalPointer {
    #[inline]
    fn add_assign(&mut self, bytes: u64) {
        self.offset = self.offset.wrapping_add(bytes);
    }
}

impl fmt::Display for GlobalPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "gptr(null)");
        }
        match self.team {
            Some(team) => write!(
                f,
                "gptr(unit={}, seg={}, team={}, off={})",
                self.unit, self.segment, team, self.offset
            ),
            None => write!(
                f,
                "gptr(unit={}, seg={}, off={})",
                self.unit, self.segment, self.offset
            ),
        }
    }
}
