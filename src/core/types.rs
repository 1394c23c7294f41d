/*!
 * Core Types
 * Identifiers shared by every layer of the global address space
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte offset inside a segment or the local pool
pub type Offset = u64;

/// Size type for memory operations
pub type Size = usize;

/// Global unit identifier (rank in the root team)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

impl UnitId {
    /// Sentinel for "no unit", used by the null global pointer
    pub const UNDEFINED: UnitId = UnitId(u32::MAX);

    #[inline]
    pub fn is_defined(self) -> bool {
        self != Self::UNDEFINED
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Rank of a unit relative to a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalRank(pub u32);

impl LocalRank {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Team identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u16);

impl TeamId {
    /// The root team containing every unit
    pub const ALL: TeamId = TeamId(0);
}

/// Segment identifier, unique within the owning unit's translation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// Reserved for the unit's local sub-allocator pool
    pub const LOCAL_POOL: SegmentId = SegmentId(0);

    #[inline]
    pub fn is_local_pool(self) -> bool {
        self == Self::LOCAL_POOL
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_defined() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "undefined")
        }
    }
}

impl fmt::Display for LocalRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of caller-owned local memory plus its length.
///
/// The address is an opaque token: the core never dereferences it, it only
/// stores it, exposes it to the transport and computes offsets against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalHandle {
    pub addr: u64,
    pub len: Size,
}

impl LocalHandle {
    pub fn new(addr: u64, len: Size) -> Self {
        Self { addr, len }
    }

    /// Exclusive end address
    #[inline]
    pub fn end(&self) -> u64 {
        self.addr.saturating_add(self.len as u64)
    }

    /// Whether the two ranges share at least one byte
    pub fn overlaps(&self, other: &LocalHandle) -> bool {
        self.len > 0 && other.len > 0 && self.addr < other.end() && other.addr < self.end()
    }
}

/// Outcome of an unregister-style call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Teardown {
    /// The segment was removed
    Detached,
    /// The runtime was already finalized, nothing was touched
    ShutdownNoop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_overlaps() {
        let outer = LocalHandle::new(0x1000, 256);
        assert!(outer.overlaps(&LocalHandle::new(0x1000, 256)));
        assert!(outer.overlaps(&LocalHandle::new(0x1010, 16)));
        assert!(outer.overlaps(&LocalHandle::new(0x10f0, 32)));
        assert!(outer.overlaps(&LocalHandle::new(0x0ff0, 32)));
        assert!(!outer.overlaps(&LocalHandle::new(0x1100, 16)));
        assert!(!outer.overlaps(&LocalHandle::new(0x0ff0, 16)));
        assert!(!outer.overlaps(&LocalHandle::new(0x1010, 0)));
    }

    #[test]
    fn test_undefined_unit_display() {
        assert_eq!(UnitId::UNDEFINED.to_string(), "undefined");
        assert_eq!(UnitId(3).to_string(), "3");
    }
}
