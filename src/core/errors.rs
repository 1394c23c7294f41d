/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{LocalRank, Offset, SegmentId, TeamId, UnitId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for global address space operations
pub type GasResult<T> = Result<T, GasError>;

/// Global address space errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum GasError {
    #[error("Team {0} is unknown or has been destroyed")]
    #[diagnostic(
        code(gas::invalid_team),
        help("Teams are only valid between their creating and destroying collective calls.")
    )]
    InvalidTeam(TeamId),

    #[error("{what} is not a member of team {team}")]
    #[diagnostic(
        code(gas::not_member),
        help("Translate ranks with the team the unit actually belongs to.")
    )]
    NotMember { team: TeamId, what: Membership },

    #[error("Segment {0} is not registered")]
    #[diagnostic(
        code(gas::unknown_segment),
        help("The segment was never registered or has already been detached.")
    )]
    UnknownSegment(SegmentId),

    #[error("Local memory at 0x{addr:x} ({len} bytes) was not allocated by this allocator or is already attached")]
    #[diagnostic(
        code(gas::not_allocated),
        help("Only memory returned by allocate_local can be attached, and only once.")
    )]
    NotAllocated { addr: u64, len: usize },

    #[error("Local pool exhausted: requested {requested} bytes, largest free block {largest_free} bytes")]
    #[diagnostic(
        code(gas::pool_exhausted),
        help("Free unused local allocations or start the unit with a larger local pool.")
    )]
    PoolExhausted { requested: usize, largest_free: usize },

    #[error("Offset {0} does not refer to a live allocation")]
    #[diagnostic(
        code(gas::invalid_offset),
        help("The block was never allocated or has already been freed.")
    )]
    InvalidOffset(Offset),

    #[error("Identifier space exhausted: {0}")]
    #[diagnostic(code(gas::out_of_identifiers))]
    OutOfIdentifiers(IdSpace),

    #[error("Transport failure: {0}")]
    #[diagnostic(
        code(gas::transport),
        help("The backend rejected the operation; every member of the collective observed the failure.")
    )]
    Transport(String),

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(gas::invalid_argument))]
    InvalidArgument(String),

    #[error("Runtime is not initialized")]
    #[diagnostic(
        code(gas::not_initialized),
        help("The operation was issued after finalize().")
    )]
    NotInitialized,

    #[error("Durable pool storage error: {0}")]
    #[diagnostic(
        code(gas::storage),
        help("Check that the pool directory exists and is writable.")
    )]
    Storage(String),
}

impl From<std::io::Error> for GasError {
    fn from(err: std::io::Error) -> Self {
        GasError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for GasError {
    fn from(err: bincode::Error) -> Self {
        GasError::Storage(format!("corrupt pool index: {}", err))
    }
}

/// Subject of a failed membership lookup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Unit(UnitId),
    Rank(LocalRank),
}

impl std::fmt::Display for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Membership::Unit(unit) => write!(f, "unit {}", unit),
            Membership::Rank(rank) => write!(f, "rank {}", rank),
        }
    }
}

/// Identifier space that ran out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdSpace {
    Segment,
    Team,
    TeamSlot,
}

impl std::fmt::Display for IdSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdSpace::Segment => write!(f, "segment ids"),
            IdSpace::Team => write!(f, "team ids"),
            IdSpace::TeamSlot => write!(f, "team slots"),
        }
    }
}

impl GasError {
    pub fn not_member_unit(team: TeamId, unit: UnitId) -> Self {
        GasError::NotMember {
            team,
            what: Membership::Unit(unit),
        }
    }

    pub fn not_member_rank(team: TeamId, rank: LocalRank) -> Self {
        GasError::NotMember {
            team,
            what: Membership::Rank(rank),
        }
    }

    /// Whether the error was produced without any other unit being involved
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            GasError::PoolExhausted { .. } | GasError::InvalidOffset(_) | GasError::InvalidArgument(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GasError::not_member_unit(TeamId(3), UnitId(7));
        assert_eq!(err.to_string(), "unit 7 is not a member of team 3");

        let err = GasError::UnknownSegment(SegmentId(12));
        assert_eq!(err.to_string(), "Segment 12 is not registered");
    }

    #[test]
    fn test_local_errors() {
        assert!(GasError::InvalidOffset(128).is_local());
        assert!(GasError::PoolExhausted {
            requested: 64,
            largest_free: 0
        }
        .is_local());
        assert!(!GasError::Transport("down".into()).is_local());
        assert_eq!(
            GasError::OutOfIdentifiers(IdSpace::TeamSlot).to_string(),
            "Identifier space exhausted: team slots"
        );
    }
}
