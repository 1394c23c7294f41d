/*!
 * Remote Access Descriptors
 * What a communication layer needs to reach the memory behind a global pointer
 */

use super::GlobalMemory;
use crate::core::types::{LocalRank, Offset, SegmentId, TeamId, UnitId};
use crate::core::{GasError, GasResult};
use crate::gptr::GlobalPointer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target of a remote access: the owning unit plus the base its memory was
/// exposed under on that unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub unit: UnitId,
    pub segment: SegmentId,
    pub base: u64,
    pub offset: Offset,
}

impl RemoteDescriptor {
    /// Exposed address of the target byte
    #[inline]
    pub fn target(&self) -> u64 {
        self.base.wrapping_add(self.offset)
    }
}

impl fmt::Display for RemoteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unit {} segment {} @ 0x{:x}+{}",
            self.unit, self.segment, self.base, self.offset
        )
    }
}

impl GlobalMemory {
    /// Pointer to the same offset in `rank`'s share of the segment `gptr` names.
    ///
    /// For collective segments `rank` is relative to the segment's team; for
    /// the local pool it is relative to the root team.
    pub fn gptr_for_rank(&self, gptr: GlobalPointer, rank: LocalRank) -> GasResult<GlobalPointer> {
        self.ensure_initialized()?;
        let team = if gptr.is_local_pool() {
            TeamId::ALL
        } else {
            let Some(team) = gptr.team else {
                return Err(GasError::InvalidArgument(format!(
                    "{} names a segment private to unit {}",
                    gptr, gptr.unit
                )));
            };
            let entry = self.segments.entry(gptr.segment)?;
            if entry.team != Some(team) {
                return Err(GasError::InvalidArgument(format!(
                    "{} does not match the team of segment {}",
                    gptr, entry.id
                )));
            }
            team
        };

        // Root-team translation is unchecked identity
        if rank.index() >= self.teams.size(team)? {
            return Err(GasError::not_member_rank(team, rank));
        }
        let unit = self.teams.unit_l2g(team, rank)?;
        Ok(gptr.with_unit(unit))
    }

    /// Descriptor a communication layer can drive remote reads and writes with
    pub fn remote_descriptor(&self, gptr: GlobalPointer) -> GasResult<RemoteDescriptor> {
        self.ensure_initialized()?;
        if gptr.is_null() {
            return Err(GasError::InvalidArgument(
                "null pointer has no remote target".to_string(),
            ));
        }

        let base = if gptr.is_local_pool() {
            self.pool_bases
                .get(gptr.unit.index())
                .copied()
                .ok_or_else(|| GasError::not_member_unit(TeamId::ALL, gptr.unit))?
        } else {
            let entry = self.segments.entry(gptr.segment)?;
            match gptr.team {
                Some(team) if entry.team == Some(team) => {
                    let rank = self.teams.unit_g2l(team, gptr.unit)?;
                    entry
                        .base_of(rank)
                        .ok_or_else(|| GasError::not_member_rank(team, rank))?
                }
                None if entry.team.is_none() && gptr.unit == self.myid => entry.exposed_base,
                _ => {
                    return Err(GasError::InvalidArgument(format!(
                        "{} cannot be described from unit {}",
                        gptr, self.myid
                    )))
                }
            }
        };

        Ok(RemoteDescriptor {
            unit: gptr.unit,
            segment: gptr.segment,
            base,
            offset: gptr.offset,
        })
    }
}
