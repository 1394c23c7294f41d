/*!
 * Transport Capability
 *
 * The global address space core is written against this trait only. A backend
 * provides three things:
 *
 * - collective all-reduce (max) over the members of a team
 * - collective all-gather of one fixed-size record per member
 * - exposing a local memory range under a remotely usable base, and withdrawing it
 *
 * Backends are selected once per unit at startup and shared as
 * `Arc<dyn Transport>`.
 *
 * # Collective contract
 *
 * Every member of the scope must issue the same collectives in the same
 * order. A member that never arrives stalls all others; no timeout is applied.
 */

mod local;

pub use local::{LocalFabric, LocalTransport};

use crate::core::types::{LocalHandle, LocalRank, TeamId, UnitId};
use crate::core::GasResult;
use std::sync::Arc;

/// Participants of one collective call, as seen by the calling unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectiveScope {
    pub team: TeamId,
    /// Global ids by team-local rank
    pub members: Arc<[UnitId]>,
    /// Caller's rank within `members`
    pub rank: LocalRank,
}

impl CollectiveScope {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Backend capability set
pub trait Transport: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Global id of the calling unit
    fn myid(&self) -> UnitId;

    /// Number of units in the root team
    fn size(&self) -> usize;

    /// Maximum of `value` over every member of `scope`
    fn allreduce_max(&self, scope: &CollectiveScope, value: u64) -> GasResult<u64>;

    /// Every member's `record`, indexed by team-local rank
    fn allgather(&self, scope: &CollectiveScope, record: u64) -> GasResult<Vec<u64>>;

    /// Block until every member of `scope` arrives
    fn barrier(&self, scope: &CollectiveScope) -> GasResult<()> {
        self.allreduce_max(scope, 0).map(|_| ())
    }

    /// Make `region` remotely accessible, returning the base other units address it by
    fn expose(&self, region: LocalHandle) -> GasResult<u64>;

    /// Undo a previous `expose`
    fn withdraw(&self, base: u64) -> GasResult<()>;
}
