/*!
 * Global Memory Runtime
 *
 * Per-unit entry point tying the pieces together: the transport endpoint, the
 * team registry, the translation table and the local pool behind segment 0.
 *
 * # Lifecycle
 *
 * `init` is collective over the root team: it exposes the local pool and
 * gathers every unit's pool base so segment 0 pointers of any unit can be
 * described. `finalize` is collective as well. Afterwards deregistration
 * calls report [`Teardown::ShutdownNoop`] and everything else fails with
 * [`GasError::NotInitialized`].
 *
 * # Collective ordering
 *
 * Collective registrations agree on their segment id by all-reduce-max over
 * each member's next local id. Members only agree on the same id if they
 * issue collective registrations in the same relative order. This is a caller
 * obligation; it is not checked.
 */

mod collective;
mod descriptor;
mod local;

pub use descriptor::RemoteDescriptor;

use crate::buddy::{BuddyAllocator, PoolStats};
use crate::core::types::{LocalHandle, LocalRank, TeamId, UnitId};
use crate::core::{GasError, GasResult, RuntimeConfig};
use crate::monitoring::span_collective;
use crate::team::{Group, TeamManager};
use crate::translation::TranslationTable;
use crate::transport::Transport;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Local pool of one unit: buddy bookkeeping plus the bytes it manages
struct LocalPool {
    buddy: BuddyAllocator,
    arena: Box<[u8]>,
}

/// Global address space state of one unit
pub struct GlobalMemory {
    transport: Arc<dyn Transport>,
    myid: UnitId,
    config: RuntimeConfig,
    teams: TeamManager,
    segments: TranslationTable,
    pool: Mutex<LocalPool>,
    pool_base: u64,
    // Exposed pool base of every unit, by global id
    pool_bases: Arc<[u64]>,
    // Memory owned by collective allocations, keyed by address
    regions: Mutex<AHashMap<u64, Box<[u8]>>>,
    initialized: AtomicBool,
}

impl GlobalMemory {
    /// Bring up the global address space of the calling unit. Collective over the root team.
    pub fn init(transport: Arc<dyn Transport>, config: RuntimeConfig) -> GasResult<Self> {
        let myid = transport.myid();
        let buddy = BuddyAllocator::new(config.local_pool_bytes, config.min_block_bytes)?;
        let arena = vec![0u8; buddy.capacity()].into_boxed_slice();
        let pool_base = arena.as_ptr() as u64;

        let teams = TeamManager::new(Arc::clone(&transport), config.max_teams);
        let root = teams.scope(TeamId::ALL)?;

        let exposed = transport.expose(LocalHandle::new(pool_base, arena.len()));
        let failed = transport.allreduce_max(&root, u64::from(exposed.is_err()))?;
        let exposed_base = match exposed {
            Ok(base) if failed == 0 => base,
            Ok(base) => {
                if let Err(e) = transport.withdraw(base) {
                    warn!(unit = %myid, base, error = %e, "Withdraw of the local pool failed");
                }
                warn!(unit = %myid, "Init aborted by another unit");
                return Err(GasError::Transport(
                    "init aborted: a unit failed to expose its local pool".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };
        let pool_bases: Arc<[u64]> = transport.allgather(&root, exposed_base)?.into();

        info!(
            unit = %myid,
            units = transport.size(),
            backend = transport.name(),
            pool_bytes = arena.len(),
            min_block = config.min_block_bytes,
            "Global memory initialized"
        );

        Ok(Self {
            transport,
            myid,
            config,
            teams,
            segments: TranslationTable::new(),
            pool: Mutex::new(LocalPool { buddy, arena }),
            pool_base,
            pool_bases,
            regions: Mutex::new(AHashMap::new()),
            initialized: AtomicBool::new(true),
        })
    }

    /// Tear down the global address space. Collective over the root team.
    ///
    /// Segments still registered are abandoned; their memory is withdrawn from
    /// the transport.
    pub fn finalize(&self) -> GasResult<()> {
        self.ensure_initialized()?;
        let root = self.teams.scope(TeamId::ALL)?;
        {
            let _span = span_collective("finalize", self.myid, TeamId::ALL);
            self.transport.barrier(&root)?;
        }
        self.initialized.store(false, Ordering::SeqCst);

        for id in self.segments.segment_ids() {
            if let Ok(entry) = self.segments.entry(id) {
                if let Err(e) = self.transport.withdraw(entry.exposed_base) {
                    warn!(unit = %self.myid, segment = %id, error = %e, "Withdraw failed during finalize");
                }
            }
        }
        let abandoned = self.segments.close();
        if let Err(e) = self.transport.withdraw(self.pool_base) {
            warn!(unit = %self.myid, error = %e, "Local pool withdraw failed during finalize");
        }
        self.regions.lock().clear();

        info!(unit = %self.myid, abandoned, "Global memory finalized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    #[inline]
    fn ensure_initialized(&self) -> GasResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(GasError::NotInitialized)
        }
    }

    /// Global id of the calling unit
    pub fn myid(&self) -> UnitId {
        self.myid
    }

    /// Number of units in the root team
    pub fn size(&self) -> usize {
        self.teams.world_size()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn segments(&self) -> &TranslationTable {
        &self.segments
    }

    pub fn teams(&self) -> &TeamManager {
        &self.teams
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.lock().buddy.stats()
    }

    /// Split `parent` by `group`. Collective over `parent`.
    pub fn team_create(&self, parent: TeamId, group: &Group) -> GasResult<Option<TeamId>> {
        self.ensure_initialized()?;
        self.teams.create(parent, group)
    }

    /// Collective over the members of `team`
    pub fn team_destroy(&self, team: TeamId) -> GasResult<()> {
        self.ensure_initialized()?;
        self.teams.destroy(team)
    }

    pub fn team_size(&self, team: TeamId) -> GasResult<usize> {
        self.ensure_initialized()?;
        self.teams.size(team)
    }

    pub fn team_myid(&self, team: TeamId) -> GasResult<LocalRank> {
        self.ensure_initialized()?;
        self.teams.team_myid(team)
    }

    pub fn team_get_group(&self, team: TeamId) -> GasResult<Group> {
        self.ensure_initialized()?;
        self.teams.group(team)
    }

    pub fn team_unit_l2g(&self, team: TeamId, rank: LocalRank) -> GasResult<UnitId> {
        self.ensure_initialized()?;
        self.teams.unit_l2g(team, rank)
    }

    pub fn team_unit_g2l(&self, team: TeamId, unit: UnitId) -> GasResult<LocalRank> {
        self.ensure_initialized()?;
        self.teams.unit_g2l(team, unit)
    }
}

impl std::fmt::Debug for GlobalMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalMemory")
            .field("unit", &self.myid)
            .field("backend", &self.transport.name())
            .field("segments", &self.segments.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
