/*!
 * In-Process Fabric
 *
 * Transport backend where every unit is a thread of the same process. Each
 * collective call meets its peers on a shared rendezvous board keyed by the
 * team, its member list and a per-unit sequence number for that team, so
 * consecutive collectives on the same team never mix.
 *
 * Exposure works like a dynamic RMA window: the exposed base is the region's
 * own address, and the fabric keeps the set of exposed regions per unit.
 */

use super::{CollectiveScope, Transport};
use crate::core::types::{LocalHandle, Size, TeamId, UnitId};
use crate::core::{GasError, GasResult};
use ahash::{AHashMap, RandomState};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RendezvousKey {
    team: TeamId,
    members: Arc<[UnitId]>,
    seq: u64,
}

#[derive(Debug)]
struct Rendezvous {
    values: Vec<Option<u64>>,
    arrived: usize,
    departed: usize,
}

impl Rendezvous {
    fn new(size: usize) -> Self {
        Self {
            values: vec![None; size],
            arrived: 0,
            departed: 0,
        }
    }

    fn complete(&self) -> bool {
        self.arrived == self.values.len()
    }
}

/// Shared state of all units of one simulated job
pub struct LocalFabric {
    size: usize,
    board: Mutex<AHashMap<RendezvousKey, Rendezvous>>,
    arrivals: Condvar,
    // (unit, base) -> exposed length
    exposed: DashMap<(UnitId, u64), Size, RandomState>,
    // Pending injected expose failures per unit
    expose_faults: Vec<AtomicU32>,
}

impl LocalFabric {
    /// Fabric for `size` units
    pub fn new(size: usize) -> Arc<Self> {
        info!(units = size, "In-process fabric created");
        Arc::new(Self {
            size,
            board: Mutex::new(AHashMap::new()),
            arrivals: Condvar::new(),
            exposed: DashMap::with_hasher(RandomState::new()),
            expose_faults: (0..size).map(|_| AtomicU32::new(0)).collect(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Endpoint used by `unit`
    pub fn endpoint(self: &Arc<Self>, unit: UnitId) -> GasResult<LocalTransport> {
        if unit.index() >= self.size {
            return Err(GasError::InvalidArgument(format!(
                "unit {} outside fabric of {} units",
                unit, self.size
            )));
        }
        Ok(LocalTransport {
            fabric: Arc::clone(self),
            unit,
            sequences: Mutex::new(AHashMap::new()),
        })
    }

    /// Make the next `expose` issued by `unit` fail
    pub fn fail_next_expose(&self, unit: UnitId) {
        if let Some(faults) = self.expose_faults.get(unit.index()) {
            faults.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Number of regions `unit` currently has exposed
    pub fn exposed_count(&self, unit: UnitId) -> usize {
        self.exposed.iter().filter(|e| e.key().0 == unit).count()
    }

    fn exchange(&self, key: RendezvousKey, rank: usize, value: u64) -> Vec<u64> {
        let size = key.members.len();
        let mut board = self.board.lock();

        {
            let slot = board
                .entry(key.clone())
                .or_insert_with(|| Rendezvous::new(size));
            slot.values[rank] = Some(value);
            slot.arrived += 1;
            if slot.complete() {
                self.arrivals.notify_all();
            }
        }

        loop {
            let complete = board.get(&key).map(Rendezvous::complete).unwrap_or(false);
            if complete {
                break;
            }
            self.arrivals.wait(&mut board);
        }

        let (values, drained) = match board.get_mut(&key) {
            Some(slot) => {
                slot.departed += 1;
                let values = slot.values.iter().map(|v| v.unwrap_or(0)).collect();
                (values, slot.departed == size)
            }
            None => (Vec::new(), false),
        };
        if drained {
            board.remove(&key);
        }
        values
    }
}

/// One unit's view of a [`LocalFabric`]
pub struct LocalTransport {
    fabric: Arc<LocalFabric>,
    unit: UnitId,
    // Collectives issued so far per (team, members)
    sequences: Mutex<AHashMap<(TeamId, Arc<[UnitId]>), u64>>,
}

impl LocalTransport {
    pub fn fabric(&self) -> &Arc<LocalFabric> {
        &self.fabric
    }

    fn collective(&self, scope: &CollectiveScope, value: u64) -> GasResult<Vec<u64>> {
        let rank = scope.rank.index();
        if scope.members.get(rank) != Some(&self.unit) {
            return Err(GasError::InvalidArgument(format!(
                "unit {} is not rank {} of team {}",
                self.unit, scope.rank, scope.team
            )));
        }

        let seq = {
            let mut sequences = self.sequences.lock();
            let counter = sequences
                .entry((scope.team, Arc::clone(&scope.members)))
                .or_insert(0);
            let seq = *counter;
            *counter += 1;
            seq
        };

        trace!(unit = %self.unit, team = %scope.team, seq, "Entering collective");
        let values = self.fabric.exchange(
            RendezvousKey {
                team: scope.team,
                members: Arc::clone(&scope.members),
                seq,
            },
            rank,
            value,
        );
        if values.len() != scope.size() {
            return Err(GasError::Transport(format!(
                "collective on team {} lost its rendezvous",
                scope.team
            )));
        }
        Ok(values)
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local-fabric"
    }

    fn myid(&self) -> UnitId {
        self.unit
    }

    fn size(&self) -> usize {
        self.fabric.size
    }

    fn allreduce_max(&self, scope: &CollectiveScope, value: u64) -> GasResult<u64> {
        let values = self.collective(scope, value)?;
        Ok(values.into_iter().max().unwrap_or(value))
    }

    fn allgather(&self, scope: &CollectiveScope, record: u64) -> GasResult<Vec<u64>> {
        self.collective(scope, record)
    }

    fn expose(&self, region: LocalHandle) -> GasResult<u64> {
        if let Some(faults) = self.fabric.expose_faults.get(self.unit.index()) {
            let injected = faults
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                warn!(unit = %self.unit, addr = region.addr, "Injected expose failure");
                return Err(GasError::Transport(format!(
                    "unit {} failed to expose 0x{:x}",
                    self.unit, region.addr
                )));
            }
        }

        self.fabric
            .exposed
            .insert((self.unit, region.addr), region.len);
        debug!(unit = %self.unit, base = region.addr, len = region.len, "Region exposed");
        Ok(region.addr)
    }

    fn withdraw(&self, base: u64) -> GasResult<()> {
        match self.fabric.exposed.remove(&(self.unit, base)) {
            Some(_) => {
                debug!(unit = %self.unit, base, "Region withdrawn");
                Ok(())
            }
            None => Err(GasError::Transport(format!(
                "unit {} has nothing exposed at 0x{:x}",
                self.unit, base
            ))),
        }
    }
}
