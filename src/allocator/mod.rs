/*!
 * Global Allocator
 *
 * Facade that turns memory from a [`LocalMemorySource`] into globally
 * addressable segments on one team. Every region it hands out moves through
 *
 * ```text
 * Unallocated -> LocalReserved -> GloballyRegistered -> Deregistered -> Freed
 * ```
 *
 * `attach`, `detach`, `allocate`, `deallocate`, `reattach_all` and `clear` are
 * collective over the allocator's team. `allocate_local` and the queries are not.
 *
 * After the runtime is finalized, `detach` and `deallocate` report
 * [`Teardown::ShutdownNoop`] and leave every region untouched.
 */

mod durable;
mod source;

pub use durable::DurablePool;
pub use source::{LocalMemorySource, PoolSource};

use crate::core::types::{LocalHandle, Size, TeamId, Teardown};
use crate::core::{GasError, GasResult};
use crate::gptr::GlobalPointer;
use crate::runtime::GlobalMemory;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of one region handed out by a [`GlobalAllocator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationState {
    Unallocated,
    LocalReserved,
    GloballyRegistered,
    Deregistered,
    Freed,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    local: LocalHandle,
    state: AllocationState,
    gptr: Option<GlobalPointer>,
    // Order in which the region was handed out
    seq: u64,
}

/// Allocator of globally addressable memory on one team
pub struct GlobalAllocator<S: LocalMemorySource> {
    memory: Arc<GlobalMemory>,
    team: TeamId,
    source: S,
    // Region address -> bucket
    buckets: AHashMap<u64, Bucket>,
    next_seq: u64,
}

impl<S: LocalMemorySource> GlobalAllocator<S> {
    pub fn new(memory: Arc<GlobalMemory>, team: TeamId, source: S) -> GasResult<Self> {
        if !memory.is_initialized() {
            return Err(GasError::NotInitialized);
        }
        if !memory.teams().contains(team) {
            return Err(GasError::InvalidTeam(team));
        }
        info!(
            unit = %memory.myid(),
            team = %team,
            pool = source.pool_id(),
            "Global allocator created"
        );
        Ok(Self {
            memory,
            team,
            source,
            buckets: AHashMap::new(),
            next_seq: 0,
        })
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn pool_id(&self) -> &str {
        self.source.pool_id()
    }

    pub fn memory(&self) -> &Arc<GlobalMemory> {
        &self.memory
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Where `local` stands in its lifecycle
    pub fn state(&self, local: &LocalHandle) -> AllocationState {
        self.buckets
            .get(&local.addr)
            .map(|bucket| bucket.state)
            .unwrap_or(AllocationState::Unallocated)
    }

    /// Reserve `nbytes` of local memory. Not collective.
    pub fn allocate_local(&mut self, nbytes: Size) -> GasResult<LocalHandle> {
        let local = self.source.allocate(nbytes)?;
        self.track(local);
        debug!(unit = %self.memory.myid(), nbytes, addr = local.addr, "Local region reserved");
        Ok(local)
    }

    fn track(&mut self, local: LocalHandle) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buckets.insert(
            local.addr,
            Bucket {
                local,
                state: AllocationState::LocalReserved,
                gptr: None,
                seq,
            },
        );
    }

    /// Register the first `nbytes` of `local` on the allocator's team
    pub fn attach(&mut self, local: LocalHandle, nbytes: Size) -> GasResult<GlobalPointer> {
        let admissible = self.admissible(&local, nbytes);
        let region = LocalHandle::new(local.addr, nbytes);
        let gptr = self
            .memory
            .register_collective(self.team, region, admissible)?;

        if let Some(bucket) = self.buckets.get_mut(&local.addr) {
            bucket.state = AllocationState::GloballyRegistered;
            bucket.gptr = Some(gptr);
        }
        info!(
            unit = %self.memory.myid(),
            team = %self.team,
            segment = %gptr.segment,
            nbytes,
            "Region attached"
        );
        Ok(gptr)
    }

    fn admissible(&self, local: &LocalHandle, nbytes: Size) -> GasResult<()> {
        let not_allocated = GasError::NotAllocated {
            addr: local.addr,
            len: local.len,
        };
        let bucket = self.buckets.get(&local.addr).ok_or_else(|| not_allocated.clone())?;
        match bucket.state {
            AllocationState::LocalReserved | AllocationState::Deregistered => {}
            _ => return Err(not_allocated),
        }
        if nbytes == 0 || nbytes > bucket.local.len {
            return Err(GasError::InvalidArgument(format!(
                "cannot attach {} bytes of a {}-byte region",
                nbytes, bucket.local.len
            )));
        }
        Ok(())
    }

    /// Unregister the segment behind `gptr`, keeping its memory. Persists the
    /// region first when the source is durable.
    pub fn detach(&mut self, gptr: GlobalPointer) -> GasResult<Teardown> {
        if !self.memory.is_initialized() {
            debug!(unit = %self.memory.myid(), %gptr, "Detach after finalize ignored");
            return Ok(Teardown::ShutdownNoop);
        }
        let Some(local) = self.registered(&gptr) else {
            warn!(unit = %self.memory.myid(), %gptr, "Detach of a segment this allocator does not hold");
            return Err(GasError::UnknownSegment(gptr.segment));
        };

        self.source.persist(local)?;
        let outcome = self.memory.memderegister(gptr)?;

        if let Some(bucket) = self.buckets.get_mut(&local.addr) {
            bucket.state = AllocationState::Deregistered;
            bucket.gptr = None;
        }
        info!(unit = %self.memory.myid(), segment = %gptr.segment, "Region detached");
        Ok(outcome)
    }

    /// Region registered as the segment `gptr` points into
    fn registered(&self, gptr: &GlobalPointer) -> Option<LocalHandle> {
        self.buckets
            .values()
            .find(|bucket| {
                bucket
                    .gptr
                    .map(|registered| registered.segment == gptr.segment)
                    .unwrap_or(false)
            })
            .map(|bucket| bucket.local)
    }

    /// Reserve and attach `nbytes`. On failure the reservation is released
    /// before the error is returned.
    pub fn allocate(&mut self, nbytes: Size) -> GasResult<GlobalPointer> {
        let local = match self.allocate_local(nbytes) {
            Ok(local) => local,
            Err(e) => {
                // Still take part so the other members fail with us
                let placeholder = LocalHandle::new(0, nbytes);
                return self.memory.register_collective(self.team, placeholder, Err(e));
            }
        };

        match self.attach(local, nbytes) {
            Ok(gptr) => Ok(gptr),
            Err(e) => {
                warn!(unit = %self.memory.myid(), nbytes, error = %e, "Attach failed, releasing reservation");
                if let Err(release) = self.release(local) {
                    error!(
                        unit = %self.memory.myid(),
                        addr = local.addr,
                        error = %release,
                        "Reservation could not be released after a failed attach"
                    );
                }
                Err(e)
            }
        }
    }

    /// Detach `gptr` and release its memory
    pub fn deallocate(&mut self, gptr: GlobalPointer) -> GasResult<Teardown> {
        if !self.memory.is_initialized() {
            debug!(unit = %self.memory.myid(), %gptr, "Deallocate after finalize ignored");
            return Ok(Teardown::ShutdownNoop);
        }
        let Some(local) = self.registered(&gptr) else {
            return Err(GasError::UnknownSegment(gptr.segment));
        };
        let outcome = self.detach(gptr)?;
        self.release(local)?;
        Ok(outcome)
    }

    fn release(&mut self, local: LocalHandle) -> GasResult<()> {
        self.source.release(local)?;
        if let Some(bucket) = self.buckets.get_mut(&local.addr) {
            bucket.state = AllocationState::Freed;
            bucket.gptr = None;
        }
        Ok(())
    }

    /// Attach every region recovered by the source and every region still
    /// detached, in the order they were handed out.
    ///
    /// Collective; all members must hold the same number of such regions.
    pub fn reattach_all(&mut self) -> GasResult<Vec<GlobalPointer>> {
        for local in self.source.recover()? {
            self.track(local);
        }

        let mut pending: Vec<Bucket> = self
            .buckets
            .values()
            .filter(|b| {
                matches!(
                    b.state,
                    AllocationState::LocalReserved | AllocationState::Deregistered
                )
            })
            .copied()
            .collect();
        pending.sort_by_key(|b| b.seq);

        let scope = self.memory.teams().scope(self.team)?;
        let transport = self.memory.transport();
        let count = pending.len() as u64;
        let most = transport.allreduce_max(&scope, count)?;
        let fewest = u64::MAX - transport.allreduce_max(&scope, u64::MAX - count)?;
        if most != fewest {
            error!(
                unit = %self.memory.myid(),
                team = %self.team,
                mine = count,
                most,
                fewest,
                "Members disagree on the number of regions to reattach"
            );
            return Err(GasError::InvalidArgument(format!(
                "members hold between {} and {} regions to reattach",
                fewest, most
            )));
        }

        let mut attached = Vec::with_capacity(pending.len());
        for bucket in pending {
            attached.push(self.attach(bucket.local, bucket.local.len)?);
        }
        info!(unit = %self.memory.myid(), team = %self.team, count = attached.len(), "Regions reattached");
        Ok(attached)
    }

    /// Detach every registered region, in the order they were handed out
    pub fn clear(&mut self) -> GasResult<()> {
        let mut registered: Vec<(u64, GlobalPointer)> = self
            .buckets
            .values()
            .filter_map(|b| b.gptr.map(|gptr| (b.seq, gptr)))
            .collect();
        registered.sort_by_key(|(seq, _)| *seq);

        for (_, gptr) in registered {
            self.detach(gptr)?;
        }
        Ok(())
    }

    /// Every region the allocator holds, with its size
    pub fn get_local_pointers(&self) -> Vec<(LocalHandle, Size)> {
        let mut held: Vec<&Bucket> = self
            .buckets
            .values()
            .filter(|b| b.state != AllocationState::Freed)
            .collect();
        held.sort_by_key(|b| b.seq);
        held.into_iter().map(|b| (b.local, b.local.len)).collect()
    }
}

impl<S: LocalMemorySource> Drop for GlobalAllocator<S> {
    fn drop(&mut self) {
        if !self.memory.is_initialized() {
            return;
        }
        if let Err(e) = self.clear() {
            error!(unit = %self.memory.myid(), team = %self.team, error = %e, "Detach on drop failed");
        }
    }
}

impl<S: LocalMemorySource, T: LocalMemorySource> PartialEq<GlobalAllocator<T>> for GlobalAllocator<S> {
    fn eq(&self, other: &GlobalAllocator<T>) -> bool {
        self.team == other.team && self.pool_id() == other.pool_id()
    }
}

impl<S: LocalMemorySource> Eq for GlobalAllocator<S> {}
