/*!
 * Segment Registration
 *
 * Collective registration of per-unit memory on a team, its inverse, and the
 * non-collective registration of a single unit's region.
 *
 * A collective registration runs three collectives on the team, in order:
 *
 * 1. all-reduce-max of a failure flag, so a member whose exposure failed
 *    takes every other member down with it instead of stranding them
 * 2. all-reduce-max of each member's next segment id
 * 3. all-gather of each member's exposed base
 */

use super::GlobalMemory;
use crate::core::types::{LocalHandle, SegmentId, Size, TeamId, Teardown};
use crate::core::{GasError, GasResult, IdSpace};
use crate::gptr::GlobalPointer;
use crate::monitoring::span_collective;
use crate::translation::SegmentEntry;
use crate::transport::CollectiveScope;
use tracing::{debug, info, warn};

impl GlobalMemory {
    /// Register this unit's `local` memory as its share of a new segment on `team`.
    ///
    /// Collective over `team`; members may pass regions of different sizes.
    /// Fails with `NotAllocated` if `local` is already registered.
    pub fn memregister(&self, team: TeamId, local: LocalHandle) -> GasResult<GlobalPointer> {
        self.register_collective(team, local, Ok(()))
    }

    /// Collective registration where the caller has already judged `local`.
    /// A rejected region still takes part so the other members fail with it.
    pub(crate) fn register_collective(
        &self,
        team: TeamId,
        local: LocalHandle,
        admissible: GasResult<()>,
    ) -> GasResult<GlobalPointer> {
        self.ensure_initialized()?;
        let span = span_collective("register", self.myid, team);
        let _entered = span.enter();
        let registered = self.register_on_team(team, local, admissible);
        span.record_result(registered.is_ok());
        registered
    }

    fn register_on_team(
        &self,
        team: TeamId,
        local: LocalHandle,
        admissible: GasResult<()>,
    ) -> GasResult<GlobalPointer> {
        let scope = self.teams.scope(team)?;

        let exposed = admissible
            .and_then(|_| self.precheck(&local))
            .and_then(|_| self.transport.expose(local));
        let failed = self
            .transport
            .allreduce_max(&scope, u64::from(exposed.is_err()))?;
        let exposed_base = match exposed {
            Ok(base) if failed == 0 => base,
            Ok(base) => {
                self.withdraw_quietly(base);
                warn!(unit = %self.myid, team = %team, "Registration aborted by another member");
                return Err(GasError::Transport(format!(
                    "registration on team {} aborted: a member failed to expose its share",
                    team
                )));
            }
            Err(e) => {
                warn!(unit = %self.myid, team = %team, error = %e, "Local share could not be exposed");
                return Err(e);
            }
        };

        let registered = self.agree_and_register(&scope, team, local, exposed_base);
        if registered.is_err() {
            self.withdraw_quietly(exposed_base);
        }
        registered
    }

    fn agree_and_register(
        &self,
        scope: &CollectiveScope,
        team: TeamId,
        local: LocalHandle,
        exposed_base: u64,
    ) -> GasResult<GlobalPointer> {
        let proposal = u64::from(self.segments.proposed_id().0);
        let agreed = self.transport.allreduce_max(scope, proposal)?;
        let id = u32::try_from(agreed)
            .map(SegmentId)
            .map_err(|_| GasError::OutOfIdentifiers(IdSpace::Segment))?;
        let bases = self.transport.allgather(scope, exposed_base)?;

        self.segments.register_agreed(SegmentEntry {
            id,
            owner: self.myid,
            team: Some(team),
            size: local.len,
            local,
            exposed_base,
            bases: Some(bases.into()),
        })?;

        debug!(unit = %self.myid, team = %team, segment = %id, nbytes = local.len, "Collective registration complete");
        Ok(GlobalPointer::new(self.myid, id, Some(team), 0))
    }

    /// Remove the segment `gptr` points into. The backing memory is untouched.
    ///
    /// After `finalize` this is a no-op reported as [`Teardown::ShutdownNoop`].
    pub fn memderegister(&self, gptr: GlobalPointer) -> GasResult<Teardown> {
        if !self.is_initialized() {
            debug!(unit = %self.myid, %gptr, "Deregistration after finalize ignored");
            return Ok(Teardown::ShutdownNoop);
        }
        if gptr.is_local_pool() {
            return Err(GasError::InvalidArgument(
                "the local pool cannot be deregistered".to_string(),
            ));
        }

        let entry = self.segments.entry(gptr.segment)?;
        if entry.team != gptr.team {
            return Err(GasError::InvalidArgument(format!(
                "{} does not match the team of segment {}",
                gptr, entry.id
            )));
        }
        self.withdraw_quietly(entry.exposed_base);
        self.segments.unregister(entry.id)
    }

    /// Register `local` under a fresh segment id known only to this unit. Not collective.
    pub fn register_local(&self, local: LocalHandle) -> GasResult<GlobalPointer> {
        self.ensure_initialized()?;
        self.precheck(&local)?;
        let exposed_base = self.transport.expose(local)?;

        match self
            .segments
            .register_local(self.myid, local.len, local, exposed_base)
        {
            Ok(id) => Ok(GlobalPointer::new(self.myid, id, None, 0)),
            Err(e) => {
                self.withdraw_quietly(exposed_base);
                Err(e)
            }
        }
    }

    /// Allocate `nbytes` of fresh memory on every member of `team` and register it.
    /// Collective over `team`; `nbytes` may differ per member.
    pub fn team_memalloc(&self, team: TeamId, nbytes: Size) -> GasResult<GlobalPointer> {
        self.ensure_initialized()?;
        let region = vec![0u8; nbytes].into_boxed_slice();
        let local = LocalHandle::new(region.as_ptr() as u64, nbytes);
        self.regions.lock().insert(local.addr, region);

        match self.memregister(team, local) {
            Ok(gptr) => {
                info!(unit = %self.myid, team = %team, segment = %gptr.segment, nbytes, "Team allocation");
                Ok(gptr)
            }
            Err(e) => {
                self.regions.lock().remove(&local.addr);
                Err(e)
            }
        }
    }

    /// Deregister and release memory obtained from [`team_memalloc`](Self::team_memalloc)
    pub fn team_memfree(&self, gptr: GlobalPointer) -> GasResult<Teardown> {
        if !self.is_initialized() {
            return Ok(Teardown::ShutdownNoop);
        }
        let local = self.segments.resolve(gptr.segment)?;
        let outcome = self.memderegister(gptr)?;
        self.regions.lock().remove(&local.addr);
        Ok(outcome)
    }

    fn precheck(&self, local: &LocalHandle) -> GasResult<()> {
        if local.len == 0 {
            return Err(GasError::InvalidArgument(
                "cannot register an empty region".to_string(),
            ));
        }
        if let Some(existing) = self.segments.find_overlapping(local) {
            warn!(unit = %self.myid, segment = %existing, addr = local.addr, len = local.len, "Region overlaps a registered segment");
            return Err(GasError::NotAllocated {
                addr: local.addr,
                len: local.len,
            });
        }
        Ok(())
    }

    fn withdraw_quietly(&self, base: u64) {
        if let Err(e) = self.transport.withdraw(base) {
            warn!(unit = %self.myid, base, error = %e, "Withdraw failed");
        }
    }
}
