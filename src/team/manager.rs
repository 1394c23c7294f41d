/*!
 * Team Manager
 * Live teams of one unit, stored in a fixed arena of slots with a free list
 */

use super::group::Group;
use crate::core::types::{LocalRank, TeamId, UnitId};
use crate::core::{GasError, GasResult, IdSpace};
use crate::monitoring::span_collective;
use crate::transport::{CollectiveScope, Transport};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::limits::FIRST_SPLIT_TEAM_ID;

/// One team as known by the local unit
#[derive(Debug, Clone)]
pub struct Team {
    id: TeamId,
    parent: Option<TeamId>,
    group: Group,
    local_to_global: Arc<[UnitId]>,
    global_to_local: AHashMap<UnitId, LocalRank>,
}

impl Team {
    fn new(id: TeamId, parent: Option<TeamId>, group: Group) -> Self {
        let local_to_global: Arc<[UnitId]> = group.members().into();
        let global_to_local = local_to_global
            .iter()
            .enumerate()
            .map(|(rank, &unit)| (unit, LocalRank(rank as u32)))
            .collect();
        Self {
            id,
            parent,
            group,
            local_to_global,
            global_to_local,
        }
    }

    pub fn id(&self) -> TeamId {
        self.id
    }

    pub fn parent(&self) -> Option<TeamId> {
        self.parent
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn size(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn unit_at(&self, rank: LocalRank) -> Option<UnitId> {
        self.local_to_global.get(rank.index()).copied()
    }

    pub fn rank_of(&self, unit: UnitId) -> Option<LocalRank> {
        self.global_to_local.get(&unit).copied()
    }
}

#[derive(Debug)]
struct TeamTable {
    slots: Vec<Option<Team>>,
    free: Vec<usize>,
    by_id: AHashMap<TeamId, usize>,
    capacity: usize,
}

impl TeamTable {
    fn get(&self, id: TeamId) -> Option<&Team> {
        self.by_id
            .get(&id)
            .and_then(|&slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    fn insert(&mut self, team: Team) -> GasResult<usize> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(GasError::OutOfIdentifiers(IdSpace::TeamSlot)),
        };
        self.by_id.insert(team.id, slot);
        self.slots[slot] = Some(team);
        Ok(slot)
    }

    fn has_free_slot(&self) -> bool {
        !self.free.is_empty() || self.slots.len() < self.capacity
    }

    fn remove(&mut self, id: TeamId) -> Option<(usize, Team)> {
        let slot = self.by_id.remove(&id)?;
        let team = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some((slot, team))
    }
}

/// Team registry of one unit
///
/// The root team ([`TeamId::ALL`]) is created with the manager, maps ranks to
/// units by identity and cannot be destroyed.
pub struct TeamManager {
    transport: Arc<dyn Transport>,
    myid: UnitId,
    world_size: usize,
    table: RwLock<TeamTable>,
    // Next team id this unit would propose
    next_team_id: AtomicU32,
}

impl TeamManager {
    pub fn new(transport: Arc<dyn Transport>, max_teams: usize) -> Self {
        let myid = transport.myid();
        let world_size = transport.size();

        let mut table = TeamTable {
            slots: Vec::with_capacity(max_teams.min(64)),
            free: Vec::new(),
            by_id: AHashMap::new(),
            capacity: max_teams.max(1),
        };
        // The first slot always exists, so the root team always fits
        if let Err(e) = table.insert(Team::new(TeamId::ALL, None, Group::all(world_size))) {
            warn!(unit = %myid, error = %e, "Root team could not be stored");
        }

        info!(unit = %myid, world_size, max_teams, "Team manager initialized");

        Self {
            transport,
            myid,
            world_size,
            table: RwLock::new(table),
            next_team_id: AtomicU32::new(FIRST_SPLIT_TEAM_ID as u32),
        }
    }

    pub fn myid(&self) -> UnitId {
        self.myid
    }

    /// Number of units in the root team
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Create a team from `group`, a subset of `parent`.
    ///
    /// Collective over `parent`: every member calls with the same group. Units
    /// outside `group` take part in id negotiation and get `Ok(None)`.
    pub fn create(&self, parent: TeamId, group: &Group) -> GasResult<Option<TeamId>> {
        let span = span_collective("team_create", self.myid, parent);
        let _entered = span.enter();
        let created = self.create_from(parent, group);
        span.record_result(created.is_ok());
        created
    }

    fn create_from(&self, parent: TeamId, group: &Group) -> GasResult<Option<TeamId>> {
        let scope = self.scope(parent)?;
        if group.is_empty() {
            return Err(GasError::InvalidArgument(
                "cannot create a team from an empty group".to_string(),
            ));
        }
        if !group.is_subset_of(&self.group(parent)?) {
            return Err(GasError::InvalidArgument(format!(
                "group {:?} is not a subset of team {}",
                group.members(),
                parent
            )));
        }

        // Members without a free slot abort the creation on every member
        let member = group.is_member(self.myid);
        let short = member && !self.table.read().has_free_slot();
        if self.transport.allreduce_max(&scope, u64::from(short))? != 0 {
            warn!(unit = %self.myid, parent = %parent, short, "Team creation aborted, a member has no free slot");
            return Err(GasError::OutOfIdentifiers(IdSpace::TeamSlot));
        }

        let proposal = self.next_team_id.load(Ordering::SeqCst) as u64;
        let agreed = self.transport.allreduce_max(&scope, proposal)?;
        let id = u16::try_from(agreed)
            .map(TeamId)
            .map_err(|_| GasError::OutOfIdentifiers(IdSpace::Team))?;
        self.next_team_id
            .fetch_max(agreed as u32 + 1, Ordering::SeqCst);

        if !member {
            debug!(unit = %self.myid, team = %id, "Not a member of the new team");
            return Ok(None);
        }

        let slot = self
            .table
            .write()
            .insert(Team::new(id, Some(parent), group.clone()))?;

        info!(
            unit = %self.myid,
            team = %id,
            parent = %parent,
            slot,
            size = group.size(),
            "Team created"
        );
        Ok(Some(id))
    }

    /// Destroy `team`. Collective over its members; the slot is recycled once
    /// every member has arrived.
    pub fn destroy(&self, team: TeamId) -> GasResult<()> {
        if team == TeamId::ALL {
            return Err(GasError::InvalidArgument(
                "the root team cannot be destroyed".to_string(),
            ));
        }
        let scope = self.scope(team)?;
        {
            let _span = span_collective("team_destroy", self.myid, team);
            self.transport.barrier(&scope)?;
        }

        match self.table.write().remove(team) {
            Some((slot, _)) => {
                info!(unit = %self.myid, team = %team, slot, "Team destroyed, slot recycled");
                Ok(())
            }
            None => {
                warn!(unit = %self.myid, team = %team, "Team vanished during destroy");
                Err(GasError::InvalidTeam(team))
            }
        }
    }

    /// Global id of `rank` in `team`
    pub fn unit_l2g(&self, team: TeamId, rank: LocalRank) -> GasResult<UnitId> {
        if team == TeamId::ALL {
            return Ok(UnitId(rank.0));
        }
        let table = self.table.read();
        let entry = table.get(team).ok_or(GasError::InvalidTeam(team))?;
        entry
            .unit_at(rank)
            .ok_or_else(|| GasError::not_member_rank(team, rank))
    }

    /// Rank of `unit` in `team`
    pub fn unit_g2l(&self, team: TeamId, unit: UnitId) -> GasResult<LocalRank> {
        if team == TeamId::ALL {
            return Ok(LocalRank(unit.0));
        }
        let table = self.table.read();
        let entry = table.get(team).ok_or(GasError::InvalidTeam(team))?;
        entry
            .rank_of(unit)
            .ok_or_else(|| GasError::not_member_unit(team, unit))
    }

    /// Rank of the calling unit in `team`
    pub fn team_myid(&self, team: TeamId) -> GasResult<LocalRank> {
        self.unit_g2l(team, self.myid)
    }

    pub fn size(&self, team: TeamId) -> GasResult<usize> {
        if team == TeamId::ALL {
            return Ok(self.world_size);
        }
        self.with_team(team, Team::size)
    }

    pub fn group(&self, team: TeamId) -> GasResult<Group> {
        self.with_team(team, |t| t.group().clone())
    }

    pub fn parent(&self, team: TeamId) -> GasResult<Option<TeamId>> {
        self.with_team(team, Team::parent)
    }

    pub fn contains(&self, team: TeamId) -> bool {
        self.table.read().get(team).is_some()
    }

    /// Ids of every team this unit belongs to, ascending
    pub fn teams(&self) -> Vec<TeamId> {
        let mut ids: Vec<TeamId> = self.table.read().by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Participants of a collective on `team` from this unit's point of view
    pub fn scope(&self, team: TeamId) -> GasResult<CollectiveScope> {
        let table = self.table.read();
        let entry = table.get(team).ok_or(GasError::InvalidTeam(team))?;
        let rank = entry
            .rank_of(self.myid)
            .ok_or_else(|| GasError::not_member_unit(team, self.myid))?;
        Ok(CollectiveScope {
            team,
            members: Arc::clone(&entry.local_to_global),
            rank,
        })
    }

    fn with_team<T>(&self, team: TeamId, f: impl FnOnce(&Team) -> T) -> GasResult<T> {
        let table = self.table.read();
        table.get(team).map(f).ok_or(GasError::InvalidTeam(team))
    }
}
