/*!
 * Collective Allocation Scenarios
 * Four-unit allocations, rollback on transport faults and teardown
 */

use crate::common::run_units;
use pgas_runtime::{
    AllocationState, GasError, GlobalAllocator, GlobalPointer, Group, LocalRank, PoolSource,
    SegmentId, TeamId, Teardown, UnitId,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const SHARES: [usize; 4] = [1024, 1024, 512, 256];

fn scratch() -> PoolSource {
    PoolSource::new("scratch", 16 * 1024, 64).unwrap()
}

#[test]
fn test_four_units_share_one_segment() {
    let results = run_units(4, |unit, memory, _| {
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, scratch()).unwrap();
        let nbytes = SHARES[unit.index()];
        let gptr = alloc.allocate(nbytes).unwrap();

        assert_eq!(gptr.unit, unit);
        assert_eq!(gptr.team, Some(TeamId::ALL));
        assert_eq!(gptr.offset, 0);
        let local = memory.segments().resolve(gptr.segment).unwrap();
        assert!(local.len >= nbytes);
        assert_eq!(memory.team_size(TeamId::ALL).unwrap(), 4);

        // Any member can name unit 0's share without asking it
        let peer = memory.gptr_for_rank(gptr, LocalRank(0)).unwrap();
        assert_eq!(peer, GlobalPointer::new(UnitId(0), gptr.segment, Some(TeamId::ALL), 0));
        let descriptor = memory.remote_descriptor(peer).unwrap();

        (gptr, local.addr, descriptor.base)
    });

    let segment = results[0].0.segment;
    assert!(results.iter().all(|(gptr, _, _)| gptr.segment == segment));
    assert_ne!(segment, SegmentId::LOCAL_POOL);

    let mut pointers: Vec<GlobalPointer> = results.iter().map(|(gptr, _, _)| *gptr).collect();
    pointers.dedup();
    assert_eq!(pointers.len(), 4);

    // Unit 0's share is exposed at its own local address
    let unit_zero_addr = results[0].1;
    assert!(results.iter().all(|(_, _, base)| *base == unit_zero_addr));
}

#[test]
fn test_detach_twice_and_resolve_after_detach() {
    run_units(2, |_, memory, _| {
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, scratch()).unwrap();
        let gptr = alloc.allocate(300).unwrap();

        assert_eq!(alloc.detach(gptr), Ok(Teardown::Detached));
        assert_eq!(alloc.detach(gptr), Err(GasError::UnknownSegment(gptr.segment)));
        assert_eq!(
            memory.segments().resolve(gptr.segment),
            Err(GasError::UnknownSegment(gptr.segment))
        );
    });
}

#[test]
fn test_attach_fault_releases_local_memory() {
    let states = run_units(4, |unit, memory, fabric| {
        let source = PoolSource::new("tight", 4096, 64).unwrap();
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, source).unwrap();

        if unit == UnitId(1) {
            fabric.fail_next_expose(unit);
        }
        let err = alloc.allocate(4096).unwrap_err();
        assert!(matches!(err, GasError::Transport(_)), "unit {} got {:?}", unit, err);
        assert!(memory.segments().is_empty());
        assert_eq!(fabric.exposed_count(unit), 1);

        // The whole pool is free again
        let local = alloc.allocate_local(4096).unwrap();
        alloc.state(&local)
    });
    assert!(states.iter().all(|s| *s == AllocationState::LocalReserved));
}

#[test]
fn test_one_unit_exhausted_fails_everyone() {
    run_units(3, |unit, memory, _| {
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, scratch()).unwrap();
        let nbytes = if unit == UnitId(2) { 1 << 20 } else { 128 };
        let err = alloc.allocate(nbytes).unwrap_err();
        if unit == UnitId(2) {
            assert!(matches!(err, GasError::PoolExhausted { .. }));
        } else {
            assert!(matches!(err, GasError::Transport(_)));
        }
        assert_eq!(alloc.source().stats().used, 0);

        // Still in step: the next collective allocation succeeds everywhere
        alloc.allocate(128).unwrap();
    });
}

#[test]
fn test_allocation_on_split_team() {
    let results = run_units(4, |unit, memory, _| {
        let groups = Group::all(4).split(2);
        let mut team = None;
        for group in &groups {
            if let Some(created) = memory.team_create(TeamId::ALL, group).unwrap() {
                team = Some(created);
            }
        }
        let team = team.unwrap();

        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), team, scratch()).unwrap();
        let gptr = alloc.allocate(64).unwrap();
        assert_eq!(gptr.team, Some(team));

        let partner_rank = LocalRank(1 - memory.team_myid(team).unwrap().0);
        let partner = memory.gptr_for_rank(gptr, partner_rank).unwrap();
        assert_ne!(partner.unit, unit);
        assert!(memory.gptr_for_rank(gptr, LocalRank(2)).is_err());

        assert_eq!(alloc.deallocate(gptr), Ok(Teardown::Detached));
        drop(alloc);
        memory.team_destroy(team).unwrap();
        (unit, partner.unit)
    });

    assert_eq!(
        results,
        vec![
            (UnitId(0), UnitId(1)),
            (UnitId(1), UnitId(0)),
            (UnitId(2), UnitId(3)),
            (UnitId(3), UnitId(2)),
        ]
    );
}

#[test]
fn test_teardown_after_finalize_is_noop() {
    run_units(2, |_, memory, _| {
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, scratch()).unwrap();
        let gptr = alloc.allocate(64).unwrap();
        let pool_ptr = memory.memalloc(64).unwrap();

        memory.finalize().unwrap();

        assert_eq!(alloc.detach(gptr), Ok(Teardown::ShutdownNoop));
        assert_eq!(alloc.deallocate(gptr), Ok(Teardown::ShutdownNoop));
        assert_eq!(memory.memderegister(gptr), Ok(Teardown::ShutdownNoop));
        assert_eq!(memory.memalloc(64), Err(GasError::NotInitialized));
        assert_eq!(memory.memfree(pool_ptr), Err(GasError::NotInitialized));
        assert!(matches!(
            GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, scratch()),
            Err(GasError::NotInitialized)
        ));
    });
}
