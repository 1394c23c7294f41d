/*!
 * Durable Pool Tests
 * Regions persisted on detach come back on a later run and reattach collectively
 */

use crate::common::run_units;
use pgas_runtime::{
    AllocationState, DurablePool, GasError, GlobalAllocator, GlobalPointer, LocalMemorySource,
    TeamId, Teardown,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const POOL: &str = "checkpoint";

fn open(root: &Path, unit: u32) -> DurablePool {
    DurablePool::open(root.join(format!("unit-{}", unit)), POOL).unwrap()
}

fn payload(unit: u32, index: usize) -> Vec<u8> {
    format!("unit {} region {}", unit, index).into_bytes()
}

#[test]
fn test_regions_survive_restart_and_reattach() {
    let root = TempDir::new().unwrap();

    // First run: allocate two regions per unit, fill them and detach
    let first = run_units(2, |unit, memory, _| {
        let source = open(root.path(), unit.0);
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, source).unwrap();

        let mut shares: Vec<GlobalPointer> = Vec::new();
        for index in 0..2 {
            shares.push(alloc.allocate(64).unwrap());
            let (local, _) = alloc.get_local_pointers()[index];
            alloc.source_mut().write(local, 0, &payload(unit.0, index)).unwrap();
        }
        for (index, gptr) in shares.iter().enumerate() {
            assert_eq!(alloc.detach(*gptr), Ok(Teardown::Detached));
            let (local, _) = alloc.get_local_pointers()[index];
            assert_eq!(alloc.state(&local), AllocationState::Deregistered);
        }
        drop(alloc);
        memory.finalize().unwrap();
        shares.iter().map(|gptr| gptr.segment).collect::<Vec<_>>()
    });
    assert_eq!(first[0], first[1]);

    // Second run: fresh runtimes over the same directories
    let second = run_units(2, |unit, memory, _| {
        let source = open(root.path(), unit.0);
        assert_eq!(source.bucket_count(), 2);
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, source).unwrap();

        let attached = alloc.reattach_all().unwrap();
        assert_eq!(attached.len(), 2);

        let held = alloc.get_local_pointers();
        for (index, (local, len)) in held.iter().enumerate() {
            assert_eq!(*len, 64);
            assert_eq!(alloc.state(local), AllocationState::GloballyRegistered);
            let expected = payload(unit.0, index);
            let bytes = alloc.source().read(*local, 0, expected.len()).unwrap();
            assert_eq!(bytes, expected);
        }

        alloc.clear().unwrap();
        attached.iter().map(|gptr| gptr.segment).collect::<Vec<_>>()
    });
    assert_eq!(second[0], second[1]);
}

#[test]
fn test_reattach_rejects_uneven_recovery() {
    let root = TempDir::new().unwrap();

    // Only unit 0 leaves a region behind
    run_units(2, |unit, memory, _| {
        let source = open(root.path(), unit.0);
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, source).unwrap();
        let gptr = alloc.allocate(128).unwrap();
        alloc.detach(gptr).unwrap();
        if unit.0 == 1 {
            let (local, _) = alloc.get_local_pointers()[0];
            alloc.source_mut().release(local).unwrap();
        }
        drop(alloc);
        memory.finalize().unwrap();
    });

    run_units(2, |unit, memory, _| {
        let source = open(root.path(), unit.0);
        assert_eq!(source.bucket_count(), if unit.0 == 0 { 1 } else { 0 });
        let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, source).unwrap();
        let err = alloc.reattach_all().unwrap_err();
        assert!(matches!(err, GasError::InvalidArgument(_)), "unit {} got {:?}", unit, err);
        assert!(memory.segments().is_empty());
    });
}
