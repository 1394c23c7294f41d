/*!
 * Multi-unit test harness
 * Runs one closure per unit, each on its own thread over a shared fabric
 */

#![allow(dead_code)]

use pgas_runtime::{GlobalMemory, LocalFabric, RuntimeConfig, UnitId};
use std::sync::Arc;
use std::thread;

pub fn small_config() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_local_pool_bytes(64 * 1024)
        .with_min_block_bytes(64)
        .with_max_teams(16)
}

/// Bring up `units` runtimes and run `f` on each; results are ordered by unit id
pub fn run_units<T, F>(units: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(UnitId, Arc<GlobalMemory>, Arc<LocalFabric>) -> T + Sync,
{
    run_units_with(units, small_config(), f)
}

/// [`run_units`] with every unit started from `config`
pub fn run_units_with<T, F>(units: usize, config: RuntimeConfig, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(UnitId, Arc<GlobalMemory>, Arc<LocalFabric>) -> T + Sync,
{
    let fabric = LocalFabric::new(units);
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = (0..units as u32)
            .map(|id| {
                let fabric = Arc::clone(&fabric);
                let config = config.clone();
                s.spawn(move || {
                    let unit = UnitId(id);
                    let transport = Arc::new(fabric.endpoint(unit).unwrap());
                    let memory = Arc::new(GlobalMemory::init(transport, config).unwrap());
                    f(unit, memory, fabric)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}
