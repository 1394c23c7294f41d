/*!
 * PGAS Simulator - Main Entry Point
 *
 * Runs `PGAS_UNITS` units (default 4) as threads over an in-process fabric
 * and drives one collective allocation, a root-team split and teardown on
 * each of them.
 */

use anyhow::{anyhow, Context};
use std::sync::Arc;
use tracing::{error, info};

use pgas_runtime::{
    init_tracing, GlobalAllocator, GlobalMemory, GlobalPointer, Group, LocalFabric, LocalRank,
    PoolSource, RuntimeConfig, TeamId, Teardown, UnitId,
};

const ENV_UNITS: &str = "PGAS_UNITS";
const DEFAULT_UNITS: usize = 4;

/// Bytes each unit contributes to the shared segment, by unit id
const SHARE_SIZES: [usize; 5] = [1024, 1024, 512, 256, 2048];

/// What one unit observed
#[derive(Debug)]
struct UnitReport {
    unit: UnitId,
    share: GlobalPointer,
    root_size: usize,
    split_team: TeamId,
    split_size: usize,
    peer_zero: GlobalPointer,
}

fn run_unit(fabric: Arc<LocalFabric>, unit: UnitId, config: RuntimeConfig) -> anyhow::Result<UnitReport> {
    let transport = Arc::new(fabric.endpoint(unit)?);
    let memory = Arc::new(GlobalMemory::init(transport, config.clone())?);
    let units = memory.size();

    let source = PoolSource::new("sim", config.local_pool_bytes, config.min_block_bytes)?;
    let mut alloc = GlobalAllocator::new(Arc::clone(&memory), TeamId::ALL, source)?;

    let nbytes = SHARE_SIZES[unit.index() % SHARE_SIZES.len()];
    let share = alloc.allocate(nbytes)?;
    let peer_zero = memory.gptr_for_rank(share, LocalRank(0))?;
    let descriptor = memory.remote_descriptor(peer_zero)?;
    info!(%unit, %share, nbytes, peer = %descriptor, "Shared segment allocated");

    let root_size = memory.team_size(TeamId::ALL)?;
    let groups = Group::all(units).split(2);
    let mut split_team = None;
    for group in groups.iter().filter(|g| !g.is_empty()) {
        if let Some(team) = memory.team_create(TeamId::ALL, group)? {
            split_team = Some(team);
        }
    }
    let split_team = split_team.ok_or_else(|| anyhow!("unit {} joined no split team", unit))?;
    let split_size = memory.team_size(split_team)?;
    memory.team_destroy(split_team)?;

    match alloc.deallocate(share)? {
        Teardown::Detached => {}
        Teardown::ShutdownNoop => return Err(anyhow!("runtime finalized before deallocate")),
    }
    drop(alloc);
    memory.finalize()?;

    Ok(UnitReport {
        unit,
        share,
        root_size,
        split_team,
        split_size,
        peer_zero,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env();
    init_tracing(config.trace_json);

    let units = match std::env::var(ENV_UNITS) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("{} must be a unit count, got '{}'", ENV_UNITS, raw))?,
        Err(_) => DEFAULT_UNITS,
    };
    if units == 0 {
        return Err(anyhow!("{} must be at least 1", ENV_UNITS));
    }

    info!(units, pool_bytes = config.local_pool_bytes, "PGAS simulator starting");
    let fabric = LocalFabric::new(units);

    let handles: Vec<_> = (0..units as u32)
        .map(|id| {
            let fabric = Arc::clone(&fabric);
            let config = config.clone();
            tokio::task::spawn_blocking(move || run_unit(fabric, UnitId(id), config))
        })
        .collect();

    let mut reports = Vec::with_capacity(units);
    for handle in handles {
        match handle.await? {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(error = %e, "Unit failed");
                return Err(e);
            }
        }
    }

    let segment = reports[0].share.segment;
    if reports.iter().any(|r| r.share.segment != segment) {
        return Err(anyhow!("units disagree on the shared segment id"));
    }
    let split_total: usize = {
        let mut seen: Vec<(TeamId, usize)> = reports.iter().map(|r| (r.split_team, r.split_size)).collect();
        seen.sort();
        seen.dedup();
        seen.iter().map(|(_, size)| size).sum()
    };

    for report in &reports {
        info!(
            unit = %report.unit,
            share = %report.share,
            peer_zero = %report.peer_zero,
            root_size = report.root_size,
            team = %report.split_team,
            team_size = report.split_size,
            "Unit report"
        );
    }
    info!(units, %segment, split_total, "PGAS simulator finished");
    Ok(())
}
