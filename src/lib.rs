/*!
 * PGAS Runtime Library
 * Global address space management over a pluggable transport
 */

pub mod allocator;
pub mod buddy;
pub mod core;
pub mod gptr;
pub mod monitoring;
pub mod runtime;
pub mod team;
pub mod translation;
pub mod transport;

// Re-exports
pub use crate::core::{
    GasError, GasResult, IdSpace, LocalHandle, LocalRank, Membership, Offset, RuntimeConfig,
    SegmentId, Size, TeamId, Teardown, UnitId,
};
pub use allocator::{AllocationState, DurablePool, GlobalAllocator, LocalMemorySource, PoolSource};
pub use buddy::{BuddyAllocator, PoolStats};
pub use gptr::GlobalPointer;
pub use monitoring::init_tracing;
pub use runtime::{GlobalMemory, RemoteDescriptor};
pub use team::{Group, Team, TeamManager};
pub use translation::{SegmentEntry, TranslationTable};
pub use transport::{CollectiveScope, LocalFabric, LocalTransport, Transport};
