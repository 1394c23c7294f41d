/*!
 * Core Module
 * Identifiers, errors, limits and configuration shared by every subsystem
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod types;

pub use config::RuntimeConfig;
pub use errors::{GasError, GasResult, IdSpace, Membership};
pub use types::{LocalHandle, LocalRank, Offset, SegmentId, Size, TeamId, Teardown, UnitId};
