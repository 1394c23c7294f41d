/*!
 * System Limits and Constants
 *
 * Centralized location for the limits and defaults of the global address space.
 */

// =============================================================================
// LOCAL POOL
// =============================================================================

/// Default size of the per-unit local allocation pool (16MB)
pub const DEFAULT_LOCAL_POOL: usize = 16 * 1024 * 1024;

/// Smallest block the buddy allocator hands out (64 bytes)
/// Requests below this are rounded up to one minimum block
pub const DEFAULT_MIN_BLOCK: usize = 64;

/// Upper bound on buddy orders (2^48 bytes)
pub const MAX_BUDDY_ORDER: u32 = 48;

// =============================================================================
// TEAMS
// =============================================================================

/// Number of team slots per unit, including the root team
pub const DEFAULT_MAX_TEAMS: usize = 256;

/// First id handed out to a team created by splitting
pub const FIRST_SPLIT_TEAM_ID: u16 = 1;

// =============================================================================
// SEGMENTS
// =============================================================================

/// First id handed out to a registered segment (0 is the local pool)
pub const FIRST_SEGMENT_ID: u32 = 1;

// =============================================================================
// DURABLE POOL
// =============================================================================

/// Name of the bucket index file inside a durable pool directory
pub const DURABLE_INDEX_FILE: &str = "index.bin";
