/*!
 * Teams
 *
 * A team is an ordered subset of units with its own rank numbering. Teams are
 * created collectively by splitting a parent team and destroyed collectively
 * by their members. Team ids are negotiated by all-reduce-max over the parent
 * and are never handed out twice; the slot a team occupies is recycled after
 * it is destroyed.
 */

mod group;
mod manager;

pub use group::Group;
pub use manager::{Team, TeamManager};
