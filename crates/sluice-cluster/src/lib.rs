//! Cluster topology for Sluice queries.
//!
//! This crate provides:
//!
//! - [`TopologyWatch`]: the read-only topology interface the query engine
//!   depends on (generation token, nodes per namespace, change signal).
//! - [`ClusterView`]: an in-process implementation that bumps the
//!   generation on every membership change.

mod state;
mod topology;


pub use state::{ClusterEvent, ClusterView, Member, MemberState};
pub use topology::TopologyWatch;
