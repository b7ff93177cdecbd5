//! Tombstone Cascade - eventually-consistent cascading deletion across
//! database silos.
//!
//! Rows in one silo may hold weak references to entities owned by another,
//! where no foreign key can reach. When such an entity is deleted its silo
//! records a tombstone; this crate scans tombstones and referencing rows in
//! bounded windows and applies each relation's cascade policy until both
//! sides converge.

pub mod backend;
pub mod cascade;
pub mod config;
pub mod metrics;
pub mod persistence;
pub mod registry;
pub mod server;
pub mod types;
pub mod worker;

#[cfg(test)]
pub mod test_utils;
