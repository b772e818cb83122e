//! Store adapters: the three roles behind the composite repository.
//!
//! [`traits`] defines the contracts; [`memory`] implements all three in
//! process, [`sql`] backs the primary with a relational database, and
//! [`redis`]/[`document`] back the cache and secondary roles with Redis.

pub mod document;
pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
