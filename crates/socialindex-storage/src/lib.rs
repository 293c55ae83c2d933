//! socialindex-storage: storage backends for SocialIndex.
//!
//! Each backend implements both [`socialindex_core::HeightGate`] (write side)
//! and [`socialindex_core::Queries`] (read side).
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `postgres`: PostgreSQL via `sqlx` (feature `postgres`)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;
