//! socialindex-core: foundation of the social-network chain indexer.
//!
//! # Architecture
//!
//! ```text
//! BlockSource ──► Consumer ──► HeightGate::apply_block
//!                                  ├── lock + height check
//!                                  ├── HandlerRegistry::dispatch ──► Mutations
//!                                  ├── advance height, refresh views
//!                                  └── commit / rollback
//!
//! Queries (read API) ◄── committed snapshot
//! ```
//!
//! Storage backends (memory, Postgres) live in `socialindex-storage`.

pub mod consumer;
pub mod error;
pub mod gate;
pub mod handler;
pub mod indexer;
pub mod logging;
pub mod pdv;
pub mod query;
pub mod source;
pub mod stats;
pub mod types;

pub use consumer::Consumer;
pub use error::IndexerError;
pub use gate::{HeightGate, Mutations};
pub use handler::{BlockContext, HandlerRegistry, MessageHandler};
pub use indexer::{IndexerBuilder, IndexerConfig, PostgresOptions};
pub use logging::{init_tracing, LogConfig};
pub use query::{ListPostsParams, Order, Queries, SortBy};
pub use source::{BlockHandler, BlockSource, FetchOptions, MemoryBlockSource};
pub use types::{
    Block, Category, DateValue, DecentrStats, LikeWeight, Message, MessageKind, Post, PostId,
    Profile, ProfileStats, ProfileSummary,
};
