//! Tiered allocation of unique 64-bit sequence ids.
//!
//! Ids come from a durable [`SequenceStore`] in contiguous batches and are
//! staged in two [`SequenceCache`] tiers so that most requests never touch the
//! store:
//!
//! | Tier   | Type                                   | Scope          |
//! |--------|----------------------------------------|----------------|
//! | Local  | [`LocalSequenceCache`]                 | one process    |
//! | Shared | `RedisSequenceCache` (feature `redis`) | every process  |
//! | Durable| `DatabaseSequenceStore` (`database`)   | source of truth|
//!
//! [`Allocator`] ties the tiers together, tracks whether the shared tier is
//! usable, and always falls back to reserving a single id from the store.
//!
//! ```
//! use seqalloc::{Allocator, AllocatorOptions, Context, LocalSequenceCache, MemorySequenceStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let alloc = Allocator::new(
//!     MemorySequenceStore::new(100),
//!     LocalSequenceCache::new(1000),
//!     LocalSequenceCache::new(100),
//!     AllocatorOptions::default(),
//! )
//! .await;
//!
//! let ctx = Context::background();
//! let a = alloc.next_id(&ctx).await.unwrap();
//! let b = alloc.next_id(&ctx).await.unwrap();
//! assert_eq!((a, b), (100, 101));
//! # }
//! ```
//!
//! ## Features
//!
//! - `redis`: shared tier backed by a Redis list.
//! - `database`: durable store backed by a SQL counter row (sea-orm). Pick a
//!   driver with `sqlite`, `postgres` or `mysql`.
//! - `tracing`: log tier degradations, recoveries and refills.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod allocator;
mod cache;
mod context;
mod error;
mod options;
mod retry;
mod store;

pub use crate::allocator::*;
pub use crate::cache::*;
pub use crate::context::*;
pub use crate::error::*;
pub use crate::options::*;
pub use crate::retry::*;
pub use crate::store::*;
