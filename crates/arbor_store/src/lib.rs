//! # Arbor Store
//!
//! The external boundary Arbor talks to: a remote hierarchical key-value
//! store with live subscriptions, and a blob store for file attachments.
//!
//! The store is **schema-less**. It holds [`arbor_value::Value`] trees at
//! slash-delimited paths and knows nothing about entities or relations.
//!
//! ## Design Principles
//!
//! - Multi-path updates are atomic: all paths commit or none do
//! - Children are ordered by key; push ids sort by creation time
//! - Every operation is async and the traits are `Send + Sync`
//! - Subscriptions deliver events over channels, so the consumer picks
//!   its own execution context
//!
//! ## Available Implementations
//!
//! - [`InMemoryStore`] - For testing and ephemeral use
//! - [`InMemoryBlobStore`] - For testing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod error;
mod event;
mod id;
mod memory;
mod memory_blob;
pub mod path;
mod query;
mod remote;

pub use blob::{BlobMetadata, BlobPayload, BlobStore};
pub use error::{StoreError, StoreResult};
pub use event::{EventKind, Snapshot, StoreEvent, Subscription, SubscriptionId};
pub use id::push_id;
pub use memory::{InMemoryStore, StoreOp};
pub use memory_blob::InMemoryBlobStore;
pub use query::{Limit, Query};
pub use remote::{RemoteStore, TransactionFn};
