//! # Arbor Core
//!
//! Typed object mapping over a realtime hierarchical store.
//!
//! This crate provides:
//! - [`Entity`] records with schema-driven encoding, creation and update
//!   timestamps, and per-field change patches
//! - [`Relation`] sets of foreign ids with atomic link updates
//! - [`File`] attachments uploaded to a blob store before the owner is
//!   written
//! - [`Package`] multi-path atomic writes
//! - [`DataSource`] live, paginated, sorted and filtered views that emit
//!   index diffs
//!
//! Every operation runs against a [`Context`] built from a
//! [`RemoteStore`](arbor_store::RemoteStore) and a
//! [`BlobStore`](arbor_store::BlobStore).
//!
//! ```no_run
//! use arbor_core::{ArborConfig, Context, DataSource, DataSourceOptions, Entity};
//! # use arbor_core::{Model, Schema};
//! # use arbor_value::{FieldValue, ValueKind};
//! # use std::sync::{Arc, OnceLock};
//! # #[derive(Debug, Clone, Default)]
//! # struct User { name: String }
//! # impl Model for User {
//! #     const NAME: &'static str = "user";
//! #     fn schema() -> &'static Schema {
//! #         static SCHEMA: OnceLock<Schema> = OnceLock::new();
//! #         SCHEMA.get_or_init(|| Schema::new().field("name", ValueKind::String))
//! #     }
//! #     fn get(&self, field: &str) -> Option<FieldValue> {
//! #         (field == "name").then(|| self.name.clone().into())
//! #     }
//! #     fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool {
//! #         if field != "name" { return false; }
//! #         self.name = value.and_then(FieldValue::into_string).unwrap_or_default();
//! #         true
//! #     }
//! # }
//! # async fn run() -> arbor_core::CoreResult<()> {
//! let ctx = Context::connect(
//!     Arc::new(arbor_store::InMemoryStore::new()),
//!     Arc::new(arbor_store::InMemoryBlobStore::new()),
//!     ArborConfig::default(),
//! )
//! .await?;
//!
//! let mut user = Entity::<User>::create();
//! user.set("name", "ada")?;
//! user.save(&ctx).await?;
//!
//! let (users, mut changes) = DataSource::<User>::collection(&ctx, DataSourceOptions::new()).await?;
//! while let Some(change) = changes.recv().await {
//!     println!("{change:?}: {} users", users.len());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod datasource;
mod disposer;
mod entity;
mod error;
mod file;
mod package;
mod relation;

pub use config::ArborConfig;
pub use context::Context;
pub use datasource::{
    compare, Change, CollectionChange, DataSource, DataSourceOptions, Filter, SortDescriptor,
    SortKey,
};
pub use disposer::{DisposeBag, Disposer};
pub use entity::{Entity, FieldSpec, Model, Schema, CREATED_AT, UPDATED_AT};
pub use error::{CoreError, CoreResult, ObjectError};
pub use file::{File, FileOwner, FileSource, UploadTask};
pub use package::Package;
pub use relation::{Membership, Relation};
