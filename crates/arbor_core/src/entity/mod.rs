//! Typed entities and their schemas.

mod model;
mod record;

pub use model::{FieldSpec, Model, Schema};
pub use record::{Entity, CREATED_AT, UPDATED_AT};

pub(crate) use record::forward;
