//! Fixture models and store setups.
//!
//! Provides a few hand-written [`Model`]s covering every kind of field, and
//! [`TestEnv`], a connected context over in-memory stores.

use arbor_core::{ArborConfig, Context, Entity, Model, Schema};
use arbor_store::{BlobStore, InMemoryBlobStore, InMemoryStore, RemoteStore};
use arbor_value::{FieldValue, Value, ValueKind};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use url::Url;

/// A user: plain fields of several kinds, an avatar and group memberships.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: i64,
    /// Reputation score.
    pub score: f64,
    /// Optional home page.
    pub homepage: Option<Url>,
    /// Free-form labels.
    pub tags: BTreeSet<String>,
}

impl Model for User {
    const NAME: &'static str = "user";

    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new()
                .field("name", ValueKind::String)
                .field("age", ValueKind::Int)
                .field("score", ValueKind::Double)
                .field("homepage", ValueKind::Url)
                .field("tags", ValueKind::KeySet)
                .file("avatar")
                .relation("groups", Group::NAME)
        })
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        match field {
            "name" => Some(self.name.clone().into()),
            "age" => Some(self.age.into()),
            "score" => Some(self.score.into()),
            "homepage" => self.homepage.clone().map(FieldValue::from),
            "tags" => Some(self.tags.clone().into()),
            _ => None,
        }
    }

    fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool {
        match field {
            "name" => self.name = value.and_then(FieldValue::into_string).unwrap_or_default(),
            "age" => self.age = value.and_then(FieldValue::into_int).unwrap_or_default(),
            "score" => self.score = value.and_then(FieldValue::into_double).unwrap_or_default(),
            "homepage" => self.homepage = value.and_then(FieldValue::into_url),
            "tags" => self.tags = value.and_then(FieldValue::into_key_set).unwrap_or_default(),
            _ => return false,
        }
        true
    }
}

/// A group holding its members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    /// Group name.
    pub name: String,
}

impl Model for Group {
    const NAME: &'static str = "group";

    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new()
                .field("name", ValueKind::String)
                .relation("members", User::NAME)
        })
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        (field == "name").then(|| self.name.clone().into())
    }

    fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool {
        if field != "name" {
            return false;
        }
        self.name = value.and_then(FieldValue::into_string).unwrap_or_default();
        true
    }
}

/// An album with three attachments, for upload tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Album {
    /// Album title.
    pub title: String,
}

impl Model for Album {
    const NAME: &'static str = "album";

    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::new()
                .field("title", ValueKind::String)
                .file("cover")
                .file("back")
                .file("inlay")
        })
    }

    fn get(&self, field: &str) -> Option<FieldValue> {
        (field == "title").then(|| self.title.clone().into())
    }

    fn set(&mut self, field: &str, value: Option<FieldValue>) -> bool {
        if field != "title" {
            return false;
        }
        self.title = value.and_then(FieldValue::into_string).unwrap_or_default();
        true
    }
}

/// A connected context over fresh in-memory stores.
///
/// Dereferences to the [`Context`], so it can be passed wherever one is
/// expected.
pub struct TestEnv {
    /// The record store.
    pub store: Arc<InMemoryStore>,
    /// The blob store.
    pub blobs: Arc<InMemoryBlobStore>,
    /// The context over both.
    pub ctx: Context,
}

impl TestEnv {
    /// Creates an environment with the default configuration.
    pub async fn new() -> Self {
        Self::with_config(ArborConfig::default()).await
    }

    /// Creates an environment with `config`.
    pub async fn with_config(config: ArborConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let ctx = connect(store.clone(), blobs.clone(), config).await;
        Self { store, blobs, ctx }
    }
}

impl std::ops::Deref for TestEnv {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

/// Connects a context, panicking on failure.
pub async fn connect(
    store: Arc<dyn RemoteStore>,
    blobs: Arc<dyn BlobStore>,
    config: ArborConfig,
) -> Context {
    Context::connect(store, blobs, config)
        .await
        .expect("Failed to connect context")
}

/// A local user entity.
pub fn user(name: &str, age: i64) -> Entity<User> {
    Entity::new(User {
        name: name.into(),
        age,
        ..User::default()
    })
}

/// The stored form of a user with only a name and an age.
pub fn user_value(name: &str, age: i64) -> Value {
    Value::map([("name", Value::from(name)), ("age", Value::Integer(age))])
}

/// Zero-padded key for the `n`th seeded record, so keys sort numerically.
pub fn seeded_key(n: usize) -> String {
    format!("k{n:03}")
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Writes `count` users straight into the store, keyed
    /// `seeded_key(1)..=seeded_key(count)`. Returns the keys in order.
    pub fn seed_users(env: &TestEnv, count: usize) -> Vec<String> {
        let collection = env.ctx.collection_path::<User>();
        (1..=count)
            .map(|n| {
                let key = seeded_key(n);
                env.store.seed(
                    &format!("{collection}/{key}"),
                    user_value(&format!("user {n}"), n as i64),
                );
                key
            })
            .collect()
    }

    /// Writes a JSON document at `at`, as a legacy client would have.
    pub fn seed_json(env: &TestEnv, at: &str, json: serde_json::Value) {
        env.store.seed(at, Value::from_json(&json));
    }

    /// Seeds `count` users and links each under `reference`.
    pub fn seed_index(env: &TestEnv, reference: &str, count: usize) -> Vec<String> {
        let keys = seed_users(env, count);
        for key in &keys {
            env.store.seed(&format!("{reference}/{key}"), Value::Bool(true));
        }
        keys
    }
}
