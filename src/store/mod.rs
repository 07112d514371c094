//! Remote state store abstraction
//!
//! The supervisor only needs a document store that can be observed and
//! partially written. Two backends exist: an in-process store for tests and
//! local runs, and the Firebase Realtime Database over REST.

mod firebase;
mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

/// Stream of document snapshots; `None` means the document does not exist
pub type Snapshots = mpsc::UnboundedReceiver<Option<Value>>;

/// Errors that can occur talking to the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned status {status} for '{path}'")]
    Status {
        status: reqwest::StatusCode,
        path: String,
    },

    #[error("Invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid store URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Subscription to '{0}' closed")]
    Closed(String),
}

/// Trait for observable document stores
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the document at `path`
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the document at `path`
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into the document at `path`; `null` fields are removed
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Observe the document at `path`: the current value first, then one
    /// snapshot per change
    async fn subscribe(&self, path: &str) -> Result<Snapshots, StoreError>;
}

/// Build a single-field update
pub fn field(key: &str, value: Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(key.to_string(), value);
    fields
}

/// Merge `fields` into `doc` with the store's partial-write semantics
pub(crate) fn merge_fields(doc: Option<Value>, fields: Map<String, Value>) -> Option<Value> {
    let mut object = match doc {
        Some(Value::Object(object)) => object,
        _ => Map::new(),
    };

    for (key, value) in fields {
        if value.is_null() {
            object.remove(&key);
        } else {
            object.insert(key, value);
        }
    }

    if object.is_empty() {
        None
    } else {
        Some(Value::Object(object))
    }
}
