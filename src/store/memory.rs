//! In-process state store

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{merge_fields, Snapshots, StateStore, StoreError};

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Option<Value>>>>,
    writes: usize,
}

/// State store kept in memory, with the same null-removal semantics as the
/// remote backend
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of writes (`set` and `update`) applied so far
    #[cfg(test)]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn store(inner: &mut Inner, path: &str, doc: Option<Value>) {
        inner.writes += 1;
        match &doc {
            Some(value) => {
                inner.docs.insert(path.to_string(), value.clone());
            }
            None => {
                inner.docs.remove(path);
            }
        }

        if let Some(subscribers) = inner.subscribers.get_mut(path) {
            subscribers.retain(|tx| tx.send(doc.clone()).is_ok());
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().docs.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let doc = match value {
            Value::Object(fields) => merge_fields(None, fields),
            Value::Null => None,
            other => Some(other),
        };
        Self::store(&mut self.lock(), path, doc);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let current = inner.docs.get(path).cloned();
        Self::store(&mut inner, path, merge_fields(current, fields));
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Snapshots, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let current = inner.docs.get(path).cloned();
        if tx.send(current).is_err() {
            return Err(StoreError::Closed(path.to_string()));
        }
        inner.subscribers.entry(path.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
