//! Firebase Realtime Database backend
//!
//! Uses the REST API: `GET`/`PUT`/`PATCH` on `{base}/{path}.json` and the
//! `text/event-stream` endpoint for subscriptions. The streamed `put` and
//! `patch` events are applied to a local copy of the document so each
//! snapshot reflects exactly one server-side change.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use url::Url;

use super::{Snapshots, StateStore, StoreError};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Firebase Realtime Database client
#[derive(Clone)]
pub struct FirebaseStore {
    client: reqwest::Client,
    base: Url,
    auth: Option<String>,
}

/// Payload of a streamed `put`/`patch` event
#[derive(Debug, Deserialize)]
struct EventData {
    path: String,
    data: Value,
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

impl FirebaseStore {
    /// Create a client for the database at `base_url`
    pub fn new(base_url: &str, auth: Option<String>) -> Result<Self, StoreError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder().user_agent("matrixvisor").build()?;

        Ok(Self { client, base, auth })
    }

    fn document_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.base.join(&format!("{}.json", path.trim_matches('/')))?;
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    fn check(response: reqwest::Response, path: &str) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(StoreError::Status {
                status: response.status(),
                path: path.to_string(),
            })
        }
    }

    /// Keep a subscription alive until the receiver is dropped
    async fn watch(self, path: String, tx: mpsc::UnboundedSender<Option<Value>>) {
        loop {
            match self.stream_events(&path, &tx).await {
                Ok(()) => tracing::debug!("Event stream for '{}' ended", path),
                Err(e) => tracing::warn!("Event stream for '{}' failed: {}", path, e),
            }

            if tx.is_closed() {
                tracing::debug!("Subscriber for '{}' dropped, stopping watch", path);
                return;
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn stream_events(
        &self,
        path: &str,
        tx: &mpsc::UnboundedSender<Option<Value>>,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .get(self.document_url(path)?)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check(response, path)?;

        let mut body = response.bytes_stream();
        let mut parser = SseParser::default();
        let mut doc: Option<Value> = None;

        while let Some(chunk) = body.next().await {
            for event in parser.push(&chunk?) {
                match event.event.as_str() {
                    "put" | "patch" => {
                        let update: EventData = serde_json::from_str(&event.data)?;
                        apply_event(&mut doc, &event.event, &update.path, update.data);
                        if tx.send(doc.clone()).is_err() {
                            return Err(StoreError::Closed(path.to_string()));
                        }
                    }
                    "keep-alive" => {}
                    "cancel" | "auth_revoked" => {
                        tracing::warn!("Store cancelled subscription to '{}': {}", path, event.event);
                        return Ok(());
                    }
                    other => tracing::debug!("Ignoring store event '{}'", other),
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StateStore for FirebaseStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self.client.get(self.document_url(path)?).send().await?;
        let value: Value = Self::check(response, path)?.json().await?;
        Ok(match value {
            Value::Null => None,
            value => Some(value),
        })
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let response = self.client.put(self.document_url(path)?).json(&value).send().await?;
        Self::check(response, path)?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let response = self.client.patch(self.document_url(path)?).json(&fields).send().await?;
        Self::check(response, path)?;
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Snapshots, StoreError> {
        // Validate the URL before handing off to the background task.
        self.document_url(path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.clone().watch(path.to_string(), tx));
        Ok(rx)
    }
}

/// Incremental parser for a `text/event-stream` body
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim_start());
        }
    }

    event.map(|event| SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Apply a streamed change to the local document copy
fn apply_event(doc: &mut Option<Value>, event: &str, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if event == "patch" {
        if let Value::Object(fields) = data {
            for (key, value) in fields {
                let mut nested = segments.clone();
                nested.push(&key);
                set_at(doc, &nested, value);
            }
        }
    } else {
        set_at(doc, &segments, data);
    }
}

fn set_at(node: &mut Option<Value>, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = if value.is_null() { None } else { Some(value) };
        return;
    };

    let mut object = match node.take() {
        Some(Value::Object(object)) => object,
        _ => Map::new(),
    };

    let mut child = object.remove(*first);
    set_at(&mut child, rest, value);
    if let Some(child) = child {
        object.insert((*first).to_string(), child);
    }

    *node = if object.is_empty() {
        None
    } else {
        Some(Value::Object(object))
    };
}
