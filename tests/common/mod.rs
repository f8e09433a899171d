//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use async_trait::async_trait;
use codex_core::{
    cascade::Viewer,
    error::CodexError,
    event::MutationEvent,
    properties::{Field, FieldValue, Node, NodeId, NodeKind},
    store::{EntityStore, MemoryStore, NodeDraft, WriteOptions},
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Create a node with empty links and return its id.
#[allow(dead_code)]
pub async fn add_node(store: &MemoryStore, kind: NodeKind, name: &str) -> NodeId {
    store.create(NodeDraft::new(kind, name)).await.unwrap()
}

/// Current snapshot of a node that must exist.
#[allow(dead_code)]
pub fn node(store: &MemoryStore, id: &NodeId) -> Node {
    store
        .snapshot(id)
        .unwrap_or_else(|| panic!("node {id} should exist"))
}

/// Viewer that counts its refreshes.
#[allow(dead_code)]
pub struct RecordingViewer {
    pub shows: NodeId,
    pub editing: Mutex<Option<NodeId>>,
    refreshes: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingViewer {
    pub fn new(shows: NodeId) -> Self {
        RecordingViewer {
            shows,
            editing: Mutex::new(None),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.refreshes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Viewer for RecordingViewer {
    fn displayed(&self) -> NodeId {
        self.shows
    }

    fn open_editor(&self) -> Option<NodeId> {
        *self.editing.lock()
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Store whose writes to chosen nodes always fail.
#[allow(dead_code)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: Mutex<HashSet<NodeId>>,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        FlakyStore {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_writes_to(&self, id: NodeId) {
        self.failing.lock().insert(id);
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn get(&self, id: &NodeId) -> Result<Option<Node>, CodexError> {
        self.inner.get(id).await
    }

    async fn set_field(
        &self,
        id: &NodeId,
        field: Field,
        value: FieldValue,
        options: WriteOptions,
    ) -> Result<(), CodexError> {
        if self.failing.lock().contains(id) {
            return Err(CodexError::Store(format!("write to {id}.{field} rejected")));
        }
        self.inner.set_field(id, field, value, options).await
    }

    async fn create(&self, draft: NodeDraft) -> Result<NodeId, CodexError> {
        self.inner.create(draft).await
    }

    async fn all(&self) -> Result<Vec<Node>, CodexError> {
        self.inner.all().await
    }

    fn subscribe(&self) -> UnboundedReceiver<MutationEvent> {
        self.inner.subscribe()
    }
}

/// Store whose `create` suspends before landing, so concurrent creations overlap.
#[allow(dead_code)]
pub struct SlowStore {
    pub inner: MemoryStore,
    pub fail_creates: bool,
    creates: AtomicUsize,
}

#[allow(dead_code)]
impl SlowStore {
    pub fn new(inner: MemoryStore) -> Self {
        SlowStore {
            inner,
            fail_creates: false,
            creates: AtomicUsize::new(0),
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityStore for SlowStore {
    async fn get(&self, id: &NodeId) -> Result<Option<Node>, CodexError> {
        self.inner.get(id).await
    }

    async fn set_field(
        &self,
        id: &NodeId,
        field: Field,
        value: FieldValue,
        options: WriteOptions,
    ) -> Result<(), CodexError> {
        self.inner.set_field(id, field, value, options).await
    }

    async fn create(&self, draft: NodeDraft) -> Result<NodeId, CodexError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_creates {
            return Err(CodexError::Store("create rejected".to_string()));
        }
        self.inner.create(draft).await
    }

    async fn all(&self) -> Result<Vec<Node>, CodexError> {
        self.inner.all().await
    }

    fn subscribe(&self) -> UnboundedReceiver<MutationEvent> {
        self.inner.subscribe()
    }
}
