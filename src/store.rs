//! The node repository boundary.
//!
//! The synchronization core never owns persistence. It reads and writes nodes through
//! [EntityStore], and every write it issues carries a [WriteOptions] marker telling the store
//! whether the resulting [MutationEvent] has to be reconciled. [MemoryStore] is the in-process
//! implementation used by tests and embedders that do not bring their own storage. Its write log
//! is off unless requested with [MemoryStore::with_write_log].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
    error::CodexError,
    event::{EventOrigin, MutationEvent},
    properties::{Field, FieldValue, Node, NodeData, NodeId, NodeKind},
};

/// Options attached to every [EntityStore::set_field] call. Has no `Default`; each call site
/// states which side of the reentrancy contract it is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub suppress_reconciliation: bool,
}

impl WriteOptions {
    /// A write issued by the synchronization core itself. Observers refresh on it but never
    /// reconcile it.
    pub fn internal() -> Self {
        WriteOptions {
            suppress_reconciliation: true,
        }
    }

    /// A write issued on behalf of a user or an import. Its link deltas get reconciled.
    pub fn external() -> Self {
        WriteOptions {
            suppress_reconciliation: false,
        }
    }

    pub fn origin(&self) -> EventOrigin {
        if self.suppress_reconciliation {
            EventOrigin::Local
        } else {
            EventOrigin::Remote
        }
    }
}

/// Initial fields of a node that does not exist yet. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    pub name: String,
    pub description: String,
    pub notes: String,
    pub data: NodeData,
}

impl NodeDraft {
    /// All link sets empty, kind-specific scalars at their defaults.
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        NodeDraft {
            name: name.into(),
            description: String::new(),
            notes: String::new(),
            data: NodeData::empty(kind),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Latest written snapshot of `id`, or `None` when the id does not resolve.
    async fn get(&self, id: &NodeId) -> Result<Option<Node>, CodexError>;

    /// Durably replace one field of `id`. Implementations publish a [MutationEvent] whose origin
    /// is [WriteOptions::origin] once the write has landed and changed the node.
    async fn set_field(
        &self,
        id: &NodeId,
        field: Field,
        value: FieldValue,
        options: WriteOptions,
    ) -> Result<(), CodexError>;

    async fn create(&self, draft: NodeDraft) -> Result<NodeId, CodexError>;

    async fn all(&self) -> Result<Vec<Node>, CodexError>;

    /// Open a new feed of mutation events. Each subscriber sees every event published after it
    /// subscribed.
    fn subscribe(&self) -> UnboundedReceiver<MutationEvent>;
}

/// One accepted [EntityStore::set_field] call, as recorded by [MemoryStore].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub id: NodeId,
    pub field: Field,
    pub origin: EventOrigin,
}

#[derive(Debug, Default)]
struct MemoryInner {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    subscribers: Mutex<Vec<UnboundedSender<MutationEvent>>>,
    /// `None` unless the store was built with [MemoryStore::with_write_log].
    writes: Option<Mutex<Vec<WriteRecord>>>,
}

/// In-process [EntityStore]. Clones share the same nodes, subscribers and write log.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<MemoryInner>);

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// A store that records every accepted write. The log grows until [MemoryStore::clear_writes]
    /// is called, so keep it to tests and short-lived tooling.
    pub fn with_write_log() -> Self {
        MemoryStore(Arc::new(MemoryInner {
            writes: Some(Mutex::new(Vec::new())),
            ..Default::default()
        }))
    }

    /// Seed a node directly, bypassing events and the write log.
    pub fn insert(&self, node: Node) {
        self.0.nodes.write().insert(node.id, node);
    }

    /// Delete a node without touching anything that still references it. References to it
    /// become dangling until a cleanup pass strips them.
    pub fn remove(&self, id: &NodeId) -> Option<Node> {
        self.0.nodes.write().remove(id)
    }

    pub fn snapshot(&self, id: &NodeId) -> Option<Node> {
        self.0.nodes.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.nodes.read().is_empty()
    }

    /// Number of logged writes. Always zero without a write log.
    pub fn write_count(&self) -> usize {
        self.0.writes.as_ref().map_or(0, |log| log.lock().len())
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.0
            .writes
            .as_ref()
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    pub fn writes_to(&self, id: &NodeId) -> Vec<WriteRecord> {
        self.writes().into_iter().filter(|w| &w.id == id).collect()
    }

    pub fn clear_writes(&self) {
        if let Some(log) = &self.0.writes {
            log.lock().clear();
        }
    }

    fn publish(&self, event: MutationEvent) {
        let mut subscribers = self.0.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, id: &NodeId) -> Result<Option<Node>, CodexError> {
        Ok(self.snapshot(id))
    }

    async fn set_field(
        &self,
        id: &NodeId,
        field: Field,
        value: FieldValue,
        options: WriteOptions,
    ) -> Result<(), CodexError> {
        let event = {
            let mut nodes = self.0.nodes.write();
            let node = nodes
                .get_mut(id)
                .ok_or_else(|| CodexError::NotFound(format!("node {id}")))?;
            let old = node.clone();
            node.set_field(field, value)?;
            if let Some(log) = &self.0.writes {
                log.lock().push(WriteRecord {
                    id: *id,
                    field,
                    origin: options.origin(),
                });
            }
            (old != *node).then(|| MutationEvent::new(old, node.clone(), options.origin()))
        };
        if let Some(event) = event {
            self.publish(event);
        }
        Ok(())
    }

    async fn create(&self, draft: NodeDraft) -> Result<NodeId, CodexError> {
        let id = NodeId::new();
        let node = Node {
            id,
            name: draft.name,
            description: draft.description,
            notes: draft.notes,
            data: draft.data,
        };
        self.0.nodes.write().insert(id, node);
        Ok(id)
    }

    async fn all(&self) -> Result<Vec<Node>, CodexError> {
        Ok(self.0.nodes.read().values().cloned().collect())
    }

    fn subscribe(&self) -> UnboundedReceiver<MutationEvent> {
        let (tx, rx) = unbounded_channel();
        self.0.subscribers.lock().push(tx);
        rx
    }
}
