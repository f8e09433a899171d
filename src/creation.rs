//! Deduplicated node creation.
//!
//! UI triggers (button double clicks, repeated drops) can fire the same creation several times
//! before the first one lands. [CreationGuard] lets only the first request for a given key through
//! while it is in flight; the others return `None` immediately.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};

use crate::{
    config::CodexConfig,
    error::CodexError,
    properties::{NodeData, NodeId, NodeKind},
    store::{EntityStore, NodeDraft},
};

#[derive(Debug, Default)]
pub struct CreationGuard {
    pending: Mutex<HashSet<String>>,
}

impl CreationGuard {
    pub fn new() -> Self {
        CreationGuard::default()
    }

    pub fn key(kind: NodeKind, source: &str) -> String {
        format!("{kind}:{source}")
    }

    /// Claim `key`. The check and the insert happen under one lock, so two racing callers can
    /// never both succeed. The claim is released when the returned token drops.
    pub fn try_begin(&self, key: String) -> Option<PendingCreation<'_>> {
        if !self.pending.lock().insert(key.clone()) {
            return None;
        }
        Some(PendingCreation { guard: self, key })
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains(key)
    }
}

/// An in-flight creation. Dropping it, on success, failure or cancellation, frees the key.
#[derive(Debug)]
pub struct PendingCreation<'a> {
    guard: &'a CreationGuard,
    key: String,
}

impl PendingCreation<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PendingCreation<'_> {
    fn drop(&mut self) {
        self.guard.pending.lock().remove(&self.key);
    }
}

/// The game-system actor an NPC can be bound to. Actors are not nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: String,
    pub name: String,
}

impl ActorRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        ActorRef {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Creation entry points with kind-specific defaults, each wrapped in the [CreationGuard].
pub struct Creator {
    store: Arc<dyn EntityStore>,
    guard: CreationGuard,
    config: CodexConfig,
}

impl Creator {
    pub fn new(store: Arc<dyn EntityStore>, config: CodexConfig) -> Self {
        Creator {
            store,
            guard: CreationGuard::new(),
            config,
        }
    }

    pub fn guard(&self) -> &CreationGuard {
        &self.guard
    }

    pub async fn create_kind(
        &self,
        kind: NodeKind,
        name: Option<&str>,
    ) -> Result<Option<NodeId>, CodexError> {
        match kind {
            NodeKind::Npc => self.create_npc(None, name).await,
            _ => self.create_named(kind, name).await,
        }
    }

    pub async fn create_region(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.create_named(NodeKind::Region, name).await
    }

    pub async fn create_location(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.create_named(NodeKind::Location, name).await
    }

    pub async fn create_shop(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.create_named(NodeKind::Shop, name).await
    }

    pub async fn create_group(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.create_named(NodeKind::Group, name).await
    }

    /// Create an NPC, optionally bound to `actor`. The name falls back to the actor's name plus
    /// the configured suffix, then to the default NPC name. Requests for the same actor are
    /// deduplicated by actor id, others by name.
    pub async fn create_npc(
        &self,
        actor: Option<&ActorRef>,
        name: Option<&str>,
    ) -> Result<Option<NodeId>, CodexError> {
        let name = match (name, actor) {
            (Some(name), _) => name.to_string(),
            (None, Some(actor)) => format!("{}{}", actor.name, self.config.npc_name_suffix),
            (None, None) => self.config.default_names.npc.clone(),
        };
        let source = actor.map(|a| a.id.clone()).unwrap_or_else(|| name.clone());
        let mut draft = NodeDraft::new(NodeKind::Npc, name);
        if let (NodeData::Npc(data), Some(actor)) = (&mut draft.data, actor) {
            data.linked_actor = Some(actor.id.clone());
        }
        self.create_guarded(CreationGuard::key(NodeKind::Npc, &source), draft)
            .await
    }

    /// The NPC already bound to `actor`, or a freshly created one. Returns `None` only when the
    /// same actor's NPC is being created concurrently.
    pub async fn find_or_create_npc_for_actor(
        &self,
        actor: &ActorRef,
    ) -> Result<Option<NodeId>, CodexError> {
        let existing = self.store.all().await?.into_iter().find(|node| {
            matches!(&node.data, NodeData::Npc(npc) if npc.linked_actor.as_deref() == Some(actor.id.as_str()))
        });
        if let Some(node) = existing {
            return Ok(Some(node.id));
        }
        self.create_npc(Some(actor), None).await
    }

    async fn create_named(
        &self,
        kind: NodeKind,
        name: Option<&str>,
    ) -> Result<Option<NodeId>, CodexError> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_names.for_kind(kind).to_string());
        let mut draft = NodeDraft::new(kind, name.clone());
        if let NodeData::Shop(shop) = &mut draft.data {
            shop.markup = self.config.default_shop_markup;
        }
        self.create_guarded(CreationGuard::key(kind, &name), draft)
            .await
    }

    async fn create_guarded(
        &self,
        key: String,
        draft: NodeDraft,
    ) -> Result<Option<NodeId>, CodexError> {
        let Some(pending) = self.guard.try_begin(key) else {
            tracing::debug!("[CreationGuard] creation already in flight, ignoring request");
            return Ok(None);
        };
        let kind = draft.kind();
        match self.store.create(draft).await {
            Ok(id) => {
                tracing::info!("[CreationGuard] created {kind} {id} for {}", pending.key());
                Ok(Some(id))
            }
            Err(e) => {
                tracing::warn!("[CreationGuard] creating {} failed: {e}", pending.key());
                Err(CodexError::Creation(format!("{}: {e}", pending.key())))
            }
        }
    }
}
