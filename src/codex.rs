//! The [Codex] ties the synchronization pipeline to one [EntityStore].
//!
//! It subscribes to the store on construction. Each batch of mutation events is handled in two
//! phases: outside link edits ([crate::event::EventOrigin::Remote]) are reconciled as they are
//! drained, and once the feed is empty a single cascade refreshes the viewers affected by every
//! node the batch touched. Writes issued by the synchronizer come back as
//! [crate::event::EventOrigin::Local] events; they join the cascade but are never reconciled
//! again.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::{mpsc::UnboundedReceiver, Mutex as AsyncMutex};

use crate::{
    cascade::{CascadeReport, CascadeScheduler, Viewer, ViewerHandle, ViewerRegistry},
    commands::{Op, OpResult},
    config::{CodexConfig, CodexConfigProvider},
    creation::{ActorRef, Creator},
    error::CodexError,
    event::MutationEvent,
    index::{LinksIndex, NodeCleanup},
    properties::{Field, LinkField, Node, NodeData, NodeId},
    reconcile::{ReconcileReport, UpdateReconciler},
    store::EntityStore,
    sync::{check_field, LinkSynchronizer, SyncOutcome},
};

/// Result of handling one drained batch of mutation events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub events: usize,
    pub reconciled: Vec<ReconcileReport>,
    pub cascade: CascadeReport,
}

pub struct Codex {
    store: Arc<dyn EntityStore>,
    config: CodexConfig,
    sync: Arc<LinkSynchronizer>,
    reconciler: UpdateReconciler,
    cascade: CascadeScheduler,
    creator: Creator,
    events: AsyncMutex<UnboundedReceiver<MutationEvent>>,
    paused: AtomicBool,
}

impl Codex {
    pub fn new(store: Arc<dyn EntityStore>, config: CodexConfig) -> Self {
        let events = AsyncMutex::new(store.subscribe());
        let sync = Arc::new(LinkSynchronizer::new(
            store.clone(),
            config.serialize_node_writes,
        ));
        Codex {
            reconciler: UpdateReconciler::new(sync.clone()),
            cascade: CascadeScheduler::new(store.clone(), Arc::new(ViewerRegistry::new())),
            creator: Creator::new(store.clone(), config.clone()),
            sync,
            store,
            config,
            events,
            paused: AtomicBool::new(false),
        }
    }

    pub fn from_provider(
        store: Arc<dyn EntityStore>,
        provider: &dyn CodexConfigProvider,
    ) -> Result<Self, CodexError> {
        Ok(Codex::new(store, provider.get_config()?))
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn config(&self) -> &CodexConfig {
        &self.config
    }

    pub fn synchronizer(&self) -> &LinkSynchronizer {
        &self.sync
    }

    pub fn reconciler(&self) -> &UpdateReconciler {
        &self.reconciler
    }

    pub fn cascade(&self) -> &CascadeScheduler {
        &self.cascade
    }

    pub fn creator(&self) -> &Creator {
        &self.creator
    }

    pub fn register_viewer(&self, viewer: Arc<dyn Viewer>) -> ViewerHandle {
        self.cascade.viewers().register(viewer)
    }

    pub fn unregister_viewer(&self, handle: ViewerHandle) -> Option<Arc<dyn Viewer>> {
        self.cascade.viewers().unregister(handle)
    }

    /// Stop reconciling outside writes, e.g. while an import rewrites many nodes at once. Events
    /// observed in the meantime still refresh viewers.
    pub fn pause_reconciliation(&self) {
        tracing::info!("[Codex] reconciliation paused");
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_reconciliation(&self) {
        tracing::info!("[Codex] reconciliation resumed");
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Reconcile `event` if it is an outside link edit and reconciliation is not paused.
    pub async fn handle_event(&self, event: &MutationEvent) -> Option<ReconcileReport> {
        if !event.needs_reconciliation() || self.is_paused() {
            return None;
        }
        Some(self.reconciler.reconcile(event).await)
    }

    /// Handle everything currently queued, including the events the handling itself produces,
    /// then run one cascade over all touched nodes.
    pub async fn process_pending(&self) -> BatchReport {
        let mut events = self.events.lock().await;
        self.drain_batch(&mut events, Vec::new()).await
    }

    /// Handle batches until the store drops its side of the feed. Holds the feed for its whole
    /// lifetime, so [Codex::process_pending] waits until it returns.
    pub async fn run(&self) {
        let mut events = self.events.lock().await;
        while let Some(first) = events.recv().await {
            let report = self.drain_batch(&mut events, vec![first]).await;
            tracing::debug!(
                "[Codex] batch of {} events refreshed {} viewers",
                report.events,
                report.cascade.refreshed.len()
            );
        }
        tracing::info!("[Codex] mutation feed closed");
    }

    async fn drain_batch(
        &self,
        events: &mut UnboundedReceiver<MutationEvent>,
        mut queue: Vec<MutationEvent>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut changed = BTreeSet::new();
        loop {
            while let Ok(event) = events.try_recv() {
                queue.push(event);
            }
            if queue.is_empty() {
                break;
            }
            for event in std::mem::take(&mut queue) {
                report.events += 1;
                changed.insert(event.id);
                if let Some(reconciled) = self.handle_event(&event).await {
                    report.reconciled.push(reconciled);
                }
            }
        }
        report.cascade = self.cascade.schedule(&changed).await;
        report
    }

    pub async fn create_region(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.creator.create_region(name).await
    }

    pub async fn create_location(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.creator.create_location(name).await
    }

    pub async fn create_shop(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.creator.create_shop(name).await
    }

    pub async fn create_group(&self, name: Option<&str>) -> Result<Option<NodeId>, CodexError> {
        self.creator.create_group(name).await
    }

    pub async fn create_npc(
        &self,
        actor: Option<&ActorRef>,
        name: Option<&str>,
    ) -> Result<Option<NodeId>, CodexError> {
        self.creator.create_npc(actor, name).await
    }

    pub async fn find_or_create_npc_for_actor(
        &self,
        actor: &ActorRef,
    ) -> Result<Option<NodeId>, CodexError> {
        self.creator.find_or_create_npc_for_actor(actor).await
    }

    /// Link `source.field` to `target` and its inverse. `source` must resolve; a dangling
    /// `target` is reported in [SyncOutcome::skipped] and nothing is written.
    pub async fn link(
        &self,
        source: &NodeId,
        field: LinkField,
        target: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        let source = self.require(source).await?;
        match self.store.get(target).await? {
            Some(peer) => self.sync.link_peers(&source, &peer, field).await,
            None => {
                check_field(&source, field)?;
                tracing::debug!(
                    "[Codex] not linking {}.{field} to dangling {target}",
                    source.id
                );
                Ok(SyncOutcome {
                    writes: 0,
                    skipped: vec![*target],
                })
            }
        }
    }

    /// Remove the edge between `source.field` and `target`. When `target` no longer resolves,
    /// the stale id is stripped from `source` alone.
    pub async fn unlink(
        &self,
        source: &NodeId,
        field: LinkField,
        target: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        let source = self.require(source).await?;
        match self.store.get(target).await? {
            Some(peer) => self.sync.unlink_peers(&source, &peer, field).await,
            None => self.sync.unlink_dangling(&source, field, target).await,
        }
    }

    pub async fn link_location_to_npc(
        &self,
        location: &NodeId,
        npc: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        self.link(location, LinkField::LinkedNpcs, npc).await
    }

    pub async fn link_region_to_npc(
        &self,
        region: &NodeId,
        npc: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        self.link(region, LinkField::LinkedNpcs, npc).await
    }

    /// Make `location` the shop's container, detaching it from any previous one.
    pub async fn link_location_to_shop(
        &self,
        location: &NodeId,
        shop: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        self.link(shop, LinkField::Container, location).await
    }

    /// Make `region` the shop's container, detaching it from any previous one.
    pub async fn link_region_to_shop(
        &self,
        region: &NodeId,
        shop: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        self.link(shop, LinkField::Container, region).await
    }

    pub async fn link_shop_to_npc(
        &self,
        shop: &NodeId,
        npc: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        self.link(shop, LinkField::LinkedNpcs, npc).await
    }

    pub async fn link_npc_to_npc(&self, a: &NodeId, b: &NodeId) -> Result<SyncOutcome, CodexError> {
        self.link(a, LinkField::Associates, b).await
    }

    pub async fn link_region_to_location(
        &self,
        region: &NodeId,
        location: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        self.link(location, LinkField::ParentRegion, region).await
    }

    pub async fn link_group_member(
        &self,
        group: &NodeId,
        member: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        self.link(group, LinkField::Members, member).await
    }

    pub async fn add_item_to_shop(
        &self,
        shop: &NodeId,
        item: &str,
        quantity: u32,
    ) -> Result<SyncOutcome, CodexError> {
        let shop = self.require(shop).await?;
        self.sync.merge_inventory_entry(&shop, item, quantity).await
    }

    pub async fn link_scene(
        &self,
        node: &NodeId,
        scene: Option<String>,
    ) -> Result<SyncOutcome, CodexError> {
        let node = self.require(node).await?;
        self.sync
            .set_external_ref(&node, Field::LinkedScene, scene)
            .await
    }

    /// Unbind every NPC linked to `actor_id`. Returns how many were unbound.
    pub async fn clear_actor_links(&self, actor_id: &str) -> Result<usize, CodexError> {
        let bound: Vec<Node> = self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|node| {
                matches!(&node.data, NodeData::Npc(npc) if npc.linked_actor.as_deref() == Some(actor_id))
            })
            .collect();
        for npc in &bound {
            self.sync
                .set_external_ref(npc, Field::LinkedActor, None)
                .await?;
        }
        if !bound.is_empty() {
            tracing::info!("[Codex] unbound {} NPCs from actor {actor_id}", bound.len());
        }
        Ok(bound.len())
    }

    /// The live nodes referenced by `id.field`, skipping dangling ids.
    pub async fn linked_nodes(&self, id: &NodeId, field: LinkField) -> Result<Vec<Node>, CodexError> {
        let node = self.require(id).await?;
        let mut linked = Vec::new();
        for target in node.link_ids(field) {
            if let Some(target) = self.store.get(&target).await? {
                linked.push(target);
            }
        }
        Ok(linked)
    }

    pub async fn links_index(&self) -> Result<LinksIndex, CodexError> {
        Ok(LinksIndex::build(self.store.all().await?))
    }

    /// Hand the current links index to `cleanup` so it can strip references to `deleted`.
    pub async fn dispatch_cleanup(
        &self,
        deleted: &NodeId,
        cleanup: &dyn NodeCleanup,
    ) -> Result<(), CodexError> {
        let index = self.links_index().await?;
        tracing::debug!(
            "[Codex] cleanup for {deleted}: {} referrers",
            index.referrers(deleted).len()
        );
        cleanup.cleanup(deleted, &index).await
    }

    pub async fn execute(&self, op: Op) -> Result<OpResult, CodexError> {
        tracing::debug!("[Codex] executing {op}");
        let created = |id: Option<NodeId>| match id {
            Some(id) => OpResult::Created(id),
            None => OpResult::Deduplicated,
        };
        Ok(match op {
            Op::Create(kind, name) => {
                created(self.creator.create_kind(kind, name.as_deref()).await?)
            }
            Op::CreateNpc(actor, name) => {
                created(self.create_npc(actor.as_ref(), name.as_deref()).await?)
            }
            Op::NpcForActor(actor) => created(self.find_or_create_npc_for_actor(&actor).await?),
            Op::Link {
                source,
                field,
                target,
            } => OpResult::Synced(self.link(&source, field, &target).await?.writes),
            Op::Unlink {
                source,
                field,
                target,
            } => OpResult::Synced(self.unlink(&source, field, &target).await?.writes),
            Op::AddItem {
                shop,
                item,
                quantity,
            } => OpResult::Synced(self.add_item_to_shop(&shop, &item, quantity).await?.writes),
            Op::LinkScene(id, scene) => OpResult::Synced(self.link_scene(&id, scene).await?.writes),
            Op::ForgetActor(actor) => OpResult::Cleared(self.clear_actor_links(&actor).await?),
            Op::GetLinked(id, field) => OpResult::Nodes(self.linked_nodes(&id, field).await?),
        })
    }

    async fn require(&self, id: &NodeId) -> Result<Node, CodexError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| CodexError::NotFound(format!("node {id}")))
    }
}
