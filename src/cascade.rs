//! CascadeScheduler: decides which open viewers must re-render after nodes changed.
//!
//! Viewers register themselves with a [ViewerRegistry]; the scheduler never discovers them on its
//! own. A viewer is refreshed when it displays a changed node, when it displays a container whose
//! aggregated rosters include a changed NPC or Shop, or when it reports a dependency through
//! [Viewer::is_related_document]. A viewer with a text editor open on a changed node is left
//! alone so unsaved input survives.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    error::CodexError,
    properties::{LinkField, Node, NodeData, NodeId, NodeKind},
    store::EntityStore,
};

/// An open view onto one node.
#[async_trait]
pub trait Viewer: Send + Sync {
    /// The node this viewer renders.
    fn displayed(&self) -> NodeId;

    /// The node bound to a free-text editor this viewer currently has open, if any.
    fn open_editor(&self) -> Option<NodeId> {
        None
    }

    /// Whether this viewer shows content derived from `changed` beyond what the scheduler's own
    /// rules cover. Viewers that do not implement it are only matched by those rules.
    async fn is_related_document(&self, _changed: &NodeId) -> bool {
        false
    }

    /// Re-render. Must not block; called at most once per cascade.
    fn refresh(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewerHandle(u64);

#[derive(Default)]
pub struct ViewerRegistry {
    next: AtomicU64,
    viewers: RwLock<BTreeMap<ViewerHandle, Arc<dyn Viewer>>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        ViewerRegistry::default()
    }

    pub fn register(&self, viewer: Arc<dyn Viewer>) -> ViewerHandle {
        let handle = ViewerHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.viewers.write().insert(handle, viewer);
        handle
    }

    pub fn unregister(&self, handle: ViewerHandle) -> Option<Arc<dyn Viewer>> {
        self.viewers.write().remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.viewers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<(ViewerHandle, Arc<dyn Viewer>)> {
        self.viewers
            .read()
            .iter()
            .map(|(handle, viewer)| (*handle, viewer.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeReport {
    /// Changed ids plus the containers whose rosters depend on them.
    pub affected: BTreeSet<NodeId>,
    pub refreshed: Vec<ViewerHandle>,
    /// Viewers left alone because their open editor is bound to a changed node.
    pub editing: Vec<ViewerHandle>,
}

pub struct CascadeScheduler {
    store: Arc<dyn EntityStore>,
    viewers: Arc<ViewerRegistry>,
}

impl CascadeScheduler {
    pub fn new(store: Arc<dyn EntityStore>, viewers: Arc<ViewerRegistry>) -> Self {
        CascadeScheduler { store, viewers }
    }

    pub fn viewers(&self) -> &Arc<ViewerRegistry> {
        &self.viewers
    }

    /// The changed ids together with every container that aggregates one of them: the places
    /// and regions an NPC is linked to (directly or through its shops) and a shop's container
    /// chain.
    pub async fn affected(&self, changed: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        let mut affected = changed.clone();
        for id in changed {
            match self.store.get(id).await {
                Ok(Some(node)) => {
                    if let Err(e) = self.add_containers(&node, &mut affected).await {
                        tracing::warn!("[CascadeScheduler] could not expand {id}: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("[CascadeScheduler] could not read {id}: {e}"),
            }
        }
        affected
    }

    /// Refresh every viewer affected by the union of `changed`, each exactly once.
    pub async fn schedule(&self, changed: &BTreeSet<NodeId>) -> CascadeReport {
        let mut report = CascadeReport {
            affected: self.affected(changed).await,
            ..Default::default()
        };
        if changed.is_empty() {
            return report;
        }

        let mut undecided = Vec::new();
        let mut selected = Vec::new();
        for (handle, viewer) in self.viewers.snapshot() {
            if viewer
                .open_editor()
                .is_some_and(|editing| changed.contains(&editing))
            {
                report.editing.push(handle);
            } else if report.affected.contains(&viewer.displayed()) {
                selected.push((handle, viewer));
            } else {
                undecided.push((handle, viewer));
            }
        }

        let related = join_all(undecided.iter().map(|(_, viewer)| async move {
            for id in changed {
                if viewer.is_related_document(id).await {
                    return true;
                }
            }
            false
        }))
        .await;
        selected.extend(
            undecided
                .into_iter()
                .zip(related)
                .filter_map(|(entry, related)| related.then_some(entry)),
        );

        for (handle, viewer) in selected {
            viewer.refresh();
            report.refreshed.push(handle);
        }
        report.refreshed.sort();
        tracing::debug!(
            "[CascadeScheduler] {} changed, {} affected, refreshed {} viewers ({} editing)",
            changed.len(),
            report.affected.len(),
            report.refreshed.len(),
            report.editing.len()
        );
        report
    }

    async fn add_containers(
        &self,
        node: &Node,
        affected: &mut BTreeSet<NodeId>,
    ) -> Result<(), CodexError> {
        match node.kind() {
            NodeKind::Npc => {
                for place in node.link_ids(LinkField::LinkedLocations) {
                    affected.insert(place);
                    self.add_parent_region(&place, affected).await?;
                }
                for shop in node.link_ids(LinkField::LinkedShops) {
                    if let Some(shop) = self.store.get(&shop).await? {
                        self.add_shop_containers(&shop, affected).await?;
                    }
                }
            }
            NodeKind::Shop => self.add_shop_containers(node, affected).await?,
            _ => {}
        }
        Ok(())
    }

    async fn add_shop_containers(
        &self,
        shop: &Node,
        affected: &mut BTreeSet<NodeId>,
    ) -> Result<(), CodexError> {
        if let Some(container) = shop.parent(LinkField::Container) {
            affected.insert(container);
            self.add_parent_region(&container, affected).await?;
        }
        Ok(())
    }

    async fn add_parent_region(
        &self,
        place: &NodeId,
        affected: &mut BTreeSet<NodeId>,
    ) -> Result<(), CodexError> {
        if let Some(Node {
            data: NodeData::Location(location),
            ..
        }) = self.store.get(place).await?
        {
            affected.extend(location.parent_region);
        }
        Ok(())
    }
}
