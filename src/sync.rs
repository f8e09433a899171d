//! LinkSynchronizer: the mutation primitive that keeps both ends of an edge in agreement.
//!
//! Every operation re-reads the nodes it is about to change, so callers may pass stale snapshots.
//! Each side is written at most once and only when its field actually changes, which makes every
//! operation idempotent. All writes are issued with [WriteOptions::internal].
//!
//! ## Write serialization
//!
//! A read-modify-write on one node runs under that node's async mutex (see [NodeLocks]). Set-side
//! updates hold a single lock at a time. Exclusive parent reassignment holds the child's lock
//! while it takes each parent's lock in turn, so locks are always acquired in containment order
//! (Shop, then Location, then Region) and two reassignments cannot wait on each other.

use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    error::CodexError,
    properties::{Field, FieldValue, InventoryEntry, LinkField, Node, NodeData, NodeId},
    relation::{Exclusivity, Relation},
    store::{EntityStore, WriteOptions},
};

/// Per-node async mutexes, created on first use and evicted once nobody holds or awaits them.
#[derive(Debug)]
pub struct NodeLocks {
    enabled: bool,
    locks: Mutex<HashMap<NodeId, Arc<AsyncMutex<()>>>>,
}

impl NodeLocks {
    pub fn new(enabled: bool) -> Self {
        NodeLocks {
            enabled,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `id`. Returns `None` without waiting when serialization is
    /// turned off.
    pub async fn lock(&self, id: &NodeId) -> Option<NodeGuard<'_>> {
        if !self.enabled {
            return None;
        }
        let lock = self.locks.lock().entry(*id).or_default().clone();
        Some(NodeGuard {
            locks: self,
            id: *id,
            guard: Some(lock.lock_owned().await),
        })
    }

    /// Number of nodes that currently have a mutex.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// Exclusive access to one node. Dropping it releases the node and evicts its mutex when no
/// other task is waiting on it.
#[derive(Debug)]
pub struct NodeGuard<'a> {
    locks: &'a NodeLocks,
    id: NodeId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NodeGuard<'_> {
    fn drop(&mut self) {
        // Waiters clone the Arc under the table lock, so the count is stable while we hold it.
        let mut locks = self.locks.locks.lock();
        drop(self.guard.take());
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// What one synchronization call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    /// Store writes issued.
    pub writes: usize,
    /// Ids that did not resolve and were treated as already absent.
    pub skipped: Vec<NodeId>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.writes == 0
    }
}

pub struct LinkSynchronizer {
    store: Arc<dyn EntityStore>,
    locks: NodeLocks,
}

impl LinkSynchronizer {
    pub fn new(store: Arc<dyn EntityStore>, serialize_writes: bool) -> Self {
        LinkSynchronizer {
            store,
            locks: NodeLocks::new(serialize_writes),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Add `b` to `a.field` and `a` to the inverse field on `b`. Edges whose relation has an
    /// exclusive side are routed through [LinkSynchronizer::reassign_exclusive_parent].
    pub async fn link_peers(
        &self,
        a: &Node,
        b: &Node,
        field: LinkField,
    ) -> Result<SyncOutcome, CodexError> {
        if a.id == b.id {
            tracing::debug!("[LinkSynchronizer] ignoring self link {}.{field}", a.id);
            return Ok(SyncOutcome::default());
        }
        let relation = resolve(a, field, b)?;
        match relation.exclusivity() {
            Exclusivity::SourceIsChild => self.reassign_exclusive_parent(a, b).await,
            Exclusivity::TargetIsChild => self.reassign_exclusive_parent(b, a).await,
            Exclusivity::None => {
                let mut outcome = SyncOutcome::default();
                // Never record a new edge to an id that no longer resolves.
                for peer in [a, b] {
                    if self.store.get(&peer.id).await?.is_none() {
                        outcome.skipped.push(peer.id);
                        return Ok(outcome);
                    }
                }
                self.add_link(&a.id, field, b, &mut outcome).await?;
                self.add_link(&b.id, relation.inverse, a, &mut outcome).await?;
                Ok(outcome)
            }
        }
    }

    /// Remove `b` from `a.field` and `a` from the inverse field on `b`. Removing an absent edge
    /// writes nothing.
    pub async fn unlink_peers(
        &self,
        a: &Node,
        b: &Node,
        field: LinkField,
    ) -> Result<SyncOutcome, CodexError> {
        if a.id == b.id {
            return Ok(SyncOutcome::default());
        }
        let relation = resolve(a, field, b)?;
        match relation.exclusivity() {
            Exclusivity::SourceIsChild => self.detach_exclusive_parent(a, b).await,
            Exclusivity::TargetIsChild => self.detach_exclusive_parent(b, a).await,
            Exclusivity::None => {
                let mut outcome = SyncOutcome::default();
                self.remove_link(&a.id, field, &b.id, &mut outcome).await?;
                self.remove_link(&b.id, relation.inverse, &a.id, &mut outcome)
                    .await?;
                Ok(outcome)
            }
        }
    }

    /// Strip `target`, an id that no longer resolves, from `source.field`. Works for member sets
    /// and exclusive parent slots alike; with the peer gone there is no inverse side to update.
    pub async fn unlink_dangling(
        &self,
        source: &Node,
        field: LinkField,
        target: &NodeId,
    ) -> Result<SyncOutcome, CodexError> {
        check_field(source, field)?;
        let mut outcome = SyncOutcome {
            writes: 0,
            skipped: vec![*target],
        };
        tracing::debug!(
            "[LinkSynchronizer] dropping dangling {target} from {}.{field}",
            source.id
        );
        self.remove_link(&source.id, field, target, &mut outcome)
            .await?;
        Ok(outcome)
    }

    /// Move `child` under `new_parent`: detach it from its current parent (if any, and if that
    /// parent still resolves), list it on `new_parent`, then point its parent slot at
    /// `new_parent`. The detach completes before the attach starts, so the child is never listed
    /// by two parents.
    pub async fn reassign_exclusive_parent(
        &self,
        child: &Node,
        new_parent: &Node,
    ) -> Result<SyncOutcome, CodexError> {
        let mut outcome = SyncOutcome::default();
        if child.id == new_parent.id {
            return Ok(outcome);
        }
        let (slot, relation) = exclusive_relation(child, new_parent)?;

        let _child_guard = self.locks.lock(&child.id).await;
        let Some(fresh_child) = self.store.get(&child.id).await? else {
            tracing::debug!("[LinkSynchronizer] child {} is dangling, skipping", child.id);
            outcome.skipped.push(child.id);
            return Ok(outcome);
        };
        if self.store.get(&new_parent.id).await?.is_none() {
            tracing::debug!(
                "[LinkSynchronizer] parent {} is dangling, leaving {} where it is",
                new_parent.id,
                child.id
            );
            outcome.skipped.push(new_parent.id);
            return Ok(outcome);
        }

        if let Some(old_parent) = fresh_child
            .parent(slot)
            .filter(|old| *old != new_parent.id)
        {
            tracing::debug!(
                "[LinkSynchronizer] moving {} {} from {old_parent} to {}",
                child.kind(),
                child.id,
                new_parent.id
            );
            self.release_child(&old_parent, slot, &fresh_child, &mut outcome)
                .await?;
        }
        self.add_link(&new_parent.id, relation.inverse, &fresh_child, &mut outcome)
            .await?;
        if let Some(value) = fresh_child.with_link(slot, new_parent) {
            self.write(&child.id, slot.into(), value).await?;
            outcome.writes += 1;
        }
        Ok(outcome)
    }

    /// Undo an exclusive edge: drop `child` from `parent`'s member set and clear the child's
    /// parent slot if it still points at `parent`.
    pub async fn detach_exclusive_parent(
        &self,
        child: &Node,
        parent: &Node,
    ) -> Result<SyncOutcome, CodexError> {
        let mut outcome = SyncOutcome::default();
        let (slot, _) = exclusive_relation(child, parent)?;

        let _child_guard = self.locks.lock(&child.id).await;
        self.release_child(&parent.id, slot, child, &mut outcome)
            .await?;
        match self.store.get(&child.id).await? {
            Some(fresh_child) => {
                if let Some(value) = fresh_child.without_link(slot, &parent.id) {
                    self.write(&child.id, slot.into(), value).await?;
                    outcome.writes += 1;
                }
            }
            None => outcome.skipped.push(child.id),
        }
        Ok(outcome)
    }

    /// Add `quantity` of `item` to the shop's inventory, merging into an existing entry for the
    /// same item.
    pub async fn merge_inventory_entry(
        &self,
        shop: &Node,
        item: &str,
        quantity: u32,
    ) -> Result<SyncOutcome, CodexError> {
        let mut outcome = SyncOutcome::default();
        let _guard = self.locks.lock(&shop.id).await;
        let Some(fresh) = self.store.get(&shop.id).await? else {
            outcome.skipped.push(shop.id);
            return Ok(outcome);
        };
        let NodeData::Shop(data) = &fresh.data else {
            return Err(CodexError::Field(format!(
                "{} node {} has no inventory",
                fresh.kind(),
                fresh.id
            )));
        };
        let mut inventory = data.inventory.clone();
        match inventory.iter_mut().find(|entry| entry.item == item) {
            Some(entry) => entry.quantity = entry.quantity.saturating_add(quantity),
            None => inventory.push(InventoryEntry::new(item, quantity)),
        }
        self.write(&shop.id, Field::Inventory, FieldValue::Inventory(inventory))
            .await?;
        outcome.writes += 1;
        Ok(outcome)
    }

    /// Set or clear an external reference (scene or actor). These point outside the node graph,
    /// so there is no inverse side.
    pub async fn set_external_ref(
        &self,
        node: &Node,
        field: Field,
        reference: Option<String>,
    ) -> Result<SyncOutcome, CodexError> {
        let mut outcome = SyncOutcome::default();
        let _guard = self.locks.lock(&node.id).await;
        let Some(fresh) = self.store.get(&node.id).await? else {
            outcome.skipped.push(node.id);
            return Ok(outcome);
        };
        let value = FieldValue::External(reference);
        match fresh.field(field) {
            Some(current) if current == value => {}
            Some(_) => {
                self.write(&node.id, field, value).await?;
                outcome.writes += 1;
            }
            None => {
                return Err(CodexError::Field(format!(
                    "{} node {} has no '{field}' reference",
                    fresh.kind(),
                    fresh.id
                )))
            }
        }
        Ok(outcome)
    }

    async fn add_link(
        &self,
        holder: &NodeId,
        field: LinkField,
        target: &Node,
        outcome: &mut SyncOutcome,
    ) -> Result<(), CodexError> {
        let _guard = self.locks.lock(holder).await;
        let Some(fresh) = self.store.get(holder).await? else {
            outcome.skipped.push(*holder);
            return Ok(());
        };
        if let Some(value) = fresh.with_link(field, target) {
            self.write(holder, field.into(), value).await?;
            outcome.writes += 1;
        }
        Ok(())
    }

    async fn remove_link(
        &self,
        holder: &NodeId,
        field: LinkField,
        target: &NodeId,
        outcome: &mut SyncOutcome,
    ) -> Result<(), CodexError> {
        let _guard = self.locks.lock(holder).await;
        let Some(fresh) = self.store.get(holder).await? else {
            outcome.skipped.push(*holder);
            return Ok(());
        };
        if let Some(value) = fresh.without_link(field, target) {
            self.write(holder, field.into(), value).await?;
            outcome.writes += 1;
        }
        Ok(())
    }

    /// Drop `child` from whichever member set of `parent` lists children through `slot`.
    async fn release_child(
        &self,
        parent: &NodeId,
        slot: LinkField,
        child: &Node,
        outcome: &mut SyncOutcome,
    ) -> Result<(), CodexError> {
        let _guard = self.locks.lock(parent).await;
        let Some(fresh_parent) = self.store.get(parent).await? else {
            tracing::debug!("[LinkSynchronizer] old parent {parent} is dangling, skipping detach");
            outcome.skipped.push(*parent);
            return Ok(());
        };
        let Some(relation) = Relation::resolve(child.kind(), slot, fresh_parent.kind()) else {
            tracing::warn!(
                "[LinkSynchronizer] {} {} lists a {} as its {slot}, ignoring",
                child.kind(),
                child.id,
                fresh_parent.kind()
            );
            return Ok(());
        };
        if let Some(value) = fresh_parent.without_link(relation.inverse, &child.id) {
            self.write(parent, relation.inverse.into(), value).await?;
            outcome.writes += 1;
        }
        Ok(())
    }

    async fn write(&self, id: &NodeId, field: Field, value: FieldValue) -> Result<(), CodexError> {
        tracing::debug!("[LinkSynchronizer] write {id}.{field}");
        self.store
            .set_field(id, field, value, WriteOptions::internal())
            .await
    }
}

fn resolve(a: &Node, field: LinkField, b: &Node) -> Result<Relation, CodexError> {
    Relation::resolve(a.kind(), field, b.kind()).ok_or_else(|| {
        CodexError::Relation(format!(
            "{} '{}' cannot link a {} through {field}",
            a.kind(),
            a.name,
            b.kind()
        ))
    })
}

/// Fail unless nodes of `node`'s kind carry `field`.
pub(crate) fn check_field(node: &Node, field: LinkField) -> Result<(), CodexError> {
    if node.kind().link_fields().contains(field) {
        Ok(())
    } else {
        Err(CodexError::Field(format!(
            "{} nodes have no '{field}' link",
            node.kind()
        )))
    }
}

/// The child's parent slot and the relation from that slot to `parent`.
fn exclusive_relation(child: &Node, parent: &Node) -> Result<(LinkField, Relation), CodexError> {
    let slot = child.kind().exclusive_slot().ok_or_else(|| {
        CodexError::Relation(format!("{} nodes have no exclusive parent", child.kind()))
    })?;
    let relation = resolve(child, slot, parent)?;
    Ok((slot, relation))
}
