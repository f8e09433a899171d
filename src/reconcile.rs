//! UpdateReconciler: turns an observed external mutation into the inverse-edge writes it implies.
//!
//! The reconciler diffs every link field of the old and new snapshot and hands each added or
//! removed id to the [LinkSynchronizer]. All deltas of one event run concurrently and are joined
//! before the pass reports back; a failing delta is logged and recorded but never cancels its
//! siblings. Events with [EventOrigin::Local] were written by the synchronizer itself and are
//! ignored here, which is what keeps one link from bouncing between its two ends forever.

use futures::future::join_all;
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use crate::{
    error::CodexError,
    event::{EventOrigin, MutationEvent},
    properties::{EnumSet, LinkField, Node, NodeId},
    sync::{LinkSynchronizer, SyncOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    Link,
    Unlink,
}

/// One id that entered or left one link field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDelta {
    pub field: LinkField,
    pub target: NodeId,
    pub op: DeltaOp,
}

impl Display for LinkDelta {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let sign = match self.op {
            DeltaOp::Link => '+',
            DeltaOp::Unlink => '-',
        };
        write!(f, "{}{sign}{}", self.field, self.target)
    }
}

/// Removals first, then additions, per touched field. Ids present in both snapshots produce
/// nothing.
pub fn plan_deltas(event: &MutationEvent) -> Vec<LinkDelta> {
    let mut deltas = Vec::new();
    for field in event.touched_links() {
        let old = event.old.link_ids(field);
        let new = event.new.link_ids(field);
        deltas.extend(old.difference(&new).map(|target| LinkDelta {
            field,
            target: *target,
            op: DeltaOp::Unlink,
        }));
        deltas.extend(new.difference(&old).map(|target| LinkDelta {
            field,
            target: *target,
            op: DeltaOp::Link,
        }));
    }
    deltas
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// The mutated node. Cascades start here.
    pub root: NodeId,
    pub changed: EnumSet<LinkField>,
    pub linked: usize,
    pub unlinked: usize,
    pub writes: usize,
    pub skipped: Vec<NodeId>,
    pub failures: Vec<(LinkDelta, CodexError)>,
}

impl ReconcileReport {
    fn new(root: NodeId) -> Self {
        ReconcileReport {
            root,
            changed: EnumSet::empty(),
            linked: 0,
            unlinked: 0,
            writes: 0,
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct UpdateReconciler {
    sync: Arc<LinkSynchronizer>,
}

impl UpdateReconciler {
    pub fn new(sync: Arc<LinkSynchronizer>) -> Self {
        UpdateReconciler { sync }
    }

    pub async fn reconcile(&self, event: &MutationEvent) -> ReconcileReport {
        let mut report = ReconcileReport::new(event.id);
        if event.origin == EventOrigin::Local {
            return report;
        }
        report.changed = event.touched_links();
        let deltas = plan_deltas(event);
        if deltas.is_empty() {
            return report;
        }
        tracing::debug!(
            "[UpdateReconciler] {event}: {} deltas across {:?}",
            deltas.len(),
            report.changed
        );

        let results = join_all(deltas.iter().map(|delta| self.apply(&event.new, *delta))).await;
        for (delta, result) in deltas.into_iter().zip(results) {
            match result {
                Ok(outcome) => {
                    match delta.op {
                        DeltaOp::Link => report.linked += 1,
                        DeltaOp::Unlink => report.unlinked += 1,
                    }
                    report.writes += outcome.writes;
                    report.skipped.extend(outcome.skipped);
                }
                Err(e) => {
                    tracing::warn!(
                        "[UpdateReconciler] inverse update {delta} for {} failed: {e}",
                        event.id
                    );
                    report.failures.push((delta, e));
                }
            }
        }
        report
    }

    async fn apply(&self, node: &Node, delta: LinkDelta) -> Result<SyncOutcome, CodexError> {
        let Some(target) = self.sync.store().get(&delta.target).await? else {
            tracing::debug!("[UpdateReconciler] {delta} is dangling, skipping");
            return Ok(SyncOutcome {
                writes: 0,
                skipped: vec![delta.target],
            });
        };
        match delta.op {
            DeltaOp::Link => self.sync.link_peers(node, &target, delta.field).await,
            DeltaOp::Unlink => self.sync.unlink_peers(node, &target, delta.field).await,
        }
    }
}
