use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::{EnumSet, LinkField, Node, NodeId, NodeKind};

/// Indicates the origin of a [MutationEvent] so the reconciliation pipeline can tell its own
/// writes apart from writes it has to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventOrigin {
    /// Event was generated by a write this core issued while synchronizing links. Its inverse
    /// side has already been handled; it must never be reconciled again, only used to refresh
    /// viewers.
    Local,

    /// Event came from an outside writer (UI action, import, another collaborator). Its link
    /// deltas still need their inverse edges applied.
    #[default]
    Remote,
}

/// Fired by an [crate::store::EntityStore] after every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub id: NodeId,
    pub kind: NodeKind,
    pub old: Node,
    pub new: Node,
    pub origin: EventOrigin,
}

impl MutationEvent {
    pub fn new(old: Node, new: Node, origin: EventOrigin) -> Self {
        MutationEvent {
            id: new.id,
            kind: new.kind(),
            old,
            new,
            origin,
        }
    }

    /// Link fields whose id sets differ between the old and new snapshot.
    pub fn touched_links(&self) -> EnumSet<LinkField> {
        self.kind
            .link_fields()
            .iter()
            .filter(|field| self.old.link_ids(*field) != self.new.link_ids(*field))
            .collect()
    }

    /// Whether this event has to go through reconciliation: only outside writes that changed
    /// at least one link field qualify.
    pub fn needs_reconciliation(&self) -> bool {
        self.origin == EventOrigin::Remote && !self.touched_links().is_empty()
    }
}

impl Display for MutationEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:?}Mutation({} {})", self.origin, self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{FieldValue, NodeData};
    use std::collections::BTreeSet;
    use test_log::test;

    #[test]
    fn test_touched_links_ignores_text_edits() {
        let old = Node::new(NodeId::new(), "Tavern", NodeData::empty(NodeKind::Location));
        let mut new = old.clone();
        new.description = "A smoky room".to_string();

        let event = MutationEvent::new(old.clone(), new.clone(), EventOrigin::Remote);
        assert!(event.touched_links().is_empty());
        assert!(!event.needs_reconciliation());

        new.set_field(
            LinkField::LinkedNpcs.into(),
            FieldValue::Ids(BTreeSet::from([NodeId::new()])),
        )
        .unwrap();
        let event = MutationEvent::new(old, new, EventOrigin::Remote);
        assert_eq!(event.touched_links(), EnumSet::only(LinkField::LinkedNpcs));
        assert!(event.needs_reconciliation());
    }

    #[test]
    fn test_local_events_are_never_reconciled() {
        let old = Node::new(NodeId::new(), "Bob", NodeData::empty(NodeKind::Npc));
        let mut new = old.clone();
        new.set_field(
            LinkField::Associates.into(),
            FieldValue::Ids(BTreeSet::from([NodeId::new()])),
        )
        .unwrap();
        let event = MutationEvent::new(old, new, EventOrigin::Local);
        assert!(!event.touched_links().is_empty());
        assert!(!event.needs_reconciliation());
    }
}
