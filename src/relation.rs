//! The fixed relation table.
//!
//! Every link field on a node pairs with exactly one inverse field on the target node, chosen by
//! the source kind, the field and the target kind. The table is small and closed: a request that
//! does not match a row is a caller error, never a new relation.

use crate::properties::{EnumSet, LinkField, NodeKind};
use std::fmt::{Display, Formatter};

/// Who holds the exclusive slot of an edge, if either side does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusivity {
    /// Both sides are sets.
    None,
    /// The source field is the child's exclusive parent slot; the target is the parent.
    SourceIsChild,
    /// The inverse field on the target is its exclusive parent slot; the source is the parent.
    TargetIsChild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub sources: EnumSet<NodeKind>,
    pub field: LinkField,
    pub targets: EnumSet<NodeKind>,
    pub inverse: LinkField,
}

const CONTAINERS: EnumSet<NodeKind> = enumset::enum_set!(NodeKind::Region | NodeKind::Location);
const ALL_KINDS: EnumSet<NodeKind> = enumset::enum_set!(
    NodeKind::Region | NodeKind::Location | NodeKind::Shop | NodeKind::Npc | NodeKind::Group
);

const RELATIONS: &[Relation] = &[
    // Location/Region roster <-> NPC placement
    Relation {
        sources: CONTAINERS,
        field: LinkField::LinkedNpcs,
        targets: enumset::enum_set!(NodeKind::Npc),
        inverse: LinkField::LinkedLocations,
    },
    Relation {
        sources: enumset::enum_set!(NodeKind::Npc),
        field: LinkField::LinkedLocations,
        targets: CONTAINERS,
        inverse: LinkField::LinkedNpcs,
    },
    // Shop staff <-> NPC employment
    Relation {
        sources: enumset::enum_set!(NodeKind::Shop),
        field: LinkField::LinkedNpcs,
        targets: enumset::enum_set!(NodeKind::Npc),
        inverse: LinkField::LinkedShops,
    },
    Relation {
        sources: enumset::enum_set!(NodeKind::Npc),
        field: LinkField::LinkedShops,
        targets: enumset::enum_set!(NodeKind::Shop),
        inverse: LinkField::LinkedNpcs,
    },
    // NPC associates, self-symmetric
    Relation {
        sources: enumset::enum_set!(NodeKind::Npc),
        field: LinkField::Associates,
        targets: enumset::enum_set!(NodeKind::Npc),
        inverse: LinkField::Associates,
    },
    // Container <-> Shop, exclusive on the shop
    Relation {
        sources: CONTAINERS,
        field: LinkField::LinkedShops,
        targets: enumset::enum_set!(NodeKind::Shop),
        inverse: LinkField::Container,
    },
    Relation {
        sources: enumset::enum_set!(NodeKind::Shop),
        field: LinkField::Container,
        targets: CONTAINERS,
        inverse: LinkField::LinkedShops,
    },
    // Region <-> Location, exclusive on the location
    Relation {
        sources: enumset::enum_set!(NodeKind::Region),
        field: LinkField::LinkedLocations,
        targets: enumset::enum_set!(NodeKind::Location),
        inverse: LinkField::ParentRegion,
    },
    Relation {
        sources: enumset::enum_set!(NodeKind::Location),
        field: LinkField::ParentRegion,
        targets: enumset::enum_set!(NodeKind::Region),
        inverse: LinkField::LinkedLocations,
    },
    // Group membership, heterogeneous
    Relation {
        sources: enumset::enum_set!(NodeKind::Group),
        field: LinkField::Members,
        targets: ALL_KINDS,
        inverse: LinkField::Groups,
    },
    Relation {
        sources: ALL_KINDS,
        field: LinkField::Groups,
        targets: enumset::enum_set!(NodeKind::Group),
        inverse: LinkField::Members,
    },
];

impl Relation {
    /// Look up the relation row for an edge from a `source` node through `field` to a `target`
    /// node.
    pub fn resolve(source: NodeKind, field: LinkField, target: NodeKind) -> Option<Relation> {
        RELATIONS
            .iter()
            .find(|r| r.field == field && r.sources.contains(source) && r.targets.contains(target))
            .copied()
    }

    pub fn exclusivity(&self) -> Exclusivity {
        if self.field.is_exclusive() {
            Exclusivity::SourceIsChild
        } else if self.inverse.is_exclusive() {
            Exclusivity::TargetIsChild
        } else {
            Exclusivity::None
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}<->{}", self.field, self.inverse)
    }
}
