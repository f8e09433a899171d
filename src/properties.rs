pub use enumset::EnumSet;
/// [crate::properties] contains the basic building blocks of the campaign graph: identifiers,
/// node kinds, link fields and the per-kind link records.
use enumset::EnumSetType;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    str::FromStr,
};
pub use uuid::Uuid;

use crate::error::CodexError;

/// Node ID
///
/// Stable unique identifier of one campaign entity. Link fields hold these; an id that no longer
/// resolves in the [crate::store::EntityStore] is a dangling reference and is skipped by every
/// synchronization operation rather than reported as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        NodeId(Uuid::new_v4())
    }

    /// Use a [NodeId::nil] as a placeholder for ids that were never assigned by a store.
    pub fn nil() -> Self {
        NodeId(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        NodeId(uuid)
    }
}

impl AsRef<Uuid> for NodeId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = CodexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NodeId(Uuid::parse_str(s)?))
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The five kinds of campaign entity. Every [Node] has exactly one.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Region,
    Location,
    Shop,
    Npc,
    Group,
}

impl NodeKind {
    pub fn all() -> &'static [NodeKind] {
        &[
            NodeKind::Region,
            NodeKind::Location,
            NodeKind::Shop,
            NodeKind::Npc,
            NodeKind::Group,
        ]
    }

    /// The link fields a node of this kind carries.
    pub fn link_fields(self) -> EnumSet<LinkField> {
        match self {
            NodeKind::Region => {
                LinkField::LinkedLocations
                    | LinkField::LinkedShops
                    | LinkField::LinkedNpcs
                    | LinkField::Groups
            }
            NodeKind::Location => {
                LinkField::LinkedNpcs
                    | LinkField::LinkedShops
                    | LinkField::ParentRegion
                    | LinkField::Groups
            }
            NodeKind::Shop => LinkField::LinkedNpcs | LinkField::Container | LinkField::Groups,
            NodeKind::Npc => {
                LinkField::LinkedLocations
                    | LinkField::LinkedShops
                    | LinkField::Associates
                    | LinkField::Groups
            }
            NodeKind::Group => LinkField::Members | LinkField::Groups,
        }
    }

    /// The exclusive parent slot of this kind, if it has one.
    pub fn exclusive_slot(self) -> Option<LinkField> {
        match self {
            NodeKind::Location => Some(LinkField::ParentRegion),
            NodeKind::Shop => Some(LinkField::Container),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Region => "region",
            NodeKind::Location => "location",
            NodeKind::Shop => "shop",
            NodeKind::Npc => "npc",
            NodeKind::Group => "group",
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named link field on a node. Most are sets of node ids; [LinkField::ParentRegion] and
/// [LinkField::Container] are exclusive scalar slots holding at most one parent.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
#[serde(rename_all = "camelCase")]
pub enum LinkField {
    LinkedLocations,
    LinkedShops,
    #[serde(rename = "linkedNPCs")]
    LinkedNpcs,
    Associates,
    ParentRegion,
    /// A shop's parent container, either a Location or a Region.
    #[serde(rename = "linkedLocation")]
    Container,
    Members,
    Groups,
}

impl LinkField {
    pub fn is_exclusive(self) -> bool {
        matches!(self, LinkField::ParentRegion | LinkField::Container)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkField::LinkedLocations => "linkedLocations",
            LinkField::LinkedShops => "linkedShops",
            LinkField::LinkedNpcs => "linkedNPCs",
            LinkField::Associates => "associates",
            LinkField::ParentRegion => "parentRegion",
            LinkField::Container => "linkedLocation",
            LinkField::Members => "members",
            LinkField::Groups => "groups",
        }
    }
}

impl Display for LinkField {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Group membership is heterogeneous, so members are stored as a tagged union over the node kinds
/// rather than bare ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MemberRef {
    Region(NodeId),
    Location(NodeId),
    Shop(NodeId),
    Npc(NodeId),
    Group(NodeId),
}

impl MemberRef {
    pub fn new(kind: NodeKind, id: NodeId) -> Self {
        match kind {
            NodeKind::Region => MemberRef::Region(id),
            NodeKind::Location => MemberRef::Location(id),
            NodeKind::Shop => MemberRef::Shop(id),
            NodeKind::Npc => MemberRef::Npc(id),
            NodeKind::Group => MemberRef::Group(id),
        }
    }

    pub fn of(node: &Node) -> Self {
        MemberRef::new(node.kind(), node.id)
    }

    pub fn id(&self) -> NodeId {
        match self {
            MemberRef::Region(id)
            | MemberRef::Location(id)
            | MemberRef::Shop(id)
            | MemberRef::Npc(id)
            | MemberRef::Group(id) => *id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            MemberRef::Region(_) => NodeKind::Region,
            MemberRef::Location(_) => NodeKind::Location,
            MemberRef::Shop(_) => NodeKind::Shop,
            MemberRef::Npc(_) => NodeKind::Npc,
            MemberRef::Group(_) => NodeKind::Group,
        }
    }
}

/// One line of a shop's inventory. `item` is an external item reference; items are not nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub item: String,
    pub quantity: u32,
    #[serde(default)]
    pub price_override: Option<f64>,
}

impl InventoryEntry {
    pub fn new(item: impl Into<String>, quantity: u32) -> Self {
        InventoryEntry {
            item: item.into(),
            quantity,
            price_override: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionData {
    pub linked_locations: BTreeSet<NodeId>,
    pub linked_shops: BTreeSet<NodeId>,
    #[serde(rename = "linkedNPCs")]
    pub linked_npcs: BTreeSet<NodeId>,
    pub linked_scene: Option<String>,
    pub groups: BTreeSet<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationData {
    #[serde(rename = "linkedNPCs")]
    pub linked_npcs: BTreeSet<NodeId>,
    pub linked_shops: BTreeSet<NodeId>,
    pub parent_region: Option<NodeId>,
    pub linked_scene: Option<String>,
    pub groups: BTreeSet<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShopData {
    #[serde(rename = "linkedNPCs")]
    pub linked_npcs: BTreeSet<NodeId>,
    #[serde(rename = "linkedLocation")]
    pub container: Option<NodeId>,
    pub inventory: Vec<InventoryEntry>,
    pub markup: f64,
    pub linked_scene: Option<String>,
    pub groups: BTreeSet<NodeId>,
}

impl Default for ShopData {
    fn default() -> Self {
        ShopData {
            linked_npcs: BTreeSet::new(),
            container: None,
            inventory: Vec::new(),
            markup: 1.0,
            linked_scene: None,
            groups: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NpcData {
    /// Locations and Regions this NPC is attached to.
    pub linked_locations: BTreeSet<NodeId>,
    pub linked_shops: BTreeSet<NodeId>,
    pub associates: BTreeSet<NodeId>,
    pub linked_actor: Option<String>,
    pub groups: BTreeSet<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupData {
    pub members: BTreeSet<MemberRef>,
    pub groups: BTreeSet<NodeId>,
}

/// The kind-dependent record of a node: its link fields plus the few kind-specific scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeData {
    Region(RegionData),
    Location(LocationData),
    Shop(ShopData),
    Npc(NpcData),
    Group(GroupData),
}

impl NodeData {
    /// All link sets empty, kind-specific scalars at their defaults.
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Region => NodeData::Region(RegionData::default()),
            NodeKind::Location => NodeData::Location(LocationData::default()),
            NodeKind::Shop => NodeData::Shop(ShopData::default()),
            NodeKind::Npc => NodeData::Npc(NpcData::default()),
            NodeKind::Group => NodeData::Group(GroupData::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Region(_) => NodeKind::Region,
            NodeData::Location(_) => NodeKind::Location,
            NodeData::Shop(_) => NodeKind::Shop,
            NodeData::Npc(_) => NodeKind::Npc,
            NodeData::Group(_) => NodeKind::Group,
        }
    }

    fn groups(&self) -> &BTreeSet<NodeId> {
        match self {
            NodeData::Region(d) => &d.groups,
            NodeData::Location(d) => &d.groups,
            NodeData::Shop(d) => &d.groups,
            NodeData::Npc(d) => &d.groups,
            NodeData::Group(d) => &d.groups,
        }
    }

    fn groups_mut(&mut self) -> &mut BTreeSet<NodeId> {
        match self {
            NodeData::Region(d) => &mut d.groups,
            NodeData::Location(d) => &mut d.groups,
            NodeData::Shop(d) => &mut d.groups,
            NodeData::Npc(d) => &mut d.groups,
            NodeData::Group(d) => &mut d.groups,
        }
    }

    fn linked_scene_mut(&mut self) -> Option<&mut Option<String>> {
        match self {
            NodeData::Region(d) => Some(&mut d.linked_scene),
            NodeData::Location(d) => Some(&mut d.linked_scene),
            NodeData::Shop(d) => Some(&mut d.linked_scene),
            _ => None,
        }
    }
}

/// Addressable field of a node, as understood by [crate::store::EntityStore::set_field].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    Link(LinkField),
    Inventory,
    Markup,
    LinkedScene,
    LinkedActor,
    Name,
    Description,
    Notes,
}

impl From<LinkField> for Field {
    fn from(field: LinkField) -> Self {
        Field::Link(field)
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Field::Link(link) => write!(f, "{link}"),
            Field::Inventory => write!(f, "inventory"),
            Field::Markup => write!(f, "markup"),
            Field::LinkedScene => write!(f, "linkedScene"),
            Field::LinkedActor => write!(f, "linkedActor"),
            Field::Name => write!(f, "name"),
            Field::Description => write!(f, "description"),
            Field::Notes => write!(f, "notes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Ids(BTreeSet<NodeId>),
    Ref(Option<NodeId>),
    Members(BTreeSet<MemberRef>),
    Inventory(Vec<InventoryEntry>),
    Number(f64),
    External(Option<String>),
    Text(String),
}

/// One campaign entity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
    pub data: NodeData,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, data: NodeData) -> Self {
        Node {
            id,
            name: name.into(),
            description: String::new(),
            notes: String::new(),
            data,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    /// The ids held by `field`, whatever its shape: a set, an exclusive scalar (zero or one id),
    /// or the group member list projected to ids. Fields the kind does not carry are empty.
    pub fn link_ids(&self, field: LinkField) -> BTreeSet<NodeId> {
        if let Some(set) = self.id_set(field) {
            return set.clone();
        }
        if let Some(slot) = self.scalar(field) {
            return slot.iter().copied().collect();
        }
        if let Some(members) = self.members(field) {
            return members.iter().map(MemberRef::id).collect();
        }
        BTreeSet::new()
    }

    pub fn has_link(&self, field: LinkField, id: &NodeId) -> bool {
        if let Some(set) = self.id_set(field) {
            return set.contains(id);
        }
        if let Some(slot) = self.scalar(field) {
            return slot.as_ref() == Some(id);
        }
        if let Some(members) = self.members(field) {
            return members.iter().any(|m| m.id() == *id);
        }
        false
    }

    /// The current value of an exclusive slot, `None` when the slot is empty or the kind has no
    /// such slot.
    pub fn parent(&self, field: LinkField) -> Option<NodeId> {
        self.scalar(field).and_then(|slot| *slot)
    }

    /// The value `field` would hold with `target` added, or `None` when `target` is already
    /// present (or the field is not carried by this kind).
    pub fn with_link(&self, field: LinkField, target: &Node) -> Option<FieldValue> {
        if let Some(set) = self.id_set(field) {
            if set.contains(&target.id) {
                return None;
            }
            let mut set = set.clone();
            set.insert(target.id);
            return Some(FieldValue::Ids(set));
        }
        if let Some(slot) = self.scalar(field) {
            if *slot == Some(target.id) {
                return None;
            }
            return Some(FieldValue::Ref(Some(target.id)));
        }
        if let Some(members) = self.members(field) {
            if members.iter().any(|m| m.id() == target.id) {
                return None;
            }
            let mut members = members.clone();
            members.insert(MemberRef::of(target));
            return Some(FieldValue::Members(members));
        }
        None
    }

    /// The value `field` would hold with `target` removed, or `None` when it is already absent.
    /// An exclusive slot is only cleared when it currently points at `target`.
    pub fn without_link(&self, field: LinkField, target: &NodeId) -> Option<FieldValue> {
        if let Some(set) = self.id_set(field) {
            if !set.contains(target) {
                return None;
            }
            let mut set = set.clone();
            set.remove(target);
            return Some(FieldValue::Ids(set));
        }
        if let Some(slot) = self.scalar(field) {
            if slot.as_ref() != Some(target) {
                return None;
            }
            return Some(FieldValue::Ref(None));
        }
        if let Some(members) = self.members(field) {
            if !members.iter().any(|m| m.id() == *target) {
                return None;
            }
            let members = members
                .iter()
                .filter(|m| m.id() != *target)
                .copied()
                .collect();
            return Some(FieldValue::Members(members));
        }
        None
    }

    pub fn field(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Link(link) => {
                if let Some(set) = self.id_set(link) {
                    Some(FieldValue::Ids(set.clone()))
                } else if let Some(slot) = self.scalar(link) {
                    Some(FieldValue::Ref(*slot))
                } else {
                    self.members(link).cloned().map(FieldValue::Members)
                }
            }
            Field::Inventory => match &self.data {
                NodeData::Shop(d) => Some(FieldValue::Inventory(d.inventory.clone())),
                _ => None,
            },
            Field::Markup => match &self.data {
                NodeData::Shop(d) => Some(FieldValue::Number(d.markup)),
                _ => None,
            },
            Field::LinkedScene => match &self.data {
                NodeData::Region(d) => Some(FieldValue::External(d.linked_scene.clone())),
                NodeData::Location(d) => Some(FieldValue::External(d.linked_scene.clone())),
                NodeData::Shop(d) => Some(FieldValue::External(d.linked_scene.clone())),
                _ => None,
            },
            Field::LinkedActor => match &self.data {
                NodeData::Npc(d) => Some(FieldValue::External(d.linked_actor.clone())),
                _ => None,
            },
            Field::Name => Some(FieldValue::Text(self.name.clone())),
            Field::Description => Some(FieldValue::Text(self.description.clone())),
            Field::Notes => Some(FieldValue::Text(self.notes.clone())),
        }
    }

    pub fn set_field(&mut self, field: Field, value: FieldValue) -> Result<(), CodexError> {
        let kind = self.kind();
        let mismatch = |value: &FieldValue| {
            CodexError::Field(format!("{kind} node field '{field}' cannot hold {value:?}"))
        };
        match (field, value) {
            (Field::Link(link), FieldValue::Ids(ids)) => match self.id_set_mut(link) {
                Some(set) => *set = ids,
                None => return Err(mismatch(&FieldValue::Ids(ids))),
            },
            (Field::Link(link), FieldValue::Ref(parent)) => match self.scalar_mut(link) {
                Some(slot) => *slot = parent,
                None => return Err(mismatch(&FieldValue::Ref(parent))),
            },
            (Field::Link(LinkField::Members), FieldValue::Members(members)) => match &mut self.data
            {
                NodeData::Group(d) => d.members = members,
                _ => return Err(mismatch(&FieldValue::Members(members))),
            },
            (Field::Inventory, FieldValue::Inventory(inventory)) => match &mut self.data {
                NodeData::Shop(d) => d.inventory = inventory,
                _ => return Err(mismatch(&FieldValue::Inventory(inventory))),
            },
            (Field::Markup, FieldValue::Number(markup)) => match &mut self.data {
                NodeData::Shop(d) => d.markup = markup,
                _ => return Err(mismatch(&FieldValue::Number(markup))),
            },
            (Field::LinkedScene, FieldValue::External(scene)) => {
                match self.data.linked_scene_mut() {
                    Some(slot) => *slot = scene,
                    None => return Err(mismatch(&FieldValue::External(scene))),
                }
            }
            (Field::LinkedActor, FieldValue::External(actor)) => match &mut self.data {
                NodeData::Npc(d) => d.linked_actor = actor,
                _ => return Err(mismatch(&FieldValue::External(actor))),
            },
            (Field::Name, FieldValue::Text(text)) => self.name = text,
            (Field::Description, FieldValue::Text(text)) => self.description = text,
            (Field::Notes, FieldValue::Text(text)) => self.notes = text,
            (_, value) => return Err(mismatch(&value)),
        }
        Ok(())
    }

    fn id_set(&self, field: LinkField) -> Option<&BTreeSet<NodeId>> {
        use LinkField::*;
        match (&self.data, field) {
            (NodeData::Region(d), LinkedLocations) => Some(&d.linked_locations),
            (NodeData::Region(d), LinkedShops) => Some(&d.linked_shops),
            (NodeData::Region(d), LinkedNpcs) => Some(&d.linked_npcs),
            (NodeData::Location(d), LinkedNpcs) => Some(&d.linked_npcs),
            (NodeData::Location(d), LinkedShops) => Some(&d.linked_shops),
            (NodeData::Shop(d), LinkedNpcs) => Some(&d.linked_npcs),
            (NodeData::Npc(d), LinkedLocations) => Some(&d.linked_locations),
            (NodeData::Npc(d), LinkedShops) => Some(&d.linked_shops),
            (NodeData::Npc(d), Associates) => Some(&d.associates),
            (data, Groups) => Some(data.groups()),
            _ => None,
        }
    }

    fn id_set_mut(&mut self, field: LinkField) -> Option<&mut BTreeSet<NodeId>> {
        use LinkField::*;
        match (&mut self.data, field) {
            (NodeData::Region(d), LinkedLocations) => Some(&mut d.linked_locations),
            (NodeData::Region(d), LinkedShops) => Some(&mut d.linked_shops),
            (NodeData::Region(d), LinkedNpcs) => Some(&mut d.linked_npcs),
            (NodeData::Location(d), LinkedNpcs) => Some(&mut d.linked_npcs),
            (NodeData::Location(d), LinkedShops) => Some(&mut d.linked_shops),
            (NodeData::Shop(d), LinkedNpcs) => Some(&mut d.linked_npcs),
            (NodeData::Npc(d), LinkedLocations) => Some(&mut d.linked_locations),
            (NodeData::Npc(d), LinkedShops) => Some(&mut d.linked_shops),
            (NodeData::Npc(d), Associates) => Some(&mut d.associates),
            (data, Groups) => Some(data.groups_mut()),
            _ => None,
        }
    }

    fn scalar(&self, field: LinkField) -> Option<&Option<NodeId>> {
        match (&self.data, field) {
            (NodeData::Location(d), LinkField::ParentRegion) => Some(&d.parent_region),
            (NodeData::Shop(d), LinkField::Container) => Some(&d.container),
            _ => None,
        }
    }

    fn scalar_mut(&mut self, field: LinkField) -> Option<&mut Option<NodeId>> {
        match (&mut self.data, field) {
            (NodeData::Location(d), LinkField::ParentRegion) => Some(&mut d.parent_region),
            (NodeData::Shop(d), LinkField::Container) => Some(&mut d.container),
            _ => None,
        }
    }

    fn members(&self, field: LinkField) -> Option<&BTreeSet<MemberRef>> {
        match (&self.data, field) {
            (NodeData::Group(d), LinkField::Members) => Some(&d.members),
            _ => None,
        }
    }
}
