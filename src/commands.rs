use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    creation::ActorRef,
    properties::{LinkField, Node, NodeId, NodeKind},
};

/// Command interface between UI triggers and the [crate::codex::Codex]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Create a node of the given kind, falling back to the kind's default name. Duplicate
    /// requests still in flight are dropped.
    Create(NodeKind, Option<String>),
    /// Create an NPC, optionally bound to a game-system actor
    CreateNpc(Option<ActorRef>, Option<String>),
    /// Return the NPC bound to an actor, creating it if needed
    NpcForActor(ActorRef),
    /// Link `source.field` to `target`, maintaining the inverse side
    Link {
        source: NodeId,
        field: LinkField,
        target: NodeId,
    },
    Unlink {
        source: NodeId,
        field: LinkField,
        target: NodeId,
    },
    /// Add a quantity of an external item to a shop's inventory
    AddItem {
        shop: NodeId,
        item: String,
        quantity: u32,
    },
    /// Attach (or with `None` detach) an external scene to a region, location or shop
    LinkScene(NodeId, Option<String>),
    /// Unbind every NPC from an actor that no longer exists
    ForgetActor(String),
    /// Resolve one link field to the live nodes it references
    GetLinked(NodeId, LinkField),
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Op::Create(kind, name) => write!(f, "Create({kind}, {})", name.as_deref().unwrap_or("-")),
            Op::CreateNpc(actor, name) => write!(
                f,
                "CreateNpc({}, {})",
                actor.as_ref().map(|a| a.id.as_str()).unwrap_or("-"),
                name.as_deref().unwrap_or("-")
            ),
            Op::NpcForActor(actor) => write!(f, "NpcForActor({})", actor.id),
            Op::Link {
                source,
                field,
                target,
            } => write!(f, "Link({source}.{field} -> {target})"),
            Op::Unlink {
                source,
                field,
                target,
            } => write!(f, "Unlink({source}.{field} -> {target})"),
            Op::AddItem {
                shop,
                item,
                quantity,
            } => write!(f, "AddItem({shop}: {quantity}x {item})"),
            Op::LinkScene(id, scene) => {
                write!(f, "LinkScene({id}, {})", scene.as_deref().unwrap_or("-"))
            }
            Op::ForgetActor(actor) => write!(f, "ForgetActor({actor})"),
            Op::GetLinked(id, field) => write!(f, "GetLinked({id}.{field})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpResult {
    /// A creation was dropped because an identical one is still in flight
    Deduplicated,
    Created(NodeId),
    /// Number of store writes a link edit needed
    Synced(usize),
    /// Number of NPCs unbound from an actor
    Cleared(usize),
    Nodes(Vec<Node>),
}

impl Display for OpResult {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OpResult::Deduplicated => write!(f, "Deduplicated"),
            OpResult::Created(id) => write!(f, "Created({id})"),
            OpResult::Synced(writes) => write!(f, "Synced({writes} writes)"),
            OpResult::Cleared(count) => write!(f, "Cleared({count})"),
            OpResult::Nodes(nodes) => write!(
                f,
                "Nodes({})",
                nodes
                    .iter()
                    .map(|n| n.name.clone())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
        }
    }
}
