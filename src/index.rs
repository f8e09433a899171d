//! A read-only snapshot of every node and its outgoing links, handed to the cleanup collaborator
//! when a node is deleted.

use async_trait::async_trait;
use petgraph::{graphmap::DiGraphMap, Direction};
use std::collections::BTreeMap;

use crate::{
    error::CodexError,
    properties::{EnumSet, LinkField, Node, NodeId},
};

/// Node id to links, with each edge labelled by the fields that hold it. Edge targets that do
/// not resolve to an indexed node are kept, so dangling references stay visible.
#[derive(Debug, Clone, Default)]
pub struct LinksIndex {
    nodes: BTreeMap<NodeId, Node>,
    graph: DiGraphMap<NodeId, EnumSet<LinkField>>,
}

impl LinksIndex {
    pub fn build<I: IntoIterator<Item = Node>>(nodes: I) -> Self {
        let mut index = LinksIndex::default();
        for node in nodes {
            index.graph.add_node(node.id);
            for field in node.kind().link_fields() {
                for target in node.link_ids(field) {
                    if let Some(fields) = index.graph.edge_weight_mut(node.id, target) {
                        fields.insert(field);
                    } else {
                        index.graph.add_edge(node.id, target, EnumSet::only(field));
                    }
                }
            }
            index.nodes.insert(node.id, node);
        }
        index
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outgoing links of `id`, keyed by target.
    pub fn links(&self, id: &NodeId) -> BTreeMap<NodeId, EnumSet<LinkField>> {
        if !self.graph.contains_node(*id) {
            return BTreeMap::new();
        }
        self.graph
            .neighbors_directed(*id, Direction::Outgoing)
            .filter_map(|target| Some((target, *self.graph.edge_weight(*id, target)?)))
            .collect()
    }

    /// Every indexed node that holds a reference to `id`, with the fields holding it.
    pub fn referrers(&self, id: &NodeId) -> BTreeMap<NodeId, EnumSet<LinkField>> {
        if !self.graph.contains_node(*id) {
            return BTreeMap::new();
        }
        self.graph
            .neighbors_directed(*id, Direction::Incoming)
            .filter_map(|source| Some((source, *self.graph.edge_weight(source, *id)?)))
            .collect()
    }

    /// `(holder, field, target)` for every link whose target is not indexed.
    pub fn dangling(&self) -> Vec<(NodeId, LinkField, NodeId)> {
        self.graph
            .all_edges()
            .filter(|(_, target, _)| !self.nodes.contains_key(target))
            .flat_map(|(source, target, fields)| {
                fields.iter().map(move |field| (source, field, target))
            })
            .collect()
    }
}

/// External collaborator that strips references to a deleted node from all other nodes.
#[async_trait]
pub trait NodeCleanup: Send + Sync {
    async fn cleanup(&self, deleted: &NodeId, index: &LinksIndex) -> Result<(), CodexError>;
}
