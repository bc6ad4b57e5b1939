//! Unit Graph
//!
//! This module implements the topology that every scope evaluates against.
//!
//! # Overview
//!
//! The graph is an arena of nodes indexed by [`NodeId`]:
//!
//! - Nodes are stores, events, effects, internal computed links and domains
//! - Edges are stored on the upstream node, in registration order
//!
//! A [`GraphBuilder`] declares units and wires edges; [`GraphBuilder::build`]
//! freezes the result into a [`Graph`]. A built graph never changes. Scopes
//! hold a clone of the handle and keep all mutable state on their side.
//!
//! # Design Decisions
//!
//! 1. Edges point downstream only. Nothing in the engine walks upstream, so
//!    there are no back-references and no ownership cycles.
//!
//! 2. Derived nodes are always declared after their sources, which makes
//!    declaration order a valid topological order for recomputation.
//!
//! 3. Sids are resolved once at build time and indexed for snapshot lookup.

mod builder;
mod node;
mod sid;
mod unit;

use std::sync::Arc;

use indexmap::IndexMap;

pub use builder::{Attach, GraphBuilder, GraphConfig, Sample, StoreConfig};
pub use node::{
    CombineFn, Computation, Edge, EffectParts, FilterFn, GraphId, Handler, HandlerFn,
    MapParamsFn, Node, NodeId, NodeKind, Outcome, Priority, SampleFn, TransformFn, WatchFn,
};
pub use sid::Sid;
pub use unit::{Domain, Effect, Event, Store, Unit};

/// A frozen unit graph. Cloning shares the same topology.
#[derive(Debug, Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

#[derive(Debug)]
struct GraphInner {
    id: GraphId,
    nodes: Vec<Node>,
    sids: IndexMap<Sid, NodeId>,
}

impl Graph {
    pub(crate) fn new(id: GraphId, nodes: Vec<Node>, sids: IndexMap<Sid, NodeId>) -> Self {
        Self {
            inner: Arc::new(GraphInner { id, nodes, sids }),
        }
    }

    /// Identifier shared by every node of this graph.
    pub fn id(&self) -> GraphId {
        self.inner.id
    }

    /// Look up a node. Returns `None` for ids from another graph.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        if id.graph() != self.inner.id {
            return None;
        }
        self.inner.nodes.get(id.index())
    }

    /// Whether `id` refers to a node of this graph.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Look up a store by its sid.
    pub fn find_sid(&self, sid: &str) -> Option<&Node> {
        let id = self.inner.sids.get(&Sid::new(sid))?;
        self.node(*id)
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.nodes.iter()
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Node by id, for ids the engine produced itself.
    pub(crate) fn get(&self, id: NodeId) -> &Node {
        &self.inner.nodes[id.index()]
    }
}
