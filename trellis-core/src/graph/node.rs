//! Graph Nodes
//!
//! This module defines the node types that live in the unit graph, the edges
//! between them, and the callback types the engine invokes while draining.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use smallvec::SmallVec;

use super::sid::Sid;
use crate::error::Result;
use crate::reactive::{EffectContext, StateView};

/// Unique identifier of a built (or building) graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    /// Allocate a fresh graph id.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Identifier of a node: the owning graph plus the node's arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    graph: GraphId,
    index: u32,
}

impl NodeId {
    pub(crate) fn new(graph: GraphId, index: usize) -> Self {
        Self {
            graph,
            index: index as u32,
        }
    }

    /// The graph this node belongs to.
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Position of the node in its graph's arena.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.graph, self.index)
    }
}

/// Scheduling tier of a node. Lower tiers drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Event forwarding, store writes and edge reducers.
    Pure,
    /// Reads of other stores: `sample` and `combine`.
    Sampler,
    /// Side effects: effect launches and watchers.
    Effect,
}

impl Priority {
    pub(crate) const COUNT: usize = 3;

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

/// Outcome of an effect call: `Ok(result)` or `Err(error)`.
pub type Outcome = std::result::Result<Value, Value>;

/// Edge guard. Receives the payload and the scope state.
pub type FilterFn = Arc<dyn Fn(&Value, &StateView<'_>) -> Result<bool> + Send + Sync>;

/// Edge payload transform. Receives the payload and the scope state.
pub type TransformFn = Arc<dyn Fn(&Value, &StateView<'_>) -> Result<Value> + Send + Sync>;

/// `sample` callback over `(source value, clock payload)`.
pub type SampleFn<T> = Arc<dyn Fn(&Value, &Value) -> T + Send + Sync>;

/// `combine` callback over the current values of its sources.
pub type CombineFn = Arc<dyn Fn(&[&Value]) -> Value + Send + Sync>;

/// Watcher callback.
pub type WatchFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Effect implementation.
pub type HandlerFn = Arc<dyn Fn(Value, EffectContext) -> BoxFuture<'static, Outcome> + Send + Sync>;

/// Parameter mapper of an attached effect, over `(params, source value)`.
pub type MapParamsFn = Arc<dyn Fn(Value, Option<&Value>) -> Outcome + Send + Sync>;

pub(crate) fn filter_fn<F>(f: F) -> FilterFn
where
    F: Fn(&Value, &StateView<'_>) -> Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn transform_fn<F>(f: F) -> TransformFn
where
    F: Fn(&Value, &StateView<'_>) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A directed edge to a downstream node.
///
/// The guard and transform are evaluated when the child transaction is
/// dequeued, so they always observe the state left by earlier transactions.
#[derive(Clone)]
pub struct Edge {
    pub(crate) to: NodeId,
    pub(crate) filter: Option<FilterFn>,
    pub(crate) transform: Option<TransformFn>,
}

impl Edge {
    /// Plain forwarding edge.
    pub(crate) fn to(to: NodeId) -> Self {
        Self {
            to,
            filter: None,
            transform: None,
        }
    }

    pub(crate) fn with_filter(mut self, filter: FilterFn) -> Self {
        self.filter = Some(filter);
        self
    }

    pub(crate) fn with_transform(mut self, transform: TransformFn) -> Self {
        self.transform = Some(transform);
        self
    }

    /// The downstream node.
    pub fn target(&self) -> NodeId {
        self.to
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("to", &self.to)
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// How an effect node produces its result.
#[derive(Clone)]
pub enum Handler {
    /// A user implementation.
    Native(HandlerFn),
    /// An `attach` wrapper: map params (optionally reading a store), then
    /// call the wrapped effect in the same scope.
    Attached {
        /// The wrapped effect node.
        effect: NodeId,
        /// Store read when the call starts.
        source: Option<NodeId>,
        /// Fallible parameter mapping.
        map_params: Option<MapParamsFn>,
    },
}

/// Helper units created alongside every effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectParts {
    /// `{status, params, result | error}` once a call settles.
    pub finally: NodeId,
    /// `{params, result}` on success.
    pub done: NodeId,
    /// `{params, error}` on failure.
    pub fail: NodeId,
    /// The bare result on success.
    pub done_data: NodeId,
    /// The bare error on failure.
    pub fail_data: NodeId,
    /// Number of calls in flight.
    pub in_flight: NodeId,
    /// `in_flight > 0`.
    pub pending: NodeId,
}

/// Internal computation links.
#[derive(Clone)]
pub enum Computation {
    /// Reads `source` (or takes the clock payload when absent), then
    /// filters and maps it.
    Sample {
        /// Store to read; `None` means "use the clock payload".
        source: Option<NodeId>,
        /// Guard over `(source value, clock payload)`.
        filter: Option<SampleFn<bool>>,
        /// Mapping over `(source value, clock payload)`.
        map: Option<SampleFn<Value>>,
    },
    /// Recomputes a derived store from its sources.
    Combine {
        /// Source stores, in argument order.
        sources: SmallVec<[NodeId; 4]>,
        /// The derived store being maintained.
        target: NodeId,
        /// The combining function.
        combine: CombineFn,
    },
    /// Runs a side-effecting callback.
    Watch(WatchFn),
}

/// The kind of node in the unit graph.
#[derive(Clone)]
pub enum NodeKind {
    /// Pass-through unit.
    Event {
        /// Produced by `map`/`filter`/`sample` rather than declared.
        derived: bool,
    },
    /// Stateful unit.
    Store {
        /// Value every fresh scope starts from.
        default: Value,
        /// Produced by `combine` or store mapping.
        derived: bool,
        /// Included in snapshots when it has a sid.
        serialize: bool,
    },
    /// Asynchronous unit.
    Effect {
        /// Implementation.
        handler: Handler,
        /// Helper units.
        parts: EffectParts,
    },
    /// Internal link.
    Computed(Computation),
    /// Namespace container. Never triggered.
    Domain,
}

impl NodeKind {
    /// Short label used in logs and debug output.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Event { .. } => "event",
            NodeKind::Store { .. } => "store",
            NodeKind::Effect { .. } => "effect",
            NodeKind::Computed(Computation::Sample { .. }) => "sample",
            NodeKind::Computed(Computation::Combine { .. }) => "combine",
            NodeKind::Computed(Computation::Watch(_)) => "watch",
            NodeKind::Domain => "domain",
        }
    }

    /// Tier this kind of node is scheduled in.
    pub fn priority(&self) -> Priority {
        match self {
            NodeKind::Event { .. } | NodeKind::Store { .. } | NodeKind::Domain => Priority::Pure,
            NodeKind::Computed(Computation::Sample { .. })
            | NodeKind::Computed(Computation::Combine { .. }) => Priority::Sampler,
            NodeKind::Computed(Computation::Watch(_)) | NodeKind::Effect { .. } => {
                Priority::Effect
            }
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Event { derived } => {
                f.debug_struct("Event").field("derived", derived).finish()
            }
            NodeKind::Store {
                default,
                derived,
                serialize,
            } => f
                .debug_struct("Store")
                .field("default", default)
                .field("derived", derived)
                .field("serialize", serialize)
                .finish(),
            NodeKind::Effect { parts, .. } => {
                f.debug_struct("Effect").field("parts", parts).finish()
            }
            other => f.write_str(other.label()),
        }
    }
}

/// A node in the unit graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) sid: Option<Sid>,
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) edges: SmallVec<[Edge; 2]>,
    pub(crate) domain: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, kind: NodeKind, domain: Option<NodeId>) -> Self {
        Self {
            id,
            sid: None,
            name,
            kind,
            edges: SmallVec::new(),
            domain,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Stable identifier, if the node has one.
    pub fn sid(&self) -> Option<&Sid> {
        self.sid.as_ref()
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the node's kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Outgoing edges in registration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Owning domain, if declared inside one.
    pub fn domain(&self) -> Option<NodeId> {
        self.domain
    }

    /// Scheduling tier.
    pub fn priority(&self) -> Priority {
        self.kind.priority()
    }

    /// Whether the node holds state in a scope.
    pub fn is_store(&self) -> bool {
        matches!(self.kind, NodeKind::Store { .. })
    }

    /// Whether the node was produced by composition or transformation.
    pub fn is_derived(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Event { derived: true } | NodeKind::Store { derived: true, .. }
        )
    }

    /// Default value of a store node.
    pub fn default_value(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Store { default, .. } => Some(default),
            _ => None,
        }
    }

    /// Whether the node belongs in snapshots.
    pub fn is_serializable(&self) -> bool {
        matches!(self.kind, NodeKind::Store { serialize: true, .. }) && self.sid.is_some()
    }
}
