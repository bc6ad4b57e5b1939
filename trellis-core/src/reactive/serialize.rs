//! Snapshots
//!
//! A [`Snapshot`] maps store sids to values. It is what a server sends to a
//! client after rendering: the client forks its own graph with the snapshot
//! and every store picks its value up by sid.
//!
//! Only stores that carry a sid and allow serialization take part. Derived
//! stores never do; they are recomputed from their sources instead.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::scope::Scope;
use super::state::StateTable;
use crate::error::{Error, Result};
use crate::graph::{Graph, Store};

/// Store values keyed by sid, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(IndexMap<String, Value>);

impl Snapshot {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `sid`.
    pub fn get(&self, sid: &str) -> Option<&Value> {
        self.0.get(sid)
    }

    /// Add or replace the value under `sid`.
    pub fn insert(&mut self, sid: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(sid.into(), value)
    }

    /// Whether `sid` is present.
    pub fn contains(&self, sid: &str) -> bool {
        self.0.contains_key(sid)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(sid, value)| (sid.as_str(), value))
    }

    /// Encode as a JSON object.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Decode from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Encode as MessagePack.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Decode from MessagePack.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl FromIterator<(String, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Snapshot> for Value {
    fn from(snapshot: Snapshot) -> Self {
        Value::Object(snapshot.0.into_iter().collect())
    }
}

/// Settings for [`serialize_with`].
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Only include stores changed in the scope. Default: `true`.
    pub only_changes: bool,
    /// Stores to leave out.
    pub ignore: Vec<Store>,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            only_changes: true,
            ignore: Vec::new(),
        }
    }
}

impl SerializeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include unchanged stores too.
    pub fn with_only_changes(mut self, only_changes: bool) -> Self {
        self.only_changes = only_changes;
        self
    }

    /// Leave `store` out.
    pub fn ignore(mut self, store: Store) -> Self {
        self.ignore.push(store);
        self
    }
}

/// Snapshot of the stores changed in `scope`.
pub fn serialize(scope: &Scope) -> Snapshot {
    serialize_with(scope, SerializeOptions::default())
}

/// Snapshot of `scope` with explicit options.
pub fn serialize_with(scope: &Scope, options: SerializeOptions) -> Snapshot {
    let graph = scope.graph();
    let snapshot: Snapshot = scope.with_state(|state| {
        graph
            .nodes()
            .filter(|node| node.is_serializable())
            .filter(|node| !options.only_changes || state.is_changed(node.id()))
            .filter(|node| !options.ignore.iter().any(|store| store.id() == node.id()))
            .filter_map(|node| {
                let sid = node.sid()?;
                Some((sid.to_string(), state.value(node.id()).clone()))
            })
            .collect()
    });
    trace!(scope = %scope.id(), stores = snapshot.len(), "scope serialized");
    snapshot
}

/// Apply `snapshot` to an existing scope without triggering reactions.
pub fn hydrate(scope: &Scope, snapshot: &Snapshot) {
    let graph = scope.graph();
    let applied = scope.with_state_mut(|state| {
        let applied = apply_snapshot(graph, state, snapshot);
        state.recompute_derived(graph);
        applied
    });
    debug!(scope = %scope.id(), applied, total = snapshot.len(), "scope hydrated");
}

/// Seed `state` from `snapshot`. Returns the number of stores seeded.
pub(crate) fn apply_snapshot(graph: &Graph, state: &mut StateTable, snapshot: &Snapshot) -> usize {
    let mut applied = 0;
    for (sid, value) in snapshot.iter() {
        match graph.find_sid(sid) {
            Some(node) if node.is_store() && !node.is_derived() => {
                state.seed(node.id(), value.clone());
                applied += 1;
            }
            _ => trace!(sid, "ignoring unknown sid"),
        }
    }
    applied
}
