//! Scope State
//!
//! Every scope owns one [`StateTable`]: the current value of each store node
//! of its graph, plus the set of stores whose value this scope has changed.
//! The changed set is what snapshots are built from.

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::graph::{Computation, Graph, NodeId, NodeKind, Store};

static NULL: Value = Value::Null;

/// Store values of one scope, in node declaration order.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateTable {
    values: IndexMap<NodeId, Value>,
    changed: IndexSet<NodeId>,
}

impl StateTable {
    /// A table holding the default of every store of `graph`.
    pub(crate) fn seeded(graph: &Graph) -> Self {
        let values = graph
            .nodes()
            .filter_map(|node| node.default_value().map(|value| (node.id(), value.clone())))
            .collect();
        Self {
            values,
            changed: IndexSet::new(),
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Value> {
        self.values.get(&id)
    }

    /// Current value of a store, or `null` for unknown ids.
    pub(crate) fn value(&self, id: NodeId) -> &Value {
        self.values.get(&id).unwrap_or(&NULL)
    }

    /// Write a store. Returns `false` and leaves the table untouched when the
    /// value is unchanged.
    pub(crate) fn write(&mut self, id: NodeId, value: Value) -> bool {
        match self.values.get_mut(&id) {
            Some(current) if *current == value => false,
            Some(current) => {
                *current = value;
                self.changed.insert(id);
                true
            }
            None => false,
        }
    }

    /// Seed a store from outside propagation. Seeded stores always count as
    /// changed.
    pub(crate) fn seed(&mut self, id: NodeId, value: Value) {
        if let Some(current) = self.values.get_mut(&id) {
            *current = value;
            self.changed.insert(id);
        }
    }

    pub(crate) fn is_changed(&self, id: NodeId) -> bool {
        self.changed.contains(&id)
    }

    /// Recompute every combined store from its sources.
    ///
    /// Links are visited in declaration order, and a link is always declared
    /// after its sources, so chained derivations see fresh inputs.
    pub(crate) fn recompute_derived(&mut self, graph: &Graph) {
        for node in graph.nodes() {
            if let NodeKind::Computed(Computation::Combine {
                sources,
                target,
                combine,
            }) = node.kind()
            {
                let inputs: Vec<&Value> = sources.iter().map(|id| self.value(*id)).collect();
                let value = combine(inputs.as_slice());
                if let Some(slot) = self.values.get_mut(target) {
                    *slot = value;
                }
            }
        }
    }

    pub(crate) fn view(&self) -> StateView<'_> {
        StateView { table: self }
    }
}

/// Read-only view of a scope's state, handed to edge filters and transforms.
#[derive(Clone, Copy)]
pub struct StateView<'a> {
    table: &'a StateTable,
}

impl<'a> StateView<'a> {
    /// Current value of `store`, if it belongs to this scope's graph.
    pub fn get(&self, store: Store) -> Option<&'a Value> {
        self.table.get(store.id())
    }

    pub(crate) fn value(&self, id: NodeId) -> &'a Value {
        self.table.value(id)
    }
}
