//! Transaction Scheduler
//!
//! The scheduler drains a scope's queue of transactions until nothing is
//! left. One drain is one tick.
//!
//! # Algorithm
//!
//! 1. The root transaction is queued in its node's tier.
//! 2. The lowest non-empty tier is popped, FIFO within the tier.
//! 3. The edge the transaction arrived through is evaluated against the
//!    current state: a failing guard drops the transaction, a transform
//!    replaces the payload.
//! 4. The node is applied:
//!    - events forward their payload
//!    - stores write it, and stop when the value is unchanged
//!    - samplers read their source store
//!    - combine links recompute from their sources
//!    - watchers and effects become [`Deferred`] work for the caller
//! 5. Children are queued along the node's edges in registration order.
//!
//! Evaluating edges at dequeue time is what lets a reducer queued early in
//! a tick observe writes made by transactions processed before it.
//!
//! A combine link is queued at most once at a time. However many of its
//! sources change in the pure tier, it recomputes once in the sampler tier.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use super::state::StateTable;
use crate::error::Result;
use crate::graph::{Computation, Graph, Handler, NodeId, NodeKind, Outcome, Priority, WatchFn};

/// Reference to the `index`-th edge of node `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeRef {
    pub(crate) from: NodeId,
    pub(crate) index: usize,
}

/// One pending unit activation.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub(crate) node: NodeId,
    pub(crate) payload: Value,
    pub(crate) via: Option<EdgeRef>,
    /// Completion channel of a direct effect call.
    pub(crate) reply: Option<oneshot::Sender<Outcome>>,
    /// Effect call finished by this transaction.
    pub(crate) completion: Option<Completion>,
}

impl Transaction {
    pub(crate) fn root(node: NodeId, payload: Value) -> Self {
        Self {
            node,
            payload,
            via: None,
            reply: None,
            completion: None,
        }
    }

    pub(crate) fn with_reply(mut self, reply: oneshot::Sender<Outcome>) -> Self {
        self.reply = Some(reply);
        self
    }

    pub(crate) fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }
}

/// A finished effect call, held by the kernel until the tick that carries
/// its `finally` transaction has drained.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) outcome: Outcome,
    pub(crate) reply: Option<oneshot::Sender<Outcome>>,
}

/// Work that must run without the kernel lock held.
pub(crate) enum Deferred {
    Watch {
        callback: WatchFn,
        payload: Value,
    },
    Effect {
        effect: NodeId,
        handler: Handler,
        finally: NodeId,
        params: Value,
        /// Params mapped for the wrapped effect, for attached effects.
        mapped: Option<Outcome>,
        reply: Option<oneshot::Sender<Outcome>>,
    },
}

/// Priority-tiered transaction queue.
#[derive(Debug, Default)]
pub(crate) struct Queue {
    tiers: [VecDeque<Transaction>; Priority::COUNT],
    barrier: HashSet<NodeId>,
}

impl Queue {
    pub(crate) fn push(&mut self, graph: &Graph, tx: Transaction) {
        let node = graph.get(tx.node);
        if matches!(node.kind(), NodeKind::Computed(Computation::Combine { .. }))
            && !self.barrier.insert(tx.node)
        {
            return;
        }
        self.tiers[node.priority().slot()].push_back(tx);
    }

    pub(crate) fn pop(&mut self) -> Option<Transaction> {
        let tx = self.tiers.iter_mut().find_map(VecDeque::pop_front)?;
        self.barrier.remove(&tx.node);
        Some(tx)
    }

    pub(crate) fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    /// Drop everything queued and hand back what was discarded.
    pub(crate) fn clear(&mut self) -> Vec<Transaction> {
        self.barrier.clear();
        self.tiers.iter_mut().flat_map(|tier| tier.drain(..)).collect()
    }
}

/// Mutable core of a scope: its state and its queue.
#[derive(Debug)]
pub(crate) struct Kernel {
    pub(crate) state: StateTable,
    pub(crate) queue: Queue,
    pub(crate) draining: bool,
    completions: Vec<Completion>,
}

impl Kernel {
    pub(crate) fn new(state: StateTable) -> Self {
        Self {
            state,
            queue: Queue::default(),
            draining: false,
            completions: Vec::new(),
        }
    }

    /// End the current drain normally. Returns the effect calls whose
    /// completion ticks it processed.
    pub(crate) fn finish(&mut self) -> Vec<Completion> {
        self.draining = false;
        mem::take(&mut self.completions)
    }

    /// End the current drain after an error or a panic. Queued transactions
    /// are discarded; the completions they carried are returned with the
    /// ones already processed.
    pub(crate) fn abort(&mut self) -> (usize, Vec<Completion>) {
        let discarded = self.queue.clear();
        let dropped = discarded.len();
        let mut completions = self.finish();
        completions.extend(discarded.into_iter().filter_map(|tx| tx.completion));
        (dropped, completions)
    }

    /// Process one transaction.
    pub(crate) fn step(&mut self, graph: &Graph, tx: Transaction) -> Result<Option<Deferred>> {
        let Transaction {
            node: id,
            mut payload,
            via,
            reply,
            completion,
        } = tx;
        self.completions.extend(completion);
        let node = graph.get(id);
        trace!(node = %node.name(), kind = node.kind().label(), "processing transaction");

        if let Some(via) = via {
            let edge = &graph.get(via.from).edges()[via.index];
            let view = self.state.view();
            if let Some(filter) = &edge.filter {
                if !filter(&payload, &view).map_err(|err| err.at(node.name()))? {
                    return Ok(None);
                }
            }
            if let Some(transform) = &edge.transform {
                payload = transform(&payload, &view).map_err(|err| err.at(node.name()))?;
            }
        }

        match node.kind() {
            NodeKind::Event { .. } => self.fan_out(graph, id, &payload),
            NodeKind::Store { .. } => {
                if self.state.write(id, payload.clone()) {
                    self.fan_out(graph, id, &payload);
                }
            }
            NodeKind::Computed(Computation::Sample { source, filter, map }) => {
                let value = match source {
                    Some(source) => self.state.value(*source).clone(),
                    None => payload.clone(),
                };
                if let Some(filter) = filter {
                    if !filter(&value, &payload) {
                        return Ok(None);
                    }
                }
                let value = match map {
                    Some(map) => map(&value, &payload),
                    None => value,
                };
                self.fan_out(graph, id, &value);
            }
            NodeKind::Computed(Computation::Combine { sources, combine, .. }) => {
                let inputs: Vec<&Value> = sources.iter().map(|id| self.state.value(*id)).collect();
                let value = combine(inputs.as_slice());
                self.fan_out(graph, id, &value);
            }
            NodeKind::Computed(Computation::Watch(callback)) => {
                return Ok(Some(Deferred::Watch {
                    callback: callback.clone(),
                    payload,
                }));
            }
            NodeKind::Effect { handler, parts } => {
                let mapped = match handler {
                    Handler::Native(_) => None,
                    Handler::Attached {
                        source, map_params, ..
                    } => {
                        let source = source.map(|source| self.state.value(source));
                        Some(match (map_params, source) {
                            (Some(map_params), source) => {
                                let params = payload.clone();
                                panic::catch_unwind(AssertUnwindSafe(|| map_params(params, source)))
                                    .unwrap_or_else(|panic| Err(panic_value(panic)))
                            }
                            (None, Some(source)) => Ok(source.clone()),
                            (None, None) => Ok(payload.clone()),
                        })
                    }
                };
                let running = self.state.value(parts.in_flight).as_u64().unwrap_or(0);
                self.write_store(graph, parts.in_flight, Value::from(running + 1));
                return Ok(Some(Deferred::Effect {
                    effect: id,
                    handler: handler.clone(),
                    finally: parts.finally,
                    params: payload,
                    mapped,
                    reply,
                }));
            }
            NodeKind::Domain => {}
        }
        Ok(None)
    }

    /// Write a store directly and queue its dependents.
    pub(crate) fn write_store(&mut self, graph: &Graph, id: NodeId, value: Value) {
        if self.state.write(id, value.clone()) {
            self.fan_out(graph, id, &value);
        }
    }

    fn fan_out(&mut self, graph: &Graph, from: NodeId, payload: &Value) {
        for (index, edge) in graph.get(from).edges().iter().enumerate() {
            self.queue.push(
                graph,
                Transaction {
                    node: edge.target(),
                    payload: payload.clone(),
                    via: Some(EdgeRef { from, index }),
                    reply: None,
                    completion: None,
                },
            );
        }
    }
}

/// Message carried by a caught panic.
pub(crate) fn panic_value(panic: Box<dyn Any + Send>) -> Value {
    let message = if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "effect panicked".to_string()
    };
    Value::String(message)
}
