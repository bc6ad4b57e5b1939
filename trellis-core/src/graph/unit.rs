//! Typed unit handles.
//!
//! Handles are `Copy` references into a graph's arena. The builder hands them
//! out and every engine entry point takes them back, so passing a domain
//! where a store is expected is a compile error rather than a runtime check.

use super::node::{EffectParts, NodeId};

/// Anything that can sit on either end of a graph edge.
pub trait Unit: Copy {
    /// The node backing this unit.
    fn node(&self) -> NodeId;
}

/// Handle to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Store(pub(crate) NodeId);

/// Handle to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(pub(crate) NodeId);

/// Handle to a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Domain(pub(crate) NodeId);

/// Handle to an effect and its helper units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    pub(crate) id: NodeId,
    pub(crate) parts: EffectParts,
}

impl Store {
    /// Node id of this store.
    pub fn id(&self) -> NodeId {
        self.0
    }
}

impl Event {
    /// Node id of this event.
    pub fn id(&self) -> NodeId {
        self.0
    }
}

impl Domain {
    /// Node id of this domain.
    pub fn id(&self) -> NodeId {
        self.0
    }
}

impl Effect {
    /// Node id of this effect.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Fires `{params, result}` when a call succeeds.
    pub fn done(&self) -> Event {
        Event(self.parts.done)
    }

    /// Fires `{params, error}` when a call fails.
    pub fn fail(&self) -> Event {
        Event(self.parts.fail)
    }

    /// Fires `{status, params, result | error}` when a call settles.
    pub fn finally(&self) -> Event {
        Event(self.parts.finally)
    }

    /// Fires the bare result of a successful call.
    pub fn done_data(&self) -> Event {
        Event(self.parts.done_data)
    }

    /// Fires the bare error of a failed call.
    pub fn fail_data(&self) -> Event {
        Event(self.parts.fail_data)
    }

    /// Number of calls currently running in a scope.
    pub fn in_flight(&self) -> Store {
        Store(self.parts.in_flight)
    }

    /// `true` while at least one call is running in a scope.
    pub fn pending(&self) -> Store {
        Store(self.parts.pending)
    }
}

impl Unit for Store {
    fn node(&self) -> NodeId {
        self.0
    }
}

impl Unit for Event {
    fn node(&self) -> NodeId {
        self.0
    }
}

impl Unit for Effect {
    fn node(&self) -> NodeId {
        self.id
    }
}
