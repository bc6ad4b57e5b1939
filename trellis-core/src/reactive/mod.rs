//! Scope Engine
//!
//! This module evaluates a [`Graph`](crate::graph::Graph) inside isolated
//! scopes: forking state, propagating updates, tracking asynchronous
//! effects, and serializing the result.
//!
//! # Concepts
//!
//! ## Scopes
//!
//! A scope is created by [`fork`]. It owns a private value for every store,
//! a transaction queue and an effect tracker. Scopes forked from the same
//! graph share topology and nothing else, which is what makes per-request
//! server rendering and parallel tests safe.
//!
//! ## Ticks
//!
//! Launching a unit drains the scope's queue synchronously, in priority
//! tiers (pure, then sampler, then effect). Effects are spawned on the
//! tokio runtime and never awaited by the drain; when one finishes, its
//! completion starts a new tick on the same scope.
//!
//! ## Settling
//!
//! [`all_settled`] triggers a unit and waits until the scope has no drain
//! and no effect in progress. Afterwards [`serialize`] captures the stores
//! the scope changed, keyed by sid, ready for [`fork`] or [`hydrate`] on
//! the other side.

mod context;
mod effect;
mod scheduler;
mod scope;
mod serialize;
mod settle;
mod state;
mod tracker;

pub use effect::{EffectContext, EffectResult};
pub use scope::{fork, ForkConfig, Scope, ScopeId};
pub use serialize::{hydrate, serialize, serialize_with, SerializeOptions, Snapshot};
pub use settle::{all_settled, SettleConfig, Target};
pub use state::StateView;
