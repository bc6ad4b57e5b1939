//! Error types for the Trellis engine.
//!
//! Effect failures are not errors: they are values carried by
//! [`EffectResult::Fail`](crate::reactive::EffectResult). Everything here is a
//! broken call contract or a failure inside user-supplied graph logic.

use thiserror::Error;

/// Message for a first argument that is not a unit of the scope's graph.
pub(crate) const NOT_A_UNIT: &str = "first argument should be unit";

/// Message for a first argument that is a unit, but not a triggerable kind.
pub(crate) const UNSUPPORTED_UNIT: &str =
    "first argument accepts only effects, events, stores or scopes";

/// Errors produced by the graph builder and the scope engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A call was made with arguments that violate its contract.
    #[error("{0}")]
    InvalidArgument(String),

    /// A derived unit (combined store, mapped event) was used as a trigger.
    #[error("[allSettled] unit '{name}': unit should be targetable")]
    NotTargetable {
        /// Declared name of the unit.
        name: String,
    },

    /// Two stores in one graph resolved to the same stable identifier.
    #[error("duplicate sid '{0}'")]
    DuplicateSid(String),

    /// A filter, transform or reducer failed while a tick was draining.
    #[error("propagation failed at '{node}': {message}")]
    Propagation {
        /// Name of the unit the failing step was feeding.
        node: String,
        /// Description of the failure.
        message: String,
    },

    /// A direct effect call lost its completion channel because the tick
    /// that was supposed to launch it was aborted.
    #[error("effect '{0}' was dropped before it settled")]
    EffectDropped(String),

    /// A snapshot could not be encoded.
    #[error("snapshot encode failed: {0}")]
    Encode(String),

    /// A snapshot could not be decoded.
    #[error("snapshot decode failed: {0}")]
    Decode(String),
}

impl Error {
    pub(crate) fn not_a_unit() -> Self {
        Self::InvalidArgument(NOT_A_UNIT.to_string())
    }

    pub(crate) fn unsupported_unit() -> Self {
        Self::InvalidArgument(UNSUPPORTED_UNIT.to_string())
    }

    /// Build a failure for use inside fallible reducers and transforms.
    ///
    /// The engine fills in the unit name when the error surfaces.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Propagation {
            node: String::new(),
            message: message.into(),
        }
    }

    /// Attach the name of the unit being fed, unless one is already set.
    pub(crate) fn at(self, name: &str) -> Self {
        match self {
            Self::Propagation { node, message } if node.is_empty() => Self::Propagation {
                node: name.to_string(),
                message,
            },
            other => other,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_match_contract() {
        assert_eq!(Error::not_a_unit().to_string(), "first argument should be unit");
        assert_eq!(
            Error::unsupported_unit().to_string(),
            "first argument accepts only effects, events, stores or scopes"
        );
        let err = Error::NotTargetable {
            name: "trigger → *".into(),
        };
        assert_eq!(
            err.to_string(),
            "[allSettled] unit 'trigger → *': unit should be targetable"
        );
    }

    #[test]
    fn custom_errors_pick_up_the_unit_name_once() {
        let err = Error::custom("boom").at("$count").at("ignored");
        assert_eq!(err.to_string(), "propagation failed at '$count': boom");
    }
}
