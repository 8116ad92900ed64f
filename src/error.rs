//! Error taxonomy.
//!
//! - [`ValidationError`]: a descriptor failed to load; only that device is affected.
//! - [`ConnectionError`]: a wire was rejected; the circuit graph is unchanged.
//! - [`ActionError`]: a rule action or sketch write misused a pin, state variable,
//!   LED or display; the action is skipped and reported as a fault.
//! - [`SimError`]: umbrella for operations on the simulator, including
//!   [`SimError::GraphLocked`].
//!
//! Per-tick anomalies (conflicts, instability, overflow) are warnings carried
//! by tick events, never errors.

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::scheduler::RunState;
use crate::signal::{PinDirection, SignalDomain};
use crate::types::{InstanceId, PinRef, WireId};

/// A descriptor is malformed or internally inconsistent.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed descriptor: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported format_version '{0}'")]
    UnsupportedFormat(String),

    #[error("device id must not be empty")]
    MissingId,

    #[error("duplicate pin id '{0}'")]
    DuplicatePin(String),

    #[error("pin '{pin}': {message}")]
    InvalidPin { pin: String, message: String },

    #[error("state variable '{0}' must have a boolean, integer, float or string initial value")]
    UntypedStateVar(String),

    #[error("duplicate LED id '{0}'")]
    DuplicateLed(String),

    #[error("LED indicator {0} has neither an id nor a label")]
    UnnamedLed(usize),

    #[error("LED '{led}' is bound to unknown state variable '{state_var}'")]
    LedUnboundVar { led: String, state_var: String },

    #[error("invalid display: {0}")]
    InvalidDisplay(String),

    #[error("passive devices cannot declare rules ({0} found)")]
    PassiveWithRules(usize),

    #[error("rule {rule}: unknown pin '{pin}'")]
    UnknownPin { rule: usize, pin: String },

    #[error("rule {rule}: unknown state variable '{name}'")]
    UnknownStateVar { rule: usize, name: String },

    #[error("rule {rule}: unknown property '{name}'")]
    UnknownProperty { rule: usize, name: String },

    #[error("rule {rule}: unknown LED '{led}'")]
    UnknownLed { rule: usize, led: String },

    #[error("rule {rule}: LED '{led}' follows state variable '{state_var}' and cannot be set directly")]
    BoundLed { rule: usize, led: String, state_var: String },

    #[error("rule {rule}: display action on a device without a display")]
    NoDisplay { rule: usize },

    #[error("rule {rule}: state variable '{name}' is {expected}, literal is {found}")]
    StateTypeMismatch {
        rule: usize,
        name: String,
        expected: String,
        found: String,
    },

    #[error("rule {rule}: {message}")]
    InvalidRule { rule: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for descriptor loading.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A wire could not be created or removed.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConnectionError {
    #[error("unknown device instance {0}")]
    UnknownInstance(InstanceId),

    #[error("unknown pin {0}")]
    UnknownPin(PinRef),

    #[error("cannot wire pin {0} to itself")]
    SelfLoop(PinRef),

    #[error("pins {a} and {b} are already wired")]
    AlreadyConnected { a: PinRef, b: PinRef },

    #[error("cannot join {left} net ({a}) with {right} net ({b})")]
    Incompatible {
        a: PinRef,
        b: PinRef,
        left: SignalDomain,
        right: SignalDomain,
    },

    #[error("wiring {a} to {b} would short power to ground")]
    Short { a: PinRef, b: PinRef },

    #[error("pin {pin} accepts at most {limit} wire(s)")]
    PinOccupied { pin: PinRef, limit: usize },

    #[error("unknown wire {0}")]
    UnknownWire(WireId),
}

/// A rule action or sketch write could not be applied.
#[derive(Clone, Debug, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ActionError {
    #[error("pin '{pin}' is {direction}; {writer} may not write it")]
    Direction {
        pin: String,
        direction: PinDirection,
        writer: String,
    },

    #[error("{target} expects {expected}, got {found}")]
    TypeMismatch {
        target: String,
        expected: String,
        found: String,
    },

    #[error("unknown pin '{0}'")]
    UnknownPin(String),

    #[error("unknown state variable '{0}'")]
    UnknownStateVar(String),

    #[error("unknown LED '{0}'")]
    UnknownLed(String),

    #[error("device has no display")]
    NoDisplay,

    #[error("evaluation failed: {0}")]
    Eval(String),
}

/// Errors returned by simulator and circuit operations.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("circuit graph is locked while the simulation is running; pause first")]
    GraphLocked,

    #[error("cannot {action} while {state:?}")]
    InvalidTransition { action: &'static str, state: RunState },

    #[error("device instance {0} already exists")]
    DuplicateInstance(InstanceId),

    #[error("unknown device instance {0}")]
    UnknownInstance(InstanceId),

    #[error("unknown device type '{0}'")]
    UnknownDevice(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for simulator operations.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ConnectionError::Incompatible {
            a: PinRef::new(1, "A0"),
            b: PinRef::new(2, "D2"),
            left: SignalDomain::Analog,
            right: SignalDomain::Digital,
        };
        assert_eq!(err.to_string(), "cannot join analog net (1.A0) with digital net (2.D2)");

        let err = ActionError::Direction {
            pin: "IN".to_string(),
            direction: PinDirection::Input,
            writer: "device".to_string(),
        };
        assert_eq!(err.to_string(), "pin 'IN' is input; device may not write it");
    }

    #[test]
    fn test_sim_error_from() {
        let err: SimError = ConnectionError::UnknownWire(4).into();
        assert!(matches!(err, SimError::Connection(ConnectionError::UnknownWire(4))));
        assert_eq!(SimError::GraphLocked.to_string(), "circuit graph is locked while the simulation is running; pause first");
    }
}
