//! Tick-complete events delivered to observers.
//!
//! One [`TickEvent`] is produced per completed tick. It carries only what
//! changed during that tick, plus the warnings and skipped actions
//! recorded while computing it.

use serde::Serialize;

use crate::display::DisplayBuffer;
use crate::error::ActionError;
use crate::instance::LedState;
use crate::signal::{Signal, Value};
use crate::types::{InstanceId, NetId, PinRef, Tick};

/// A pin whose value changed during the tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PinDelta {
    pub pin: PinRef,
    pub value: Signal,
}

/// A state variable whose value changed during the tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateDelta {
    pub instance: InstanceId,
    pub name: String,
    pub value: Value,
}

/// An LED indicator that switched or dimmed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LedDelta {
    pub instance: InstanceId,
    pub led: String,
    pub state: LedState,
}

/// Serial bytes one device emitted during the tick, in emission order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SerialOutput {
    pub instance: InstanceId,
    pub data: Vec<u8>,
}

/// A display whose buffer changed; carries the full new contents.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DisplayDelta {
    pub instance: InstanceId,
    pub buffer: DisplayBuffer,
}

/// Non-fatal anomaly observed during a tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Drivers on a net disagree; the net reads [`Signal::Conflict`]
    NetConflict { net: NetId, drivers: Vec<PinRef> },
    /// The iteration cap was reached before the circuit settled
    UnstableCircuit { iterations: usize },
    /// The sketch write queue dropped its oldest entries
    Overflow { dropped: usize },
}

/// An action or sketch write that was skipped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionFault {
    pub instance: InstanceId,
    /// Rule index; `None` for sketch writes
    pub rule: Option<usize>,
    /// Action index within the rule
    pub action: Option<usize>,
    pub error: ActionError,
}

/// Everything observers learn about one completed tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TickEvent {
    /// Clock value after this tick
    pub tick: Tick,
    /// Propagate/evaluate iterations used
    pub iterations: usize,
    pub pins: Vec<PinDelta>,
    pub states: Vec<StateDelta>,
    pub leds: Vec<LedDelta>,
    pub serial: Vec<SerialOutput>,
    pub displays: Vec<DisplayDelta>,
    pub warnings: Vec<Warning>,
    pub faults: Vec<ActionFault>,
}

impl TickEvent {
    /// True if nothing changed and nothing was reported.
    pub fn is_quiet(&self) -> bool {
        self.pins.is_empty()
            && self.states.is_empty()
            && self.leds.is_empty()
            && self.serial.is_empty()
            && self.displays.is_empty()
            && self.warnings.is_empty()
            && self.faults.is_empty()
    }

    /// Net conflict warnings.
    pub fn conflicts(&self) -> impl Iterator<Item = &Warning> {
        self.warnings
            .iter()
            .filter(|w| matches!(w, Warning::NetConflict { .. }))
    }

    /// True if the tick hit the iteration cap.
    pub fn is_unstable(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, Warning::UnstableCircuit { .. }))
    }

    /// Writes dropped by the sketch queue before this tick, if any.
    pub fn overflow(&self) -> Option<usize> {
        self.warnings.iter().find_map(|w| match w {
            Warning::Overflow { dropped } => Some(*dropped),
            _ => None,
        })
    }

    /// New value of a pin if it changed this tick.
    pub fn pin(&self, pin: &PinRef) -> Option<&Signal> {
        self.pins.iter().find(|d| d.pin == *pin).map(|d| &d.value)
    }

    /// New value of a state variable if it changed this tick.
    pub fn state(&self, instance: InstanceId, name: &str) -> Option<&Value> {
        self.states
            .iter()
            .find(|d| d.instance == instance && d.name == name)
            .map(|d| &d.value)
    }

    /// Serial bytes emitted by one instance this tick.
    pub fn serial_from(&self, instance: InstanceId) -> Option<&[u8]> {
        self.serial
            .iter()
            .find(|s| s.instance == instance)
            .map(|s| s.data.as_slice())
    }
}
