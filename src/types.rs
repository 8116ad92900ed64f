//! Core type definitions for the emulation core.
//!
//! Identifiers are plain integers so the circuit graph can address devices
//! and wires as arena entries; cycles in the wiring are ordinary data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Logical simulation time, counted in ticks.
///
/// One tick is one logical evaluation step, not a wall-clock quantum.
pub type Tick = u64;

/// Unique identifier for a device instance placed in a circuit.
pub type InstanceId = u64;

/// Unique identifier for a wire, allocated by the circuit graph.
pub type WireId = u64;

/// Index of a net within the current net partition of the circuit.
///
/// Net ids are stable while the topology is unchanged.
pub type NetId = usize;

/// Addresses one pin of one device instance.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PinRef {
    /// Owning instance
    pub instance: InstanceId,
    /// Pin id within the instance's descriptor
    pub pin: String,
}

impl PinRef {
    /// Creates a new pin reference.
    pub fn new(instance: InstanceId, pin: impl Into<String>) -> Self {
        Self {
            instance,
            pin: pin.into(),
        }
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.pin)
    }
}

/// Error returned when a `"<instance>.<pin>"` endpoint cannot be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid pin reference '{0}', expected '<instance>.<pin>'")]
pub struct ParsePinRefError(pub String);

impl FromStr for PinRef {
    type Err = ParsePinRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (instance, pin) = s
            .split_once('.')
            .ok_or_else(|| ParsePinRefError(s.to_string()))?;
        let instance = instance
            .trim()
            .parse()
            .map_err(|_| ParsePinRefError(s.to_string()))?;
        let pin = pin.trim();
        if pin.is_empty() {
            return Err(ParsePinRefError(s.to_string()));
        }
        Ok(PinRef::new(instance, pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_ref_display() {
        let pin = PinRef::new(7, "anode");
        assert_eq!(pin.to_string(), "7.anode");
    }

    #[test]
    fn test_pin_ref_parse() {
        let pin: PinRef = "12.D13".parse().unwrap();
        assert_eq!(pin, PinRef::new(12, "D13"));

        // Pin ids may themselves contain dots; only the first one splits.
        let dotted: PinRef = "3.bus.sda".parse().unwrap();
        assert_eq!(dotted.pin, "bus.sda");
    }

    #[test]
    fn test_pin_ref_parse_errors() {
        assert!("D13".parse::<PinRef>().is_err());
        assert!("x.D13".parse::<PinRef>().is_err());
        assert!("4.".parse::<PinRef>().is_err());
    }

    #[test]
    fn test_pin_ref_ordering() {
        let mut pins = vec![
            PinRef::new(2, "a"),
            PinRef::new(1, "b"),
            PinRef::new(1, "a"),
        ];
        pins.sort();
        assert_eq!(pins[0], PinRef::new(1, "a"));
        assert_eq!(pins[2], PinRef::new(2, "a"));
    }
}
