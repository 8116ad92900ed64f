//! Device descriptors (`.adev` files).
//!
//! A descriptor is loaded and validated once, then shared read-only by every
//! instance of that device type. Nothing in it changes after [`load`].
//!
//! ```json
//! {
//!   "format_version": "1.0",
//!   "device": {"id": "led_red", "name": "Red LED", "category": "Output"},
//!   "visual": {"width": 40, "height": 60, "label": "LED", "color": "#cc2222"},
//!   "pins": [{"id": "anode", "label": "A", "x": 0, "y": 10, "type": "digital", "side": "left"}],
//!   "emulation": {
//!     "type": "active",
//!     "state_vars": {"led_on": false},
//!     "rules": [{"trigger": "pin_high", "pin": "anode", "action": "set_state", "target": "led_on", "value": true}],
//!     "properties": {"forward_voltage": 2.0}
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::display::DisplaySpec;
use crate::error::{ValidationError, ValidationResult};
use crate::rules::{Rule, RuleScope};
use crate::signal::{AnalogRange, PinDirection, PinType, Pull, SignalDomain, Value};

/// Descriptor format versions this crate understands.
pub const SUPPORTED_FORMAT_VERSIONS: &[&str] = &["1.0"];

/// The `device` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// An LED indicator drawn on the device body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedIndicator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// State variable the LED follows; empty means unbound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_var: Option<String>,
    /// Value of `state_var` that lights the LED
    #[serde(default = "default_on_value")]
    pub on_value: Value,
    /// Accepts a 0.0..=1.0 brightness from `set_led`
    #[serde(default)]
    pub pwm: bool,
}

fn default_on_value() -> Value {
    Value::Bool(true)
}

impl LedIndicator {
    /// The id actions use to address this LED.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.label)
    }

    /// Bound state variable, if any.
    pub fn binding(&self) -> Option<&str> {
        self.state_var.as_deref().filter(|s| !s.is_empty())
    }
}

/// The `visual` section. Only `led_indicators` matters to the emulation core.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Visual {
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub led_indicators: Vec<LedIndicator>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Declaration of one pin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinSpec {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub pin_type: PinType,
    #[serde(default)]
    pub direction: PinDirection,
    /// Bounds for analog pins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<AnalogRange>,
    /// Level of the net when nothing drives it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<Pull>,
    /// Wire limit; unlimited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Layout keys (`x`, `y`, `side`, `notes`)
    #[serde(flatten)]
    pub layout: serde_json::Map<String, serde_json::Value>,
}

impl PinSpec {
    /// Signal domain of this pin.
    pub fn domain(&self) -> SignalDomain {
        self.pin_type.domain()
    }

    /// Analog bounds, defaulting to a 10-bit ADC.
    pub fn analog_range(&self) -> AnalogRange {
        self.range.unwrap_or_default()
    }

    fn check(&self) -> ValidationResult<()> {
        let invalid = |message: &str| ValidationError::InvalidPin {
            pin: self.id.clone(),
            message: message.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("pin id must not be empty"));
        }
        if let Some(range) = self.range {
            if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
                return Err(invalid("range must be [min, max] with min < max"));
            }
        }
        if self.pull.is_some() && self.domain() != SignalDomain::Digital {
            return Err(invalid("pull is only valid on digital pins"));
        }
        if self.max_connections == Some(0) {
            return Err(invalid("max_connections must be at least 1"));
        }
        Ok(())
    }
}

/// How a device participates in evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmulationType {
    /// No rules; pins only carry nets
    Passive,
    #[default]
    Active,
    Microcontroller,
    Display,
}

#[derive(Deserialize)]
struct RawEmulation {
    #[serde(rename = "type", default)]
    kind: EmulationType,
    #[serde(default)]
    state_vars: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    rules: Vec<serde_json::Value>,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawDescriptor {
    format_version: String,
    device: DeviceInfo,
    visual: Visual,
    pins: Vec<PinSpec>,
    emulation: RawEmulation,
    #[serde(default)]
    display: Option<DisplaySpec>,
}

/// A validated, immutable device type.
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    format_version: String,
    info: DeviceInfo,
    visual: Visual,
    pins: Vec<PinSpec>,
    pin_index: HashMap<String, usize>,
    emulation_type: EmulationType,
    state_vars: BTreeMap<String, Value>,
    rules: Vec<Rule>,
    properties: BTreeMap<String, serde_json::Value>,
    display: Option<DisplaySpec>,
}

/// Parses and validates a descriptor from JSON text.
pub fn load(json: &str) -> ValidationResult<DeviceDescriptor> {
    DeviceDescriptor::from_json(json)
}

impl DeviceDescriptor {
    /// Parses and validates a descriptor from JSON text.
    pub fn from_json(json: &str) -> ValidationResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Reads and validates an `.adev` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Validates an already-parsed JSON document.
    pub fn from_value(value: serde_json::Value) -> ValidationResult<Self> {
        let raw: RawDescriptor = serde_json::from_value(value)?;

        if !SUPPORTED_FORMAT_VERSIONS.contains(&raw.format_version.as_str()) {
            return Err(ValidationError::UnsupportedFormat(raw.format_version));
        }
        if raw.device.id.trim().is_empty() {
            return Err(ValidationError::MissingId);
        }

        let mut pin_index = HashMap::with_capacity(raw.pins.len());
        for (i, pin) in raw.pins.iter().enumerate() {
            pin.check()?;
            if pin_index.insert(pin.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicatePin(pin.id.clone()));
            }
        }

        let mut state_vars = BTreeMap::new();
        for (name, initial) in raw.emulation.state_vars {
            let value = Value::from_json(&initial).ok_or_else(|| ValidationError::UntypedStateVar(name.clone()))?;
            state_vars.insert(name, value);
        }

        let mut led_ids = HashSet::new();
        for (i, led) in raw.visual.led_indicators.iter().enumerate() {
            if led.key().is_empty() {
                return Err(ValidationError::UnnamedLed(i));
            }
            if !led_ids.insert(led.key()) {
                return Err(ValidationError::DuplicateLed(led.key().to_string()));
            }
            if let Some(var) = led.binding() {
                if !state_vars.contains_key(var) {
                    return Err(ValidationError::LedUnboundVar {
                        led: led.key().to_string(),
                        state_var: var.to_string(),
                    });
                }
            }
        }

        if let Some(display) = &raw.display {
            display.buffer().map_err(ValidationError::InvalidDisplay)?;
        }

        if raw.emulation.kind == EmulationType::Passive && !raw.emulation.rules.is_empty() {
            return Err(ValidationError::PassiveWithRules(raw.emulation.rules.len()));
        }

        let scope = RuleScope {
            pins: &raw.pins,
            state_vars: &state_vars,
            properties: &raw.emulation.properties,
            leds: &raw.visual.led_indicators,
            has_display: raw.display.is_some(),
        };
        let mut rules = Vec::with_capacity(raw.emulation.rules.len());
        for (i, raw_rule) in raw.emulation.rules.iter().enumerate() {
            let rule = Rule::from_json(i, raw_rule)?;
            rule.validate(i, &scope)?;
            rules.push(rule);
        }

        debug!(
            device = %raw.device.id,
            pins = raw.pins.len(),
            rules = rules.len(),
            "Loaded device descriptor"
        );

        Ok(Self {
            format_version: raw.format_version,
            info: raw.device,
            visual: raw.visual,
            pins: raw.pins,
            pin_index,
            emulation_type: raw.emulation.kind,
            state_vars,
            rules,
            properties: raw.emulation.properties,
            display: raw.display,
        })
    }

    /// Device type id (`device.id`).
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn category(&self) -> &str {
        &self.info.category
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn visual(&self) -> &Visual {
        &self.visual
    }

    pub fn format_version(&self) -> &str {
        &self.format_version
    }

    /// Pins in declaration order.
    pub fn pins(&self) -> &[PinSpec] {
        &self.pins
    }

    /// Looks up a pin by id.
    pub fn pin(&self, id: &str) -> Option<&PinSpec> {
        self.pin_index(id).map(|i| &self.pins[i])
    }

    /// Position of a pin in declaration order.
    pub fn pin_index(&self, id: &str) -> Option<usize> {
        self.pin_index.get(id).copied()
    }

    pub fn emulation_type(&self) -> EmulationType {
        self.emulation_type
    }

    /// Initial state variable values.
    pub fn state_defaults(&self) -> &BTreeMap<String, Value> {
        &self.state_vars
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }

    /// A scalar property as a [`Value`].
    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).and_then(Value::from_json)
    }

    pub fn display(&self) -> Option<&DisplaySpec> {
        self.display.as_ref()
    }

    pub fn leds(&self) -> &[LedIndicator] {
        &self.visual.led_indicators
    }
}
