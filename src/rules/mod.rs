//! Device rules: closed trigger and action sum types.
//!
//! Rules are loaded from the `emulation.rules` array of a descriptor. Two
//! shapes are accepted:
//!
//! - structured: `{"trigger": {"type": ...}, "actions": [{"type": ...}]}`
//! - flat: `{"trigger": "pin_high", "pin": "anode", "action": "set_state",
//!   "target": "led_on", "value": true}`
//!
//! Unknown trigger or action tags are load errors.

pub mod eval;
pub mod expr;

pub use eval::{PassOutcome, RuleEngine};
pub use expr::{BinaryOp, Expr, ExprRef, ExprScope, UnaryOp};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::descriptor::{LedIndicator, PinSpec};
use crate::display::DisplayUpdate;
use crate::error::{ValidationError, ValidationResult};
use crate::signal::{CompareOp, Value};

/// Predicate gating a rule's actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Pin currently equals `value`
    PinEquals { pin: String, value: Value },
    /// Pin differs from its value at the start of the tick
    PinChanged { pin: String },
    /// Numeric comparison on a pin reading
    PinCompare { pin: String, op: CompareOp, value: Value },
    /// State variable equals `value`
    StateEquals { name: String, value: Value },
    /// Comparison on a state variable
    StateCompare { name: String, op: CompareOp, value: Value },
    /// Every evaluation pass
    Always,
    /// First evaluation pass of each tick only
    Tick,
    /// All sub-triggers fire
    All { of: Vec<Trigger> },
    /// At least one sub-trigger fires
    Any { of: Vec<Trigger> },
    /// Negation
    Not { trigger: Box<Trigger> },
}

impl Trigger {
    /// True if this trigger is edge-like and must not re-fire within a tick.
    pub fn is_edge(&self) -> bool {
        match self {
            Trigger::PinChanged { .. } | Trigger::Tick => true,
            Trigger::All { of } | Trigger::Any { of } => of.iter().any(Trigger::is_edge),
            Trigger::Not { trigger } => trigger.is_edge(),
            _ => false,
        }
    }

    fn validate(&self, rule: usize, scope: &RuleScope<'_>) -> ValidationResult<()> {
        match self {
            Trigger::PinEquals { pin, .. }
            | Trigger::PinChanged { pin }
            | Trigger::PinCompare { pin, .. } => scope.check_pin(rule, pin),
            Trigger::StateEquals { name, .. } | Trigger::StateCompare { name, .. } => {
                scope.check_state(rule, name)
            }
            Trigger::Always | Trigger::Tick => Ok(()),
            Trigger::All { of } | Trigger::Any { of } => {
                of.iter().try_for_each(|t| t.validate(rule, scope))
            }
            Trigger::Not { trigger } => trigger.validate(rule, scope),
        }
    }
}

/// Bytes queued by `emit_serial`; either a string or a byte array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerialData {
    Text(String),
    Bytes(Vec<u8>),
}

impl SerialData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SerialData::Text(s) => s.as_bytes(),
            SerialData::Bytes(b) => b,
        }
    }
}

/// Side effect performed when a rule fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Drive an output or bidirectional pin
    SetPin { pin: String, value: Expr },
    /// Assign a state variable
    SetState { name: String, value: Expr },
    /// Queue bytes on the device's serial stream
    EmitSerial { data: SerialData },
    /// Write into the display buffer
    SetDisplay { update: DisplayUpdate },
    /// Switch an unbound LED indicator
    SetLed { led: String, value: Expr },
}

impl Action {
    fn validate(&self, rule: usize, scope: &RuleScope<'_>) -> ValidationResult<()> {
        match self {
            Action::SetPin { pin, value } => {
                scope.check_pin(rule, pin)?;
                scope.check_expr(rule, value)
            }
            Action::SetState { name, value } => {
                scope.check_state(rule, name)?;
                scope.check_expr(rule, value)?;
                match (scope.state_vars.get(name), value.as_literal()) {
                    (Some(current), Some(literal)) if current.kind().coerce(literal).is_none() => {
                        Err(ValidationError::StateTypeMismatch {
                            rule,
                            name: name.clone(),
                            expected: current.kind().to_string(),
                            found: literal.kind().to_string(),
                        })
                    }
                    _ => Ok(()),
                }
            }
            Action::EmitSerial { .. } => Ok(()),
            Action::SetDisplay { .. } if !scope.has_display => Err(ValidationError::NoDisplay { rule }),
            Action::SetDisplay { .. } => Ok(()),
            Action::SetLed { led, value } => {
                let indicator = scope
                    .leds
                    .iter()
                    .find(|l| l.key() == led)
                    .ok_or_else(|| ValidationError::UnknownLed {
                        rule,
                        led: led.clone(),
                    })?;
                if let Some(state_var) = indicator.binding() {
                    return Err(ValidationError::BoundLed {
                        rule,
                        led: led.clone(),
                        state_var: state_var.to_string(),
                    });
                }
                scope.check_expr(rule, value)
            }
        }
    }
}

/// One trigger and its ordered actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Optional label, used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    /// Creates an unnamed rule.
    pub fn new(trigger: Trigger, actions: Vec<Action>) -> Self {
        Self {
            name: None,
            trigger,
            actions,
        }
    }

    /// Parses one entry of `emulation.rules`. `index` is used in errors.
    pub fn from_json(index: usize, raw: &serde_json::Value) -> ValidationResult<Self> {
        let invalid = |message: String| ValidationError::InvalidRule {
            rule: index,
            message,
        };

        if let Some(serde_json::Value::String(_)) = raw.get("trigger") {
            let flat: FlatRule =
                serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?;
            return flat.into_rule().map_err(invalid);
        }

        serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))
    }

    /// Latched rules fire at most once per tick.
    pub fn is_latched(&self) -> bool {
        self.trigger.is_edge()
            || self
                .actions
                .iter()
                .any(|a| matches!(a, Action::EmitSerial { .. }))
    }

    /// Display label for logs: the name, else `#index`.
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("#{}", index))
    }

    /// Checks every pin, state variable, property, LED and display reference.
    pub fn validate(&self, index: usize, scope: &RuleScope<'_>) -> ValidationResult<()> {
        self.trigger.validate(index, scope)?;
        self.actions.iter().try_for_each(|a| a.validate(index, scope))
    }
}

/// Flat single-action rule as written by the device creator.
#[derive(Deserialize)]
struct FlatRule {
    trigger: String,
    pin: Option<String>,
    action: String,
    target: Option<String>,
    value: Option<Value>,
}

impl FlatRule {
    fn into_rule(self) -> Result<Rule, String> {
        let level = match self.trigger.as_str() {
            "pin_high" => true,
            "pin_low" => false,
            other => return Err(format!("unsupported trigger '{}'", other)),
        };
        if self.action != "set_state" {
            return Err(format!("unsupported action '{}'", self.action));
        }
        let pin = self.pin.ok_or("missing 'pin'")?;
        let name = self.target.ok_or("missing 'target'")?;
        let value = self.value.ok_or("missing 'value'")?;

        Ok(Rule::new(
            Trigger::PinEquals {
                pin,
                value: Value::Bool(level),
            },
            vec![Action::SetState {
                name,
                value: Expr::Literal(value),
            }],
        ))
    }
}

/// What a descriptor declares, as seen by rule validation.
pub struct RuleScope<'a> {
    pub pins: &'a [PinSpec],
    pub state_vars: &'a BTreeMap<String, Value>,
    pub properties: &'a BTreeMap<String, serde_json::Value>,
    pub leds: &'a [LedIndicator],
    pub has_display: bool,
}

impl RuleScope<'_> {
    fn check_pin(&self, rule: usize, pin: &str) -> ValidationResult<()> {
        if self.pins.iter().any(|p| p.id == pin) {
            Ok(())
        } else {
            Err(ValidationError::UnknownPin {
                rule,
                pin: pin.to_string(),
            })
        }
    }

    fn check_state(&self, rule: usize, name: &str) -> ValidationResult<()> {
        if self.state_vars.contains_key(name) {
            Ok(())
        } else {
            Err(ValidationError::UnknownStateVar {
                rule,
                name: name.to_string(),
            })
        }
    }

    fn check_expr(&self, rule: usize, expr: &Expr) -> ValidationResult<()> {
        let mut result = Ok(());
        expr.visit_refs(&mut |r| {
            if result.is_err() {
                return;
            }
            result = match r {
                ExprRef::State(name) => self.check_state(rule, name),
                ExprRef::Pin(pin) => self.check_pin(rule, pin),
                ExprRef::Prop(name) if !self.properties.contains_key(name) => {
                    Err(ValidationError::UnknownProperty {
                        rule,
                        name: name.to_string(),
                    })
                }
                ExprRef::Prop(_) => Ok(()),
            };
        });
        result
    }
}
