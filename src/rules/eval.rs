//! Rule evaluation for one device instance.

use std::sync::Arc;
use tracing::trace;

use crate::descriptor::EmulationType;
use crate::error::ActionError;
use crate::event::ActionFault;
use crate::instance::{DeviceInstance, Writer};
use crate::rules::{Action, Trigger};

/// Result of one evaluation pass over an instance.
#[derive(Clone, Debug, Default)]
pub struct PassOutcome {
    /// A pin or state variable changed
    pub changed: bool,
    /// Rules whose trigger fired
    pub fired: usize,
    /// Actions that were skipped
    pub faults: Vec<ActionFault>,
}

/// Evaluates an instance's rules in declaration order.
///
/// Actions apply immediately, so later rules in the same pass observe
/// earlier rules' writes. A failing action is skipped and reported; the
/// remaining actions of the rule still run.
#[derive(Clone, Copy, Debug)]
pub struct RuleEngine {
    first_pass: bool,
}

impl RuleEngine {
    /// `first_pass` is true for the first propagate/evaluate iteration of a tick.
    pub fn new(first_pass: bool) -> Self {
        Self { first_pass }
    }

    /// Runs one pass over `instance`.
    pub fn evaluate(&self, instance: &mut DeviceInstance) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        let descriptor = Arc::clone(instance.descriptor());
        if descriptor.emulation_type() == EmulationType::Passive {
            return outcome;
        }

        for (index, rule) in descriptor.rules().iter().enumerate() {
            let latched = rule.is_latched();
            if latched && instance.is_latched(index) {
                continue;
            }
            if !self.fires(&rule.trigger, instance) {
                continue;
            }
            if latched {
                instance.latch(index);
            }
            outcome.fired += 1;
            trace!(instance = instance.id(), rule = %rule.label(index), "Rule fired");

            for (action_index, action) in rule.actions.iter().enumerate() {
                match apply(action, instance) {
                    Ok(changed) => outcome.changed |= changed,
                    Err(error) => outcome.faults.push(ActionFault {
                        instance: instance.id(),
                        rule: Some(index),
                        action: Some(action_index),
                        error,
                    }),
                }
            }
        }

        instance.refresh_bound_leds();
        outcome
    }

    /// Tests a trigger against the instance's current values.
    pub fn fires(&self, trigger: &Trigger, instance: &DeviceInstance) -> bool {
        match trigger {
            Trigger::PinEquals { pin, value } => instance.pin_value(pin).map_or(false, |s| s.matches(value)),
            Trigger::PinChanged { pin } => instance.pin_changed(pin),
            Trigger::PinCompare { pin, op, value } => {
                let reading = instance.pin_value(pin).and_then(|s| s.as_number());
                match (reading, value.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).map_or(false, |ord| op.test(ord)),
                    _ => false,
                }
            }
            Trigger::StateEquals { name, value } => instance.state(name).map_or(false, |v| v.loose_eq(value)),
            Trigger::StateCompare { name, op, value } => {
                instance.state(name).and_then(|v| v.compare(*op, value)) == Some(true)
            }
            Trigger::Always => true,
            Trigger::Tick => self.first_pass,
            Trigger::All { of } => of.iter().all(|t| self.fires(t, instance)),
            Trigger::Any { of } => of.iter().any(|t| self.fires(t, instance)),
            Trigger::Not { trigger } => !self.fires(trigger, instance),
        }
    }
}

/// Applies one action. Returns whether a pin or state variable changed.
fn apply(action: &Action, instance: &mut DeviceInstance) -> Result<bool, ActionError> {
    match action {
        Action::SetPin { pin, value } => {
            let value = value.eval(&*instance)?;
            instance.write_pin(pin, &value, Writer::Rule)
        }
        Action::SetState { name, value } => {
            let value = value.eval(&*instance)?;
            instance.set_state(name, value)
        }
        Action::EmitSerial { data } => {
            instance.emit_serial(data.as_bytes());
            Ok(false)
        }
        Action::SetDisplay { update } => instance.apply_display(update).map(|_| false),
        Action::SetLed { led, value } => {
            let value = value.eval(&*instance)?;
            instance.set_led(led, &value).map(|_| false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DeviceDescriptor;
    use crate::signal::{Signal, Value};
    use serde_json::json;

    fn instance(rules: serde_json::Value) -> DeviceInstance {
        let raw = json!({
            "format_version": "1.0",
            "device": {"id": "dut", "name": "DUT", "category": "Test"},
            "visual": {"width": 10, "height": 10, "label": "D", "color": "#000"},
            "pins": [
                {"id": "IN", "type": "digital", "direction": "input"},
                {"id": "OUT", "type": "digital", "direction": "output"}
            ],
            "emulation": {"state_vars": {"on": false, "count": 0}, "rules": rules}
        });
        DeviceInstance::new(1, Arc::new(DeviceDescriptor::from_value(raw).unwrap()))
    }

    #[test]
    fn test_later_rules_see_earlier_writes() {
        let mut inst = instance(json!([
            {"trigger": {"type": "always"}, "actions": [{"type": "set_state", "name": "on", "value": true}]},
            {"trigger": {"type": "state_equals", "name": "on", "value": true},
             "actions": [{"type": "set_pin", "pin": "OUT", "value": {"state": "on"}}]}
        ]));
        let outcome = RuleEngine::new(true).evaluate(&mut inst);
        assert!(outcome.changed);
        assert_eq!(outcome.fired, 2);
        assert_eq!(inst.pin_value("OUT"), Some(&Signal::HIGH));

        // Second pass: same triggers, nothing changes
        let outcome = RuleEngine::new(false).evaluate(&mut inst);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_fault_skips_only_that_action() {
        let mut inst = instance(json!([
            {"trigger": {"type": "always"}, "actions": [
                {"type": "set_pin", "pin": "IN", "value": true},
                {"type": "set_state", "name": "on", "value": true}
            ]}
        ]));
        let outcome = RuleEngine::new(true).evaluate(&mut inst);
        assert_eq!(outcome.faults.len(), 1);
        assert_eq!(outcome.faults[0].action, Some(0));
        assert!(matches!(outcome.faults[0].error, ActionError::Direction { .. }));
        assert_eq!(inst.state("on"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_tick_trigger_latches() {
        let mut inst = instance(json!([
            {"trigger": {"type": "tick"}, "actions": [
                {"type": "set_state", "name": "count", "value": {"op": "add", "lhs": {"state": "count"}, "rhs": 1}}
            ]}
        ]));
        inst.begin_tick();
        RuleEngine::new(true).evaluate(&mut inst);
        RuleEngine::new(false).evaluate(&mut inst);
        assert_eq!(inst.state("count"), Some(&Value::Int(1)));

        inst.begin_tick();
        RuleEngine::new(true).evaluate(&mut inst);
        assert_eq!(inst.state("count"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_serial_rule_fires_once_per_tick() {
        let mut inst = instance(json!([
            {"trigger": {"type": "always"}, "actions": [{"type": "emit_serial", "data": "x"}]}
        ]));
        inst.begin_tick();
        for first in [true, false, false] {
            RuleEngine::new(first).evaluate(&mut inst);
        }
        assert_eq!(inst.take_serial(), b"x".to_vec());
    }

    #[test]
    fn test_compound_triggers() {
        let inst = instance(json!([]));
        let engine = RuleEngine::new(false);
        let t: Trigger = serde_json::from_value(json!({
            "type": "any",
            "of": [
                {"type": "tick"},
                {"type": "not", "trigger": {"type": "state_compare", "name": "count", "op": "gt", "value": 0}}
            ]
        }))
        .unwrap();
        assert!(engine.fires(&t, &inst));
    }
}
