//! Built-in device descriptors, written in the same `.adev` format as user
//! libraries.

use crate::descriptor::DeviceDescriptor;
use crate::error::ValidationResult;

/// Red LED; lights while its anode is high.
pub const LED: &str = r##"{
  "format_version": "1.0",
  "device": {"id": "led", "name": "LED", "category": "Output", "description": "Single indicator LED"},
  "visual": {
    "width": 30, "height": 50, "label": "LED", "color": "#cc2222",
    "led_indicators": [{"label": "LIGHT", "x": 15, "y": 15, "radius": 8, "color": "#ff3344", "state_var": "led_on", "on_value": true}]
  },
  "pins": [
    {"id": "anode", "label": "+", "x": 10, "y": 50, "type": "digital", "direction": "input", "side": "bottom"},
    {"id": "cathode", "label": "-", "x": 20, "y": 50, "type": "ground", "direction": "input", "side": "bottom"}
  ],
  "emulation": {
    "type": "active",
    "state_vars": {"led_on": false},
    "rules": [
      {"trigger": "pin_high", "pin": "anode", "action": "set_state", "target": "led_on", "value": true},
      {"trigger": "pin_low", "pin": "anode", "action": "set_state", "target": "led_on", "value": false}
    ],
    "properties": {"forward_voltage": 2.0, "max_current_ma": 20}
  }
}"##;

/// Constant high source.
pub const LOGIC_HIGH: &str = r##"{
  "format_version": "1.0",
  "device": {"id": "logic_high", "name": "Logic High", "category": "Source"},
  "visual": {"width": 30, "height": 20, "label": "1", "color": "#226622"},
  "pins": [{"id": "OUT", "label": "out", "x": 30, "y": 10, "type": "digital", "direction": "output", "side": "right"}],
  "emulation": {
    "type": "active",
    "rules": [{"trigger": {"type": "always"}, "actions": [{"type": "set_pin", "pin": "OUT", "value": true}]}]
  }
}"##;

/// Constant low source.
pub const LOGIC_LOW: &str = r##"{
  "format_version": "1.0",
  "device": {"id": "logic_low", "name": "Logic Low", "category": "Source"},
  "visual": {"width": 30, "height": 20, "label": "0", "color": "#222266"},
  "pins": [{"id": "OUT", "label": "out", "x": 30, "y": 10, "type": "digital", "direction": "output", "side": "right"}],
  "emulation": {
    "type": "active",
    "rules": [{"trigger": {"type": "always"}, "actions": [{"type": "set_pin", "pin": "OUT", "value": false}]}]
  }
}"##;

/// Square wave toggling once per tick.
pub const CLOCK: &str = r##"{
  "format_version": "1.0",
  "device": {"id": "clock", "name": "Clock", "category": "Source"},
  "visual": {"width": 40, "height": 20, "label": "CLK", "color": "#555555"},
  "pins": [{"id": "OUT", "label": "clk", "x": 40, "y": 10, "type": "digital", "direction": "output", "side": "right"}],
  "emulation": {
    "type": "active",
    "state_vars": {"level": false},
    "rules": [
      {"name": "toggle", "trigger": {"type": "tick"},
       "actions": [{"type": "set_state", "name": "level", "value": {"op": "not", "operand": {"state": "level"}}}]},
      {"name": "drive", "trigger": {"type": "always"},
       "actions": [{"type": "set_pin", "pin": "OUT", "value": {"state": "level"}}]}
    ]
  }
}"##;

/// Inverter. A floating input leaves the output undriven.
pub const NOT_GATE: &str = r##"{
  "format_version": "1.0",
  "device": {"id": "not_gate", "name": "NOT Gate", "category": "Logic"},
  "visual": {"width": 40, "height": 30, "label": "NOT", "color": "#444444"},
  "pins": [
    {"id": "A", "label": "A", "x": 0, "y": 15, "type": "digital", "direction": "input", "side": "left"},
    {"id": "Y", "label": "Y", "x": 40, "y": 15, "type": "digital", "direction": "output", "side": "right"}
  ],
  "emulation": {
    "type": "active",
    "rules": [
      {"trigger": {"type": "pin_equals", "pin": "A", "value": true}, "actions": [{"type": "set_pin", "pin": "Y", "value": false}]},
      {"trigger": {"type": "pin_equals", "pin": "A", "value": false}, "actions": [{"type": "set_pin", "pin": "Y", "value": true}]}
    ]
  }
}"##;

/// Two-input AND.
pub const AND_GATE: &str = r##"{
  "format_version": "1.0",
  "device": {"id": "and_gate", "name": "AND Gate", "category": "Logic"},
  "visual": {"width": 40, "height": 40, "label": "AND", "color": "#444444"},
  "pins": [
    {"id": "A", "label": "A", "x": 0, "y": 10, "type": "digital", "direction": "input", "side": "left"},
    {"id": "B", "label": "B", "x": 0, "y": 30, "type": "digital", "direction": "input", "side": "left"},
    {"id": "Y", "label": "Y", "x": 40, "y": 20, "type": "digital", "direction": "output", "side": "right"}
  ],
  "emulation": {
    "type": "active",
    "rules": [
      {"trigger": {"type": "all", "of": [
          {"type": "pin_equals", "pin": "A", "value": true},
          {"type": "pin_equals", "pin": "B", "value": true}]},
       "actions": [{"type": "set_pin", "pin": "Y", "value": true}]},
      {"trigger": {"type": "any", "of": [
          {"type": "pin_equals", "pin": "A", "value": false},
          {"type": "pin_equals", "pin": "B", "value": false}]},
       "actions": [{"type": "set_pin", "pin": "Y", "value": false}]}
    ]
  }
}"##;

/// Counts rising edges on `IN` and reports each one on its serial stream.
pub const EDGE_COUNTER: &str = r##"{
  "format_version": "1.0",
  "device": {"id": "edge_counter", "name": "Edge Counter", "category": "Instrument"},
  "visual": {
    "width": 60, "height": 30, "label": "CNT", "color": "#333333",
    "led_indicators": [{"id": "ACT", "label": "activity", "x": 50, "y": 5, "pwm": true}]
  },
  "pins": [{"id": "IN", "label": "in", "x": 0, "y": 15, "type": "digital", "direction": "input", "side": "left"}],
  "emulation": {
    "type": "active",
    "state_vars": {"count": 0},
    "rules": [
      {"name": "rising", "trigger": {"type": "all", "of": [
          {"type": "pin_changed", "pin": "IN"},
          {"type": "pin_equals", "pin": "IN", "value": true}]},
       "actions": [
          {"type": "set_state", "name": "count", "value": {"op": "add", "lhs": {"state": "count"}, "rhs": 1}},
          {"type": "emit_serial", "data": "rise\n"},
          {"type": "set_led", "led": "ACT", "value": 1.0}]},
      {"name": "idle", "trigger": {"type": "not", "trigger": {"type": "pin_changed", "pin": "IN"}},
       "actions": [{"type": "set_led", "led": "ACT", "value": 0.0}]}
    ]
  }
}"##;

/// Every built-in descriptor source.
pub const ALL: &[&str] = &[LED, LOGIC_HIGH, LOGIC_LOW, CLOCK, NOT_GATE, AND_GATE, EDGE_COUNTER];

/// Parses every built-in descriptor.
pub fn descriptors() -> ValidationResult<Vec<DeviceDescriptor>> {
    ALL.iter().map(|json| DeviceDescriptor::from_json(json)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_load() {
        let descriptors = descriptors().unwrap();
        let ids: Vec<_> = descriptors.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(
            ids,
            vec!["led", "logic_high", "logic_low", "clock", "not_gate", "and_gate", "edge_counter"]
        );
    }

    #[test]
    fn test_led_is_bound() {
        let led = DeviceDescriptor::from_json(LED).unwrap();
        assert_eq!(led.leds()[0].binding(), Some("led_on"));
        assert_eq!(led.rules().len(), 2);
    }
}
