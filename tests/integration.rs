//! End-to-end tests: configuration file, custom device library, sketch
//! program, displays and statistics export.

use std::path::Path;

use ardusim::{
    create_default_registry, ActionError, DisplayBuffer, LedState, PinRef, SerialMonitor, SimConfig, SimError,
    Simulator, Value,
};
use serde_json::json;

// ============================================================================
// Library fixtures
// ============================================================================

fn mcu() -> serde_json::Value {
    json!({
        "format_version": "1.0",
        "device": {"id": "mcu", "name": "Board", "category": "Board"},
        "visual": {"width": 60, "height": 40, "label": "MCU", "color": "#0a5"},
        "pins": [
            {"id": "A0", "type": "analog", "direction": "output", "range": [0, 5]},
            {"id": "D13", "type": "digital", "direction": "output"}
        ],
        "emulation": {"type": "microcontroller"}
    })
}

fn threshold() -> serde_json::Value {
    let above = json!({"type": "pin_compare", "pin": "A", "op": "gt", "value": 2.5});
    json!({
        "format_version": "1.0",
        "device": {"id": "threshold", "name": "Comparator", "category": "Analog"},
        "visual": {"width": 20, "height": 20, "label": ">", "color": "#333"},
        "pins": [
            {"id": "A", "type": "analog", "direction": "input"},
            {"id": "OUT", "type": "digital", "direction": "output"}
        ],
        "emulation": {
            "rules": [
                {"trigger": above.clone(), "actions": [{"type": "set_pin", "pin": "OUT", "value": true}]},
                {"trigger": {"type": "not", "trigger": above},
                 "actions": [{"type": "set_pin", "pin": "OUT", "value": false}]}
            ]
        }
    })
}

fn panel() -> serde_json::Value {
    json!({
        "format_version": "1.0",
        "device": {"id": "panel", "name": "Status Panel", "category": "Display"},
        "visual": {"width": 80, "height": 20, "label": "LCD", "color": "#113"},
        "pins": [{"id": "IN", "type": "digital", "direction": "input"}],
        "display": {"type": "char", "region": {"x": 4, "y": 4, "w": 72, "h": 12}, "cols": 8, "rows": 1},
        "emulation": {
            "type": "display",
            "rules": [
                {"trigger": {"type": "pin_equals", "pin": "IN", "value": true},
                 "actions": [{"type": "set_display", "update": {"kind": "text", "row": 0, "col": 0, "text": "ON "}}]},
                {"trigger": {"type": "all", "of": [
                    {"type": "pin_changed", "pin": "IN"},
                    {"type": "pin_equals", "pin": "IN", "value": true}
                 ]},
                 "actions": [{"type": "emit_serial", "data": "on\n"}]},
                {"trigger": {"type": "pin_equals", "pin": "IN", "value": false},
                 "actions": [{"type": "set_display", "update": {"kind": "text", "row": 0, "col": 0, "text": "OFF"}}]}
            ]
        }
    })
}

fn write_library(dir: &Path) {
    for (name, descriptor) in [("mcu.adev", mcu()), ("threshold.adev", threshold()), ("panel.adev", panel())] {
        std::fs::write(dir.join(name), descriptor.to_string()).unwrap();
    }
}

const CIRCUIT: &str = r#"
simulation:
  iteration_cap: 16
  collect_stats: true
devices:
  - { id: 1, device: mcu }
  - { id: 2, device: threshold }
  - { id: 3, device: panel }
  - { id: 4, device: led }
wires:
  - { from: "1.A0", to: "2.A" }
  - { from: "2.OUT", to: "3.IN" }
  - { from: "2.OUT", to: "4.anode" }
"#;

fn panel_text(sim: &Simulator) -> String {
    match sim.circuit().instance(3).unwrap().display() {
        Some(buffer) => buffer.row_text(0).unwrap(),
        None => panic!("panel has no display"),
    }
}

// ============================================================================
// Config-driven run
// ============================================================================

#[test]
fn test_config_library_and_sketch() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib");
    std::fs::create_dir(&lib).unwrap();
    write_library(&lib);

    let mut config = SimConfig::from_yaml(CIRCUIT).unwrap();
    config.library.push(lib.clone());
    let config_path = dir.path().join("circuit.yaml");
    config.to_yaml_file(&config_path).unwrap();
    let config = SimConfig::from_file(&config_path).unwrap();
    assert_eq!(config.simulation.iteration_cap, 16);

    let mut registry = create_default_registry();
    let report = registry.load_library(&config);
    assert!(report.is_clean());
    assert_eq!(report.loaded, vec!["mcu", "panel", "threshold"]);

    let mut sim = Simulator::from_config(&config, &registry).unwrap();
    assert_eq!(sim.config().iteration_cap, 16);
    let serial = SerialMonitor::new();
    sim.add_serial_sink(serial.clone());
    sim.start().unwrap();

    let port = sim.sketch_port();
    let a0 = PinRef::new(1, "A0");

    port.write_pin(a0.clone(), 1.0);
    let event = sim.tick().unwrap().unwrap();
    assert!(event.warnings.is_empty());
    assert_eq!(panel_text(&sim), "OFF     ");
    assert_eq!(event.displays.len(), 1);
    assert_eq!(sim.state_var(4, "led_on"), Some(&Value::Bool(false)));

    port.write_pin(a0.clone(), 3.3);
    let event = sim.tick().unwrap().unwrap();
    assert_eq!(panel_text(&sim), "ON      ");
    assert_eq!(event.state(4, "led_on"), Some(&Value::Bool(true)));
    assert_eq!(event.serial_from(3), Some(&b"on\n"[..]));
    assert_eq!(sim.circuit().instance(4).unwrap().led("LIGHT"), Some(LedState::ON));

    // Out-of-range analog write is a fault; the pin keeps its value
    port.write_pin(a0.clone(), 7.5);
    let event = sim.tick().unwrap().unwrap();
    assert_eq!(event.faults.len(), 1);
    assert_eq!(event.faults[0].rule, None);
    assert!(event.displays.is_empty());
    assert_eq!(port.read_pin(&a0), Some(ardusim::Signal::Analog(3.3)));

    assert_eq!(serial.lines(3), vec!["on"]);

    sim.stop();
    let stats = sim.stats();
    assert_eq!(stats.run.ticks, 3);
    assert_eq!(stats.run.action_faults, 1);
    assert_eq!(stats.run.serial_bytes, 3);

    let csv_path = dir.path().join("stats.csv");
    stats.to_csv_file(&csv_path).unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert!(csv.contains("ticks,3\n"));

    let json_path = dir.path().join("stats.json");
    stats.to_json_file(&json_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed["run"]["ticks"], 3);
}

#[test]
fn test_missing_library_entries_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::new();
    config.library.push(dir.path().join("absent.adev"));

    let mut registry = create_default_registry();
    let before = registry.len();
    let report = registry.load_library(&config);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(registry.len(), before);
}

#[test]
fn test_config_errors() {
    let registry = create_default_registry();

    // Unregistered device type
    let config = SimConfig::from_yaml(CIRCUIT).unwrap();
    assert!(matches!(
        Simulator::from_config(&config, &registry),
        Err(SimError::UnknownDevice(ref id)) if id == "mcu"
    ));

    // Wire to an undeclared instance
    let yaml = r#"
devices:
  - { id: 1, device: led }
wires:
  - { from: "1.anode", to: "5.OUT" }
"#;
    let config = SimConfig::from_yaml(yaml).unwrap();
    assert!(matches!(
        Simulator::from_config(&config, &registry),
        Err(SimError::Config(_))
    ));

    // Rejected by the circuit graph
    let yaml = r#"
devices:
  - { id: 1, device: led }
wires:
  - { from: "1.anode", to: "1.anode" }
"#;
    let config = SimConfig::from_yaml(yaml).unwrap();
    assert!(matches!(
        Simulator::from_config(&config, &registry),
        Err(SimError::Connection(_))
    ));
}

// ============================================================================
// Displays
// ============================================================================

#[test]
fn test_pixel_display_and_wrong_update_kind() {
    let raw = json!({
        "format_version": "1.0",
        "device": {"id": "matrix", "name": "Matrix", "category": "Display"},
        "visual": {"width": 40, "height": 20, "label": "OLED", "color": "#000"},
        "pins": [],
        "display": {"type": "oled", "region": {"x": 0, "y": 0, "w": 40, "h": 20}, "width_px": 4, "height_px": 2},
        "emulation": {
            "type": "display",
            "rules": [
                {"trigger": {"type": "tick"},
                 "actions": [{"type": "set_display", "update": {"kind": "pixel", "x": 1, "y": 0, "on": true}}]},
                {"trigger": {"type": "tick"},
                 "actions": [{"type": "set_display", "update": {"kind": "text", "row": 0, "col": 0, "text": "x"}}]}
            ]
        }
    });
    let mut registry = create_default_registry();
    registry.register_json(&raw.to_string()).unwrap();

    let mut sim = Simulator::default();
    sim.add_device_from(&registry, "matrix", 1).unwrap();
    sim.start().unwrap();

    let event = sim.tick().unwrap().unwrap();
    assert_eq!(event.displays.len(), 1);
    match &event.displays[0].buffer {
        DisplayBuffer::Pixels { width, height, .. } => assert_eq!((*width, *height), (4, 2)),
        other => panic!("expected pixels, got {:?}", other),
    }
    let display = sim.circuit().instance(1).unwrap().display().unwrap();
    assert_eq!(display.pixel(1, 0), Some(true));
    assert_eq!(display.pixel(0, 0), Some(false));

    assert_eq!(event.faults.len(), 1);
    assert_eq!(event.faults[0].rule, Some(1));
    assert!(matches!(event.faults[0].error, ActionError::TypeMismatch { .. }));

    // Unchanged buffer, same fault reported again on the next tick
    let event = sim.tick().unwrap().unwrap();
    assert!(event.displays.is_empty());
    assert_eq!(event.faults.len(), 1);
}
