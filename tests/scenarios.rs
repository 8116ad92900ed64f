//! End-to-end scheduler scenarios: propagation within a tick, feedback,
//! conflicts, oscillation and sketch-queue overflow.

use std::sync::Arc;

use ardusim::{
    DeviceDescriptor, EventRecorder, PinRef, RunState, SchedulerConfig, Signal, Simulator, Value, Warning,
};
use serde_json::json;

fn device(id: &str, pins: serde_json::Value, state: serde_json::Value, rules: serde_json::Value) -> Arc<DeviceDescriptor> {
    let raw = json!({
        "format_version": "1.0",
        "device": {"id": id, "name": id, "category": "Test"},
        "visual": {"width": 10, "height": 10, "label": id, "color": "#000"},
        "pins": pins,
        "emulation": {"type": "active", "state_vars": state, "rules": rules}
    });
    Arc::new(DeviceDescriptor::from_value(raw).unwrap())
}

/// Output-only device with no rules, driven through the sketch.
fn driver() -> Arc<DeviceDescriptor> {
    let raw = json!({
        "format_version": "1.0",
        "device": {"id": "mcu", "name": "MCU", "category": "Board"},
        "visual": {"width": 10, "height": 10, "label": "MCU", "color": "#000"},
        "pins": [
            {"id": "D2", "type": "digital", "direction": "output"},
            {"id": "D3", "type": "digital", "direction": "output"}
        ],
        "emulation": {"type": "microcontroller"}
    });
    Arc::new(DeviceDescriptor::from_value(raw).unwrap())
}

fn pin(instance: u64, pin: &str) -> PinRef {
    PinRef::new(instance, pin)
}

#[test]
fn test_input_to_state_and_output_in_one_tick() {
    let dut = device(
        "dut",
        json!([
            {"id": "P1", "type": "digital", "direction": "input"},
            {"id": "P2", "type": "digital", "direction": "output"}
        ]),
        json!({"on": false}),
        json!([{
            "trigger": {"type": "pin_equals", "pin": "P1", "value": true},
            "actions": [
                {"type": "set_state", "name": "on", "value": true},
                {"type": "set_pin", "pin": "P2", "value": true}
            ]
        }]),
    );

    let mut sim = Simulator::default();
    sim.add_device(driver(), 1).unwrap();
    sim.add_device(dut, 2).unwrap();
    sim.connect(pin(1, "D2"), pin(2, "P1")).unwrap();
    sim.set_pin(&pin(1, "D2"), true).unwrap();
    sim.start().unwrap();

    let event = sim.tick().unwrap().unwrap();
    assert_eq!(event.tick, 1);
    assert_eq!(sim.state_var(2, "on"), Some(&Value::Bool(true)));
    assert_eq!(sim.pin_value(&pin(2, "P2")), Some(&Signal::HIGH));
    assert_eq!(event.state(2, "on"), Some(&Value::Bool(true)));
    assert_eq!(event.pin(&pin(2, "P2")), Some(&Signal::HIGH));
    assert!(event.faults.is_empty());
}

#[test]
fn test_feedback_loop_settles() {
    // A seeds its output once per tick and records when the echo returns;
    // B copies its input to its output.
    let seeder = device(
        "seeder",
        json!([
            {"id": "IN", "type": "digital", "direction": "input"},
            {"id": "OUT", "type": "digital", "direction": "output"}
        ]),
        json!({"seen": false}),
        json!([
            {"trigger": {"type": "tick"}, "actions": [{"type": "set_pin", "pin": "OUT", "value": true}]},
            {"trigger": {"type": "pin_equals", "pin": "IN", "value": true},
             "actions": [{"type": "set_state", "name": "seen", "value": true}]}
        ]),
    );
    let echo = device(
        "echo",
        json!([
            {"id": "IN", "type": "digital", "direction": "input"},
            {"id": "OUT", "type": "digital", "direction": "output"}
        ]),
        json!({}),
        json!([
            {"trigger": {"type": "pin_equals", "pin": "IN", "value": true},
             "actions": [{"type": "set_pin", "pin": "OUT", "value": true}]},
            {"trigger": {"type": "pin_equals", "pin": "IN", "value": false},
             "actions": [{"type": "set_pin", "pin": "OUT", "value": false}]}
        ]),
    );

    let mut sim = Simulator::default();
    sim.add_device(seeder, 1).unwrap();
    sim.add_device(echo, 2).unwrap();
    sim.connect(pin(1, "OUT"), pin(2, "IN")).unwrap();
    sim.connect(pin(2, "OUT"), pin(1, "IN")).unwrap();
    sim.start().unwrap();

    let event = sim.tick().unwrap().unwrap();
    assert!(!event.is_unstable());
    // Three changing iterations, then one that confirms the fixed point
    assert!(event.iterations <= 4, "took {} iterations", event.iterations);
    assert_eq!(sim.state_var(1, "seen"), Some(&Value::Bool(true)));
    for p in [pin(1, "OUT"), pin(2, "IN"), pin(2, "OUT"), pin(1, "IN")] {
        assert_eq!(sim.pin_value(&p), Some(&Signal::HIGH), "{}", p);
    }

    // The fixed point holds on the next tick
    let event = sim.tick().unwrap().unwrap();
    assert!(event.is_quiet());
    assert_eq!(event.iterations, 1);
}

#[test]
fn test_oscillator_hits_iteration_cap() {
    // Output wired back to its own pulled-down input through an inverter rule
    let ring = device(
        "ring",
        json!([
            {"id": "IN", "type": "digital", "direction": "input", "pull": "down"},
            {"id": "OUT", "type": "digital", "direction": "output"}
        ]),
        json!({}),
        json!([
            {"trigger": {"type": "pin_equals", "pin": "IN", "value": true},
             "actions": [{"type": "set_pin", "pin": "OUT", "value": false}]},
            {"trigger": {"type": "pin_equals", "pin": "IN", "value": false},
             "actions": [{"type": "set_pin", "pin": "OUT", "value": true}]}
        ]),
    );

    let mut sim = Simulator::new(SchedulerConfig {
        iteration_cap: 8,
        ..SchedulerConfig::default()
    });
    sim.add_device(ring, 1).unwrap();
    sim.connect(pin(1, "OUT"), pin(1, "IN")).unwrap();
    let recorder = EventRecorder::new();
    sim.add_observer(recorder.clone());
    sim.start().unwrap();

    assert_eq!(sim.run_ticks(3).unwrap(), 3);
    assert_eq!(sim.state(), RunState::Running);
    for event in recorder.events() {
        assert_eq!(event.iterations, 8);
        assert_eq!(event.warnings, vec![Warning::UnstableCircuit { iterations: 8 }]);
    }
}

#[test]
fn test_non_finite_state_write_settles() {
    let huge = json!({"op": "mul", "lhs": 1e308, "rhs": 10});
    let nan = device(
        "nan",
        json!([]),
        json!({"x": 0.0}),
        json!([{
            "trigger": {"type": "always"},
            "actions": [{"type": "set_state", "name": "x", "value": {"op": "sub", "lhs": huge.clone(), "rhs": huge}}]
        }]),
    );

    let mut sim = Simulator::default();
    sim.add_device(nan, 1).unwrap();
    sim.start().unwrap();

    for _ in 0..2 {
        let event = sim.tick().unwrap().unwrap();
        assert!(!event.is_unstable());
        assert_eq!(event.iterations, 1);
        assert_eq!(event.faults.len(), 1);
        assert_eq!(event.faults[0].rule, Some(0));
    }
    assert_eq!(sim.state_var(1, "x"), Some(&Value::Float(0.0)));
}

#[test]
fn test_conflict_warned_once_per_tick() {
    let registry = ardusim::create_default_registry();
    let mut sim = Simulator::default();
    sim.add_device_from(&registry, "logic_high", 1).unwrap();
    sim.add_device_from(&registry, "logic_low", 2).unwrap();
    sim.add_device_from(&registry, "led", 3).unwrap();
    sim.connect(pin(1, "OUT"), pin(3, "anode")).unwrap();
    sim.connect(pin(2, "OUT"), pin(3, "anode")).unwrap();
    let recorder = EventRecorder::new();
    sim.add_observer(recorder.clone());
    sim.start().unwrap();

    assert_eq!(sim.run_ticks(3).unwrap(), 3);
    let warnings = recorder.warnings();
    assert_eq!(warnings.len(), 3);
    for (i, (tick, warning)) in warnings.into_iter().enumerate() {
        assert_eq!(tick, i as u64 + 1);
        match warning {
            Warning::NetConflict { drivers, .. } => {
                assert_eq!(drivers, vec![pin(1, "OUT"), pin(2, "OUT")]);
            }
            other => panic!("unexpected warning {:?}", other),
        }
    }
    assert_eq!(sim.pin_value(&pin(3, "anode")), Some(&Signal::Conflict));
    assert_eq!(sim.state_var(3, "led_on"), Some(&Value::Bool(false)));
}

#[test]
fn test_bidirectional_write_holds_for_its_tick() {
    // Drives B high once, on the first tick, against an output held low
    let talker = device(
        "talker",
        json!([{"id": "B", "type": "digital", "direction": "bidirectional"}]),
        json!({"done": false}),
        json!([{
            "trigger": {"type": "all", "of": [
                {"type": "tick"},
                {"type": "state_equals", "name": "done", "value": false}
            ]},
            "actions": [
                {"type": "set_pin", "pin": "B", "value": true},
                {"type": "set_state", "name": "done", "value": true}
            ]
        }]),
    );

    let mut sim = Simulator::default();
    sim.add_device(driver(), 1).unwrap();
    sim.add_device(talker, 2).unwrap();
    sim.connect(pin(1, "D2"), pin(2, "B")).unwrap();
    sim.set_pin(&pin(1, "D2"), false).unwrap();
    sim.start().unwrap();

    // The device's own write wins over propagation within the tick
    let event = sim.tick().unwrap().unwrap();
    assert_eq!(sim.pin_value(&pin(2, "B")), Some(&Signal::HIGH));
    assert!(event
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::NetConflict { drivers, .. } if drivers.contains(&pin(2, "B")))));

    // Without a rewrite the observed value follows the net; the drive stays
    let event = sim.tick().unwrap().unwrap();
    assert_eq!(sim.state_var(2, "done"), Some(&Value::Bool(true)));
    let state = sim.circuit().instance(2).unwrap().pin("B").unwrap();
    assert_eq!(state.value, Signal::Conflict);
    assert_eq!(state.drive, Some(Signal::HIGH));
    assert!(event.warnings.iter().any(|w| matches!(w, Warning::NetConflict { .. })));
}

#[test]
fn test_sketch_overflow_drops_oldest() {
    let mut sim = Simulator::new(SchedulerConfig {
        queue_capacity: 4,
        ..SchedulerConfig::default()
    });
    sim.add_device(driver(), 1).unwrap();
    sim.start().unwrap();

    let port = sim.sketch_port();
    let producer = port.clone();
    std::thread::spawn(move || {
        for i in 0..10 {
            producer.write_pin(pin(1, "D2"), i % 2 == 0);
            producer.write_pin(pin(1, "D3"), i as i64 % 2);
        }
    })
    .join()
    .unwrap();
    assert_eq!(port.pending(), 4);

    let event = sim.tick().unwrap().unwrap();
    assert_eq!(event.overflow(), Some(16));
    assert_eq!(
        event
            .warnings
            .iter()
            .filter(|w| matches!(w, Warning::Overflow { .. }))
            .count(),
        1
    );
    // The newest writes survived: i = 9 wrote false / 1
    assert_eq!(sim.pin_value(&pin(1, "D2")), Some(&Signal::LOW));
    assert_eq!(sim.pin_value(&pin(1, "D3")), Some(&Signal::HIGH));
    assert_eq!(port.read_pin(&pin(1, "D3")), Some(Signal::HIGH));

    // No new overflow, no new warning
    let event = sim.tick().unwrap().unwrap();
    assert_eq!(event.overflow(), None);
}

#[test]
fn test_pause_preserves_and_stop_resets() {
    let registry = ardusim::create_default_registry();
    let mut sim = Simulator::default();
    sim.add_device_from(&registry, "clock", 1).unwrap();
    sim.add_device_from(&registry, "edge_counter", 2).unwrap();
    sim.connect(pin(1, "OUT"), pin(2, "IN")).unwrap();
    sim.start().unwrap();
    sim.run_ticks(5).unwrap();
    assert_eq!(sim.state_var(2, "count"), Some(&Value::Int(3)));

    sim.pause().unwrap();
    assert_eq!(sim.run_ticks(5).unwrap(), 0);
    assert_eq!(sim.clock(), 5);
    assert_eq!(sim.state_var(2, "count"), Some(&Value::Int(3)));

    sim.resume().unwrap();
    sim.tick().unwrap();
    assert_eq!(sim.clock(), 6);

    sim.stop();
    assert_eq!(sim.clock(), 0);
    assert_eq!(sim.state_var(2, "count"), Some(&Value::Int(0)));
    assert_eq!(sim.state_var(1, "level"), Some(&Value::Bool(false)));

    // A fresh run repeats the same sequence
    sim.start().unwrap();
    sim.run_ticks(5).unwrap();
    assert_eq!(sim.state_var(2, "count"), Some(&Value::Int(3)));
}
