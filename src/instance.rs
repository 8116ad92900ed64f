//! Device instances: one placed occurrence of a descriptor.
//!
//! An instance shares its descriptor through an `Arc` and exclusively owns
//! its mutable state: state variables, pin values, LED states, the display
//! buffer, and serial output pending for the current tick.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::{DeviceDescriptor, PinSpec};
use crate::display::{DisplayBuffer, DisplayUpdate};
use crate::error::ActionError;
use crate::rules::ExprScope;
use crate::signal::{PinDirection, Signal, SignalDomain, Value};
use crate::types::InstanceId;

/// Who is writing a pin, for direction checks and error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    /// The device's own rules
    Rule,
    /// The external sketch program
    Sketch,
}

impl fmt::Display for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Writer::Rule => f.write_str("device rule"),
            Writer::Sketch => f.write_str("sketch"),
        }
    }
}

/// Runtime state of one pin.
#[derive(Clone, Debug, PartialEq)]
pub struct PinState {
    /// Value currently observed on the pin
    pub value: Signal,
    /// Value the device drives onto its net, if any
    pub drive: Option<Signal>,
    /// Written by the device during the current tick
    pub authored: bool,
}

impl PinState {
    fn initial(spec: &PinSpec) -> Self {
        let value = match spec.pull {
            Some(pull) if spec.domain() == SignalDomain::Digital => pull.level(),
            _ => spec.domain().undriven(),
        };
        Self {
            value,
            drive: None,
            authored: false,
        }
    }
}

/// State of an LED indicator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LedState {
    pub on: bool,
    /// 0.0..=1.0; 1.0 or 0.0 for plain on/off LEDs
    pub brightness: f64,
}

impl LedState {
    pub const OFF: LedState = LedState { on: false, brightness: 0.0 };
    pub const ON: LedState = LedState { on: true, brightness: 1.0 };
}

/// A placed, stateful device.
#[derive(Clone, Debug)]
pub struct DeviceInstance {
    id: InstanceId,
    descriptor: Arc<DeviceDescriptor>,
    state: BTreeMap<String, Value>,
    pins: Vec<PinState>,
    leds: Vec<LedState>,
    display: Option<DisplayBuffer>,
    tick_start: Vec<Signal>,
    latched: Vec<bool>,
    serial_out: Vec<u8>,
    display_dirty: bool,
}

impl DeviceInstance {
    /// Creates an instance with every value at its descriptor default.
    pub fn new(id: InstanceId, descriptor: Arc<DeviceDescriptor>) -> Self {
        let mut instance = Self {
            id,
            state: BTreeMap::new(),
            pins: Vec::new(),
            leds: Vec::new(),
            display: None,
            tick_start: Vec::new(),
            latched: Vec::new(),
            serial_out: Vec::new(),
            display_dirty: false,
            descriptor,
        };
        instance.reset();
        instance
    }

    /// Restores descriptor defaults and clears all runtime state.
    pub fn reset(&mut self) {
        let desc = &self.descriptor;
        self.state = desc.state_defaults().clone();
        self.pins = desc.pins().iter().map(PinState::initial).collect();
        self.leds = vec![LedState::OFF; desc.leds().len()];
        self.display = desc.display().and_then(|d| d.buffer().ok());
        self.tick_start = self.pins.iter().map(|p| p.value.clone()).collect();
        self.latched = vec![false; desc.rules().len()];
        self.serial_out.clear();
        self.display_dirty = false;
        self.refresh_bound_leds();
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    /// Device type id of the descriptor.
    pub fn device_id(&self) -> &str {
        self.descriptor.id()
    }

    /// All state variables.
    pub fn states(&self) -> &BTreeMap<String, Value> {
        &self.state
    }

    pub fn state(&self, name: &str) -> Option<&Value> {
        self.state.get(name)
    }

    /// Pin runtime state by id.
    pub fn pin(&self, pin: &str) -> Option<&PinState> {
        self.descriptor.pin_index(pin).map(|i| &self.pins[i])
    }

    /// Current value of a pin.
    pub fn pin_value(&self, pin: &str) -> Option<&Signal> {
        self.pin(pin).map(|p| &p.value)
    }

    /// Pin states in declaration order.
    pub fn pin_states(&self) -> &[PinState] {
        &self.pins
    }

    /// LED states in declaration order.
    pub fn leds(&self) -> &[LedState] {
        &self.leds
    }

    /// LED state by id.
    pub fn led(&self, led: &str) -> Option<LedState> {
        self.led_index(led).map(|i| self.leds[i])
    }

    pub fn display(&self) -> Option<&DisplayBuffer> {
        self.display.as_ref()
    }

    fn led_index(&self, led: &str) -> Option<usize> {
        self.descriptor.leds().iter().position(|l| l.key() == led)
    }

    fn pin_slot(&self, pin: &str) -> Result<usize, ActionError> {
        self.descriptor
            .pin_index(pin)
            .ok_or_else(|| ActionError::UnknownPin(pin.to_string()))
    }

    /// Writes a pin with device authority. Returns whether anything changed.
    ///
    /// Fails on input-only pins and on values outside the pin's domain.
    /// Writing `"z"` releases the pin so it stops driving its net.
    pub fn write_pin(&mut self, pin: &str, value: &Value, writer: Writer) -> Result<bool, ActionError> {
        let slot = self.pin_slot(pin)?;
        let spec = &self.descriptor.pins()[slot];
        if !spec.direction.device_writable() {
            return Err(ActionError::Direction {
                pin: pin.to_string(),
                direction: spec.direction,
                writer: writer.to_string(),
            });
        }
        let signal = spec
            .domain()
            .convert(value, spec.analog_range())
            .ok_or_else(|| ActionError::TypeMismatch {
                target: format!("pin '{}'", pin),
                expected: format!("{} value", spec.domain()),
                found: value.to_string(),
            })?;

        let state = &mut self.pins[slot];
        let drive = (!signal.is_floating()).then(|| signal.clone());
        let changed = state.value != signal || state.drive != drive;
        state.value = signal;
        state.drive = drive;
        state.authored = true;
        Ok(changed)
    }

    /// Pushes a resolved net value into a pin. Returns whether it changed.
    ///
    /// Output pins, pins the device authored this tick and values outside
    /// the pin's domain are left alone.
    pub(crate) fn apply_net(&mut self, slot: usize, value: &Signal) -> bool {
        let spec = &self.descriptor.pins()[slot];
        if !spec.direction.net_writable() || !spec.domain().accepts(value) {
            return false;
        }
        let state = &mut self.pins[slot];
        if state.authored || state.value == *value {
            return false;
        }
        state.value = value.clone();
        true
    }

    /// Value driven by a pin onto its net, if it drives.
    pub(crate) fn driven(&self, slot: usize) -> Option<&Signal> {
        match self.descriptor.pins()[slot].direction {
            PinDirection::Input => None,
            _ => self.pins[slot].drive.as_ref(),
        }
    }

    /// Assigns a state variable, coercing to its declared type.
    pub fn set_state(&mut self, name: &str, value: Value) -> Result<bool, ActionError> {
        let current = self
            .state
            .get_mut(name)
            .ok_or_else(|| ActionError::UnknownStateVar(name.to_string()))?;
        let coerced = current.kind().coerce(&value).ok_or_else(|| ActionError::TypeMismatch {
            target: format!("state variable '{}'", name),
            expected: current.kind().to_string(),
            found: value.kind().to_string(),
        })?;
        if *current == coerced {
            return Ok(false);
        }
        *current = coerced;
        Ok(true)
    }

    /// Sets an unbound LED from a boolean or, for PWM LEDs, a brightness.
    pub fn set_led(&mut self, led: &str, value: &Value) -> Result<bool, ActionError> {
        let index = self
            .led_index(led)
            .ok_or_else(|| ActionError::UnknownLed(led.to_string()))?;
        let spec = &self.descriptor.leds()[index];
        let mismatch = || ActionError::TypeMismatch {
            target: format!("LED '{}'", led),
            expected: if spec.pwm { "bool or 0.0..=1.0" } else { "bool" }.to_string(),
            found: value.to_string(),
        };
        if spec.binding().is_some() {
            return Err(mismatch());
        }
        let next = match value {
            Value::Bool(true) => LedState::ON,
            Value::Bool(false) => LedState::OFF,
            v if spec.pwm => match v.as_f64() {
                Some(x) if (0.0..=1.0).contains(&x) => LedState {
                    on: x > 0.0,
                    brightness: x,
                },
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        };
        let changed = self.leds[index] != next;
        self.leds[index] = next;
        Ok(changed)
    }

    /// Recomputes LEDs bound to state variables.
    pub fn refresh_bound_leds(&mut self) {
        for (state, spec) in self.leds.iter_mut().zip(self.descriptor.leds()) {
            if let Some(var) = spec.binding() {
                let lit = self.state.get(var).map_or(false, |v| v.loose_eq(&spec.on_value));
                *state = if lit { LedState::ON } else { LedState::OFF };
            }
        }
    }

    /// Writes into the display buffer.
    pub fn apply_display(&mut self, update: &DisplayUpdate) -> Result<bool, ActionError> {
        let buffer = self.display.as_mut().ok_or(ActionError::NoDisplay)?;
        let changed = buffer.apply(update)?;
        self.display_dirty |= changed;
        Ok(changed)
    }

    /// Appends to this tick's serial output.
    pub fn emit_serial(&mut self, data: &[u8]) {
        self.serial_out.extend_from_slice(data);
    }

    /// Clears per-tick write authority and rule latches.
    pub(crate) fn begin_tick(&mut self) {
        self.pins.iter_mut().for_each(|p| p.authored = false);
        self.latched.iter_mut().for_each(|l| *l = false);
    }

    /// Records pin values for edge detection.
    pub(crate) fn mark_tick_start(&mut self) {
        self.tick_start.clear();
        self.tick_start.extend(self.pins.iter().map(|p| p.value.clone()));
    }

    /// True if the pin differs from its value at the start of the tick.
    pub fn pin_changed(&self, pin: &str) -> bool {
        self.descriptor
            .pin_index(pin)
            .map_or(false, |i| self.pins[i].value != self.tick_start[i])
    }

    pub(crate) fn is_latched(&self, rule: usize) -> bool {
        self.latched.get(rule).copied().unwrap_or(false)
    }

    pub(crate) fn latch(&mut self, rule: usize) {
        if let Some(l) = self.latched.get_mut(rule) {
            *l = true;
        }
    }

    /// Takes serial output emitted since the last call.
    pub(crate) fn take_serial(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.serial_out)
    }

    /// Returns and clears the display-changed flag.
    pub(crate) fn take_display_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.display_dirty, false)
    }
}

impl ExprScope for DeviceInstance {
    fn state(&self, name: &str) -> Option<Value> {
        self.state.get(name).cloned()
    }

    fn pin(&self, pin: &str) -> Option<Signal> {
        self.pin_value(pin).cloned()
    }

    fn prop(&self, name: &str) -> Option<Value> {
        self.descriptor.property(name)
    }
}
