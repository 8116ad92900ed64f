//! The simulation scheduler.
//!
//! [`Simulator`] owns the circuit graph and advances it one tick at a time.
//! Each tick drains queued sketch writes, then alternates net resolution and
//! rule evaluation until nothing changes or the iteration cap is reached,
//! then advances the clock and hands a [`TickEvent`] to observers.
//!
//! ```text
//! Stopped --start--> Running --pause--> Paused
//!    ^                  |  <--resume--     |
//!    +-------stop-------+-------stop-------+
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::circuit::Circuit;
use crate::config::{DeviceConfig, SimConfig, SimulationParams, WireConfig};
use crate::descriptor::DeviceDescriptor;
use crate::error::{ActionError, SimError, SimResult};
use crate::event::{ActionFault, DisplayDelta, LedDelta, PinDelta, SerialOutput, StateDelta, TickEvent, Warning};
use crate::instance::{DeviceInstance, LedState, Writer};
use crate::io::{PinWrite, SerialSink, SketchPort, TickObserver};
use crate::registry::DeviceRegistry;
use crate::rules::RuleEngine;
use crate::signal::{Signal, Value};
use crate::stats::{SimulationStats, Timer};
use crate::types::{InstanceId, PinRef, Tick, WireId};

/// Lifecycle state of the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Runtime parameters of the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Propagate/evaluate iterations allowed per tick
    pub iteration_cap: usize,
    /// Capacity of the sketch pin-write queue
    pub queue_capacity: usize,
    /// Collect [`SimulationStats`] while running
    pub collect_stats: bool,
    /// Log filter the embedding application should install
    pub log_level: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            iteration_cap: 32,
            queue_capacity: 256,
            collect_stats: false,
            log_level: "info".to_string(),
        }
    }
}

impl From<&SimulationParams> for SchedulerConfig {
    fn from(params: &SimulationParams) -> Self {
        Self {
            iteration_cap: params.iteration_cap.max(1),
            queue_capacity: params.queue_capacity.max(1),
            collect_stats: params.collect_stats,
            log_level: params.log_level.clone(),
        }
    }
}

/// Requests a stop from another thread; honored at the next tick boundary.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Pre-tick values of one instance, for computing deltas.
struct Snapshot {
    pins: Vec<Signal>,
    states: BTreeMap<String, Value>,
    leds: Vec<LedState>,
}

impl Snapshot {
    fn capture(instance: &DeviceInstance) -> Self {
        Self {
            pins: instance.pin_states().iter().map(|p| p.value.clone()).collect(),
            states: instance.states().clone(),
            leds: instance.leds().to_vec(),
        }
    }
}

/// Drives a circuit through discrete ticks.
pub struct Simulator {
    config: SchedulerConfig,
    circuit: Circuit,
    state: RunState,
    clock: Tick,
    port: SketchPort,
    stop: StopHandle,
    observers: Vec<Box<dyn TickObserver>>,
    serial_sinks: Vec<Box<dyn SerialSink>>,
    stats: SimulationStats,
    config_file: Option<PathBuf>,
}

impl Simulator {
    /// Creates a stopped simulator with an empty circuit.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_circuit(config, Circuit::new())
    }

    /// Creates a stopped simulator around an existing circuit.
    pub fn with_circuit(config: SchedulerConfig, circuit: Circuit) -> Self {
        let port = SketchPort::new(config.queue_capacity);
        let sim = Self {
            config,
            circuit,
            state: RunState::Stopped,
            clock: 0,
            port,
            stop: StopHandle::default(),
            observers: Vec::new(),
            serial_sinks: Vec::new(),
            stats: SimulationStats::new(),
            config_file: None,
        };
        sim.publish();
        sim
    }

    /// Builds a simulator and its circuit from a configuration.
    ///
    /// Device types are looked up in `registry`; library paths listed in the
    /// config are not loaded here.
    pub fn from_config(config: &SimConfig, registry: &DeviceRegistry) -> SimResult<Self> {
        config.validate()?;
        let mut sim = Self::new(SchedulerConfig::from(&config.simulation));
        for device in &config.devices {
            sim.add_device_from(registry, &device.device, device.id)?;
        }
        for wire in &config.wires {
            let (from, to) = wire.endpoints()?;
            sim.connect(from, to)?;
        }
        info!(
            devices = config.devices.len(),
            wires = config.wires.len(),
            "Circuit built from config"
        );
        Ok(sim)
    }

    /// Loads a YAML or JSON circuit file and builds it with [`Simulator::from_config`].
    ///
    /// The file path is recorded in the run statistics.
    pub fn from_config_file<P: AsRef<Path>>(path: P, registry: &DeviceRegistry) -> SimResult<Self> {
        let path = path.as_ref();
        let config = SimConfig::from_file(path)?;
        let mut sim = Self::from_config(&config, registry)?;
        sim.config_file = Some(path.to_path_buf());
        sim.stats = SimulationStats::new().with_config_file(path);
        Ok(sim)
    }

    /// Exports the current circuit layout.
    pub fn to_config(&self) -> SimConfig {
        SimConfig {
            simulation: SimulationParams {
                iteration_cap: self.config.iteration_cap,
                queue_capacity: self.config.queue_capacity,
                log_level: self.config.log_level.clone(),
                collect_stats: self.config.collect_stats,
            },
            library: Vec::new(),
            devices: self
                .circuit
                .instances()
                .map(|inst| DeviceConfig {
                    id: inst.id(),
                    device: inst.device_id().to_string(),
                })
                .collect(),
            wires: self
                .circuit
                .wires()
                .map(|w| WireConfig {
                    from: w.a.to_string(),
                    to: w.b.to_string(),
                })
                .collect(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Ticks completed since the last start.
    pub fn clock(&self) -> Tick {
        self.clock
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Handle for the sketch program.
    pub fn sketch_port(&self) -> SketchPort {
        self.port.clone()
    }

    /// Handle that stops the simulator from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn add_observer(&mut self, observer: impl TickObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn add_serial_sink(&mut self, sink: impl SerialSink + 'static) {
        self.serial_sinks.push(Box::new(sink));
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Stopped -> Running.
    pub fn start(&mut self) -> SimResult<()> {
        if self.state != RunState::Stopped {
            return Err(SimError::InvalidTransition {
                action: "start",
                state: self.state,
            });
        }
        self.stop.clear();
        if self.config.collect_stats {
            let stats = SimulationStats::new();
            self.stats = match &self.config_file {
                Some(path) => stats.with_config_file(path),
                None => stats,
            };
            self.stats.record_start();
        }
        self.state = RunState::Running;
        info!(devices = self.circuit.len(), "Simulation started");
        Ok(())
    }

    /// Stops from any state, restoring every instance to its defaults and
    /// the clock to zero. Pending sketch writes are discarded.
    pub fn stop(&mut self) {
        let previous = self.state;
        self.state = RunState::Stopped;
        self.stop.clear();
        self.circuit.reset_instances();
        let (discarded, _) = self.port.drain();
        if self.config.collect_stats && previous != RunState::Stopped {
            self.stats.record_end();
        }
        info!(
            tick = self.clock,
            discarded = discarded.len(),
            "Simulation stopped"
        );
        self.clock = 0;
        self.publish();
    }

    /// Running -> Paused. State is preserved.
    pub fn pause(&mut self) -> SimResult<()> {
        if self.state != RunState::Running {
            return Err(SimError::InvalidTransition {
                action: "pause",
                state: self.state,
            });
        }
        self.state = RunState::Paused;
        info!(tick = self.clock, "Simulation paused");
        Ok(())
    }

    /// Paused -> Running.
    pub fn resume(&mut self) -> SimResult<()> {
        if self.state != RunState::Paused {
            return Err(SimError::InvalidTransition {
                action: "resume",
                state: self.state,
            });
        }
        self.state = RunState::Running;
        info!(tick = self.clock, "Simulation resumed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Structural edits (Stopped or Paused only)
    // ---------------------------------------------------------------------

    fn ensure_unlocked(&self) -> SimResult<()> {
        if self.state == RunState::Running {
            return Err(SimError::GraphLocked);
        }
        Ok(())
    }

    /// Places a device instance.
    pub fn add_device(&mut self, descriptor: Arc<DeviceDescriptor>, id: InstanceId) -> SimResult<()> {
        self.ensure_unlocked()?;
        self.circuit.add_device(descriptor, id)?;
        self.publish();
        Ok(())
    }

    /// Places an instance of a registered device type.
    pub fn add_device_from(&mut self, registry: &DeviceRegistry, device: &str, id: InstanceId) -> SimResult<()> {
        let descriptor = registry
            .get(device)
            .cloned()
            .ok_or_else(|| SimError::UnknownDevice(device.to_string()))?;
        self.add_device(descriptor, id)
    }

    pub fn remove_device(&mut self, id: InstanceId) -> SimResult<DeviceInstance> {
        self.ensure_unlocked()?;
        let removed = self.circuit.remove_device(id)?;
        self.publish();
        Ok(removed)
    }

    pub fn connect(&mut self, a: PinRef, b: PinRef) -> SimResult<WireId> {
        self.ensure_unlocked()?;
        Ok(self.circuit.connect(a, b)?)
    }

    pub fn disconnect(&mut self, wire: WireId) -> SimResult<()> {
        self.ensure_unlocked()?;
        self.circuit.disconnect(wire)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pin access
    // ---------------------------------------------------------------------

    /// Writes a pin immediately with sketch authority, bypassing the queue.
    ///
    /// Nets are resolved on the next tick.
    pub fn set_pin(&mut self, pin: &PinRef, value: impl Into<Value>) -> SimResult<bool> {
        let instance = self
            .circuit
            .instance_mut(pin.instance)
            .ok_or(SimError::UnknownInstance(pin.instance))?;
        Ok(instance.write_pin(&pin.pin, &value.into(), Writer::Sketch)?)
    }

    pub fn pin_value(&self, pin: &PinRef) -> Option<&Signal> {
        self.circuit.pin_value(pin)
    }

    pub fn state_var(&self, instance: InstanceId, name: &str) -> Option<&Value> {
        self.circuit.instance(instance)?.state(name)
    }

    // ---------------------------------------------------------------------
    // Ticks
    // ---------------------------------------------------------------------

    /// Runs up to `n` ticks; returns how many completed.
    pub fn run_ticks(&mut self, n: usize) -> SimResult<usize> {
        let mut completed = 0;
        for _ in 0..n {
            match self.tick()? {
                Some(_) => completed += 1,
                None => break,
            }
        }
        Ok(completed)
    }

    /// Executes one tick.
    ///
    /// Returns `Ok(None)` without advancing the clock unless running. A
    /// pending stop request is honored here, before any work is done.
    pub fn tick(&mut self) -> SimResult<Option<TickEvent>> {
        if self.stop.take() {
            self.stop();
            return Ok(None);
        }
        if self.state != RunState::Running {
            return Ok(None);
        }

        let timer = Timer::start();
        let mut event = TickEvent::default();

        let (writes, dropped) = self.port.drain();
        if dropped > 0 {
            warn!(tick = self.clock + 1, dropped, "Sketch write queue overflowed; oldest writes dropped");
            event.warnings.push(Warning::Overflow { dropped });
        }

        let before: Vec<Snapshot> = self.circuit.instances().map(Snapshot::capture).collect();
        self.circuit.instances_mut().for_each(DeviceInstance::begin_tick);
        for write in writes {
            if let Some(fault) = self.apply_sketch_write(write) {
                warn!(instance = fault.instance, error = %fault.error, "Sketch write skipped");
                event.faults.push(fault);
            }
        }
        self.circuit.instances_mut().for_each(DeviceInstance::mark_tick_start);

        let fired = self.settle(&mut event);

        self.clock += 1;
        event.tick = self.clock;
        self.collect_deltas(&before, &mut event);

        if self.config.collect_stats {
            for ((id, device), count) in fired {
                self.stats.record_rules(id, &device, count);
            }
            self.stats.record_tick(&event, timer.elapsed_ms());
        }

        debug!(
            tick = event.tick,
            iterations = event.iterations,
            pins = event.pins.len(),
            states = event.states.len(),
            warnings = event.warnings.len(),
            "Tick complete"
        );

        for observer in &mut self.observers {
            observer.on_tick(&event);
        }
        for output in &event.serial {
            for sink in &mut self.serial_sinks {
                sink.on_serial(event.tick, output.instance, &output.data);
            }
        }
        self.publish();

        Ok(Some(event))
    }

    fn apply_sketch_write(&mut self, write: PinWrite) -> Option<ActionFault> {
        let PinWrite { pin, value } = write;
        let result = match self.circuit.instance_mut(pin.instance) {
            Some(instance) => instance.write_pin(&pin.pin, &value, Writer::Sketch).map(|_| ()),
            None => Err(ActionError::UnknownPin(pin.to_string())),
        };
        result.err().map(|error| ActionFault {
            instance: pin.instance,
            rule: None,
            action: None,
            error,
        })
    }

    /// Alternates net resolution and rule passes until nothing changes.
    ///
    /// Conflicts and faults are reported once per tick even when they recur
    /// on every iteration. Returns rule firings per instance.
    fn settle(&mut self, event: &mut TickEvent) -> Vec<((InstanceId, String), usize)> {
        let cap = self.config.iteration_cap.max(1);
        let tick = self.clock + 1;
        let mut conflicted = BTreeSet::new();
        let mut faulted = HashSet::new();
        let mut fired: HashMap<InstanceId, usize> = HashMap::new();
        let mut settled = false;

        while event.iterations < cap {
            event.iterations += 1;
            let resolution = self.circuit.resolve_nets();
            let mut changed = resolution.changed;

            for conflict in resolution.conflicts {
                if conflicted.insert(conflict.net) {
                    warn!(tick, net = conflict.net, drivers = conflict.drivers.len(), "Net conflict");
                    event.warnings.push(Warning::NetConflict {
                        net: conflict.net,
                        drivers: conflict.drivers,
                    });
                }
            }

            let engine = RuleEngine::new(event.iterations == 1);
            for instance in self.circuit.instances_mut() {
                let outcome = engine.evaluate(instance);
                changed |= outcome.changed;
                *fired.entry(instance.id()).or_default() += outcome.fired;
                for fault in outcome.faults {
                    if faulted.insert((fault.instance, fault.rule, fault.action)) {
                        warn!(
                            tick,
                            instance = fault.instance,
                            rule = ?fault.rule,
                            action = ?fault.action,
                            error = %fault.error,
                            "Action skipped"
                        );
                        event.faults.push(fault);
                    }
                }
            }

            if !changed {
                settled = true;
                break;
            }
        }

        if !settled {
            warn!(tick, iterations = event.iterations, "Circuit did not settle");
            event.warnings.push(Warning::UnstableCircuit {
                iterations: event.iterations,
            });
        }

        self.circuit
            .instances()
            .map(|inst| {
                let count = fired.get(&inst.id()).copied().unwrap_or(0);
                ((inst.id(), inst.device_id().to_string()), count)
            })
            .collect()
    }

    fn collect_deltas(&mut self, before: &[Snapshot], event: &mut TickEvent) {
        for (instance, snap) in self.circuit.instances_mut().zip(before) {
            let id = instance.id();
            let descriptor = Arc::clone(instance.descriptor());

            for ((spec, pin), old) in descriptor.pins().iter().zip(instance.pin_states()).zip(&snap.pins) {
                if pin.value != *old {
                    event.pins.push(PinDelta {
                        pin: PinRef::new(id, spec.id.as_str()),
                        value: pin.value.clone(),
                    });
                }
            }
            for (name, value) in instance.states() {
                if snap.states.get(name) != Some(value) {
                    event.states.push(StateDelta {
                        instance: id,
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
            }
            for ((spec, led), old) in descriptor.leds().iter().zip(instance.leds()).zip(&snap.leds) {
                if led != old {
                    event.leds.push(LedDelta {
                        instance: id,
                        led: spec.key().to_string(),
                        state: *led,
                    });
                }
            }

            let data = instance.take_serial();
            if !data.is_empty() {
                event.serial.push(SerialOutput { instance: id, data });
            }
            if instance.take_display_dirty() {
                if let Some(buffer) = instance.display() {
                    event.displays.push(DisplayDelta {
                        instance: id,
                        buffer: buffer.clone(),
                    });
                }
            }
        }
    }

    /// Publishes current pin values to the sketch port.
    fn publish(&self) {
        let snapshot: HashMap<PinRef, Signal> = self
            .circuit
            .instances()
            .flat_map(|inst| {
                inst.descriptor()
                    .pins()
                    .iter()
                    .zip(inst.pin_states())
                    .map(move |(spec, pin)| (PinRef::new(inst.id(), spec.id.as_str()), pin.value.clone()))
            })
            .collect();
        self.port.publish(snapshot);
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("state", &self.state)
            .field("clock", &self.clock)
            .field("devices", &self.circuit.len())
            .field("observers", &self.observers.len())
            .field("serial_sinks", &self.serial_sinks.len())
            .finish()
    }
}
