//! # ArduSim emulation core
//!
//! A rule-driven emulator for virtual electronic circuits. Devices are
//! described by `.adev` JSON descriptors (pins, state variables and
//! trigger/action rules), placed into a circuit, wired into nets, and
//! advanced in discrete ticks.
//!
//! ## Design Principles
//!
//! - **Descriptors are data**: a device's behavior is a list of
//!   [`Rule`]s made of closed [`Trigger`] and [`Action`] variants. Nothing is
//!   compiled or scripted.
//! - **Arena circuit**: instances are addressed by id and wires are pin
//!   pairs, so feedback wiring is ordinary data. Nets are recomputed on every
//!   topology change.
//! - **Settle, then tick**: each tick alternates net resolution and rule
//!   evaluation until nothing changes (or an iteration cap is hit), then
//!   advances the clock and emits one [`TickEvent`].
//! - **Availability over strictness**: conflicts, oscillation, queue overflow
//!   and faulty actions are reported as warnings and faults; they never
//!   stop the simulation.
//!
//! ## Features
//!
//! - `parallel` - Parse device library directories in parallel using rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use ardusim::{create_default_registry, PinRef, Simulator, Value};
//!
//! let registry = create_default_registry();
//! let mut sim = Simulator::default();
//! sim.add_device_from(&registry, "logic_high", 1).unwrap();
//! sim.add_device_from(&registry, "led", 2).unwrap();
//! sim.connect(PinRef::new(1, "OUT"), PinRef::new(2, "anode")).unwrap();
//!
//! sim.start().unwrap();
//! let event = sim.tick().unwrap().unwrap();
//! assert_eq!(event.state(2, "led_on"), Some(&Value::Bool(true)));
//! ```
//!
//! ## Sketch Programs
//!
//! An external program talks to the circuit through a [`SketchPort`]: it may
//! queue pin writes from any thread and read the pin values published at the
//! end of the last tick.
//!
//! ```rust,ignore
//! let port = sim.sketch_port();
//! std::thread::spawn(move || port.write_pin(PinRef::new(3, "D13"), true));
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use ardusim::config::SimConfig;
//!
//! let config = SimConfig::from_yaml_file("circuit.yaml")?;
//! let mut registry = ardusim::create_default_registry();
//! registry.load_library(&config);
//! let mut sim = ardusim::Simulator::from_config(&config, &registry)?;
//! ```

pub mod types;
pub mod signal;
pub mod error;
pub mod descriptor;
pub mod display;
pub mod instance;
pub mod circuit;
pub mod rules;
pub mod scheduler;
pub mod event;
pub mod io;
pub mod config;
pub mod registry;
pub mod builtin;
pub mod stats;

// Re-export commonly used types
pub use types::{InstanceId, NetId, PinRef, Tick, WireId};
pub use signal::{AnalogRange, CompareOp, PinDirection, PinType, Pull, Signal, SignalDomain, Value, ValueKind};
pub use error::{ActionError, ConnectionError, SimError, SimResult, ValidationError, ValidationResult};
pub use descriptor::{DeviceDescriptor, EmulationType, LedIndicator, PinSpec};
pub use display::{DisplayBuffer, DisplaySpec, DisplayUpdate};
pub use instance::{DeviceInstance, LedState, PinState, Writer};
pub use circuit::{Circuit, Net, NetConflict, Resolution, Wire};
pub use rules::{Action, Expr, Rule, RuleEngine, SerialData, Trigger};
pub use scheduler::{RunState, SchedulerConfig, Simulator, StopHandle};
pub use event::{ActionFault, TickEvent, Warning};
pub use io::{EventRecorder, SerialMonitor, SerialSink, SketchPort, TickObserver};
pub use config::{ConfigError, SimConfig, SimConfigBuilder};
pub use registry::{create_default_registry, DeviceRegistry, LoadReport};
pub use stats::{SimulationStats, Timer};

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// ardusim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
