//! Blink example.
//!
//! A clock toggles every tick. It drives an LED directly and a second LED
//! through an inverter, while an edge counter reports each rising edge on
//! its serial stream. Tick events are printed as they arrive.
//!
//! Run with: `cargo run --example blink`

use ardusim::{create_default_registry, init_logging, PinRef, SchedulerConfig, SerialMonitor, Simulator, TickEvent};

const CLOCK: u64 = 1;
const INVERTER: u64 = 2;
const LED_A: u64 = 3;
const LED_B: u64 = 4;
const COUNTER: u64 = 5;
const TICKS: usize = 8;

fn print_event(event: &TickEvent) {
    let leds: Vec<String> = event
        .leds
        .iter()
        .map(|d| format!("{}.{}={}", d.instance, d.led, if d.state.on { "on" } else { "off" }))
        .collect();
    println!(
        "tick {:>2}  iterations {}  pins changed {:>2}  leds [{}]",
        event.tick,
        event.iterations,
        event.pins.len(),
        leds.join(", ")
    );
    for warning in &event.warnings {
        println!("         warning: {:?}", warning);
    }
}

fn main() {
    init_logging("warn");

    println!("==== Blink example ====");
    println!("Clock drives LED {} directly and LED {} through an inverter.\n", LED_A, LED_B);

    let registry = create_default_registry();
    let mut sim = Simulator::new(SchedulerConfig {
        collect_stats: true,
        ..SchedulerConfig::default()
    });

    let build = |sim: &mut Simulator| -> ardusim::SimResult<()> {
        sim.add_device_from(&registry, "clock", CLOCK)?;
        sim.add_device_from(&registry, "not_gate", INVERTER)?;
        sim.add_device_from(&registry, "led", LED_A)?;
        sim.add_device_from(&registry, "led", LED_B)?;
        sim.add_device_from(&registry, "edge_counter", COUNTER)?;

        sim.connect(PinRef::new(CLOCK, "OUT"), PinRef::new(LED_A, "anode"))?;
        sim.connect(PinRef::new(CLOCK, "OUT"), PinRef::new(INVERTER, "A"))?;
        sim.connect(PinRef::new(INVERTER, "Y"), PinRef::new(LED_B, "anode"))?;
        sim.connect(PinRef::new(CLOCK, "OUT"), PinRef::new(COUNTER, "IN"))?;
        Ok(())
    };
    if let Err(err) = build(&mut sim) {
        eprintln!("failed to build circuit: {}", err);
        std::process::exit(1);
    }

    sim.add_observer(|event: &TickEvent| print_event(event));
    let serial = SerialMonitor::new();
    sim.add_serial_sink(serial.clone());

    if let Err(err) = sim.start().and_then(|_| sim.run_ticks(TICKS)) {
        eprintln!("simulation failed: {}", err);
        std::process::exit(1);
    }

    println!("\nCounter serial output: {:?}", serial.lines(COUNTER));
    println!("Rising edges counted: {:?}", sim.state_var(COUNTER, "count"));

    sim.stop();
    println!("\n{}", sim.stats().summary());
}
