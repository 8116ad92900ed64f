//! Run statistics and export.
//!
//! The simulator fills a [`SimulationStats`] while it runs (when
//! `collect_stats` is enabled); it can be exported as JSON, CSV or a
//! human-readable summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::event::{TickEvent, Warning};
use crate::types::{InstanceId, Tick};

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Run metadata
    pub metadata: SimulationMetadata,

    /// Scheduler counters
    pub run: RunStats,

    /// Per-instance counters
    pub instances: BTreeMap<InstanceId, InstanceStats>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Run name/description
    pub name: String,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Crate version
    pub version: String,

    /// Circuit file used (if any)
    pub config_file: Option<String>,
}

/// Scheduler-level counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Clock value at the last completed tick
    pub final_tick: Tick,

    /// Ticks completed
    pub ticks: u64,

    /// Propagate/evaluate iterations over all ticks
    pub iterations: u64,

    /// Most iterations any single tick used
    pub max_iterations: usize,

    /// Ticks that hit the iteration cap
    pub unstable_ticks: u64,

    /// Net conflict warnings
    pub conflicts: u64,

    /// Sketch writes dropped by the queue
    pub overflow_drops: u64,

    /// Skipped actions and sketch writes
    pub action_faults: u64,

    /// Rules whose trigger fired
    pub rules_fired: u64,

    /// Serial bytes emitted
    pub serial_bytes: u64,
}

/// Counters for one device instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceStats {
    /// Device type id
    pub device: String,

    pub rules_fired: u64,

    pub faults: u64,

    pub serial_bytes: u64,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Wall-clock time spent inside ticks, in milliseconds
    pub total_wall_time_ms: f64,

    /// Ticks executed per second of tick time
    pub ticks_per_second: f64,
}

impl SimulationStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self {
            metadata: SimulationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..SimulationMetadata::default()
            },
            ..Self::default()
        }
    }

    /// Sets the run name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Sets the circuit file the run was built from.
    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.metadata.config_file = Some(path.as_ref().display().to_string());
        self
    }

    /// Records the start time.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(unix_now());
    }

    /// Records the end time.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(unix_now());
    }

    /// Folds one completed tick into the counters.
    pub fn record_tick(&mut self, event: &TickEvent, wall_time_ms: f64) {
        let run = &mut self.run;
        run.final_tick = event.tick;
        run.ticks += 1;
        run.iterations += event.iterations as u64;
        run.max_iterations = run.max_iterations.max(event.iterations);
        run.action_faults += event.faults.len() as u64;

        for warning in &event.warnings {
            match warning {
                Warning::NetConflict { .. } => run.conflicts += 1,
                Warning::UnstableCircuit { .. } => run.unstable_ticks += 1,
                Warning::Overflow { dropped } => run.overflow_drops += *dropped as u64,
            }
        }
        for output in &event.serial {
            run.serial_bytes += output.data.len() as u64;
            self.instances.entry(output.instance).or_default().serial_bytes += output.data.len() as u64;
        }
        for fault in &event.faults {
            self.instances.entry(fault.instance).or_default().faults += 1;
        }

        self.compute_timing(self.timing.total_wall_time_ms + wall_time_ms);
    }

    /// Adds rule firings for one instance, registering it on first sight.
    pub fn record_rules(&mut self, instance: InstanceId, device: &str, fired: usize) {
        let entry = self.instances.entry(instance).or_insert_with(|| InstanceStats {
            device: device.to_string(),
            ..InstanceStats::default()
        });
        entry.rules_fired += fired as u64;
        self.run.rules_fired += fired as u64;
    }

    /// Updates timing statistics from the accumulated wall time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;
        if wall_time_ms > 0.0 {
            self.timing.ticks_per_second = self.run.ticks as f64 / (wall_time_ms / 1000.0);
        }
    }

    /// Average iterations per tick.
    pub fn mean_iterations(&self) -> f64 {
        if self.run.ticks == 0 {
            0.0
        } else {
            self.run.iterations as f64 / self.run.ticks as f64
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports run counters to CSV.
    pub fn to_csv(&self) -> String {
        let run = &self.run;
        let mut csv = String::from("metric,value\n");
        let rows: [(&str, String); 11] = [
            ("final_tick", run.final_tick.to_string()),
            ("ticks", run.ticks.to_string()),
            ("iterations", run.iterations.to_string()),
            ("max_iterations", run.max_iterations.to_string()),
            ("unstable_ticks", run.unstable_ticks.to_string()),
            ("conflicts", run.conflicts.to_string()),
            ("overflow_drops", run.overflow_drops.to_string()),
            ("action_faults", run.action_faults.to_string()),
            ("rules_fired", run.rules_fired.to_string()),
            ("serial_bytes", run.serial_bytes.to_string()),
            ("wall_time_ms", format!("{:.2}", self.timing.total_wall_time_ms)),
        ];
        for (metric, value) in rows {
            csv.push_str(metric);
            csv.push(',');
            csv.push_str(&value);
            csv.push('\n');
        }
        csv
    }

    /// Exports run counters to CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Exports per-instance counters to CSV.
    pub fn instances_to_csv(&self) -> String {
        let mut csv = String::from("instance,device,rules_fired,faults,serial_bytes\n");
        for (id, stats) in &self.instances {
            csv.push_str(&format!(
                "{},{},{},{},{}\n",
                id, stats.device, stats.rules_fired, stats.faults, stats.serial_bytes
            ));
        }
        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        writeln!(w)?;

        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        if let Some(ref file) = self.metadata.config_file {
            writeln!(w, "Circuit: {}", file)?;
        }
        if let Some(ref start) = self.metadata.start_time {
            writeln!(w, "Started: {}", start)?;
        }
        if let Some(ref end) = self.metadata.end_time {
            writeln!(w, "Ended: {}", end)?;
        }
        writeln!(w)?;

        let run = &self.run;
        writeln!(w, "--- Scheduler ---")?;
        writeln!(w, "Ticks: {} (clock {})", run.ticks, run.final_tick)?;
        writeln!(
            w,
            "Iterations: {} (mean {:.2}, max {})",
            run.iterations,
            self.mean_iterations(),
            run.max_iterations
        )?;
        writeln!(w, "Unstable ticks: {}", run.unstable_ticks)?;
        writeln!(w, "Net conflicts: {}", run.conflicts)?;
        writeln!(w, "Dropped sketch writes: {}", run.overflow_drops)?;
        writeln!(w, "Skipped actions: {}", run.action_faults)?;
        writeln!(w, "Rules fired: {}", run.rules_fired)?;
        writeln!(w, "Serial bytes: {}", run.serial_bytes)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Ticks/sec: {:.2}", self.timing.ticks_per_second)?;

        if !self.instances.is_empty() {
            writeln!(w)?;
            writeln!(w, "--- Instances ---")?;
            for (id, stats) in &self.instances {
                writeln!(
                    w,
                    "{} ({}): {} fired, {} faults, {} serial bytes",
                    id, stats.device, stats.rules_fired, stats.faults, stats.serial_bytes
                )?;
            }
        }

        Ok(())
    }

    /// Returns the summary as a string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Wall-clock stopwatch.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn unix_now() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s", duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ActionFault, SerialOutput};
    use crate::error::ActionError;

    fn event(tick: Tick) -> TickEvent {
        TickEvent {
            tick,
            iterations: 3,
            serial: vec![SerialOutput {
                instance: 1,
                data: b"ok\n".to_vec(),
            }],
            warnings: vec![
                Warning::Overflow { dropped: 4 },
                Warning::UnstableCircuit { iterations: 32 },
            ],
            faults: vec![ActionFault {
                instance: 1,
                rule: Some(0),
                action: Some(0),
                error: ActionError::NoDisplay,
            }],
            ..TickEvent::default()
        }
    }

    #[test]
    fn test_record_tick() {
        let mut stats = SimulationStats::new();
        stats.record_rules(1, "edge_counter", 2);
        stats.record_tick(&event(1), 0.5);
        stats.record_tick(&event(2), 0.5);

        assert_eq!(stats.run.final_tick, 2);
        assert_eq!(stats.run.ticks, 2);
        assert_eq!(stats.run.iterations, 6);
        assert_eq!(stats.run.max_iterations, 3);
        assert_eq!(stats.run.unstable_ticks, 2);
        assert_eq!(stats.run.overflow_drops, 8);
        assert_eq!(stats.run.serial_bytes, 6);
        assert_eq!(stats.instances[&1].faults, 2);
        assert_eq!(stats.instances[&1].rules_fired, 2);
        assert_eq!(stats.mean_iterations(), 3.0);
        assert_eq!(stats.timing.total_wall_time_ms, 1.0);
        assert!((stats.timing.ticks_per_second - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn test_record_tick_counts_unseen_instances() {
        let mut stats = SimulationStats::new();
        stats.record_tick(&event(1), 0.0);

        let instance = &stats.instances[&1];
        assert_eq!(instance.faults, 1);
        assert_eq!(instance.serial_bytes, 3);
        assert_eq!(instance.rules_fired, 0);

        // A later registration keeps the counts gathered so far
        stats.record_rules(1, "edge_counter", 0);
        assert_eq!(stats.instances[&1].faults, 1);
    }

    #[test]
    fn test_csv_export() {
        let mut stats = SimulationStats::new();
        stats.record_rules(5, "led", 1);
        stats.record_tick(&event(1), 0.0);

        let csv = stats.to_csv();
        assert!(csv.starts_with("metric,value\n"));
        assert!(csv.contains("unstable_ticks,1\n"));
        assert!(csv.contains("overflow_drops,4\n"));

        let csv = stats.instances_to_csv();
        assert!(csv.contains("5,led,1,0,0"));
    }

    #[test]
    fn test_json_and_summary() {
        let mut stats = SimulationStats::new().with_name("blink");
        stats.record_tick(&event(7), 0.0);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["run"]["final_tick"], 7);

        let summary = stats.summary();
        assert!(summary.contains("Name: blink"));
        assert!(summary.contains("Unstable ticks: 1"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}
