//! Boundary between the simulator and the outside world.
//!
//! - [`SketchPort`]: handle given to an external sketch program. Writes go
//!   into a bounded queue drained at the start of each tick; reads see the
//!   pin values published at the end of the last tick.
//! - [`TickObserver`] / [`SerialSink`]: callbacks invoked after each tick.
//! - [`SerialMonitor`] / [`EventRecorder`]: ready-made collectors.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::event::{TickEvent, Warning};
use crate::signal::{Signal, Value};
use crate::types::{InstanceId, PinRef, Tick};

/// A queued pin write from the sketch program.
#[derive(Clone, Debug, PartialEq)]
pub struct PinWrite {
    pub pin: PinRef,
    pub value: Value,
}

/// Bounded FIFO that drops its oldest entry when full.
#[derive(Debug)]
pub struct PinWriteQueue {
    writes: VecDeque<PinWrite>,
    capacity: usize,
    dropped: usize,
}

impl PinWriteQueue {
    /// Creates a queue holding at most `capacity` writes (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            writes: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueues a write, evicting the oldest one if the queue is full.
    pub fn push(&mut self, write: PinWrite) {
        if self.writes.len() == self.capacity {
            self.writes.pop_front();
            self.dropped += 1;
        }
        self.writes.push_back(write);
    }

    /// Takes every pending write and the number dropped since the last drain.
    pub fn drain(&mut self) -> (Vec<PinWrite>, usize) {
        let writes = self.writes.drain(..).collect();
        (writes, std::mem::take(&mut self.dropped))
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes dropped since the last drain.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Cloneable, thread-safe handle for an external sketch program.
#[derive(Clone, Debug)]
pub struct SketchPort {
    queue: Arc<Mutex<PinWriteQueue>>,
    pins: Arc<RwLock<HashMap<PinRef, Signal>>>,
}

impl SketchPort {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(PinWriteQueue::new(capacity))),
            pins: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Queues a pin write for the next tick. Never blocks on the simulator.
    pub fn write_pin(&self, pin: PinRef, value: impl Into<Value>) {
        self.queue.lock().push(PinWrite {
            pin,
            value: value.into(),
        });
    }

    /// Pin value as of the end of the last completed tick.
    pub fn read_pin(&self, pin: &PinRef) -> Option<Signal> {
        self.pins.read().get(pin).cloned()
    }

    /// Writes waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn drain(&self) -> (Vec<PinWrite>, usize) {
        self.queue.lock().drain()
    }

    pub(crate) fn publish(&self, snapshot: HashMap<PinRef, Signal>) {
        *self.pins.write() = snapshot;
    }
}

/// Receives every completed tick.
pub trait TickObserver: Send {
    fn on_tick(&mut self, event: &TickEvent);
}

impl<F> TickObserver for F
where
    F: FnMut(&TickEvent) + Send,
{
    fn on_tick(&mut self, event: &TickEvent) {
        self(event)
    }
}

/// Receives serial output, one call per device per tick.
pub trait SerialSink: Send {
    fn on_serial(&mut self, tick: Tick, instance: InstanceId, data: &[u8]);
}

impl<F> SerialSink for F
where
    F: FnMut(Tick, InstanceId, &[u8]) + Send,
{
    fn on_serial(&mut self, tick: Tick, instance: InstanceId, data: &[u8]) {
        self(tick, instance, data)
    }
}

/// Collects each device's serial stream.
#[derive(Clone, Debug, Default)]
pub struct SerialMonitor {
    logs: Arc<Mutex<BTreeMap<InstanceId, Vec<u8>>>>,
}

impl SerialMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything an instance has written so far.
    pub fn output(&self, instance: InstanceId) -> Vec<u8> {
        self.logs.lock().get(&instance).cloned().unwrap_or_default()
    }

    /// Output decoded as UTF-8 (lossy).
    pub fn text(&self, instance: InstanceId) -> String {
        String::from_utf8_lossy(&self.output(instance)).into_owned()
    }

    /// Complete lines written by an instance, without terminators.
    pub fn lines(&self, instance: InstanceId) -> Vec<String> {
        let text = self.text(instance);
        let mut lines: Vec<String> = text.split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect();
        // The segment after the last newline is incomplete
        lines.pop();
        lines
    }

    /// Instances that have written anything.
    pub fn instances(&self) -> Vec<InstanceId> {
        self.logs.lock().keys().copied().collect()
    }

    pub fn clear(&self) {
        self.logs.lock().clear();
    }
}

impl SerialSink for SerialMonitor {
    fn on_serial(&mut self, _tick: Tick, instance: InstanceId, data: &[u8]) {
        self.logs.lock().entry(instance).or_default().extend_from_slice(data);
    }
}

/// Keeps every tick event.
#[derive(Clone, Debug, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<TickEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TickEvent> {
        self.events.lock().clone()
    }

    /// All warnings, tagged with their tick.
    pub fn warnings(&self) -> Vec<(Tick, Warning)> {
        self.events
            .lock()
            .iter()
            .flat_map(|e| e.warnings.iter().map(move |w| (e.tick, w.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TickObserver for EventRecorder {
    fn on_tick(&mut self, event: &TickEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(n: i64) -> PinWrite {
        PinWrite {
            pin: PinRef::new(1, "A0"),
            value: Value::Int(n),
        }
    }

    #[test]
    fn test_queue_drops_oldest() {
        let mut queue = PinWriteQueue::new(3);
        for n in 0..5 {
            queue.push(write(n));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);

        let (writes, dropped) = queue.drain();
        assert_eq!(dropped, 2);
        let values: Vec<_> = writes.into_iter().map(|w| w.value).collect();
        assert_eq!(values, vec![Value::Int(2), Value::Int(3), Value::Int(4)]);

        // Counter resets on drain
        assert_eq!(queue.drain(), (Vec::new(), 0));
    }

    #[test]
    fn test_sketch_port_shared() {
        let port = SketchPort::new(8);
        let producer = port.clone();
        std::thread::spawn(move || producer.write_pin(PinRef::new(2, "D13"), true))
            .join()
            .unwrap();
        assert_eq!(port.pending(), 1);

        port.publish(HashMap::from([(PinRef::new(2, "D13"), Signal::HIGH)]));
        assert_eq!(port.read_pin(&PinRef::new(2, "D13")), Some(Signal::HIGH));
        assert_eq!(port.read_pin(&PinRef::new(2, "D12")), None);
    }

    #[test]
    fn test_serial_monitor_lines() {
        let monitor = SerialMonitor::new();
        let mut sink = monitor.clone();
        sink.on_serial(1, 4, b"hello\r\nwor");
        sink.on_serial(2, 4, b"ld\npartial");
        assert_eq!(monitor.lines(4), vec!["hello".to_string(), "world".to_string()]);
        assert_eq!(monitor.text(4), "hello\r\nworld\npartial");
        assert!(monitor.output(5).is_empty());
    }

    #[test]
    fn test_closure_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut observer = move |e: &TickEvent| sink.lock().push(e.tick);
        observer.on_tick(&TickEvent {
            tick: 9,
            ..TickEvent::default()
        });
        assert_eq!(*seen.lock(), vec![9]);
    }
}
