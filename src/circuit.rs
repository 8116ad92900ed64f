//! The circuit graph: device instances, wires and the nets they form.
//!
//! Instances live in an arena addressed by [`InstanceId`]; wires are pairs of
//! [`PinRef`]s. Nets are recomputed by breadth-first search over pin slots
//! whenever the topology changes, so feedback loops are plain data.
//! Every pin belongs to exactly one net, unconnected pins to a net of one.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::descriptor::DeviceDescriptor;
use crate::error::{ConnectionError, SimError, SimResult};
use crate::instance::DeviceInstance;
use crate::signal::{PinType, Pull, Signal, SignalDomain};
use crate::types::{InstanceId, NetId, PinRef, WireId};

/// A wire joining two pins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Wire {
    pub id: WireId,
    pub a: PinRef,
    pub b: PinRef,
}

impl Wire {
    /// True if this wire touches `pin`.
    pub fn touches(&self, pin: &PinRef) -> bool {
        self.a == *pin || self.b == *pin
    }

    fn joins(&self, a: &PinRef, b: &PinRef) -> bool {
        (self.a == *a && self.b == *b) || (self.a == *b && self.b == *a)
    }
}

/// A set of transitively wired pins.
#[derive(Clone, Debug)]
pub struct Net {
    pub id: NetId,
    /// Member pins in registration order
    pub pins: Vec<PinRef>,
    /// The net's signal domain; `Carrier` if it holds only carrier pins
    pub domain: SignalDomain,
    slots: Vec<(usize, usize)>,
    pull: Option<Pull>,
    power: bool,
    ground: bool,
}

impl Net {
    /// Value of the net when no pin drives it.
    pub fn undriven(&self) -> Signal {
        match self.pull {
            Some(pull) => pull.level(),
            None => self.domain.undriven(),
        }
    }
}

/// Drivers disagreeing on one net.
#[derive(Clone, Debug, PartialEq)]
pub struct NetConflict {
    pub net: NetId,
    pub drivers: Vec<PinRef>,
}

/// Outcome of [`Circuit::resolve_nets`].
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Resolved value per net, indexed by [`NetId`]
    pub values: Vec<Signal>,
    /// Nets whose drivers disagree
    pub conflicts: Vec<NetConflict>,
    /// Some pin took a new value
    pub changed: bool,
}

/// Mutable topology of instances and wires.
#[derive(Debug, Default)]
pub struct Circuit {
    instances: Vec<DeviceInstance>,
    index: HashMap<InstanceId, usize>,
    wires: BTreeMap<WireId, Wire>,
    next_wire: WireId,
    nets: Vec<Net>,
    net_of: HashMap<PinRef, NetId>,
}

impl Circuit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a new instance of `descriptor` with the given id.
    pub fn add_device(&mut self, descriptor: Arc<DeviceDescriptor>, id: InstanceId) -> SimResult<&DeviceInstance> {
        if self.index.contains_key(&id) {
            return Err(SimError::DuplicateInstance(id));
        }
        debug!(instance = id, device = descriptor.id(), "Adding device");
        self.index.insert(id, self.instances.len());
        self.instances.push(DeviceInstance::new(id, descriptor));
        self.rebuild_nets();
        Ok(&self.instances[self.instances.len() - 1])
    }

    /// Removes an instance after detaching every wire touching it.
    pub fn remove_device(&mut self, id: InstanceId) -> SimResult<DeviceInstance> {
        let slot = *self.index.get(&id).ok_or(SimError::UnknownInstance(id))?;
        let before = self.wires.len();
        self.wires.retain(|_, w| w.a.instance != id && w.b.instance != id);
        debug!(instance = id, wires = before - self.wires.len(), "Removing device");

        let instance = self.instances.remove(slot);
        self.index = self
            .instances
            .iter()
            .enumerate()
            .map(|(i, inst)| (inst.id(), i))
            .collect();
        self.rebuild_nets();
        Ok(instance)
    }

    /// Wires two pins together.
    ///
    /// Fails, leaving the graph unchanged, if the pins would join nets of
    /// different signal domains, short power to ground, or exceed a pin's
    /// `max_connections`.
    pub fn connect(&mut self, a: PinRef, b: PinRef) -> Result<WireId, ConnectionError> {
        if a == b {
            return Err(ConnectionError::SelfLoop(a));
        }
        for pin in [&a, &b] {
            let (slot, pin_slot) = self.locate(pin)?;
            let spec = &self.instances[slot].descriptor().pins()[pin_slot];
            if let Some(limit) = spec.max_connections {
                if self.wires_of(pin).count() >= limit {
                    return Err(ConnectionError::PinOccupied {
                        pin: pin.clone(),
                        limit,
                    });
                }
            }
        }
        if self.wires.values().any(|w| w.joins(&a, &b)) {
            return Err(ConnectionError::AlreadyConnected { a, b });
        }

        let (na, nb) = (&self.nets[self.net_of[&a]], &self.nets[self.net_of[&b]]);
        if na.id != nb.id {
            let (left, right) = (na.domain, nb.domain);
            if left != SignalDomain::Carrier && right != SignalDomain::Carrier && left != right {
                return Err(ConnectionError::Incompatible { a, b, left, right });
            }
            if (na.power && nb.ground) || (na.ground && nb.power) {
                return Err(ConnectionError::Short { a, b });
            }
        }

        let id = self.next_wire;
        self.next_wire += 1;
        debug!(wire = id, from = %a, to = %b, "Connecting");
        self.wires.insert(id, Wire { id, a, b });
        self.rebuild_nets();
        Ok(id)
    }

    /// Removes a wire; its net may split in two.
    pub fn disconnect(&mut self, wire: WireId) -> Result<Wire, ConnectionError> {
        let removed = self.wires.remove(&wire).ok_or(ConnectionError::UnknownWire(wire))?;
        debug!(wire, "Disconnecting");
        self.rebuild_nets();
        Ok(removed)
    }

    /// Computes every net's value and pushes it into the net's pins.
    ///
    /// Agreeing drivers set the value; disagreeing drivers yield
    /// [`Signal::Conflict`]; no drivers yield the net's undriven value.
    /// Output pins and pins their device wrote this tick are not overwritten.
    /// Values from power, ground and passive drivers are coerced into the
    /// net's domain first.
    pub fn resolve_nets(&mut self) -> Resolution {
        let mut resolution = Resolution {
            values: Vec::with_capacity(self.nets.len()),
            ..Resolution::default()
        };

        for net in &self.nets {
            // Carrier drivers are read in the net's domain
            let drivers: Vec<(usize, Signal)> = net
                .slots
                .iter()
                .enumerate()
                .filter_map(|(k, &(i, p))| {
                    let signal = self.instances[i].driven(p)?;
                    net.domain.coerce(signal).map(|s| (k, s))
                })
                .collect();
            let conflict = drivers.windows(2).any(|pair| pair[0].1 != pair[1].1);

            let value = if conflict {
                let drivers = drivers.iter().map(|(k, _)| net.pins[*k].clone()).collect();
                resolution.conflicts.push(NetConflict { net: net.id, drivers });
                Signal::Conflict
            } else {
                drivers
                    .into_iter()
                    .next()
                    .map(|(_, s)| s)
                    .unwrap_or_else(|| net.undriven())
            };

            for &(i, p) in &net.slots {
                resolution.changed |= self.instances[i].apply_net(p, &value);
            }
            resolution.values.push(value);
        }

        resolution
    }

    /// Restores every instance to its descriptor defaults.
    pub fn reset_instances(&mut self) {
        self.instances.iter_mut().for_each(DeviceInstance::reset);
    }

    pub fn instance(&self, id: InstanceId) -> Option<&DeviceInstance> {
        self.index.get(&id).map(|&i| &self.instances[i])
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut DeviceInstance> {
        self.index.get(&id).map(|&i| &mut self.instances[i])
    }

    /// Instances in registration order.
    pub fn instances(&self) -> impl Iterator<Item = &DeviceInstance> {
        self.instances.iter()
    }

    /// Instances in registration order.
    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut DeviceInstance> {
        self.instances.iter_mut()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn wire(&self, id: WireId) -> Option<&Wire> {
        self.wires.get(&id)
    }

    /// Wires in creation order.
    pub fn wires(&self) -> impl Iterator<Item = &Wire> {
        self.wires.values()
    }

    /// Wires touching a pin.
    pub fn wires_of<'a>(&'a self, pin: &'a PinRef) -> impl Iterator<Item = &'a Wire> + 'a {
        self.wires.values().filter(move |w| w.touches(pin))
    }

    /// Current nets.
    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    /// Net containing a pin.
    pub fn net_of(&self, pin: &PinRef) -> Option<NetId> {
        self.net_of.get(pin).copied()
    }

    /// Current value of a pin.
    pub fn pin_value(&self, pin: &PinRef) -> Option<&Signal> {
        self.instance(pin.instance)?.pin_value(&pin.pin)
    }

    fn locate(&self, pin: &PinRef) -> Result<(usize, usize), ConnectionError> {
        let slot = *self
            .index
            .get(&pin.instance)
            .ok_or(ConnectionError::UnknownInstance(pin.instance))?;
        let pin_slot = self.instances[slot]
            .descriptor()
            .pin_index(&pin.pin)
            .ok_or_else(|| ConnectionError::UnknownPin(pin.clone()))?;
        Ok((slot, pin_slot))
    }

    fn rebuild_nets(&mut self) {
        let mut offsets = Vec::with_capacity(self.instances.len());
        let mut owners = Vec::new();
        for (i, inst) in self.instances.iter().enumerate() {
            offsets.push(owners.len());
            owners.extend((0..inst.descriptor().pins().len()).map(|p| (i, p)));
        }

        let mut adjacency = vec![Vec::new(); owners.len()];
        for wire in self.wires.values() {
            if let (Ok(a), Ok(b)) = (self.locate(&wire.a), self.locate(&wire.b)) {
                let (a, b) = (offsets[a.0] + a.1, offsets[b.0] + b.1);
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
        }

        let mut visited = vec![false; owners.len()];
        let mut nets = Vec::new();
        let mut net_of = HashMap::with_capacity(owners.len());
        let mut queue = VecDeque::new();

        for start in 0..owners.len() {
            if visited[start] {
                continue;
            }
            let mut members = Vec::new();
            visited[start] = true;
            queue.push_back(start);
            while let Some(current) = queue.pop_front() {
                members.push(current);
                for &next in &adjacency[current] {
                    if !visited[next] {
                        visited[next] = true;
                        queue.push_back(next);
                    }
                }
            }
            members.sort_unstable();

            let id = nets.len();
            let mut net = Net {
                id,
                pins: Vec::with_capacity(members.len()),
                domain: SignalDomain::Carrier,
                slots: Vec::with_capacity(members.len()),
                pull: None,
                power: false,
                ground: false,
            };
            for slot in members {
                let (i, p) = owners[slot];
                let inst = &self.instances[i];
                let spec = &inst.descriptor().pins()[p];
                let pin = PinRef::new(inst.id(), spec.id.clone());

                if net.domain == SignalDomain::Carrier {
                    net.domain = spec.domain();
                }
                net.pull = net.pull.or(spec.pull);
                net.power |= spec.pin_type == PinType::Power;
                net.ground |= spec.pin_type == PinType::Ground;

                net_of.insert(pin.clone(), id);
                net.pins.push(pin);
                net.slots.push((i, p));
            }
            nets.push(net);
        }

        self.nets = nets;
        self.net_of = net_of;
    }
}
