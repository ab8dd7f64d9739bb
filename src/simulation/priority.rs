//! Priority segment ends and the vehicles registered at them
//!
//! A node with at least one signed approach gets a [`PrioritySegmentEnd`] for
//! every incident segment end. Vehicles approaching the node register at the
//! end they arrive through; the registry keeps them in a singly linked list
//! threaded through [`VehicleState::next_on_end`].

use std::collections::HashMap;

use super::geometry::GeometryProvider;
use super::lane_flags::LaneFlagsStore;
use super::transit::{VehicleState, VehicleStateStore};
use super::types::{NodeId, SegmentEndId, SegmentId, SignType, VehicleId};

/// One approach of a node with priority signs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrioritySegmentEnd {
    pub node: NodeId,
    pub segment: SegmentId,
    pub start_node: bool,
    pub sign: SignType,
    first_vehicle: Option<VehicleId>,
    len: usize,
}

impl PrioritySegmentEnd {
    pub fn new(node: NodeId, segment: SegmentId, start_node: bool, sign: SignType) -> Self {
        Self {
            node,
            segment,
            start_node,
            sign,
            first_vehicle: None,
            len: 0,
        }
    }

    pub fn id(&self) -> SegmentEndId {
        SegmentEndId::new(self.segment, self.start_node)
    }

    /// Number of registered vehicles
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Iterator over the vehicles registered at one segment end
pub struct RegisteredVehicles<'a> {
    states: &'a VehicleStateStore,
    next: Option<VehicleId>,
    remaining: usize,
}

impl<'a> Iterator for RegisteredVehicles<'a> {
    type Item = VehicleId;

    fn next(&mut self) -> Option<VehicleId> {
        // The length guard stops a corrupted list from looping forever
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.remaining -= 1;
        self.next = self.states.get(current).and_then(|s| s.next_on_end);
        Some(current)
    }
}

/// All priority segment ends, keyed by segment end
#[derive(Debug, Default, Clone)]
pub struct PriorityRegistry {
    ends: HashMap<SegmentEndId, PrioritySegmentEnd>,
}

impl PriorityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, segment: SegmentId, start_node: bool) -> Option<&PrioritySegmentEnd> {
        self.ends.get(&SegmentEndId::new(segment, start_node))
    }

    pub fn contains(&self, end: SegmentEndId) -> bool {
        self.ends.contains_key(&end)
    }

    pub fn ends(&self) -> impl Iterator<Item = &PrioritySegmentEnd> {
        self.ends.values()
    }

    /// Ends at `node`
    pub fn ends_at(&self, node: NodeId) -> impl Iterator<Item = &PrioritySegmentEnd> {
        self.ends.values().filter(move |e| e.node == node)
    }

    /// Creates, updates or removes the node's segment ends so that they match
    /// the signs in the flags store
    pub fn sync_node<G, F>(
        &mut self,
        geometry: &G,
        flags: &F,
        states: &mut VehicleStateStore,
        node: NodeId,
    ) where
        G: GeometryProvider + ?Sized,
        F: LaneFlagsStore + ?Sized,
    {
        let incident: Vec<(SegmentId, bool)> = geometry
            .node(node)
            .map(|n| {
                n.segment_ids()
                    .filter_map(|s| geometry.segment(s).and_then(|g| g.end_at(node)).map(|e| (s, e)))
                    .collect()
            })
            .unwrap_or_default();

        let signed = incident
            .iter()
            .any(|(s, e)| flags.sign(*s, *e).is_some_and(|sign| sign != SignType::None));

        // Ends of segments no longer at this node go in any case
        let stale: Vec<SegmentEndId> = self
            .ends
            .values()
            .filter(|end| end.node == node)
            .filter(|end| !signed || !incident.contains(&(end.segment, end.start_node)))
            .map(|end| end.id())
            .collect();
        for end in stale {
            self.remove_end(states, end);
        }

        if !signed {
            return;
        }
        for (segment, start_node) in incident {
            let sign = flags.sign(segment, start_node).unwrap_or_default();
            self.ends
                .entry(SegmentEndId::new(segment, start_node))
                .and_modify(|end| end.sign = sign)
                .or_insert_with(|| PrioritySegmentEnd::new(node, segment, start_node, sign));
        }
    }

    /// Re-synchronises every node of the network
    pub fn sync_all<G, F>(&mut self, geometry: &G, flags: &F, states: &mut VehicleStateStore)
    where
        G: GeometryProvider + ?Sized,
        F: LaneFlagsStore + ?Sized,
    {
        let mut nodes: Vec<NodeId> = self.ends.values().map(|e| e.node).collect();
        for segment in geometry.segment_ids() {
            if let Some(seg) = geometry.segment(segment) {
                nodes.push(seg.start_node);
                nodes.push(seg.end_node);
            }
        }
        nodes.sort();
        nodes.dedup();
        for node in nodes {
            self.sync_node(geometry, flags, states, node);
        }
    }

    /// Drops both ends of a segment, unregistering their vehicles
    pub fn remove_segment(&mut self, states: &mut VehicleStateStore, segment: SegmentId) {
        for start_node in [true, false] {
            self.remove_end(states, SegmentEndId::new(segment, start_node));
        }
    }

    /// Registers `vehicle` at `end`, leaving any previous registration.
    /// Returns false if `end` is not a priority segment end.
    pub fn register(&mut self, states: &mut VehicleStateStore, vehicle: VehicleId, end: SegmentEndId) -> bool {
        if !self.ends.contains_key(&end) {
            self.unregister(states, vehicle);
            return false;
        }
        if states.get(vehicle).and_then(|s| s.registered_end) == Some(end) {
            return true;
        }
        self.unregister(states, vehicle);

        let Some(entry) = self.ends.get_mut(&end) else {
            return false;
        };
        let state = states.get_or_create(vehicle);
        state.registered_end = Some(end);
        state.next_on_end = entry.first_vehicle;
        entry.first_vehicle = Some(vehicle);
        entry.len += 1;
        true
    }

    /// Removes `vehicle` from whatever end it is registered at
    pub fn unregister(&mut self, states: &mut VehicleStateStore, vehicle: VehicleId) {
        let Some(end) = states.get(vehicle).and_then(|s| s.registered_end) else {
            return;
        };
        let successor = states.get(vehicle).and_then(|s| s.next_on_end);

        if let Some(entry) = self.ends.get_mut(&end) {
            if entry.first_vehicle == Some(vehicle) {
                entry.first_vehicle = successor;
                entry.len = entry.len.saturating_sub(1);
            } else {
                let mut current = entry.first_vehicle;
                let mut guard = entry.len;
                while let Some(id) = current {
                    if guard == 0 {
                        break;
                    }
                    guard -= 1;
                    let next = states.get(id).and_then(|s| s.next_on_end);
                    if next == Some(vehicle) {
                        if let Some(predecessor) = states.get_mut(id) {
                            predecessor.next_on_end = successor;
                        }
                        entry.len = entry.len.saturating_sub(1);
                        break;
                    }
                    current = next;
                }
            }
        }

        if let Some(state) = states.get_mut(vehicle) {
            clear_registration(state);
        }
    }

    /// Vehicles registered at `end`, most recent first
    pub fn vehicles<'a>(&self, states: &'a VehicleStateStore, end: SegmentEndId) -> RegisteredVehicles<'a> {
        let (next, remaining) = self
            .ends
            .get(&end)
            .map(|e| (e.first_vehicle, e.len))
            .unwrap_or((None, 0));
        RegisteredVehicles {
            states,
            next,
            remaining,
        }
    }

    fn remove_end(&mut self, states: &mut VehicleStateStore, end: SegmentEndId) {
        let Some(entry) = self.ends.remove(&end) else {
            return;
        };
        let mut current = entry.first_vehicle;
        let mut guard = entry.len;
        while let Some(id) = current {
            if guard == 0 {
                break;
            }
            guard -= 1;
            current = states.get(id).and_then(|s| s.next_on_end);
            if let Some(state) = states.get_mut(id) {
                clear_registration(state);
            }
        }
    }
}

fn clear_registration(state: &mut VehicleState) {
    state.registered_end = None;
    state.next_on_end = None;
}
