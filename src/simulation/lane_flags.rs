//! Lane control flags: arrows, lane connectors, priority signs, timed lights
//!
//! Configuration layers write these; the routing builder and the arbitrator
//! only read them. Absent entries mean "no restriction".

use std::collections::{HashMap, HashSet};

use super::types::{LaneArrows, LaneId, NodeId, SegmentEndId, SegmentId, SignType};

/// Read access to lane control flags
pub trait LaneFlagsStore {
    /// Final arrows of a lane; lanes without an entry allow every direction
    fn lane_arrows(&self, lane: LaneId) -> LaneArrows;

    /// Explicit connector targets of a lane end; empty when none are set
    fn lane_connections(&self, lane: LaneId, start_node: bool) -> &[LaneId];

    /// Priority sign of a segment end, `None` when the end has no sign entry
    fn sign(&self, segment: SegmentId, start_node: bool) -> Option<SignType>;

    fn timed_light_active(&self, node: NodeId) -> bool;

    /// Junction restriction override for lane changes while going straight
    fn lane_changing_allowed_when_going_straight(
        &self,
        _segment: SegmentId,
        _start_node: bool,
    ) -> Option<bool> {
        None
    }

    fn has_lane_connections(&self, lane: LaneId, start_node: bool) -> bool {
        !self.lane_connections(lane, start_node).is_empty()
    }

    fn are_lanes_connected(&self, source: LaneId, target: LaneId, start_node: bool) -> bool {
        self.lane_connections(source, start_node).contains(&target)
    }
}

/// In-memory lane flags store
#[derive(Debug, Default, Clone)]
pub struct SimLaneFlags {
    arrows: HashMap<LaneId, LaneArrows>,
    connections: HashMap<(LaneId, bool), Vec<LaneId>>,
    signs: HashMap<SegmentEndId, SignType>,
    timed_lights: HashSet<NodeId>,
    straight_lane_changes: HashMap<SegmentEndId, bool>,
}

impl SimLaneFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lane_arrows(&mut self, lane: LaneId, arrows: LaneArrows) {
        self.arrows.insert(lane, arrows);
    }

    pub fn reset_lane_arrows(&mut self, lane: LaneId) {
        self.arrows.remove(&lane);
    }

    /// Adds a connector from `source`'s end at `start_node` to `target`.
    /// Returns false if the connector already existed.
    pub fn add_lane_connection(&mut self, source: LaneId, target: LaneId, start_node: bool) -> bool {
        let targets = self.connections.entry((source, start_node)).or_default();
        if targets.contains(&target) {
            return false;
        }
        targets.push(target);
        true
    }

    pub fn remove_lane_connection(&mut self, source: LaneId, target: LaneId, start_node: bool) {
        if let Some(targets) = self.connections.get_mut(&(source, start_node)) {
            targets.retain(|lane| *lane != target);
            if targets.is_empty() {
                self.connections.remove(&(source, start_node));
            }
        }
    }

    pub fn set_sign(&mut self, segment: SegmentId, start_node: bool, sign: SignType) {
        self.signs
            .insert(SegmentEndId::new(segment, start_node), sign);
    }

    pub fn clear_sign(&mut self, segment: SegmentId, start_node: bool) {
        self.signs.remove(&SegmentEndId::new(segment, start_node));
    }

    pub fn set_timed_light(&mut self, node: NodeId, active: bool) {
        if active {
            self.timed_lights.insert(node);
        } else {
            self.timed_lights.remove(&node);
        }
    }

    pub fn set_lane_changing_allowed_when_going_straight(
        &mut self,
        segment: SegmentId,
        start_node: bool,
        allowed: bool,
    ) {
        self.straight_lane_changes
            .insert(SegmentEndId::new(segment, start_node), allowed);
    }

    /// Drops every flag that refers to `segment`'s ends or to any of its lanes
    pub fn remove_segment(&mut self, segment: SegmentId, lanes: &[LaneId]) {
        for start_node in [true, false] {
            let end = SegmentEndId::new(segment, start_node);
            self.signs.remove(&end);
            self.straight_lane_changes.remove(&end);
        }
        for lane in lanes {
            self.arrows.remove(lane);
            self.connections.remove(&(*lane, true));
            self.connections.remove(&(*lane, false));
        }
        for targets in self.connections.values_mut() {
            targets.retain(|target| !lanes.contains(target));
        }
        self.connections.retain(|_, targets| !targets.is_empty());
    }

    pub fn has_any_sign(&self) -> bool {
        self.signs.values().any(|sign| *sign != SignType::None)
    }
}

impl LaneFlagsStore for SimLaneFlags {
    fn lane_arrows(&self, lane: LaneId) -> LaneArrows {
        self.arrows
            .get(&lane)
            .copied()
            .unwrap_or(LaneArrows::LEFT_FORWARD_RIGHT)
    }

    fn lane_connections(&self, lane: LaneId, start_node: bool) -> &[LaneId] {
        self.connections
            .get(&(lane, start_node))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn sign(&self, segment: SegmentId, start_node: bool) -> Option<SignType> {
        self.signs
            .get(&SegmentEndId::new(segment, start_node))
            .copied()
    }

    fn timed_light_active(&self, node: NodeId) -> bool {
        self.timed_lights.contains(&node)
    }

    fn lane_changing_allowed_when_going_straight(
        &self,
        segment: SegmentId,
        start_node: bool,
    ) -> Option<bool> {
        self.straight_lane_changes
            .get(&SegmentEndId::new(segment, start_node))
            .copied()
    }
}
