//! Road-network geometry as seen by the routing and priority core
//!
//! The core never owns geometry. It reads it through [`GeometryProvider`],
//! which the host implements (see `SimRoadNetwork` for the in-memory one).

use sorted_vec::SortedSet;

use super::types::{
    ArrowDirection, LaneDirection, LaneId, LaneTypes, NetworkService, NodeId, Position, SegmentEndId,
    SegmentId, VehicleTypes, MAX_SEGMENTS_PER_NODE, ROUTED_LANE_TYPES, ROUTED_VEHICLE_TYPES,
};

/// A lane as described by the geometry provider
#[derive(Debug, Clone)]
pub struct LaneGeometry {
    pub id: LaneId,
    pub segment: SegmentId,
    /// Position of the lane in its segment's lane list
    pub index: u8,
    pub lane_types: LaneTypes,
    pub vehicle_types: VehicleTypes,
    pub direction: LaneDirection,
    /// Rank among lanes of the same direction and vehicle group, counted from
    /// the left edge in the lane's own travel direction
    pub similar_index: u8,
    pub similar_count: u8,
    pub bus_lane: bool,
    /// Lateral offset from the segment centre line, positive to the right of start→end
    pub offset: f32,
}

impl LaneGeometry {
    /// Whether traffic on this lane drives toward the given segment end
    pub fn flows_toward(&self, start_node: bool) -> bool {
        match self.direction {
            LaneDirection::Forward => !start_node,
            LaneDirection::Backward => start_node,
        }
    }

    pub fn is_routed(&self) -> bool {
        self.lane_types.intersects(ROUTED_LANE_TYPES)
            && self.vehicle_types.intersects(ROUTED_VEHICLE_TYPES)
    }

    /// Rank counted from the outermost lane (kerb side) of the direction group
    pub fn outer_similar_index(&self, left_hand_traffic: bool) -> u8 {
        if left_hand_traffic {
            self.similar_index
        } else {
            self.similar_count.saturating_sub(1).saturating_sub(self.similar_index)
        }
    }

    /// Rank counted from the innermost lane (centre-line side) of the direction group
    pub fn inner_similar_index(&self, left_hand_traffic: bool) -> u8 {
        if left_hand_traffic {
            self.similar_count.saturating_sub(1).saturating_sub(self.similar_index)
        } else {
            self.similar_index
        }
    }

    pub fn is_type_compatible(&self, other: &LaneGeometry) -> bool {
        self.lane_types.intersects(other.lane_types & ROUTED_LANE_TYPES)
            && self
                .vehicle_types
                .intersects(other.vehicle_types & ROUTED_VEHICLE_TYPES)
    }
}

/// A segment as described by the geometry provider
#[derive(Debug, Clone)]
pub struct SegmentGeometry {
    pub id: SegmentId,
    pub start_node: NodeId,
    pub end_node: NodeId,
    /// Lanes ordered left to right relative to start→end
    pub lanes: Vec<LaneId>,
    pub service: NetworkService,
    pub highway: bool,
    pub length: f32,
}

impl SegmentGeometry {
    pub fn node(&self, start_node: bool) -> NodeId {
        if start_node {
            self.start_node
        } else {
            self.end_node
        }
    }

    /// Which end of this segment touches `node`, if any
    pub fn end_at(&self, node: NodeId) -> Option<bool> {
        if self.start_node == node {
            Some(true)
        } else if self.end_node == node {
            Some(false)
        } else {
            None
        }
    }
}

/// Node flags derived by the geometry provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub junction: bool,
    pub traffic_light: bool,
    pub end_or_one_way_out: bool,
}

/// A node with its fixed incident segment slots
#[derive(Debug, Clone)]
pub struct NodeGeometry {
    pub id: NodeId,
    pub position: Position,
    pub segments: [Option<SegmentId>; MAX_SEGMENTS_PER_NODE],
    pub flags: NodeFlags,
}

impl NodeGeometry {
    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments.iter().flatten().copied()
    }

    pub fn segment_count(&self) -> usize {
        self.segment_ids().count()
    }

    pub fn slot_of(&self, segment: SegmentId) -> Option<usize> {
        self.segments.iter().position(|slot| *slot == Some(segment))
    }
}

/// Directional adjacency precomputed per segment end
#[derive(Debug, Clone)]
pub struct SegmentEndGeometry {
    pub straight: SortedSet<SegmentId>,
    pub left: SortedSet<SegmentId>,
    pub right: SortedSet<SegmentId>,
    /// Nearest segment on the left of a vehicle arriving through this end
    pub left_segment: Option<SegmentId>,
    /// Nearest segment on the right of a vehicle arriving through this end
    pub right_segment: Option<SegmentId>,
}

/// Change notifications emitted by the geometry provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryEvent {
    SegmentInvalid(SegmentId),
    SegmentValid(SegmentId),
    SegmentEndReplaced { old: SegmentEndId, new: SegmentEndId },
}

/// Read-only geometry queries consumed by the core
pub trait GeometryProvider {
    /// Returns `None` for unknown or invalid segments
    fn segment(&self, id: SegmentId) -> Option<&SegmentGeometry>;

    fn node(&self, id: NodeId) -> Option<&NodeGeometry>;

    fn lane(&self, id: LaneId) -> Option<&LaneGeometry>;

    fn segment_end(&self, segment: SegmentId, start_node: bool) -> Option<&SegmentEndGeometry>;

    /// All valid segments in ascending id order
    fn segment_ids(&self) -> Vec<SegmentId>;

    fn left_hand_traffic(&self) -> bool;

    /// Every segment at the node is one-way with respect to it
    fn is_simple_junction(&self, node: NodeId) -> bool;

    fn segment_lanes(&self, segment: &SegmentGeometry) -> Vec<&LaneGeometry> {
        segment.lanes.iter().filter_map(|id| self.lane(*id)).collect()
    }

    fn is_highway(&self, segment: SegmentId) -> bool {
        self.segment(segment).is_some_and(|s| s.highway)
    }

    fn has_bus_lane(&self, segment: SegmentId) -> bool {
        self.segment(segment)
            .is_some_and(|s| self.segment_lanes(s).iter().any(|l| l.bus_lane))
    }

    /// All routed lanes leave the segment through the other end: the segment
    /// only carries traffic away from this end's node
    fn is_outgoing_one_way(&self, segment: SegmentId, start_node: bool) -> bool {
        let Some(seg) = self.segment(segment) else {
            return false;
        };
        let lanes: Vec<_> = self
            .segment_lanes(seg)
            .into_iter()
            .filter(|l| l.is_routed())
            .collect();
        !lanes.is_empty() && lanes.iter().all(|l| !l.flows_toward(start_node))
    }

    /// All routed lanes drive toward this end's node
    fn is_incoming_one_way(&self, segment: SegmentId, start_node: bool) -> bool {
        self.is_outgoing_one_way(segment, !start_node)
    }

    fn left_segment(&self, segment: SegmentId, node: NodeId) -> Option<SegmentId> {
        let start = self.segment(segment)?.end_at(node)?;
        self.segment_end(segment, start)?.left_segment
    }

    fn right_segment(&self, segment: SegmentId, node: NodeId) -> Option<SegmentId> {
        let start = self.segment(segment)?.end_at(node)?;
        self.segment_end(segment, start)?.right_segment
    }

    /// Classifies the move from `from` into `to` across `node` geometrically
    fn direction(&self, from: SegmentId, to: SegmentId, node: NodeId) -> ArrowDirection {
        if from == to {
            return ArrowDirection::Turn;
        }
        let Some(end) = self
            .segment(from)
            .and_then(|s| s.end_at(node))
            .and_then(|start| self.segment_end(from, start))
        else {
            return ArrowDirection::None;
        };
        if end.straight.binary_search(&to).is_ok() {
            ArrowDirection::Forward
        } else if end.left.binary_search(&to).is_ok() {
            ArrowDirection::Left
        } else if end.right.binary_search(&to).is_ok() {
            ArrowDirection::Right
        } else {
            ArrowDirection::None
        }
    }
}
