//! In-memory road network
//!
//! Owns nodes, segments and lanes, derives the per-segment-end directional
//! adjacency the core needs, queues change notifications and provides
//! node-level path finding through a petgraph graph.

use anyhow::{Context, Result};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use sorted_vec::SortedSet;
use std::collections::HashMap;
use std::f32::consts::FRAC_PI_4;

use super::geometry::{
    GeometryEvent, GeometryProvider, LaneGeometry, NodeFlags, NodeGeometry, SegmentEndGeometry,
    SegmentGeometry,
};
use super::types::{
    LaneDirection, LaneId, LaneTypes, NetworkService, NodeId, Position, SegmentEndId, SegmentId,
    VehicleTypes, MAX_SEGMENTS_PER_NODE, ROUTED_VEHICLE_TYPES,
};

/// Width of a lane in world units
pub const LANE_WIDTH: f32 = 3.0;

/// Turns sharper than this (radians) are classified left or right
const STRAIGHT_ANGLE: f32 = FRAC_PI_4;

/// Description of a single lane to create
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneSpec {
    pub vehicle_types: VehicleTypes,
    pub lane_types: LaneTypes,
    pub bus_lane: bool,
}

impl LaneSpec {
    pub fn car() -> Self {
        Self {
            vehicle_types: VehicleTypes::CAR,
            lane_types: LaneTypes::VEHICLE,
            bus_lane: false,
        }
    }

    pub fn bus() -> Self {
        Self {
            vehicle_types: VehicleTypes::CAR,
            lane_types: LaneTypes::VEHICLE | LaneTypes::TRANSPORT_VEHICLE,
            bus_lane: true,
        }
    }

    pub fn tram() -> Self {
        Self {
            vehicle_types: VehicleTypes::TRAM,
            lane_types: LaneTypes::VEHICLE,
            bus_lane: false,
        }
    }

    pub fn train() -> Self {
        Self {
            vehicle_types: VehicleTypes::TRAIN,
            lane_types: LaneTypes::VEHICLE,
            bus_lane: false,
        }
    }
}

/// Description of a segment to create. Lanes of each direction are listed
/// from the kerb (outermost) to the centre line (innermost).
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSpec {
    pub forward: Vec<LaneSpec>,
    pub backward: Vec<LaneSpec>,
    pub highway: bool,
    pub service: NetworkService,
}

impl SegmentSpec {
    /// A one-way road with `lanes` car lanes driving from start to end
    pub fn one_way(lanes: usize) -> Self {
        Self::two_way(lanes, 0)
    }

    pub fn two_way(forward: usize, backward: usize) -> Self {
        Self {
            forward: vec![LaneSpec::car(); forward],
            backward: vec![LaneSpec::car(); backward],
            highway: false,
            service: NetworkService::Road,
        }
    }

    /// A rail line with one track per direction
    pub fn rail() -> Self {
        Self {
            forward: vec![LaneSpec::train()],
            backward: vec![LaneSpec::train()],
            highway: false,
            service: NetworkService::Rail,
        }
    }

    pub fn highway(mut self) -> Self {
        self.highway = true;
        self
    }

    /// Adds a kerb-side lane in the given direction
    pub fn with_outer_lane(mut self, direction: LaneDirection, lane: LaneSpec) -> Self {
        match direction {
            LaneDirection::Forward => self.forward.insert(0, lane),
            LaneDirection::Backward => self.backward.insert(0, lane),
        }
        self
    }

    /// Adds a centre-side lane in the given direction
    pub fn with_inner_lane(mut self, direction: LaneDirection, lane: LaneSpec) -> Self {
        match direction {
            LaneDirection::Forward => self.forward.push(lane),
            LaneDirection::Backward => self.backward.push(lane),
        }
        self
    }

    /// Lanes arranged left to right relative to start→end for the drive side
    fn arranged(&self, left_hand_traffic: bool) -> Vec<(LaneDirection, LaneSpec)> {
        let forward = self.forward.iter().map(|l| (LaneDirection::Forward, *l));
        let backward = self.backward.iter().map(|l| (LaneDirection::Backward, *l));
        if left_hand_traffic {
            forward.chain(backward.rev()).collect()
        } else {
            backward.chain(forward.rev()).collect()
        }
    }
}

/// Edge data for the node-level path finding graph
#[derive(Debug, Clone, Copy)]
pub struct SegmentEdge {
    pub segment: SegmentId,
    /// Segment length scaled for integer weights
    pub weight: u32,
}

/// In-memory geometry provider
#[derive(Default)]
pub struct SimRoadNetwork {
    left_hand_traffic: bool,
    nodes: Vec<Option<NodeGeometry>>,
    segments: Vec<Option<SegmentGeometry>>,
    lanes: Vec<Option<LaneGeometry>>,
    specs: HashMap<SegmentId, SegmentSpec>,
    segment_ends: HashMap<SegmentEndId, SegmentEndGeometry>,
    events: Vec<GeometryEvent>,

    /// Node-level graph; one edge per segment direction that carries traffic
    graph: DiGraph<NodeId, SegmentEdge>,
    node_to_index: HashMap<NodeId, NodeIndex>,
    path_cache: HashMap<NodeId, HashMap<NodeId, Vec<NodeId>>>,
}

impl SimRoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_left_hand_traffic(left_hand_traffic: bool) -> Self {
        Self {
            left_hand_traffic,
            ..Self::default()
        }
    }

    /// Adds a node to the network
    pub fn add_node(&mut self, position: Position) -> NodeId {
        let id = NodeId(self.nodes.len() as u16);
        self.nodes.push(Some(NodeGeometry {
            id,
            position,
            segments: [None; MAX_SEGMENTS_PER_NODE],
            flags: NodeFlags::default(),
        }));
        self.rebuild_graph();
        id
    }

    pub fn node_position(&self, node: NodeId) -> Option<Position> {
        self.node(node).map(|n| n.position)
    }

    pub fn set_traffic_light(&mut self, node: NodeId, traffic_light: bool) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node.index())
            .and_then(Option::as_mut)
            .context("Node not found")?;
        node.flags.traffic_light = traffic_light;
        Ok(())
    }

    /// Adds a segment between two nodes and derives its geometry
    pub fn add_segment(&mut self, start: NodeId, end: NodeId, spec: SegmentSpec) -> Result<SegmentId> {
        if start == end {
            anyhow::bail!("Segment must connect two different nodes");
        }
        let start_pos = self.node_position(start).context("Start node not found")?;
        let end_pos = self.node_position(end).context("End node not found")?;

        let id = SegmentId(self.segments.len() as u16);
        self.attach(start, id)?;
        if let Err(e) = self.attach(end, id) {
            self.detach(start, id);
            return Err(e);
        }

        let lanes = self.create_lanes(id, &spec);
        self.segments.push(Some(SegmentGeometry {
            id,
            start_node: start,
            end_node: end,
            lanes,
            service: spec.service,
            highway: spec.highway,
            length: start_pos.distance(&end_pos),
        }));
        self.specs.insert(id, spec);

        self.rederive_node(start);
        self.rederive_node(end);
        self.rebuild_graph();
        self.events.push(GeometryEvent::SegmentValid(id));
        Ok(id)
    }

    /// Removes a segment; its lanes become invalid
    pub fn remove_segment(&mut self, segment: SegmentId) -> Result<Vec<LaneId>> {
        let seg = self
            .segments
            .get_mut(segment.index())
            .and_then(Option::take)
            .context("Segment not found")?;

        for lane in &seg.lanes {
            if let Some(slot) = self.lanes.get_mut(lane.index()) {
                *slot = None;
            }
        }
        self.detach(seg.start_node, segment);
        self.detach(seg.end_node, segment);
        self.segment_ends.remove(&SegmentEndId::new(segment, true));
        self.segment_ends.remove(&SegmentEndId::new(segment, false));
        self.specs.remove(&segment);

        self.rederive_node(seg.start_node);
        self.rederive_node(seg.end_node);
        self.rebuild_graph();
        self.events.push(GeometryEvent::SegmentInvalid(segment));
        Ok(seg.lanes)
    }

    /// Splits a segment at `position`. The original segment keeps its start
    /// node and lanes and now ends at the new node; a new segment with the same
    /// spec takes over the original end, reusing its node slot.
    /// Returns (new node, new segment).
    pub fn split_segment(&mut self, segment: SegmentId, position: Position) -> Result<(NodeId, SegmentId)> {
        let (start, end) = {
            let seg = self.segment(segment).context("Segment not found")?;
            (seg.start_node, seg.end_node)
        };
        let spec = self
            .specs
            .get(&segment)
            .cloned()
            .context("Segment spec not found")?;

        let middle = self.add_node(position);
        let new_id = SegmentId(self.segments.len() as u16);

        let end_slot = self
            .node(end)
            .and_then(|n| n.slot_of(segment))
            .context("Segment missing from its end node")?;
        if let Some(node) = self.nodes.get_mut(end.index()).and_then(Option::as_mut) {
            node.segments[end_slot] = Some(new_id);
        }
        self.attach(middle, segment)?;
        self.attach(middle, new_id)?;

        let start_pos = self.node_position(start).context("Start node not found")?;
        let end_pos = self.node_position(end).context("End node not found")?;
        if let Some(seg) = self.segments.get_mut(segment.index()).and_then(Option::as_mut) {
            seg.end_node = middle;
            seg.length = start_pos.distance(&position);
        }
        self.segment_ends.remove(&SegmentEndId::new(segment, false));

        let lanes = self.create_lanes(new_id, &spec);
        self.segments.push(Some(SegmentGeometry {
            id: new_id,
            start_node: middle,
            end_node: end,
            lanes,
            service: spec.service,
            highway: spec.highway,
            length: position.distance(&end_pos),
        }));
        self.specs.insert(new_id, spec);

        self.rederive_node(start);
        self.rederive_node(middle);
        self.rederive_node(end);
        self.rebuild_graph();
        self.events.push(GeometryEvent::SegmentValid(new_id));
        self.events.push(GeometryEvent::SegmentEndReplaced {
            old: SegmentEndId::new(segment, false),
            new: SegmentEndId::new(new_id, false),
        });
        Ok((middle, new_id))
    }

    /// Takes all change notifications queued since the last call
    pub fn drain_events(&mut self) -> Vec<GeometryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Lanes of `segment` whose traffic drives toward `node`
    pub fn lanes_toward(&self, segment: SegmentId, node: NodeId) -> Vec<&LaneGeometry> {
        let Some(seg) = self.segment(segment) else {
            return Vec::new();
        };
        let Some(start) = seg.end_at(node) else {
            return Vec::new();
        };
        self.segment_lanes(seg)
            .into_iter()
            .filter(|l| l.is_routed() && l.flows_toward(start))
            .collect()
    }

    /// Finds the segment that carries traffic from `from` directly to `to`
    pub fn find_segment_between(&self, from: NodeId, to: NodeId) -> Result<SegmentId> {
        let from_index = self
            .node_to_index
            .get(&from)
            .ok_or_else(|| anyhow::anyhow!("Node {:?} not found", from))?;
        let to_index = self
            .node_to_index
            .get(&to)
            .ok_or_else(|| anyhow::anyhow!("Node {:?} not found", to))?;

        self.graph
            .edges(*from_index)
            .filter(|edge| edge.target() == *to_index)
            .map(|edge| edge.weight().segment)
            .min()
            .ok_or_else(|| anyhow::anyhow!("No segment found connecting {:?} to {:?}", from, to))
    }

    /// Finds a node path using A* (Dijkstra with null heuristic), excluding `start`
    pub fn find_path(&mut self, start: NodeId, end: NodeId) -> Option<Vec<NodeId>> {
        if start == end {
            return Some(vec![]);
        }

        if let Some(path) = self.path_cache.get(&start).and_then(|paths| paths.get(&end)) {
            return Some(path.clone());
        }

        let start_index = *self.node_to_index.get(&start)?;
        let end_index = *self.node_to_index.get(&end)?;

        let (_, node_path) = astar(
            &self.graph,
            start_index,
            |node| node == end_index,
            |edge| edge.weight().weight,
            |_| 0,
        )?;

        let path: Vec<NodeId> = node_path
            .iter()
            .skip(1)
            .filter_map(|index| self.graph.node_weight(*index).copied())
            .collect();

        self.path_cache
            .entry(start)
            .or_default()
            .insert(end, path.clone());

        Some(path)
    }

    /// Find the node closest to a given position
    pub fn find_closest_node(&self, position: &Position) -> Option<NodeId> {
        self.nodes
            .iter()
            .flatten()
            .min_by(|a, b| {
                position
                    .distance(&a.position)
                    .partial_cmp(&position.distance(&b.position))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|n| n.id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.iter().flatten().count()
    }

    fn attach(&mut self, node: NodeId, segment: SegmentId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node.index())
            .and_then(Option::as_mut)
            .context("Node not found")?;
        let slot = node
            .segments
            .iter_mut()
            .find(|slot| slot.is_none())
            .with_context(|| format!("Node {:?} already has {} segments", node.id, MAX_SEGMENTS_PER_NODE))?;
        *slot = Some(segment);
        Ok(())
    }

    fn detach(&mut self, node: NodeId, segment: SegmentId) {
        if let Some(node) = self.nodes.get_mut(node.index()).and_then(Option::as_mut) {
            for slot in node.segments.iter_mut() {
                if *slot == Some(segment) {
                    *slot = None;
                }
            }
        }
    }

    fn create_lanes(&mut self, segment: SegmentId, spec: &SegmentSpec) -> Vec<LaneId> {
        let arranged = spec.arranged(self.left_hand_traffic);
        let count = arranged.len();
        let first_id = self.lanes.len() as u32;

        let mut lanes: Vec<LaneGeometry> = arranged
            .iter()
            .enumerate()
            .map(|(index, (direction, lane))| LaneGeometry {
                id: LaneId(first_id + index as u32),
                segment,
                index: index as u8,
                lane_types: lane.lane_types,
                vehicle_types: lane.vehicle_types,
                direction: *direction,
                similar_index: 0,
                similar_count: 0,
                bus_lane: lane.bus_lane,
                offset: (index as f32 - (count as f32 - 1.0) / 2.0) * LANE_WIDTH,
            })
            .collect();

        // Similar lanes share direction and vehicle group; rank them left to
        // right in their own travel direction.
        for i in 0..lanes.len() {
            let group: Vec<usize> = (0..lanes.len())
                .filter(|j| {
                    lanes[*j].direction == lanes[i].direction
                        && lanes[*j].vehicle_types & ROUTED_VEHICLE_TYPES
                            == lanes[i].vehicle_types & ROUTED_VEHICLE_TYPES
                })
                .collect();
            let position = group.iter().position(|j| *j == i).unwrap_or(0);
            let rank = match lanes[i].direction {
                LaneDirection::Forward => position,
                LaneDirection::Backward => group.len() - 1 - position,
            };
            lanes[i].similar_index = rank as u8;
            lanes[i].similar_count = group.len() as u8;
        }

        let ids = lanes.iter().map(|l| l.id).collect();
        self.lanes.extend(lanes.into_iter().map(Some));
        ids
    }

    /// Recomputes the directional adjacency of every segment end at `node`
    /// and the node's derived flags
    fn rederive_node(&mut self, node_id: NodeId) {
        let Some(node) = self.node(node_id).cloned() else {
            return;
        };

        // (segment, start_node at this node, heading away from the node)
        let arms: Vec<(SegmentId, bool, Position)> = node
            .segment_ids()
            .filter_map(|segment| {
                let seg = self.segment(segment)?;
                let start = seg.end_at(node_id)?;
                let far = self.node_position(seg.node(!start))?;
                Some((segment, start, far.sub(&node.position)))
            })
            .collect();

        for (segment, start, outward) in &arms {
            let approach = outward.scale(-1.0);
            let mut straight = Vec::new();
            let mut left = Vec::new();
            let mut right = Vec::new();
            let mut leftmost: Option<(f32, SegmentId)> = None;
            let mut rightmost: Option<(f32, SegmentId)> = None;

            for (other, _, other_outward) in &arms {
                if other == segment {
                    continue;
                }
                let angle = approach.turn_angle_to(other_outward);
                if angle.abs() <= STRAIGHT_ANGLE {
                    straight.push(*other);
                } else if angle > 0.0 {
                    left.push(*other);
                } else {
                    right.push(*other);
                }
                if leftmost.is_none_or(|(best, _)| angle > best) {
                    leftmost = Some((angle, *other));
                }
                if rightmost.is_none_or(|(best, _)| angle < best) {
                    rightmost = Some((angle, *other));
                }
            }

            self.segment_ends.insert(
                SegmentEndId::new(*segment, *start),
                SegmentEndGeometry {
                    straight: SortedSet::from_unsorted(straight),
                    left: SortedSet::from_unsorted(left),
                    right: SortedSet::from_unsorted(right),
                    left_segment: leftmost.map(|(_, s)| s),
                    right_segment: rightmost.map(|(_, s)| s),
                },
            );
        }

        let count = arms.len();
        let nothing_leaves = arms
            .iter()
            .all(|(segment, start, _)| self.is_incoming_one_way(*segment, *start));
        if let Some(node) = self.nodes.get_mut(node_id.index()).and_then(Option::as_mut) {
            node.flags.junction = count > 2;
            node.flags.end_or_one_way_out = count <= 1 || nothing_leaves;
        }
    }

    fn rebuild_graph(&mut self) {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();
        for node in self.nodes.iter().flatten() {
            node_to_index.insert(node.id, graph.add_node(node.id));
        }
        for seg in self.segments.iter().flatten() {
            let (Some(start), Some(end)) = (
                node_to_index.get(&seg.start_node),
                node_to_index.get(&seg.end_node),
            ) else {
                continue;
            };
            let edge = SegmentEdge {
                segment: seg.id,
                weight: ((seg.length * 100.0) as u32).max(1),
            };
            let lanes = self.segment_lanes(seg);
            if lanes.iter().any(|l| l.is_routed() && l.flows_toward(false)) {
                graph.add_edge(*start, *end, edge);
            }
            if lanes.iter().any(|l| l.is_routed() && l.flows_toward(true)) {
                graph.add_edge(*end, *start, edge);
            }
        }
        self.graph = graph;
        self.node_to_index = node_to_index;
        self.path_cache.clear();
    }
}

impl GeometryProvider for SimRoadNetwork {
    fn segment(&self, id: SegmentId) -> Option<&SegmentGeometry> {
        self.segments.get(id.index()).and_then(Option::as_ref)
    }

    fn node(&self, id: NodeId) -> Option<&NodeGeometry> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn lane(&self, id: LaneId) -> Option<&LaneGeometry> {
        self.lanes.get(id.index()).and_then(Option::as_ref)
    }

    fn segment_end(&self, segment: SegmentId, start_node: bool) -> Option<&SegmentEndGeometry> {
        self.segment_ends
            .get(&SegmentEndId::new(segment, start_node))
    }

    fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().flatten().map(|s| s.id).collect()
    }

    fn left_hand_traffic(&self) -> bool {
        self.left_hand_traffic
    }

    fn is_simple_junction(&self, node: NodeId) -> bool {
        let Some(node) = self.node(node) else {
            return false;
        };
        node.segment_ids().all(|segment| {
            self.segment(segment)
                .and_then(|s| s.end_at(node.id))
                .is_some_and(|start| {
                    self.is_incoming_one_way(segment, start)
                        || self.is_outgoing_one_way(segment, start)
                })
        })
    }
}
