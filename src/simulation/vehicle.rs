//! Vehicle movement for the reference simulation
//!
//! Vehicles follow a node path, pick their next lane from the routing table
//! and ask the junction-transit state machine before crossing a node.

use anyhow::{Context, Result};
use log::debug;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use super::clock::{SimClock, SimulationClock};
use super::geometry::{GeometryProvider, LaneGeometry};
use super::lane_flags::SimLaneFlags;
use super::options::PriorityOptions;
use super::priority::PriorityRegistry;
use super::right_of_way::{PathPosition, RightOfWay};
use super::road_network::SimRoadNetwork;
use super::routing::{LaneTransition, RoutingManager, TransitionKind};
use super::stats::SimulationStats;
use super::transit::{next_transit_state, TransitInput, VehicleStateStore};
use super::types::{
    LaneEndKey, LaneId, NodeId, Position, SegmentEndId, SegmentId, VehicleId, ARROW_VEHICLE_TYPES,
    JUNCTION_APPROACH_DISTANCE, SAFE_FOLLOWING_MULTIPLIER, STOP_LINE_GAP, VEHICLE_LENGTH,
};

/// Result of a vehicle update indicating what action should be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleUpdateResult {
    Continue,
    /// Reached the last node of its path
    Arrived,
    /// Cannot continue (no route, no path)
    Despawn,
}

/// Vehicles per lane ordered by distance travelled along the lane
#[derive(Debug, Default, Clone)]
pub struct LaneOccupancy {
    lanes: HashMap<LaneId, BTreeMap<OrderedFloat<f32>, VehicleId>>,
}

impl LaneOccupancy {
    /// Moves a vehicle's entry from its previous place to the new one
    pub fn update(
        &mut self,
        vehicle: VehicleId,
        previous: Option<(LaneId, OrderedFloat<f32>)>,
        lane: LaneId,
        distance: OrderedFloat<f32>,
    ) {
        if let Some((prev_lane, prev_distance)) = previous {
            self.remove(vehicle, prev_lane, prev_distance);
        }
        self.lanes.entry(lane).or_default().insert(distance, vehicle);
    }

    pub fn remove(&mut self, vehicle: VehicleId, lane: LaneId, distance: OrderedFloat<f32>) {
        if let Some(lane_map) = self.lanes.get_mut(&lane) {
            if lane_map.get(&distance) == Some(&vehicle) {
                lane_map.remove(&distance);
            } else {
                lane_map.retain(|_, id| *id != vehicle);
            }
        }
    }

    /// Drops every entry of a vehicle
    pub fn forget(&mut self, vehicle: VehicleId) {
        for lane_map in self.lanes.values_mut() {
            lane_map.retain(|_, id| *id != vehicle);
        }
    }

    /// Find the vehicle directly ahead on the same lane
    pub fn vehicle_ahead(
        &self,
        lane: LaneId,
        distance: OrderedFloat<f32>,
    ) -> Option<(OrderedFloat<f32>, VehicleId)> {
        self.lanes.get(&lane).and_then(|lane_map| {
            lane_map
                .range((Bound::Excluded(distance), Bound::Unbounded))
                .next()
                .map(|(d, v)| (*d, *v))
        })
    }

    /// Whether a vehicle can enter the lane at its start
    pub fn has_space(&self, lane: LaneId) -> bool {
        self.lanes
            .get(&lane)
            .and_then(|lane_map| lane_map.keys().next())
            .is_none_or(|first| first.into_inner() > VEHICLE_LENGTH * SAFE_FOLLOWING_MULTIPLIER)
    }

    /// Number of vehicles currently on the lane
    pub fn vehicles_on(&self, lane: LaneId) -> usize {
        self.lanes.get(&lane).map_or(0, BTreeMap::len)
    }
}

/// Everything a vehicle reads or updates during its move
pub struct VehicleContext<'a> {
    pub network: &'a SimRoadNetwork,
    pub flags: &'a SimLaneFlags,
    pub routing: &'a RoutingManager,
    pub registry: &'a mut PriorityRegistry,
    pub states: &'a mut VehicleStateStore,
    pub clock: &'a SimClock,
    pub occupancy: &'a mut LaneOccupancy,
    pub options: &'a PriorityOptions,
    pub stats: &'a mut SimulationStats,
}

/// A vehicle in the reference simulation
#[derive(Debug, Clone)]
pub struct SimVehicle {
    pub id: VehicleId,
    pub max_speed: f32,
    /// Speed actually driven during the last update
    pub speed: f32,
    pub segment: SegmentId,
    pub lane: LaneId,
    pub distance_along_segment: OrderedFloat<f32>,
    /// Remaining nodes; the first one is where the current lane leads
    pub path: Vec<NodeId>,
    /// Lane chosen for the segment after the next node
    pub next: Option<LaneTransition>,
    pub position: Position,
    pub velocity: Position,
}

impl SimVehicle {
    pub fn new(
        id: VehicleId,
        max_speed: f32,
        segment: SegmentId,
        lane: LaneId,
        path: Vec<NodeId>,
        position: Position,
    ) -> Self {
        Self {
            id,
            max_speed,
            speed: 0.0,
            segment,
            lane,
            distance_along_segment: OrderedFloat(0.0),
            path,
            next: None,
            position,
            velocity: Position::default(),
        }
    }

    /// Update vehicle movement.
    /// Returns VehicleUpdateResult indicating what action should be taken with the vehicle
    pub fn update(&mut self, delta_secs: f32, ctx: &mut VehicleContext<'_>) -> Result<VehicleUpdateResult> {
        if self.path.is_empty() {
            return Ok(VehicleUpdateResult::Despawn);
        }
        let network = ctx.network;

        let segment = network.segment(self.segment).context("Segment not found")?;
        let lane = network.lane(self.lane).context("Lane not found")?;
        let length = segment.length;

        let prev_lane = self.lane;
        let prev_distance = self.distance_along_segment;
        let prev_position = self.position;

        let mut distance_delta = self.max_speed * delta_secs;

        if let Some((ahead_distance, _)) = ctx.occupancy.vehicle_ahead(self.lane, self.distance_along_segment) {
            let gap = ahead_distance.into_inner() - self.distance_along_segment.into_inner();
            let safe_following_distance = VEHICLE_LENGTH * SAFE_FOLLOWING_MULTIPLIER;
            if gap <= distance_delta + safe_following_distance {
                distance_delta = 0.0;
            }
        }

        let distance_to_node = length - self.distance_along_segment.into_inner();
        if self.path.len() > 1 && distance_to_node <= JUNCTION_APPROACH_DISTANCE.max(distance_delta) {
            if self.next.is_none() {
                self.next = choose_next_lane(ctx.routing, network, lane, &self.path);
            }
            let Some(next) = self.next else {
                debug!("Vehicle {:?} has no lane into its next segment", self.id);
                ctx.occupancy.remove(self.id, prev_lane, prev_distance);
                return Ok(VehicleUpdateResult::Despawn);
            };

            let end = SegmentEndId::new(self.segment, lane.flows_toward(true));
            ctx.states.set_path_position(
                self.id,
                (self.segment, self.lane),
                Some((next.segment, next.lane)),
            );
            ctx.registry.register(ctx.states, self.id, end);

            if !self.may_cross(ctx, next, end) {
                let stop_line = length - STOP_LINE_GAP;
                let room = (stop_line - self.distance_along_segment.into_inner()).max(0.0);
                distance_delta = distance_delta.min(room);
            }
        }

        self.distance_along_segment += distance_delta;
        self.speed = distance_delta / delta_secs.max(f32::EPSILON);

        if self.distance_along_segment >= OrderedFloat(length) {
            let reached = self.path.remove(0);
            ctx.registry.unregister(ctx.states, self.id);

            if self.path.is_empty() {
                ctx.occupancy.remove(self.id, prev_lane, prev_distance);
                self.position = network.node_position(reached).unwrap_or(self.position);
                return Ok(VehicleUpdateResult::Arrived);
            }

            let next = match self.next.take() {
                Some(next) => Some(next),
                None => {
                    let mut full_path = vec![reached];
                    full_path.extend(self.path.iter().copied());
                    choose_next_lane(ctx.routing, network, lane, &full_path)
                }
            };
            let Some(next) = next else {
                ctx.occupancy.remove(self.id, prev_lane, prev_distance);
                return Ok(VehicleUpdateResult::Despawn);
            };

            let overflow = self.distance_along_segment.into_inner() - length;
            self.segment = next.segment;
            self.lane = next.lane;
            self.distance_along_segment = OrderedFloat(overflow);

            let tick = ctx.clock.current_tick();
            ctx.states.reset_transit(self.id, tick);
            ctx.states
                .set_path_position(self.id, (self.segment, self.lane), None);
        }

        self.position = lane_position(network, self.lane, self.distance_along_segment.into_inner())
            .context("Lane position not found")?;
        self.velocity = self.position.sub(&prev_position).scale(1.0 / delta_secs.max(f32::EPSILON));

        ctx.occupancy.update(
            self.id,
            Some((prev_lane, prev_distance)),
            self.lane,
            self.distance_along_segment,
        );

        Ok(VehicleUpdateResult::Continue)
    }

    /// Runs the junction-transit state machine; true when the vehicle may
    /// drive past the stop line
    fn may_cross(&self, ctx: &mut VehicleContext<'_>, next: LaneTransition, end: SegmentEndId) -> bool {
        let Some(state) = ctx.states.get(self.id).cloned() else {
            return true;
        };
        let tick = ctx.clock.current_tick();
        let sign = ctx
            .registry
            .get(end.segment, end.start_node)
            .map(|e| e.sign)
            .unwrap_or_default();

        let must_yield = state.needs_arbitration() && {
            let arbitrator = RightOfWay {
                geometry: ctx.network,
                flags: ctx.flags,
                clock: ctx.clock,
                routing: ctx.routing,
                registry: &*ctx.registry,
                states: &*ctx.states,
                options: ctx.options,
            };
            arbitrator.has_incoming_vehicles_with_higher_priority(
                self.id,
                PathPosition::new(self.segment, self.lane),
                PathPosition::new(next.segment, next.lane),
            )
        };

        let input = TransitInput {
            tick,
            sign,
            must_yield,
            has_space: ctx.occupancy.has_space(next.lane),
            speed: self.speed,
        };
        let decision = next_transit_state(&state, &input, ctx.options);
        ctx.states.apply(self.id, decision, tick);

        if must_yield {
            ctx.stats.yield_decisions += 1;
        }
        if decision.forced {
            ctx.stats.forced_leaves += 1;
            debug!(
                "Vehicle {:?} forced through after {} ticks",
                self.id, decision.wait_ticks
            );
        }
        decision.may_proceed()
    }
}

/// World position of a point `distance` along a lane in its travel direction
pub fn lane_position(network: &SimRoadNetwork, lane: LaneId, distance: f32) -> Option<Position> {
    let lane = network.lane(lane)?;
    let segment = network.segment(lane.segment)?;
    let start = network.node_position(segment.start_node)?;
    let end = network.node_position(segment.end_node)?;

    let along = if segment.length > 0.0 {
        (distance / segment.length).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let t = if lane.flows_toward(false) { along } else { 1.0 - along };
    let mut position = start.lerp(&end, t);
    let offset = start.perpendicular_offset(&end, lane.offset);
    position.x += offset.x;
    position.z += offset.z;
    Some(position)
}

/// Picks the lane to take into the segment between `path[0]` and `path[1]`:
/// lowest tie-break distance, preferring lanes that can continue into the
/// segment after it. Relaxed transitions are a last resort for vehicles
/// exempt from lane arrows; arrow-bound vehicles get `None` instead.
pub fn choose_next_lane(
    routing: &RoutingManager,
    network: &SimRoadNetwork,
    lane: &LaneGeometry,
    path: &[NodeId],
) -> Option<LaneTransition> {
    let (&node, rest) = path.split_first()?;
    let &after = rest.first()?;
    let next_segment = network.find_segment_between(node, after).ok()?;
    let after_next = rest
        .get(1)
        .and_then(|n| network.find_segment_between(after, *n).ok());

    let entry = routing.lane_end_routing(LaneEndKey::new(lane.id, lane.flows_toward(true)))?;
    let candidates: Vec<LaneTransition> = entry.into_segment(next_segment).copied().collect();
    let strict: Vec<LaneTransition> = candidates
        .iter()
        .filter(|t| t.kind != TransitionKind::Relaxed)
        .copied()
        .collect();
    // Arrow-bound vehicles never take a transition against their arrows
    let arrow_bound = lane.vehicle_types.intersects(ARROW_VEHICLE_TYPES);
    let pool = if strict.is_empty() && !arrow_bound {
        candidates
    } else {
        strict
    };

    pool.into_iter().min_by_key(|t| {
        let continues = after_next.is_none_or(|after| {
            network
                .lane(t.lane)
                .and_then(|l| routing.lane_end_routing(LaneEndKey::new(l.id, l.flows_toward(true))))
                .is_some_and(|e| e.into_segment(after).next().is_some())
        });
        (!continues, t.distance, t.lane_index)
    })
}
