//! Main simulation world that ties everything together
//!
//! Owns the in-memory host (road network, lane flags, clock), the routing
//! manager, the priority registry and the vehicles driving through them.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use rand::SeedableRng;
use std::collections::HashMap;

use super::clock::{SimClock, SimulationClock, VehicleSnapshot};
use super::geometry::GeometryProvider;
use super::lane_flags::SimLaneFlags;
use super::options::SimOptions;
use super::priority::PriorityRegistry;
use super::road_network::{SegmentSpec, SimRoadNetwork};
use super::routing::RoutingManager;
use super::stats::SimulationStats;
use super::transit::{JunctionTransitState, VehicleStateStore};
use super::types::{LaneArrows, LaneId, NodeId, Position, SegmentId, SignType, VehicleId};
use super::vehicle::{
    choose_next_lane, lane_position, LaneOccupancy, SimVehicle, VehicleContext, VehicleUpdateResult,
};

/// Spacing between grid nodes of the test world
const GRID_SPACING: f32 = 40.0;

/// The main simulation world
pub struct SimWorld {
    /// Road network for geometry and pathfinding
    pub road_network: SimRoadNetwork,

    /// Arrows, connectors and signs
    pub lane_flags: SimLaneFlags,

    pub routing: RoutingManager,
    pub priority: PriorityRegistry,
    pub states: VehicleStateStore,
    pub clock: SimClock,

    /// All vehicles
    pub vehicles: HashMap<VehicleId, SimVehicle>,
    pub occupancy: LaneOccupancy,

    pub options: SimOptions,
    pub stats: SimulationStats,

    /// Nodes vehicles are spawned at and sent to
    pub spawn_points: Vec<NodeId>,

    /// Vehicles spawned per simulated second
    pub spawn_rate: f32,
    spawn_budget: f32,

    /// Simulation time
    pub time: f32,

    next_vehicle: u32,
    free_vehicle_ids: Vec<VehicleId>,

    /// Optional seeded RNG for reproducible simulations
    rng: Option<StdRng>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    fn new_internal(options: SimOptions, left_hand_traffic: bool, rng: Option<StdRng>) -> Self {
        Self {
            road_network: SimRoadNetwork::with_left_hand_traffic(left_hand_traffic),
            lane_flags: SimLaneFlags::new(),
            routing: RoutingManager::new(options.routing),
            priority: PriorityRegistry::new(),
            states: VehicleStateStore::new(),
            clock: SimClock::new(),
            vehicles: HashMap::new(),
            occupancy: LaneOccupancy::default(),
            options,
            stats: SimulationStats::default(),
            spawn_points: Vec::new(),
            spawn_rate: 1.0,
            spawn_budget: 0.0,
            time: 0.0,
            next_vehicle: 0,
            free_vehicle_ids: Vec::new(),
            rng,
        }
    }

    pub fn new() -> Self {
        Self::new_internal(SimOptions::default(), false, None)
    }

    /// Create a new SimWorld with a seeded RNG for reproducible simulations
    pub fn new_with_seed(seed: u64) -> Self {
        Self::new_internal(SimOptions::default(), false, Some(StdRng::seed_from_u64(seed)))
    }

    pub fn with_options(options: SimOptions, left_hand_traffic: bool, seed: Option<u64>) -> Self {
        Self::new_internal(options, left_hand_traffic, seed.map(StdRng::seed_from_u64))
    }

    /// Get a random value in the given range, using seeded RNG if available
    fn random_range(&mut self, range: std::ops::Range<f32>) -> f32 {
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    /// Choose a random element from a slice, using seeded RNG if available
    fn choose_random<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            return None;
        }
        match &mut self.rng {
            Some(rng) => slice.choose(rng),
            None => slice.choose(&mut rand::rng()),
        }
    }

    fn allocate_vehicle_id(&mut self) -> Result<VehicleId> {
        if let Some(id) = self.free_vehicle_ids.pop() {
            return Ok(id);
        }
        let id = u16::try_from(self.next_vehicle).context("Vehicle ids exhausted")?;
        self.next_vehicle += 1;
        Ok(VehicleId(id))
    }

    /// Add a node to the world
    pub fn add_node(&mut self, position: Position) -> NodeId {
        self.road_network.add_node(position)
    }

    /// Add a segment; routing picks it up on the next tick
    pub fn add_segment(&mut self, start: NodeId, end: NodeId, spec: SegmentSpec) -> Result<SegmentId> {
        let id = self.road_network.add_segment(start, end, spec)?;
        self.sync_priority_at(start);
        self.sync_priority_at(end);
        Ok(id)
    }

    /// Remove a segment along with its flags, priority ends and the vehicles on it
    pub fn remove_segment(&mut self, segment: SegmentId) -> Result<()> {
        let (start, end) = {
            let seg = self
                .road_network
                .segment(segment)
                .context("Segment not found")?;
            (seg.start_node, seg.end_node)
        };

        let on_segment: Vec<VehicleId> = self
            .vehicles
            .values()
            .filter(|v| v.segment == segment || v.next.is_some_and(|n| n.segment == segment))
            .map(|v| v.id)
            .collect();

        let lanes = self.road_network.remove_segment(segment)?;
        self.lane_flags.remove_segment(segment, &lanes);
        self.priority.remove_segment(&mut self.states, segment);
        self.sync_priority_at(start);
        self.sync_priority_at(end);

        for id in on_segment {
            let stranded = self.vehicles.get(&id).is_some_and(|v| v.segment == segment);
            if stranded {
                self.stats.total_vehicles_failed += 1;
                self.despawn_vehicle(id);
            } else if let Some(vehicle) = self.vehicles.get_mut(&id) {
                vehicle.next = None;
            }
        }
        self.recalculate_vehicle_paths();
        Ok(())
    }

    /// Set the priority sign of a segment end and rebuild the node's priority ends
    pub fn set_sign(&mut self, segment: SegmentId, start_node: bool, sign: SignType) -> Result<()> {
        let node = self
            .road_network
            .segment(segment)
            .context("Segment not found")?
            .node(start_node);
        self.lane_flags.set_sign(segment, start_node, sign);
        self.sync_priority_at(node);
        Ok(())
    }

    pub fn set_lane_arrows(&mut self, lane: LaneId, arrows: LaneArrows) -> Result<()> {
        let segment = self.road_network.lane(lane).context("Lane not found")?.segment;
        self.lane_flags.set_lane_arrows(lane, arrows);
        self.routing.request_recalculation(segment, false);
        Ok(())
    }

    pub fn add_lane_connection(&mut self, source: LaneId, target: LaneId, start_node: bool) -> Result<()> {
        let segment = self
            .road_network
            .lane(source)
            .context("Source lane not found")?
            .segment;
        self.road_network
            .lane(target)
            .context("Target lane not found")?;
        if self.lane_flags.add_lane_connection(source, target, start_node) {
            self.routing.request_recalculation(segment, false);
        }
        Ok(())
    }

    fn sync_priority_at(&mut self, node: NodeId) {
        self.priority
            .sync_node(&self.road_network, &self.lane_flags, &mut self.states, node);
    }

    /// Spawn a vehicle at `from` heading for `to`
    pub fn spawn_vehicle(&mut self, from: NodeId, to: NodeId) -> Result<VehicleId> {
        if from == to {
            anyhow::bail!("Start and destination are the same node");
        }

        // Find the path
        let path = self
            .road_network
            .find_path(from, to)
            .context("No path found to destination")?;

        let first_target = *path.first().context("Empty path")?;
        let segment = self
            .road_network
            .find_segment_between(from, first_target)
            .context("No segment to first path node")?;

        // Prefer a lane that is routed into the segment after the first node
        let lanes = self.road_network.lanes_toward(segment, first_target);
        let lane = lanes
            .iter()
            .filter(|l| self.occupancy.has_space(l.id))
            .min_by_key(|l| {
                let routed =
                    path.len() < 2 || choose_next_lane(&self.routing, &self.road_network, l, &path).is_some();
                (!routed, l.similar_index)
            })
            .map(|l| l.id)
            .context("No free lane at spawn point")?;

        let position = lane_position(&self.road_network, lane, 0.0).context("Lane position not found")?;
        let max_speed = self.random_range(6.0..10.0);

        let id = self.allocate_vehicle_id()?;
        let vehicle = SimVehicle::new(id, max_speed, segment, lane, path, position);

        self.states.set_path_position(id, (segment, lane), None);
        self.states.reset_transit(id, self.clock.current_tick());
        self.occupancy.update(id, None, lane, OrderedFloat(0.0));
        self.clock
            .record(id, VehicleSnapshot::new(position, Position::default()));
        self.vehicles.insert(id, vehicle);
        self.stats.total_vehicles_spawned += 1;
        debug!("Spawned vehicle {:?} from {:?} to {:?}", id, from, to);
        Ok(id)
    }

    /// Remove a vehicle and everything that refers to it
    pub fn despawn_vehicle(&mut self, vehicle: VehicleId) {
        self.priority.unregister(&mut self.states, vehicle);
        self.states.remove(vehicle);
        self.occupancy.forget(vehicle);
        self.clock.forget(vehicle);
        if self.vehicles.remove(&vehicle).is_some() {
            self.free_vehicle_ids.push(vehicle);
        }
    }

    /// Recalculate paths for vehicles whose route may have disappeared
    fn recalculate_vehicle_paths(&mut self) {
        let mut ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        ids.sort();
        let mut stranded = Vec::new();

        for id in ids {
            let Some((current_target, destination)) = self
                .vehicles
                .get(&id)
                .and_then(|v| Some((*v.path.first()?, *v.path.last()?)))
            else {
                continue;
            };

            match self.road_network.find_path(current_target, destination) {
                Some(path) => {
                    if let Some(vehicle) = self.vehicles.get_mut(&id) {
                        let new_path: Vec<NodeId> = std::iter::once(current_target).chain(path).collect();
                        if new_path != vehicle.path {
                            vehicle.path = new_path;
                            vehicle.next = None;
                            self.states.reset_transit(id, self.clock.current_tick());
                        }
                    }
                }
                None => stranded.push(id),
            }
        }

        for id in stranded {
            self.stats.total_vehicles_failed += 1;
            self.despawn_vehicle(id);
        }
    }

    fn spawn_vehicles(&mut self, delta_secs: f32) {
        if self.spawn_points.len() < 2 {
            return;
        }
        self.spawn_budget += self.spawn_rate * delta_secs;
        while self.spawn_budget >= 1.0 {
            self.spawn_budget -= 1.0;
            let points = self.spawn_points.clone();
            let (Some(&from), Some(&to)) = (self.choose_random(&points), self.choose_random(&points)) else {
                return;
            };
            if from == to {
                continue;
            }
            if let Err(e) = self.spawn_vehicle(from, to) {
                debug!("Spawn from {:?} to {:?} skipped: {}", from, to, e);
            }
        }
    }

    /// Update all vehicles in the simulation
    fn update_vehicles(&mut self, delta_secs: f32) -> Vec<(VehicleId, VehicleUpdateResult)> {
        let mut results = Vec::new();

        // Collect vehicle IDs to avoid borrow issues; sorted for reproducible runs
        let mut ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        ids.sort();

        for id in ids {
            // Get vehicle mutably, update it, then process result
            let Some(mut vehicle) = self.vehicles.remove(&id) else {
                continue;
            };
            let result = {
                let mut ctx = VehicleContext {
                    network: &self.road_network,
                    flags: &self.lane_flags,
                    routing: &self.routing,
                    registry: &mut self.priority,
                    states: &mut self.states,
                    clock: &self.clock,
                    occupancy: &mut self.occupancy,
                    options: &self.options.priority,
                    stats: &mut self.stats,
                };
                vehicle.update(delta_secs, &mut ctx)
            };

            self.clock
                .record(id, VehicleSnapshot::new(vehicle.position, vehicle.velocity));
            self.vehicles.insert(id, vehicle);

            match result {
                Ok(VehicleUpdateResult::Continue) => {}
                Ok(other) => results.push((id, other)),
                Err(e) => {
                    warn!("Vehicle {:?} update failed: {}", id, e);
                    results.push((id, VehicleUpdateResult::Despawn));
                }
            }
        }

        results
    }

    /// Advance the simulation by one tick
    pub fn tick(&mut self, delta_secs: f32) {
        self.time += delta_secs;
        self.stats.elapsed_time = self.time;
        self.clock.advance();

        for event in self.road_network.drain_events() {
            self.routing.on_geometry_event(event);
        }
        self.routing
            .simulation_step(&self.road_network, &self.lane_flags);

        self.spawn_vehicles(delta_secs);

        for (id, result) in self.update_vehicles(delta_secs) {
            match result {
                VehicleUpdateResult::Arrived => self.stats.total_vehicles_completed += 1,
                VehicleUpdateResult::Despawn => self.stats.total_vehicles_failed += 1,
                VehicleUpdateResult::Continue => continue,
            }
            self.despawn_vehicle(id);
        }
    }

    /// Create a default test world: a 3x3 grid with a signed centre node
    pub fn create_test_world() -> Self {
        Self::build_test_world(SimWorld::new())
    }

    /// Create a default test world with a seeded RNG for reproducible simulations
    pub fn create_test_world_with_seed(seed: u64) -> Self {
        Self::build_test_world(SimWorld::new_with_seed(seed))
    }

    /// Internal helper to build the test world structure.
    ///
    /// Two-lane-per-direction roads connect a 3x3 grid. The centre node has a
    /// main road running north-south and stop signs on the east-west approaches.
    /// Border nodes are spawn points.
    pub fn build_test_world(mut world: SimWorld) -> Self {
        let mut grid = [[NodeId(0); 3]; 3];

        for (row, nodes) in grid.iter_mut().enumerate() {
            for (col, node) in nodes.iter_mut().enumerate() {
                let x = (col as f32 - 1.0) * GRID_SPACING;
                let z = (row as f32 - 1.0) * GRID_SPACING;
                *node = world.add_node(Position::new(x, 0.0, z));
            }
        }

        // Connect grid horizontally
        for row in 0..3 {
            for col in 0..2 {
                if let Err(e) = world.add_segment(grid[row][col], grid[row][col + 1], SegmentSpec::two_way(2, 2)) {
                    warn!("Failed to add test world segment: {}", e);
                }
            }
        }

        // Connect grid vertically
        for row in 0..2 {
            for col in 0..3 {
                if let Err(e) = world.add_segment(grid[row][col], grid[row + 1][col], SegmentSpec::two_way(2, 2)) {
                    warn!("Failed to add test world segment: {}", e);
                }
            }
        }

        let centre = grid[1][1];
        let approaches: Vec<(SegmentId, bool, bool)> = world
            .road_network
            .node(centre)
            .map(|node| {
                node.segment_ids()
                    .filter_map(|s| {
                        let seg = world.road_network.segment(s)?;
                        let start = seg.end_at(centre)?;
                        let other = world.road_network.node_position(seg.node(!start))?;
                        let vertical = other.x.abs() < f32::EPSILON;
                        Some((s, start, vertical))
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (segment, start, vertical) in approaches {
            let sign = if vertical { SignType::Main } else { SignType::Stop };
            if let Err(e) = world.set_sign(segment, start, sign) {
                warn!("Failed to sign test world approach: {}", e);
            }
        }

        world.spawn_points = grid
            .iter()
            .flatten()
            .copied()
            .filter(|node| *node != centre)
            .collect();

        world
    }

    /// Log a summary of the world state
    pub fn log_summary(&self) {
        self.stats.log_summary(
            self.vehicles.len(),
            self.road_network.node_count(),
            self.road_network.segment_count(),
            self.routing.segments_rebuilt(),
        );
    }

    /// Log a short progress line
    pub fn log_progress(&self) {
        info!(
            "t={:.1}s vehicles={} completed={} failed={} waiting={}",
            self.time,
            self.vehicles.len(),
            self.stats.total_vehicles_completed,
            self.stats.total_vehicles_failed,
            self.states
                .iter()
                .filter(|s| s.transit_state == JunctionTransitState::Stop)
                .count()
        );
    }
}
