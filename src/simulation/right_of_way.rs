//! Right-of-way arbitration at signed junctions
//!
//! Movements are compared on a normalised four-arm junction: the vehicle
//! asking is always placed on the south arm, every other approach is mapped to
//! west, north or east by its direction relative to that vehicle. Left-hand
//! traffic is mirrored into the same right-hand picture.

use log::{debug, warn};

use super::clock::SimulationClock;
use super::error::RoutingError;
use super::geometry::GeometryProvider;
use super::lane_flags::LaneFlagsStore;
use super::options::PriorityOptions;
use super::priority::{PriorityRegistry, PrioritySegmentEnd};
use super::routing::RoutingManager;
use super::transit::{JunctionTransitState, VehicleStateStore};
use super::types::{
    ArrowDirection, LaneId, NodeId, Position, SegmentEndId, SegmentId, SignType, VehicleId,
    TRANSIT_WINDOW_SHIFT,
};

/// A vehicle's place on its path: segment and lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathPosition {
    pub segment: SegmentId,
    pub lane: LaneId,
}

impl PathPosition {
    pub fn new(segment: SegmentId, lane: LaneId) -> Self {
        Self { segment, lane }
    }
}

const ARM_NORTH: usize = 0;
const ARM_EAST: usize = 1;
const ARM_SOUTH: usize = 2;
const ARM_WEST: usize = 3;

/// A movement through the normalised junction
#[derive(Debug, Clone, Copy, PartialEq)]
struct Movement {
    arm: usize,
    direction: ArrowDirection,
    next_lane: Option<LaneId>,
    /// Inner similar index of the lane the movement ends in
    next_inner: Option<u8>,
}

/// Arm a vehicle leaves through when it arrives on `arm` and turns `direction`
fn exit_arm(arm: usize, direction: ArrowDirection) -> Option<usize> {
    match direction {
        ArrowDirection::Forward => Some((arm + 2) % 4),
        ArrowDirection::Left => Some((arm + 1) % 4),
        ArrowDirection::Right => Some((arm + 3) % 4),
        ArrowDirection::Turn => Some(arm),
        ArrowDirection::None => None,
    }
}

/// Arm of an approach seen from a vehicle on the south arm
fn approach_arm(incoming: ArrowDirection) -> Option<usize> {
    match incoming {
        ArrowDirection::Left => Some(ARM_WEST),
        ArrowDirection::Forward => Some(ARM_NORTH),
        ArrowDirection::Right => Some(ARM_EAST),
        ArrowDirection::Turn | ArrowDirection::None => None,
    }
}

/// Whether two chords of the junction circle cross. Points are numbered
/// clockwise: arm `k` has its entry at `2k` and its exit at `2k + 1`.
fn chords_cross(a: (usize, usize), b: (usize, usize)) -> bool {
    let (low, high) = (a.0.min(a.1), a.0.max(a.1));
    let inside = |p: usize| low < p && p < high;
    inside(b.0) != inside(b.1)
}

fn movements_conflict(target: &Movement, candidate: &Movement) -> bool {
    let (Some(target_exit), Some(candidate_exit)) = (
        exit_arm(target.arm, target.direction),
        exit_arm(candidate.arm, candidate.direction),
    ) else {
        return true;
    };

    if target_exit != candidate_exit {
        return chords_cross(
            (2 * target.arm, 2 * target_exit + 1),
            (2 * candidate.arm, 2 * candidate_exit + 1),
        );
    }

    // Same exit: fine only if both keep their side of the target segment
    let (Some(target_lane), Some(candidate_lane)) = (target.next_lane, candidate.next_lane) else {
        return true;
    };
    if target_lane == candidate_lane {
        return true;
    }
    let (Some(target_inner), Some(candidate_inner)) = (target.next_inner, candidate.next_inner) else {
        return true;
    };
    let exit_point = 2 * target_exit + 1;
    let bias = |arm: usize| (2 * arm + 8 - exit_point) % 8;
    let (left_inner, right_inner) = match bias(target.arm).cmp(&bias(candidate.arm)) {
        std::cmp::Ordering::Less => (candidate_inner, target_inner),
        std::cmp::Ordering::Greater => (target_inner, candidate_inner),
        std::cmp::Ordering::Equal => return true,
    };
    left_inner >= right_inner
}

/// Same-class precedence: straight before right, right before left, U-turns last
fn direction_rank(direction: ArrowDirection) -> u8 {
    match direction {
        ArrowDirection::Forward | ArrowDirection::None => 0,
        ArrowDirection::Right => 1,
        ArrowDirection::Left => 2,
        ArrowDirection::Turn => 3,
    }
}

/// Whether the target keeps its right of way over a conflicting candidate
/// arriving from `incoming`
fn target_has_priority(
    target_sign: SignType,
    candidate_sign: SignType,
    target_direction: ArrowDirection,
    candidate_direction: ArrowDirection,
    incoming: ArrowDirection,
) -> bool {
    match (target_sign.is_main_class(), candidate_sign.is_main_class()) {
        (true, false) => return true,
        (false, true) => return false,
        _ => {}
    }
    match direction_rank(target_direction).cmp(&direction_rank(candidate_direction)) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => incoming != ArrowDirection::Right,
    }
}

/// Read-only view of everything the arbitrator consults
pub struct RightOfWay<'a, G: ?Sized, F: ?Sized, C: ?Sized> {
    pub geometry: &'a G,
    pub flags: &'a F,
    pub clock: &'a C,
    pub routing: &'a RoutingManager,
    pub registry: &'a PriorityRegistry,
    pub states: &'a VehicleStateStore,
    pub options: &'a PriorityOptions,
}

/// The asking vehicle, resolved against the junction it is about to cross
struct TargetContext {
    vehicle: VehicleId,
    node: NodeId,
    node_position: Position,
    sign: SignType,
    movement: Movement,
    eta: Option<f32>,
    tick: u64,
    left_hand_traffic: bool,
}

impl<'a, G, F, C> RightOfWay<'a, G, F, C>
where
    G: GeometryProvider + ?Sized,
    F: LaneFlagsStore + ?Sized,
    C: SimulationClock + ?Sized,
{
    /// True when a vehicle with higher priority is approaching the junction
    /// the target is about to cross from `current` into `next`
    pub fn has_incoming_vehicles_with_higher_priority(
        &self,
        target: VehicleId,
        current: PathPosition,
        next: PathPosition,
    ) -> bool {
        let Some(lane) = self.geometry.lane(current.lane) else {
            warn!("{}", RoutingError::InvalidLane(current.lane));
            return true;
        };
        let Some(segment) = self.geometry.segment(current.segment) else {
            warn!("{}", RoutingError::InvalidSegment(current.segment));
            return true;
        };
        let start_node = lane.flows_toward(true);
        let node_id = segment.node(start_node);
        let Some(node) = self.geometry.node(node_id) else {
            warn!("{}", RoutingError::InvalidNode(node_id));
            return true;
        };

        if node.flags.traffic_light || self.flags.timed_light_active(node_id) {
            return false;
        }
        let Some(target_end) = self.registry.get(current.segment, start_node) else {
            return false;
        };

        let left_hand_traffic = self.geometry.left_hand_traffic();
        let target_direction = self
            .geometry
            .direction(current.segment, next.segment, node_id)
            .drive_relative(left_hand_traffic);
        let eta = if self.options.accuracy.uses_timing() {
            self.clock
                .vehicle_snapshot(target)
                .map(|s| self.eta(s.position.distance(&node.position), s.speed()))
        } else {
            None
        };

        let ctx = TargetContext {
            vehicle: target,
            node: node_id,
            node_position: node.position,
            sign: target_end.sign,
            movement: Movement {
                arm: ARM_SOUTH,
                direction: target_direction,
                next_lane: Some(next.lane),
                next_inner: self
                    .geometry
                    .lane(next.lane)
                    .map(|l| l.inner_similar_index(left_hand_traffic)),
            },
            eta,
            tick: self.clock.current_tick(),
            left_hand_traffic,
        };

        for other in node.segment_ids() {
            if other == current.segment {
                continue;
            }
            let Some(other_start) = self.geometry.segment(other).and_then(|s| s.end_at(node_id)) else {
                continue;
            };
            let outgoing = self
                .routing
                .get_segment_routing_summary(other)
                .map(|s| s.outgoing_one_way(other_start))
                .unwrap_or_else(|| self.geometry.is_outgoing_one_way(other, other_start));
            if outgoing {
                continue;
            }
            let Some(end) = self.registry.get(other, other_start) else {
                continue;
            };
            let incoming = self
                .geometry
                .direction(current.segment, other, node_id)
                .drive_relative(left_hand_traffic);
            let Some(arm) = approach_arm(incoming) else {
                continue;
            };

            let blocking = self
                .registry
                .vehicles(self.states, SegmentEndId::new(other, other_start))
                .filter(|v| *v != target)
                .any(|v| self.candidate_blocks(&ctx, end, arm, incoming, v));
            if blocking {
                return true;
            }
        }

        false
    }

    fn eta(&self, distance: f32, speed: f32) -> f32 {
        distance / speed.max(self.options.min_eta_speed)
    }

    fn candidate_blocks(
        &self,
        ctx: &TargetContext,
        end: &PrioritySegmentEnd,
        arm: usize,
        incoming: ArrowDirection,
        candidate: VehicleId,
    ) -> bool {
        let Some(state) = self.states.get(candidate).filter(|s| s.valid) else {
            debug!("Skipping candidate: {}", RoutingError::MissingRegistryEntry(candidate));
            return false;
        };
        if state.transit_state == JunctionTransitState::Leave
            && state.transit_tick >> TRANSIT_WINDOW_SHIFT == ctx.tick >> TRANSIT_WINDOW_SHIFT
        {
            return false;
        }
        let Some(snapshot) = self.clock.vehicle_snapshot(candidate) else {
            debug!("Skipping candidate: {}", RoutingError::MissingRegistryEntry(candidate));
            return false;
        };

        let to_node = ctx.node_position.sub(&snapshot.position);
        let heading = snapshot.velocity.dot(&to_node);
        if heading < 0.0 || (heading <= 0.0 && snapshot.speed() > self.options.blocked_speed) {
            return false;
        }

        if let Some(target_eta) = ctx.eta {
            let eta = self.eta(to_node.length(), snapshot.speed());
            if (eta - target_eta).abs() > self.options.eta_threshold_secs {
                return false;
            }
        }

        let direction = state
            .next_segment
            .map(|next| {
                self.geometry
                    .direction(end.segment, next, ctx.node)
                    .drive_relative(ctx.left_hand_traffic)
            })
            .unwrap_or(ArrowDirection::None);
        let movement = Movement {
            arm,
            direction,
            next_lane: state.next_lane,
            next_inner: state
                .next_lane
                .and_then(|l| self.geometry.lane(l))
                .map(|l| l.inner_similar_index(ctx.left_hand_traffic)),
        };

        if !movements_conflict(&ctx.movement, &movement) {
            return false;
        }
        let yields = !target_has_priority(ctx.sign, end.sign, ctx.movement.direction, direction, incoming);
        if yields {
            debug!(
                "Vehicle {:?} yields to {:?} at {:?}",
                ctx.vehicle, candidate, ctx.node
            );
        }
        yields
    }
}
