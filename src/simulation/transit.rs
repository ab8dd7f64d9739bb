//! Junction-transit state of each vehicle
//!
//! The state machine itself is a pure function ([`next_transit_state`]); the
//! store applies its decisions and keeps the per-vehicle path position the
//! arbitrator reads.

use super::options::PriorityOptions;
use super::types::{LaneId, SegmentEndId, SegmentId, SignType, VehicleId};

/// Where a vehicle is in crossing the junction ahead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JunctionTransitState {
    #[default]
    None,
    /// Reached the junction approach, not yet decided
    Enter,
    /// Waiting at the stop line
    Stop,
    /// Cleared to cross
    Leave,
    /// Cleared but stalled inside the approach
    Blocked,
}

/// Per-vehicle state shared by the arbitrator and the transit tracker
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub vehicle: VehicleId,
    /// Set once the vehicle has a path position
    pub valid: bool,
    pub transit_state: JunctionTransitState,
    /// Tick of the last transit state change
    pub transit_tick: u64,
    pub wait_ticks: u32,
    pub current_segment: Option<SegmentId>,
    pub current_lane: Option<LaneId>,
    pub next_segment: Option<SegmentId>,
    pub next_lane: Option<LaneId>,
    /// Priority segment end this vehicle is registered at
    pub registered_end: Option<SegmentEndId>,
    /// Next vehicle registered at the same segment end
    pub next_on_end: Option<VehicleId>,
}

impl VehicleState {
    pub fn new(vehicle: VehicleId) -> Self {
        Self {
            vehicle,
            valid: false,
            transit_state: JunctionTransitState::None,
            transit_tick: 0,
            wait_ticks: 0,
            current_segment: None,
            current_lane: None,
            next_segment: None,
            next_lane: None,
            registered_end: None,
            next_on_end: None,
        }
    }

    /// Arbitration is only needed while the vehicle is deciding
    pub fn needs_arbitration(&self) -> bool {
        matches!(
            self.transit_state,
            JunctionTransitState::Enter | JunctionTransitState::Stop
        )
    }
}

/// Observations the transit state machine decides on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitInput {
    pub tick: u64,
    /// Sign of the approach the vehicle arrives through
    pub sign: SignType,
    /// A vehicle with higher priority is approaching
    pub must_yield: bool,
    /// The next lane has room for the vehicle
    pub has_space: bool,
    pub speed: f32,
}

/// Result of one state machine evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitDecision {
    pub state: JunctionTransitState,
    pub wait_ticks: u32,
    /// The wait budget ran out and the vehicle was let through
    pub forced: bool,
}

impl TransitDecision {
    fn to(state: JunctionTransitState, wait_ticks: u32) -> Self {
        Self {
            state,
            wait_ticks,
            forced: false,
        }
    }

    /// Whether the vehicle may drive past the stop line
    pub fn may_proceed(&self) -> bool {
        self.state == JunctionTransitState::Leave
    }
}

/// Evaluates one step of the junction-transit state machine
pub fn next_transit_state(
    state: &VehicleState,
    input: &TransitInput,
    options: &PriorityOptions,
) -> TransitDecision {
    match state.transit_state {
        JunctionTransitState::None | JunctionTransitState::Blocked => {
            TransitDecision::to(JunctionTransitState::Enter, 0)
        }
        JunctionTransitState::Enter => {
            if !input.has_space || input.sign == SignType::Stop || input.must_yield {
                TransitDecision::to(JunctionTransitState::Stop, 0)
            } else {
                TransitDecision::to(JunctionTransitState::Leave, 0)
            }
        }
        JunctionTransitState::Stop => {
            let wait = state.wait_ticks.saturating_add(1);
            if !input.has_space {
                TransitDecision::to(JunctionTransitState::Stop, wait)
            } else if wait >= options.max_wait_ticks {
                TransitDecision {
                    state: JunctionTransitState::Leave,
                    wait_ticks: wait,
                    forced: true,
                }
            } else if input.sign == SignType::Stop && wait < options.min_stop_ticks {
                TransitDecision::to(JunctionTransitState::Stop, wait)
            } else if input.must_yield {
                TransitDecision::to(JunctionTransitState::Stop, wait)
            } else {
                TransitDecision::to(JunctionTransitState::Leave, wait)
            }
        }
        JunctionTransitState::Leave => {
            let stalled_for = input.tick.saturating_sub(state.transit_tick);
            if input.speed < options.blocked_speed && stalled_for >= options.blocked_grace_ticks {
                TransitDecision::to(JunctionTransitState::Blocked, state.wait_ticks)
            } else {
                TransitDecision::to(JunctionTransitState::Leave, state.wait_ticks)
            }
        }
    }
}

/// Arena of vehicle states indexed by vehicle id
#[derive(Debug, Default, Clone)]
pub struct VehicleStateStore {
    states: Vec<Option<VehicleState>>,
}

impl VehicleStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vehicle: VehicleId) -> Option<&VehicleState> {
        self.states.get(vehicle.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, vehicle: VehicleId) -> Option<&mut VehicleState> {
        self.states.get_mut(vehicle.index()).and_then(Option::as_mut)
    }

    /// Returns the vehicle's state, creating it on first use
    pub fn get_or_create(&mut self, vehicle: VehicleId) -> &mut VehicleState {
        if self.states.len() <= vehicle.index() {
            self.states.resize(vehicle.index() + 1, None);
        }
        self.states[vehicle.index()].get_or_insert_with(|| VehicleState::new(vehicle))
    }

    /// Drops the vehicle's state; the caller unregisters it first
    pub fn remove(&mut self, vehicle: VehicleId) -> Option<VehicleState> {
        self.states.get_mut(vehicle.index()).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleState> {
        self.states.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the vehicle's current and planned lane; the state becomes valid
    pub fn set_path_position(
        &mut self,
        vehicle: VehicleId,
        current: (SegmentId, LaneId),
        next: Option<(SegmentId, LaneId)>,
    ) {
        let state = self.get_or_create(vehicle);
        state.valid = true;
        state.current_segment = Some(current.0);
        state.current_lane = Some(current.1);
        state.next_segment = next.map(|n| n.0);
        state.next_lane = next.map(|n| n.1);
    }

    /// Back to `None`, as on a new path segment or a fresh path-find
    pub fn reset_transit(&mut self, vehicle: VehicleId, tick: u64) {
        if let Some(state) = self.get_mut(vehicle) {
            state.transit_state = JunctionTransitState::None;
            state.transit_tick = tick;
            state.wait_ticks = 0;
        }
    }

    /// Applies a state machine decision
    pub fn apply(&mut self, vehicle: VehicleId, decision: TransitDecision, tick: u64) {
        let state = self.get_or_create(vehicle);
        if state.transit_state != decision.state {
            state.transit_tick = tick;
        }
        state.transit_state = decision.state;
        state.wait_ticks = decision.wait_ticks;
    }
}
