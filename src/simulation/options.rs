//! Simulation options
//!
//! Toggles and budgets read by the routing builder and the junction logic.
//! The binary maps its command line onto these.

/// How much work the arbitrator spends per candidate vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulationAccuracy {
    /// Skip time-to-node estimates; every approaching vehicle is considered
    Low,
    /// Ignore candidates whose arrival time differs too much from the target's
    #[default]
    High,
}

impl SimulationAccuracy {
    pub fn uses_timing(self) -> bool {
        matches!(self, SimulationAccuracy::High)
    }
}

/// Options for the lane-end routing builder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingOptions {
    /// Apply relaxed lane discipline at simple one-way highway junctions
    pub highway_rules: bool,
    /// Default for junctions without an explicit lane-changing restriction
    pub lane_change_straight: bool,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            highway_rules: true,
            lane_change_straight: false,
        }
    }
}

/// Options for right-of-way arbitration and the transit state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityOptions {
    pub accuracy: SimulationAccuracy,
    /// Arrival-time difference (seconds) beyond which two vehicles never conflict
    pub eta_threshold_secs: f32,
    /// Ticks a vehicle waits at a sign before it is let through regardless
    pub max_wait_ticks: u32,
    /// Ticks a vehicle must stand at a stop sign before it may leave
    pub min_stop_ticks: u32,
    /// Ticks a leaving vehicle may stand still before it counts as blocked
    pub blocked_grace_ticks: u64,
    /// Speed below which a leaving vehicle is considered stalled
    pub blocked_speed: f32,
    /// Speed used for arrival estimates of (nearly) stationary vehicles
    pub min_eta_speed: f32,
}

impl Default for PriorityOptions {
    fn default() -> Self {
        Self {
            accuracy: SimulationAccuracy::High,
            eta_threshold_secs: 5.0,
            max_wait_ticks: 300,
            min_stop_ticks: 10,
            blocked_grace_ticks: 20,
            blocked_speed: 0.1,
            min_eta_speed: 1.0,
        }
    }
}

/// All options of the simulation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimOptions {
    pub routing: RoutingOptions,
    pub priority: PriorityOptions,
}
