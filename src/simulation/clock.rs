//! Simulation clock: tick counter and last-frame vehicle kinematics

use std::collections::HashMap;

use super::types::{Position, VehicleId};

/// Position and velocity of a vehicle as of the last completed frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleSnapshot {
    pub position: Position,
    /// Velocity in world units per second
    pub velocity: Position,
}

impl VehicleSnapshot {
    pub fn new(position: Position, velocity: Position) -> Self {
        Self { position, velocity }
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }
}

/// Read access to the host clock
pub trait SimulationClock {
    fn current_tick(&self) -> u64;

    fn vehicle_snapshot(&self, vehicle: VehicleId) -> Option<VehicleSnapshot>;
}

/// In-memory clock fed by the world after each vehicle update
#[derive(Debug, Default, Clone)]
pub struct SimClock {
    tick: u64,
    snapshots: HashMap<VehicleId, VehicleSnapshot>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances to the next tick and returns it
    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn record(&mut self, vehicle: VehicleId, snapshot: VehicleSnapshot) {
        self.snapshots.insert(vehicle, snapshot);
    }

    pub fn forget(&mut self, vehicle: VehicleId) {
        self.snapshots.remove(&vehicle);
    }
}

impl SimulationClock for SimClock {
    fn current_tick(&self) -> u64 {
        self.tick
    }

    fn vehicle_snapshot(&self, vehicle: VehicleId) -> Option<VehicleSnapshot> {
        self.snapshots.get(&vehicle).copied()
    }
}
