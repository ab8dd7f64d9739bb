//! Simulation statistics

use log::info;

/// Counters collected while the world runs
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    pub total_vehicles_spawned: u32,
    pub total_vehicles_completed: u32,
    /// Vehicles removed before reaching their destination
    pub total_vehicles_failed: u32,
    /// Vehicles let through a junction because their wait budget ran out
    pub forced_leaves: u32,
    /// Junction evaluations in which a vehicle had to give way
    pub yield_decisions: u32,
    pub elapsed_time: f32,
}

impl SimulationStats {
    /// Share of finished trips that reached their destination, in percent
    pub fn success_rate(&self) -> f32 {
        let finished = self.total_vehicles_completed + self.total_vehicles_failed;
        if finished > 0 {
            (self.total_vehicles_completed as f32 / finished as f32) * 100.0
        } else {
            0.0
        }
    }

    pub fn log_summary(&self, active_vehicles: usize, nodes: usize, segments: usize, segments_rebuilt: u64) {
        info!("=== SIMULATION COMPLETE ===");
        info!("Elapsed time: {:.2}s", self.elapsed_time);
        info!("Total vehicles spawned: {}", self.total_vehicles_spawned);
        info!("Total vehicles completed: {}", self.total_vehicles_completed);
        info!("Total vehicles failed: {}", self.total_vehicles_failed);
        info!("Active vehicles: {}", active_vehicles);
        info!("Total nodes: {}", nodes);
        info!("Total segments: {}", segments);
        info!("Forced leaves: {}", self.forced_leaves);
        info!("Yield decisions: {}", self.yield_decisions);
        info!("Segment rebuilds: {}", segments_rebuilt);
        info!("Success rate: {:.1}%", self.success_rate());
    }
}
