//! Junction lane routing and right-of-way simulation
//!
//! The routing core (`routing`, `lane_routing`) precomputes the legal lane
//! transitions at every segment end. The priority core (`priority`,
//! `right_of_way`, `transit`) decides at signed junctions which vehicle may
//! enter. Both read the host through the [`GeometryProvider`],
//! [`LaneFlagsStore`] and [`SimulationClock`] traits; [`SimWorld`] is an
//! in-memory host that drives vehicles through them.

mod clock;
mod error;
mod geometry;
mod lane_flags;
mod lane_routing;
mod options;
mod priority;
mod right_of_way;
mod road_network;
mod routing;
mod stats;
mod transit;
mod types;
mod vehicle;
mod world;

// Re-export public types for external use
// These may not be used within this crate but are part of the public API
#[allow(unused_imports)]
pub use clock::{SimClock, SimulationClock, VehicleSnapshot};
#[allow(unused_imports)]
pub use error::{RoutingError, RoutingResult};
#[allow(unused_imports)]
pub use geometry::{
    GeometryEvent, GeometryProvider, LaneGeometry, NodeFlags, NodeGeometry, SegmentEndGeometry,
    SegmentGeometry,
};
#[allow(unused_imports)]
pub use lane_flags::{LaneFlagsStore, SimLaneFlags};
#[allow(unused_imports)]
pub use options::{PriorityOptions, RoutingOptions, SimOptions, SimulationAccuracy};
#[allow(unused_imports)]
pub use priority::{PriorityRegistry, PrioritySegmentEnd, RegisteredVehicles};
#[allow(unused_imports)]
pub use right_of_way::{PathPosition, RightOfWay};
#[allow(unused_imports)]
pub use road_network::{LaneSpec, SegmentEdge, SegmentSpec, SimRoadNetwork, LANE_WIDTH};
#[allow(unused_imports)]
pub use routing::{
    DirtySegments, DrainedSegments, LaneEndRouting, LaneTransition, RoutingManager, RoutingTable,
    SegmentRouting, SegmentRoutingSummary, TransitionKind, Transitions,
};
#[allow(unused_imports)]
pub use stats::SimulationStats;
#[allow(unused_imports)]
pub use transit::{
    next_transit_state, JunctionTransitState, TransitDecision, TransitInput, VehicleState,
    VehicleStateStore,
};
#[allow(unused_imports)]
pub use types::{
    ArrowDirection, LaneArrows, LaneDirection, LaneEndKey, LaneId, LaneTypes, NetworkService,
    NodeId, Position, SegmentEndId, SegmentId, SignType, VehicleId, VehicleTypes,
    ARROW_VEHICLE_TYPES, INCOMPATIBLE_LANE_DISTANCE, JUNCTION_APPROACH_DISTANCE,
    MAX_SEGMENTS_PER_NODE, MAX_TRANSITIONS, ROUTED_LANE_TYPES, ROUTED_VEHICLE_TYPES,
    SAFE_FOLLOWING_MULTIPLIER, STOP_LINE_GAP, TRANSIT_WINDOW_SHIFT, UTURN_LANE_DISTANCE,
    VEHICLE_LENGTH,
};
#[allow(unused_imports)]
pub use vehicle::{
    choose_next_lane, lane_position, LaneOccupancy, SimVehicle, VehicleContext,
    VehicleUpdateResult,
};
pub use world::SimWorld;
