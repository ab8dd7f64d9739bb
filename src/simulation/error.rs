//! Error taxonomy of the routing and arbitration core.
//!
//! None of these escape into the host loop: the routing manager and the
//! arbitrator log them and recover where they are detected.

use thiserror::Error;

use super::types::{LaneEndKey, LaneId, NodeId, SegmentId, VehicleId};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("segment {0:?} is not valid")]
    InvalidSegment(SegmentId),

    #[error("node {0:?} is not valid")]
    InvalidNode(NodeId),

    #[error("lane {0:?} is not valid")]
    InvalidLane(LaneId),

    #[error("more than {capacity} transitions for lane end {key:?}")]
    CapacityOverflow { key: LaneEndKey, capacity: usize },

    #[error("vehicle {0:?} has no valid registry entry")]
    MissingRegistryEntry(VehicleId),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
