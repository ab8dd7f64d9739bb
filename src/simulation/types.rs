//! Core types for the junction simulation
//!
//! Identifiers, capability masks and direction enums shared by the routing
//! builder, the right-of-way arbitrator and the transit state tracker.

use std::ops::{BitAnd, BitOr, BitOrAssign};

/// A wrapper type for segment IDs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u16);

/// A wrapper type for node IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u16);

/// A wrapper type for lane IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneId(pub u32);

/// A wrapper type for vehicle IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(pub u16);

impl SegmentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl LaneId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl VehicleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One end of a segment: the segment plus whether it is the start node side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentEndId {
    pub segment: SegmentId,
    pub start_node: bool,
}

impl SegmentEndId {
    pub fn new(segment: SegmentId, start_node: bool) -> Self {
        Self {
            segment,
            start_node,
        }
    }
}

/// Key of a lane end in the routing table: lane id times two plus the end selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneEndKey(pub u32);

impl LaneEndKey {
    pub fn new(lane: LaneId, start_node: bool) -> Self {
        Self(lane.0 * 2 + u32::from(start_node))
    }

    pub fn lane(self) -> LaneId {
        LaneId(self.0 / 2)
    }

    pub fn start_node(self) -> bool {
        self.0 % 2 == 1
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A position (or a velocity) in the simulation plane
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    pub fn sub(&self, other: &Position) -> Position {
        Position::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(&self, factor: f32) -> Position {
        Position::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn dot(&self, other: &Position) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Signed turn angle in the XZ plane from heading `self` to heading `other`.
    /// Positive values turn left (counter-clockwise seen from above).
    pub fn turn_angle_to(&self, other: &Position) -> f32 {
        let cross = self.x * other.z - self.z * other.x;
        let dot = self.x * other.x + self.z * other.z;
        cross.atan2(dot)
    }

    /// Perpendicular offset to the right of the direction from `self` to `other`
    pub fn perpendicular_offset(&self, other: &Position, offset: f32) -> Position {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        let len = (dx * dx + dz * dz).sqrt();
        if len > 0.0 {
            Position {
                x: dz / len * offset,
                y: 0.0,
                z: -dx / len * offset,
            }
        } else {
            Position::default()
        }
    }
}

/// Travel direction of a lane relative to its segment's start→end orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneDirection {
    Forward,
    Backward,
}

/// Network service class of a segment; routing never crosses classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkService {
    #[default]
    Road,
    Rail,
    Monorail,
}

/// Classified turning direction at a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrowDirection {
    None,
    Left,
    Forward,
    Right,
    Turn,
}

impl ArrowDirection {
    /// Swaps left and right; used to express left-hand traffic in right-hand terms
    pub fn mirrored(self) -> Self {
        match self {
            ArrowDirection::Left => ArrowDirection::Right,
            ArrowDirection::Right => ArrowDirection::Left,
            other => other,
        }
    }

    /// Returns the mirrored direction when `left_hand_traffic` is set
    pub fn drive_relative(self, left_hand_traffic: bool) -> Self {
        if left_hand_traffic {
            self.mirrored()
        } else {
            self
        }
    }

    /// The lane arrow that permits this direction, if any
    pub fn arrow(self) -> LaneArrows {
        match self {
            ArrowDirection::Left => LaneArrows::LEFT,
            ArrowDirection::Forward => LaneArrows::FORWARD,
            ArrowDirection::Right => LaneArrows::RIGHT,
            ArrowDirection::None | ArrowDirection::Turn => LaneArrows::NONE,
        }
    }
}

/// Junction-approach priority sign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignType {
    #[default]
    None,
    Main,
    Yield,
    Stop,
}

impl SignType {
    /// Main and unsigned approaches share the higher priority class
    pub fn is_main_class(self) -> bool {
        matches!(self, SignType::None | SignType::Main)
    }
}

/// Per-lane arrow bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaneArrows(pub u8);

impl LaneArrows {
    pub const NONE: LaneArrows = LaneArrows(0);
    pub const LEFT: LaneArrows = LaneArrows(1);
    pub const FORWARD: LaneArrows = LaneArrows(2);
    pub const RIGHT: LaneArrows = LaneArrows(4);
    pub const LEFT_FORWARD_RIGHT: LaneArrows = LaneArrows(7);

    pub fn contains(self, other: LaneArrows) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for LaneArrows {
    type Output = LaneArrows;

    fn bitor(self, rhs: LaneArrows) -> LaneArrows {
        LaneArrows(self.0 | rhs.0)
    }
}

impl BitOrAssign for LaneArrows {
    fn bitor_assign(&mut self, rhs: LaneArrows) {
        self.0 |= rhs.0;
    }
}

/// Vehicle capability mask of a lane (which vehicle kinds may use it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VehicleTypes(pub u16);

impl VehicleTypes {
    pub const NONE: VehicleTypes = VehicleTypes(0);
    pub const CAR: VehicleTypes = VehicleTypes(1);
    pub const TRAM: VehicleTypes = VehicleTypes(2);
    pub const TRAIN: VehicleTypes = VehicleTypes(4);
    pub const MONORAIL: VehicleTypes = VehicleTypes(8);
    pub const BICYCLE: VehicleTypes = VehicleTypes(16);

    pub fn intersects(self, other: VehicleTypes) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for VehicleTypes {
    type Output = VehicleTypes;

    fn bitor(self, rhs: VehicleTypes) -> VehicleTypes {
        VehicleTypes(self.0 | rhs.0)
    }
}

impl BitAnd for VehicleTypes {
    type Output = VehicleTypes;

    fn bitand(self, rhs: VehicleTypes) -> VehicleTypes {
        VehicleTypes(self.0 & rhs.0)
    }
}

/// Lane-type mask (what kind of traffic a lane carries)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LaneTypes(pub u8);

impl LaneTypes {
    pub const NONE: LaneTypes = LaneTypes(0);
    pub const VEHICLE: LaneTypes = LaneTypes(1);
    pub const TRANSPORT_VEHICLE: LaneTypes = LaneTypes(2);
    pub const PEDESTRIAN: LaneTypes = LaneTypes(4);
    pub const PARKING: LaneTypes = LaneTypes(8);

    pub fn intersects(self, other: LaneTypes) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for LaneTypes {
    type Output = LaneTypes;

    fn bitor(self, rhs: LaneTypes) -> LaneTypes {
        LaneTypes(self.0 | rhs.0)
    }
}

impl BitAnd for LaneTypes {
    type Output = LaneTypes;

    fn bitand(self, rhs: LaneTypes) -> LaneTypes {
        LaneTypes(self.0 & rhs.0)
    }
}

/// Lane types the routing builder computes transitions for
pub const ROUTED_LANE_TYPES: LaneTypes = LaneTypes(1 | 2);

/// Vehicle types the routing builder computes transitions for
pub const ROUTED_VEHICLE_TYPES: VehicleTypes = VehicleTypes(1 | 2 | 4 | 8);

/// Vehicle types that obey lane arrows
pub const ARROW_VEHICLE_TYPES: VehicleTypes = VehicleTypes::CAR;

/// Maximum number of segments meeting at one node
pub const MAX_SEGMENTS_PER_NODE: usize = 8;

/// Maximum number of transitions stored per lane end and segment slot
pub const MAX_TRANSITIONS: usize = 8;

/// Tie-break distance recorded for U-turn transitions
pub const UTURN_LANE_DISTANCE: u8 = 2;

/// Tie-break distance recorded for relaxed (arrow-incompatible) transitions
pub const INCOMPATIBLE_LANE_DISTANCE: u8 = 2;

/// Ticks per coarse time window used for "left this window" checks (as a shift)
pub const TRANSIT_WINDOW_SHIFT: u32 = 4;

/// Distance from the node at which vehicles start junction arbitration
pub const JUNCTION_APPROACH_DISTANCE: f32 = 12.0;

/// Gap kept to the stop line when a vehicle waits at a junction
pub const STOP_LINE_GAP: f32 = 1.0;

/// Length of a vehicle in world units
pub const VEHICLE_LENGTH: f32 = 4.5;

/// Safe following distance multiplier for VEHICLE_LENGTH
pub const SAFE_FOLLOWING_MULTIPLIER: f32 = 1.5;
