//! Lane-end routing graph
//!
//! The [`RoutingManager`] owns the routing table, collects dirty segments from
//! any thread and rebuilds them once per simulation step. Readers always see a
//! consistent per-segment snapshot: each segment's lane ends are computed
//! off-lock and swapped into the table as one unit.

use log::{debug, info};
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use super::geometry::{GeometryEvent, GeometryProvider};
use super::lane_flags::LaneFlagsStore;
use super::lane_routing;
use super::options::RoutingOptions;
use super::types::{LaneArrows, LaneEndKey, LaneId, SegmentId, MAX_SEGMENTS_PER_NODE, MAX_TRANSITIONS};

/// How a transition was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    /// Lane arrows permit the move
    Default,
    /// Explicit lane connector
    LaneConnection,
    /// Arrows forbid the move; kept as a low-preference fallback
    Relaxed,
    /// Vehicle types that ignore arrows (trams, trains)
    Forced,
}

/// Directed edge from a lane end to a lane of a neighbouring segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneTransition {
    pub lane: LaneId,
    pub segment: SegmentId,
    /// Index of the target lane within its segment
    pub lane_index: u8,
    pub kind: TransitionKind,
    /// Tie-break distance; lower is preferred
    pub distance: u8,
}

pub type Transitions = SmallVec<[LaneTransition; MAX_TRANSITIONS]>;

/// Routing of one lane end: one transition list per far-node segment slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaneEndRouting {
    pub routed: bool,
    pub slots: [Transitions; MAX_SEGMENTS_PER_NODE],
}

impl LaneEndRouting {
    pub fn reset(&mut self) {
        self.routed = false;
        for slot in self.slots.iter_mut() {
            slot.clear();
        }
    }

    pub fn transitions(&self, slot: usize) -> &[LaneTransition] {
        self.slots.get(slot).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// All transitions over every slot
    pub fn all(&self) -> impl Iterator<Item = &LaneTransition> {
        self.slots.iter().flatten()
    }

    /// Transitions leading into `segment`
    pub fn into_segment(&self, segment: SegmentId) -> impl Iterator<Item = &LaneTransition> {
        self.all().filter(move |t| t.segment == segment)
    }
}

/// Cached per-segment booleans read on hot arbitration paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentRoutingSummary {
    pub start_node_outgoing_one_way: bool,
    pub end_node_outgoing_one_way: bool,
    pub highway: bool,
}

impl SegmentRoutingSummary {
    pub fn outgoing_one_way(&self, start_node: bool) -> bool {
        if start_node {
            self.start_node_outgoing_one_way
        } else {
            self.end_node_outgoing_one_way
        }
    }
}

/// Freshly computed routing of one segment, ready to be swapped in
#[derive(Debug, Clone, Default)]
pub struct SegmentRouting {
    pub segment: SegmentId,
    /// `None` when the segment is invalid
    pub summary: Option<SegmentRoutingSummary>,
    pub lane_ends: Vec<(LaneEndKey, LaneEndRouting)>,
    /// Highway arrow hints per source lane; `None` clears a previous hint
    pub highway_arrows: Vec<(LaneId, Option<LaneArrows>)>,
    /// Segments sharing a node with this one
    pub neighbours: Vec<SegmentId>,
}

impl SegmentRouting {
    pub fn invalid(segment: SegmentId) -> Self {
        Self {
            segment,
            ..Self::default()
        }
    }
}

/// Arena of lane-end routings indexed by lane-end key
#[derive(Debug, Default)]
pub struct RoutingTable {
    lane_ends: Vec<LaneEndRouting>,
    summaries: Vec<Option<SegmentRoutingSummary>>,
    segment_keys: HashMap<SegmentId, Vec<LaneEndKey>>,
    segment_neighbours: HashMap<SegmentId, Vec<SegmentId>>,
    highway_arrows: HashMap<LaneId, LaneArrows>,
}

impl RoutingTable {
    pub fn lane_end(&self, key: LaneEndKey) -> Option<&LaneEndRouting> {
        self.lane_ends.get(key.index())
    }

    pub fn summary(&self, segment: SegmentId) -> Option<SegmentRoutingSummary> {
        self.summaries.get(segment.index()).copied().flatten()
    }

    pub fn highway_arrows(&self, lane: LaneId) -> Option<LaneArrows> {
        self.highway_arrows.get(&lane).copied()
    }

    /// Segments that currently hold table entries
    pub fn known_segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segment_keys.keys().copied()
    }

    /// Neighbours recorded when the segment was last built
    pub fn neighbours(&self, segment: SegmentId) -> &[SegmentId] {
        self.segment_neighbours
            .get(&segment)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Clears every entry of the segment and returns its recorded neighbours
    pub fn reset_segment(&mut self, segment: SegmentId) -> Vec<SegmentId> {
        for key in self.segment_keys.remove(&segment).unwrap_or_default() {
            if let Some(entry) = self.lane_ends.get_mut(key.index()) {
                entry.reset();
            }
            self.highway_arrows.remove(&key.lane());
        }
        if let Some(summary) = self.summaries.get_mut(segment.index()) {
            *summary = None;
        }
        self.segment_neighbours.remove(&segment).unwrap_or_default()
    }

    /// Replaces the segment's entries with a freshly built routing
    pub fn apply(&mut self, routing: SegmentRouting) {
        self.reset_segment(routing.segment);

        if self.summaries.len() <= routing.segment.index() {
            self.summaries.resize(routing.segment.index() + 1, None);
        }
        self.summaries[routing.segment.index()] = routing.summary;

        let mut keys = Vec::with_capacity(routing.lane_ends.len());
        for (key, entry) in routing.lane_ends {
            if self.lane_ends.len() <= key.index() {
                self.lane_ends.resize_with(key.index() + 1, LaneEndRouting::default);
            }
            self.lane_ends[key.index()] = entry;
            keys.push(key);
        }
        for (lane, arrows) in routing.highway_arrows {
            match arrows {
                Some(arrows) => {
                    self.highway_arrows.insert(lane, arrows);
                }
                None => {
                    self.highway_arrows.remove(&lane);
                }
            }
        }

        if routing.summary.is_some() {
            self.segment_keys.insert(routing.segment, keys);
            self.segment_neighbours
                .insert(routing.segment, routing.neighbours);
        }
    }
}

/// Number of segment ids addressable by the dirty bitset
const SEGMENT_CAPACITY: usize = 1 << 16;

const WORDS: usize = SEGMENT_CAPACITY / 64;

/// Bitset of segments awaiting a rebuild
#[derive(Debug)]
pub struct DirtySegments {
    dirty: Vec<u64>,
    propagate: Vec<u64>,
    full: bool,
}

impl Default for DirtySegments {
    fn default() -> Self {
        Self {
            dirty: vec![0; WORDS],
            propagate: vec![0; WORDS],
            full: false,
        }
    }
}

/// Segments taken out of the dirty set in one drain
#[derive(Debug, Default)]
pub struct DrainedSegments {
    pub segments: Vec<SegmentId>,
    pub propagate: Vec<SegmentId>,
    pub full: bool,
}

impl DirtySegments {
    /// Returns false if the segment was already marked
    pub fn mark(&mut self, segment: SegmentId, propagate: bool) -> bool {
        let (word, bit) = (segment.index() / 64, segment.index() % 64);
        let was_set = self.dirty[word] & (1 << bit) != 0;
        self.dirty[word] |= 1 << bit;
        if propagate {
            self.propagate[word] |= 1 << bit;
        }
        !was_set
    }

    pub fn mark_all(&mut self) {
        self.full = true;
    }

    pub fn is_marked(&self, segment: SegmentId) -> bool {
        self.full || self.dirty[segment.index() / 64] & (1 << (segment.index() % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.dirty.iter().all(|w| *w == 0)
    }

    pub fn drain(&mut self) -> DrainedSegments {
        let mut drained = DrainedSegments {
            full: std::mem::take(&mut self.full),
            ..DrainedSegments::default()
        };
        for word in 0..WORDS {
            let bits = std::mem::take(&mut self.dirty[word]);
            let propagate = std::mem::take(&mut self.propagate[word]);
            if bits == 0 {
                continue;
            }
            for bit in 0..64 {
                if bits & (1 << bit) != 0 {
                    let segment = SegmentId((word * 64 + bit) as u16);
                    drained.segments.push(segment);
                    if propagate & (1 << bit) != 0 {
                        drained.propagate.push(segment);
                    }
                }
            }
        }
        drained
    }
}

/// Owner of the routing table and its dirty-segment queue
#[derive(Debug, Default)]
pub struct RoutingManager {
    options: RoutingOptions,
    dirty: Mutex<DirtySegments>,
    rebuild: Mutex<()>,
    table: RwLock<RoutingTable>,
    recalculation_notice: AtomicBool,
    segments_rebuilt: AtomicU64,
}

impl RoutingManager {
    pub fn new(options: RoutingOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &RoutingOptions {
        &self.options
    }

    /// Changing options invalidates every lane end
    pub fn set_options(&mut self, options: RoutingOptions) {
        self.options = options;
        self.request_full_recalculation(false);
    }

    /// Marks a segment for rebuild on the next step. With `propagate`, every
    /// segment sharing a node with it is rebuilt as well.
    pub fn request_recalculation(&self, segment: SegmentId, propagate: bool) {
        self.lock_dirty().mark(segment, propagate);
    }

    /// Marks every segment for rebuild; `notify` raises a one-shot notice
    pub fn request_full_recalculation(&self, notify: bool) {
        self.lock_dirty().mark_all();
        if notify {
            info!("Full routing recalculation requested");
            self.recalculation_notice.store(true, Ordering::Release);
        }
    }

    /// Takes the pending recalculation notice, if any
    pub fn take_recalculation_notice(&self) -> bool {
        self.recalculation_notice.swap(false, Ordering::AcqRel)
    }

    pub fn has_pending_recalculation(&self) -> bool {
        !self.lock_dirty().is_empty()
    }

    /// Total number of segment rebuilds performed so far
    pub fn segments_rebuilt(&self) -> u64 {
        self.segments_rebuilt.load(Ordering::Relaxed)
    }

    /// Applies a geometry change notification
    pub fn on_geometry_event(&self, event: GeometryEvent) {
        match event {
            GeometryEvent::SegmentInvalid(segment) => {
                let neighbours = self.write_table().reset_segment(segment);
                let mut dirty = self.lock_dirty();
                for neighbour in neighbours {
                    dirty.mark(neighbour, false);
                }
            }
            GeometryEvent::SegmentValid(segment) => {
                self.request_recalculation(segment, true);
            }
            GeometryEvent::SegmentEndReplaced { old, new } => {
                let mut dirty = self.lock_dirty();
                dirty.mark(old.segment, true);
                dirty.mark(new.segment, true);
            }
        }
    }

    /// Drains the dirty set and rebuilds the marked segments.
    /// Returns the number of segments rebuilt.
    pub fn simulation_step<G, F>(&self, geometry: &G, flags: &F) -> usize
    where
        G: GeometryProvider + ?Sized,
        F: LaneFlagsStore + ?Sized,
    {
        let _rebuild = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);

        let drained = self.lock_dirty().drain();
        if !drained.full && drained.segments.is_empty() {
            return 0;
        }

        let mut segments: BTreeSet<SegmentId> = drained.segments.into_iter().collect();
        if drained.full {
            segments.extend(geometry.segment_ids());
            segments.extend(self.read_table().known_segments());
        } else {
            let table = self.read_table();
            for segment in drained.propagate {
                segments.extend(table.neighbours(segment).iter().copied());
                if let Some(seg) = geometry.segment(segment) {
                    for node in [seg.start_node, seg.end_node] {
                        if let Some(node) = geometry.node(node) {
                            segments.extend(node.segment_ids());
                        }
                    }
                }
            }
        }

        for segment in &segments {
            let routing = lane_routing::build_segment(geometry, flags, &self.options, *segment);
            self.write_table().apply(routing);
        }

        let count = segments.len();
        self.segments_rebuilt
            .fetch_add(count as u64, Ordering::Relaxed);
        debug!("Routing pass rebuilt {} segments", count);
        count
    }

    /// Transitions of a lane end into the segment in the far node's `slot`
    pub fn get_transitions(&self, key: LaneEndKey, slot: usize) -> Transitions {
        self.read_table()
            .lane_end(key)
            .map(|entry| entry.transitions(slot).iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every slot of a lane end
    pub fn lane_end_routing(&self, key: LaneEndKey) -> Option<LaneEndRouting> {
        self.read_table().lane_end(key).cloned()
    }

    pub fn is_routed(&self, key: LaneEndKey) -> bool {
        self.read_table().lane_end(key).is_some_and(|e| e.routed)
    }

    pub fn get_segment_routing_summary(&self, segment: SegmentId) -> Option<SegmentRoutingSummary> {
        self.read_table().summary(segment)
    }

    /// Directions highway lane matching connected the lane to
    pub fn highway_lane_arrows(&self, lane: LaneId) -> Option<LaneArrows> {
        self.read_table().highway_arrows(lane)
    }

    fn lock_dirty(&self) -> std::sync::MutexGuard<'_, DirtySegments> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, RoutingTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, RoutingTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}
