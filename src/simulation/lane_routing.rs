//! Transition builder for a single segment's outgoing lane ends
//!
//! For every lane end that leaves the segment, each neighbouring segment at
//! the far node is classified (forward/left/right/turn), its entry lanes are
//! split into connector, arrow-compatible, relaxed and forced groups, and the
//! compatible ones are matched by similar-lane index.

use log::warn;
use std::collections::BTreeSet;

use super::error::{RoutingError, RoutingResult};
use super::geometry::{GeometryProvider, LaneGeometry, NodeGeometry, SegmentGeometry};
use super::lane_flags::LaneFlagsStore;
use super::options::RoutingOptions;
use super::routing::{
    LaneEndRouting, LaneTransition, SegmentRouting, SegmentRoutingSummary, TransitionKind,
    Transitions,
};
use super::types::{
    ArrowDirection, LaneArrows, LaneEndKey, LaneId, SegmentId, ARROW_VEHICLE_TYPES,
    INCOMPATIBLE_LANE_DISTANCE, MAX_SEGMENTS_PER_NODE, MAX_TRANSITIONS, UTURN_LANE_DISTANCE,
};

/// Rebuilds every outgoing lane end of `segment`
pub(crate) fn build_segment<G, F>(
    geometry: &G,
    flags: &F,
    options: &RoutingOptions,
    segment: SegmentId,
) -> SegmentRouting
where
    G: GeometryProvider + ?Sized,
    F: LaneFlagsStore + ?Sized,
{
    let Some(seg) = geometry.segment(segment) else {
        return SegmentRouting::invalid(segment);
    };

    let mut neighbours = BTreeSet::new();
    for node in [seg.start_node, seg.end_node] {
        if let Some(node) = geometry.node(node) {
            neighbours.extend(node.segment_ids().filter(|s| *s != segment));
        }
    }

    let mut routing = SegmentRouting {
        segment,
        summary: Some(SegmentRoutingSummary {
            start_node_outgoing_one_way: geometry.is_outgoing_one_way(segment, true),
            end_node_outgoing_one_way: geometry.is_outgoing_one_way(segment, false),
            highway: seg.highway,
        }),
        neighbours: neighbours.into_iter().collect(),
        ..SegmentRouting::default()
    };

    for lane in geometry.segment_lanes(seg) {
        if !lane.is_routed() {
            continue;
        }
        let start_node = lane.flows_toward(true);
        let key = LaneEndKey::new(lane.id, start_node);
        match build_lane_end(geometry, flags, options, seg, lane, start_node) {
            Ok((entry, hint)) => {
                routing.lane_ends.push((key, entry));
                routing.highway_arrows.push((lane.id, hint));
            }
            Err(e) => {
                warn!("Lane end {:?} left unrouted: {}", key, e);
                routing.lane_ends.push((key, LaneEndRouting::default()));
                routing.highway_arrows.push((lane.id, None));
            }
        }
    }

    routing
}

/// Position of the source lane within its similar-lane group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceRank {
    /// Counted from the kerb
    outer: usize,
    /// Counted from the centre line
    inner: usize,
    count: usize,
}

struct LaneEndContext<'a> {
    node: &'a NodeGeometry,
    segment: &'a SegmentGeometry,
    lane: &'a LaneGeometry,
    key: LaneEndKey,
    left_hand_traffic: bool,
    arrows: LaneArrows,
    connections: &'a [LaneId],
    rank: SourceRank,
    lane_change_straight: bool,
}

/// Transitions into one candidate segment, grouped by kind
#[derive(Default)]
struct Buckets {
    matched: Vec<LaneTransition>,
    relaxed: Vec<LaneTransition>,
    forced: Vec<LaneTransition>,
}

fn build_lane_end<G, F>(
    geometry: &G,
    flags: &F,
    options: &RoutingOptions,
    segment: &SegmentGeometry,
    lane: &LaneGeometry,
    start_node: bool,
) -> RoutingResult<(LaneEndRouting, Option<LaneArrows>)>
where
    G: GeometryProvider + ?Sized,
    F: LaneFlagsStore + ?Sized,
{
    let node_id = segment.node(start_node);
    let node = geometry
        .node(node_id)
        .ok_or(RoutingError::InvalidNode(node_id))?;
    if node.slot_of(segment.id).is_none() {
        return Err(RoutingError::InvalidSegment(segment.id));
    }

    let left_hand_traffic = geometry.left_hand_traffic();
    let ctx = LaneEndContext {
        node,
        segment,
        lane,
        key: LaneEndKey::new(lane.id, start_node),
        left_hand_traffic,
        arrows: flags.lane_arrows(lane.id),
        connections: flags.lane_connections(lane.id, start_node),
        rank: SourceRank {
            outer: lane.outer_similar_index(left_hand_traffic) as usize,
            inner: lane.inner_similar_index(left_hand_traffic) as usize,
            count: lane.similar_count.max(1) as usize,
        },
        lane_change_straight: flags
            .lane_changing_allowed_when_going_straight(segment.id, start_node)
            .unwrap_or(options.lane_change_straight),
    };

    // Connectors override every lane discipline, highway rules included
    let highway = ctx.connections.is_empty() && highway_rules_apply(geometry, options, &ctx, start_node);

    let mut entry = LaneEndRouting::default();
    let mut hint = highway.then_some(LaneArrows::NONE);

    if highway && node.flags.junction {
        for (slot, target, transitions) in highway_junction(geometry, &ctx)? {
            if let Some(hint) = hint.as_mut() {
                if !transitions.is_empty() {
                    *hint |= geometry.direction(segment.id, target, node_id).arrow();
                }
            }
            let buckets = Buckets {
                matched: transitions,
                ..Buckets::default()
            };
            fill_slot(ctx.key, &mut entry.slots[slot], buckets);
        }
    } else {
        for (slot, candidate) in node.segments.iter().enumerate() {
            let Some(candidate) = *candidate else {
                continue;
            };
            let target = geometry
                .segment(candidate)
                .ok_or(RoutingError::InvalidSegment(candidate))?;
            if target.service != segment.service {
                continue;
            }
            let direction = geometry.direction(segment.id, candidate, node_id);
            if direction == ArrowDirection::None {
                warn!(
                    "No direction from {:?} to {:?} at {:?}, skipping",
                    segment.id, candidate, node_id
                );
                continue;
            }

            let buckets = route_candidate(geometry, &ctx, target, direction, highway)?;
            if let Some(hint) = hint.as_mut() {
                if !buckets.matched.is_empty() {
                    *hint |= direction.arrow();
                }
            }
            fill_slot(ctx.key, &mut entry.slots[slot], buckets);
        }
    }

    entry.routed = entry.slots.iter().any(|s| !s.is_empty());
    Ok((entry, hint))
}

fn highway_rules_apply<G>(
    geometry: &G,
    options: &RoutingOptions,
    ctx: &LaneEndContext<'_>,
    start_node: bool,
) -> bool
where
    G: GeometryProvider + ?Sized,
{
    options.highway_rules
        && ctx.segment.highway
        && geometry.is_incoming_one_way(ctx.segment.id, start_node)
        && geometry.is_simple_junction(ctx.node.id)
        && ctx
            .node
            .segment_ids()
            .filter(|s| *s != ctx.segment.id)
            .all(|s| geometry.is_highway(s))
}

/// Routed lanes of `target` that enter it from the context node and can carry
/// the source lane's traffic
fn entry_lanes<'g, G>(
    geometry: &'g G,
    ctx: &LaneEndContext<'_>,
    target: &'g SegmentGeometry,
) -> RoutingResult<Vec<&'g LaneGeometry>>
where
    G: GeometryProvider + ?Sized,
{
    let start = target
        .end_at(ctx.node.id)
        .ok_or(RoutingError::InvalidSegment(target.id))?;
    Ok(geometry
        .segment_lanes(target)
        .into_iter()
        .filter(|l| l.is_routed() && l.flows_toward(!start) && ctx.lane.is_type_compatible(l))
        .collect())
}

fn route_candidate<G>(
    geometry: &G,
    ctx: &LaneEndContext<'_>,
    target: &SegmentGeometry,
    direction: ArrowDirection,
    highway: bool,
) -> RoutingResult<Buckets>
where
    G: GeometryProvider + ?Sized,
{
    let lanes = entry_lanes(geometry, ctx, target)?;
    let mut buckets = Buckets::default();
    if lanes.is_empty() {
        return Ok(buckets);
    }

    let mut connected = Vec::new();
    let mut compatible = Vec::new();
    let mut relaxed = Vec::new();
    let mut forced = Vec::new();
    for lane in lanes {
        if !ctx.connections.is_empty() {
            if ctx.connections.contains(&lane.id) {
                connected.push(lane);
            }
        } else if !(ctx.lane.vehicle_types & lane.vehicle_types).intersects(ARROW_VEHICLE_TYPES) {
            forced.push(lane);
        } else if highway || arrow_compatible(ctx, direction) {
            compatible.push(lane);
        } else {
            relaxed.push(lane);
        }
    }

    let drive_direction = direction.drive_relative(ctx.left_hand_traffic);
    let bus_shift = match (
        geometry.has_bus_lane(ctx.segment.id),
        geometry.has_bus_lane(target.id),
    ) {
        (true, false) => -1,
        (false, true) => 1,
        _ => 0,
    };
    let targets_for = |n: usize| {
        let simple = if highway {
            highway_simple_targets(ctx.rank, n)
        } else {
            None
        };
        simple.unwrap_or_else(|| {
            ordinary_targets(
                ctx.rank,
                n,
                drive_direction,
                ctx.node.flags.junction,
                bus_shift,
                ctx.lane_change_straight,
            )
        })
    };

    let compatible = sorted_by_outer(compatible, ctx.left_hand_traffic);
    for (t, distance) in targets_for(compatible.len()) {
        if let Some(lane) = compatible.get(t) {
            buckets
                .matched
                .push(transition(lane, TransitionKind::Default, distance));
        }
    }

    let connected = sorted_by_outer(connected, ctx.left_hand_traffic);
    let in_range = targets_for(connected.len());
    for (t, lane) in connected.iter().enumerate() {
        let distance = in_range
            .iter()
            .find(|(r, _)| *r == t)
            .map(|(_, d)| *d)
            .unwrap_or_else(|| lane_distance(t, ctx.rank.outer));
        buckets
            .matched
            .push(transition(lane, TransitionKind::LaneConnection, distance));
    }

    for lane in relaxed {
        buckets.relaxed.push(transition(
            lane,
            TransitionKind::Relaxed,
            INCOMPATIBLE_LANE_DISTANCE,
        ));
    }

    let forced = sorted_by_outer(forced, ctx.left_hand_traffic);
    for (t, lane) in forced.iter().enumerate() {
        buckets.forced.push(transition(
            lane,
            TransitionKind::Forced,
            lane_distance(t, ctx.rank.outer),
        ));
    }

    Ok(buckets)
}

/// Whether the source lane's arrows permit `direction`
fn arrow_compatible(ctx: &LaneEndContext<'_>, direction: ArrowDirection) -> bool {
    match direction {
        ArrowDirection::Turn => {
            let turn_arrow = if ctx.left_hand_traffic {
                LaneArrows::RIGHT
            } else {
                LaneArrows::LEFT
            };
            ctx.node.flags.end_or_one_way_out || ctx.arrows.contains(turn_arrow)
        }
        ArrowDirection::Left | ArrowDirection::Forward | ArrowDirection::Right => {
            ctx.arrows.contains(direction.arrow())
        }
        ArrowDirection::None => false,
    }
}

fn sorted_by_outer(mut lanes: Vec<&LaneGeometry>, left_hand_traffic: bool) -> Vec<&LaneGeometry> {
    lanes.sort_by_key(|l| (l.outer_similar_index(left_hand_traffic), l.index));
    lanes
}

fn transition(lane: &LaneGeometry, kind: TransitionKind, distance: u8) -> LaneTransition {
    LaneTransition {
        lane: lane.id,
        segment: lane.segment,
        lane_index: lane.index,
        kind,
        distance,
    }
}

fn lane_distance(a: usize, b: usize) -> u8 {
    a.abs_diff(b).min(u8::MAX as usize) as u8
}

/// Concatenates matched, relaxed and forced transitions into a slot list,
/// skipping duplicate lanes and dropping whatever exceeds the capacity
fn fill_slot(key: LaneEndKey, slot: &mut Transitions, buckets: Buckets) {
    let mut dropped = 0;
    for transition in buckets
        .matched
        .into_iter()
        .chain(buckets.relaxed)
        .chain(buckets.forced)
    {
        if slot.iter().any(|t| t.lane == transition.lane) {
            continue;
        }
        if slot.len() == MAX_TRANSITIONS {
            dropped += 1;
            continue;
        }
        slot.push(transition);
    }
    if dropped > 0 {
        warn!(
            "{}; dropped {} transitions",
            RoutingError::CapacityOverflow {
                key,
                capacity: MAX_TRANSITIONS
            },
            dropped
        );
    }
}

/// Target outer indices for a highway merge or split at a two-segment node.
/// `None` when the lane counts do not differ by exactly one.
fn highway_simple_targets(source: SourceRank, n: usize) -> Option<Vec<(usize, u8)>> {
    if n == 0 || n.abs_diff(source.count) != 1 {
        return None;
    }
    let o = source.outer;
    let targets = if n < source.count {
        vec![o.saturating_sub(1)]
    } else if o == 0 {
        vec![0, 1]
    } else {
        vec![o + 1]
    };
    Some(
        targets
            .into_iter()
            .filter(|t| *t < n)
            .map(|t| (t, lane_distance(t, o)))
            .collect(),
    )
}

/// Target outer indices for ordinary lane discipline
fn ordinary_targets(
    source: SourceRank,
    n: usize,
    direction: ArrowDirection,
    junction: bool,
    bus_shift: isize,
    lane_change_straight: bool,
) -> Vec<(usize, u8)> {
    if n == 0 {
        return Vec::new();
    }
    let o = source.outer;
    let p = source.count;
    let last = n - 1;

    if direction == ArrowDirection::Turn {
        return vec![(last, UTURN_LANE_DISTANCE)];
    }

    if junction {
        let base = (o as isize + bus_shift).clamp(0, last as isize) as usize;
        let (low, mut high) = if direction == ArrowDirection::Forward && lane_change_straight {
            (base.saturating_sub(1), (base + 1).min(last))
        } else {
            (base, base)
        };
        if o + 1 == p && n > p {
            high = last;
        }
        return (low..=high).map(|t| (t, lane_distance(t, o))).collect();
    }

    if n == p {
        let t = o.min(last);
        return vec![(t, lane_distance(t, o))];
    }

    // Unequal continuation: distribute symmetrically around the centre
    let diff = n as isize - p as isize;
    let clamp = |t: isize| t.clamp(0, last as isize) as usize;
    let mut targets = if diff % 2 == 0 {
        vec![clamp(o as isize + diff / 2)]
    } else {
        let x = o as f32 + diff as f32 / 2.0;
        vec![clamp(x.floor() as isize), clamp(x.ceil() as isize)]
    };
    targets.dedup();
    targets
        .into_iter()
        .map(|t| (t, lane_distance(t, o)))
        .collect()
}

/// Running lane totals of a highway junction arm, visited in walk order
struct HighwayArm<'g> {
    segment: SegmentId,
    slot: usize,
    incoming: usize,
    /// Entry lanes sorted by inner index
    entries: Vec<&'g LaneGeometry>,
}

/// Inner-index target of the source lane in an exit that sees `lo` as the
/// offset of the source's innermost lane
fn highway_junction_target(
    inner: usize,
    count: usize,
    n: usize,
    lo: isize,
    parity: bool,
    first_exit: bool,
    last_exit: bool,
) -> Option<(usize, u8)> {
    let t = inner as isize + lo;
    let hi = lo + count as isize - 1;
    let last = n as isize - 1;

    if (0..n as isize).contains(&t) {
        return Some((t as usize, 0));
    }
    if parity {
        return None;
    }
    if hi < 0 {
        return (inner + 1 == count).then_some((0, 1));
    }
    if lo > last {
        return (inner == 0).then_some((last as usize, 1));
    }
    if t > last && last_exit {
        return Some((last as usize, 1));
    }
    if t < 0 && first_exit {
        return Some((0, 1));
    }
    None
}

/// Walks the junction from the source's drive-side neighbour around the node
/// and matches lanes by inner index, offset by lanes seen along the way
fn highway_junction<G>(
    geometry: &G,
    ctx: &LaneEndContext<'_>,
) -> RoutingResult<Vec<(usize, SegmentId, Vec<LaneTransition>)>>
where
    G: GeometryProvider + ?Sized,
{
    let node_id = ctx.node.id;
    let mut chain = Vec::new();
    let mut current = ctx.segment.id;
    for _ in 0..MAX_SEGMENTS_PER_NODE {
        let next = if ctx.left_hand_traffic {
            geometry.right_segment(current, node_id)
        } else {
            geometry.left_segment(current, node_id)
        };
        match next {
            Some(next) if next != ctx.segment.id && !chain.contains(&next) => {
                chain.push(next);
                current = next;
            }
            _ => break,
        }
    }

    let mut arms = Vec::with_capacity(chain.len());
    for segment in chain {
        let target = geometry
            .segment(segment)
            .ok_or(RoutingError::InvalidSegment(segment))?;
        let slot = ctx
            .node
            .slot_of(segment)
            .ok_or(RoutingError::InvalidSegment(segment))?;
        if target.service != ctx.segment.service {
            continue;
        }
        let start = target
            .end_at(node_id)
            .ok_or(RoutingError::InvalidSegment(segment))?;
        let incoming = geometry
            .segment_lanes(target)
            .into_iter()
            .filter(|l| l.is_routed() && l.flows_toward(start) && ctx.lane.is_type_compatible(l))
            .count();
        let mut entries = entry_lanes(geometry, ctx, target)?;
        entries.sort_by_key(|l| (l.inner_similar_index(ctx.left_hand_traffic), l.index));
        arms.push(HighwayArm {
            segment,
            slot,
            incoming,
            entries,
        });
    }

    let total_in = ctx.rank.count + arms.iter().map(|a| a.incoming).sum::<usize>();
    let total_out: usize = arms.iter().map(|a| a.entries.len()).sum();
    let parity = total_in == total_out;
    let first_exit = arms.iter().position(|a| !a.entries.is_empty());
    let last_exit = arms.iter().rposition(|a| !a.entries.is_empty());

    let mut result = Vec::new();
    let mut in_seen = 0usize;
    let mut out_seen = 0usize;
    for (index, arm) in arms.iter().enumerate() {
        let n = arm.entries.len();
        let mut transitions = Vec::new();
        if n > 0 {
            let lo = in_seen as isize - out_seen as isize;
            if let Some((t, distance)) = highway_junction_target(
                ctx.rank.inner,
                ctx.rank.count,
                n,
                lo,
                parity,
                first_exit == Some(index),
                last_exit == Some(index),
            ) {
                if let Some(lane) = arm.entries.get(t) {
                    transitions.push(transition(lane, TransitionKind::Default, distance));
                }
            }
        }
        in_seen += arm.incoming;
        out_seen += n;
        result.push((arm.slot, arm.segment, transitions));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(outer: usize, count: usize) -> SourceRank {
        SourceRank {
            outer,
            inner: count - 1 - outer,
            count,
        }
    }

    #[test]
    fn test_equal_continuation_keeps_index() {
        for o in 0..3 {
            let targets = ordinary_targets(rank(o, 3), 3, ArrowDirection::Forward, false, 0, false);
            assert_eq!(targets, vec![(o, 0)]);
        }
    }

    #[test]
    fn test_widening_continuation_is_symmetric() {
        // 2 -> 4 lanes: each lane shifts by one towards the centre of the wider road
        assert_eq!(
            ordinary_targets(rank(0, 2), 4, ArrowDirection::Forward, false, 0, false),
            vec![(1, 1)]
        );
        assert_eq!(
            ordinary_targets(rank(1, 2), 4, ArrowDirection::Forward, false, 0, false),
            vec![(2, 1)]
        );
        // 2 -> 3 lanes: odd difference spreads to both neighbours
        assert_eq!(
            ordinary_targets(rank(0, 2), 3, ArrowDirection::Forward, false, 0, false),
            vec![(0, 0), (1, 1)]
        );
    }

    #[test]
    fn test_uturn_targets_innermost_lane() {
        let targets = ordinary_targets(rank(0, 2), 3, ArrowDirection::Turn, true, 0, false);
        assert_eq!(targets, vec![(2, UTURN_LANE_DISTANCE)]);
    }

    #[test]
    fn test_junction_innermost_lane_fans_out() {
        let targets = ordinary_targets(rank(1, 2), 4, ArrowDirection::Left, true, 0, false);
        assert_eq!(targets, vec![(1, 0), (2, 1), (3, 2)]);
    }

    #[test]
    fn test_straight_lane_change_widens_range() {
        let targets = ordinary_targets(rank(1, 3), 3, ArrowDirection::Forward, true, 0, true);
        assert_eq!(targets, vec![(0, 1), (1, 0), (2, 1)]);
    }

    #[test]
    fn test_bus_lane_shift() {
        let targets = ordinary_targets(rank(1, 3), 2, ArrowDirection::Forward, true, -1, false);
        assert_eq!(targets, vec![(0, 1)]);
    }

    #[test]
    fn test_highway_merge_and_split() {
        assert_eq!(highway_simple_targets(rank(0, 3), 2), Some(vec![(0, 0)]));
        assert_eq!(highway_simple_targets(rank(1, 3), 2), Some(vec![(0, 1)]));
        assert_eq!(highway_simple_targets(rank(2, 3), 2), Some(vec![(1, 1)]));
        assert_eq!(highway_simple_targets(rank(0, 2), 3), Some(vec![(0, 0), (1, 1)]));
        assert_eq!(highway_simple_targets(rank(1, 2), 3), Some(vec![(2, 1)]));
        assert_eq!(highway_simple_targets(rank(0, 2), 2), None);
    }

    #[test]
    fn test_highway_junction_saturation() {
        // Parity: lanes beyond the exit are not connected
        assert_eq!(highway_junction_target(2, 3, 2, 0, true, true, false), None);
        // Mismatch on the last exit saturates to its outermost lane
        assert_eq!(highway_junction_target(2, 3, 2, 0, false, true, true), Some((1, 1)));
        // All source lanes consumed by earlier exits: only the outermost one connects
        assert_eq!(highway_junction_target(2, 3, 2, -4, false, false, true), Some((0, 1)));
        assert_eq!(highway_junction_target(1, 3, 2, -4, false, false, true), None);
    }
}
