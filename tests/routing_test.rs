//! Lane-end routing tests
//!
//! Builds small networks on the in-memory road network and checks the
//! transitions the routing manager computes for them.

use junction_sim::simulation::{
    choose_next_lane, GeometryProvider, LaneArrows, LaneDirection, LaneEndKey, LaneEndRouting,
    LaneGeometry, LaneId, LaneSpec, NodeId, Position, RoutingManager, RoutingOptions, SegmentId,
    SegmentRouting, SegmentSpec, SimLaneFlags, SimRoadNetwork, TransitionKind, VehicleTypes,
    INCOMPATIBLE_LANE_DISTANCE, MAX_TRANSITIONS, UTURN_LANE_DISTANCE,
};

/// Feeds queued geometry events to the manager and runs one routing pass
fn settle(network: &mut SimRoadNetwork, flags: &SimLaneFlags, routing: &RoutingManager) -> usize {
    for event in network.drain_events() {
        routing.on_geometry_event(event);
    }
    routing.simulation_step(network, flags)
}

/// Key of the lane end where traffic on `lane` leaves its segment
fn exit_key(lane: &LaneGeometry) -> LaneEndKey {
    LaneEndKey::new(lane.id, lane.flows_toward(true))
}

fn routing_of(routing: &RoutingManager, network: &SimRoadNetwork, lane: LaneId) -> LaneEndRouting {
    let lane = network.lane(lane).expect("lane exists");
    routing
        .lane_end_routing(exit_key(lane))
        .expect("lane end has a table entry")
}

/// Lane of `segment` driving toward `node` with the given outer similar index
fn lane_toward(network: &SimRoadNetwork, segment: SegmentId, node: NodeId, outer: u8) -> LaneId {
    let lht = network.left_hand_traffic();
    network
        .lanes_toward(segment, node)
        .into_iter()
        .find(|l| l.outer_similar_index(lht) == outer)
        .map(|l| l.id)
        .expect("lane with outer index exists")
}

fn outer_of(network: &SimRoadNetwork, lane: LaneId) -> u8 {
    let lht = network.left_hand_traffic();
    network.lane(lane).expect("lane exists").outer_similar_index(lht)
}

/// Lane of `segment` driving toward `node` with the given inner similar index
fn inner_lane_toward(network: &SimRoadNetwork, segment: SegmentId, node: NodeId, inner: u8) -> LaneId {
    let lht = network.left_hand_traffic();
    network
        .lanes_toward(segment, node)
        .into_iter()
        .find(|l| l.inner_similar_index(lht) == inner)
        .map(|l| l.id)
        .expect("lane with inner index exists")
}

fn inner_of(network: &SimRoadNetwork, lane: LaneId) -> u8 {
    let lht = network.left_hand_traffic();
    network.lane(lane).expect("lane exists").inner_similar_index(lht)
}

/// A straight chain A -> B -> C with the given specs
fn chain(first: SegmentSpec, second: SegmentSpec) -> (SimRoadNetwork, [NodeId; 3], [SegmentId; 2]) {
    let mut network = SimRoadNetwork::new();
    let a = network.add_node(Position::new(0.0, 0.0, 0.0));
    let b = network.add_node(Position::new(40.0, 0.0, 0.0));
    let c = network.add_node(Position::new(80.0, 0.0, 0.0));
    let s1 = network.add_segment(a, b, first).expect("first segment");
    let s2 = network.add_segment(b, c, second).expect("second segment");
    (network, [a, b, c], [s1, s2])
}

/// Four two-way arms meeting at a centre node. Every segment runs from its
/// outer node toward the centre; arms are returned north, east, south, west.
struct Junction {
    network: SimRoadNetwork,
    centre: NodeId,
    outer: [NodeId; 4],
    arms: [SegmentId; 4],
}

const NORTH: usize = 0;
const EAST: usize = 1;
const SOUTH: usize = 2;
const WEST: usize = 3;

fn junction(left_hand_traffic: bool) -> Junction {
    junction_with(left_hand_traffic, |_| SegmentSpec::two_way(2, 2))
}

/// Same layout with a custom spec per arm
fn junction_with(left_hand_traffic: bool, spec: impl Fn(usize) -> SegmentSpec) -> Junction {
    let mut network = SimRoadNetwork::with_left_hand_traffic(left_hand_traffic);
    let centre = network.add_node(Position::new(0.0, 0.0, 0.0));
    let outer = [
        network.add_node(Position::new(0.0, 0.0, 40.0)),
        network.add_node(Position::new(40.0, 0.0, 0.0)),
        network.add_node(Position::new(0.0, 0.0, -40.0)),
        network.add_node(Position::new(-40.0, 0.0, 0.0)),
    ];
    let arms: [SegmentId; 4] = std::array::from_fn(|arm| {
        network
            .add_segment(outer[arm], centre, spec(arm))
            .expect("arm segment")
    });
    Junction {
        network,
        centre,
        outer,
        arms,
    }
}

/// A three-lane highway ending at a node where a main road continues east
/// and a ramp leaves to the right
fn highway_split(main_lanes: usize, ramp_lanes: usize) -> (SimRoadNetwork, NodeId, [SegmentId; 3]) {
    let mut network = SimRoadNetwork::new();
    let a = network.add_node(Position::new(0.0, 0.0, 0.0));
    let b = network.add_node(Position::new(40.0, 0.0, 0.0));
    let c = network.add_node(Position::new(80.0, 0.0, 0.0));
    let d = network.add_node(Position::new(70.0, 0.0, -40.0));
    let source = network
        .add_segment(a, b, SegmentSpec::one_way(3).highway())
        .expect("source");
    let main = network
        .add_segment(b, c, SegmentSpec::one_way(main_lanes).highway())
        .expect("main");
    let ramp = network
        .add_segment(b, d, SegmentSpec::one_way(ramp_lanes).highway())
        .expect("ramp");
    (network, b, [source, main, ramp])
}

#[test]
fn test_equal_continuation_keeps_outer_index() {
    let (mut network, nodes, [s1, s2]) = chain(SegmentSpec::one_way(3), SegmentSpec::one_way(3));
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    for lane in network.lanes_toward(s1, nodes[1]) {
        let entry = routing_of(&routing, &network, lane.id);
        assert!(entry.routed);
        let transitions: Vec<_> = entry.into_segment(s2).copied().collect();
        assert_eq!(transitions.len(), 1, "lane {:?} must map to exactly one lane", lane.id);
        assert_eq!(transitions[0].distance, 0);
        assert_eq!(transitions[0].kind, TransitionKind::Default);
        assert_eq!(outer_of(&network, transitions[0].lane), outer_of(&network, lane.id));
    }
}

#[test]
fn test_narrowing_continuation_without_highway_rules() {
    let (mut network, nodes, [s1, s2]) = chain(SegmentSpec::one_way(2), SegmentSpec::one_way(1));
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let target = network.lanes_toward(s2, nodes[2])[0].id;
    for outer in 0..2 {
        let lane = lane_toward(&network, s1, nodes[1], outer);
        let transitions: Vec<_> = routing_of(&routing, &network, lane).into_segment(s2).copied().collect();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].lane, target);
        assert_eq!(transitions[0].distance, outer);
    }
}

#[test]
fn test_highway_three_to_two_merge() {
    let (mut network, nodes, [s1, s2]) = chain(
        SegmentSpec::one_way(3).highway(),
        SegmentSpec::one_way(2).highway(),
    );
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    // (source outer, target outer, distance)
    let expected = [(0, 0, 0), (1, 0, 1), (2, 1, 1)];
    for (source_outer, target_outer, distance) in expected {
        let lane = lane_toward(&network, s1, nodes[1], source_outer);
        let transitions: Vec<_> = routing_of(&routing, &network, lane).into_segment(s2).copied().collect();
        assert_eq!(transitions.len(), 1, "source outer {}", source_outer);
        assert_eq!(outer_of(&network, transitions[0].lane), target_outer);
        assert_eq!(transitions[0].distance, distance);
        assert_eq!(routing.highway_lane_arrows(lane), Some(LaneArrows::FORWARD));
    }

    let summary = routing.get_segment_routing_summary(s1).expect("summary");
    assert!(summary.highway);
    assert!(summary.start_node_outgoing_one_way);
    assert!(!summary.end_node_outgoing_one_way);
}

#[test]
fn test_highway_two_to_one_merge_is_symmetric() {
    let (mut network, nodes, [s1, s2]) = chain(
        SegmentSpec::one_way(2).highway(),
        SegmentSpec::one_way(1).highway(),
    );
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let target = network.lanes_toward(s2, nodes[2])[0].id;
    for lane in network.lanes_toward(s1, nodes[1]) {
        let transitions: Vec<_> = routing_of(&routing, &network, lane.id).into_segment(s2).copied().collect();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].lane, target);
        assert!(transitions[0].distance <= 1);
    }
}

#[test]
fn test_disabling_highway_rules_rebuilds_everything() {
    let (mut network, nodes, [s1, s2]) = chain(
        SegmentSpec::one_way(3).highway(),
        SegmentSpec::one_way(2).highway(),
    );
    let flags = SimLaneFlags::new();
    let mut routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    routing.set_options(RoutingOptions {
        highway_rules: false,
        ..RoutingOptions::default()
    });
    assert!(routing.has_pending_recalculation());
    assert_eq!(routing.simulation_step(&network, &flags), 2);

    // Ordinary discipline spreads the middle lane over both target lanes
    let middle = lane_toward(&network, s1, nodes[1], 1);
    assert_eq!(routing_of(&routing, &network, middle).into_segment(s2).count(), 2);
    assert_eq!(routing.highway_lane_arrows(middle), None);
}

#[test]
fn test_recalculation_is_deterministic() {
    let build = || {
        let mut j = junction(false);
        let flags = SimLaneFlags::new();
        let routing = RoutingManager::default();
        settle(&mut j.network, &flags, &routing);
        (j, flags, routing)
    };
    let (first, first_flags, first_routing) = build();
    let (second, _, second_routing) = build();

    let lanes: Vec<LaneId> = first
        .arms
        .iter()
        .flat_map(|s| first.network.lanes_toward(*s, first.centre))
        .map(|l| l.id)
        .collect();
    let before: Vec<LaneEndRouting> = lanes
        .iter()
        .map(|l| routing_of(&first_routing, &first.network, *l))
        .collect();

    for (lane, entry) in lanes.iter().zip(&before) {
        assert_eq!(&routing_of(&second_routing, &second.network, *lane), entry);
    }

    first_routing.request_full_recalculation(false);
    first_routing.simulation_step(&first.network, &first_flags);
    for (lane, entry) in lanes.iter().zip(&before) {
        assert_eq!(&routing_of(&first_routing, &first.network, *lane), entry);
    }
}

#[test]
fn test_dirty_marking_is_idempotent() {
    let (mut network, _, [s1, _]) = chain(SegmentSpec::one_way(2), SegmentSpec::one_way(2));
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let rebuilt = routing.segments_rebuilt();
    routing.request_recalculation(s1, false);
    routing.request_recalculation(s1, false);
    routing.request_recalculation(s1, false);
    assert_eq!(routing.simulation_step(&network, &flags), 1);
    assert_eq!(routing.segments_rebuilt(), rebuilt + 1);
    assert_eq!(routing.simulation_step(&network, &flags), 0);
}

#[test]
fn test_full_recalculation_notice_is_one_shot() {
    let routing = RoutingManager::default();
    routing.request_full_recalculation(true);
    assert!(routing.has_pending_recalculation());
    assert!(routing.take_recalculation_notice());
    assert!(!routing.take_recalculation_notice());

    let network = SimRoadNetwork::new();
    routing.simulation_step(&network, &SimLaneFlags::new());
    assert!(!routing.has_pending_recalculation());
}

#[test]
fn test_transition_capacity_is_bounded() {
    let (mut network, nodes, [s1, s2]) = chain(SegmentSpec::one_way(1), SegmentSpec::one_way(10));
    let mut flags = SimLaneFlags::new();
    let source = network.lanes_toward(s1, nodes[1])[0].id;
    flags.set_lane_arrows(source, LaneArrows::NONE);
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let entry = routing_of(&routing, &network, source);
    let transitions: Vec<_> = entry.into_segment(s2).copied().collect();
    assert_eq!(transitions.len(), MAX_TRANSITIONS);
    assert!(transitions.iter().all(|t| t.kind == TransitionKind::Relaxed));

    let mut lanes: Vec<LaneId> = transitions.iter().map(|t| t.lane).collect();
    lanes.sort();
    lanes.dedup();
    assert_eq!(lanes.len(), MAX_TRANSITIONS, "no lane may appear twice");
}

#[test]
fn test_lane_arrows_split_default_and_relaxed() {
    let mut j = junction(false);
    let mut flags = SimLaneFlags::new();
    let inner = lane_toward(&j.network, j.arms[WEST], j.centre, 1);
    flags.set_lane_arrows(inner, LaneArrows::LEFT);
    let routing = RoutingManager::default();
    settle(&mut j.network, &flags, &routing);

    let entry = routing_of(&routing, &j.network, inner);

    // Coming from the west, north is a left turn
    let left: Vec<_> = entry.into_segment(j.arms[NORTH]).copied().collect();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].kind, TransitionKind::Default);
    assert_eq!(outer_of(&j.network, left[0].lane), 1);

    for arm in [EAST, SOUTH] {
        let relaxed: Vec<_> = entry.into_segment(j.arms[arm]).copied().collect();
        assert_eq!(relaxed.len(), 2);
        assert!(relaxed
            .iter()
            .all(|t| t.kind == TransitionKind::Relaxed && t.distance == INCOMPATIBLE_LANE_DISTANCE));
    }

    // A left arrow also permits the U-turn, into the innermost lane
    let uturn: Vec<_> = entry.into_segment(j.arms[WEST]).copied().collect();
    assert_eq!(uturn.len(), 1);
    assert_eq!(uturn[0].kind, TransitionKind::Default);
    assert_eq!(uturn[0].distance, UTURN_LANE_DISTANCE);
    assert_eq!(outer_of(&j.network, uturn[0].lane), 1);
}

#[test]
fn test_lane_connections_override_arrows() {
    let mut j = junction(false);
    let mut flags = SimLaneFlags::new();
    let kerb = lane_toward(&j.network, j.arms[WEST], j.centre, 0);
    let target = lane_toward(&j.network, j.arms[EAST], j.outer[EAST], 1);
    let routing = RoutingManager::default();
    settle(&mut j.network, &flags, &routing);
    assert!(routing_of(&routing, &j.network, kerb).into_segment(j.arms[NORTH]).count() > 0);

    assert!(flags.add_lane_connection(kerb, target, false));
    routing.request_recalculation(j.arms[WEST], false);
    assert_eq!(routing.simulation_step(&j.network, &flags), 1);

    let entry = routing_of(&routing, &j.network, kerb);
    assert!(entry.routed);
    let transitions: Vec<_> = entry.all().copied().collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].lane, target);
    assert_eq!(transitions[0].kind, TransitionKind::LaneConnection);
}

#[test]
fn test_straight_lane_change_allowance() {
    let mut j = junction(false);
    let mut flags = SimLaneFlags::new();
    let inner = lane_toward(&j.network, j.arms[WEST], j.centre, 1);
    let routing = RoutingManager::default();
    settle(&mut j.network, &flags, &routing);
    assert_eq!(routing_of(&routing, &j.network, inner).into_segment(j.arms[EAST]).count(), 1);

    flags.set_lane_changing_allowed_when_going_straight(j.arms[WEST], false, true);
    routing.request_recalculation(j.arms[WEST], false);
    routing.simulation_step(&j.network, &flags);
    assert_eq!(routing_of(&routing, &j.network, inner).into_segment(j.arms[EAST]).count(), 2);
}

#[test]
fn test_dead_end_uturn_targets_innermost_lane() {
    for left_hand_traffic in [false, true] {
        let mut network = SimRoadNetwork::with_left_hand_traffic(left_hand_traffic);
        let a = network.add_node(Position::new(0.0, 0.0, 0.0));
        let b = network.add_node(Position::new(40.0, 0.0, 0.0));
        let segment = network
            .add_segment(a, b, SegmentSpec::two_way(2, 2))
            .expect("segment");
        let flags = SimLaneFlags::new();
        let routing = RoutingManager::default();
        settle(&mut network, &flags, &routing);

        for lane in network.lanes_toward(segment, b) {
            let transitions: Vec<_> = routing_of(&routing, &network, lane.id).all().copied().collect();
            assert_eq!(transitions.len(), 1);
            assert_eq!(transitions[0].distance, UTURN_LANE_DISTANCE);
            let target = network.lane(transitions[0].lane).expect("target lane");
            assert!(target.flows_toward(true));
            assert_eq!(target.inner_similar_index(left_hand_traffic), 0);
        }
    }
}

#[test]
fn test_routing_never_crosses_service_classes() {
    let (mut network, nodes, [road, rail]) = chain(SegmentSpec::one_way(1), SegmentSpec::rail());
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let road_lane = network.lanes_toward(road, nodes[1])[0].id;
    assert!(!routing.is_routed(exit_key(network.lane(road_lane).expect("lane"))));

    let track = network.lanes_toward(rail, nodes[1])[0].id;
    let transitions: Vec<_> = routing_of(&routing, &network, track).all().copied().collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].segment, rail);
    assert_eq!(transitions[0].kind, TransitionKind::Forced);
}

#[test]
fn test_split_segment_reroutes_both_halves() {
    let (mut network, nodes, [s1, s2]) = chain(SegmentSpec::one_way(2), SegmentSpec::one_way(2));
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let (middle, s3) = network
        .split_segment(s1, Position::new(20.0, 0.0, 0.0))
        .expect("split");
    settle(&mut network, &flags, &routing);

    for lane in network.lanes_toward(s1, middle) {
        let entry = routing_of(&routing, &network, lane.id);
        assert_eq!(entry.into_segment(s3).count(), 1);
        assert_eq!(entry.into_segment(s2).count(), 0);
    }
    for lane in network.lanes_toward(s3, nodes[1]) {
        assert_eq!(routing_of(&routing, &network, lane.id).into_segment(s2).count(), 1);
    }
}

#[test]
fn test_removed_segment_clears_routes() {
    let (mut network, nodes, [s1, s2]) = chain(SegmentSpec::one_way(2), SegmentSpec::one_way(2));
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);
    let lanes: Vec<LaneId> = network.lanes_toward(s1, nodes[1]).iter().map(|l| l.id).collect();

    network.remove_segment(s2).expect("remove");
    settle(&mut network, &flags, &routing);

    assert!(routing.get_segment_routing_summary(s2).is_none());
    for lane in lanes {
        assert!(!routing.is_routed(exit_key(network.lane(lane).expect("lane"))));
    }
}

#[test]
fn test_get_transitions_reads_far_node_slot() {
    let (mut network, nodes, [s1, s2]) = chain(SegmentSpec::one_way(1), SegmentSpec::one_way(1));
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let lane = network.lanes_toward(s1, nodes[1])[0];
    let slot = network
        .node(nodes[1])
        .and_then(|n| n.slot_of(s2))
        .expect("slot of second segment");
    let transitions = routing.get_transitions(exit_key(lane), slot);
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].segment, s2);
    assert!(routing.get_transitions(exit_key(lane), 7).is_empty());
}

#[test]
fn test_highway_junction_split_matches_inner_lanes() {
    let (mut network, node, [source, main, ramp]) = highway_split(2, 1);
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    // (source inner, target segment, target inner, hint)
    let expected = [
        (0, main, 0, LaneArrows::FORWARD),
        (1, main, 1, LaneArrows::FORWARD),
        (2, ramp, 0, LaneArrows::RIGHT),
    ];
    for (source_inner, segment, target_inner, hint) in expected {
        let lane = inner_lane_toward(&network, source, node, source_inner);
        let transitions: Vec<_> = routing_of(&routing, &network, lane).all().copied().collect();
        assert_eq!(transitions.len(), 1, "source inner {}", source_inner);
        assert_eq!(transitions[0].segment, segment);
        assert_eq!(transitions[0].kind, TransitionKind::Default);
        assert_eq!(transitions[0].distance, 0);
        assert_eq!(inner_of(&network, transitions[0].lane), target_inner);
        assert_eq!(routing.highway_lane_arrows(lane), Some(hint));
    }
}

#[test]
fn test_highway_junction_with_fewer_exit_lanes_saturates() {
    let (mut network, node, [source, main, ramp]) = highway_split(1, 1);
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    // Three lanes into two: the kerb lane squeezes into the ramp
    let expected = [
        (0, main, 0, LaneArrows::FORWARD),
        (1, ramp, 0, LaneArrows::RIGHT),
        (2, ramp, 1, LaneArrows::RIGHT),
    ];
    let ramp_lane = network.lanes_toward(ramp, network.segment(ramp).expect("ramp").end_node)[0].id;
    for (source_inner, segment, distance, hint) in expected {
        let lane = inner_lane_toward(&network, source, node, source_inner);
        let transitions: Vec<_> = routing_of(&routing, &network, lane).all().copied().collect();
        assert_eq!(transitions.len(), 1, "source inner {}", source_inner);
        assert_eq!(transitions[0].segment, segment);
        assert_eq!(transitions[0].distance, distance);
        if segment == ramp {
            assert_eq!(transitions[0].lane, ramp_lane);
        }
        assert_eq!(routing.highway_lane_arrows(lane), Some(hint));
    }
}

#[test]
fn test_arrow_bound_lanes_never_take_relaxed_transitions() {
    let mut j = junction(false);
    let mut flags = SimLaneFlags::new();
    let west: Vec<LaneId> = j
        .network
        .lanes_toward(j.arms[WEST], j.centre)
        .iter()
        .map(|l| l.id)
        .collect();
    for lane in &west {
        flags.set_lane_arrows(*lane, LaneArrows::FORWARD);
    }
    let routing = RoutingManager::default();
    settle(&mut j.network, &flags, &routing);

    for lane in west {
        let entry = routing_of(&routing, &j.network, lane);
        let left: Vec<_> = entry.into_segment(j.arms[NORTH]).copied().collect();
        assert!(!left.is_empty());
        assert!(left.iter().all(|t| t.kind == TransitionKind::Relaxed));

        let geometry = j.network.lane(lane).expect("lane");
        assert!(choose_next_lane(&routing, &j.network, geometry, &[j.centre, j.outer[NORTH]]).is_none());

        let straight = choose_next_lane(&routing, &j.network, geometry, &[j.centre, j.outer[EAST]])
            .expect("straight on is allowed");
        assert_eq!(straight.segment, j.arms[EAST]);
        assert_eq!(straight.kind, TransitionKind::Default);
    }
}

#[test]
fn test_bus_lane_shifts_junction_targets() {
    let straight_on = |kerb: LaneSpec| {
        let mut j = junction_with(false, |arm| {
            let spec = SegmentSpec::two_way(2, 2);
            if arm == WEST {
                spec.with_outer_lane(LaneDirection::Forward, kerb)
            } else {
                spec
            }
        });
        let flags = SimLaneFlags::new();
        let routing = RoutingManager::default();
        settle(&mut j.network, &flags, &routing);

        let middle = lane_toward(&j.network, j.arms[WEST], j.centre, 1);
        let transitions: Vec<_> = routing_of(&routing, &j.network, middle)
            .into_segment(j.arms[EAST])
            .copied()
            .collect();
        assert_eq!(transitions.len(), 1);
        (outer_of(&j.network, transitions[0].lane), transitions[0].distance)
    };

    // Three car lanes into two: the middle lane keeps its outer index
    assert_eq!(straight_on(LaneSpec::car()), (1, 0));
    // A kerb bus lane that ends at the junction moves it one lane outward
    assert_eq!(straight_on(LaneSpec::bus()), (0, 1));
}

#[test]
fn test_tram_lane_on_a_road_is_forced() {
    let spec = || SegmentSpec::one_way(1).with_inner_lane(LaneDirection::Forward, LaneSpec::tram());
    let (mut network, nodes, [s1, s2]) = chain(spec(), spec());
    let flags = SimLaneFlags::new();
    let routing = RoutingManager::default();
    settle(&mut network, &flags, &routing);

    let lane_of = |segment: SegmentId, node: NodeId, types: VehicleTypes| {
        network
            .lanes_toward(segment, node)
            .into_iter()
            .find(|l| l.vehicle_types == types)
            .map(|l| l.id)
            .expect("lane of the vehicle type")
    };

    let tram = routing_of(&routing, &network, lane_of(s1, nodes[1], VehicleTypes::TRAM));
    let transitions: Vec<_> = tram.all().copied().collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].lane, lane_of(s2, nodes[2], VehicleTypes::TRAM));
    assert_eq!(transitions[0].kind, TransitionKind::Forced);
    assert_eq!(transitions[0].distance, 0);

    let car = routing_of(&routing, &network, lane_of(s1, nodes[1], VehicleTypes::CAR));
    let transitions: Vec<_> = car.all().copied().collect();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].lane, lane_of(s2, nodes[2], VehicleTypes::CAR));
    assert_eq!(transitions[0].kind, TransitionKind::Default);
}

#[test]
fn test_invalid_segment_routing_is_empty() {
    let routing = SegmentRouting::invalid(SegmentId(7));
    assert_eq!(routing.segment, SegmentId(7));
    assert!(routing.summary.is_none());
    assert!(routing.lane_ends.is_empty());
    assert!(routing.neighbours.is_empty());
    assert_eq!(SegmentRouting::default().segment, SegmentId::default());
}
