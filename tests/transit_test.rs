//! Junction-transit state machine tests

use junction_sim::simulation::{
    next_transit_state, JunctionTransitState, PriorityOptions, SignType, TransitInput, VehicleId,
    VehicleState, VehicleStateStore,
};

fn state(transit_state: JunctionTransitState, wait_ticks: u32, transit_tick: u64) -> VehicleState {
    let mut state = VehicleState::new(VehicleId(0));
    state.valid = true;
    state.transit_state = transit_state;
    state.wait_ticks = wait_ticks;
    state.transit_tick = transit_tick;
    state
}

fn input(sign: SignType, must_yield: bool, has_space: bool) -> TransitInput {
    TransitInput {
        tick: 100,
        sign,
        must_yield,
        has_space,
        speed: 5.0,
    }
}

#[test]
fn test_first_evaluation_enters() {
    let options = PriorityOptions::default();
    let decision = next_transit_state(
        &state(JunctionTransitState::None, 0, 0),
        &input(SignType::Main, false, true),
        &options,
    );
    assert_eq!(decision.state, JunctionTransitState::Enter);
    assert!(!decision.may_proceed());
}

#[test]
fn test_free_junction_is_left_directly() {
    let options = PriorityOptions::default();
    for sign in [SignType::None, SignType::Main, SignType::Yield] {
        let decision = next_transit_state(
            &state(JunctionTransitState::Enter, 0, 0),
            &input(sign, false, true),
            &options,
        );
        assert_eq!(decision.state, JunctionTransitState::Leave, "sign {:?}", sign);
        assert!(decision.may_proceed());
        assert!(!decision.forced);
    }
}

#[test]
fn test_stop_sign_requires_full_stop() {
    let options = PriorityOptions::default();
    let mut current = state(JunctionTransitState::Enter, 0, 0);
    let clear = input(SignType::Stop, false, true);

    let decision = next_transit_state(&current, &clear, &options);
    assert_eq!(decision.state, JunctionTransitState::Stop);

    current.transit_state = JunctionTransitState::Stop;
    for expected_wait in 1..options.min_stop_ticks {
        let decision = next_transit_state(&current, &clear, &options);
        assert_eq!(decision.state, JunctionTransitState::Stop);
        assert_eq!(decision.wait_ticks, expected_wait);
        current.wait_ticks = decision.wait_ticks;
    }

    let decision = next_transit_state(&current, &clear, &options);
    assert_eq!(decision.state, JunctionTransitState::Leave);
    assert_eq!(decision.wait_ticks, options.min_stop_ticks);
}

#[test]
fn test_yielding_vehicle_waits_until_clear() {
    let options = PriorityOptions::default();
    let current = state(JunctionTransitState::Enter, 0, 0);
    let decision = next_transit_state(&current, &input(SignType::Yield, true, true), &options);
    assert_eq!(decision.state, JunctionTransitState::Stop);

    let waiting = state(JunctionTransitState::Stop, 3, 0);
    let decision = next_transit_state(&waiting, &input(SignType::Yield, true, true), &options);
    assert_eq!(decision.state, JunctionTransitState::Stop);
    assert_eq!(decision.wait_ticks, 4);

    let decision = next_transit_state(&waiting, &input(SignType::Yield, false, true), &options);
    assert_eq!(decision.state, JunctionTransitState::Leave);
}

#[test]
fn test_wait_budget_forces_progress() {
    let options = PriorityOptions::default();
    let waiting = state(JunctionTransitState::Stop, options.max_wait_ticks - 1, 0);
    let decision = next_transit_state(&waiting, &input(SignType::Stop, true, true), &options);
    assert_eq!(decision.state, JunctionTransitState::Leave);
    assert!(decision.forced);
}

#[test]
fn test_missing_space_keeps_vehicle_stopped() {
    let options = PriorityOptions::default();
    let decision = next_transit_state(
        &state(JunctionTransitState::Enter, 0, 0),
        &input(SignType::Main, false, false),
        &options,
    );
    assert_eq!(decision.state, JunctionTransitState::Stop);

    // Space, not priority, is missing: the wait budget does not apply
    let waiting = state(JunctionTransitState::Stop, options.max_wait_ticks + 10, 0);
    let decision = next_transit_state(&waiting, &input(SignType::Main, false, false), &options);
    assert_eq!(decision.state, JunctionTransitState::Stop);
    assert!(!decision.forced);
}

#[test]
fn test_stalled_leave_becomes_blocked_then_reenters() {
    let options = PriorityOptions::default();
    let mut stalled = input(SignType::Main, false, true);
    stalled.speed = 0.0;

    let recent = state(JunctionTransitState::Leave, 0, stalled.tick - 1);
    let decision = next_transit_state(&recent, &stalled, &options);
    assert_eq!(decision.state, JunctionTransitState::Leave);

    let old = state(
        JunctionTransitState::Leave,
        0,
        stalled.tick - options.blocked_grace_ticks,
    );
    let decision = next_transit_state(&old, &stalled, &options);
    assert_eq!(decision.state, JunctionTransitState::Blocked);

    let blocked = state(JunctionTransitState::Blocked, 0, stalled.tick);
    let decision = next_transit_state(&blocked, &stalled, &options);
    assert_eq!(decision.state, JunctionTransitState::Enter);
}

#[test]
fn test_moving_leave_stays_committed() {
    let options = PriorityOptions::default();
    let old = state(JunctionTransitState::Leave, 0, 0);
    let decision = next_transit_state(&old, &input(SignType::Stop, true, false), &options);
    assert_eq!(decision.state, JunctionTransitState::Leave);
}

#[test]
fn test_store_tracks_state_changes() {
    let options = PriorityOptions::default();
    let mut store = VehicleStateStore::new();
    let vehicle = VehicleId(3);
    assert!(store.get(vehicle).is_none());

    store.get_or_create(vehicle);
    store.reset_transit(vehicle, 5);
    assert_eq!(store.get(vehicle).map(|s| s.transit_state), Some(JunctionTransitState::None));
    assert!(!store.get(vehicle).is_some_and(|s| s.valid));

    let current = store.get(vehicle).cloned().expect("state");
    let decision = next_transit_state(&current, &input(SignType::Main, false, true), &options);
    store.apply(vehicle, decision, 7);
    let after = store.get(vehicle).expect("state");
    assert_eq!(after.transit_state, JunctionTransitState::Enter);
    assert_eq!(after.transit_tick, 7);
    assert!(after.needs_arbitration());

    // Staying in the same state keeps the tick of the last change
    let waiting = state(JunctionTransitState::Stop, 2, 7);
    let decision = next_transit_state(&waiting, &input(SignType::Stop, false, true), &options);
    store.apply(vehicle, decision, 7);
    store.apply(vehicle, decision, 9);
    assert_eq!(store.get(vehicle).map(|s| s.transit_tick), Some(7));

    store.reset_transit(vehicle, 11);
    let reset = store.get(vehicle).expect("state");
    assert_eq!(reset.transit_state, JunctionTransitState::None);
    assert_eq!(reset.wait_ticks, 0);
    assert_eq!(store.len(), 1);

    store.remove(vehicle);
    assert!(store.is_empty());
}
