//! Startup and teardown of full bridges against the in-memory RTI.

use fedbridge_core::{
    names, BridgeError, ClassManifest, ControlState, FederateBridge, ReservationOutcome,
};
use fedbridge_env::{LogicalTime, RtiError};
use fedbridge_sim::{
    federation_fom, sim_config, ProbeFederate, SimBridge, SimContext, SimEngine, SimRti,
    FEDERATION,
};
use std::sync::Arc;
use std::time::Duration;

fn context() -> Arc<SimContext> {
    Arc::new(SimContext::new(42).with_real_time_cap(Duration::from_millis(100)))
}

async fn start(rti: &Arc<SimRti>, name: &str) -> Result<SimBridge, BridgeError> {
    FederateBridge::start(
        sim_config(name),
        context(),
        rti.ambassador(),
        SimEngine::ready_after(0),
    )
    .await
}

#[tokio::test]
async fn unreachable_rti_is_fatal() {
    let rti = SimRti::new(&federation_fom());
    rti.controller().set_unreachable(true);

    let err = start(&rti, "fed-a").await.err().unwrap();
    assert!(matches!(err, BridgeError::Connect { .. }));
    assert!(err.is_fatal_startup());
}

#[tokio::test]
async fn join_retries_until_federation_appears() {
    let rti = SimRti::new(&federation_fom());
    rti.controller().create_federation(FEDERATION);
    rti.controller().fail_next_joins(2);

    let bridge = start(&rti, "fed-a").await.unwrap();
    assert_eq!(rti.controller().federates(FEDERATION), vec!["fed-a"]);
    bridge.resign().await.unwrap();
}

#[tokio::test]
async fn join_gives_up_and_disconnects() {
    let rti = SimRti::new(&federation_fom());

    let err = start(&rti, "fed-a").await.err().unwrap();
    match err {
        BridgeError::Join {
            attempts, source, ..
        } => {
            assert_eq!(attempts, sim_config("fed-a").join_retry.max_attempts);
            assert_eq!(source, RtiError::FederationNotFound(FEDERATION.into()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(rti.controller().federates(FEDERATION).is_empty());
}

#[tokio::test]
async fn create_if_missing_creates_federation() {
    let rti = SimRti::new(&federation_fom());
    let mut config = sim_config("fed-a");
    config.create_if_missing = true;

    let bridge: SimBridge = FederateBridge::start(
        config,
        context(),
        rti.ambassador(),
        SimEngine::ready_after(0),
    )
    .await
    .unwrap();
    assert_eq!(rti.controller().federates(FEDERATION), vec!["fed-a"]);

    // A second federate with the flag finds it already there.
    let mut config = sim_config("fed-b");
    config.create_if_missing = true;
    let other: SimBridge = FederateBridge::start(
        config,
        context(),
        rti.ambassador(),
        SimEngine::ready_after(0),
    )
    .await
    .unwrap();

    other.resign().await.unwrap();
    bridge.resign().await.unwrap();
}

#[tokio::test]
async fn missing_fom_class_fails_startup_and_leaves() {
    // Catalogue without the outcome interactions.
    let fom = ClassManifest::new().interaction(names::SCENARIO_LOAD, &[names::SC_NAME]);
    let rti = SimRti::new(&fom);
    rti.controller().create_federation(FEDERATION);

    let err = start(&rti, "fed-a").await.err().unwrap();
    assert!(matches!(err, BridgeError::Resolve { .. }));
    assert!(rti.controller().federates(FEDERATION).is_empty());
}

#[tokio::test]
async fn duplicate_federate_name_is_not_retried() {
    let rti = SimRti::new(&federation_fom());
    rti.controller().create_federation(FEDERATION);
    let first = start(&rti, "fed-a").await.unwrap();

    let err = start(&rti, "fed-a").await.err().unwrap();
    assert!(matches!(
        err,
        BridgeError::Join {
            attempts: 1,
            source: RtiError::FederateNameInUse(_),
            ..
        }
    ));
    first.resign().await.unwrap();
}

#[tokio::test]
async fn resign_frees_names_and_cancels_waits() {
    let rti = SimRti::new(&federation_fom());
    rti.controller().create_federation(FEDERATION);
    rti.controller().withhold_grants(true);
    let bridge = Arc::new(start(&rti, "fed-a").await.unwrap());

    bridge.reserve_object_name("Tank-1").await.unwrap();
    assert_eq!(
        rti.controller().reservation_owner(FEDERATION, "Tank-1").as_deref(),
        Some("fed-a")
    );

    bridge.request_advance(LogicalTime(1.0)).await.unwrap();
    let waiter = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.await_grant().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    bridge.resign().await.unwrap();
    bridge.resign().await.unwrap();

    assert!(matches!(waiter.await.unwrap(), Err(BridgeError::Resigned)));
    assert!(bridge.is_resigned());
    assert!(rti.controller().federates(FEDERATION).is_empty());
    assert_eq!(rti.controller().reservation_owner(FEDERATION, "Tank-1"), None);
    assert!(matches!(
        bridge.send(names::SCENARIO_LOADED, &[(names::FEDERATE_NAME, "fed-a")], None).await,
        Err(BridgeError::Resigned)
    ));
}

#[tokio::test]
async fn advance_timeout_when_grants_withheld() {
    let rti = SimRti::new(&federation_fom());
    rti.controller().create_federation(FEDERATION);
    rti.controller().withhold_grants(true);
    let bridge = start(&rti, "fed-a").await.unwrap();

    let target = bridge.advance_step().await.unwrap();
    assert_eq!(target, LogicalTime(1.0));
    assert!(matches!(
        bridge.await_grant().await,
        Err(BridgeError::AdvanceTimeout(t, _)) if t == target
    ));

    // The request is still outstanding; releasing grants completes it.
    rti.controller().withhold_grants(false);
    assert_eq!(bridge.await_grant().await.unwrap(), target);
    assert_eq!(bridge.consume_grant().unwrap(), target);
    assert_eq!(bridge.time_state().granted, target);
    bridge.resign().await.unwrap();
}

#[tokio::test]
async fn commands_from_director_drive_the_engine() {
    let rti = SimRti::new(&federation_fom());
    rti.controller().create_federation(FEDERATION);
    let engine = SimEngine::ready_after(2);
    let bridge: SimBridge = FederateBridge::start(
        sim_config("fed-a"),
        context(),
        rti.ambassador(),
        engine.clone(),
    )
    .await
    .unwrap();

    let director = ProbeFederate::join(&rti, "director", FEDERATION, &ClassManifest::control())
        .await
        .unwrap();
    director.publish(names::SCENARIO_LOAD).await.unwrap();
    director.publish(names::SCENARIO_STOP).await.unwrap();
    director.subscribe(names::SCENARIO_LOADED).await.unwrap();

    // Stop before load is ignored.
    director
        .send(names::SCENARIO_STOP, &[(names::SC_NAME, "fed-a")], None)
        .await
        .unwrap();
    director
        .send(names::SCENARIO_LOAD, &[(names::SC_NAME, " fed-a ")], Some("fed-a"))
        .await
        .unwrap();

    let loaded = director
        .wait_for(names::SCENARIO_LOADED, 1, Duration::from_secs(3))
        .await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(*bridge.control_state().borrow(), ControlState::Loaded);
    assert_eq!(engine.starts(), 1);
    assert!(!engine
        .commands()
        .contains(&fedbridge_sim::EngineCommand::Stop));

    bridge.resign().await.unwrap();
    director.leave().await.unwrap();
}

#[tokio::test]
async fn name_is_reservable_again_after_lost_answer() {
    let rti = SimRti::new(&federation_fom());
    rti.controller().create_federation(FEDERATION);
    let ctx = context();
    let config = sim_config("fed-a");
    let grace = Duration::from_millis(config.reservation_grace_ms);
    let bridge: SimBridge = FederateBridge::start(
        config,
        ctx.clone(),
        rti.ambassador(),
        SimEngine::ready_after(0),
    )
    .await
    .unwrap();

    rti.controller().withhold_reservations(true);
    let outcome = bridge
        .reserve_object_name_within("X", Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(outcome, ReservationOutcome::TimedOut);
    rti.controller().withhold_reservations(false);

    ctx.advance_time(grace);
    for _ in 0..3 {
        let outcome = bridge
            .reserve_object_name_within("X", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(outcome, ReservationOutcome::Reserved);
    }
    assert_eq!(
        rti.controller().reservation_owner(FEDERATION, "X").as_deref(),
        Some("fed-a")
    );
    bridge.resign().await.unwrap();
}
