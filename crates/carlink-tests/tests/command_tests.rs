//! Command dispatch tests: S-PIN gating, acceptance, rejection and the
//! cache invalidation the next poll picks up.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use carlink_client::testing::MockCloud;
use carlink_connector::CommandDispatcher;
use carlink_core::{
    CommandOperation, CommandParameters, CommandRequest, ConnectorError, Unit,
};
use carlink_tests::{api_for, poller_for, stub_capabilities, stub_vehicle, VIN};

async fn dispatcher_for(
    mock: &MockCloud,
) -> (
    CommandDispatcher,
    carlink_connector::Poller,
    Arc<carlink_client::ResourceCache>,
) {
    let api = api_for(mock).await;
    let (poller, cache, model) = poller_for(api.clone(), Duration::from_secs(299));
    let dispatcher = CommandDispatcher::new(api, cache.clone(), model);
    (dispatcher, poller, cache)
}

#[tokio::test]
async fn accepted_lock_invalidates_the_status_cache() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;

    poller.tick().await.unwrap();
    let status_path = format!("/v2/vehicles/{VIN}/status");
    let mileage_path = format!("/v1/vehicles/{VIN}/mileage");
    assert_eq!(mock.request_count(&status_path), 1);

    let outcome = dispatcher
        .dispatch(CommandRequest::new(VIN, CommandOperation::Lock).with_spin("1234"))
        .await
        .unwrap();
    assert_eq!(outcome.request_id.as_deref(), Some("req-1"));

    // The next cycle refetches status; mileage is still served from cache.
    poller.tick().await.unwrap();
    assert_eq!(mock.request_count(&status_path), 2);
    assert_eq!(mock.request_count(&mileage_path), 1);
}

#[tokio::test]
async fn spin_falls_back_to_the_configured_credential() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    // No per-request spin; the session credential carries "1234".
    let outcome = dispatcher
        .dispatch(CommandRequest::new(VIN, CommandOperation::Unlock))
        .await
        .unwrap();
    assert!(outcome.request_id.is_some());
    assert_eq!(mock.request_count("/v1/spin/verify"), 1);
}

#[tokio::test]
async fn wrong_spin_is_rejected_and_the_cache_is_untouched() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    let err = dispatcher
        .dispatch(CommandRequest::new(VIN, CommandOperation::Lock).with_spin("0000"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::CommandRejected(_)), "{err}");
    assert_eq!(mock.request_count(&format!("/v1/vehicles/{VIN}/access/lock")), 0);

    // Nothing was invalidated: the next cycle is still a cache hit.
    poller.tick().await.unwrap();
    assert_eq!(mock.request_count(&format!("/v2/vehicles/{VIN}/status")), 1);
}

#[tokio::test]
async fn remote_rejection_surfaces_the_reason() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    mock.stub_json(
        &format!("/v1/vehicles/{VIN}/access/lock"),
        json!({"requestId": "req-9", "status": "rejected", "reason": "vehicle in motion"}),
    );
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    let err = dispatcher
        .dispatch(CommandRequest::new(VIN, CommandOperation::Lock).with_spin("1234"))
        .await
        .unwrap_err();
    match err {
        ConnectorError::CommandRejected(reason) => {
            assert_eq!(reason, "vehicle in motion")
        }
        other => panic!("expected rejection, got {other}"),
    }

    poller.tick().await.unwrap();
    assert_eq!(mock.request_count(&format!("/v2/vehicles/{VIN}/status")), 1);
}

#[tokio::test]
async fn command_for_unknown_vehicle_is_invalid() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    let err = dispatcher
        .dispatch(CommandRequest::new("WVWZZZUNKNOWN0000", CommandOperation::Lock))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidCommand(_)), "{err}");
}

#[tokio::test]
async fn command_without_the_capability_is_invalid() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    stub_capabilities(&mock, VIN, &["access"]);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    let err = dispatcher
        .dispatch(CommandRequest::new(VIN, CommandOperation::ChargingStart))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidCommand(_)), "{err}");
    assert_eq!(mock.request_count(&format!("/v1/vehicles/{VIN}/charging/start")), 0);
}

#[tokio::test]
async fn climatisation_start_submits_a_rounded_target_and_invalidates() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    stub_capabilities(&mock, VIN, &["access", "climatisation"]);
    mock.stub_json(
        &format!("/v1/vehicles/{VIN}/climatisation/status"),
        json!({"climatisationStatus": {"climatisationState": "off"}}),
    );
    mock.stub_json(
        &format!("/v2/vehicles/{VIN}/climatisation/settings"),
        json!({"targetTemperatureInCelsius": 20.0}),
    );
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();
    let settings_path = format!("/v2/vehicles/{VIN}/climatisation/settings");
    assert_eq!(mock.request_count(&settings_path), 1);

    dispatcher
        .dispatch(
            CommandRequest::new(VIN, CommandOperation::ClimatisationStart).with_parameters(
                CommandParameters {
                    target_temperature: Some(21.3),
                    temperature_unit: Some(Unit::Celsius),
                    target_level: None,
                },
            ),
        )
        .await
        .unwrap();

    let body = mock
        .command_body(&format!("/v2/vehicles/{VIN}/climatisation/start"))
        .expect("command body recorded");
    assert_eq!(body["targetTemperature"], json!(21.5));
    assert_eq!(body["targetTemperatureUnit"], json!("celsius"));

    // Both halves of the climatisation composite refresh on the next cycle.
    poller.tick().await.unwrap();
    assert_eq!(mock.request_count(&settings_path), 2);
}

#[tokio::test]
async fn charging_target_change_submits_the_level_and_invalidates() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    stub_capabilities(&mock, VIN, &["access", "charging"]);
    mock.stub_json(
        &format!("/v1/vehicles/{VIN}/charging/status"),
        json!({"charging": {"state": "readyForCharging"}, "battery": {"currentSocPct": 55}}),
    );
    mock.stub_json(
        &format!("/v1/vehicles/{VIN}/charging/settings"),
        json!({"maxChargeCurrentAc": true, "defaultMaxTargetSocPercentage": 80}),
    );
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();
    let settings_path = format!("/v1/vehicles/{VIN}/charging/settings");
    assert_eq!(mock.request_count(&settings_path), 1);

    dispatcher
        .dispatch(
            CommandRequest::new(VIN, CommandOperation::ChargingSetTarget).with_parameters(
                CommandParameters {
                    target_temperature: None,
                    temperature_unit: None,
                    target_level: Some(90),
                },
            ),
        )
        .await
        .unwrap();

    let body = mock
        .command_body(&settings_path)
        .expect("command body recorded");
    assert_eq!(body["defaultMaxTargetSocPercentage"], json!(90));

    // Acceptance drops the cached charging view; the next cycle refetches.
    poller.tick().await.unwrap();
    assert_eq!(mock.request_count(&settings_path), 3);
}

#[tokio::test]
async fn charging_target_without_a_level_is_rejected_locally() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    stub_capabilities(&mock, VIN, &["access", "charging"]);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    let err = dispatcher
        .dispatch(CommandRequest::new(VIN, CommandOperation::ChargingSetTarget))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidCommand(_)), "{err}");
    assert_eq!(
        mock.request_count(&format!("/v1/vehicles/{VIN}/charging/settings")),
        0
    );
}

#[tokio::test]
async fn stray_target_level_on_another_operation_is_rejected() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    let err = dispatcher
        .dispatch(
            CommandRequest::new(VIN, CommandOperation::Lock)
                .with_spin("1234")
                .with_parameters(CommandParameters {
                    target_temperature: None,
                    temperature_unit: None,
                    target_level: Some(80),
                }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidCommand(_)), "{err}");
    assert_eq!(mock.request_count(&format!("/v1/vehicles/{VIN}/access/lock")), 0);
}

#[tokio::test]
async fn out_of_range_target_temperature_is_rejected_locally() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);
    stub_capabilities(&mock, VIN, &["access", "climatisation"]);
    let (dispatcher, poller, _cache) = dispatcher_for(&mock).await;
    poller.tick().await.unwrap();

    let err = dispatcher
        .dispatch(
            CommandRequest::new(VIN, CommandOperation::ClimatisationStart).with_parameters(
                CommandParameters {
                    target_temperature: Some(35.0),
                    temperature_unit: Some(Unit::Celsius),
                    target_level: None,
                },
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidCommand(_)), "{err}");
    assert_eq!(
        mock.request_count(&format!("/v2/vehicles/{VIN}/climatisation/start")),
        0
    );
}
