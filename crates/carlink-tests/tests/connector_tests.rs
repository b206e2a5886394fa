//! Full lifecycle tests: configuration in, connector up, commands through,
//! clean shutdown. Credentials come from the config or from a netrc file.

use std::io::Write;
use std::time::Duration;

use carlink_client::testing::{wait_for, MockCloud};
use carlink_connector::{Connector, ConnectorConfig};
use carlink_core::{CommandOperation, CommandRequest, ConnectionState, ConnectorError};
use carlink_tests::{stub_vehicle, VIN};

fn config_for(mock: &MockCloud) -> ConnectorConfig {
    ConnectorConfig {
        base_url: mock.base_url(),
        brand: Default::default(),
        username: Some("user@example.com".to_string()),
        password: Some("secret".to_string()),
        spin: Some("1234".to_string()),
        netrc: None,
        interval: 300,
        max_age: None,
        log_level: "info".to_string(),
        api_log_level: "warn".to_string(),
    }
}

#[tokio::test]
async fn connector_starts_polls_and_shuts_down() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);

    let connector = Connector::start(config_for(&mock)).await.unwrap();
    let model = connector.model();

    assert!(
        wait_for(
            || async { model.connection_state() == ConnectionState::Connected },
            Duration::from_secs(5),
        )
        .await,
        "connector never reached Connected"
    );
    assert_eq!(model.vins(), vec![VIN.to_string()]);

    let outcome = connector
        .execute(CommandRequest::new(VIN, CommandOperation::Lock))
        .await
        .unwrap();
    assert!(outcome.request_id.is_some());

    connector.shutdown().await;
    assert_eq!(model.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn wrong_password_fails_start_before_any_polling() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);

    let mut config = config_for(&mock);
    config.password = Some("not-the-password".to_string());

    let err = Connector::start(config).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Authentication(_)), "{err}");
    // The failure happened at login; no vehicle data was ever requested.
    assert_eq!(mock.request_count("/v1/users/user-1/garage"), 0);
}

#[tokio::test]
async fn invalid_interval_fails_start() {
    let mock = MockCloud::start().await.unwrap();

    let mut config = config_for(&mock);
    config.interval = 60;

    let err = Connector::start(config).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Config(_)), "{err}");
    assert_eq!(mock.login_count(), 0);
}

#[tokio::test]
async fn credentials_resolve_from_netrc_when_config_has_none() {
    let mock = MockCloud::start().await.unwrap();
    stub_vehicle(&mock, VIN);

    let mut netrc = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        netrc,
        "machine carlink-cupra login user@example.com password secret account 1234"
    )
    .unwrap();

    let mut config = config_for(&mock);
    config.username = None;
    config.password = None;
    config.spin = None;
    config.netrc = Some(netrc.path().to_path_buf());

    let connector = Connector::start(config).await.unwrap();
    let model = connector.model();
    assert!(
        wait_for(
            || async { model.connection_state() == ConnectionState::Connected },
            Duration::from_secs(5),
        )
        .await
    );

    // The netrc account field supplied the S-PIN, so a gated command works.
    connector
        .execute(CommandRequest::new(VIN, CommandOperation::Lock))
        .await
        .unwrap();

    connector.shutdown().await;
}

#[tokio::test]
async fn missing_credentials_everywhere_is_a_credential_error() {
    let mock = MockCloud::start().await.unwrap();

    let mut config = config_for(&mock);
    config.username = None;
    config.password = None;
    config.spin = None;
    let empty = tempfile::NamedTempFile::new().unwrap();
    config.netrc = Some(empty.path().to_path_buf());

    let err = Connector::start(config).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Credential(_)), "{err}");
    assert_eq!(mock.login_count(), 0);
}
