//! Integration tests for the carlink connector
//!
//! The tests exercise the full session/cache/poll/command stack against the
//! in-process [`MockCloud`] server from `carlink_client::testing`: real HTTP,
//! real token handshakes, stubbed vehicle payloads.
//!
//! Run with: `cargo test -p carlink-tests`

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use carlink_client::testing::MockCloud;
use carlink_client::{CloudApi, Credentials, ResourceCache, SessionManager};
use carlink_connector::Poller;
use carlink_core::VehicleModel;

pub const VIN: &str = "VSSZZZK1ZPF000001";

/// Log in against the mock with its default test account
pub async fn api_for(mock: &MockCloud) -> Arc<CloudApi> {
    let credentials = Credentials::new("user@example.com", "secret", Some("1234".to_string()));
    let session = Arc::new(
        SessionManager::new(&mock.base_url(), credentials).expect("session manager"),
    );
    session.login().await.expect("login against mock");
    Arc::new(CloudApi::new(session))
}

/// Poller wired to a fresh cache and model
pub fn poller_for(api: Arc<CloudApi>, max_age: Duration) -> (Poller, Arc<ResourceCache>, Arc<VehicleModel>) {
    let cache = Arc::new(ResourceCache::new());
    let model = VehicleModel::new();
    let poller = Poller::new(
        api,
        cache.clone(),
        model.clone(),
        Duration::from_secs(300),
        max_age,
    );
    (poller, cache, model)
}

/// Stub a one-vehicle garage with the baseline telemetry resources
pub fn stub_vehicle(mock: &MockCloud, vin: &str) {
    mock.stub_json(
        "/v1/users/user-1/garage",
        json!({
            "vehicles": [
                {"vin": vin, "nickname": "Daily", "model": "Born", "modelYear": 2023}
            ]
        }),
    );
    stub_capabilities(mock, vin, &["access"]);
    mock.stub_json(
        &format!("/v2/vehicles/{vin}/status"),
        json!({
            "updatedAt": "2026-08-29T10:15:00Z",
            "locked": true,
            "lights": "off",
            "doors": {
                "frontLeft": {"open": "false", "locked": "true"},
                "trunk": {"open": "false", "locked": "true"}
            },
            "windows": {"frontLeft": "closed", "sunRoof": "closed"}
        }),
    );
    mock.stub_json(
        &format!("/v2/vehicles/{vin}/connection"),
        json!({"connection": {"mode": "online"}}),
    );
    mock.stub_json(
        &format!("/v1/vehicles/{vin}/mileage"),
        json!({"mileageKm": 12345.0}),
    );
    mock.stub_json(
        &format!("/v1/vehicles/{vin}/ranges"),
        json!({"ranges": [{"rangeName": "electric", "value": 250.0}]}),
    );
}

pub fn stub_capabilities(mock: &MockCloud, vin: &str, ids: &[&str]) {
    let entries: Vec<_> = ids.iter().map(|id| json!({"id": id, "status": []})).collect();
    mock.stub_json(
        &format!("/v2/vehicles/{vin}/capabilities"),
        json!({"capabilities": entries}),
    );
}
