//! Typed surface over the cloud API endpoints
//!
//! All endpoint knowledge (paths, composite fetches, command routing) lives
//! here; callers deal in `ResourceKind` and typed requests. Requests go
//! through [`SessionManager::request`] and inherit its renewal/retry
//! behaviour.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

use carlink_core::{CommandOperation, ConnectorError, ConnectorResult, ResourceKind};

use crate::session::SessionManager;
use crate::types::{
    ApiErrorBody, CapabilitiesResponse, CapabilityEntry, CommandResponse, GarageResponse,
    GarageVehicle, SpinVerifyResponse,
};

#[derive(Debug)]
pub struct CloudApi {
    session: Arc<SessionManager>,
}

impl CloudApi {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Authenticated GET returning the raw JSON body; `None` for 204.
    pub async fn get_json(&self, path: &str) -> ConnectorResult<Option<Value>> {
        let owned = path.to_string();
        debug!(target: "carlink::api", path = %owned, "GET");
        let response = self
            .session
            .request(|http, base, _user| http.get(endpoint(base, &owned)))
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let value = response
                    .json()
                    .await
                    .map_err(|e| ConnectorError::Parse(format!("{path}: {e}")))?;
                Ok(Some(value))
            }
            _ => Err(extract_error(response, path).await),
        }
    }

    /// Vehicles enrolled for the logged-in account
    pub async fn garage(&self) -> ConnectorResult<Vec<GarageVehicle>> {
        let response = self
            .session
            .request(|http, base, user| {
                let user = user.unwrap_or("me");
                http.get(endpoint(base, &format!("/v1/users/{user}/garage")))
            })
            .await?;

        if !response.status().is_success() {
            return Err(extract_error(response, "garage").await);
        }
        let garage: GarageResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Parse(format!("garage response: {e}")))?;
        Ok(garage.vehicles)
    }

    pub async fn capabilities(&self, vin: &str) -> ConnectorResult<Vec<CapabilityEntry>> {
        let value = self
            .get_json(&format!("/v2/vehicles/{vin}/capabilities"))
            .await?
            .unwrap_or(Value::Null);
        let response: CapabilitiesResponse = serde_json::from_value(value)
            .map_err(|e| ConnectorError::Parse(format!("capabilities response: {e}")))?;
        Ok(response.capabilities)
    }

    /// Fetch the raw payload backing one cached resource.
    ///
    /// Composite resources (status + settings pairs) are merged into one
    /// object so a single cache entry covers everything a command
    /// invalidation must refresh. Returns `None` when the remote reports the
    /// resource as currently unavailable (204).
    pub async fn fetch_resource(
        &self,
        kind: ResourceKind,
        vin: &str,
    ) -> ConnectorResult<Option<Value>> {
        match kind {
            ResourceKind::Garage => {
                let vehicles = self.garage().await?;
                Ok(Some(serde_json::json!({ "vehicles": vehicles })))
            }
            ResourceKind::Capabilities => {
                self.get_json(&format!("/v2/vehicles/{vin}/capabilities")).await
            }
            ResourceKind::Status => {
                let status = self.get_json(&format!("/v2/vehicles/{vin}/status")).await?;
                // Connection mode is informational; a failure here must not
                // take the whole status resource down.
                let connection = self
                    .get_json(&format!("/v2/vehicles/{vin}/connection"))
                    .await
                    .unwrap_or(None);
                Ok(status.map(|status| {
                    serde_json::json!({
                        "status": status,
                        "connection": connection,
                    })
                }))
            }
            ResourceKind::Mileage => self.get_json(&format!("/v1/vehicles/{vin}/mileage")).await,
            ResourceKind::Ranges => self.get_json(&format!("/v1/vehicles/{vin}/ranges")).await,
            ResourceKind::Climatisation => {
                let status = self
                    .get_json(&format!("/v1/vehicles/{vin}/climatisation/status"))
                    .await?;
                let settings = self
                    .get_json(&format!("/v2/vehicles/{vin}/climatisation/settings"))
                    .await?;
                Ok(Some(serde_json::json!({
                    "status": status,
                    "settings": settings,
                })))
            }
            ResourceKind::Charging => {
                let status = self
                    .get_json(&format!("/v1/vehicles/{vin}/charging/status"))
                    .await?;
                let settings = self
                    .get_json(&format!("/v1/vehicles/{vin}/charging/settings"))
                    .await?;
                Ok(Some(serde_json::json!({
                    "status": status,
                    "settings": settings,
                })))
            }
            ResourceKind::ParkingPosition => {
                self.get_json(&format!("/v1/vehicles/{vin}/parkingposition")).await
            }
            ResourceKind::Maintenance => {
                self.get_json(&format!("/v1/vehicles/{vin}/maintenance")).await
            }
            ResourceKind::Renders => self.get_json(&format!("/v1/vehicles/{vin}/renders")).await,
        }
    }

    /// Exchange the S-PIN for a short-lived security token.
    ///
    /// The PIN itself is never logged. A rejected PIN comes back as
    /// `CommandRejected` so callers do not retry it.
    pub async fn verify_spin(&self, spin: &str) -> ConnectorResult<String> {
        debug!(target: "carlink::api", "verifying S-PIN");
        let body = serde_json::json!({ "spin": spin });
        let response = self
            .session
            .request(|http, base, _user| {
                http.post(endpoint(base, "/v1/spin/verify")).json(&body)
            })
            .await
            .map_err(as_command_transport)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ConnectorError::CommandRejected(
                "S-PIN rejected by the remote service".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(extract_error(response, "spin verification").await);
        }

        let verified: SpinVerifyResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Parse(format!("spin verification response: {e}")))?;
        Ok(verified.security_token)
    }

    /// Submit one command POST.
    ///
    /// 2xx returns the acceptance body (an empty body is tolerated);
    /// 403/422 means the remote rejected the command outright; transport
    /// failures surface as `CommandTransport` so the caller may retry.
    pub async fn send_command(
        &self,
        operation: CommandOperation,
        vin: &str,
        body: Option<Value>,
        sec_token: Option<&str>,
    ) -> ConnectorResult<CommandResponse> {
        let path = command_path(operation, vin);
        debug!(target: "carlink::api", %path, operation = operation.as_str(), "POST command");

        let token = sec_token.map(str::to_string);
        let response = self
            .session
            .request(|http, base, _user| {
                let mut builder = http.post(endpoint(base, &path));
                if let Some(body) = &body {
                    builder = builder.json(body);
                }
                if let Some(token) = &token {
                    builder = builder.header("SecToken", token);
                }
                builder
            })
            .await
            .map_err(as_command_transport)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = read_error_body(response).await
                .unwrap_or_else(|| format!("command rejected with HTTP {status}"));
            return Err(ConnectorError::CommandRejected(reason));
        }
        if !status.is_success() {
            return Err(match extract_error(response, operation.as_str()).await {
                ConnectorError::TransientNetwork(reason) => ConnectorError::CommandTransport(reason),
                other => other,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ConnectorError::Parse(format!("command response: {e}")))?;
        if bytes.is_empty() {
            return Ok(CommandResponse { request_id: None, status: None, reason: None });
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| ConnectorError::Parse(format!("command response: {e}")))
    }
}

/// Join a path onto the base URL. The base is validated at session
/// construction, so joining an absolute path cannot fail in practice; the
/// fallback keeps the builder total.
fn endpoint(base: &Url, path: &str) -> Url {
    base.join(path).unwrap_or_else(|_| base.clone())
}

fn command_path(operation: CommandOperation, vin: &str) -> String {
    match operation {
        CommandOperation::Lock => format!("/v1/vehicles/{vin}/access/lock"),
        CommandOperation::Unlock => format!("/v1/vehicles/{vin}/access/unlock"),
        CommandOperation::ClimatisationStart => format!("/v2/vehicles/{vin}/climatisation/start"),
        CommandOperation::ClimatisationStop => format!("/v1/vehicles/{vin}/climatisation/stop"),
        CommandOperation::ChargingStart => format!("/v1/vehicles/{vin}/charging/start"),
        CommandOperation::ChargingStop => format!("/v1/vehicles/{vin}/charging/stop"),
        CommandOperation::ChargingSetTarget => format!("/v1/vehicles/{vin}/charging/settings"),
        CommandOperation::WindowHeatingStart => format!("/v1/vehicles/{vin}/windowheating/start"),
        CommandOperation::WindowHeatingStop => format!("/v1/vehicles/{vin}/windowheating/stop"),
    }
}

fn as_command_transport(err: ConnectorError) -> ConnectorError {
    match err {
        ConnectorError::TransientNetwork(reason) => ConnectorError::CommandTransport(reason),
        other => other,
    }
}

async fn read_error_body(response: reqwest::Response) -> Option<String> {
    let body: ApiErrorBody = response.json().await.ok()?;
    body.message().map(str::to_string)
}

/// Map a non-success response to the connector error taxonomy, consuming the
/// body for the remote's own error message when it has one.
async fn extract_error(response: reqwest::Response, context: &str) -> ConnectorError {
    let status = response.status();
    let detail = read_error_body(response)
        .await
        .unwrap_or_else(|| format!("HTTP {status}"));

    match status {
        StatusCode::NOT_FOUND => {
            ConnectorError::ResourceUnavailable(format!("{context}: {detail}"))
        }
        status if status.is_server_error() => {
            ConnectorError::TransientNetwork(format!("{context}: {detail}"))
        }
        status => ConnectorError::api(status.as_u16(), format!("{context}: {detail}")),
    }
}
