//! Command dispatcher
//!
//! Validates a command locally, resolves the S-PIN security token for gated
//! operations, submits the POST and interprets the asynchronous acceptance
//! answer. Acceptance is success; the physical outcome becomes visible
//! through the next poll after the affected cache entries are invalidated.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use carlink_client::{CloudApi, CommandStatus, ResourceCache};
use carlink_core::{
    round_to_step, CommandOperation, CommandOutcome, CommandRequest, ConnectorError,
    ConnectorResult, Unit, VehicleModel,
};

/// Remote-accepted climatisation target range, in degrees Celsius
const MIN_TARGET_CELSIUS: f64 = 16.0;
const MAX_TARGET_CELSIUS: f64 = 29.5;

#[derive(Debug)]
pub struct CommandDispatcher {
    api: Arc<CloudApi>,
    cache: Arc<ResourceCache>,
    model: Arc<VehicleModel>,
}

impl CommandDispatcher {
    pub fn new(api: Arc<CloudApi>, cache: Arc<ResourceCache>, model: Arc<VehicleModel>) -> Self {
        Self { api, cache, model }
    }

    /// Submit one command and report its acceptance.
    ///
    /// `CommandRejected` and `InvalidCommand` are final; `CommandTransport`
    /// and `Timeout` mean the submission state is unknown and the caller may
    /// retry.
    pub async fn dispatch(&self, request: CommandRequest) -> ConnectorResult<CommandOutcome> {
        let command_id = Uuid::new_v4();
        let operation = request.operation;
        debug!(%command_id, vin = %request.vin, operation = operation.as_str(), "dispatching command");

        self.validate(&request)?;

        let sec_token = if operation.requires_spin() {
            let spin = request
                .spin
                .clone()
                .or_else(|| self.api.session().spin().map(str::to_string))
                .ok_or_else(|| {
                    ConnectorError::InvalidCommand(format!(
                        "{} requires an S-PIN and none is configured",
                        operation.as_str()
                    ))
                })?;
            Some(self.api.verify_spin(&spin).await?)
        } else {
            None
        };

        let body = build_body(&request)?;
        let response = self
            .api
            .send_command(operation, &request.vin, body, sec_token.as_deref())
            .await?;

        let status = response
            .status
            .as_deref()
            .map(CommandStatus::parse)
            .unwrap_or(CommandStatus::Accepted);
        match status {
            CommandStatus::Rejected | CommandStatus::Failed => {
                let reason = response
                    .reason
                    .unwrap_or_else(|| format!("remote reported {status:?}"));
                warn!(%command_id, vin = %request.vin, %reason, "command rejected");
                return Err(ConnectorError::CommandRejected(reason));
            }
            CommandStatus::Accepted | CommandStatus::InProgress | CommandStatus::Unknown => {}
        }

        // Accepted: the cached view of the affected resources is now stale.
        self.cache
            .invalidate_kinds(&request.vin, operation.invalidates());
        info!(
            %command_id,
            vin = %request.vin,
            operation = operation.as_str(),
            request_id = response.request_id.as_deref().unwrap_or("-"),
            "command accepted"
        );

        Ok(CommandOutcome {
            request_id: response.request_id,
            in_progress: status == CommandStatus::InProgress,
        })
    }

    fn validate(&self, request: &CommandRequest) -> ConnectorResult<()> {
        let vehicle = self.model.vehicle(&request.vin).ok_or_else(|| {
            ConnectorError::InvalidCommand(format!("unknown vehicle '{}'", request.vin))
        })?;

        if let Some(capability) = required_capability(request.operation) {
            if !vehicle.capabilities.is_empty() && !vehicle.has_capability(capability) {
                return Err(ConnectorError::InvalidCommand(format!(
                    "vehicle '{}' does not support {}",
                    request.vin,
                    request.operation.as_str()
                )));
            }
        }

        match (request.operation, request.parameters.target_level) {
            (CommandOperation::ChargingSetTarget, None) => {
                return Err(ConnectorError::InvalidCommand(
                    "charging-set-target requires a target charge level".to_string(),
                ));
            }
            (CommandOperation::ChargingSetTarget, Some(level)) if !(1..=100).contains(&level) => {
                return Err(ConnectorError::InvalidCommand(format!(
                    "target charge level {level} % outside 1-100 %"
                )));
            }
            (CommandOperation::ChargingSetTarget, Some(_)) | (_, None) => {}
            (other, Some(_)) => {
                return Err(ConnectorError::InvalidCommand(format!(
                    "{} does not take a target charge level",
                    other.as_str()
                )));
            }
        }

        if let Some(target) = request.parameters.target_temperature {
            let celsius = match request.parameters.temperature_unit {
                Some(Unit::Fahrenheit) => (target - 32.0) * 5.0 / 9.0,
                _ => target,
            };
            if !(MIN_TARGET_CELSIUS..=MAX_TARGET_CELSIUS).contains(&celsius) {
                return Err(ConnectorError::InvalidCommand(format!(
                    "target temperature {celsius:.1} °C outside {MIN_TARGET_CELSIUS}-{MAX_TARGET_CELSIUS} °C"
                )));
            }
        }
        Ok(())
    }
}

fn required_capability(operation: CommandOperation) -> Option<&'static str> {
    match operation {
        CommandOperation::Lock | CommandOperation::Unlock => Some("access"),
        CommandOperation::ClimatisationStart
        | CommandOperation::ClimatisationStop
        | CommandOperation::WindowHeatingStart
        | CommandOperation::WindowHeatingStop => Some("climatisation"),
        CommandOperation::ChargingStart
        | CommandOperation::ChargingStop
        | CommandOperation::ChargingSetTarget => Some("charging"),
    }
}

/// Request body for the command POST, when the endpoint takes one.
///
/// The climatisation target is rounded to the remote service's 0.5 degree
/// steps before submission.
fn build_body(request: &CommandRequest) -> ConnectorResult<Option<Value>> {
    match request.operation {
        CommandOperation::ClimatisationStart => {
            let mut body = serde_json::Map::new();
            if let Some(target) = request.parameters.target_temperature {
                let unit = match request.parameters.temperature_unit {
                    Some(Unit::Fahrenheit) => "fahrenheit",
                    _ => "celsius",
                };
                body.insert(
                    "targetTemperature".to_string(),
                    serde_json::json!(round_to_step(target, 0.5)),
                );
                body.insert("targetTemperatureUnit".to_string(), serde_json::json!(unit));
            }
            Ok(if body.is_empty() {
                None
            } else {
                Some(Value::Object(body))
            })
        }
        CommandOperation::ChargingSetTarget => {
            let level = request.parameters.target_level.ok_or_else(|| {
                ConnectorError::InvalidCommand(
                    "charging-set-target requires a target charge level".to_string(),
                )
            })?;
            Ok(Some(serde_json::json!({
                "defaultMaxTargetSocPercentage": level,
            })))
        }
        _ => Ok(None),
    }
}
