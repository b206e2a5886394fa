//! Wire types for the remote cloud API
//!
//! The remote service speaks camelCase JSON; everything is normalized here at
//! the serde boundary. The exact schema is an external contract, mocked by
//! [`crate::testing::MockCloud`] in tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Authentication
// =============================================================================

/// Token payload returned by login and refresh
///
/// Some deployments of the identity service emit snake_case keys; aliases
/// accept both spellings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    #[serde(alias = "expires_in")]
    pub expires_in: u64,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
}

// =============================================================================
// Garage / capabilities
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarageResponse {
    #[serde(default)]
    pub vehicles: Vec<GarageVehicle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarageVehicle {
    pub vin: String,
    #[serde(default, alias = "vehicleNickname")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_year: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    #[serde(default)]
    pub capabilities: Vec<CapabilityEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub id: String,
    /// Status markers; an empty list means the capability is usable
    #[serde(default)]
    pub status: Vec<String>,
}

impl CapabilityEntry {
    /// Whether the capability can actually be used
    pub fn is_ok(&self) -> bool {
        !self
            .status
            .iter()
            .any(|s| matches!(s.as_str(), "disabled" | "deactivated" | "initiallyDisabled"))
    }
}

// =============================================================================
// Vehicle status
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatus {
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked: Option<bool>,
    /// "on" / "off"
    #[serde(default)]
    pub lights: Option<String>,
    #[serde(default)]
    pub doors: HashMap<String, DoorStatus>,
    /// Window id to open state ("open" / "closed")
    #[serde(default)]
    pub windows: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorStatus {
    /// "true" / "false" as strings, as the remote service sends them
    #[serde(default)]
    pub open: Option<String>,
    #[serde(default)]
    pub locked: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    #[serde(default)]
    pub connection: Option<ConnectionMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMode {
    #[serde(default)]
    pub mode: Option<String>,
}

// =============================================================================
// Telemetry resources
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileageResponse {
    #[serde(default)]
    pub mileage_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangesResponse {
    #[serde(default)]
    pub ranges: Vec<RangeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeEntry {
    pub range_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClimatisationStatus {
    #[serde(default)]
    pub climatisation_status: Option<ClimatisationStatusInner>,
    #[serde(default)]
    pub window_heating_status: Option<WindowHeatingStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClimatisationStatusInner {
    #[serde(default)]
    pub car_captured_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub climatisation_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowHeatingStatus {
    #[serde(default)]
    pub window_heating_status: Vec<WindowHeatingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowHeatingEntry {
    pub window_location: String,
    /// "on" / "off"
    pub window_heating_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClimatisationSettings {
    #[serde(default)]
    pub car_captured_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_temperature_in_celsius: Option<f64>,
    #[serde(default)]
    pub target_temperature_in_fahrenheit: Option<f64>,
    #[serde(default)]
    pub climatisation_without_external_power: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStatus {
    #[serde(default)]
    pub charging: Option<ChargingStatusInner>,
    #[serde(default)]
    pub battery: Option<BatteryStatus>,
    #[serde(default)]
    pub plug: Option<PlugStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingStatusInner {
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryStatus {
    #[serde(default)]
    pub current_soc_pct: Option<u8>,
    #[serde(default)]
    pub cruising_range_electric_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlugStatus {
    /// "connected" / "disconnected"
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub external_power: Option<String>,
    #[serde(default)]
    pub lock: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSettings {
    #[serde(default)]
    pub max_charge_current_ac: Option<bool>,
    #[serde(default)]
    pub default_max_target_soc_percentage: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkingPosition {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceResponse {
    #[serde(default)]
    pub inspection_due_days: Option<i64>,
    #[serde(default)]
    pub inspection_due_km: Option<f64>,
    #[serde(default)]
    pub oil_service_due_days: Option<i64>,
    #[serde(default)]
    pub oil_service_due_km: Option<f64>,
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinVerifyResponse {
    pub security_token: String,
}

/// Remote acceptance status for an asynchronous command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Accepted,
    InProgress,
    Rejected,
    Failed,
    Unknown,
}

impl CommandStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "accepted" | "queued" => Self::Accepted,
            "in_progress" | "inProgress" | "running" => Self::InProgress,
            "rejected" => Self::Rejected,
            "failed" | "error" => Self::Failed,
            other => {
                tracing::info!(target: "carlink::api", status = other, "unknown command status");
                Self::Unknown
            }
        }
    }
}

/// Body returned by command POST endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Error body the remote service attaches to non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    pub fn message(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}
