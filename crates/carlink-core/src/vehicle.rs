//! Vehicle state model
//!
//! In-memory representation of the vehicles tracked by the connector,
//! exposed read-only to the host through snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::attributes::{Attribute, AttributeValue};

/// Connector-level connection state, exposed for host observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-vehicle online state as reported by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleConnectionState {
    Online,
    Offline,
    Unknown,
}

impl VehicleConnectionState {
    pub fn from_mode(mode: &str) -> Self {
        match mode {
            "online" => Self::Online,
            "offline" => Self::Offline,
            other => {
                tracing::info!(target: "carlink::api", mode = other, "unknown connection mode");
                Self::Unknown
            }
        }
    }
}

/// Central/door lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Locked,
    Unlocked,
    Unknown,
}

impl LockState {
    /// The remote service reports door locks as "true"/"false" strings
    pub fn from_flag(flag: &str) -> Self {
        match flag {
            "true" => Self::Locked,
            "false" => Self::Unlocked,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Locked => "locked",
            LockState::Unlocked => "unlocked",
            LockState::Unknown => "unknown",
        }
    }
}

/// Door/window open state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenState {
    Open,
    Closed,
    Unknown,
}

impl OpenState {
    pub fn from_flag(flag: &str) -> Self {
        match flag {
            "true" | "open" => Self::Open,
            "false" | "closed" => Self::Closed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpenState::Open => "open",
            OpenState::Closed => "closed",
            OpenState::Unknown => "unknown",
        }
    }
}

/// Charging state, normalized from the remote service's vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingState {
    Off,
    ReadyForCharging,
    NotReadyForCharging,
    Charging,
    Conservation,
    Error,
    Unknown,
}

impl ChargingState {
    pub fn from_remote(state: &str) -> Self {
        match state {
            "off" => Self::Off,
            "readyForCharging" => Self::ReadyForCharging,
            "notReadyForCharging" => Self::NotReadyForCharging,
            "charging" => Self::Charging,
            "conservation" | "chargePurposeReachedAndConservation" => Self::Conservation,
            "chargePurposeReachedAndNotConservationCharging" => Self::ReadyForCharging,
            "error" => Self::Error,
            other => {
                tracing::info!(target: "carlink::api", state = other, "unknown charging state");
                Self::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargingState::Off => "off",
            ChargingState::ReadyForCharging => "ready_for_charging",
            ChargingState::NotReadyForCharging => "not_ready_for_charging",
            ChargingState::Charging => "charging",
            ChargingState::Conservation => "conservation",
            ChargingState::Error => "error",
            ChargingState::Unknown => "unknown",
        }
    }
}

/// Climatisation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimatisationState {
    Off,
    Heating,
    Cooling,
    Ventilation,
    On,
    Unknown,
}

impl ClimatisationState {
    pub fn from_remote(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "off" => Self::Off,
            "heating" => Self::Heating,
            "cooling" => Self::Cooling,
            "ventilation" => Self::Ventilation,
            "on" => Self::On,
            other => {
                tracing::info!(target: "carlink::api", state = other, "unknown climatisation state");
                Self::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClimatisationState::Off => "off",
            ClimatisationState::Heating => "heating",
            ClimatisationState::Cooling => "cooling",
            ClimatisationState::Ventilation => "ventilation",
            ClimatisationState::On => "on",
            ClimatisationState::Unknown => "unknown",
        }
    }
}

/// Remote resource types tracked per vehicle; doubles as the cache key kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Account-level vehicle list
    Garage,
    Capabilities,
    Status,
    Mileage,
    Ranges,
    Climatisation,
    Charging,
    ParkingPosition,
    Maintenance,
    Renders,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Garage => "garage",
            ResourceKind::Capabilities => "capabilities",
            ResourceKind::Status => "status",
            ResourceKind::Mileage => "mileage",
            ResourceKind::Ranges => "ranges",
            ResourceKind::Climatisation => "climatisation",
            ResourceKind::Charging => "charging",
            ResourceKind::ParkingPosition => "parking_position",
            ResourceKind::Maintenance => "maintenance",
            ResourceKind::Renders => "renders",
        }
    }
}

/// A capability advertised by the remote service for one vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    /// Whether the capability status allows using it
    pub ok: bool,
}

/// State of a single tracked vehicle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleState {
    pub vin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_year: Option<u16>,
    pub connection: Option<VehicleConnectionState>,
    pub capabilities: Vec<Capability>,
    /// Attributes keyed by dotted path (e.g. "doors.lock_state", "odometer")
    pub attributes: HashMap<String, Attribute>,
}

impl VehicleState {
    pub fn new(vin: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            ..Default::default()
        }
    }

    pub fn has_capability(&self, id: &str) -> bool {
        self.capabilities.iter().any(|c| c.id == id && c.ok)
    }

    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        value: AttributeValue,
        measured_at: Option<DateTime<Utc>>,
    ) {
        let name = name.into();
        match self.attributes.get_mut(&name) {
            Some(attr) => attr.set(value, measured_at),
            None => {
                self.attributes.insert(name, Attribute::new(value, measured_at));
            }
        }
    }

    /// Mark one attribute unavailable, keeping the entry visible to the host
    pub fn mark_unavailable(&mut self, name: impl Into<String>) {
        let name = name.into();
        match self.attributes.get_mut(&name) {
            Some(attr) => attr.mark_unavailable(),
            None => {
                self.attributes.insert(name, Attribute::unavailable());
            }
        }
    }

    /// Mark every attribute under a dotted prefix unavailable
    pub fn mark_prefix_unavailable(&mut self, prefix: &str) {
        for (name, attr) in self.attributes.iter_mut() {
            if name == prefix || name.starts_with(&format!("{prefix}.")) {
                attr.mark_unavailable();
            }
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }
}

/// Thread-safe container for all tracked vehicles plus the connector state
///
/// Writers are the poller and the command dispatcher; the host reads
/// consistent snapshots.
#[derive(Debug)]
pub struct VehicleModel {
    vehicles: RwLock<HashMap<String, VehicleState>>,
    connection: RwLock<ConnectionState>,
}

impl VehicleModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            vehicles: RwLock::new(HashMap::new()),
            connection: RwLock::new(ConnectionState::Disconnected),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let mut guard = self.connection.write();
        if *guard != state {
            tracing::info!(state = %state, "connection state changed");
        }
        *guard = state;
    }

    pub fn vins(&self) -> Vec<String> {
        self.vehicles.read().keys().cloned().collect()
    }

    /// Snapshot of a single vehicle
    pub fn vehicle(&self, vin: &str) -> Option<VehicleState> {
        self.vehicles.read().get(vin).cloned()
    }

    /// Snapshot of all vehicles
    pub fn snapshot(&self) -> Vec<VehicleState> {
        self.vehicles.read().values().cloned().collect()
    }

    /// Drop vehicles that disappeared from the remote garage
    pub fn retain_vehicles(&self, seen: &[String]) {
        self.vehicles.write().retain(|vin, _| seen.contains(vin));
    }

    /// Mutate one vehicle's state in place
    pub fn update_vehicle<F>(&self, vin: &str, f: F)
    where
        F: FnOnce(&mut VehicleState),
    {
        let mut guard = self.vehicles.write();
        let state = guard
            .entry(vin.to_string())
            .or_insert_with(|| VehicleState::new(vin));
        f(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeValue, Unit};

    #[test]
    fn charging_state_normalization() {
        assert_eq!(
            ChargingState::from_remote("readyForCharging"),
            ChargingState::ReadyForCharging
        );
        assert_eq!(
            ChargingState::from_remote("somethingNew"),
            ChargingState::Unknown
        );
    }

    #[test]
    fn prefix_unavailable_spares_other_attributes() {
        let mut state = VehicleState::new("VIN1");
        state.set_attribute(
            "position.latitude",
            AttributeValue::float(48.1, None),
            None,
        );
        state.set_attribute(
            "position.longitude",
            AttributeValue::float(11.5, None),
            None,
        );
        state.set_attribute(
            "odometer",
            AttributeValue::int(42_000, Some(Unit::Kilometers)),
            None,
        );

        state.mark_prefix_unavailable("position");

        assert!(!state.attribute("position.latitude").unwrap().is_valid());
        assert!(!state.attribute("position.longitude").unwrap().is_valid());
        assert!(state.attribute("odometer").unwrap().is_valid());
    }

    #[test]
    fn model_tracks_garage_membership() {
        let model = VehicleModel::new();
        model.update_vehicle("VIN1", |_| {});
        model.update_vehicle("VIN2", |_| {});

        model.retain_vehicles(&["VIN2".to_string()]);
        assert!(model.vehicle("VIN1").is_none());
        assert!(model.vehicle("VIN2").is_some());
    }

    #[test]
    fn connection_state_roundtrip() {
        let model = VehicleModel::new();
        assert_eq!(model.connection_state(), ConnectionState::Disconnected);
        model.set_connection_state(ConnectionState::Connected);
        assert_eq!(model.connection_state(), ConnectionState::Connected);
    }
}
