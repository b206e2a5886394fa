//! Periodic poller
//!
//! Drives the fetch-parse-publish cycle that keeps the vehicle state model
//! current: garage membership, capabilities, then each telemetry resource
//! through the TTL cache. Resource failures are contained per attribute
//! group; only fatal errors (credentials, authentication) stop the loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use carlink_client::{
    ChargingSettings, ChargingStatus, ClimatisationSettings, ClimatisationStatus, CloudApi,
    ConnectionStatus, GarageResponse, GarageVehicle, MaintenanceResponse, MileageResponse,
    RangesResponse, ResourceCache, ResourceKey, VehicleStatus,
};
use carlink_core::{
    AttributeValue, ChargingState, ClimatisationState, ConnectionState, ConnectorError,
    ConnectorResult, LockState, OpenState, ResourceKind, Unit, VehicleConnectionState,
    VehicleModel,
};

/// Back-off after the remote rate limiter kicks in
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(900);

pub struct Poller {
    api: Arc<CloudApi>,
    cache: Arc<ResourceCache>,
    model: Arc<VehicleModel>,
    interval: Duration,
    max_age: Duration,
}

impl Poller {
    pub fn new(
        api: Arc<CloudApi>,
        cache: Arc<ResourceCache>,
        model: Arc<VehicleModel>,
        interval: Duration,
        max_age: Duration,
    ) -> Self {
        Self { api, cache, model, interval, max_age }
    }

    /// Run the poll loop until the shutdown signal fires.
    ///
    /// An in-flight tick finishes its current awaits but its remaining work
    /// is abandoned once the signal is observed; fatal errors end the loop
    /// with the error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConnectorResult<()> {
        self.model.set_connection_state(ConnectionState::Connecting);
        info!(interval = ?self.interval, "poller started");

        loop {
            let wait = match self.tick().await {
                Ok(()) => {
                    self.model.set_connection_state(ConnectionState::Connected);
                    self.interval
                }
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "poll failed fatally");
                    self.model.set_connection_state(ConnectionState::Error);
                    return Err(err);
                }
                Err(ConnectorError::Api { status: 429, message }) => {
                    warn!(%message, "rate limited, backing off");
                    self.model.set_connection_state(ConnectionState::Error);
                    RATE_LIMIT_BACKOFF
                }
                Err(err) => {
                    warn!(error = %err, "poll failed, retrying next interval");
                    self.model.set_connection_state(ConnectionState::Error);
                    self.interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.model.set_connection_state(ConnectionState::Disconnected);
        info!("poller stopped");
        Ok(())
    }

    /// One full poll cycle over every vehicle in the garage
    pub async fn tick(&self) -> ConnectorResult<()> {
        let vehicles = self.garage().await?;
        let vins: Vec<String> = vehicles.iter().map(|v| v.vin.clone()).collect();
        self.model.retain_vehicles(&vins);

        for vehicle in &vehicles {
            self.model.update_vehicle(&vehicle.vin, |state| {
                state.nickname = vehicle.nickname.clone();
                state.model = vehicle.model.clone();
                state.model_year = vehicle.model_year;
            });
        }

        for vin in &vins {
            if let Err(err) = self.poll_vehicle(vin).await {
                if err.is_fatal() || matches!(err, ConnectorError::Api { status: 429, .. }) {
                    return Err(err);
                }
                warn!(vin, error = %err, "vehicle poll incomplete");
            }
        }
        Ok(())
    }

    async fn garage(&self) -> ConnectorResult<Vec<GarageVehicle>> {
        let key = ResourceKey::account(ResourceKind::Garage);
        let value = self
            .cache
            .get_or_fetch(&key, self.max_age, || {
                self.api.fetch_resource(ResourceKind::Garage, "")
            })
            .await?
            .unwrap_or(Value::Null);
        let garage: GarageResponse = serde_json::from_value(value)
            .map_err(|e| ConnectorError::Parse(format!("garage payload: {e}")))?;
        Ok(garage.vehicles)
    }

    async fn poll_vehicle(&self, vin: &str) -> ConnectorResult<()> {
        let capabilities = self.capabilities(vin).await?;
        let (climatisation, charging, parking, maintenance, images) = (
            capabilities.iter().any(|c| c.id == "climatisation" && c.ok),
            capabilities.iter().any(|c| c.id == "charging" && c.ok),
            capabilities.iter().any(|c| c.id == "parkingPosition" && c.ok),
            capabilities.iter().any(|c| c.id == "vehicleHealthInspection" && c.ok),
            capabilities.iter().any(|c| c.id == "vehicleImages" && c.ok),
        );
        self.model
            .update_vehicle(vin, |state| state.capabilities = capabilities);

        self.contain(vin, &["status", "doors", "windows"], self.poll_status(vin).await)?;
        self.contain(vin, &["odometer"], self.poll_mileage(vin).await)?;
        self.contain(vin, &["range"], self.poll_ranges(vin).await)?;

        if climatisation {
            self.contain(
                vin,
                &["climatisation", "window_heating"],
                self.poll_climatisation(vin).await,
            )?;
        }
        if charging {
            self.contain(vin, &["charging"], self.poll_charging(vin).await)?;
        }
        if parking {
            self.contain(vin, &["position"], self.poll_parking_position(vin).await)?;
        }
        if maintenance {
            self.contain(vin, &["maintenance"], self.poll_maintenance(vin).await)?;
        }
        if images {
            // Renders are decoration; failures never mark anything stale.
            if let Err(err) = self.poll_renders(vin).await {
                debug!(vin, error = %err, "render fetch failed");
            }
        }
        Ok(())
    }

    /// Contain a per-resource failure: affected attributes go unavailable,
    /// the rest of the tick continues. Fatal errors propagate.
    fn contain(
        &self,
        vin: &str,
        prefixes: &[&str],
        result: ConnectorResult<()>,
    ) -> ConnectorResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(vin, error = %err, "resource unavailable this cycle");
                self.model.update_vehicle(vin, |state| {
                    for prefix in prefixes {
                        state.mark_prefix_unavailable(prefix);
                    }
                });
                Ok(())
            }
        }
    }

    async fn capabilities(&self, vin: &str) -> ConnectorResult<Vec<carlink_core::Capability>> {
        let value = self
            .fetch_cached(vin, ResourceKind::Capabilities)
            .await?
            .unwrap_or(Value::Null);
        let parsed: carlink_client::CapabilitiesResponse = serde_json::from_value(value)
            .map_err(|e| ConnectorError::Parse(format!("capabilities payload: {e}")))?;
        Ok(parsed
            .capabilities
            .into_iter()
            .map(|c| carlink_core::Capability { ok: c.is_ok(), id: c.id })
            .collect())
    }

    async fn fetch_cached(&self, vin: &str, kind: ResourceKind) -> ConnectorResult<Option<Value>> {
        let key = ResourceKey::new(vin, kind);
        self.cache
            .get_or_fetch(&key, self.max_age, || self.api.fetch_resource(kind, vin))
            .await
    }

    async fn poll_status(&self, vin: &str) -> ConnectorResult<()> {
        let Some(value) = self.fetch_cached(vin, ResourceKind::Status).await? else {
            self.model.update_vehicle(vin, |state| {
                state.mark_prefix_unavailable("status");
            });
            return Ok(());
        };

        let status: VehicleStatus =
            serde_json::from_value(value.get("status").cloned().unwrap_or(Value::Null))
                .map_err(|e| ConnectorError::Parse(format!("status payload: {e}")))?;
        let connection: Option<ConnectionStatus> = value
            .get("connection")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let measured = status.updated_at;
        self.model.update_vehicle(vin, |state| {
            match status.locked {
                Some(locked) => {
                    state.set_attribute("status.locked", AttributeValue::Bool(locked), measured)
                }
                None => state.mark_unavailable("status.locked"),
            }
            if let Some(lights) = &status.lights {
                state.set_attribute(
                    "status.lights",
                    AttributeValue::Mode(lights.clone()),
                    measured,
                );
            }
            for (id, door) in &status.doors {
                if let Some(open) = &door.open {
                    state.set_attribute(
                        format!("doors.{id}.open"),
                        AttributeValue::Mode(OpenState::from_flag(open).as_str().to_string()),
                        measured,
                    );
                }
                if let Some(locked) = &door.locked {
                    state.set_attribute(
                        format!("doors.{id}.lock"),
                        AttributeValue::Mode(LockState::from_flag(locked).as_str().to_string()),
                        measured,
                    );
                }
            }
            for (id, open) in &status.windows {
                state.set_attribute(
                    format!("windows.{id}"),
                    AttributeValue::Mode(OpenState::from_flag(open).as_str().to_string()),
                    measured,
                );
            }
            if let Some(mode) = connection
                .as_ref()
                .and_then(|c| c.connection.as_ref())
                .and_then(|c| c.mode.as_deref())
            {
                state.connection = Some(VehicleConnectionState::from_mode(mode));
            }
        });
        Ok(())
    }

    async fn poll_mileage(&self, vin: &str) -> ConnectorResult<()> {
        let value = self
            .fetch_cached(vin, ResourceKind::Mileage)
            .await?
            .unwrap_or(Value::Null);
        let mileage: MileageResponse = serde_json::from_value(value)
            .map_err(|e| ConnectorError::Parse(format!("mileage payload: {e}")))?;

        self.model.update_vehicle(vin, |state| match mileage.mileage_km {
            Some(km) => state.set_attribute(
                "odometer",
                AttributeValue::float(km, Some(Unit::Kilometers)),
                None,
            ),
            None => state.mark_unavailable("odometer"),
        });
        Ok(())
    }

    async fn poll_ranges(&self, vin: &str) -> ConnectorResult<()> {
        let value = self
            .fetch_cached(vin, ResourceKind::Ranges)
            .await?
            .unwrap_or(Value::Null);
        let ranges: RangesResponse = serde_json::from_value(value)
            .map_err(|e| ConnectorError::Parse(format!("ranges payload: {e}")))?;

        self.model.update_vehicle(vin, |state| {
            for entry in &ranges.ranges {
                state.set_attribute(
                    format!("range.{}", entry.range_name),
                    AttributeValue::float(entry.value, Some(Unit::Kilometers)),
                    None,
                );
            }
        });
        Ok(())
    }

    async fn poll_climatisation(&self, vin: &str) -> ConnectorResult<()> {
        let Some(value) = self.fetch_cached(vin, ResourceKind::Climatisation).await? else {
            return Ok(());
        };

        let status: Option<ClimatisationStatus> = value
            .get("status")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| ConnectorError::Parse(format!("climatisation status payload: {e}")))?;
        let settings: Option<ClimatisationSettings> = value
            .get("settings")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| ConnectorError::Parse(format!("climatisation settings payload: {e}")))?;

        self.model.update_vehicle(vin, |state| {
            if let Some(status) = &status {
                if let Some(inner) = &status.climatisation_status {
                    let measured = inner.car_captured_timestamp;
                    match inner.climatisation_state.as_deref() {
                        Some(remote) => state.set_attribute(
                            "climatisation.state",
                            AttributeValue::Mode(
                                ClimatisationState::from_remote(remote).as_str().to_string(),
                            ),
                            measured,
                        ),
                        None => state.mark_unavailable("climatisation.state"),
                    }
                }
                if let Some(heating) = &status.window_heating_status {
                    for entry in &heating.window_heating_status {
                        state.set_attribute(
                            format!("window_heating.{}", entry.window_location),
                            AttributeValue::Mode(entry.window_heating_state.clone()),
                            None,
                        );
                    }
                }
            }
            if let Some(settings) = &settings {
                let measured = settings.car_captured_timestamp;
                if let Some(celsius) = settings.target_temperature_in_celsius {
                    state.set_attribute(
                        "climatisation.target_temperature",
                        AttributeValue::float_with_precision(celsius, Some(Unit::Celsius), 0.5),
                        measured,
                    );
                }
                if let Some(without) = settings.climatisation_without_external_power {
                    state.set_attribute(
                        "climatisation.without_external_power",
                        AttributeValue::Bool(without),
                        measured,
                    );
                }
            }
        });
        Ok(())
    }

    async fn poll_charging(&self, vin: &str) -> ConnectorResult<()> {
        let Some(value) = self.fetch_cached(vin, ResourceKind::Charging).await? else {
            return Ok(());
        };

        let status: Option<ChargingStatus> = value
            .get("status")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| ConnectorError::Parse(format!("charging status payload: {e}")))?;
        let settings: Option<ChargingSettings> = value
            .get("settings")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| ConnectorError::Parse(format!("charging settings payload: {e}")))?;

        self.model.update_vehicle(vin, |state| {
            if let Some(status) = &status {
                if let Some(remote) = status.charging.as_ref().and_then(|c| c.state.as_deref()) {
                    state.set_attribute(
                        "charging.state",
                        AttributeValue::Mode(
                            ChargingState::from_remote(remote).as_str().to_string(),
                        ),
                        None,
                    );
                }
                if let Some(battery) = &status.battery {
                    match battery.current_soc_pct {
                        Some(soc) => state.set_attribute(
                            "charging.level",
                            AttributeValue::int(soc as i64, Some(Unit::Percent)),
                            None,
                        ),
                        None => state.mark_unavailable("charging.level"),
                    }
                    if let Some(range) = battery.cruising_range_electric_km {
                        state.set_attribute(
                            "charging.range",
                            AttributeValue::float(range, Some(Unit::Kilometers)),
                            None,
                        );
                    }
                }
                if let Some(plug) = &status.plug {
                    if let Some(connection) = &plug.connection {
                        state.set_attribute(
                            "charging.plug.connection",
                            AttributeValue::Mode(connection.clone()),
                            None,
                        );
                    }
                    if let Some(power) = &plug.external_power {
                        state.set_attribute(
                            "charging.plug.external_power",
                            AttributeValue::Mode(power.clone()),
                            None,
                        );
                    }
                    if let Some(lock) = &plug.lock {
                        state.set_attribute(
                            "charging.plug.lock",
                            AttributeValue::Mode(lock.clone()),
                            None,
                        );
                    }
                }
            }
            if let Some(settings) = &settings {
                if let Some(target) = settings.default_max_target_soc_percentage {
                    state.set_attribute(
                        "charging.target_level",
                        AttributeValue::int(target as i64, Some(Unit::Percent)),
                        None,
                    );
                }
                // The remote flag is maximum-vs-reduced AC current; it maps
                // to 16 A and 6 A respectively.
                if let Some(maximum) = settings.max_charge_current_ac {
                    state.set_attribute(
                        "charging.max_current",
                        AttributeValue::float(if maximum { 16.0 } else { 6.0 }, Some(Unit::Ampere)),
                        None,
                    );
                }
            }
        });
        Ok(())
    }

    async fn poll_maintenance(&self, vin: &str) -> ConnectorResult<()> {
        let value = self.fetch_cached(vin, ResourceKind::Maintenance).await?;
        let Some(value) = value else {
            self.model.update_vehicle(vin, |state| {
                state.mark_prefix_unavailable("maintenance");
            });
            return Ok(());
        };
        let due: MaintenanceResponse = serde_json::from_value(value)
            .map_err(|e| ConnectorError::Parse(format!("maintenance payload: {e}")))?;

        self.model.update_vehicle(vin, |state| {
            match due.inspection_due_days {
                Some(days) => state.set_attribute(
                    "maintenance.inspection_due_days",
                    AttributeValue::int(days, Some(Unit::Days)),
                    None,
                ),
                None => state.mark_unavailable("maintenance.inspection_due_days"),
            }
            match due.inspection_due_km {
                Some(km) => state.set_attribute(
                    "maintenance.inspection_due_km",
                    AttributeValue::float(km, Some(Unit::Kilometers)),
                    None,
                ),
                None => state.mark_unavailable("maintenance.inspection_due_km"),
            }
            match due.oil_service_due_days {
                Some(days) => state.set_attribute(
                    "maintenance.oil_service_due_days",
                    AttributeValue::int(days, Some(Unit::Days)),
                    None,
                ),
                None => state.mark_unavailable("maintenance.oil_service_due_days"),
            }
            match due.oil_service_due_km {
                Some(km) => state.set_attribute(
                    "maintenance.oil_service_due_km",
                    AttributeValue::float(km, Some(Unit::Kilometers)),
                    None,
                ),
                None => state.mark_unavailable("maintenance.oil_service_due_km"),
            }
        });
        Ok(())
    }

    /// 204 from the remote means the position is genuinely unknown (vehicle
    /// moving or privacy mode); the attribute must go unavailable rather
    /// than keep showing the last parked spot.
    async fn poll_parking_position(&self, vin: &str) -> ConnectorResult<()> {
        let value = self.fetch_cached(vin, ResourceKind::ParkingPosition).await?;
        match value {
            Some(value) => {
                let position: carlink_client::ParkingPosition = serde_json::from_value(value)
                    .map_err(|e| ConnectorError::Parse(format!("parking position payload: {e}")))?;
                self.model.update_vehicle(vin, |state| {
                    state.set_attribute(
                        "position.latitude",
                        AttributeValue::float(position.lat, None),
                        None,
                    );
                    state.set_attribute(
                        "position.longitude",
                        AttributeValue::float(position.lon, None),
                        None,
                    );
                });
            }
            None => {
                self.model.update_vehicle(vin, |state| {
                    state.mark_prefix_unavailable("position");
                });
            }
        }
        Ok(())
    }

    /// Render payloads vary wildly between model years; anything that is not
    /// an id-to-URL string pair is skipped without failing the poll.
    async fn poll_renders(&self, vin: &str) -> ConnectorResult<()> {
        let Some(value) = self.fetch_cached(vin, ResourceKind::Renders).await? else {
            return Ok(());
        };
        let Some(entries) = value.as_object() else {
            debug!(vin, "render payload is not an object, skipping");
            return Ok(());
        };

        self.model.update_vehicle(vin, |state| {
            for (id, url) in entries {
                match url.as_str() {
                    Some(url) if !url.is_empty() => {
                        state.set_attribute(
                            format!("image.{id}"),
                            AttributeValue::Text(url.to_string()),
                            None,
                        );
                    }
                    _ => debug!(vin, image = %id, "skipping malformed render entry"),
                }
            }
        });
        Ok(())
    }
}
