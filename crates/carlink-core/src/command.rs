//! Command request and outcome types
//!
//! A command is transient: created by the host, consumed by the dispatcher,
//! and always terminated as accepted, rejected or failed.

use serde::{Deserialize, Serialize};

use crate::attributes::Unit;
use crate::error::{ConnectorError, ConnectorResult};
use crate::vehicle::ResourceKind;

/// Write operations supported by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandOperation {
    Lock,
    Unlock,
    ClimatisationStart,
    ClimatisationStop,
    ChargingStart,
    ChargingStop,
    /// Change the charging profile (target state of charge)
    ChargingSetTarget,
    WindowHeatingStart,
    WindowHeatingStop,
}

impl CommandOperation {
    /// Parse a free-text operation name; surrounding whitespace is trimmed
    /// before matching (command strings arrive untrimmed from some hosts).
    pub fn parse(op: &str) -> ConnectorResult<Self> {
        match op.trim() {
            "lock" => Ok(Self::Lock),
            "unlock" => Ok(Self::Unlock),
            "climatisation-start" | "climatization-start" => Ok(Self::ClimatisationStart),
            "climatisation-stop" | "climatization-stop" => Ok(Self::ClimatisationStop),
            "charging-start" => Ok(Self::ChargingStart),
            "charging-stop" => Ok(Self::ChargingStop),
            "charging-set-target" => Ok(Self::ChargingSetTarget),
            "window-heating-start" => Ok(Self::WindowHeatingStart),
            "window-heating-stop" => Ok(Self::WindowHeatingStop),
            other => Err(ConnectorError::InvalidCommand(format!(
                "unknown operation '{other}'"
            ))),
        }
    }

    /// Whether the remote API gates this operation behind the S-PIN
    pub fn requires_spin(&self) -> bool {
        matches!(self, Self::Lock | Self::Unlock)
    }

    /// Cache entries that go stale once this command is accepted
    pub fn invalidates(&self) -> &'static [ResourceKind] {
        match self {
            Self::Lock | Self::Unlock => &[ResourceKind::Status],
            Self::ClimatisationStart | Self::ClimatisationStop => &[ResourceKind::Climatisation],
            Self::ChargingStart | Self::ChargingStop | Self::ChargingSetTarget => {
                &[ResourceKind::Charging]
            }
            Self::WindowHeatingStart | Self::WindowHeatingStop => &[ResourceKind::Climatisation],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::ClimatisationStart => "climatisation-start",
            Self::ClimatisationStop => "climatisation-stop",
            Self::ChargingStart => "charging-start",
            Self::ChargingStop => "charging-stop",
            Self::ChargingSetTarget => "charging-set-target",
            Self::WindowHeatingStart => "window-heating-start",
            Self::WindowHeatingStop => "window-heating-stop",
        }
    }
}

/// Optional parameters attached to a command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandParameters {
    /// Climatisation target temperature; rounded to the 0.5 step on submit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_unit: Option<Unit>,
    /// Charging target state of charge in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_level: Option<u8>,
}

/// A typed command request from the host
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub vin: String,
    pub operation: CommandOperation,
    pub parameters: CommandParameters,
    /// Per-request S-PIN override; falls back to the configured credential
    pub spin: Option<String>,
}

impl CommandRequest {
    pub fn new(vin: impl Into<String>, operation: CommandOperation) -> Self {
        Self {
            vin: vin.into(),
            operation,
            parameters: CommandParameters::default(),
            spin: None,
        }
    }

    pub fn with_spin(mut self, spin: impl Into<String>) -> Self {
        self.spin = Some(spin.into());
        self
    }

    pub fn with_parameters(mut self, parameters: CommandParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Result of a successfully submitted command
///
/// Acceptance is the success boundary: the remote service executes the
/// physical action asynchronously and the new state becomes visible through
/// the next poll after cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Remote request id, when one was issued
    pub request_id: Option<String>,
    /// Whether the remote reported the action as already executing
    pub in_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_whitespace() {
        assert_eq!(CommandOperation::parse(" lock ").unwrap(), CommandOperation::Lock);
        assert_eq!(
            CommandOperation::parse("\tcharging-start\n").unwrap(),
            CommandOperation::ChargingStart
        );
    }

    #[test]
    fn parse_rejects_unknown_operations() {
        assert!(matches!(
            CommandOperation::parse("eject"),
            Err(ConnectorError::InvalidCommand(_))
        ));
    }

    #[test]
    fn spin_gating() {
        assert!(CommandOperation::Lock.requires_spin());
        assert!(CommandOperation::Unlock.requires_spin());
        assert!(!CommandOperation::ChargingStart.requires_spin());
    }

    #[test]
    fn lock_invalidates_status() {
        assert_eq!(CommandOperation::Lock.invalidates(), &[ResourceKind::Status]);
        assert_eq!(
            CommandOperation::WindowHeatingStart.invalidates(),
            &[ResourceKind::Climatisation]
        );
    }

    #[test]
    fn charging_set_target_parses_and_invalidates_charging() {
        assert_eq!(
            CommandOperation::parse("charging-set-target").unwrap(),
            CommandOperation::ChargingSetTarget
        );
        assert_eq!(
            CommandOperation::ChargingSetTarget.invalidates(),
            &[ResourceKind::Charging]
        );
        assert!(!CommandOperation::ChargingSetTarget.requires_spin());
    }
}
