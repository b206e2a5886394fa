//! carlink-core - Core types for the carlink vehicle connector
//!
//! This crate provides the shared vocabulary between the cloud client and the
//! host-facing connector: typed vehicle attributes, the vehicle state model,
//! command request/outcome types and the connector error taxonomy.

pub mod attributes;
pub mod command;
pub mod error;
pub mod vehicle;

pub use attributes::{round_to_step, Attribute, AttributeValue, Unit};
pub use command::{CommandOperation, CommandOutcome, CommandParameters, CommandRequest};
pub use error::{ConnectorError, ConnectorResult};
pub use vehicle::{
    Capability, ChargingState, ClimatisationState, ConnectionState, LockState, OpenState,
    ResourceKind, VehicleConnectionState, VehicleModel, VehicleState,
};
