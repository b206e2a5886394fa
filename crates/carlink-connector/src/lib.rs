//! carlink-connector - Poll/command orchestration for the vehicle cloud
//!
//! Ties the pieces of the client crate together into a running connector:
//! configuration loading, the periodic poller that keeps the vehicle state
//! model current, and the dispatcher that submits remote commands and keeps
//! the cache honest afterwards.

pub mod config;
pub mod connector;
pub mod dispatch;
pub mod poller;

pub use config::{Brand, ConnectorConfig};
pub use connector::Connector;
pub use dispatch::CommandDispatcher;
pub use poller::Poller;

pub use carlink_core::{
    CommandOperation, CommandOutcome, CommandParameters, CommandRequest, ConnectorError,
    ConnectorResult, VehicleModel, VehicleState,
};
