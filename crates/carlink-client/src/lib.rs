//! carlink-client - Authenticated cloud API client
//!
//! Provides the session/cache/command core against the remote vehicle cloud:
//! credential resolution, token lifecycle with transparent renewal, a typed
//! endpoint surface, and a TTL cache in front of remote reads.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use carlink_client::{CloudApi, Credentials, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new("user@example.com", "secret", Some("1234".into()));
//!     let session = Arc::new(SessionManager::new(
//!         "https://cloud.example.com",
//!         credentials,
//!     )?);
//!     session.login().await?;
//!
//!     let api = CloudApi::new(session);
//!     for vehicle in api.garage().await? {
//!         println!("{}", vehicle.vin);
//!     }
//!     Ok(())
//! }
//! ```

mod api;
mod cache;
mod credentials;
mod session;
pub mod testing;
mod types;

pub use api::CloudApi;
pub use cache::{ResourceCache, ResourceKey};
pub use credentials::{resolve_credentials, CredentialConfig, Credentials};
pub use session::{SessionManager, SessionState};
pub use types::*;

// Re-export core types for convenience
pub use carlink_core::{ConnectorError, ConnectorResult, ResourceKind};
