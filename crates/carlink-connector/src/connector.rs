//! Connector lifecycle
//!
//! Owns the session, cache, vehicle model and poller task. `start` performs
//! the initial login so credential problems surface immediately instead of
//! on the first poll; `shutdown` stops the poller and waits for it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use carlink_client::{resolve_credentials, CloudApi, ResourceCache, SessionManager};
use carlink_core::{CommandOutcome, CommandRequest, ConnectorResult, VehicleModel};

use crate::config::ConnectorConfig;
use crate::dispatch::CommandDispatcher;
use crate::poller::Poller;

#[derive(Debug)]
pub struct Connector {
    model: Arc<VehicleModel>,
    dispatcher: CommandDispatcher,
    shutdown_tx: watch::Sender<bool>,
    poller_handle: Option<tokio::task::JoinHandle<ConnectorResult<()>>>,
}

impl Connector {
    /// Resolve credentials, log in and start polling.
    pub async fn start(config: ConnectorConfig) -> ConnectorResult<Self> {
        config.validate()?;
        info!(?config, "starting connector");

        let credentials =
            resolve_credentials(&config.credential_config(), &config.netrc_machine())?;
        let session = Arc::new(SessionManager::new(&config.base_url, credentials)?);
        session.login().await?;

        let api = Arc::new(CloudApi::new(session));
        let cache = Arc::new(ResourceCache::new());
        let model = VehicleModel::new();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(
            api.clone(),
            cache.clone(),
            model.clone(),
            config.interval(),
            config.max_age(),
        );
        let poller_handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

        let dispatcher = CommandDispatcher::new(api, cache, model.clone());
        Ok(Self {
            model,
            dispatcher,
            shutdown_tx,
            poller_handle: Some(poller_handle),
        })
    }

    /// The live vehicle state model; the host reads snapshots from it
    pub fn model(&self) -> Arc<VehicleModel> {
        self.model.clone()
    }

    /// Submit a remote command
    pub async fn execute(&self, request: CommandRequest) -> ConnectorResult<CommandOutcome> {
        self.dispatcher.dispatch(request).await
    }

    /// Signal the poller to stop and wait for it to finish
    pub async fn shutdown(mut self) {
        info!("shutting down connector");
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.poller_handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "poller ended with error"),
                Err(err) => warn!(error = %err, "poller task panicked"),
            }
        }
    }
}
