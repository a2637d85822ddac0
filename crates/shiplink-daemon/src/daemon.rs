//! Daemon assembly and event loop
//!
//! Wires a configuration, a remote link and the registered extensions into a
//! running deploy daemon: start listening, react to connection events, drive
//! the build runner, and unwind cleanly on cancellation.

use crate::controller::DeployController;
use crate::extensions::{Extension, ExtensionSet};
use crate::remote::{LinkEvent, RemoteLink};
use crate::runner::run_build_runner;
use anyhow::{Context, Result};
use shiplink_core::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The deploy daemon. Construct with a config and a link, register any
/// extensions, then [`run`](Daemon::run) it until cancelled.
pub struct Daemon {
    config: Arc<Config>,
    link: Arc<dyn RemoteLink>,
    extensions: ExtensionSet,
}

impl Daemon {
    pub fn new(config: Config, link: Arc<dyn RemoteLink>) -> Self {
        Self {
            config: Arc::new(config),
            link,
            extensions: ExtensionSet::new(),
        }
    }

    pub fn register_extension(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.register(extension);
    }

    /// Run until the token is cancelled or the link closes.
    ///
    /// Failing to listen is fatal; everything after that point is logged and
    /// survived. On the way out the build runner is stopped and the mirror
    /// sessions are disposed.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("Initializing deploy daemon");

        let controller = Arc::new(DeployController::new(
            Arc::clone(&self.config),
            Arc::clone(&self.link),
            self.extensions,
        ));

        controller.setup().await;
        controller.before_connect().await;

        // Subscribe before listening so the first connection cannot slip
        // past between the two calls.
        let mut events = self.link.subscribe();

        self.link
            .listen(self.config.port)
            .await
            .with_context(|| format!("Failed to listen on port {}", self.config.port))?;
        info!("Listening for runtime clients on port {}", self.config.port);

        // A link handed in already connected never fires ClientConnected,
        // but its per-connection work still has to run.
        if self.link.connection().connected {
            controller.client_connected().await;
        }

        let runner_task = if self.config.build.is_some() {
            let runner_controller = Arc::clone(&controller);
            let runner_cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = run_build_runner(runner_controller, runner_cancel).await {
                    error!("Build runner failed: {e:#}");
                }
            }))
        } else {
            info!("No build command configured; deploys are triggered by the embedding application");
            None
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cancellation signal received. Beginning shutdown...");
                    break;
                }
                event = events.recv() => match event {
                    Ok(LinkEvent::ClientConnected) => controller.client_connected().await,
                    Ok(LinkEvent::Closed) => {
                        info!("Remote link closed");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Link event stream lagged by {n} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Link event stream closed");
                        break;
                    }
                }
            }
        }

        // Stop the build runner whichever way the loop ended
        cancel.cancel();

        if let Some(task) = runner_task {
            if let Err(e) = tokio::time::timeout(Duration::from_secs(5), task).await {
                error!("Build runner did not stop in time: {e}");
            }
        }

        controller.shutdown().await;

        info!("Deploy daemon shutdown complete");
        Ok(())
    }
}
