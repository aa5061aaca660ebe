use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::ServiceConfig;
use crate::refresh::{start_security_refreshers, ContentFetcher, HttpFetcher, SecuritySnapshots};
use crate::service::JobService;
use crate::worker::HeartbeatSender;
use crate::workload::ShellWorkloadFactory;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Process that wires every component together
pub struct GridServer {
    config: ServiceConfig,
}

impl GridServer {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Run the server until `shutdown` fires.
    ///
    /// 1. Builds the HTTP fetcher used for remote scripts and refreshes
    /// 2. Starts the security refreshers if a base URL is configured
    /// 3. Builds the job service over the shell workload factory
    /// 4. Spawns the liveness heartbeat
    /// 5. Serves the job API (blocking)
    /// 6. Closes every remaining job once the API has stopped
    ///
    /// # Errors
    ///
    /// Returns an error if the fetcher cannot be built or the API listener
    /// fails to bind.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        let fetcher: Arc<dyn ContentFetcher> = Arc::new(HttpFetcher::new(FETCH_TIMEOUT)?);

        let security = if self.config.refresh.is_enabled() {
            start_security_refreshers(&self.config.refresh, fetcher.clone(), shutdown.clone()).await
        } else {
            tracing::info!("No refresh base URL configured, security refresh disabled");
            SecuritySnapshots::empty()
        };

        let listen_addr = self.config.listen_addr;
        let heartbeat = HeartbeatSender::new(self.config.heartbeat_interval());
        let factory = Arc::new(ShellWorkloadFactory::new(self.config.shell.clone()));
        let service =
            JobService::new(self.config, factory, shutdown.clone()).with_fetcher(fetcher);

        let liveness = service.liveness().clone();
        let heartbeat_shutdown = shutdown.clone();
        tokio::spawn(async move {
            heartbeat.run(liveness, heartbeat_shutdown).await;
        });

        let state = ApiState {
            service: service.clone(),
            security,
        };
        let served = run_api(listen_addr, state, shutdown.clone()).await;

        // Ensure background tasks see the shutdown even if the API failed
        shutdown.cancel();
        let closed = service.close_all_jobs().await;
        tracing::info!(closed, "Server stopped");

        served?;
        Ok(())
    }
}
