// ABOUTME: Background health monitor for running dev servers
// ABOUTME: Stops idle servers and recovers crashed ones within the restart budget

use crate::manager::DevServerManager;
use crate::types::SweepReport;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl DevServerManager {
    /// One pass over every running server.
    ///
    /// Probes issued here do not count as use, so a server nobody touches
    /// still ages out after the idle window.
    pub async fn run_health_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let idle_timeout = self.config().idle_timeout;

        for server in self.running_servers() {
            report.checked += 1;

            if server.last_used.elapsed() > idle_timeout {
                info!(
                    "Stopping dev server for {} after {:?} idle",
                    server.project_id, idle_timeout
                );
                if let Err(e) = self.stop_server(&server.project_id).await {
                    warn!("Failed to stop idle dev server for {}: {}", server.project_id, e);
                }
                report.idle_stopped.push(server.project_id);
                continue;
            }

            let exited = match &server.handle {
                Some(handle) => handle.lock().await.has_exited().await,
                None => false,
            };
            let healthy = !exited && self.probe().check(&self.health_url(&server.url)).await;

            if healthy {
                self.mark_healthy(&server.project_id, server.instance_id);
                report.healthy += 1;
                continue;
            }

            report.crashed.push(server.project_id.clone());
            match self
                .recover_crashed(&server.project_id, server.instance_id)
                .await
            {
                Ok(true) => report.restarted.push(server.project_id),
                Ok(false) => {}
                Err(e) => warn!(
                    "Dev server for {} could not be recovered: {}",
                    server.project_id, e
                ),
            }
        }

        debug!("Health sweep finished: {:?}", report);
        report
    }

    /// Run [`run_health_sweep`](Self::run_health_sweep) every health interval until cancelled.
    pub fn start_health_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.config().health_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            info!("Dev server health monitor started (interval {:?})", period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Dev server health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = manager.run_health_sweep().await;
                        if !report.crashed.is_empty() || !report.idle_stopped.is_empty() {
                            info!(
                                "Health sweep: {} crashed, {} restarted, {} idle stopped",
                                report.crashed.len(),
                                report.restarted.len(),
                                report.idle_stopped.len()
                            );
                        }
                    }
                }
            }
        })
    }
}
