//! End-to-end fleet run.
//!
//! ```text
//!   prepare layout
//!   launch N supervisors ──► await barrier ──► assemble cluster
//!                      (raced against the interrupt)
//!   [keep running until interrupted]
//!   graceful poweroff ──► cancel (always)
//! ```

mod coordinator;
mod status;


pub use coordinator::FleetCoordinator;
pub use status::{StatusTable, VmStatus};

use crate::cluster::{ClusterAssembler, ClusterReport, GuestExec};
use crate::layout::FleetLayout;
use crate::options::FleetOptions;
use crate::vmm::controller::VmmController;
use fleetlite_shared::{FleetError, FleetResult};
use std::future::Future;
use std::sync::Arc;

/// One orchestrator run over a fresh run directory.
pub struct Fleet {
    options: Arc<FleetOptions>,
    layout: FleetLayout,
    controller: Arc<dyn VmmController>,
    exec: Arc<dyn GuestExec>,
}

impl Fleet {
    pub fn new(
        options: FleetOptions,
        controller: Arc<dyn VmmController>,
        exec: Arc<dyn GuestExec>,
    ) -> Self {
        let layout = FleetLayout::new(&options.work_dir);
        Self {
            options: Arc::new(options),
            layout,
            controller,
            exec,
        }
    }

    pub fn layout(&self) -> &FleetLayout {
        &self.layout
    }

    /// Bring the fleet up, assemble the cluster and tear everything down.
    ///
    /// `interrupt` resolving before assembly finishes aborts the run with
    /// `Interrupted`. VM processes are gone when this returns, whatever the
    /// outcome.
    pub async fn run(self, interrupt: impl Future<Output = ()>) -> FleetResult<ClusterReport> {
        self.options.sanitize()?;
        self.layout.prepare()?;

        let options = self.options.clone();
        let mut coordinator =
            FleetCoordinator::new(options.clone(), self.layout.clone(), self.controller)?;
        let assembler = ClusterAssembler::new(
            options.cluster.clone(),
            coordinator.plan(),
            self.exec,
            self.layout.clone(),
        )?;
        tracing::info!(
            nodes = options.nodes,
            run_dir = %self.layout.run_dir().display(),
            "Starting fleet"
        );

        tokio::pin!(interrupt);
        let result = tokio::select! {
            result = bring_up(&mut coordinator, &assembler, &options) => result,
            _ = &mut interrupt => {
                tracing::warn!("Interrupted, tearing down fleet");
                Err(FleetError::Interrupted)
            }
        };

        match &result {
            Ok(report) => {
                if options.keep_running {
                    tracing::info!(
                        kubeconfig = %report.kubeconfig.display(),
                        "Cluster running, interrupt to shut down"
                    );
                    interrupt.await;
                }
                assembler.shutdown_all().await;
                if let Err(e) = coordinator.shutdown(options.shutdown_timeout()).await {
                    tracing::warn!("Graceful shutdown incomplete: {}", e);
                }
            }
            Err(e) => {
                for row in coordinator.status() {
                    tracing::debug!(vm = row.index, state = %row.state, error = ?row.error, "VM status");
                }
                tracing::error!("Fleet run failed: {}", e);
            }
        }

        coordinator.cancel().await;
        result
    }
}

async fn bring_up(
    coordinator: &mut FleetCoordinator,
    assembler: &ClusterAssembler,
    options: &FleetOptions,
) -> FleetResult<ClusterReport> {
    coordinator.launch(options.nodes)?;
    coordinator
        .await_ready(options.poll_interval(), options.ready_timeout())
        .await?;
    assembler.assemble().await
}
