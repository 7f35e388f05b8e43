//! Spawns one supervisor per VM and evaluates the readiness barrier.

use super::status::{StatusTable, VmStatus};
use crate::layout::FleetLayout;
use crate::markers::{BarrierState, MarkerStore};
use crate::network::NetworkPlan;
use crate::options::FleetOptions;
use crate::supervisor::{Control, SupervisorEnv, VmEvent, VmState, VmSupervisor};
use crate::vmm::ProcessRegistry;
use crate::vmm::controller::VmmController;
use fleetlite_shared::{FleetError, FleetResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

/// Owns the supervisor tasks of one fleet.
///
/// **Barrier**: supervisors report over an unbounded channel; the coordinator
/// folds events into a [`StatusTable`] and evaluates the readiness predicate
/// after every event and every poll tick. Marker files are never read here.
///
/// **Teardown**: `cancel()` must be awaited on every exit path. `Drop` only
/// kills whatever PIDs are still registered.
pub struct FleetCoordinator {
    env: SupervisorEnv,
    control: watch::Sender<Control>,
    events: mpsc::UnboundedReceiver<VmEvent>,
    tasks: JoinSet<(usize, VmState)>,
    table: StatusTable,
    launched: bool,
    cancelled: bool,
}

impl FleetCoordinator {
    pub fn new(
        options: Arc<FleetOptions>,
        layout: FleetLayout,
        controller: Arc<dyn VmmController>,
    ) -> FleetResult<Self> {
        let plan = Arc::new(NetworkPlan::new(&options.network, options.nodes)?);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (control, _) = watch::channel(Control::Run);

        let env = SupervisorEnv {
            markers: MarkerStore::new(layout.markers_dir()),
            options,
            layout,
            plan,
            controller,
            registry: ProcessRegistry::new(),
            events: events_tx,
        };

        Ok(Self {
            env,
            control,
            events,
            tasks: JoinSet::new(),
            table: StatusTable::new(0),
            launched: false,
            cancelled: false,
        })
    }

    pub fn plan(&self) -> Arc<NetworkPlan> {
        self.env.plan.clone()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.env.registry
    }

    /// Start `count` supervisors concurrently. May be called once.
    pub fn launch(&mut self, count: usize) -> FleetResult<()> {
        if self.cancelled {
            return Err(FleetError::Cancelled);
        }
        if self.launched {
            return Err(FleetError::InvalidState("fleet already launched".into()));
        }
        if count == 0 || count > self.env.plan.len() {
            return Err(FleetError::Config(format!(
                "cannot launch {} VMs with a network plan for {}",
                count,
                self.env.plan.len()
            )));
        }
        self.launched = true;
        self.table = StatusTable::new(count);

        for index in 0..count {
            let supervisor = VmSupervisor::new(index, self.env.clone());
            let control = self.control.subscribe();
            self.tasks
                .spawn(async move { (index, supervisor.run(control).await) });
        }
        tracing::info!(count, "Launched VM supervisors");
        Ok(())
    }

    /// Wait until every VM is Ready.
    ///
    /// Returns the first VM failure as soon as it is reported. Hitting
    /// `timeout` is `FleetTimeout` naming the VMs still pending.
    pub async fn await_ready(&mut self, poll: Duration, timeout: Duration) -> FleetResult<()> {
        if self.cancelled {
            return Err(FleetError::Cancelled);
        }
        if !self.launched {
            return Err(FleetError::InvalidState("fleet not launched".into()));
        }
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.table.barrier() == BarrierState::Ready {
                tracing::info!(count = self.table.len(), "All VMs ready");
                return Ok(());
            }

            tokio::select! {
                biased;
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return Err(FleetError::Internal("supervisor event channel closed".into()));
                    };
                    self.table.apply(&event);
                    if let VmEvent::Failed { error, .. } = event {
                        return Err(error);
                    }
                }
                Some(joined) = self.tasks.join_next() => {
                    if let Some((index, state)) = Self::record_exit(joined) {
                        tracing::debug!(vm = index, state = %state, "Supervisor finished before the barrier");
                    } else {
                        return Err(FleetError::Internal("supervisor task panicked".into()));
                    }
                }
                _ = ticker.tick() => {
                    let pending = self.table.pending();
                    tracing::info!(
                        ready = self.table.len() - pending.len(),
                        total = self.table.len(),
                        ?pending,
                        "Waiting for VMs"
                    );
                }
                _ = &mut deadline => {
                    let pending = self.table.pending();
                    tracing::error!(?pending, ?timeout, "Fleet readiness timed out");
                    return Err(FleetError::FleetTimeout { pending });
                }
            }
        }
    }

    /// Let the guests power off on their own and wait for every VM process
    /// to exit.
    pub async fn shutdown(&mut self, timeout: Duration) -> FleetResult<()> {
        tracing::info!("Waiting for VMs to shut down");
        self.control.send_replace(Control::Shutdown);
        match tokio::time::timeout(timeout, self.join_all()).await {
            Ok(()) => {
                self.drain_events();
                Ok(())
            }
            Err(_) => Err(FleetError::Engine(format!(
                "{} VMs still running {:?} after shutdown",
                self.tasks.len(),
                timeout
            ))),
        }
    }

    /// Tear the whole fleet down. Idempotent.
    ///
    /// Supervisors get `cancel_grace` to kill their VMs. Stragglers are
    /// aborted and any PID still registered is killed.
    pub async fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;

        self.control.send_replace(Control::Cancel);
        let grace = self.env.options.cancel_grace();
        if tokio::time::timeout(grace, self.join_all()).await.is_err() {
            tracing::warn!(
                remaining = self.tasks.len(),
                ?grace,
                "Supervisors did not stop in time, aborting"
            );
            self.tasks.abort_all();
            self.join_all().await;
        }

        let killed = self.env.registry.kill_all();
        if killed > 0 {
            tracing::warn!(killed, "Killed leftover hypervisor processes");
        }
        self.drain_events();
        tracing::info!("Fleet torn down");
    }

    /// Snapshot of the status table.
    pub fn status(&mut self) -> Vec<VmStatus> {
        self.drain_events();
        self.table.rows().to_vec()
    }

    async fn join_all(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            Self::record_exit(joined);
        }
    }

    fn record_exit(joined: Result<(usize, VmState), JoinError>) -> Option<(usize, VmState)> {
        match joined {
            Ok((index, state)) => {
                tracing::debug!(vm = index, state = %state, "Supervisor exited");
                Some((index, state))
            }
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                tracing::error!("Supervisor task panicked: {}", e);
                None
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.table.apply(&event);
        }
    }
}

impl Drop for FleetCoordinator {
    fn drop(&mut self) {
        if !self.env.registry.is_empty() {
            tracing::warn!("Coordinator dropped with VMs still registered");
            self.env.registry.kill_all();
        }
    }
}
