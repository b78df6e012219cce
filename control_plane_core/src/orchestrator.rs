//! Server lifecycle state machine.
//!
//! | Operation | Allowed from        | While running | On success    | On failure |
//! |-----------|---------------------|---------------|---------------|------------|
//! | `start`   | not_running, error  | starting      | running       | error      |
//! | `stop`    | running, error      | stopping      | not_running   | error      |
//!
//! Only one lifecycle operation per server type may be in flight. A
//! concurrent request for the same type is turned away before anything is
//! read or invoked.
//!
//! Each operation runs on its own task and finishes even if the caller stops
//! waiting for it. A `starting` or `stopping` record found while no operation
//! holds the lock is left over from an interrupted operation and is treated
//! like `error`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn, Instrument, Span};
use uuid::Uuid;

use config_store_interface::ConfigStore;
use control_plane_shared_types::{
    ControlPlaneError, Result, ServerState, ServerStatus, ServerType,
};
use observability::ControlPlaneMetrics;
use provisioner::{Action, ActionOutput, ActionRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start,
    Stop,
}

impl Transition {
    fn verb(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Stop => "stop",
        }
    }

    fn allowed_from(self, status: ServerStatus) -> bool {
        match self {
            Transition::Start => status.can_start(),
            Transition::Stop => status.can_stop(),
        }
    }

    fn in_progress(self) -> ServerStatus {
        match self {
            Transition::Start => ServerStatus::Starting,
            Transition::Stop => ServerStatus::Stopping,
        }
    }

    fn target(self) -> ServerStatus {
        match self {
            Transition::Start => ServerStatus::Running,
            Transition::Stop => ServerStatus::NotRunning,
        }
    }

    fn action(self, server_type: ServerType) -> Action {
        match self {
            Transition::Start => Action::Start(server_type),
            Transition::Stop => Action::Stop(server_type),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: ConfigStore,
    runner: Arc<dyn ActionRunner>,
    locks: Arc<HashMap<ServerType, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(store: ConfigStore, runner: Arc<dyn ActionRunner>) -> Self {
        let locks = ServerType::ALL
            .into_iter()
            .map(|t| (t, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            store,
            runner,
            locks: Arc::new(locks),
        }
    }

    /// Provision and start `server_type`. Returns the action's captured
    /// output on success.
    pub async fn start(&self, server_type: ServerType) -> Result<ActionOutput> {
        self.transition(server_type, Transition::Start).await
    }

    /// Stop `server_type`.
    pub async fn stop(&self, server_type: ServerType) -> Result<ActionOutput> {
        self.transition(server_type, Transition::Stop).await
    }

    #[instrument(
        skip_all,
        fields(server_type = %server_type, action = transition.verb(), op_id = %Uuid::new_v4())
    )]
    async fn transition(&self, server_type: ServerType, transition: Transition) -> Result<ActionOutput> {
        let lock = self
            .locks
            .get(&server_type)
            .ok_or_else(|| ControlPlaneError::Validation(format!("unmanaged server type {}", server_type)))?;
        let guard = lock.clone().try_lock_owned().map_err(|_| {
            warn!("Rejected: another lifecycle operation is in flight");
            ControlPlaneError::OperationInProgress(server_type)
        })?;

        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                let started = Instant::now();
                let result = this.run_transition(server_type, transition).await;

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(ControlPlaneError::InvalidTransition { .. }) => "rejected",
                    Err(ControlPlaneError::Timeout(_)) => "timeout",
                    Err(_) => "failed",
                };
                ControlPlaneMetrics::lifecycle(server_type.as_str(), transition.verb(), outcome, started.elapsed());
                result
            }
            .instrument(Span::current()),
        );

        task.await.map_err(|e| {
            error!(error = %e, "Lifecycle task aborted");
            ControlPlaneError::Io(format!("{} {} aborted: {}", transition.verb(), server_type, e))
        })?
    }

    async fn run_transition(&self, server_type: ServerType, transition: Transition) -> Result<ActionOutput> {
        let key = self.store.server_key(server_type);

        let current = match self.store.get_key(&key).await? {
            Some(raw) => ServerState::decode(&raw),
            None => ServerState::not_running(),
        };
        // The lock is held, so an in-progress record has no live operation.
        let effective = match current.status {
            ServerStatus::Starting | ServerStatus::Stopping => {
                warn!(status = %current.status, "Recovering interrupted lifecycle operation");
                ServerStatus::Error
            }
            status => status,
        };
        if !transition.allowed_from(effective) {
            info!(status = %current.status, "Rejected: transition not allowed");
            return Err(ControlPlaneError::InvalidTransition {
                server_type,
                action: transition.verb(),
                status: current.status,
            });
        }

        self.record(&key, ServerState::new(transition.in_progress())).await?;
        info!(from = %current.status, "Invoking provisioning action");

        match self.runner.run(&transition.action(server_type)).await {
            Ok(output) if output.is_success() => {
                self.record(&key, ServerState::new(transition.target())).await?;
                info!(to = %transition.target(), "Lifecycle operation succeeded");
                Ok(output)
            }
            Ok(output) => {
                warn!(exit_code = ?output.exit_code, "Provisioning action failed");
                self.record_failure(&key, &output.stderr).await;
                Err(ControlPlaneError::ProvisioningFailure {
                    stderr: output.stderr,
                    exit_code: output.exit_code,
                })
            }
            Err(e) => {
                error!(error = %e, "Provisioning action did not complete");
                self.record_failure(&key, &e.to_string()).await;
                Err(e.into())
            }
        }
    }

    async fn record(&self, key: &str, state: ServerState) -> Result<()> {
        self.store.put_key(key, &state.encode()).await?;
        Ok(())
    }

    async fn record_failure(&self, key: &str, detail: &str) {
        let state = ServerState::new(ServerStatus::Error).with_detail(detail);
        if let Err(e) = self.record(key, state).await {
            // The in-progress record is recovered by the next operation.
            error!(error = %e, "Failed to record error state");
        }
    }
}
