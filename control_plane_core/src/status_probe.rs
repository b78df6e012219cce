//! Server and dependency status.
//!
//! Server status is read from the `servers/<type>` record, not from a
//! process table. If a server dies without its record being updated the
//! reported status is stale; no liveness polling is done here.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use config_store_interface::ConfigStore;
use control_plane_shared_types::{ConfigMap, Result, ServerState, ServerType, ServiceHealth};
use observability::ControlPlaneMetrics;
use provisioner::{Action, ActionError, ActionOutput, ActionRunner};

/// Keys that must all be set for object storage to count as configured.
pub const OBJECT_STORAGE_KEYS: [&str; 4] = ["S3_ENABLED", "S3_ACCESS_KEY", "S3_SECRET_KEY", "S3_BUCKET"];

/// Default bound on the dependency health check.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// `S3_ENABLED` is `true` (any case) and the access key, secret key and
/// bucket are non-empty. Presence only; no connection is attempted.
pub fn object_storage_configured(config: &ConfigMap) -> bool {
    let enabled = config
        .get("S3_ENABLED")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    enabled
        && OBJECT_STORAGE_KEYS[1..]
            .iter()
            .all(|key| config.get(*key).map(|v| !v.trim().is_empty()).unwrap_or(false))
}

pub struct ServerStatusProbe {
    store: ConfigStore,
    runner: Arc<dyn ActionRunner>,
    health_timeout: Duration,
}

impl ServerStatusProbe {
    pub fn new(store: ConfigStore, runner: Arc<dyn ActionRunner>, health_timeout: Duration) -> Self {
        Self {
            store,
            runner,
            health_timeout,
        }
    }

    /// Reachability of the store and configuredness of object storage.
    /// Never cached. Both halves run concurrently under the health timeout.
    pub async fn check_dependency_health(&self) -> ServiceHealth {
        let (consul_reachable, object_storage_configured) =
            tokio::join!(self.consul_reachable(), self.object_storage_ready());

        ServiceHealth {
            consul_reachable,
            object_storage_configured,
        }
    }

    /// Object-storage half of the health check. A failed or timed-out
    /// configuration read counts as not configured.
    async fn object_storage_ready(&self) -> bool {
        match tokio::time::timeout(self.health_timeout, self.store.get()).await {
            Ok(Ok(config)) => object_storage_configured(&config),
            Ok(Err(e)) => {
                debug!(error = %e, "Could not read configuration for object storage check");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.health_timeout, "Configuration read for object storage check timed out");
                false
            }
        }
    }

    /// Leader-status check. Errors, timeouts and an empty leader all count
    /// as unreachable.
    pub async fn consul_reachable(&self) -> bool {
        let reachable = match tokio::time::timeout(self.health_timeout, self.store.leader()).await {
            Ok(Ok(leader)) => !leader.trim().is_empty(),
            Ok(Err(e)) => {
                debug!(error = %e, "Leader status check failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.health_timeout, "Leader status check timed out");
                false
            }
        };
        ControlPlaneMetrics::dependency_check("consul", reachable);
        reachable
    }

    /// Recorded state of `server_type`; `not_running` when there is no
    /// record.
    pub async fn server_status(&self, server_type: ServerType) -> Result<ServerState> {
        let key = self.store.server_key(server_type);
        let state = match self.store.get_key(&key).await? {
            Some(raw) => ServerState::decode(&raw),
            None => ServerState::not_running(),
        };
        Ok(state)
    }

    /// Status report of the external server CLI.
    pub async fn cli_status(&self) -> std::result::Result<ActionOutput, ActionError> {
        self.runner.run(&Action::Status).await
    }
}
