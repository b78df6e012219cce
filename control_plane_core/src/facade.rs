//! Boundary operations of the control plane.
//!
//! [`ControlPlane`] validates raw input, delegates to the store, mirror,
//! probe and orchestrator, and shapes every result as an [`Envelope`]-based
//! report. Errors are returned as [`ControlPlaneError`]; the HTTP layer turns
//! them into failed envelopes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use config_store_interface::ConfigStore;
use control_plane_shared_types::{
    ConfigMap, ControlPlaneError, Envelope, Result, ServerState, ServerStatus, ServerType,
    ServiceHealth,
};
use provisioner::{is_valid_playbook_name, Action, ActionOutput, ActionRunner};

use crate::env_mirror::{is_valid_env_key, EnvMirror};
use crate::orchestrator::Orchestrator;
use crate::status_probe::{ServerStatusProbe, DEFAULT_HEALTH_TIMEOUT};

/// Keys reported by [`ControlPlane::settings`], with their fallback values.
pub const SETTINGS_KEYS: [(&str, &str); 9] = [
    ("CONSUL_HTTP_ADDR", ""),
    ("HCLOUD_TOKEN", "Not set"),
    ("S3_ENABLED", "false"),
    ("S3_ACCESS_KEY", "Not set"),
    ("S3_SECRET_KEY", "Not set"),
    ("S3_BUCKET", ""),
    ("S3_ENDPOINT", ""),
    ("S3_REGION", ""),
    ("DEBUG", "false"),
];

/// Playbook run by [`ControlPlane::setup`].
pub const SETUP_PLAYBOOK: &str = "setup";

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub env_file: PathBuf,
    pub health_timeout: Duration,
    /// Store address shown in the settings report.
    pub consul_url: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            env_file: PathBuf::from(".env"),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            consul_url: "http://127.0.0.1:8500".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorReport {
    pub path: String,
    pub in_sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub services: ServiceHealth,
    pub servers: BTreeMap<ServerType, ServerState>,
    pub env_mirror: MirrorReport,
}

/// Result of a start, stop or playbook run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<ActionOutput> for ActionReport {
    fn from(output: ActionOutput) -> Self {
        Self {
            envelope: Envelope::ok(output.stdout),
            stderr: Some(output.stderr).filter(|s| !s.trim().is_empty()),
            exit_code: output.exit_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsulService {
    pub connected: bool,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsServices {
    pub consul: ConsulService,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub env: BTreeMap<String, String>,
    pub services: SettingsServices,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsReport {
    pub success: bool,
    pub settings: SettingsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigReport {
    pub success: bool,
    pub config: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveReport {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub keys: Vec<String>,
    pub env_mirror: MirrorReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupReport {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub config: SaveReport,
    pub playbook: ActionReport,
}

pub struct ControlPlane {
    store: ConfigStore,
    runner: Arc<dyn ActionRunner>,
    mirror: EnvMirror,
    probe: ServerStatusProbe,
    orchestrator: Orchestrator,
    consul_url: String,
    env: EnvLookup,
    /// Serialises re-read-and-materialise so an older snapshot never
    /// overwrites a newer one.
    mirror_sync: Mutex<()>,
}

impl ControlPlane {
    pub fn new(store: ConfigStore, runner: Arc<dyn ActionRunner>, config: ControlPlaneConfig) -> Self {
        Self {
            probe: ServerStatusProbe::new(store.clone(), runner.clone(), config.health_timeout),
            orchestrator: Orchestrator::new(store.clone(), runner.clone()),
            mirror: EnvMirror::new(config.env_file),
            store,
            runner,
            consul_url: config.consul_url,
            env: Arc::new(|key: &str| std::env::var(key).ok()),
            mirror_sync: Mutex::new(()),
        }
    }

    /// Replace the process-environment lookup used by [`Self::settings`].
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    pub fn mirror(&self) -> &EnvMirror {
        &self.mirror
    }

    /// CLI status output, dependency health and the recorded state of every
    /// server type. Fails when the CLI status call fails.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<StatusReport> {
        let (cli, services) = tokio::join!(self.probe.cli_status(), self.probe.check_dependency_health());

        let output = cli?;
        if !output.is_success() {
            return Err(ControlPlaneError::ProvisioningFailure {
                stderr: output.stderr,
                exit_code: output.exit_code,
            });
        }

        let mut servers = BTreeMap::new();
        for server_type in ServerType::ALL {
            let state = match self.probe.server_status(server_type).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(server_type = %server_type, error = %e, "Server record unreadable");
                    ServerState::new(ServerStatus::Error).with_detail(e.to_string())
                }
            };
            servers.insert(server_type, state);
        }

        Ok(StatusReport {
            envelope: Envelope::ok(output.stdout),
            services,
            servers,
            env_mirror: self.mirror_report(),
        })
    }

    #[instrument(skip(self))]
    pub async fn start(&self, server_type: &str) -> Result<ActionReport> {
        let server_type: ServerType = server_type.parse()?;
        Ok(self.orchestrator.start(server_type).await?.into())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, server_type: &str) -> Result<ActionReport> {
        let server_type: ServerType = server_type.parse()?;
        Ok(self.orchestrator.stop(server_type).await?.into())
    }

    /// Effective values of [`SETTINGS_KEYS`]: the stored value, else the
    /// process environment, else the fallback.
    #[instrument(skip(self))]
    pub async fn settings(&self) -> Result<SettingsReport> {
        let (stored, connected) = tokio::join!(self.store.get(), self.probe.consul_reachable());
        let stored = stored.unwrap_or_else(|e| {
            warn!(error = %e, "Configuration unreadable, falling back to the environment");
            ConfigMap::new()
        });

        let env = SETTINGS_KEYS
            .iter()
            .map(|&(key, fallback)| {
                let value = stored
                    .get(key)
                    .cloned()
                    .or_else(|| (self.env)(key))
                    .unwrap_or_else(|| fallback.to_string());
                (key.to_string(), value)
            })
            .collect();

        Ok(SettingsReport {
            success: true,
            settings: SettingsSnapshot {
                env,
                services: SettingsServices {
                    consul: ConsulService {
                        connected,
                        url: self.consul_url.clone(),
                    },
                },
            },
        })
    }

    #[instrument(skip(self))]
    pub async fn get_config(&self) -> Result<ConfigReport> {
        Ok(ConfigReport {
            success: true,
            config: self.store.get().await?,
        })
    }

    /// Validate and store `config`, then rewrite the env mirror from a fresh
    /// read of the store. A mirror failure does not fail the save; it is
    /// reported in `output` and retried on the next save.
    #[instrument(skip_all, fields(keys = config.len()))]
    pub async fn save_config(&self, config: ConfigMap) -> Result<SaveReport> {
        if let Some(bad) = config.keys().find(|k| !is_valid_env_key(k)) {
            return Err(ControlPlaneError::Validation(format!(
                "'{}' is not a valid configuration key; use letters, digits and underscores",
                bad
            )));
        }

        self.store.set(&config).await?;
        let keys: Vec<String> = config.into_keys().collect();
        info!(keys = ?keys, "Configuration saved");

        let message = match self.sync_mirror().await {
            Ok(()) => format!("Saved {} configuration keys", keys.len()),
            Err(e) => format!(
                "Saved {} configuration keys; env mirror not updated: {}",
                keys.len(),
                e
            ),
        };

        Ok(SaveReport {
            envelope: Envelope::ok(message),
            keys,
            env_mirror: self.mirror_report(),
        })
    }

    /// Run playbook `name` with `vars` as extra variables.
    #[instrument(skip(self, vars))]
    pub async fn run_playbook(&self, name: &str, vars: serde_json::Value) -> Result<ActionReport> {
        if !is_valid_playbook_name(name) {
            return Err(ControlPlaneError::Validation(format!(
                "invalid playbook name '{}'",
                name
            )));
        }
        if !vars.is_object() {
            return Err(ControlPlaneError::Validation(
                "playbook variables must be a JSON object".to_string(),
            ));
        }

        let action = Action::Playbook {
            name: name.to_string(),
            vars,
        };
        let output = self.runner.run(&action).await?;
        if !output.is_success() {
            warn!(exit_code = ?output.exit_code, "Playbook failed");
            return Err(ControlPlaneError::ProvisioningFailure {
                stderr: output.stderr,
                exit_code: output.exit_code,
            });
        }
        Ok(output.into())
    }

    /// Save `config`, then run the setup playbook with it as variables.
    #[instrument(skip_all, fields(keys = config.len()))]
    pub async fn setup(&self, config: ConfigMap) -> Result<SetupReport> {
        let vars = serde_json::to_value(&config)
            .map_err(|e| ControlPlaneError::Io(format!("could not encode playbook variables: {}", e)))?;
        let saved = self.save_config(config).await?;
        let playbook = self.run_playbook(SETUP_PLAYBOOK, vars).await?;

        Ok(SetupReport {
            envelope: Envelope::ok(format!("Setup completed ({} keys)", saved.keys.len())),
            config: saved,
            playbook,
        })
    }

    /// Accepts any credential map and checks nothing.
    #[instrument(skip_all, fields(keys = credentials.len()))]
    pub async fn validate_credentials(&self, credentials: ConfigMap) -> Result<Envelope> {
        warn!("Credential validation requested but not implemented");
        Ok(Envelope::ok(
            "Credential validation is not implemented; nothing was checked",
        ))
    }

    /// Rewrite the env mirror from the store. Run at startup.
    pub async fn reconcile_mirror(&self) -> Result<()> {
        self.sync_mirror().await
    }

    async fn sync_mirror(&self) -> Result<()> {
        let _guard = self.mirror_sync.lock().await;
        let snapshot = self.store.get().await?;
        self.mirror.materialize(&snapshot).await?;
        Ok(())
    }

    fn mirror_report(&self) -> MirrorReport {
        MirrorReport {
            path: self.mirror.path().display().to_string(),
            in_sync: !self.mirror.is_stale(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store_interface::{InMemoryKvStore, KvStore};
    use provisioner::MockActionRunner;

    struct Fixture {
        kv: Arc<InMemoryKvStore>,
        runner: Arc<MockActionRunner>,
        control_plane: ControlPlane,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(InMemoryKvStore::new());
        let runner = Arc::new(MockActionRunner::new());
        let control_plane = ControlPlane::new(
            ConfigStore::new(kv.clone()),
            runner.clone(),
            ControlPlaneConfig {
                env_file: dir.path().join("server.env"),
                ..ControlPlaneConfig::default()
            },
        )
        .with_env_lookup(|key| (key == "S3_REGION").then(|| "eu-central".to_string()));
        Fixture {
            kv,
            runner,
            control_plane,
            _dir: dir,
        }
    }

    fn config(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_server_type_is_a_validation_error() {
        let f = fixture();
        let err = f.control_plane.start("bogus").await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));
        assert_eq!(f.runner.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_start_reports_stdout() {
        let f = fixture();
        f.runner.respond("start gpu", ActionOutput::success("gpu ready"));

        let report = f.control_plane.start("gpu").await.unwrap();
        assert!(report.envelope.success);
        assert_eq!(report.envelope.output.as_deref(), Some("gpu ready"));
        assert_eq!(report.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_status_collects_servers_and_health() {
        let f = fixture();
        f.runner.respond("status", ActionOutput::success("all quiet"));
        f.kv.put("servers/app", b"running").await.unwrap();

        let report = f.control_plane.status().await.unwrap();
        assert_eq!(report.envelope.output.as_deref(), Some("all quiet"));
        assert!(report.services.consul_reachable);
        assert!(!report.services.object_storage_configured);
        assert_eq!(report.servers[&ServerType::App].status, ServerStatus::Running);
        assert_eq!(report.servers[&ServerType::Gpu].status, ServerStatus::NotRunning);
        assert!(!report.env_mirror.in_sync);
    }

    #[tokio::test]
    async fn test_status_fails_when_cli_fails() {
        let f = fixture();
        f.runner.respond("status", ActionOutput::failure(2, "cli broken"));
        let err = f.control_plane.status().await.unwrap_err();
        assert_eq!(err.to_string(), "cli broken");
    }

    #[tokio::test]
    async fn test_save_config_updates_store_and_mirror() {
        let f = fixture();
        f.kv.put("config/EXISTING", b"kept").await.unwrap();

        let report = f
            .control_plane
            .save_config(config(&[("S3_BUCKET", "backups")]))
            .await
            .unwrap();
        assert_eq!(report.keys, vec!["S3_BUCKET".to_string()]);
        assert!(report.env_mirror.in_sync);

        let mirrored = f.control_plane.mirror().read().await.unwrap();
        assert_eq!(
            mirrored,
            config(&[("EXISTING", "kept"), ("S3_BUCKET", "backups")])
        );
        assert_eq!(
            f.control_plane.get_config().await.unwrap().config,
            mirrored
        );
    }

    #[tokio::test]
    async fn test_save_config_survives_mirror_failure_and_resyncs() {
        let f = fixture();
        let env_file = f.control_plane.mirror().path().to_path_buf();
        std::fs::create_dir(&env_file).unwrap();

        let report = f
            .control_plane
            .save_config(config(&[("A", "1")]))
            .await
            .unwrap();
        assert!(report.envelope.success);
        assert!(report
            .envelope
            .output
            .as_deref()
            .unwrap()
            .contains("env mirror not updated"));
        assert!(!report.env_mirror.in_sync);
        assert_eq!(f.kv.get("config/A").await.unwrap(), Some(b"1".to_vec()));

        std::fs::remove_dir(&env_file).unwrap();
        let report = f
            .control_plane
            .save_config(config(&[("B", "2")]))
            .await
            .unwrap();
        assert_eq!(report.envelope.output.as_deref(), Some("Saved 1 configuration keys"));
        assert!(report.env_mirror.in_sync);
        assert_eq!(
            f.control_plane.mirror().read().await.unwrap(),
            config(&[("A", "1"), ("B", "2")])
        );
    }

    #[tokio::test]
    async fn test_stray_nested_key_does_not_block_mirror() {
        let f = fixture();
        f.kv.put("config/other/tool", b"x").await.unwrap();

        let report = f
            .control_plane
            .save_config(config(&[("A", "1")]))
            .await
            .unwrap();
        assert!(report.env_mirror.in_sync);
        assert_eq!(
            f.control_plane.mirror().read().await.unwrap(),
            config(&[("A", "1")])
        );
    }

    #[tokio::test]
    async fn test_save_config_rejects_bad_keys_before_writing() {
        let f = fixture();
        let err = f
            .control_plane
            .save_config(config(&[("GOOD", "1"), ("not-valid", "2")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));
        assert!(f.kv.is_empty().await);
    }

    #[tokio::test]
    async fn test_settings_precedence() {
        let f = fixture();
        f.kv.put("config/S3_BUCKET", b"stored").await.unwrap();

        let report = f.control_plane.settings().await.unwrap();
        let env = &report.settings.env;
        assert_eq!(env["S3_BUCKET"], "stored");
        assert_eq!(env["S3_REGION"], "eu-central");
        assert_eq!(env["HCLOUD_TOKEN"], "Not set");
        assert_eq!(env["DEBUG"], "false");
        assert_eq!(env["S3_ENDPOINT"], "");
        assert_eq!(env.len(), SETTINGS_KEYS.len());
        assert!(report.settings.services.consul.connected);
    }

    #[tokio::test]
    async fn test_playbook_name_is_validated() {
        let f = fixture();
        let err = f
            .control_plane
            .run_playbook("../etc/passwd", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));
        assert_eq!(f.runner.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_setup_saves_then_runs_playbook_with_config() {
        let f = fixture();
        f.runner.respond("playbook setup", ActionOutput::success("ok=3"));

        let report = f
            .control_plane
            .setup(config(&[("HCLOUD_TOKEN", "secret")]))
            .await
            .unwrap();
        assert_eq!(report.playbook.envelope.output.as_deref(), Some("ok=3"));
        assert_eq!(
            f.runner.invocations(),
            vec![Action::Playbook {
                name: "setup".to_string(),
                vars: serde_json::json!({"HCLOUD_TOKEN": "secret"}),
            }]
        );
        assert_eq!(
            f.kv.get("config/HCLOUD_TOKEN").await.unwrap(),
            Some(b"secret".to_vec())
        );
    }

    #[tokio::test]
    async fn test_validate_credentials_checks_nothing() {
        let f = fixture();
        let envelope = f
            .control_plane
            .validate_credentials(config(&[("S3_ACCESS_KEY", "k")]))
            .await
            .unwrap();
        assert!(envelope.success);
        assert!(envelope.output.unwrap().contains("not implemented"));
    }

    #[tokio::test]
    async fn test_reconcile_mirror_writes_current_store() {
        let f = fixture();
        f.kv.put("config/A", b"1").await.unwrap();
        f.control_plane.reconcile_mirror().await.unwrap();
        assert_eq!(
            f.control_plane.mirror().read().await.unwrap(),
            config(&[("A", "1")])
        );
        assert!(!f.control_plane.mirror().is_stale());
    }
}
