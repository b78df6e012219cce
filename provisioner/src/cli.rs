//! CLI-based action runner.
//!
//! Lifecycle and status actions are delegated to the server CLI
//! (`<server-cli> start app`, `<server-cli> status`, ...). Playbooks are run
//! through `ansible-playbook` with their variables passed as a JSON file.
//!
//! # Resource handling
//!
//! Every child process is spawned with `kill_on_drop`, so a timed-out
//! action is killed when its future is dropped. Playbook variable files are
//! `tempfile` handles and are removed whether the run succeeds, fails or
//! times out.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{is_valid_playbook_name, Action, ActionError, ActionOutput, ActionRunner};

/// Configuration for [`CliActionRunner`].
#[derive(Debug, Clone)]
pub struct CliRunnerConfig {
    /// Server CLI invocation; lifecycle arguments are appended
    /// (default: `["server-manager"]`)
    pub server_command: Vec<String>,
    /// Playbook runner invocation (default: `["ansible-playbook"]`)
    pub playbook_command: Vec<String>,
    /// Directory holding `<name>.yml` playbooks
    pub playbook_dir: PathBuf,
    /// Where playbook variable files are written (default: system temp dir)
    pub vars_dir: Option<PathBuf>,
    /// Upper bound for start/stop/playbook actions (default: 600s)
    pub action_timeout: Duration,
    /// Upper bound for the status call (default: 30s)
    pub status_timeout: Duration,
}

impl Default for CliRunnerConfig {
    fn default() -> Self {
        Self {
            server_command: vec!["server-manager".to_string()],
            playbook_command: vec!["ansible-playbook".to_string()],
            playbook_dir: PathBuf::from("playbooks"),
            vars_dir: None,
            action_timeout: Duration::from_secs(600),
            status_timeout: Duration::from_secs(30),
        }
    }
}

/// [`ActionRunner`] that shells out to external tools.
#[derive(Debug, Clone)]
pub struct CliActionRunner {
    config: CliRunnerConfig,
}

impl CliActionRunner {
    pub fn new(config: CliRunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CliRunnerConfig {
        &self.config
    }

    /// Execute `command` followed by `args`, bounded by `timeout`.
    async fn exec(
        &self,
        command: &[String],
        args: &[String],
        timeout: Duration,
        label: &str,
    ) -> Result<ActionOutput, ActionError> {
        let (program, prefix) = command
            .split_first()
            .ok_or(ActionError::NotConfigured("this action"))?;

        debug!("Executing: {} {} {}", program, prefix.join(" "), args.join(" "));
        let started = Instant::now();

        let output = tokio::time::timeout(
            timeout,
            Command::new(program)
                .args(prefix)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            warn!(action = label, ?timeout, "Action timed out, child killed");
            ActionError::Timeout {
                command: label.to_string(),
                after: timeout,
            }
        })?
        .map_err(|source| ActionError::Spawn {
            program: program.clone(),
            source,
        })?;

        let result = ActionOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        info!(
            action = label,
            exit_code = ?result.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Action finished"
        );
        Ok(result)
    }

    async fn run_playbook(
        &self,
        name: &str,
        vars: &serde_json::Value,
        label: &str,
    ) -> Result<ActionOutput, ActionError> {
        if !is_valid_playbook_name(name) {
            return Err(ActionError::InvalidPlaybookName(name.to_string()));
        }

        let playbook = self.config.playbook_dir.join(format!("{}.yml", name));
        if !tokio::fs::try_exists(&playbook).await.unwrap_or(false) {
            return Err(ActionError::PlaybookNotFound(playbook.display().to_string()));
        }

        // Dropped at the end of this function on every path, which deletes
        // the file.
        let vars_file = self.write_vars_file(vars)?;
        let args = vec![
            playbook.display().to_string(),
            "-e".to_string(),
            format!("@{}", vars_file.path().display()),
        ];

        self.exec(
            &self.config.playbook_command,
            &args,
            self.config.action_timeout,
            label,
        )
        .await
    }

    fn write_vars_file(
        &self,
        vars: &serde_json::Value,
    ) -> Result<tempfile::NamedTempFile, ActionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("playbook-vars-").suffix(".json");
        let mut file = match &self.config.vars_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        serde_json::to_writer(&mut file, vars)?;
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl ActionRunner for CliActionRunner {
    async fn run(&self, action: &Action) -> Result<ActionOutput, ActionError> {
        let label = action.label();
        match action {
            Action::Start(server_type) => {
                let args = vec!["start".to_string(), server_type.to_string()];
                self.exec(&self.config.server_command, &args, self.config.action_timeout, &label)
                    .await
            }
            Action::Stop(server_type) => {
                let args = vec!["stop".to_string(), server_type.to_string()];
                self.exec(&self.config.server_command, &args, self.config.action_timeout, &label)
                    .await
            }
            Action::Status => {
                let args = vec!["status".to_string()];
                self.exec(&self.config.server_command, &args, self.config.status_timeout, &label)
                    .await
            }
            Action::Playbook { name, vars } => self.run_playbook(name, vars, &label).await,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use control_plane_shared_types::ServerType;
    use std::path::Path;

    /// `sh -c <script> sh <args...>`: positional parameters start at `$1`.
    fn shell(script: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
        ]
    }

    fn runner(server_script: &str) -> CliActionRunner {
        CliActionRunner::new(CliRunnerConfig {
            server_command: shell(server_script),
            action_timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(5),
            ..CliRunnerConfig::default()
        })
    }

    #[test]
    fn test_config_default() {
        let config = CliRunnerConfig::default();
        assert_eq!(config.server_command, vec!["server-manager".to_string()]);
        assert_eq!(config.action_timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_start_passes_verb_and_type() {
        let output = runner("echo \"$1 $2\"")
            .run(&Action::Start(ServerType::Gpu))
            .await
            .unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), "start gpu");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_captured_not_raised() {
        let output = runner("echo 'disk full' >&2; exit 3")
            .run(&Action::Stop(ServerType::App))
            .await
            .unwrap();
        assert!(!output.is_success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "disk full\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_action() {
        let runner = CliActionRunner::new(CliRunnerConfig {
            server_command: shell("sleep 5"),
            action_timeout: Duration::from_millis(200),
            ..CliRunnerConfig::default()
        });

        let started = Instant::now();
        let err = runner.run(&Action::Start(ServerType::App)).await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let runner = CliActionRunner::new(CliRunnerConfig {
            server_command: vec!["nonexistent_command_12345".to_string()],
            ..CliRunnerConfig::default()
        });
        let err = runner.run(&Action::Status).await.unwrap_err();
        assert!(matches!(err, ActionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_empty_command_is_not_configured() {
        let runner = CliActionRunner::new(CliRunnerConfig {
            server_command: Vec::new(),
            ..CliRunnerConfig::default()
        });
        let err = runner.run(&Action::Status).await.unwrap_err();
        assert!(matches!(err, ActionError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_playbook_receives_vars_file_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("setup.yml"), "- hosts: all\n").unwrap();

        // $1 = playbook, $2 = -e, $3 = @<vars file>
        let runner = CliActionRunner::new(CliRunnerConfig {
            playbook_command: shell("cat \"${3#@}\"; echo \"${3#@}\" >&2"),
            playbook_dir: dir.path().to_path_buf(),
            vars_dir: Some(dir.path().to_path_buf()),
            ..CliRunnerConfig::default()
        });

        let vars = serde_json::json!({"S3_BUCKET": "backups"});
        let output = runner
            .run(&Action::Playbook {
                name: "setup".to_string(),
                vars: vars.clone(),
            })
            .await
            .unwrap();

        assert!(output.is_success());
        let echoed: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
        assert_eq!(echoed, vars);
        assert!(!Path::new(output.stderr.trim()).exists());
    }

    #[tokio::test]
    async fn test_playbook_rejects_bad_names() {
        let runner = CliActionRunner::new(CliRunnerConfig::default());
        let err = runner
            .run(&Action::Playbook {
                name: "../../etc/passwd".to_string(),
                vars: serde_json::Value::Null,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidPlaybookName(_)));

        let err = runner
            .run(&Action::Playbook {
                name: "missing".to_string(),
                vars: serde_json::Value::Null,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::PlaybookNotFound(_)));
    }
}
