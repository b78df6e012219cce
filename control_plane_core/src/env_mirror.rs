//! Local environment-file mirror of the configuration namespace.
//!
//! Processes that cannot talk to the key-value store read their settings
//! from a `KEY="VALUE"` file. The file is always rewritten from a complete
//! snapshot: the new content goes to a sibling temp file which is fsynced and
//! renamed over the target, so readers see either the old or the new file,
//! never a mix.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use control_plane_shared_types::{ConfigMap, ControlPlaneError};
use observability::ControlPlaneMetrics;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("'{0}' is not a valid environment variable name")]
    InvalidKey(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl From<MirrorError> for ControlPlaneError {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::InvalidKey(_) => ControlPlaneError::Validation(err.to_string()),
            other => ControlPlaneError::Io(other.to_string()),
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_env_key(key: &str) -> bool {
    config_store_interface::is_valid_config_key(key)
}

/// Writer of the env file. The only component that touches it.
#[derive(Debug)]
pub struct EnvMirror {
    path: PathBuf,
    stale: AtomicBool,
}

impl EnvMirror {
    /// The mirror counts as stale until its first successful write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale: AtomicBool::new(true),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the last materialisation failed (or none happened yet).
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Replace the file with the full content of `config`.
    pub async fn materialize(&self, config: &ConfigMap) -> Result<(), MirrorError> {
        let result = self.write_atomically(config).await;
        self.stale.store(result.is_err(), Ordering::SeqCst);
        ControlPlaneMetrics::mirror_write(result.is_ok());
        match &result {
            Ok(()) => info!(path = %self.path.display(), keys = config.len(), "Env mirror materialized"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Env mirror write failed"),
        }
        result
    }

    /// Current file content. A missing file reads as empty.
    pub async fn read(&self) -> Result<ConfigMap, MirrorError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigMap::new()),
            Err(source) => Err(MirrorError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write_atomically(&self, config: &ConfigMap) -> Result<(), MirrorError> {
        let content = render(config)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "env".to_string());
        let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| MirrorError::Io { path, source }
        };

        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let write = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
            Ok::<(), std::io::Error>(())
        };
        if let Err(source) = write.await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(MirrorError::Io {
                path: temp_path,
                source,
            });
        }

        if let Err(source) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_err(&self.path)(source));
        }

        debug!(temp = %temp_path.display(), "Renamed env mirror into place");
        Ok(())
    }
}

/// Serialise `config` as one `KEY="VALUE"` line per entry, in key order.
pub fn render(config: &ConfigMap) -> Result<String, MirrorError> {
    let mut out = String::new();
    for (key, value) in config {
        if !is_valid_env_key(key) {
            return Err(MirrorError::InvalidKey(key.clone()));
        }
        out.push_str(key);
        out.push_str("=\"");
        for c in value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '$' => out.push_str("\\$"),
                other => out.push(other),
            }
        }
        out.push_str("\"\n");
    }
    Ok(out)
}

/// Parse env-file content produced by [`render`]. Also accepts unquoted
/// values, an `export ` prefix, blank lines and `#` comments.
pub fn parse(content: &str) -> Result<ConfigMap, MirrorError> {
    let mut config = ConfigMap::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let (key, rest) = line.split_once('=').ok_or_else(|| MirrorError::Parse {
            line: line_no,
            message: "expected KEY=VALUE".to_string(),
        })?;
        let key = key.trim();
        if !is_valid_env_key(key) {
            return Err(MirrorError::Parse {
                line: line_no,
                message: format!("invalid key '{}'", key),
            });
        }

        let value = match rest.trim_start().strip_prefix('"') {
            Some(quoted) => unquote(quoted, line_no)?,
            None => rest.trim().to_string(),
        };
        config.insert(key.to_string(), value);
    }

    Ok(config)
}

fn unquote(quoted: &str, line: usize) -> Result<String, MirrorError> {
    let mut value = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                let trailing = chars.as_str().trim();
                if !trailing.is_empty() && !trailing.starts_with('#') {
                    return Err(MirrorError::Parse {
                        line,
                        message: "unexpected content after closing quote".to_string(),
                    });
                }
                return Ok(value);
            }
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some(other) => value.push(other),
                None => break,
            },
            other => value.push(other),
        }
    }

    Err(MirrorError::Parse {
        line,
        message: "unterminated quoted value".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_key_validation() {
        assert!(is_valid_env_key("S3_BUCKET"));
        assert!(is_valid_env_key("_private"));
        assert!(!is_valid_env_key("3D"));
        assert!(!is_valid_env_key("A-B"));
        assert!(!is_valid_env_key(""));
        assert!(!is_valid_env_key("config/X"));
    }

    #[test]
    fn test_render_is_sorted_and_quoted() {
        let rendered = render(&config(&[("B", "two words"), ("A", "1")])).unwrap();
        assert_eq!(rendered, "A=\"1\"\nB=\"two words\"\n");
    }

    #[test]
    fn test_round_trip_awkward_values() {
        let original = config(&[
            ("EMPTY", ""),
            ("QUOTES", "say \"hi\""),
            ("MULTILINE", "line1\nline2\r\n\tindented"),
            ("BACKSLASH", "C:\\path\\"),
            ("DOLLAR", "$HOME and ${PATH}"),
            ("EQUALS", "a=b=c"),
            ("HASH", "# not a comment"),
            ("UNICODE", "ünïcødé ✓"),
        ]);
        let parsed = parse(&render(&original).unwrap()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_accepts_hand_written_files() {
        let content = "# comment\n\nexport A=plain\nB = \"quoted\" # trailing\n";
        assert_eq!(
            parse(content).unwrap(),
            config(&[("A", "plain"), ("B", "quoted")])
        );
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        assert!(matches!(
            parse("A=1\nnot a pair\n"),
            Err(MirrorError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse("A=\"open\n"),
            Err(MirrorError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_render_rejects_invalid_keys() {
        assert!(matches!(
            render(&config(&[("BAD KEY", "x")])),
            Err(MirrorError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_materialize_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = EnvMirror::new(dir.path().join("server.env"));
        assert!(mirror.is_stale());

        mirror
            .materialize(&config(&[("A", "1"), ("B", "2")]))
            .await
            .unwrap();
        mirror.materialize(&config(&[("A", "3")])).await.unwrap();

        assert_eq!(mirror.read().await.unwrap(), config(&[("A", "3")]));
        assert!(!mirror.is_stale());

        // No temp files are left next to the mirror.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["server.env".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_file_and_marks_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = EnvMirror::new(dir.path().join("server.env"));
        mirror.materialize(&config(&[("A", "1")])).await.unwrap();

        let err = mirror
            .materialize(&config(&[("NOT VALID", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidKey(_)));
        assert!(mirror.is_stale());
        assert_eq!(mirror.read().await.unwrap(), config(&[("A", "1")]));
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = EnvMirror::new(dir.path().join("absent.env"));
        assert!(mirror.read().await.unwrap().is_empty());
    }
}
