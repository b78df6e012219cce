//! Key-value store abstraction and the typed configuration store built on it.
//!
//! Backends implement [`KvStore`]:
//! - `ConsulKvStore`: Consul HTTP API (feature `consul`, default)
//! - `InMemoryKvStore`: process-local map for tests and offline runs
//!   (feature `in-memory`)
//!
//! [`ConfigStore`] layers the control plane's key layout on top of any
//! backend: a flat `config/` namespace and one `servers/<type>` record per
//! server type. Entries whose name is not a valid configuration key, such as
//! nested `config/a/b` keys written by other clients, are logged and left
//! out of [`ConfigStore::get`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use control_plane_shared_types::{ConfigMap, ControlPlaneError, ServerType};

#[cfg(feature = "consul")]
pub mod consul;

#[cfg(feature = "in-memory")]
pub mod in_memory;

#[cfg(feature = "consul")]
pub use consul::{ConsulConfig, ConsulKvStore};

#[cfg(feature = "in-memory")]
pub use in_memory::InMemoryKvStore;

/// Default prefix of the configuration namespace.
pub const DEFAULT_CONFIG_PREFIX: &str = "config/";
/// Default prefix of the per-server state records.
pub const DEFAULT_SERVERS_PREFIX: &str = "servers/";

/// `[A-Za-z_][A-Za-z0-9_]*`, the names the `config/` namespace holds.
pub fn is_valid_config_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Errors raised by key-value store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),

    #[error("store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("could not decode store response: {0}")]
    Decode(String),

    #[error("write rejected for key {0}")]
    Rejected(String),

    /// A multi-key write stopped at `failed_key`. Keys in `written` were
    /// stored; rewriting the whole map is safe.
    #[error("wrote {written:?} before failing on {failed_key}: {source}")]
    PartialWrite {
        written: Vec<String>,
        failed_key: String,
        #[source]
        source: Box<StoreError>,
    },
}

impl From<StoreError> for ControlPlaneError {
    fn from(err: StoreError) -> Self {
        ControlPlaneError::StoreUnavailable(err.to_string())
    }
}

/// Raw key-value operations a backend must provide.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a single key. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Every key starting with `prefix`, with its value. Empty when nothing
    /// matches.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Create or overwrite a key.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Address of the current cluster leader, as reported by the backend's
    /// leader-status endpoint. An empty string means no leader.
    async fn leader(&self) -> Result<String, StoreError>;
}

/// Typed view of the configuration namespace and server records.
///
/// Holds no cache: every call is a round trip to the backend.
#[derive(Clone)]
pub struct ConfigStore {
    kv: Arc<dyn KvStore>,
    config_prefix: String,
    servers_prefix: String,
}

impl ConfigStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_prefixes(kv, DEFAULT_CONFIG_PREFIX, DEFAULT_SERVERS_PREFIX)
    }

    pub fn with_prefixes(
        kv: Arc<dyn KvStore>,
        config_prefix: impl Into<String>,
        servers_prefix: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            config_prefix: normalize_prefix(config_prefix.into()),
            servers_prefix: normalize_prefix(servers_prefix.into()),
        }
    }

    /// All configuration entries, keyed without the namespace prefix.
    pub async fn get(&self) -> Result<ConfigMap, StoreError> {
        let entries = self.kv.list(&self.config_prefix).await?;
        let mut config = ConfigMap::new();
        for (key, value) in entries {
            let Some(name) = key.strip_prefix(&self.config_prefix) else {
                continue;
            };
            // Folder markers have a trailing slash and no meaningful value.
            if name.is_empty() || name.ends_with('/') {
                continue;
            }
            if !is_valid_config_key(name) {
                warn!(key = %key, "Skipping entry with an invalid configuration key");
                continue;
            }
            config.insert(name.to_string(), String::from_utf8_lossy(&value).into_owned());
        }
        debug!(keys = config.len(), prefix = %self.config_prefix, "Read configuration namespace");
        Ok(config)
    }

    /// Upsert every entry of `config` under the namespace.
    pub async fn set(&self, config: &ConfigMap) -> Result<(), StoreError> {
        let mut written = Vec::with_capacity(config.len());
        for (name, value) in config {
            let key = self.config_key(name);
            if let Err(e) = self.kv.put(&key, value.as_bytes()).await {
                return Err(StoreError::PartialWrite {
                    written,
                    failed_key: name.clone(),
                    source: Box::new(e),
                });
            }
            written.push(name.clone());
        }
        debug!(keys = written.len(), "Wrote configuration namespace");
        Ok(())
    }

    /// Read a raw key outside the configuration namespace.
    pub async fn get_key(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .kv
            .get(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write a raw key outside the configuration namespace.
    pub async fn put_key(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.kv.put(key, value.as_bytes()).await
    }

    pub async fn leader(&self) -> Result<String, StoreError> {
        self.kv.leader().await
    }

    pub fn config_key(&self, name: &str) -> String {
        format!("{}{}", self.config_prefix, name)
    }

    /// Key holding the state record of `server_type`.
    pub fn server_key(&self, server_type: ServerType) -> String {
        format!("{}{}", self.servers_prefix, server_type)
    }
}

fn normalize_prefix(prefix: String) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix
    } else {
        format!("{}/", prefix)
    }
}

#[cfg(all(test, feature = "in-memory"))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that rejects every write after the first `allowed` ones.
    struct FailingAfter {
        inner: InMemoryKvStore,
        allowed: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for FailingAfter {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
            self.inner.list(prefix).await
        }

        async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.put(key, value).await
        }

        async fn leader(&self) -> Result<String, StoreError> {
            self.inner.leader().await
        }
    }

    fn config(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_config() {
        let store = ConfigStore::new(Arc::new(InMemoryKvStore::new()));
        assert!(store.get().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_then_get_strips_prefix() {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = ConfigStore::new(kv.clone());
        let wanted = config(&[("S3_BUCKET", "backups"), ("DEBUG", "true")]);

        store.set(&wanted).await.unwrap();

        assert_eq!(store.get().await.unwrap(), wanted);
        assert_eq!(
            kv.get("config/S3_BUCKET").await.unwrap(),
            Some(b"backups".to_vec())
        );
    }

    #[tokio::test]
    async fn test_get_ignores_other_namespaces_and_folders() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.put("config/", b"").await.unwrap();
        kv.put("config/A", b"1").await.unwrap();
        kv.put("servers/app", b"running").await.unwrap();
        let store = ConfigStore::new(kv);

        assert_eq!(store.get().await.unwrap(), config(&[("A", "1")]));
    }

    #[tokio::test]
    async fn test_get_skips_nested_and_invalid_names() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.put("config/A", b"1").await.unwrap();
        kv.put("config/a/b", b"nested").await.unwrap();
        kv.put("config/not-valid", b"2").await.unwrap();
        kv.put("config/_PRIVATE", b"3").await.unwrap();
        let store = ConfigStore::new(kv);

        assert_eq!(
            store.get().await.unwrap(),
            config(&[("A", "1"), ("_PRIVATE", "3")])
        );
    }

    #[test]
    fn test_config_key_validity() {
        assert!(is_valid_config_key("S3_BUCKET"));
        assert!(!is_valid_config_key(""));
        assert!(!is_valid_config_key("1ABC"));
        assert!(!is_valid_config_key("a/b"));
    }

    #[tokio::test]
    async fn test_partial_write_reports_written_keys() {
        let kv = Arc::new(FailingAfter {
            inner: InMemoryKvStore::new(),
            allowed: 1,
            writes: AtomicUsize::new(0),
        });
        let store = ConfigStore::new(kv);
        let wanted = config(&[("A", "1"), ("B", "2"), ("C", "3")]);

        match store.set(&wanted).await {
            Err(StoreError::PartialWrite {
                written, failed_key, ..
            }) => {
                assert_eq!(written, vec!["A".to_string()]);
                assert_eq!(failed_key, "B");
            }
            other => panic!("expected partial write, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_server_key_layout() {
        let store = ConfigStore::with_prefixes(Arc::new(InMemoryKvStore::new()), "cfg", "srv");
        assert_eq!(store.server_key(ServerType::Gpu), "srv/gpu");
        assert_eq!(store.config_key("S3_BUCKET"), "cfg/S3_BUCKET");
    }
}
