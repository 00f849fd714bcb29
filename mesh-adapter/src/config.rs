//! Adapter configuration and the key-value store operations are served from.
//!
//! [`AdapterConfig`] is the typed, YAML loadable configuration an adapter starts
//! with. At startup it seeds a [`ConfigStore`], which is what the running adapter
//! reads its identity and operation catalogue from.
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use mesh_adapter_client::ClientOptions;
use mesh_adapter_core::{Diagnose, Diagnosis, Operations};
use mesh_adapter_runtime::{EventBusConfig, RetryPolicy};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Store key of the [`ServerConfig`].
pub const SERVER_KEY: &str = "server";
/// Store key of the [`MeshSpec`].
pub const MESH_SPEC_KEY: &str = "mesh";
/// Store key of the [`Operations`] catalogue.
pub const OPERATIONS_KEY: &str = "operations";

/// Errors reading or writing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        /// The file.
        path: PathBuf,
        /// The read error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file was not valid YAML for [`AdapterConfig`].
    #[error("failed to parse adapter config: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// A value could not be stored.
    #[error("failed to encode value for key {key:?}: {source}")]
    Encode {
        /// The key.
        key: String,
        /// The encode error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored value did not decode into the requested type.
    #[error("failed to decode value of key {key:?}: {source}")]
    Decode {
        /// The key.
        key: String,
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Nothing is stored under the key.
    #[error("no value stored for key {0:?}")]
    Missing(String),
}

impl Diagnose for ConfigError {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Read { .. } | Self::Parse(_) => Diagnosis::new(
                "1025",
                "the adapter configuration file is missing or malformed",
                "check the path and YAML syntax of the adapter configuration",
            ),
            Self::Encode { .. } | Self::Decode { .. } | Self::Missing(_) => Diagnosis::new(
                "1026",
                "the adapter was started without a complete configuration",
                "make sure the server, mesh and operations sections are configured",
            ),
        }
    }
}

/// How the adapter identifies itself to the orchestration plane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Adapter name, e.g. `sample-adapter`.
    pub name: String,
    /// Component type reported with events.
    #[serde(rename = "type")]
    pub kind: String,
    /// Port the adapter serves on.
    pub port: u16,
    /// Adapter version.
    pub version: String,
    /// Where traces are exported, `none` to disable.
    pub trace_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "sample-adapter".into(),
            kind: "adapter".into(),
            port: 10000,
            version: "v0.1.0".into(),
            trace_url: "none".into(),
        }
    }
}

/// The mesh an adapter manages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSpec {
    /// Mesh name.
    pub name: String,
    /// Installation status.
    pub status: String,
    /// Mesh version the adapter installs by default.
    pub version: String,
}

impl Default for MeshSpec {
    fn default() -> Self {
        Self {
            name: "Sample".into(),
            status: "NotInstalled".into(),
            version: String::new(),
        }
    }
}

/// Everything an [`Adapter`](crate::Adapter) is configured with.
///
/// ```rust
/// use mesh_adapter::AdapterConfig;
///
/// let config = AdapterConfig::from_yaml(
///     r#"
/// server: { name: istio-adapter, port: 10000 }
/// client: { qps: 20, burst: 40 }
/// "#,
/// )
/// .unwrap();
/// assert_eq!(config.server.name, "istio-adapter");
/// assert_eq!(config.client.burst, 40);
/// assert_eq!(config.events.capacity, 10);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Identity of the adapter.
    pub server: ServerConfig,
    /// The managed mesh.
    pub mesh: MeshSpec,
    /// Cluster client tuning.
    pub client: ClientOptions,
    /// Event bus sizing.
    pub events: EventBusConfig,
    /// Capability registration retries.
    pub registration: RetryPolicy,
    /// Directory template paths of operations are relative to; the working directory when unset.
    pub template_dir: Option<PathBuf>,
    /// The operation catalogue.
    pub operations: Operations,
}

impl AdapterConfig {
    /// Parse a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(ConfigError::Parse)
    }

    /// Read and parse the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }
}

/// A string key-value store holding an adapter's runtime configuration.
///
/// Structured values are stored JSON encoded, see [`ConfigStoreExt`].
pub trait ConfigStore: Send + Sync {
    /// The raw value of `key`.
    fn get_key(&self, key: &str) -> Option<String>;

    /// Replace the raw value of `key`.
    fn set_key(&self, key: &str, value: String);
}

/// Typed access on top of any [`ConfigStore`].
pub trait ConfigStoreExt: ConfigStore {
    /// Decode the value of `key`.
    fn get_object<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let raw = self.get_key(key).ok_or_else(|| ConfigError::Missing(key.to_owned()))?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Decode {
            key: key.to_owned(),
            source,
        })
    }

    /// Encode `value` and store it under `key`.
    fn set_object<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let raw = serde_json::to_string(value).map_err(|source| ConfigError::Encode {
            key: key.to_owned(),
            source,
        })?;
        self.set_key(key, raw);
        Ok(())
    }
}

impl<S: ConfigStore + ?Sized> ConfigStoreExt for S {}

/// A [`ConfigStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    store: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with the server config, mesh spec and operations of `config`.
    pub fn seeded(config: &AdapterConfig) -> Result<Self, ConfigError> {
        let store = Self::new();
        store.set_object(SERVER_KEY, &config.server)?;
        store.set_object(MESH_SPEC_KEY, &config.mesh)?;
        store.set_object(OPERATIONS_KEY, &config.operations)?;
        Ok(store)
    }

    /// A copy of every stored entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.store
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl ConfigStore for InMemoryStore {
    fn get_key(&self, key: &str) -> Option<String> {
        self.store.read().get(key).cloned()
    }

    fn set_key(&self, key: &str, value: String) {
        self.store.write().insert(key.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_adapter_core::{Operation, OperationCategory};
    use std::time::Duration;

    #[test]
    fn defaults_fill_missing_sections() {
        let config = AdapterConfig::from_yaml("mesh: { name: Linkerd, version: 2.14.1 }").unwrap();
        assert_eq!(config.mesh.name, "Linkerd");
        assert_eq!(config.mesh.status, "NotInstalled");
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.client, ClientOptions::default());
        assert_eq!(config.registration.max_elapsed, Duration::from_secs(600));
        assert!(config.operations.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let config = AdapterConfig::from_yaml(
            r#"
server:
  name: istio-adapter
  type: adapter
  port: 10010
  version: v0.2.0
client:
  qps: 10
  burst: 20
  kubeconfig_path: /tmp/kubeconfig
events:
  capacity: 5
  queue_capacity: 50
registration:
  initial_delay: 100
  max_elapsed: 2000
template_dir: /opt/adapter
operations:
  istio_install:
    type: install
    description: Istio service mesh
    versions: ["1.19.1"]
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 10010);
        assert_eq!(config.client.kubeconfig_path.as_deref(), Some(Path::new("/tmp/kubeconfig")));
        assert_eq!(config.events.queue_capacity, 50);
        assert_eq!(config.registration.initial_delay, Duration::from_millis(100));
        assert_eq!(config.registration.max_elapsed, Duration::from_secs(2));
        assert_eq!(config.operations["istio_install"].versions, ["1.19.1"]);
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = AdapterConfig::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert_eq!(err.diagnosis().code, "1025");
    }

    #[test]
    fn seeded_store_serves_typed_sections() {
        let mut config = AdapterConfig::default();
        config.operations.insert(
            "custom".into(),
            Operation {
                category: OperationCategory::Custom,
                description: "Custom YAML".into(),
                ..Default::default()
            },
        );
        let store = InMemoryStore::seeded(&config).unwrap();

        let server: ServerConfig = store.get_object(SERVER_KEY).unwrap();
        assert_eq!(server.name, "sample-adapter");
        let ops: Operations = store.get_object(OPERATIONS_KEY).unwrap();
        assert!(ops["custom"].is_custom());
        assert_eq!(store.snapshot().len(), 3);
    }

    #[test]
    fn missing_and_mistyped_values_are_errors() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_object::<MeshSpec>(MESH_SPEC_KEY),
            Err(ConfigError::Missing(key)) if key == MESH_SPEC_KEY
        ));

        store.set_key(MESH_SPEC_KEY, "[1, 2]".into());
        assert!(matches!(
            store.get_object::<MeshSpec>(MESH_SPEC_KEY),
            Err(ConfigError::Decode { .. })
        ));
    }
}
