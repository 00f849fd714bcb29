//! Turning uploaded credentials into a tuned client.
//!
//! Bootstrapping is split in two steps so a bad upload can be rejected before any
//! network activity happens:
//!
//! 1. [`validate`] parses the kubeconfig, drops users that cannot authenticate,
//!    inlines referenced files, keeps only the current context and detects the
//!    in-cluster case.
//! 2. [`build`] resolves a [`Config`] for the requested context, optionally persists
//!    the normalized kubeconfig, and wraps the transport in a rate limit.
//!
//! A [`ClientHandle`] is only handed out once every step has succeeded.
use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use kube::{
    config::{InClusterError, KubeConfigOptions, Kubeconfig, KubeconfigError},
    Client, Config,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower::limit::RateLimitLayer;

mod credentials;
pub use credentials::{validate, validate_with, CredentialsError, ValidatedCredentials, SERVICE_HOST_ENV};

/// Requests per second allowed by default.
pub const DEFAULT_QPS: f32 = 50.0;
/// Requests allowed in one window by default.
pub const DEFAULT_BURST: u32 = 100;

/// Errors from [`build`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The kubeconfig could not be resolved for the requested context.
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[source] KubeconfigError),

    /// The in-cluster environment was incomplete.
    #[error("failed to load in-cluster config: {0}")]
    InCluster(#[source] InClusterError),

    /// The normalized kubeconfig could not be serialized.
    #[error("failed to serialize kubeconfig: {0}")]
    Serialize(#[source] serde_yaml::Error),

    /// The normalized kubeconfig could not be written.
    #[error("failed to write kubeconfig to {path:?}: {source}")]
    Persist {
        /// Destination of the write.
        path: PathBuf,
        /// The write error.
        #[source]
        source: std::io::Error,
    },

    /// The transport could not be constructed.
    #[error("failed to build client: {0}")]
    Build(#[source] kube::Error),
}

/// Tuning applied when building a [`ClientHandle`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Sustained requests per second.
    pub qps: f32,
    /// Requests allowed in one window.
    pub burst: u32,
    /// Where to persist the normalized kubeconfig, if anywhere.
    pub kubeconfig_path: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            qps: DEFAULT_QPS,
            burst: DEFAULT_BURST,
            kubeconfig_path: None,
        }
    }
}

impl ClientOptions {
    /// The kubeconfig path under the user's home directory, `~/.kube/config`.
    pub fn default_kubeconfig_path() -> Option<PathBuf> {
        home::home_dir().map(|home| home.join(".kube").join("config"))
    }

    /// Persist the normalized kubeconfig to `path`.
    #[must_use]
    pub fn kubeconfig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig_path = Some(path.into());
        self
    }

    /// The `(requests, window)` pair enforced on the transport.
    ///
    /// Nonsensical values fall back to the defaults.
    pub fn rate(&self) -> (u64, Duration) {
        let burst = if self.burst == 0 { DEFAULT_BURST } else { self.burst };
        let qps = if self.qps.is_finite() && self.qps > 0.0 {
            self.qps
        } else {
            DEFAULT_QPS
        };
        (u64::from(burst), Duration::from_secs_f64(f64::from(burst) / f64::from(qps)))
    }
}

/// A rate limited client plus the configuration it was built from.
///
/// Cloning is cheap and clones share the underlying buffered transport.
#[derive(Clone)]
pub struct ClientHandle {
    client: Client,
    config: Arc<Config>,
}

impl ClientHandle {
    /// Build a rate limited client for `config`.
    pub fn connect(config: Config, options: &ClientOptions) -> Result<Self, ClientError> {
        let (num, per) = options.rate();
        let client = kube::client::ClientBuilder::try_from(config.clone())
            .map_err(ClientError::Build)?
            .with_layer(&RateLimitLayer::new(num, per))
            .build();
        tracing::debug!(cluster = %config.cluster_url, num, ?per, "built rate limited client");
        Ok(Self::from_parts(client, config))
    }

    /// Pair an already constructed client with its configuration.
    pub fn from_parts(client: Client, config: Config) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// The client, for typed access through [`kube::Api`].
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The configuration the client was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("cluster_url", &self.config.cluster_url)
            .field("default_namespace", &self.config.default_namespace)
            .finish_non_exhaustive()
    }
}

/// Build a [`ClientHandle`] for `credentials`.
///
/// A non-empty `context` overrides the kubeconfig's current context.
pub async fn build(
    credentials: &ValidatedCredentials,
    context: &str,
    options: &ClientOptions,
) -> Result<ClientHandle, ClientError> {
    let config = resolve_config(credentials, context, options).await?;
    ClientHandle::connect(config, options)
}

/// Resolve the [`Config`] [`build`] would use, persisting the normalized kubeconfig
/// when [`ClientOptions::kubeconfig_path`] is set.
pub async fn resolve_config(
    credentials: &ValidatedCredentials,
    context: &str,
    options: &ClientOptions,
) -> Result<Config, ClientError> {
    let Some(normalized) = credentials.for_context(context) else {
        return Config::incluster().map_err(ClientError::InCluster);
    };

    let mut kubeconfig =
        Kubeconfig::from_yaml(&String::from_utf8_lossy(credentials.raw())).map_err(ClientError::Kubeconfig)?;
    if !context.is_empty() {
        kubeconfig.current_context = Some(context.to_owned());
    }

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(ClientError::Kubeconfig)?;

    if let Some(path) = &options.kubeconfig_path {
        persist_kubeconfig(&normalized, path)?;
    }
    Ok(config)
}

/// Write `kubeconfig` to `path`, readable by the owner only.
pub fn persist_kubeconfig(kubeconfig: &Kubeconfig, path: &Path) -> Result<(), ClientError> {
    let yaml = serde_yaml::to_string(kubeconfig).map_err(ClientError::Serialize)?;
    let persist_err = |source: std::io::Error| ClientError::Persist {
        path: path.to_owned(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(persist_err)?;
    }

    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut opts, 0o600);
    let mut file = opts.open(path).map_err(persist_err)?;
    // the mode above only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(persist_err)?;
    }
    file.write_all(yaml.as_bytes()).map_err(persist_err)?;
    tracing::info!(?path, "persisted kubeconfig");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: kind
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: kind
  context:
    cluster: kind
    user: admin
- name: staging
  context:
    cluster: kind
    user: admin
    namespace: mesh
current-context: kind
users:
- name: admin
  user:
    token: abc123
"#;

    #[test]
    fn rate_defaults_to_fifty_qps_burst_hundred() {
        let opts = ClientOptions::default();
        assert_eq!(opts.rate(), (100, Duration::from_secs(2)));

        let broken = ClientOptions {
            qps: 0.0,
            burst: 0,
            kubeconfig_path: None,
        };
        assert_eq!(broken.rate(), opts.rate());
    }

    #[tokio::test]
    async fn context_override_selects_namespace() {
        let creds = validate_with(KUBECONFIG.as_bytes(), false).unwrap();

        let config = resolve_config(&creds, "", &ClientOptions::default()).await.unwrap();
        assert_eq!(config.default_namespace, "default");

        let config = resolve_config(&creds, "staging", &ClientOptions::default())
            .await
            .unwrap();
        assert_eq!(config.default_namespace, "mesh");
        assert_eq!(config.cluster_url.host(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn unknown_context_fails() {
        let creds = validate_with(KUBECONFIG.as_bytes(), false).unwrap();
        let err = resolve_config(&creds, "missing", &ClientOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Kubeconfig(_)), "{err:?}");
    }

    #[tokio::test]
    async fn normalized_kubeconfig_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config");
        let creds = validate_with(KUBECONFIG.as_bytes(), false).unwrap();
        let opts = ClientOptions::default().kubeconfig_path(&path);

        resolve_config(&creds, "staging", &opts).await.unwrap();

        let written = Kubeconfig::from_yaml(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.current_context.as_deref(), Some("staging"));
        let contexts: Vec<_> = written.contexts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(contexts, ["staging"]);
        assert_eq!(written.clusters.len(), 1);
        assert_eq!(written.auth_infos.len(), 1);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn existing_kubeconfig_is_made_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "stale").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let creds = validate_with(KUBECONFIG.as_bytes(), false).unwrap();
        persist_kubeconfig(creds.kubeconfig().unwrap(), &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(fs::read_to_string(&path).unwrap().contains("abc123"));
    }
}
