use std::{fs, path::PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use kube::config::{AuthInfo, Kubeconfig, KubeconfigError};
use secrecy::SecretString;
use thiserror::Error;

/// Environment variable the kubelet sets inside every pod.
pub const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Errors from [`validate`](super::validate).
#[derive(Error, Debug)]
pub enum CredentialsError {
    /// The bytes were not a kubeconfig.
    #[error("failed to parse kubeconfig: {0}")]
    Parse(#[source] KubeconfigError),

    /// Every user entry was filtered out.
    #[error("no usable auth info found in kubeconfig")]
    NoUsableAuthInfo,

    /// A referenced certificate or key file could not be inlined.
    #[error("failed to inline {path:?}: {source}")]
    Inline {
        /// The file that was referenced.
        path: PathBuf,
        /// The read error.
        #[source]
        source: std::io::Error,
    },
}

/// Credentials that passed validation.
///
/// Either a kubeconfig with at least one usable user, or the in-cluster marker.
#[derive(Clone, Debug)]
pub struct ValidatedCredentials {
    raw: Vec<u8>,
    /// Every usable entry, file references inlined.
    flattened: Option<Kubeconfig>,
    /// `flattened` reduced to its current context.
    kubeconfig: Option<Kubeconfig>,
}

impl ValidatedCredentials {
    /// Credentials for the service account of the pod we run in.
    pub fn in_cluster() -> Self {
        Self {
            raw: Vec::new(),
            flattened: None,
            kubeconfig: None,
        }
    }

    /// Whether these credentials resolve to the in-cluster environment.
    pub fn is_in_cluster(&self) -> bool {
        self.kubeconfig.is_none()
    }

    /// The bytes that were validated.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The normalized kubeconfig: usable users only, file references inlined, and
    /// reduced to the current context.
    ///
    /// A kubeconfig without a current context keeps all of its entries.
    pub fn kubeconfig(&self) -> Option<&Kubeconfig> {
        self.kubeconfig.as_ref()
    }

    /// The normalized kubeconfig with `context` made current.
    ///
    /// An empty `context` keeps the current one.
    pub fn for_context(&self, context: &str) -> Option<Kubeconfig> {
        if context.is_empty() {
            return self.kubeconfig.clone();
        }
        self.flattened.clone().map(|mut kubeconfig| {
            kubeconfig.current_context = Some(context.to_owned());
            minify(kubeconfig)
        })
    }
}

/// Validate credentials using the process environment to detect a pod.
pub fn validate(raw: &[u8]) -> Result<ValidatedCredentials, CredentialsError> {
    let in_cluster = std::env::var_os(SERVICE_HOST_ENV).is_some_and(|host| !host.is_empty());
    validate_with(raw, in_cluster)
}

/// Validate credentials with an explicit in-cluster flag.
pub fn validate_with(raw: &[u8], in_cluster: bool) -> Result<ValidatedCredentials, CredentialsError> {
    if raw.is_empty() && in_cluster {
        tracing::debug!("empty kubeconfig inside a cluster, using service account");
        return Ok(ValidatedCredentials::in_cluster());
    }

    let text = String::from_utf8_lossy(raw);
    let mut kubeconfig = Kubeconfig::from_yaml(&text).map_err(CredentialsError::Parse)?;

    let before = kubeconfig.auth_infos.len();
    kubeconfig
        .auth_infos
        .retain(|named| named.auth_info.as_ref().is_some_and(is_usable));
    if kubeconfig.auth_infos.is_empty() {
        return Err(CredentialsError::NoUsableAuthInfo);
    }
    tracing::debug!(
        kept = kubeconfig.auth_infos.len(),
        dropped = before - kubeconfig.auth_infos.len(),
        "filtered kubeconfig users"
    );

    flatten(&mut kubeconfig)?;
    let minified = minify(kubeconfig.clone());
    Ok(ValidatedCredentials {
        raw: raw.to_vec(),
        flattened: Some(kubeconfig),
        kubeconfig: Some(minified),
    })
}

/// A user can authenticate when it carries inline material, delegates to a plugin,
/// or points at a file we can open.
fn is_usable(auth: &AuthInfo) -> bool {
    auth.client_certificate_data.is_some()
        || auth.token.is_some()
        || auth.auth_provider.is_some()
        || auth.exec.is_some()
        || readable(auth.client_certificate.as_deref())
        || readable(auth.token_file.as_deref())
}

fn readable(path: Option<&str>) -> bool {
    path.is_some_and(|path| fs::File::open(path).is_ok())
}

/// Inline certificate, key and CA files as base64 data fields.
pub(crate) fn flatten(kubeconfig: &mut Kubeconfig) -> Result<(), CredentialsError> {
    for cluster in kubeconfig.clusters.iter_mut().filter_map(|named| named.cluster.as_mut()) {
        if let Some(path) = cluster.certificate_authority.take() {
            if cluster.certificate_authority_data.is_none() {
                cluster.certificate_authority_data = Some(read_base64(path)?);
            }
        }
    }
    for auth in kubeconfig
        .auth_infos
        .iter_mut()
        .filter_map(|named| named.auth_info.as_mut())
    {
        if let Some(path) = auth.client_certificate.take() {
            if auth.client_certificate_data.is_none() {
                auth.client_certificate_data = Some(read_base64(path)?);
            }
        }
        if let Some(path) = auth.client_key.take() {
            if auth.client_key_data.is_none() {
                auth.client_key_data = Some(SecretString::from(read_base64(path)?));
            }
        }
    }
    Ok(())
}

fn read_base64(path: String) -> Result<String, CredentialsError> {
    let path = PathBuf::from(path);
    match fs::read(&path) {
        Ok(bytes) => Ok(STANDARD.encode(bytes)),
        Err(source) => Err(CredentialsError::Inline { path, source }),
    }
}

/// Keep only the current context, its cluster and its user.
pub(crate) fn minify(mut kubeconfig: Kubeconfig) -> Kubeconfig {
    let Some(current) = kubeconfig.current_context.clone() else {
        return kubeconfig;
    };
    kubeconfig.contexts.retain(|named| named.name == current);
    let Some(context) = kubeconfig.contexts.first().and_then(|named| named.context.as_ref()) else {
        return kubeconfig;
    };
    let cluster = context.cluster.name_ref().map(str::to_owned);
    let user = context.user.name_ref().map(str::to_owned);
    kubeconfig
        .clusters
        .retain(|named| cluster.as_deref() == Some(named.name.as_str()));
    kubeconfig
        .auth_infos
        .retain(|named| user.as_deref() == Some(named.name.as_str()));
    kubeconfig
}

/// Reads a context reference whether kube models it as required or optional.
trait ContextRef {
    fn name_ref(&self) -> Option<&str>;
}

impl ContextRef for String {
    fn name_ref(&self) -> Option<&str> {
        Some(self.as_str()).filter(|name| !name.is_empty())
    }
}

impl ContextRef for Option<String> {
    fn name_ref(&self) -> Option<&str> {
        self.as_ref().and_then(|name| name.name_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_CONTEXTS: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: kind
  cluster:
    server: https://127.0.0.1:6443
- name: prod
  cluster:
    server: https://10.0.0.1:6443
contexts:
- name: kind
  context:
    cluster: kind
    user: admin
- name: prod
  context:
    cluster: prod
    user: deployer
    namespace: mesh
current-context: kind
users:
- name: admin
  user:
    token: abc123
- name: deployer
  user:
    auth-provider:
      name: gcp
      config: {}
- name: ghost
  user:
    client-certificate: /nonexistent/mesh-adapter/cert.pem
    tokenFile: /nonexistent/mesh-adapter/token
"#;

    #[test]
    fn drops_users_without_readable_material() {
        let creds = validate_with(TWO_CONTEXTS.as_bytes(), false).unwrap();
        let prod = creds.for_context("prod").unwrap();
        let names: Vec<_> = prod.auth_infos.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["deployer"]);
        assert!(!creds.is_in_cluster());
        assert_eq!(creds.raw(), TWO_CONTEXTS.as_bytes());
    }

    #[test]
    fn only_missing_files_is_rejected() {
        let raw = r#"
apiVersion: v1
kind: Config
clusters: []
contexts: []
users:
- name: ghost
  user:
    client-certificate: /nonexistent/mesh-adapter/cert.pem
    tokenFile: /nonexistent/mesh-adapter/token
"#;
        let err = validate_with(raw.as_bytes(), false).unwrap_err();
        assert!(matches!(err, CredentialsError::NoUsableAuthInfo), "{err:?}");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = validate_with(b"users: [not, a, kubeconfig", false).unwrap_err();
        assert!(matches!(err, CredentialsError::Parse(_)), "{err:?}");
    }

    #[test]
    fn empty_bytes_depend_on_environment() {
        assert!(validate_with(b"", true).unwrap().is_in_cluster());
        assert!(matches!(
            validate_with(b"", false),
            Err(CredentialsError::NoUsableAuthInfo)
        ));
    }

    #[test]
    fn readable_files_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.crt");
        let key = dir.path().join("client.key");
        fs::File::create(&cert).unwrap().write_all(b"CERT").unwrap();
        fs::File::create(&key).unwrap().write_all(b"KEY").unwrap();
        let raw = format!(
            r#"
apiVersion: v1
kind: Config
clusters: []
contexts: []
users:
- name: files
  user:
    client-certificate: {}
    client-key: {}
"#,
            cert.display(),
            key.display()
        );

        let creds = validate_with(raw.as_bytes(), false).unwrap();
        let user = creds.kubeconfig().unwrap().auth_infos[0].auth_info.clone().unwrap();
        assert_eq!(user.client_certificate, None);
        assert_eq!(user.client_certificate_data.as_deref(), Some(STANDARD.encode("CERT").as_str()));
        assert_eq!(user.client_key, None);
        assert!(user.client_key_data.is_some());
    }

    #[test]
    fn validated_kubeconfig_keeps_current_context_only() {
        let creds = validate_with(TWO_CONTEXTS.as_bytes(), false).unwrap();
        let min = creds.kubeconfig().unwrap();
        assert_eq!(min.contexts.len(), 1);
        assert_eq!(min.contexts[0].name, "kind");
        assert_eq!(min.clusters.len(), 1);
        assert_eq!(min.clusters[0].name, "kind");
        assert_eq!(min.auth_infos.len(), 1);
        assert_eq!(min.auth_infos[0].name, "admin");
        assert_eq!(creds.for_context("").unwrap().contexts[0].name, "kind");
    }

    #[test]
    fn without_current_context_nothing_is_dropped() {
        let raw = TWO_CONTEXTS.replace("current-context: kind\n", "");
        let creds = validate_with(raw.as_bytes(), false).unwrap();
        let kubeconfig = creds.kubeconfig().unwrap();
        assert_eq!(kubeconfig.contexts.len(), 2);
        let names: Vec<_> = kubeconfig.auth_infos.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["admin", "deployer"]);
    }
}
