//! Announcing the adapter's component definitions to the orchestration plane.
use std::path::Path;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use mesh_adapter_core::HostMetadata;
use mesh_adapter_runtime::{definition_paths, Registrant, RetryPolicy, VersionRegistry};
use tower::{BoxError, Service};
use tracing::info;

use crate::{config::ServerConfig, Error};

/// Path of the component registration endpoint below the runtime's base url.
pub const REGISTER_PATH: &str = "/api/meshmodel/components/register";

/// The registration endpoint of the runtime at `runtime_url`.
///
/// ```rust
/// use mesh_adapter::registration::registry_url;
///
/// assert_eq!(
///     registry_url("http://meshery:9081/"),
///     "http://meshery:9081/api/meshmodel/components/register"
/// );
/// ```
pub fn registry_url(runtime_url: &str) -> String {
    format!("{}{REGISTER_PATH}", runtime_url.trim_end_matches('/'))
}

/// Host metadata advertising this process as `<hostname>:<port>`.
///
/// Falls back to the adapter name when the hostname cannot be determined.
pub fn host_metadata(server: &ServerConfig) -> HostMetadata {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| server.name.clone());
    HostMetadata {
        host: format!("{host}:{}", server.port),
        ..HostMetadata::default()
    }
}

/// Register every definition below `dir` with the runtime at `runtime_url`.
///
/// The version directories found are recorded in `versions`.
pub async fn register_components(
    dir: &Path,
    runtime_url: &str,
    host: HostMetadata,
    policy: RetryPolicy,
    versions: &VersionRegistry,
) -> Result<(), Error> {
    let registrant = Registrant::new(&registry_url(runtime_url), host)?.retry_policy(policy);
    register_components_with(&registrant, dir, versions).await
}

/// Like [`register_components`] but through an already configured `registrant`.
pub async fn register_components_with<S, B>(
    registrant: &Registrant<S>,
    dir: &Path,
    versions: &VersionRegistry,
) -> Result<(), Error>
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone,
    S::Error: Into<BoxError>,
    B: http_body::Body,
{
    let paths = definition_paths(dir, versions)?;
    registrant.register(&paths).await?;
    info!(
        count = paths.len(),
        versions = ?versions.versions(),
        registry = %registrant.registry_url(),
        "registered component definitions"
    );
    Ok(())
}
