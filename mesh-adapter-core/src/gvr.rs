//! Deriving the resource address of a manifest without discovery.
//!
//! Adapters apply kinds that may be unknown at compile time (and sometimes unknown to
//! the cluster until a CRD lands), so the plural is computed locally instead of asking
//! the apiserver.
use kube_core::{discovery::ApiResource, GroupVersionKind};

/// Plural resource name for a `kind`.
///
/// The kind is lower-cased and suffixed with `s`, except for the known irregular
/// kinds shipped by the meshes we install.
///
/// ```rust
/// use mesh_adapter_core::gvr::pluralize;
///
/// assert_eq!(pluralize("ConfigMap"), "configmaps");
/// assert_eq!(pluralize("LogEntry"), "logentries");
/// ```
pub fn pluralize(kind: &str) -> String {
    let kind = kind.to_lowercase();
    match kind.as_str() {
        "logentry" => "logentries".into(),
        "kubernetes" => "kuberneteses".into(),
        _ => kind + "s",
    }
}

/// Split an `apiVersion` into `(group, version)`.
///
/// The group is empty for the core group (`v1`).
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Compute the [`ApiResource`] used to address documents of `api_version` and `kind`.
pub fn api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = split_api_version(api_version);
    let gvk = GroupVersionKind::gvk(group, version, kind);
    ApiResource::from_gvk_with_plural(&gvk, &pluralize(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralization_table() {
        for (kind, plural) in [
            ("LogEntry", "logentries"),
            ("Kubernetes", "kuberneteses"),
            ("Deployment", "deployments"),
            ("ConfigMap", "configmaps"),
            ("Namespace", "namespaces"),
        ] {
            assert_eq!(pluralize(kind), plural, "plural of {kind}");
        }
    }

    #[test]
    fn core_group_is_empty() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(
            split_api_version("networking.istio.io/v1beta1"),
            ("networking.istio.io", "v1beta1")
        );
    }

    #[test]
    fn api_resource_from_manifest_types() {
        let ar = api_resource("config.istio.io/v1alpha2", "LogEntry");
        assert_eq!(ar.group, "config.istio.io");
        assert_eq!(ar.version, "v1alpha2");
        assert_eq!(ar.api_version, "config.istio.io/v1alpha2");
        assert_eq!(ar.kind, "LogEntry");
        assert_eq!(ar.plural, "logentries");

        let svc = api_resource("v1", "Service");
        assert_eq!(svc.group, "");
        assert_eq!(svc.api_version, "v1");
        assert_eq!(svc.plural, "services");
    }
}
