//! Applying rendered manifest bundles through the untyped resource API.
//!
//! Every document of a bundle is addressed by an [`ApiResource`] computed from its
//! `apiVersion` and `kind` (see [`mesh_adapter_core::gvr`]), so bundles may contain
//! kinds this crate knows nothing about. Calls are first made namespace scoped and
//! retried once cluster scoped, which lets a single bundle mix both kinds of resources.
//!
//! Re-applying a bundle is safe: `AlreadyExists` on create and `NotFound` on delete are
//! absorbed per document and the remaining documents are still applied.
use std::{collections::BTreeMap, future::Future, path::Path, time::Duration};

use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ObjectMeta, PostParams},
    core::ApiResource,
    Client, ResourceExt,
};
use mesh_adapter_core::gvr;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::{bootstrap::ClientHandle, template};

mod documents;
pub use documents::Documents;

/// Pause between deleting and recreating a resource of a custom operation.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_NAMESPACE: &str = "default";

/// Errors from applying a single document.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// A document was not valid YAML.
    #[error("failed to decode yaml document: {0}")]
    Yaml(#[source] serde_yaml::Error),

    /// A document could not be represented as a resource.
    #[error("failed to convert document: {0}")]
    Json(#[source] serde_json::Error),

    /// A document had no `apiVersion` or `kind`.
    #[error("document is missing apiVersion or kind")]
    MissingTypeMeta,

    /// The apiserver rejected a call.
    #[error("unable to {verb} {kind} {name:?}: {source}")]
    Api {
        /// The verb that failed.
        verb: &'static str,
        /// Kind of the resource.
        kind: String,
        /// Name of the resource.
        name: String,
        /// The client error.
        #[source]
        source: kube::Error,
    },

    /// A live object did not have the expected shape.
    #[error("{kind} {name:?} has no object at .spec")]
    MissingSpec {
        /// Kind of the resource.
        kind: String,
        /// Name of the resource.
        name: String,
    },
}

impl ApplyError {
    /// The API error behind this failure, if any.
    pub fn api_error(&self) -> Option<&kube::core::ErrorResponse> {
        match self {
            Self::Api {
                source: kube::Error::Api(resp),
                ..
            } => Some(resp),
            _ => None,
        }
    }

    /// Whether this failure leaves the cluster in the requested state anyway.
    ///
    /// Deleting something that is not there, or creating something that already is.
    pub fn is_absorbable(&self, is_delete: bool) -> bool {
        let Some(resp) = self.api_error() else {
            return false;
        };
        let message = resp.message.trim_end();
        if is_delete {
            resp.reason == "NotFound"
                || message.ends_with("not found")
                || message.ends_with("the server could not find the requested resource")
        } else {
            resp.reason == "AlreadyExists" || message.ends_with("already exists")
        }
    }
}

fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "AlreadyExists" || resp.code == 409)
}

/// How a bundle is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyParams {
    /// Namespace forced onto every document, `None` keeps the documents' own.
    pub namespace: Option<String>,
    /// Delete the documents instead of creating them.
    pub is_delete: bool,
    /// Replace documents that cannot be created.
    pub is_custom: bool,
}

impl ApplyParams {
    /// Create every document.
    pub fn create() -> Self {
        Self::default()
    }

    /// Delete every document.
    pub fn delete() -> Self {
        Self {
            is_delete: true,
            ..Self::default()
        }
    }

    /// Force documents into `namespace`; an empty string is ignored.
    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_owned()).filter(|ns| !ns.is_empty());
        self
    }

    /// Mark as a custom operation, see [`ApplyParams::is_custom`].
    #[must_use]
    pub fn custom(mut self, is_custom: bool) -> Self {
        self.is_custom = is_custom;
        self
    }
}

/// Applies manifest bundles to a cluster.
#[derive(Clone)]
pub struct Reconciler {
    client: Client,
    settle_delay: Duration,
}

impl Reconciler {
    /// Apply through the client of `handle`.
    pub fn new(handle: &ClientHandle) -> Self {
        Self::from_client(handle.client().clone())
    }

    /// Apply through `client`.
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Override the pause between replacing a resource's delete and create.
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Render the template at `template_path` with `data` and apply the result.
    pub async fn apply(
        &self,
        template_path: &Path,
        data: &BTreeMap<String, String>,
        params: &ApplyParams,
    ) -> crate::Result<()> {
        let rendered = template::render(template_path, data)?;
        self.apply_manifest(&rendered, params).await
    }

    /// Apply every document of an already rendered bundle, in order.
    ///
    /// Stops at the first failure that [`ApplyError::is_absorbable`] rejects.
    pub async fn apply_manifest(&self, yaml: &str, params: &ApplyParams) -> crate::Result<()> {
        // The YAML deserializer is not `Send`, so split the bundle before awaiting.
        // Parsing stops at the first error, which the loop below returns after
        // applying the preceding documents.
        let mut documents = Vec::new();
        for document in Documents::new(yaml) {
            let failed = document.is_err();
            documents.push(document);
            if failed {
                break;
            }
        }
        for document in documents {
            match self.execute(document?, params).await {
                Ok(()) => {}
                Err(err) if err.is_absorbable(params.is_delete) => {
                    debug!(error = %err, "ignoring idempotent failure");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn execute(&self, mut obj: DynamicObject, params: &ApplyParams) -> Result<(), ApplyError> {
        if let Some(ns) = &params.namespace {
            obj.metadata.namespace = Some(ns.clone());
        }
        let types = obj.types.as_ref().ok_or(ApplyError::MissingTypeMeta)?;
        let ar = gvr::api_resource(&types.api_version, &types.kind);
        trace!(
            group = %ar.group,
            version = %ar.version,
            plural = %ar.plural,
            name = %obj.name_any(),
            namespace = ?obj.metadata.namespace,
            "applying document"
        );

        if params.is_delete {
            return self.delete(&ar, &obj).await;
        }
        let Err(err) = self.create(&ar, &obj).await else {
            return Ok(());
        };
        if !params.is_custom {
            return Err(err);
        }

        warn!(error = %err, kind = %ar.kind, name = %obj.name_any(), "replacing resource of custom operation");
        match self.delete(&ar, &obj).await {
            Err(del) if !del.is_absorbable(true) => return Err(del),
            _ => {}
        }
        tokio::time::sleep(self.settle_delay).await;
        self.create(&ar, &obj).await
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<(), ApplyError> {
        let pp = PostParams::default();
        self.scoped(ar, obj.metadata.namespace.as_deref(), is_retryable_create, |api| {
            let pp = &pp;
            async move { api.create(pp, obj).await }
        })
        .await
        .map_err(|source| api_error("create", ar, obj.name_any(), source))?;
        info!(kind = %ar.kind, name = %obj.name_any(), "created resource");
        Ok(())
    }

    async fn delete(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<(), ApplyError> {
        let name = obj.name_any();
        if ar.plural == "namespaces" && name == DEFAULT_NAMESPACE {
            debug!("refusing to delete the default namespace");
            return Ok(());
        }
        let namespace = obj.metadata.namespace.as_deref();
        if ar.plural == "deployments" {
            self.scale_to_zero(ar, namespace, &name).await?;
        }

        let dp = DeleteParams::default();
        self.scoped(ar, namespace, |_| true, |api| {
            let (name, dp) = (&name, &dp);
            async move { api.delete(name, dp).await }
        })
        .await
        .map_err(|source| api_error("delete", ar, name.clone(), source))?;
        info!(kind = %ar.kind, %name, "deleted resource");
        Ok(())
    }

    /// Stop a deployment's pods before deleting it so they do not linger behind
    /// the garbage collector.
    async fn scale_to_zero(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<(), ApplyError> {
        let mut live = self
            .scoped(ar, namespace, |_| true, |api| async move { api.get(name).await })
            .await
            .map_err(|source| api_error("get", ar, name.to_owned(), source))?;

        let Some(spec) = live.data.get_mut("spec").and_then(Value::as_object_mut) else {
            return Err(ApplyError::MissingSpec {
                kind: ar.kind.clone(),
                name: name.to_owned(),
            });
        };
        spec.insert("replicas".into(), 0.into());

        let pp = PostParams::default();
        let live_ns = live.metadata.namespace.clone();
        let live = &live;
        self.scoped(ar, live_ns.as_deref(), |_| true, |api| {
            let pp = &pp;
            async move { api.replace(name, pp, live).await }
        })
        .await
        .map_err(|source| api_error("update", ar, name.to_owned(), source))?;
        debug!(%name, "scaled deployment to zero");
        Ok(())
    }

    /// Run `call` against the namespaced API, then once against the cluster scoped API
    /// when the first attempt fails with an error `fallback` accepts.
    async fn scoped<T, F, Fut>(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        fallback: fn(&kube::Error) -> bool,
        call: F,
    ) -> kube::Result<T>
    where
        F: Fn(Api<DynamicObject>) -> Fut,
        Fut: Future<Output = kube::Result<T>>,
    {
        if let Some(ns) = namespace {
            match call(Api::namespaced_with(self.client.clone(), ns, ar)).await {
                Err(err) if fallback(&err) => {
                    warn!(error = %err, kind = %ar.kind, "namespaced call failed, retrying cluster scoped");
                }
                res => return res,
            }
        }
        call(Api::all_with(self.client.clone(), ar)).await
    }

    /// Create `namespace` unless it already exists.
    ///
    /// Does nothing for deletes, the empty namespace and `default`.
    pub async fn create_namespace_if_absent(&self, namespace: &str, is_delete: bool) -> crate::Result<()> {
        if is_delete || namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
            return Ok(());
        }
        let api: Api<Namespace> = Api::all(self.client.clone());
        let get_err = |source| api_error("get", &namespace_resource(), namespace.to_owned(), source);
        match api.get(namespace).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(namespace.to_owned()),
                        ..ObjectMeta::default()
                    },
                    ..Namespace::default()
                };
                api.create(&PostParams::default(), &ns)
                    .await
                    .map_err(|source| api_error("create", &namespace_resource(), namespace.to_owned(), source))?;
                info!(%namespace, "created namespace");
                Ok(())
            }
            Err(source) => Err(get_err(source).into()),
        }
    }

    /// The node ports exposed by `service`.
    pub async fn service_node_ports(&self, service: &str, namespace: &str) -> crate::Result<Vec<i32>> {
        let ar = gvr::api_resource("v1", "Service");
        let namespace = Some(namespace).filter(|ns| !ns.is_empty());
        let svc = self
            .scoped(&ar, namespace, |_| true, |api| async move { api.get(service).await })
            .await
            .map_err(|source| api_error("get", &ar, service.to_owned(), source))?;

        let ports = svc
            .data
            .pointer("/spec/ports")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|port| port.get("nodePort").and_then(Value::as_i64))
            .filter_map(|port| i32::try_from(port).ok())
            .collect();
        Ok(ports)
    }
}

fn namespace_resource() -> ApiResource {
    gvr::api_resource("v1", "Namespace")
}

fn api_error(verb: &'static str, ar: &ApiResource, name: String, source: kube::Error) -> ApplyError {
    ApplyError::Api {
        verb,
        kind: ar.kind.clone(),
        name,
        source,
    }
}

fn is_retryable_create(err: &kube::Error) -> bool {
    !is_already_exists(err)
}
