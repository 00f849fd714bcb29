//! The [`Adapter`]: cluster client lifecycle, operation dispatch and event reporting.
use std::{
    collections::BTreeMap,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use mesh_adapter_client::{bootstrap, ApplyParams, ClientHandle, ClientOptions, Reconciler};
use mesh_adapter_core::{Diagnose, Event, Operation, OperationRequest, Operations};
use mesh_adapter_runtime::{EventBus, RetryPolicy, Subscription, VersionRegistry};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{
        AdapterConfig, ConfigStore, ConfigStoreExt, InMemoryStore, MeshSpec, ServerConfig, MESH_SPEC_KEY,
        OPERATIONS_KEY, SERVER_KEY,
    },
    registration, Error,
};

/// Operation property naming the service whose node ports are reported after an install.
pub const SERVICE_NAME_KEY: &str = "service_name";

/// The cluster side of a configured adapter, replaced as a whole on reconfiguration.
#[derive(Clone)]
struct Instance {
    handle: ClientHandle,
    reconciler: Reconciler,
}

/// A mesh adapter.
///
/// Holds the configuration store, the event bus and, once credentials have been
/// uploaded through [`Adapter::create_instance`], the cluster client. Every fatal
/// error returned by an operation is also published on the bus as an error
/// [`Event`] carrying its diagnosis.
pub struct Adapter {
    store: Arc<dyn ConfigStore>,
    options: ClientOptions,
    registration: RetryPolicy,
    template_dir: Option<PathBuf>,
    events: EventBus,
    versions: VersionRegistry,
    instance: RwLock<Option<Instance>>,
}

impl Adapter {
    /// An adapter serving `config` from an [`InMemoryStore`].
    pub fn new(config: AdapterConfig) -> Result<Self, Error> {
        let store = InMemoryStore::seeded(&config)?;
        Ok(Self::with_store(Arc::new(store), &config))
    }

    /// An adapter reading its identity and operations from `store`.
    ///
    /// Only the client, event, registration and template settings of `config` are used.
    pub fn with_store(store: Arc<dyn ConfigStore>, config: &AdapterConfig) -> Self {
        Self {
            store,
            options: config.client.clone(),
            registration: config.registration.clone(),
            template_dir: config.template_dir.clone(),
            events: EventBus::with_config(config.events),
            versions: VersionRegistry::new(),
            instance: RwLock::new(None),
        }
    }

    /// The name of the managed mesh, empty when unconfigured.
    pub fn name(&self) -> String {
        self.mesh_spec().map(|spec| spec.name).unwrap_or_default()
    }

    /// The default version of the managed mesh, empty when unconfigured.
    pub fn version(&self) -> String {
        self.mesh_spec().map(|spec| spec.version).unwrap_or_default()
    }

    fn mesh_spec(&self) -> Option<MeshSpec> {
        self.store
            .get_object(MESH_SPEC_KEY)
            .map_err(|err| warn!(error = %err, "mesh spec unavailable"))
            .ok()
    }

    /// The adapter's server identity.
    pub fn server(&self) -> Result<ServerConfig, Error> {
        Ok(self.store.get_object(SERVER_KEY)?)
    }

    /// The configuration store.
    pub fn store(&self) -> &dyn ConfigStore {
        &*self.store
    }

    /// The event bus operations report to.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Listen for events, starting with the buffered history.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Mesh versions found by [`Adapter::register_capabilities`].
    pub fn available_versions(&self) -> &VersionRegistry {
        &self.versions
    }

    /// The operations this adapter supports.
    pub fn list_operations(&self) -> Result<Operations, Error> {
        let result = self.operations();
        self.report("", "Listing operations failed", result)
    }

    fn operations(&self) -> Result<Operations, Error> {
        Ok(self.store.get_object(OPERATIONS_KEY)?)
    }

    /// Validate `kubeconfig` and build a fresh cluster client from it.
    ///
    /// A non-empty `context` overrides the kubeconfig's current context. Empty
    /// credentials select the in-cluster configuration when running in a pod. The
    /// previous client, if any, keeps serving until the new one is ready, and stays in
    /// place when `cancel` fires first.
    pub async fn create_instance(
        &self,
        kubeconfig: &[u8],
        context: &str,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let result = cancellable(&cancel, "", self.connect(kubeconfig, context)).await;
        self.report("", "Adapter instance creation failed", result)
    }

    async fn connect(&self, kubeconfig: &[u8], context: &str) -> Result<(), Error> {
        let credentials = bootstrap::validate(kubeconfig).map_err(mesh_adapter_client::Error::from)?;
        let handle = bootstrap::build(&credentials, context, &self.options)
            .await
            .map_err(mesh_adapter_client::Error::from)?;
        self.install(handle);
        Ok(())
    }

    /// Serve cluster operations through `handle` from now on.
    pub fn install(&self, handle: ClientHandle) {
        let reconciler = Reconciler::new(&handle);
        info!(?handle, "installed cluster client");
        *self.instance.write() = Some(Instance { handle, reconciler });
    }

    /// The current cluster client.
    pub fn client(&self) -> Result<ClientHandle, Error> {
        self.instance().map(|instance| instance.handle)
    }

    fn instance(&self) -> Result<Instance, Error> {
        self.instance.read().clone().ok_or(Error::ClientNotInitialized)
    }

    /// Apply (or delete) the operation named by `request`.
    ///
    /// Custom operations apply `request.custom_body`; every other operation renders
    /// its templates with the operation's properties plus `namespace`, `username` and
    /// `version`. Completion is reported as an info event; cancelling `cancel` stops
    /// the operation between cluster calls and returns [`Error::Cancelled`].
    pub async fn apply_operation(&self, request: OperationRequest, cancel: CancellationToken) -> Result<(), Error> {
        info!(operation = %request.operation_name, id = %request.operation_id, delete = request.is_delete, "applying operation");
        let result = cancellable(&cancel, &request.operation_id, self.run_operation(&request)).await;
        match result {
            Ok(event) => {
                self.stream_info(event);
                Ok(())
            }
            Err(err) => {
                let summary = format!("Error while applying {}", request.operation_name);
                Err(self.fail(&request.operation_id, summary, err))
            }
        }
    }

    async fn run_operation(&self, request: &OperationRequest) -> Result<Event, Error> {
        let operation = self
            .operations()?
            .remove(&request.operation_name)
            .ok_or_else(|| Error::UnknownOperation(request.operation_name.clone()))?;
        let reconciler = self.instance()?.reconciler;

        reconciler
            .create_namespace_if_absent(&request.namespace, request.is_delete)
            .await?;
        let params = ApplyParams {
            is_delete: request.is_delete,
            ..ApplyParams::default()
        }
        .namespace(&request.namespace)
        .custom(operation.is_custom());

        if operation.is_custom() {
            reconciler.apply_manifest(&request.custom_body, &params).await?;
        } else {
            let data = template_data(&operation, request);
            for template in &operation.templates {
                let path = self.template_path(template);
                debug!(?path, "applying template");
                reconciler.apply(&path, &data, &params).await?;
            }
        }

        let name = if operation.description.is_empty() {
            &request.operation_name
        } else {
            &operation.description
        };
        let verb = if request.is_delete { "removed" } else { "deployed" };
        let mut details = format!("The {name} is now {verb}.");
        let service = operation.additional_properties.get(SERVICE_NAME_KEY);
        if let Some(service) = service.filter(|_| !request.is_delete) {
            match reconciler.service_node_ports(service, &request.namespace).await {
                Ok(ports) if !ports.is_empty() => {
                    let ports: Vec<_> = ports.iter().map(i32::to_string).collect();
                    details.push_str(&format!(
                        " The service {service} is reachable on node ports {}.",
                        ports.join(", ")
                    ));
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, %service, "could not look up node ports"),
            }
        }
        Ok(Event::info(&request.operation_id, format!("{name} {verb} successfully"), details))
    }

    fn template_path(&self, template: &str) -> PathBuf {
        match &self.template_dir {
            Some(dir) => dir.join(template),
            None => PathBuf::from(template),
        }
    }

    /// Apply an already rendered bundle outside of the operation catalogue.
    pub async fn apply_manifest(
        &self,
        operation_id: &str,
        yaml: &str,
        params: &ApplyParams,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let apply = async {
            let reconciler = self.instance()?.reconciler;
            reconciler.apply_manifest(yaml, params).await?;
            Ok::<_, Error>(())
        };
        let result = cancellable(&cancel, operation_id, apply).await;
        self.report(operation_id, "Applying manifest failed", result)
    }

    /// Create `namespace` in the cluster unless it exists.
    pub async fn create_namespace(&self, namespace: &str) -> Result<(), Error> {
        let create = async {
            let reconciler = self.instance()?.reconciler;
            reconciler.create_namespace_if_absent(namespace, false).await?;
            Ok::<_, Error>(())
        };
        let result = create.await;
        self.report("", "Creating namespace failed", result)
    }

    /// The node ports exposed by `service` in `namespace`.
    pub async fn service_node_ports(&self, service: &str, namespace: &str) -> Result<Vec<i32>, Error> {
        let lookup = async {
            let reconciler = self.instance()?.reconciler;
            Ok::<_, Error>(reconciler.service_node_ports(service, namespace).await?)
        };
        let result = lookup.await;
        self.report("", "Looking up service ports failed", result)
    }

    /// Register the component definitions below `dir` with the runtime at `runtime_url`.
    pub async fn register_capabilities(&self, dir: &Path, runtime_url: &str) -> Result<(), Error> {
        let register = async {
            let host = registration::host_metadata(&self.server()?);
            registration::register_components(dir, runtime_url, host, self.registration.clone(), &self.versions)
                .await
        };
        let result = register.await;
        self.report("", "Registering components failed", result)
    }

    /// Publish an informational event.
    pub fn stream_info(&self, event: Event) {
        info!(id = %event.operation_id, summary = %event.summary, "sending event");
        self.events.publish(self.stamp(event));
    }

    /// Publish `event` as an error event carrying the diagnosis of `err`.
    pub fn stream_err(&self, event: Event, err: &dyn Diagnose) {
        error!(id = %event.operation_id, error = %err, "{}", event.summary);
        self.events.publish(self.stamp(event.with_diagnosis(err)));
    }

    fn fail(&self, operation_id: &str, summary: impl Into<String>, err: Error) -> Error {
        let event = Event::error(operation_id, summary, &err);
        error!(id = %operation_id, error = %err, "{}", event.summary);
        self.events.publish(self.stamp(event));
        err
    }

    fn stamp(&self, event: Event) -> Event {
        if event.component.is_some() {
            return event;
        }
        let server: ServerConfig = self.store.get_object(SERVER_KEY).unwrap_or_default();
        event.component(server.kind, server.name)
    }

    fn report<T>(&self, operation_id: &str, summary: &str, result: Result<T, Error>) -> Result<T, Error> {
        result.map_err(|err| self.fail(operation_id, summary, err))
    }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation_id: &str,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(id = %operation_id, "operation cancelled");
            Err(Error::Cancelled(operation_id.to_owned()))
        }
        res = fut => res,
    }
}

fn template_data(operation: &Operation, request: &OperationRequest) -> BTreeMap<String, String> {
    let mut data = operation.additional_properties.clone();
    data.insert("namespace".into(), request.namespace.clone());
    data.insert("username".into(), request.username.clone());
    data.insert(
        "version".into(),
        operation.versions.first().cloned().unwrap_or_default(),
    );
    data
}
