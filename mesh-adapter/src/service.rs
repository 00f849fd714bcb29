//! The control-plane surface of an adapter as a [`tower::Service`].
//!
//! Whatever transport the orchestration plane talks (gRPC in practice) decodes its
//! calls into [`AdapterRequest`]s and hands them to the pipeline built by
//! [`pipeline`]: an [`AdapterService`] wrapped in a [`LogLayer`].
use std::{
    sync::Arc,
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use mesh_adapter_core::{OperationRequest, Operations};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service, ServiceBuilder};
use tracing::{error, info};

use crate::{Adapter, Error};

/// A call from the orchestration plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterRequest {
    /// Upload cluster credentials and (re)build the cluster client.
    Initialize {
        /// Raw kubeconfig, empty for the in-cluster configuration.
        kubeconfig: Vec<u8>,
        /// Context to use instead of the kubeconfig's current context.
        context: String,
    },
    /// Apply or delete an operation.
    Apply(OperationRequest),
    /// List the supported operations.
    ListOperations,
}

impl AdapterRequest {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Apply(_) => "apply",
            Self::ListOperations => "list_operations",
        }
    }
}

/// The answer to an [`AdapterRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterResponse {
    /// The cluster client is ready.
    Initialized,
    /// The operation with this id completed.
    Applied(String),
    /// The supported operations.
    Operations(Operations),
}

/// Serves [`AdapterRequest`]s with an [`Adapter`].
///
/// Every in-flight apply is cancelled once the service's token is cancelled.
#[derive(Clone)]
pub struct AdapterService {
    adapter: Arc<Adapter>,
    cancel: CancellationToken,
}

impl AdapterService {
    /// Serve requests with `adapter`.
    pub fn new(adapter: Arc<Adapter>) -> Self {
        Self {
            adapter,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel in-flight applies when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Service<AdapterRequest> for AdapterService {
    type Error = Error;
    type Future = BoxFuture<'static, Result<AdapterResponse, Error>>;
    type Response = AdapterResponse;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: AdapterRequest) -> Self::Future {
        let adapter = self.adapter.clone();
        let cancel = self.cancel.child_token();
        async move {
            match req {
                AdapterRequest::Initialize { kubeconfig, context } => {
                    adapter.create_instance(&kubeconfig, &context, cancel).await?;
                    Ok(AdapterResponse::Initialized)
                }
                AdapterRequest::Apply(request) => {
                    let id = request.operation_id.clone();
                    adapter.apply_operation(request, cancel).await?;
                    Ok(AdapterResponse::Applied(id))
                }
                AdapterRequest::ListOperations => adapter.list_operations().map(AdapterResponse::Operations),
            }
        }
        .boxed()
    }
}

/// Layer that logs every request and failed response of the wrapped service.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogLayer;

impl<S> Layer<S> for LogLayer {
    type Service = Log<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Log { inner }
    }
}

/// Service produced by [`LogLayer`].
#[derive(Clone, Debug)]
pub struct Log<S> {
    inner: S,
}

impl<S> Service<AdapterRequest> for Log<S>
where
    S: Service<AdapterRequest, Response = AdapterResponse, Error = Error>,
    S::Future: Send + 'static,
{
    type Error = Error;
    type Future = BoxFuture<'static, Result<AdapterResponse, Error>>;
    type Response = AdapterResponse;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: AdapterRequest) -> Self::Future {
        let name = req.name();
        if let AdapterRequest::Apply(op) = &req {
            info!(request = name, operation = %op.operation_name, id = %op.operation_id, "handling request");
        } else {
            info!(request = name, "handling request");
        }
        let fut = self.inner.call(req);
        async move {
            let res = fut.await;
            if let Err(err) = &res {
                error!(request = name, error = %err, "request failed");
            }
            res
        }
        .boxed()
    }
}

/// The logged service pipeline serving `adapter`.
pub fn pipeline(adapter: Arc<Adapter>, cancel: CancellationToken) -> Log<AdapterService> {
    ServiceBuilder::new()
        .layer(LogLayer)
        .service(AdapterService::new(adapter).with_cancellation(cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use mesh_adapter_core::Operation;
    use tower::ServiceExt;

    fn adapter() -> Arc<Adapter> {
        let mut config = AdapterConfig::default();
        config.operations.insert("custom".into(), Operation::default());
        Arc::new(Adapter::new(config).unwrap())
    }

    #[tokio::test]
    async fn lists_operations_through_the_pipeline() {
        let svc = pipeline(adapter(), CancellationToken::new());
        let res = svc.oneshot(AdapterRequest::ListOperations).await.unwrap();
        match res {
            AdapterResponse::Operations(ops) => assert!(ops.contains_key("custom")),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn errors_pass_through_the_log_layer() {
        let adapter = adapter();
        let svc = pipeline(adapter.clone(), CancellationToken::new());
        let req = AdapterRequest::Apply(OperationRequest {
            operation_name: "custom".into(),
            operation_id: "op-7".into(),
            ..OperationRequest::default()
        });
        let err = svc.oneshot(req).await.unwrap_err();
        assert!(matches!(err, Error::ClientNotInitialized));
        assert_eq!(adapter.events().history()[0].operation_id, "op-7");
    }

    #[tokio::test]
    async fn cancelling_the_service_cancels_applies() {
        let adapter = adapter();
        let cancel = CancellationToken::new();
        let mut svc = pipeline(adapter, cancel.clone());
        cancel.cancel();
        let req = AdapterRequest::Apply(OperationRequest {
            operation_name: "custom".into(),
            operation_id: "op-8".into(),
            ..OperationRequest::default()
        });
        let err = svc.ready().await.unwrap().call(req).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(id) if id == "op-8"));
    }

    #[tokio::test]
    async fn initialize_rejects_bad_credentials() {
        let svc = pipeline(adapter(), CancellationToken::new());
        let req = AdapterRequest::Initialize {
            kubeconfig: b"users: {".to_vec(),
            context: String::new(),
        };
        assert!(matches!(svc.oneshot(req).await, Err(Error::Client(_))));
    }
}
