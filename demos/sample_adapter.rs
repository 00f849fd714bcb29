// A sample adapter: uploads a kubeconfig, applies one operation and prints every event.
//
// cargo run --example sample_adapter -- install_http_bin default
use std::sync::Arc;

use futures::StreamExt;
use mesh_adapter::{
    service::{self, AdapterRequest, AdapterResponse},
    Adapter, AdapterConfig, OperationRequest,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const CONFIG: &str = r#"
server:
  name: sample-adapter
  port: 10000
mesh:
  name: Sample
  version: 1.19.1
operations:
  install_http_bin:
    type: sample_application
    description: HTTPBin Application
    templates: ["demos/templates/httpbin.yaml"]
    additional_properties:
      service_name: httpbin
  custom:
    type: custom
    description: Custom YAML
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let operation = args.next().unwrap_or_else(|| "install_http_bin".into());
    let namespace = args.next().unwrap_or_else(|| "default".into());
    let delete = args.next().as_deref() == Some("--delete");

    let config = match std::env::var("ADAPTER_CONFIG") {
        Ok(path) => AdapterConfig::load(path.as_ref())?,
        Err(_) => AdapterConfig::from_yaml(CONFIG)?,
    };
    let adapter = Arc::new(Adapter::new(config)?);

    let mut events = adapter.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match &event.error_code {
                Some(code) => println!(
                    "[{}] {} ({code}): {}\n  cause: {}\n  remediation: {}",
                    event.operation_id,
                    event.summary,
                    event.details,
                    event.probable_cause.as_deref().unwrap_or_default(),
                    event.suggested_remediation.as_deref().unwrap_or_default(),
                ),
                None => println!("[{}] {}: {}", event.operation_id, event.summary, event.details),
            }
        }
    });

    // Empty credentials fall back to the in-cluster configuration
    let kubeconfig = std::env::var("KUBECONFIG")
        .ok()
        .or_else(|| {
            mesh_adapter::ClientOptions::default_kubeconfig_path().map(|p| p.display().to_string())
        })
        .and_then(|path| std::fs::read(path).ok())
        .unwrap_or_default();

    let cancel = CancellationToken::new();
    let svc = service::pipeline(adapter.clone(), cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    svc.clone()
        .oneshot(AdapterRequest::Initialize {
            kubeconfig,
            context: std::env::var("KUBE_CONTEXT").unwrap_or_default(),
        })
        .await?;

    if let AdapterResponse::Operations(ops) = svc.clone().oneshot(AdapterRequest::ListOperations).await? {
        for (name, op) in &ops {
            tracing::info!(%name, category = ?op.category, "supported operation");
        }
    }

    let res = svc
        .oneshot(AdapterRequest::Apply(OperationRequest {
            operation_name: operation,
            namespace,
            username: "demo".into(),
            is_delete: delete,
            operation_id: "demo-1".into(),
            ..OperationRequest::default()
        }))
        .await;

    // dropping the last handle to the bus ends the printer
    drop(adapter);
    printer.await?;
    res?;
    Ok(())
}
