// Applies (or deletes) a multi-document manifest with the reconciler alone.
//
// cargo run --example apply_manifest -- manifest.yaml my-namespace [--delete]
use mesh_adapter::client::{bootstrap, ApplyParams, Reconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or_else(|| anyhow::anyhow!("usage: apply_manifest <file> [namespace] [--delete]"))?;
    let namespace = args.next().unwrap_or_default();
    let delete = args.next().as_deref() == Some("--delete");

    let options = mesh_adapter::ClientOptions::default();
    let kubeconfig = match mesh_adapter::ClientOptions::default_kubeconfig_path() {
        Some(path) if path.exists() => std::fs::read(path)?,
        _ => Vec::new(),
    };
    let credentials = bootstrap::validate(&kubeconfig)?;
    let handle = bootstrap::build(&credentials, "", &options).await?;
    tracing::info!(?handle, "connected");

    let reconciler = Reconciler::new(&handle);
    reconciler.create_namespace_if_absent(&namespace, delete).await?;

    let params = (if delete { ApplyParams::delete() } else { ApplyParams::create() }).namespace(&namespace);
    let yaml = std::fs::read_to_string(&path)?;
    reconciler.apply_manifest(&yaml, &params).await?;
    tracing::info!(%path, %namespace, delete, "manifest applied");
    Ok(())
}
