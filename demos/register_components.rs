// Registers the component definitions below a directory with a running orchestration plane.
//
// cargo run --example register_components -- ./components http://localhost:9081
use std::path::PathBuf;

use mesh_adapter::{Adapter, AdapterConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let dir = PathBuf::from(args.next().unwrap_or_else(|| "templates/meshmodel/components".into()));
    let runtime = args.next().unwrap_or_else(|| "http://localhost:9081".into());

    let adapter = Adapter::new(AdapterConfig::default())?;
    adapter.register_capabilities(&dir, &runtime).await?;
    println!("available versions: {:?}", adapter.available_versions().versions());
    Ok(())
}
