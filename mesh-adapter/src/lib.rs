//! A reusable core for Kubernetes service mesh adapters.
//!
//! An adapter receives cluster credentials and operation requests from a central
//! orchestration plane, applies the corresponding manifests to the cluster and
//! reports progress back as a stream of [`Event`]s. This crate ties the pieces
//! together:
//!
//! - [`Adapter`] owns the cluster client, the operation catalogue and the event bus
//! - [`config`] with the [`AdapterConfig`] an adapter starts from and the [`ConfigStore`] it serves from
//! - [`service`] exposes the adapter as a [`tower::Service`] pipeline
//! - [`registration`] announces the adapter's component definitions to the orchestration plane
//!
//! The underlying crates are re-exported as [`core`], [`client`] and [`runtime`].
//!
//! # Serving operations
//!
//! ```no_run
//! use std::sync::Arc;
//! use mesh_adapter::{service::{self, AdapterRequest}, Adapter, AdapterConfig, OperationRequest};
//! use tokio_util::sync::CancellationToken;
//! use tower::ServiceExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdapterConfig::load("adapter.yaml".as_ref())?;
//!     let adapter = Arc::new(Adapter::new(config)?);
//!
//!     // Report progress to whoever is listening
//!     let mut events = adapter.subscribe();
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{}: {}", event.operation_id, event.summary);
//!         }
//!     });
//!
//!     let svc = service::pipeline(adapter, CancellationToken::new());
//!     let kubeconfig = std::fs::read("kubeconfig.yaml")?;
//!     svc.clone()
//!         .oneshot(AdapterRequest::Initialize { kubeconfig, context: String::new() })
//!         .await?;
//!     svc.oneshot(AdapterRequest::Apply(OperationRequest {
//!         operation_name: "install_http_bin".into(),
//!         namespace: "default".into(),
//!         operation_id: "1".into(),
//!         ..Default::default()
//!     }))
//!     .await?;
//!     Ok(())
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use mesh_adapter_client as client;
pub use mesh_adapter_core as core;
pub use mesh_adapter_runtime as runtime;

mod adapter;
pub use adapter::{Adapter, SERVICE_NAME_KEY};

pub mod config;
pub use config::{AdapterConfig, ConfigStore, ConfigStoreExt, InMemoryStore};

mod error;
pub use error::Error;

pub mod registration;
pub mod service;

pub use mesh_adapter_client::{ApplyParams, ClientHandle, ClientOptions};
pub use mesh_adapter_core::{
    Diagnose, Diagnosis, Event, EventKind, Operation, OperationCategory, OperationRequest, Operations,
};
pub use mesh_adapter_runtime::{EventBus, RetryPolicy, Subscription};

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
