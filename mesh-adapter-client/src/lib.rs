//! Cluster access for mesh adapters.
//!
//! The crate turns uploaded credentials into a tuned [`kube::Client`] ([`bootstrap`]),
//! renders manifest templates ([`template`]) and applies the resulting multi-document
//! bundles through the untyped resource API ([`reconciler`]).
//!
//! ```rust,no_run
//! use mesh_adapter_client::{bootstrap, reconciler::{ApplyParams, Reconciler}};
//!
//! # async fn wrapper(kubeconfig: Vec<u8>) -> Result<(), mesh_adapter_client::Error> {
//! let credentials = bootstrap::validate(&kubeconfig)?;
//! let handle = bootstrap::build(&credentials, "", &Default::default()).await?;
//! let reconciler = Reconciler::new(&handle);
//! reconciler
//!     .apply_manifest("apiVersion: v1\nkind: Namespace\nmetadata: {name: mesh}\n", &ApplyParams::create())
//!     .await?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bootstrap;
pub mod reconciler;
pub mod template;

mod error;
pub use error::Error;

pub use bootstrap::{ClientHandle, ClientOptions, ValidatedCredentials};
pub use reconciler::{ApplyParams, Reconciler};

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
