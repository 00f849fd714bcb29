//! Types shared by the mesh adapter crates.
//!
//! This crate contains the data model that flows between an adapter and the
//! orchestration plane: status [`Event`]s, the [`Operation`] catalogue, the
//! [`Diagnose`] contract for errors and the payload sent when registering
//! capabilities.
//!
//! It also owns the rule that maps a manifest's `apiVersion` and `kind` onto the
//! [`ApiResource`](kube_core::discovery::ApiResource) used to address the
//! dynamic client, see [`gvr`].
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod capability;
pub use capability::{CapabilityRegistration, HostMetadata};

pub mod diagnosis;
pub use diagnosis::{Diagnose, Diagnosis};

pub mod event;
pub use event::{Event, EventKind};

pub mod gvr;

pub mod operation;
pub use operation::{Operation, OperationCategory, OperationRequest, Operations};
