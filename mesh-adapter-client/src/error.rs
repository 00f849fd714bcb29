//! Error handling in [`mesh_adapter_client`][crate]
use mesh_adapter_core::{Diagnose, Diagnosis};
use thiserror::Error;

use crate::{
    bootstrap::{ClientError, CredentialsError},
    reconciler::ApplyError,
    template::RenderError,
};

/// Possible errors from bootstrapping a client or applying manifests
#[derive(Error, Debug)]
pub enum Error {
    /// The uploaded credentials were rejected.
    #[error("credential validation failed: {0}")]
    Credentials(#[from] CredentialsError),

    /// A client could not be built from valid credentials.
    #[error("client construction failed: {0}")]
    Client(#[from] ClientError),

    /// A manifest template could not be rendered.
    #[error("manifest render failed: {0}")]
    Render(#[from] RenderError),

    /// A document could not be applied.
    #[error("resource apply failed: {0}")]
    Apply(#[from] ApplyError),
}

impl Diagnose for CredentialsError {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Parse(_) => Diagnosis::new(
                "1000",
                "the uploaded file is not a valid kubeconfig",
                "check the file with `kubectl config view --kubeconfig <file>` and upload it again",
            ),
            Self::NoUsableAuthInfo => Diagnosis::new(
                "1001",
                "no user in the kubeconfig carries a token, client certificate, auth provider or exec plugin the adapter can read",
                "upload a kubeconfig with inline credentials, e.g. produced by `kubectl config view --flatten --minify`",
            ),
            Self::Inline { .. } => Diagnosis::new(
                "1002",
                "a certificate or key file referenced by the kubeconfig could not be read",
                "make the referenced files readable by the adapter or inline them as *-data fields",
            ),
        }
    }
}

impl Diagnose for ClientError {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Kubeconfig(_) => Diagnosis::new(
                "1003",
                "the requested context, cluster or user is missing from the kubeconfig",
                "select a context listed by `kubectl config get-contexts`",
            ),
            Self::InCluster(_) => Diagnosis::new(
                "1004",
                "the adapter is not running inside a pod with a mounted service account",
                "upload a kubeconfig or run the adapter in the cluster with a service account token",
            ),
            Self::Serialize(_) | Self::Persist { .. } => Diagnosis::new(
                "1005",
                "the normalized kubeconfig could not be written to disk",
                "check that the configured kubeconfig path is writable",
            ),
            Self::Build(_) => Diagnosis::new(
                "1006",
                "the Kubernetes client could not be constructed from the configuration",
                "verify the cluster address and TLS material in the kubeconfig",
            ),
        }
    }
}

impl Diagnose for RenderError {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Read { .. } => Diagnosis::new(
                "1007",
                "the manifest template for this operation is missing",
                "reinstall the adapter or check the template directory",
            ),
            Self::Parse(_) => Diagnosis::new(
                "1008",
                "the manifest template is not valid template syntax",
                "fix the template and retry the operation",
            ),
            Self::Execute(_) | Self::MissingValue => Diagnosis::new(
                "1009",
                "the manifest template references data that was not supplied",
                "supply every value the template uses",
            ),
        }
    }
}

impl Diagnose for ApplyError {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Yaml(_) | Self::Json(_) | Self::MissingTypeMeta => Diagnosis::new(
                "1010",
                "a manifest document is not a valid Kubernetes object",
                "make sure every document has apiVersion, kind and metadata",
            ),
            Self::Api { .. } | Self::MissingSpec { .. } => Diagnosis::new(
                "1011",
                "the cluster rejected a resource of the manifest",
                "check that the resource kind is installed and the adapter's credentials permit the operation",
            ),
        }
    }
}

impl Diagnose for Error {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Credentials(err) => err.diagnosis(),
            Self::Client(err) => err.diagnosis(),
            Self::Render(err) => err.diagnosis(),
            Self::Apply(err) => err.diagnosis(),
        }
    }
}
