use mesh_adapter_core::{Diagnose, Diagnosis};
use mesh_adapter_runtime::registrant;
use thiserror::Error;

use crate::config::ConfigError;

/// Possible errors when serving adapter operations
#[derive(Error, Debug)]
pub enum Error {
    /// Credentials, client construction, rendering or applying failed
    #[error(transparent)]
    Client(#[from] mesh_adapter_client::Error),

    /// Capability registration failed
    #[error("capability registration failed: {0}")]
    Registration(#[from] registrant::Error),

    /// Configuration could not be read or stored
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An operation needing the cluster ran before credentials were uploaded
    #[error("no cluster client, the adapter instance has not been created")]
    ClientNotInitialized,

    /// The caller cancelled the operation before it finished
    #[error("operation {0:?} was cancelled")]
    Cancelled(String),

    /// The requested operation is not in the catalogue
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
}

impl Diagnose for Error {
    fn diagnosis(&self) -> Diagnosis {
        match self {
            Self::Client(err) => err.diagnosis(),
            Self::Registration(err) => err.diagnosis(),
            Self::Config(err) => err.diagnosis(),
            Self::ClientNotInitialized => Diagnosis::new(
                "1020",
                "the adapter has not received cluster credentials yet",
                "upload a kubeconfig for the target cluster before running operations",
            ),
            Self::Cancelled(_) => Diagnosis::new(
                "1021",
                "the operation was cancelled by its caller",
                "retry the operation; documents applied before cancelling stay in the cluster",
            ),
            Self::UnknownOperation(_) => Diagnosis::new(
                "1022",
                "the requested operation is not supported by this adapter",
                "list the adapter's operations and pick one of them",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_adapter_client::template::RenderError;

    #[test]
    fn wrapped_errors_keep_their_diagnosis() {
        let err = Error::from(mesh_adapter_client::Error::from(RenderError::MissingValue));
        assert_eq!(
            err.diagnosis(),
            mesh_adapter_client::Error::from(RenderError::MissingValue).diagnosis()
        );
        assert_eq!(Error::ClientNotInitialized.diagnosis().code, "1020");
    }
}
