//! Machine readable diagnosis attached to adapter failures.
use std::fmt;

use serde::Serialize;

/// A stable error code plus the guidance shown to an operator.
///
/// Every fatal error an adapter returns is also published as an error [`Event`](crate::Event),
/// so remote observers see the same diagnosis as the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    /// Stable identifier for the failure class, e.g. `"1002"`.
    pub code: &'static str,
    /// What most likely went wrong.
    pub probable_cause: &'static str,
    /// What the operator can do about it.
    pub suggested_remediation: &'static str,
}

impl Diagnosis {
    /// Construct a diagnosis from its three parts.
    pub const fn new(
        code: &'static str,
        probable_cause: &'static str,
        suggested_remediation: &'static str,
    ) -> Self {
        Self {
            code,
            probable_cause,
            suggested_remediation,
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] probable cause: {}; suggested remediation: {}",
            self.code, self.probable_cause, self.suggested_remediation
        )
    }
}

/// Errors that can explain themselves to an operator.
pub trait Diagnose: std::error::Error {
    /// Return the diagnosis for this error.
    fn diagnosis(&self) -> Diagnosis;
}

#[cfg(test)]
mod tests {
    use super::Diagnosis;

    #[test]
    fn display_includes_all_parts() {
        let d = Diagnosis::new("1000", "cluster unreachable", "check the kubeconfig server field");
        assert_eq!(
            d.to_string(),
            "[1000] probable cause: cluster unreachable; suggested remediation: check the kubeconfig server field"
        );
    }
}
