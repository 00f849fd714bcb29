//! The operations an adapter advertises and the requests that invoke them.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Broad grouping of an [`Operation`], used by the orchestration plane to lay out menus.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    /// Install or remove the mesh itself.
    #[default]
    Install,
    /// Deploy a sample application onto the mesh.
    SampleApplication,
    /// Apply mesh configuration.
    Config,
    /// Run a validation or conformance suite.
    Validate,
    /// Apply user supplied YAML.
    Custom,
}

/// An operation an adapter supports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Category of the operation.
    #[serde(rename = "type", default)]
    pub category: OperationCategory,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Mesh versions this operation is available for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
    /// Template assets rendered by this operation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<String>,
    /// Adapter specific extras, e.g. the name of the service to expose.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_properties: BTreeMap<String, String>,
}

impl Operation {
    /// Whether applying this operation applies user supplied YAML.
    ///
    /// Custom operations are allowed to replace existing resources when a create fails.
    pub fn is_custom(&self) -> bool {
        self.category == OperationCategory::Custom
    }
}

/// Supported operations keyed by operation name.
pub type Operations = BTreeMap<String, Operation>;

/// A request to apply (or delete) an operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Key into [`Operations`].
    pub operation_name: String,
    /// Target namespace, empty for the manifest's own namespaces.
    #[serde(default)]
    pub namespace: String,
    /// The user on whose behalf the operation runs.
    #[serde(default)]
    pub username: String,
    /// Raw YAML supplied with custom operations.
    #[serde(default)]
    pub custom_body: String,
    /// Remove instead of create.
    #[serde(default)]
    pub is_delete: bool,
    /// Correlates emitted events with this request.
    #[serde(default)]
    pub operation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_round_trip_through_yaml() {
        let raw = r#"
install_http_bin:
  type: sample_application
  description: HTTPBin Application
  templates: ["templates/httpbin.yaml"]
  additional_properties:
    service_name: httpbin
custom:
  type: custom
  description: Custom YAML
"#;
        let ops: Operations = serde_yaml::from_str(raw).unwrap();
        assert_eq!(ops.len(), 2);
        let httpbin = &ops["install_http_bin"];
        assert_eq!(httpbin.category, OperationCategory::SampleApplication);
        assert_eq!(httpbin.additional_properties["service_name"], "httpbin");
        assert!(!httpbin.is_custom());
        assert!(ops["custom"].is_custom());
    }
}
