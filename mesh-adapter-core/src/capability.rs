//! Payload posted to a capability registry.
use serde::{Deserialize, Serialize};

/// Describes the adapter instance that owns the registered capabilities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMetadata {
    /// Address the orchestration plane uses to reach this adapter, e.g. `sample-adapter:10000`.
    pub host: String,
    /// Whether the capability is only usable by privileged users.
    #[serde(default)]
    pub restricted: bool,
    /// Free form metadata forwarded to the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// One capability definition wrapped with the host that serves it.
///
/// Serializes as `{definition, schema?, host, restricted?, metadata?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRegistration {
    /// The definition document as read from disk.
    pub definition: serde_json::Value,
    /// Optional JSON schema accompanying the definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// See [`HostMetadata::host`].
    pub host: String,
    /// See [`HostMetadata::restricted`].
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restricted: bool,
    /// See [`HostMetadata::metadata`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CapabilityRegistration {
    /// Wrap a definition with host metadata.
    pub fn new(definition: serde_json::Value, schema: Option<String>, host: &HostMetadata) -> Self {
        Self {
            definition,
            schema,
            host: host.host.clone(),
            restricted: host.restricted,
            metadata: host.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_fields_are_omitted() {
        let host = HostMetadata {
            host: "adapter:10000".into(),
            ..Default::default()
        };
        let reg = CapabilityRegistration::new(json!({"kind": "Component"}), None, &host);
        assert_eq!(
            serde_json::to_value(&reg).unwrap(),
            json!({"definition": {"kind": "Component"}, "host": "adapter:10000"})
        );
    }

    #[test]
    fn restricted_and_metadata_are_forwarded() {
        let host = HostMetadata {
            host: "adapter:10000".into(),
            restricted: true,
            metadata: Some(json!({"mesh": "istio"})),
        };
        let reg = CapabilityRegistration::new(json!({}), Some("{}".into()), &host);
        let v = serde_json::to_value(&reg).unwrap();
        assert_eq!(v["restricted"], true);
        assert_eq!(v["schema"], "{}");
        assert_eq!(v["metadata"]["mesh"], "istio");
    }
}
