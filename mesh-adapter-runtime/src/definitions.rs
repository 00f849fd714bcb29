//! Discovering the component definitions shipped with an adapter.
//!
//! Definitions live under one directory per mesh version:
//!
//! ```text
//! components/
//!   1.18.0/
//!     virtualservice_component_definition.json
//!     virtualservice_component_schema.json
//!   1.19.1/
//!     ...
//! ```
use std::{collections::BTreeSet, path::Path};

use parking_lot::RwLock;
use walkdir::WalkDir;

use crate::registrant::{DefinitionPath, Error};

/// File name suffix of a component definition.
pub const DEFINITION_SUFFIX: &str = "_component_definition.json";
/// File name suffix of the schema paired with a definition.
pub const SCHEMA_SUFFIX: &str = "_component_schema.json";

/// The mesh versions an adapter has definitions for.
#[derive(Debug, Default)]
pub struct VersionRegistry {
    versions: RwLock<BTreeSet<String>>,
}

impl VersionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `version` as available.
    pub fn insert(&self, version: impl Into<String>) {
        self.versions.write().insert(version.into());
    }

    /// Whether `version` is available.
    pub fn contains(&self, version: &str) -> bool {
        self.versions.read().contains(version)
    }

    /// Every available version, sorted.
    pub fn versions(&self) -> Vec<String> {
        self.versions.read().iter().cloned().collect()
    }
}

/// Collect every definition below `base`, recording the directory each one lives in
/// as an available version in `registry`.
///
/// A sibling `<name>_component_schema.json` is attached as the definition's schema.
pub fn definition_paths(base: &Path, registry: &VersionRegistry) -> Result<Vec<DefinitionPath>, Error> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(base).sort_by_file_name() {
        let entry = entry.map_err(Error::Walk)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(stem) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_suffix(DEFINITION_SUFFIX))
        else {
            continue;
        };

        let mut definition = DefinitionPath::new(entry.path());
        let schema = entry.path().with_file_name(format!("{stem}{SCHEMA_SUFFIX}"));
        if schema.is_file() {
            definition = definition.with_schema(schema);
        }
        if let Some(version) = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .and_then(|v| v.to_str())
        {
            registry.insert(version);
        }
        paths.push(definition);
    }
    tracing::debug!(count = paths.len(), ?base, "discovered component definitions");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_versions_and_pairs_schemas() {
        let dir = tempfile::tempdir().unwrap();
        for (version, file) in [
            ("1.18.0", "gateway_component_definition.json"),
            ("1.18.0", "gateway_component_schema.json"),
            ("1.19.1", "sidecar_component_definition.json"),
            ("1.19.1", "README.md"),
        ] {
            let parent = dir.path().join(version);
            fs::create_dir_all(&parent).unwrap();
            fs::write(parent.join(file), "{}").unwrap();
        }

        let registry = VersionRegistry::new();
        let paths = definition_paths(dir.path(), &registry).unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].definition.ends_with("1.18.0/gateway_component_definition.json"));
        assert!(paths[0]
            .schema
            .as_deref()
            .is_some_and(|s| s.ends_with("gateway_component_schema.json")));
        assert_eq!(paths[1].schema, None);
        assert_eq!(registry.versions(), ["1.18.0", "1.19.1"]);
        assert!(registry.contains("1.19.1"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = definition_paths(&dir.path().join("absent"), &VersionRegistry::new()).unwrap_err();
        assert!(matches!(err, Error::Walk(_)));
    }
}
