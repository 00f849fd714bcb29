//! Rendering manifest templates written in Go `text/template` syntax.
use std::{collections::BTreeMap, path::Path, path::PathBuf};

use gtmpl::{Context, Template, Value};
use thiserror::Error;

/// What Go prints for a key missing from the template data.
const NO_VALUE: &str = "<no value>";

/// Errors from [`render`] and [`render_str`].
#[derive(Error, Debug)]
pub enum RenderError {
    /// The template file could not be read.
    #[error("failed to read template {path:?}: {source}")]
    Read {
        /// The template that was requested.
        path: PathBuf,
        /// The read error.
        #[source]
        source: std::io::Error,
    },

    /// The template is not valid template syntax.
    #[error("failed to parse template: {0}")]
    Parse(String),

    /// Evaluating the template failed.
    #[error("failed to execute template: {0}")]
    Execute(String),

    /// The template referenced a key that was not supplied.
    #[error("template references a value that was not supplied")]
    MissingValue,
}

/// Render the template at `path` with `data`.
pub fn render(path: &Path, data: &BTreeMap<String, String>) -> Result<String, RenderError> {
    let text = std::fs::read_to_string(path).map_err(|source| RenderError::Read {
        path: path.to_owned(),
        source,
    })?;
    tracing::trace!(?path, keys = data.len(), "rendering template");
    render_str(&text, data)
}

/// Render template `text` with `data`.
pub fn render_str(text: &str, data: &BTreeMap<String, String>) -> Result<String, RenderError> {
    let mut template = Template::default();
    template
        .parse(text)
        .map_err(|err| RenderError::Parse(err.to_string()))?;

    let values = data
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let rendered = template
        .render(&Context::from(Value::Map(values)))
        .map_err(|err| RenderError::Execute(err.to_string()))?;

    if rendered.contains(NO_VALUE) {
        return Err(RenderError::MissingValue);
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_values() {
        let out = render_str(
            "kind: Namespace\nmetadata:\n  name: {{.namespace}}\n",
            &data(&[("namespace", "istio-system")]),
        )
        .unwrap();
        assert_eq!(out, "kind: Namespace\nmetadata:\n  name: istio-system\n");
    }

    #[test]
    fn bad_syntax_is_a_parse_error() {
        let err = render_str("name: {{.namespace", &data(&[])).unwrap_err();
        assert!(matches!(err, RenderError::Parse(_)), "{err:?}");
    }

    #[test]
    fn missing_key_fails() {
        let err = render_str("name: {{.namespace}}", &data(&[])).unwrap_err();
        assert!(
            matches!(err, RenderError::MissingValue | RenderError::Execute(_)),
            "{err:?}"
        );
    }

    #[test]
    fn renders_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("httpbin.yaml");
        std::fs::write(&path, "app: {{.name}}").unwrap();
        assert_eq!(render(&path, &data(&[("name", "httpbin")])).unwrap(), "app: httpbin");

        let err = render(&dir.path().join("missing.yaml"), &data(&[])).unwrap_err();
        assert!(matches!(err, RenderError::Read { .. }));
    }
}
