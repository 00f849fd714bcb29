//! Splitting a rendered bundle into resource documents.
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value;

use super::ApplyError;

/// Lazily yields the objects of a multi-document YAML bundle.
///
/// Blank documents are skipped and list documents (an `items` array) are expanded
/// into their members.
pub struct Documents<'de> {
    inner: serde_yaml::Deserializer<'de>,
    pending: std::vec::IntoIter<Value>,
}

impl<'de> Documents<'de> {
    /// Iterate the documents of `yaml`.
    pub fn new(yaml: &'de str) -> Self {
        Self {
            inner: serde_yaml::Deserializer::from_str(yaml),
            pending: Vec::new().into_iter(),
        }
    }

    fn next_value(&mut self) -> Option<Result<Value, ApplyError>> {
        loop {
            let document = self.inner.next()?;
            let value = match serde_yaml::Value::deserialize(document) {
                Ok(serde_yaml::Value::Null) => continue,
                Ok(value) => value,
                Err(err) => return Some(Err(ApplyError::Yaml(err))),
            };
            return Some(serde_json::to_value(value).map_err(ApplyError::Json));
        }
    }
}

impl Iterator for Documents<'_> {
    type Item = Result<DynamicObject, ApplyError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.next() {
                return Some(decode(item));
            }
            let mut value = match self.next_value()? {
                Ok(value) => value,
                Err(err) => return Some(Err(err)),
            };
            match value.get_mut("items").map(Value::take) {
                Some(Value::Array(items)) => self.pending = items.into_iter(),
                Some(other) => {
                    value["items"] = other;
                    return Some(decode(value));
                }
                None => return Some(decode(value)),
            }
        }
    }
}

fn decode(value: Value) -> Result<DynamicObject, ApplyError> {
    if value.is_null() {
        return Err(ApplyError::MissingTypeMeta);
    }
    let obj: DynamicObject = serde_json::from_value(value).map_err(ApplyError::Json)?;
    match &obj.types {
        Some(types) if !types.api_version.is_empty() && !types.kind.is_empty() => Ok(obj),
        _ => Err(ApplyError::MissingTypeMeta),
    }
}
