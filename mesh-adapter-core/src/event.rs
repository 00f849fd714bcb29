//! Status events published by an adapter while it works on an operation.
use serde::{Deserialize, Serialize};

use crate::diagnosis::Diagnose;

/// The severity of an [`Event`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Progress report, nothing to worry about.
    #[default]
    Info,
    /// Something did not go as planned but the operation continued.
    Warning,
    /// The operation failed.
    Error,
}

/// A status update for one operation.
///
/// ```rust
/// use mesh_adapter_core::{Event, EventKind};
///
/// let ev = Event::info("op-1", "Installing", "Applied 3 documents")
///     .component("adapter", "sample-adapter");
/// assert_eq!(ev.kind, EventKind::Info);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The operation this event reports on.
    pub operation_id: String,
    /// Severity.
    pub kind: EventKind,
    /// Short human readable summary.
    pub summary: String,
    /// Longer human readable details.
    pub details: String,
    /// Stable error code, set on error events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Probable cause, set on error events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probable_cause: Option<String>,
    /// Suggested remediation, set on error events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_remediation: Option<String>,
    /// The kind of component emitting the event, e.g. `adapter`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// The name of the component emitting the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
}

impl Event {
    /// An informational event.
    pub fn info(operation_id: impl Into<String>, summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            kind: EventKind::Info,
            summary: summary.into(),
            details: details.into(),
            ..Default::default()
        }
    }

    /// An error event carrying the diagnosis of `err`.
    ///
    /// The details are set to the error's display output.
    pub fn error<E: Diagnose + ?Sized>(
        operation_id: impl Into<String>,
        summary: impl Into<String>,
        err: &E,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            kind: EventKind::Error,
            summary: summary.into(),
            details: err.to_string(),
            ..Default::default()
        }
        .with_diagnosis(err)
    }

    /// Mark this event as an error and attach the diagnosis of `err`.
    #[must_use]
    pub fn with_diagnosis<E: Diagnose + ?Sized>(mut self, err: &E) -> Self {
        let diagnosis = err.diagnosis();
        self.kind = EventKind::Error;
        self.error_code = Some(diagnosis.code.to_string());
        self.probable_cause = Some(diagnosis.probable_cause.to_string());
        self.suggested_remediation = Some(diagnosis.suggested_remediation.to_string());
        self
    }

    /// Attach the emitting component.
    #[must_use]
    pub fn component(mut self, component: impl Into<String>, name: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self.component_name = Some(name.into());
        self
    }

    /// Whether this is an error event.
    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Error
    }
}
