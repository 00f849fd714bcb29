//! Runtime services shared by mesh adapters.
//!
//! - [`events`]: the [`EventBus`] that fans operation events out to every listener.
//! - [`registrant`]: reliable registration of capability definitions with a registry.
//! - [`definitions`]: discovery of the definitions shipped with an adapter.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod definitions;
pub mod events;
pub mod registrant;

pub use definitions::{definition_paths, VersionRegistry};
pub use events::{EventBus, EventBusConfig, Subscription};
pub use registrant::{DefinitionPath, Registrant, RetryPolicy};
