//! kwatch core library: object model, resource kinds, local store, errors.
//!
//! Public API surface:
//! - [`types`]: keys, version tokens, records, change events, resource kinds
//! - [`store`]: the thread-safe local mirror of the watched collection
//! - [`error`]: [`CoreError`]

pub mod error;
pub mod store;
pub mod types;

pub use error::CoreError;
pub use store::Store;
pub use types::{ChangeEvent, ObjectKey, ObjectRecord, ResourceKind, Scope, VersionToken};
