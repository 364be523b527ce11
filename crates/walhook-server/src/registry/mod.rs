//! Webhook registry
//!
//! CRUD store for webhook registrations plus the lookup used by the event
//! matcher. Registrations are validated against the configured schema
//! allow-list and against publication membership at write time.

pub mod error;
pub mod model;
pub mod store;

pub use error::RegistryError;
pub use model::{Hook, HookFilter, HookUpdate, NewHook, EVENT_NAMES};
pub use store::HookStore;
