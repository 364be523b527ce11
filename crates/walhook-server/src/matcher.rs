//! Event matcher
//!
//! Maps a change event to the active registrations for its
//! `(schema, table, operation)` identity. Most changes match nothing;
//! callers must short-circuit on an empty result instead of invoking the
//! dispatch engine.

use crate::registry::error::Result;
use crate::registry::{Hook, HookStore};
use walhook_cdc::ChangeEvent;

#[derive(Clone)]
pub struct Matcher {
    store: HookStore,
}

impl Matcher {
    pub fn new(store: HookStore) -> Self {
        Self { store }
    }

    /// Active hooks whose (schema, table, event) equal the change's
    /// identity. The operation is compared by its SQL spelling, which is
    /// what registrations store as `event_name`.
    pub async fn matches_for(&self, event: &ChangeEvent) -> Result<Vec<Hook>> {
        self.store
            .find_matching(&event.schema, &event.table, event.op.as_str())
            .await
    }
}
