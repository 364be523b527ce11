//! Change pipeline
//!
//! Drains the subscriber's event channel, looks up matching registrations,
//! and hands matched events to the dispatch engine. The subscriber has
//! already acknowledged each event's WAL position by the time it arrives
//! here, so nothing in this path may block the stream: dispatch is
//! fire-and-forget and lookup failures only cost that one event.

use crate::dispatch::DispatchEngine;
use crate::matcher::Matcher;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use walhook_cdc::{format_lsn, ChangeEvent};

/// Run until the subscriber side closes the channel.
pub async fn run(
    mut events: mpsc::Receiver<ChangeEvent>,
    matcher: Matcher,
    engine: Arc<DispatchEngine>,
) {
    while let Some(event) = events.recv().await {
        match matcher.matches_for(&event).await {
            Ok(hooks) if hooks.is_empty() => {
                // the common case: no registration cares about this change
                debug!(
                    "No webhooks for {} on {}.{}",
                    event.op, event.schema, event.table
                );
            }
            Ok(hooks) => {
                info!(
                    "Dispatching {} on {}.{} at {} to {} webhook(s)",
                    event.op,
                    event.schema,
                    event.table,
                    format_lsn(event.lsn),
                    hooks.len()
                );
                // handles are dropped: deliveries run detached with their
                // own retry schedules
                let _ = engine.dispatch(&event, hooks);
            }
            Err(e) => {
                error!(
                    "Webhook lookup failed for {} on {}.{}: {}",
                    event.op, event.schema, event.table, e
                );
            }
        }
    }

    info!("Change stream closed; pipeline stopped");
}
