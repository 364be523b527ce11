//! # walhook-server: CDC-to-webhook bridge service
//!
//! Wires the [`walhook_cdc`] subscriber to registered HTTP webhooks:
//!
//! ```text
//! ┌────────────┐    ┌────────────┐    ┌─────────┐    ┌──────────────┐
//! │ PostgreSQL │───▶│ Subscriber │───▶│ Matcher │───▶│  Dispatch    │
//! │  WAL slot  │    │ (cdc)      │    │         │    │  Engine      │
//! └────────────┘    └────────────┘    └────┬────┘    └──────┬───────┘
//!       ▲                                  │                │ sign,
//!       │ reconcile publications /         │ registry       │ POST,
//!       │ replica identity / slot          ▼ lookups        ▼ retry
//! ┌─────┴──────────────────────────────────────────────────────────┐
//! │            shared pool: hooks, logs, reconciliation            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-most-once from the slot's perspective: positions are
//! acknowledged before dispatch completes. Attempts are audited in
//! `webhook.logs`; terminal delivery failures never stall the stream.

pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod matcher;
pub mod pipeline;
pub mod reconcile;
pub mod registry;

pub use config::Settings;
pub use matcher::Matcher;
pub use reconcile::Reconciler;
