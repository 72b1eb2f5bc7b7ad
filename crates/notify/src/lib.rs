//! Webhook notification adapter for the custos ledger engine.
//!
//! Implements the `Notifier` port by POSTing
//! `{"tenant_id": .., "events": [..]}` to each tenant's callback URL.
//! Any 2xx answer acknowledges the whole batch.

mod webhook;

pub use webhook::{WebhookConfig, WebhookNotifier};
