//! Notifier adapters
//!
//! Registered on the notification hub under a channel name.

mod log_notifier;
mod webhook_notifier;

pub use log_notifier::LogNotifier;
pub use webhook_notifier::{WebhookConfig, WebhookError, WebhookNotifier};
