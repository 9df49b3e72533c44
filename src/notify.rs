//! Fire-and-forget notification collaborator: transient toasts and
//! validation alerts. The engine never waits on delivery.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

impl Default for ToastLevel {
    fn default() -> Self {
        ToastLevel::Info
    }
}

pub trait Notifier: Send + Sync {
    fn toast(&self, level: ToastLevel, message: &str);

    fn alert(&self, message: &str);
}

/// Default collaborator: surfaces notifications on the log stream.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn toast(&self, level: ToastLevel, message: &str) {
        match level {
            ToastLevel::Error => warn!(target: "botflow::toast", %message, "toast"),
            ToastLevel::Info | ToastLevel::Success => {
                info!(target: "botflow::toast", %message, ?level, "toast")
            }
        }
    }

    fn alert(&self, message: &str) {
        warn!(target: "botflow::alert", %message, "alert");
    }
}
