//! Externally supplied fault mechanisms
//!
//! `FaultType::Custom(name)` dispatches to a [`CustomFaultMechanism`]
//! registered under `name` in the injector factory.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use domain::FailureConfig;
#[cfg(test)]
use mockall::automock;

/// A fault mechanism provided by the embedding application
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CustomFaultMechanism: Send + Sync {
    /// Apply the fault; the error text is captured on the injection result
    async fn apply(&self, config: &FailureConfig, target: Option<String>) -> Result<(), String>;

    /// Reverse the fault; `true` on success
    async fn recover(&self) -> bool;
}

impl fmt::Debug for dyn CustomFaultMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomFaultMechanism")
    }
}

/// Named custom mechanisms
#[derive(Clone, Default)]
pub struct CustomMechanisms {
    mechanisms: HashMap<String, Arc<dyn CustomFaultMechanism>>,
}

impl fmt::Debug for CustomMechanisms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.mechanisms.keys().collect();
        names.sort();
        f.debug_struct("CustomMechanisms")
            .field("names", &names)
            .finish()
    }
}

impl CustomMechanisms {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `mechanism` under `name`, replacing any previous one
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, mechanism: Arc<dyn CustomFaultMechanism>) -> Self {
        self.mechanisms.insert(name.into(), mechanism);
        self
    }

    /// Mechanism registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomFaultMechanism>> {
        self.mechanisms.get(name).map(Arc::clone)
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty()
    }
}
