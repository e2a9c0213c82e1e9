use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};

use super::heartbeat::Heartbeat;
use super::tailscale_ping::TailscalePingChecker;
use super::tcp::TcpChecker;
use crate::database::models::Monitor;
use crate::error::CheckError;

/// Checker trait implemented once per probing protocol.
///
/// A successful check mutates the supplied heartbeat in place (status,
/// message, optional latency); every other outcome is a `CheckError`
/// raised to the caller. Implementations hold no per-invocation state
/// outside the heartbeat, so one long-lived instance serves concurrent
/// checks for different monitors.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat)
    -> Result<(), CheckError>;
}

/// Flat mapping from check-type identifier to its single long-lived
/// checker instance. Populated once during process initialization; an
/// unknown identifier is a configuration error and the process must
/// not start scheduling against it.
pub struct CheckerRegistry {
    checkers: HashMap<String, Arc<dyn Checker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self { checkers: HashMap::new() }
    }

    /// Registry with every built-in protocol checker registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("tailscale-ping", Arc::new(TailscalePingChecker::new()));
        registry.register("tcp", Arc::new(TcpChecker::new()));
        registry
    }

    pub fn register(&mut self, check_type: impl Into<String>, checker: Arc<dyn Checker>) {
        self.checkers.insert(check_type.into(), checker);
    }

    pub fn get(&self, check_type: &str) -> Result<Arc<dyn Checker>> {
        match self.checkers.get(check_type) {
            Some(checker) => Ok(checker.clone()),
            None => bail!("no checker registered for check type {check_type:?}"),
        }
    }

    pub fn contains(&self, check_type: &str) -> bool {
        self.checkers.contains_key(check_type)
    }
}

impl Default for CheckerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_known_types() {
        let registry = CheckerRegistry::builtin();
        assert!(registry.contains("tailscale-ping"));
        assert!(registry.contains("tcp"));
        assert!(registry.get("tailscale-ping").is_ok());
    }

    #[test]
    fn unknown_check_type_fails_loudly() {
        let registry = CheckerRegistry::builtin();
        let err = registry.get("gopher").err().expect("unknown type must fail");
        assert!(err.to_string().contains("gopher"));
    }
}
