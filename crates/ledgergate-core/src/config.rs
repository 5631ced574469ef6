use crate::confirm::DEFAULT_TOKEN_TTL_SECS;
use crate::policy::{AutonomousContext, ExecuteBindingState, TriggerKind};
use crate::storage::StorageConfig;
use std::time::Duration;

/// Unattended-operation settings, usually sourced from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutonomousSettings {
    pub enabled: bool,
    pub cycle_id: Option<String>,
    pub cycle_interval_secs: Option<u64>,
    pub execute_binding: ExecuteBindingState,
}

impl AutonomousSettings {
    /// Guard input for one run, or `None` when autonomous mode is off.
    pub fn context(&self, trigger: TriggerKind) -> Option<AutonomousContext> {
        self.enabled.then(|| AutonomousContext {
            cycle_id: self.cycle_id.clone(),
            cycle_interval_secs: self.cycle_interval_secs,
            trigger,
            binding: self.execute_binding,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub token_ttl_secs: i64,
    pub read_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub storage: StorageConfig,
    pub autonomous: AutonomousSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            read_timeout: Duration::from_secs(8),
            broadcast_timeout: Duration::from_secs(20),
            storage: StorageConfig::Memory,
            autonomous: AutonomousSettings::default(),
        }
    }
}
