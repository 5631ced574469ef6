use crate::error::{codes, ErrorCategory};
use crate::intent::Intent;
use crate::types::Blocker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Static, versioned policy configuration.
///
/// Allow-lists use `None` for "unconstrained"; `Some` of an empty set
/// allows nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub policy_version: String,
    /// Production-like networks that need `confirmProduction=true`.
    pub guarded_networks: BTreeSet<String>,
    pub allowed_templates: Option<BTreeSet<String>>,
    pub allowed_networks: Option<BTreeSet<String>>,
    pub allowed_protocols: Option<BTreeSet<String>>,
    pub max_per_run_usd: Option<f64>,
    pub daily_limit_usd: Option<f64>,
    /// Autonomous runs need a configured cycle (id and interval).
    pub autonomous_cycle_required: bool,
    /// Autonomous runs need a prepared or active execute binding.
    pub execute_binding_required: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_version: "ledgergate-policy-v1".to_string(),
            guarded_networks: [
                "evm:mainnet",
                "solana:mainnet-beta",
                "sui:mainnet",
                "starknet:mainnet",
                "cosmos:cosmoshub-4",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            allowed_templates: None,
            allowed_networks: None,
            allowed_protocols: None,
            max_per_run_usd: Some(5_000.0),
            daily_limit_usd: None,
            autonomous_cycle_required: true,
            execute_binding_required: true,
        }
    }
}

impl PolicyConfig {
    pub fn is_guarded(&self, network: &str) -> bool {
        self.guarded_networks.contains(network)
    }
}

/// How the current run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// Started by a verifiable on-chain cycle transition.
    DeterministicCycle,
    #[default]
    Manual,
    External,
}

impl TriggerKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::DeterministicCycle => "deterministic-cycle",
            Self::Manual => "manual",
            Self::External => "external",
        }
    }
}

/// Readiness of the binding that lets unattended runs execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecuteBindingState {
    #[default]
    Missing,
    Prepared,
    Active,
    Revoked,
}

impl ExecuteBindingState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Prepared => "prepared",
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "missing" | "" => Some(Self::Missing),
            "prepared" => Some(Self::Prepared),
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    pub fn is_ready(self) -> bool {
        matches!(self, Self::Prepared | Self::Active)
    }
}

/// Autonomous-mode facts for one run. Absent when autonomous mode is off.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutonomousContext {
    pub cycle_id: Option<String>,
    pub cycle_interval_secs: Option<u64>,
    pub trigger: TriggerKind,
    pub binding: ExecuteBindingState,
}

/// Everything the guards look at.
#[derive(Debug, Clone)]
pub struct PolicyInput<'a> {
    pub intent: &'a Intent,
    pub confirm_production: bool,
    /// USD already spent by successful executions today.
    pub spent_today_usd: f64,
    pub autonomous: Option<&'a AutonomousContext>,
}

/// Aggregated guard outcome. `blockers` is empty exactly when `allowed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub allowed: bool,
    pub policy_version: String,
    pub blockers: Vec<Blocker>,
    pub actions: Vec<String>,
}

/// One independent policy check.
pub trait PolicyGuard: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, input: &PolicyInput<'_>, config: &PolicyConfig) -> Vec<Blocker>;
}

/// Production-like networks require an explicit production confirmation.
#[derive(Debug, Default)]
pub struct NetworkGuard;

impl PolicyGuard for NetworkGuard {
    fn name(&self) -> &'static str {
        "network"
    }

    fn evaluate(&self, input: &PolicyInput<'_>, config: &PolicyConfig) -> Vec<Blocker> {
        let network = &input.intent.network;
        if !config.is_guarded(network) || input.confirm_production {
            return Vec::new();
        }
        vec![Blocker::new(
            codes::PRODUCTION_CONFIRMATION_REQUIRED,
            ErrorCategory::Confirmation,
            format!("{network} is a production network and confirmProduction is not set"),
            "re-submit with confirmProduction=true (CLI: --confirm-production)",
        )]
    }
}

/// Per-run and daily USD limits. Unpriced intents fail closed.
#[derive(Debug, Default)]
pub struct SpendCapGuard;

impl PolicyGuard for SpendCapGuard {
    fn name(&self) -> &'static str {
        "spend-cap"
    }

    fn evaluate(&self, input: &PolicyInput<'_>, config: &PolicyConfig) -> Vec<Blocker> {
        if config.max_per_run_usd.is_none() && config.daily_limit_usd.is_none() {
            return Vec::new();
        }

        let Some(requested) = input.intent.amount_usd() else {
            return vec![Blocker::new(
                codes::SPEND_CAP_UNPRICED,
                ErrorCategory::Policy,
                "intent has no amountUsd, so spend caps cannot be checked",
                "include amountUsd in the intent fields",
            )];
        };

        let mut violations = Vec::new();
        let mut remediation = Vec::new();
        if let Some(max) = config.max_per_run_usd {
            if requested > max {
                violations.push(format!(
                    "requested {requested:.2} USD exceeds maxPerRunUsd {max:.2} USD"
                ));
                remediation.push(format!(
                    "lower amountUsd to at most {max:.2} or raise maxPerRunUsd in policy {}",
                    config.policy_version
                ));
            }
        }
        if let Some(daily) = config.daily_limit_usd {
            let total = input.spent_today_usd + requested;
            if total > daily {
                violations.push(format!(
                    "requested {requested:.2} USD plus {:.2} USD already spent today exceeds dailyLimitUsd {daily:.2} USD",
                    input.spent_today_usd
                ));
                remediation.push(format!(
                    "wait for the next UTC day or raise dailyLimitUsd in policy {}",
                    config.policy_version
                ));
            }
        }

        if violations.is_empty() {
            return Vec::new();
        }
        vec![Blocker::new(
            codes::SPEND_CAP_EXCEEDED,
            ErrorCategory::Policy,
            violations.join("; "),
            remediation.join("; "),
        )]
    }
}

/// Template, network and protocol must all be on their allow-lists.
#[derive(Debug, Default)]
pub struct AllowListGuard;

impl PolicyGuard for AllowListGuard {
    fn name(&self) -> &'static str {
        "allow-list"
    }

    fn evaluate(&self, input: &PolicyInput<'_>, config: &PolicyConfig) -> Vec<Blocker> {
        let intent = input.intent;
        let mut violations = Vec::new();
        let mut fixes = Vec::new();

        let mut check = |list: &Option<BTreeSet<String>>, key: &str, value: &str, what: &str| {
            if let Some(allowed) = list {
                if !allowed.contains(value) {
                    violations.push(format!("{what} '{value}' is not allowed"));
                    fixes.push(format!("add '{value}' to {key}"));
                }
            }
        };

        check(
            &config.allowed_templates,
            "allowedTemplates",
            intent.kind.name(),
            "template",
        );
        check(&config.allowed_networks, "allowedNetworks", &intent.network, "network");
        if let Some(destination) = intent.destination_network() {
            check(
                &config.allowed_networks,
                "allowedNetworks",
                destination,
                "destination network",
            );
        }
        if let Some(protocol) = intent.protocol() {
            check(&config.allowed_protocols, "allowedProtocols", protocol, "protocol");
        }

        if violations.is_empty() {
            return Vec::new();
        }
        vec![Blocker::new(
            codes::ALLOWLIST_VIOLATION,
            ErrorCategory::Policy,
            violations.join("; "),
            format!(
                "{} in policy {}, or choose an allowed alternative",
                fixes.join(", "),
                config.policy_version
            ),
        )]
    }
}

/// Unattended runs: cycle configured, deterministic trigger only, execute
/// binding ready. Each failing condition is reported separately.
#[derive(Debug, Default)]
pub struct AutonomousTriggerGuard;

impl PolicyGuard for AutonomousTriggerGuard {
    fn name(&self) -> &'static str {
        "autonomous-trigger"
    }

    fn evaluate(&self, input: &PolicyInput<'_>, config: &PolicyConfig) -> Vec<Blocker> {
        let Some(autonomous) = input.autonomous else {
            return Vec::new();
        };
        let mut blockers = Vec::new();

        let cycle_configured = autonomous
            .cycle_id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
            && autonomous.cycle_interval_secs.unwrap_or(0) > 0;
        if config.autonomous_cycle_required && !cycle_configured {
            blockers.push(Blocker::new(
                codes::AUTONOMOUS_CYCLE_CONFIG_MISSING,
                ErrorCategory::Policy,
                "autonomous mode is on but no cycle id and positive interval are configured",
                "set LEDGERGATE_AUTONOMOUS_CYCLE_ID and LEDGERGATE_AUTONOMOUS_CYCLE_INTERVAL_SECS (> 0)",
            ));
        }

        if autonomous.trigger != TriggerKind::DeterministicCycle {
            blockers.push(Blocker::new(
                codes::AUTONOMOUS_EXTERNAL_TRIGGER_BLOCKED,
                ErrorCategory::Policy,
                format!(
                    "autonomous runs cannot be started by a '{}' trigger",
                    autonomous.trigger.name()
                ),
                format!(
                    "start autonomous runs only with trigger '{}' and a verifiable cycle proof",
                    TriggerKind::DeterministicCycle.name()
                ),
            ));
        }

        if config.execute_binding_required && !autonomous.binding.is_ready() {
            blockers.push(Blocker::new(
                codes::AUTONOMOUS_EXECUTE_BINDING_NOT_READY,
                ErrorCategory::Policy,
                format!(
                    "execute binding is '{}', expected 'prepared' or 'active'",
                    autonomous.binding.name()
                ),
                "set LEDGERGATE_EXECUTE_BINDING_STATE to 'prepared' or 'active' once the binding is provisioned",
            ));
        }

        blockers
    }
}

/// Runs every guard on every request and ANDs the results.
pub struct PolicyEngine {
    config: PolicyConfig,
    guards: Vec<Box<dyn PolicyGuard>>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            guards: vec![
                Box::new(NetworkGuard),
                Box::new(SpendCapGuard),
                Box::new(AllowListGuard),
                Box::new(AutonomousTriggerGuard),
            ],
        }
    }

    pub fn with_guard(mut self, guard: Box<dyn PolicyGuard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn evaluate(&self, input: &PolicyInput<'_>) -> PolicyDecision {
        let mut blockers = Vec::new();
        for guard in &self.guards {
            let found = guard.evaluate(input, &self.config);
            debug!(guard = guard.name(), blockers = found.len(), "policy guard evaluated");
            blockers.extend(found);
        }

        let allowed = blockers.is_empty();
        info!(
            policy_version = %self.config.policy_version,
            network = %input.intent.network,
            allowed,
            blockers = blockers.len(),
            "policy evaluated"
        );

        PolicyDecision {
            allowed,
            policy_version: self.config.policy_version.clone(),
            actions: suggested_actions(&blockers),
            blockers,
        }
    }
}

fn suggested_actions(blockers: &[Blocker]) -> Vec<String> {
    let mut actions = BTreeSet::new();
    for blocker in blockers {
        let action = match blocker.code.as_str() {
            codes::PRODUCTION_CONFIRMATION_REQUIRED => "confirm-production",
            codes::SPEND_CAP_EXCEEDED => "reduce-amount",
            codes::SPEND_CAP_UNPRICED => "price-intent",
            codes::ALLOWLIST_VIOLATION => "request-allowlist-update",
            codes::AUTONOMOUS_CYCLE_CONFIG_MISSING => "configure-autonomous-cycle",
            codes::AUTONOMOUS_EXTERNAL_TRIGGER_BLOCKED => "use-deterministic-trigger",
            codes::AUTONOMOUS_EXECUTE_BINDING_NOT_READY => "prepare-execute-binding",
            _ => "review-blocker",
        };
        actions.insert(action.to_string());
    }
    actions.into_iter().collect()
}
