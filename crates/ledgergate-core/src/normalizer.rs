use crate::error::{codes, LedgerGateError};
use crate::intent::{normalize_amount, FieldKind, FieldSpec, Intent, IntentKind, NetworkId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Caller-supplied intent before validation.
///
/// Template fields sit next to the kind, e.g.
/// `{"type": "transfer.native", "to": "0x..", "amountNative": 1}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentInput {
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl IntentInput {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn from_hint(hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Candidate values pulled out of a free-text hint.
///
/// Candidates are never trusted directly; they only fill template slots that
/// the typed path then validates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintCandidates {
    pub kind: Option<IntentKind>,
    pub identifiers: Vec<String>,
    pub amounts: Vec<String>,
    pub amount_usd: Option<String>,
    pub protocol: Option<String>,
    pub networks: Vec<String>,
}

/// Extract candidate fields from free text. Pure and deterministic.
pub fn parse_hint(hint: &str) -> HintCandidates {
    let words: Vec<String> = hint
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| matches!(c, ',' | ';' | '(' | ')' | '"' | '\'' | '!' | '?'))
                .trim_end_matches('.')
                .to_string()
        })
        .filter(|word| !word.is_empty())
        .collect();
    let lower: Vec<String> = words.iter().map(|w| w.to_ascii_lowercase()).collect();

    let mut candidates = HintCandidates {
        kind: hint_kind(&lower),
        ..HintCandidates::default()
    };

    for (index, word) in words.iter().enumerate() {
        let next = lower.get(index + 1).map(String::as_str);

        if network_re().is_match(&lower[index]) {
            push_unique(&mut candidates.networks, lower[index].clone());
            continue;
        }

        if let Some(amount) = word.strip_prefix('$') {
            if candidates.amount_usd.is_none() {
                candidates.amount_usd = normalize_amount(amount);
            }
            continue;
        }

        if amount_re().is_match(word) {
            if matches!(next, Some("usd" | "dollars")) {
                if candidates.amount_usd.is_none() {
                    candidates.amount_usd = normalize_amount(word);
                }
            } else if let Some(amount) = normalize_amount(word) {
                candidates.amounts.push(amount);
            }
            continue;
        }

        if identifier_re().is_match(word) {
            push_unique(&mut candidates.identifiers, word.clone());
            continue;
        }

        if matches!(lower[index].as_str(), "on" | "via" | "using" | "through")
            && candidates.protocol.is_none()
        {
            if let Some(name) = next.filter(|name| protocol_re().is_match(name)) {
                candidates.protocol = Some(name.to_string());
            }
        }
    }

    candidates
}

fn hint_kind(words: &[String]) -> Option<IntentKind> {
    let has = |needle: &str| words.iter().any(|w| w == needle);
    if has("bridge") {
        Some(IntentKind::BridgeTransfer)
    } else if has("liquidity") && has("remove") {
        Some(IntentKind::LiquidityRemove)
    } else if has("liquidity") {
        Some(IntentKind::LiquidityAdd)
    } else if has("supply") || has("deposit") || has("lend") {
        Some(IntentKind::LendingSupply)
    } else if has("withdraw") {
        Some(IntentKind::LendingWithdraw)
    } else if has("borrow") {
        Some(IntentKind::LendingBorrow)
    } else if has("repay") {
        Some(IntentKind::LendingRepay)
    } else if has("send") || has("transfer") || has("pay") {
        Some(IntentKind::TransferNative)
    } else {
        None
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Turns [`IntentInput`] into a canonical [`Intent`].
///
/// Structured fields always win. Hint candidates only fill required slots
/// (plus `amountUsd`) and are resolved by excluding values already assigned;
/// anything still ambiguous is reported as a missing field.
#[derive(Debug, Clone, Default)]
pub struct IntentNormalizer;

impl IntentNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, network: &str, input: &IntentInput) -> Result<Intent, LedgerGateError> {
        let network = NetworkId::parse(network)?;
        let hints = input.hint.as_deref().map(parse_hint).unwrap_or_default();
        let kind = resolve_kind(input, &hints)?;

        let mut fields = BTreeMap::new();
        for (name, value) in &input.fields {
            if value.is_null() {
                continue;
            }
            let spec = kind.field_spec(name).ok_or_else(|| {
                LedgerGateError::input(
                    codes::UNKNOWN_FIELD,
                    format!("field '{name}' is not part of {kind}"),
                )
            })?;
            let raw = value_to_string(value).ok_or_else(|| invalid_field(spec, &network))?;
            let canonical = validate_field(&network, spec, &raw)?;
            fields.insert(name.clone(), canonical);
        }

        for spec in kind.template() {
            if fields.contains_key(spec.name) {
                continue;
            }
            if !spec.required && spec.name != "amountUsd" {
                continue;
            }
            match hint_value(spec, &hints, &fields, &network)? {
                Some(raw) => {
                    let canonical = validate_field(&network, *spec, &raw)?;
                    debug!(field = spec.name, value = %canonical, "filled field from hint");
                    fields.insert(spec.name.to_string(), canonical);
                }
                None if spec.required => {
                    return Err(LedgerGateError::missing_field(spec.name, kind.name()));
                }
                None => {}
            }
        }

        Ok(Intent::new(&network, kind, fields))
    }
}

fn resolve_kind(input: &IntentInput, hints: &HintCandidates) -> Result<IntentKind, LedgerGateError> {
    if let Some(raw) = &input.kind {
        return IntentKind::parse(raw).ok_or_else(|| {
            LedgerGateError::input(
                codes::UNKNOWN_INTENT_KIND,
                format!("unknown intent type '{raw}'"),
            )
        });
    }
    match hints.kind {
        Some(IntentKind::TransferNative)
            if input.fields.contains_key("token") || input.fields.contains_key("amount") =>
        {
            Ok(IntentKind::TransferToken)
        }
        Some(kind) => Ok(kind),
        None => Err(LedgerGateError::missing_field("type", "intent")),
    }
}

fn hint_value(
    spec: &FieldSpec,
    hints: &HintCandidates,
    assigned: &BTreeMap<String, String>,
    network: &NetworkId,
) -> Result<Option<String>, LedgerGateError> {
    if spec.name == "amountUsd" {
        return Ok(hints.amount_usd.clone());
    }

    let taken = |value: &String| assigned.values().any(|existing| existing == value);
    let family = network.family;
    let candidates: Vec<String> = match spec.kind {
        FieldKind::Address => hints
            .identifiers
            .iter()
            .filter_map(|raw| family.canonical_address(raw))
            .filter(|value| !taken(value))
            .collect(),
        FieldKind::Contract => hints
            .identifiers
            .iter()
            .filter_map(|raw| family.canonical_contract(raw))
            .filter(|value| !taken(value))
            .collect(),
        FieldKind::Amount => hints
            .amounts
            .iter()
            .filter(|value| !taken(value))
            .cloned()
            .collect(),
        FieldKind::Network => {
            let own = network.to_string();
            hints
                .networks
                .iter()
                .filter(|value| **value != own && !taken(value))
                .cloned()
                .collect()
        }
        FieldKind::Text => hints.protocol.iter().cloned().collect(),
    };

    let mut unique: Vec<String> = Vec::new();
    for candidate in candidates {
        push_unique(&mut unique, candidate);
    }

    match unique.len() {
        0 => Ok(None),
        1 => Ok(unique.pop()),
        n => Err(LedgerGateError::input(
            codes::MISSING_FIELD,
            format!(
                "missing required field '{}': hint is ambiguous ({n} candidates), supply it explicitly",
                spec.name
            ),
        )),
    }
}

fn validate_field(network: &NetworkId, spec: FieldSpec, raw: &str) -> Result<String, LedgerGateError> {
    let family = network.family;
    let canonical = match spec.kind {
        FieldKind::Address => family.canonical_address(raw),
        FieldKind::Contract => family.canonical_contract(raw),
        FieldKind::Amount => normalize_amount(raw),
        FieldKind::Network => NetworkId::parse(raw)
            .ok()
            .filter(|destination| destination != network)
            .map(|destination| destination.to_string()),
        FieldKind::Text => {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.len() > 128 {
                None
            } else if spec.name == "protocol" {
                Some(trimmed.to_ascii_lowercase())
            } else {
                Some(trimmed.to_string())
            }
        }
    };
    canonical.ok_or_else(|| invalid_field(spec, network))
}

fn invalid_field(spec: FieldSpec, network: &NetworkId) -> LedgerGateError {
    let expected = match spec.kind {
        FieldKind::Address => format!("a valid {} address", network.family),
        FieldKind::Contract => format!("a valid {} token or contract id", network.family),
        FieldKind::Amount => "a positive finite decimal amount".to_string(),
        FieldKind::Network => format!("a '<family>:<chain>' network other than {network}"),
        FieldKind::Text => "non-empty text of at most 128 characters".to_string(),
    };
    LedgerGateError::input(
        codes::INVALID_FIELD,
        format!("field '{}' must be {expected}", spec.name),
    )
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Some(v.to_string())
            } else if let Some(v) = n.as_i64() {
                Some(v.to_string())
            } else {
                n.as_f64().filter(|v| v.is_finite()).map(|v| format!("{v}"))
            }
        }
        _ => None,
    }
}

fn network_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:evm|solana|sui|starknet|cosmos):[a-z0-9][a-z0-9._-]*$")
            .expect("network regex must compile")
    })
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,30}(?:\.\d+)?$").expect("amount regex must compile"))
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:0x[0-9a-fA-F]{1,64}(?:::[A-Za-z_][A-Za-z0-9_]*::[A-Za-z_][A-Za-z0-9_]*)?|[1-9A-HJ-NP-Za-km-z]{32,44}|[a-z]{1,83}1[02-9ac-hj-np-z]{38,58}|ibc/[0-9A-F]{64}|factory/[a-z0-9]+/[A-Za-z0-9._-]+)$",
        )
        .expect("identifier regex must compile")
    })
}

fn protocol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]{1,31}$").expect("protocol regex must compile"))
}
