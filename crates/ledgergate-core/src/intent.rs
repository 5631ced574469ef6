use crate::error::{codes, LedgerGateError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Ledger families with their own address and transaction-hash formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerFamily {
    Evm,
    Solana,
    Sui,
    Starknet,
    Cosmos,
}

impl LedgerFamily {
    pub const ALL: [LedgerFamily; 5] = [
        LedgerFamily::Evm,
        LedgerFamily::Solana,
        LedgerFamily::Sui,
        LedgerFamily::Starknet,
        LedgerFamily::Cosmos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Solana => "solana",
            Self::Sui => "sui",
            Self::Starknet => "starknet",
            Self::Cosmos => "cosmos",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(value.trim()))
    }

    /// Validate an account address and return its canonical spelling.
    pub fn canonical_address(self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        match self {
            Self::Evm if evm_address_re().is_match(raw) => Some(raw.to_ascii_lowercase()),
            Self::Solana if base58_re(32, 44).is_match(raw) => Some(raw.to_string()),
            Self::Sui if sui_address_re().is_match(raw) => Some(raw.to_ascii_lowercase()),
            Self::Starknet if felt_re().is_match(raw) => Some(pad_felt(raw)),
            Self::Cosmos if bech32_re().is_match(&raw.to_ascii_lowercase()) => {
                Some(raw.to_ascii_lowercase())
            }
            _ => None,
        }
    }

    /// Validate a token/contract/pool identifier and return its canonical spelling.
    pub fn canonical_contract(self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        match self {
            Self::Sui if sui_type_re().is_match(raw) => {
                let (address, rest) = raw.split_once("::")?;
                Some(format!("{}::{}", address.to_ascii_lowercase(), rest))
            }
            Self::Cosmos if cosmos_denom_re().is_match(raw) => Some(raw.to_string()),
            _ => self.canonical_address(raw),
        }
    }

    /// Whether `raw` is a transaction hash in this family's canonical format.
    pub fn is_tx_hash(self, raw: &str) -> bool {
        match self {
            Self::Evm => evm_tx_re().is_match(raw),
            Self::Solana => base58_re(86, 88).is_match(raw),
            Self::Sui => base58_re(43, 44).is_match(raw),
            Self::Starknet => felt_re().is_match(raw),
            Self::Cosmos => cosmos_tx_re().is_match(raw),
        }
    }

    pub fn tx_hash_format(self) -> &'static str {
        match self {
            Self::Evm => "0x-prefixed 64 hex characters",
            Self::Solana => "base58 signature of 86-88 characters",
            Self::Sui => "base58 digest of 43-44 characters",
            Self::Starknet => "0x-prefixed felt of 1-64 hex characters",
            Self::Cosmos => "64 hex characters",
        }
    }
}

impl fmt::Display for LedgerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network identifier in `family:chain` form, e.g. `evm:mainnet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkId {
    pub family: LedgerFamily,
    pub chain: String,
}

impl NetworkId {
    pub fn parse(raw: &str) -> Result<Self, LedgerGateError> {
        let raw = raw.trim();
        let invalid = || {
            LedgerGateError::input(
                codes::INVALID_NETWORK,
                format!("network '{raw}' must look like '<family>:<chain>', e.g. 'evm:mainnet'"),
            )
        };
        let (family, chain) = raw.split_once(':').ok_or_else(invalid)?;
        let family = LedgerFamily::parse(family).ok_or_else(invalid)?;
        let chain = chain.to_ascii_lowercase();
        if !chain_re().is_match(&chain) {
            return Err(invalid());
        }
        Ok(Self { family, chain })
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.chain)
    }
}

/// How a template field is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Address,
    Contract,
    Amount,
    Network,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const TRANSFER_NATIVE: &[FieldSpec] = &[
    req("to", FieldKind::Address),
    req("amountNative", FieldKind::Amount),
    opt("amountUsd", FieldKind::Amount),
    opt("memo", FieldKind::Text),
];

const TRANSFER_TOKEN: &[FieldSpec] = &[
    req("token", FieldKind::Contract),
    req("to", FieldKind::Address),
    req("amount", FieldKind::Amount),
    opt("amountUsd", FieldKind::Amount),
    opt("memo", FieldKind::Text),
];

const LENDING: &[FieldSpec] = &[
    req("protocol", FieldKind::Text),
    req("asset", FieldKind::Contract),
    req("amount", FieldKind::Amount),
    opt("amountUsd", FieldKind::Amount),
    opt("onBehalfOf", FieldKind::Address),
];

const LIQUIDITY_ADD: &[FieldSpec] = &[
    req("protocol", FieldKind::Text),
    req("tokenA", FieldKind::Contract),
    req("tokenB", FieldKind::Contract),
    req("amountA", FieldKind::Amount),
    req("amountB", FieldKind::Amount),
    opt("amountUsd", FieldKind::Amount),
];

const LIQUIDITY_REMOVE: &[FieldSpec] = &[
    req("protocol", FieldKind::Text),
    req("pool", FieldKind::Contract),
    req("amount", FieldKind::Amount),
    opt("amountUsd", FieldKind::Amount),
];

const BRIDGE_TRANSFER: &[FieldSpec] = &[
    req("protocol", FieldKind::Text),
    req("destinationNetwork", FieldKind::Network),
    req("asset", FieldKind::Contract),
    req("to", FieldKind::Address),
    req("amount", FieldKind::Amount),
    opt("amountUsd", FieldKind::Amount),
];

/// Supported intent templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntentKind {
    #[serde(rename = "transfer.native")]
    TransferNative,
    #[serde(rename = "transfer.token")]
    TransferToken,
    #[serde(rename = "lending.supply")]
    LendingSupply,
    #[serde(rename = "lending.withdraw")]
    LendingWithdraw,
    #[serde(rename = "lending.borrow")]
    LendingBorrow,
    #[serde(rename = "lending.repay")]
    LendingRepay,
    #[serde(rename = "liquidity.add")]
    LiquidityAdd,
    #[serde(rename = "liquidity.remove")]
    LiquidityRemove,
    #[serde(rename = "bridge.transfer")]
    BridgeTransfer,
}

impl IntentKind {
    pub const ALL: [IntentKind; 9] = [
        IntentKind::TransferNative,
        IntentKind::TransferToken,
        IntentKind::LendingSupply,
        IntentKind::LendingWithdraw,
        IntentKind::LendingBorrow,
        IntentKind::LendingRepay,
        IntentKind::LiquidityAdd,
        IntentKind::LiquidityRemove,
        IntentKind::BridgeTransfer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::TransferNative => "transfer.native",
            Self::TransferToken => "transfer.token",
            Self::LendingSupply => "lending.supply",
            Self::LendingWithdraw => "lending.withdraw",
            Self::LendingBorrow => "lending.borrow",
            Self::LendingRepay => "lending.repay",
            Self::LiquidityAdd => "liquidity.add",
            Self::LiquidityRemove => "liquidity.remove",
            Self::BridgeTransfer => "bridge.transfer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(value.trim()))
    }

    pub fn template(self) -> &'static [FieldSpec] {
        match self {
            Self::TransferNative => TRANSFER_NATIVE,
            Self::TransferToken => TRANSFER_TOKEN,
            Self::LendingSupply
            | Self::LendingWithdraw
            | Self::LendingBorrow
            | Self::LendingRepay => LENDING,
            Self::LiquidityAdd => LIQUIDITY_ADD,
            Self::LiquidityRemove => LIQUIDITY_REMOVE,
            Self::BridgeTransfer => BRIDGE_TRANSFER,
        }
    }

    pub fn field_spec(self, name: &str) -> Option<FieldSpec> {
        self.template().iter().copied().find(|spec| spec.name == name)
    }

    /// Kinds that move a fungible token out of the origin account.
    pub fn spends_token(self) -> bool {
        matches!(
            self,
            Self::TransferToken
                | Self::LendingSupply
                | Self::LendingRepay
                | Self::LiquidityAdd
                | Self::BridgeTransfer
        )
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical, comparable description of one requested ledger operation.
///
/// Field values are already validated and canonicalized, so two intents are
/// equal exactly when their canonical serializations match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub family: LedgerFamily,
    pub network: String,
    pub kind: IntentKind,
    pub fields: BTreeMap<String, String>,
}

impl Intent {
    pub(crate) fn new(network: &NetworkId, kind: IntentKind, fields: BTreeMap<String, String>) -> Self {
        Self {
            family: network.family,
            network: network.to_string(),
            kind,
            fields,
        }
    }

    /// Sorted-key JSON used for hashing and equality.
    pub fn canonical_json(&self) -> String {
        let material = serde_json::json!({
            "family": self.family,
            "network": self.network,
            "kind": self.kind,
            "fields": self.fields,
        });
        serde_json::to_string(&material).unwrap_or_default()
    }

    pub fn intent_hash(&self) -> String {
        blake3::hash(self.canonical_json().as_bytes())
            .to_hex()
            .to_string()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn protocol(&self) -> Option<&str> {
        self.field("protocol")
    }

    pub fn destination_network(&self) -> Option<&str> {
        self.field("destinationNetwork")
    }

    pub fn amount_usd(&self) -> Option<f64> {
        self.field("amountUsd")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite())
    }
}

/// Normalize a positive decimal amount: no sign, no exponent, no leading or
/// trailing zeros. Zero and malformed input yield `None`.
pub fn normalize_amount(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !decimal_re().is_match(raw) {
        return None;
    }
    let (int_part, frac_part) = raw.split_once('.').unwrap_or((raw, ""));
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    if frac_part.is_empty() {
        Some(int_part.to_string())
    } else {
        Some(format!("{int_part}.{frac_part}"))
    }
}

fn pad_felt(raw: &str) -> String {
    let digits = raw[2..].to_ascii_lowercase();
    format!("0x{digits:0>64}")
}

fn evm_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("evm address regex must compile"))
}

fn evm_tx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("evm tx regex must compile"))
}

fn sui_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("sui address regex must compile"))
}

fn sui_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^0x[0-9a-fA-F]{1,64}::[A-Za-z_][A-Za-z0-9_]*::[A-Za-z_][A-Za-z0-9_]*$")
            .expect("sui type regex must compile")
    })
}

fn felt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{1,64}$").expect("felt regex must compile"))
}

fn bech32_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z]{1,83}1[02-9ac-hj-np-z]{38,58}$").expect("bech32 regex must compile")
    })
}

fn cosmos_denom_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:ibc/[0-9A-F]{64}|factory/[a-z0-9]+/[A-Za-z0-9._-]+|u[a-z]{2,15})$")
            .expect("cosmos denom regex must compile")
    })
}

fn cosmos_tx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{64}$").expect("cosmos tx regex must compile"))
}

fn base58_re(min: usize, max: usize) -> &'static Regex {
    static RE_32_44: OnceLock<Regex> = OnceLock::new();
    static RE_43_44: OnceLock<Regex> = OnceLock::new();
    static RE_86_88: OnceLock<Regex> = OnceLock::new();
    let cell: &'static OnceLock<Regex> = match (min, max) {
        (32, 44) => &RE_32_44,
        (43, 44) => &RE_43_44,
        _ => &RE_86_88,
    };
    cell.get_or_init(|| {
        Regex::new(&format!("^[1-9A-HJ-NP-Za-km-z]{{{min},{max}}}$"))
            .expect("base58 regex must compile")
    })
}

fn chain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("chain regex must compile"))
}

fn decimal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("decimal regex must compile"))
}
