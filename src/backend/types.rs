//! Wire types exchanged with collaborators.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agent::calls::{Call, CallBatch, Chain};
use crate::agent::tier::Tier;

/// Structured output of the external command interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretedCommand {
    /// Action tag such as `swap` or `limit_order_create`.
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Descriptive reply suggested by the interpreter.
    #[serde(default)]
    pub reply: Option<String>,
}

/// Short-lived signature validity window for a setup transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureWindow {
    pub valid_from: u64,
    pub valid_until: u64,
    #[serde(default)]
    pub signature: Vec<String>,
}

/// Executor readiness as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub ready: bool,
    #[serde(default)]
    pub burner_role_granted: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

/// Highest tier the account has unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStatus {
    pub current_level: Tier,
}

/// Wallet kinds the signer can be asked to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletProvider {
    ArgentX,
    Braavos,
    Metamask,
    Xverse,
}

impl WalletProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ArgentX => "argent_x",
            Self::Braavos => "braavos",
            Self::Metamask => "metamask",
            Self::Xverse => "xverse",
        }
    }
}

/// A batch handed to the wallet for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignRequest {
    pub chain: Chain,
    pub provider: WalletProvider,
    pub calls: CallBatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapQuoteRequest {
    pub from_token: String,
    pub to_token: String,
    pub amount: Decimal,
    pub slippage_percent: Decimal,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub amount_out: String,
    #[serde(default)]
    pub fee: Option<String>,
    #[serde(default)]
    pub route: Vec<String>,
    /// Ready-to-sign calldata, when the quote service provides it.
    #[serde(default)]
    pub calls: Option<Vec<Call>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeQuoteRequest {
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeQuote {
    pub amount_out: String,
    #[serde(default)]
    pub fee: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub calls: Option<Vec<Call>>,
}

/// Privacy or transparent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Transparent,
    Private,
}

/// Zero-knowledge proof payload from the privacy-proof service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyVerificationPayload {
    #[serde(default)]
    pub verifier: String,
    #[serde(default)]
    pub nullifier: String,
    #[serde(default)]
    pub commitment: String,
    #[serde(default)]
    pub proof: Vec<String>,
    #[serde(default)]
    pub public_inputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProofRequest {
    pub flow: &'static str,
    pub account: String,
    /// blake3 digest binding the proof to the economic parameters.
    pub binding: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayRequest {
    pub flow: &'static str,
    pub account: String,
    pub action_id: Option<u64>,
    pub payload: PrivacyVerificationPayload,
    pub action_calls: Vec<Call>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReceipt {
    pub tx_hash: String,
}

/// Backend bookkeeping endpoint for a completed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeFlow {
    Swap,
    Bridge,
    StakeDeposit,
    StakeWithdraw,
    StakeClaim,
    LimitOrderCreate,
    LimitOrderCancel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizeRequest {
    pub flow: FinalizeFlow,
    pub account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<u64>,
    pub mode: ExecutionMode,
    pub details: serde_json::Value,
}

/// Bookkeeping result for a finalized flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeReceipt {
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub points_earned: Option<Decimal>,
    #[serde(default)]
    pub discount_percent: Option<Decimal>,
    #[serde(default)]
    pub order_id: Option<String>,
    /// External deposit address for UTXO-sourced bridge orders.
    #[serde(default)]
    pub deposit_address: Option<String>,
    /// Amount to deposit, in satoshis.
    #[serde(default)]
    pub deposit_amount_sats: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    SignatureRequested,
    Success,
    Error,
}

/// Fire-and-forget notification event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub explorer_links: Vec<String>,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            tx_hash: None,
            explorer_links: Vec::new(),
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn with_explorer_link(mut self, link: impl Into<String>) -> Self {
        self.explorer_links.push(link.into());
        self
    }
}
