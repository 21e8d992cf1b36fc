//! Collaborator contracts consumed by the orchestrator.
//!
//! Every collaborator reports failures as [`CollaboratorError`] with a
//! structured [`crate::error::FailureKind`]; retry policy matches on the kind.

pub mod http;
mod types;

use async_trait::async_trait;

use crate::agent::tier::Tier;
use crate::error::CollaboratorError;

pub use self::http::HttpBackend;
pub use self::types::{
    BridgeQuote, BridgeQuoteRequest, ExecutionMode, FinalizeFlow, FinalizeReceipt,
    FinalizeRequest, InterpretedCommand, NotificationEvent, NotificationKind, PreflightReport,
    PrivacyVerificationPayload, ProofRequest, RelayReceipt, RelayRequest, SignRequest,
    SignatureWindow, SwapQuote, SwapQuoteRequest, TierStatus, WalletProvider,
};

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Backend action-authorization service.
#[async_trait]
pub trait AuthorizationBackend: Send + Sync {
    /// Request a short-lived signature window for a setup transaction.
    async fn prepare_signature_window(
        &self,
        account: &str,
        tier: Tier,
    ) -> CollaboratorResult<SignatureWindow>;

    /// Check whether the executor contract accepts actions for the account.
    async fn preflight_executor(&self, account: &str) -> CollaboratorResult<PreflightReport>;

    /// Pending action ids for the account, newest first.
    async fn list_pending_actions(
        &self,
        account: &str,
        cursor: Option<u64>,
        count: u32,
    ) -> CollaboratorResult<Vec<u64>>;

    async fn tier_status(&self, account: &str) -> CollaboratorResult<TierStatus>;

    /// Record a confirmed tier upgrade transaction.
    async fn record_tier_upgrade(
        &self,
        account: &str,
        tier: Tier,
        tx_hash: &str,
    ) -> CollaboratorResult<TierStatus>;
}

/// Post-transaction bookkeeping.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn finalize(&self, request: &FinalizeRequest) -> CollaboratorResult<FinalizeReceipt>;
}

/// Swap and bridge quoting.
#[async_trait]
pub trait QuoteService: Send + Sync {
    async fn swap_quote(&self, request: &SwapQuoteRequest) -> CollaboratorResult<SwapQuote>;
    async fn bridge_quote(&self, request: &BridgeQuoteRequest) -> CollaboratorResult<BridgeQuote>;
}

#[async_trait]
pub trait PrivacyProofService: Send + Sync {
    async fn prepare_proof(
        &self,
        request: &ProofRequest,
    ) -> CollaboratorResult<PrivacyVerificationPayload>;
}

/// Off-chain relayer that submits private executions without a wallet
/// signature. Reports [`crate::error::FailureKind::RelayerUnavailable`] when
/// it cannot relay and needs an on-chain hash instead.
#[async_trait]
pub trait PrivacyRelayer: Send + Sync {
    async fn relay(&self, request: &RelayRequest) -> CollaboratorResult<RelayReceipt>;
}

/// Wallet signing service. Returns the transaction hash.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn sign_and_submit(&self, request: &SignRequest) -> CollaboratorResult<String>;
}

/// Wallet for an external UTXO chain.
#[async_trait]
pub trait UtxoWallet: Send + Sync {
    async fn send(&self, to_address: &str, amount_sats: u64) -> CollaboratorResult<String>;
}

/// External command interpreter (natural language to action tags).
#[async_trait]
pub trait CommandInterpreter: Send + Sync {
    async fn interpret(&self, tier: Tier, text: &str) -> CollaboratorResult<InterpretedCommand>;
}

/// Fire-and-forget notification sink. Never awaited for correctness.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

/// Sink that logs notifications through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, event: NotificationEvent) {
        match event.kind {
            NotificationKind::Error => tracing::warn!(
                title = %event.title,
                tx_hash = event.tx_hash.as_deref().unwrap_or(""),
                "{}",
                event.message
            ),
            _ => tracing::info!(
                kind = ?event.kind,
                title = %event.title,
                tx_hash = event.tx_hash.as_deref().unwrap_or(""),
                "{}",
                event.message
            ),
        }
    }
}
