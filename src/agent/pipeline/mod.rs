//! Execution pipeline: one specialization per action family.
//!
//! Every family builds its call batch, then branches on the tier-implied
//! mode. Tier 3 goes through the privacy relayer with a wallet fallback;
//! tier 2 signs quote or locally built calldata directly. After the
//! transaction the hash is handed to the backend for bookkeeping.

mod bridge;
mod limit_order;
mod privacy;
mod staking;
mod swap;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::agent::action_id::ActionId;
use crate::agent::calls::{Call, CallBatch, Chain, short_tx_hash};
use crate::agent::intent::Intent;
use crate::agent::recovery::{RecoveryAction, bridge_submit_recovery};
use crate::agent::tier::Tier;
use crate::agent::{Collaborators, WalletAccounts};
use crate::backend::{
    ExecutionMode, FinalizeReceipt, FinalizeRequest, NotificationEvent, NotificationKind,
    SignRequest,
};
use crate::config::{Config, KNOWN_TOKENS};
use crate::error::ExecutionError;

pub use self::bridge::{BRIDGE_PAIRS, BridgePair, chain_for_symbol, resolve_route, validate_bridge_pair};
pub use self::limit_order::client_order_id;
pub use self::privacy::{binding_digest, validate_proof_payload};
pub use self::staking::STAKE_TOKENS;
pub use self::swap::SWAP_TOKENS;

/// How the transaction reached the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    /// Submitted by the privacy relayer; no wallet signature.
    Relayer,
    /// Privacy submission signed by the user's wallet after the relayer was
    /// unavailable.
    WalletFallback,
    /// Transparent wallet-signed batch.
    Wallet,
    /// No source-chain transaction (external deposit or read-only intent).
    Offchain,
}

/// Per-execution inputs.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub tier: Tier,
    pub action_id: Option<ActionId>,
    pub accounts: &'a WalletAccounts,
}

impl ExecutionContext<'_> {
    pub fn mode(&self) -> ExecutionMode {
        if self.tier.uses_privacy_path() {
            ExecutionMode::Private
        } else {
            ExecutionMode::Transparent
        }
    }

    /// Starknet account that owns the action id and backend records.
    pub fn account(&self) -> Result<&str, ExecutionError> {
        self.accounts.require(Chain::Starknet)
    }
}

/// Result of one completed execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub label: &'static str,
    pub mode: ExecutionMode,
    pub path: ExecutionPath,
    pub tx_hash: Option<String>,
    pub receipt: FinalizeReceipt,
    /// Extra lines for the chat summary.
    pub notes: Vec<String>,
}

impl ExecutionOutcome {
    fn new(label: &'static str, mode: ExecutionMode, path: ExecutionPath) -> Self {
        Self {
            label,
            mode,
            path,
            tx_hash: None,
            receipt: FinalizeReceipt::default(),
            notes: Vec::new(),
        }
    }

    /// Chat summary with truncated hash, points, and discount.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        let mut head = capitalize(self.label);
        match (&self.tx_hash, self.path) {
            (Some(hash), ExecutionPath::Relayer) => {
                head.push_str(&format!(" submitted privately via relayer. Tx {}.", short_tx_hash(hash)));
            }
            (Some(hash), _) => head.push_str(&format!(" submitted. Tx {}.", short_tx_hash(hash))),
            (None, _) => head.push_str(" order created."),
        }
        parts.push(head);

        if let Some(points) = self.receipt.points_earned.filter(|p| !p.is_zero()) {
            parts.push(format!("+{} points.", points.normalize()));
        }
        if let Some(discount) = self.receipt.discount_percent.filter(|d| *d > Decimal::ZERO) {
            parts.push(format!("{}% fee discount applied.", discount.normalize()));
        }
        if let Some(order_id) = &self.receipt.order_id {
            parts.push(format!("Order id {order_id}."));
        }
        parts.extend(self.notes.iter().cloned());
        parts.join(" ")
    }
}

pub(crate) fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A signed or relayed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Submission {
    tx_hash: String,
    path: ExecutionPath,
}

/// Flow-specific inputs for the tier-implied submission branch.
struct Plan {
    flow: &'static str,
    /// Economic parameters the privacy proof is bound to.
    parameters: serde_json::Value,
    calls: Vec<Call>,
}

/// Builds and submits call batches for confirmed intents.
pub struct ExecutionPipeline {
    collaborators: Collaborators,
    config: Arc<Config>,
}

impl ExecutionPipeline {
    pub fn new(collaborators: Collaborators, config: Arc<Config>) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        intent: &Intent,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        tracing::info!(flow = intent.flow_name(), tier = %ctx.tier, "executing intent");
        match intent {
            Intent::Swap(swap) => self.swap(ctx, swap).await,
            Intent::Bridge(bridge) => self.bridge(ctx, bridge).await,
            Intent::Stake(stake) => self.stake(ctx, stake).await,
            Intent::Claim(claim) => self.claim(ctx, claim).await,
            Intent::LimitOrderCreate(order) => self.create_limit_order(ctx, order).await,
            Intent::LimitOrderCancel(cancel) => self.cancel_limit_order(ctx, cancel).await,
            Intent::Portfolio | Intent::Alerts => Ok(ExecutionOutcome::new(
                intent.label(),
                ctx.mode(),
                ExecutionPath::Offchain,
            )),
        }
    }

    /// Submit through the privacy path on tier 3, else sign directly.
    async fn submit(
        &self,
        ctx: &ExecutionContext<'_>,
        plan: Plan,
    ) -> Result<Submission, ExecutionError> {
        if ctx.tier.uses_privacy_path() {
            return self.submit_private(ctx, plan).await;
        }
        let tx_hash = self
            .sign(ctx, Chain::Starknet, CallBatch::new(plan.calls), plan.flow)
            .await?;
        Ok(Submission {
            tx_hash,
            path: ExecutionPath::Wallet,
        })
    }

    /// Ask the wallet to sign one batch; notifies before and after.
    async fn sign(
        &self,
        ctx: &ExecutionContext<'_>,
        chain: Chain,
        calls: CallBatch,
        flow: &str,
    ) -> Result<String, ExecutionError> {
        calls.validate()?;
        self.notify(NotificationEvent::new(
            NotificationKind::SignatureRequested,
            "Signature requested",
            format!(
                "Confirm the {flow} transaction ({} call{}) in your {} wallet.",
                calls.len(),
                if calls.len() == 1 { "" } else { "s" },
                chain.wallet_label()
            ),
        ));

        let request = SignRequest {
            chain,
            provider: ctx.accounts.provider_for(chain),
            calls,
        };
        match self.collaborators.wallet.sign_and_submit(&request).await {
            Ok(tx_hash) => {
                tracing::info!(flow, chain = %chain, tx_hash = %tx_hash, "transaction signed");
                Ok(tx_hash)
            }
            Err(err) => {
                tracing::warn!(flow, chain = %chain, kind = err.kind.as_str(), "wallet signing failed: {}", err);
                Err(ExecutionError::from_wallet(err))
            }
        }
    }

    /// Sign a batch, splitting approvals from the action once when the wallet
    /// cannot resolve the batched entrypoint.
    async fn sign_with_split_retry(
        &self,
        ctx: &ExecutionContext<'_>,
        chain: Chain,
        calls: CallBatch,
        flow: &str,
    ) -> Result<String, ExecutionError> {
        let split = calls.split_approvals();
        let err = match self.sign(ctx, chain, calls, flow).await {
            Ok(tx_hash) => return Ok(tx_hash),
            Err(err) => err,
        };

        let kind = match &err {
            ExecutionError::Wallet(inner) => inner.kind,
            _ => return Err(err),
        };
        match (bridge_submit_recovery(kind, split.is_some(), false), split) {
            (RecoveryAction::SplitAndRetry, Some((approvals, actions))) => {
                tracing::warn!(flow, "entrypoint not found, submitting approvals separately");
                self.sign_unchecked(ctx, chain, approvals, flow).await?;
                self.sign(ctx, chain, actions, flow).await
            }
            _ => Err(err),
        }
    }

    /// Approvals signed alone have no following call to validate against.
    async fn sign_unchecked(
        &self,
        ctx: &ExecutionContext<'_>,
        chain: Chain,
        calls: CallBatch,
        flow: &str,
    ) -> Result<String, ExecutionError> {
        self.notify(NotificationEvent::new(
            NotificationKind::SignatureRequested,
            "Approval requested",
            format!("Approve the {flow} token allowance in your {} wallet.", chain.wallet_label()),
        ));
        let request = SignRequest {
            chain,
            provider: ctx.accounts.provider_for(chain),
            calls,
        };
        self.collaborators
            .wallet
            .sign_and_submit(&request)
            .await
            .map_err(ExecutionError::from_wallet)
    }

    /// Report the hash for bookkeeping. The transaction already happened, so
    /// a bookkeeping failure becomes a note instead of an error.
    async fn finalize(&self, request: FinalizeRequest, outcome: &mut ExecutionOutcome) {
        match self.collaborators.execution.finalize(&request).await {
            Ok(receipt) => {
                tracing::info!(
                    flow = ?request.flow,
                    points = ?receipt.points_earned,
                    "execution finalized"
                );
                outcome.receipt = receipt;
            }
            Err(err) => {
                tracing::warn!(flow = ?request.flow, "finalize failed: {}", err);
                let mut event = NotificationEvent::new(
                    NotificationKind::Error,
                    "Bookkeeping failed",
                    format!("The transaction was sent but could not be recorded: {err}"),
                );
                if let Some(ref hash) = request.tx_hash {
                    event = event.with_tx_hash(hash.clone());
                }
                self.notify(event);
                outcome
                    .notes
                    .push("Points and discounts will be recorded once the backend catches up.".to_string());
            }
        }
    }

    fn notify_outcome(&self, outcome: &ExecutionOutcome) {
        let mut event = NotificationEvent::new(
            NotificationKind::Success,
            format!("{} complete", capitalize(outcome.label)),
            outcome.summary(),
        );
        if let Some(ref hash) = outcome.tx_hash {
            event = event.with_tx_hash(hash.clone());
        }
        self.notify(event);
    }

    fn notify(&self, event: NotificationEvent) {
        self.collaborators.notifier.notify(event);
    }

    fn slippage(&self) -> Decimal {
        self.config.tiers.swap_slippage_percent
    }
}

/// Decimals for a symbol, from the registry or the built-in defaults.
fn token_decimals(config: &Config, symbol: &str) -> u32 {
    config
        .contracts
        .tokens
        .get(&symbol.to_ascii_uppercase())
        .map(|info| info.decimals)
        .or_else(|| {
            KNOWN_TOKENS
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(symbol))
                .map(|(_, decimals)| *decimals)
        })
        .unwrap_or(18)
}

/// Reject symbols outside a family's supported set.
fn ensure_supported(
    family: &'static str,
    symbol: &str,
    supported: &[&str],
) -> Result<String, ExecutionError> {
    let upper = symbol.trim().to_ascii_uppercase();
    if supported.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(ExecutionError::UnsupportedAsset {
            family,
            symbol: symbol.to_string(),
            supported: supported.join(", "),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators shared by the pipeline tests.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::agent::tier::Tier;
    use crate::agent::{Collaborators, WalletAccounts};
    use crate::backend::*;
    use crate::config::{Config, ContractsConfig, TimingConfig};
    use crate::error::CollaboratorError;

    #[derive(Default)]
    pub struct Recorder {
        pub signed: Mutex<Vec<SignRequest>>,
        pub wallet_failures: Mutex<VecDeque<CollaboratorError>>,
        pub relayed: Mutex<Vec<RelayRequest>>,
        pub relay_failure: Mutex<Option<CollaboratorError>>,
        pub proofs: Mutex<Vec<ProofRequest>>,
        pub proof_payload: Mutex<Option<PrivacyVerificationPayload>>,
        pub finalized: Mutex<Vec<FinalizeRequest>>,
        pub finalize_receipt: Mutex<FinalizeReceipt>,
        pub finalize_failure: Mutex<Option<CollaboratorError>>,
        pub swap_quote: Mutex<Option<SwapQuote>>,
        pub bridge_quote: Mutex<Option<BridgeQuote>>,
        pub utxo_sent: Mutex<Vec<(String, u64)>>,
        pub utxo_failure: Mutex<Option<CollaboratorError>>,
        pub events: Mutex<Vec<NotificationEvent>>,
    }

    pub fn full_payload() -> PrivacyVerificationPayload {
        PrivacyVerificationPayload {
            verifier: "garaga".to_string(),
            nullifier: "0xnull".to_string(),
            commitment: "0xcommit".to_string(),
            proof: vec!["0x1".to_string(), "0x2".to_string()],
            public_inputs: vec!["0x3".to_string()],
        }
    }

    #[async_trait]
    impl WalletSigner for Recorder {
        async fn sign_and_submit(&self, request: &SignRequest) -> Result<String, CollaboratorError> {
            self.signed.lock().unwrap().push(request.clone());
            if let Some(err) = self.wallet_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(format!("0x{:064x}", self.signed.lock().unwrap().len()))
        }
    }

    #[async_trait]
    impl ExecutionBackend for Recorder {
        async fn finalize(&self, request: &FinalizeRequest) -> Result<FinalizeReceipt, CollaboratorError> {
            self.finalized.lock().unwrap().push(request.clone());
            if let Some(err) = self.finalize_failure.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(self.finalize_receipt.lock().unwrap().clone())
        }
    }

    #[async_trait]
    impl QuoteService for Recorder {
        async fn swap_quote(&self, _request: &SwapQuoteRequest) -> Result<SwapQuote, CollaboratorError> {
            Ok(self.swap_quote.lock().unwrap().clone().unwrap_or(SwapQuote {
                amount_out: "100".to_string(),
                fee: None,
                route: vec![],
                calls: None,
            }))
        }

        async fn bridge_quote(&self, _request: &BridgeQuoteRequest) -> Result<BridgeQuote, CollaboratorError> {
            Ok(self.bridge_quote.lock().unwrap().clone().unwrap_or(BridgeQuote {
                amount_out: "1".to_string(),
                fee: None,
                provider: None,
                calls: None,
            }))
        }
    }

    #[async_trait]
    impl PrivacyProofService for Recorder {
        async fn prepare_proof(&self, request: &ProofRequest) -> Result<PrivacyVerificationPayload, CollaboratorError> {
            self.proofs.lock().unwrap().push(request.clone());
            Ok(self.proof_payload.lock().unwrap().clone().unwrap_or_else(full_payload))
        }
    }

    #[async_trait]
    impl PrivacyRelayer for Recorder {
        async fn relay(&self, request: &RelayRequest) -> Result<RelayReceipt, CollaboratorError> {
            self.relayed.lock().unwrap().push(request.clone());
            if let Some(err) = self.relay_failure.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(RelayReceipt {
                tx_hash: "0xrelayed000000000000000000000000".to_string(),
            })
        }
    }

    #[async_trait]
    impl UtxoWallet for Recorder {
        async fn send(&self, to_address: &str, amount_sats: u64) -> Result<String, CollaboratorError> {
            if let Some(err) = self.utxo_failure.lock().unwrap().clone() {
                return Err(err);
            }
            self.utxo_sent.lock().unwrap().push((to_address.to_string(), amount_sats));
            Ok("btc-txid".to_string())
        }
    }

    #[async_trait]
    impl AuthorizationBackend for Recorder {
        async fn prepare_signature_window(&self, _account: &str, _tier: Tier) -> Result<SignatureWindow, CollaboratorError> {
            Ok(SignatureWindow {
                valid_from: 1,
                valid_until: 2,
                signature: vec![],
            })
        }

        async fn preflight_executor(&self, _account: &str) -> Result<PreflightReport, CollaboratorError> {
            Ok(PreflightReport {
                ready: true,
                burner_role_granted: true,
                message: String::new(),
                tx_hash: None,
            })
        }

        async fn list_pending_actions(&self, _account: &str, _cursor: Option<u64>, _count: u32) -> Result<Vec<u64>, CollaboratorError> {
            Ok(vec![])
        }

        async fn tier_status(&self, _account: &str) -> Result<TierStatus, CollaboratorError> {
            Ok(TierStatus {
                current_level: Tier::Private,
            })
        }

        async fn record_tier_upgrade(&self, _account: &str, tier: Tier, _tx_hash: &str) -> Result<TierStatus, CollaboratorError> {
            Ok(TierStatus { current_level: tier })
        }
    }

    #[async_trait]
    impl CommandInterpreter for Recorder {
        async fn interpret(&self, _tier: Tier, _text: &str) -> Result<InterpretedCommand, CollaboratorError> {
            Ok(InterpretedCommand {
                action: "chat".to_string(),
                parameters: serde_json::Value::Null,
                reply: None,
            })
        }
    }

    impl NotificationSink for Recorder {
        fn notify(&self, event: NotificationEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    pub fn collaborators(recorder: &Arc<Recorder>, with_utxo: bool) -> Collaborators {
        Collaborators {
            interpreter: recorder.clone(),
            authorization: recorder.clone(),
            execution: recorder.clone(),
            quotes: recorder.clone(),
            proofs: recorder.clone(),
            relayer: recorder.clone(),
            wallet: recorder.clone(),
            utxo_wallet: if with_utxo {
                Some(recorder.clone() as Arc<dyn UtxoWallet>)
            } else {
                None
            },
            notifier: recorder.clone(),
        }
    }

    pub fn contracts() -> ContractsConfig {
        ContractsConfig::default()
            .with_executor("0x0e1")
            .with_carel_token("0x0ca")
            .with_privacy_router("0x0pr")
            .with_limit_order_book("0x0b00c")
            .with_staking_pool("CAREL", "0x0p1")
            .with_staking_pool("USDC", "0x0p2")
            .with_token("USDC", "0x0usdc", 6)
            .with_token("STRK", "0x0strk", 18)
            .with_token("WBTC", "0x0wbtc", 8)
    }

    pub fn config() -> Config {
        let mut config = Config::for_contracts(contracts());
        config.timing = TimingConfig::immediate();
        config
    }

    pub fn accounts() -> WalletAccounts {
        WalletAccounts::starknet("0xuser", WalletProvider::ArgentX)
            .with_ethereum("0xevm")
            .with_bitcoin("bc1quser")
    }
}
