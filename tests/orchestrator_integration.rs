//! End-to-end coverage for the confirmation gate, action-id lifecycle, and
//! execution pipeline driven through `Orchestrator::handle_message`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use carel_agent::agent::{Collaborators, ExecutionPath, Orchestrator, Tier, WalletAccounts};
use carel_agent::backend::*;
use carel_agent::config::{Config, ContractsConfig, TimingConfig};
use carel_agent::error::{CollaboratorError, FailureKind};

/// Chain, backend, and wallet in one: signing a batch that contains
/// `submit_action` registers a new pending action id.
struct Ledger {
    command: Mutex<InterpretedCommand>,
    unlocked: Mutex<Tier>,
    pending: Mutex<Vec<u64>>,
    signed: Mutex<Vec<SignRequest>>,
    /// Failures keyed by 1-based signature number.
    fail_on: Mutex<BTreeMap<usize, CollaboratorError>>,
    relay_failure: Mutex<Option<CollaboratorError>>,
    relayed: Mutex<Vec<RelayRequest>>,
    finalized: Mutex<Vec<FinalizeRequest>>,
    events: Mutex<Vec<NotificationEvent>>,
}

impl Ledger {
    fn new(action: &str, parameters: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            command: Mutex::new(InterpretedCommand {
                action: action.to_string(),
                parameters,
                reply: Some("Sure.".to_string()),
            }),
            unlocked: Mutex::new(Tier::Private),
            pending: Mutex::new(vec![7]),
            signed: Mutex::new(Vec::new()),
            fail_on: Mutex::new(BTreeMap::new()),
            relay_failure: Mutex::new(None),
            relayed: Mutex::new(Vec::new()),
            finalized: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    fn fail_signature(&self, n: usize, kind: FailureKind, message: &str) {
        self.fail_on
            .lock()
            .unwrap()
            .insert(n, CollaboratorError::new(kind, message));
    }

    fn entrypoints(&self) -> Vec<Vec<String>> {
        self.signed
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.calls.calls().iter().map(|c| c.entrypoint.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl AuthorizationBackend for Ledger {
    async fn prepare_signature_window(
        &self,
        _account: &str,
        _tier: Tier,
    ) -> Result<SignatureWindow, CollaboratorError> {
        Ok(SignatureWindow {
            valid_from: 1_700_000_000,
            valid_until: 1_700_000_060,
            signature: vec!["0xr".to_string(), "0xs".to_string()],
        })
    }

    async fn preflight_executor(&self, _account: &str) -> Result<PreflightReport, CollaboratorError> {
        Ok(PreflightReport {
            ready: true,
            burner_role_granted: true,
            message: "ready".to_string(),
            tx_hash: None,
        })
    }

    async fn list_pending_actions(
        &self,
        _account: &str,
        _cursor: Option<u64>,
        _count: u32,
    ) -> Result<Vec<u64>, CollaboratorError> {
        let mut ids = self.pending.lock().unwrap().clone();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    async fn tier_status(&self, _account: &str) -> Result<TierStatus, CollaboratorError> {
        Ok(TierStatus {
            current_level: *self.unlocked.lock().unwrap(),
        })
    }

    async fn record_tier_upgrade(
        &self,
        _account: &str,
        tier: Tier,
        _tx_hash: &str,
    ) -> Result<TierStatus, CollaboratorError> {
        *self.unlocked.lock().unwrap() = tier;
        Ok(TierStatus { current_level: tier })
    }
}

#[async_trait]
impl WalletSigner for Ledger {
    async fn sign_and_submit(&self, request: &SignRequest) -> Result<String, CollaboratorError> {
        let n = {
            let mut signed = self.signed.lock().unwrap();
            signed.push(request.clone());
            signed.len()
        };
        if let Some(err) = self.fail_on.lock().unwrap().remove(&n) {
            return Err(err);
        }
        if request.calls.calls().iter().any(|c| c.entrypoint == "submit_action") {
            let mut pending = self.pending.lock().unwrap();
            let next = pending.iter().max().copied().unwrap_or(0) + 1;
            pending.push(next);
        }
        Ok(format!("0x{n:064x}"))
    }
}

#[async_trait]
impl ExecutionBackend for Ledger {
    async fn finalize(&self, request: &FinalizeRequest) -> Result<FinalizeReceipt, CollaboratorError> {
        self.finalized.lock().unwrap().push(request.clone());
        Ok(FinalizeReceipt {
            points_earned: Some(rust_decimal_macros::dec!(4)),
            ..FinalizeReceipt::default()
        })
    }
}

#[async_trait]
impl QuoteService for Ledger {
    async fn swap_quote(&self, request: &SwapQuoteRequest) -> Result<SwapQuote, CollaboratorError> {
        Ok(SwapQuote {
            amount_out: "5".to_string(),
            fee: None,
            route: vec![request.from_token.clone(), request.to_token.clone()],
            calls: Some(vec![carel_agent::agent::Call::new(
                "0x0swap",
                "swap_exact_in",
                vec!["0x1".to_string()],
            )]),
        })
    }

    async fn bridge_quote(&self, request: &BridgeQuoteRequest) -> Result<BridgeQuote, CollaboratorError> {
        Ok(BridgeQuote {
            amount_out: request.amount.to_string(),
            fee: None,
            provider: Some("layerswap".to_string()),
            calls: Some(vec![carel_agent::agent::Call::new(
                "0x0bridge",
                "deposit",
                vec!["0x0user".to_string()],
            )]),
        })
    }
}

#[async_trait]
impl PrivacyProofService for Ledger {
    async fn prepare_proof(
        &self,
        _request: &ProofRequest,
    ) -> Result<PrivacyVerificationPayload, CollaboratorError> {
        Ok(PrivacyVerificationPayload {
            verifier: "garaga".to_string(),
            nullifier: "0xn".to_string(),
            commitment: "0xc".to_string(),
            proof: vec!["0x1".to_string()],
            public_inputs: vec!["0x2".to_string()],
        })
    }
}

#[async_trait]
impl PrivacyRelayer for Ledger {
    async fn relay(&self, request: &RelayRequest) -> Result<RelayReceipt, CollaboratorError> {
        self.relayed.lock().unwrap().push(request.clone());
        if let Some(err) = self.relay_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(RelayReceipt {
            tx_hash: "0xrelay0000000000000000000000000000".to_string(),
        })
    }
}

#[async_trait]
impl CommandInterpreter for Ledger {
    async fn interpret(&self, _tier: Tier, _text: &str) -> Result<InterpretedCommand, CollaboratorError> {
        Ok(self.command.lock().unwrap().clone())
    }
}

impl NotificationSink for Ledger {
    fn notify(&self, event: NotificationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn config() -> Config {
    let contracts = ContractsConfig::default()
        .with_executor("0x0e1")
        .with_carel_token("0x0ca")
        .with_privacy_router("0x0pr")
        .with_limit_order_book("0x0b00c")
        .with_staking_pool("CAREL", "0x0p1")
        .with_token("STRK", "0x0strk", 18)
        .with_token("USDC", "0x0usdc", 6);
    let mut config = Config::for_contracts(contracts);
    config.timing = TimingConfig::immediate();
    config
}

fn orchestrator(ledger: &Arc<Ledger>) -> Orchestrator {
    let collaborators = Collaborators::from_backend(ledger.clone(), ledger.clone(), ledger.clone())
        .with_notifier(ledger.clone());
    Orchestrator::new(
        collaborators,
        config(),
        WalletAccounts::starknet("0xuser", WalletProvider::ArgentX),
    )
}

fn stake_ledger() -> Arc<Ledger> {
    Ledger::new("stake", json!({ "token": "CAREL", "amount": "10" }))
}

#[tokio::test]
async fn test_stake_runs_setup_then_action_after_confirmation() {
    let ledger = stake_ledger();
    let orchestrator = orchestrator(&ledger);

    let prompt = orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    assert!(prompt.reply.contains("burn 1 CAREL"), "{}", prompt.reply);
    assert!(ledger.signed.lock().unwrap().is_empty());

    let done = orchestrator.handle_message(Tier::Standard, "yes").await;
    let outcome = done.outcome.expect("stake should execute");
    assert_eq!(outcome.label, "stake");
    assert_eq!(outcome.path, ExecutionPath::Wallet);
    assert!(done.reply.starts_with("Stake submitted."), "{}", done.reply);
    assert!(done.reply.contains("+4 points"), "{}", done.reply);

    assert_eq!(
        ledger.entrypoints(),
        vec![vec!["submit_action".to_string()], vec!["approve".to_string(), "stake".to_string()]]
    );
    let finalized = ledger.finalized.lock().unwrap();
    assert_eq!(finalized[0].flow, FinalizeFlow::StakeDeposit);
    assert_eq!(finalized[0].action_id, Some(8));
    assert!(orchestrator.action_id_view().await.current.is_none());
    assert!(orchestrator.pending_confirmation(Tier::Standard).await.is_none());
}

#[tokio::test]
async fn test_each_execution_gets_a_fresh_action_id() {
    let ledger = stake_ledger();
    let orchestrator = orchestrator(&ledger);

    for _ in 0..2 {
        orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
        let done = orchestrator.handle_message(Tier::Standard, "yes").await;
        assert!(done.outcome.is_some(), "{}", done.reply);
    }

    let ids: Vec<Option<u64>> = ledger.finalized.lock().unwrap().iter().map(|f| f.action_id).collect();
    assert_eq!(ids, vec![Some(8), Some(9)]);
}

#[tokio::test]
async fn test_stale_action_id_is_cleared_and_retried_once() {
    let ledger = stake_ledger();
    ledger.fail_signature(2, FailureKind::NoLongerPending, "Action is no longer pending");
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;

    assert!(done.outcome.is_some(), "{}", done.reply);
    let entrypoints = ledger.entrypoints();
    assert_eq!(entrypoints.len(), 4);
    assert_eq!(entrypoints[2], vec!["submit_action".to_string()]);
    assert_eq!(ledger.finalized.lock().unwrap()[0].action_id, Some(9));
}

#[tokio::test]
async fn test_second_stale_action_id_is_surfaced() {
    let ledger = stake_ledger();
    ledger.fail_signature(2, FailureKind::NoLongerPending, "Action is no longer pending");
    ledger.fail_signature(4, FailureKind::NoLongerPending, "Action is no longer pending");
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;

    assert!(done.outcome.is_none());
    assert_eq!(
        done.status.error.as_ref().map(|e| e.code),
        Some("auth.action_not_pending")
    );
    assert_eq!(ledger.signed.lock().unwrap().len(), 4);
    assert!(ledger.finalized.lock().unwrap().is_empty());
    assert!(
        ledger
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.kind == NotificationKind::Error)
    );
}

#[tokio::test]
async fn test_wallet_rejection_is_not_retried() {
    let ledger = stake_ledger();
    ledger.fail_signature(1, FailureKind::UserRejected, "User rejected the request");
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;

    assert_eq!(done.status.error.as_ref().map(|e| e.code), Some("user.rejected"));
    assert_eq!(ledger.signed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_pending_confirmation_survives_tier_switch() {
    let ledger = stake_ledger();
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    orchestrator.handle_message(Tier::ReadOnly, "yes").await;

    assert!(ledger.signed.lock().unwrap().is_empty());
    let pending = orchestrator
        .pending_confirmation(Tier::Standard)
        .await
        .expect("tier 2 confirmation should still be pending");
    assert_eq!(pending.command, "stake 10 CAREL");

    let done = orchestrator.handle_message(Tier::Standard, "yes").await;
    assert!(done.outcome.is_some(), "{}", done.reply);
}

#[tokio::test]
async fn test_resubmitting_same_command_prompts_again() {
    let ledger = stake_ledger();
    let orchestrator = orchestrator(&ledger);

    let first = orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let second = orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;

    assert_eq!(first.reply, second.reply);
    assert!(ledger.signed.lock().unwrap().is_empty());
    assert!(orchestrator.pending_confirmation(Tier::Standard).await.is_some());
}

#[tokio::test]
async fn test_declining_sends_nothing() {
    let ledger = stake_ledger();
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let done = orchestrator.handle_message(Tier::Standard, "no").await;

    assert!(done.reply.starts_with("Cancelled"), "{}", done.reply);
    assert!(ledger.signed.lock().unwrap().is_empty());
    assert!(orchestrator.pending_confirmation(Tier::Standard).await.is_none());
}

#[tokio::test]
async fn test_locked_tier_is_refused_before_setup() {
    let ledger = stake_ledger();
    *ledger.unlocked.lock().unwrap() = Tier::ReadOnly;
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;

    assert_eq!(done.status.error.as_ref().map(|e| e.code), Some("user.tier_locked"));
    assert!(ledger.signed.lock().unwrap().is_empty());

    orchestrator
        .record_tier_upgrade(Tier::Standard, "0xupgrade")
        .await
        .unwrap();
    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;
    assert!(done.outcome.is_some(), "{}", done.reply);
}

#[tokio::test]
async fn test_private_claim_relays_with_action_id() {
    let ledger = Ledger::new("claim", json!({ "token": "CAREL" }));
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Private, "claim my CAREL rewards").await;
    let done = orchestrator.handle_message(Tier::Private, "yes").await;

    let outcome = done.outcome.expect("claim should execute");
    assert_eq!(outcome.path, ExecutionPath::Relayer);
    let relayed = ledger.relayed.lock().unwrap();
    assert_eq!(relayed[0].action_id, Some(8));
    assert_eq!(relayed[0].action_calls[0].entrypoint, "claim_rewards");
    // Only the setup transaction needed a wallet signature.
    assert_eq!(ledger.entrypoints(), vec![vec!["submit_action".to_string()]]);
}

#[tokio::test]
async fn test_private_swap_falls_back_to_wallet_when_relayer_is_down() {
    let ledger = Ledger::new("swap", json!({ "from": "STRK", "to": "USDC", "amount": "10" }));
    *ledger.relay_failure.lock().unwrap() = Some(CollaboratorError::new(
        FailureKind::RelayerUnavailable,
        "relayer unavailable",
    ));
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Private, "swap 10 STRK to USDC").await;
    let done = orchestrator.handle_message(Tier::Private, "yes").await;

    let outcome = done.outcome.expect("swap should fall back to the wallet");
    assert_eq!(outcome.path, ExecutionPath::WalletFallback);
    let entrypoints = ledger.entrypoints();
    assert_eq!(
        entrypoints[1],
        vec!["submit_private_action".to_string(), "swap_exact_in".to_string()]
    );
}

#[tokio::test]
async fn test_bridge_from_ethereum_signs_with_evm_wallet() {
    let ledger = Ledger::new(
        "bridge",
        json!({ "from": "ETH", "to": "ETH", "amount": "0.5", "from_chain": "ethereum", "to_chain": "starknet" }),
    );
    let orchestrator = orchestrator(&ledger);
    orchestrator
        .set_accounts(WalletAccounts::starknet("0xuser", WalletProvider::Braavos).with_ethereum("0xevm"))
        .await;

    orchestrator.handle_message(Tier::Standard, "bridge 0.5 ETH to starknet").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;

    let outcome = done.outcome.expect("bridge should execute");
    assert_eq!(outcome.label, "bridge");
    let signed = ledger.signed.lock().unwrap();
    assert_eq!(signed[0].provider, WalletProvider::Braavos);
    assert_eq!(signed[1].provider, WalletProvider::Metamask);
    assert_eq!(signed[1].calls.calls()[0].entrypoint, "deposit");
    let finalized = ledger.finalized.lock().unwrap();
    assert_eq!(finalized[0].flow, FinalizeFlow::Bridge);
    assert_eq!(finalized[0].details["recipient"], "0xuser");
}

#[tokio::test]
async fn test_bridge_is_blocked_under_tier3_by_default() {
    let ledger = Ledger::new("bridge", json!({ "from": "ETH", "to": "ETH", "amount": "0.5" }));
    let orchestrator = orchestrator(&ledger);

    let reply = orchestrator.handle_message(Tier::Private, "bridge 0.5 ETH to starknet").await;

    assert!(orchestrator.pending_confirmation(Tier::Private).await.is_none());
    assert!(ledger.signed.lock().unwrap().is_empty());
    assert!(!reply.reply.is_empty());
}

#[tokio::test]
async fn test_limit_order_create_reports_order_id() {
    let ledger = Ledger::new(
        "limit_order_create",
        json!({ "from": "USDC", "to": "STRK", "amount": "25", "price": "0.5", "expiry": "1d" }),
    );
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "place limit order 25 USDC for STRK at 0.5").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;

    let outcome = done.outcome.expect("limit order should execute");
    let order_id = outcome.receipt.order_id.clone().expect("client order id");
    assert!(done.reply.contains(&format!("Order id {order_id}.")), "{}", done.reply);
    assert_eq!(
        ledger.entrypoints()[1],
        vec!["approve".to_string(), "create_limit_order".to_string()]
    );
}

#[tokio::test]
async fn test_limit_order_cancel_targets_order_book() {
    let ledger = Ledger::new("limit_order_cancel", json!({ "order_id": "0xabc" }));
    let orchestrator = orchestrator(&ledger);

    orchestrator.handle_message(Tier::Standard, "cancel order 0xabc").await;
    let done = orchestrator.handle_message(Tier::Standard, "yes").await;

    assert!(done.outcome.is_some(), "{}", done.reply);
    let signed = ledger.signed.lock().unwrap();
    assert_eq!(signed[1].calls.calls()[0].contract_address, "0x0b00c");
    assert_eq!(signed[1].calls.calls()[0].calldata, vec!["0xabc"]);
    assert_eq!(ledger.finalized.lock().unwrap()[0].flow, FinalizeFlow::LimitOrderCancel);
}

#[tokio::test]
async fn test_setup_cooldown_is_reported_as_information() {
    let ledger = stake_ledger();
    let mut config = config();
    config.timing.setup_cooldown = std::time::Duration::from_secs(60);
    let collaborators = Collaborators::from_backend(ledger.clone(), ledger.clone(), ledger.clone())
        .with_notifier(ledger.clone());
    let orchestrator = Orchestrator::new(
        collaborators,
        config,
        WalletAccounts::starknet("0xuser", WalletProvider::ArgentX),
    );

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let first = orchestrator.handle_message(Tier::Standard, "yes").await;
    assert!(first.outcome.is_some(), "{}", first.reply);

    orchestrator.handle_message(Tier::Standard, "stake 10 CAREL").await;
    let second = orchestrator.handle_message(Tier::Standard, "yes").await;

    assert!(second.outcome.is_none());
    assert!(second.reply.starts_with("A setup transaction was just submitted."), "{}", second.reply);
    assert!(second.status.error.is_none());
    assert_eq!(ledger.signed.lock().unwrap().len(), 2);
    let events = ledger.events.lock().unwrap();
    assert!(events.iter().any(|e| e.kind == NotificationKind::Info && e.title == "Setup cooldown"));
    assert!(events.iter().all(|e| e.kind != NotificationKind::Error));
}
