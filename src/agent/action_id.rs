//! Action-id lifecycle management.
//!
//! An action id is a single-use on-chain authorization created by a signed
//! setup transaction. This module owns creation, discovery, reuse, and
//! invalidation of those ids for one session.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::agent::calls::{Call, CallBatch, Chain, decimal_to_units};
use crate::agent::preflight::PreflightCache;
use crate::agent::recovery::{RecoveryAction, SetupRetries, setup_recovery};
use crate::agent::tier::Tier;
use crate::backend::{
    AuthorizationBackend, NotificationEvent, NotificationKind, NotificationSink, PreflightReport,
    SignRequest, SignatureWindow, WalletProvider, WalletSigner,
};
use crate::config::{ContractsConfig, TierConfig, TimingConfig};
use crate::error::{CollaboratorError, ExecutionError, FailureKind};

/// Pending ids fetched per poll.
const POLL_PAGE: u32 = 50;
/// Pending ids fetched by the final broad refetch.
const BROAD_REFETCH_PAGE: u32 = 200;

/// Identifier of a pending on-chain action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an id this session has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionIdStatus {
    Created,
    Consumed,
    Invalid,
}

/// Result of resolving an action id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResolution {
    /// The command does not need an authorization.
    NotRequired,
    Ready(ActionId),
}

impl ActionResolution {
    pub fn action_id(self) -> Option<ActionId> {
        match self {
            Self::NotRequired => None,
            Self::Ready(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Drop any cached id before resolving.
    pub force_refresh: bool,
    /// Always create a new id; never reuse one.
    pub require_fresh: bool,
}

/// Who signs the setup transaction and at what tier.
#[derive(Debug, Clone, Copy)]
pub struct SetupContext<'a> {
    pub account: &'a str,
    pub provider: WalletProvider,
    pub tier: Tier,
}

/// Read-only projection for hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionIdView {
    pub current: Option<ActionId>,
    pub pending: Vec<ActionId>,
}

#[derive(Debug)]
struct LifecycleState {
    current: Option<ActionId>,
    pending: BTreeSet<ActionId>,
    statuses: BTreeMap<ActionId, ActionIdStatus>,
    preflight: PreflightCache,
    last_setup_at: Option<Instant>,
}

impl LifecycleState {
    /// Consumed and invalidated ids are never handed out again.
    fn is_adoptable(&self, id: ActionId) -> bool {
        matches!(self.statuses.get(&id), None | Some(ActionIdStatus::Created))
    }

    fn adopt(&mut self, id: ActionId) {
        self.current = Some(id);
        self.pending.insert(id);
        self.statuses.insert(id, ActionIdStatus::Created);
    }
}

/// Pending-set discovery rule after a setup submission.
#[derive(Debug, Clone)]
enum Discovery {
    /// Only ids strictly greater than the largest id seen before submission.
    StrictlyAbove(Option<ActionId>),
    /// Any id absent from the pre-submission snapshot.
    NotIn(BTreeSet<ActionId>),
}

impl Discovery {
    fn find(&self, snapshot: &BTreeSet<ActionId>) -> Option<ActionId> {
        match self {
            Self::StrictlyAbove(Some(max)) => snapshot.last().filter(|id| *id > max).copied(),
            Self::StrictlyAbove(None) => snapshot.last().copied(),
            Self::NotIn(baseline) => snapshot.difference(baseline).max().copied(),
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns action-id state for one session.
pub struct ActionIdManager {
    authorization: Arc<dyn AuthorizationBackend>,
    wallet: Arc<dyn WalletSigner>,
    notifier: Arc<dyn NotificationSink>,
    contracts: ContractsConfig,
    tiers: TierConfig,
    timing: TimingConfig,
    state: Mutex<LifecycleState>,
    creating: AtomicBool,
}

impl ActionIdManager {
    pub fn new(
        authorization: Arc<dyn AuthorizationBackend>,
        wallet: Arc<dyn WalletSigner>,
        notifier: Arc<dyn NotificationSink>,
        contracts: ContractsConfig,
        tiers: TierConfig,
        timing: TimingConfig,
    ) -> Self {
        Self {
            authorization,
            wallet,
            notifier,
            contracts,
            tiers,
            timing,
            state: Mutex::new(LifecycleState {
                current: None,
                pending: BTreeSet::new(),
                statuses: BTreeMap::new(),
                preflight: PreflightCache::new(
                    timing.preflight_ttl_ready,
                    timing.preflight_ttl_not_ready,
                ),
                last_setup_at: None,
            }),
            creating: AtomicBool::new(false),
        }
    }

    /// Resolve the authorization a command needs.
    ///
    /// With `require_fresh` a new id is always created and an id present in
    /// the pending set before the call is never returned. Concurrent calls
    /// are rejected with [`ExecutionError::Busy`].
    pub async fn resolve_action_id(
        &self,
        ctx: SetupContext<'_>,
        required: bool,
        options: ResolveOptions,
    ) -> Result<ActionResolution, ExecutionError> {
        if !required {
            return Ok(ActionResolution::NotRequired);
        }

        if self
            .creating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ExecutionError::Busy);
        }
        let _in_flight = InFlight(&self.creating);

        let id = if options.require_fresh {
            self.create(ctx, true).await?
        } else {
            self.resolve_reusable(ctx, options.force_refresh).await?
        };
        Ok(ActionResolution::Ready(id))
    }

    async fn resolve_reusable(
        &self,
        ctx: SetupContext<'_>,
        force_refresh: bool,
    ) -> Result<ActionId, ExecutionError> {
        let cached = {
            let mut state = self.state.lock().await;
            if force_refresh {
                if let Some(id) = state.current.take() {
                    state.statuses.insert(id, ActionIdStatus::Invalid);
                }
            }
            state.current
        };

        let pending = self.fetch_pending(ctx.account, POLL_PAGE).await?;
        let mut state = self.state.lock().await;
        state.pending = pending.clone();

        if let Some(id) = cached {
            if pending.contains(&id) {
                tracing::debug!(action_id = %id, "reusing cached action id");
                return Ok(id);
            }
            tracing::info!(action_id = %id, "cached action id is no longer pending");
            state.statuses.insert(id, ActionIdStatus::Invalid);
            state.current = None;
        }

        let latest = pending
            .iter()
            .rev()
            .find(|id| state.is_adoptable(**id))
            .copied();
        if let Some(id) = latest {
            tracing::info!(action_id = %id, "adopting latest pending action id");
            state.adopt(id);
            return Ok(id);
        }
        drop(state);

        self.create(ctx, false).await
    }

    /// Run the setup protocol and discover the created id.
    async fn create(&self, ctx: SetupContext<'_>, require_fresh: bool) -> Result<ActionId, ExecutionError> {
        if let Some(remaining) = self.cooldown_remaining().await {
            if !require_fresh {
                if let Some(id) = self.latest_known_pending().await {
                    tracing::info!(action_id = %id, "setup cooldown active, reusing pending id");
                    return Ok(id);
                }
            }
            self.notifier.notify(NotificationEvent::new(
                NotificationKind::Info,
                "Setup cooldown",
                cooldown_message(remaining),
            ));
            return Err(ExecutionError::CooldownActive { remaining });
        }

        let executor = self.contracts.executor()?.to_string();
        let preflight = self.preflight(ctx.account).await?;
        if !preflight.ready {
            return Err(ExecutionError::ExecutorNotReady(preflight.message));
        }

        let baseline = self.fetch_pending(ctx.account, POLL_PAGE).await?;
        let discovery = if require_fresh {
            Discovery::StrictlyAbove(baseline.last().copied())
        } else {
            Discovery::NotIn(baseline.clone())
        };
        {
            let mut state = self.state.lock().await;
            state.pending = baseline.clone();
        }

        let approval = if preflight.burner_role_granted {
            None
        } else {
            Some(self.burn_approval(&executor, ctx.tier)?)
        };

        let tx_hash = match self
            .submit_setup(ctx, &executor, approval, require_fresh)
            .await?
        {
            SetupSubmission::Submitted(tx_hash) => tx_hash,
            SetupSubmission::AdoptLatest => {
                let mut state = self.state.lock().await;
                let latest = baseline
                    .iter()
                    .rev()
                    .find(|id| state.is_adoptable(**id))
                    .copied()
                    .ok_or_else(|| {
                        ExecutionError::Backend(CollaboratorError::new(
                            FailureKind::RateLimited,
                            "rate limited and no unused pending action id to fall back to",
                        ))
                    })?;
                tracing::info!(action_id = %latest, "rate limited, falling back to latest pending id");
                state.adopt(latest);
                return Ok(latest);
            }
        };

        self.state.lock().await.last_setup_at = Some(Instant::now());
        tracing::info!(tx_hash = %tx_hash, "setup transaction submitted");

        if let Some(id) = self.discover(ctx.account, &discovery).await {
            tracing::info!(action_id = %id, "discovered new action id");
            self.state.lock().await.adopt(id);
            return Ok(id);
        }

        if !require_fresh {
            if let Some(id) = self.latest_known_pending().await {
                tracing::warn!(action_id = %id, "new action id not found, using latest pending id");
                self.state.lock().await.adopt(id);
                return Ok(id);
            }
        }

        Err(ExecutionError::ActionIdNotDiscovered(format!(
            "setup transaction {tx_hash} was submitted but no new pending action appeared; \
             retry the wallet signature"
        )))
    }

    async fn submit_setup(
        &self,
        ctx: SetupContext<'_>,
        executor: &str,
        approval: Option<Call>,
        require_fresh: bool,
    ) -> Result<SetupSubmission, ExecutionError> {
        let mut spent = SetupRetries::default();
        let mut window: Option<SignatureWindow> = None;

        loop {
            let current_window = match window.take() {
                Some(window) => window,
                None => match self
                    .authorization
                    .prepare_signature_window(ctx.account, ctx.tier)
                    .await
                {
                    Ok(window) => window,
                    Err(err) => match setup_recovery(
                        err.kind,
                        spent,
                        require_fresh,
                        self.timing.nonce_backoff,
                    ) {
                        RecoveryAction::AdoptLatestPending => {
                            return Ok(SetupSubmission::AdoptLatest);
                        }
                        _ => return Err(ExecutionError::from_backend(err)),
                    },
                },
            };

            tokio::time::sleep(self.timing.wallet_settle_delay).await;

            let mut batch = CallBatch::default();
            if let Some(ref approval) = approval {
                batch.push(approval.clone());
            }
            batch.push(submit_action_call(executor, ctx.tier, &current_window));

            self.notifier.notify(NotificationEvent::new(
                NotificationKind::SignatureRequested,
                "Sign setup transaction",
                format!("Approve the {} execution setup in your wallet.", ctx.tier),
            ));

            let request = SignRequest {
                chain: Chain::Starknet,
                provider: ctx.provider,
                calls: batch,
            };
            let err = match self.wallet.sign_and_submit(&request).await {
                Ok(tx_hash) => {
                    self.notifier.notify(
                        NotificationEvent::new(
                            NotificationKind::Success,
                            "Setup submitted",
                            "Waiting for the new action id to appear on-chain.",
                        )
                        .with_tx_hash(tx_hash.clone()),
                    );
                    return Ok(SetupSubmission::Submitted(tx_hash));
                }
                Err(err) => err,
            };

            match setup_recovery(err.kind, spent, require_fresh, self.timing.nonce_backoff) {
                RecoveryAction::RefreshWindowAndRetry => {
                    tracing::warn!("setup signature rejected, requesting a fresh window");
                    spent.signature_window = true;
                }
                RecoveryAction::RetryAfter(backoff) => {
                    tracing::warn!(?backoff, "nonce conflict during setup, retrying");
                    spent.nonce = true;
                    tokio::time::sleep(backoff).await;
                    window = Some(current_window);
                }
                RecoveryAction::AdoptLatestPending => return Ok(SetupSubmission::AdoptLatest),
                _ => return Err(ExecutionError::from_wallet(err)),
            }
        }
    }

    /// Poll the pending set, then do one broad refetch.
    async fn discover(&self, account: &str, discovery: &Discovery) -> Option<ActionId> {
        for attempt in 1..=self.timing.poll_attempts {
            tokio::time::sleep(self.timing.poll_interval).await;
            match self.fetch_pending(account, POLL_PAGE).await {
                Ok(snapshot) => {
                    let found = discovery.find(&snapshot);
                    self.state.lock().await.pending = snapshot;
                    if found.is_some() {
                        return found;
                    }
                    tracing::debug!(attempt, "new action id not visible yet");
                }
                Err(err) => tracing::debug!(attempt, "pending poll failed: {}", err),
            }
        }

        match self.fetch_pending(account, BROAD_REFETCH_PAGE).await {
            Ok(snapshot) => {
                let found = discovery.find(&snapshot);
                self.state.lock().await.pending = snapshot;
                found
            }
            Err(err) => {
                tracing::warn!("broad pending refetch failed: {}", err);
                None
            }
        }
    }

    async fn preflight(&self, account: &str) -> Result<PreflightReport, ExecutionError> {
        if let Some(hit) = self.state.lock().await.preflight.get(Instant::now()) {
            tracing::debug!(ready = hit.ready, "executor preflight cache hit");
            return Ok(hit);
        }

        let report = self
            .authorization
            .preflight_executor(account)
            .await
            .map_err(ExecutionError::from_backend)?;
        tracing::debug!(ready = report.ready, "executor preflight refreshed");
        self.state
            .lock()
            .await
            .preflight
            .store(&report, Instant::now());
        Ok(report)
    }

    fn burn_approval(&self, executor: &str, tier: Tier) -> Result<Call, ExecutionError> {
        let token = self.contracts.carel_token()?;
        let burn = self.tiers.burn_for(tier);
        let amount = decimal_to_units(burn, 18).map_err(|e| {
            ExecutionError::Config(crate::error::ConfigError::InvalidValue {
                key: format!("CAREL_TIER{}_BURN", tier.level()),
                message: e.to_string(),
            })
        })?;
        Ok(Call::approve(token, executor, amount))
    }

    async fn fetch_pending(
        &self,
        account: &str,
        count: u32,
    ) -> Result<BTreeSet<ActionId>, ExecutionError> {
        self.authorization
            .list_pending_actions(account, None, count)
            .await
            .map(|ids| ids.into_iter().map(ActionId).collect())
            .map_err(ExecutionError::from_backend)
    }

    async fn cooldown_remaining(&self) -> Option<Duration> {
        let last = self.state.lock().await.last_setup_at?;
        self.timing
            .setup_cooldown
            .checked_sub(last.elapsed())
            .filter(|remaining| !remaining.is_zero())
    }

    async fn latest_known_pending(&self) -> Option<ActionId> {
        let state = self.state.lock().await;
        state
            .pending
            .iter()
            .rev()
            .find(|id| state.is_adoptable(**id))
            .copied()
    }

    /// Mark an id as used by a successful execution.
    pub async fn consume(&self, id: ActionId) {
        let mut state = self.state.lock().await;
        state.statuses.insert(id, ActionIdStatus::Consumed);
        state.pending.remove(&id);
        if state.current == Some(id) {
            state.current = None;
        }
        tracing::debug!(action_id = %id, "action id consumed");
    }

    /// Drop all cached authorization state after the backend rejected it.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if let Some(id) = state.current.take() {
            state.statuses.insert(id, ActionIdStatus::Invalid);
            tracing::info!(action_id = %id, "action id invalidated");
        }
        state.pending.clear();
        state.preflight.invalidate();
    }

    pub async fn status(&self, id: ActionId) -> Option<ActionIdStatus> {
        self.state.lock().await.statuses.get(&id).copied()
    }

    pub async fn view(&self) -> ActionIdView {
        let state = self.state.lock().await;
        ActionIdView {
            current: state.current,
            pending: state.pending.iter().rev().copied().collect(),
        }
    }
}

/// Informational reply while a recent setup transaction settles.
pub fn cooldown_message(remaining: Duration) -> String {
    format!(
        "A setup transaction was just submitted. Try again in {}s.",
        remaining.as_secs().max(1)
    )
}

enum SetupSubmission {
    Submitted(String),
    AdoptLatest,
}

fn submit_action_call(executor: &str, tier: Tier, window: &SignatureWindow) -> Call {
    let mut calldata = vec![
        format!("{:#x}", tier.level()),
        format!("{:#x}", window.valid_from),
        format!("{:#x}", window.valid_until),
        format!("{:#x}", window.signature.len()),
    ];
    calldata.extend(window.signature.iter().cloned());
    Call::new(executor, "submit_action", calldata)
}
