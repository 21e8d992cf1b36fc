//! Session orchestrator.
//!
//! Owns the confirmation gate, the action-id manager, and the transcript
//! for one hosting session. Nothing here is global, so concurrent sessions
//! stay isolated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::action_id::{
    ActionIdManager, ActionIdView, ActionResolution, ResolveOptions, SetupContext, cooldown_message,
};
use crate::agent::calls::Chain;
use crate::agent::classifier::{CommandClass, CommandClassifier};
use crate::agent::confirmation::{self, ConfirmationGate, GateDecision, GateInput, PendingConfirmation};
use crate::agent::intent::{Intent, IntentParse};
use crate::agent::pipeline::{ExecutionContext, ExecutionOutcome, ExecutionPipeline, capitalize};
use crate::agent::recovery::{RecoveryAction, execution_recovery, remediation_hint};
use crate::agent::tier::Tier;
use crate::agent::{Collaborators, WalletAccounts};
use crate::backend::{NotificationEvent, NotificationKind, TierStatus};
use crate::config::Config;
use crate::error::{ExecutionError, RuntimeStage, RuntimeStageState, RuntimeStatusPayload};

const DEFAULT_REPLY: &str =
    "I can help you swap, bridge, stake, claim rewards, and manage limit orders on CAREL.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// What the host shows for one user turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    pub status: RuntimeStatusPayload,
}

impl TurnReply {
    fn text(reply: impl Into<String>, status: RuntimeStatusPayload) -> Self {
        Self {
            reply: reply.into(),
            outcome: None,
            status,
        }
    }
}

/// Result of running a confirmed command.
enum Completion {
    Executed(ExecutionOutcome),
    Reply(String),
}

struct Session {
    gate: ConfirmationGate,
    transcript: Vec<ChatMessage>,
    accounts: WalletAccounts,
}

struct Sending<'a>(&'a AtomicBool);

impl Drop for Sending<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one session from user text to confirmed execution.
pub struct Orchestrator {
    session_id: Uuid,
    collaborators: Collaborators,
    config: Arc<Config>,
    classifier: CommandClassifier,
    action_ids: ActionIdManager,
    pipeline: ExecutionPipeline,
    session: Mutex<Session>,
    sending: AtomicBool,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: Config, accounts: WalletAccounts) -> Self {
        let config = Arc::new(config);
        let action_ids = ActionIdManager::new(
            collaborators.authorization.clone(),
            collaborators.wallet.clone(),
            collaborators.notifier.clone(),
            config.contracts.clone(),
            config.tiers,
            config.timing,
        );
        Self {
            session_id: Uuid::new_v4(),
            classifier: CommandClassifier::new(config.features.bridge_on_tier3),
            pipeline: ExecutionPipeline::new(collaborators.clone(), config.clone()),
            collaborators,
            config,
            action_ids,
            session: Mutex::new(Session {
                gate: ConfirmationGate::new(),
                transcript: Vec::new(),
                accounts,
            }),
            sending: AtomicBool::new(false),
        }
    }

    /// Identifies this session in log output.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Handle one user turn under the selected tier.
    pub async fn handle_message(&self, tier: Tier, text: &str) -> TurnReply {
        let span = tracing::debug_span!("turn", session = %self.session_id, tier = %tier);
        self.handle_turn(tier, text.trim()).instrument(span).await
    }

    async fn handle_turn(&self, tier: Tier, text: &str) -> TurnReply {
        let class = self.classifier.classify(tier, text);
        tracing::debug!(tier = %tier, ?class, "command classified");

        if let CommandClass::Blocked(reply) = class {
            self.record(ChatRole::User, text).await;
            self.record(ChatRole::Assistant, reply).await;
            return TurnReply::text(
                reply,
                RuntimeStatusPayload::new(RuntimeStage::Classify, RuntimeStageState::Blocked),
            );
        }

        let decision = self.session.lock().await.gate.handle(GateInput {
            tier,
            text,
            onchain: class.is_onchain(),
            now: Utc::now(),
        });

        match decision {
            GateDecision::PassThrough => {
                self.record(ChatRole::User, text).await;
                self.converse(tier, text).await
            }
            GateDecision::Prompt { command } => {
                self.record(ChatRole::User, &command).await;
                let prompt =
                    confirmation::confirmation_prompt(tier, &command, self.config.tiers.burn_for(tier));
                self.reply(
                    prompt,
                    RuntimeStatusPayload::new(RuntimeStage::Confirm, RuntimeStageState::AwaitingInput)
                        .with_intent(command),
                )
                .await
            }
            GateDecision::Reprompt { command } => {
                self.record(ChatRole::User, text).await;
                self.reply(
                    confirmation::reprompt(&command),
                    RuntimeStatusPayload::new(RuntimeStage::Confirm, RuntimeStageState::AwaitingInput)
                        .with_intent(command),
                )
                .await
            }
            GateDecision::Cancelled { command } => {
                self.record(ChatRole::User, text).await;
                self.reply(
                    confirmation::cancelled(&command),
                    RuntimeStatusPayload::new(RuntimeStage::Confirm, RuntimeStageState::Completed)
                        .with_intent(command),
                )
                .await
            }
            GateDecision::Execute { command } => {
                self.record(ChatRole::User, text).await;
                self.execute_confirmed(tier, &command).await
            }
        }
    }

    async fn converse(&self, tier: Tier, text: &str) -> TurnReply {
        let status = RuntimeStatusPayload::new(RuntimeStage::Classify, RuntimeStageState::Completed);
        match self.collaborators.interpreter.interpret(tier, text).await {
            Ok(interpreted) => {
                let reply = interpreted.reply.unwrap_or_else(|| DEFAULT_REPLY.to_string());
                self.reply(reply, status).await
            }
            Err(err) => {
                tracing::warn!(kind = err.kind.as_str(), "interpreter failed: {}", err);
                self.surface(ExecutionError::from_backend(err)).await
            }
        }
    }

    async fn execute_confirmed(&self, tier: Tier, command: &str) -> TurnReply {
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.surface(ExecutionError::Busy).await;
        }
        let _sending = Sending(&self.sending);
        let accounts = self.session.lock().await.accounts.clone();

        match self.run(tier, command, &accounts).await {
            Ok(Completion::Executed(outcome)) => {
                let status = RuntimeStatusPayload::new(RuntimeStage::Finalize, RuntimeStageState::Completed)
                    .with_intent(outcome.label);
                let mut reply = self.reply(outcome.summary(), status).await;
                reply.outcome = Some(outcome);
                reply
            }
            Ok(Completion::Reply(text)) => {
                self.reply(
                    text,
                    RuntimeStatusPayload::new(RuntimeStage::Execute, RuntimeStageState::Completed),
                )
                .await
            }
            Err(ExecutionError::CooldownActive { remaining }) => {
                tracing::info!(?remaining, "setup cooldown active, command not executed");
                self.reply(
                    cooldown_message(remaining),
                    RuntimeStatusPayload::new(RuntimeStage::Authorize, RuntimeStageState::Blocked),
                )
                .await
            }
            Err(err) => self.surface(err).await,
        }
    }

    async fn run(
        &self,
        tier: Tier,
        command: &str,
        accounts: &WalletAccounts,
    ) -> Result<Completion, ExecutionError> {
        let account = accounts.require(Chain::Starknet)?;
        let status = self
            .collaborators
            .authorization
            .tier_status(account)
            .await
            .map_err(ExecutionError::from_backend)?;
        if status.current_level < tier {
            return Err(ExecutionError::TierLocked {
                selected: tier.level(),
                unlocked: status.current_level.level(),
            });
        }

        let interpreted = self
            .collaborators
            .interpreter
            .interpret(tier, command)
            .await
            .map_err(ExecutionError::from_backend)?;
        let intent = match Intent::from_interpreted(&interpreted) {
            IntentParse::Ready(intent) => intent,
            IntentParse::Incomplete { action, problem } => {
                tracing::info!(%action, %problem, "interpreter output incomplete, not executing");
                return Ok(Completion::Reply(format!(
                    "I could not prepare the {}: {}. Please restate the command with all details.",
                    action.replace('_', " "),
                    problem
                )));
            }
            IntentParse::Conversational => {
                return Ok(Completion::Reply(
                    interpreted.reply.unwrap_or_else(|| DEFAULT_REPLY.to_string()),
                ));
            }
        };

        if intent.min_tier() > tier {
            return Err(ExecutionError::TierTooLow {
                action: intent.label(),
                required: intent.min_tier().level(),
                current: tier.level(),
            });
        }
        if !intent.has_onchain_calls() {
            return Ok(Completion::Reply(interpreted.reply.unwrap_or_else(|| {
                format!("{} is ready. Ask me for a summary any time.", capitalize(intent.label()))
            })));
        }

        let mut retries = 0;
        loop {
            match self.attempt(tier, &intent, accounts, retries > 0).await {
                Ok(outcome) => return Ok(Completion::Executed(outcome)),
                Err(err) => match execution_recovery(&err, retries) {
                    RecoveryAction::ClearAndRetry => {
                        tracing::warn!("authorization state rejected, clearing action id and retrying: {}", err);
                        self.action_ids.invalidate().await;
                        retries += 1;
                    }
                    _ => return Err(err),
                },
            }
        }
    }

    async fn attempt(
        &self,
        tier: Tier,
        intent: &Intent,
        accounts: &WalletAccounts,
        force_refresh: bool,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let setup = SetupContext {
            account: accounts.require(Chain::Starknet)?,
            provider: accounts.provider,
            tier,
        };
        let options = ResolveOptions {
            force_refresh,
            require_fresh: self.config.features.fresh_setup_per_execution,
        };

        let resolution = match self
            .action_ids
            .resolve_action_id(setup, intent.has_onchain_calls(), options)
            .await
        {
            Err(ExecutionError::CooldownActive { remaining }) if force_refresh => {
                tracing::info!(?remaining, "waiting out setup cooldown before retry");
                tokio::time::sleep(remaining).await;
                self.action_ids
                    .resolve_action_id(setup, intent.has_onchain_calls(), options)
                    .await?
            }
            other => other?,
        };

        let ctx = ExecutionContext {
            tier,
            action_id: resolution.action_id(),
            accounts,
        };
        let outcome = self.pipeline.execute(&ctx, intent).await?;
        if let ActionResolution::Ready(id) = resolution {
            self.action_ids.consume(id).await;
        }
        Ok(outcome)
    }

    /// Every fatal error becomes a chat message and a notification.
    async fn surface(&self, err: ExecutionError) -> TurnReply {
        let status = err.to_runtime_status_payload(stage_for(&err));
        tracing::warn!(status = %status.to_status_line(), "execution failed: {}", err);

        let message = match remediation_hint(&err) {
            Some(hint) => format!("{err}. {hint}"),
            None => err.to_string(),
        };
        self.collaborators.notifier.notify(NotificationEvent::new(
            NotificationKind::Error,
            "Execution failed",
            message.clone(),
        ));
        self.reply(message, status).await
    }

    async fn reply(&self, text: String, status: RuntimeStatusPayload) -> TurnReply {
        self.record(ChatRole::Assistant, &text).await;
        TurnReply::text(text, status)
    }

    async fn record(&self, role: ChatRole, content: &str) {
        self.session.lock().await.transcript.push(ChatMessage {
            role,
            content: content.to_string(),
        });
    }

    /// Forward a confirmed tier-upgrade transaction to the backend.
    pub async fn record_tier_upgrade(&self, tier: Tier, tx_hash: &str) -> Result<TierStatus, ExecutionError> {
        let accounts = self.session.lock().await.accounts.clone();
        let account = accounts.require(Chain::Starknet)?;
        let status = self
            .collaborators
            .authorization
            .record_tier_upgrade(account, tier, tx_hash)
            .await
            .map_err(ExecutionError::from_backend)?;
        tracing::info!(level = %status.current_level, "tier upgrade recorded");
        Ok(status)
    }

    pub async fn set_accounts(&self, accounts: WalletAccounts) {
        self.session.lock().await.accounts = accounts;
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.session.lock().await.transcript.clone()
    }

    pub async fn pending_confirmation(&self, tier: Tier) -> Option<PendingConfirmation> {
        self.session.lock().await.gate.pending(tier).cloned()
    }

    pub async fn action_id_view(&self) -> ActionIdView {
        self.action_ids.view().await
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }
}

fn stage_for(err: &ExecutionError) -> RuntimeStage {
    match err {
        ExecutionError::AuthorizationState(_)
        | ExecutionError::ActionIdNotDiscovered(_)
        | ExecutionError::ExecutorNotReady(_)
        | ExecutionError::CooldownActive { .. }
        | ExecutionError::Busy => RuntimeStage::Authorize,
        ExecutionError::TierLocked { .. } | ExecutionError::TierTooLow { .. } => RuntimeStage::Confirm,
        _ => RuntimeStage::Execute,
    }
}
