//! Error types for carel-agent.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// Orchestration stage for runtime status reporting.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStage {
    Classify,
    Confirm,
    Authorize,
    Execute,
    Finalize,
}

/// Runtime stage state for status reporting.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStageState {
    Started,
    Completed,
    Failed,
    Blocked,
    AwaitingInput,
}

/// Failure domains surfaced to chat and notification consumers.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeErrorDomain {
    Configuration,
    Authorization,
    Wallet,
    Relayer,
    User,
    Asset,
    Unknown,
}

/// Structured runtime error payload for status events.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuntimeErrorPayload {
    pub domain: RuntimeErrorDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl RuntimeErrorPayload {
    fn new(
        domain: RuntimeErrorDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }
}

/// Structured runtime status payload.
///
/// Notification sinks and hosts receive free-form strings; this envelope
/// keeps a stable, parseable shape for staged status and failure handling.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuntimeStatusPayload {
    pub kind: &'static str,
    pub version: u8,
    pub stage: RuntimeStage,
    pub state: RuntimeStageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RuntimeErrorPayload>,
}

impl RuntimeStatusPayload {
    const KIND: &'static str = "carel_execution_status";
    const VERSION: u8 = 1;

    pub fn new(stage: RuntimeStage, state: RuntimeStageState) -> Self {
        Self {
            kind: Self::KIND,
            version: Self::VERSION,
            stage,
            state,
            intent: None,
            detail: None,
            error: None,
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_error(mut self, error: RuntimeErrorPayload) -> Self {
        self.error = Some(error);
        self
    }

    /// Serialize for transport over string-only status channels.
    pub fn to_status_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"kind\":\"{}\",\"version\":{},\"stage\":\"{:?}\",\"state\":\"{:?}\"}}",
                Self::KIND,
                Self::VERSION,
                self.stage,
                self.state
            )
        })
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn missing(key: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            key: key.into(),
            hint: hint.into(),
        }
    }
}

/// Structured failure kinds reported by wallet, backend, and relayer
/// collaborators. Retry policy matches on these, never on message text.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserRejected,
    InvalidSignature,
    NonceConflict,
    RateLimited,
    NoLongerPending,
    SetupRequired,
    RelayerUnavailable,
    EntrypointNotFound,
    Network,
    Other,
}

impl FailureKind {
    /// Classify a free-text failure reported by a collaborator that has no
    /// structured error channel (HTTP bodies, wallet extension strings).
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&[
            "user rejected",
            "user denied",
            "user abort",
            "rejected by user",
            "cancelled by user",
            "canceled by user",
            "user cancel",
        ]) {
            Self::UserRejected
        } else if has(&["requires onchain_tx_hash", "relayer unavailable", "relayer disabled"]) {
            Self::RelayerUnavailable
        } else if has(&["invalid signature", "signature expired", "invalid_signature"]) {
            Self::InvalidSignature
        } else if has(&["nonce too low", "invalid transaction nonce", "nonce is pending", "pending nonce"]) {
            Self::NonceConflict
        } else if has(&["no longer pending", "action not pending", "not pending"]) {
            Self::NoLongerPending
        } else if has(&[
            "entrypoint_not_found",
            "entrypoint not found",
            "entry point not found",
            "entry_point_not_found",
        ]) {
            Self::EntrypointNotFound
        } else if has(&["setup required", "setup on-chain", "executor not ready", "burner role"]) {
            Self::SetupRequired
        } else if has(&["rate limit", "too many requests"]) {
            // HTTP 429 is mapped from the status code, not the body text.
            Self::RateLimited
        } else if has(&["timed out", "timeout", "connection", "network"]) {
            Self::Network
        } else {
            Self::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRejected => "user_rejected",
            Self::InvalidSignature => "invalid_signature",
            Self::NonceConflict => "nonce_conflict",
            Self::RateLimited => "rate_limited",
            Self::NoLongerPending => "no_longer_pending",
            Self::SetupRequired => "setup_required",
            Self::RelayerUnavailable => "relayer_unavailable",
            Self::EntrypointNotFound => "entrypoint_not_found",
            Self::Network => "network",
            Self::Other => "other",
        }
    }
}

/// Error returned by an external collaborator, with its original message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub kind: FailureKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from free text, classifying the kind from the message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::from_message(&message),
            message,
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            return Self::new(FailureKind::RateLimited, err.to_string());
        }
        if err.is_timeout() || err.is_connect() {
            return Self::new(FailureKind::Network, err.to_string());
        }
        Self::from_message(err.to_string())
    }
}

/// Failures of a single orchestrated execution attempt.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Action authorization is no longer valid: {0}")]
    AuthorizationState(String),

    #[error("On-chain setup did not produce a new action id: {0}")]
    ActionIdNotDiscovered(String),

    #[error("Executor is not ready to accept actions: {0}")]
    ExecutorNotReady(String),

    #[error("Setup cooldown active, retry in {}s", remaining.as_secs().max(1))]
    CooldownActive { remaining: Duration },

    #[error("Wallet error: {0}")]
    Wallet(CollaboratorError),

    #[error("Transaction rejected by user: {0}")]
    UserRejected(String),

    #[error("Privacy relayer unavailable: {0}")]
    RelayerUnavailable(String),

    #[error(
        "Privacy relayer unavailable and strict shielded-pool mode forbids a public wallet fallback: {0}"
    )]
    StrictShieldedPool(String),

    #[error("Privacy proof payload incomplete: missing {0}")]
    IncompleteProof(&'static str),

    #[error("Unsupported {family} asset '{symbol}'. Supported: {supported}")]
    UnsupportedAsset {
        family: &'static str,
        symbol: String,
        supported: String,
    },

    #[error("Unsupported bridge route {route}. Supported routes: {supported}")]
    UnsupportedPair { route: String, supported: String },

    #[error("Connect your {chain} wallet to continue")]
    WalletNotConnected { chain: &'static str },

    #[error("{action} requires tier {required} (current tier {current})")]
    TierTooLow {
        action: &'static str,
        required: u8,
        current: u8,
    },

    #[error("Tier {selected} is not unlocked for this account (highest unlocked tier {unlocked})")]
    TierLocked { selected: u8, unlocked: u8 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] crate::agent::calls::AmountError),

    #[error("Refusing to sign malformed call batch: {0}")]
    InvalidCallBatch(#[from] crate::agent::calls::CallBatchError),

    #[error("Another execution is already in progress")]
    Busy,

    #[error("Backend error: {0}")]
    Backend(CollaboratorError),
}

impl ExecutionError {
    /// Authorization-state failures are recovered by clearing cached action
    /// state and re-entering the lifecycle manager.
    pub fn is_authorization_state(&self) -> bool {
        match self {
            Self::AuthorizationState(_) => true,
            Self::Backend(err) | Self::Wallet(err) => matches!(
                err.kind,
                FailureKind::NoLongerPending | FailureKind::SetupRequired
            ),
            _ => false,
        }
    }

    /// Map a wallet collaborator failure, splitting out user rejections.
    pub fn from_wallet(err: CollaboratorError) -> Self {
        match err.kind {
            FailureKind::UserRejected => Self::UserRejected(err.message),
            FailureKind::NoLongerPending | FailureKind::SetupRequired => {
                Self::AuthorizationState(err.message)
            }
            _ => Self::Wallet(err),
        }
    }

    /// Map a backend collaborator failure.
    pub fn from_backend(err: CollaboratorError) -> Self {
        match err.kind {
            FailureKind::NoLongerPending | FailureKind::SetupRequired => {
                Self::AuthorizationState(err.message)
            }
            FailureKind::UserRejected => Self::UserRejected(err.message),
            _ => Self::Backend(err),
        }
    }

    /// Map execution errors into a structured surface for status/event consumers.
    pub fn to_runtime_error_payload(&self) -> RuntimeErrorPayload {
        let message = self.to_string();
        match self {
            Self::Config(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Configuration,
                "config.missing_setting",
                false,
                message,
            ),
            Self::AuthorizationState(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Authorization,
                "auth.action_not_pending",
                true,
                message,
            ),
            Self::ActionIdNotDiscovered(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Authorization,
                "auth.action_id_not_found",
                true,
                message,
            ),
            Self::ExecutorNotReady(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Authorization,
                "auth.executor_not_ready",
                true,
                message,
            ),
            Self::CooldownActive { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Authorization,
                "auth.setup_cooldown",
                true,
                message,
            ),
            Self::Wallet(err) => {
                let code = match err.kind {
                    FailureKind::InvalidSignature => "wallet.invalid_signature",
                    FailureKind::NonceConflict => "wallet.nonce_conflict",
                    FailureKind::EntrypointNotFound => "wallet.entrypoint_not_found",
                    FailureKind::RateLimited => "wallet.rate_limited",
                    _ => "wallet.failed",
                };
                RuntimeErrorPayload::new(RuntimeErrorDomain::Wallet, code, true, message)
            }
            Self::UserRejected(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::User,
                "user.rejected",
                false,
                message,
            ),
            Self::RelayerUnavailable(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Relayer,
                "relayer.unavailable",
                true,
                message,
            ),
            Self::StrictShieldedPool(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Relayer,
                "relayer.strict_no_fallback",
                false,
                message,
            ),
            Self::IncompleteProof(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Relayer,
                "relayer.incomplete_proof",
                false,
                message,
            ),
            Self::UnsupportedAsset { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Asset,
                "asset.unsupported",
                false,
                message,
            ),
            Self::UnsupportedPair { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Asset,
                "asset.unsupported_pair",
                false,
                message,
            ),
            Self::WalletNotConnected { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::User,
                "user.wallet_not_connected",
                false,
                message,
            ),
            Self::TierTooLow { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::User,
                "user.tier_too_low",
                false,
                message,
            ),
            Self::TierLocked { .. } => RuntimeErrorPayload::new(
                RuntimeErrorDomain::User,
                "user.tier_locked",
                false,
                message,
            ),
            Self::InvalidAmount(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::User,
                "user.invalid_amount",
                false,
                message,
            ),
            Self::InvalidCallBatch(_) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Configuration,
                "config.invalid_call_batch",
                false,
                message,
            ),
            Self::Busy => RuntimeErrorPayload::new(
                RuntimeErrorDomain::User,
                "user.busy",
                true,
                message,
            ),
            Self::Backend(err) => RuntimeErrorPayload::new(
                RuntimeErrorDomain::Unknown,
                match err.kind {
                    FailureKind::RateLimited => "backend.rate_limited",
                    FailureKind::Network => "backend.network",
                    _ => "backend.failed",
                },
                matches!(err.kind, FailureKind::RateLimited | FailureKind::Network),
                message,
            ),
        }
    }

    /// Build a failed runtime status payload from this error.
    pub fn to_runtime_status_payload(&self, stage: RuntimeStage) -> RuntimeStatusPayload {
        RuntimeStatusPayload::new(stage, RuntimeStageState::Failed)
            .with_detail(self.to_string())
            .with_error(self.to_runtime_error_payload())
    }
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
