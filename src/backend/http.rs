//! HTTP client for the CAREL backend API.
//!
//! Responses are wrapped in a `{ success, data, error }` envelope. Non-2xx
//! statuses and `success: false` envelopes are both reported as
//! [`CollaboratorError`], with the kind inferred from the status and body.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::agent::tier::Tier;
use crate::config::BackendConfig;
use crate::error::{CollaboratorError, FailureKind};

use super::{
    AuthorizationBackend, BridgeQuote, BridgeQuoteRequest, CollaboratorResult, CommandInterpreter,
    ExecutionBackend, FinalizeFlow, FinalizeReceipt, FinalizeRequest, InterpretedCommand,
    PreflightReport, PrivacyProofService, PrivacyRelayer, PrivacyVerificationPayload, ProofRequest,
    QuoteService, RelayReceipt, RelayRequest, SignatureWindow, SwapQuote, SwapQuoteRequest,
    TierStatus,
};

static SENSITIVE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
        (
            r"(?i)\b(token|api[_\-]?key|secret|password)\b(\s*[:=]\s*)([^,\s]+)",
            "$1$2[REDACTED]",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Strip credentials from text before it reaches logs or the user.
pub(crate) fn redact_sensitive_detail(raw: &str) -> String {
    SENSITIVE_PATTERNS
        .iter()
        .fold(raw.to_string(), |value, (re, replacement)| {
            re.replace_all(&value, *replacement).into_owned()
        })
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "default_success")]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Unwrap a response body, turning `success: false` into an error.
fn parse_envelope<T: DeserializeOwned>(body: &str) -> CollaboratorResult<T> {
    let envelope: Envelope<T> = serde_json::from_str(body).map_err(|e| {
        CollaboratorError::new(FailureKind::Other, format!("Invalid backend response: {e}"))
    })?;
    if !envelope.success {
        let detail = envelope
            .error
            .or(envelope.message)
            .unwrap_or_else(|| "backend reported failure".to_string());
        return Err(CollaboratorError::from_message(redact_sensitive_detail(&detail)));
    }
    envelope
        .data
        .ok_or_else(|| CollaboratorError::new(FailureKind::Other, "Backend response has no data"))
}

/// Pull the most specific message out of an error body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "message"].iter().find_map(|key| match value.get(*key) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Object(o)) => o
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            })
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn status_error(status: StatusCode, body: &str) -> CollaboratorError {
    let message = redact_sensitive_detail(&format!("HTTP {}: {}", status, error_detail(body)));
    match status.as_u16() {
        429 => CollaboratorError::new(FailureKind::RateLimited, message),
        502..=504 => CollaboratorError::new(FailureKind::Network, message),
        _ => CollaboratorError::from_message(message),
    }
}

fn finalize_route(flow: FinalizeFlow) -> &'static str {
    match flow {
        FinalizeFlow::Swap => "/api/v1/swap/execute",
        FinalizeFlow::Bridge => "/api/v1/bridge/execute",
        FinalizeFlow::StakeDeposit => "/api/v1/stake/deposit",
        FinalizeFlow::StakeWithdraw => "/api/v1/stake/withdraw",
        FinalizeFlow::StakeClaim => "/api/v1/stake/claim",
        FinalizeFlow::LimitOrderCreate => "/api/v1/limit-order/create",
        FinalizeFlow::LimitOrderCancel => "/api/v1/limit-order",
    }
}

#[derive(Serialize)]
struct AccountBody<'a> {
    user_address: &'a str,
}

#[derive(Serialize)]
struct PrepareActionBody<'a> {
    user_address: &'a str,
    level: Tier,
}

#[derive(Serialize)]
struct UpgradeBody<'a> {
    user_address: &'a str,
    target_level: Tier,
    onchain_tx_hash: &'a str,
}

#[derive(Deserialize)]
struct PendingActions {
    #[serde(default)]
    pending: Vec<u64>,
}

#[derive(Serialize)]
struct InterpretBody<'a> {
    command: &'a str,
    level: Tier,
}

#[derive(Deserialize)]
struct InterpretResponse {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    parameters: serde_json::Value,
    #[serde(default)]
    response: Option<String>,
}

impl From<InterpretResponse> for InterpretedCommand {
    fn from(wire: InterpretResponse) -> Self {
        let action = wire
            .action
            .or_else(|| wire.actions.into_iter().next())
            .unwrap_or_else(|| "chat".to_string());
        Self {
            action,
            parameters: wire.parameters,
            reply: wire.response.filter(|r| !r.trim().is_empty()),
        }
    }
}

/// Backend client implementing every server-side collaborator contract.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> CollaboratorResult<T> {
        let request = match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token.expose_secret())),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let body = response.text().await?;
        parse_envelope(&body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> CollaboratorResult<T> {
        tracing::debug!(path, "backend GET");
        self.send(self.client.get(self.url(path))).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CollaboratorResult<T> {
        tracing::debug!(path, "backend POST");
        self.send(self.client.post(self.url(path)).json(body)).await
    }
}

#[async_trait]
impl AuthorizationBackend for HttpBackend {
    async fn prepare_signature_window(
        &self,
        account: &str,
        tier: Tier,
    ) -> CollaboratorResult<SignatureWindow> {
        self.post(
            "/api/v1/ai/prepare-action",
            &PrepareActionBody {
                user_address: account,
                level: tier,
            },
        )
        .await
    }

    async fn preflight_executor(&self, account: &str) -> CollaboratorResult<PreflightReport> {
        self.post("/api/v1/ai/ensure-executor", &AccountBody { user_address: account })
            .await
    }

    async fn list_pending_actions(
        &self,
        account: &str,
        cursor: Option<u64>,
        count: u32,
    ) -> CollaboratorResult<Vec<u64>> {
        let request = self
            .client
            .get(self.url("/api/v1/ai/pending"))
            .query(&[("user_address", account.to_string()), ("count", count.to_string())]);
        let request = match cursor {
            Some(cursor) => request.query(&[("cursor", cursor)]),
            None => request,
        };
        let pending: PendingActions = self.send(request).await?;
        Ok(pending.pending)
    }

    async fn tier_status(&self, account: &str) -> CollaboratorResult<TierStatus> {
        let request = self
            .client
            .get(self.url("/api/v1/ai/level"))
            .query(&[("user_address", account)]);
        self.send(request).await
    }

    async fn record_tier_upgrade(
        &self,
        account: &str,
        tier: Tier,
        tx_hash: &str,
    ) -> CollaboratorResult<TierStatus> {
        self.post(
            "/api/v1/ai/upgrade",
            &UpgradeBody {
                user_address: account,
                target_level: tier,
                onchain_tx_hash: tx_hash,
            },
        )
        .await
    }
}

#[async_trait]
impl QuoteService for HttpBackend {
    async fn swap_quote(&self, request: &SwapQuoteRequest) -> CollaboratorResult<SwapQuote> {
        self.post("/api/v1/swap/quote", request).await
    }

    async fn bridge_quote(&self, request: &BridgeQuoteRequest) -> CollaboratorResult<BridgeQuote> {
        self.post("/api/v1/bridge/quote", request).await
    }
}

#[async_trait]
impl PrivacyProofService for HttpBackend {
    async fn prepare_proof(
        &self,
        request: &ProofRequest,
    ) -> CollaboratorResult<PrivacyVerificationPayload> {
        self.post("/api/v1/privacy/prepare-private-execution", request)
            .await
    }
}

#[async_trait]
impl PrivacyRelayer for HttpBackend {
    async fn relay(&self, request: &RelayRequest) -> CollaboratorResult<RelayReceipt> {
        self.post("/api/v1/privacy/auto-submit", request)
            .await
            .map_err(|err| match err.kind {
                FailureKind::Network | FailureKind::RateLimited => {
                    CollaboratorError::new(FailureKind::RelayerUnavailable, err.message)
                }
                _ => err,
            })
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn finalize(&self, request: &FinalizeRequest) -> CollaboratorResult<FinalizeReceipt> {
        let route = finalize_route(request.flow);
        if request.flow == FinalizeFlow::LimitOrderCancel {
            let order_id = request
                .details
                .get("order_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    CollaboratorError::new(FailureKind::Other, "cancel request has no order_id")
                })?;
            let path = format!("{route}/{order_id}");
            tracing::debug!(path = %path, "backend DELETE");
            let body = serde_json::json!({
                "onchain_tx_hash": request.tx_hash,
                "action_id": request.action_id,
            });
            return self
                .send(self.client.delete(self.url(&path)).json(&body))
                .await;
        }
        self.post(route, request).await
    }
}

#[async_trait]
impl CommandInterpreter for HttpBackend {
    async fn interpret(&self, tier: Tier, text: &str) -> CollaboratorResult<InterpretedCommand> {
        let wire: InterpretResponse = self
            .post(
                "/api/v1/ai/execute",
                &InterpretBody {
                    command: text,
                    level: tier,
                },
            )
            .await?;
        Ok(wire.into())
    }
}
