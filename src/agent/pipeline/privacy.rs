//! Privacy path: proof, relayer, and the wallet fallback.

use crate::agent::calls::{Call, CallBatch, Chain};
use crate::agent::recovery::{RecoveryAction, relayer_recovery};
use crate::backend::{NotificationEvent, NotificationKind, PrivacyVerificationPayload, ProofRequest, RelayRequest};
use crate::error::{ConfigError, ExecutionError, FailureKind};

use super::{ExecutionContext, ExecutionPath, ExecutionPipeline, Plan, Submission};

/// blake3 digest binding a proof to a flow and its economic parameters.
///
/// `serde_json` maps keep keys sorted, so equal parameters hash equally.
pub fn binding_digest(flow: &str, parameters: &serde_json::Value) -> String {
    let canonical = serde_json::json!({ "flow": flow, "parameters": parameters });
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("0x{}", blake3::hash(&bytes).to_hex())
}

/// All four proof fields must be present before relaying.
pub fn validate_proof_payload(payload: &PrivacyVerificationPayload) -> Result<(), ExecutionError> {
    if payload.nullifier.trim().is_empty() {
        return Err(ExecutionError::IncompleteProof("nullifier"));
    }
    if payload.commitment.trim().is_empty() {
        return Err(ExecutionError::IncompleteProof("commitment"));
    }
    if payload.proof.is_empty() {
        return Err(ExecutionError::IncompleteProof("proof"));
    }
    if payload.public_inputs.is_empty() {
        return Err(ExecutionError::IncompleteProof("public_inputs"));
    }
    Ok(())
}

/// `submit_private_action(nullifier, commitment, proof: Span, public_inputs: Span)`.
fn submit_private_action_call(router: &str, payload: &PrivacyVerificationPayload) -> Call {
    let mut calldata = Vec::with_capacity(4 + payload.proof.len() + payload.public_inputs.len());
    calldata.push(payload.nullifier.clone());
    calldata.push(payload.commitment.clone());
    calldata.push(format!("{:#x}", payload.proof.len()));
    calldata.extend(payload.proof.iter().cloned());
    calldata.push(format!("{:#x}", payload.public_inputs.len()));
    calldata.extend(payload.public_inputs.iter().cloned());
    Call::new(router, "submit_private_action", calldata)
}

impl ExecutionPipeline {
    pub(super) async fn submit_private(
        &self,
        ctx: &ExecutionContext<'_>,
        plan: Plan,
    ) -> Result<Submission, ExecutionError> {
        let account = ctx.account()?.to_string();
        let request = ProofRequest {
            flow: plan.flow,
            account: account.clone(),
            binding: binding_digest(plan.flow, &plan.parameters),
            parameters: plan.parameters,
        };
        let payload = self
            .collaborators
            .proofs
            .prepare_proof(&request)
            .await
            .map_err(ExecutionError::from_backend)?;
        validate_proof_payload(&payload)?;
        tracing::debug!(flow = plan.flow, verifier = %payload.verifier, "privacy proof prepared");

        let relay = RelayRequest {
            flow: plan.flow,
            account,
            action_id: ctx.action_id.map(|id| id.0),
            payload: payload.clone(),
            action_calls: plan.calls.clone(),
        };
        let err = match self.collaborators.relayer.relay(&relay).await {
            Ok(receipt) => {
                tracing::info!(flow = plan.flow, tx_hash = %receipt.tx_hash, "relayer submitted private execution");
                return Ok(Submission {
                    tx_hash: receipt.tx_hash,
                    path: ExecutionPath::Relayer,
                });
            }
            Err(err) => err,
        };

        let strict = self.config.features.strict_shielded_pool;
        match relayer_recovery(err.kind, strict) {
            RecoveryAction::FallbackToWallet => {
                tracing::warn!(flow = plan.flow, "relayer unavailable, falling back to wallet signature");
                self.notify(NotificationEvent::new(
                    NotificationKind::Info,
                    "Relayer unavailable",
                    "Submitting the private execution with your wallet instead.",
                ));
                let router = self.config.contracts.privacy_router()?;
                if plan.calls.is_empty() {
                    return Err(ExecutionError::Config(ConfigError::missing(
                        format!("{}.calldata", plan.flow),
                        "The wallet fallback needs action calldata; enable calldata in the quote service.",
                    )));
                }
                let mut batch = CallBatch::new(vec![submit_private_action_call(router, &payload)]);
                batch.extend(plan.calls);
                let tx_hash = self.sign(ctx, Chain::Starknet, batch, plan.flow).await?;
                Ok(Submission {
                    tx_hash,
                    path: ExecutionPath::WalletFallback,
                })
            }
            _ if err.kind == FailureKind::RelayerUnavailable => {
                tracing::warn!(flow = plan.flow, "relayer unavailable in strict shielded-pool mode");
                Err(ExecutionError::StrictShieldedPool(err.message))
            }
            _ => Err(ExecutionError::from_backend(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::{self, Recorder};
    use super::*;
    use crate::agent::action_id::ActionId;
    use crate::agent::tier::Tier;
    use crate::error::CollaboratorError;
    use pretty_assertions::assert_eq;

    fn plan() -> Plan {
        Plan {
            flow: "stake",
            parameters: serde_json::json!({ "token": "CAREL", "amount": "5" }),
            calls: vec![Call::new("0x0p1", "stake", vec!["0x5".to_string(), "0x0".to_string()])],
        }
    }

    #[test]
    fn binding_is_order_independent_and_flow_bound() {
        let a = serde_json::json!({ "amount": "5", "token": "CAREL" });
        let b = serde_json::json!({ "token": "CAREL", "amount": "5" });
        assert_eq!(binding_digest("stake", &a), binding_digest("stake", &b));
        assert_ne!(binding_digest("stake", &a), binding_digest("swap", &a));
    }

    #[test]
    fn incomplete_payload_names_missing_field() {
        let mut payload = testing::full_payload();
        payload.public_inputs.clear();
        assert!(matches!(
            validate_proof_payload(&payload),
            Err(ExecutionError::IncompleteProof("public_inputs"))
        ));
    }

    #[tokio::test]
    async fn relayer_success_needs_no_signature() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = ExecutionPipeline::new(testing::collaborators(&recorder, false), Arc::new(testing::config()));
        let accounts = testing::accounts();
        let ctx = ExecutionContext {
            tier: Tier::Private,
            action_id: Some(ActionId(4)),
            accounts: &accounts,
        };

        let submission = pipeline.submit_private(&ctx, plan()).await.unwrap();
        assert_eq!(submission.path, ExecutionPath::Relayer);
        assert!(recorder.signed.lock().unwrap().is_empty());
        assert_eq!(recorder.relayed.lock().unwrap()[0].action_id, Some(4));
        assert!(recorder.proofs.lock().unwrap()[0].binding.starts_with("0x"));
    }

    #[tokio::test]
    async fn unavailable_relayer_falls_back_exactly_once() {
        let recorder = Arc::new(Recorder::default());
        *recorder.relay_failure.lock().unwrap() =
            Some(CollaboratorError::from_message("relay failed: requires onchain_tx_hash"));
        let pipeline = ExecutionPipeline::new(testing::collaborators(&recorder, false), Arc::new(testing::config()));
        let accounts = testing::accounts();
        let ctx = ExecutionContext {
            tier: Tier::Private,
            action_id: Some(ActionId(4)),
            accounts: &accounts,
        };

        let submission = pipeline.submit_private(&ctx, plan()).await.unwrap();
        assert_eq!(submission.path, ExecutionPath::WalletFallback);
        assert_eq!(recorder.relayed.lock().unwrap().len(), 1);

        let signed = recorder.signed.lock().unwrap();
        assert_eq!(signed.len(), 1);
        let calls = signed[0].calls.calls();
        assert_eq!(calls[0].entrypoint, "submit_private_action");
        assert_eq!(calls[0].contract_address, "0x0pr");
        assert_eq!(
            calls[0].calldata,
            vec!["0xnull", "0xcommit", "0x2", "0x1", "0x2", "0x1", "0x3"]
        );
        assert_eq!(calls[1].entrypoint, "stake");
    }

    #[tokio::test]
    async fn strict_mode_refuses_fallback() {
        let recorder = Arc::new(Recorder::default());
        *recorder.relay_failure.lock().unwrap() =
            Some(CollaboratorError::from_message("requires onchain_tx_hash"));
        let mut config = testing::config();
        config.features.strict_shielded_pool = true;
        let pipeline = ExecutionPipeline::new(testing::collaborators(&recorder, false), Arc::new(config));
        let accounts = testing::accounts();
        let ctx = ExecutionContext {
            tier: Tier::Private,
            action_id: None,
            accounts: &accounts,
        };

        let err = pipeline.submit_private(&ctx, plan()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::StrictShieldedPool(_)));
        assert!(recorder.signed.lock().unwrap().is_empty());
    }
}
