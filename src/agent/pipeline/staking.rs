use crate::agent::calls::{Call, decimal_to_units};
use crate::agent::intent::{ClaimIntent, StakeDirection, StakeIntent};
use crate::backend::{FinalizeFlow, FinalizeRequest};
use crate::error::ExecutionError;

use super::{ExecutionContext, ExecutionOutcome, ExecutionPipeline, Plan, ensure_supported};

/// Tokens with a staking pool.
pub const STAKE_TOKENS: &[&str] = &["CAREL", "STRK", "USDC", "USDT", "WBTC"];

/// BTC stakes through the wrapped pool.
fn stake_symbol(symbol: &str) -> Result<String, ExecutionError> {
    let symbol = match symbol.trim().to_ascii_uppercase().as_str() {
        "BTC" => "WBTC".to_string(),
        other => other.to_string(),
    };
    ensure_supported("staking", &symbol, STAKE_TOKENS)
}

impl ExecutionPipeline {
    pub(super) async fn stake(
        &self,
        ctx: &ExecutionContext<'_>,
        stake: &StakeIntent,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let symbol = stake_symbol(&stake.token)?;
        let account = ctx.account()?.to_string();
        let pool = self.config.contracts.staking_pool(&symbol)?.to_string();
        let token = self.config.contracts.token(&symbol)?.clone();
        let units = decimal_to_units(stake.amount, token.decimals)?;
        let [low, high] = units.to_calldata();

        let (calls, flow, label) = match stake.direction {
            StakeDirection::Deposit => (
                vec![
                    Call::approve(&token.address, &pool, units),
                    Call::new(&pool, "stake", vec![low, high]),
                ],
                FinalizeFlow::StakeDeposit,
                "stake",
            ),
            StakeDirection::Withdraw => (
                vec![Call::new(&pool, "unstake", vec![low, high])],
                FinalizeFlow::StakeWithdraw,
                "unstake",
            ),
        };
        let amount = stake.amount.to_string();
        tracing::debug!(%symbol, %pool, direction = ?stake.direction, "staking calls built");

        let submission = self
            .submit(
                ctx,
                Plan {
                    flow: "stake",
                    parameters: serde_json::json!({
                        "token": symbol,
                        "amount": amount,
                        "direction": stake.direction,
                    }),
                    calls,
                },
            )
            .await?;

        let mut outcome = ExecutionOutcome::new(label, ctx.mode(), submission.path);
        outcome.tx_hash = Some(submission.tx_hash.clone());
        self.finalize(
            FinalizeRequest {
                flow,
                account,
                tx_hash: Some(submission.tx_hash),
                action_id: ctx.action_id.map(|id| id.0),
                mode: ctx.mode(),
                details: serde_json::json!({ "pool_id": symbol, "amount": amount }),
            },
            &mut outcome,
        )
        .await;
        self.notify_outcome(&outcome);
        Ok(outcome)
    }

    pub(super) async fn claim(
        &self,
        ctx: &ExecutionContext<'_>,
        claim: &ClaimIntent,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let symbol = stake_symbol(&claim.token)?;
        let account = ctx.account()?.to_string();
        let pool = self.config.contracts.staking_pool(&symbol)?.to_string();

        let submission = self
            .submit(
                ctx,
                Plan {
                    flow: "stake_claim",
                    parameters: serde_json::json!({ "token": symbol }),
                    calls: vec![Call::new(&pool, "claim_rewards", Vec::new())],
                },
            )
            .await?;

        let mut outcome = ExecutionOutcome::new("claim", ctx.mode(), submission.path);
        outcome.tx_hash = Some(submission.tx_hash.clone());
        self.finalize(
            FinalizeRequest {
                flow: FinalizeFlow::StakeClaim,
                account,
                tx_hash: Some(submission.tx_hash),
                action_id: ctx.action_id.map(|id| id.0),
                mode: ctx.mode(),
                details: serde_json::json!({ "pool_id": symbol }),
            },
            &mut outcome,
        )
        .await;
        self.notify_outcome(&outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::{self, Recorder};
    use super::*;
    use crate::agent::tier::Tier;
    use crate::error::ConfigError;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn pipeline(recorder: &Arc<Recorder>) -> ExecutionPipeline {
        ExecutionPipeline::new(testing::collaborators(recorder, false), Arc::new(testing::config()))
    }

    #[tokio::test]
    async fn deposit_approves_pool_then_stakes() {
        let recorder = Arc::new(Recorder::default());
        let accounts = testing::accounts();
        let ctx = ExecutionContext {
            tier: Tier::Standard,
            action_id: None,
            accounts: &accounts,
        };
        let intent = StakeIntent {
            token: "usdc".to_string(),
            amount: dec!(1.5),
            direction: StakeDirection::Deposit,
        };

        pipeline(&recorder).stake(&ctx, &intent).await.unwrap();

        let signed = recorder.signed.lock().unwrap();
        let calls = signed[0].calls.calls();
        assert_eq!(calls[0].contract_address, "0x0usdc");
        assert_eq!(calls[0].calldata, vec!["0x0p2", "0x16e360", "0x0"]);
        assert_eq!(calls[1].contract_address, "0x0p2");
        assert_eq!(calls[1].entrypoint, "stake");
        assert_eq!(
            recorder.finalized.lock().unwrap()[0].flow,
            FinalizeFlow::StakeDeposit
        );
    }

    #[tokio::test]
    async fn missing_pool_is_a_config_error() {
        let recorder = Arc::new(Recorder::default());
        let accounts = testing::accounts();
        let ctx = ExecutionContext {
            tier: Tier::Standard,
            action_id: None,
            accounts: &accounts,
        };

        let err = pipeline(&recorder)
            .claim(&ctx, &ClaimIntent { token: "STRK".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Config(ConfigError::MissingRequired { ref key, .. }) if key == "CAREL_STAKING_POOL_STRK"
        ));
        assert!(recorder.signed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_claim_binds_stake_claim_flow() {
        let recorder = Arc::new(Recorder::default());
        let accounts = testing::accounts();
        let ctx = ExecutionContext {
            tier: Tier::Private,
            action_id: None,
            accounts: &accounts,
        };

        let outcome = pipeline(&recorder)
            .claim(&ctx, &ClaimIntent { token: "CAREL".to_string() })
            .await
            .unwrap();

        assert_eq!(recorder.proofs.lock().unwrap()[0].flow, "stake_claim");
        assert_eq!(
            recorder.relayed.lock().unwrap()[0].action_calls[0].entrypoint,
            "claim_rewards"
        );
        assert!(outcome.summary().starts_with("Claim submitted privately via relayer."));
    }

    #[test]
    fn btc_maps_to_wrapped_pool() {
        assert_eq!(stake_symbol("btc").unwrap(), "WBTC");
        assert!(matches!(
            stake_symbol("ETH"),
            Err(ExecutionError::UnsupportedAsset { family: "staking", .. })
        ));
    }
}
