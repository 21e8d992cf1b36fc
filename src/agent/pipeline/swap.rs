use crate::agent::calls::{format_swap_min_amount_out, limit_unbounded_approvals};
use crate::agent::intent::SwapIntent;
use crate::backend::{FinalizeFlow, FinalizeRequest, SwapQuoteRequest};
use crate::error::{ConfigError, ExecutionError};

use super::{ExecutionContext, ExecutionOutcome, ExecutionPipeline, Plan, ensure_supported, token_decimals};

/// Tokens the swap router accepts.
pub const SWAP_TOKENS: &[&str] = &["CAREL", "STRK", "ETH", "USDC", "USDT", "WBTC"];

impl ExecutionPipeline {
    pub(super) async fn swap(
        &self,
        ctx: &ExecutionContext<'_>,
        swap: &SwapIntent,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let from = ensure_supported("swap", &swap.from_token, SWAP_TOKENS)?;
        let to = ensure_supported("swap", &swap.to_token, SWAP_TOKENS)?;
        if from == to {
            return Err(ExecutionError::UnsupportedAsset {
                family: "swap",
                symbol: to,
                supported: "a token different from the one being sold".to_string(),
            });
        }
        let account = ctx.account()?.to_string();
        let slippage = self.slippage();

        let quote = self
            .collaborators
            .quotes
            .swap_quote(&SwapQuoteRequest {
                from_token: from.clone(),
                to_token: to.clone(),
                amount: swap.amount,
                slippage_percent: slippage,
                mode: ctx.mode(),
            })
            .await
            .map_err(ExecutionError::from_backend)?;
        let min_amount_out = format_swap_min_amount_out(&quote.amount_out, slippage)?;
        tracing::debug!(%from, %to, amount_out = %quote.amount_out, %min_amount_out, "swap quoted");

        let mut calls = match quote.calls {
            Some(calls) if !calls.is_empty() => calls,
            _ if ctx.tier.uses_privacy_path() => Vec::new(),
            _ => {
                return Err(ExecutionError::Config(ConfigError::missing(
                    "swap.calldata",
                    "The quote service returned no on-chain calldata; enable calldata in the swap quote backend.",
                )));
            }
        };
        let amount = swap.amount.to_string();
        let limit = limit_unbounded_approvals(&mut calls, &amount, token_decimals(&self.config, &from));

        let submission = self
            .submit(
                ctx,
                Plan {
                    flow: "swap",
                    parameters: serde_json::json!({
                        "from_token": from,
                        "to_token": to,
                        "amount": amount,
                        "min_amount_out": min_amount_out,
                    }),
                    calls,
                },
            )
            .await?;

        let mut outcome = ExecutionOutcome::new("swap", ctx.mode(), submission.path);
        outcome.tx_hash = Some(submission.tx_hash.clone());
        if !limit.limited {
            outcome
                .notes
                .push("The token approval could not be limited to the exact amount.".to_string());
        }
        self.finalize(
            FinalizeRequest {
                flow: FinalizeFlow::Swap,
                account,
                tx_hash: Some(submission.tx_hash),
                action_id: ctx.action_id.map(|id| id.0),
                mode: ctx.mode(),
                details: serde_json::json!({
                    "from_token": from,
                    "to_token": to,
                    "amount": amount,
                    "expected_amount_out": quote.amount_out,
                    "min_amount_out": min_amount_out,
                    "slippage_percent": slippage.to_string(),
                }),
            },
            &mut outcome,
        )
        .await;
        self.notify_outcome(&outcome);
        Ok(outcome)
    }
}
