use chrono::Utc;
use rand::RngCore;

use crate::agent::calls::{Call, decimal_to_units};
use crate::agent::intent::{CancelOrderIntent, LimitOrderIntent};
use crate::backend::{FinalizeFlow, FinalizeRequest};
use crate::error::ExecutionError;

use super::{ExecutionContext, ExecutionOutcome, ExecutionPipeline, Plan, SWAP_TOKENS, ensure_supported};

/// Prices are quoted with 18 decimals on-chain.
const PRICE_DECIMALS: u32 = 18;

/// Random 31-byte id, small enough to fit a felt.
pub fn client_order_id() -> String {
    let mut bytes = [0u8; 31];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("0x{hex}")
}

impl ExecutionPipeline {
    pub(super) async fn create_limit_order(
        &self,
        ctx: &ExecutionContext<'_>,
        order: &LimitOrderIntent,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let from = ensure_supported("limit order", &order.from_token, SWAP_TOKENS)?;
        let to = ensure_supported("limit order", &order.to_token, SWAP_TOKENS)?;
        let account = ctx.account()?.to_string();
        let book = self.config.contracts.limit_order_book()?.to_string();
        let from_info = self.config.contracts.token(&from)?.clone();
        let to_info = self.config.contracts.token(&to)?.clone();

        let amount = decimal_to_units(order.amount, from_info.decimals)?;
        let price = decimal_to_units(order.price, PRICE_DECIMALS)?;
        let expires_at = order.expiry.expires_at(Utc::now());
        let order_id = client_order_id();

        let [amount_low, amount_high] = amount.to_calldata();
        let [price_low, price_high] = price.to_calldata();
        let calls = vec![
            Call::approve(&from_info.address, &book, amount),
            Call::new(
                &book,
                "create_limit_order",
                vec![
                    order_id.clone(),
                    from_info.address.clone(),
                    to_info.address.clone(),
                    amount_low,
                    amount_high,
                    price_low,
                    price_high,
                    format!("{:#x}", expires_at.timestamp().max(0)),
                ],
            ),
        ];
        tracing::debug!(%order_id, %from, %to, expiry = order.expiry.as_str(), "limit order calls built");

        let submission = self
            .submit(
                ctx,
                Plan {
                    flow: "limit_order",
                    parameters: serde_json::json!({
                        "client_order_id": order_id,
                        "from_token": from,
                        "to_token": to,
                        "amount": order.amount.to_string(),
                        "price": order.price.to_string(),
                        "expiry": order.expiry.as_str(),
                    }),
                    calls,
                },
            )
            .await?;

        let mut outcome = ExecutionOutcome::new("limit order", ctx.mode(), submission.path);
        outcome.tx_hash = Some(submission.tx_hash.clone());
        self.finalize(
            FinalizeRequest {
                flow: FinalizeFlow::LimitOrderCreate,
                account,
                tx_hash: Some(submission.tx_hash),
                action_id: ctx.action_id.map(|id| id.0),
                mode: ctx.mode(),
                details: serde_json::json!({
                    "client_order_id": order_id,
                    "from_token": from,
                    "to_token": to,
                    "amount": order.amount.to_string(),
                    "price": order.price.to_string(),
                    "expiry": order.expiry.as_str(),
                    "expires_at": expires_at.to_rfc3339(),
                }),
            },
            &mut outcome,
        )
        .await;
        if outcome.receipt.order_id.is_none() {
            outcome.receipt.order_id = Some(order_id);
        }
        self.notify_outcome(&outcome);
        Ok(outcome)
    }

    pub(super) async fn cancel_limit_order(
        &self,
        ctx: &ExecutionContext<'_>,
        cancel: &CancelOrderIntent,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let order_id = cancel.order_id.trim().to_string();
        let account = ctx.account()?.to_string();
        let book = self.config.contracts.limit_order_book()?.to_string();

        let submission = self
            .submit(
                ctx,
                Plan {
                    flow: "limit_order",
                    parameters: serde_json::json!({ "cancel_order_id": order_id }),
                    calls: vec![Call::new(&book, "cancel_limit_order", vec![order_id.clone()])],
                },
            )
            .await?;

        let mut outcome = ExecutionOutcome::new("limit order cancel", ctx.mode(), submission.path);
        outcome.tx_hash = Some(submission.tx_hash.clone());
        self.finalize(
            FinalizeRequest {
                flow: FinalizeFlow::LimitOrderCancel,
                account,
                tx_hash: Some(submission.tx_hash),
                action_id: ctx.action_id.map(|id| id.0),
                mode: ctx.mode(),
                details: serde_json::json!({ "order_id": order_id }),
            },
            &mut outcome,
        )
        .await;
        self.notify_outcome(&outcome);
        Ok(outcome)
    }
}
