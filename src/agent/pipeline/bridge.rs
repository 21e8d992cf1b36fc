//! Cross-chain bridge orders.

use crate::agent::calls::{AmountError, CallBatch, Chain, limit_unbounded_approvals, parse_units};
use crate::agent::intent::BridgeIntent;
use crate::backend::{BridgeQuoteRequest, FinalizeFlow, FinalizeRequest, NotificationEvent, NotificationKind};
use crate::error::{CollaboratorError, ConfigError, ExecutionError, FailureKind};

use super::{ExecutionContext, ExecutionOutcome, ExecutionPath, ExecutionPipeline, Plan, token_decimals};

/// One supported `(from_chain, to_chain, from_token, to_token)` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgePair {
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub from_token: &'static str,
    pub to_token: &'static str,
}

impl std::fmt::Display for BridgePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{} {}->{}",
            self.from_chain, self.to_chain, self.from_token, self.to_token
        )
    }
}

pub const BRIDGE_PAIRS: &[BridgePair] = &[
    BridgePair {
        from_chain: Chain::Ethereum,
        to_chain: Chain::Starknet,
        from_token: "ETH",
        to_token: "ETH",
    },
    BridgePair {
        from_chain: Chain::Starknet,
        to_chain: Chain::Ethereum,
        from_token: "ETH",
        to_token: "ETH",
    },
    BridgePair {
        from_chain: Chain::Ethereum,
        to_chain: Chain::Bitcoin,
        from_token: "ETH",
        to_token: "BTC",
    },
    BridgePair {
        from_chain: Chain::Bitcoin,
        to_chain: Chain::Ethereum,
        from_token: "BTC",
        to_token: "ETH",
    },
    BridgePair {
        from_chain: Chain::Bitcoin,
        to_chain: Chain::Starknet,
        from_token: "BTC",
        to_token: "WBTC",
    },
    BridgePair {
        from_chain: Chain::Starknet,
        to_chain: Chain::Bitcoin,
        from_token: "WBTC",
        to_token: "BTC",
    },
];

/// Native chain of a token symbol. Everything that is not BTC or ETH lives
/// on Starknet.
pub fn chain_for_symbol(symbol: &str) -> Chain {
    match symbol.trim().to_ascii_uppercase().as_str() {
        "BTC" => Chain::Bitcoin,
        "ETH" => Chain::Ethereum,
        _ => Chain::Starknet,
    }
}

/// Source and destination chains. Explicit chains win; an ETH to ETH
/// request without chains is read as Ethereum to Starknet.
pub fn resolve_route(intent: &BridgeIntent) -> (Chain, Chain) {
    let from = intent
        .from_chain
        .unwrap_or_else(|| chain_for_symbol(&intent.from_token));
    let to = intent.to_chain.unwrap_or_else(|| {
        let inferred = chain_for_symbol(&intent.to_token);
        if inferred == from && from != Chain::Starknet {
            Chain::Starknet
        } else {
            inferred
        }
    });
    (from, to)
}

pub fn validate_bridge_pair(
    from_chain: Chain,
    to_chain: Chain,
    from_token: &str,
    to_token: &str,
) -> Result<(), ExecutionError> {
    let supported = BRIDGE_PAIRS.iter().any(|pair| {
        pair.from_chain == from_chain
            && pair.to_chain == to_chain
            && pair.from_token.eq_ignore_ascii_case(from_token)
            && pair.to_token.eq_ignore_ascii_case(to_token)
    });
    if supported {
        return Ok(());
    }
    Err(ExecutionError::UnsupportedPair {
        route: format!(
            "{from_chain}->{to_chain} {}->{}",
            from_token.to_ascii_uppercase(),
            to_token.to_ascii_uppercase()
        ),
        supported: BRIDGE_PAIRS
            .iter()
            .map(BridgePair::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

impl ExecutionPipeline {
    pub(super) async fn bridge(
        &self,
        ctx: &ExecutionContext<'_>,
        bridge: &BridgeIntent,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let from_token = bridge.from_token.trim().to_ascii_uppercase();
        let to_token = bridge.to_token.trim().to_ascii_uppercase();
        let (from_chain, to_chain) = resolve_route(bridge);
        validate_bridge_pair(from_chain, to_chain, &from_token, &to_token)?;

        let source = ctx.accounts.require(from_chain)?.to_string();
        let recipient = ctx.accounts.require(to_chain)?.to_string();
        let owner = ctx
            .accounts
            .address(Chain::Starknet)
            .unwrap_or(source.as_str())
            .to_string();
        let amount = bridge.amount.to_string();

        let quote = self
            .collaborators
            .quotes
            .bridge_quote(&BridgeQuoteRequest {
                from_chain,
                to_chain,
                from_token: from_token.clone(),
                to_token: to_token.clone(),
                amount: bridge.amount,
            })
            .await
            .map_err(ExecutionError::from_backend)?;
        tracing::debug!(%from_chain, %to_chain, amount_out = %quote.amount_out, provider = ?quote.provider, "bridge quoted");

        let details = serde_json::json!({
            "from_chain": from_chain,
            "to_chain": to_chain,
            "token": from_token,
            "to_token": to_token,
            "amount": amount,
            "estimated_receive": quote.amount_out,
            "source_address": source,
            "recipient": recipient,
        });

        if from_chain == Chain::Bitcoin {
            return self.bridge_from_utxo(ctx, owner, details, &amount).await;
        }

        let private = ctx.tier.uses_privacy_path() && from_chain == Chain::Starknet;
        let mut calls = match quote.calls {
            Some(calls) if !calls.is_empty() => calls,
            _ if private => Vec::new(),
            _ => {
                return Err(ExecutionError::Config(ConfigError::missing(
                    "bridge.calldata",
                    "The bridge quote returned no on-chain calldata; enable calldata for this route.",
                )));
            }
        };
        let limit = limit_unbounded_approvals(&mut calls, &amount, token_decimals(&self.config, &from_token));

        let (tx_hash, path) = if private {
            let submission = self
                .submit_private(
                    ctx,
                    Plan {
                        flow: "bridge",
                        parameters: details.clone(),
                        calls,
                    },
                )
                .await?;
            (submission.tx_hash, submission.path)
        } else {
            let tx_hash = self
                .sign_with_split_retry(ctx, from_chain, CallBatch::new(calls), "bridge")
                .await?;
            (tx_hash, ExecutionPath::Wallet)
        };

        let mut outcome = ExecutionOutcome::new("bridge", ctx.mode(), path);
        outcome.tx_hash = Some(tx_hash.clone());
        if !limit.limited {
            outcome
                .notes
                .push("The bridge approval could not be limited to the exact amount.".to_string());
        }
        let mut details = details;
        details["onchain_tx_hash"] = serde_json::Value::String(tx_hash.clone());
        self.finalize(
            FinalizeRequest {
                flow: FinalizeFlow::Bridge,
                account: owner,
                tx_hash: Some(tx_hash),
                action_id: ctx.action_id.map(|id| id.0),
                mode: ctx.mode(),
                details,
            },
            &mut outcome,
        )
        .await;
        self.notify_outcome(&outcome);
        Ok(outcome)
    }

    /// UTXO-sourced bridges create the order first, then try to fund the
    /// deposit address. Funding failures degrade to manual instructions.
    async fn bridge_from_utxo(
        &self,
        ctx: &ExecutionContext<'_>,
        owner: String,
        details: serde_json::Value,
        amount: &str,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        // Must fail before the order exists.
        let requested_sats = btc_sats(amount)?;
        let receipt = self
            .collaborators
            .execution
            .finalize(&FinalizeRequest {
                flow: FinalizeFlow::Bridge,
                account: owner,
                tx_hash: None,
                action_id: ctx.action_id.map(|id| id.0),
                mode: ctx.mode(),
                details,
            })
            .await
            .map_err(ExecutionError::from_backend)?;

        let deposit_address = receipt.deposit_address.clone().ok_or_else(|| {
            ExecutionError::Backend(CollaboratorError::new(
                FailureKind::Other,
                "bridge order was created without a deposit address",
            ))
        })?;
        let amount_sats = receipt.deposit_amount_sats.unwrap_or(requested_sats);
        tracing::info!(%deposit_address, amount_sats, "bridge order created");

        let mut outcome = ExecutionOutcome::new("bridge", ctx.mode(), ExecutionPath::Offchain);
        outcome.receipt = receipt;

        let sent = match self.collaborators.utxo_wallet.as_ref() {
            Some(wallet) => {
                self.notify(NotificationEvent::new(
                    NotificationKind::SignatureRequested,
                    "Bitcoin deposit",
                    format!("Confirm sending {amount_sats} sats in your Bitcoin wallet."),
                ));
                match wallet.send(&deposit_address, amount_sats).await {
                    Ok(txid) => Some(txid),
                    Err(err) => {
                        tracing::warn!(kind = err.kind.as_str(), "automatic BTC deposit failed: {}", err);
                        None
                    }
                }
            }
            None => None,
        };

        match sent {
            Some(txid) => {
                outcome.tx_hash = Some(txid);
                outcome
                    .notes
                    .push(format!("Sent {amount_sats} sats to {deposit_address}."));
            }
            None => {
                let manual = format!(
                    "Send exactly {amount_sats} sats to {deposit_address} to complete the bridge."
                );
                self.notify(NotificationEvent::new(
                    NotificationKind::Info,
                    "Manual deposit required",
                    manual.clone(),
                ));
                outcome.notes.push(manual);
            }
        }
        self.notify_outcome(&outcome);
        Ok(outcome)
    }
}

fn btc_sats(amount: &str) -> Result<u64, AmountError> {
    u64::try_from(parse_units(amount, 8)?.low).map_err(|_| AmountError::Overflow(amount.to_string()))
}
