//! Tier-aware command classification.
//!
//! Decides whether raw user text needs on-chain execution. Matching is
//! permissive word-boundary matching, not parsing: a false positive only
//! costs an extra confirmation prompt, a false negative skips one.

use std::sync::LazyLock;

use regex::Regex;

use crate::agent::tier::Tier;

static TIER2_ACTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(swap|exchange|tukar|bridge|brigde|stake|staking|claim|klaim|limit[\s_-]*order|place[\s_-]+order|cancel[\s_-]+(order|limit))\b",
    )
    .unwrap_or_else(|e| panic!("tier 2 action pattern is invalid: {e}"))
});

static TIER3_ACTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(unstake|withdraw[\s_-]+stake|portfolio|rebalance|allocation|alerts?)\b",
    )
    .unwrap_or_else(|e| panic!("tier 3 action pattern is invalid: {e}"))
});

static BRIDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bridge|brigde|jembatan)\b")
        .unwrap_or_else(|e| panic!("bridge pattern is invalid: {e}"))
});

/// Reply sent when a bridge is requested under tier 3 with bridging disabled.
pub const TIER3_BRIDGE_BLOCKED_REPLY: &str = "Bridging is not available in L3 private mode on \
this deployment. Switch to L2 to bridge with a regular wallet signature.";

/// Classification of one user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandClass {
    /// Chat or read-only lookup; no confirmation needed.
    Conversational,
    /// Needs explicit confirmation and on-chain execution.
    Onchain,
    /// Disallowed for this tier; answer with the fixed reply.
    Blocked(&'static str),
}

impl CommandClass {
    pub fn is_onchain(&self) -> bool {
        matches!(self, Self::Onchain)
    }
}

/// Whether `text` requires on-chain execution under `tier`.
pub fn requires_onchain_action(tier: Tier, text: &str) -> bool {
    match tier {
        Tier::ReadOnly => false,
        Tier::Standard => TIER2_ACTIONS.is_match(text),
        Tier::Private => TIER2_ACTIONS.is_match(text) || TIER3_ACTIONS.is_match(text),
    }
}

/// Classifier bound to the deployment's tier-3 bridge flag.
#[derive(Debug, Clone, Copy)]
pub struct CommandClassifier {
    bridge_on_tier3: bool,
}

impl CommandClassifier {
    pub fn new(bridge_on_tier3: bool) -> Self {
        Self { bridge_on_tier3 }
    }

    pub fn classify(&self, tier: Tier, text: &str) -> CommandClass {
        if tier == Tier::Private && !self.bridge_on_tier3 && BRIDGE.is_match(text) {
            tracing::debug!(%tier, "bridge blocked under tier 3");
            return CommandClass::Blocked(TIER3_BRIDGE_BLOCKED_REPLY);
        }

        if requires_onchain_action(tier, text) {
            CommandClass::Onchain
        } else {
            CommandClass::Conversational
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_one_never_requires_onchain_action() {
        for text in [
            "swap 10 STRK to USDC",
            "bridge 0.1 ETH",
            "unstake everything",
            "SET AN ALERT",
        ] {
            assert!(!requires_onchain_action(Tier::ReadOnly, text), "{text}");
        }
    }

    #[test]
    fn tier_two_vocabulary() {
        assert!(requires_onchain_action(Tier::Standard, "Swap 25 STRK to USDC"));
        assert!(requires_onchain_action(Tier::Standard, "please CLAIM my rewards"));
        assert!(requires_onchain_action(Tier::Standard, "create a limit order for ETH"));
        assert!(requires_onchain_action(Tier::Standard, "cancel order 0x12"));
        assert!(requires_onchain_action(Tier::Standard, "stake 100 CAREL"));
        assert!(!requires_onchain_action(Tier::Standard, "unstake 10 CAREL"));
        assert!(!requires_onchain_action(Tier::Standard, "rebalance my portfolio"));
        assert!(!requires_onchain_action(Tier::Standard, "what is the price of BTC"));
    }

    #[test]
    fn tier_three_adds_private_vocabulary() {
        assert!(requires_onchain_action(Tier::Private, "unstake 10 CAREL"));
        assert!(requires_onchain_action(Tier::Private, "Rebalance my portfolio"));
        assert!(requires_onchain_action(Tier::Private, "set an alert for ETH"));
        assert!(requires_onchain_action(Tier::Private, "swap 1 ETH to STRK"));
    }

    #[test]
    fn bridge_on_tier_three_is_blocked_unless_enabled() {
        let disabled = CommandClassifier::new(false);
        assert_eq!(
            disabled.classify(Tier::Private, "Bridge 0.01 ETH to starknet"),
            CommandClass::Blocked(TIER3_BRIDGE_BLOCKED_REPLY)
        );
        assert_eq!(
            disabled.classify(Tier::Standard, "bridge 0.01 ETH to starknet"),
            CommandClass::Onchain
        );

        let enabled = CommandClassifier::new(true);
        assert_eq!(
            enabled.classify(Tier::Private, "bridge 0.01 ETH to starknet"),
            CommandClass::Onchain
        );
    }

    #[test]
    fn chat_is_conversational() {
        let classifier = CommandClassifier::new(false);
        assert_eq!(
            classifier.classify(Tier::Private, "hello, how are you?"),
            CommandClass::Conversational
        );
    }
}
