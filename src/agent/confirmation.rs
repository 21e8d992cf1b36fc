//! Two-step confirmation gate for on-chain commands.
//!
//! Each tier has its own slot. A pending confirmation recorded under one
//! tier is never consumed by replies entered under another.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::agent::tier::Tier;

const AFFIRMATIVE: &[&str] = &[
    "yes", "y", "ya", "yeah", "yep", "iya", "ok", "okay", "oke", "sure", "confirm", "confirmed",
    "proceed", "go", "go ahead", "do it", "lanjut", "gas",
];

const NEGATIVE: &[&str] = &[
    "no", "n", "nope", "nah", "cancel", "stop", "abort", "batal", "tidak", "gak", "ga",
    "don't", "dont",
];

/// Kind of reply to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Affirmative,
    Negative,
    Other,
}

/// Match a whole reply against the fixed token sets, case-insensitive.
pub fn classify_reply(text: &str) -> ReplyKind {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!', '?', ','])
        .to_lowercase();
    if AFFIRMATIVE.contains(&normalized.as_str()) {
        ReplyKind::Affirmative
    } else if NEGATIVE.contains(&normalized.as_str()) {
        ReplyKind::Negative
    } else {
        ReplyKind::Other
    }
}

/// A command waiting for yes/no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub tier: Tier,
    pub command: String,
    pub created_at: DateTime<Utc>,
}

/// Per-tier gate state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfirmationState {
    #[default]
    Idle,
    AwaitingConfirmation(PendingConfirmation),
}

/// What the host should do with the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Not gated; handle as conversation.
    PassThrough,
    /// Ask for confirmation of this command.
    Prompt { command: String },
    /// Still waiting; ask again for yes/no about this command.
    Reprompt { command: String },
    /// User declined; nothing is executed.
    Cancelled { command: String },
    /// User confirmed; execute the stored command.
    Execute { command: String },
}

/// One turn of input seen by the gate.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub tier: Tier,
    pub text: &'a str,
    pub onchain: bool,
    pub now: DateTime<Utc>,
}

impl ConfirmationState {
    /// Pure transition for one tier's slot.
    pub fn next(self, input: GateInput<'_>) -> (ConfirmationState, GateDecision) {
        match self {
            Self::Idle if input.onchain => (
                Self::awaiting(input.tier, input.text, input.now),
                GateDecision::Prompt {
                    command: input.text.trim().to_string(),
                },
            ),
            Self::Idle => (Self::Idle, GateDecision::PassThrough),
            Self::AwaitingConfirmation(pending) => match classify_reply(input.text) {
                ReplyKind::Affirmative => (
                    Self::Idle,
                    GateDecision::Execute {
                        command: pending.command,
                    },
                ),
                ReplyKind::Negative => (
                    Self::Idle,
                    GateDecision::Cancelled {
                        command: pending.command,
                    },
                ),
                ReplyKind::Other if input.onchain => (
                    Self::awaiting(input.tier, input.text, input.now),
                    GateDecision::Prompt {
                        command: input.text.trim().to_string(),
                    },
                ),
                ReplyKind::Other => {
                    let command = pending.command.clone();
                    (
                        Self::AwaitingConfirmation(pending),
                        GateDecision::Reprompt { command },
                    )
                }
            },
        }
    }

    fn awaiting(tier: Tier, text: &str, now: DateTime<Utc>) -> Self {
        Self::AwaitingConfirmation(PendingConfirmation {
            tier,
            command: text.trim().to_string(),
            created_at: now,
        })
    }
}

/// Confirmation gate keyed by tier.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationGate {
    slots: BTreeMap<Tier, ConfirmationState>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, input: GateInput<'_>) -> GateDecision {
        let current = self.slots.remove(&input.tier).unwrap_or_default();
        let (next, decision) = current.next(input);
        if next != ConfirmationState::Idle {
            self.slots.insert(input.tier, next);
        }
        tracing::debug!(tier = %input.tier, ?decision, "confirmation gate transition");
        decision
    }

    pub fn pending(&self, tier: Tier) -> Option<&PendingConfirmation> {
        match self.slots.get(&tier) {
            Some(ConfirmationState::AwaitingConfirmation(pending)) => Some(pending),
            _ => None,
        }
    }

    pub fn clear(&mut self, tier: Tier) {
        self.slots.remove(&tier);
    }
}

/// Confirmation prompt naming the exact command and the CAREL burn.
pub fn confirmation_prompt(tier: Tier, command: &str, burn_carel: Decimal) -> String {
    let fee = if burn_carel.is_zero() {
        "No CAREL will be burned.".to_string()
    } else {
        format!(
            "This will burn {} CAREL as the {} execution fee.",
            burn_carel.normalize(),
            tier
        )
    };
    format!("Confirm on-chain execution of \"{command}\"? {fee} Reply yes to continue or no to cancel.")
}

pub fn reprompt(command: &str) -> String {
    format!("Please reply yes or no to confirm \"{command}\".")
}

pub fn cancelled(command: &str) -> String {
    format!("Cancelled \"{command}\". No transaction was sent.")
}
