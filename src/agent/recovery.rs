//! Retry and recovery policies.
//!
//! Policies match on [`FailureKind`], never on message text, and each
//! transparent retry is allowed at most once per attempt.

use std::time::Duration;

use crate::error::{ExecutionError, FailureKind};

/// What to do after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Request a new signature window and sign again.
    RefreshWindowAndRetry,
    /// Wait, then sign again.
    RetryAfter(Duration),
    /// Use the newest pending action id instead of creating one.
    AdoptLatestPending,
    /// Clear cached action-id state and rerun the command.
    ClearAndRetry,
    /// Sign the privacy submission with the user's wallet.
    FallbackToWallet,
    /// Submit approvals and the action as separate transactions.
    SplitAndRetry,
    /// Give up and report.
    Surface,
}

/// Retries already spent during one action-id creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupRetries {
    pub signature_window: bool,
    pub nonce: bool,
}

/// Decide how action-id creation reacts to a wallet or backend failure.
pub fn setup_recovery(
    kind: FailureKind,
    spent: SetupRetries,
    require_fresh: bool,
    nonce_backoff: Duration,
) -> RecoveryAction {
    match kind {
        FailureKind::InvalidSignature if !spent.signature_window => {
            RecoveryAction::RefreshWindowAndRetry
        }
        FailureKind::NonceConflict if !spent.nonce => RecoveryAction::RetryAfter(nonce_backoff),
        FailureKind::RateLimited if !require_fresh => RecoveryAction::AdoptLatestPending,
        _ => RecoveryAction::Surface,
    }
}

/// Decide how a privacy relayer failure is handled.
pub fn relayer_recovery(kind: FailureKind, strict_shielded_pool: bool) -> RecoveryAction {
    match kind {
        FailureKind::RelayerUnavailable if !strict_shielded_pool => RecoveryAction::FallbackToWallet,
        _ => RecoveryAction::Surface,
    }
}

/// Decide how a bridge wallet submission failure is handled.
pub fn bridge_submit_recovery(kind: FailureKind, splittable: bool, split_tried: bool) -> RecoveryAction {
    match kind {
        FailureKind::EntrypointNotFound if splittable && !split_tried => {
            RecoveryAction::SplitAndRetry
        }
        _ => RecoveryAction::Surface,
    }
}

/// Decide whether a failed command is rerun after clearing action state.
pub fn execution_recovery(err: &ExecutionError, retries_used: u32) -> RecoveryAction {
    if retries_used == 0 && err.is_authorization_state() {
        RecoveryAction::ClearAndRetry
    } else {
        RecoveryAction::Surface
    }
}

/// Remediation text appended to surfaced failures.
pub fn remediation_hint(err: &ExecutionError) -> Option<&'static str> {
    match err {
        ExecutionError::Config(_) => {
            Some("Ask the operator to configure the missing setting, then try again.")
        }
        ExecutionError::ActionIdNotDiscovered(_) => {
            Some("Sign the setup transaction again so a fresh authorization can be created.")
        }
        ExecutionError::CooldownActive { .. } => {
            Some("A setup transaction was just submitted. Wait a few seconds before retrying.")
        }
        ExecutionError::ExecutorNotReady(_) => {
            Some("The executor is not ready for actions yet. Retry shortly.")
        }
        ExecutionError::StrictShieldedPool(_) => Some(
            "This deployment only allows private execution. Retry when the relayer is back.",
        ),
        ExecutionError::Wallet(err) => match err.kind {
            FailureKind::InvalidSignature => {
                Some("The signature window expired twice. Try the command again.")
            }
            FailureKind::NonceConflict => {
                Some("Another transaction is still pending. Wait for it to confirm first.")
            }
            FailureKind::EntrypointNotFound => {
                Some("Your wallet could not call the contract. Update the wallet and retry.")
            }
            _ => None,
        },
        ExecutionError::Backend(err) if err.kind == FailureKind::RateLimited => {
            Some("The backend is rate limiting this account. Try again in a minute.")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;

    const BACKOFF: Duration = Duration::from_millis(1_500);

    #[test]
    fn signature_and_nonce_retry_once() {
        let none = SetupRetries::default();
        assert_eq!(
            setup_recovery(FailureKind::InvalidSignature, none, true, BACKOFF),
            RecoveryAction::RefreshWindowAndRetry
        );
        assert_eq!(
            setup_recovery(FailureKind::NonceConflict, none, true, BACKOFF),
            RecoveryAction::RetryAfter(BACKOFF)
        );

        let spent = SetupRetries {
            signature_window: true,
            nonce: true,
        };
        assert_eq!(
            setup_recovery(FailureKind::InvalidSignature, spent, true, BACKOFF),
            RecoveryAction::Surface
        );
        assert_eq!(
            setup_recovery(FailureKind::NonceConflict, spent, true, BACKOFF),
            RecoveryAction::Surface
        );
    }

    #[test]
    fn rate_limit_adopts_pending_only_when_reuse_allowed() {
        let none = SetupRetries::default();
        assert_eq!(
            setup_recovery(FailureKind::RateLimited, none, false, BACKOFF),
            RecoveryAction::AdoptLatestPending
        );
        assert_eq!(
            setup_recovery(FailureKind::RateLimited, none, true, BACKOFF),
            RecoveryAction::Surface
        );
        assert_eq!(
            setup_recovery(FailureKind::UserRejected, none, false, BACKOFF),
            RecoveryAction::Surface
        );
    }

    #[test]
    fn relayer_fallback_respects_strict_mode() {
        assert_eq!(
            relayer_recovery(FailureKind::RelayerUnavailable, false),
            RecoveryAction::FallbackToWallet
        );
        assert_eq!(
            relayer_recovery(FailureKind::RelayerUnavailable, true),
            RecoveryAction::Surface
        );
        assert_eq!(
            relayer_recovery(FailureKind::Network, false),
            RecoveryAction::Surface
        );
    }

    #[test]
    fn bridge_split_happens_once() {
        assert_eq!(
            bridge_submit_recovery(FailureKind::EntrypointNotFound, true, false),
            RecoveryAction::SplitAndRetry
        );
        assert_eq!(
            bridge_submit_recovery(FailureKind::EntrypointNotFound, true, true),
            RecoveryAction::Surface
        );
        assert_eq!(
            bridge_submit_recovery(FailureKind::EntrypointNotFound, false, false),
            RecoveryAction::Surface
        );
    }

    #[test]
    fn authorization_state_clears_and_retries_once() {
        let err = ExecutionError::from_backend(CollaboratorError::new(
            FailureKind::NoLongerPending,
            "action 4 is no longer pending",
        ));
        assert_eq!(execution_recovery(&err, 0), RecoveryAction::ClearAndRetry);
        assert_eq!(execution_recovery(&err, 1), RecoveryAction::Surface);

        let rejected = ExecutionError::UserRejected("User abort".to_string());
        assert_eq!(execution_recovery(&rejected, 0), RecoveryAction::Surface);
    }
}
