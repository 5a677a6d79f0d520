//! Error taxonomy for user-facing transaction operations.
//!
//! Every variant maps onto a `SendResult`; nothing here is thrown across
//! the submit/propose/execute boundary.

use alloy::primitives::Address;
use thiserror::Error;

use super::transaction::SendResult;

/// Message attached to records the poller gives up on.
pub const TIMEOUT_MESSAGE: &str = "Transaction confirmation timed out";

/// Fragments that identify a nonce conflict or replacement rejection.
const NONCE_CONFLICT_MARKERS: &[&str] = &[
    "nonce",
    "replacement transaction underpriced",
    "replacement fee too low",
    "transaction underpriced",
];

/// Fragments a node returns when it already holds the exact transaction
/// being broadcast.
const ALREADY_KNOWN_MARKERS: &[&str] = &["already known", "alreadyknown", "already imported"];

/// Errors surfaced by the submitter, poller and multisig engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TxError {
    /// No signer or transport is available for the requested scope.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// The node rejected the nonce; the mirror has been invalidated.
    #[error("Nonce conflict: {0}")]
    NonceConflict(String),

    /// Not enough current-owner signatures to execute.
    #[error("Insufficient signatures: {have} of {need} required")]
    QuorumInsufficient { have: usize, need: usize },

    /// The signer is not an owner of the multisig account.
    #[error("Signer {0} is not an owner of this Safe")]
    OwnershipDenied(Address),

    /// The chain refused the transaction.
    #[error("{0}")]
    BroadcastRejected(String),

    /// The poller stopped waiting for a receipt.
    #[error("{TIMEOUT_MESSAGE}")]
    Timeout,

    /// Network failure that survived the local retry budget.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// Another proposal for the same Safe is being built.
    #[error("A proposal for Safe {0} is already being built")]
    ProposalInFlight(Address),

    /// No pending proposal with this id.
    #[error("Proposal {0} not found")]
    ProposalNotFound(String),

    /// Owner add/remove/threshold arguments are inconsistent with the Safe.
    #[error("Invalid owner change: {0}")]
    InvalidOwnerChange(String),

    /// The proposal nonce has already been consumed on-chain.
    #[error("Proposal nonce {proposal} is behind the Safe nonce {current}")]
    StaleProposal { proposal: u64, current: u64 },
}

impl TxError {
    /// Whether the caller may safely retry the same action.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NonceConflict(_) | Self::TransientNetwork(_))
    }
}

impl From<TxError> for SendResult {
    fn from(err: TxError) -> Self {
        let mut result = Self::failed(&err.to_string());
        if matches!(err, TxError::Timeout) {
            result.is_timeout = Some(true);
        }
        result
    }
}

/// Whether a provider error message indicates a nonce or replacement conflict.
pub fn is_nonce_conflict(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    NONCE_CONFLICT_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Whether a broadcast error means the node already has this transaction
/// (e.g. a retried send whose first attempt did arrive).
pub fn is_already_known(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ALREADY_KNOWN_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}
