//! Transaction records and the user-facing send result.
//!
//! A `TransactionRecord` is created once per broadcast attempt and is only
//! ever mutated by the receipt poller (status + error). Retries create new
//! records; they never rewrite old ones.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a user-visible error message (in characters).
pub const MAX_ERROR_LEN: usize = 160;

/// Lifecycle of a broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Built locally, not yet on the wire.
    Queued,
    /// Accepted by the node, awaiting a receipt.
    Submitted,
    /// Included and successful.
    Confirmed,
    /// Reverted, rejected or timed out.
    Failed,
}

impl TxStatus {
    /// Whether the status is final (`confirmed` or `failed`).
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Whether a transition `self → next` is allowed.
    ///
    /// Records only move forward: `queued → submitted → {confirmed|failed}`,
    /// with `queued → failed` for attempts that never made it out.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Submitted)
                | (Self::Queued, Self::Failed)
                | (Self::Submitted, Self::Confirmed)
                | (Self::Submitted, Self::Failed)
        )
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Submitted => write!(f, "submitted"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One broadcast attempt, as handed to and from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Local identifier (UUID v4).
    pub id: String,
    /// Chain the transaction was broadcast on.
    pub chain_id: u64,
    /// Transaction hash (EVM) or txID (TRON), once known.
    pub hash: Option<String>,
    /// Current status.
    pub status: TxStatus,
    /// Creation time (Unix ms).
    pub timestamp: u64,
    /// Short human summary ("Send 0.1 ETH to 0xabc…").
    pub summary: String,
    /// Failure reason, clipped to `MAX_ERROR_LEN`.
    pub error: Option<String>,
}

impl TransactionRecord {
    /// A freshly broadcast transaction awaiting its receipt.
    pub fn submitted(chain_id: u64, hash: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chain_id,
            hash: Some(hash.into()),
            status: TxStatus::Submitted,
            timestamp: now_ms(),
            summary: summary.into(),
            error: None,
        }
    }

    /// An attempt the chain refused outright.
    pub fn rejected(chain_id: u64, summary: impl Into<String>, error: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chain_id,
            hash: None,
            status: TxStatus::Failed,
            timestamp: now_ms(),
            summary: summary.into(),
            error: Some(clip_message(error)),
        }
    }

    /// Wall-clock age of the record in milliseconds.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }
}

/// Result of every user-facing send operation.
///
/// Callers (UI, tests) depend on this exact shape:
/// `{success, hash?, error?, isTimeout?}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_timeout: Option<bool>,
}

impl SendResult {
    /// Successful broadcast with a known hash.
    pub fn ok(hash: impl Into<String>) -> Self {
        Self {
            success: true,
            hash: Some(hash.into()),
            ..Self::default()
        }
    }

    /// Success without a broadcast (e.g. a proposal queued for signatures).
    pub fn accepted() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failure with a clipped message.
    pub fn failed(error: &str) -> Self {
        Self {
            success: false,
            error: Some(clip_message(error)),
            ..Self::default()
        }
    }
}

/// Clip an error string to `MAX_ERROR_LEN` characters, ending in `…`.
pub fn clip_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_ERROR_LEN {
        return trimmed.to_string();
    }
    let mut clipped: String = trimmed.chars().take(MAX_ERROR_LEN - 1).collect();
    clipped.push('…');
    clipped
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(TxStatus::Submitted.can_transition_to(TxStatus::Confirmed));
        assert!(TxStatus::Submitted.can_transition_to(TxStatus::Failed));
        assert!(!TxStatus::Confirmed.can_transition_to(TxStatus::Submitted));
        assert!(!TxStatus::Failed.can_transition_to(TxStatus::Confirmed));
        assert!(!TxStatus::Confirmed.can_transition_to(TxStatus::Failed));
    }

    #[test]
    fn test_clip_long_message() {
        let long = "x".repeat(500);
        let clipped = clip_message(&long);
        assert_eq!(clipped.chars().count(), MAX_ERROR_LEN);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(clip_message("  nonce too low "), "nonce too low");
    }

    #[test]
    fn test_send_result_wire_shape() {
        let json = serde_json::to_value(SendResult {
            success: false,
            hash: None,
            error: Some("timed out".into()),
            is_timeout: Some(true),
        })
        .unwrap();
        assert_eq!(json["isTimeout"], true);
        assert_eq!(json["success"], false);
        assert!(json.get("hash").is_none());
    }

    #[test]
    fn test_record_serializes_lowercase_status() {
        let record = TransactionRecord::submitted(1, "0xabc", "Send");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "submitted");
        assert_eq!(json["chainId"], 1);
    }
}
