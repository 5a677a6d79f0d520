//! Domain layer - Core transaction types and pure logic.
//!
//! No I/O here (hexagonal architecture inner ring). Everything in this
//! module is deterministic and testable in isolation: records and result
//! shapes, the error taxonomy, fee math, the poll schedule and the Safe
//! hashing/signature rules.

pub mod error;
pub mod fees;
pub mod poll;
pub mod safe;
pub mod transaction;

// Re-export core types for convenience
pub use error::TxError;
pub use fees::{FeeData, FeeMultipliers, FeeOverrides, FeePricing, build_overrides};
pub use poll::{PollMeta, PollSchedule};
pub use safe::{PendingSafeTransaction, SafeCall, SafeDetails};
pub use transaction::{SendResult, TransactionRecord, TxStatus};
