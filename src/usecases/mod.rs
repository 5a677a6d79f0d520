//! Use Cases Layer - Transaction Orchestration
//!
//! Orchestrates domain logic with port interfaces to implement the
//! wallet core's workflows. Each use case owns its state and is shared
//! behind an `Arc`.
//!
//! Use cases:
//! - `TransactionLedger`: In-memory record store with monotone transitions
//! - `NonceMirror`: Per (account, chain) next-nonce mirror
//! - `Submitter`: Nonce-mirrored broadcast with self-healing on conflicts
//! - `ReceiptPoller`: Adaptive-backoff confirmation loop
//! - `MultisigEngine`: Safe proposals, co-signing and quorum execution
//! - `WalletSession`: Active account/chain scope and provider registry

pub mod ledger;
pub mod multisig;
pub mod nonce_mirror;
pub mod receipt_poller;
pub mod session;
pub mod submitter;

pub use ledger::TransactionLedger;
pub use multisig::{MultisigEngine, ProposalReceipt};
pub use nonce_mirror::{NonceMirror, NonceState, SyncPolicy};
pub use receipt_poller::{PollReport, ReceiptPoller, RefreshDebouncer};
pub use session::{ActiveScope, ChainRegistry, WalletSession};
pub use submitter::{Submitter, TxDraft};
