//! Chain Adapters - EVM and TRON Behind One Interface
//!
//! Provides:
//! - `EvmAdapter`: JSON-RPC reads, local EIP-1559/legacy signing, raw broadcast
//! - `TronAdapter`: REST+JSON create/sign/broadcast and transaction info
//! - `FeeOracle`: per-provider fee data with a short TTL
//! - `LocalKeySigner`: the in-process secp256k1 key

pub mod evm;
pub mod gas;
pub mod signer;
pub mod tron;

pub use evm::EvmAdapter;
pub use gas::FeeOracle;
pub use signer::LocalKeySigner;
pub use tron::{TronAdapter, tron_address};
