//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires from
//! the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `RpcTransport`: raw JSON-RPC request/batch to a chain node
//! - `ChainAdapter`: one interface over EVM (JSON-RPC) and TRON (REST) chains
//! - `HashSigner`: local signing of 32-byte digests
//! - `FeeSource`: fee overrides for outgoing transactions

pub mod chain;
pub mod fees;
pub mod rpc;
pub mod signer;

pub use chain::{ChainAdapter, ChainError, ChainFamily, ContractCall, ReceiptStatus, SendRequest};
pub use fees::FeeSource;
pub use rpc::{RpcCall, RpcError, RpcTransport};
pub use signer::{HashSigner, SignerError};
