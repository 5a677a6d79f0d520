//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, chain nodes, local keys).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `rpc`: JSON-RPC HTTP transport, request coalescing and the RPC cache
//! - `chain`: EVM and TRON chain adapters, fee oracle, local signer
//! - `metrics`: Prometheus metrics export and health checks

pub mod chain;
pub mod metrics;
pub mod rpc;
