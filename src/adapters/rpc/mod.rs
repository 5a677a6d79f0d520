//! JSON-RPC Adapters
//!
//! The HTTP transport that talks to a node, the generic request coalescer
//! and the caching provider built on it.

pub mod cache;
pub mod coalesce;
pub mod http;
pub mod types;

pub use cache::{MethodTier, RpcCacheProvider, cache_key, classify};
pub use coalesce::{Coalescer, LookupSource};
pub use http::{HttpTransport, HttpTransportConfig};
