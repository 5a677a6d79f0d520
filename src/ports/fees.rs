//! Fee Source Port - Transaction Pricing for the Submitter
//!
//! The submitter never fetches fee data itself; it asks a fee source for
//! ready-made overrides so caching and safety multipliers stay in one place.

use std::sync::Arc;

use async_trait::async_trait;

use super::chain::ChainAdapter;
use crate::domain::fees::FeeOverrides;

/// Trait for fee override providers.
#[async_trait]
pub trait FeeSource: Send + Sync + 'static {
  /// Overrides for the next transaction on `adapter`'s chain.
  ///
  /// Never fails: without fee data the pricing is left to the adapter.
  async fn overrides(&self, adapter: &Arc<dyn ChainAdapter>, gas_limit: Option<u64>) -> FeeOverrides;
}
