//! Fee Oracle - Per-provider, Per-chain Fee Data with a Short TTL
//!
//! Keyed by `(chain_id, provider identity)` so swapping the transport of a
//! chain never serves the previous transport's fee data. Concurrent callers
//! share one fetch; results live for the configured TTL (15s by default).
//! A failed fetch yields zeroed fee data instead of an error so callers
//! always have something to build overrides from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::adapters::rpc::{Coalescer, LookupSource};
use crate::domain::fees::{FeeData, FeeMultipliers, FeeOverrides, build_overrides};
use crate::ports::chain::{ChainAdapter, ChainError};
use crate::ports::fees::FeeSource;

/// Default fee cache lifetime.
pub const DEFAULT_FEE_TTL: Duration = Duration::from_secs(15);

/// Cache key: chain id and provider identity.
type FeeKey = (u64, String);

/// Deduplicating fee data cache shared by every submitter.
pub struct FeeOracle {
    cache: Coalescer<FeeKey, FeeData, ChainError>,
    ttl: Duration,
    multipliers: FeeMultipliers,
}

impl FeeOracle {
    /// Create an oracle with the given TTL and safety multipliers.
    pub fn new(ttl: Duration, multipliers: FeeMultipliers) -> Self {
        Self {
            cache: Coalescer::new(64),
            ttl,
            multipliers,
        }
    }

    /// Current fee data for `adapter`'s chain and provider.
    #[instrument(skip(self, adapter), fields(chain_id = adapter.chain_id()))]
    pub async fn fee_data(&self, adapter: &Arc<dyn ChainAdapter>) -> FeeData {
        let key = (adapter.chain_id(), adapter.provider_id());
        let fetcher = Arc::clone(adapter);

        let (result, source) = self
            .cache
            .get_or_fetch(key, Some(self.ttl), move || async move {
                fetcher.get_fee_data().await
            })
            .await;

        match result {
            Ok(fee) => {
                if source != LookupSource::Network {
                    debug!(source = source.as_str(), "Fee data served without a fetch");
                }
                fee
            }
            Err(e) => {
                warn!(error = %e, "Fee data unavailable, using defaults");
                FeeData::default()
            }
        }
    }

    /// Multipliers applied by `overrides`.
    pub const fn multipliers(&self) -> FeeMultipliers {
        self.multipliers
    }

    /// Drop all cached fee data.
    pub async fn clear(&self) {
        self.cache.clear().await;
    }
}

#[async_trait]
impl FeeSource for FeeOracle {
    async fn overrides(
        &self,
        adapter: &Arc<dyn ChainAdapter>,
        gas_limit: Option<u64>,
    ) -> FeeOverrides {
        let fee = self.fee_data(adapter).await;
        build_overrides(&fee, gas_limit, self.multipliers)
    }
}
