//! Fee data and transaction overrides.
//!
//! Fee parameters are scaled by fixed safety multipliers before use so a
//! slowly rising base fee does not get the transaction rejected as
//! underpriced. All values are in wei.

use serde::{Deserialize, Serialize};

/// Current fee parameters reported by a node.
///
/// `Default` is the zeroed object returned when a fetch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeData {
    /// Legacy gas price.
    pub gas_price: Option<u128>,
    /// EIP-1559 max fee per gas.
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 priority fee (tip).
    pub max_priority_fee_per_gas: Option<u128>,
}

impl FeeData {
    /// Whether both EIP-1559 fields are present.
    pub const fn supports_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }

    /// Whether the node reported nothing usable.
    pub const fn is_empty(&self) -> bool {
        self.gas_price.is_none()
            && self.max_fee_per_gas.is_none()
            && self.max_priority_fee_per_gas.is_none()
    }
}

/// Safety multipliers, expressed in percent (150 = 1.5×).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeMultipliers {
    pub max_fee_pct: u32,
    pub priority_fee_pct: u32,
    pub legacy_pct: u32,
}

impl Default for FeeMultipliers {
    fn default() -> Self {
        Self {
            max_fee_pct: 150,
            priority_fee_pct: 120,
            legacy_pct: 120,
        }
    }
}

/// Pricing attached to an outgoing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePricing {
    /// Type-2 transaction.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    /// Type-0 transaction.
    Legacy { gas_price: u128 },
}

/// Overrides passed to the chain adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeOverrides {
    /// `None` lets the adapter price the transaction itself.
    pub pricing: Option<FeePricing>,
    /// Passed through verbatim when supplied.
    pub gas_limit: Option<u64>,
}

/// Build transaction overrides from fee data.
///
/// EIP-1559 fields win when both are present; otherwise the legacy gas
/// price is scaled. The gas limit is never touched.
pub fn build_overrides(
    fee: &FeeData,
    gas_limit: Option<u64>,
    multipliers: FeeMultipliers,
) -> FeeOverrides {
    let pricing = match (fee.max_fee_per_gas, fee.max_priority_fee_per_gas, fee.gas_price) {
        (Some(max_fee), Some(priority), _) => Some(FeePricing::Eip1559 {
            max_fee_per_gas: scale(max_fee, multipliers.max_fee_pct),
            max_priority_fee_per_gas: scale(priority, multipliers.priority_fee_pct),
        }),
        (_, _, Some(gas_price)) => Some(FeePricing::Legacy {
            gas_price: scale(gas_price, multipliers.legacy_pct),
        }),
        _ => None,
    };

    FeeOverrides { pricing, gas_limit }
}

/// Multiply `value` by `pct / 100`, rounding down and saturating at
/// `u128::MAX`.
///
/// Never returns less than `value` when `pct >= 100`.
pub fn scale(value: u128, pct: u32) -> u128 {
    let pct = u128::from(pct);
    (value / 100)
        .saturating_mul(pct)
        .saturating_add(value % 100 * pct / 100)
}
