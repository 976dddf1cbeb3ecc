// Profit reconstruction from an ordered swap sequence
use crate::analyzer::SwapEvent;
use chainpulse_common::{MonitorError, Result};
use ethers::types::U256;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use tracing::warn;

const WEI_PER_NATIVE: Decimal = dec!(1000000000000000000);
const WEI_PER_GWEI: Decimal = dec!(1000000000);

/// Everything the pipeline needs to persist about one transaction's
/// economics. Profit fields are `None` when the token flow could not be
/// determined from the swap logs; gas figures are always present.
#[derive(Debug, Clone)]
pub struct ProfitBreakdown {
    pub input_amount: Option<U256>,
    pub output_amount: Option<U256>,
    pub gross_native: Option<Decimal>,
    pub gross_usd: Option<Decimal>,
    pub net_native: Option<Decimal>,
    pub net_usd: Option<Decimal>,
    pub roi_pct: Option<Decimal>,
    pub gas_cost_native: Decimal,
    pub gas_cost_usd: Decimal,
    pub gas_price_gwei: Decimal,
}

pub struct ProfitCalculator;

impl ProfitCalculator {
    /// Reconstruct profit for one transaction's ordered swap sequence.
    ///
    /// Input is the first swap's nonzero in-amount, output the last swap's
    /// nonzero out-amount. Amounts are taken at face value; per-token decimal
    /// normalization is a future parameter. Gas is converted wei -> native
    /// via 10^18. Negative gross profit is preserved (gas-subsidized bundles
    /// exist).
    pub fn calculate(
        swaps: &[SwapEvent],
        gas_used: U256,
        effective_gas_price: U256,
        native_usd_price: Decimal,
    ) -> Result<ProfitBreakdown> {
        if swaps.len() < 2 {
            return Err(MonitorError::Invariant(format!(
                "profit calculation over {} swaps",
                swaps.len()
            )));
        }

        let gas_cost_wei = gas_used
            .checked_mul(effective_gas_price)
            .ok_or_else(|| MonitorError::Decode("gas cost overflows uint256".into()))?;
        let gas_cost_native = u256_to_decimal(gas_cost_wei)
            .map(|wei| wei / WEI_PER_NATIVE)
            .ok_or_else(|| MonitorError::Decode("gas cost exceeds decimal range".into()))?;
        let gas_price_gwei = u256_to_decimal(effective_gas_price)
            .map(|wei| wei / WEI_PER_GWEI)
            .ok_or_else(|| MonitorError::Decode("gas price exceeds decimal range".into()))?;
        let gas_cost_usd = gas_cost_native * native_usd_price;

        let first = &swaps[0];
        let last = &swaps[swaps.len() - 1];

        let input_amount = nonzero(first.amount0_in).or_else(|| nonzero(first.amount1_in));
        let output_amount = nonzero(last.amount0_out).or_else(|| nonzero(last.amount1_out));

        let gross_native = match (input_amount, output_amount) {
            (Some(input), Some(output)) => match signed_difference(output, input) {
                Some(gross) => Some(gross),
                None => {
                    warn!("swap amounts exceed decimal range, recording without profit");
                    None
                }
            },
            _ => None,
        };

        let net_native = gross_native.map(|gross| gross - gas_cost_native);
        let roi_pct = match (net_native, input_amount.and_then(u256_to_decimal)) {
            (Some(net), Some(input)) if input > Decimal::ZERO => {
                Some(net / input * dec!(100))
            }
            _ => None,
        };

        Ok(ProfitBreakdown {
            input_amount,
            output_amount,
            gross_native,
            gross_usd: gross_native.map(|g| g * native_usd_price),
            net_native,
            net_usd: net_native.map(|n| n * native_usd_price),
            roi_pct,
            gas_cost_native,
            gas_cost_usd,
            gas_price_gwei,
        })
    }
}

fn nonzero(amount: U256) -> Option<U256> {
    if amount.is_zero() {
        None
    } else {
        Some(amount)
    }
}

/// `output - input` as a signed decimal, computed on the uint side so the
/// magnitude passed into `Decimal` is the (small) difference rather than the
/// raw amounts.
fn signed_difference(output: U256, input: U256) -> Option<Decimal> {
    if output >= input {
        u256_to_decimal(output - input)
    } else {
        u256_to_decimal(input - output).map(|d| -d)
    }
}

/// Lossless uint256 -> Decimal conversion; `None` when the value does not
/// fit Decimal's 96-bit mantissa range.
pub fn u256_to_decimal(value: U256) -> Option<Decimal> {
    Decimal::from_str(&value.to_string()).ok()
}
