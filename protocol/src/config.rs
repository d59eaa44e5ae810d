//! Protocol configuration.
//!
//! Amounts are whole-wei `u128` values (18 decimals) so the config can be
//! written as plain JSON; they are widened to `U256` on use.

use odra::casper_types::U256;
use serde::{Deserialize, Serialize};
use crate::errors::{CdpError, CdpResult};
use crate::math::{self, BPS_SCALE, DECIMAL_PRECISION};

const WAD: u128 = DECIMAL_PRECISION as u128;

/// Minimum Collateralization Ratio (110% = 11000 bps)
pub const DEFAULT_MCR_BPS: u32 = 11_000;
/// Critical system collateral ratio (150%); below it the system is in recovery mode
pub const DEFAULT_CCR_BPS: u32 = 15_000;
/// Minimum net debt of a trove (1800 stablecoin)
pub const DEFAULT_MIN_NET_DEBT: u128 = 1_800 * WAD;
/// Stablecoin reserve added to every trove to pay liquidators (200 stablecoin)
pub const DEFAULT_GAS_COMPENSATION: u128 = 200 * WAD;
/// Share of trove collateral paid to the liquidator (1/200 = 0.5%)
pub const DEFAULT_COLL_GAS_COMPENSATION_DIVISOR: u32 = 200;
/// Borrowing fee floor (0.5%)
pub const DEFAULT_BORROWING_FEE_BPS: u32 = 50;
/// Borrowing fee ceiling (5%)
pub const DEFAULT_MAX_BORROWING_FEE_BPS: u32 = 500;
/// Redemption fee floor (0.5%)
pub const DEFAULT_REDEMPTION_FEE_BPS: u32 = 50;
/// Per-minute base rate decay, a 12 hour half-life
pub const DEFAULT_MINUTE_DECAY_FACTOR: u128 = 999_037_758_833_783_000;
/// Divisor applied to the redeemed share of supply when raising the base rate
pub const DEFAULT_REDEMPTION_BETA: u32 = 2;
/// Stability pool scale factor (1e9); P below this triggers a scale change
pub const DEFAULT_POOL_SCALE_FACTOR: u128 = 1_000_000_000;
/// Maximum links walked when correcting an insert hint
pub const DEFAULT_MAX_HINT_STEPS: u32 = 1_000;
/// Maximum troves liquidated by one sequential liquidation call
pub const DEFAULT_MAX_LIQUIDATION_BATCH: u32 = 50;
/// Maximum troves touched by one redemption
pub const DEFAULT_MAX_REDEMPTION_ITERATIONS: u32 = 100;

/// Protocol configuration parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Minimum Collateralization Ratio in bps
    pub mcr_bps: u32,
    /// Critical Collateralization Ratio in bps
    pub ccr_bps: u32,
    /// Minimum net debt (wei)
    pub min_net_debt: u128,
    /// Gas compensation reserve in stablecoin (wei)
    pub gas_compensation: u128,
    /// Divisor applied to trove collateral for the liquidator's share
    pub coll_gas_compensation_divisor: u32,
    /// Borrowing fee floor in bps
    pub borrowing_fee_bps: u32,
    /// Borrowing fee ceiling in bps
    pub max_borrowing_fee_bps: u32,
    /// Redemption fee floor in bps
    pub redemption_fee_bps: u32,
    /// Base rate decay per minute (1e18 scale, below 1)
    pub minute_decay_factor: u128,
    /// Redemption base rate divisor
    pub redemption_beta: u32,
    /// Stability pool scale factor (power of ten)
    pub pool_scale_factor: u128,
    /// Maximum sorted-list links walked from a hint
    pub max_hint_steps: u32,
    /// Maximum troves per sequential liquidation
    pub max_liquidation_batch: u32,
    /// Maximum troves per redemption
    pub max_redemption_iterations: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mcr_bps: DEFAULT_MCR_BPS,
            ccr_bps: DEFAULT_CCR_BPS,
            min_net_debt: DEFAULT_MIN_NET_DEBT,
            gas_compensation: DEFAULT_GAS_COMPENSATION,
            coll_gas_compensation_divisor: DEFAULT_COLL_GAS_COMPENSATION_DIVISOR,
            borrowing_fee_bps: DEFAULT_BORROWING_FEE_BPS,
            max_borrowing_fee_bps: DEFAULT_MAX_BORROWING_FEE_BPS,
            redemption_fee_bps: DEFAULT_REDEMPTION_FEE_BPS,
            minute_decay_factor: DEFAULT_MINUTE_DECAY_FACTOR,
            redemption_beta: DEFAULT_REDEMPTION_BETA,
            pool_scale_factor: DEFAULT_POOL_SCALE_FACTOR,
            max_hint_steps: DEFAULT_MAX_HINT_STEPS,
            max_liquidation_batch: DEFAULT_MAX_LIQUIDATION_BATCH,
            max_redemption_iterations: DEFAULT_MAX_REDEMPTION_ITERATIONS,
        }
    }
}

impl ProtocolConfig {
    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> CdpResult<Self> {
        let config: ProtocolConfig =
            serde_json::from_str(json).map_err(|_| CdpError::InvalidConfig)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CdpResult<()> {
        // MCR must exceed 100%
        if self.mcr_bps as u64 <= BPS_SCALE {
            return Err(CdpError::InvalidConfig);
        }
        if self.ccr_bps <= self.mcr_bps {
            return Err(CdpError::InvalidConfig);
        }
        if self.max_borrowing_fee_bps as u64 >= BPS_SCALE
            || self.borrowing_fee_bps > self.max_borrowing_fee_bps
            || self.redemption_fee_bps as u64 >= BPS_SCALE
        {
            return Err(CdpError::InvalidConfig);
        }
        if self.minute_decay_factor == 0 || self.minute_decay_factor >= WAD || self.redemption_beta == 0 {
            return Err(CdpError::InvalidConfig);
        }
        if self.coll_gas_compensation_divisor == 0 || self.min_net_debt == 0 {
            return Err(CdpError::InvalidConfig);
        }
        if !is_valid_scale_factor(self.pool_scale_factor) {
            return Err(CdpError::InvalidConfig);
        }
        if self.max_hint_steps == 0
            || self.max_liquidation_batch == 0
            || self.max_redemption_iterations == 0
        {
            return Err(CdpError::InvalidConfig);
        }
        Ok(())
    }

    /// MCR as an 18-decimal ratio
    pub fn mcr(&self) -> U256 {
        math::bps_to_fraction(self.mcr_bps)
    }

    /// CCR as an 18-decimal ratio
    pub fn ccr(&self) -> U256 {
        math::bps_to_fraction(self.ccr_bps)
    }

    pub fn borrowing_fee_floor(&self) -> U256 {
        math::bps_to_fraction(self.borrowing_fee_bps)
    }

    pub fn max_borrowing_fee(&self) -> U256 {
        math::bps_to_fraction(self.max_borrowing_fee_bps)
    }

    pub fn redemption_fee_floor(&self) -> U256 {
        math::bps_to_fraction(self.redemption_fee_bps)
    }

    pub fn minute_decay_factor(&self) -> U256 {
        U256::from(self.minute_decay_factor)
    }

    pub fn min_net_debt(&self) -> U256 {
        U256::from(self.min_net_debt)
    }

    pub fn gas_compensation(&self) -> U256 {
        U256::from(self.gas_compensation)
    }

    pub fn pool_scale_factor(&self) -> U256 {
        U256::from(self.pool_scale_factor)
    }
}

/// A power of ten strictly between 1 and 1e18
fn is_valid_scale_factor(factor: u128) -> bool {
    let mut value = factor;
    if value < 10 || value >= WAD {
        return false;
    }
    while value % 10 == 0 {
        value /= 10;
    }
    value == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mcr(), U256::from(1_100_000_000_000_000_000u64));
        assert_eq!(config.ccr(), U256::from(1_500_000_000_000_000_000u64));
        assert_eq!(config.gas_compensation(), math::to_fixed(200));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ProtocolConfig::from_json_str(r#"{ "mcr_bps": 12000, "max_hint_steps": 8 }"#).unwrap();
        assert_eq!(config.mcr_bps, 12_000);
        assert_eq!(config.max_hint_steps, 8);
        assert_eq!(config.min_net_debt, DEFAULT_MIN_NET_DEBT);
    }

    #[test]
    fn test_rejects_mcr_at_or_below_100_percent() {
        let config = ProtocolConfig { mcr_bps: 10_000, ..Default::default() };
        assert_eq!(config.validate(), Err(CdpError::InvalidConfig));
    }

    #[test]
    fn test_ccr_must_exceed_mcr() {
        let config = ProtocolConfig { ccr_bps: DEFAULT_MCR_BPS, ..Default::default() };
        assert_eq!(config.validate(), Err(CdpError::InvalidConfig));
        let config = ProtocolConfig { ccr_bps: 12_000, mcr_bps: 11_500, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fee_parameters_are_checked() {
        let floor_above_cap = ProtocolConfig { borrowing_fee_bps: 600, ..Default::default() };
        assert_eq!(floor_above_cap.validate(), Err(CdpError::InvalidConfig));
        let no_decay = ProtocolConfig { minute_decay_factor: WAD, ..Default::default() };
        assert_eq!(no_decay.validate(), Err(CdpError::InvalidConfig));
        let no_beta = ProtocolConfig { redemption_beta: 0, ..Default::default() };
        assert_eq!(no_beta.validate(), Err(CdpError::InvalidConfig));
    }

    #[test]
    fn test_scale_factor_must_be_power_of_ten() {
        assert!(is_valid_scale_factor(1_000_000_000));
        assert!(is_valid_scale_factor(10));
        assert!(!is_valid_scale_factor(1));
        assert!(!is_valid_scale_factor(2_000));
        assert!(!is_valid_scale_factor(WAD));
    }

    #[test]
    fn test_malformed_json() {
        assert_eq!(ProtocolConfig::from_json_str("{ nope"), Err(CdpError::InvalidConfig));
    }
}
