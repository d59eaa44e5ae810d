//! Base rate fees.
//!
//! Every redemption raises a shared base rate by the redeemed share of the
//! stablecoin supply divided by `redemption_beta`. The base rate decays by
//! `minute_decay_factor` for each whole minute since the last fee operation.
//!
//! - borrowing rate: `min(borrowing floor + base rate, borrowing ceiling)`
//! - redemption rate: `min(redemption floor + base rate, 100%)`
//!
//! Timestamps are seconds and come from the caller ([`Externals::block_time`]).
//! A timestamp earlier than the last fee operation counts as no time passed.
//!
//! [`Externals::block_time`]: crate::interfaces::Externals::block_time

use odra::casper_types::U256;
use crate::config::ProtocolConfig;
use crate::errors::CdpResult;
use crate::math::{self, precision};

pub const SECONDS_PER_MINUTE: u64 = 60;

/// Decay stops compounding after 1000 years
const MAX_DECAY_MINUTES: u64 = 525_600_000;

/// The base rate and when it was last touched by a fee operation
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct BaseRate {
    /// Base rate as of `last_fee_operation_time` (1e18 = 100%)
    pub rate: U256,
    /// Seconds
    pub last_fee_operation_time: u64,
}

impl BaseRate {
    /// Whole minutes between the last fee operation and `now`
    pub fn minutes_passed(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_fee_operation_time) / SECONDS_PER_MINUTE
    }

    /// The base rate decayed to `now`
    pub fn decayed(&self, config: &ProtocolConfig, now: u64) -> CdpResult<U256> {
        if self.rate.is_zero() {
            return Ok(U256::zero());
        }
        let minutes = self.minutes_passed(now).min(MAX_DECAY_MINUTES);
        let factor = math::dec_pow(config.minute_decay_factor(), minutes)?;
        math::mul(self.rate, factor)
    }

    /// State after a borrowing fee is charged at `now`
    pub fn after_borrowing(&self, config: &ProtocolConfig, now: u64) -> CdpResult<BaseRate> {
        let decayed = self.decayed(config, now)?;
        Ok(self.touched(decayed, now))
    }

    /// State after `redeemed` out of `total_supply` stablecoin is redeemed at `now`
    pub fn after_redemption(
        &self,
        config: &ProtocolConfig,
        redeemed: U256,
        total_supply: U256,
        now: u64,
    ) -> CdpResult<BaseRate> {
        let decayed = self.decayed(config, now)?;
        let redeemed_fraction = math::div(redeemed, total_supply)?;
        let increase = redeemed_fraction / U256::from(config.redemption_beta);
        let raised = math::min(math::checked_add(decayed, increase)?, precision());
        Ok(self.touched(raised, now))
    }

    /// The operation time only moves once a full minute has passed, so
    /// frequent operations cannot hold the rate up by resetting the clock.
    fn touched(&self, rate: U256, now: u64) -> BaseRate {
        let last_fee_operation_time = if self.minutes_passed(now) >= 1 {
            now
        } else {
            self.last_fee_operation_time
        };
        BaseRate { rate, last_fee_operation_time }
    }
}

/// Borrowing fee rate for a given base rate
pub fn borrowing_rate(config: &ProtocolConfig, base_rate: U256) -> U256 {
    let rate = config.borrowing_fee_floor().saturating_add(base_rate);
    math::min(rate, config.max_borrowing_fee())
}

/// Redemption fee rate for a given base rate
pub fn redemption_rate(config: &ProtocolConfig, base_rate: U256) -> U256 {
    let rate = config.redemption_fee_floor().saturating_add(base_rate);
    math::min(rate, precision())
}
