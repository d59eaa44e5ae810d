//! Redistribution ledger.
//!
//! Debt and collateral that the stability pool cannot absorb are shared
//! among the remaining troves in proportion to their stake. The ledger
//! keeps cumulative per-unit-staked rewards (`L_coll`, `L_debt`); each trove
//! records the values it last saw and folds the difference in lazily.
//!
//! Division remainders are carried forward in `last_*_error`, so over many
//! redistributions nothing is created or lost beyond a final rounding unit.

use odra::casper_types::U256;
use crate::errors::{CdpError, CdpResult};
use crate::math::{self, precision};
use crate::types::{PendingRewards, Trove};

/// Per-unit increments and carried errors for a pending redistribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedistributionPlan {
    /// Collateral being redistributed
    pub coll: U256,
    /// Debt being redistributed
    pub debt: U256,
    /// Increment to `L_coll`
    pub coll_reward_per_unit: U256,
    /// Increment to `L_debt`
    pub debt_reward_per_unit: U256,
    /// Collateral remainder carried to the next redistribution
    pub coll_error: U256,
    /// Debt remainder carried to the next redistribution
    pub debt_error: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedistributionLedger {
    l_coll: U256,
    l_debt: U256,
    total_stakes: U256,
    last_coll_error: U256,
    last_debt_error: U256,
    total_stakes_snapshot: U256,
    total_collateral_snapshot: U256,
}

impl RedistributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cumulative collateral reward per unit staked
    pub fn coll_per_unit_staked(&self) -> U256 {
        self.l_coll
    }

    /// Cumulative debt reward per unit staked
    pub fn debt_per_unit_staked(&self) -> U256 {
        self.l_debt
    }

    pub fn total_stakes(&self) -> U256 {
        self.total_stakes
    }

    pub fn total_stakes_snapshot(&self) -> U256 {
        self.total_stakes_snapshot
    }

    pub fn total_collateral_snapshot(&self) -> U256 {
        self.total_collateral_snapshot
    }

    pub fn last_errors(&self) -> (U256, U256) {
        (self.last_coll_error, self.last_debt_error)
    }

    /// Plan a redistribution over all current stakes
    pub fn preview_redistribution(&self, coll: U256, debt: U256) -> CdpResult<RedistributionPlan> {
        self.preview_redistribution_excluding(coll, debt, U256::zero())
    }

    /// Plan a redistribution over the stakes left once `excluded_stake` is
    /// removed (the stake of the trove being liquidated).
    pub fn preview_redistribution_excluding(
        &self,
        coll: U256,
        debt: U256,
        excluded_stake: U256,
    ) -> CdpResult<RedistributionPlan> {
        if coll.is_zero() && debt.is_zero() {
            return Ok(RedistributionPlan {
                coll_error: self.last_coll_error,
                debt_error: self.last_debt_error,
                ..Default::default()
            });
        }

        let stakes = math::checked_sub(self.total_stakes, excluded_stake)?;
        if stakes.is_zero() {
            return Err(CdpError::NoStakes);
        }

        let (coll_reward_per_unit, coll_error) = per_unit(coll, self.last_coll_error, stakes)?;
        let (debt_reward_per_unit, debt_error) = per_unit(debt, self.last_debt_error, stakes)?;

        // Fail now rather than at commit
        math::checked_add(self.l_coll, coll_reward_per_unit)?;
        math::checked_add(self.l_debt, debt_reward_per_unit)?;

        Ok(RedistributionPlan {
            coll,
            debt,
            coll_reward_per_unit,
            debt_reward_per_unit,
            coll_error,
            debt_error,
        })
    }

    /// Apply a plan produced by one of the preview methods
    pub fn commit(&mut self, plan: &RedistributionPlan) {
        self.l_coll = self.l_coll + plan.coll_reward_per_unit;
        self.l_debt = self.l_debt + plan.debt_reward_per_unit;
        self.last_coll_error = plan.coll_error;
        self.last_debt_error = plan.debt_error;

        if !plan.debt.is_zero() || !plan.coll.is_zero() {
            tracing::debug!(
                coll = %plan.coll,
                debt = %plan.debt,
                l_coll = %self.l_coll,
                l_debt = %self.l_debt,
                "redistributed to active troves"
            );
        }
    }

    pub fn redistribute(&mut self, coll: U256, debt: U256) -> CdpResult<RedistributionPlan> {
        let plan = self.preview_redistribution(coll, debt)?;
        self.commit(&plan);
        Ok(plan)
    }

    /// Rewards accrued by `trove` since its last snapshot
    pub fn pending_rewards(&self, trove: &Trove) -> CdpResult<PendingRewards> {
        if !trove.status.is_active() || trove.stake.is_zero() {
            return Ok(PendingRewards::default());
        }
        let coll_delta = math::checked_sub(self.l_coll, trove.coll_reward_snapshot)?;
        let debt_delta = math::checked_sub(self.l_debt, trove.debt_reward_snapshot)?;

        Ok(PendingRewards {
            coll: math::mul_div(trove.stake, coll_delta, precision())?,
            debt: math::mul_div(trove.stake, debt_delta, precision())?,
        })
    }

    /// Fold pending rewards into `trove` and move its snapshots to the
    /// current `L` values. Applying twice changes nothing.
    pub fn apply_snapshot(&self, trove: &mut Trove) -> CdpResult<PendingRewards> {
        let pending = self.pending_rewards(trove)?;
        let coll = math::checked_add(trove.coll, pending.coll)?;
        let debt = math::checked_add(trove.debt, pending.debt)?;

        trove.coll = coll;
        trove.debt = debt;
        self.update_reward_snapshots(trove);
        Ok(pending)
    }

    pub fn update_reward_snapshots(&self, trove: &mut Trove) {
        trove.coll_reward_snapshot = self.l_coll;
        trove.debt_reward_snapshot = self.l_debt;
    }

    /// Stake for a trove holding `coll`.
    ///
    /// Scaled by the last system snapshot so troves opened after
    /// redistributions do not share in rewards they were not exposed to.
    /// With no stakes left at the last snapshot the ratio restarts at 1:1.
    pub fn compute_new_stake(&self, coll: U256) -> CdpResult<U256> {
        if self.total_collateral_snapshot.is_zero() || self.total_stakes_snapshot.is_zero() {
            return Ok(coll);
        }
        math::mul_div(coll, self.total_stakes_snapshot, self.total_collateral_snapshot)
    }

    /// Recompute the stake of `trove` from its collateral
    pub fn update_stake(&mut self, trove: &mut Trove) -> CdpResult<U256> {
        let new_stake = self.compute_new_stake(trove.coll)?;
        let without_old = math::checked_sub(self.total_stakes, trove.stake)?;
        let total = math::checked_add(without_old, new_stake)?;

        self.total_stakes = total;
        trove.stake = new_stake;
        Ok(new_stake)
    }

    pub fn remove_stake(&mut self, trove: &mut Trove) -> CdpResult<()> {
        self.total_stakes = math::checked_sub(self.total_stakes, trove.stake)?;
        trove.stake = U256::zero();
        Ok(())
    }

    /// Record the stake-to-collateral ratio after a liquidation.
    ///
    /// `total_collateral` is active plus default pool collateral once the
    /// liquidator's compensation has left the system.
    pub fn update_system_snapshots(&mut self, total_collateral: U256) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = total_collateral;
    }
}

/// `(amount * 1e18 + carried) / stakes`, returning the quotient and the new remainder
fn per_unit(amount: U256, carried: U256, stakes: U256) -> CdpResult<(U256, U256)> {
    let scaled = amount.checked_mul(precision()).ok_or(CdpError::Overflow)?;
    let numerator = math::checked_add(scaled, carried)?;
    let quotient = numerator / stakes;
    let remainder = numerator - quotient * stakes;
    Ok((quotient, remainder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::math::to_fixed;
    use crate::types::TroveStatus;
    use odra::casper_types::account::AccountHash;
    use odra::prelude::Address;

    fn trove(byte: u8, coll: U256, debt: U256) -> Trove {
        let mut trove = Trove::new(Address::Account(AccountHash::new([byte; 32])));
        trove.coll = coll;
        trove.debt = debt;
        trove.status = TroveStatus::Active;
        trove
    }

    #[test]
    fn test_redistribute_with_no_stakes() {
        let mut ledger = RedistributionLedger::new();
        assert_eq!(ledger.redistribute(to_fixed(1), to_fixed(100)), Err(CdpError::NoStakes));
        assert_eq!(ledger.coll_per_unit_staked(), U256::zero());
    }

    #[test]
    fn test_excluding_last_stake_means_no_stakes() {
        let mut ledger = RedistributionLedger::new();
        let mut only = trove(1, to_fixed(10), to_fixed(2000));
        ledger.update_stake(&mut only).unwrap();

        let result = ledger.preview_redistribution_excluding(to_fixed(1), to_fixed(100), only.stake);
        assert_eq!(result, Err(CdpError::NoStakes));
    }

    #[test]
    fn test_rewards_split_by_stake() {
        let mut ledger = RedistributionLedger::new();
        let mut a = trove(1, to_fixed(10), to_fixed(2000));
        let mut b = trove(2, to_fixed(30), to_fixed(2000));
        ledger.update_stake(&mut a).unwrap();
        ledger.update_stake(&mut b).unwrap();
        ledger.update_reward_snapshots(&mut a);
        ledger.update_reward_snapshots(&mut b);

        ledger.redistribute(to_fixed(4), to_fixed(400)).unwrap();

        let pending_a = ledger.pending_rewards(&a).unwrap();
        let pending_b = ledger.pending_rewards(&b).unwrap();
        assert_eq!(pending_a.coll, to_fixed(1));
        assert_eq!(pending_a.debt, to_fixed(100));
        assert_eq!(pending_b.coll, to_fixed(3));
        assert_eq!(pending_b.debt, to_fixed(300));
    }

    #[test]
    fn test_remainder_is_carried() {
        let mut ledger = RedistributionLedger::new();
        let mut a = trove(1, U256::from(3u64), U256::one());
        ledger.update_stake(&mut a).unwrap();

        // 1 wei * 1e18 / 3 leaves a remainder of 1
        ledger.redistribute(U256::zero(), U256::one()).unwrap();
        assert_eq!(ledger.last_errors().1, U256::one());
        assert_eq!(ledger.debt_per_unit_staked(), U256::from(333_333_333_333_333_333u64));

        // Two more wei: (2e18 + 1) / 3 = 666..667 exactly
        ledger.redistribute(U256::zero(), U256::from(2u64)).unwrap();
        assert_eq!(ledger.last_errors().1, U256::zero());
        assert_eq!(ledger.debt_per_unit_staked() * U256::from(3u64), precision() * U256::from(3u64));
    }

    #[test]
    fn test_apply_snapshot_is_idempotent() {
        let mut ledger = RedistributionLedger::new();
        let mut a = trove(1, to_fixed(10), to_fixed(2000));
        let mut b = trove(2, to_fixed(10), to_fixed(2000));
        ledger.update_stake(&mut a).unwrap();
        ledger.update_stake(&mut b).unwrap();
        ledger.redistribute(to_fixed(2), to_fixed(200)).unwrap();

        let first = ledger.apply_snapshot(&mut a).unwrap();
        let after_first = a.clone();
        let second = ledger.apply_snapshot(&mut a).unwrap();

        assert_eq!(first.coll, to_fixed(1));
        assert!(second.is_zero());
        assert_eq!(a, after_first);
    }

    #[test]
    fn test_inactive_trove_has_no_rewards() {
        let mut ledger = RedistributionLedger::new();
        let mut a = trove(1, to_fixed(10), to_fixed(2000));
        let mut b = trove(2, to_fixed(10), to_fixed(2000));
        ledger.update_stake(&mut a).unwrap();
        ledger.update_stake(&mut b).unwrap();
        ledger.redistribute(to_fixed(2), to_fixed(200)).unwrap();

        b.status = TroveStatus::ClosedByOwner;
        assert!(ledger.pending_rewards(&b).unwrap().is_zero());
    }

    #[test]
    fn test_stake_uses_system_snapshot() {
        let mut ledger = RedistributionLedger::new();
        assert_eq!(ledger.compute_new_stake(to_fixed(5)).unwrap(), to_fixed(5));

        let mut a = trove(1, to_fixed(10), to_fixed(2000));
        ledger.update_stake(&mut a).unwrap();
        // 10 stakes backed by 20 collateral after a redistribution
        ledger.update_system_snapshots(to_fixed(20));
        assert_eq!(ledger.compute_new_stake(to_fixed(4)).unwrap(), to_fixed(2));
    }

    #[test]
    fn test_stake_restarts_when_snapshot_has_no_stakes() {
        let mut ledger = RedistributionLedger::new();
        let mut a = trove(1, to_fixed(10), to_fixed(2000));
        ledger.update_stake(&mut a).unwrap();
        ledger.remove_stake(&mut a).unwrap();
        // Collateral still booked in the default pool, but no stakes behind it
        ledger.update_system_snapshots(to_fixed(3));

        assert_eq!(ledger.compute_new_stake(to_fixed(4)).unwrap(), to_fixed(4));
        let mut b = trove(2, to_fixed(4), to_fixed(2000));
        ledger.update_stake(&mut b).unwrap();
        assert_eq!(ledger.total_stakes(), to_fixed(4));
        assert!(ledger.redistribute(to_fixed(1), to_fixed(100)).is_ok());
    }

    #[test]
    fn test_update_and_remove_stake() {
        let mut ledger = RedistributionLedger::new();
        let mut a = trove(1, to_fixed(10), to_fixed(2000));
        ledger.update_stake(&mut a).unwrap();
        assert_eq!(ledger.total_stakes(), to_fixed(10));

        a.coll = to_fixed(15);
        ledger.update_stake(&mut a).unwrap();
        assert_eq!(ledger.total_stakes(), to_fixed(15));

        ledger.remove_stake(&mut a).unwrap();
        assert_eq!(ledger.total_stakes(), U256::zero());
        assert!(a.stake.is_zero());
    }
}
