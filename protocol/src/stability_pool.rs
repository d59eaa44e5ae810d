//! Stability Pool
//!
//! Stablecoin deposits that absorb the debt of liquidated troves. In return
//! depositors receive the liquidated collateral pro rata.
//!
//! Key mechanics (product-sum algorithm):
//! - `P` tracks how much of a unit deposit survives all offsets so far
//! - `S` accumulates collateral gain per unit deposit, scaled by `P`
//! - a deposit's compounded value and gain are derived from the `(P, S,
//!   epoch, scale)` it saw when it last changed, so an offset is O(1)
//!   regardless of the number of depositors
//! - when `P` would fall below the scale factor it is multiplied back up
//!   and the scale incremented; a full wipe-out starts a new epoch
//!
//! Loss per unit is rounded up and gain per unit rounded down, with the
//! division remainders carried into the next offset, so the sum of
//! compounded deposits never exceeds `total_deposits`.

use odra::prelude::*;
use odra::casper_types::U256;
use std::collections::BTreeMap;
use crate::errors::{CdpError, CdpResult};
use crate::math::{self, precision};

/// A compounded deposit below `deposit / 1e9` is treated as zero
const DUST_DIVISOR: u64 = 1_000_000_000;

/// Depositor's snapshot at the time of the last deposit change
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct DepositSnapshot {
    /// Deposit value at the snapshot (stablecoin, 1e18)
    pub deposit: U256,
    /// Product at the snapshot
    pub p: U256,
    /// Sum for the snapshot's epoch and scale
    pub s: U256,
    /// Epoch at the snapshot
    pub epoch: u64,
    /// Scale at the snapshot
    pub scale: u64,
}

/// Pool statistics
#[odra::odra_type]
pub struct PoolStats {
    /// Total stablecoin deposited
    pub total_deposits: U256,
    /// Collateral held for depositors
    pub total_collateral: U256,
    /// Total debt absorbed (cumulative)
    pub total_debt_absorbed: U256,
    /// Number of depositors
    pub depositor_count: u64,
}

/// Product-sum algorithm state
#[odra::odra_type]
#[derive(Copy)]
pub struct ProductSumState {
    /// Current product (starts at 1e18)
    pub p: U256,
    /// Current epoch (incremented when the pool is emptied)
    pub epoch: u64,
    /// Current scale (incremented when `P` is rescaled)
    pub scale: u64,
}

impl Default for ProductSumState {
    fn default() -> Self {
        Self { p: precision(), epoch: 0, scale: 0 }
    }
}

/// Result of a deposit or withdrawal
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct DepositChange {
    /// Compounded deposit before the change
    pub previous: U256,
    /// Deposit after the change
    pub deposit: U256,
    /// Collateral gain paid out
    pub collateral_gain: U256,
}

/// Everything an offset will write, computed without mutating the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetPlan {
    /// Debt cancelled against deposits
    pub debt: U256,
    /// Collateral handed to depositors
    pub coll: U256,
    /// Epoch of the sum being incremented
    pub sum_epoch: u64,
    /// Scale of the sum being incremented
    pub sum_scale: u64,
    /// New value of that sum
    pub new_sum: U256,
    /// Product-sum state after the offset
    pub state: ProductSumState,
    /// Carried collateral gain remainder
    pub coll_error: U256,
    /// Carried debt loss remainder
    pub debt_loss_error: U256,
}

impl OffsetPlan {
    pub fn is_noop(&self) -> bool {
        self.debt.is_zero()
    }
}

#[derive(Debug, Clone)]
pub struct StabilityPool {
    scale_factor: U256,

    total_deposits: U256,
    total_collateral: U256,
    total_debt_absorbed: U256,

    ps_state: ProductSumState,
    /// `S` per `(epoch, scale)`
    epoch_scale_sum: BTreeMap<(u64, u64), U256>,
    last_coll_error: U256,
    last_debt_loss_error: U256,

    deposits: BTreeMap<Address, DepositSnapshot>,
}

impl StabilityPool {
    pub fn new(scale_factor: U256) -> Self {
        Self {
            scale_factor,
            total_deposits: U256::zero(),
            total_collateral: U256::zero(),
            total_debt_absorbed: U256::zero(),
            ps_state: ProductSumState::default(),
            epoch_scale_sum: BTreeMap::new(),
            last_coll_error: U256::zero(),
            last_debt_loss_error: U256::zero(),
            deposits: BTreeMap::new(),
        }
    }

    // ========== Deposit Functions ==========

    /// Add `amount` to the depositor's compounded deposit.
    ///
    /// Pending collateral gain is paid out (returned in the change) and the
    /// deposit is re-snapshotted at the current `P`/`S`.
    pub fn provide(&mut self, depositor: Address, amount: U256) -> CdpResult<DepositChange> {
        if amount.is_zero() {
            return Err(CdpError::ZeroAmount);
        }

        let previous = self.compounded_deposit(&depositor)?;
        let gain = self.depositor_collateral_gain(&depositor)?;
        let deposit = math::checked_add(previous, amount)?;
        let total_deposits = math::checked_add(self.total_deposits, amount)?;
        let total_collateral = math::checked_sub(self.total_collateral, gain)?;

        self.total_deposits = total_deposits;
        self.total_collateral = total_collateral;
        self.store_snapshot(depositor, deposit);

        tracing::debug!(?depositor, %amount, %deposit, "stability pool deposit");
        Ok(DepositChange { previous, deposit, collateral_gain: gain })
    }

    /// Withdraw `amount` from the compounded deposit and pay out the gain.
    ///
    /// `withdraw(0)` only claims the collateral gain. A deposit reduced to
    /// zero is removed.
    pub fn withdraw(&mut self, depositor: Address, amount: U256) -> CdpResult<DepositChange> {
        if !self.deposits.contains_key(&depositor) {
            return Err(CdpError::DepositNotFound);
        }

        let previous = self.compounded_deposit(&depositor)?;
        if amount > previous {
            return Err(CdpError::InsufficientDeposit);
        }
        let gain = self.depositor_collateral_gain(&depositor)?;
        let deposit = previous - amount;
        let total_deposits = math::checked_sub(self.total_deposits, amount)?;
        let total_collateral = math::checked_sub(self.total_collateral, gain)?;

        self.total_deposits = total_deposits;
        self.total_collateral = total_collateral;
        if deposit.is_zero() {
            self.deposits.remove(&depositor);
        } else {
            self.store_snapshot(depositor, deposit);
        }

        tracing::debug!(?depositor, %amount, %deposit, gain = %gain, "stability pool withdrawal");
        Ok(DepositChange { previous, deposit, collateral_gain: gain })
    }

    // ========== Liquidation Offset Functions ==========

    /// Compute the effect of cancelling `debt` against deposits and adding
    /// `coll` to depositors' gains. Nothing is written.
    pub fn preview_offset(&self, debt: U256, coll: U256) -> CdpResult<OffsetPlan> {
        let ProductSumState { p, epoch, scale } = self.ps_state;
        let unchanged = OffsetPlan {
            sum_epoch: epoch,
            sum_scale: scale,
            new_sum: self.current_sum(),
            state: self.ps_state,
            coll_error: self.last_coll_error,
            debt_loss_error: self.last_debt_loss_error,
            ..Default::default()
        };
        if debt.is_zero() {
            return Ok(unchanged);
        }

        let total = self.total_deposits;
        if total.is_zero() {
            return Err(CdpError::EmptyPool);
        }
        if debt > total {
            return Err(CdpError::InsufficientDeposit);
        }

        let unit = precision();

        // Collateral gain per unit staked, rounded down with carry
        let coll_numerator = math::checked_add(
            coll.checked_mul(unit).ok_or(CdpError::Overflow)?,
            self.last_coll_error,
        )?;
        let coll_gain_per_unit = coll_numerator / total;
        let coll_error = coll_numerator - coll_gain_per_unit * total;

        // Debt loss per unit staked, rounded up with carry
        let (debt_loss_per_unit, debt_loss_error) = if debt == total {
            (unit, U256::zero())
        } else {
            let loss_numerator = math::checked_sub(
                debt.checked_mul(unit).ok_or(CdpError::Overflow)?,
                self.last_debt_loss_error,
            )?;
            let loss_per_unit = loss_numerator / total + U256::one();
            let error = loss_per_unit * total - loss_numerator;
            (loss_per_unit, error)
        };

        let marginal_gain = coll_gain_per_unit.checked_mul(p).ok_or(CdpError::Overflow)?;
        let new_sum = math::checked_add(self.current_sum(), marginal_gain)?;

        let new_factor = unit - debt_loss_per_unit;
        let state = if new_factor.is_zero() {
            ProductSumState { p: unit, epoch: epoch + 1, scale: 0 }
        } else {
            let scaled_down = math::mul_div(p, new_factor, unit)?;
            let (new_p, new_scale) = if scaled_down < self.scale_factor {
                let rescaled = math::mul_div(
                    p.checked_mul(new_factor).ok_or(CdpError::Overflow)?,
                    self.scale_factor,
                    unit,
                )?;
                (rescaled, scale + 1)
            } else {
                (scaled_down, scale)
            };
            if new_p.is_zero() {
                return Err(CdpError::PrecisionUnderflow);
            }
            ProductSumState { p: new_p, epoch, scale: new_scale }
        };

        Ok(OffsetPlan {
            debt,
            coll,
            sum_epoch: epoch,
            sum_scale: scale,
            new_sum,
            state,
            coll_error,
            debt_loss_error,
        })
    }

    /// Write a plan produced by [`Self::preview_offset`]
    pub fn commit_offset(&mut self, plan: &OffsetPlan) {
        if plan.is_noop() {
            return;
        }
        let before = self.ps_state;

        self.epoch_scale_sum.insert((plan.sum_epoch, plan.sum_scale), plan.new_sum);
        self.ps_state = plan.state;
        self.last_coll_error = plan.coll_error;
        self.last_debt_loss_error = plan.debt_loss_error;

        self.total_deposits = self.total_deposits - plan.debt;
        self.total_collateral = self.total_collateral + plan.coll;
        self.total_debt_absorbed = self.total_debt_absorbed + plan.debt;

        if plan.state.epoch > before.epoch {
            tracing::info!(epoch = plan.state.epoch, "stability pool emptied, new epoch");
        } else if plan.state.scale > before.scale {
            tracing::info!(scale = plan.state.scale, p = %plan.state.p, "stability pool product rescaled");
        }
        tracing::debug!(debt = %plan.debt, coll = %plan.coll, "stability pool offset");
    }

    /// Cancel `debt` against deposits and distribute `coll` to depositors
    pub fn offset(&mut self, debt: U256, coll: U256) -> CdpResult<()> {
        let plan = self.preview_offset(debt, coll)?;
        self.commit_offset(&plan);
        Ok(())
    }

    // ========== Query Functions ==========

    /// Deposit value after all losses since the depositor's snapshot
    pub fn compounded_deposit(&self, depositor: &Address) -> CdpResult<U256> {
        match self.deposits.get(depositor) {
            Some(snapshot) => self.compounded_from_snapshot(snapshot),
            None => Ok(U256::zero()),
        }
    }

    /// Collateral gained since the depositor's snapshot
    pub fn depositor_collateral_gain(&self, depositor: &Address) -> CdpResult<U256> {
        let snapshot = match self.deposits.get(depositor) {
            Some(snapshot) => snapshot,
            None => return Ok(U256::zero()),
        };
        if snapshot.deposit.is_zero() || snapshot.p.is_zero() {
            return Ok(U256::zero());
        }

        // Sums of the snapshot's own epoch stay readable after a wipe-out
        let first_portion = math::checked_sub(
            self.sum_at(snapshot.epoch, snapshot.scale),
            snapshot.s,
        )?;
        let second_portion = self.sum_at(snapshot.epoch, snapshot.scale + 1) / self.scale_factor;
        let sum_diff = math::checked_add(first_portion, second_portion)?;

        let gain = math::mul_div(snapshot.deposit, sum_diff, snapshot.p)?;
        Ok(gain / precision())
    }

    pub fn deposit_snapshot(&self, depositor: &Address) -> Option<DepositSnapshot> {
        self.deposits.get(depositor).copied()
    }

    pub fn depositors(&self) -> impl Iterator<Item = &Address> {
        self.deposits.keys()
    }

    pub fn get_stats(&self) -> PoolStats {
        PoolStats {
            total_deposits: self.total_deposits,
            total_collateral: self.total_collateral,
            total_debt_absorbed: self.total_debt_absorbed,
            depositor_count: self.deposits.len() as u64,
        }
    }

    pub fn total_deposits(&self) -> U256 {
        self.total_deposits
    }

    pub fn total_collateral(&self) -> U256 {
        self.total_collateral
    }

    pub fn product_sum_state(&self) -> ProductSumState {
        self.ps_state
    }

    pub fn current_epoch(&self) -> u64 {
        self.ps_state.epoch
    }

    pub fn current_scale(&self) -> u64 {
        self.ps_state.scale
    }

    pub fn sum_at(&self, epoch: u64, scale: u64) -> U256 {
        self.epoch_scale_sum.get(&(epoch, scale)).copied().unwrap_or_default()
    }

    // ========== Internal Functions ==========

    fn current_sum(&self) -> U256 {
        self.sum_at(self.ps_state.epoch, self.ps_state.scale)
    }

    fn store_snapshot(&mut self, depositor: Address, deposit: U256) {
        let ProductSumState { p, epoch, scale } = self.ps_state;
        let snapshot = DepositSnapshot {
            deposit,
            p,
            s: self.sum_at(epoch, scale),
            epoch,
            scale,
        };
        self.deposits.insert(depositor, snapshot);
    }

    fn compounded_from_snapshot(&self, snapshot: &DepositSnapshot) -> CdpResult<U256> {
        if snapshot.deposit.is_zero() || snapshot.p.is_zero() {
            return Ok(U256::zero());
        }

        let state = self.ps_state;
        if snapshot.epoch < state.epoch {
            // Wiped out in an earlier epoch
            return Ok(U256::zero());
        }

        let compounded = match state.scale.saturating_sub(snapshot.scale) {
            0 => math::mul_div(snapshot.deposit, state.p, snapshot.p)?,
            1 => math::mul_div(snapshot.deposit, state.p, snapshot.p)? / self.scale_factor,
            _ => U256::zero(),
        };

        if compounded < snapshot.deposit / U256::from(DUST_DIVISOR) {
            return Ok(U256::zero());
        }
        Ok(compounded)
    }
}
