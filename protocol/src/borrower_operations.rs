//! Borrower operations: open, adjust and close troves, claim surplus.
//!
//! Every trove carries `gas_compensation` of extra debt, minted into the
//! protocol account as a reserve for whoever liquidates it. Its net debt
//! (debt minus that reserve) must stay at or above `min_net_debt`.
//!
//! Outside recovery mode a trove must stay at or above the MCR and no
//! operation may take the TCR below the CCR. In recovery mode:
//! - new troves need an ICR of at least the CCR and pay no borrowing fee
//! - collateral cannot be withdrawn
//! - a debt increase needs a resulting ICR of at least the CCR that is not
//!   below the current one
//! - troves cannot be closed

use odra::prelude::*;
use odra::casper_types::U256;
use crate::errors::{CdpError, CdpResult};
use crate::fees::{self, BaseRate};
use crate::interfaces::{require_balance, Externals};
use crate::math;
use crate::system::CdpSystem;
use crate::types::{AdjustTroveParams, InsertHints, Trove, TroveStatus};

impl CdpSystem {
    /// Open a trove with `coll` collateral, borrowing `stable_amount`.
    ///
    /// The borrowing fee is added to the debt and minted to the fee
    /// recipient; the gas reserve is added on top.
    pub fn open_trove(
        &mut self,
        ext: &mut Externals<'_>,
        owner: Address,
        coll: U256,
        stable_amount: U256,
        hints: InsertHints,
    ) -> CdpResult<Trove> {
        let price = ext.price()?;
        if coll.is_zero() || stable_amount.is_zero() {
            return Err(CdpError::ZeroAmount);
        }
        if self.troves.is_active(&owner) {
            return Err(CdpError::TroveAlreadyActive);
        }

        let recovery = self.is_recovery_mode(price)?;
        let (fee, base_rate) = if recovery {
            (U256::zero(), self.base_rate)
        } else {
            self.preview_borrowing_fee(stable_amount, ext.block_time)?
        };
        let net_debt = math::checked_add(stable_amount, fee)?;
        self.require_at_least_min_net_debt(net_debt)?;
        let gas_compensation = self.config.gas_compensation();
        let composite_debt = math::checked_add(net_debt, gas_compensation)?;

        let icr = math::compute_cr(coll, composite_debt, price)?;
        if recovery {
            self.require_icr_at_least_ccr(icr)?;
        } else {
            self.require_icr_above_mcr(icr)?;
            let new_tcr = self.tcr_after_change(coll, true, composite_debt, true, price)?;
            self.require_tcr_at_least_ccr(new_tcr)?;
        }
        require_balance(&*ext.collateral, &owner, coll)?;

        let trove = self.troves.open(owner, coll, composite_debt, hints)?;
        self.troves.pools_mut().add_gas_reserve(gas_compensation)?;
        self.base_rate = base_rate;

        let protocol = self.accounts.protocol;
        ext.collateral.transfer(&owner, &protocol, coll)?;
        ext.stablecoin.mint(&owner, stable_amount)?;
        if !fee.is_zero() {
            ext.stablecoin.mint(&self.accounts.fee_recipient, fee)?;
        }
        ext.stablecoin.mint(&protocol, gas_compensation)?;

        tracing::info!(?owner, %coll, debt = %composite_debt, %fee, recovery, "trove opened");
        Ok(trove)
    }

    /// Add or withdraw collateral and borrow or repay debt in one step
    pub fn adjust_trove(
        &mut self,
        ext: &mut Externals<'_>,
        owner: Address,
        params: AdjustTroveParams,
        hints: InsertHints,
    ) -> CdpResult<Trove> {
        let price = ext.price()?;
        if params.coll_delta.is_zero() && params.debt_delta.is_zero() {
            return Err(CdpError::ZeroAdjustment);
        }
        let entire = self.troves.entire_trove(&owner)?;
        let gas_compensation = self.config.gas_compensation();

        let new_coll = if params.coll_is_withdraw {
            if params.coll_delta > entire.coll {
                return Err(CdpError::InsufficientCollateral);
            }
            entire.coll - params.coll_delta
        } else {
            math::checked_add(entire.coll, params.coll_delta)?
        };

        let recovery = self.is_recovery_mode(price)?;
        let is_debt_increase = !params.debt_is_repay && !params.debt_delta.is_zero();
        let mut fee = U256::zero();
        let mut base_rate = self.base_rate;
        let new_debt = if params.debt_is_repay {
            let net_debt = math::checked_sub(entire.debt, gas_compensation)?;
            if params.debt_delta > net_debt {
                return Err(CdpError::RepayExceedsDebt);
            }
            entire.debt - params.debt_delta
        } else {
            if is_debt_increase && !recovery {
                (fee, base_rate) = self.preview_borrowing_fee(params.debt_delta, ext.block_time)?;
            }
            math::checked_add(math::checked_add(entire.debt, params.debt_delta)?, fee)?
        };

        if params.debt_is_repay && !params.debt_delta.is_zero() {
            self.require_at_least_min_net_debt(new_debt - gas_compensation)?;
        }

        let new_icr = math::compute_cr(new_coll, new_debt, price)?;
        if recovery {
            if params.coll_is_withdraw && !params.coll_delta.is_zero() {
                return Err(CdpError::CollWithdrawalInRecoveryMode);
            }
            if is_debt_increase {
                self.require_icr_at_least_ccr(new_icr)?;
                let old_icr = math::compute_cr(entire.coll, entire.debt, price)?;
                if new_icr < old_icr {
                    return Err(CdpError::IcrDecreaseInRecoveryMode);
                }
            }
        } else {
            self.require_icr_above_mcr(new_icr)?;
            let coll_increase = new_coll >= entire.coll;
            let debt_increase = new_debt >= entire.debt;
            let new_tcr = self.tcr_after_change(
                math::abs_diff(new_coll, entire.coll),
                coll_increase,
                math::abs_diff(new_debt, entire.debt),
                debt_increase,
                price,
            )?;
            self.require_tcr_at_least_ccr(new_tcr)?;
        }

        if !params.coll_is_withdraw {
            require_balance(&*ext.collateral, &owner, params.coll_delta)?;
        }
        if params.debt_is_repay {
            require_balance(&*ext.stablecoin, &owner, params.debt_delta)?;
        }

        let trove = self.troves.update(&owner, new_coll, new_debt, hints)?;
        self.base_rate = base_rate;

        let protocol = self.accounts.protocol;
        if !params.coll_delta.is_zero() {
            if params.coll_is_withdraw {
                ext.collateral.transfer(&protocol, &owner, params.coll_delta)?;
            } else {
                ext.collateral.transfer(&owner, &protocol, params.coll_delta)?;
            }
        }
        if !params.debt_delta.is_zero() {
            if params.debt_is_repay {
                ext.stablecoin.burn(&owner, params.debt_delta)?;
            } else {
                ext.stablecoin.mint(&owner, params.debt_delta)?;
                if !fee.is_zero() {
                    ext.stablecoin.mint(&self.accounts.fee_recipient, fee)?;
                }
            }
        }

        tracing::info!(?owner, coll = %trove.coll, debt = %trove.debt, "trove adjusted");
        Ok(trove)
    }

    /// Repay the net debt and take back all collateral.
    ///
    /// Returns the trove's final collateral and debt.
    pub fn close_trove(&mut self, ext: &mut Externals<'_>, owner: Address) -> CdpResult<Trove> {
        let price = ext.price()?;
        self.troves.require_active(&owner)?;
        if self.troves.trove_count() <= 1 {
            return Err(CdpError::OnlyOneTroveInSystem);
        }
        if self.is_recovery_mode(price)? {
            return Err(CdpError::CloseInRecoveryMode);
        }
        let entire = self.troves.entire_trove(&owner)?;
        let new_tcr = self.tcr_after_change(entire.coll, false, entire.debt, false, price)?;
        self.require_tcr_at_least_ccr(new_tcr)?;
        let gas_compensation = self.config.gas_compensation();
        let net_debt = math::checked_sub(entire.debt, gas_compensation)?;

        let protocol = self.accounts.protocol;
        require_balance(&*ext.stablecoin, &owner, net_debt)?;
        require_balance(&*ext.stablecoin, &protocol, gas_compensation)?;

        let closed = self.troves.close(&owner, TroveStatus::ClosedByOwner)?;
        let pools = self.troves.pools_mut();
        pools.sub_active(closed.coll, closed.debt)?;
        pools.sub_gas_reserve(gas_compensation)?;

        ext.stablecoin.burn(&owner, net_debt)?;
        ext.stablecoin.burn(&protocol, gas_compensation)?;
        ext.collateral.transfer(&protocol, &owner, closed.coll)?;

        tracing::info!(?owner, coll = %closed.coll, debt = %closed.debt, "trove closed by owner");
        Ok(closed)
    }

    /// Collect collateral left over after a redemption closed the trove
    pub fn claim_collateral(&mut self, ext: &mut Externals<'_>, owner: Address) -> CdpResult<U256> {
        let owed = self.troves.pools().surplus_of(&owner);
        if owed.is_zero() {
            return Err(CdpError::NoCollateralSurplus);
        }
        require_balance(&*ext.collateral, &self.accounts.protocol, owed)?;

        let claimed = self.troves.pools_mut().take_surplus(&owner)?;
        ext.collateral.transfer(&self.accounts.protocol, &owner, claimed)?;

        tracing::info!(?owner, amount = %claimed, "collateral surplus claimed");
        Ok(claimed)
    }

    /// Borrowing fee on `amount` at `now` outside recovery mode
    pub fn borrowing_fee(&self, amount: U256, now: u64) -> CdpResult<U256> {
        self.preview_borrowing_fee(amount, now).map(|(fee, _)| fee)
    }

    /// The fee and the decayed base rate to store once the borrow succeeds
    fn preview_borrowing_fee(&self, amount: U256, now: u64) -> CdpResult<(U256, BaseRate)> {
        let base_rate = self.base_rate.after_borrowing(&self.config, now)?;
        let rate = fees::borrowing_rate(&self.config, base_rate.rate);
        Ok((math::mul(amount, rate)?, base_rate))
    }

    fn require_at_least_min_net_debt(&self, net_debt: U256) -> CdpResult<()> {
        if net_debt < self.config.min_net_debt() {
            return Err(CdpError::BelowMinNetDebt);
        }
        Ok(())
    }

    fn require_icr_above_mcr(&self, icr: U256) -> CdpResult<()> {
        if icr < self.config.mcr() {
            return Err(CdpError::BelowMcr);
        }
        Ok(())
    }

    fn require_icr_at_least_ccr(&self, icr: U256) -> CdpResult<()> {
        if icr < self.config.ccr() {
            return Err(CdpError::BelowCcr);
        }
        Ok(())
    }

    fn require_tcr_at_least_ccr(&self, tcr: U256) -> CdpResult<()> {
        if tcr < self.config.ccr() {
            return Err(CdpError::TcrBelowCcr);
        }
        Ok(())
    }
}
