//! Collateral and debt bookkeeping for the pools the protocol holds.
//!
//! - active: collateral and debt of open troves (excluding pending rewards)
//! - default: redistributed collateral and debt not yet folded into troves
//! - gas: stablecoin reserved to compensate liquidators
//! - surplus: collateral owed to owners whose troves were redeemed closed
//!
//! Every token behind these figures sits in the protocol custody account;
//! this module only tracks how that custody is split.

use odra::prelude::*;
use odra::casper_types::U256;
use std::collections::BTreeMap;
use crate::errors::{CdpError, CdpResult};
use crate::math::{checked_add, checked_sub};
use crate::types::PendingRewards;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolBalances {
    active_coll: U256,
    active_debt: U256,
    default_coll: U256,
    default_debt: U256,
    gas_reserve: U256,
    surplus: BTreeMap<Address, U256>,
    surplus_total: U256,
}

impl PoolBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_coll(&self) -> U256 {
        self.active_coll
    }

    pub fn active_debt(&self) -> U256 {
        self.active_debt
    }

    pub fn default_coll(&self) -> U256 {
        self.default_coll
    }

    pub fn default_debt(&self) -> U256 {
        self.default_debt
    }

    pub fn gas_reserve(&self) -> U256 {
        self.gas_reserve
    }

    pub fn surplus_total(&self) -> U256 {
        self.surplus_total
    }

    pub fn surplus_of(&self, owner: &Address) -> U256 {
        self.surplus.get(owner).copied().unwrap_or_default()
    }

    /// Active plus default collateral
    pub fn entire_coll(&self) -> U256 {
        self.active_coll + self.default_coll
    }

    /// Active plus default debt
    pub fn entire_debt(&self) -> U256 {
        self.active_debt + self.default_debt
    }

    pub fn add_active(&mut self, coll: U256, debt: U256) -> CdpResult<()> {
        let new_coll = checked_add(self.active_coll, coll)?;
        let new_debt = checked_add(self.active_debt, debt)?;
        self.active_coll = new_coll;
        self.active_debt = new_debt;
        Ok(())
    }

    pub fn sub_active(&mut self, coll: U256, debt: U256) -> CdpResult<()> {
        let new_coll = checked_sub(self.active_coll, coll)?;
        let new_debt = checked_sub(self.active_debt, debt)?;
        self.active_coll = new_coll;
        self.active_debt = new_debt;
        Ok(())
    }

    /// Move redistributed collateral and debt out of the active pool
    pub fn move_to_default(&mut self, coll: U256, debt: U256) -> CdpResult<()> {
        let active_coll = checked_sub(self.active_coll, coll)?;
        let active_debt = checked_sub(self.active_debt, debt)?;
        let default_coll = checked_add(self.default_coll, coll)?;
        let default_debt = checked_add(self.default_debt, debt)?;

        self.active_coll = active_coll;
        self.active_debt = active_debt;
        self.default_coll = default_coll;
        self.default_debt = default_debt;
        Ok(())
    }

    /// Move a trove's applied rewards back into the active pool.
    ///
    /// Per-trove rewards are rounded down, so their sum never exceeds the
    /// default pool; a rounding shortfall is clamped rather than failing.
    pub fn move_pending_to_active(&mut self, pending: &PendingRewards) -> CdpResult<()> {
        if pending.is_zero() {
            return Ok(());
        }
        let coll = pending.coll.min(self.default_coll);
        let debt = pending.debt.min(self.default_debt);
        let active_coll = checked_add(self.active_coll, pending.coll)?;
        let active_debt = checked_add(self.active_debt, pending.debt)?;

        self.default_coll = self.default_coll - coll;
        self.default_debt = self.default_debt - debt;
        self.active_coll = active_coll;
        self.active_debt = active_debt;
        Ok(())
    }

    pub fn add_gas_reserve(&mut self, amount: U256) -> CdpResult<()> {
        self.gas_reserve = checked_add(self.gas_reserve, amount)?;
        Ok(())
    }

    pub fn sub_gas_reserve(&mut self, amount: U256) -> CdpResult<()> {
        self.gas_reserve = checked_sub(self.gas_reserve, amount)?;
        Ok(())
    }

    pub fn add_surplus(&mut self, owner: Address, amount: U256) -> CdpResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let total = checked_add(self.surplus_total, amount)?;
        let owed = checked_add(self.surplus_of(&owner), amount)?;
        self.surplus.insert(owner, owed);
        self.surplus_total = total;
        Ok(())
    }

    /// Remove and return the surplus owed to `owner`
    pub fn take_surplus(&mut self, owner: &Address) -> CdpResult<U256> {
        let owed = self.surplus_of(owner);
        if owed.is_zero() {
            return Err(CdpError::NoCollateralSurplus);
        }
        self.surplus_total = checked_sub(self.surplus_total, owed)?;
        self.surplus.remove(owner);
        Ok(owed)
    }
}
