//! The CDP system: all protocol state behind one owned value.
//!
//! Borrower operations, liquidation and redemption are implemented on
//! [`CdpSystem`] in their own modules. Every state-changing call receives
//! its collaborators (price feed and token ledgers) through
//! [`Externals`], validates and plans first, and only then writes.

use odra::prelude::*;
use odra::casper_types::U256;
use crate::config::ProtocolConfig;
use crate::errors::{CdpError, CdpResult};
use crate::fees::{self, BaseRate};
use crate::interfaces::{require_balance, Externals, TokenLedger};
use crate::liquidation_engine::LiquidationStats;
use crate::math;
use crate::redemption_engine::RedemptionStats;
use crate::stability_pool::{DepositChange, PoolStats, StabilityPool};
use crate::trove_manager::TroveManager;
use crate::types::{EntireTrove, SystemAccounts, SystemStatus, Trove, TroveStatus};

#[derive(Debug, Clone)]
pub struct CdpSystem {
    pub(crate) config: ProtocolConfig,
    pub(crate) accounts: SystemAccounts,
    pub(crate) troves: TroveManager,
    pub(crate) stability_pool: StabilityPool,
    pub(crate) base_rate: BaseRate,
    pub(crate) liquidation_stats: LiquidationStats,
    pub(crate) redemption_stats: RedemptionStats,
}

impl CdpSystem {
    pub fn new(config: ProtocolConfig, accounts: SystemAccounts) -> CdpResult<Self> {
        config.validate()?;
        tracing::info!(
            mcr_bps = config.mcr_bps,
            ccr_bps = config.ccr_bps,
            min_net_debt = %config.min_net_debt(),
            scale_factor = %config.pool_scale_factor(),
            "cdp system initialized"
        );
        Ok(Self {
            troves: TroveManager::new(config.max_hint_steps),
            stability_pool: StabilityPool::new(config.pool_scale_factor()),
            base_rate: BaseRate::default(),
            config,
            accounts,
            liquidation_stats: LiquidationStats::default(),
            redemption_stats: RedemptionStats::default(),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn accounts(&self) -> SystemAccounts {
        self.accounts
    }

    pub fn troves(&self) -> &TroveManager {
        &self.troves
    }

    pub fn stability_pool(&self) -> &StabilityPool {
        &self.stability_pool
    }

    pub fn liquidation_stats(&self) -> &LiquidationStats {
        &self.liquidation_stats
    }

    pub fn redemption_stats(&self) -> &RedemptionStats {
        &self.redemption_stats
    }

    // ========== Views ==========

    pub fn get_trove(&self, owner: &Address) -> Option<&Trove> {
        self.troves.get_trove(owner)
    }

    pub fn trove_status(&self, owner: &Address) -> TroveStatus {
        self.troves.trove_status(owner)
    }

    pub fn entire_trove(&self, owner: &Address) -> CdpResult<EntireTrove> {
        self.troves.entire_trove(owner)
    }

    pub fn entire_system_coll(&self) -> U256 {
        self.troves.entire_system_coll()
    }

    pub fn entire_system_debt(&self) -> U256 {
        self.troves.entire_system_debt()
    }

    pub fn current_icr(&self, owner: &Address, price: U256) -> CdpResult<U256> {
        self.troves.current_icr(owner, price)
    }

    pub fn nominal_icr(&self, owner: &Address) -> CdpResult<U256> {
        self.troves.nominal_icr(owner)
    }

    pub fn tcr(&self, price: U256) -> CdpResult<U256> {
        self.troves.tcr(price)
    }

    /// TCR below CCR
    pub fn is_recovery_mode(&self, price: U256) -> CdpResult<bool> {
        Ok(self.troves.tcr(price)? < self.config.ccr())
    }

    /// TCR once `coll` and `debt` are added to (or taken from) the system
    pub fn tcr_after_change(
        &self,
        coll: U256,
        coll_increase: bool,
        debt: U256,
        debt_increase: bool,
        price: U256,
    ) -> CdpResult<U256> {
        let system_coll = self.entire_system_coll();
        let system_debt = self.entire_system_debt();
        let new_coll = if coll_increase {
            math::checked_add(system_coll, coll)?
        } else {
            math::checked_sub(system_coll, coll)?
        };
        let new_debt = if debt_increase {
            math::checked_add(system_debt, debt)?
        } else {
            math::checked_sub(system_debt, debt)?
        };
        math::compute_cr(new_coll, new_debt, price)
    }

    /// Stored base rate, as of the last fee operation
    pub fn base_rate(&self) -> BaseRate {
        self.base_rate
    }

    /// Borrowing fee rate at `now`, ignoring recovery mode
    pub fn borrowing_rate(&self, now: u64) -> CdpResult<U256> {
        Ok(fees::borrowing_rate(&self.config, self.base_rate.decayed(&self.config, now)?))
    }

    /// Redemption fee rate at `now` before the redemption's own increase
    pub fn redemption_rate(&self, now: u64) -> CdpResult<U256> {
        Ok(fees::redemption_rate(&self.config, self.base_rate.decayed(&self.config, now)?))
    }

    pub fn compounded_deposit(&self, depositor: &Address) -> CdpResult<U256> {
        self.stability_pool.compounded_deposit(depositor)
    }

    pub fn depositor_collateral_gain(&self, depositor: &Address) -> CdpResult<U256> {
        self.stability_pool.depositor_collateral_gain(depositor)
    }

    pub fn collateral_surplus(&self, owner: &Address) -> U256 {
        self.troves.pools().surplus_of(owner)
    }

    /// Owners from the lowest to the highest NICR
    pub fn sorted_owners(&self) -> Vec<Address> {
        self.troves.sorted().iter().map(|(owner, _)| owner).collect()
    }

    pub fn get_status(&self) -> SystemStatus {
        SystemStatus {
            entire_coll: self.entire_system_coll(),
            entire_debt: self.entire_system_debt(),
            trove_count: self.troves.trove_count() as u64,
            total_stakes: self.troves.rewards().total_stakes(),
            stability_pool_deposits: self.stability_pool.total_deposits(),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.stability_pool.get_stats()
    }

    // ========== Stability Pool ==========

    /// Deposit stablecoin into the stability pool, paying out any pending
    /// collateral gain.
    pub fn provide_to_stability_pool(
        &mut self,
        ext: &mut Externals<'_>,
        depositor: Address,
        amount: U256,
    ) -> CdpResult<DepositChange> {
        if amount.is_zero() {
            return Err(CdpError::ZeroAmount);
        }
        let gain = self.stability_pool.depositor_collateral_gain(&depositor)?;
        require_balance(&*ext.stablecoin, &depositor, amount)?;
        require_balance(&*ext.collateral, &self.accounts.protocol, gain)?;

        let change = self.stability_pool.provide(depositor, amount)?;

        ext.stablecoin.transfer(&depositor, &self.accounts.protocol, amount)?;
        if !change.collateral_gain.is_zero() {
            ext.collateral
                .transfer(&self.accounts.protocol, &depositor, change.collateral_gain)?;
        }

        tracing::info!(?depositor, %amount, deposit = %change.deposit, "provided to stability pool");
        Ok(change)
    }

    /// Withdraw stablecoin from the stability pool; `amount == 0` only claims
    /// the collateral gain.
    pub fn withdraw_from_stability_pool(
        &mut self,
        ext: &mut Externals<'_>,
        depositor: Address,
        amount: U256,
    ) -> CdpResult<DepositChange> {
        let gain = self.stability_pool.depositor_collateral_gain(&depositor)?;
        require_balance(&*ext.stablecoin, &self.accounts.protocol, amount)?;
        require_balance(&*ext.collateral, &self.accounts.protocol, gain)?;

        let change = self.stability_pool.withdraw(depositor, amount)?;

        if !amount.is_zero() {
            ext.stablecoin.transfer(&self.accounts.protocol, &depositor, amount)?;
        }
        if !change.collateral_gain.is_zero() {
            ext.collateral
                .transfer(&self.accounts.protocol, &depositor, change.collateral_gain)?;
        }

        tracing::info!(?depositor, %amount, deposit = %change.deposit, "withdrew from stability pool");
        Ok(change)
    }

    // ========== Audit ==========

    /// Compare the protocol's books with the token ledgers and with the
    /// sum over individual troves and deposits.
    pub fn audit(&self, stablecoin: &dyn TokenLedger, collateral: &dyn TokenLedger) -> CdpResult<AuditReport> {
        let pools = self.troves.pools();
        let protocol = self.accounts.protocol;

        let mut troves_coll = U256::zero();
        let mut troves_debt = U256::zero();
        for owner in self.troves.owners() {
            let entire = self.troves.entire_trove(owner)?;
            troves_coll = math::checked_add(troves_coll, entire.coll)?;
            troves_debt = math::checked_add(troves_debt, entire.debt)?;
        }

        let mut compounded_deposits = U256::zero();
        for depositor in self.stability_pool.depositors() {
            let deposit = self.stability_pool.compounded_deposit(depositor)?;
            compounded_deposits = math::checked_add(compounded_deposits, deposit)?;
        }

        let booked_collateral = pools.entire_coll()
            + self.stability_pool.total_collateral()
            + pools.surplus_total();
        let booked_stablecoin = self.stability_pool.total_deposits() + pools.gas_reserve();

        Ok(AuditReport {
            booked_collateral,
            custody_collateral: collateral.balance_of(&protocol),
            booked_stablecoin,
            custody_stablecoin: stablecoin.balance_of(&protocol),
            system_coll: pools.entire_coll(),
            troves_coll,
            system_debt: pools.entire_debt(),
            troves_debt,
            pool_deposits: self.stability_pool.total_deposits(),
            compounded_deposits,
        })
    }
}

/// Books versus ledgers, see [`CdpSystem::audit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    /// Active + default + stability pool + surplus collateral
    pub booked_collateral: U256,
    /// Collateral held by the protocol account
    pub custody_collateral: U256,
    /// Stability pool deposits + gas reserve
    pub booked_stablecoin: U256,
    /// Stablecoin held by the protocol account
    pub custody_stablecoin: U256,
    /// Active + default pool collateral
    pub system_coll: U256,
    /// Sum of entire trove collateral
    pub troves_coll: U256,
    /// Active + default pool debt
    pub system_debt: U256,
    /// Sum of entire trove debt
    pub troves_debt: U256,
    /// Stability pool total deposits
    pub pool_deposits: U256,
    /// Sum of compounded deposits
    pub compounded_deposits: U256,
}

impl AuditReport {
    /// Custody matches the books exactly; per-trove and per-deposit sums
    /// never exceed the pool totals and trail them by at most `tolerance`.
    pub fn is_consistent(&self, tolerance: U256) -> bool {
        let within = |total: U256, parts: U256| parts <= total && total - parts <= tolerance;

        self.booked_collateral == self.custody_collateral
            && self.booked_stablecoin == self.custody_stablecoin
            && within(self.system_coll, self.troves_coll)
            && within(self.system_debt, self.troves_debt)
            && self.compounded_deposits <= self.pool_deposits
    }
}
