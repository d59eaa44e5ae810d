//! Liquidation Engine
//!
//! Liquidates troves whose ICR has fallen below the MCR.
//!
//! In recovery mode (TCR below CCR) the rules depend on the trove's ICR:
//! - at or below 100%: everything left after compensation is redistributed
//! - below the MCR: as in normal mode
//! - from the MCR up to the TCR, if the stability pool covers the whole
//!   debt: the debt is offset against `debt * MCR / price` collateral and
//!   the rest is left to the owner as a claimable surplus
//! - otherwise the trove is not liquidatable
//!
//! The last open trove is never liquidated.
//!
//! Liquidation flow for one trove:
//! 1. Evaluate: fold pending rewards into a local copy and compute the ICR
//! 2. Pay the liquidator `coll / coll_gas_compensation_divisor` plus the
//!    trove's stablecoin gas reserve
//! 3. Offset as much debt as the stability pool can absorb, handing it a
//!    proportional share of the remaining collateral
//! 4. Redistribute the rest over the other troves' stakes
//! 5. Close the trove and refresh the stake snapshots
//!
//! Steps 2 to 5 are planned in full before anything is written, so a
//! failing trove (for example nobody left to redistribute to) is left
//! exactly as it was.

use odra::prelude::*;
use odra::casper_types::U256;
use crate::errors::{CdpError, CdpResult};
use crate::interfaces::{require_balance, Externals};
use crate::math;
use crate::redistribution::RedistributionPlan;
use crate::stability_pool::OffsetPlan;
use crate::system::CdpSystem;
use crate::types::TroveStatus;

/// Where a trove is in the liquidation pipeline
#[odra::odra_type]
#[derive(Copy)]
pub enum LiquidationStage {
    /// Picked for liquidation, not yet evaluated
    Candidate,
    /// Below MCR, amounts computed
    Evaluated,
    /// Debt fully absorbed by the stability pool
    Offset,
    /// Debt fully redistributed to other troves
    Redistributed,
    /// Split between the stability pool and redistribution
    OffsetAndRedistributed,
    /// Recovery mode: offset at the MCR, excess collateral kept as surplus
    CappedOffset,
    /// Healthy or no longer active; left alone
    Skipped,
}

/// Amounts for a single trove liquidation
#[odra::odra_type]
pub struct LiquidationValues {
    /// Owner of the liquidated trove
    pub owner: Address,
    /// Collateral including pending rewards
    pub entire_coll: U256,
    /// Debt including pending rewards
    pub entire_debt: U256,
    /// ICR at the liquidation price
    pub icr: U256,
    /// Collateral paid to the liquidator
    pub coll_gas_compensation: U256,
    /// Stablecoin paid to the liquidator from the gas reserve
    pub stable_gas_compensation: U256,
    /// Debt cancelled against the stability pool
    pub debt_to_offset: U256,
    /// Collateral sent to the stability pool
    pub coll_to_sp: U256,
    /// Debt redistributed to other troves
    pub debt_to_redistribute: U256,
    /// Collateral redistributed to other troves
    pub coll_to_redistribute: U256,
    /// Collateral left to the owner as claimable surplus
    pub coll_surplus: U256,
    /// Pipeline stage
    pub stage: LiquidationStage,
}

impl LiquidationValues {
    fn candidate(owner: Address) -> Self {
        Self {
            owner,
            entire_coll: U256::zero(),
            entire_debt: U256::zero(),
            icr: U256::zero(),
            coll_gas_compensation: U256::zero(),
            stable_gas_compensation: U256::zero(),
            debt_to_offset: U256::zero(),
            coll_to_sp: U256::zero(),
            debt_to_redistribute: U256::zero(),
            coll_to_redistribute: U256::zero(),
            coll_surplus: U256::zero(),
            stage: LiquidationStage::Candidate,
        }
    }

    pub fn is_liquidated(&self) -> bool {
        matches!(
            self.stage,
            LiquidationStage::Offset
                | LiquidationStage::Redistributed
                | LiquidationStage::OffsetAndRedistributed
                | LiquidationStage::CappedOffset
        )
    }
}

/// Totals over a liquidation call
#[odra::odra_type]
#[derive(Default)]
pub struct LiquidationTotals {
    /// Number of troves liquidated
    pub troves_liquidated: u64,
    /// Collateral of the liquidated troves
    pub total_coll_in_sequence: U256,
    /// Debt of the liquidated troves
    pub total_debt_in_sequence: U256,
    /// Collateral paid to the liquidator
    pub coll_gas_compensation: U256,
    /// Stablecoin paid to the liquidator
    pub stable_gas_compensation: U256,
    /// Debt absorbed by the stability pool
    pub debt_to_offset: U256,
    /// Collateral sent to the stability pool
    pub coll_to_sp: U256,
    /// Debt redistributed
    pub debt_to_redistribute: U256,
    /// Collateral redistributed
    pub coll_to_redistribute: U256,
    /// Collateral left as surplus
    pub coll_surplus: U256,
}

impl LiquidationTotals {
    fn add(&mut self, values: &LiquidationValues) {
        self.troves_liquidated += 1;
        self.total_coll_in_sequence = self.total_coll_in_sequence + values.entire_coll;
        self.total_debt_in_sequence = self.total_debt_in_sequence + values.entire_debt;
        self.coll_gas_compensation = self.coll_gas_compensation + values.coll_gas_compensation;
        self.stable_gas_compensation = self.stable_gas_compensation + values.stable_gas_compensation;
        self.debt_to_offset = self.debt_to_offset + values.debt_to_offset;
        self.coll_to_sp = self.coll_to_sp + values.coll_to_sp;
        self.debt_to_redistribute = self.debt_to_redistribute + values.debt_to_redistribute;
        self.coll_to_redistribute = self.coll_to_redistribute + values.coll_to_redistribute;
        self.coll_surplus = self.coll_surplus + values.coll_surplus;
    }
}

/// Why a multi-trove liquidation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Every requested trove was processed
    Completed,
    /// `max_liquidation_batch` troves were processed
    BatchLimit,
    /// The sorted list ran out
    ListExhausted,
    /// The next candidate from the head was not liquidatable
    HealthyTrove(Address),
    /// Liquidating `owner` failed; it and everything after it were left alone
    Failed { owner: Address, error: CdpError },
}

/// Outcome of a multi-trove liquidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationSummary {
    pub totals: LiquidationTotals,
    /// Every trove looked at, liquidated or skipped, in order
    pub outcomes: Vec<LiquidationValues>,
    pub halt: HaltReason,
}

impl LiquidationSummary {
    pub fn liquidated(&self) -> impl Iterator<Item = &LiquidationValues> {
        self.outcomes.iter().filter(|v| v.is_liquidated())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &LiquidationValues> {
        self.outcomes.iter().filter(|v| v.stage == LiquidationStage::Skipped)
    }
}

/// Cumulative liquidation statistics
#[odra::odra_type]
#[derive(Default)]
pub struct LiquidationStats {
    /// Total number of troves liquidated
    pub total_liquidations: u64,
    /// Total debt liquidated (cumulative)
    pub total_debt_liquidated: U256,
    /// Total collateral liquidated (cumulative)
    pub total_coll_liquidated: U256,
    /// Total debt absorbed by the stability pool (cumulative)
    pub total_debt_offset: U256,
    /// Total debt redistributed (cumulative)
    pub total_debt_redistributed: U256,
}

/// How a liquidatable trove is unwound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiquidationMode {
    /// Offset what the pool covers, redistribute the rest
    Normal,
    /// Recovery mode at or below 100% ICR
    RedistributeAll,
    /// Recovery mode between the MCR and the TCR
    Capped,
}

/// A fully planned liquidation
struct LiquidationPlan {
    values: LiquidationValues,
    offset: OffsetPlan,
    redistribution: RedistributionPlan,
}

impl CdpSystem {
    // ========== Liquidation Functions ==========

    /// Liquidate a single trove
    pub fn liquidate(
        &mut self,
        ext: &mut Externals<'_>,
        liquidator: Address,
        owner: Address,
    ) -> CdpResult<LiquidationValues> {
        let price = ext.price()?;
        let plan = self.plan_liquidation(ext, owner, price)?;
        self.execute_liquidation(ext, liquidator, plan)
    }

    /// Liquidate up to `n` troves starting from the head of the sorted
    /// list, stopping at the first healthy one.
    pub fn liquidate_troves(
        &mut self,
        ext: &mut Externals<'_>,
        liquidator: Address,
        n: u32,
    ) -> CdpResult<LiquidationSummary> {
        let price = ext.price()?;
        let limit = n.min(self.config.max_liquidation_batch);
        let mut totals = LiquidationTotals::default();
        let mut outcomes = Vec::new();

        let halt = loop {
            if totals.troves_liquidated >= limit as u64 {
                break if limit < n { HaltReason::BatchLimit } else { HaltReason::Completed };
            }
            let owner = match self.troves.sorted().head() {
                Some(owner) => owner,
                None => break HaltReason::ListExhausted,
            };

            match self.plan_liquidation(ext, owner, price) {
                Ok(plan) => match self.execute_liquidation(ext, liquidator, plan) {
                    Ok(values) => {
                        totals.add(&values);
                        outcomes.push(values);
                    }
                    Err(error) => break HaltReason::Failed { owner, error },
                },
                Err(CdpError::AboveThreshold) => {
                    outcomes.push(self.skipped(owner, price));
                    break HaltReason::HealthyTrove(owner);
                }
                Err(error) => break HaltReason::Failed { owner, error },
            }
        };

        self.finish_batch(totals, outcomes, halt)
    }

    /// Liquidate the given troves, skipping healthy or inactive ones
    pub fn batch_liquidate_troves(
        &mut self,
        ext: &mut Externals<'_>,
        liquidator: Address,
        owners: &[Address],
    ) -> CdpResult<LiquidationSummary> {
        let price = ext.price()?;
        let limit = self.config.max_liquidation_batch as usize;
        let mut totals = LiquidationTotals::default();
        let mut outcomes = Vec::new();
        let mut halt = HaltReason::Completed;

        for (index, owner) in owners.iter().enumerate() {
            if index >= limit {
                halt = HaltReason::BatchLimit;
                break;
            }
            match self.plan_liquidation(ext, *owner, price) {
                Ok(plan) => match self.execute_liquidation(ext, liquidator, plan) {
                    Ok(values) => {
                        totals.add(&values);
                        outcomes.push(values);
                    }
                    Err(error) => {
                        halt = HaltReason::Failed { owner: *owner, error };
                        break;
                    }
                },
                Err(CdpError::AboveThreshold)
                | Err(CdpError::TroveNotFound)
                | Err(CdpError::TroveNotActive) => outcomes.push(self.skipped(*owner, price)),
                Err(error) => {
                    halt = HaltReason::Failed { owner: *owner, error };
                    break;
                }
            }
        }

        self.finish_batch(totals, outcomes, halt)
    }

    /// Whether `owner` could be liquidated at `price`
    pub fn is_liquidatable(&self, owner: &Address, price: U256) -> bool {
        let entire = match self.troves.entire_trove(owner) {
            Ok(entire) => entire,
            Err(_) => return false,
        };
        math::compute_cr(entire.coll, entire.debt, price)
            .and_then(|icr| self.liquidation_mode(icr, entire.debt, price))
            .is_ok()
    }

    // ========== Internal Functions ==========

    fn finish_batch(
        &self,
        totals: LiquidationTotals,
        outcomes: Vec<LiquidationValues>,
        halt: HaltReason,
    ) -> CdpResult<LiquidationSummary> {
        if totals.troves_liquidated == 0 {
            return Err(match halt {
                HaltReason::Failed { error, .. } => error,
                _ => CdpError::NothingToLiquidate,
            });
        }
        match halt {
            HaltReason::Failed { owner, error } => {
                tracing::warn!(?owner, %error, liquidated = totals.troves_liquidated, "liquidation batch halted")
            }
            _ => tracing::info!(liquidated = totals.troves_liquidated, ?halt, "liquidation batch finished"),
        }
        Ok(LiquidationSummary { totals, outcomes, halt })
    }

    fn skipped(&self, owner: Address, price: U256) -> LiquidationValues {
        let mut values = LiquidationValues::candidate(owner);
        if let Ok(entire) = self.troves.entire_trove(&owner) {
            values.entire_coll = entire.coll;
            values.entire_debt = entire.debt;
            values.icr = math::compute_cr(entire.coll, entire.debt, price).unwrap_or_default();
        }
        values.stage = LiquidationStage::Skipped;
        values
    }

    /// Which rules apply to a trove with `icr` and `debt`, or
    /// `AboveThreshold` when it cannot be liquidated
    fn liquidation_mode(&self, icr: U256, debt: U256, price: U256) -> CdpResult<LiquidationMode> {
        let mcr = self.config.mcr();
        if !self.is_recovery_mode(price)? {
            return if icr < mcr { Ok(LiquidationMode::Normal) } else { Err(CdpError::AboveThreshold) };
        }
        if icr <= math::precision() {
            Ok(LiquidationMode::RedistributeAll)
        } else if icr < mcr {
            Ok(LiquidationMode::Normal)
        } else if icr < self.troves.tcr(price)? && debt <= self.stability_pool.total_deposits() {
            Ok(LiquidationMode::Capped)
        } else {
            Err(CdpError::AboveThreshold)
        }
    }

    /// Evaluate `owner` and compute every amount the liquidation will move.
    /// Reads only.
    fn plan_liquidation(&self, ext: &Externals<'_>, owner: Address, price: U256) -> CdpResult<LiquidationPlan> {
        let trove = self.troves.require_active(&owner)?;
        let entire = self.troves.entire_trove(&owner)?;
        let mut values = LiquidationValues::candidate(owner);

        values.entire_coll = entire.coll;
        values.entire_debt = entire.debt;
        values.icr = math::compute_cr(entire.coll, entire.debt, price)?;
        let mode = self.liquidation_mode(values.icr, entire.debt, price)?;
        if self.troves.trove_count() <= 1 {
            return Err(CdpError::OnlyOneTroveInSystem);
        }
        values.stage = LiquidationStage::Evaluated;

        values.stable_gas_compensation =
            math::min(self.config.gas_compensation(), self.troves.pools().gas_reserve());
        let divisor = U256::from(self.config.coll_gas_compensation_divisor);

        match mode {
            LiquidationMode::Normal => {
                values.coll_gas_compensation = entire.coll / divisor;
                let coll_remaining = entire.coll - values.coll_gas_compensation;

                // Stability pool absorbs what it can
                let pool_deposits = self.stability_pool.total_deposits();
                values.debt_to_offset = math::min(entire.debt, pool_deposits);
                if !values.debt_to_offset.is_zero() {
                    values.coll_to_sp = math::mul_div(coll_remaining, values.debt_to_offset, entire.debt)?;
                }
                values.debt_to_redistribute = entire.debt - values.debt_to_offset;
                values.coll_to_redistribute = coll_remaining - values.coll_to_sp;
            }
            LiquidationMode::RedistributeAll => {
                values.coll_gas_compensation = entire.coll / divisor;
                values.debt_to_redistribute = entire.debt;
                values.coll_to_redistribute = entire.coll - values.coll_gas_compensation;
            }
            LiquidationMode::Capped => {
                let capped = math::min(math::mul_div(entire.debt, self.config.mcr(), price)?, entire.coll);
                values.coll_gas_compensation = capped / divisor;
                values.debt_to_offset = entire.debt;
                values.coll_to_sp = capped - values.coll_gas_compensation;
                values.coll_surplus = entire.coll - capped;
            }
        }

        let offset = self
            .stability_pool
            .preview_offset(values.debt_to_offset, values.coll_to_sp)?;
        let redistribution = self.troves.rewards().preview_redistribution_excluding(
            values.coll_to_redistribute,
            values.debt_to_redistribute,
            trove.stake,
        )?;

        // Custody must cover the burn and the compensation
        let protocol = self.accounts.protocol;
        require_balance(
            &*ext.stablecoin,
            &protocol,
            math::checked_add(values.debt_to_offset, values.stable_gas_compensation)?,
        )?;
        require_balance(&*ext.collateral, &protocol, values.coll_gas_compensation)?;

        values.stage = match (mode, values.debt_to_offset.is_zero(), values.debt_to_redistribute.is_zero()) {
            (LiquidationMode::Capped, _, _) => LiquidationStage::CappedOffset,
            (_, false, true) => LiquidationStage::Offset,
            (_, true, _) => LiquidationStage::Redistributed,
            (_, false, false) => LiquidationStage::OffsetAndRedistributed,
        };

        tracing::debug!(
            ?owner,
            icr = %values.icr,
            ?mode,
            debt_to_offset = %values.debt_to_offset,
            debt_to_redistribute = %values.debt_to_redistribute,
            "liquidation planned"
        );
        Ok(LiquidationPlan { values, offset, redistribution })
    }

    fn execute_liquidation(
        &mut self,
        ext: &mut Externals<'_>,
        liquidator: Address,
        plan: LiquidationPlan,
    ) -> CdpResult<LiquidationValues> {
        let LiquidationPlan { values, offset, redistribution } = plan;
        let protocol = self.accounts.protocol;

        self.troves.close(&values.owner, TroveStatus::ClosedByLiquidation)?;

        let pools = self.troves.pools_mut();
        pools.sub_active(values.coll_gas_compensation, U256::zero())?;
        pools.sub_active(values.coll_to_sp, values.debt_to_offset)?;
        pools.move_to_default(values.coll_to_redistribute, values.debt_to_redistribute)?;
        pools.sub_gas_reserve(values.stable_gas_compensation)?;
        if !values.coll_surplus.is_zero() {
            pools.sub_active(values.coll_surplus, U256::zero())?;
            pools.add_surplus(values.owner, values.coll_surplus)?;
        }

        self.stability_pool.commit_offset(&offset);
        self.troves.rewards_mut().commit(&redistribution);
        let system_coll = self.troves.pools().entire_coll();
        self.troves.rewards_mut().update_system_snapshots(system_coll);

        if !values.debt_to_offset.is_zero() {
            ext.stablecoin.burn(&protocol, values.debt_to_offset)?;
        }
        if !values.stable_gas_compensation.is_zero() {
            ext.stablecoin
                .transfer(&protocol, &liquidator, values.stable_gas_compensation)?;
        }
        if !values.coll_gas_compensation.is_zero() {
            ext.collateral
                .transfer(&protocol, &liquidator, values.coll_gas_compensation)?;
        }

        let stats = &mut self.liquidation_stats;
        stats.total_liquidations += 1;
        stats.total_debt_liquidated = stats.total_debt_liquidated + values.entire_debt;
        stats.total_coll_liquidated = stats.total_coll_liquidated + values.entire_coll;
        stats.total_debt_offset = stats.total_debt_offset + values.debt_to_offset;
        stats.total_debt_redistributed = stats.total_debt_redistributed + values.debt_to_redistribute;

        tracing::info!(
            owner = ?values.owner,
            ?liquidator,
            coll = %values.entire_coll,
            debt = %values.entire_debt,
            stage = ?values.stage,
            "trove liquidated"
        );
        Ok(values)
    }
}
