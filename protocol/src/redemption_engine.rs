//! Redemption Engine
//!
//! Swaps stablecoin for collateral at face value, taking it from the
//! riskiest troves that are still above the MCR.
//!
//! Redemption flow:
//! 1. Find the first trove with ICR >= MCR (from a hint or by walking up
//!    from the head)
//! 2. Redeem each trove's net debt in turn; a trove left with only its gas
//!    reserve is closed and its remaining collateral parked as surplus
//! 3. The last trove may be redeemed partially, unless that would leave it
//!    below the minimum net debt or its hints are stale
//! 4. Raise the base rate by the redeemed share of the stablecoin supply
//! 5. Burn the redeemed stablecoin and pay out the collateral minus the
//!    redemption fee, charged at the raised rate

use odra::prelude::*;
use odra::casper_types::U256;
use crate::errors::{CdpError, CdpResult};
use crate::fees;
use crate::interfaces::{require_balance, Externals};
use crate::math;
use crate::system::CdpSystem;
use crate::types::{InsertHints, TroveStatus};

/// What one redemption took from one trove
#[odra::odra_type]
pub struct TroveRedemption {
    /// Redeemed trove
    pub owner: Address,
    /// Debt cancelled
    pub debt_redeemed: U256,
    /// Collateral drawn, before the fee
    pub coll_drawn: U256,
    /// Whether the trove was closed
    pub closed: bool,
}

/// Result of [`CdpSystem::redeem_collateral`]
#[odra::odra_type]
pub struct RedemptionTotals {
    /// Amount the redeemer asked for
    pub requested: U256,
    /// Stablecoin actually redeemed and burned
    pub stable_redeemed: U256,
    /// Collateral drawn from troves
    pub collateral_drawn: U256,
    /// Redemption fee, paid in collateral
    pub collateral_fee: U256,
    /// Collateral sent to the redeemer
    pub collateral_sent: U256,
    /// Per-trove breakdown in redemption order
    pub troves: Vec<TroveRedemption>,
    /// The final partial redemption was cancelled
    pub partial_cancelled: bool,
}

/// Cumulative redemption statistics
#[odra::odra_type]
#[derive(Default)]
pub struct RedemptionStats {
    /// Number of successful redemption calls
    pub total_redemptions: u64,
    /// Stablecoin redeemed (cumulative)
    pub total_redeemed: U256,
    /// Collateral sent to redeemers (cumulative)
    pub total_collateral_distributed: U256,
    /// Collateral fees collected (cumulative)
    pub total_fees_collected: U256,
}

/// One planned step of a redemption
struct RedemptionStep {
    owner: Address,
    debt: U256,
    coll: U256,
    new_coll: U256,
    new_debt: U256,
    closes: bool,
}

/// All steps of a redemption and whether its partial step was dropped
struct RedemptionPlan {
    steps: Vec<RedemptionStep>,
    partial_cancelled: bool,
}

impl CdpSystem {
    // ========== Redemption Functions ==========

    /// Redeem `amount` stablecoin for collateral.
    ///
    /// `first_hint` names the first trove to redeem from; when it is not the
    /// lowest-ranked trove with ICR >= MCR the walk starts from the head.
    /// `partial_hints` re-rank the partially redeemed trove and
    /// `partial_nicr`, when given, must match its resulting NICR.
    /// `max_iterations == 0` uses the configured cap.
    #[allow(clippy::too_many_arguments)]
    pub fn redeem_collateral(
        &mut self,
        ext: &mut Externals<'_>,
        redeemer: Address,
        amount: U256,
        first_hint: Option<Address>,
        partial_hints: InsertHints,
        partial_nicr: Option<U256>,
        max_iterations: u32,
    ) -> CdpResult<RedemptionTotals> {
        let price = ext.price()?;
        if amount.is_zero() {
            return Err(CdpError::ZeroAmount);
        }
        if self.troves.tcr(price)? < self.config.mcr() {
            return Err(CdpError::SystemUnderCollateralized);
        }
        let redeemable = self
            .troves
            .entire_system_debt()
            .saturating_sub(self.troves.pools().gas_reserve());
        if amount > redeemable {
            return Err(CdpError::RedemptionAmountExceeds);
        }
        require_balance(&*ext.stablecoin, &redeemer, amount)?;

        let cap = self.config.max_redemption_iterations;
        let limit = match max_iterations {
            0 => cap,
            n => n.min(cap),
        };
        let plan = self.plan_redemption(amount, price, first_hint, partial_nicr, limit)?;
        if plan.steps.is_empty() {
            return Err(CdpError::RedemptionNoEligibleTroves);
        }

        let gas_compensation = self.config.gas_compensation();
        let protocol = self.accounts.protocol;
        let total_supply = self.troves.entire_system_debt();
        let mut planned_debt = U256::zero();
        let mut planned_coll = U256::zero();
        let mut planned_gas = U256::zero();
        for step in &plan.steps {
            planned_debt = math::checked_add(planned_debt, step.debt)?;
            planned_coll = math::checked_add(planned_coll, step.coll)?;
            if step.closes {
                planned_gas = math::checked_add(planned_gas, gas_compensation)?;
            }
        }
        // A dropped partial step only lowers the rate
        let planned_rate = self
            .base_rate
            .after_redemption(&self.config, planned_debt, total_supply, ext.block_time)?;
        if fees::redemption_rate(&self.config, planned_rate.rate) >= math::precision() {
            return Err(CdpError::RedemptionFeeTooHigh);
        }
        require_balance(&*ext.collateral, &protocol, planned_coll)?;
        require_balance(&*ext.stablecoin, &protocol, planned_gas)?;

        let executed = self.execute_redemption(plan, partial_hints)?;
        if executed.troves.is_empty() {
            return Err(CdpError::RedemptionNoEligibleTroves);
        }

        let mut totals = RedemptionTotals {
            requested: amount,
            stable_redeemed: U256::zero(),
            collateral_drawn: U256::zero(),
            collateral_fee: U256::zero(),
            collateral_sent: U256::zero(),
            troves: executed.troves,
            partial_cancelled: executed.partial_cancelled,
        };
        let mut closed = 0u64;
        for step in &totals.troves {
            totals.stable_redeemed = math::checked_add(totals.stable_redeemed, step.debt_redeemed)?;
            totals.collateral_drawn = math::checked_add(totals.collateral_drawn, step.coll_drawn)?;
            if step.closed {
                closed += 1;
            }
        }
        let base_rate = self.base_rate.after_redemption(
            &self.config,
            totals.stable_redeemed,
            total_supply,
            ext.block_time,
        )?;
        let rate = fees::redemption_rate(&self.config, base_rate.rate);
        totals.collateral_fee = math::mul(totals.collateral_drawn, rate)?;
        totals.collateral_sent = totals.collateral_drawn - totals.collateral_fee;
        self.base_rate = base_rate;

        ext.stablecoin.burn(&redeemer, totals.stable_redeemed)?;
        if closed > 0 {
            ext.stablecoin
                .burn(&protocol, gas_compensation * U256::from(closed))?;
        }
        ext.collateral.transfer(&protocol, &redeemer, totals.collateral_sent)?;
        if !totals.collateral_fee.is_zero() {
            ext.collateral
                .transfer(&protocol, &self.accounts.fee_recipient, totals.collateral_fee)?;
        }

        let stats = &mut self.redemption_stats;
        stats.total_redemptions += 1;
        stats.total_redeemed = stats.total_redeemed + totals.stable_redeemed;
        stats.total_collateral_distributed = stats.total_collateral_distributed + totals.collateral_sent;
        stats.total_fees_collected = stats.total_fees_collected + totals.collateral_fee;

        tracing::info!(
            ?redeemer,
            requested = %amount,
            redeemed = %totals.stable_redeemed,
            collateral = %totals.collateral_sent,
            fee = %totals.collateral_fee,
            base_rate = %base_rate.rate,
            troves = totals.troves.len(),
            "collateral redeemed"
        );
        Ok(totals)
    }

    /// A hint is usable when it is active, at or above the MCR, and its
    /// lower neighbour is not.
    pub fn is_valid_first_redemption_hint(&self, hint: Option<Address>, price: U256) -> CdpResult<bool> {
        let hint = match hint {
            Some(hint) if self.troves.sorted().contains(&hint) => hint,
            _ => return Ok(false),
        };
        let mcr = self.config.mcr();
        if self.troves.current_icr(&hint, price)? < mcr {
            return Ok(false);
        }
        match self.troves.sorted().prev(&hint) {
            None => Ok(true),
            Some(prev) => Ok(self.troves.current_icr(&prev, price)? < mcr),
        }
    }

    fn plan_redemption(
        &self,
        amount: U256,
        price: U256,
        first_hint: Option<Address>,
        partial_nicr: Option<U256>,
        limit: u32,
    ) -> CdpResult<RedemptionPlan> {
        let mcr = self.config.mcr();
        let gas_compensation = self.config.gas_compensation();
        let min_net_debt = self.config.min_net_debt();
        let sorted = self.troves.sorted();

        let mut current = if self.is_valid_first_redemption_hint(first_hint, price)? {
            first_hint
        } else {
            let mut current = sorted.head();
            while let Some(owner) = current {
                if self.troves.current_icr(&owner, price)? >= mcr {
                    break;
                }
                current = sorted.next(&owner);
            }
            current
        };

        let mut plan = RedemptionPlan { steps: Vec::new(), partial_cancelled: false };
        let mut remaining = amount;
        let mut open_troves = self.troves.trove_count();
        let mut iterations = 0u32;

        while let Some(owner) = current {
            if remaining.is_zero() || iterations >= limit {
                break;
            }
            iterations += 1;

            let entire = self.troves.entire_trove(&owner)?;
            let net_debt = math::checked_sub(entire.debt, gas_compensation)?;
            let debt = math::min(remaining, net_debt);
            let coll = math::mul_div(debt, math::precision(), price)?;
            let new_debt = entire.debt - debt;
            let new_coll = math::checked_sub(entire.coll, coll)?;

            if new_debt == gas_compensation {
                // The last open trove is never redeemed to zero
                if open_troves <= 1 {
                    break;
                }
                open_troves -= 1;
                plan.steps.push(RedemptionStep { owner, debt, coll, new_coll, new_debt, closes: true });
                remaining = remaining - debt;
                current = sorted.next(&owner);
                continue;
            }

            let nicr = math::compute_nominal_cr(new_coll, new_debt)?;
            let stale = partial_nicr.map_or(false, |expected| expected != nicr);
            if new_debt - gas_compensation < min_net_debt || stale {
                tracing::debug!(?owner, %nicr, stale, "partial redemption cancelled");
                plan.partial_cancelled = true;
            } else {
                plan.steps.push(RedemptionStep { owner, debt, coll, new_coll, new_debt, closes: false });
            }
            break;
        }

        tracing::debug!(%amount, steps = plan.steps.len(), "redemption planned");
        Ok(plan)
    }

    /// Close the fully redeemed troves, then re-rank the partial one. A
    /// stale partial hint only drops that step.
    fn execute_redemption(
        &mut self,
        plan: RedemptionPlan,
        partial_hints: InsertHints,
    ) -> CdpResult<ExecutedRedemption> {
        let gas_compensation = self.config.gas_compensation();
        let mut executed = ExecutedRedemption {
            troves: Vec::with_capacity(plan.steps.len()),
            partial_cancelled: plan.partial_cancelled,
        };

        for step in plan.steps {
            if step.closes {
                let closed = self.troves.close(&step.owner, TroveStatus::ClosedByRedemption)?;
                let pools = self.troves.pools_mut();
                pools.sub_active(closed.coll, closed.debt)?;
                pools.sub_gas_reserve(gas_compensation)?;
                pools.add_surplus(step.owner, step.new_coll)?;
                tracing::debug!(owner = ?step.owner, surplus = %step.new_coll, "trove closed by redemption");
            } else {
                match self.troves.update(&step.owner, step.new_coll, step.new_debt, partial_hints) {
                    Ok(_) => {}
                    Err(CdpError::InvalidHint) => {
                        tracing::debug!(owner = ?step.owner, "partial redemption hints out of date");
                        executed.partial_cancelled = true;
                        continue;
                    }
                    Err(error) => return Err(error),
                }
            }
            executed.troves.push(TroveRedemption {
                owner: step.owner,
                debt_redeemed: step.debt,
                coll_drawn: step.coll,
                closed: step.closes,
            });
        }
        Ok(executed)
    }
}

struct ExecutedRedemption {
    troves: Vec<TroveRedemption>,
    partial_cancelled: bool,
}
