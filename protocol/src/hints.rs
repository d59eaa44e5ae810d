//! Off-chain style hint helpers.
//!
//! Inserting into the sorted list costs the distance between the hint and
//! the real position, so callers look the hints up first:
//! 1. [`approx_hint`] samples random troves and keeps the one whose NICR is
//!    closest to the target
//! 2. [`exact_insert_position`] walks from there to the exact neighbours
//!
//! [`redemption_hints`] does the same job for redemptions.

use odra::prelude::*;
use odra::casper_types::U256;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use crate::config::ProtocolConfig;
use crate::errors::CdpResult;
use crate::math;
use crate::sorted_troves::InsertPosition;
use crate::trove_manager::TroveManager;
use crate::types::InsertHints;

/// Closest sampled trove to a target NICR
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct ApproxHint {
    /// Sampled owner with the smallest NICR distance
    pub hint: Option<Address>,
    /// Distance between its NICR and the target
    pub diff: U256,
}

/// Starting point and expected outcome of a redemption
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct RedemptionHints {
    /// Lowest-ranked trove with ICR >= MCR
    pub first_hint: Option<Address>,
    /// NICR the last, partially redeemed trove ends up with (zero if none)
    pub partial_nicr: U256,
    /// Amount that can be redeemed without violating the minimum net debt
    pub truncated_amount: U256,
}

/// Sample `num_trials` troves and return the one nearest to `nicr`.
///
/// The tail is always a candidate. Deterministic for a given `seed`.
pub fn approx_hint(troves: &TroveManager, nicr: U256, num_trials: u32, seed: u64) -> CdpResult<ApproxHint> {
    let owners = troves.owners();
    let tail = match troves.sorted().tail() {
        Some(tail) if !owners.is_empty() => tail,
        _ => return Ok(ApproxHint::default()),
    };

    let mut best = ApproxHint {
        hint: Some(tail),
        diff: math::abs_diff(troves.nominal_icr(&tail)?, nicr),
    };

    let mut rng = XorShiftRng::seed_from_u64(seed);
    for _ in 1..num_trials {
        let candidate = owners[rng.gen_range(0..owners.len())];
        let diff = math::abs_diff(troves.nominal_icr(&candidate)?, nicr);
        if diff < best.diff {
            best = ApproxHint { hint: Some(candidate), diff };
        }
    }

    tracing::debug!(%nicr, num_trials, diff = %best.diff, "approximate hint");
    Ok(best)
}

/// Exact `(prev, next)` for `nicr`, walking from an approximate hint
pub fn exact_insert_position(
    troves: &TroveManager,
    nicr: U256,
    approx: Option<Address>,
) -> CdpResult<InsertPosition> {
    troves.sorted().find_insert_position(nicr, approx, approx)
}

/// Both phases at once, returning hints ready for an insert
pub fn insert_hints(troves: &TroveManager, nicr: U256, num_trials: u32, seed: u64) -> CdpResult<InsertHints> {
    let approx = approx_hint(troves, nicr, num_trials, seed)?;
    let (prev, next) = exact_insert_position(troves, nicr, approx.hint)?;
    Ok(InsertHints::new(prev, next))
}

/// Simulate a redemption of `amount` at `price`.
///
/// Walks up from the first trove with ICR >= MCR. Troves are fully
/// redeemed down to the gas reserve until the remaining amount is smaller
/// than a trove's net debt; that trove is partially redeemed only as far as
/// the minimum net debt allows, and the walk stops.
pub fn redemption_hints(
    troves: &TroveManager,
    config: &ProtocolConfig,
    amount: U256,
    price: U256,
    max_iterations: u32,
) -> CdpResult<RedemptionHints> {
    let mcr = config.mcr();
    let gas_compensation = config.gas_compensation();
    let min_net_debt = config.min_net_debt();

    let mut current = troves.sorted().head();
    while let Some(owner) = current {
        if troves.current_icr(&owner, price)? >= mcr {
            break;
        }
        current = troves.sorted().next(&owner);
    }
    let first_hint = current;

    let mut remaining = amount;
    let mut partial_nicr = U256::zero();
    let mut iterations = 0u32;
    let limit = if max_iterations == 0 { u32::MAX } else { max_iterations };

    while let Some(owner) = current {
        if remaining.is_zero() || iterations >= limit {
            break;
        }
        iterations += 1;

        let entire = troves.entire_trove(&owner)?;
        let net_debt = math::checked_sub(entire.debt, gas_compensation)?;

        if net_debt > remaining {
            if net_debt > min_net_debt {
                let redeemable = math::min(remaining, net_debt - min_net_debt);
                let coll_drawn = math::mul_div(redeemable, math::precision(), price)?;
                let new_coll = math::checked_sub(entire.coll, coll_drawn)?;
                let new_debt = entire.debt - redeemable;
                partial_nicr = math::compute_nominal_cr(new_coll, new_debt)?;
                remaining = remaining - redeemable;
            }
            break;
        }

        remaining = remaining - net_debt;
        current = troves.sorted().next(&owner);
    }

    Ok(RedemptionHints {
        first_hint,
        partial_nicr,
        truncated_amount: amount - remaining,
    })
}
