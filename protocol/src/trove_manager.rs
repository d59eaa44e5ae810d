//! Trove registry.
//!
//! Owns every trove record together with the structures indexed by it:
//! the sorted list, the owners array used for hint sampling, the
//! redistribution ledger and the pool bookkeeping. Engines mutate troves
//! only through the methods here so the four stay consistent.

use odra::prelude::*;
use odra::casper_types::U256;
use std::collections::BTreeMap;
use crate::errors::{CdpError, CdpResult};
use crate::math;
use crate::pools::PoolBalances;
use crate::redistribution::RedistributionLedger;
use crate::sorted_troves::SortedTroves;
use crate::types::{EntireTrove, InsertHints, PendingRewards, Trove, TroveStatus};

#[derive(Debug, Clone)]
pub struct TroveManager {
    troves: BTreeMap<Address, Trove>,
    /// Active owners; each trove's `array_index` points here
    owners: Vec<Address>,
    sorted: SortedTroves,
    rewards: RedistributionLedger,
    pools: PoolBalances,
}

impl TroveManager {
    pub fn new(max_hint_steps: u32) -> Self {
        Self {
            troves: BTreeMap::new(),
            owners: Vec::new(),
            sorted: SortedTroves::new(max_hint_steps),
            rewards: RedistributionLedger::new(),
            pools: PoolBalances::new(),
        }
    }

    // ========== Views ==========

    pub fn get_trove(&self, owner: &Address) -> Option<&Trove> {
        self.troves.get(owner)
    }

    pub fn trove_status(&self, owner: &Address) -> TroveStatus {
        self.troves.get(owner).map(|t| t.status).unwrap_or_default()
    }

    pub fn is_active(&self, owner: &Address) -> bool {
        self.trove_status(owner).is_active()
    }

    /// The trove of `owner`, failing unless it is active
    pub fn require_active(&self, owner: &Address) -> CdpResult<&Trove> {
        let trove = self.troves.get(owner).ok_or(CdpError::TroveNotFound)?;
        if !trove.status.is_active() {
            return Err(CdpError::TroveNotActive);
        }
        Ok(trove)
    }

    pub fn trove_count(&self) -> usize {
        self.owners.len()
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn sorted(&self) -> &SortedTroves {
        &self.sorted
    }

    pub fn rewards(&self) -> &RedistributionLedger {
        &self.rewards
    }

    pub fn pools(&self) -> &PoolBalances {
        &self.pools
    }

    pub fn pending_rewards(&self, owner: &Address) -> CdpResult<PendingRewards> {
        let trove = self.require_active(owner)?;
        self.rewards.pending_rewards(trove)
    }

    /// Collateral and debt including pending redistribution rewards
    pub fn entire_trove(&self, owner: &Address) -> CdpResult<EntireTrove> {
        let trove = self.require_active(owner)?;
        let pending = self.rewards.pending_rewards(trove)?;
        Ok(EntireTrove {
            coll: math::checked_add(trove.coll, pending.coll)?,
            debt: math::checked_add(trove.debt, pending.debt)?,
            pending,
        })
    }

    pub fn nominal_icr(&self, owner: &Address) -> CdpResult<U256> {
        let entire = self.entire_trove(owner)?;
        math::compute_nominal_cr(entire.coll, entire.debt)
    }

    pub fn current_icr(&self, owner: &Address, price: U256) -> CdpResult<U256> {
        let entire = self.entire_trove(owner)?;
        math::compute_cr(entire.coll, entire.debt, price)
    }

    pub fn entire_system_coll(&self) -> U256 {
        self.pools.entire_coll()
    }

    pub fn entire_system_debt(&self) -> U256 {
        self.pools.entire_debt()
    }

    /// Total collateralization ratio at `price`
    pub fn tcr(&self, price: U256) -> CdpResult<U256> {
        math::compute_cr(self.entire_system_coll(), self.entire_system_debt(), price)
    }

    // ========== Mutations ==========

    pub(crate) fn pools_mut(&mut self) -> &mut PoolBalances {
        &mut self.pools
    }

    pub(crate) fn rewards_mut(&mut self) -> &mut RedistributionLedger {
        &mut self.rewards
    }

    /// Register a new active trove and add it to the active pool
    pub(crate) fn open(
        &mut self,
        owner: Address,
        coll: U256,
        debt: U256,
        hints: InsertHints,
    ) -> CdpResult<Trove> {
        if self.is_active(&owner) {
            return Err(CdpError::TroveAlreadyActive);
        }
        let nicr = math::compute_nominal_cr(coll, debt)?;
        let stake = self.rewards.compute_new_stake(coll)?;
        math::checked_add(self.rewards.total_stakes(), stake)?;

        self.sorted.insert(owner, nicr, hints.prev, hints.next)?;

        let mut trove = Trove::new(owner);
        trove.coll = coll;
        trove.debt = debt;
        trove.status = TroveStatus::Active;
        trove.array_index = self.owners.len() as u64;
        self.rewards.update_reward_snapshots(&mut trove);
        self.rewards.update_stake(&mut trove)?;
        self.pools.add_active(coll, debt)?;
        self.owners.push(owner);
        self.troves.insert(owner, trove.clone());

        Ok(trove)
    }

    /// Set an active trove's collateral and debt to new entire values.
    ///
    /// Pending rewards are folded in first (moving them from the default to
    /// the active pool), then the active pool is adjusted by the difference,
    /// the stake recomputed and the trove re-ranked from `hints`. If the
    /// re-rank fails nothing is changed.
    pub(crate) fn update(
        &mut self,
        owner: &Address,
        new_coll: U256,
        new_debt: U256,
        hints: InsertHints,
    ) -> CdpResult<Trove> {
        let mut trove = self.require_active(owner)?.clone();
        let nicr = math::compute_nominal_cr(new_coll, new_debt)?;
        let pending = self.rewards.apply_snapshot(&mut trove)?;

        self.sorted.reinsert(*owner, nicr, hints.prev, hints.next)?;

        self.pools.move_pending_to_active(&pending)?;
        if new_coll >= trove.coll {
            self.pools.add_active(new_coll - trove.coll, U256::zero())?;
        } else {
            self.pools.sub_active(trove.coll - new_coll, U256::zero())?;
        }
        if new_debt >= trove.debt {
            self.pools.add_active(U256::zero(), new_debt - trove.debt)?;
        } else {
            self.pools.sub_active(U256::zero(), trove.debt - new_debt)?;
        }

        trove.coll = new_coll;
        trove.debt = new_debt;
        self.rewards.update_stake(&mut trove)?;
        self.troves.insert(*owner, trove.clone());
        Ok(trove)
    }

    /// Fold pending rewards into an active trove
    pub(crate) fn apply_pending_rewards(&mut self, owner: &Address) -> CdpResult<PendingRewards> {
        let mut trove = self.require_active(owner)?.clone();
        let pending = self.rewards.apply_snapshot(&mut trove)?;
        self.pools.move_pending_to_active(&pending)?;
        self.troves.insert(*owner, trove);
        Ok(pending)
    }

    /// Close an active trove with `status`.
    ///
    /// Pending rewards are folded in and the returned trove carries the
    /// final collateral and debt. The caller settles those amounts with the
    /// pools; this only unlinks the trove and zeroes the record.
    pub(crate) fn close(&mut self, owner: &Address, status: TroveStatus) -> CdpResult<Trove> {
        if !self.sorted.contains(owner) {
            return Err(CdpError::NodeNotFound);
        }
        self.apply_pending_rewards(owner)?;
        let mut trove = self.require_active(owner)?.clone();
        let closed = trove.clone();

        self.sorted.remove(owner)?;
        self.rewards.remove_stake(&mut trove)?;
        self.remove_owner(trove.array_index);

        trove.coll = U256::zero();
        trove.debt = U256::zero();
        trove.status = status;
        trove.coll_reward_snapshot = U256::zero();
        trove.debt_reward_snapshot = U256::zero();
        self.troves.insert(*owner, trove);

        tracing::debug!(?owner, ?status, "trove closed");
        Ok(closed)
    }

    /// Swap-remove from the owners array, fixing the moved owner's index
    fn remove_owner(&mut self, index: u64) {
        let index = index as usize;
        if index >= self.owners.len() {
            return;
        }
        self.owners.swap_remove(index);
        if let Some(moved) = self.owners.get(index).copied() {
            if let Some(trove) = self.troves.get_mut(&moved) {
                trove.array_index = index as u64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::math::to_fixed;
    use odra::casper_types::account::AccountHash;

    fn account(byte: u8) -> Address {
        Address::Account(AccountHash::new([byte; 32]))
    }

    fn manager_with(troves: &[(u8, u64, u64)]) -> TroveManager {
        let mut manager = TroveManager::new(100);
        for (byte, coll, debt) in troves {
            manager
                .open(account(*byte), to_fixed(*coll), to_fixed(*debt), InsertHints::none())
                .unwrap();
        }
        manager
    }

    #[test]
    fn test_open_registers_everywhere() {
        let manager = manager_with(&[(1, 10, 2000), (2, 20, 2000)]);

        assert_eq!(manager.trove_count(), 2);
        assert_eq!(manager.sorted().len(), 2);
        assert_eq!(manager.sorted().head(), Some(account(1)));
        assert_eq!(manager.rewards().total_stakes(), to_fixed(30));
        assert_eq!(manager.pools().active_debt(), to_fixed(4000));
        assert_eq!(manager.get_trove(&account(2)).unwrap().array_index, 1);
    }

    #[test]
    fn test_open_twice_fails() {
        let mut manager = manager_with(&[(1, 10, 2000)]);
        let result = manager.open(account(1), to_fixed(1), to_fixed(1), InsertHints::none());
        assert_eq!(result, Err(CdpError::TroveAlreadyActive));
    }

    #[test]
    fn test_close_swap_removes_owner() {
        let mut manager = manager_with(&[(1, 10, 2000), (2, 20, 2000), (3, 30, 2000)]);

        let closed = manager.close(&account(1), TroveStatus::ClosedByOwner).unwrap();
        assert_eq!(closed.coll, to_fixed(10));

        assert_eq!(manager.owners(), &[account(3), account(2)]);
        assert_eq!(manager.get_trove(&account(3)).unwrap().array_index, 0);
        assert_eq!(manager.trove_status(&account(1)), TroveStatus::ClosedByOwner);
        assert!(!manager.sorted().contains(&account(1)));
        assert_eq!(manager.rewards().total_stakes(), to_fixed(50));
        assert_eq!(manager.require_active(&account(1)).err(), Some(CdpError::TroveNotActive));
        assert_eq!(manager.require_active(&account(9)).err(), Some(CdpError::TroveNotFound));
    }

    #[test]
    fn test_pending_rewards_flow_through_views() {
        let mut manager = manager_with(&[(1, 10, 2000), (2, 10, 2000)]);

        // Redistribute 2 coll / 400 debt as if from a liquidated trove
        manager.pools_mut().add_active(to_fixed(2), to_fixed(400)).unwrap();
        manager.pools_mut().move_to_default(to_fixed(2), to_fixed(400)).unwrap();
        manager.rewards_mut().redistribute(to_fixed(2), to_fixed(400)).unwrap();

        let entire = manager.entire_trove(&account(1)).unwrap();
        assert_eq!(entire.coll, to_fixed(11));
        assert_eq!(entire.debt, to_fixed(2200));

        manager.apply_pending_rewards(&account(1)).unwrap();
        assert_eq!(manager.get_trove(&account(1)).unwrap().coll, to_fixed(11));
        assert_eq!(manager.pools().default_coll(), to_fixed(1));
        assert!(manager.pending_rewards(&account(1)).unwrap().is_zero());
    }

    #[test]
    fn test_update_reranks_and_restakes() {
        let mut manager = manager_with(&[(1, 10, 2000), (2, 20, 2000)]);

        manager
            .update(&account(1), to_fixed(30), to_fixed(2000), InsertHints::none())
            .unwrap();

        assert_eq!(manager.sorted().tail(), Some(account(1)));
        assert_eq!(manager.rewards().total_stakes(), to_fixed(50));
        assert_eq!(manager.pools().active_coll(), to_fixed(50));
    }

    #[test]
    fn test_failed_update_changes_nothing() {
        let mut manager = TroveManager::new(1);
        for byte in 1..=4u8 {
            let tail = manager.sorted().tail();
            manager
                .open(account(byte), to_fixed(byte as u64 * 10), to_fixed(2000), InsertHints::new(tail, None))
                .unwrap();
        }
        let before = manager.get_trove(&account(1)).cloned();

        let result = manager.update(&account(1), to_fixed(100), to_fixed(2000), InsertHints::none());
        assert_eq!(result.err(), Some(CdpError::InvalidHint));
        assert_eq!(manager.get_trove(&account(1)).cloned(), before);
        assert_eq!(manager.pools().active_coll(), to_fixed(100));
    }

    #[test]
    fn test_tcr() {
        let manager = manager_with(&[(1, 10, 1000), (2, 10, 1000)]);
        // 20 coll at 200 against 2000 debt = 200%
        assert_eq!(manager.tcr(to_fixed(200)).unwrap(), to_fixed(2));
    }
}
