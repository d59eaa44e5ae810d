//! Trove CDP Integration Tests
//!
//! End-to-end scenarios across borrower operations, the stability pool,
//! liquidation and redemption, plus seeded property runs.

#![allow(dead_code)]

use odra::casper_types::account::AccountHash;
use odra::casper_types::U256;
use odra::prelude::Address;
use trove_cdp_protocol::interfaces::{BalanceLedger, Externals, FixedPriceFeed, TokenLedger};
use trove_cdp_protocol::math::to_fixed;
use trove_cdp_protocol::{CdpResult, CdpSystem, InsertHints, ProtocolConfig, SystemAccounts, Trove};

pub const PROTOCOL: u8 = 200;
pub const FEES: u8 = 201;
pub const LIQUIDATOR: u8 = 99;

pub fn account(byte: u8) -> Address {
    Address::Account(AccountHash::new([byte; 32]))
}

/// A system with in-memory tokens and a fixed price
pub struct Harness {
    pub system: CdpSystem,
    pub feed: FixedPriceFeed,
    pub stable: BalanceLedger,
    pub coll: BalanceLedger,
}

impl Harness {
    /// Users 1 to `users` each hold `coll_each` collateral
    pub fn new(config: ProtocolConfig, users: u8, coll_each: u64) -> Self {
        let accounts = SystemAccounts { protocol: account(PROTOCOL), fee_recipient: account(FEES) };
        let mut coll = BalanceLedger::new();
        for byte in 1..=users {
            coll.mint(&account(byte), to_fixed(coll_each)).unwrap();
        }
        Self {
            system: CdpSystem::new(config, accounts).unwrap(),
            feed: FixedPriceFeed::new(to_fixed(200)),
            stable: BalanceLedger::new(),
            coll,
        }
    }

    pub fn without_fees() -> Self {
        Self::new(ProtocolConfig { borrowing_fee_bps: 0, ..Default::default() }, 10, 1_000)
    }

    pub fn set_price(&mut self, price: u64) {
        self.feed.set_price(to_fixed(price));
    }

    pub fn open(&mut self, byte: u8, coll: U256, amount: U256, hints: InsertHints) -> CdpResult<Trove> {
        let mut ext = Externals::new(&self.feed, &mut self.stable, &mut self.coll);
        self.system.open_trove(&mut ext, account(byte), coll, amount, hints)
    }

    pub fn deposit(&mut self, byte: u8, amount: U256) {
        let mut ext = Externals::new(&self.feed, &mut self.stable, &mut self.coll);
        self.system
            .provide_to_stability_pool(&mut ext, account(byte), amount)
            .unwrap();
    }

    pub fn assert_consistent(&self, tolerance: U256) {
        let report = self.system.audit(&self.stable, &self.coll).unwrap();
        assert!(report.is_consistent(tolerance), "inconsistent books: {:?}", report);
        assert!(self.system.troves().sorted().is_sorted());
    }
}

#[cfg(test)]
mod scenario_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trove_cdp_protocol::stability_pool::StabilityPool;
    use trove_cdp_protocol::{CdpError, TroveStatus};

    #[test]
    fn test_ratios_sort_ascending_regardless_of_hints() {
        let mut h = Harness::without_fees();
        // 2200 debt at price 200: 16.5 coll is 150%, 13.2 is 120%, 22 is 200%
        h.open(3, to_fixed(22), to_fixed(2_000), InsertHints::none()).unwrap();
        h.open(1, to_fixed(165) / U256::from(10u64), to_fixed(2_000), InsertHints::new(Some(account(3)), None))
            .unwrap();
        h.open(2, to_fixed(132) / U256::from(10u64), to_fixed(2_000), InsertHints::new(None, Some(account(3))))
            .unwrap();

        assert_eq!(h.system.sorted_owners(), vec![account(2), account(1), account(3)]);
        assert_eq!(h.system.current_icr(&account(2), to_fixed(200)).unwrap(), to_fixed(12) / U256::from(10u64));
    }

    #[test]
    fn test_pool_offset_scenario() {
        let mut pool = StabilityPool::new(U256::from(1_000_000_000u64));
        pool.provide(account(1), to_fixed(500)).unwrap();
        pool.provide(account(2), to_fixed(500)).unwrap();

        pool.offset(to_fixed(100), to_fixed(1)).unwrap();

        let deposit = pool.compounded_deposit(&account(1)).unwrap();
        let tolerance = U256::from(1_000u64);
        assert!(to_fixed(450) - deposit <= tolerance);
        assert_eq!(pool.depositor_collateral_gain(&account(1)).unwrap(), to_fixed(1) / U256::from(2u64));
    }

    #[test]
    fn test_compounded_deposit_ignores_other_depositors() {
        let mut pool = StabilityPool::new(U256::from(1_000_000_000u64));
        pool.provide(account(1), to_fixed(500)).unwrap();
        pool.provide(account(2), to_fixed(500)).unwrap();
        pool.offset(to_fixed(100), to_fixed(1)).unwrap();
        let before = pool.compounded_deposit(&account(1)).unwrap();
        let gain_before = pool.depositor_collateral_gain(&account(1)).unwrap();

        pool.provide(account(3), to_fixed(300)).unwrap();
        pool.withdraw(account(2), to_fixed(200)).unwrap();
        pool.provide(account(2), to_fixed(50)).unwrap();

        assert_eq!(pool.compounded_deposit(&account(1)).unwrap(), before);
        assert_eq!(pool.depositor_collateral_gain(&account(1)).unwrap(), gain_before);
    }

    #[test]
    fn test_withdrawing_compounded_deposit_zeroes_it() {
        let mut pool = StabilityPool::new(U256::from(1_000_000_000u64));
        pool.provide(account(1), to_fixed(700)).unwrap();
        pool.provide(account(2), to_fixed(300)).unwrap();
        pool.offset(to_fixed(250), to_fixed(2)).unwrap();

        let deposit = pool.compounded_deposit(&account(1)).unwrap();
        let change = pool.withdraw(account(1), deposit).unwrap();

        assert_eq!(change.deposit, U256::zero());
        assert_eq!(pool.compounded_deposit(&account(1)).unwrap(), U256::zero());
        assert!(pool.deposit_snapshot(&account(1)).is_none());
        assert_eq!(pool.withdraw(account(1), U256::one()), Err(CdpError::DepositNotFound));
    }

    #[test]
    fn test_last_trove_cannot_be_liquidated() {
        let mut h = Harness::without_fees();
        h.open(1, to_fixed(20), to_fixed(2_000), InsertHints::none()).unwrap();
        h.set_price(100);

        let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll);
        let result = h.system.liquidate(&mut ext, account(LIQUIDATOR), account(1));

        assert_eq!(result, Err(CdpError::OnlyOneTroveInSystem));
        assert_eq!(h.system.trove_status(&account(1)), TroveStatus::Active);
        assert_eq!(h.system.entire_system_coll(), to_fixed(20));
    }

    #[test]
    fn test_pending_rewards_applied_once() {
        let mut h = Harness::without_fees();
        h.open(2, to_fixed(30), to_fixed(2_000), InsertHints::none()).unwrap();
        h.open(3, to_fixed(30), to_fixed(2_000), InsertHints::none()).unwrap();
        h.open(1, to_fixed(13), to_fixed(2_000), InsertHints::none()).unwrap();
        h.set_price(150);

        let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll);
        h.system.liquidate(&mut ext, account(LIQUIDATOR), account(1)).unwrap();

        let entire = h.system.entire_trove(&account(2)).unwrap();
        assert!(!entire.pending.is_zero());

        // Adding collateral folds the rewards in; a second fold finds nothing
        let params = trove_cdp_protocol::AdjustTroveParams { coll_delta: to_fixed(1), ..Default::default() };
        let trove = h.system.adjust_trove(&mut ext, account(2), params, InsertHints::none()).unwrap();
        assert_eq!(trove.coll, entire.coll + to_fixed(1));
        assert_eq!(trove.debt, entire.debt);
        assert!(h.system.troves().pending_rewards(&account(2)).unwrap().is_zero());

        h.assert_consistent(to_fixed(1) / U256::from(1_000_000u64));
    }

    #[test]
    fn test_liquidation_split_between_pool_and_troves() {
        let mut h = Harness::without_fees();
        h.open(2, to_fixed(40), to_fixed(3_000), InsertHints::none()).unwrap();
        h.open(3, to_fixed(40), to_fixed(3_000), InsertHints::none()).unwrap();
        h.open(1, to_fixed(13), to_fixed(2_000), InsertHints::none()).unwrap();
        // The pool covers 1000 of trove 1's 2200 debt
        h.deposit(2, to_fixed(1_000));
        h.set_price(150);

        let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll);
        let summary = h.system.liquidate_troves(&mut ext, account(LIQUIDATOR), 10).unwrap();

        assert_eq!(summary.totals.debt_to_offset, to_fixed(1_000));
        assert_eq!(summary.totals.debt_to_redistribute, to_fixed(1_200));
        assert_eq!(h.system.stability_pool().total_deposits(), U256::zero());
        assert_eq!(h.system.trove_status(&account(1)), TroveStatus::ClosedByLiquidation);
        // 0.5% of 13 coll
        assert_eq!(h.coll.balance_of(&account(LIQUIDATOR)), to_fixed(65) / U256::from(1_000u64));
        assert_eq!(h.stable.balance_of(&account(LIQUIDATOR)), to_fixed(200));
        h.assert_consistent(to_fixed(1) / U256::from(1_000_000u64));
    }

    #[test]
    fn test_recovery_mode_liquidation_leaves_claimable_surplus() {
        let mut h = Harness::without_fees();
        h.open(3, to_fixed(40), to_fixed(2_000), InsertHints::none()).unwrap();
        h.open(1, to_fixed(24), to_fixed(2_000), InsertHints::none()).unwrap();
        h.open(2, to_fixed(26), to_fixed(2_000), InsertHints::none()).unwrap();
        h.deposit(3, to_fixed(2_000));
        h.deposit(2, to_fixed(2_000));

        // TCR 143%; trove 1 at 114.5% is above the MCR but below the TCR
        h.set_price(105);
        assert!(h.system.is_recovery_mode(to_fixed(105)).unwrap());

        let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll);
        let summary = h.system.liquidate_troves(&mut ext, account(LIQUIDATOR), 10).unwrap();
        assert_eq!(summary.totals.troves_liquidated, 1);
        assert_eq!(summary.totals.debt_to_offset, to_fixed(2_200));
        assert!(!summary.totals.coll_surplus.is_zero());
        assert_eq!(h.system.collateral_surplus(&account(1)), summary.totals.coll_surplus);
        let tolerance = to_fixed(1) / U256::from(1_000_000u64);
        h.assert_consistent(tolerance);

        let before = h.coll.balance_of(&account(1));
        let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll);
        h.system.claim_collateral(&mut ext, account(1)).unwrap();
        assert_eq!(h.coll.balance_of(&account(1)), before + summary.totals.coll_surplus);
        h.assert_consistent(tolerance);
    }

    #[test]
    fn test_redemption_fee_decays_between_calls() {
        let mut h = Harness::new(ProtocolConfig::default(), 10, 1_000);
        for byte in 1..=3u8 {
            h.open(byte, to_fixed(50), to_fixed(4_000), InsertHints::none()).unwrap();
        }
        let redeemer = account(1);

        let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll).at(0);
        h.system
            .redeem_collateral(&mut ext, redeemer, to_fixed(500), None, InsertHints::none(), None, 0)
            .unwrap();
        let raised = h.system.base_rate().rate;
        assert!(!raised.is_zero());

        // A day later the rate has decayed
        let day = 24 * 60 * 60;
        let rate_now = h.system.redemption_rate(0).unwrap();
        let rate_later = h.system.redemption_rate(day).unwrap();
        assert!(rate_later < rate_now);

        let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll).at(day);
        h.system
            .redeem_collateral(&mut ext, redeemer, to_fixed(100), None, InsertHints::none(), None, 0)
            .unwrap();
        assert!(h.system.base_rate().rate < raised);
        assert_eq!(h.system.base_rate().last_fee_operation_time, day);
        h.assert_consistent(to_fixed(1) / U256::from(1_000_000u64));
    }

    #[test]
    fn test_status_view() {
        let mut h = Harness::without_fees();
        h.open(1, to_fixed(20), to_fixed(2_000), InsertHints::none()).unwrap();
        h.deposit(1, to_fixed(500));

        let status = h.system.get_status();
        assert_eq!(status.entire_coll, to_fixed(20));
        assert_eq!(status.entire_debt, to_fixed(2_200));
        assert_eq!(status.trove_count, 1);
        assert_eq!(status.stability_pool_deposits, to_fixed(500));
    }
}

#[cfg(test)]
mod config_tests {
    use trove_cdp_protocol::{CdpError, ProtocolConfig};

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = ProtocolConfig::from_json_str(r#"{ "mcr_bps": 12000, "max_hint_steps": 64 }"#).unwrap();
        assert_eq!(config.mcr_bps, 12_000);
        assert_eq!(config.max_hint_steps, 64);
        assert_eq!(config.gas_compensation, ProtocolConfig::default().gas_compensation);
    }

    #[test]
    fn test_invalid_json_config() {
        assert_eq!(
            ProtocolConfig::from_json_str(r#"{ "mcr_bps": 9000 }"#),
            Err(CdpError::InvalidConfig)
        );
        assert_eq!(ProtocolConfig::from_json_str("not json"), Err(CdpError::InvalidConfig));
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = ProtocolConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ProtocolConfig::from_json_str(&json), Ok(config));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;
    use trove_cdp_protocol::sorted_troves::SortedTroves;
    use trove_cdp_protocol::stability_pool::StabilityPool;
    use trove_cdp_protocol::AdjustTroveParams;

    const USERS: u8 = 20;

    fn random_hint(rng: &mut XorShiftRng, list: &SortedTroves) -> Option<Address> {
        let owners: Vec<Address> = list.iter().map(|(owner, _)| owner).collect();
        if owners.is_empty() || rng.gen_bool(0.2) {
            None
        } else {
            Some(owners[rng.gen_range(0..owners.len())])
        }
    }

    #[test]
    fn test_sorted_list_stays_ordered() {
        for seed in 0..8u64 {
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let mut list = SortedTroves::new(1_000);

            for _ in 0..400 {
                let owner = account(rng.gen_range(1..=40u8));
                let nicr = U256::from(rng.gen_range(1..50u64)) * to_fixed(1) / U256::from(100u64);
                let prev = random_hint(&mut rng, &list);
                let next = random_hint(&mut rng, &list);

                if list.contains(&owner) {
                    if rng.gen_bool(0.5) {
                        list.remove(&owner).unwrap();
                    } else {
                        list.reinsert(owner, nicr, prev, next).unwrap();
                    }
                } else {
                    list.insert(owner, nicr, prev, next).unwrap();
                }
                assert!(list.is_sorted(), "seed {} lost ordering", seed);
            }
        }
    }

    #[test]
    fn test_compounded_deposit_never_grows_between_offsets() {
        let mut rng = XorShiftRng::seed_from_u64(11);
        let mut pool = StabilityPool::new(U256::from(1_000_000_000u64));
        pool.provide(account(1), to_fixed(1_000)).unwrap();
        pool.provide(account(2), to_fixed(3_000)).unwrap();

        let mut last = pool.compounded_deposit(&account(1)).unwrap();
        for _ in 0..50 {
            let total = pool.total_deposits();
            let debt = total * U256::from(rng.gen_range(1..20u64)) / U256::from(100u64);
            if debt.is_zero() {
                break;
            }
            pool.offset(debt, to_fixed(rng.gen_range(0..3u64))).unwrap();

            let current = pool.compounded_deposit(&account(1)).unwrap();
            assert!(current <= last);
            last = current;
        }
    }

    /// Random user activity; books must match custody after every step
    #[test]
    fn test_random_activity_conserves_tokens() {
        let tolerance = to_fixed(1) / U256::from(1_000_000u64);

        for seed in 0..4u64 {
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let mut h = Harness::new(ProtocolConfig::default(), USERS, 10_000);

            for step in 0..250u64 {
                let owner = account(rng.gen_range(1..=USERS));
                let op = rng.gen_range(0..9u8);
                if op == 8 {
                    h.set_price(rng.gen_range(140..260u64));
                    continue;
                }
                let mut ext = Externals::new(&h.feed, &mut h.stable, &mut h.coll).at(step * 90);

                // Failures are expected and must leave the books untouched
                let _ = match op {
                    0 | 1 => {
                        let coll = to_fixed(rng.gen_range(15..60u64));
                        let amount = to_fixed(rng.gen_range(1_800..4_000u64));
                        h.system.open_trove(&mut ext, owner, coll, amount, InsertHints::none()).map(|_| ())
                    }
                    2 => {
                        let params = AdjustTroveParams {
                            coll_delta: to_fixed(rng.gen_range(1..5u64)),
                            coll_is_withdraw: rng.gen_bool(0.3),
                            ..Default::default()
                        };
                        h.system.adjust_trove(&mut ext, owner, params, InsertHints::none()).map(|_| ())
                    }
                    3 => h.system.close_trove(&mut ext, owner).map(|_| ()),
                    4 => {
                        let balance = ext.stablecoin.balance_of(&owner);
                        let amount = balance.min(to_fixed(rng.gen_range(100..1_500u64)));
                        h.system.provide_to_stability_pool(&mut ext, owner, amount).map(|_| ())
                    }
                    5 => {
                        let deposit = h.system.compounded_deposit(&owner).unwrap_or_default();
                        h.system
                            .withdraw_from_stability_pool(&mut ext, owner, deposit / 2)
                            .map(|_| ())
                    }
                    6 => {
                        let amount = ext.stablecoin.balance_of(&owner).min(to_fixed(800));
                        h.system
                            .redeem_collateral(&mut ext, owner, amount, None, InsertHints::none(), None, 0)
                            .map(|_| ())
                    }
                    _ => h
                        .system
                        .liquidate_troves(&mut ext, account(LIQUIDATOR), 10)
                        .map(|_| ()),
                };

                h.assert_consistent(tolerance);
            }
        }
    }
}
