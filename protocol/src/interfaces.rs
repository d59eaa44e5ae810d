//! Interfaces to the collaborators the core consumes but does not own.
//!
//! The price feed and the two token ledgers (stablecoin and collateral) are
//! passed into every state-changing call through [`Externals`].

use odra::prelude::*;
use odra::casper_types::U256;
use std::collections::BTreeMap;
use crate::errors::{CdpError, CdpResult};

/// Price source for the collateral asset, in stablecoin per collateral (1e18)
pub trait PriceFeed {
    fn get_price(&self) -> CdpResult<U256>;
}

/// Fungible token ledger (stablecoin or collateral)
pub trait TokenLedger {
    fn balance_of(&self, account: &Address) -> U256;
    fn mint(&mut self, to: &Address, amount: U256) -> CdpResult<()>;
    fn burn(&mut self, from: &Address, amount: U256) -> CdpResult<()>;
    fn transfer(&mut self, from: &Address, to: &Address, amount: U256) -> CdpResult<()>;
}

/// Collaborators for a single call
pub struct Externals<'a> {
    pub price_feed: &'a dyn PriceFeed,
    pub stablecoin: &'a mut dyn TokenLedger,
    pub collateral: &'a mut dyn TokenLedger,
    /// Timestamp of the call in seconds; drives base rate decay
    pub block_time: u64,
}

impl<'a> Externals<'a> {
    pub fn new(
        price_feed: &'a dyn PriceFeed,
        stablecoin: &'a mut dyn TokenLedger,
        collateral: &'a mut dyn TokenLedger,
    ) -> Self {
        Self { price_feed, stablecoin, collateral, block_time: 0 }
    }

    pub fn at(mut self, block_time: u64) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn price(&self) -> CdpResult<U256> {
        self.price_feed.get_price()
    }
}

/// Fails unless `account` holds at least `amount` on `ledger`
pub fn require_balance(ledger: &dyn TokenLedger, account: &Address, amount: U256) -> CdpResult<()> {
    if ledger.balance_of(account) < amount {
        return Err(CdpError::InsufficientTokenBalance);
    }
    Ok(())
}

/// Price feed returning a settable constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPriceFeed {
    price: U256,
}

impl FixedPriceFeed {
    pub fn new(price: U256) -> Self {
        Self { price }
    }

    pub fn set_price(&mut self, price: U256) {
        self.price = price;
    }
}

impl PriceFeed for FixedPriceFeed {
    fn get_price(&self) -> CdpResult<U256> {
        if self.price.is_zero() {
            return Err(CdpError::PriceUnavailable);
        }
        Ok(self.price)
    }
}

/// In-memory balance book implementing [`TokenLedger`]
#[derive(Debug, Clone, Default)]
pub struct BalanceLedger {
    balances: BTreeMap<Address, U256>,
    total_supply: U256,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }
}

impl TokenLedger for BalanceLedger {
    fn balance_of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn mint(&mut self, to: &Address, amount: U256) -> CdpResult<()> {
        let supply = self.total_supply.checked_add(amount).ok_or(CdpError::Overflow)?;
        let balance = self.balance_of(to) + amount;
        self.balances.insert(*to, balance);
        self.total_supply = supply;
        Ok(())
    }

    fn burn(&mut self, from: &Address, amount: U256) -> CdpResult<()> {
        require_balance(self, from, amount)?;
        let balance = self.balance_of(from) - amount;
        self.balances.insert(*from, balance);
        self.total_supply = self.total_supply - amount;
        Ok(())
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: U256) -> CdpResult<()> {
        require_balance(self, from, amount)?;
        let from_balance = self.balance_of(from) - amount;
        self.balances.insert(*from, from_balance);
        let to_balance = self.balance_of(to) + amount;
        self.balances.insert(*to, to_balance);
        Ok(())
    }
}
