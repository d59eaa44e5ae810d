//! Common types used across the CDP protocol.

use odra::prelude::*;
use odra::casper_types::U256;

/// Trove lifecycle status
#[odra::odra_type]
#[derive(Copy)]
pub enum TroveStatus {
    /// Never opened
    NonExistent,
    /// Open and tracked in the sorted list
    Active,
    /// Repaid and closed by the owner
    ClosedByOwner,
    /// Closed by a liquidation
    ClosedByLiquidation,
    /// Redeemed down to the gas reserve and closed
    ClosedByRedemption,
}

impl Default for TroveStatus {
    fn default() -> Self {
        TroveStatus::NonExistent
    }
}

impl TroveStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TroveStatus::Active)
    }
}

/// A user's collateral and debt position
#[odra::odra_type]
pub struct Trove {
    /// Owner address
    pub owner: Address,
    /// Collateral excluding pending redistribution rewards
    pub coll: U256,
    /// Debt excluding pending redistribution rewards (includes gas reserve)
    pub debt: U256,
    /// Share of redistribution rewards, set at the last owner operation
    pub stake: U256,
    /// Lifecycle status
    pub status: TroveStatus,
    /// `L_coll` at the last time rewards were applied
    pub coll_reward_snapshot: U256,
    /// `L_debt` at the last time rewards were applied
    pub debt_reward_snapshot: U256,
    /// Index in the owners array
    pub array_index: u64,
}

impl Trove {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            coll: U256::zero(),
            debt: U256::zero(),
            stake: U256::zero(),
            status: TroveStatus::NonExistent,
            coll_reward_snapshot: U256::zero(),
            debt_reward_snapshot: U256::zero(),
            array_index: 0,
        }
    }
}

/// Redistribution rewards not yet folded into a trove
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct PendingRewards {
    /// Pending collateral gain
    pub coll: U256,
    /// Pending debt increase
    pub debt: U256,
}

impl PendingRewards {
    pub fn is_zero(&self) -> bool {
        self.coll.is_zero() && self.debt.is_zero()
    }
}

/// Trove values with pending rewards included
#[odra::odra_type]
#[derive(Copy)]
pub struct EntireTrove {
    /// Effective collateral
    pub coll: U256,
    /// Effective debt
    pub debt: U256,
    /// Rewards included in the values above
    pub pending: PendingRewards,
}

/// Parameters for adjusting an existing trove
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct AdjustTroveParams {
    /// Collateral delta
    pub coll_delta: U256,
    /// Whether to withdraw collateral (true) or add (false)
    pub coll_is_withdraw: bool,
    /// Debt delta
    pub debt_delta: U256,
    /// Whether to repay debt (true) or borrow (false)
    pub debt_is_repay: bool,
}

/// Neighbour hints for a sorted list insert
#[odra::odra_type]
#[derive(Copy, Default)]
pub struct InsertHints {
    /// Expected node just before the insert position (lower NICR)
    pub prev: Option<Address>,
    /// Expected node just after the insert position (higher NICR)
    pub next: Option<Address>,
}

impl InsertHints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(prev: Option<Address>, next: Option<Address>) -> Self {
        Self { prev, next }
    }
}

/// Accounts the protocol moves tokens through
#[odra::odra_type]
#[derive(Copy)]
pub struct SystemAccounts {
    /// Custody account holding all pooled collateral and stablecoin
    pub protocol: Address,
    /// Recipient of borrowing and redemption fees
    pub fee_recipient: Address,
}

/// System-wide totals
#[odra::odra_type]
pub struct SystemStatus {
    /// Active plus default pool collateral
    pub entire_coll: U256,
    /// Active plus default pool debt
    pub entire_debt: U256,
    /// Number of active troves
    pub trove_count: u64,
    /// Sum of all stakes
    pub total_stakes: U256,
    /// Stablecoin in the stability pool
    pub stability_pool_deposits: U256,
}
