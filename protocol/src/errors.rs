//! Protocol error definitions.

use thiserror::Error;

/// Result alias used throughout the protocol core
pub type CdpResult<T> = Result<T, CdpError>;

/// CDP protocol errors
#[repr(u16)]
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CdpError {
    // Arithmetic errors (1xx)
    #[error("Division by zero")]
    DivisionByZero = 100,
    #[error("Arithmetic overflow")]
    Overflow = 101,
    #[error("Precision underflow")]
    PrecisionUnderflow = 102,
    #[error("Arithmetic underflow")]
    Underflow = 103,

    // Lookup errors (2xx)
    #[error("Trove not found")]
    TroveNotFound = 200,
    #[error("Trove is not active")]
    TroveNotActive = 201,
    #[error("Stability pool: deposit not found")]
    DepositNotFound = 202,
    #[error("Sorted troves: node not found")]
    NodeNotFound = 203,

    // Hint errors (3xx)
    #[error("Sorted troves: insert position not found from hints")]
    InvalidHint = 300,
    #[error("Sorted troves: node already in list")]
    DuplicateNode = 301,
    #[error("Sorted troves: rank must be positive")]
    InvalidRank = 302,

    // Balance errors (4xx)
    #[error("Stability pool: insufficient deposit")]
    InsufficientDeposit = 400,
    #[error("Insufficient token balance")]
    InsufficientTokenBalance = 401,
    #[error("Insufficient collateral")]
    InsufficientCollateral = 402,
    #[error("Repay amount exceeds trove net debt")]
    RepayExceedsDebt = 403,
    #[error("Redemption: amount exceeds available")]
    RedemptionAmountExceeds = 404,

    // Capacity errors (5xx)
    #[error("Stability pool is empty")]
    EmptyPool = 500,
    #[error("No stakes to redistribute to")]
    NoStakes = 501,

    // Liquidation errors (6xx)
    #[error("Trove is above the liquidation threshold")]
    AboveThreshold = 600,
    #[error("Nothing to liquidate")]
    NothingToLiquidate = 601,

    // Trove errors (7xx)
    #[error("Trove already active for this owner")]
    TroveAlreadyActive = 700,
    #[error("Below minimum collateralization ratio")]
    BelowMcr = 701,
    #[error("Below minimum net debt")]
    BelowMinNetDebt = 702,
    #[error("Amount must be non-zero")]
    ZeroAmount = 703,
    #[error("Adjustment must change collateral or debt")]
    ZeroAdjustment = 704,
    #[error("Only one trove in the system")]
    OnlyOneTroveInSystem = 705,
    #[error("No collateral surplus to claim")]
    NoCollateralSurplus = 706,
    #[error("Below critical collateralization ratio in recovery mode")]
    BelowCcr = 707,
    #[error("Operation would push the total collateral ratio below CCR")]
    TcrBelowCcr = 708,
    #[error("Collateral withdrawal not permitted in recovery mode")]
    CollWithdrawalInRecoveryMode = 709,
    #[error("Debt increase must not lower the ICR in recovery mode")]
    IcrDecreaseInRecoveryMode = 710,
    #[error("Closing a trove is not permitted in recovery mode")]
    CloseInRecoveryMode = 711,

    // Redemption errors (8xx)
    #[error("Redemption: no eligible troves")]
    RedemptionNoEligibleTroves = 800,
    #[error("Redemption: total collateral ratio below MCR")]
    SystemUnderCollateralized = 801,
    #[error("Redemption: fee would absorb all collateral drawn")]
    RedemptionFeeTooHigh = 802,

    // Oracle errors (9xx)
    #[error("Oracle price unavailable")]
    PriceUnavailable = 900,

    // Configuration errors (10xx)
    #[error("Invalid configuration parameter")]
    InvalidConfig = 1000,
}

/// Coarse error taxonomy callers branch on
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    /// Division by zero, overflow or precision loss; the operation is void
    Arithmetic,
    /// The trove, deposit or list node does not exist
    NotFound,
    /// Hints did not lead to an insert position; retry with fresh hints
    InvalidHint,
    /// Caller asked for more than is available
    InsufficientBalance,
    /// The alternate absorption path must be used (offset vs. redistribution)
    Capacity,
    /// Any other rejected precondition
    Validation,
}

impl CdpError {
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            CdpError::DivisionByZero
            | CdpError::Overflow
            | CdpError::PrecisionUnderflow
            | CdpError::Underflow => ErrorKind::Arithmetic,
            CdpError::TroveNotFound
            | CdpError::TroveNotActive
            | CdpError::DepositNotFound
            | CdpError::NodeNotFound => ErrorKind::NotFound,
            CdpError::InvalidHint => ErrorKind::InvalidHint,
            CdpError::InsufficientDeposit
            | CdpError::InsufficientTokenBalance
            | CdpError::InsufficientCollateral
            | CdpError::RepayExceedsDebt
            | CdpError::RedemptionAmountExceeds => ErrorKind::InsufficientBalance,
            CdpError::EmptyPool | CdpError::NoStakes => ErrorKind::Capacity,
            _ => ErrorKind::Validation,
        }
    }

    /// Whether a caller can recover by choosing another path or new hints
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidHint | ErrorKind::Capacity)
    }
}
