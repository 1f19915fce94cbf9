//! Error types for ledger operations

use crate::bond::BondState;
use crate::types::{Amount, BondId, ChallengeId};
use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Business-rule failures returned by every mutating ledger operation.
///
/// Invariant breaches (releasing more than is reserved, etc.) are defects
/// and panic instead of surfacing here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Balances ===
    #[error("insufficient wallet balance: requested {requested}, available {available}")]
    InsufficientWalletBalance { requested: Amount, available: Amount },

    #[error("insufficient available stake: requested {requested}, available {available}")]
    InsufficientAvailableBalance { requested: Amount, available: Amount },

    #[error("stake of {remaining} would be below the minimum of {minimum}")]
    BelowMinimumStake { remaining: Amount, minimum: Amount },

    // === Bonds ===
    #[error("content {0} already has an active bond")]
    DuplicateContent(String),

    #[error("bond {bond_id} is {state:?}, not withdrawable")]
    NotWithdrawable { bond_id: BondId, state: BondState },

    #[error("{caller} is not the owner of {resource}")]
    NotOwner { caller: String, resource: String },

    #[error("bond {bond_id} cannot be challenged: {reason}")]
    BondNotChallengeable { bond_id: BondId, reason: String },

    // === Challenges ===
    #[error("challenge {0} is already resolved")]
    AlreadyResolved(ChallengeId),

    // === Rewards ===
    #[error("{0} has no pending rewards")]
    NothingToClaim(String),

    #[error("epoch {epoch} already accrued (last accrued epoch {last})")]
    StaleEpoch { epoch: u64, last: u64 },

    // === Lookup & contention ===
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{resource} is busy, retry later")]
    Busy { resource: String },

    // === Input validation ===
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("invalid ledger parameters: {0}")]
    InvalidParams(String),
}

impl LedgerError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientWalletBalance { .. } => "INSUFFICIENT_WALLET_BALANCE",
            Self::InsufficientAvailableBalance { .. } => "INSUFFICIENT_AVAILABLE_BALANCE",
            Self::BelowMinimumStake { .. } => "BELOW_MINIMUM_STAKE",
            Self::DuplicateContent(_) => "DUPLICATE_CONTENT",
            Self::NotWithdrawable { .. } => "NOT_WITHDRAWABLE",
            Self::NotOwner { .. } => "NOT_OWNER",
            Self::BondNotChallengeable { .. } => "BOND_NOT_CHALLENGEABLE",
            Self::AlreadyResolved(_) => "ALREADY_RESOLVED",
            Self::NothingToClaim(_) => "NOTHING_TO_CLAIM",
            Self::StaleEpoch { .. } => "STALE_EPOCH",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Busy { .. } => "BUSY",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::InvalidContent(_) => "INVALID_CONTENT",
            Self::InvalidTransfer(_) => "INVALID_TRANSFER",
            Self::InvalidParams(_) => "INVALID_PARAMS",
        }
    }

    /// Only lock contention is safe to retry blindly
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}
