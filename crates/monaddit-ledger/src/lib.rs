//! # Monaddit Ledger - Stake & Content-Bond Ledger
//!
//! Authoritative model of the staking vault and content registry that the
//! Monaddit forum front end and API agree on.
//!
//! ## Components
//!
//! | Component | Owns | Module |
//! |-----------|------|--------|
//! | Account Ledger | wallet, staked, available, reserved, slashed | [`account`] |
//! | Bond Registry | content/comment bonds and their lifecycle | [`bond`] |
//! | Challenge Resolver | disputes against bonds, slash-or-release | [`challenge`] |
//! | Rewards Accrual | per-epoch pending rewards for eligible stakers | [`rewards`] |
//!
//! [`Ledger`] sequences them behind a single facade with an injected
//! [`Clock`] and [`ContentStore`].
//!
//! ## Bond Lifecycle
//!
//! ```text
//!                 challenge opened               resolved for challenger
//!   ┌────────┐ ─────────────────────► ┌────────────┐ ──────────────────► ┌─────────┐
//!   │ Locked │                        │ Challenged │                     │ Slashed │
//!   └────────┘ ◄───────────────────── └────────────┘                     └─────────┘
//!       │        resolved for defendant
//!       │ 7 days elapsed, no open challenge
//!       ▼
//!  ┌──────────────┐  owner withdraws  ┌───────────┐
//!  │ Withdrawable │ ────────────────► │ Withdrawn │
//!  └──────────────┘                   └───────────┘
//! ```
//!
//! ## Default Parameters
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | Minimum stake | 10 MDT |
//! | Post / comment bond | 0.1 MDT |
//! | Challenge bond | 0.2 MDT |
//! | Unlock window | 7 days |
//! | Stake age for rewards | 7 days |
//! | Epoch length | 7 days |
//! | Slashing cap | 20% of the minimum stake |

pub mod account;
pub mod bond;
pub mod challenge;
pub mod clock;
pub mod content;
pub mod error;
pub mod ledger;
pub mod params;
pub mod rewards;
mod sync;
pub mod types;

// Re-exports
pub use account::{Account, AccountLedger, SlashSplit, TransferOutcome, TransferReceipt};
pub use bond::{Bond, BondRegistry, BondState};
pub use challenge::{Challenge, ChallengeOutcome, ChallengeResolver, ChallengeStatus, Resolution};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use content::{ContentKind, ContentRecord, ContentStatus, ContentStore, InMemoryContentStore, NewContent};
pub use error::{LedgerError, Result};
pub use ledger::{AccountView, Ledger, LedgerStats};
pub use params::LedgerParams;
pub use rewards::{Claim, EpochAccrual, RewardShare, RewardsAccrual};
pub use types::{format_mdt, parse_mdt, Address, Amount, BondId, ChallengeId, ContentId, Timestamp};

/// MDT token constants and protocol defaults
pub mod constants {
    /// Token symbol
    pub const SYMBOL: &str = "MDT";

    /// Decimal places (same as ETH)
    pub const DECIMALS: u8 = 18;

    /// One MDT in base units
    pub const ONE_MDT: u128 = 1_000_000_000_000_000_000; // 10^18

    /// Seconds per day
    pub const DAY_SECS: u64 = 24 * 3600;

    /// Minimum non-zero stake: 10 MDT
    pub const MIN_STAKE: u128 = 10 * ONE_MDT;

    /// Bond locked when publishing a post: 0.1 MDT
    pub const POST_BOND: u128 = ONE_MDT / 10;

    /// Bond locked when publishing a comment: 0.1 MDT
    pub const COMMENT_BOND: u128 = ONE_MDT / 10;

    /// Stake reserved by a challenger: 0.2 MDT
    pub const CHALLENGE_BOND: u128 = ONE_MDT / 5;

    /// Bonds become withdrawable 7 days after publication
    pub const UNLOCK_WINDOW_SECS: u64 = 7 * DAY_SECS;

    /// Stake must be 7 days old to earn rewards
    pub const STAKE_AGE_REQUIREMENT_SECS: u64 = 7 * DAY_SECS;

    /// Weekly reward epochs
    pub const EPOCH_LENGTH_SECS: u64 = 7 * DAY_SECS;

    /// Rewards distributed per epoch: 1,000 MDT
    pub const EPOCH_REWARD_POOL: u128 = 1_000 * ONE_MDT;

    /// Basis-point denominator
    pub const BPS_DENOMINATOR: u32 = 10_000;

    /// No single dispute may put more than 20% of a minimum stake at risk
    pub const MAX_SLASH_BPS: u32 = 2_000;

    /// Share of a losing challenger's stake paid to the defendant
    pub const DEFENDANT_REWARD_BPS: u32 = 5_000;

    /// Share of a slashed bond paid to the winning challenger
    pub const CHALLENGER_REWARD_BPS: u32 = 5_000;

    /// Bounded wait for a per-entity lock before reporting `Busy`
    pub const LOCK_TIMEOUT_MS: u64 = 250;

    /// Ceiling for any configured window or epoch length: 100 years
    pub const MAX_DURATION_SECS: u64 = 100 * 365 * DAY_SECS;
}

pub use constants::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bond_sizes() {
        assert_eq!(POST_BOND * 10, ONE_MDT);
        assert_eq!(CHALLENGE_BOND, 2 * POST_BOND);
    }

    #[test]
    fn test_bonds_within_slash_cap() {
        let cap = MIN_STAKE * MAX_SLASH_BPS as u128 / BPS_DENOMINATOR as u128;
        assert!(POST_BOND <= cap);
        assert!(CHALLENGE_BOND <= cap);
    }
}
