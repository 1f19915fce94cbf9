//! Tunable ledger parameters

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::*;
use crate::content::ContentKind;
use crate::error::{LedgerError, Result};
use crate::types::{format_mdt, mdt_serde, Amount};

/// Protocol parameters, defaulting to the published constants.
///
/// Amounts are written as decimal MDT strings in configuration files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerParams {
    /// Smallest non-zero total stake
    #[serde(default = "default_min_stake", with = "mdt_serde")]
    pub min_stake: Amount,

    /// Bond reserved when a post is published
    #[serde(default = "default_post_bond", with = "mdt_serde")]
    pub post_bond: Amount,

    /// Bond reserved when a comment is published
    #[serde(default = "default_comment_bond", with = "mdt_serde")]
    pub comment_bond: Amount,

    /// Stake reserved by a challenger
    #[serde(default = "default_challenge_bond", with = "mdt_serde")]
    pub challenge_bond: Amount,

    #[serde(default = "default_unlock_window_secs")]
    pub unlock_window_secs: u64,

    #[serde(default = "default_stake_age_requirement_secs")]
    pub stake_age_requirement_secs: u64,

    #[serde(default = "default_epoch_length_secs")]
    pub epoch_length_secs: u64,

    /// Rewards split among eligible stakers each epoch
    #[serde(default = "default_epoch_reward_pool", with = "mdt_serde")]
    pub epoch_reward_pool: Amount,

    /// Cap on any single bond, in basis points of `min_stake`
    #[serde(default = "default_max_slash_bps")]
    pub max_slash_bps: u32,

    /// Share of a losing challenger's stake paid to the defendant
    #[serde(default = "default_defendant_reward_bps")]
    pub defendant_reward_bps: u32,

    /// Share of a slashed bond paid to the winning challenger
    #[serde(default = "default_challenger_reward_bps")]
    pub challenger_reward_bps: u32,

    /// Bounded wait for per-entity locks
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_min_stake() -> Amount {
    MIN_STAKE
}

fn default_post_bond() -> Amount {
    POST_BOND
}

fn default_comment_bond() -> Amount {
    COMMENT_BOND
}

fn default_challenge_bond() -> Amount {
    CHALLENGE_BOND
}

fn default_unlock_window_secs() -> u64 {
    UNLOCK_WINDOW_SECS
}

fn default_stake_age_requirement_secs() -> u64 {
    STAKE_AGE_REQUIREMENT_SECS
}

fn default_epoch_length_secs() -> u64 {
    EPOCH_LENGTH_SECS
}

fn default_epoch_reward_pool() -> Amount {
    EPOCH_REWARD_POOL
}

fn default_max_slash_bps() -> u32 {
    MAX_SLASH_BPS
}

fn default_defendant_reward_bps() -> u32 {
    DEFENDANT_REWARD_BPS
}

fn default_challenger_reward_bps() -> u32 {
    CHALLENGER_REWARD_BPS
}

fn default_lock_timeout_ms() -> u64 {
    LOCK_TIMEOUT_MS
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            min_stake: default_min_stake(),
            post_bond: default_post_bond(),
            comment_bond: default_comment_bond(),
            challenge_bond: default_challenge_bond(),
            unlock_window_secs: default_unlock_window_secs(),
            stake_age_requirement_secs: default_stake_age_requirement_secs(),
            epoch_length_secs: default_epoch_length_secs(),
            epoch_reward_pool: default_epoch_reward_pool(),
            max_slash_bps: default_max_slash_bps(),
            defendant_reward_bps: default_defendant_reward_bps(),
            challenger_reward_bps: default_challenger_reward_bps(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl LedgerParams {
    /// Reject parameter sets that would break ledger invariants
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(LedgerError::InvalidParams(msg));

        if self.min_stake == 0 {
            return invalid("min_stake must be positive".into());
        }
        if self.post_bond == 0 || self.comment_bond == 0 || self.challenge_bond == 0 {
            return invalid("bond amounts must be positive".into());
        }
        if self.epoch_length_secs == 0 {
            return invalid("epoch_length_secs must be positive".into());
        }
        for (name, secs) in [
            ("unlock_window_secs", self.unlock_window_secs),
            ("stake_age_requirement_secs", self.stake_age_requirement_secs),
            ("epoch_length_secs", self.epoch_length_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return invalid(format!("{} {} exceeds {}", name, secs, MAX_DURATION_SECS));
            }
        }
        if self.max_slash_bps > BPS_DENOMINATOR {
            return invalid(format!("max_slash_bps {} exceeds {}", self.max_slash_bps, BPS_DENOMINATOR));
        }
        for (name, bps) in [
            ("defendant_reward_bps", self.defendant_reward_bps),
            ("challenger_reward_bps", self.challenger_reward_bps),
        ] {
            if bps > BPS_DENOMINATOR {
                return invalid(format!("{} {} exceeds {}", name, bps, BPS_DENOMINATOR));
            }
        }

        let cap = self.slash_cap();
        for (name, bond) in [
            ("post_bond", self.post_bond),
            ("comment_bond", self.comment_bond),
            ("challenge_bond", self.challenge_bond),
        ] {
            if bond > cap {
                return invalid(format!(
                    "{} of {} MDT exceeds the slashing cap of {} MDT",
                    name,
                    format_mdt(bond),
                    format_mdt(cap)
                ));
            }
        }

        Ok(())
    }

    /// Largest amount a single dispute may forfeit
    pub fn slash_cap(&self) -> Amount {
        self.min_stake * self.max_slash_bps as Amount / BPS_DENOMINATOR as Amount
    }

    /// Configured bond for a kind of content
    pub fn bond_for(&self, kind: ContentKind) -> Amount {
        match kind {
            ContentKind::Post => self.post_bond,
            ContentKind::Comment => self.comment_bond,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let params = LedgerParams::default();
        params.validate().unwrap();
        assert_eq!(params.slash_cap(), 2 * ONE_MDT);
        assert_eq!(params.bond_for(ContentKind::Comment), COMMENT_BOND);
    }

    #[test]
    fn test_bond_above_cap_rejected() {
        let params = LedgerParams {
            challenge_bond: 3 * ONE_MDT,
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParams(ref msg) if msg.contains("challenge_bond")));
    }

    #[test]
    fn test_zero_values_rejected() {
        let zero_stake = LedgerParams { min_stake: 0, ..Default::default() };
        assert!(zero_stake.validate().is_err());

        let zero_epoch = LedgerParams { epoch_length_secs: 0, ..Default::default() };
        assert!(zero_epoch.validate().is_err());

        let big_share = LedgerParams { defendant_reward_bps: 10_001, ..Default::default() };
        assert!(big_share.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let huge_window = LedgerParams { unlock_window_secs: u64::MAX, ..Default::default() };
        let err = huge_window.validate().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParams(ref msg) if msg.contains("unlock_window_secs")));

        let huge_age = LedgerParams { stake_age_requirement_secs: i64::MAX as u64 + 1, ..Default::default() };
        assert!(huge_age.validate().is_err());

        let huge_epoch = LedgerParams { epoch_length_secs: MAX_DURATION_SECS + 1, ..Default::default() };
        assert!(huge_epoch.validate().is_err());

        let at_ceiling = LedgerParams { unlock_window_secs: MAX_DURATION_SECS, ..Default::default() };
        assert!(at_ceiling.validate().is_ok());
    }

    #[test]
    fn test_parse_from_json_with_mdt_amounts() {
        let params: LedgerParams =
            serde_json::from_str(r#"{"post_bond": "0.05", "min_stake": 20}"#).unwrap();
        assert_eq!(params.post_bond, ONE_MDT / 20);
        assert_eq!(params.min_stake, 20 * ONE_MDT);
        assert_eq!(params.comment_bond, COMMENT_BOND);
        assert_eq!(params.unlock_window_secs, UNLOCK_WINDOW_SECS);
    }
}
