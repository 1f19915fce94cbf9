//! # Challenge Resolver
//!
//! Disputes against bonded content. A challenger reserves a fixed stake
//! against a `Locked` bond; resolution slashes whichever side lost.
//!
//! | Outcome | Bond | Challenger stake | Defendant bond |
//! |---------|------|------------------|----------------|
//! | ForDefendant | back to `Locked`, countdown kept | slashed, share to defendant | untouched |
//! | ForChallenger | `Slashed` | released | slashed, share to challenger |

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::account::{AccountLedger, SlashSplit};
use crate::bond::{Bond, BondRegistry, BondState};
use crate::error::{LedgerError, Result};
use crate::params::LedgerParams;
use crate::sync::{read_within, write_within};
use crate::types::{amount_serde, Address, Amount, BondId, ChallengeId, ContentId, Timestamp};

/// Challenge status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeStatus {
    Open,
    ResolvedForDefendant,
    ResolvedForChallenger,
}

/// Resolution verdict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeOutcome {
    /// Content stands; the challenger loses their stake
    #[serde(alias = "for_defendant")]
    ForDefendant,
    /// Content is slashed; the challenger is rewarded
    #[serde(alias = "for_challenger")]
    ForChallenger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: ChallengeId,
    pub target_bond_id: BondId,
    pub content_id: ContentId,
    pub challenger: Address,
    /// Owner of the challenged bond
    pub defendant: Address,
    #[serde(with = "amount_serde")]
    pub stake: Amount,
    pub reason: String,
    pub created_at: Timestamp,
    pub status: ChallengeStatus,
    pub outcome: Option<ChallengeOutcome>,
    pub resolved_at: Option<Timestamp>,
    /// How the losing side's stake was divided
    pub slash: Option<SlashSplit>,
}

impl Challenge {
    pub fn is_open(&self) -> bool {
        self.status == ChallengeStatus::Open
    }
}

/// Everything a resolution touched
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub challenge: Challenge,
    pub bond: Bond,
    pub split: SlashSplit,
}

pub struct ChallengeResolver {
    accounts: Arc<AccountLedger>,
    bonds: Arc<BondRegistry>,
    challenges: DashMap<ChallengeId, Arc<RwLock<Challenge>>>,
    by_bond: DashMap<BondId, Vec<ChallengeId>>,
    next_id: AtomicU64,
    params: Arc<LedgerParams>,
}

impl ChallengeResolver {
    pub fn new(accounts: Arc<AccountLedger>, bonds: Arc<BondRegistry>, params: Arc<LedgerParams>) -> Self {
        Self {
            accounts,
            bonds,
            challenges: DashMap::new(),
            by_bond: DashMap::new(),
            next_id: AtomicU64::new(1),
            params,
        }
    }

    /// Reserve the challenger's stake and move the bond to `Challenged`
    pub fn open_challenge(
        &self,
        challenger: &Address,
        bond_id: BondId,
        stake: Amount,
        reason: &str,
        now: Timestamp,
    ) -> Result<Challenge> {
        if stake != self.params.challenge_bond {
            return Err(LedgerError::InvalidAmount(format!(
                "challenge stake must be {} base units",
                self.params.challenge_bond
            )));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::InvalidContent("challenge reason must not be empty".into()));
        }

        let bond_cell = self.bonds.cell(bond_id)?;
        let timeout = self.params.lock_timeout();
        let owner = read_within(&bond_cell, timeout, || format!("bond {}", bond_id))?
            .owner
            .clone();
        if *challenger == owner {
            return Err(LedgerError::BondNotChallengeable {
                bond_id,
                reason: "owners cannot challenge their own bond".into(),
            });
        }

        let challenge = self.accounts.with_account(challenger, |account| {
            let mut bond = write_within(&bond_cell, timeout, || format!("bond {}", bond_id))?;
            bond.ensure_challengeable(now)?;
            account.reserve(stake)?;

            let challenge_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            bond.state = BondState::Challenged;
            bond.open_challenge = Some(challenge_id);

            let challenge = Challenge {
                challenge_id,
                target_bond_id: bond_id,
                content_id: bond.content_id.clone(),
                challenger: challenger.clone(),
                defendant: bond.owner.clone(),
                stake,
                reason: reason.to_string(),
                created_at: now,
                status: ChallengeStatus::Open,
                outcome: None,
                resolved_at: None,
                slash: None,
            };
            self.challenges
                .insert(challenge_id, Arc::new(RwLock::new(challenge.clone())));
            self.by_bond.entry(bond_id).or_default().push(challenge_id);
            Ok(challenge)
        })?;

        tracing::info!(
            challenge_id = challenge.challenge_id,
            bond_id,
            challenger = %challenge.challenger,
            "Opened challenge"
        );
        Ok(challenge)
    }

    /// Settle an open challenge exactly once
    pub fn resolve(&self, challenge_id: ChallengeId, outcome: ChallengeOutcome, now: Timestamp) -> Result<Resolution> {
        let cell = self.cell(challenge_id)?;
        let timeout = self.params.lock_timeout();
        let (challenger, defendant, bond_id) = {
            let challenge = read_within(&cell, timeout, || format!("challenge {}", challenge_id))?;
            if !challenge.is_open() {
                return Err(LedgerError::AlreadyResolved(challenge_id));
            }
            (
                challenge.challenger.clone(),
                challenge.defendant.clone(),
                challenge.target_bond_id,
            )
        };
        let bond_cell = self.bonds.cell(bond_id)?;

        let resolution = self.accounts.with_pair(&challenger, &defendant, |challenger_account, defendant_account| {
            let mut bond = write_within(&bond_cell, timeout, || format!("bond {}", bond_id))?;
            let mut challenge = write_within(&cell, timeout, || format!("challenge {}", challenge_id))?;
            // Another resolver may have won the race since the read above.
            if !challenge.is_open() {
                return Err(LedgerError::AlreadyResolved(challenge_id));
            }
            assert_eq!(
                bond.open_challenge,
                Some(challenge_id),
                "bond {} is not held by challenge {}",
                bond_id,
                challenge_id
            );

            let split = match outcome {
                ChallengeOutcome::ForDefendant => {
                    let split = self.accounts.apply_slash(
                        challenger_account,
                        Some(defendant_account),
                        challenge.stake,
                        self.params.defendant_reward_bps,
                        now,
                    );
                    bond.state = BondState::Locked;
                    bond.open_challenge = None;
                    challenge.status = ChallengeStatus::ResolvedForDefendant;
                    split
                }
                ChallengeOutcome::ForChallenger => {
                    challenger_account.release(challenge.stake);
                    let split = self.accounts.apply_slash(
                        defendant_account,
                        Some(challenger_account),
                        bond.amount,
                        self.params.challenger_reward_bps,
                        now,
                    );
                    bond.state = BondState::Slashed;
                    bond.open_challenge = None;
                    bond.settled_at = Some(now);
                    self.bonds.retire(&bond);
                    challenge.status = ChallengeStatus::ResolvedForChallenger;
                    split
                }
            };
            challenge.outcome = Some(outcome);
            challenge.resolved_at = Some(now);
            challenge.slash = Some(split);

            Ok(Resolution {
                challenge: challenge.clone(),
                bond: bond.clone(),
                split,
            })
        })?;

        tracing::info!(
            challenge_id,
            bond_id,
            outcome = ?outcome,
            slashed = %resolution.split.total,
            "Resolved challenge"
        );
        Ok(resolution)
    }

    pub fn challenge(&self, challenge_id: ChallengeId) -> Result<Challenge> {
        let cell = self.cell(challenge_id)?;
        let challenge = read_within(&cell, self.params.lock_timeout(), || {
            format!("challenge {}", challenge_id)
        })?;
        Ok(challenge.clone())
    }

    /// Every challenge ever opened against a bond, oldest first
    pub fn challenges_for_bond(&self, bond_id: BondId) -> Result<Vec<Challenge>> {
        let ids = self
            .by_bond
            .get(&bond_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        ids.into_iter().map(|id| self.challenge(id)).collect()
    }

    pub fn open_count(&self) -> Result<u64> {
        let cells: Vec<_> = self.challenges.iter().map(|entry| entry.value().clone()).collect();
        let mut open = 0;
        for cell in cells {
            if read_within(&cell, self.params.lock_timeout(), || "challenge snapshot".to_string())?.is_open() {
                open += 1;
            }
        }
        Ok(open)
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    fn cell(&self, challenge_id: ChallengeId) -> Result<Arc<RwLock<Challenge>>> {
        self.challenges
            .get(&challenge_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::not_found("challenge", challenge_id))
    }
}
