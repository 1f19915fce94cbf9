//! Ledger facade: one entry point per client command, with time taken
//! from the injected clock and content status kept in step with bonds.
//!
//! Content status is written last, under the read lock of the content's
//! latest bond, so status writes land in the same order as the bond
//! transitions they reflect.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::account::{Account, AccountLedger, TransferOutcome};
use crate::bond::{Bond, BondRegistry, BondState};
use crate::challenge::{Challenge, ChallengeOutcome, ChallengeResolver, Resolution};
use crate::clock::Clock;
use crate::content::{ContentRecord, ContentStore, InMemoryContentStore, NewContent};
use crate::error::{LedgerError, Result};
use crate::params::LedgerParams;
use crate::rewards::{Claim, EpochAccrual, RewardsAccrual};
use crate::sync::read_within;
use crate::types::{amount_serde, Address, Amount, BondId, ChallengeId, ContentId, Timestamp};

/// Retries when a newer bond replaces the one being mirrored
const STATUS_SYNC_ATTEMPTS: usize = 4;

/// Account plus derived reward fields
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    #[serde(flatten)]
    pub account: Account,

    #[serde(with = "amount_serde")]
    pub pending_rewards: Amount,

    pub eligible: bool,
}

/// Ledger-wide totals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub accounts: u64,
    pub contents: u64,
    pub bonds: u64,
    pub active_bonds: u64,
    pub slashed_bonds: u64,
    pub challenges: u64,
    pub open_challenges: u64,
    #[serde(with = "amount_serde")]
    pub total_staked: Amount,
    #[serde(with = "amount_serde")]
    pub total_reserved: Amount,
    #[serde(with = "amount_serde")]
    pub total_slashed: Amount,
    #[serde(with = "amount_serde")]
    pub treasury: Amount,
    #[serde(with = "amount_serde")]
    pub pending_rewards: Amount,
    pub last_accrued_epoch: Option<u64>,
}

pub struct Ledger {
    params: Arc<LedgerParams>,
    clock: Arc<dyn Clock>,
    content: Arc<dyn ContentStore>,
    accounts: Arc<AccountLedger>,
    bonds: Arc<BondRegistry>,
    challenges: ChallengeResolver,
    rewards: RewardsAccrual,
}

impl Ledger {
    /// Assemble a ledger; fails if `params` are inconsistent
    pub fn new(params: LedgerParams, clock: Arc<dyn Clock>, content: Arc<dyn ContentStore>) -> Result<Self> {
        params.validate()?;
        let params = Arc::new(params);
        let accounts = Arc::new(AccountLedger::new(params.clone()));
        let bonds = Arc::new(BondRegistry::new(accounts.clone(), params.clone()));
        let challenges = ChallengeResolver::new(accounts.clone(), bonds.clone(), params.clone());
        let rewards = RewardsAccrual::new(accounts.clone(), params.clone());

        Ok(Self {
            params,
            clock,
            content,
            accounts,
            bonds,
            challenges,
            rewards,
        })
    }

    /// Ledger backed by an in-memory content store
    pub fn in_memory(params: LedgerParams, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(params, clock, Arc::new(InMemoryContentStore::new()))
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    pub fn accounts(&self) -> &AccountLedger {
        &self.accounts
    }

    pub fn bonds(&self) -> &BondRegistry {
        &self.bonds
    }

    pub fn challenges(&self) -> &ChallengeResolver {
        &self.challenges
    }

    pub fn rewards(&self) -> &RewardsAccrual {
        &self.rewards
    }

    pub fn content_store(&self) -> &dyn ContentStore {
        self.content.as_ref()
    }

    // === Accounts ===

    /// Reconcile a confirmed on-chain transfer; duplicates are no-ops
    pub fn on_transfer_confirmed(&self, tx_hash: &str, address: &Address, delta: i128) -> Result<TransferOutcome> {
        self.accounts.on_transfer_confirmed(tx_hash, address, delta, self.now())
    }

    pub fn deposit(&self, address: &Address, amount: Amount) -> Result<Account> {
        self.accounts.deposit(address, amount, self.now())
    }

    pub fn withdraw(&self, address: &Address, amount: Amount) -> Result<Account> {
        self.accounts.withdraw(address, amount)
    }

    pub fn is_eligible_staker(&self, address: &Address) -> Result<bool> {
        self.accounts.is_eligible_staker(address, self.now())
    }

    pub fn account(&self, address: &Address) -> Result<AccountView> {
        let account = self.accounts.account(address)?;
        Ok(AccountView {
            eligible: account.is_eligible(&self.params, self.now()),
            pending_rewards: self.rewards.pending_rewards(address),
            account,
        })
    }

    // === Content ===

    pub fn create_content(&self, content: NewContent) -> Result<ContentRecord> {
        self.content.create_content(content, self.now())
    }

    pub fn content(&self, id: &ContentId) -> Result<ContentRecord> {
        self.content.get_content(id)
    }

    pub fn content_by_hash(&self, content_hash: &str) -> Result<ContentRecord> {
        self.content.get_content_by_hash(content_hash)
    }

    pub fn list_contents(&self, limit: usize, offset: usize) -> Result<Vec<ContentRecord>> {
        self.content.list_contents(limit, offset)
    }

    // === Bonds ===

    /// Bond stored content on behalf of its author.
    ///
    /// `amount` defaults to the configured bond for the content kind and
    /// must equal it when given.
    pub fn lock_bond(&self, owner: &Address, content_id: &ContentId, amount: Option<Amount>) -> Result<Bond> {
        let record = self.content.get_content(content_id)?;
        if record.author != *owner {
            return Err(LedgerError::NotOwner {
                caller: owner.to_string(),
                resource: format!("content {}", content_id),
            });
        }
        let expected = self.params.bond_for(record.kind);
        let amount = amount.unwrap_or(expected);
        if amount != expected {
            return Err(LedgerError::InvalidAmount(format!(
                "{:?} bond must be {} base units",
                record.kind, expected
            )));
        }

        let bond = self
            .bonds
            .lock_bond(owner, content_id, record.kind, amount, self.now())?;
        self.sync_content_status(content_id);
        Ok(bond)
    }

    pub fn check_unlock(&self, bond_id: BondId) -> Result<Bond> {
        self.bonds.check_unlock(bond_id, self.now())
    }

    pub fn withdraw_bond(&self, bond_id: BondId, caller: &Address) -> Result<Bond> {
        let bond = self.bonds.withdraw(bond_id, caller, self.now())?;
        self.sync_content_status(&bond.content_id);
        Ok(bond)
    }

    pub fn bond(&self, bond_id: BondId) -> Result<Bond> {
        self.bonds.bond(bond_id)
    }

    pub fn bond_for_content(&self, content_id: &ContentId) -> Result<Bond> {
        self.bonds.bond_for_content(content_id)
    }

    pub fn bonds_of(&self, owner: &Address) -> Result<Vec<Bond>> {
        self.bonds.bonds_of(owner)
    }

    // === Challenges ===

    /// `stake` defaults to the configured challenge bond
    pub fn open_challenge(
        &self,
        challenger: &Address,
        bond_id: BondId,
        stake: Option<Amount>,
        reason: &str,
    ) -> Result<Challenge> {
        let stake = stake.unwrap_or(self.params.challenge_bond);
        let challenge = self
            .challenges
            .open_challenge(challenger, bond_id, stake, reason, self.now())?;
        self.sync_content_status(&challenge.content_id);
        Ok(challenge)
    }

    /// Challenge whichever bond currently backs a content item
    pub fn challenge_content(
        &self,
        challenger: &Address,
        content_id: &ContentId,
        stake: Option<Amount>,
        reason: &str,
    ) -> Result<Challenge> {
        match self.bonds.active_bond_id(content_id) {
            Some(bond_id) => self.open_challenge(challenger, bond_id, stake, reason),
            None => {
                let bond = self.bonds.bond_for_content(content_id)?;
                Err(LedgerError::BondNotChallengeable {
                    bond_id: bond.bond_id,
                    reason: format!("bond is {}", bond.state.name()),
                })
            }
        }
    }

    pub fn resolve(&self, challenge_id: ChallengeId, outcome: ChallengeOutcome) -> Result<Resolution> {
        let resolution = self.challenges.resolve(challenge_id, outcome, self.now())?;
        self.sync_content_status(&resolution.bond.content_id);
        Ok(resolution)
    }

    pub fn challenge(&self, challenge_id: ChallengeId) -> Result<Challenge> {
        self.challenges.challenge(challenge_id)
    }

    pub fn challenges_for_bond(&self, bond_id: BondId) -> Result<Vec<Challenge>> {
        self.challenges.challenges_for_bond(bond_id)
    }

    // === Rewards ===

    pub fn accrue_epoch(&self) -> Result<EpochAccrual> {
        self.rewards.accrue_epoch(self.now())
    }

    pub fn claim(&self, address: &Address) -> Result<Claim> {
        self.rewards.claim(address)
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let mut stats = LedgerStats {
            accounts: self.accounts.len() as u64,
            contents: self.content.count() as u64,
            bonds: self.bonds.len() as u64,
            challenges: self.challenges.len() as u64,
            open_challenges: self.challenges.open_count()?,
            treasury: self.accounts.treasury(),
            pending_rewards: self.rewards.total_pending(),
            last_accrued_epoch: self.rewards.last_accrued_epoch()?,
            ..Default::default()
        };
        for account in self.accounts.snapshot()? {
            stats.total_staked += account.total_staked;
            stats.total_reserved += account.reserved;
            stats.total_slashed += account.slashed;
        }
        for (state, count) in self.bonds.count_by_state()? {
            if !state.is_terminal() {
                stats.active_bonds += count;
            }
            if state == BondState::Slashed {
                stats.slashed_bonds += count;
            }
        }
        Ok(stats)
    }

    /// Content status is display-only; a store failure never undoes a
    /// committed ledger transition.
    fn sync_content_status(&self, content_id: &ContentId) {
        if let Err(err) = self.try_sync_content_status(content_id) {
            tracing::warn!(%content_id, error = %err, "Failed to update content status");
        }
    }

    fn try_sync_content_status(&self, content_id: &ContentId) -> Result<()> {
        for _ in 0..STATUS_SYNC_ATTEMPTS {
            let bond_id = self
                .bonds
                .latest_bond_id(content_id)
                .ok_or_else(|| LedgerError::not_found("bond for content", content_id))?;
            let cell = self.bonds.cell(bond_id)?;
            let bond = read_within(&cell, self.params.lock_timeout(), || format!("bond {}", bond_id))?;
            self.content.set_status(content_id, bond.state.content_status())?;
            if self.bonds.latest_bond_id(content_id) == Some(bond_id) {
                return Ok(());
            }
        }
        Ok(())
    }
}
