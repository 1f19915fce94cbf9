//! # Bond Registry
//!
//! One bond per published post or comment, reserved from the author's
//! available stake and released after the unlock window.
//!
//! ## State Rules
//!
//! | From | To | When |
//! |------|----|------|
//! | Locked | Withdrawable | `now >= unlock_at` and no open challenge |
//! | Locked | Challenged | a challenge is opened |
//! | Challenged | Locked | challenge resolved for the defendant |
//! | Challenged | Slashed | challenge resolved for the challenger |
//! | Withdrawable | Withdrawn | owner withdraws |
//!
//! `Withdrawn` and `Slashed` are terminal. A content id can only carry one
//! non-terminal bond at a time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::account::AccountLedger;
use crate::content::{ContentKind, ContentStatus};
use crate::error::{LedgerError, Result};
use crate::params::LedgerParams;
use crate::sync::{read_within, write_within};
use crate::types::{amount_serde, Address, Amount, BondId, ChallengeId, ContentId, Timestamp};

/// Bond lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BondState {
    Locked,
    Challenged,
    Withdrawable,
    Withdrawn,
    Slashed,
}

impl BondState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Withdrawn | Self::Slashed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Challenged => "challenged",
            Self::Withdrawable => "withdrawable",
            Self::Withdrawn => "withdrawn",
            Self::Slashed => "slashed",
        }
    }

    /// Display status of content backed by a bond in this state
    pub fn content_status(&self) -> ContentStatus {
        match self {
            Self::Locked | Self::Withdrawable => ContentStatus::Published,
            Self::Challenged => ContentStatus::Challenged,
            Self::Withdrawn => ContentStatus::Withdrawn,
            Self::Slashed => ContentStatus::Slashed,
        }
    }
}

/// A content or comment bond
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub bond_id: BondId,
    pub content_id: ContentId,
    pub owner: Address,
    pub kind: ContentKind,

    /// Fixed at issuance
    #[serde(with = "amount_serde")]
    pub amount: Amount,

    pub created_at: Timestamp,

    /// `created_at + unlock window`
    pub unlock_at: Timestamp,

    pub state: BondState,

    pub open_challenge: Option<ChallengeId>,

    /// When the bond reached a terminal state
    pub settled_at: Option<Timestamp>,
}

impl Bond {
    /// Locked -> Withdrawable once the window has elapsed. Returns whether
    /// the state changed.
    pub(crate) fn apply_unlock(&mut self, now: Timestamp) -> bool {
        if self.state == BondState::Locked && self.open_challenge.is_none() && now >= self.unlock_at {
            self.state = BondState::Withdrawable;
            return true;
        }
        false
    }

    /// A challenge at the unlock instant wins over the unlock, even if the
    /// unlock was applied first.
    pub(crate) fn ensure_challengeable(&self, now: Timestamp) -> Result<()> {
        let reason = match self.state {
            BondState::Locked if now <= self.unlock_at => return Ok(()),
            BondState::Withdrawable if now == self.unlock_at => return Ok(()),
            BondState::Locked | BondState::Withdrawable => "unlock window has elapsed",
            BondState::Challenged => "bond already has an open challenge",
            BondState::Withdrawn => "bond was withdrawn",
            BondState::Slashed => "bond was slashed",
        };
        Err(LedgerError::BondNotChallengeable {
            bond_id: self.bond_id,
            reason: reason.to_string(),
        })
    }
}

/// Registry of all bonds
pub struct BondRegistry {
    accounts: Arc<AccountLedger>,
    bonds: DashMap<BondId, Arc<RwLock<Bond>>>,
    /// Content id -> its non-terminal bond
    active_by_content: DashMap<ContentId, BondId>,
    /// Content id -> most recent bond, terminal or not
    latest_by_content: DashMap<ContentId, BondId>,
    next_id: AtomicU64,
    params: Arc<LedgerParams>,
}

impl BondRegistry {
    pub fn new(accounts: Arc<AccountLedger>, params: Arc<LedgerParams>) -> Self {
        Self {
            accounts,
            bonds: DashMap::new(),
            active_by_content: DashMap::new(),
            latest_by_content: DashMap::new(),
            next_id: AtomicU64::new(1),
            params,
        }
    }

    /// Reserve `amount` from the owner and create a `Locked` bond
    pub fn lock_bond(
        &self,
        owner: &Address,
        content_id: &ContentId,
        kind: ContentKind,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Bond> {
        let unlock_at = i64::try_from(self.params.unlock_window_secs)
            .ok()
            .and_then(|window| now.checked_add(window))
            .ok_or_else(|| {
                LedgerError::InvalidParams(format!(
                    "unlock window of {}s overflows the clock",
                    self.params.unlock_window_secs
                ))
            })?;

        let bond = self.accounts.with_account(owner, |account| {
            match self.active_by_content.entry(content_id.clone()) {
                Entry::Occupied(_) => Err(LedgerError::DuplicateContent(content_id.to_string())),
                Entry::Vacant(slot) => {
                    account.reserve(amount)?;

                    let bond_id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let bond = Bond {
                        bond_id,
                        content_id: content_id.clone(),
                        owner: owner.clone(),
                        kind,
                        amount,
                        created_at: now,
                        unlock_at,
                        state: BondState::Locked,
                        open_challenge: None,
                        settled_at: None,
                    };
                    self.bonds.insert(bond_id, Arc::new(RwLock::new(bond.clone())));
                    slot.insert(bond_id);
                    self.latest_by_content.insert(content_id.clone(), bond_id);
                    Ok(bond)
                }
            }
        })?;

        tracing::info!(
            bond_id = bond.bond_id,
            content_id = %bond.content_id,
            owner = %bond.owner,
            amount = %bond.amount,
            "Locked bond"
        );
        Ok(bond)
    }

    /// Advisory unlock check; idempotent
    pub fn check_unlock(&self, bond_id: BondId, now: Timestamp) -> Result<Bond> {
        let cell = self.cell(bond_id)?;
        let mut bond = write_within(&cell, self.params.lock_timeout(), || format!("bond {}", bond_id))?;
        if bond.apply_unlock(now) {
            tracing::info!(bond_id, "Bond became withdrawable");
        } else {
            tracing::debug!(bond_id, state = bond.state.name(), "Unlock check left bond unchanged");
        }
        Ok(bond.clone())
    }

    /// Owner reclaims a withdrawable bond into `available`
    pub fn withdraw(&self, bond_id: BondId, caller: &Address, now: Timestamp) -> Result<Bond> {
        let cell = self.cell(bond_id)?;
        let owner = read_within(&cell, self.params.lock_timeout(), || format!("bond {}", bond_id))?
            .owner
            .clone();
        if *caller != owner {
            return Err(LedgerError::NotOwner {
                caller: caller.to_string(),
                resource: format!("bond {}", bond_id),
            });
        }

        let bond = self.accounts.with_account(&owner, |account| {
            let mut bond = write_within(&cell, self.params.lock_timeout(), || format!("bond {}", bond_id))?;
            // Re-validate under the lock; an earlier check_unlock is advisory.
            bond.apply_unlock(now);
            if bond.state != BondState::Withdrawable {
                return Err(LedgerError::NotWithdrawable {
                    bond_id,
                    state: bond.state,
                });
            }

            bond.state = BondState::Withdrawn;
            bond.settled_at = Some(now);
            account.release(bond.amount);
            self.accounts.settle(account);
            self.retire(&bond);
            Ok(bond.clone())
        })?;

        tracing::info!(bond_id, owner = %bond.owner, amount = %bond.amount, "Withdrew bond");
        Ok(bond)
    }

    pub fn bond(&self, bond_id: BondId) -> Result<Bond> {
        let cell = self.cell(bond_id)?;
        let bond = read_within(&cell, self.params.lock_timeout(), || format!("bond {}", bond_id))?;
        Ok(bond.clone())
    }

    /// Most recent bond for a content id
    pub fn bond_for_content(&self, content_id: &ContentId) -> Result<Bond> {
        let bond_id = self
            .latest_bond_id(content_id)
            .ok_or_else(|| LedgerError::not_found("bond for content", content_id))?;
        self.bond(bond_id)
    }

    /// Id of the most recent bond for a content id
    pub fn latest_bond_id(&self, content_id: &ContentId) -> Option<BondId> {
        self.latest_by_content.get(content_id).map(|entry| *entry.value())
    }

    /// The non-terminal bond for a content id, if any
    pub fn active_bond_id(&self, content_id: &ContentId) -> Option<BondId> {
        self.active_by_content.get(content_id).map(|entry| *entry.value())
    }

    /// All bonds owned by an address, oldest first
    pub fn bonds_of(&self, owner: &Address) -> Result<Vec<Bond>> {
        let mut owned = Vec::new();
        for bond in self.all()? {
            if bond.owner == *owner {
                owned.push(bond);
            }
        }
        Ok(owned)
    }

    /// Snapshot of every bond, ordered by id
    pub fn all(&self) -> Result<Vec<Bond>> {
        let cells: Vec<_> = self.bonds.iter().map(|entry| entry.value().clone()).collect();
        let mut bonds = Vec::with_capacity(cells.len());
        for cell in cells {
            let bond = read_within(&cell, self.params.lock_timeout(), || "bond snapshot".to_string())?;
            bonds.push(bond.clone());
        }
        bonds.sort_by_key(|bond| bond.bond_id);
        Ok(bonds)
    }

    /// Number of bonds in each state
    pub fn count_by_state(&self) -> Result<HashMap<BondState, u64>> {
        let mut counts = HashMap::new();
        for bond in self.all()? {
            *counts.entry(bond.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }

    pub(crate) fn cell(&self, bond_id: BondId) -> Result<Arc<RwLock<Bond>>> {
        self.bonds
            .get(&bond_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::not_found("bond", bond_id))
    }

    /// Free the content id for a new bond once this one is terminal
    pub(crate) fn retire(&self, bond: &Bond) {
        debug_assert!(bond.state.is_terminal());
        self.active_by_content
            .remove_if(&bond.content_id, |_, active| *active == bond.bond_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;

    const WEEK: Timestamp = UNLOCK_WINDOW_SECS as Timestamp;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn setup() -> (Arc<AccountLedger>, BondRegistry, Address) {
        let params = Arc::new(LedgerParams::default());
        let accounts = Arc::new(AccountLedger::new(params.clone()));
        let alice = addr(1);
        accounts
            .on_transfer_confirmed("0x01", &alice, (50 * ONE_MDT) as i128, 0)
            .unwrap();
        accounts.deposit(&alice, 20 * ONE_MDT, 0).unwrap();
        let registry = BondRegistry::new(accounts.clone(), params);
        (accounts, registry, alice)
    }

    #[test]
    fn test_lock_reserves_stake() {
        let (accounts, registry, alice) = setup();
        let bond = registry
            .lock_bond(&alice, &ContentId::new("c1"), ContentKind::Post, POST_BOND, 100)
            .unwrap();

        assert_eq!(bond.bond_id, 1);
        assert_eq!(bond.state, BondState::Locked);
        assert_eq!(bond.unlock_at, 100 + WEEK);
        let account = accounts.account(&alice).unwrap();
        assert_eq!(account.reserved, POST_BOND);
        assert_eq!(account.available, 20 * ONE_MDT - POST_BOND);
    }

    #[test]
    fn test_duplicate_content_rejected_until_terminal() {
        let (_, registry, alice) = setup();
        let content = ContentId::new("c1");
        let first = registry
            .lock_bond(&alice, &content, ContentKind::Post, POST_BOND, 0)
            .unwrap();
        assert!(matches!(
            registry.lock_bond(&alice, &content, ContentKind::Post, POST_BOND, 1),
            Err(LedgerError::DuplicateContent(_))
        ));

        registry.withdraw(first.bond_id, &alice, WEEK).unwrap();
        let second = registry
            .lock_bond(&alice, &content, ContentKind::Post, POST_BOND, WEEK)
            .unwrap();
        assert_eq!(registry.bond_for_content(&content).unwrap().bond_id, second.bond_id);
    }

    #[test]
    fn test_lock_fails_without_available() {
        let (_, registry, alice) = setup();
        let err = registry
            .lock_bond(&alice, &ContentId::new("c1"), ContentKind::Post, 21 * ONE_MDT, 0)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAvailableBalance { .. }));
        assert!(registry.active_bond_id(&ContentId::new("c1")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_check_unlock_idempotent() {
        let (_, registry, alice) = setup();
        let bond = registry
            .lock_bond(&alice, &ContentId::new("c1"), ContentKind::Post, POST_BOND, 0)
            .unwrap();

        assert_eq!(registry.check_unlock(bond.bond_id, WEEK - 1).unwrap().state, BondState::Locked);
        assert_eq!(registry.check_unlock(bond.bond_id, WEEK - 1).unwrap().state, BondState::Locked);
        assert_eq!(registry.check_unlock(bond.bond_id, WEEK).unwrap().state, BondState::Withdrawable);
        assert_eq!(registry.check_unlock(bond.bond_id, WEEK + 5).unwrap().state, BondState::Withdrawable);
    }

    #[test]
    fn test_withdraw_checks_owner_and_state() {
        let (accounts, registry, alice) = setup();
        let bond = registry
            .lock_bond(&alice, &ContentId::new("c1"), ContentKind::Post, POST_BOND, 0)
            .unwrap();

        assert!(matches!(
            registry.withdraw(bond.bond_id, &addr(2), WEEK),
            Err(LedgerError::NotOwner { .. })
        ));
        assert!(matches!(
            registry.withdraw(bond.bond_id, &alice, WEEK - 1),
            Err(LedgerError::NotWithdrawable { state: BondState::Locked, .. })
        ));

        // No prior check_unlock needed: withdraw re-validates itself
        let withdrawn = registry.withdraw(bond.bond_id, &alice, WEEK).unwrap();
        assert_eq!(withdrawn.state, BondState::Withdrawn);
        assert_eq!(withdrawn.settled_at, Some(WEEK));
        assert_eq!(accounts.account(&alice).unwrap().reserved, 0);

        assert!(matches!(
            registry.withdraw(bond.bond_id, &alice, WEEK + 1),
            Err(LedgerError::NotWithdrawable { state: BondState::Withdrawn, .. })
        ));
    }

    #[test]
    fn test_challengeable_window() {
        let (_, registry, alice) = setup();
        let bond = registry
            .lock_bond(&alice, &ContentId::new("c1"), ContentKind::Post, POST_BOND, 0)
            .unwrap();

        assert!(bond.ensure_challengeable(WEEK).is_ok());
        assert!(bond.ensure_challengeable(WEEK + 1).is_err());

        let unlocked = registry.check_unlock(bond.bond_id, WEEK).unwrap();
        assert!(unlocked.ensure_challengeable(WEEK).is_ok());
        assert!(unlocked.ensure_challengeable(WEEK + 1).is_err());
    }

    #[test]
    fn test_overflowing_window_never_unlocks_early() {
        let (accounts, _, alice) = setup();
        let params = Arc::new(LedgerParams {
            unlock_window_secs: u64::MAX,
            ..Default::default()
        });
        let registry = BondRegistry::new(accounts.clone(), params);

        let err = registry
            .lock_bond(&alice, &ContentId::new("c1"), ContentKind::Post, POST_BOND, 1_000)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParams(_)));
        assert!(registry.is_empty());
        assert_eq!(accounts.account(&alice).unwrap().reserved, 0);

        let params = Arc::new(LedgerParams {
            unlock_window_secs: i64::MAX as u64,
            ..Default::default()
        });
        let registry = BondRegistry::new(accounts.clone(), params);
        assert!(registry
            .lock_bond(&alice, &ContentId::new("c2"), ContentKind::Post, POST_BOND, 1_000)
            .is_err());
    }

    #[test]
    fn test_lookups() {
        let (_, registry, alice) = setup();
        registry
            .lock_bond(&alice, &ContentId::new("a"), ContentKind::Post, POST_BOND, 0)
            .unwrap();
        registry
            .lock_bond(&alice, &ContentId::new("b"), ContentKind::Comment, COMMENT_BOND, 0)
            .unwrap();

        let owned = registry.bonds_of(&alice).unwrap();
        assert_eq!(owned.iter().map(|b| b.bond_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(registry.bonds_of(&addr(3)).unwrap().is_empty());
        assert_eq!(registry.count_by_state().unwrap()[&BondState::Locked], 2);
        assert!(matches!(registry.bond(99), Err(LedgerError::NotFound { kind: "bond", .. })));
    }
}
