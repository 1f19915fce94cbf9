//! # Account Ledger
//!
//! Per-address balances and the only code that moves value between them.
//!
//! ## Balance Model
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `wallet_balance` | Spendable tokens mirrored from confirmed on-chain transfers |
//! | `total_staked` | Tokens in the vault, always `available + reserved` |
//! | `available` | Staked, not backing any bond, withdrawable |
//! | `reserved` | Staked and locked behind a content or challenge bond |
//! | `slashed` | Lifetime forfeitures, never decreases |
//!
//! `total_staked` is either zero or at least the minimum stake. The one
//! exception is an account whose stake was slashed below the minimum: its
//! `available` part is returned to the wallet immediately and only
//! `reserved` remains until the outstanding bonds settle.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::constants::BPS_DENOMINATOR;
use crate::error::{LedgerError, Result};
use crate::params::LedgerParams;
use crate::sync::{read_within, write_within};
use crate::types::{amount_serde, delta_serde, mul_div, Address, Amount, Timestamp};

/// Balances for a single address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,

    #[serde(with = "amount_serde")]
    pub wallet_balance: Amount,

    #[serde(with = "amount_serde")]
    pub total_staked: Amount,

    #[serde(with = "amount_serde")]
    pub available: Amount,

    #[serde(with = "amount_serde")]
    pub reserved: Amount,

    #[serde(with = "amount_serde")]
    pub slashed: Amount,

    /// When `total_staked` last went from zero to positive
    pub stake_timestamp: Option<Timestamp>,

    /// Lifetime rewards moved into the wallet
    #[serde(with = "amount_serde")]
    pub claimed_rewards: Amount,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            wallet_balance: 0,
            total_staked: 0,
            available: 0,
            reserved: 0,
            slashed: 0,
            stake_timestamp: None,
            claimed_rewards: 0,
        }
    }

    /// Seconds since the stake last became positive
    pub fn stake_age(&self, now: Timestamp) -> Option<u64> {
        self.stake_timestamp.map(|since| (now - since).max(0) as u64)
    }

    /// Meets the minimum and has been staked long enough to earn rewards
    pub fn is_eligible(&self, params: &LedgerParams, now: Timestamp) -> bool {
        self.total_staked >= params.min_stake
            && self
                .stake_age(now)
                .map_or(false, |age| age >= params.stake_age_requirement_secs)
    }

    pub(crate) fn credit_wallet(&mut self, amount: Amount) -> Result<()> {
        self.wallet_balance = self
            .wallet_balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidAmount("wallet balance overflow".into()))?;
        Ok(())
    }

    pub(crate) fn debit_wallet(&mut self, amount: Amount) -> Result<()> {
        if amount > self.wallet_balance {
            return Err(LedgerError::InsufficientWalletBalance {
                requested: amount,
                available: self.wallet_balance,
            });
        }
        self.wallet_balance -= amount;
        Ok(())
    }

    pub(crate) fn deposit(&mut self, amount: Amount, min_stake: Amount, now: Timestamp) -> Result<()> {
        ensure_positive(amount)?;
        if amount > self.wallet_balance {
            return Err(LedgerError::InsufficientWalletBalance {
                requested: amount,
                available: self.wallet_balance,
            });
        }
        let total = self
            .total_staked
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidAmount("stake overflow".into()))?;
        if total < min_stake {
            return Err(LedgerError::BelowMinimumStake {
                remaining: total,
                minimum: min_stake,
            });
        }

        if self.total_staked == 0 {
            self.stake_timestamp = Some(now);
        }
        self.wallet_balance -= amount;
        self.available += amount;
        self.total_staked = total;
        Ok(())
    }

    pub(crate) fn withdraw(&mut self, amount: Amount, min_stake: Amount) -> Result<()> {
        ensure_positive(amount)?;
        if amount > self.available {
            return Err(LedgerError::InsufficientAvailableBalance {
                requested: amount,
                available: self.available,
            });
        }
        let remaining = self.total_staked - amount;
        if remaining > 0 && remaining < min_stake {
            return Err(LedgerError::BelowMinimumStake {
                remaining,
                minimum: min_stake,
            });
        }

        self.available -= amount;
        self.total_staked = remaining;
        self.wallet_balance += amount;
        if remaining == 0 {
            self.stake_timestamp = None;
        }
        Ok(())
    }

    pub(crate) fn reserve(&mut self, amount: Amount) -> Result<()> {
        ensure_positive(amount)?;
        if amount > self.available {
            return Err(LedgerError::InsufficientAvailableBalance {
                requested: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.reserved += amount;
        Ok(())
    }

    /// Panics if `amount` exceeds `reserved`
    pub(crate) fn release(&mut self, amount: Amount) {
        assert!(
            amount <= self.reserved,
            "release of {} exceeds reserved {} for {}",
            amount,
            self.reserved,
            self.address
        );
        self.reserved -= amount;
        self.available += amount;
    }

    /// Move reserved tokens out of the vault into `slashed`.
    ///
    /// Panics if `amount` exceeds `reserved`.
    pub(crate) fn forfeit(&mut self, amount: Amount) {
        assert!(
            amount <= self.reserved,
            "slash of {} exceeds reserved {} for {}",
            amount,
            self.reserved,
            self.address
        );
        self.reserved -= amount;
        self.total_staked -= amount;
        self.slashed += amount;
    }

    /// Credit tokens straight into `available`
    pub(crate) fn credit_stake(&mut self, amount: Amount, now: Timestamp) {
        if amount == 0 {
            return;
        }
        if self.total_staked == 0 {
            self.stake_timestamp = Some(now);
        }
        self.available += amount;
        self.total_staked += amount;
    }

    /// Forced exit for a stake pushed under the minimum. Returns the amount
    /// moved back to the wallet.
    pub(crate) fn settle_below_minimum(&mut self, min_stake: Amount) -> Amount {
        let mut swept = 0;
        if self.total_staked > 0 && self.total_staked < min_stake && self.available > 0 {
            swept = self.available;
            self.wallet_balance += swept;
            self.total_staked -= swept;
            self.available = 0;
        }
        if self.total_staked == 0 {
            self.stake_timestamp = None;
        }
        swept
    }

    pub(crate) fn assert_consistent(&self) {
        debug_assert_eq!(
            self.total_staked,
            self.available + self.reserved,
            "balance drift on {}",
            self.address
        );
    }
}

fn ensure_positive(amount: Amount) -> Result<()> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount("amount must be positive".into()));
    }
    Ok(())
}

/// How a slashed amount was divided
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashSplit {
    #[serde(with = "amount_serde")]
    pub total: Amount,

    /// Credited to the winning party's `available`
    #[serde(with = "amount_serde")]
    pub to_beneficiary: Amount,

    /// Remainder kept by the protocol treasury
    #[serde(with = "amount_serde")]
    pub to_treasury: Amount,
}

impl SlashSplit {
    /// Beneficiary share is `amount * share_bps / 10_000`, floored
    pub fn from_slashed(amount: Amount, share_bps: u32) -> Self {
        let to_beneficiary = mul_div(amount, share_bps as Amount, BPS_DENOMINATOR as Amount);
        Self {
            total: amount,
            to_beneficiary,
            to_treasury: amount - to_beneficiary,
        }
    }
}

/// Record of an applied token-authority event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_hash: String,
    pub address: Address,
    #[serde(with = "delta_serde")]
    pub delta: i128,
    pub applied_at: Timestamp,
}

/// Result of `on_transfer_confirmed`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Applied { account: Account, receipt: TransferReceipt },
    /// Already processed; nothing changed
    Duplicate { receipt: TransferReceipt },
}

/// Owner of all account state
pub struct AccountLedger {
    accounts: DashMap<Address, Arc<RwLock<Account>>>,
    processed_transfers: DashMap<String, TransferReceipt>,
    treasury: Mutex<Amount>,
    params: Arc<LedgerParams>,
}

impl AccountLedger {
    pub fn new(params: Arc<LedgerParams>) -> Self {
        Self {
            accounts: DashMap::new(),
            processed_transfers: DashMap::new(),
            treasury: Mutex::new(0),
            params,
        }
    }

    /// Apply a confirmed on-chain transfer to the wallet balance, once per tx hash
    pub fn on_transfer_confirmed(
        &self,
        tx_hash: &str,
        address: &Address,
        delta: i128,
        now: Timestamp,
    ) -> Result<TransferOutcome> {
        let tx_hash = tx_hash.trim();
        if tx_hash.is_empty() {
            return Err(LedgerError::InvalidTransfer("tx_hash must not be empty".into()));
        }
        if delta == 0 {
            return Err(LedgerError::InvalidTransfer("delta must be non-zero".into()));
        }

        // The entry guard is held until the event is applied, so concurrent
        // redelivery of the same hash waits and then sees it as a duplicate.
        match self.processed_transfers.entry(tx_hash.to_string()) {
            Entry::Occupied(existing) => {
                tracing::warn!(tx_hash, "Duplicate transfer event ignored");
                Ok(TransferOutcome::Duplicate {
                    receipt: existing.get().clone(),
                })
            }
            Entry::Vacant(slot) => {
                let cell = self
                    .accounts
                    .entry(address.clone())
                    .or_insert_with(|| Arc::new(RwLock::new(Account::new(address.clone()))))
                    .clone();
                let mut account = write_within(&cell, self.params.lock_timeout(), || {
                    format!("account {}", address)
                })?;

                let magnitude = delta.unsigned_abs();
                if delta > 0 {
                    account.credit_wallet(magnitude)?;
                } else {
                    account.debit_wallet(magnitude)?;
                }

                let receipt = TransferReceipt {
                    tx_hash: tx_hash.to_string(),
                    address: address.clone(),
                    delta,
                    applied_at: now,
                };
                slot.insert(receipt.clone());

                tracing::info!(tx_hash, %address, delta = %delta, "Applied transfer");
                Ok(TransferOutcome::Applied {
                    account: account.clone(),
                    receipt,
                })
            }
        }
    }

    /// Move tokens from the wallet into the vault
    pub fn deposit(&self, address: &Address, amount: Amount, now: Timestamp) -> Result<Account> {
        let min_stake = self.params.min_stake;
        let account = self.with_account(address, |account| {
            account.deposit(amount, min_stake, now)?;
            Ok(account.clone())
        })?;
        tracing::info!(%address, amount = %amount, total = %account.total_staked, "Deposited stake");
        Ok(account)
    }

    /// Move available stake back to the wallet
    pub fn withdraw(&self, address: &Address, amount: Amount) -> Result<Account> {
        let min_stake = self.params.min_stake;
        let account = self.with_account(address, |account| {
            account.withdraw(amount, min_stake)?;
            Ok(account.clone())
        })?;
        tracing::info!(%address, amount = %amount, total = %account.total_staked, "Withdrew stake");
        Ok(account)
    }

    /// `available -> reserved`
    pub fn reserve(&self, address: &Address, amount: Amount) -> Result<Account> {
        self.with_account(address, |account| {
            account.reserve(amount)?;
            Ok(account.clone())
        })
    }

    /// `reserved -> available`; panics if `amount` exceeds `reserved`
    pub fn release(&self, address: &Address, amount: Amount) -> Result<Account> {
        self.with_account(address, |account| {
            account.release(amount);
            self.settle(account);
            Ok(account.clone())
        })
    }

    /// Forfeit reserved stake, optionally crediting a share to a beneficiary
    pub fn slash(
        &self,
        address: &Address,
        amount: Amount,
        beneficiary: Option<&Address>,
        share_bps: u32,
        now: Timestamp,
    ) -> Result<SlashSplit> {
        if share_bps > BPS_DENOMINATOR {
            return Err(LedgerError::InvalidAmount(format!("share of {} bps exceeds 100%", share_bps)));
        }
        match beneficiary {
            Some(beneficiary) if beneficiary != address => {
                self.with_pair(address, beneficiary, |loser, winner| {
                    Ok(self.apply_slash(loser, Some(winner), amount, share_bps, now))
                })
            }
            _ => self.with_account(address, |loser| Ok(self.apply_slash(loser, None, amount, 0, now))),
        }
    }

    /// Stake meets the minimum and is old enough to earn rewards
    pub fn is_eligible_staker(&self, address: &Address, now: Timestamp) -> Result<bool> {
        Ok(self.account(address)?.is_eligible(&self.params, now))
    }

    pub fn account(&self, address: &Address) -> Result<Account> {
        let cell = self.cell(address)?;
        let account = read_within(&cell, self.params.lock_timeout(), || format!("account {}", address))?;
        Ok(account.clone())
    }

    /// Consistent per-account copies of every account, sorted by address
    pub fn snapshot(&self) -> Result<Vec<Account>> {
        let cells: Vec<_> = self.accounts.iter().map(|entry| entry.value().clone()).collect();
        let mut accounts = Vec::with_capacity(cells.len());
        for cell in cells {
            let account = read_within(&cell, self.params.lock_timeout(), || "account snapshot".to_string())?;
            accounts.push(account.clone());
        }
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(accounts)
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Slashed tokens not paid to a winning party
    pub fn treasury(&self) -> Amount {
        *self.treasury.lock()
    }

    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    pub(crate) fn cell(&self, address: &Address) -> Result<Arc<RwLock<Account>>> {
        self.accounts
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::not_found("account", address))
    }

    /// Run `f` under the account's write lock
    pub(crate) fn with_account<R>(
        &self,
        address: &Address,
        f: impl FnOnce(&mut Account) -> Result<R>,
    ) -> Result<R> {
        let cell = self.cell(address)?;
        let mut account = write_within(&cell, self.params.lock_timeout(), || format!("account {}", address))?;
        let result = f(&mut account);
        account.assert_consistent();
        result
    }

    /// Run `f` under both accounts' write locks, taken in address order.
    ///
    /// Panics if both addresses are the same.
    pub(crate) fn with_pair<R>(
        &self,
        first: &Address,
        second: &Address,
        f: impl FnOnce(&mut Account, &mut Account) -> Result<R>,
    ) -> Result<R> {
        assert_ne!(first, second, "with_pair needs two distinct accounts");
        let first_cell = self.cell(first)?;
        let second_cell = self.cell(second)?;
        let timeout = self.params.lock_timeout();

        let (low, high) = if first < second {
            (&first_cell, &second_cell)
        } else {
            (&second_cell, &first_cell)
        };
        let mut low_guard = write_within(low, timeout, || format!("account {}", first.min(second)))?;
        let mut high_guard = write_within(high, timeout, || format!("account {}", first.max(second)))?;

        let result = if first < second {
            f(&mut low_guard, &mut high_guard)
        } else {
            f(&mut high_guard, &mut low_guard)
        };
        low_guard.assert_consistent();
        high_guard.assert_consistent();
        result
    }

    /// Forfeit `amount` of the loser's reserved stake with both accounts
    /// already locked by the caller
    pub(crate) fn apply_slash(
        &self,
        loser: &mut Account,
        beneficiary: Option<&mut Account>,
        amount: Amount,
        share_bps: u32,
        now: Timestamp,
    ) -> SlashSplit {
        loser.forfeit(amount);
        let split = match beneficiary {
            Some(winner) => {
                let split = SlashSplit::from_slashed(amount, share_bps);
                winner.credit_stake(split.to_beneficiary, now);
                self.settle(winner);
                split
            }
            None => SlashSplit::from_slashed(amount, 0),
        };
        self.settle(loser);
        *self.treasury.lock() += split.to_treasury;

        tracing::info!(
            address = %loser.address,
            amount = %amount,
            to_beneficiary = %split.to_beneficiary,
            to_treasury = %split.to_treasury,
            "Slashed stake"
        );
        split
    }

    /// Apply the forced exit to an account the caller holds locked
    pub(crate) fn settle(&self, account: &mut Account) {
        let swept = account.settle_below_minimum(self.params.min_stake);
        if swept > 0 {
            tracing::warn!(
                address = %account.address,
                swept = %swept,
                remaining_reserved = %account.reserved,
                "Stake fell below minimum, returned available balance to wallet"
            );
        }
    }
}
