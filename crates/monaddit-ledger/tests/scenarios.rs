//! End-to-end ledger scenarios
//!
//! Drives the `Ledger` facade with a manual clock through the stake,
//! publish, challenge and withdraw flows.

use monaddit_ledger::{
    Address, BondState, ChallengeOutcome, ChallengeStatus, ContentKind, ContentStatus, Ledger, LedgerError,
    LedgerParams, ManualClock, NewContent, CHALLENGE_BOND, MIN_STAKE, ONE_MDT, POST_BOND, STAKE_AGE_REQUIREMENT_SECS,
    UNLOCK_WINDOW_SECS,
};
use std::sync::Arc;

const START: i64 = 1_700_000_000;

fn addr(byte: u8) -> Address {
    Address::from_bytes([byte; 20])
}

fn ledger() -> (Ledger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let ledger = Ledger::in_memory(LedgerParams::default(), clock.clone()).unwrap();
    (ledger, clock)
}

fn fund(ledger: &Ledger, who: &Address, mdt: u128) {
    let tx = format!("0xfund{}{}", who, mdt);
    ledger.on_transfer_confirmed(&tx, who, (mdt * ONE_MDT) as i128).unwrap();
}

fn publish(ledger: &Ledger, author: &Address, title: &str) -> monaddit_ledger::ContentRecord {
    ledger
        .create_content(NewContent {
            author: author.clone(),
            kind: ContentKind::Post,
            parent_id: None,
            community_id: Some("general".into()),
            title: title.into(),
            body: format!("{} body", title),
        })
        .unwrap()
}

mod staking {
    use super::*;

    #[test]
    fn test_first_deposit_and_eligibility() {
        let (ledger, clock) = ledger();
        let alice = addr(1);
        fund(&ledger, &alice, 100);

        let account = ledger.deposit(&alice, 10 * ONE_MDT).unwrap();
        assert_eq!(account.total_staked, 10 * ONE_MDT);
        assert_eq!(account.available, 10 * ONE_MDT);
        assert_eq!(account.reserved, 0);
        assert_eq!(account.wallet_balance, 90 * ONE_MDT);

        assert!(!ledger.is_eligible_staker(&alice).unwrap());
        clock.advance(STAKE_AGE_REQUIREMENT_SECS - 1);
        assert!(!ledger.is_eligible_staker(&alice).unwrap());
        clock.advance(1);
        assert!(ledger.is_eligible_staker(&alice).unwrap());
    }

    #[test]
    fn test_deposit_then_withdraw_round_trip() {
        let (ledger, _) = ledger();
        let alice = addr(1);
        fund(&ledger, &alice, 100);
        let before = ledger.account(&alice).unwrap().account;

        ledger.deposit(&alice, 25 * ONE_MDT).unwrap();
        let after = ledger.withdraw(&alice, 25 * ONE_MDT).unwrap();
        assert_eq!(after.wallet_balance, before.wallet_balance);
        assert_eq!(after.available, before.available);
        assert_eq!(after.total_staked, 0);
    }

    #[test]
    fn test_withdraw_boundaries() {
        let (ledger, _) = ledger();
        let alice = addr(1);
        fund(&ledger, &alice, 100);
        ledger.deposit(&alice, 10 * ONE_MDT).unwrap();

        assert!(matches!(
            ledger.withdraw(&alice, 11 * ONE_MDT),
            Err(LedgerError::InsufficientAvailableBalance { .. })
        ));
        assert!(matches!(
            ledger.withdraw(&alice, 5 * ONE_MDT),
            Err(LedgerError::BelowMinimumStake { remaining, minimum })
                if remaining == 5 * ONE_MDT && minimum == MIN_STAKE
        ));
    }

    #[test]
    fn test_unknown_account() {
        let (ledger, _) = ledger();
        let err = ledger.deposit(&addr(7), ONE_MDT).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}

mod bonds {
    use super::*;

    #[test]
    fn test_bond_unlocks_after_window() {
        let (ledger, clock) = ledger();
        let alice = addr(1);
        fund(&ledger, &alice, 100);
        ledger.deposit(&alice, 10 * ONE_MDT).unwrap();
        clock.advance(STAKE_AGE_REQUIREMENT_SECS);
        assert!(ledger.is_eligible_staker(&alice).unwrap());

        // Tie up everything except one bond's worth
        ledger.accounts().reserve(&alice, 10 * ONE_MDT - POST_BOND).unwrap();
        assert_eq!(ledger.account(&alice).unwrap().account.available, POST_BOND);

        let record = publish(&ledger, &alice, "hello");
        let bond = ledger.lock_bond(&alice, &record.id, Some(POST_BOND)).unwrap();
        let account = ledger.account(&alice).unwrap().account;
        assert_eq!(account.available, 0);
        assert_eq!(account.reserved, 10 * ONE_MDT);
        assert_eq!(bond.state, BondState::Locked);

        clock.advance(UNLOCK_WINDOW_SECS);
        assert_eq!(ledger.check_unlock(bond.bond_id).unwrap().state, BondState::Withdrawable);

        let withdrawn = ledger.withdraw_bond(bond.bond_id, &alice).unwrap();
        assert_eq!(withdrawn.state, BondState::Withdrawn);
        let account = ledger.account(&alice).unwrap().account;
        assert_eq!(account.available, POST_BOND);
        assert_eq!(account.reserved, 10 * ONE_MDT - POST_BOND);
    }

    #[test]
    fn test_duplicate_bond_rejected() {
        let (ledger, _) = ledger();
        let alice = addr(1);
        fund(&ledger, &alice, 100);
        ledger.deposit(&alice, 10 * ONE_MDT).unwrap();

        let record = publish(&ledger, &alice, "once");
        ledger.lock_bond(&alice, &record.id, None).unwrap();
        assert!(matches!(
            ledger.lock_bond(&alice, &record.id, None),
            Err(LedgerError::DuplicateContent(_))
        ));
    }
}

mod disputes {
    use super::*;

    struct World {
        ledger: Ledger,
        clock: Arc<ManualClock>,
        alice: Address,
        bob: Address,
        bond_id: u64,
        content_id: monaddit_ledger::ContentId,
    }

    fn world() -> World {
        let (ledger, clock) = ledger();
        let (alice, bob) = (addr(1), addr(2));
        for who in [&alice, &bob] {
            fund(&ledger, who, 100);
            ledger.deposit(who, 20 * ONE_MDT).unwrap();
        }
        let record = publish(&ledger, &alice, "contested");
        let bond_id = ledger.lock_bond(&alice, &record.id, None).unwrap().bond_id;
        World {
            ledger,
            clock,
            alice,
            bob,
            bond_id,
            content_id: record.id,
        }
    }

    #[test]
    fn test_open_challenge_blocks_unlock() {
        let w = world();
        w.clock.advance(UNLOCK_WINDOW_SECS / 2);
        let challenge = w
            .ledger
            .open_challenge(&w.bob, w.bond_id, Some(CHALLENGE_BOND), "misleading")
            .unwrap();
        assert_eq!(challenge.status, ChallengeStatus::Open);
        assert_eq!(w.ledger.bond(w.bond_id).unwrap().state, BondState::Challenged);

        w.clock.advance(UNLOCK_WINDOW_SECS);
        assert_eq!(w.ledger.check_unlock(w.bond_id).unwrap().state, BondState::Challenged);
        assert!(matches!(
            w.ledger.withdraw_bond(w.bond_id, &w.alice),
            Err(LedgerError::NotWithdrawable { state: BondState::Challenged, .. })
        ));
    }

    #[test]
    fn test_challenger_wins() {
        let w = world();
        let challenge = w.ledger.open_challenge(&w.bob, w.bond_id, None, "plagiarism").unwrap();
        let resolution = w
            .ledger
            .resolve(challenge.challenge_id, ChallengeOutcome::ForChallenger)
            .unwrap();

        assert_eq!(resolution.bond.state, BondState::Slashed);
        assert_eq!(resolution.challenge.outcome, Some(ChallengeOutcome::ForChallenger));

        let alice = w.ledger.account(&w.alice).unwrap().account;
        assert_eq!(alice.slashed, POST_BOND);
        assert_eq!(alice.reserved, 0);

        let bob = w.ledger.account(&w.bob).unwrap().account;
        assert_eq!(bob.reserved, 0);
        assert_eq!(bob.available, 20 * ONE_MDT + POST_BOND / 2);
        assert_eq!(w.ledger.content(&w.content_id).unwrap().status, ContentStatus::Slashed);

        w.clock.advance(UNLOCK_WINDOW_SECS);
        assert!(matches!(
            w.ledger.withdraw_bond(w.bond_id, &w.alice),
            Err(LedgerError::NotWithdrawable { state: BondState::Slashed, .. })
        ));
        assert!(matches!(
            w.ledger.resolve(challenge.challenge_id, ChallengeOutcome::ForDefendant),
            Err(LedgerError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_defendant_wins_and_keeps_countdown() {
        let w = world();
        w.clock.advance(UNLOCK_WINDOW_SECS - 10);
        let challenge = w.ledger.open_challenge(&w.bob, w.bond_id, None, "spam?").unwrap();
        w.ledger
            .resolve(challenge.challenge_id, ChallengeOutcome::ForDefendant)
            .unwrap();

        let bob = w.ledger.account(&w.bob).unwrap().account;
        assert_eq!(bob.slashed, CHALLENGE_BOND);
        assert_eq!(w.ledger.content(&w.content_id).unwrap().status, ContentStatus::Published);

        w.clock.advance(10);
        assert_eq!(w.ledger.check_unlock(w.bond_id).unwrap().state, BondState::Withdrawable);
        w.ledger.withdraw_bond(w.bond_id, &w.alice).unwrap();

        let alice = w.ledger.account(&w.alice).unwrap().account;
        assert_eq!(alice.reserved, 0);
        assert_eq!(alice.available, 20 * ONE_MDT + CHALLENGE_BOND / 2);
    }

    #[test]
    fn test_second_challenge_rejected() {
        let w = world();
        let carol = addr(3);
        fund(&w.ledger, &carol, 100);
        w.ledger.deposit(&carol, 10 * ONE_MDT).unwrap();

        w.ledger.open_challenge(&w.bob, w.bond_id, None, "first").unwrap();
        assert!(matches!(
            w.ledger.open_challenge(&carol, w.bond_id, None, "second"),
            Err(LedgerError::BondNotChallengeable { .. })
        ));
        assert_eq!(w.ledger.account(&carol).unwrap().account.reserved, 0);
    }

    #[test]
    fn test_stats_track_treasury() {
        let w = world();
        let challenge = w.ledger.open_challenge(&w.bob, w.bond_id, None, "bad").unwrap();
        w.ledger
            .resolve(challenge.challenge_id, ChallengeOutcome::ForChallenger)
            .unwrap();

        let stats = w.ledger.stats().unwrap();
        assert_eq!(stats.treasury, POST_BOND / 2);
        assert_eq!(stats.slashed_bonds, 1);
        assert_eq!(stats.active_bonds, 0);
        assert_eq!(stats.open_challenges, 0);
        assert_eq!(stats.total_slashed, POST_BOND);
    }
}

mod rewards {
    use super::*;

    #[test]
    fn test_weekly_accrual_and_claim() {
        let (ledger, clock) = ledger();
        let (alice, bob) = (addr(1), addr(2));
        fund(&ledger, &alice, 100);
        fund(&ledger, &bob, 100);
        ledger.deposit(&alice, 10 * ONE_MDT).unwrap();
        ledger.deposit(&bob, 30 * ONE_MDT).unwrap();

        clock.advance(STAKE_AGE_REQUIREMENT_SECS);
        let accrual = ledger.accrue_epoch().unwrap();
        assert_eq!(accrual.recipients.len(), 2);
        assert!(matches!(ledger.accrue_epoch(), Err(LedgerError::StaleEpoch { .. })));

        let claim = ledger.claim(&bob).unwrap();
        assert_eq!(claim.claimed, accrual.pool * 3 / 4);
        assert_eq!(claim.account.wallet_balance, 70 * ONE_MDT + claim.claimed);
        assert!(matches!(ledger.claim(&bob), Err(LedgerError::NothingToClaim(_))));
    }
}
