//! Integration tests for the currency network.
//!
//! These walk whole scenarios through the public API: mutual credit,
//! multi-hop payments and their atomicity, consent-gated changes, interest
//! over time, closing trustlines, debts and onboarding, export and restore,
//! and concurrent payers.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use trustline_contracts::{
    ConsentAction, CurrencyNetwork, LedgerError, NetworkEvent, Onboarder, SignedConsent,
    TrustlineTerms,
};
use trustline_protocol::clock::ManualClock;
use trustline_protocol::config::{FeeBasis, FeePolicy, NetworkConfig, SECONDS_PER_YEAR};
use trustline_protocol::crypto::Keypair;
use trustline_protocol::identity::ParticipantId;
use trustline_protocol::storage::{MemoryStore, TrustlineStatus, TrustlineStore};

const T0: u64 = 1_700_000_000;

struct Fixture {
    net: CurrencyNetwork,
    clock: Arc<ManualClock>,
}

fn fixture_with(config: NetworkConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new(T0));
    let net = CurrencyNetwork::new(config, clock.clone()).unwrap();
    Fixture { net, clock }
}

fn fixture(fees: FeePolicy) -> Fixture {
    fixture_with(NetworkConfig {
        fees,
        ..NetworkConfig::default()
    })
}

fn key(label: &str) -> Keypair {
    Keypair::from_label(label)
}

fn id(label: &str) -> ParticipantId {
    key(label).participant_id()
}

/// `x` extends `given` to `y`, `y` extends `received` to `x`.
fn mutual(net: &CurrencyNetwork, x: &ParticipantId, y: &ParticipantId, given: u64, received: u64) {
    net.open_trustline(x, y, given, 0).unwrap();
    net.update_credit_limit(y, x, received, given, None).unwrap();
}

fn signed(
    net: &CurrencyNetwork,
    signer: &Keypair,
    proposer: &ParticipantId,
    action: ConsentAction,
) -> SignedConsent {
    net.consent_for(&signer.participant_id(), proposer, action)
        .sign(signer)
        .unwrap()
}

fn transfer_events(net: &CurrencyNetwork) -> usize {
    net.events()
        .iter()
        .filter(|e| matches!(e.event, NetworkEvent::Transfer { .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[test]
fn single_hop_payment_with_flat_fee() -> anyhow::Result<()> {
    let Fixture { net, .. } = fixture(FeePolicy::flat(1));
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 50);

    let fee = net.transfer(&[a, b], 30, 1)?;

    assert_eq!(fee, 1);
    assert_eq!(net.get_balance(&a, &b)?, -30);
    assert_eq!(net.fee_balance(&a), -1);
    assert_eq!(net.fee_balance(&b), 1);
    assert_eq!(transfer_events(&net), 1);
    Ok(())
}

#[test]
fn payment_beyond_received_credit_fails() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 50);

    let err = net.transfer(&[a, b], 51, 0).unwrap_err();
    assert_eq!(err.hop(), Some(0));
    assert!(matches!(err.root(), LedgerError::CreditLimitExceeded { .. }));
    assert_eq!(net.get_balance(&a, &b).unwrap(), 0);

    // The other way B may owe A up to 100.
    net.transfer(&[b, a], 100, 0).unwrap();
    assert_eq!(net.get_balance(&a, &b).unwrap(), 100);
}

#[test]
fn multi_hop_payment_is_all_or_nothing() {
    let Fixture { net, .. } = fixture(FeePolicy::flat(1));
    let (a, b, c, d) = (id("alice"), id("bob"), id("carol"), id("dave"));
    mutual(&net, &a, &b, 100, 100);
    // Carol lets Bob owe her only 10.
    net.open_trustline(&c, &b, 10, 0).unwrap();
    mutual(&net, &c, &d, 100, 100);

    let err = net.transfer(&[a, b, c, d], 20, 10).unwrap_err();
    assert_eq!(err.hop(), Some(1));
    assert!(matches!(err.root(), LedgerError::CreditLimitExceeded { .. }));

    assert_eq!(net.get_balance(&a, &b).unwrap(), 0);
    assert_eq!(net.get_balance(&b, &c).unwrap(), 0);
    assert_eq!(net.get_balance(&c, &d).unwrap(), 0);
    for p in [a, b, c, d] {
        assert_eq!(net.fee_balance(&p), 0);
    }
    assert_eq!(transfer_events(&net), 0);
}

#[test]
fn multi_hop_payment_moves_every_hop_by_the_amount() {
    let Fixture { net, .. } = fixture(FeePolicy::flat(1));
    let (a, b, c) = (id("alice"), id("bob"), id("carol"));
    mutual(&net, &a, &b, 100, 100);
    mutual(&net, &b, &c, 100, 100);

    let fee = net.transfer(&[a, b, c], 40, 2).unwrap();

    assert_eq!(fee, 2);
    assert_eq!(net.get_balance(&a, &b).unwrap(), -40);
    assert_eq!(net.get_balance(&b, &c).unwrap(), -40);
    assert_eq!(net.fee_balance(&a), -2);
    assert_eq!(net.fee_balance(&b), 1);
    assert_eq!(net.fee_balance(&c), 1);
    assert_eq!(net.fee_total(), 0);
}

#[test]
fn imbalance_fees_are_waived_when_settling_debt() {
    let Fixture { net, .. } = fixture(FeePolicy {
        flat_per_hop: 0,
        capacity_imbalance_divisor: 100,
        basis: FeeBasis::ImbalanceGenerated,
    });
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 1_000, 1_000);

    // A goes into debt: 500 / 100 + 1.
    assert_eq!(net.transfer(&[a, b], 500, 10).unwrap(), 6);
    // B pays A back: that only reduces A's debt.
    assert_eq!(net.transfer(&[b, a], 500, 10).unwrap(), 0);
    assert_eq!(net.get_balance(&a, &b).unwrap(), 0);
}

#[test]
fn missing_trustline_reports_its_hop() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b, c) = (id("alice"), id("bob"), id("carol"));
    mutual(&net, &a, &b, 100, 100);

    let err = net.transfer(&[a, b, c], 10, 0).unwrap_err();
    assert_eq!(err.hop(), Some(1));
    assert_eq!(err.root(), &LedgerError::TrustlineNotFound { a: b, b: c });
}

#[test]
fn path_longer_than_max_hops_is_rejected() {
    let Fixture { net, .. } = fixture_with(NetworkConfig {
        max_hops: 2,
        ..NetworkConfig::default()
    });
    let path: Vec<ParticipantId> = ["p0", "p1", "p2", "p3"].iter().map(|l| id(l)).collect();
    for pair in path.windows(2) {
        mutual(&net, &pair[0], &pair[1], 100, 100);
    }
    assert!(matches!(
        net.transfer(&path, 1, 0),
        Err(LedgerError::InvalidPath(_))
    ));
    net.transfer(&path[..3], 1, 0).unwrap();
}

#[test]
fn payment_submitted_on_behalf_of_the_sender() {
    let Fixture { net, .. } = fixture(FeePolicy::flat(1));
    let (alice, bob) = (key("alice"), key("bob"));
    let (a, b) = (alice.participant_id(), bob.participant_id());
    mutual(&net, &a, &b, 100, 100);

    let action = ConsentAction::Transfer {
        path: vec![a, b],
        amount: 25,
        max_fee: 1,
    };
    let consent = signed(&net, &alice, &a, action.clone());
    assert_eq!(net.transfer_on_behalf(&consent).unwrap(), 1);
    assert_eq!(net.get_balance(&a, &b).unwrap(), -25);

    // The same signed payment cannot be replayed.
    assert_eq!(
        net.transfer_on_behalf(&consent).unwrap_err(),
        LedgerError::InvalidNonce {
            signer: a,
            expected: 1,
            got: 0,
        }
    );
    assert_eq!(net.get_balance(&a, &b).unwrap(), -25);

    // Bob cannot sign a payment out of Alice's account.
    let forged = signed(&net, &bob, &b, action);
    assert!(matches!(
        net.transfer_on_behalf(&forged),
        Err(LedgerError::UnauthorizedSigner { .. })
    ));
}

// ---------------------------------------------------------------------------
// Terms and consent
// ---------------------------------------------------------------------------

#[test]
fn lowering_credit_below_the_balance_fails() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 100);
    net.transfer(&[a, b], 60, 0).unwrap();

    assert_eq!(
        net.update_credit_limit(&b, &a, 50, 100, None).unwrap_err(),
        LedgerError::CreditLimitBelowBalance {
            limit: 50,
            outstanding: 60,
        }
    );
    net.update_credit_limit(&b, &a, 60, 100, None).unwrap();
    assert_eq!(net.get_terms(&b, &a).unwrap(), TrustlineTerms::credit(60, 100));
}

#[test]
fn asking_for_more_credit_needs_consent() -> anyhow::Result<()> {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let bob = key("bob");
    let (a, b) = (id("alice"), bob.participant_id());
    net.open_trustline(&a, &b, 100, 0)?;

    assert_eq!(
        net.update_credit_limit(&a, &b, 100, 50, None).unwrap_err(),
        LedgerError::ConsentRequired { from: b }
    );

    let terms = TrustlineTerms::credit(100, 50);
    let consent = signed(&net, &bob, &a, ConsentAction::UpdateTerms(terms));
    net.update_trustline(&a, &b, terms, Some(&consent))?;
    assert_eq!(net.get_terms(&b, &a)?, TrustlineTerms::credit(50, 100));
    assert_eq!(net.next_nonce(&b), 1);

    // Replaying the consent fails even for the same terms.
    assert_eq!(
        net.update_trustline(&a, &b, terms, Some(&consent)).unwrap_err(),
        LedgerError::InvalidNonce {
            signer: b,
            expected: 1,
            got: 0,
        }
    );
    Ok(())
}

#[test]
fn consent_must_cover_the_exact_terms() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let bob = key("bob");
    let (a, b) = (id("alice"), bob.participant_id());
    net.open_trustline(&a, &b, 100, 0).unwrap();

    let consent = signed(
        &net,
        &bob,
        &a,
        ConsentAction::UpdateTerms(TrustlineTerms::credit(100, 60)),
    );
    assert!(matches!(
        net.update_credit_limit(&a, &b, 100, 50, Some(&consent)),
        Err(LedgerError::ConsentMismatch(_))
    ));
    // Nothing was consumed.
    assert_eq!(net.next_nonce(&b), 0);
    assert_eq!(net.get_terms(&a, &b).unwrap(), TrustlineTerms::credit(100, 0));
}

#[test]
fn consent_from_another_network_is_rejected() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let bob = key("bob");
    let (a, b) = (id("alice"), bob.participant_id());
    net.open_trustline(&a, &b, 100, 0).unwrap();

    let terms = TrustlineTerms::credit(100, 50);
    let mut consent = net.consent_for(&b, &a, ConsentAction::UpdateTerms(terms));
    consent.network = "EUR".into();
    let consent = consent.sign(&bob).unwrap();
    assert!(matches!(
        net.update_trustline(&a, &b, terms, Some(&consent)),
        Err(LedgerError::ConsentMismatch(_))
    ));
}

#[test]
fn interest_rates_follow_the_consent_rules() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let bob = key("bob");
    let (a, b) = (id("alice"), bob.participant_id());
    net.open_trustline(&a, &b, 1_000, 100).unwrap();

    // Lowering the rate Alice charges is unilateral.
    let cheaper = TrustlineTerms {
        creditline_given: 1_000,
        interest_rate_given: 50,
        ..TrustlineTerms::default()
    };
    net.update_trustline(&a, &b, cheaper, None).unwrap();

    // Raising it again needs Bob.
    let dearer = TrustlineTerms {
        interest_rate_given: 200,
        ..cheaper
    };
    assert_eq!(
        net.update_trustline(&a, &b, dearer, None).unwrap_err(),
        LedgerError::ConsentRequired { from: b }
    );
    let consent = signed(&net, &bob, &a, ConsentAction::UpdateTerms(dearer));
    net.update_trustline(&a, &b, dearer, Some(&consent)).unwrap();
    assert_eq!(net.get_terms(&b, &a).unwrap().interest_rate_received, 200);

    let too_high = TrustlineTerms {
        interest_rate_given: 5_000,
        ..cheaper
    };
    let consent = signed(&net, &bob, &a, ConsentAction::UpdateTerms(too_high));
    assert!(matches!(
        net.update_trustline(&a, &b, too_high, Some(&consent)),
        Err(LedgerError::InterestRateTooHigh { rate: 5_000, .. })
    ));
}

// ---------------------------------------------------------------------------
// Freezing and closing
// ---------------------------------------------------------------------------

#[test]
fn frozen_trustline_blocks_payments_until_unfrozen() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let bob = key("bob");
    let (a, b) = (id("alice"), bob.participant_id());
    mutual(&net, &a, &b, 100, 100);

    let freeze = signed(&net, &bob, &a, ConsentAction::Freeze);
    net.freeze_trustline(&a, &b, &freeze).unwrap();
    assert_eq!(
        net.get_trustline(&a, &b).unwrap().status,
        TrustlineStatus::Frozen
    );

    let err = net.transfer(&[a, b], 10, 0).unwrap_err();
    assert_eq!(err.root(), &LedgerError::TrustlineFrozen);
    assert_eq!(
        net.update_credit_limit(&a, &b, 10, 100, None).unwrap_err(),
        LedgerError::TrustlineFrozen
    );

    // A freeze consent does not unfreeze.
    let wrong = signed(&net, &bob, &a, ConsentAction::Freeze);
    assert!(matches!(
        net.unfreeze_trustline(&a, &b, &wrong),
        Err(LedgerError::ConsentMismatch(_))
    ));
    let unfreeze = signed(&net, &bob, &a, ConsentAction::Unfreeze);
    net.unfreeze_trustline(&a, &b, &unfreeze).unwrap();
    net.transfer(&[a, b], 10, 0).unwrap();
}

#[test]
fn freezing_needs_the_counterpartys_signature() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let alice = key("alice");
    let (a, b) = (alice.participant_id(), id("bob"));
    mutual(&net, &a, &b, 100, 100);

    // Alice signing for herself is not Bob's consent.
    let own = signed(&net, &alice, &a, ConsentAction::Freeze);
    assert!(matches!(
        net.freeze_trustline(&a, &b, &own),
        Err(LedgerError::UnauthorizedSigner { .. })
    ));
}

#[test]
fn close_requires_a_settled_balance() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 100);
    net.transfer(&[a, b], 30, 0).unwrap();

    assert!(matches!(
        net.close_trustline(&a, &b),
        Err(LedgerError::BalanceNotZero { balance }) if balance.unsigned_abs() == 30
    ));

    net.transfer(&[b, a], 30, 0).unwrap();
    net.close_trustline(&b, &a).unwrap();

    let closed = net.get_trustline(&a, &b).unwrap();
    assert_eq!(closed.status, TrustlineStatus::Unestablished);
    assert_eq!(closed.record.creditline_ab, 0);
    assert!(net.list_counterparties(&a).is_empty());
    assert_eq!(net.users().len(), 2);

    // Closed lines can be opened again.
    net.open_trustline(&a, &b, 5, 0).unwrap();
    assert_eq!(net.list_counterparties(&b), vec![a]);
}

#[test]
fn triangular_transfer_settles_and_closes() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b, c) = (id("alice"), id("bob"), id("carol"));
    mutual(&net, &a, &b, 100, 100);
    mutual(&net, &b, &c, 100, 100);
    mutual(&net, &c, &a, 100, 100);
    net.transfer(&[a, b], 40, 0).unwrap();

    // Alice owes Bob, so the cycle must come back to her through Bob.
    assert!(matches!(
        net.close_trustline_by_triangular_transfer(&a, &b, 0, &[a, b, c, a]),
        Err(LedgerError::InvalidPath(_))
    ));
    let fee = net
        .close_trustline_by_triangular_transfer(&a, &b, 0, &[a, c, b, a])
        .unwrap();

    assert_eq!(fee, 0);
    assert_eq!(
        net.get_trustline(&a, &b).unwrap().status,
        TrustlineStatus::Unestablished
    );
    assert_eq!(net.get_balance(&a, &c).unwrap(), -40);
    assert_eq!(net.get_balance(&c, &b).unwrap(), -40);
    assert_eq!(net.list_counterparties(&a), vec![c]);
}

#[test]
fn triangular_transfer_respects_the_fee_limit() {
    let Fixture { net, .. } = fixture(FeePolicy::flat(1));
    let (a, b, c) = (id("alice"), id("bob"), id("carol"));
    mutual(&net, &a, &b, 100, 100);
    mutual(&net, &b, &c, 100, 100);
    mutual(&net, &c, &a, 100, 100);
    // Bob owes Alice: the cycle starts with Bob.
    net.transfer(&[b, a], 40, 1).unwrap();
    let path = [a, b, c, a];

    assert_eq!(
        net.close_trustline_by_triangular_transfer(&a, &b, 2, &path)
            .unwrap_err(),
        LedgerError::FeeExceedsLimit { fee: 3, max_fee: 2 }
    );
    assert_eq!(net.get_balance(&a, &b).unwrap(), 40);

    assert_eq!(
        net.close_trustline_by_triangular_transfer(&a, &b, 3, &path)
            .unwrap(),
        3
    );
    assert_eq!(net.get_balance(&a, &b).unwrap(), 0);
    assert_eq!(net.fee_total(), 0);
}

// ---------------------------------------------------------------------------
// Interest
// ---------------------------------------------------------------------------

#[test]
fn interest_accrues_lazily_and_is_applied_on_demand() {
    let Fixture { net, clock } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    // Alice lends to Bob at 10% a year.
    net.open_trustline(&a, &b, 2_000_000, 1_000).unwrap();
    net.transfer(&[b, a], 1_000_000, 0).unwrap();

    clock.advance(SECONDS_PER_YEAR);

    assert_eq!(net.get_balance(&a, &b).unwrap(), 1_000_000);
    assert_eq!(net.get_balance_with_interest(&a, &b).unwrap(), 1_105_170);
    assert_eq!(net.get_balance_with_interest(&b, &a).unwrap(), -1_105_170);

    assert_eq!(net.apply_interests(&b, &a).unwrap(), -105_170);
    assert_eq!(net.get_balance(&a, &b).unwrap(), 1_105_170);
    // Nothing more is due right after applying.
    assert_eq!(net.apply_interests(&a, &b).unwrap(), 0);
}

#[test]
fn interest_is_folded_in_before_a_payment() {
    let Fixture { net, clock } = fixture_with(NetworkConfig {
        interests: trustline_protocol::config::InterestPolicy {
            model: trustline_protocol::config::InterestModel::Simple,
            ..Default::default()
        },
        ..NetworkConfig::default()
    });
    let (a, b) = (id("alice"), id("bob"));
    net.open_trustline(&a, &b, 2_000_000, 1_000).unwrap();
    net.transfer(&[b, a], 1_000_000, 0).unwrap();

    clock.advance(SECONDS_PER_YEAR);
    net.transfer(&[b, a], 1, 0).unwrap();
    assert_eq!(net.get_balance(&a, &b).unwrap(), 1_100_001);
}

#[test]
fn interest_cannot_push_debt_past_the_limit() {
    let Fixture { net, clock } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    net.open_trustline(&a, &b, 1_000_000, 1_000).unwrap();
    net.transfer(&[b, a], 1_000_000, 0).unwrap();
    clock.advance(SECONDS_PER_YEAR);

    assert!(matches!(
        net.apply_interests(&a, &b),
        Err(LedgerError::CreditLimitExceeded { .. })
    ));
    assert_eq!(net.get_balance(&a, &b).unwrap(), 1_000_000);
}

#[test]
fn clock_far_in_the_past_is_an_error() {
    let Fixture { net, clock } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 100);
    net.transfer(&[a, b], 10, 0).unwrap();

    clock.set(T0 - 30);
    net.transfer(&[a, b], 10, 0).unwrap();

    clock.set(T0 - 3_600);
    let err = net.transfer(&[a, b], 10, 0).unwrap_err();
    assert!(matches!(err.root(), LedgerError::ClockWentBackwards { .. }));
}

// ---------------------------------------------------------------------------
// Debts and onboarding
// ---------------------------------------------------------------------------

/// debtor -> p1 -> p2 -> creditor, each hop with room for the debtor's side
/// to pay.
fn debt_network() -> (Fixture, [ParticipantId; 4]) {
    let fx = fixture(FeePolicy::flat(1));
    let people = [id("debtor"), id("p1"), id("p2"), id("creditor")];
    mutual(&fx.net, &people[0], &people[1], 100, 150);
    mutual(&fx.net, &people[1], &people[2], 200, 250);
    mutual(&fx.net, &people[2], &people[3], 300, 350);
    (fx, people)
}

fn debt_updates(net: &CurrencyNetwork) -> Vec<(ParticipantId, ParticipantId, i128)> {
    net.events()
        .into_iter()
        .filter_map(|e| match e.event {
            NetworkEvent::DebtUpdated {
                debtor,
                creditor,
                debt,
            } => Some((debtor, creditor, debt)),
            _ => None,
        })
        .collect()
}

#[test]
fn debts_are_recorded_from_both_sides() -> anyhow::Result<()> {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (x, y) = (id("alice"), id("bob"));

    assert_eq!(net.increase_debt(&x, &y, 123)?, 123);
    assert_eq!(net.get_debt(&x, &y)?, 123);
    assert_eq!(net.get_debt(&y, &x)?, -123);

    // Debts of a pair net out.
    assert_eq!(net.increase_debt(&y, &x, 23)?, -100);
    assert_eq!(net.get_debt(&x, &y)?, 100);
    assert_eq!(debt_updates(&net), vec![(x, y, 123), (y, x, -100)]);

    assert_eq!(net.increase_debt(&x, &y, 0).unwrap_err(), LedgerError::InvalidAmount);
    assert_eq!(net.increase_debt(&x, &x, 1).unwrap_err(), LedgerError::SelfTrustline(x));
    assert_eq!(debt_updates(&net).len(), 2);
    Ok(())
}

#[test]
fn debit_transfer_pays_down_the_debt() -> anyhow::Result<()> {
    let (Fixture { net, .. }, [debtor, p1, p2, creditor]) = debt_network();
    net.increase_debt(&debtor, &creditor, 51)?;
    let path = [debtor, p1, p2, creditor];

    let fee = net.debit_transfer(&creditor, 51, 3, &path)?;

    assert_eq!(fee, 3);
    assert_eq!(net.get_debt(&debtor, &creditor)?, 0);
    assert_eq!(net.get_balance(&debtor, &p1)?, -51);
    assert_eq!(net.get_balance(&creditor, &p2)?, 51);
    // The creditor pulled the payment, so it pays the fees and earns the
    // last hop's.
    assert_eq!(net.fee_balance(&debtor), 0);
    assert_eq!(net.fee_balance(&creditor), -2);
    assert_eq!(net.fee_total(), 0);

    assert_eq!(debt_updates(&net).last(), Some(&(debtor, creditor, 0)));
    let transfer = net.events().into_iter().find_map(|e| match e.event {
        NetworkEvent::Transfer {
            path,
            amount,
            fee_payer,
            ..
        } => Some((path, amount, fee_payer)),
        _ => None,
    });
    assert_eq!(transfer, Some((path.to_vec(), 51, creditor)));
    Ok(())
}

#[test]
fn partial_debit_leaves_the_rest_owed() -> anyhow::Result<()> {
    let (Fixture { net, .. }, [debtor, p1, p2, creditor]) = debt_network();
    net.increase_debt(&debtor, &creditor, 51)?;

    net.debit_transfer(&creditor, 25, 3, &[debtor, p1, p2, creditor])?;

    assert_eq!(net.get_debt(&debtor, &creditor)?, 26);
    assert_eq!(net.get_balance(&debtor, &p1)?, -25);
    assert_eq!(net.get_balance(&creditor, &p2)?, 25);
    Ok(())
}

#[test]
fn failed_debit_transfer_changes_nothing() {
    let (Fixture { net, .. }, [debtor, p1, p2, creditor]) = debt_network();
    net.increase_debt(&debtor, &creditor, 51).unwrap();
    let path = [debtor, p1, p2, creditor];

    assert_eq!(
        net.debit_transfer(&creditor, 52, 3, &path).unwrap_err(),
        LedgerError::DebitExceedsDebt { value: 52, debt: 51 }
    );
    assert_eq!(
        net.debit_transfer(&creditor, 51, 2, &path).unwrap_err(),
        LedgerError::FeeExceedsLimit { fee: 3, max_fee: 2 }
    );
    // The debtor has no claim on its creditor.
    assert_eq!(
        net.debit_transfer(&debtor, 1, 3, &[creditor, p2, p1, debtor])
            .unwrap_err(),
        LedgerError::DebitExceedsDebt { value: 1, debt: -51 }
    );
    assert!(matches!(
        net.debit_transfer(&creditor, 10, 3, &[debtor, p1, p2]),
        Err(LedgerError::InvalidPath(_))
    ));

    assert_eq!(net.get_debt(&debtor, &creditor).unwrap(), 51);
    assert_eq!(net.get_balance(&debtor, &p1).unwrap(), 0);
    assert_eq!(net.get_balance(&creditor, &p2).unwrap(), 0);
    assert_eq!(net.fee_balance(&creditor), 0);
    assert_eq!(transfer_events(&net), 0);
    assert_eq!(debt_updates(&net).len(), 1);
}

#[test]
fn first_trustline_onboards_newcomers() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b, c, d) = (id("alice"), id("bob"), id("carol"), id("dave"));

    mutual(&net, &a, &b, 1, 1);
    assert_eq!(net.onboarder(&a), Some(Onboarder::Nobody));
    assert_eq!(net.onboarder(&b), Some(Onboarder::Nobody));

    mutual(&net, &b, &c, 1, 1);
    assert_eq!(net.onboarder(&c), Some(Onboarder::By(b)));
    assert_eq!(net.onboarder(&b), Some(Onboarder::Nobody));

    // Onboarders are never rewritten.
    mutual(&net, &c, &d, 1, 1);
    assert_eq!(net.onboarder(&c), Some(Onboarder::By(b)));
    assert_eq!(net.onboarder(&d), Some(Onboarder::By(c)));

    let onboardings: Vec<_> = net
        .events()
        .into_iter()
        .filter_map(|e| match e.event {
            NetworkEvent::Onboarded {
                onboardee,
                onboarder,
            } => Some((onboardee, onboarder)),
            _ => None,
        })
        .collect();
    assert_eq!(onboardings.len(), 4);
    assert!(onboardings.contains(&(d, Onboarder::By(c))));
}

#[test]
fn rejected_or_repeated_trustlines_onboard_nobody() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b, c) = (id("alice"), id("bob"), id("carol"));
    mutual(&net, &a, &b, 1, 1);

    assert_eq!(net.open_trustline(&a, &c, 0, 0).unwrap_err(), LedgerError::ZeroCreditLimit);
    assert_eq!(
        net.update_credit_limit(&a, &c, 0, 0, None).unwrap_err(),
        LedgerError::ZeroCreditLimit
    );
    assert_eq!(net.onboarder(&c), None);

    net.close_trustline(&a, &b).unwrap();
    net.open_trustline(&b, &a, 5, 0).unwrap();
    assert_eq!(net.onboarder(&a), Some(Onboarder::Nobody));
    let onboardings = net
        .events()
        .iter()
        .filter(|e| matches!(e.event, NetworkEvent::Onboarded { .. }))
        .count();
    assert_eq!(onboardings, 2);
}

// ---------------------------------------------------------------------------
// Network lifecycle and persistence
// ---------------------------------------------------------------------------

#[test]
fn expired_network_can_be_frozen_for_good() {
    let Fixture { net, clock } = fixture_with(NetworkConfig {
        expiration_time: Some(T0 + 1_000),
        ..NetworkConfig::default()
    });
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 100);

    assert_eq!(
        net.freeze_network().unwrap_err(),
        LedgerError::NetworkNotExpired {
            expiration_time: Some(T0 + 1_000),
            now: T0,
        }
    );
    clock.advance(1_000);
    net.freeze_network().unwrap();

    assert_eq!(net.transfer(&[a, b], 1, 0).unwrap_err(), LedgerError::NetworkFrozen);
    assert_eq!(net.close_trustline(&a, &b).unwrap_err(), LedgerError::NetworkFrozen);
    assert_eq!(net.get_balance(&a, &b).unwrap(), 0);
}

#[test]
fn network_without_expiration_never_freezes() {
    let Fixture { net, clock } = fixture(FeePolicy::FREE);
    clock.advance(100 * SECONDS_PER_YEAR);
    assert!(matches!(
        net.freeze_network(),
        Err(LedgerError::NetworkNotExpired {
            expiration_time: None,
            ..
        })
    ));
    assert!(!net.is_network_frozen());
}

#[test]
fn export_and_restore_through_a_store() -> anyhow::Result<()> {
    let Fixture { net, clock } = fixture(FeePolicy::flat(1));
    let (a, b, c) = (id("alice"), id("bob"), id("carol"));
    mutual(&net, &a, &b, 100, 100);
    mutual(&net, &b, &c, 100, 100);
    net.open_trustline(&a, &c, 10, 0)?;
    net.close_trustline(&c, &a)?;
    net.transfer(&[a, b, c], 25, 2)?;

    let store = MemoryStore::new();
    assert_eq!(net.save_to(&store)?, 3);
    assert_eq!(store.load_all()?.len(), 3);

    let restored = CurrencyNetwork::load_from(net.config().clone(), clock.clone(), &store)?;
    assert_eq!(restored.export_trustlines(), net.export_trustlines());
    assert_eq!(restored.get_balance(&a, &b)?, -25);
    assert_eq!(restored.get_balance(&c, &b)?, 25);

    let mut users = restored.users();
    users.sort();
    let mut expected = vec![a, b, c];
    expected.sort();
    assert_eq!(users, expected);
    // The closed pair is known but not a counterparty relation.
    assert_eq!(restored.list_counterparties(&a), vec![b]);

    // The restored network keeps working.
    restored.transfer(&[c, b, a], 25, 2)?;
    assert_eq!(restored.get_balance(&a, &b)?, 0);
    Ok(())
}

#[test]
fn rejected_requests_leave_no_trustline_behind() -> anyhow::Result<()> {
    let Fixture { net, clock } = fixture(FeePolicy::FREE);
    let (a, b, m) = (id("alice"), id("bob"), id("mallory"));
    mutual(&net, &a, &b, 100, 100);

    assert_eq!(net.open_trustline(&a, &m, 0, 0).unwrap_err(), LedgerError::ZeroCreditLimit);
    assert!(matches!(
        net.update_credit_limit(&m, &b, 0, 5, None),
        Err(LedgerError::ConsentRequired { .. })
    ));

    assert!(net.get_trustline(&a, &m).is_none());
    assert!(net.get_trustline(&m, &b).is_none());
    assert!(matches!(
        net.get_balance(&a, &m),
        Err(LedgerError::TrustlineNotFound { .. })
    ));
    assert_eq!(net.export_trustlines().len(), 1);
    assert!(!net.users().contains(&m));

    let store = MemoryStore::new();
    assert_eq!(net.save_to(&store)?, 1);
    let restored = CurrencyNetwork::load_from(net.config().clone(), clock, &store)?;
    assert_eq!(restored.users().len(), 2);
    assert!(!restored.users().contains(&m));

    // A valid request still creates the pair afterwards.
    net.open_trustline(&a, &m, 10, 0)?;
    assert_eq!(net.export_trustlines().len(), 2);
    Ok(())
}

#[test]
fn restore_rejects_duplicate_pairs() {
    let Fixture { net, clock } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 100);
    let mut entries = net.export_trustlines();
    entries.extend(net.export_trustlines());

    assert!(matches!(
        CurrencyNetwork::restore(NetworkConfig::default(), clock, entries),
        Err(LedgerError::AlreadyEstablished { .. })
    ));
}

#[test]
fn events_record_only_committed_changes() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let (a, b) = (id("alice"), id("bob"));
    mutual(&net, &a, &b, 100, 100);
    let _ = net.transfer(&[a, b], 1_000, 0);
    net.transfer(&[a, b], 10, 0).unwrap();

    let events = net.events();
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);
    assert!(matches!(events[0].event, NetworkEvent::TrustlineOpened { .. }));
    assert!(matches!(events[1].event, NetworkEvent::TrustlineUpdated { .. }));
    assert!(matches!(events[2].event, NetworkEvent::Transfer { amount: 10, .. }));
    assert!(matches!(events[3].event, NetworkEvent::BalanceUpdated { .. }));
    assert_eq!(events.len(), 4);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn opposite_payments_on_shared_trustlines_do_not_deadlock() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let net = Arc::new(net);
    let (a, b, c) = (id("alice"), id("bob"), id("carol"));
    mutual(&net, &a, &b, 1_000, 1_000);
    mutual(&net, &b, &c, 1_000, 1_000);

    let paths = [vec![a, b, c], vec![c, b, a]];
    let handles: Vec<_> = paths
        .into_iter()
        .flat_map(|path| {
            let net = Arc::clone(&net);
            (0..2).map(move |_| {
                let net = Arc::clone(&net);
                let path = path.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        net.transfer(&path, 1, 0).unwrap();
                    }
                })
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(net.get_balance(&a, &b).unwrap(), 0);
    assert_eq!(net.get_balance(&b, &c).unwrap(), 0);
    assert_eq!(transfer_events(&net), 400);
}

#[test]
fn concurrent_opens_of_one_pair_establish_it_once() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let net = Arc::new(net);
    let (a, b) = (id("alice"), id("bob"));

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let net = Arc::clone(&net);
            thread::spawn(move || net.open_trustline(&a, &b, 10 + i, 0))
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::AlreadyEstablished { .. })));
    assert_eq!(net.export_trustlines().len(), 1);
    let opened = net
        .events()
        .iter()
        .filter(|e| matches!(e.event, NetworkEvent::TrustlineOpened { .. }))
        .count();
    assert_eq!(opened, 1);
}

#[test]
fn concurrent_payers_never_overdraw_a_trustline() {
    let Fixture { net, .. } = fixture(FeePolicy::FREE);
    let net = Arc::new(net);
    let (a, b) = (id("alice"), id("bob"));
    // Bob lets Alice owe him 150; four threads try to spend 50 each.
    net.open_trustline(&b, &a, 150, 0).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let net = Arc::clone(&net);
            thread::spawn(move || net.transfer(&[a, b], 50, 0).is_ok())
        })
        .collect();
    let succeeded = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(succeeded, 3);
    assert_eq!(net.get_balance(&a, &b).unwrap(), -150);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Random payments along a four-party chain, with fees: failed payments
    /// change nothing, balances stay inside their limits and the fee ledger
    /// always sums to zero.
    #[test]
    fn random_payments_keep_the_ledger_consistent(
        payments in prop::collection::vec((0usize..4, 0usize..4, 1u64..120), 1..40),
    ) {
        let Fixture { net, .. } = fixture(FeePolicy {
            flat_per_hop: 1,
            capacity_imbalance_divisor: 50,
            basis: FeeBasis::ImbalanceGenerated,
        });
        let people: Vec<ParticipantId> = ["p0", "p1", "p2", "p3"].iter().map(|l| id(l)).collect();
        for pair in people.windows(2) {
            mutual(&net, &pair[0], &pair[1], 200, 100);
        }

        for (from, to, amount) in payments {
            if from == to {
                continue;
            }
            let path: Vec<ParticipantId> = if from < to {
                people[from..=to].to_vec()
            } else {
                people[to..=from].iter().rev().copied().collect()
            };
            let before = net.export_trustlines();
            let fees_before: Vec<i128> = people.iter().map(|p| net.fee_balance(p)).collect();

            match net.transfer(&path, amount, u64::MAX) {
                Ok(_) => {}
                Err(_) => {
                    prop_assert_eq!(net.export_trustlines(), before);
                    let fees_after: Vec<i128> = people.iter().map(|p| net.fee_balance(p)).collect();
                    prop_assert_eq!(fees_after, fees_before);
                }
            }
            prop_assert_eq!(net.fee_total(), 0);
        }

        for line in net.export_trustlines() {
            let r = line.record;
            prop_assert!(r.balance <= i128::from(r.creditline_ab));
            prop_assert!(r.balance >= -i128::from(r.creditline_ba));
        }
    }
}
