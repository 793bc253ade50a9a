//! # Currency Network
//!
//! The coordinator. A `CurrencyNetwork` owns every trustline of one
//! currency and is the only way to change them. All methods take `&self`;
//! share it between threads with `Arc`.
//!
//! ## Payments
//!
//! A payment walks a path `[sender, hop1, ..., receiver]`. It either
//! applies to every trustline on the path or to none of them:
//!
//! 1. Validate the path and amount.
//! 2. Resolve every hop's trustline.
//! 3. Lock the distinct trustlines in canonical key order.
//! 4. Simulate every hop on copies: accrue interest, compute the hop fee,
//!    move the balance by the full amount.
//! 5. Check the total fee against the payer's limit.
//! 6. Write the copies back, post the fees, log the events.
//!
//! A debit transfer adds one step before the write: the receiver's claim on
//! the sender (see [`crate::debt`]) must cover the amount, and it shrinks by
//! it in the same commit.
//!
//! Any failure before step 6 returns with nothing changed. Step 6 cannot
//! fail.
//!
//! ## Fees
//!
//! The payer (the sender, or the receiver for receiver-pays transfers)
//! covers all hop fees. Trustline balances move by the amount paid; each
//! hop fee is a separate entry in the fee ledger, debited to the payer and
//! credited to the hop's receiving participant, whose credit the hop used.
//!
//! ## Locking
//!
//! Lock order is always: trustlines (sorted by [`TrustlineKey`]), consent
//! nonces, fee ledger, debts, participant registry (users, then onboarding),
//! event log. Signatures are recovered before the first lock is taken.
//!
//! A pair seen for the first time is worked on off the map and inserted only
//! once its first change succeeded. Rejected requests leave no trustline.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use trustline_protocol::clock::{Clock, SystemClock};
use trustline_protocol::config::NetworkConfig;
use trustline_protocol::identity::{IdentitySet, ParticipantId};
use trustline_protocol::math::{safe_neg, to_u64, SafeMath};
use trustline_protocol::storage::{StoredTrustline, TrustlineStatus, TrustlineStore};

use crate::consent::{Consent, ConsentAction, SignedConsent};
use crate::debt::DebtLedger;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventLog, NetworkEvent, RecordedEvent};
use crate::fee_ledger::{FeeLedger, FeePosting};
use crate::fees::hop_fee;
use crate::onboarding::{Onboarder, OnboardingRegistry};
use crate::trustline::{Trustline, TrustlineKey, TrustlineTerms};

/// Who covers the fees of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePayer {
    Sender,
    Receiver,
}

/// Settle-and-close request carried by a transfer plan.
#[derive(Debug, Clone, Copy)]
struct Settlement {
    key: TrustlineKey,
    proposer: ParticipantId,
    counterparty: ParticipantId,
}

struct TransferPlan<'a> {
    path: &'a [ParticipantId],
    amount: u64,
    max_fee: u64,
    fee_payer: FeePayer,
    /// Consent whose nonce the transfer consumes.
    consent: Option<&'a Consent>,
    /// Derive the amount from this pair's balance and close it afterwards.
    settlement: Option<Settlement>,
    /// Pay down the sender's debt to the receiver by the amount.
    debit: bool,
}

type SharedTrustline = Arc<Mutex<Trustline>>;

/// Ledger of all trustlines of one currency.
pub struct CurrencyNetwork {
    config: NetworkConfig,
    clock: Arc<dyn Clock>,
    trustlines: DashMap<TrustlineKey, SharedTrustline>,
    users: RwLock<IdentitySet>,
    onboarding: Mutex<OnboardingRegistry>,
    counterparties: DashMap<ParticipantId, IdentitySet>,
    nonces: Mutex<HashMap<ParticipantId, u64>>,
    fee_ledger: Mutex<FeeLedger>,
    debts: Mutex<DebtLedger>,
    events: Mutex<EventLog>,
    frozen: AtomicBool,
}

impl fmt::Debug for CurrencyNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrencyNetwork")
            .field("name", &self.config.name)
            .field("symbol", &self.config.symbol)
            .field("trustlines", &self.trustlines.len())
            .field("frozen", &self.is_network_frozen())
            .finish_non_exhaustive()
    }
}

fn rejected(op: &'static str, err: LedgerError) -> LedgerError {
    warn!(op, error = %err, "request rejected");
    err
}

/// Check that `consent` carries its signer's next nonce. Returns the nonce
/// that follows it.
fn check_nonce(nonces: &HashMap<ParticipantId, u64>, consent: &Consent) -> LedgerResult<u64> {
    let expected = nonces.get(&consent.signer).copied().unwrap_or(0);
    if consent.nonce != expected {
        return Err(LedgerError::InvalidNonce {
            signer: consent.signer,
            expected,
            got: consent.nonce,
        });
    }
    expected
        .safe_add(1)
        .map_err(|_| LedgerError::NonceExhausted {
            signer: consent.signer,
        })
}

fn consume_nonce(nonces: &mut HashMap<ParticipantId, u64>, signer: ParticipantId, next: u64) {
    nonces.insert(signer, next);
}

impl CurrencyNetwork {
    // ---- Construction ----

    /// An empty network. Fails if `config` does not validate.
    pub fn new(config: NetworkConfig, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        config
            .validate()
            .map_err(|e| LedgerError::InvalidConfig(e.to_string()))?;
        info!(
            name = %config.name,
            symbol = %config.symbol,
            max_hops = config.max_hops,
            "currency network created"
        );
        Ok(Self {
            config,
            clock,
            trustlines: DashMap::new(),
            users: RwLock::new(IdentitySet::new()),
            onboarding: Mutex::new(OnboardingRegistry::new()),
            counterparties: DashMap::new(),
            nonces: Mutex::new(HashMap::new()),
            fee_ledger: Mutex::new(FeeLedger::new()),
            debts: Mutex::new(DebtLedger::new()),
            events: Mutex::new(EventLog::new()),
            frozen: AtomicBool::new(false),
        })
    }

    /// An empty network on wall clock time.
    pub fn with_system_clock(config: NetworkConfig) -> LedgerResult<Self> {
        Self::new(config, Arc::new(SystemClock))
    }

    /// A network holding previously exported trustlines, e.g. when
    /// migrating a ledger to new terms. Users are registered in the order
    /// the entries come in. Onboarders and debts are not part of the export
    /// and start out empty.
    pub fn restore(
        config: NetworkConfig,
        clock: Arc<dyn Clock>,
        entries: impl IntoIterator<Item = StoredTrustline>,
    ) -> LedgerResult<Self> {
        let network = Self::new(config, clock)?;
        let mut restored = 0usize;
        for entry in entries {
            let line = Trustline::from_record(entry.record, entry.status)?;
            let key = line.key();
            if network.trustlines.contains_key(&key) {
                return Err(LedgerError::AlreadyEstablished {
                    a: key.a(),
                    b: key.b(),
                });
            }
            network
                .trustlines
                .insert(key, Arc::new(Mutex::new(line)));
            {
                let mut users = network.users.write();
                users.insert(key.a());
                users.insert(key.b());
            }
            if line.status() != TrustlineStatus::Unestablished {
                network.link(&key);
            }
            restored += 1;
        }
        info!(trustlines = restored, "currency network restored");
        Ok(network)
    }

    /// [`CurrencyNetwork::restore`] from everything in `store`.
    pub fn load_from(
        config: NetworkConfig,
        clock: Arc<dyn Clock>,
        store: &dyn TrustlineStore,
    ) -> LedgerResult<Self> {
        Self::restore(config, clock, store.load_all()?)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    // ---- Internals ----

    fn ensure_open(&self) -> LedgerResult<()> {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(LedgerError::NetworkFrozen);
        }
        Ok(())
    }

    /// Handle for `key` and whether it is in the map. A pair seen for the
    /// first time gets a detached zeroed trustline that only joins the map
    /// through [`Self::publish`].
    fn handle_or_detached(&self, key: TrustlineKey) -> (SharedTrustline, bool) {
        match self.existing_handle(&key) {
            Some(handle) => (handle, true),
            None => (Arc::new(Mutex::new(Trustline::new(key))), false),
        }
    }

    /// Insert a detached handle. Fails if another request created the pair
    /// in the meantime.
    fn publish(&self, key: TrustlineKey, handle: &SharedTrustline) -> bool {
        match self.trustlines.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(handle));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    fn existing_handle(&self, key: &TrustlineKey) -> Option<SharedTrustline> {
        self.trustlines.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn require_handle(&self, x: &ParticipantId, y: &ParticipantId) -> LedgerResult<SharedTrustline> {
        let key = TrustlineKey::new(*x, *y)?;
        self.existing_handle(&key)
            .ok_or(LedgerError::TrustlineNotFound { a: *x, b: *y })
    }

    /// Record both parties as users and as each other's counterparties.
    /// Returns an onboarding event for every party joining with this line.
    fn register(&self, key: &TrustlineKey) -> Vec<NetworkEvent> {
        let admitted = {
            let mut users = self.users.write();
            let admitted = self.onboarding.lock().admit(&users, key.a(), key.b());
            users.insert(key.a());
            users.insert(key.b());
            admitted
        };
        self.link(key);
        admitted
            .into_iter()
            .map(|(onboardee, onboarder)| {
                debug!(%onboardee, ?onboarder, "participant onboarded");
                NetworkEvent::Onboarded {
                    onboardee,
                    onboarder,
                }
            })
            .collect()
    }

    fn link(&self, key: &TrustlineKey) {
        self.counterparties.entry(key.a()).or_default().insert(key.b());
        self.counterparties.entry(key.b()).or_default().insert(key.a());
    }

    fn unregister_pair(&self, key: &TrustlineKey) {
        if let Some(mut set) = self.counterparties.get_mut(&key.a()) {
            set.remove(&key.b());
        }
        if let Some(mut set) = self.counterparties.get_mut(&key.b()) {
            set.remove(&key.a());
        }
    }

    fn log(&self, timestamp: u64, events: impl IntoIterator<Item = NetworkEvent>) {
        let mut log = self.events.lock();
        for event in events {
            log.append(timestamp, event);
        }
    }

    fn validate_path(&self, path: &[ParticipantId]) -> LedgerResult<()> {
        if path.len() < 2 {
            return Err(LedgerError::InvalidPath(
                "a path needs at least a sender and a receiver".into(),
            ));
        }
        let hops = path.len() - 1;
        if hops > self.config.max_hops {
            return Err(LedgerError::InvalidPath(format!(
                "{hops} hops exceed the maximum of {}",
                self.config.max_hops
            )));
        }
        if let Some(pair) = path.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(LedgerError::InvalidPath(format!(
                "{} follows itself on the path",
                pair[0]
            )));
        }
        Ok(())
    }

    // ---- Trustline lifecycle ----

    /// `proposer` extends `creditline_given` to `counterparty` at
    /// `interest_rate_given`, establishing their trustline. Unilateral.
    pub fn open_trustline(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        creditline_given: u64,
        interest_rate_given: u16,
    ) -> LedgerResult<()> {
        self.open_inner(proposer, counterparty, creditline_given, interest_rate_given)
            .map_err(|e| rejected("open_trustline", e))
    }

    fn open_inner(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        creditline_given: u64,
        interest_rate_given: u16,
    ) -> LedgerResult<()> {
        self.ensure_open()?;
        let key = TrustlineKey::new(*proposer, *counterparty)?;
        loop {
            let (handle, published) = self.handle_or_detached(key);
            let mut line = handle.lock();
            let now = self.clock.now();

            line.open(
                proposer,
                creditline_given,
                interest_rate_given,
                now,
                &self.config,
            )?;
            if !published && !self.publish(key, &handle) {
                // Lost the race to create the pair; retry on the winner's line.
                continue;
            }

            let mut events = vec![NetworkEvent::TrustlineOpened {
                proposer: *proposer,
                counterparty: *counterparty,
                creditline_given,
                interest_rate_given,
            }];
            events.extend(self.register(&key));
            self.log(now, events);
            info!(%proposer, %counterparty, creditline_given, interest_rate_given, "trustline opened");
            return Ok(());
        }
    }

    /// Set all terms of the trustline from `proposer`'s side.
    ///
    /// `consent` must be the counterparty's signed
    /// [`ConsentAction::UpdateTerms`] with exactly these terms whenever the
    /// change needs it (see [`crate::consent::requires_counterparty_consent`]).
    /// A presented consent always consumes its nonce.
    pub fn update_trustline(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        terms: TrustlineTerms,
        consent: Option<&SignedConsent>,
    ) -> LedgerResult<()> {
        self.apply_update(proposer, counterparty, consent, |_| terms)
            .map_err(|e| rejected("update_trustline", e))
    }

    /// Change only the credit limits, keeping the current interest rates.
    pub fn update_credit_limit(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        creditline_given: u64,
        creditline_received: u64,
        consent: Option<&SignedConsent>,
    ) -> LedgerResult<()> {
        self.apply_update(proposer, counterparty, consent, |current| TrustlineTerms {
            creditline_given,
            creditline_received,
            ..*current
        })
        .map_err(|e| rejected("update_credit_limit", e))
    }

    fn apply_update(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        consent: Option<&SignedConsent>,
        build: impl Fn(&TrustlineTerms) -> TrustlineTerms,
    ) -> LedgerResult<()> {
        self.ensure_open()?;
        let key = TrustlineKey::new(*proposer, *counterparty)?;
        if let Some(signed) = consent {
            signed.verify_for(&self.config.symbol, counterparty, proposer)?;
        }

        loop {
            let (handle, published) = self.handle_or_detached(key);
            let mut line = handle.lock();
            let now = self.clock.now();
            let terms = build(&line.terms_for(proposer));

            let pending_nonce = match consent {
                Some(signed) => {
                    signed.ensure_action(&ConsentAction::UpdateTerms(terms))?;
                    let nonces = self.nonces.lock();
                    let next = check_nonce(&nonces, &signed.consent)?;
                    Some((nonces, signed.consent.signer, next))
                }
                None => None,
            };

            line.update_terms(proposer, &terms, consent.is_some(), now, &self.config)?;
            if !published && !self.publish(key, &handle) {
                continue;
            }
            if let Some((mut nonces, signer, next)) = pending_nonce {
                consume_nonce(&mut nonces, signer, next);
            }

            let mut events = vec![NetworkEvent::TrustlineUpdated {
                proposer: *proposer,
                counterparty: *counterparty,
                terms,
            }];
            events.extend(self.register(&key));
            self.log(now, events);
            info!(
                %proposer,
                %counterparty,
                creditline_given = terms.creditline_given,
                creditline_received = terms.creditline_received,
                consented = consent.is_some(),
                "trustline updated"
            );
            return Ok(());
        }
    }

    /// Freeze the trustline. Needs the counterparty's signed
    /// [`ConsentAction::Freeze`].
    pub fn freeze_trustline(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        consent: &SignedConsent,
    ) -> LedgerResult<()> {
        self.apply_freeze(proposer, counterparty, consent, true)
            .map_err(|e| rejected("freeze_trustline", e))
    }

    /// Unfreeze the trustline. Needs the counterparty's signed
    /// [`ConsentAction::Unfreeze`].
    pub fn unfreeze_trustline(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        consent: &SignedConsent,
    ) -> LedgerResult<()> {
        self.apply_freeze(proposer, counterparty, consent, false)
            .map_err(|e| rejected("unfreeze_trustline", e))
    }

    fn apply_freeze(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        consent: &SignedConsent,
        freeze: bool,
    ) -> LedgerResult<()> {
        self.ensure_open()?;
        consent.verify_for(&self.config.symbol, counterparty, proposer)?;
        let action = if freeze {
            ConsentAction::Freeze
        } else {
            ConsentAction::Unfreeze
        };
        consent.ensure_action(&action)?;

        let handle = self.require_handle(proposer, counterparty)?;
        let mut line = handle.lock();
        let now = self.clock.now();
        let mut nonces = self.nonces.lock();
        let next = check_nonce(&nonces, &consent.consent)?;

        if freeze {
            line.freeze()?;
        } else {
            line.unfreeze()?;
        }
        consume_nonce(&mut nonces, consent.consent.signer, next);
        drop(nonces);

        let event = if freeze {
            NetworkEvent::TrustlineFrozen {
                proposer: *proposer,
                counterparty: *counterparty,
            }
        } else {
            NetworkEvent::TrustlineUnfrozen {
                proposer: *proposer,
                counterparty: *counterparty,
            }
        };
        self.log(now, [event]);
        info!(%proposer, %counterparty, frozen = freeze, "trustline freeze state changed");
        Ok(())
    }

    /// Close a trustline whose balance, interest included, is zero. The
    /// zeroed record stays queryable.
    pub fn close_trustline(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
    ) -> LedgerResult<()> {
        self.close_inner(proposer, counterparty)
            .map_err(|e| rejected("close_trustline", e))
    }

    fn close_inner(&self, proposer: &ParticipantId, counterparty: &ParticipantId) -> LedgerResult<()> {
        self.ensure_open()?;
        let handle = self.require_handle(proposer, counterparty)?;
        let mut line = handle.lock();
        let now = self.clock.now();
        line.close(now, &self.config)?;
        let key = line.key();

        self.unregister_pair(&key);
        self.log(now, [NetworkEvent::TrustlineClosed { a: key.a(), b: key.b() }]);
        info!(%proposer, %counterparty, "trustline closed");
        Ok(())
    }

    /// Settle the balance between `proposer` and `counterparty` by sending
    /// it around the cycle `path`, then close their trustline, atomically.
    ///
    /// `path` starts and ends at `proposer`. If the counterparty owes the
    /// proposer, the first hop must go to the counterparty; if the proposer
    /// owes, the last hop must come from the counterparty. The proposer pays
    /// the fees. Returns the total fee.
    pub fn close_trustline_by_triangular_transfer(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
        max_fee: u64,
        path: &[ParticipantId],
    ) -> LedgerResult<u64> {
        let run = || -> LedgerResult<_> {
            let key = TrustlineKey::new(*proposer, *counterparty)?;
            if path.len() < 4 || path.first() != Some(proposer) || path.last() != Some(proposer) {
                return Err(LedgerError::InvalidPath(
                    "closing path must be a cycle from the proposer through at least two others"
                        .into(),
                ));
            }
            self.execute(TransferPlan {
                path,
                amount: 0,
                max_fee,
                fee_payer: FeePayer::Sender,
                consent: None,
                settlement: Some(Settlement {
                    key,
                    proposer: *proposer,
                    counterparty: *counterparty,
                }),
                debit: false,
            })
        };
        run().map_err(|e| rejected("close_trustline_by_triangular_transfer", e))
    }

    // ---- Payments ----

    /// Pay `amount` from `path[0]` to the last participant of `path`. The
    /// sender pays all hop fees, at most `max_fee`. Returns the total fee.
    pub fn transfer(&self, path: &[ParticipantId], amount: u64, max_fee: u64) -> LedgerResult<u64> {
        self.execute(TransferPlan {
            path,
            amount,
            max_fee,
            fee_payer: FeePayer::Sender,
            consent: None,
            settlement: None,
            debit: false,
        })
        .map_err(|e| rejected("transfer", e))
    }

    /// Like [`CurrencyNetwork::transfer`], but the receiver pays the fees.
    pub fn transfer_receiver_pays(
        &self,
        path: &[ParticipantId],
        amount: u64,
        max_fee: u64,
    ) -> LedgerResult<u64> {
        self.execute(TransferPlan {
            path,
            amount,
            max_fee,
            fee_payer: FeePayer::Receiver,
            consent: None,
            settlement: None,
            debit: false,
        })
        .map_err(|e| rejected("transfer_receiver_pays", e))
    }

    /// Execute a payment the sender signed in advance. Anyone may submit it;
    /// the signer must be the first participant of the path.
    pub fn transfer_on_behalf(&self, signed: &SignedConsent) -> LedgerResult<u64> {
        let run = || -> LedgerResult<_> {
            let ConsentAction::Transfer {
                path,
                amount,
                max_fee,
            } = &signed.consent.action
            else {
                return Err(LedgerError::ConsentMismatch(
                    "consent does not describe a transfer".into(),
                ));
            };
            let sender = path
                .first()
                .ok_or_else(|| LedgerError::InvalidPath("empty path".into()))?;
            signed.verify_for(&self.config.symbol, sender, sender)?;
            self.execute(TransferPlan {
                path,
                amount: *amount,
                max_fee: *max_fee,
                fee_payer: FeePayer::Sender,
                consent: Some(&signed.consent),
                settlement: None,
                debit: false,
            })
        };
        run().map_err(|e| rejected("transfer_on_behalf", e))
    }

    /// `creditor` pulls `value` from its debtor `path[0]` along `path`,
    /// which ends at the creditor. The debtor's debt (see
    /// [`CurrencyNetwork::increase_debt`]) must cover `value` and shrinks by
    /// it. The creditor pays the fees, at most `max_fee`. Returns the total
    /// fee.
    pub fn debit_transfer(
        &self,
        creditor: &ParticipantId,
        value: u64,
        max_fee: u64,
        path: &[ParticipantId],
    ) -> LedgerResult<u64> {
        let run = || -> LedgerResult<_> {
            if path.last() != Some(creditor) {
                return Err(LedgerError::InvalidPath(
                    "debit path must end at the creditor".into(),
                ));
            }
            self.execute(TransferPlan {
                path,
                amount: value,
                max_fee,
                fee_payer: FeePayer::Receiver,
                consent: None,
                settlement: None,
                debit: true,
            })
        };
        run().map_err(|e| rejected("debit_transfer", e))
    }

    /// Accrue interest on one hop of a simulation and move the balance.
    /// Returns the hop fee.
    fn simulate_hop(
        &self,
        line: &mut Trustline,
        payer: &ParticipantId,
        amount: u64,
        now: u64,
    ) -> LedgerResult<u64> {
        line.accrue(now, &self.config)?;
        let payer_balance = line.balance_for(payer)?;
        let fee = hop_fee(&self.config.fees, payer_balance, amount)?;
        line.apply_transfer(payer, amount, now, &self.config)?;
        Ok(fee)
    }

    /// Amount that brings the settled pair to zero, checked against the
    /// direction the cycle takes through the pair.
    fn settlement_amount(
        &self,
        line: &Trustline,
        settlement: &Settlement,
        path: &[ParticipantId],
        now: u64,
    ) -> LedgerResult<u64> {
        let canonical = line.balance_with_interest(now, &self.config)?;
        let owed = if line.key().a() == settlement.proposer {
            canonical
        } else {
            safe_neg(canonical)?
        };
        let direction_ok = match owed.signum() {
            0 => true,
            1 => path.get(1) == Some(&settlement.counterparty),
            _ => path.len() >= 2 && path[path.len() - 2] == settlement.counterparty,
        };
        if !direction_ok {
            return Err(LedgerError::InvalidPath(format!(
                "path does not settle the balance of {owed} with {}",
                settlement.counterparty
            )));
        }
        let magnitude = if owed < 0 { safe_neg(owed)? } else { owed };
        Ok(to_u64(magnitude)?)
    }

    fn execute(&self, plan: TransferPlan<'_>) -> LedgerResult<u64> {
        self.ensure_open()?;
        let path = plan.path;
        self.validate_path(path)?;
        if plan.settlement.is_none() && plan.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        // Resolve every hop before taking any lock.
        let mut hop_keys = Vec::with_capacity(path.len() - 1);
        let mut handles: BTreeMap<TrustlineKey, SharedTrustline> = BTreeMap::new();
        for (hop, pair) in path.windows(2).enumerate() {
            let (from, to) = (pair[0], pair[1]);
            let key = TrustlineKey::new(from, to)?;
            let handle = self.existing_handle(&key).ok_or_else(|| {
                LedgerError::TrustlineNotFound { a: from, b: to }.at_hop(hop, from, to)
            })?;
            handles.entry(key).or_insert(handle);
            hop_keys.push(key);
        }
        if let Some(settlement) = &plan.settlement {
            if !handles.contains_key(&settlement.key) {
                return Err(LedgerError::InvalidPath(format!(
                    "path does not pass through {}",
                    settlement.key
                )));
            }
        }

        // BTreeMap iteration order is the canonical lock order.
        let mut guards: Vec<(TrustlineKey, MutexGuard<'_, Trustline>)> = handles
            .iter()
            .map(|(key, handle)| (*key, handle.lock()))
            .collect();
        let now = self.clock.now();
        let mut snapshots: BTreeMap<TrustlineKey, Trustline> =
            guards.iter().map(|(key, guard)| (*key, **guard)).collect();

        let amount = match &plan.settlement {
            Some(settlement) => {
                let line = snapshots
                    .get(&settlement.key)
                    .ok_or(LedgerError::TrustlineNotFound {
                        a: settlement.proposer,
                        b: settlement.counterparty,
                    })?;
                self.settlement_amount(line, settlement, path, now)?
            }
            None => plan.amount,
        };
        let fee_payer = match plan.fee_payer {
            FeePayer::Sender => path[0],
            FeePayer::Receiver => path[path.len() - 1],
        };

        let mut postings = Vec::new();
        let mut total_fee: u64 = 0;
        if amount > 0 {
            for (hop, (pair, key)) in path.windows(2).zip(&hop_keys).enumerate() {
                let (from, to) = (pair[0], pair[1]);
                let line = snapshots
                    .get_mut(key)
                    .ok_or(LedgerError::TrustlineNotFound { a: from, b: to })?;
                let fee = self
                    .simulate_hop(line, &from, amount, now)
                    .map_err(|e| e.at_hop(hop, from, to))?;
                total_fee = total_fee.safe_add(fee)?;
                if fee > 0 {
                    postings.push(FeePosting {
                        payer: fee_payer,
                        creditor: to,
                        fee,
                    });
                }
                debug!(hop, %from, %to, amount, fee, "hop simulated");
            }
        }

        if total_fee > plan.max_fee {
            return Err(LedgerError::FeeExceedsLimit {
                fee: total_fee,
                max_fee: plan.max_fee,
            });
        }

        if let Some(settlement) = &plan.settlement {
            let line = snapshots
                .get_mut(&settlement.key)
                .ok_or(LedgerError::TrustlineNotFound {
                    a: settlement.proposer,
                    b: settlement.counterparty,
                })?;
            line.close(now, &self.config)?;
        }

        let mut nonces = self.nonces.lock();
        let next_nonce = match plan.consent {
            Some(consent) => Some((consent.signer, check_nonce(&nonces, consent)?)),
            None => None,
        };
        let mut fee_ledger = self.fee_ledger.lock();
        let staged = fee_ledger.stage(&postings)?;
        let (sender, receiver) = (path[0], path[path.len() - 1]);
        let mut debts = plan.debit.then(|| self.debts.lock());
        let staged_debt = match debts.as_deref() {
            Some(ledger) => Some(ledger.stage_decrease(&sender, &receiver, amount)?),
            None => None,
        };

        // ---- Commit: nothing below can fail ----

        for (key, guard) in &mut guards {
            if let Some(snapshot) = snapshots.get(&*key) {
                **guard = *snapshot;
            }
        }
        fee_ledger.commit(staged);
        if let Some((signer, next)) = next_nonce {
            consume_nonce(&mut nonces, signer, next);
        }
        if let (Some(ledger), Some(staged)) = (debts.as_deref_mut(), staged_debt) {
            ledger.commit(staged);
        }
        drop(debts);
        drop(fee_ledger);
        drop(nonces);

        let mut events = Vec::with_capacity(snapshots.len() + 3);
        if amount > 0 {
            events.push(NetworkEvent::Transfer {
                id: Uuid::new_v4(),
                path: path.to_vec(),
                amount,
                fee: total_fee,
                fee_payer,
            });
        }
        if let Some(staged) = staged_debt {
            events.push(NetworkEvent::DebtUpdated {
                debtor: sender,
                creditor: receiver,
                debt: staged.debt,
            });
        }
        for (key, line) in &snapshots {
            events.push(NetworkEvent::BalanceUpdated {
                a: key.a(),
                b: key.b(),
                balance: line.record().balance,
            });
        }
        if let Some(settlement) = &plan.settlement {
            self.unregister_pair(&settlement.key);
            events.push(NetworkEvent::TrustlineClosed {
                a: settlement.key.a(),
                b: settlement.key.b(),
            });
        }
        self.log(now, events);
        drop(guards);

        info!(
            sender = %path[0],
            receiver = %path[path.len() - 1],
            hops = path.len() - 1,
            amount,
            fee = total_fee,
            settled = plan.settlement.is_some(),
            debit = plan.debit,
            "transfer committed"
        );
        Ok(total_fee)
    }

    // ---- Debts ----

    /// `debtor` acknowledges owing `creditor` another `value`. Returns the
    /// debt afterwards, from the debtor's side.
    pub fn increase_debt(
        &self,
        debtor: &ParticipantId,
        creditor: &ParticipantId,
        value: u64,
    ) -> LedgerResult<i128> {
        let run = || -> LedgerResult<_> {
            self.ensure_open()?;
            if value == 0 {
                return Err(LedgerError::InvalidAmount);
            }
            let mut debts = self.debts.lock();
            let staged = debts.stage_increase(debtor, creditor, value)?;
            let debt = staged.debt;
            debts.commit(staged);
            self.log(
                self.clock.now(),
                [NetworkEvent::DebtUpdated {
                    debtor: *debtor,
                    creditor: *creditor,
                    debt,
                }],
            );
            info!(%debtor, %creditor, value, debt, "debt increased");
            Ok(debt)
        };
        run().map_err(|e| rejected("increase_debt", e))
    }

    /// What `debtor` owes `creditor` outside their trustline; negative when
    /// the creditor owes.
    pub fn get_debt(&self, debtor: &ParticipantId, creditor: &ParticipantId) -> LedgerResult<i128> {
        self.debts.lock().debt(debtor, creditor)
    }

    // ---- Interest ----

    /// Fold accrued interest into the balance. Returns the interest from
    /// `proposer`'s side (positive when the counterparty's debt grew).
    pub fn apply_interests(
        &self,
        proposer: &ParticipantId,
        counterparty: &ParticipantId,
    ) -> LedgerResult<i128> {
        let run = || -> LedgerResult<_> {
            self.ensure_open()?;
            let handle = self.require_handle(proposer, counterparty)?;
            let mut line = handle.lock();
            let now = self.clock.now();
            let interest = line.apply_interests(now, &self.config)?;
            let key = line.key();
            self.log(
                now,
                [
                    NetworkEvent::InterestApplied {
                        a: key.a(),
                        b: key.b(),
                        interest,
                    },
                    NetworkEvent::BalanceUpdated {
                        a: key.a(),
                        b: key.b(),
                        balance: line.record().balance,
                    },
                ],
            );
            debug!(%key, interest, "interest applied");
            if key.a() == *proposer {
                Ok(interest)
            } else {
                Ok(safe_neg(interest)?)
            }
        };
        run().map_err(|e| rejected("apply_interests", e))
    }

    // ---- Queries ----

    /// Stored balance from `a`'s side: positive when `b` owes `a`.
    pub fn get_balance(&self, a: &ParticipantId, b: &ParticipantId) -> LedgerResult<i128> {
        let handle = self.require_handle(a, b)?;
        let line = handle.lock();
        line.balance_for(a)
    }

    /// Balance from `a`'s side including interest accrued up to now.
    pub fn get_balance_with_interest(
        &self,
        a: &ParticipantId,
        b: &ParticipantId,
    ) -> LedgerResult<i128> {
        let handle = self.require_handle(a, b)?;
        let line = handle.lock();
        let canonical = line.balance_with_interest(self.clock.now(), &self.config)?;
        if line.key().a() == *a {
            Ok(canonical)
        } else {
            Ok(safe_neg(canonical)?)
        }
    }

    /// The trustline of a pair, if one was ever registered.
    pub fn get_trustline(&self, a: &ParticipantId, b: &ParticipantId) -> Option<StoredTrustline> {
        let key = TrustlineKey::new(*a, *b).ok()?;
        let handle = self.existing_handle(&key)?;
        let stored = handle.lock().stored();
        Some(stored)
    }

    /// Current terms of the pair from `a`'s side.
    pub fn get_terms(&self, a: &ParticipantId, b: &ParticipantId) -> LedgerResult<TrustlineTerms> {
        let handle = self.require_handle(a, b)?;
        let terms = handle.lock().terms_for(a);
        Ok(terms)
    }

    /// Everyone `p` has an established trustline with, in the order the
    /// trustlines were established.
    pub fn list_counterparties(&self, p: &ParticipantId) -> Vec<ParticipantId> {
        self.counterparties
            .get(p)
            .map(|set| set.values())
            .unwrap_or_default()
    }

    /// Every participant that ever held a trustline, in order of arrival.
    pub fn users(&self) -> Vec<ParticipantId> {
        self.users.read().values()
    }

    /// Who brought `user` into the network. `None` if `user` never joined
    /// here.
    pub fn onboarder(&self, user: &ParticipantId) -> Option<Onboarder> {
        self.onboarding.lock().onboarder(user)
    }

    /// Net fees of `p`: earned minus paid.
    pub fn fee_balance(&self, p: &ParticipantId) -> i128 {
        self.fee_ledger.lock().balance(p)
    }

    /// Sum of all fee balances; zero by construction.
    pub fn fee_total(&self) -> i128 {
        self.fee_ledger.lock().total()
    }

    /// The nonce `p` must put in its next consent.
    pub fn next_nonce(&self, p: &ParticipantId) -> u64 {
        self.nonces.lock().get(p).copied().unwrap_or(0)
    }

    /// An unsigned consent by `signer` for `proposer` on this network,
    /// carrying the signer's next nonce.
    pub fn consent_for(
        &self,
        signer: &ParticipantId,
        proposer: &ParticipantId,
        action: ConsentAction,
    ) -> Consent {
        Consent {
            network: self.config.symbol.clone(),
            signer: *signer,
            proposer: *proposer,
            action,
            nonce: self.next_nonce(signer),
        }
    }

    /// Every committed event, oldest first.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().entries().to_vec()
    }

    // ---- Network lifecycle ----

    /// Freeze the whole network for good. Only possible once the configured
    /// expiration time has passed. Freezing twice is a no-op.
    pub fn freeze_network(&self) -> LedgerResult<()> {
        let now = self.clock.now();
        match self.config.expiration_time {
            Some(expiration) if now >= expiration => {
                if !self.frozen.swap(true, Ordering::SeqCst) {
                    self.log(now, [NetworkEvent::NetworkFrozen]);
                    info!(symbol = %self.config.symbol, "currency network frozen");
                }
                Ok(())
            }
            expiration_time => Err(rejected(
                "freeze_network",
                LedgerError::NetworkNotExpired {
                    expiration_time,
                    now,
                },
            )),
        }
    }

    pub fn is_network_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    // ---- Export ----

    /// Every trustline, ordered by pair.
    pub fn export_trustlines(&self) -> Vec<StoredTrustline> {
        let handles: BTreeMap<TrustlineKey, SharedTrustline> = self
            .trustlines
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        handles
            .values()
            .map(|handle| handle.lock().stored())
            .collect()
    }

    /// Write every trustline to `store`. Returns how many were written.
    pub fn save_to(&self, store: &dyn TrustlineStore) -> LedgerResult<usize> {
        let entries = self.export_trustlines();
        for entry in &entries {
            store.store(entry)?;
        }
        debug!(count = entries.len(), "trustlines saved");
        Ok(entries.len())
    }
}
