//! # Signed Consent
//!
//! Some changes to a trustline hurt one party: raising the credit they
//! extend without asking, charging them more interest, freezing the line
//! under them. Those changes need that party's signature on a message that
//! names exactly the change, the network and a nonce.
//!
//! The message is a [`Consent`]. Its digest is Keccak-256 over a domain tag
//! followed by the bincode encoding of the consent, and the signer signs that
//! digest with their secp256k1 key. Whoever submits the change presents the
//! resulting [`SignedConsent`]; the ledger recovers the signer from it before
//! touching any trustline.
//!
//! Nonces are per signer and strictly sequential. A consent can be used
//! once, and only in the order it was issued.

use serde::{Deserialize, Serialize};

use trustline_protocol::crypto::{keccak256_concat, recover_signer, Keypair, RecoverableSignature};
use trustline_protocol::identity::ParticipantId;

use crate::error::{LedgerError, LedgerResult};
use crate::trustline::TrustlineTerms;

/// Prefix of every consent digest.
const CONSENT_DOMAIN: &[u8] = b"trustline-network consent v1";

/// What the signer agrees to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentAction {
    /// The proposer may set these terms (from the proposer's side).
    UpdateTerms(TrustlineTerms),
    /// The proposer may freeze the shared trustline.
    Freeze,
    /// The proposer may unfreeze the shared trustline.
    Unfreeze,
    /// Anyone may submit this payment on the signer's behalf.
    Transfer {
        path: Vec<ParticipantId>,
        amount: u64,
        max_fee: u64,
    },
}

/// An unsigned consent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    /// Symbol of the currency network the consent is valid on.
    pub network: String,
    /// The participant who agrees.
    pub signer: ParticipantId,
    /// The participant who will submit the change. For transfers this is
    /// the signer itself.
    pub proposer: ParticipantId,
    pub action: ConsentAction,
    /// Must equal the signer's next nonce when the consent is used.
    pub nonce: u64,
}

impl Consent {
    /// The 32-byte digest the signer signs.
    pub fn digest(&self) -> LedgerResult<[u8; 32]> {
        let encoded = bincode::serialize(self)
            .map_err(|e| LedgerError::ConsentMismatch(format!("unencodable consent: {e}")))?;
        Ok(keccak256_concat(&[CONSENT_DOMAIN, &encoded]))
    }

    /// Sign with `keypair`. The keypair must belong to `self.signer`.
    pub fn sign(self, keypair: &Keypair) -> LedgerResult<SignedConsent> {
        let digest = self.digest()?;
        let signature = keypair
            .sign_digest(&digest)
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;
        Ok(SignedConsent {
            consent: self,
            signature,
        })
    }
}

/// A consent together with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedConsent {
    pub consent: Consent,
    pub signature: RecoverableSignature,
}

impl SignedConsent {
    /// Recover the signer and require it to be the one the consent names.
    pub fn verify(&self) -> LedgerResult<ParticipantId> {
        let digest = self.consent.digest()?;
        let recovered = recover_signer(&digest, &self.signature)?;
        if recovered != self.consent.signer {
            return Err(LedgerError::UnauthorizedSigner {
                expected: self.consent.signer,
                recovered,
            });
        }
        Ok(recovered)
    }

    /// Verify, then check that the consent was given by `signer` to
    /// `proposer` on `network`. The action is compared separately, under
    /// the trustline lock, where the exact change is known.
    pub fn verify_for(
        &self,
        network: &str,
        signer: &ParticipantId,
        proposer: &ParticipantId,
    ) -> LedgerResult<()> {
        if self.consent.signer != *signer {
            return Err(LedgerError::UnauthorizedSigner {
                expected: *signer,
                recovered: self.consent.signer,
            });
        }
        self.verify()?;
        if self.consent.network != network {
            return Err(LedgerError::ConsentMismatch(format!(
                "consent is for network {}, not {network}",
                self.consent.network
            )));
        }
        if self.consent.proposer != *proposer {
            return Err(LedgerError::ConsentMismatch(format!(
                "consent was given to {}, not {proposer}",
                self.consent.proposer
            )));
        }
        Ok(())
    }

    /// Require the consented action to be exactly `action`.
    pub fn ensure_action(&self, action: &ConsentAction) -> LedgerResult<()> {
        if self.consent.action != *action {
            return Err(LedgerError::ConsentMismatch(format!(
                "consent covers {:?}, request is {:?}",
                self.consent.action, action
            )));
        }
        Ok(())
    }
}

/// Whether moving from `current` to `proposed` (both from the proposer's
/// side) needs the counterparty's consent.
///
/// It does when the proposer would:
/// 1. receive more credit,
/// 2. charge a higher rate, or
/// 3. pay a lower rate to the counterparty.
///
/// Everything else only costs the proposer and is unilateral.
pub fn requires_counterparty_consent(current: &TrustlineTerms, proposed: &TrustlineTerms) -> bool {
    proposed.creditline_received > current.creditline_received
        || proposed.interest_rate_given > current.interest_rate_given
        || proposed.interest_rate_received < current.interest_rate_received
}
