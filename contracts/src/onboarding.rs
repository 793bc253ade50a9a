//! # Onboarding
//!
//! Who brought whom into the network. A participant joins when its first
//! trustline is established. If the other party was already a user, that
//! party is its onboarder; if both join together, neither has one. The
//! record is written once and never changes afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use trustline_protocol::identity::{IdentitySet, ParticipantId};

/// The onboarder recorded for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Onboarder {
    /// Joined together with another newcomer.
    Nobody,
    /// Joined through a trustline with this existing user.
    By(ParticipantId),
}

/// Onboarder of every user who joined on this network.
#[derive(Debug, Default)]
pub struct OnboardingRegistry {
    onboarders: HashMap<ParticipantId, Onboarder>,
}

impl OnboardingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn onboarder(&self, user: &ParticipantId) -> Option<Onboarder> {
        self.onboarders.get(user).copied()
    }

    /// Record the parties of a newly established trustline between `x` and
    /// `y`. `users` are the participants that joined before. Returns the
    /// newcomers with their onboarders.
    pub fn admit(
        &mut self,
        users: &IdentitySet,
        x: ParticipantId,
        y: ParticipantId,
    ) -> Vec<(ParticipantId, Onboarder)> {
        let candidates = [
            (x, users.contains(&x), y, users.contains(&y)),
            (y, users.contains(&y), x, users.contains(&x)),
        ];
        let mut admitted = Vec::new();
        for (newcomer, known, other, other_known) in candidates {
            if known || self.onboarders.contains_key(&newcomer) {
                continue;
            }
            let onboarder = if other_known {
                Onboarder::By(other)
            } else {
                Onboarder::Nobody
            };
            self.onboarders.insert(newcomer, onboarder);
            admitted.push((newcomer, onboarder));
        }
        admitted
    }

    pub fn len(&self) -> usize {
        self.onboarders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.onboarders.is_empty()
    }
}
