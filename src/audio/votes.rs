use dashmap::DashMap;
use serenity::model::id::{GuildId, UserId};
use std::collections::HashSet;
use tracing::debug;

/// Proporción de oyentes necesaria para saltar por votación.
pub const DEFAULT_VOTE_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Registered { votes: usize, required: usize },
    AlreadyVoted { votes: usize, required: usize },
    ThresholdReached { votes: usize, required: usize },
}

impl VoteOutcome {
    pub fn votes(&self) -> usize {
        match *self {
            VoteOutcome::Registered { votes, .. }
            | VoteOutcome::AlreadyVoted { votes, .. }
            | VoteOutcome::ThresholdReached { votes, .. } => votes,
        }
    }

    pub fn required(&self) -> usize {
        match *self {
            VoteOutcome::Registered { required, .. }
            | VoteOutcome::AlreadyVoted { required, .. }
            | VoteOutcome::ThresholdReached { required, .. } => required,
        }
    }
}

/// Votos de salto por sesión.
///
/// El umbral se recalcula con la población de cada voto; un voto repetido
/// nunca altera el umbral.
#[derive(Debug)]
pub struct VoteSkipCoordinator {
    votes: DashMap<GuildId, HashSet<UserId>>,
    ratio: f64,
}

impl Default for VoteSkipCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_VOTE_RATIO)
    }
}

impl VoteSkipCoordinator {
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio.min(1.0)
        } else {
            DEFAULT_VOTE_RATIO
        };
        Self {
            votes: DashMap::new(),
            ratio,
        }
    }

    /// Votos necesarios para `population` oyentes (sin bots), mínimo 1
    pub fn required_votes(&self, population: usize) -> usize {
        ((population as f64 * self.ratio).ceil() as usize).max(1)
    }

    pub fn register_vote(&self, session: GuildId, voter: UserId, population: usize) -> VoteOutcome {
        let mut voters = self.votes.entry(session).or_default();

        if voters.contains(&voter) {
            // El umbral se recalcula sin el voto repetido
            let votes = voters.len();
            return VoteOutcome::AlreadyVoted {
                votes,
                required: self.required_votes(population),
            };
        }

        voters.insert(voter);
        let votes = voters.len();
        let required = self.required_votes(population);
        debug!("🗳️ Voto de {} en {}: {}/{}", voter, session, votes, required);

        if votes >= required {
            VoteOutcome::ThresholdReached { votes, required }
        } else {
            VoteOutcome::Registered { votes, required }
        }
    }

    /// Si la petición de salto puede saltarse la votación
    pub fn should_bypass(
        &self,
        requester: UserId,
        current_requester: Option<UserId>,
        privileged: bool,
        population: usize,
    ) -> bool {
        privileged || population <= 1 || current_requester == Some(requester)
    }

    pub fn votes(&self, session: GuildId) -> usize {
        self.votes.get(&session).map_or(0, |v| v.len())
    }

    pub fn clear(&self, session: GuildId) {
        self.votes.remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn five_members_need_three_votes() {
        let votes = VoteSkipCoordinator::default();

        assert_eq!(
            votes.register_vote(GuildId::new(10), UserId::new(1), 5),
            VoteOutcome::Registered { votes: 1, required: 3 }
        );
        assert_eq!(
            votes.register_vote(GuildId::new(10), UserId::new(1), 5),
            VoteOutcome::AlreadyVoted { votes: 1, required: 3 }
        );
        assert_eq!(
            votes.register_vote(GuildId::new(10), UserId::new(2), 5),
            VoteOutcome::Registered { votes: 2, required: 3 }
        );
        assert_eq!(
            votes.register_vote(GuildId::new(10), UserId::new(3), 5),
            VoteOutcome::ThresholdReached { votes: 3, required: 3 }
        );
    }

    #[test]
    fn threshold_follows_population_changes() {
        let votes = VoteSkipCoordinator::default();
        votes.register_vote(GuildId::new(10), UserId::new(1), 6);
        let outcome = votes.register_vote(GuildId::new(10), UserId::new(2), 4);
        assert_eq!(outcome, VoteOutcome::ThresholdReached { votes: 2, required: 2 });
    }

    #[test]
    fn bypass_rules() {
        let votes = VoteSkipCoordinator::default();
        let me = UserId::new(5);
        let other = UserId::new(6);

        assert!(votes.should_bypass(me, Some(me), false, 4));
        assert!(votes.should_bypass(me, Some(other), true, 4));
        assert!(votes.should_bypass(me, Some(other), false, 1));
        assert!(!votes.should_bypass(me, Some(other), false, 4));
    }

    #[test]
    fn clear_resets_votes_and_minimum_is_one() {
        let votes = VoteSkipCoordinator::default();
        votes.register_vote(GuildId::new(10), UserId::new(1), 8);
        assert_eq!(votes.votes(GuildId::new(10)), 1);
        votes.clear(GuildId::new(10));
        assert_eq!(votes.votes(GuildId::new(10)), 0);
        assert_eq!(votes.required_votes(0), 1);
    }
}
