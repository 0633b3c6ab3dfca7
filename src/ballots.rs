use crate::error::GameError;
use crate::types::PlayerId;
use serde::{Deserialize, Serialize};

/// Tracks one ballot per eligible voter within a single voting sub-phase.
///
/// Buffers are created at phase entry and dropped at resolution; they never
/// carry across phases. A second ballot from the same voter is rejected
/// without changing the tally.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Ballots<T> {
    eligible: Vec<bool>,
    votes: Vec<Option<T>>,
}

impl<T: Clone> Ballots<T> {
    pub fn new(n_players: usize, eligible: impl Fn(PlayerId) -> bool) -> Self {
        Self {
            eligible: (0..n_players).map(eligible).collect(),
            votes: vec![None; n_players],
        }
    }

    pub fn is_eligible(&self, player: PlayerId) -> bool {
        self.eligible.get(player).copied().unwrap_or(false)
    }

    pub fn has_cast(&self, player: PlayerId) -> bool {
        self.votes.get(player).map(|v| v.is_some()).unwrap_or(false)
    }

    /// Records a ballot, rejecting ineligible voters and double votes.
    pub fn cast(&mut self, player: PlayerId, vote: T) -> Result<(), GameError> {
        if !self.is_eligible(player) {
            return Err(GameError::InvalidAction);
        }
        if self.has_cast(player) {
            return Err(GameError::AlreadyActed);
        }
        self.votes[player] = Some(vote);
        Ok(())
    }

    /// True once every eligible voter has a recorded ballot.
    pub fn complete(&self) -> bool {
        self.eligible
            .iter()
            .zip(&self.votes)
            .all(|(eligible, vote)| !eligible || vote.is_some())
    }

    /// Eligible voters still missing a ballot.
    pub fn pending(&self) -> Vec<PlayerId> {
        self.eligible
            .iter()
            .zip(&self.votes)
            .enumerate()
            .filter(|(_, (eligible, vote))| **eligible && vote.is_none())
            .map(|(player, _)| player)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, &T)> {
        self.votes
            .iter()
            .enumerate()
            .filter_map(|(player, vote)| vote.as_ref().map(|v| (player, v)))
    }

    pub fn count(&self, pred: impl Fn(&T) -> bool) -> usize {
        self.iter().filter(|(_, v)| pred(v)).count()
    }

    pub fn total_eligible(&self) -> usize {
        self.eligible.iter().filter(|e| **e).count()
    }
}
