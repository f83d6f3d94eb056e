use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    Mode, PaymentState, RegistrationStatus, TournamentStatus, MIN_LEDGER_AMOUNT, MIN_TOTAL_SPOTS,
};
use crate::Amount;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TournamentInvariantError {
    #[error("Entry fee must be a non-negative number.")]
    NegativeEntryFee,
    #[error("Entry fee must be 0 or at least {min}.")]
    EntryFeeBelowMinimum { min: Amount },
    #[error("Prize pool must be a positive number.")]
    NonPositivePrizePool,
    #[error("Total spots must be a number greater than 1.")]
    TooFewSpots,
    #[error("Total spots cannot be lower than the {joined} teams already joined.")]
    SpotsBelowJoined { joined: u32 },
    #[error("Prize distribution must be a non-empty array.")]
    EmptyPrizeDistribution,
    #[error("Prize for rank {rank} must be a positive number.")]
    NonPositivePrize { rank: u32 },
    #[error("Rank {rank} appears more than once in the prize distribution.")]
    DuplicateRank { rank: u32 },
    #[error("The sum of prize distribution ({sum}) must equal the prize pool ({pool}).")]
    PrizeSumMismatch { sum: Amount, pool: Amount },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeRank {
    pub rank: u32,
    pub prize: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub mode: Mode,
    pub entry_fee: Amount,
    pub prize_pool: Amount,
    pub total_spots: u32,
    pub joined_spots: u32,
    pub match_time: DateTime<Utc>,
    pub map: String,
    pub room_id: String,
    pub password: String,
    pub is_active: bool,
    pub is_completed: bool,
    pub publish: bool,
    pub status: TournamentStatus,
    pub prize_distribution: Vec<PrizeRank>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tournament {
    pub fn is_full(&self) -> bool {
        self.joined_spots >= self.total_spots
    }

    /// A tournament stops taking teams once it is marked ended or completed.
    pub fn has_ended(&self) -> bool {
        self.status == TournamentStatus::End || self.is_completed
    }

    pub fn spots_left(&self) -> u32 {
        self.total_spots.saturating_sub(self.joined_spots)
    }

    /// Checks the money and capacity terms of the tournament as a whole.
    pub fn validate_terms(&self) -> Result<(), TournamentInvariantError> {
        validate_terms(
            self.entry_fee,
            self.prize_pool,
            self.total_spots,
            self.joined_spots,
            &self.prize_distribution,
        )
    }
}

/// Checks fee, pool, capacity and prize split against each other.
pub fn validate_terms(
    entry_fee: Amount,
    prize_pool: Amount,
    total_spots: u32,
    joined_spots: u32,
    prize_distribution: &[PrizeRank],
) -> Result<(), TournamentInvariantError> {
    if entry_fee.is_negative() {
        return Err(TournamentInvariantError::NegativeEntryFee);
    }
    // A paid entry is written to the ledger.
    if entry_fee.is_positive() && entry_fee < MIN_LEDGER_AMOUNT {
        return Err(TournamentInvariantError::EntryFeeBelowMinimum {
            min: MIN_LEDGER_AMOUNT,
        });
    }
    if !prize_pool.is_positive() {
        return Err(TournamentInvariantError::NonPositivePrizePool);
    }
    if total_spots < MIN_TOTAL_SPOTS {
        return Err(TournamentInvariantError::TooFewSpots);
    }
    if total_spots < joined_spots {
        return Err(TournamentInvariantError::SpotsBelowJoined {
            joined: joined_spots,
        });
    }
    validate_prize_distribution(prize_distribution, prize_pool)
}

pub fn validate_prize_distribution(
    distribution: &[PrizeRank],
    prize_pool: Amount,
) -> Result<(), TournamentInvariantError> {
    if distribution.is_empty() {
        return Err(TournamentInvariantError::EmptyPrizeDistribution);
    }
    let mut seen = Vec::with_capacity(distribution.len());
    for entry in distribution {
        if !entry.prize.is_positive() {
            return Err(TournamentInvariantError::NonPositivePrize { rank: entry.rank });
        }
        if seen.contains(&entry.rank) {
            return Err(TournamentInvariantError::DuplicateRank { rank: entry.rank });
        }
        seen.push(entry.rank);
    }
    let sum = Amount::checked_sum(distribution.iter().map(|entry| entry.prize)).ok_or(
        TournamentInvariantError::PrizeSumMismatch {
            sum: Amount::from_paise(i64::MAX),
            pool: prize_pool,
        },
    )?;
    if sum != prize_pool {
        return Err(TournamentInvariantError::PrizeSumMismatch {
            sum,
            pool: prize_pool,
        });
    }
    Ok(())
}

/// One member of a registered team.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamPlayer {
    pub user: String,
    pub is_captain: bool,
}

/// A team's entry in a tournament.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "tournament")]
    pub tournament_id: String,
    pub mode: Mode,
    pub team_name: String,
    pub slot: u32,
    pub team_id: u64,
    pub team_password: u32,
    pub players: Vec<TeamPlayer>,
    pub status: RegistrationStatus,
    pub payment: PaymentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.mode.capacity()
    }

    pub fn has_player(&self, user_id: &str) -> bool {
        self.players.iter().any(|player| player.user == user_id)
    }
}

/// Partial admin edit of a tournament. Counters and ids are not editable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TournamentPatch {
    pub title: Option<String>,
    pub mode: Option<Mode>,
    pub entry_fee: Option<Amount>,
    pub prize_pool: Option<Amount>,
    pub total_spots: Option<u32>,
    pub match_time: Option<DateTime<Utc>>,
    pub map: Option<String>,
    pub room_id: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub is_completed: Option<bool>,
    pub publish: Option<bool>,
    pub status: Option<TournamentStatus>,
    pub prize_distribution: Option<Vec<PrizeRank>>,
}

impl TournamentPatch {
    pub fn is_empty(&self) -> bool {
        self == &TournamentPatch::default()
    }

    /// Applies the patch and re-checks the tournament's terms.
    pub fn apply(self, tournament: &mut Tournament) -> Result<(), TournamentInvariantError> {
        if let Some(title) = self.title {
            tournament.title = title;
        }
        if let Some(mode) = self.mode {
            tournament.mode = mode;
        }
        if let Some(entry_fee) = self.entry_fee {
            tournament.entry_fee = entry_fee;
        }
        if let Some(prize_pool) = self.prize_pool {
            tournament.prize_pool = prize_pool;
        }
        if let Some(total_spots) = self.total_spots {
            tournament.total_spots = total_spots;
        }
        if let Some(match_time) = self.match_time {
            tournament.match_time = match_time;
        }
        if let Some(map) = self.map {
            tournament.map = map;
        }
        if let Some(room_id) = self.room_id {
            tournament.room_id = room_id;
        }
        if let Some(password) = self.password {
            tournament.password = password;
        }
        if let Some(is_active) = self.is_active {
            tournament.is_active = is_active;
        }
        if let Some(is_completed) = self.is_completed {
            tournament.is_completed = is_completed;
        }
        if let Some(publish) = self.publish {
            tournament.publish = publish;
        }
        if let Some(status) = self.status {
            tournament.status = status;
        }
        if let Some(prize_distribution) = self.prize_distribution {
            tournament.prize_distribution = prize_distribution;
        }
        tournament.validate_terms()
    }
}
