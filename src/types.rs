use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};

pub use alloy_primitives::Address;

pub type MatchId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    /// Prediction code understood by the betting contract.
    pub fn code(self) -> u8 {
        match self {
            Outcome::Home => 0,
            Outcome::Draw => 1,
            Outcome::Away => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Outcome::Home),
            1 => Some(Outcome::Draw),
            2 => Some(Outcome::Away),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Home => "home",
            Outcome::Draw => "draw",
            Outcome::Away => "away",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outcome '{0}', expected one of home, draw, away")]
pub struct ParseOutcomeError(String);

impl FromStr for Outcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" | "1" => Ok(Outcome::Home),
            "draw" | "x" => Ok(Outcome::Draw),
            "away" | "2" => Ok(Outcome::Away),
            _ => Err(ParseOutcomeError(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
}

impl MatchStatus {
    /// Maps a fixture feed status string onto the three lifecycle states.
    /// Anything the feed reports that is neither upcoming nor in play is
    /// treated as finished.
    pub fn from_feed(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" | "TIMED" => MatchStatus::Scheduled,
            "IN_PLAY" | "PAUSED" | "LIVE" | "SUSPENDED" => MatchStatus::Live,
            _ => MatchStatus::Finished,
        }
    }

    pub fn is_bettable(self) -> bool {
        matches!(self, MatchStatus::Scheduled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Odds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Odds {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self { home, draw, away }
    }

    pub fn for_outcome(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }
}

/// Where a match's odds came from. Only `Feed` odds are real pricing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OddsOrigin {
    Feed,
    Synthesized,
    Demo,
}

impl OddsOrigin {
    pub fn is_authoritative(self) -> bool {
        matches!(self, OddsOrigin::Feed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub home_team: String,
    pub away_team: String,
    pub competition: String,
    pub start_time: DateTime<Utc>,
    pub status: MatchStatus,
    pub odds: Odds,
    pub odds_origin: OddsOrigin,
}

impl Match {
    pub fn team_for(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Home => &self.home_team,
            Outcome::Draw => "Draw",
            Outcome::Away => &self.away_team,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetIntent {
    pub match_id: MatchId,
    pub outcome: Outcome,
    /// Amount in the wagering token's base unit.
    pub stake: u128,
}

impl BetIntent {
    pub fn new(match_id: MatchId, outcome: Outcome, stake: u128) -> Self {
        Self {
            match_id,
            outcome,
            stake,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
}

impl BetStatus {
    /// Contract status codes; unknown codes read as pending.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => BetStatus::Won,
            2 => BetStatus::Lost,
            _ => BetStatus::Pending,
        }
    }

    pub fn is_settled(self) -> bool {
        !matches!(self, BetStatus::Pending)
    }

    /// Applies a confirmed status. Settled statuses never move again.
    pub fn advance(self, confirmed: BetStatus) -> BetStatus {
        if self.is_settled() { self } else { confirmed }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BetId(String);

impl BetId {
    pub fn local(match_id: MatchId, sequence: u64) -> Self {
        Self(format!("{match_id}-{sequence}"))
    }

    pub fn chain(match_id: MatchId, chain_bet_id: u64) -> Self {
        Self(format!("{match_id}-chain-{chain_bet_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Placed through this process.
    Local,
    /// Found on chain without a local counterpart.
    Chain,
}

/// A bet known to the ledger. Stake and odds are fixed at construction; only
/// the status moves, and only forward.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BetRecord {
    id: BetId,
    match_id: MatchId,
    outcome: Outcome,
    stake: u128,
    odds: f64,
    status: BetStatus,
    sequence: u64,
    origin: RecordOrigin,
    chain_bet_id: Option<u64>,
}

impl BetRecord {
    pub fn pending(
        match_id: MatchId,
        outcome: Outcome,
        stake: u128,
        odds: f64,
        sequence: u64,
    ) -> Self {
        Self {
            id: BetId::local(match_id, sequence),
            match_id,
            outcome,
            stake,
            odds,
            status: BetStatus::Pending,
            sequence,
            origin: RecordOrigin::Local,
            chain_bet_id: None,
        }
    }

    pub(crate) fn from_chain(
        chain_bet_id: u64,
        index: u64,
        match_id: MatchId,
        outcome: Outcome,
        stake: u128,
        odds: f64,
        status: BetStatus,
    ) -> Self {
        Self {
            id: BetId::chain(match_id, chain_bet_id),
            match_id,
            outcome,
            stake,
            odds,
            status,
            sequence: index,
            origin: RecordOrigin::Chain,
            chain_bet_id: Some(chain_bet_id),
        }
    }

    pub fn id(&self) -> &BetId {
        &self.id
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn stake(&self) -> u128 {
        self.stake
    }

    pub fn odds(&self) -> f64 {
        self.odds
    }

    pub fn status(&self) -> BetStatus {
        self.status
    }

    /// Local placement order for `Local` records, on-chain index for `Chain`
    /// records.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn origin(&self) -> RecordOrigin {
        self.origin
    }

    pub fn chain_bet_id(&self) -> Option<u64> {
        self.chain_bet_id
    }

    /// Stake multiplied by the odds taken, in base units.
    pub fn potential_payout(&self) -> u128 {
        let centi_odds = (self.odds * 100.0).round() as u128;
        self.stake.saturating_mul(centi_odds) / 100
    }

    pub(crate) fn bind_chain_bet(&mut self, chain_bet_id: u64) {
        if self.chain_bet_id.is_none() {
            self.chain_bet_id = Some(chain_bet_id);
        }
    }

    pub(crate) fn apply_confirmed_status(&mut self, confirmed: BetStatus) {
        self.status = self.status.advance(confirmed);
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn outcome__parses_names_and_shorthand() {
        assert_eq!("Home".parse::<Outcome>().unwrap(), Outcome::Home);
        assert_eq!("x".parse::<Outcome>().unwrap(), Outcome::Draw);
        assert_eq!("2".parse::<Outcome>().unwrap(), Outcome::Away);
        assert!("over".parse::<Outcome>().is_err());
    }

    #[test]
    fn outcome__codes_round_trip() {
        for outcome in [Outcome::Home, Outcome::Draw, Outcome::Away] {
            assert_eq!(Outcome::from_code(outcome.code()), Some(outcome));
        }
        assert_eq!(Outcome::from_code(3), None);
    }

    #[test]
    fn match_status__maps_feed_strings() {
        assert_eq!(MatchStatus::from_feed("TIMED"), MatchStatus::Scheduled);
        assert_eq!(MatchStatus::from_feed("IN_PLAY"), MatchStatus::Live);
        assert_eq!(MatchStatus::from_feed("postponed"), MatchStatus::Finished);
        assert!(MatchStatus::Scheduled.is_bettable());
        assert!(!MatchStatus::Live.is_bettable());
    }

    #[test]
    fn bet_status__never_moves_backward() {
        assert_eq!(BetStatus::Pending.advance(BetStatus::Won), BetStatus::Won);
        assert_eq!(BetStatus::Won.advance(BetStatus::Pending), BetStatus::Won);
        assert_eq!(BetStatus::Lost.advance(BetStatus::Won), BetStatus::Lost);
    }

    #[test]
    fn bet_record__keeps_stake_and_odds_when_status_changes() {
        // given
        let mut record = BetRecord::pending(1, Outcome::Home, 10, 2.1, 0);

        // when
        record.apply_confirmed_status(BetStatus::Won);

        // then
        assert_eq!(record.status(), BetStatus::Won);
        assert_eq!(record.stake(), 10);
        assert_eq!(record.odds(), 2.1);
        assert_eq!(record.id().as_str(), "1-0");
    }

    #[test]
    fn bet_record__potential_payout_uses_placement_odds() {
        let record = BetRecord::pending(4, Outcome::Away, 1_000, 2.95, 3);
        assert_eq!(record.potential_payout(), 2_950);
    }

    #[test]
    fn bet_id__local_and_chain_ids_do_not_collide() {
        assert_ne!(BetId::local(1, 0), BetId::chain(1, 0));
    }
}
