//! Upcoming fixtures, from a live source when it answers and from a built-in
//! demo board when it does not.

use crate::{
    error::MatchSourceError,
    types::{
        Match,
        MatchId,
        MatchStatus,
        Odds,
        OddsOrigin,
    },
};
use chrono::{
    TimeZone,
    Utc,
};
use serde::Serialize;
use std::future::Future;

pub mod football_data;

pub trait MatchSource: Send + Sync {
    fn scheduled_matches(
        &self,
    ) -> impl Future<Output = Result<Vec<Match>, MatchSourceError>> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    Demo,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchBoard {
    pub matches: Vec<Match>,
    pub provenance: Provenance,
}

impl MatchBoard {
    pub fn find(&self, id: MatchId) -> Option<&Match> {
        self.matches.iter().find(|m| m.id == id)
    }
}

pub struct MatchFeed<S> {
    source: S,
}

impl<S: MatchSource> MatchFeed<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Never fails: any source error falls back to the demo board.
    pub async fn load(&self) -> MatchBoard {
        match self.source.scheduled_matches().await {
            Ok(matches) if !matches.is_empty() => {
                tracing::info!(count = matches.len(), "loaded live fixtures");
                MatchBoard {
                    matches,
                    provenance: Provenance::Live,
                }
            }
            Ok(_) => {
                tracing::warn!("match source returned no fixtures, using demo board");
                demo_board()
            }
            Err(err) => {
                tracing::warn!(%err, "match source failed, using demo board");
                demo_board()
            }
        }
    }
}

fn demo_board() -> MatchBoard {
    MatchBoard {
        matches: demo_matches(),
        provenance: Provenance::Demo,
    }
}

pub fn demo_matches() -> Vec<Match> {
    const FIXTURES: [(MatchId, &str, &str, &str, (u32, u32, u32), [f64; 3]); 6] = [
        (1, "Real Madrid", "Barcelona", "La Liga", (3, 20, 45), [2.1, 3.4, 2.8]),
        (2, "Manchester City", "Liverpool", "Premier League", (4, 18, 30), [1.8, 3.5, 3.2]),
        (3, "Bayern Munich", "Borussia Dortmund", "Bundesliga", (5, 20, 30), [1.6, 3.8, 4.2]),
        (4, "Inter", "Milan", "Serie A", (6, 20, 45), [2.2, 3.2, 2.9]),
        (5, "PSG", "Lyon", "Ligue 1", (7, 21, 0), [1.5, 4.1, 5.2]),
        (6, "Arsenal", "Tottenham", "Premier League", (8, 17, 0), [1.9, 3.5, 3.1]),
    ];
    FIXTURES
        .iter()
        .map(|&(id, home, away, competition, (day, hour, minute), [h, d, a])| Match {
            id,
            home_team: home.to_string(),
            away_team: away.to_string(),
            competition: competition.to_string(),
            start_time: Utc
                .with_ymd_and_hms(2024, 4, day, hour, minute, 0)
                .single()
                .unwrap_or_default(),
            status: MatchStatus::Scheduled,
            odds: Odds::new(h, d, a),
            odds_origin: OddsOrigin::Demo,
        })
        .collect()
}
