use super::MatchSource;
use crate::{
    error::MatchSourceError,
    odds::OddsSynthesizer,
    types::{
        Match,
        MatchId,
        MatchStatus,
        OddsOrigin,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::{
    sync::{
        Mutex,
        PoisonError,
    },
    time::Duration,
};

pub const DEFAULT_FOOTBALL_API_URL: &str = "https://api.football-data.org/v4";
const MAX_FIXTURES: usize = 9;
const UNKNOWN_TEAM: &str = "Unknown Team";

/// football-data.org fixtures. The feed carries no prices, so odds are
/// synthesized from the team codes.
pub struct FootballDataSource {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    synthesizer: Mutex<OddsSynthesizer>,
}

#[derive(Debug, Deserialize)]
struct MatchesDto {
    #[serde(default)]
    matches: Vec<FixtureDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixtureDto {
    id: MatchId,
    utc_date: DateTime<Utc>,
    status: String,
    home_team: TeamDto,
    away_team: TeamDto,
    #[serde(default)]
    competition: Option<CompetitionDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamDto {
    name: Option<String>,
    short_name: Option<String>,
    tla: Option<String>,
}

impl TeamDto {
    fn display_name(&self) -> String {
        [&self.name, &self.short_name]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_TEAM.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CompetitionDto {
    name: String,
}

impl FootballDataSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, MatchSourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url,
            api_key,
            http,
            synthesizer: Mutex::new(OddsSynthesizer::from_os_rng()),
        })
    }

    pub fn with_synthesizer(mut self, synthesizer: OddsSynthesizer) -> Self {
        self.synthesizer = Mutex::new(synthesizer);
        self
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Match>, MatchSourceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-Auth-Token", key);
        }
        let res = request.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if status != StatusCode::OK {
            return Err(MatchSourceError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let dto: MatchesDto = serde_json::from_slice(&bytes)?;
        let matches = self.convert(dto);
        if matches.is_empty() {
            return Err(MatchSourceError::Empty);
        }
        Ok(matches)
    }

    fn convert(&self, dto: MatchesDto) -> Vec<Match> {
        let mut synthesizer = self
            .synthesizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        dto.matches
            .into_iter()
            .take(MAX_FIXTURES)
            .map(|fixture| {
                let odds = synthesizer
                    .for_teams(fixture.home_team.tla.as_deref(), fixture.away_team.tla.as_deref());
                Match {
                    id: fixture.id,
                    home_team: fixture.home_team.display_name(),
                    away_team: fixture.away_team.display_name(),
                    competition: fixture
                        .competition
                        .map(|c| c.name)
                        .unwrap_or_default(),
                    start_time: fixture.utc_date,
                    status: MatchStatus::from_feed(&fixture.status),
                    odds,
                    odds_origin: OddsOrigin::Synthesized,
                }
            })
            .collect()
    }
}

impl MatchSource for FootballDataSource {
    async fn scheduled_matches(&self) -> Result<Vec<Match>, MatchSourceError> {
        match self.fetch("/matches?status=SCHEDULED&limit=10").await {
            Ok(matches) => Ok(matches),
            Err(err) => {
                tracing::warn!(%err, "scheduled matches unavailable, trying Premier League");
                self.fetch("/competitions/PL/matches?status=SCHEDULED").await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    const PAYLOAD: &str = r#"{
        "matches": [
            {
                "id": 501,
                "utcDate": "2025-08-16T14:00:00Z",
                "status": "TIMED",
                "homeTeam": { "name": "Arsenal FC", "shortName": "Arsenal", "tla": "ARS" },
                "awayTeam": { "name": null, "shortName": "Spurs", "tla": "TOT" },
                "competition": { "name": "Premier League" }
            },
            {
                "id": 502,
                "utcDate": "2025-08-16T16:30:00Z",
                "status": "IN_PLAY",
                "homeTeam": { "name": null, "shortName": null, "tla": null },
                "awayTeam": { "name": "Leicester City FC", "tla": "LEI" },
                "competition": { "name": "Premier League" }
            }
        ]
    }"#;

    fn source() -> FootballDataSource {
        FootballDataSource::new("http://localhost:1/", None, Duration::from_secs(1))
            .unwrap()
            .with_synthesizer(OddsSynthesizer::seeded(7))
    }

    #[test]
    fn convert__maps_fixtures_and_falls_back_on_names() {
        // given
        let dto: MatchesDto = serde_json::from_str(PAYLOAD).unwrap();

        // when
        let matches = source().convert(dto);

        // then
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].home_team, "Arsenal FC");
        assert_eq!(matches[0].away_team, "Spurs");
        assert_eq!(matches[0].status, MatchStatus::Scheduled);
        assert_eq!(matches[0].odds_origin, OddsOrigin::Synthesized);
        assert_eq!(matches[1].home_team, UNKNOWN_TEAM);
        assert_eq!(matches[1].status, MatchStatus::Live);
    }

    #[test]
    fn convert__keeps_at_most_nine_fixtures() {
        // given
        let fixtures: Vec<String> = (0..12)
            .map(|id| {
                format!(
                    r#"{{"id": {id}, "utcDate": "2025-08-16T14:00:00Z", "status": "SCHEDULED",
                        "homeTeam": {{}}, "awayTeam": {{}}}}"#
                )
            })
            .collect();
        let payload = format!(r#"{{"matches": [{}]}}"#, fixtures.join(","));
        let dto: MatchesDto = serde_json::from_str(&payload).unwrap();

        // when
        let matches = source().convert(dto);

        // then
        assert_eq!(matches.len(), MAX_FIXTURES);
        assert_eq!(matches[0].competition, "");
    }

    #[test]
    fn convert__synthesized_odds_respect_the_floor() {
        let dto: MatchesDto = serde_json::from_str(PAYLOAD).unwrap();
        for m in source().convert(dto) {
            assert!(m.odds.home >= 1.01 && m.odds.draw >= 1.01 && m.odds.away >= 1.01);
        }
    }

    #[test]
    fn new__trims_trailing_slash() {
        assert_eq!(source().base_url, "http://localhost:1");
    }
}
