//! Sports data provider: API-Football v3.
//!
//! Only the fields the bot renders or predicts from are modelled.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};

use crate::conf::ConfProvider;

pub type Result<T> = anyhow::Result<T>;

/// Status codes of a match being played right now.
const IN_PLAY: [&str; 8] = ["1H", "HT", "2H", "ET", "BT", "P", "INT", "LIVE"];

#[async_trait]
pub trait SportsData: Send + Sync {
    async fn fixture(&self, id: i64) -> Result<Option<Fixture>>;

    /// Most recent fixtures of a team, newest first.
    async fn team_fixtures(&self, team: i64, last: u32) -> Result<Vec<Fixture>>;

    async fn head_to_head(
        &self,
        team_a: i64,
        team_b: i64,
        last: u32,
    ) -> Result<Vec<Fixture>>;

    async fn league_fixtures_on(
        &self,
        league: i64,
        season: i32,
        date: NaiveDate,
    ) -> Result<Vec<Fixture>>;

    async fn league_fixtures_between(
        &self,
        league: i64,
        season: i32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Fixture>>;

    async fn live_fixtures(&self) -> Result<Vec<Fixture>>;

    async fn standings(&self, league: i64, season: i32)
        -> Result<Vec<Standing>>;

    async fn top_scorers(&self, league: i64, season: i32)
        -> Result<Vec<Scorer>>;

    async fn fixture_statistics(
        &self,
        fixture: i64,
    ) -> Result<Vec<TeamStatistics>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub fixture: FixtureInfo,
    pub league: LeagueRef,
    pub teams: Teams,
    pub goals: Goals,
}

impl Fixture {
    pub fn id(&self) -> i64 {
        self.fixture.id
    }

    pub fn status(&self) -> &str {
        &self.fixture.status.short
    }

    pub fn is_finished(&self) -> bool {
        self.status() == "FT"
    }

    pub fn is_in_play(&self) -> bool {
        IN_PLAY.contains(&self.status())
    }

    pub fn venue(&self) -> &str {
        self.fixture
            .venue
            .as_ref()
            .and_then(|v| v.name.as_deref())
            .unwrap_or("N/A")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureInfo {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub venue: Option<Venue>,
    pub status: Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Venue {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub short: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Teams {
    pub home: TeamRef,
    pub away: TeamRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Goals {
    pub home: Option<u32>,
    pub away: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub rank: u32,
    pub team: String,
    pub points: i32,
    pub played: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    pub goal_diff: i32,
    pub form: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scorer {
    pub name: String,
    pub team: String,
    pub goals: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamStatistics {
    pub team: String,
    /// (type, value) pairs in provider order.
    pub values: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    errors: serde_json::Value,
    #[serde(default = "Vec::new")]
    response: Vec<T>,
}

impl<T> Envelope<T> {
    fn into_response(self) -> Result<Vec<T>> {
        let has_errors = match &self.errors {
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Object(o) => !o.is_empty(),
            serde_json::Value::Null => false,
            _ => true,
        };
        if has_errors {
            bail!("Provider reported errors: {}", self.errors);
        }
        Ok(self.response)
    }
}

#[derive(Deserialize)]
struct StandingsItem {
    league: StandingsLeague,
}

#[derive(Deserialize)]
struct StandingsLeague {
    standings: Vec<Vec<StandingRow>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StandingRow {
    rank: u32,
    team: TeamRef,
    points: i32,
    goals_diff: i32,
    #[serde(default)]
    form: Option<String>,
    all: StandingRecord,
}

#[derive(Deserialize)]
struct StandingRecord {
    played: u32,
    win: u32,
    draw: u32,
    lose: u32,
    goals: StandingGoals,
}

#[derive(Deserialize)]
struct StandingGoals {
    #[serde(rename = "for")]
    scored: u32,
    against: u32,
}

impl From<StandingRow> for Standing {
    fn from(row: StandingRow) -> Self {
        Self {
            rank: row.rank,
            team: row.team.name,
            points: row.points,
            played: row.all.played,
            wins: row.all.win,
            draws: row.all.draw,
            losses: row.all.lose,
            goals_for: row.all.goals.scored,
            goals_against: row.all.goals.against,
            goal_diff: row.goals_diff,
            form: row.form,
        }
    }
}

#[derive(Deserialize)]
struct ScorerItem {
    player: PlayerRef,
    statistics: Vec<ScorerStats>,
}

#[derive(Deserialize)]
struct PlayerRef {
    name: String,
}

#[derive(Deserialize)]
struct ScorerStats {
    team: TeamRef,
    goals: ScorerGoals,
}

#[derive(Deserialize)]
struct ScorerGoals {
    total: Option<u32>,
}

impl ScorerItem {
    fn into_scorer(self) -> Option<Scorer> {
        let stats = self.statistics.into_iter().next()?;
        Some(Scorer {
            name: self.player.name,
            team: stats.team.name,
            goals: stats.goals.total.unwrap_or(0),
        })
    }
}

#[derive(Deserialize)]
struct StatisticsItem {
    team: TeamRef,
    statistics: Vec<StatisticEntry>,
}

#[derive(Deserialize)]
struct StatisticEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: serde_json::Value,
}

impl From<StatisticsItem> for TeamStatistics {
    fn from(item: StatisticsItem) -> Self {
        let values = item
            .statistics
            .into_iter()
            .map(|entry| {
                let value = match entry.value {
                    serde_json::Value::Null => "-".to_string(),
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (entry.kind, value)
            })
            .collect();
        Self {
            team: item.team.name,
            values,
        }
    }
}

pub struct ApiFootball {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl ApiFootball {
    pub fn new(conf: &ConfProvider) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs_f32(conf.timeout))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .context("Failed to build provider HTTP client")?;
        let base_url = if conf.address.starts_with("http") {
            conf.address.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", conf.address.trim_end_matches('/'))
        };
        Ok(Self {
            client,
            base_url,
            auth_token: conf.auth_token.clone(),
        })
    }

    #[tracing::instrument(skip(self), err(Debug))]
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let resp = self
            .client
            .get(&url)
            .header("x-apisports-key", &self.auth_token)
            .query(params)
            .send()
            .await
            .context(format!("Request failed: {endpoint}"))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("{endpoint} HTTP {status}: {}", snippet(&body));
        }
        let envelope: Envelope<T> =
            serde_json::from_str(&body).with_context(|| {
                format!("Failed to parse {endpoint}: {}", snippet(&body))
            })?;
        let response = envelope.into_response()?;
        tracing::debug!(results = response.len(), "Provider responded.");
        Ok(response)
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl SportsData for ApiFootball {
    async fn fixture(&self, id: i64) -> Result<Option<Fixture>> {
        let fixtures: Vec<Fixture> =
            self.get("fixtures", &[("id", id.to_string())]).await?;
        Ok(fixtures.into_iter().next())
    }

    async fn team_fixtures(&self, team: i64, last: u32) -> Result<Vec<Fixture>> {
        self.get(
            "fixtures",
            &[("team", team.to_string()), ("last", last.to_string())],
        )
        .await
    }

    async fn head_to_head(
        &self,
        team_a: i64,
        team_b: i64,
        last: u32,
    ) -> Result<Vec<Fixture>> {
        self.get(
            "fixtures/headtohead",
            &[
                ("h2h", format!("{team_a}-{team_b}")),
                ("last", last.to_string()),
            ],
        )
        .await
    }

    async fn league_fixtures_on(
        &self,
        league: i64,
        season: i32,
        date: NaiveDate,
    ) -> Result<Vec<Fixture>> {
        self.get(
            "fixtures",
            &[
                ("league", league.to_string()),
                ("season", season.to_string()),
                ("date", date.format("%Y-%m-%d").to_string()),
            ],
        )
        .await
    }

    async fn league_fixtures_between(
        &self,
        league: i64,
        season: i32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Fixture>> {
        self.get(
            "fixtures",
            &[
                ("league", league.to_string()),
                ("season", season.to_string()),
                ("from", from.format("%Y-%m-%d").to_string()),
                ("to", to.format("%Y-%m-%d").to_string()),
            ],
        )
        .await
    }

    async fn live_fixtures(&self) -> Result<Vec<Fixture>> {
        self.get("fixtures", &[("live", "all".to_string())]).await
    }

    async fn standings(
        &self,
        league: i64,
        season: i32,
    ) -> Result<Vec<Standing>> {
        let items: Vec<StandingsItem> = self
            .get(
                "standings",
                &[
                    ("league", league.to_string()),
                    ("season", season.to_string()),
                ],
            )
            .await?;
        let table = items
            .into_iter()
            .next()
            .and_then(|item| item.league.standings.into_iter().next())
            .unwrap_or_default();
        Ok(table.into_iter().map(Standing::from).collect())
    }

    async fn top_scorers(
        &self,
        league: i64,
        season: i32,
    ) -> Result<Vec<Scorer>> {
        let items: Vec<ScorerItem> = self
            .get(
                "players/topscorers",
                &[
                    ("league", league.to_string()),
                    ("season", season.to_string()),
                ],
            )
            .await?;
        Ok(items.into_iter().filter_map(ScorerItem::into_scorer).collect())
    }

    async fn fixture_statistics(
        &self,
        fixture: i64,
    ) -> Result<Vec<TeamStatistics>> {
        let items: Vec<StatisticsItem> = self
            .get("fixtures/statistics", &[("fixture", fixture.to_string())])
            .await?;
        if items.is_empty() {
            return Err(anyhow!("No statistics for fixture {fixture}"));
        }
        Ok(items.into_iter().map(TeamStatistics::from).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fixture_json(
        id: i64,
        status: &str,
        (home_id, home): (i64, &str),
        (away_id, away): (i64, &str),
        goals: (Option<u32>, Option<u32>),
    ) -> serde_json::Value {
        serde_json::json!({
            "fixture": {
                "id": id,
                "date": "2026-10-15T19:00:00+00:00",
                "venue": {"id": 1, "name": "Anfield", "city": "Liverpool"},
                "status": {"long": "whatever", "short": status, "elapsed": null}
            },
            "league": {"id": 39, "name": "Premier League", "season": 2026},
            "teams": {
                "home": {"id": home_id, "name": home, "winner": null},
                "away": {"id": away_id, "name": away, "winner": null}
            },
            "goals": {"home": goals.0, "away": goals.1}
        })
    }

    pub(crate) fn fixture(
        id: i64,
        status: &str,
        home: (i64, &str),
        away: (i64, &str),
        goals: (Option<u32>, Option<u32>),
    ) -> Fixture {
        serde_json::from_value(fixture_json(id, status, home, away, goals))
            .unwrap()
    }

    #[test]
    fn parses_fixture_envelope() {
        let body = serde_json::json!({
            "get": "fixtures",
            "errors": [],
            "results": 1,
            "response": [fixture_json(7, "FT", (40, "Liverpool"), (50, "Man City"), (Some(2), Some(1)))]
        });
        let envelope: Envelope<Fixture> =
            serde_json::from_value(body).unwrap();
        let fixtures = envelope.into_response().unwrap();
        assert_eq!(fixtures.len(), 1);
        let f = &fixtures[0];
        assert_eq!(f.id(), 7);
        assert!(f.is_finished());
        assert!(!f.is_in_play());
        assert_eq!(f.venue(), "Anfield");
        assert_eq!(f.teams.away.name, "Man City");
        assert_eq!(f.goals.home, Some(2));
    }

    #[test]
    fn provider_errors_are_reported() {
        let body = serde_json::json!({
            "errors": {"token": "Error/Missing application key."},
            "results": 0,
            "response": []
        });
        let envelope: Envelope<Fixture> =
            serde_json::from_value(body).unwrap();
        assert!(envelope.into_response().is_err());
    }

    #[test]
    fn parses_standings() {
        let body = serde_json::json!({
            "errors": [],
            "response": [{
                "league": {
                    "id": 39,
                    "standings": [[{
                        "rank": 1,
                        "team": {"id": 40, "name": "Liverpool", "logo": "x"},
                        "points": 25,
                        "goalsDiff": 14,
                        "form": "WWDWW",
                        "all": {
                            "played": 10, "win": 8, "draw": 1, "lose": 1,
                            "goals": {"for": 22, "against": 8}
                        }
                    }]]
                }
            }]
        });
        let envelope: Envelope<StandingsItem> =
            serde_json::from_value(body).unwrap();
        let item = envelope.into_response().unwrap().remove(0);
        let row = Standing::from(
            item.league.standings.into_iter().next().unwrap().remove(0),
        );
        assert_eq!(row.team, "Liverpool");
        assert_eq!(row.points, 25);
        assert_eq!(row.goals_for, 22);
        assert_eq!(row.goal_diff, 14);
        assert_eq!(row.form.as_deref(), Some("WWDWW"));
    }

    #[test]
    fn statistics_values_are_stringified() {
        let item: StatisticsItem = serde_json::from_value(serde_json::json!({
            "team": {"id": 40, "name": "Liverpool"},
            "statistics": [
                {"type": "Shots on Goal", "value": 6},
                {"type": "Ball Possession", "value": "61%"},
                {"type": "Red Cards", "value": null}
            ]
        }))
        .unwrap();
        let stats = TeamStatistics::from(item);
        assert_eq!(
            stats.values,
            vec![
                ("Shots on Goal".to_string(), "6".to_string()),
                ("Ball Possession".to_string(), "61%".to_string()),
                ("Red Cards".to_string(), "-".to_string()),
            ]
        );
    }

    #[test]
    fn scorer_without_statistics_is_skipped() {
        let item: ScorerItem = serde_json::from_value(serde_json::json!({
            "player": {"id": 1, "name": "Nobody"},
            "statistics": []
        }))
        .unwrap();
        assert!(item.into_scorer().is_none());
    }
}
