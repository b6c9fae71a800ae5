//! Match outcome heuristic from recent form and head-to-head history.
//!
//! Probabilities are not renormalised after the head-to-head bump, so the
//! three values need not sum to 100.

use chrono::{DateTime, Utc};

use crate::provider::{Fixture, SportsData};

/// Multiplier applied to the home side's form points before truncation.
const HOME_ADVANTAGE: f64 = 1.3;

/// Percentage points shared out by head-to-head win ratio.
const H2H_WEIGHT: f64 = 10.0;

/// Probability used for every outcome when neither side has form points.
const NO_FORM_PROBABILITY: f64 = 33.3;

const HIGH_CONFIDENCE: f64 = 60.0;
const MEDIUM_CONFIDENCE: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Draw,
    Loss,
}

impl MatchOutcome {
    pub fn letter(self) -> char {
        match self {
            Self::Win => 'W',
            Self::Draw => 'D',
            Self::Loss => 'L',
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FormMatch {
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub status: String,
    pub team_score: Option<u32>,
    pub opponent_score: Option<u32>,
    /// Only set for finished matches.
    pub outcome: Option<MatchOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Form {
    pub matches: Vec<FormMatch>,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub goals_for: u32,
    pub goals_against: u32,
}

impl Form {
    /// Summarises `team_id`'s fixtures. Unfinished fixtures are listed but
    /// count towards neither results nor goals.
    pub fn from_fixtures(team_id: i64, fixtures: &[Fixture]) -> Self {
        let mut form = Self::default();
        for fixture in fixtures {
            let is_home = fixture.teams.home.id == team_id;
            let (team_score, opponent_score) = if is_home {
                (fixture.goals.home, fixture.goals.away)
            } else {
                (fixture.goals.away, fixture.goals.home)
            };
            let outcome = match (fixture.is_finished(), team_score, opponent_score)
            {
                (true, Some(ours), Some(theirs)) => {
                    form.goals_for += ours;
                    form.goals_against += theirs;
                    let outcome = match ours.cmp(&theirs) {
                        std::cmp::Ordering::Greater => MatchOutcome::Win,
                        std::cmp::Ordering::Less => MatchOutcome::Loss,
                        std::cmp::Ordering::Equal => MatchOutcome::Draw,
                    };
                    match outcome {
                        MatchOutcome::Win => form.wins += 1,
                        MatchOutcome::Draw => form.draws += 1,
                        MatchOutcome::Loss => form.losses += 1,
                    }
                    Some(outcome)
                }
                _ => None,
            };
            form.matches.push(FormMatch {
                home_team: fixture.teams.home.name.clone(),
                away_team: fixture.teams.away.name.clone(),
                home_score: fixture.goals.home,
                away_score: fixture.goals.away,
                status: fixture.status().to_string(),
                team_score,
                opponent_score,
                outcome,
            });
        }
        form
    }

    /// League points: three per win, one per draw.
    pub fn points(&self) -> u32 {
        self.wins * 3 + self.draws
    }

    /// e.g. "WWDL?" where '?' marks an unfinished match.
    pub fn letters(&self) -> String {
        self.matches
            .iter()
            .map(|m| m.outcome.map_or('?', MatchOutcome::letter))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct H2hMatch {
    pub date: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub league: String,
    pub venue: String,
}

impl H2hMatch {
    fn home_side_won(&self) -> bool {
        matches!((self.home_score, self.away_score), (Some(h), Some(a)) if h > a)
    }

    fn away_side_won(&self) -> bool {
        matches!((self.home_score, self.away_score), (Some(h), Some(a)) if a > h)
    }
}

impl From<&Fixture> for H2hMatch {
    fn from(fixture: &Fixture) -> Self {
        Self {
            date: fixture.fixture.date,
            home_team: fixture.teams.home.name.clone(),
            away_team: fixture.teams.away.name.clone(),
            home_score: fixture.goals.home,
            away_score: fixture.goals.away,
            league: fixture.league.name.clone(),
            venue: fixture.venue().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    HomeWin,
    AwayWin,
    Draw,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::HomeWin => "Home win",
            Self::AwayWin => "Away win",
            Self::Draw => "Draw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    fn of(max_probability: f64) -> Self {
        if max_probability >= HIGH_CONFIDENCE {
            Self::High
        } else if max_probability >= MEDIUM_CONFIDENCE {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Prediction {
    pub home_win_probability: f64,
    pub away_win_probability: f64,
    pub draw_probability: f64,
    pub predicted_result: Outcome,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MatchPrediction {
    pub home_team: String,
    pub away_team: String,
    pub home_form: Form,
    pub away_form: Form,
    pub head_to_head: Vec<H2hMatch>,
    pub prediction: Prediction,
}

/// Rounds to `places` decimals, correctly rounded from the exact binary
/// value.
pub(crate) fn round_dp(x: f64, places: usize) -> f64 {
    // Adding 0.0 turns -0.0 into 0.0.
    format!("{x:.places$}").parse::<f64>().map_or(x, |v| v + 0.0)
}

fn round1(x: f64) -> f64 {
    round_dp(x, 1)
}

pub fn predict(home: &Form, away: &Form, h2h: &[H2hMatch]) -> Prediction {
    // Truncation, not rounding.
    let home_points = (f64::from(home.points()) * HOME_ADVANTAGE) as u32;
    let away_points = away.points();
    let total = home_points + away_points;

    let (mut home_p, mut away_p, mut draw_p) = if total > 0 {
        let total = f64::from(total);
        let home_p = round1(f64::from(home_points) / total * 100.0);
        let away_p = round1(f64::from(away_points) / total * 100.0);
        (home_p, away_p, round1(100.0 - home_p - away_p))
    } else {
        (NO_FORM_PROBABILITY, NO_FORM_PROBABILITY, NO_FORM_PROBABILITY)
    };

    if !h2h.is_empty() {
        let n = h2h.len() as f64;
        let home_wins = h2h.iter().filter(|m| m.home_side_won()).count();
        let away_wins = h2h.iter().filter(|m| m.away_side_won()).count();
        home_p += home_wins as f64 / n * H2H_WEIGHT;
        away_p += away_wins as f64 / n * H2H_WEIGHT;
        draw_p = (100.0 - home_p - away_p).max(0.0);
    }

    let max = home_p.max(away_p).max(draw_p);
    let predicted_result = if max == home_p {
        Outcome::HomeWin
    } else if max == away_p {
        Outcome::AwayWin
    } else {
        Outcome::Draw
    };

    Prediction {
        home_win_probability: round1(home_p),
        away_win_probability: round1(away_p),
        draw_probability: round1(draw_p),
        predicted_result,
        confidence: Confidence::of(max),
    }
}

pub async fn compute_form(
    data: &dyn SportsData,
    team_id: i64,
    last_n: u32,
) -> anyhow::Result<Form> {
    let fixtures = data.team_fixtures(team_id, last_n).await?;
    Ok(Form::from_fixtures(team_id, &fixtures))
}

pub async fn compute_h2h(
    data: &dyn SportsData,
    team_a: i64,
    team_b: i64,
    limit: u32,
) -> anyhow::Result<Vec<H2hMatch>> {
    let fixtures = data.head_to_head(team_a, team_b, limit).await?;
    Ok(fixtures.iter().map(H2hMatch::from).collect())
}

/// `None` when the provider does not know the fixture.
#[tracing::instrument(skip(data))]
pub async fn match_prediction(
    data: &dyn SportsData,
    fixture_id: i64,
    form_matches: u32,
    h2h_matches: u32,
) -> anyhow::Result<Option<MatchPrediction>> {
    let Some(fixture) = data.fixture(fixture_id).await? else {
        return Ok(None);
    };
    let home_id = fixture.teams.home.id;
    let away_id = fixture.teams.away.id;
    let home_form = compute_form(data, home_id, form_matches).await?;
    let away_form = compute_form(data, away_id, form_matches).await?;
    let head_to_head =
        compute_h2h(data, home_id, away_id, h2h_matches).await?;
    let prediction = predict(&home_form, &away_form, &head_to_head);
    tracing::debug!(?prediction, "Predicted.");
    Ok(Some(MatchPrediction {
        home_team: fixture.teams.home.name,
        away_team: fixture.teams.away.name,
        home_form,
        away_form,
        head_to_head,
        prediction,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::provider::tests::fixture;

    fn form(wins: u32, draws: u32, losses: u32) -> Form {
        Form {
            wins,
            draws,
            losses,
            ..Form::default()
        }
    }

    fn h2h(home_score: u32, away_score: u32) -> H2hMatch {
        H2hMatch {
            date: Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0).unwrap(),
            home_team: "A".to_string(),
            away_team: "B".to_string(),
            home_score: Some(home_score),
            away_score: Some(away_score),
            league: "Premier League".to_string(),
            venue: "N/A".to_string(),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn dominant_home_form() {
        let p = predict(&form(5, 0, 0), &form(0, 0, 5), &[]);
        assert!(close(p.home_win_probability, 100.0));
        assert!(close(p.away_win_probability, 0.0));
        assert!(close(p.draw_probability, 0.0));
        assert_eq!(p.predicted_result, Outcome::HomeWin);
        assert_eq!(p.confidence, Confidence::High);
    }

    #[test]
    fn no_form_at_all() {
        let p = predict(&Form::default(), &Form::default(), &[]);
        assert!(close(p.home_win_probability, 33.3));
        assert!(close(p.away_win_probability, 33.3));
        assert!(close(p.draw_probability, 33.3));
        assert_eq!(p.predicted_result, Outcome::HomeWin);
        assert_eq!(p.confidence, Confidence::Low);
    }

    #[test]
    fn home_advantage_truncates() {
        // 2 draws -> 2 points -> 2.6 -> 2; 1 win + 2 draws -> 5.
        let p = predict(&form(0, 2, 0), &form(1, 2, 0), &[]);
        assert!(close(p.home_win_probability, 28.6));
        assert!(close(p.away_win_probability, 71.4));
        assert!(close(p.draw_probability, 0.0));
        assert_eq!(p.predicted_result, Outcome::AwayWin);
        assert_eq!(p.confidence, Confidence::High);
    }

    #[test]
    fn even_sides_tie_to_home_with_medium_confidence() {
        let p = predict(&form(1, 0, 0), &form(1, 0, 0), &[]);
        assert!(close(p.home_win_probability, 50.0));
        assert!(close(p.away_win_probability, 50.0));
        assert_eq!(p.predicted_result, Outcome::HomeWin);
        assert_eq!(p.confidence, Confidence::Medium);
    }

    #[test]
    fn h2h_bump_clamps_draw_without_renormalising() {
        let history = [h2h(2, 0), h2h(1, 0), h2h(3, 1)];
        let p = predict(&form(5, 0, 0), &form(0, 0, 5), &history);
        assert!(close(p.home_win_probability, 110.0));
        assert!(close(p.away_win_probability, 0.0));
        assert!(close(p.draw_probability, 0.0));
        assert_eq!(p.predicted_result, Outcome::HomeWin);
    }

    #[test]
    fn h2h_mixed_history() {
        // 7 * 1.3 = 9.1 -> 9 vs 5: 64.3 / 35.7.
        let history = [h2h(2, 0), h2h(1, 0), h2h(0, 1), h2h(1, 1)];
        let p = predict(&form(2, 1, 0), &form(1, 2, 0), &history);
        assert!(close(p.home_win_probability, 69.3));
        assert!(close(p.away_win_probability, 38.2));
        assert!(close(p.draw_probability, 0.0));
        assert_eq!(p.confidence, Confidence::High);
    }

    #[test]
    fn drawn_history_can_make_draw_the_pick() {
        let history = [h2h(0, 0), h2h(1, 1)];
        let p = predict(&Form::default(), &Form::default(), &history);
        assert!(close(p.draw_probability, 33.4));
        assert_eq!(p.predicted_result, Outcome::Draw);
        assert_eq!(p.confidence, Confidence::Low);
    }

    #[test]
    fn unscored_h2h_counts_only_towards_total() {
        let mut pending = h2h(0, 0);
        pending.home_score = None;
        pending.away_score = None;
        let history = [h2h(1, 0), pending];
        let p = predict(&Form::default(), &Form::default(), &history);
        assert!(close(p.home_win_probability, 38.3));
        assert!(close(p.away_win_probability, 33.3));
    }

    #[test]
    fn rounding_is_from_exact_value() {
        assert!(close(round1(0.15), 0.1));
        assert!(close(round1(200.0 / 3.0), 66.7));
        assert_eq!(round1(-0.000_000_1).to_string(), "0");
        assert!(close(round_dp(19.0 / 7.0, 2), 2.71));
    }

    #[test]
    fn form_from_fixtures_skips_unfinished() {
        let fixtures = [
            fixture(1, "FT", (10, "Home FC"), (20, "Away FC"), (Some(2), Some(0))),
            fixture(2, "FT", (30, "Other"), (10, "Home FC"), (Some(1), Some(1))),
            fixture(3, "FT", (10, "Home FC"), (40, "Rival"), (Some(0), Some(3))),
            fixture(4, "NS", (50, "Next"), (10, "Home FC"), (None, None)),
            fixture(5, "2H", (10, "Home FC"), (60, "Live"), (Some(4), Some(0))),
        ];
        let form = Form::from_fixtures(10, &fixtures);
        assert_eq!((form.wins, form.draws, form.losses), (1, 1, 1));
        assert_eq!(form.goals_for, 3);
        assert_eq!(form.goals_against, 4);
        assert_eq!(form.matches.len(), 5);
        assert_eq!(form.letters(), "WDL??");
        assert_eq!(form.matches[1].team_score, Some(1));
        assert_eq!(form.matches[4].outcome, None);
    }

    #[test]
    fn h2h_from_fixture_keeps_fields() {
        let f = fixture(9, "FT", (10, "Home FC"), (20, "Away FC"), (Some(1), Some(2)));
        let m = H2hMatch::from(&f);
        assert_eq!(m.home_team, "Home FC");
        assert_eq!(m.away_score, Some(2));
        assert_eq!(m.league, "Premier League");
        assert_eq!(m.venue, "Anfield");
    }
}
