//! Text rendering of everything the bot says.

use chrono::{Duration, NaiveDate};

use crate::{
    bot::Feature,
    conf::League,
    entitlement::FREE_DAILY_QUERIES,
    predict::{self, H2hMatch, MatchPrediction},
    provider::{Fixture, Scorer, Standing, TeamStatistics},
    transport::Reply,
};

const TOP_SCORERS_SHOWN: usize = 10;
const BIGGEST_WINS_KEPT: usize = 5;
const BIGGEST_WINS_SHOWN: usize = 3;
const BIGGEST_WIN_MARGIN: u32 = 3;
const SEPARATOR: &str = "-----------------------------";

pub fn main_menu(is_premium: bool) -> Reply {
    let text = if is_premium {
        "Welcome to the Football Bot! ⚽️\n\n\
        💎 Premium plan active\n\
        🔹 All leagues available\n\
        🔹 Unlimited queries\n\
        🔹 Advanced statistics\n\n\
        Enjoy every feature!"
            .to_string()
    } else {
        format!(
            "Welcome to the Football Bot! ⚽️\n\n\
            🔹 Free plan active\n\
            🔹 Leagues: Premier League, La Liga, Serie A, Bundesliga, Ligue 1\n\
            🔹 {FREE_DAILY_QUERIES} queries per day\n\
            🔹 Live goal alerts\n\n\
            💎 Upgrade to Premium for every league, unlimited queries \
            and advanced statistics."
        )
    };
    let reply = Reply::text(text)
        .button("📅 Today's matches", Feature::Matches.token())
        .button("🏆 Standings", Feature::Standings.token())
        .button("🥅 Top scorers", Feature::Scorers.token());
    let reply = if is_premium {
        reply
            .button("📊 Advanced statistics", Feature::AdvancedStats.token())
            .button("📰 Weekly summary", Feature::WeeklySummary.token())
            .button("🔍 Head to head", Feature::H2h.token())
            .button("🔮 Predictions", Feature::Predictions.token())
    } else {
        reply
            .button("📊 Basic statistics", Feature::BasicStats.token())
            .button("💎 Upgrade to Premium", "premium_info")
    };
    reply.button("ℹ️ Help", "help")
}

pub fn league_menu(feature: Feature, leagues: &[&League]) -> Reply {
    let mut reply =
        Reply::text(format!("Select a league for {}:", feature.title()));
    for league in leagues {
        reply = reply.button(&league.name, &feature.league_token(league.id));
    }
    reply.back()
}

/// Kick-off times are shown shifted by `utc_offset_hours`.
pub fn todays_fixtures(
    league: &str,
    fixtures: &[Fixture],
    utc_offset_hours: i32,
) -> Reply {
    if fixtures.is_empty() {
        return Reply::text(format!("No matches scheduled today in {league}."))
            .back();
    }
    let lines: Vec<String> = fixtures
        .iter()
        .map(|f| {
            format!(
                "{} - {} vs {}",
                kick_off(f, utc_offset_hours),
                f.teams.home.name,
                f.teams.away.name
            )
        })
        .collect();
    Reply::text(format!("📅 Today's matches in {league}:\n\n{}", lines.join("\n")))
        .back()
}

fn kick_off(fixture: &Fixture, utc_offset_hours: i32) -> String {
    let local =
        fixture.fixture.date + Duration::hours(i64::from(utc_offset_hours));
    local.format("%H:%M").to_string()
}

pub fn standings(league: &str, table: &[Standing]) -> Reply {
    if table.is_empty() {
        return Reply::text(format!("Standings for {league} are unavailable."))
            .back();
    }
    let lines: Vec<String> = table
        .iter()
        .map(|s| {
            let mut line = format!(
                "{}. {} - {} pts\n   {} played, {}W {}D {}L, goals {}:{} ({:+})",
                s.rank,
                s.team,
                s.points,
                s.played,
                s.wins,
                s.draws,
                s.losses,
                s.goals_for,
                s.goals_against,
                s.goal_diff,
            );
            if let Some(form) = s.form.as_deref().filter(|f| !f.is_empty()) {
                let last: String = last_chars(form, 5);
                line.push_str(&format!(", form {last}"));
            }
            line
        })
        .collect();
    Reply::text(format!("🏆 Standings - {league}:\n\n{}", lines.join("\n"))).back()
}

fn last_chars(s: &str, n: usize) -> String {
    let skip = s.chars().count().saturating_sub(n);
    s.chars().skip(skip).collect()
}

pub fn top_scorers(league: &str, scorers: &[Scorer]) -> Reply {
    if scorers.is_empty() {
        return Reply::text(format!("Top scorers for {league} are unavailable."))
            .back();
    }
    let lines: Vec<String> = scorers
        .iter()
        .take(TOP_SCORERS_SHOWN)
        .map(|s| format!("{} ({}) - {} goals", s.name, s.team, s.goals))
        .collect();
    Reply::text(format!("🥅 Top scorers - {league}:\n\n{}", lines.join("\n")))
        .back()
}

pub fn advanced_stats(league: &str, stats: &[TeamStatistics]) -> Reply {
    let mut text = format!("📊 Advanced statistics - {league}:\n\n");
    for team in stats {
        text.push_str(&format!("{}:\n", team.team));
        for (kind, value) in &team.values {
            text.push_str(&format!("• {kind}: {value}\n"));
        }
        text.push('\n');
    }
    Reply::text(text.trim_end().to_string()).back()
}

pub fn basic_stats(league: &str) -> Reply {
    Reply::text(format!(
        "📊 Basic statistics - {league}\n\n\
        Basic statistics are part of the free plan.\n\n\
        💎 Upgrade to Premium for:\n\
        • Detailed per-match statistics\n\
        • Possession analysis\n\
        • Shots on target\n\
        • Fouls and cards"
    ))
    .button("💎 Upgrade to Premium", "premium_info")
    .back()
}

/// Used when a feature needs today's first fixture and there is none.
pub fn no_fixture_today(league: &str, what: &str) -> Reply {
    Reply::text(format!("No matches today in {league} for {what}.")).back()
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FinishedMatch {
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    pub goal_difference: u32,
}

impl FinishedMatch {
    pub fn score(&self) -> String {
        format!("{}-{}", self.home_score, self.away_score)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WeeklySummary {
    pub league: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Every fixture in the window, finished or not.
    pub total_matches: usize,
    /// Goals of finished matches over `total_matches`, two decimals.
    pub goals_per_match: f64,
    pub results: Vec<FinishedMatch>,
    /// Margin of at least three, widest first, at most five.
    pub biggest_wins: Vec<FinishedMatch>,
}

impl WeeklySummary {
    /// `None` when the window holds no fixtures at all.
    pub fn from_fixtures(
        league: &str,
        from: NaiveDate,
        to: NaiveDate,
        fixtures: &[Fixture],
    ) -> Option<Self> {
        if fixtures.is_empty() {
            return None;
        }
        let results: Vec<FinishedMatch> = fixtures
            .iter()
            .filter(|f| f.is_finished())
            .filter_map(|f| {
                let (home_score, away_score) = (f.goals.home?, f.goals.away?);
                Some(FinishedMatch {
                    home_team: f.teams.home.name.clone(),
                    away_team: f.teams.away.name.clone(),
                    home_score,
                    away_score,
                    goal_difference: home_score.abs_diff(away_score),
                })
            })
            .collect();
        let total_goals: u32 =
            results.iter().map(|m| m.home_score + m.away_score).sum();
        let goals_per_match = predict::round_dp(
            f64::from(total_goals) / fixtures.len() as f64,
            2,
        );
        let mut biggest_wins: Vec<FinishedMatch> = results
            .iter()
            .filter(|m| m.goal_difference >= BIGGEST_WIN_MARGIN)
            .cloned()
            .collect();
        // Stable: equal margins keep provider order.
        biggest_wins.sort_by(|a, b| b.goal_difference.cmp(&a.goal_difference));
        biggest_wins.truncate(BIGGEST_WINS_KEPT);
        Some(Self {
            league: league.to_string(),
            from,
            to,
            total_matches: fixtures.len(),
            goals_per_match,
            results,
            biggest_wins,
        })
    }
}

pub fn weekly_summary(league: &str, summary: Option<&WeeklySummary>) -> Reply {
    let Some(summary) = summary else {
        return Reply::text(format!(
            "Not enough data for a weekly summary of {league}."
        ))
        .back();
    };
    let mut text = format!(
        "📰 Weekly summary - {}\n\n\
        📅 Period: {} - {}\n\
        ⚽ Matches: {}\n\
        🥅 Goals per match: {}\n",
        summary.league,
        summary.from.format("%d/%m"),
        summary.to.format("%d/%m"),
        summary.total_matches,
        summary.goals_per_match,
    );
    if !summary.biggest_wins.is_empty() {
        text.push_str("\n🏆 Biggest wins:\n");
        for win in summary.biggest_wins.iter().take(BIGGEST_WINS_SHOWN) {
            text.push_str(&format!(
                "• {} {} {}\n",
                win.home_team,
                win.score(),
                win.away_team
            ));
        }
    }
    Reply::text(text.trim_end().to_string()).back()
}

pub fn head_to_head(home: &str, away: &str, history: &[H2hMatch]) -> Reply {
    if history.is_empty() {
        return Reply::text(format!("No previous meetings of {home} and {away}."))
            .back();
    }
    let lines: Vec<String> = history
        .iter()
        .map(|m| {
            format!(
                "{} - {} {} {} ({}, {})",
                m.date.format("%d/%m/%Y"),
                m.home_team,
                score(m.home_score, m.away_score),
                m.away_team,
                m.league,
                m.venue
            )
        })
        .collect();
    Reply::text(format!(
        "🔍 Head to head - {home} vs {away}\n\n{}",
        lines.join("\n")
    ))
    .back()
}

fn score(home: Option<u32>, away: Option<u32>) -> String {
    match (home, away) {
        (Some(h), Some(a)) => format!("{h}-{a}"),
        _ => "vs".to_string(),
    }
}

pub fn prediction(p: &MatchPrediction) -> Reply {
    let pred = &p.prediction;
    Reply::text(format!(
        "🔮 Prediction - {} vs {}\n\n\
        🏠 Home win: {:.1}%\n\
        ✈️ Away win: {:.1}%\n\
        🤝 Draw: {:.1}%\n\n\
        📈 Form: {} / {}\n\
        📊 Pick: {}\n\
        🎯 Confidence: {}",
        p.home_team,
        p.away_team,
        pred.home_win_probability,
        pred.away_win_probability,
        pred.draw_probability,
        p.home_form.letters(),
        p.away_form.letters(),
        pred.predicted_result.label(),
        pred.confidence.label(),
    ))
    .back()
}

pub fn premium_required() -> Reply {
    Reply::text(
        "💎 Premium feature\n\n\
        This feature is available to Premium users only.\n\n\
        💎 Premium unlocks:\n\
        • Advanced statistics\n\
        • Weekly summaries\n\
        • Head to head history\n\
        • Match predictions\n\
        • Every league\n\
        • Unlimited queries",
    )
    .button("💎 Upgrade to Premium", "premium_info")
    .back()
}

pub fn premium_info() -> Reply {
    Reply::text(
        "💎 Premium plans\n\n\
        Premium:\n\
        • Every league\n\
        • Unlimited queries\n\
        • Advanced statistics\n\
        • Weekly summaries\n\
        • Head to head history\n\
        • Predictions\n\n\
        Pro:\n\
        • Everything in Premium\n\
        • Priority support\n\n\
        To subscribe, contact the administrator.",
    )
    .back()
}

pub fn help() -> Reply {
    Reply::text(format!(
        "ℹ️ Help\n\n\
        /start - Main menu\n\n\
        Free plan:\n\
        • Today's matches (European leagues)\n\
        • Standings\n\
        • Top scorers\n\
        • Basic statistics\n\
        • {FREE_DAILY_QUERIES} queries per day\n\n\
        Premium:\n\
        • Every league\n\
        • Unlimited queries\n\
        • Advanced statistics\n\
        • Weekly summaries\n\
        • Head to head history\n\
        • Predictions"
    ))
    .back()
}

pub fn limit_reached() -> Reply {
    Reply::text(
        "⚠️ You have reached today's free query limit.\n\n\
        💎 Upgrade to Premium for unlimited queries.",
    )
    .button("💎 Upgrade to Premium", "premium_info")
}

pub fn unavailable(what: &str) -> Reply {
    Reply::text(format!("Could not fetch {what} right now. Please try again later."))
        .back()
}

pub fn goal_alert(league: &str, fixture: &Fixture) -> String {
    format!(
        "⚽️ GOAL! ⚽️\n🏆 {league}\n🔔 {} {} - {} {}\n{SEPARATOR}",
        fixture.teams.home.name,
        fixture.goals.home.unwrap_or(0),
        fixture.goals.away.unwrap_or(0),
        fixture.teams.away.name,
    )
}

pub fn full_time_alert(
    league: &str,
    fixture: &Fixture,
    utc_offset_hours: i32,
) -> String {
    format!(
        "🏁 FULL TIME 🏁\n🏆 {league}\n{} - {} {}-{} {}\n{SEPARATOR}",
        kick_off(fixture, utc_offset_hours),
        fixture.teams.home.name,
        fixture.goals.home.unwrap_or(0),
        fixture.goals.away.unwrap_or(0),
        fixture.teams.away.name,
    )
}
