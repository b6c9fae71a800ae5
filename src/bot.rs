//! Turns chat events into replies: registration, gating, quota, rendering.

use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, bail};
use chrono::{Duration, NaiveDate, Utc};

use crate::{
    conf::{Conf, League},
    data::Storage,
    predict,
    provider::{Fixture, SportsData},
    report,
    transport::{Event, Reply, Transport},
    types::Profile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Matches,
    Standings,
    Scorers,
    BasicStats,
    AdvancedStats,
    WeeklySummary,
    H2h,
    Predictions,
}

impl Feature {
    pub const ALL: [Self; 8] = [
        Self::Matches,
        Self::Standings,
        Self::Scorers,
        Self::BasicStats,
        Self::AdvancedStats,
        Self::WeeklySummary,
        Self::H2h,
        Self::Predictions,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Self::Matches => "matches",
            Self::Standings => "standings",
            Self::Scorers => "scorers",
            Self::BasicStats => "basic_stats",
            Self::AdvancedStats => "advanced_stats",
            Self::WeeklySummary => "weekly_summary",
            Self::H2h => "h2h",
            Self::Predictions => "predictions",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Matches => "today's matches",
            Self::Standings => "standings",
            Self::Scorers => "top scorers",
            Self::BasicStats => "basic statistics",
            Self::AdvancedStats => "advanced statistics",
            Self::WeeklySummary => "the weekly summary",
            Self::H2h => "head to head",
            Self::Predictions => "predictions",
        }
    }

    pub fn is_premium_only(self) -> bool {
        matches!(
            self,
            Self::AdvancedStats
                | Self::WeeklySummary
                | Self::H2h
                | Self::Predictions
        )
    }

    pub fn league_token(self, league: i64) -> String {
        format!("league:{}:{league}", self.token())
    }
}

impl FromStr for Feature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.token() == s)
            .ok_or_else(|| anyhow!("Unknown feature: {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Menu(Feature),
    League(Feature, i64),
    PremiumInfo,
    Help,
    Back,
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "premium_info" => Self::PremiumInfo,
            "help" => Self::Help,
            "back" => Self::Back,
            _ => match s.strip_prefix("league:") {
                Some(rest) => {
                    let Some((kind, id)) = rest.split_once(':') else {
                        bail!("Malformed league action: {s:?}");
                    };
                    Self::League(kind.parse()?, id.parse()?)
                }
                None => Self::Menu(s.parse()?),
            },
        };
        Ok(action)
    }
}

pub struct Bot {
    storage: Storage,
    data: Arc<dyn SportsData>,
    transport: Arc<dyn Transport>,
    conf: Arc<Conf>,
}

impl Bot {
    pub fn new(
        storage: Storage,
        data: Arc<dyn SportsData>,
        transport: Arc<dyn Transport>,
        conf: Arc<Conf>,
    ) -> Self {
        Self {
            storage,
            data,
            transport,
            conf,
        }
    }

    /// Handles one event to completion. Failures are logged, never raised.
    #[tracing::instrument(skip_all, fields(chat = event.chat()))]
    pub async fn handle(&self, event: Event) {
        if let Event::Action { ack: Some(ack), .. } = &event {
            if let Err(error) = self.transport.acknowledge(ack).await {
                tracing::warn!(?error, "Failed to acknowledge action.");
            }
        }
        let Some(reply) = self.respond(&event).await else {
            return;
        };
        if let Err(error) = self.transport.send(event.chat(), &reply).await {
            tracing::error!(?error, "Failed to send reply.");
        }
    }

    pub async fn respond(&self, event: &Event) -> Option<Reply> {
        match event {
            Event::Start { profile } => Some(self.start(profile).await),
            Event::Action { chat, token, .. } => self.action(*chat, token).await,
        }
    }

    async fn start(&self, profile: &Profile) -> Reply {
        let chat = profile.chat_id;
        if let Err(error) = self.storage.add_user(profile).await {
            tracing::error!(?error, "Failed to register user.");
        }
        self.touch(chat).await;
        report::main_menu(self.storage.is_premium(chat).await)
    }

    async fn action(&self, chat: i64, token: &str) -> Option<Reply> {
        self.touch(chat).await;
        if !self.storage.can_make_query(chat).await {
            tracing::info!("Daily query limit reached.");
            return Some(report::limit_reached());
        }
        let action = match token.parse::<Action>() {
            Ok(action) => action,
            Err(error) => {
                tracing::warn!(?error, token, "Ignoring unknown action.");
                return None;
            }
        };
        let is_premium = self.storage.is_premium(chat).await;
        let reply = match action {
            Action::Menu(feature) if feature.is_premium_only() && !is_premium => {
                report::premium_required()
            }
            Action::Menu(feature) => {
                report::league_menu(feature, &self.conf.leagues_for(is_premium))
            }
            Action::League(feature, league_id) => {
                let Some(league) = self.conf.league(league_id) else {
                    tracing::warn!(league_id, "Ignoring unconfigured league.");
                    return None;
                };
                if !is_premium && (!league.free || feature.is_premium_only()) {
                    report::premium_required()
                } else {
                    self.storage
                        .log_query(chat, feature.token(), Some(league_id))
                        .await;
                    self.render(feature, league).await
                }
            }
            Action::PremiumInfo => report::premium_info(),
            Action::Help => report::help(),
            Action::Back => report::main_menu(is_premium),
        };
        Some(reply)
    }

    async fn touch(&self, chat: i64) {
        if let Err(error) = self.storage.touch(chat).await {
            tracing::error!(?error, "Failed to refresh activity.");
        }
    }

    async fn render(&self, feature: Feature, league: &League) -> Reply {
        let today = Utc::now().date_naive();
        match self.render_at(feature, league, today).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(
                    ?error,
                    feature = feature.token(),
                    league = league.id,
                    "Failed to fetch data."
                );
                report::unavailable(feature.title())
            }
        }
    }

    async fn render_at(
        &self,
        feature: Feature,
        league: &League,
        today: NaiveDate,
    ) -> anyhow::Result<Reply> {
        let data = self.data.as_ref();
        let season = self.conf.season();
        let name = league.name.as_str();
        let reply = match feature {
            Feature::Matches => {
                let fixtures =
                    data.league_fixtures_on(league.id, season, today).await?;
                report::todays_fixtures(
                    name,
                    &fixtures,
                    self.conf.utc_offset_hours,
                )
            }
            Feature::Standings => {
                report::standings(name, &data.standings(league.id, season).await?)
            }
            Feature::Scorers => report::top_scorers(
                name,
                &data.top_scorers(league.id, season).await?,
            ),
            Feature::BasicStats => report::basic_stats(name),
            Feature::AdvancedStats => {
                match self.first_fixture(league.id, season, today).await? {
                    Some(fixture) => report::advanced_stats(
                        name,
                        &data.fixture_statistics(fixture.id()).await?,
                    ),
                    None => report::no_fixture_today(name, feature.title()),
                }
            }
            Feature::WeeklySummary => {
                let from = today - Duration::days(7);
                let fixtures = data
                    .league_fixtures_between(league.id, season, from, today)
                    .await?;
                let summary = report::WeeklySummary::from_fixtures(
                    name, from, today, &fixtures,
                );
                report::weekly_summary(name, summary.as_ref())
            }
            Feature::H2h => {
                match self.first_fixture(league.id, season, today).await? {
                    Some(fixture) => {
                        let history = predict::compute_h2h(
                            data,
                            fixture.teams.home.id,
                            fixture.teams.away.id,
                            self.conf.predict.h2h_matches,
                        )
                        .await?;
                        report::head_to_head(
                            &fixture.teams.home.name,
                            &fixture.teams.away.name,
                            &history,
                        )
                    }
                    None => report::no_fixture_today(name, feature.title()),
                }
            }
            Feature::Predictions => {
                match self.first_fixture(league.id, season, today).await? {
                    Some(fixture) => {
                        let prediction = predict::match_prediction(
                            data,
                            fixture.id(),
                            self.conf.predict.form_matches,
                            self.conf.predict.h2h_matches,
                        )
                        .await?;
                        match prediction {
                            Some(p) => report::prediction(&p),
                            None => report::unavailable("the prediction"),
                        }
                    }
                    None => report::no_fixture_today(name, feature.title()),
                }
            }
        };
        Ok(reply)
    }

    async fn first_fixture(
        &self,
        league: i64,
        season: i32,
        today: NaiveDate,
    ) -> anyhow::Result<Option<Fixture>> {
        let fixtures = self
            .data
            .league_fixtures_on(league, season, today)
            .await?;
        Ok(fixtures.into_iter().next())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        data::tests::{profile, storage},
        entitlement::Plan,
        provider::{
            tests::fixture, Result, Scorer, Standing, TeamStatistics,
        },
        transport::tests::Recorder,
    };

    /// Serves canned fixtures. `broken` fails every fixture listing.
    #[derive(Default)]
    pub(crate) struct Fake {
        pub(crate) today: Vec<Fixture>,
        pub(crate) form: Vec<Fixture>,
        pub(crate) h2h: Vec<Fixture>,
        pub(crate) live: Vec<Fixture>,
        pub(crate) broken: bool,
    }

    impl Fake {
        fn listing(&self, fixtures: &[Fixture]) -> Result<Vec<Fixture>> {
            if self.broken {
                bail!("Provider is down");
            }
            Ok(fixtures.to_vec())
        }
    }

    #[async_trait]
    impl SportsData for Fake {
        async fn fixture(&self, id: i64) -> Result<Option<Fixture>> {
            Ok(self.today.iter().find(|f| f.id() == id).cloned())
        }

        async fn team_fixtures(&self, _: i64, _: u32) -> Result<Vec<Fixture>> {
            self.listing(&self.form)
        }

        async fn head_to_head(
            &self,
            _: i64,
            _: i64,
            _: u32,
        ) -> Result<Vec<Fixture>> {
            self.listing(&self.h2h)
        }

        async fn league_fixtures_on(
            &self,
            _: i64,
            _: i32,
            _: NaiveDate,
        ) -> Result<Vec<Fixture>> {
            self.listing(&self.today)
        }

        async fn league_fixtures_between(
            &self,
            _: i64,
            _: i32,
            _: NaiveDate,
            _: NaiveDate,
        ) -> Result<Vec<Fixture>> {
            self.listing(&self.today)
        }

        async fn live_fixtures(&self) -> Result<Vec<Fixture>> {
            self.listing(&self.live)
        }

        async fn standings(&self, _: i64, _: i32) -> Result<Vec<Standing>> {
            Ok(Vec::new())
        }

        async fn top_scorers(&self, _: i64, _: i32) -> Result<Vec<Scorer>> {
            Ok(vec![Scorer {
                name: "Lewandowski".to_string(),
                team: "Barcelona".to_string(),
                goals: 12,
            }])
        }

        async fn fixture_statistics(
            &self,
            _: i64,
        ) -> Result<Vec<TeamStatistics>> {
            Ok(vec![TeamStatistics {
                team: "Boca".to_string(),
                values: vec![("Ball Possession".to_string(), "55%".to_string())],
            }])
        }
    }

    fn derby() -> Vec<Fixture> {
        vec![fixture(100, "NS", (1, "Boca"), (2, "River"), (None, None))]
    }

    fn action(chat: i64, token: &str) -> Event {
        Event::Action {
            chat,
            token: token.to_string(),
            ack: None,
        }
    }

    async fn bot(
        data: Fake,
    ) -> (tempfile::TempDir, Storage, Arc<Recorder>, Bot) {
        let (dir, storage) = storage().await;
        let recorder = Arc::new(Recorder::default());
        let bot = Bot::new(
            storage.clone(),
            Arc::new(data),
            recorder.clone(),
            Arc::new(Conf::default()),
        );
        (dir, storage, recorder, bot)
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[test]
    fn action_tokens() {
        assert_eq!(
            "league:weekly_summary:39".parse::<Action>().unwrap(),
            Action::League(Feature::WeeklySummary, 39)
        );
        assert_eq!("h2h".parse::<Action>().unwrap(), Action::Menu(Feature::H2h));
        assert_eq!("back".parse::<Action>().unwrap(), Action::Back);
        for bad in ["league:matches", "league:matches:x", "league:nope:39", ""] {
            assert!(bad.parse::<Action>().is_err(), "{bad}");
        }
        for feature in Feature::ALL {
            assert_eq!(
                feature.league_token(7).parse::<Action>().unwrap(),
                Action::League(feature, 7)
            );
        }
    }

    #[tokio::test]
    async fn start_registers_and_shows_free_menu() {
        let (_dir, storage, _, bot) = bot(Fake::default()).await;
        let reply = bot
            .respond(&Event::Start {
                profile: profile(5),
            })
            .await
            .unwrap();
        assert!(reply.text.contains("Free plan active"));
        assert!(reply.actions().contains(&"basic_stats"));
        let user = storage.user(5).await.unwrap().unwrap();
        assert_eq!(user.plan, Plan::Free);
    }

    #[tokio::test]
    async fn free_league_query_is_logged_and_rendered() {
        let data = Fake {
            today: derby(),
            ..Fake::default()
        };
        let (_dir, storage, _, bot) = bot(data).await;
        storage.add_user(&profile(5)).await.unwrap();
        let reply = bot.respond(&action(5, "league:matches:39")).await.unwrap();
        assert!(reply.text.contains("Boca vs River"), "{}", reply.text);
        assert_eq!(storage.queries_count(5, today()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn free_chat_league_menu_lists_free_leagues() {
        let (_dir, storage, _, bot) = bot(Fake::default()).await;
        storage.add_user(&profile(5)).await.unwrap();
        let reply = bot.respond(&action(5, "standings")).await.unwrap();
        assert_eq!(
            reply.actions(),
            vec![
                "league:standings:39",
                "league:standings:140",
                "league:standings:135",
                "league:standings:78",
                "league:standings:61",
                "back",
            ]
        );
        // Opening a menu is not a query.
        assert_eq!(storage.queries_count(5, today()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn premium_chat_sees_every_league() {
        let (_dir, storage, _, bot) = bot(Fake::default()).await;
        storage.add_user(&profile(5)).await.unwrap();
        storage.set_plan(5, Plan::Premium, None).await.unwrap();
        let reply = bot.respond(&action(5, "predictions")).await.unwrap();
        assert_eq!(reply.actions().len(), Conf::default().leagues.len() + 1);
    }

    #[tokio::test]
    async fn free_chat_is_refused_premium_features() {
        let (_dir, storage, _, bot) = bot(Fake::default()).await;
        storage.add_user(&profile(5)).await.unwrap();
        let premium_required = report::premium_required();
        for token in [
            "predictions",
            "league:predictions:39",
            "league:advanced_stats:39",
            "league:matches:128",
        ] {
            let reply = bot.respond(&action(5, token)).await.unwrap();
            assert_eq!(reply, premium_required, "{token}");
        }
        assert_eq!(storage.queries_count(5, today()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn quota_exhausted() {
        let (_dir, storage, _, bot) = bot(Fake::default()).await;
        storage.add_user(&profile(5)).await.unwrap();
        for _ in 0..10 {
            storage.log_query(5, "matches", Some(39)).await;
        }
        let reply = bot.respond(&action(5, "help")).await.unwrap();
        assert_eq!(reply, report::limit_reached());

        storage.set_plan(5, Plan::Pro, None).await.unwrap();
        let reply = bot.respond(&action(5, "help")).await.unwrap();
        assert_eq!(reply, report::help());
    }

    #[tokio::test]
    async fn premium_prediction() {
        let data = Fake {
            today: derby(),
            form: vec![fixture(
                90,
                "FT",
                (1, "Boca"),
                (2, "River"),
                (Some(2), Some(0)),
            )],
            ..Fake::default()
        };
        let (_dir, storage, _, bot) = bot(data).await;
        storage.add_user(&profile(5)).await.unwrap();
        storage.set_plan(5, Plan::Premium, None).await.unwrap();
        let reply =
            bot.respond(&action(5, "league:predictions:128")).await.unwrap();
        assert!(reply.text.contains("Boca vs River"), "{}", reply.text);
        assert!(reply.text.contains("Home win: 100.0%"), "{}", reply.text);
        assert!(reply.text.contains("Confidence: High"), "{}", reply.text);
        assert_eq!(storage.queries_count(5, today()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn premium_advanced_stats_without_fixtures() {
        let (_dir, storage, _, bot) = bot(Fake::default()).await;
        storage.add_user(&profile(5)).await.unwrap();
        storage.set_plan(5, Plan::Premium, None).await.unwrap();
        let reply = bot
            .respond(&action(5, "league:advanced_stats:39"))
            .await
            .unwrap();
        assert_eq!(
            reply,
            report::no_fixture_today("Premier League", "advanced statistics")
        );
    }

    #[tokio::test]
    async fn provider_failure_renders_unavailable() {
        let data = Fake {
            broken: true,
            ..Fake::default()
        };
        let (_dir, storage, _, bot) = bot(data).await;
        storage.add_user(&profile(5)).await.unwrap();
        let reply = bot.respond(&action(5, "league:matches:39")).await.unwrap();
        assert_eq!(reply, report::unavailable("today's matches"));
        assert_eq!(storage.queries_count(5, today()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let (_dir, storage, _, bot) = bot(Fake::default()).await;
        storage.add_user(&profile(5)).await.unwrap();
        assert!(bot.respond(&action(5, "alerts")).await.is_none());
        assert!(bot.respond(&action(5, "league:matches:999")).await.is_none());
    }

    #[tokio::test]
    async fn handle_acknowledges_and_sends() {
        let (_dir, storage, recorder, bot) = bot(Fake::default()).await;
        storage.add_user(&profile(5)).await.unwrap();
        bot.handle(Event::Action {
            chat: 5,
            token: "premium_info".to_string(),
            ack: Some("cb-1".to_string()),
        })
        .await;
        assert_eq!(*recorder.acks.lock().unwrap(), vec!["cb-1".to_string()]);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (5, report::premium_info()));
    }
}
