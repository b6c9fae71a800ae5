use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use crate::{
    conf::Conf,
    data::Storage,
    provider::{Fixture, SportsData},
    report,
    transport::{Reply, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKey {
    Goal { fixture: i64, home: u32, away: u32 },
    FullTime { fixture: i64 },
}

/// Remembers announced keys, forgetting the oldest beyond `capacity`.
pub struct DedupCache {
    seen: HashSet<AlertKey>,
    order: VecDeque<AlertKey>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// True the first time `key` is offered (or once it has been evicted).
    pub fn first_time(&mut self, key: AlertKey) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, key: &AlertKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub key: AlertKey,
    pub text: String,
}

/// Alerts not yet in `cache` for this batch of live fixtures, in fixture
/// order. The cache is left untouched; commit keys once they are sent.
pub fn announcements(
    fixtures: &[Fixture],
    conf: &Conf,
    cache: &DedupCache,
) -> Vec<Announcement> {
    let mut due = Vec::new();
    for fixture in fixtures {
        let Some(league) = conf.league(fixture.league.id) else {
            continue;
        };
        let home = fixture.goals.home.unwrap_or(0);
        let away = fixture.goals.away.unwrap_or(0);
        if fixture.is_in_play() && (home > 0 || away > 0) {
            let key = AlertKey::Goal {
                fixture: fixture.id(),
                home,
                away,
            };
            if !cache.contains(&key) {
                due.push(Announcement {
                    key,
                    text: report::goal_alert(&league.name, fixture),
                });
            }
        }
        let key = AlertKey::FullTime {
            fixture: fixture.id(),
        };
        if fixture.is_finished() && !cache.contains(&key) {
            due.push(Announcement {
                key,
                text: report::full_time_alert(
                    &league.name,
                    fixture,
                    conf.utc_offset_hours,
                ),
            });
        }
    }
    due
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Delivery {
    pub sent: u64,
    pub failed: u64,
}

/// Sends `reply` to each chat in turn, pausing between sends.
pub async fn broadcast(
    transport: &dyn Transport,
    chats: &[i64],
    reply: &Reply,
    pause: Duration,
) -> Delivery {
    let mut delivery = Delivery::default();
    for &chat in chats {
        match transport.send(chat, reply).await {
            Ok(()) => delivery.sent += 1,
            Err(error) => {
                tracing::warn!(?error, chat, "Failed to deliver broadcast.");
                delivery.failed += 1;
            }
        }
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    delivery
}

pub struct Monitor {
    storage: Storage,
    data: Arc<dyn SportsData>,
    transport: Arc<dyn Transport>,
    conf: Arc<Conf>,
    cache: DedupCache,
}

impl Monitor {
    pub fn new(
        storage: Storage,
        data: Arc<dyn SportsData>,
        transport: Arc<dyn Transport>,
        conf: Arc<Conf>,
    ) -> Self {
        let cache = DedupCache::new(conf.monitor.dedup_capacity);
        Self {
            storage,
            data,
            transport,
            conf,
            cache,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        if !self.conf.monitor.enabled {
            tracing::info!("Live monitor disabled.");
            return Ok(());
        }
        let interval = Duration::from_secs_f32(self.conf.monitor.interval);
        tracing::info!(?interval, "Live monitor started.");
        loop {
            if let Err(error) = self.poll().await {
                tracing::error!(?error, "Live poll failed.");
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One poll: fetch, filter, announce. Returns the number of alerts.
    /// Alerts are only marked as announced once the audience is known.
    #[tracing::instrument(skip(self))]
    pub async fn poll(&mut self) -> anyhow::Result<usize> {
        let fixtures = self.data.live_fixtures().await?;
        let due = announcements(&fixtures, &self.conf, &self.cache);
        if due.is_empty() {
            return Ok(0);
        }
        let chats: Vec<i64> = self
            .storage
            .active_users()
            .await?
            .iter()
            .map(|u| u.chat_id)
            .collect();
        let pause = Duration::from_secs_f32(self.conf.monitor.broadcast_pause);
        let mut announced = 0;
        for Announcement { key, text } in due {
            // The same key may appear twice when a fixture is listed twice.
            if !self.cache.first_time(key) {
                continue;
            }
            let delivery = broadcast(
                self.transport.as_ref(),
                &chats,
                &Reply::text(text),
                pause,
            )
            .await;
            tracing::info!(?key, ?delivery, "Alert broadcast.");
            announced += 1;
        }
        Ok(announced)
    }
}
