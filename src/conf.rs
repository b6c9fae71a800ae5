use std::{
    fmt::Debug,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, LazyLock},
};

use anyhow::Context;

pub static GLOBAL: LazyLock<Arc<Conf>> = LazyLock::new(|| {
    let conf = read_or_create_default().unwrap_or_else(|error| {
        panic!("Failed to initialize global config: {error:?}")
    });
    Arc::new(conf)
});

#[must_use]
pub fn global() -> Arc<Conf> {
    (*GLOBAL).clone()
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Conf {
    #[serde(
        serialize_with = "serialize_log_level",
        deserialize_with = "deserialize_log_level"
    )]
    pub log_level: tracing::Level,
    pub addr: IpAddr,
    pub port: u16,
    pub jwt: ConfJwt,
    pub sqlite_busy_timeout: f32,
    pub telegram: ConfTelegram,
    pub provider: ConfProvider,
    pub monitor: ConfMonitor,
    pub predict: ConfPredict,
    /// Hours added to UTC kick-off times when rendering fixtures.
    pub utc_offset_hours: i32,
    /// Defaults to the current UTC year when absent.
    pub season: Option<i32>,
    pub leagues: Vec<League>,
    pub tls: Option<Tls>,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            addr: "127.0.0.1".parse().unwrap_or_else(|_| {
                unreachable!("Fat-fingered default IP address!")
            }),
            port: 3001,
            jwt: ConfJwt::default(),
            sqlite_busy_timeout: 60.0,
            telegram: ConfTelegram::default(),
            provider: ConfProvider::default(),
            monitor: ConfMonitor::default(),
            predict: ConfPredict::default(),
            utc_offset_hours: -3,
            season: None,
            leagues: default_leagues(),
            tls: None,
        }
    }
}

impl Conf {
    pub fn league(&self, id: i64) -> Option<&League> {
        self.leagues.iter().find(|league| league.id == id)
    }

    /// Leagues offered to a chat, in configured order.
    pub fn leagues_for(&self, is_premium: bool) -> Vec<&League> {
        self.leagues
            .iter()
            .filter(|league| is_premium || league.free)
            .collect()
    }

    pub fn season(&self) -> i32 {
        use chrono::Datelike;

        self.season.unwrap_or_else(|| chrono::Utc::now().year())
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct League {
    pub id: i64,
    pub name: String,
    /// Available on the free plan.
    pub free: bool,
}

fn default_leagues() -> Vec<League> {
    [
        (128, "Liga Argentina", false),
        (13, "Copa Libertadores", false),
        (11, "Copa Sudamericana", false),
        (39, "Premier League", true),
        (140, "La Liga", true),
        (135, "Serie A", true),
        (78, "Bundesliga", true),
        (61, "Ligue 1", true),
        (88, "Eredivisie", false),
        (94, "Primeira Liga", false),
    ]
    .into_iter()
    .map(|(id, name, free)| League {
        id,
        name: name.to_string(),
        free,
    })
    .collect()
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct Tls {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct ConfJwt {
    pub secret: String,
    pub audience: String,
    pub issuer: String,
}

impl Default for ConfJwt {
    fn default() -> Self {
        Self {
            secret: "super-secret".to_string(),
            audience: "footbot-admin".to_string(),
            issuer: "footbot".to_string(),
        }
    }
}

impl Debug for ConfJwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfJwt")
            .field("secret", &"<XXXXX>")
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish()
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct ConfTelegram {
    pub address: String,
    pub token: String,
    /// Long-poll timeout for getUpdates, in seconds.
    pub poll_timeout: u64,
}

impl Default for ConfTelegram {
    fn default() -> Self {
        Self {
            address: "api.telegram.org".to_string(),
            token: String::new(),
            poll_timeout: 30,
        }
    }
}

impl Debug for ConfTelegram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfTelegram")
            .field("address", &self.address)
            .field("token", &"<XXXXX>")
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
pub struct ConfProvider {
    pub address: String,
    pub auth_token: String,
    pub timeout: f32,
}

impl Default for ConfProvider {
    fn default() -> Self {
        Self {
            address: "v3.football.api-sports.io".to_string(),
            auth_token: String::new(),
            timeout: 15.0,
        }
    }
}

impl Debug for ConfProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfProvider")
            .field("address", &self.address)
            .field("auth_token", &"<XXXXX>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct ConfMonitor {
    pub enabled: bool,
    /// Seconds between live-fixture polls.
    pub interval: f32,
    /// Seconds between consecutive sends of one broadcast.
    pub broadcast_pause: f32,
    /// Max remembered announcement keys.
    pub dedup_capacity: usize,
}

impl Default for ConfMonitor {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60.0,
            broadcast_pause: 0.1,
            dedup_capacity: 4096,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct ConfPredict {
    pub form_matches: u32,
    pub h2h_matches: u32,
}

impl Default for ConfPredict {
    fn default() -> Self {
        Self {
            form_matches: 5,
            h2h_matches: 5,
        }
    }
}

fn serialize_log_level<S>(
    level: &tracing::Level,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = level.to_string();
    serializer.serialize_str(&s)
}

fn deserialize_log_level<'de, D>(
    deserializer: D,
) -> Result<tracing::Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    let s = String::deserialize(deserializer)?;
    tracing::Level::from_str(&s).map_err(serde::de::Error::custom)
}

pub fn read_or_create_default() -> anyhow::Result<Conf> {
    let path = "conf/conf.toml";
    read_or_create_default_(path).context(path)
}

pub fn read_or_create_default_<P: AsRef<Path>>(
    path: P,
) -> anyhow::Result<Conf> {
    let path = path.as_ref();
    let conf = if fs::exists(path)? {
        let s = fs::read_to_string(path)?;
        toml::from_str(&s)?
    } else {
        if let Some(parent) = path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for conf file: {path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let conf = Conf::default();
        let s = toml::to_string_pretty(&conf)?;
        fs::write(path, s)?;
        conf
    };
    Ok(conf)
}
