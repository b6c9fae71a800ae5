use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Executor;

use crate::{
    conf,
    entitlement::{self, Entitlement, Plan},
    types::{BotStats, Profile, User},
};

const MIGRATIONS: [&str; 1] = [include_str!("../migrations/0_data.sql")];

type Tx<'a> = sqlx::Transaction<'a, sqlx::Sqlite>;

#[derive(sqlx::FromRow)]
struct UserRow {
    chat_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    plan: String,
    plan_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    is_active: bool,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let plan: Plan = row
            .plan
            .parse()
            .context(format!("Bad plan stored for chat {}", row.chat_id))?;
        Ok(Self {
            chat_id: row.chat_id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            plan,
            plan_expires_at: row.plan_expires_at,
            created_at: row.created_at,
            last_activity: row.last_activity,
            is_active: row.is_active,
        })
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: sqlx::Pool<sqlx::Sqlite>,
}

impl Storage {
    pub async fn connect() -> anyhow::Result<Self> {
        let busy_timeout =
            Duration::from_secs_f32(conf::global().sqlite_busy_timeout);
        Self::open(PathBuf::from("data/data.db"), busy_timeout).await
    }

    pub async fn open<P: AsRef<Path>>(
        file_path: P,
        busy_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let file_path = file_path.as_ref();
        if let Some(parent) = file_path.parent() {
            let ctx = format!(
                "Failed to create parent directory \
                for database file: {file_path:?}"
            );
            fs::create_dir_all(parent).context(ctx)?;
        }
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(file_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            // Query log rows may precede the user row.
            .foreign_keys(false);
        let pool = sqlx::SqlitePool::connect_with(options).await?;
        let selph = Self { pool };
        for migration in MIGRATIONS {
            selph.pool.execute(migration).await?;
        }
        Ok(selph)
    }

    /// Registers the chat. Existing records are left untouched.
    pub async fn add_user(&self, profile: &Profile) -> anyhow::Result<()> {
        let now = Utc::now();
        let tx = self.pool.begin().await?;
        let tx = add_user(tx, profile, now).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn user(&self, uid: i64) -> anyhow::Result<Option<User>> {
        let mut tx = self.pool.begin().await?;
        let user = user(&mut tx, uid).await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn touch(&self, uid: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET last_activity = ? WHERE chat_id = ?")
            .bind(Utc::now())
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns false when there is no such user.
    pub async fn deactivate(&self, uid: i64) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE users SET is_active = 0 WHERE chat_id = ?")
                .bind(uid)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false when there is no such user.
    pub async fn set_plan(
        &self,
        uid: i64,
        plan: Plan,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let expires_at = expires_at.filter(|_| plan.is_paid());
        let result = sqlx::query(
            "UPDATE users SET plan = ?, plan_expires_at = ? WHERE chat_id = ?",
        )
        .bind(plan.as_str())
        .bind(expires_at)
        .bind(uid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn entitlement(&self, uid: i64) -> anyhow::Result<Entitlement> {
        self.entitlement_at(uid, Utc::now()).await
    }

    /// Read-only evaluation. A missing user is on the free plan.
    pub async fn entitlement_at(
        &self,
        uid: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Entitlement> {
        let entitlement = match self.user(uid).await? {
            None => Entitlement::Free,
            Some(User {
                plan,
                plan_expires_at,
                ..
            }) => entitlement::evaluate(plan, plan_expires_at, now),
        };
        Ok(entitlement)
    }

    /// Resets the plan to free with no expiry, unless the expiry has changed
    /// from `expired_at` since it was read. Returns whether it did.
    pub async fn downgrade(
        &self,
        uid: i64,
        expired_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        // Compared as instants: older rows store a different text format.
        let result = sqlx::query(
            "UPDATE users SET plan = ?, plan_expires_at = NULL
                WHERE chat_id = ?
                AND julianday(plan_expires_at) = julianday(?)",
        )
        .bind(Plan::Free.as_str())
        .bind(uid)
        .bind(expired_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// May mutate: a lapsed plan is downgraded before answering.
    pub async fn is_premium(&self, uid: i64) -> bool {
        self.is_premium_at(uid, Utc::now()).await
    }

    #[tracing::instrument(skip(self, now))]
    pub async fn is_premium_at(&self, uid: i64, now: DateTime<Utc>) -> bool {
        let entitlement = match self.entitlement_at(uid, now).await {
            Ok(entitlement) => entitlement,
            Err(error) => {
                tracing::error!(?error, "Failed to read entitlement.");
                return false;
            }
        };
        if let Entitlement::Lapsed { plan, expired_at } = entitlement {
            tracing::info!(%plan, %expired_at, "Plan expired, downgrading.");
            match self.downgrade(uid, expired_at).await {
                Ok(true) => {}
                Ok(false) => tracing::info!("Plan changed meanwhile, kept."),
                Err(error) => {
                    tracing::error!(?error, "Failed to downgrade lapsed plan.");
                }
            }
        }
        entitlement.is_premium()
    }

    pub async fn can_make_query(&self, uid: i64) -> bool {
        self.can_make_query_at(uid, Utc::now()).await
    }

    #[tracing::instrument(skip(self, now))]
    pub async fn can_make_query_at(
        &self,
        uid: i64,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_premium_at(uid, now).await {
            return true;
        }
        let used = self
            .queries_count(uid, now.date_naive())
            .await
            .unwrap_or_else(|error| {
                tracing::error!(?error, "Failed to count queries.");
                0
            });
        entitlement::quota_allows(used)
    }

    /// Appends one query log entry dated today. Never fails the caller.
    pub async fn log_query(
        &self,
        uid: i64,
        query_type: &str,
        league_id: Option<i64>,
    ) {
        self.log_query_at(uid, query_type, league_id, Utc::now())
            .await;
    }

    pub async fn log_query_at(
        &self,
        uid: i64,
        query_type: &str,
        league_id: Option<i64>,
        now: DateTime<Utc>,
    ) {
        let result = async {
            let tx = self.pool.begin().await?;
            let tx = log_query(tx, uid, query_type, league_id, now).await?;
            tx.commit().await?;
            anyhow::Ok(())
        }
        .await;
        if let Err(error) = result {
            tracing::error!(?error, uid, query_type, "Failed to log query.");
        }
    }

    pub async fn queries_count(
        &self,
        uid: i64,
        date: NaiveDate,
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let count = queries_count(&mut tx, uid, date).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Active users, most recently active first.
    pub async fn active_users(&self) -> anyhow::Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT * FROM users WHERE is_active = 1
                ORDER BY last_activity DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    pub async fn stats(&self) -> anyhow::Result<BotStats> {
        self.stats_at(Utc::now()).await
    }

    pub async fn stats_at(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<BotStats> {
        let mut tx = self.pool.begin().await?;
        let stats = stats(&mut tx, now.date_naive()).await?;
        tx.commit().await?;
        Ok(stats)
    }
}

async fn add_user<'a>(
    mut tx: Tx<'a>,
    profile: &Profile,
    now: DateTime<Utc>,
) -> anyhow::Result<Tx<'a>> {
    sqlx::query(
        "INSERT OR IGNORE INTO users
            (chat_id, username, first_name, last_name, plan,
             created_at, last_activity)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(profile.chat_id)
    .bind(&profile.username)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(Plan::Free.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    Ok(tx)
}

async fn user(tx: &mut Tx<'_>, uid: i64) -> anyhow::Result<Option<User>> {
    let row_opt: Option<UserRow> =
        sqlx::query_as("SELECT * FROM users WHERE chat_id = ?")
            .bind(uid)
            .fetch_optional(&mut **tx)
            .await?;
    row_opt.map(User::try_from).transpose()
}

async fn log_query<'a>(
    mut tx: Tx<'a>,
    uid: i64,
    query_type: &str,
    league_id: Option<i64>,
    now: DateTime<Utc>,
) -> anyhow::Result<Tx<'a>> {
    sqlx::query(
        "INSERT INTO daily_queries
            (chat_id, query_type, league_id, query_date, created_at)
            VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uid)
    .bind(query_type)
    .bind(league_id)
    .bind(now.date_naive())
    .bind(now)
    .execute(&mut *tx)
    .await?;
    Ok(tx)
}

async fn queries_count(
    tx: &mut Tx<'_>,
    uid: i64,
    date: NaiveDate,
) -> anyhow::Result<u64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM daily_queries
            WHERE chat_id = ? AND query_date = ?",
    )
    .bind(uid)
    .bind(date)
    .fetch_one(&mut **tx)
    .await?;
    Ok(u64::try_from(count)?)
}

async fn stats(tx: &mut Tx<'_>, today: NaiveDate) -> anyhow::Result<BotStats> {
    let total_users: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(&mut **tx)
            .await?;
    let premium_users: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users
            WHERE is_active = 1 AND plan NOT IN ('free', 'gratuito')",
    )
    .fetch_one(&mut **tx)
    .await?;
    let queries_today: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM daily_queries WHERE query_date = ?",
    )
    .bind(today)
    .fetch_one(&mut **tx)
    .await?;
    let active_today: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT chat_id) FROM daily_queries
            WHERE query_date = ?",
    )
    .bind(today)
    .fetch_one(&mut **tx)
    .await?;
    let total_users = u64::try_from(total_users)?;
    let premium_users = u64::try_from(premium_users)?;
    let premium_percentage = if total_users > 0 {
        premium_users as f64 / total_users as f64 * 100.0
    } else {
        0.0
    };
    Ok(BotStats {
        total_users,
        premium_users,
        queries_today: u64::try_from(queries_today)?,
        active_today: u64::try_from(active_today)?,
        premium_percentage,
    })
}
