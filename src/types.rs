use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::entitlement::Plan;

#[derive(serde::Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct User {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub plan: Plan,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

/// Who is talking to the bot, as reported by the chat transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(serde::Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct BotStats {
    pub total_users: u64,
    pub premium_users: u64,
    pub queries_today: u64,
    pub active_today: u64,
    pub premium_percentage: f64,
}

#[derive(serde::Serialize, ToSchema, Debug, Clone)]
pub struct UserUsage {
    pub user: User,
    pub is_premium: bool,
    pub queries_today: u64,
    /// Absent for premium users (unlimited).
    pub remaining_today: Option<u64>,
}
