//! Plan evaluation without side effects.
//!
//! Expired paid plans are reported as [`Entitlement::Lapsed`]; persisting the
//! downgrade is left to the caller (see `data::Storage::is_premium`).

use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};

/// Queries a free chat may issue per UTC day.
pub const FREE_DAILY_QUERIES: u64 = 10;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Premium,
    Pro,
}

impl Plan {
    pub fn is_paid(self) -> bool {
        !matches!(self, Self::Free)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            // Older databases stored the free tier under its Spanish name.
            "free" | "gratuito" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "pro" => Ok(Self::Pro),
            other => Err(anyhow::anyhow!("Unknown plan: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entitlement {
    Free,
    Paid {
        plan: Plan,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Paid plan whose expiry has passed but is still stored as paid.
    Lapsed {
        plan: Plan,
        expired_at: DateTime<Utc>,
    },
}

impl Entitlement {
    pub fn is_premium(&self) -> bool {
        matches!(self, Self::Paid { .. })
    }

    pub fn needs_downgrade(&self) -> bool {
        matches!(self, Self::Lapsed { .. })
    }
}

#[must_use]
pub fn evaluate(
    plan: Plan,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Entitlement {
    match (plan, expires_at) {
        (Plan::Free, _) => Entitlement::Free,
        (plan, Some(expired_at)) if expired_at < now => {
            Entitlement::Lapsed { plan, expired_at }
        }
        (plan, expires_at) => Entitlement::Paid { plan, expires_at },
    }
}

/// `None` when the expiry would fall outside the representable date range.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days.into()).and_then(|d| now.checked_add_signed(d))
}

#[must_use]
pub fn quota_allows(used_today: u64) -> bool {
    used_today < FREE_DAILY_QUERIES
}

#[must_use]
pub fn quota_remaining(used_today: u64) -> u64 {
    FREE_DAILY_QUERIES.saturating_sub(used_today)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn free_is_never_premium() {
        for expires_at in [
            None,
            Some(now() - Duration::days(1)),
            Some(now() + Duration::days(1)),
        ] {
            let e = evaluate(Plan::Free, expires_at, now());
            assert_eq!(e, Entitlement::Free);
            assert!(!e.is_premium());
            assert!(!e.needs_downgrade());
        }
    }

    #[test]
    fn paid_without_expiry_is_permanent() {
        let e = evaluate(Plan::Pro, None, now() + Duration::days(10_000));
        assert!(e.is_premium());
    }

    #[test]
    fn paid_in_the_past_lapses() {
        let expired_at = now() - Duration::seconds(1);
        let e = evaluate(Plan::Premium, Some(expired_at), now());
        assert_eq!(
            e,
            Entitlement::Lapsed {
                plan: Plan::Premium,
                expired_at
            }
        );
        assert!(!e.is_premium());
        assert!(e.needs_downgrade());
    }

    #[test]
    fn expiry_equal_to_now_is_still_paid() {
        let e = evaluate(Plan::Premium, Some(now()), now());
        assert!(e.is_premium());
    }

    #[test]
    fn quota_boundary() {
        assert!(quota_allows(0));
        assert!(quota_allows(9));
        assert!(!quota_allows(10));
        assert!(!quota_allows(11));
        assert_eq!(quota_remaining(3), 7);
        assert_eq!(quota_remaining(12), 0);
    }

    #[test]
    fn expiry_in_days() {
        assert_eq!(expiry_after(now(), 30), Some(now() + Duration::days(30)));
        assert_eq!(expiry_after(now(), 0), Some(now()));
        assert_eq!(expiry_after(now(), u32::MAX), None);
    }

    #[test]
    fn plan_text_forms() {
        assert_eq!("gratuito".parse::<Plan>().unwrap(), Plan::Free);
        assert_eq!("Premium".parse::<Plan>().unwrap(), Plan::Premium);
        assert_eq!(Plan::Pro.to_string(), "pro");
        assert!("gold".parse::<Plan>().is_err());
    }
}
