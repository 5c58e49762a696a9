use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// A unit of remote user data subject to lifecycle expiry.
///
/// The Galaxy server stays authoritative for existence, size and
/// `update_time`; the local ledger only annotates a history with a
/// lifecycle [`HistoryStatus`] once it has been acted on.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct History {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
    #[serde(deserialize_with = "de_galaxy_time")]
    pub update_time: DateTime<Utc>,
    pub size: i64,
}

/// Lifecycle annotation persisted on a history after the sweeper acted on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    /// The owner undid the deletion; the history exits the purge pipeline.
    Restored,
    /// Irreversibly removed. Terminal unless the remote reports a restore.
    Purged,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restored => "Restored",
            Self::Purged => "Purged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Restored" => Some(Self::Restored),
            "Purged" => Some(Self::Purged),
            _ => None,
        }
    }
}

/// Owner metadata snapshot from `/api/users/{id}`.
///
/// Used for addressing and keeplist checks only; never authoritative.
#[derive(Debug, Clone, Deserialize)]
pub struct UserDetails {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub quota: Option<String>,
    #[serde(default)]
    pub quota_percent: Option<f64>,
    #[serde(default)]
    pub total_disk_usage: Option<f64>,
    #[serde(default)]
    pub nice_total_disk_usage: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub purged: bool,
}

/// The two kinds of outbound lifecycle communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Warning,
    Deletion,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Deletion => "Deletion",
        }
    }
}

/// Live deleted/purged flags read back from the Galaxy server.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LiveStatus {
    pub deleted: bool,
    pub purged: bool,
}

/// Parse a Galaxy timestamp. The API emits naive ISO 8601 without an
/// offset (`2024-03-01T10:30:00.123456`); tolerate RFC 3339 as well.
pub fn parse_galaxy_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn de_galaxy_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_galaxy_time(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unparseable update_time: {raw}")))
}
