use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

/// TOML configuration, one file for both target environments.
///
/// Every section has serde defaults so a partial file loads cleanly;
/// the staging/production blocks must be filled in before the matching
/// environment can actually be selected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub staging: EnvConfig,

    #[serde(default)]
    pub production: EnvConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    /// Members of this Galaxy group are exempt from all lifecycle actions.
    #[serde(default = "default_keeplist_group")]
    pub keeplist_group: String,
}

// ── Per-environment endpoints ────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Galaxy base URL, e.g. `https://usegalaxy.example.org`
    #[serde(default)]
    pub galaxy_url: String,
    /// Static Galaxy API key passed as a query parameter
    #[serde(default)]
    pub api_key: String,
    /// Base URL prepended to history ids in email links
    #[serde(default)]
    pub history_view_base: String,
    /// SQLite ledger location, e.g. `sqlite://warden-staging.db`
    #[serde(default)]
    pub database_url: String,
}

// ── Mail API ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Postal-style mail API base URL
    #[serde(default)]
    pub base_url: String,
    /// Sent in the `X-Server-API-Key` header
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub reply_to: String,
    #[serde(default = "default_warning_subject")]
    pub warning_subject: String,
    #[serde(default = "default_deletion_subject")]
    pub deletion_subject: String,
    /// Every mail from a non-production run is redirected here.
    #[serde(default = "default_staging_recipient")]
    pub staging_recipient: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            from_address: String::new(),
            reply_to: String::new(),
            warning_subject: default_warning_subject(),
            deletion_subject: default_deletion_subject(),
            staging_recipient: default_staging_recipient(),
        }
    }
}

// ── Slack observability channel ──────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token; posting is disabled when unset.
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub channel: String,
    /// Appended to every post title, e.g. `<@U123>`
    #[serde(default)]
    pub mentions: String,
}

// ── Lifecycle thresholds ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    /// Inactivity age at which owners are first warned
    #[serde(default = "default_warn_days")]
    pub warn_days: i64,
    /// Inactivity age at which histories become delete-eligible
    #[serde(default = "default_delete_days")]
    pub delete_days: i64,
    /// Cool-down window before the same history version is re-warned
    #[serde(default = "default_renotify_days")]
    pub renotify_days: i64,
    /// Grace period between deletion notification and purge
    #[serde(default = "default_purge_days")]
    pub purge_days: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn_days: default_warn_days(),
            delete_days: default_delete_days(),
            renotify_days: default_renotify_days(),
            purge_days: default_purge_days(),
        }
    }
}

fn default_keeplist_group() -> String {
    "keeplist".into()
}

fn default_warning_subject() -> String {
    "Galaxy: inactive histories scheduled for deletion".into()
}

fn default_deletion_subject() -> String {
    "Galaxy: inactive histories deleted".into()
}

fn default_staging_recipient() -> String {
    "ga_au_mailer_dev@maildrop.cc".into()
}

fn default_warn_days() -> i64 {
    90
}

fn default_delete_days() -> i64 {
    120
}

fn default_renotify_days() -> i64 {
    7
}

fn default_purge_days() -> i64 {
    30
}

impl Config {
    /// Load from an explicit path, or from the default location
    /// (`~/.config/histwarden/config.toml`). A missing default file yields
    /// the built-in defaults; a missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::from_file(explicit),
            None => {
                let default_path = Self::default_path()?;
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let base = BaseDirs::new().context("could not determine home directory")?;
        Ok(base.home_dir().join(".config/histwarden/config.toml"))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(config)
    }
}
