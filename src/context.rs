use crate::config::{Config, MailConfig, Thresholds};
use anyhow::{Result, bail};

/// Which Galaxy server the run acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn label(self) -> &'static str {
        match self {
            Self::Staging => "Staging",
            Self::Production => "Production",
        }
    }
}

/// Immutable per-invocation state, constructed once from config + CLI and
/// threaded through every component call.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub environment: Environment,
    pub galaxy_url: String,
    pub api_key: String,
    pub history_view_base: String,
    pub database_url: String,
    pub keeplist_group: String,
    pub mail: MailConfig,
    pub thresholds: Thresholds,
}

impl RunContext {
    pub fn new(config: &Config, production: bool) -> Result<Self> {
        let (environment, env) = if production {
            (Environment::Production, &config.production)
        } else {
            (Environment::Staging, &config.staging)
        };

        if env.galaxy_url.is_empty() {
            bail!("no Galaxy URL configured for the {} environment", environment.label());
        }
        if env.database_url.is_empty() {
            bail!("no database URL configured for the {} environment", environment.label());
        }

        Ok(Self {
            environment,
            galaxy_url: env.galaxy_url.trim_end_matches('/').to_string(),
            api_key: env.api_key.clone(),
            history_view_base: env.history_view_base.clone(),
            database_url: env.database_url.clone(),
            keeplist_group: config.keeplist_group.clone(),
            mail: config.mail.clone(),
            thresholds: config.thresholds,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
