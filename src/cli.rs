use clap::Parser;
use std::path::PathBuf;

/// `histwarden` - manage the lifecycle of inactive Galaxy user histories.
#[derive(Parser, Debug)]
#[command(name = "histwarden")]
#[command(version = "0.1.0")]
#[command(about = "Warn owners of inactive Galaxy histories, then delete and purge them.", long_about = None)]
pub struct Cli {
    /// Do a dry run: list affected users but send no emails, delete nothing
    #[arg(short = 'd', long)]
    pub dryrun: bool,

    /// Scan histories and send warning emails to affected users
    #[arg(short = 'w', long)]
    pub warn: bool,

    /// Scan histories, send deletion emails and delete eligible histories
    #[arg(long)]
    pub delete: bool,

    /// Bypass the ledger cool-down and eligibility checks (not the keeplist)
    #[arg(long)]
    pub force: bool,

    /// Act on the production server instead of the staging default
    #[arg(long)]
    pub production: bool,

    /// Post run start/end summaries to Slack
    #[arg(long)]
    pub notify: bool,

    /// Drop and recreate the ledger schema, then exit without processing
    #[arg(long = "drop-db")]
    pub drop_db: bool,

    /// Purge previously deleted histories past the grace period
    #[arg(long)]
    pub purge: bool,

    /// Config file path (default: ~/.config/histwarden/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Whether any recognized action flag was given. Invoking with none
    /// performs no work and exits informationally.
    pub fn selects_action(&self) -> bool {
        self.dryrun || self.warn || self.delete || self.drop_db || self.purge
    }
}
