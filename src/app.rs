use crate::cli::Cli;
use crate::config::Config;
use crate::context::RunContext;
use crate::directory::{DirectoryApi, GalaxyDirectory};
use crate::ledger::Ledger;
use crate::mailer::PostalMailer;
use crate::notify::{COLOUR_DANGER, COLOUR_GOOD, SlackNotifier};
use crate::reconciler::{Reconciler, RunOptions};
use crate::report::RunReport;
use crate::sweeper::Sweeper;
use crate::templates::MailTemplates;
use anyhow::Result;
use tracing::{info, warn};

/// Parse config, build the run context and dispatch the selected actions,
/// bracketing the run with Slack posts when `--notify` is set.
pub async fn run(cli: Cli) -> Result<()> {
    if !cli.selects_action() {
        info!("no action selected; use --dryrun, --warn, --delete, --purge or --drop-db");
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    // A missing environment configuration is informational, not a failure:
    // nothing has been attempted yet and there is nothing to roll back.
    let ctx = match RunContext::new(&config, cli.production) {
        Ok(ctx) => ctx,
        Err(err) if cli.production => {
            info!("{err}; fill in the [production] section of the config");
            return Ok(());
        }
        Err(err) => {
            info!("{err}; fill in the [staging] section or pass --production");
            return Ok(());
        }
    };
    let notifier = cli
        .notify
        .then(|| SlackNotifier::from_config(&config.slack))
        .flatten();

    info!(
        environment = ctx.environment.label(),
        dryrun = cli.dryrun,
        "starting history lifecycle run"
    );
    post(
        &notifier,
        &format!(
            "Started Galaxy history lifecycle run ({})",
            ctx.environment.label()
        ),
        "",
        COLOUR_GOOD,
    )
    .await;

    match dispatch(&cli, &ctx).await {
        Ok(report) => {
            post(
                &notifier,
                &format!(
                    "Finished Galaxy history lifecycle run ({})",
                    ctx.environment.label()
                ),
                &report.summary(),
                COLOUR_GOOD,
            )
            .await;
            Ok(())
        }
        Err(err) => {
            post(
                &notifier,
                &format!(
                    "Galaxy history lifecycle run failed ({})",
                    ctx.environment.label()
                ),
                &format!("{err:#}"),
                COLOUR_DANGER,
            )
            .await;
            Err(err)
        }
    }
}

async fn dispatch(cli: &Cli, ctx: &RunContext) -> Result<RunReport> {
    let ledger = Ledger::connect(&ctx.database_url).await?;
    let mut report = RunReport::default();

    if cli.drop_db {
        ledger.drop_and_recreate().await?;
        report.push("Dropped and recreated the notification ledger.");
        return Ok(report);
    }

    let directory = GalaxyDirectory::new(&ctx.galaxy_url, &ctx.api_key);

    if cli.warn || cli.delete || (cli.dryrun && !cli.purge) {
        let mailer = PostalMailer::new(&ctx.mail, ctx.is_production());
        let templates = MailTemplates::new()?;
        let histories = directory
            .list_histories(ctx.thresholds.warn_days, false)
            .await?;
        report.push(format!(
            "{} histories found older than {} days",
            histories.len(),
            ctx.thresholds.warn_days
        ));

        let reconciler = Reconciler::new(ctx, &directory, &ledger, &mailer, &templates);
        let opts = RunOptions {
            dryrun: cli.dryrun,
            do_delete: cli.delete,
            force: cli.force,
        };
        report.absorb(reconciler.run(&histories, opts).await?);
    }

    if cli.purge {
        let sweeper = Sweeper::new(ctx, &directory, &ledger);
        report.absorb(sweeper.run(cli.dryrun).await?);
    }

    Ok(report)
}

/// Slack failures never abort a run.
async fn post(notifier: &Option<SlackNotifier>, title: &str, text: &str, colour: &str) {
    if let Some(notifier) = notifier {
        if let Err(err) = notifier.post(title, text, colour).await {
            warn!(error = %err, "failed to post run notification");
        }
    }
}
