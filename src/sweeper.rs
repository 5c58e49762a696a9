use crate::context::RunContext;
use crate::directory::DirectoryApi;
use crate::error::WardenError;
use crate::filter::sizeof_fmt;
use crate::ledger::Ledger;
use crate::model::HistoryStatus;
use crate::report::RunReport;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use tracing::{error, info};

/// Walks every deletion notification in the ledger and reconciles it against
/// the live directory: histories restored by their owner are annotated and
/// left alone, histories still deleted past the purge grace period are
/// purged (or counted, in dry-run mode).
pub struct Sweeper<'a> {
    ctx: &'a RunContext,
    directory: &'a dyn DirectoryApi,
    ledger: &'a Ledger,
}

#[derive(Debug, Default)]
struct SweepCounters {
    deleted: usize,
    previously_purged: usize,
    eligible: usize,
    restored: usize,
    purged: usize,
    purged_bytes: i64,
    errors: usize,
}

impl<'a> Sweeper<'a> {
    pub fn new(ctx: &'a RunContext, directory: &'a dyn DirectoryApi, ledger: &'a Ledger) -> Self {
        Self {
            ctx,
            directory,
            ledger,
        }
    }

    pub async fn run(&self, dryrun: bool) -> Result<RunReport, WardenError> {
        let now = Utc::now();
        let grace_cutoff = now - Duration::days(self.ctx.thresholds.purge_days);
        let mut counters = SweepCounters::default();

        // Links are ordered by sent time; keep the earliest per history so a
        // history with several notified versions gets one grace clock.
        let links = self.ledger.deletion_links().await?;
        let mut seen: HashSet<String> = HashSet::new();

        for link in links {
            if !seen.insert(link.history_id.clone()) {
                continue;
            }

            let Some(stored) = self.ledger.history(&link.history_id).await? else {
                error!(history_id = %link.history_id, "deletion link without a stored history");
                counters.errors += 1;
                continue;
            };

            if link.notification_sent > grace_cutoff {
                if stored.status == Some(HistoryStatus::Purged) {
                    counters.previously_purged += 1;
                } else {
                    counters.deleted += 1;
                }
                continue;
            }

            let Some(live) = self.directory.live_status(&stored.id).await else {
                counters.errors += 1;
                continue;
            };

            // The owner's restore wins over any local annotation, Purged
            // included.
            if !live.deleted {
                info!(history_id = %stored.id, "history was restored, leaving it alone");
                counters.restored += 1;
                if !dryrun {
                    self.ledger
                        .set_history_status(&stored.id, HistoryStatus::Restored)
                        .await?;
                }
                continue;
            }

            if stored.status == Some(HistoryStatus::Purged) {
                counters.previously_purged += 1;
                continue;
            }
            counters.deleted += 1;

            if live.purged {
                // Purged upstream without us; catch the annotation up. Not
                // this sweep's work, so no size is accrued.
                counters.previously_purged += 1;
                if !dryrun {
                    self.ledger
                        .set_history_status(&stored.id, HistoryStatus::Purged)
                        .await?;
                }
                continue;
            }

            counters.eligible += 1;

            if dryrun {
                counters.purged += 1;
                counters.purged_bytes += stored.size;
            } else if self.directory.delete_history(&stored.id, true).await {
                counters.purged += 1;
                counters.purged_bytes += stored.size;
                self.ledger
                    .set_history_status(&stored.id, HistoryStatus::Purged)
                    .await?;
            } else {
                error!(history_id = %stored.id, "unable to purge history");
                counters.errors += 1;
            }
        }

        let mut report = RunReport::default();
        report.push(format!("Deleted histories: {}", counters.deleted));
        report.push(format!(
            "Previously purged histories: {}",
            counters.previously_purged
        ));
        report.push(format!("Eligible histories: {}", counters.eligible));
        report.push(format!("Restored histories: {}", counters.restored));
        report.push(format!("Purged histories: {}", counters.purged));
        report.push(format!(
            "Purged storage: {}",
            sizeof_fmt(counters.purged_bytes)
        ));
        report.push(format!("Errors: {}", counters.errors));
        Ok(report)
    }
}
