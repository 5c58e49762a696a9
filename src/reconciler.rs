use crate::context::RunContext;
use crate::directory::DirectoryApi;
use crate::error::{LedgerError, WardenError};
use crate::filter::{partition, process_size, sizeof_fmt};
use crate::ledger::{Ledger, NotificationRecord};
use crate::mailer::{MailApi, SendOutcome};
use crate::model::{History, NotificationKind, UserDetails};
use crate::report::RunReport;
use crate::templates::{HistoryRow, MailTemplates};
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, warn};

/// Mutually combinable run modes for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Full decision pipeline, but no ledger writes, emails or deletes.
    pub dryrun: bool,
    /// Enable the deletion pass; otherwise delete-eligible histories are
    /// folded into the warning batch.
    pub do_delete: bool,
    /// Bypass ledger eligibility checks (never the keeplist).
    pub force: bool,
}

/// One user's slice of a run: owner snapshot, live group names and the
/// histories from the selection that belong to them.
struct UserBatch {
    details: UserDetails,
    groups: Vec<String>,
    histories: Vec<History>,
}

/// Users partitioned into addressable and detail-less ("bad") buckets.
/// Bad users are reported and excluded from notification, but their
/// histories stay in the snapshot for future runs.
struct UserSet {
    users: BTreeMap<String, UserBatch>,
    bad_users: BTreeMap<Option<String>, Vec<History>>,
}

#[derive(Debug, Default)]
struct PassCounters {
    emailed_users: usize,
    skipped_users: usize,
    error_users: usize,
    keeplisted_users: usize,
    emailed_histories: usize,
    skipped_histories: usize,
    deleted_histories: usize,
    error_histories: usize,
}

/// Drives the per-history state machine once per run:
/// `Unnotified -> Warned -> DeletionNotified -> Deleted`, consulting and
/// updating the ledger, batching notifications per user.
pub struct Reconciler<'a> {
    ctx: &'a RunContext,
    directory: &'a dyn DirectoryApi,
    ledger: &'a Ledger,
    mailer: &'a dyn MailApi,
    templates: &'a MailTemplates,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        ctx: &'a RunContext,
        directory: &'a dyn DirectoryApi,
        ledger: &'a Ledger,
        mailer: &'a dyn MailApi,
        templates: &'a MailTemplates,
    ) -> Self {
        Self {
            ctx,
            directory,
            ledger,
            mailer,
            templates,
        }
    }

    pub async fn run(
        &self,
        histories: &[History],
        opts: RunOptions,
    ) -> Result<RunReport, WardenError> {
        let mut report = RunReport::default();
        let thresholds = self.ctx.thresholds;
        let (mut warn_histories, delete_histories) = partition(
            histories,
            thresholds.warn_days,
            thresholds.delete_days,
            Utc::now(),
        );

        report.push(format!(
            "{} histories selected for warning",
            warn_histories.len()
        ));
        report.push(process_size(&warn_histories, "warnable"));
        report.push(format!(
            "{} histories selected for deletion",
            delete_histories.len()
        ));
        report.push(process_size(&delete_histories, "delete eligible"));

        if !opts.do_delete {
            warn_histories.extend(delete_histories.iter().cloned());
            report.push("Not deleting histories. Delete eligible histories will be warned instead.");
        }

        let owner_count = unique_owner_count(&warn_histories);
        report.push(format!("{owner_count} unique users for warning."));

        let warn_set = self.build_user_set(&warn_histories, opts.dryrun).await?;
        if !warn_set.bad_users.is_empty() {
            report.push(format!(
                "{} warnable users without details. Skipping.",
                warn_set.bad_users.len()
            ));
        }

        let counters = self
            .process_users(NotificationKind::Warning, &warn_set, opts)
            .await?;
        report.push(format!(
            "{} histories eligible for warning, {} histories skipped.",
            counters.emailed_histories, counters.skipped_histories
        ));
        report.push(format!(
            "{} users eligible for warning, {} users skipped.",
            counters.emailed_users, counters.skipped_users
        ));
        if counters.keeplisted_users > 0 {
            report.push(format!(
                "{} users were excluded due to keeplisting.",
                counters.keeplisted_users
            ));
        }
        if counters.error_users > 0 {
            report.push(format!(
                "{} users had error sending warning notification. Check logs/db for more details.",
                counters.error_users
            ));
        }

        if opts.do_delete {
            let delete_owner_count = unique_owner_count(&delete_histories);
            if delete_owner_count == 0 {
                report.push("No user histories require deletion.");
                return Ok(report);
            }
            report.push(format!(
                "{delete_owner_count} unique users for deletion of {} histories.",
                delete_histories.len()
            ));

            let delete_set = self.build_user_set(&delete_histories, opts.dryrun).await?;
            if !delete_set.bad_users.is_empty() {
                report.push(format!(
                    "{} delete eligible users without details. Skipping.",
                    delete_set.bad_users.len()
                ));
            }

            let counters = self
                .process_users(NotificationKind::Deletion, &delete_set, opts)
                .await?;
            report.push(format!(
                "{} histories eligible for deletion, {} histories deleted.",
                counters.emailed_histories, counters.deleted_histories
            ));
            report.push(format!(
                "{} users notified regarding deletion.",
                counters.emailed_users
            ));
            if counters.keeplisted_users > 0 {
                report.push(format!(
                    "{} users were excluded due to keeplisting.",
                    counters.keeplisted_users
                ));
            }
            if counters.error_histories > 0 {
                report.push(format!(
                    "{} failed to be deleted. Check logs/db for more details. \
                     Manual intervention required.",
                    counters.error_histories
                ));
            }
            if counters.skipped_histories > 0 {
                report.push(format!(
                    "{} histories skipped for deletion due to no prior warning notifications, \
                     insufficient time between warning and deletion, or failed to be deleted \
                     previously. Check logs/db for more details.",
                    counters.skipped_histories
                ));
            }
            if counters.skipped_users > 0 {
                report.push(format!(
                    "{} users skipped for notification due to having all skipped histories.",
                    counters.skipped_users
                ));
            }
            if counters.error_users > 0 {
                report.push(format!(
                    "{} users had error sending deletion notification. \
                     Check logs/db for more details.",
                    counters.error_users
                ));
            }
        }

        Ok(report)
    }

    /// Resolve owner details and live group memberships for a selection of
    /// histories, upserting the fetched snapshots into the ledger (skipped on
    /// a dry run).
    async fn build_user_set(
        &self,
        histories: &[History],
        dryrun: bool,
    ) -> Result<UserSet, WardenError> {
        let owner_ids: BTreeSet<Option<String>> =
            histories.iter().map(|h| h.user_id.clone()).collect();

        let mut users: BTreeMap<String, UserBatch> = BTreeMap::new();
        let mut bad_users: BTreeMap<Option<String>, Vec<History>> = BTreeMap::new();
        for owner in owner_ids {
            match &owner {
                Some(user_id) => match self.directory.get_user(user_id).await {
                    Ok(details) => {
                        if !dryrun {
                            self.ledger.upsert_user(&details).await?;
                        }
                        users.insert(
                            user_id.clone(),
                            UserBatch {
                                details,
                                groups: Vec::new(),
                                histories: Vec::new(),
                            },
                        );
                    }
                    Err(err) => {
                        warn!(user_id = %user_id, error = %err, "user details unavailable");
                        bad_users.insert(owner.clone(), Vec::new());
                    }
                },
                None => {
                    bad_users.insert(None, Vec::new());
                }
            }
        }

        for history in histories {
            if !dryrun {
                self.ledger.upsert_history(history).await?;
            }
            let batch = history
                .user_id
                .as_ref()
                .and_then(|user_id| users.get_mut(user_id));
            match batch {
                Some(batch) => batch.histories.push(history.clone()),
                None => bad_users
                    .entry(history.user_id.clone())
                    .or_default()
                    .push(history.clone()),
            }
        }

        // Bad users are excluded from notification regardless, so group
        // membership is only resolved for addressable users.
        let memberships = self.directory.group_memberships().await?;
        for (user_id, batch) in &mut users {
            if let Some(groups) = memberships.get(user_id) {
                batch.groups = groups.clone();
            }
        }

        Ok(UserSet { users, bad_users })
    }

    /// One notification pass (warning or deletion) over a user set.
    async fn process_users(
        &self,
        kind: NotificationKind,
        set: &UserSet,
        opts: RunOptions,
    ) -> Result<PassCounters, WardenError> {
        let thresholds = self.ctx.thresholds;
        let warn_weeks = thresholds.warn_days / 7;
        let delete_weeks = thresholds.delete_days / 7;
        let mut counters = PassCounters::default();

        for (user_id, batch) in &set.users {
            if batch.groups.iter().any(|g| *g == self.ctx.keeplist_group) {
                counters.keeplisted_users += 1;
                continue;
            }

            let username = batch.details.username.as_deref().unwrap_or("Galaxy User");
            let now = Utc::now();

            // Warning path: an unseen version is eligible by default.
            // Deletion path: an unseen version is NOT eligible - deletion
            // requires a prior warning on the exact same version.
            let default_if_unseen = kind == NotificationKind::Warning;
            let mut selected: Vec<(&History, HistoryRow)> = Vec::new();
            for history in &batch.histories {
                let eligible = opts.force
                    || self
                        .ledger
                        .eligibility(
                            &history.id,
                            history.update_time,
                            default_if_unseen,
                            thresholds.renotify_days,
                            now,
                        )
                        .await?;
                if !eligible {
                    counters.skipped_histories += 1;
                    continue;
                }

                let delete_date = match kind {
                    NotificationKind::Warning => {
                        // Projected deletion date, display only: anchored to
                        // the first notification for this version, or now.
                        let base = self
                            .ledger
                            .first_notified_at(&history.id, history.update_time)
                            .await?
                            .unwrap_or(now);
                        let projected =
                            base + Duration::days(thresholds.delete_days - thresholds.warn_days);
                        Some(projected.format("%Y-%m-%d").to_string())
                    }
                    NotificationKind::Deletion => None,
                };
                selected.push((
                    history,
                    HistoryRow {
                        id: history.id.clone(),
                        name: history.name.clone(),
                        update_time: history.update_time.format("%Y-%m-%d").to_string(),
                        delete_date,
                        size: sizeof_fmt(history.size),
                    },
                ));
                counters.emailed_histories += 1;
            }

            if selected.is_empty() {
                counters.skipped_users += 1;
                continue;
            }
            if opts.dryrun {
                // Selection and counting are complete; everything below is a
                // side effect.
                continue;
            }

            let rows: Vec<HistoryRow> = selected.iter().map(|(_, row)| row.clone()).collect();
            let rendered = match kind {
                NotificationKind::Warning => self.templates.render_warning(
                    username,
                    &rows,
                    warn_weeks,
                    delete_weeks,
                    thresholds.renotify_days,
                    &self.ctx.history_view_base,
                ),
                NotificationKind::Deletion => self.templates.render_deletion(
                    username,
                    &rows,
                    delete_weeks,
                    &self.ctx.history_view_base,
                ),
            };
            let html = match rendered {
                Ok(html) => html,
                Err(err) => {
                    error!(user_id = %user_id, error = %err, "template render failed");
                    counters.error_users += 1;
                    continue;
                }
            };

            let subject = match kind {
                NotificationKind::Warning => &self.ctx.mail.warning_subject,
                NotificationKind::Deletion => &self.ctx.mail.deletion_subject,
            };
            let outcome = match batch.details.email.as_deref() {
                Some(email) => match self.mailer.send(email, subject, &html).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(user_id = %user_id, error = %err, "unable to send notification");
                        SendOutcome {
                            status: "Unable to send".into(),
                            message_id: None,
                        }
                    }
                },
                None => {
                    error!(user_id = %user_id, "unable to send notification: no email for user");
                    SendOutcome {
                        status: "Unable to send".into(),
                        message_id: None,
                    }
                }
            };
            if outcome.delivered() {
                counters.emailed_users += 1;
            } else {
                error!(user_id = %user_id, status = %outcome.status, "mail API did not accept the message");
                counters.error_users += 1;
            }

            let record = NotificationRecord {
                user_id: user_id.clone(),
                kind,
                sent: Utc::now(),
                status: outcome.status.clone(),
                message_id: outcome.message_id.clone(),
                histories: selected
                    .iter()
                    .map(|(history, _)| (history.id.clone(), history.update_time))
                    .collect(),
            };
            match self.ledger.record_notification(&record).await {
                Ok(_) => {}
                Err(LedgerError::ContentionExhausted { attempts }) => {
                    // Without the ledger linkage the deletion must not
                    // proceed either; leave the histories for a future run.
                    error!(
                        user_id = %user_id,
                        attempts,
                        "abandoning ledger linkage for this user's notification"
                    );
                    counters.error_users += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            if kind == NotificationKind::Deletion {
                for (history, _) in &selected {
                    if self.directory.delete_history(&history.id, false).await {
                        counters.deleted_histories += 1;
                    } else {
                        counters.error_histories += 1;
                        error!(history_id = %history.id, "unable to delete history");
                    }
                }
            }
        }

        Ok(counters)
    }
}

fn unique_owner_count(histories: &[History]) -> usize {
    histories
        .iter()
        .map(|h| h.user_id.clone())
        .collect::<BTreeSet<_>>()
        .len()
}
