use crate::model::History;
use chrono::{DateTime, Duration, Utc};

/// Partition a history snapshot by inactivity age.
///
/// Age at or past `delete_days` lands in the delete set (the boundary is
/// delete-inclusive); ages in `[warn_days, delete_days)` land in the warn
/// set; anything more recent is dropped. Pure function of the snapshot and
/// the supplied clock.
pub fn partition(
    histories: &[History],
    warn_days: i64,
    delete_days: i64,
    now: DateTime<Utc>,
) -> (Vec<History>, Vec<History>) {
    let warn_cutoff = now - Duration::days(warn_days);
    let delete_cutoff = now - Duration::days(delete_days);

    let mut warn = Vec::new();
    let mut delete = Vec::new();
    for history in histories {
        if history.update_time <= delete_cutoff {
            delete.push(history.clone());
        } else if history.update_time <= warn_cutoff {
            warn.push(history.clone());
        }
    }
    (warn, delete)
}

/// Human size with binary (1024-based) unit scaling.
pub fn sizeof_fmt(bytes: i64) -> String {
    let mut num = bytes as f64;
    for unit in ["", "K", "M", "G", "T", "P"] {
        if num.abs() < 1024.0 {
            return format!("{num:.1}{unit}B");
        }
        num /= 1024.0;
    }
    format!("{num:.1}YiB")
}

pub fn total_size(histories: &[History]) -> i64 {
    histories.iter().map(|h| h.size).sum()
}

/// Aggregate-size summary line for a selection set.
pub fn process_size(histories: &[History], label: &str) -> String {
    format!(
        "Total space used by {label} histories: {}",
        sizeof_fmt(total_size(histories))
    )
}
