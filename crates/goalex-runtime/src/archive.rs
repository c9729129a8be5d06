//! Migration of finished goals out of the live collection.

use anyhow::{Context, Result};
use goalex_protocol::{GoalStorePort, RobotPath, VariableType};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Finished goals found in the live collection.
    pub candidates: usize,
    pub archived: Vec<String>,
    /// Copied, but changed before the delete could commit.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// When the goal finished, if it did. Completion wins over rejection.
fn finished_at(document: &JsonValue) -> Option<i64> {
    let present = |field: &str| document.get(field).is_some_and(|value| !value.is_null());
    if !present("complete") && !present("reject") {
        return None;
    }
    let field = ["complete_timestamp", "reject_timestamp"]
        .into_iter()
        .find(|field| present(field))?;
    VariableType::Int64.from_wire(document.get(field)).as_i64()
}

/// Archive the oldest finished goals until at most `retain` are left.
///
/// Each goal is copied to the archive, then deleted with compare-and-delete
/// so a concurrent update to that goal survives. A failure on one goal does
/// not stop the sweep.
#[instrument(skip(store), fields(robot = %robot))]
pub async fn sweep_archive(
    store: &dyn GoalStorePort,
    robot: &RobotPath,
    retain: usize,
) -> Result<ArchiveReport> {
    let goals = store
        .read_goals(robot)
        .await
        .context("failed to read goals for archival")?;
    let mut finished: Vec<(i64, String, JsonValue)> = goals
        .into_iter()
        .filter_map(|(key, document)| Some((finished_at(&document)?, key, document)))
        .collect();
    finished.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut report = ArchiveReport {
        candidates: finished.len(),
        ..ArchiveReport::default()
    };
    let excess = finished.len().saturating_sub(retain);
    for (finished_ms, key, document) in finished.into_iter().take(excess) {
        if let Err(error) = store.archive_goal(robot, &key, document.clone()).await {
            warn!(goal_id = %key, %error, "failed to archive goal");
            report.failed.push(key);
            continue;
        }
        match store.delete_goal_if_unchanged(robot, &key, &document).await {
            Ok(true) => {
                debug!(goal_id = %key, finished_ms, "goal archived");
                report.archived.push(key);
            }
            Ok(false) => {
                debug!(goal_id = %key, "goal changed during archival, left in place");
                report.skipped.push(key);
            }
            Err(error) => {
                warn!(goal_id = %key, %error, "failed to delete archived goal");
                report.failed.push(key);
            }
        }
    }

    if !report.archived.is_empty() || !report.skipped.is_empty() {
        info!(
            candidates = report.candidates,
            archived = report.archived.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "archive sweep finished"
        );
    }
    Ok(report)
}
