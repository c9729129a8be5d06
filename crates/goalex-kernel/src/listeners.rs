//! Background tasks that feed the executive: the tick timer, the three store
//! listeners and the archive sweeper.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use goalex_protocol::{GoalStorePort, RobotPath};
use goalex_runtime::{Executive, sweep_archive};
use tokio::sync::{Notify, watch};
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{debug, error, info, warn};

/// Pause before resubscribing after a failed or ended subscription.
pub(crate) const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

/// Tick until `stop` flips. A contract violation aborts the process.
pub(crate) async fn run_timer(executive: Arc<Executive>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(executive.config().tick_period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.changed() => {}
        }
        if *stop.borrow() || stop.has_changed().is_err() {
            break;
        }
        match executive.tick() {
            Ok(report) => debug!(status = ?report.status, steps = report.steps, "tick"),
            Err(error) => {
                error!(%error, "unrecoverable scheduling error, aborting");
                std::process::abort();
            }
        }
    }
    debug!("tick timer stopped");
}

/// Folds goal events into the executive. Each (re)subscription is followed by
/// a reconcile against the stored keys, since removals can be lost while the
/// stream lags.
pub(crate) async fn run_goal_listener(
    store: Arc<dyn GoalStorePort>,
    executive: Arc<Executive>,
    sweep: Arc<Notify>,
) {
    let robot = executive.robot().clone();
    loop {
        let mut events = match store.subscribe_goals(&robot).await {
            Ok(events) => events,
            Err(error) => {
                warn!(%error, "goal subscription failed");
                sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
        };
        let present: BTreeSet<String> = match store.read_goals(&robot).await {
            Ok(goals) => goals.into_keys().collect(),
            Err(error) => {
                warn!(%error, "goal read after subscribe failed");
                sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
        };
        let cancelled = executive.reconcile_goals(&present);
        info!(robot = %robot, cancelled, "goal listener subscribed");
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    executive.apply_goal_event(&event);
                    sweep.notify_one();
                }
                Err(error) => {
                    warn!(%error, "goal stream failed, resubscribing");
                    break;
                }
            }
        }
        sleep(RESUBSCRIBE_DELAY).await;
    }
}

/// Follows the active map and feeds its object snapshots to the executive.
pub(crate) async fn run_object_listener(store: Arc<dyn GoalStorePort>, executive: Arc<Executive>) {
    let robot = executive.robot().clone();
    let mut world = executive.watch_world();
    loop {
        let active = world.borrow_and_update().clone();
        let Some(map) = active else {
            if world.changed().await.is_err() {
                return;
            }
            continue;
        };
        executive.mark_objects_unloaded();
        let mut snapshots = match store.subscribe_world_objects(&robot, &map).await {
            Ok(snapshots) => snapshots,
            Err(error) => {
                warn!(map = %map, %error, "object subscription failed");
                sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
        };
        info!(map = %map, "object listener subscribed");
        loop {
            tokio::select! {
                changed = world.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    debug!(map = %map, "active world changed, resubscribing");
                    break;
                }
                snapshot = snapshots.next() => match snapshot {
                    Some(Ok(snapshot)) => {
                        executive.replace_objects(&map, &snapshot);
                    }
                    Some(Err(error)) => {
                        warn!(map = %map, %error, "object stream failed, resubscribing");
                        sleep(RESUBSCRIBE_DELAY).await;
                        break;
                    }
                    None => {
                        sleep(RESUBSCRIBE_DELAY).await;
                        break;
                    }
                },
            }
        }
    }
}

pub(crate) async fn run_mode_listener(store: Arc<dyn GoalStorePort>, executive: Arc<Executive>) {
    let robot = executive.robot().clone();
    loop {
        let mut documents = match store.subscribe_executive_mode(&robot).await {
            Ok(documents) => documents,
            Err(error) => {
                warn!(%error, "mode subscription failed");
                sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
        };
        info!(robot = %robot, "mode listener subscribed");
        while let Some(document) = documents.next().await {
            match document {
                Ok(document) => executive.apply_mode_document(document.as_ref()),
                Err(error) => {
                    warn!(%error, "mode stream failed, resubscribing");
                    break;
                }
            }
        }
        sleep(RESUBSCRIBE_DELAY).await;
    }
}

/// Runs one archive sweep per wake-up. Requests that arrive while a sweep is
/// running collapse into a single follow-up sweep.
pub(crate) async fn run_sweeper(
    store: Arc<dyn GoalStorePort>,
    robot: RobotPath,
    retain: usize,
    sweep: Arc<Notify>,
) {
    loop {
        sweep.notified().await;
        if let Err(error) = sweep_archive(store.as_ref(), &robot, retain).await {
            warn!(error = %format!("{error:#}"), "archive sweep failed");
        }
    }
}
