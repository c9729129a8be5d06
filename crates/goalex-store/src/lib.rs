use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures_util::StreamExt;
use goalex_protocol::{
    ExecutiveError, ExecutiveResult, GoalEvent, GoalEventStream, GoalStorePort, MapId,
    ModeDocumentStream, ObjectSnapshotStream, RobotPath,
};
use parking_lot::Mutex;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, instrument, warn};

/// A change published to subscribers of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreNotification {
    Goal {
        robot: RobotPath,
        event: GoalEvent,
    },
    Objects {
        robot: RobotPath,
        map: MapId,
        snapshot: JsonValue,
    },
    Mode {
        robot: RobotPath,
        document: Option<JsonValue>,
    },
}

#[derive(Clone, Debug)]
pub struct NotificationHub {
    sender: broadcast::Sender<StoreNotification>,
}

impl NotificationHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn publish(&self, notification: StoreNotification) {
        let _ = self.sender.send(notification);
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<StoreNotification> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

#[derive(Debug, Default)]
struct RobotDocuments {
    goals: BTreeMap<String, JsonValue>,
    archive: BTreeMap<String, JsonValue>,
    goal_types: Option<JsonValue>,
    mode: Option<JsonValue>,
    objects: HashMap<MapId, JsonMap<String, JsonValue>>,
}

/// In-process goal store with the same notification semantics as the remote
/// document database: discrete add/change/remove events, partial updates,
/// and a compare-and-delete transaction.
///
/// Notifications are published while the document lock is held, so a
/// subscriber's initial replay and its live events never overlap or leave
/// gaps.
#[derive(Debug)]
pub struct MemoryGoalStore {
    robots: Mutex<HashMap<RobotPath, RobotDocuments>>,
    hub: NotificationHub,
}

impl Default for MemoryGoalStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MemoryGoalStore {
    pub fn new(notification_buffer: usize) -> Self {
        Self {
            robots: Mutex::new(HashMap::new()),
            hub: NotificationHub::new(notification_buffer),
        }
    }

    pub fn goal(&self, robot: &RobotPath, key: &str) -> Option<JsonValue> {
        self.robots
            .lock()
            .get(robot)
            .and_then(|docs| docs.goals.get(key).cloned())
    }

    pub fn archived_goals(&self, robot: &RobotPath) -> BTreeMap<String, JsonValue> {
        self.robots
            .lock()
            .get(robot)
            .map(|docs| docs.archive.clone())
            .unwrap_or_default()
    }

    pub fn goal_types(&self, robot: &RobotPath) -> Option<JsonValue> {
        self.robots
            .lock()
            .get(robot)
            .and_then(|docs| docs.goal_types.clone())
    }

    pub fn executive_mode(&self, robot: &RobotPath) -> Option<JsonValue> {
        self.robots
            .lock()
            .get(robot)
            .and_then(|docs| docs.mode.clone())
    }

    /// Remove a goal as a remote user would.
    #[instrument(skip(self), fields(robot = %robot))]
    pub fn remove_goal(&self, robot: &RobotPath, key: &str) -> bool {
        let mut robots = self.robots.lock();
        let Some(document) = robots
            .get_mut(robot)
            .and_then(|docs| docs.goals.remove(key))
        else {
            return false;
        };
        self.hub.publish(StoreNotification::Goal {
            robot: robot.clone(),
            event: GoalEvent::Removed {
                key: key.to_owned(),
                document,
            },
        });
        debug!("goal removed");
        true
    }

    pub fn clear_executive_mode(&self, robot: &RobotPath) {
        let mut robots = self.robots.lock();
        robots.entry(robot.clone()).or_default().mode = None;
        self.hub.publish(StoreNotification::Mode {
            robot: robot.clone(),
            document: None,
        });
    }

    /// Replace a map's object collection.
    #[instrument(skip(self, snapshot), fields(robot = %robot, map = %map))]
    pub fn set_world_objects(
        &self,
        robot: &RobotPath,
        map: &MapId,
        snapshot: JsonMap<String, JsonValue>,
    ) {
        let mut robots = self.robots.lock();
        let docs = robots.entry(robot.clone()).or_default();
        docs.objects.insert(map.clone(), snapshot.clone());
        self.hub.publish(StoreNotification::Objects {
            robot: robot.clone(),
            map: map.clone(),
            snapshot: JsonValue::Object(snapshot),
        });
        debug!("world objects replaced");
    }

    /// Insert or replace one object; subscribers receive the whole collection.
    pub fn put_world_object(&self, robot: &RobotPath, map: &MapId, key: &str, document: JsonValue) {
        let mut robots = self.robots.lock();
        let objects = robots
            .entry(robot.clone())
            .or_default()
            .objects
            .entry(map.clone())
            .or_default();
        objects.insert(key.to_owned(), document);
        let snapshot = JsonValue::Object(objects.clone());
        self.hub.publish(StoreNotification::Objects {
            robot: robot.clone(),
            map: map.clone(),
            snapshot,
        });
    }
}

fn lagged(skipped: u64, what: &str) -> ExecutiveError {
    warn!(skipped, subscription = what, "store subscriber lagged");
    ExecutiveError::Store(format!(
        "{what} subscription lagged by {skipped} notifications"
    ))
}

#[async_trait]
impl GoalStorePort for MemoryGoalStore {
    #[instrument(skip(self, manifest), fields(robot = %robot))]
    async fn publish_goal_types(
        &self,
        robot: &RobotPath,
        manifest: JsonValue,
    ) -> ExecutiveResult<()> {
        self.robots.lock().entry(robot.clone()).or_default().goal_types = Some(manifest);
        debug!("goal types published");
        Ok(())
    }

    #[instrument(skip(self, document), fields(robot = %robot))]
    async fn put_goal(
        &self,
        robot: &RobotPath,
        key: &str,
        document: JsonValue,
    ) -> ExecutiveResult<()> {
        let mut robots = self.robots.lock();
        let docs = robots.entry(robot.clone()).or_default();
        let existed = docs
            .goals
            .insert(key.to_owned(), document.clone())
            .is_some();
        let key = key.to_owned();
        let event = if existed {
            GoalEvent::Changed { key, document }
        } else {
            GoalEvent::Added { key, document }
        };
        self.hub.publish(StoreNotification::Goal {
            robot: robot.clone(),
            event,
        });
        debug!(existed, "goal written");
        Ok(())
    }

    #[instrument(skip(self, patch), fields(robot = %robot, fields = patch.len()))]
    async fn update_goal(
        &self,
        robot: &RobotPath,
        key: &str,
        patch: JsonMap<String, JsonValue>,
    ) -> ExecutiveResult<()> {
        let mut robots = self.robots.lock();
        let docs = robots.entry(robot.clone()).or_default();
        let existed = docs.goals.contains_key(key);
        let document = docs
            .goals
            .entry(key.to_owned())
            .or_insert_with(|| JsonValue::Object(JsonMap::new()));
        if !document.is_object() {
            *document = JsonValue::Object(JsonMap::new());
        }
        if let JsonValue::Object(fields) = document {
            for (field, value) in patch {
                if value.is_null() {
                    fields.remove(&field);
                } else {
                    fields.insert(field, value);
                }
            }
        }
        let key = key.to_owned();
        let document = document.clone();
        let event = if existed {
            GoalEvent::Changed { key, document }
        } else {
            GoalEvent::Added { key, document }
        };
        self.hub.publish(StoreNotification::Goal {
            robot: robot.clone(),
            event,
        });
        debug!(existed, "goal updated");
        Ok(())
    }

    async fn read_goals(&self, robot: &RobotPath) -> ExecutiveResult<BTreeMap<String, JsonValue>> {
        Ok(self
            .robots
            .lock()
            .get(robot)
            .map(|docs| docs.goals.clone())
            .unwrap_or_default())
    }

    #[instrument(skip(self, document), fields(robot = %robot))]
    async fn archive_goal(
        &self,
        robot: &RobotPath,
        key: &str,
        document: JsonValue,
    ) -> ExecutiveResult<()> {
        self.robots
            .lock()
            .entry(robot.clone())
            .or_default()
            .archive
            .insert(key.to_owned(), document);
        debug!("goal archived");
        Ok(())
    }

    #[instrument(skip(self, expected), fields(robot = %robot))]
    async fn delete_goal_if_unchanged(
        &self,
        robot: &RobotPath,
        key: &str,
        expected: &JsonValue,
    ) -> ExecutiveResult<bool> {
        let mut robots = self.robots.lock();
        let Some(docs) = robots.get_mut(robot) else {
            return Ok(false);
        };
        if docs.goals.get(key) != Some(expected) {
            debug!("goal changed since it was read, delete aborted");
            return Ok(false);
        }
        if let Some(document) = docs.goals.remove(key) {
            self.hub.publish(StoreNotification::Goal {
                robot: robot.clone(),
                event: GoalEvent::Removed {
                    key: key.to_owned(),
                    document,
                },
            });
        }
        debug!("goal deleted");
        Ok(true)
    }

    #[instrument(skip(self, document), fields(robot = %robot))]
    async fn set_executive_mode(
        &self,
        robot: &RobotPath,
        document: JsonValue,
    ) -> ExecutiveResult<()> {
        let mut robots = self.robots.lock();
        robots.entry(robot.clone()).or_default().mode = Some(document.clone());
        self.hub.publish(StoreNotification::Mode {
            robot: robot.clone(),
            document: Some(document),
        });
        Ok(())
    }

    async fn subscribe_goals(&self, robot: &RobotPath) -> ExecutiveResult<GoalEventStream> {
        let (initial, mut live) = {
            let robots = self.robots.lock();
            let initial: Vec<GoalEvent> = robots
                .get(robot)
                .map(|docs| {
                    docs.goals
                        .iter()
                        .map(|(key, document)| GoalEvent::Added {
                            key: key.clone(),
                            document: document.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            (initial, self.hub.subscribe_stream())
        };
        let robot = robot.clone();
        let stream = async_stream::stream! {
            for event in initial {
                yield Ok(event);
            }
            while let Some(item) = live.next().await {
                match item {
                    Ok(StoreNotification::Goal { robot: owner, event }) if owner == robot => {
                        yield Ok(event);
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        yield Err(lagged(skipped, "goal"));
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn subscribe_world_objects(
        &self,
        robot: &RobotPath,
        map: &MapId,
    ) -> ExecutiveResult<ObjectSnapshotStream> {
        let (initial, mut live) = {
            let robots = self.robots.lock();
            let initial = robots
                .get(robot)
                .and_then(|docs| docs.objects.get(map).cloned())
                .unwrap_or_default();
            (JsonValue::Object(initial), self.hub.subscribe_stream())
        };
        let robot = robot.clone();
        let map = map.clone();
        let stream = async_stream::stream! {
            yield Ok(initial);
            while let Some(item) = live.next().await {
                match item {
                    Ok(StoreNotification::Objects { robot: owner, map: changed, snapshot })
                        if owner == robot && changed == map =>
                    {
                        yield Ok(snapshot);
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        yield Err(lagged(skipped, "world object"));
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn subscribe_executive_mode(
        &self,
        robot: &RobotPath,
    ) -> ExecutiveResult<ModeDocumentStream> {
        let (initial, mut live) = {
            let robots = self.robots.lock();
            let initial = robots.get(robot).and_then(|docs| docs.mode.clone());
            (initial, self.hub.subscribe_stream())
        };
        let robot = robot.clone();
        let stream = async_stream::stream! {
            yield Ok(initial);
            while let Some(item) = live.next().await {
                match item {
                    Ok(StoreNotification::Mode { robot: owner, document }) if owner == robot => {
                        yield Ok(document);
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        yield Err(lagged(skipped, "executive mode"));
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::{Context, Result};
    use futures_util::StreamExt;
    use goalex_protocol::{GoalEvent, GoalStorePort, MapId, RobotPath};
    use serde_json::{Map as JsonMap, Value as JsonValue, json};

    use crate::MemoryGoalStore;

    fn robot() -> RobotPath {
        RobotPath::new("user-1", "robot-1")
    }

    fn patch(value: JsonValue) -> JsonMap<String, JsonValue> {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn next<T>(stream: &mut (impl futures_util::Stream<Item = T> + Unpin)) -> Result<T> {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .context("timed out waiting for notification")?
            .context("stream ended")
    }

    #[tokio::test]
    async fn goal_subscription_replays_existing_goals_then_streams_changes() -> Result<()> {
        let store = MemoryGoalStore::default();
        store.put_goal(&robot(), "g1", json!({"type": "wait"})).await?;

        let mut events = store.subscribe_goals(&robot()).await?;
        let first = next(&mut events).await??;
        assert_eq!(
            first,
            GoalEvent::Added {
                key: "g1".to_owned(),
                document: json!({"type": "wait"}),
            }
        );

        store
            .update_goal(&robot(), "g1", patch(json!({"cancel": true})))
            .await?;
        let changed = next(&mut events).await??;
        assert!(matches!(changed, GoalEvent::Changed { .. }));
        assert_eq!(changed.document()["cancel"], json!(true));
        assert_eq!(changed.document()["type"], json!("wait"));

        assert!(store.remove_goal(&robot(), "g1"));
        let removed = next(&mut events).await??;
        assert!(matches!(removed, GoalEvent::Removed { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn subscriptions_only_see_their_robot() -> Result<()> {
        let store = MemoryGoalStore::default();
        let other = RobotPath::new("user-1", "robot-2");
        let mut events = store.subscribe_goals(&robot()).await?;

        store.put_goal(&other, "elsewhere", json!({})).await?;
        store.put_goal(&robot(), "mine", json!({})).await?;

        let event = next(&mut events).await??;
        assert_eq!(event.key(), "mine");
        Ok(())
    }

    #[tokio::test]
    async fn update_creates_missing_goal_and_null_removes_fields() -> Result<()> {
        let store = MemoryGoalStore::default();
        store
            .update_goal(&robot(), "g1", patch(json!({"reject": "true", "note": "x"})))
            .await?;
        store
            .update_goal(&robot(), "g1", patch(json!({"note": null})))
            .await?;
        assert_eq!(store.goal(&robot(), "g1"), Some(json!({"reject": "true"})));
        Ok(())
    }

    #[tokio::test]
    async fn compare_and_delete_only_commits_on_unchanged_value() -> Result<()> {
        let store = MemoryGoalStore::default();
        let original = json!({"type": "wait", "complete": "true"});
        store.put_goal(&robot(), "g1", original.clone()).await?;
        store
            .update_goal(&robot(), "g1", patch(json!({"priority": 5})))
            .await?;

        assert!(!store.delete_goal_if_unchanged(&robot(), "g1", &original).await?);
        assert!(store.goal(&robot(), "g1").is_some());

        let current = store.goal(&robot(), "g1").context("goal vanished")?;
        assert!(store.delete_goal_if_unchanged(&robot(), "g1", &current).await?);
        assert!(store.goal(&robot(), "g1").is_none());
        assert!(!store.delete_goal_if_unchanged(&robot(), "g1", &current).await?);
        Ok(())
    }

    #[tokio::test]
    async fn mode_subscription_reports_absent_document_first() -> Result<()> {
        let store = MemoryGoalStore::default();
        let mut modes = store.subscribe_executive_mode(&robot()).await?;
        assert_eq!(next(&mut modes).await??, None);

        let document = json!({"executive_mode": "RANDOM_DRIVER", "timestamp": 1});
        store.set_executive_mode(&robot(), document.clone()).await?;
        assert_eq!(next(&mut modes).await??, Some(document));

        store.clear_executive_mode(&robot());
        assert_eq!(next(&mut modes).await??, None);
        Ok(())
    }

    #[tokio::test]
    async fn object_subscription_is_per_map_and_snapshot_based() -> Result<()> {
        let store = MemoryGoalStore::default();
        let map = MapId::from_string("map-1");
        let mut snapshots = store.subscribe_world_objects(&robot(), &map).await?;
        assert_eq!(next(&mut snapshots).await??, json!({}));

        store.put_world_object(
            &robot(),
            &MapId::from_string("map-2"),
            "ignored",
            json!({"type": "point_of_interest"}),
        );
        store.put_world_object(&robot(), &map, "a", json!({"type": "point_of_interest"}));
        store.put_world_object(&robot(), &map, "b", json!({"type": "point_of_interest"}));

        let first = next(&mut snapshots).await??;
        assert_eq!(first.as_object().map(JsonMap::len), Some(1));
        let second = next(&mut snapshots).await??;
        assert_eq!(second.as_object().map(JsonMap::len), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn archive_and_manifest_are_stored() -> Result<()> {
        let store = MemoryGoalStore::default();
        store
            .archive_goal(&robot(), "old", json!({"complete": "true"}))
            .await?;
        store
            .publish_goal_types(&robot(), json!({"wait": {"version": "1.0.0"}}))
            .await?;
        assert_eq!(store.archived_goals(&robot()).len(), 1);
        assert_eq!(
            store.goal_types(&robot()).map(|manifest| manifest["wait"]["version"].clone()),
            Some(json!("1.0.0"))
        );
        assert!(store.read_goals(&robot()).await?.is_empty());
        Ok(())
    }
}
