//! Runtime boundary ports for the goal executive.
//!
//! [`GoalStorePort`] is the only wire contract the executive needs from the
//! remote goal store. The collaborator traits describe the robot subsystems
//! processors drive as side effects: motion (action mediator), sound,
//! animation and navigation markers.
//!
//! Object-safety note:
//! - The store port uses `async-trait` for async dyn-dispatch.
//! - Subscriptions are boxed streams.
//! - Collaborator calls are synchronous and must not block; they are invoked
//!   while the executive lock is held.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::ExecutiveResult;
use crate::ids::{ActionId, MapId, RobotPath};
use crate::transform::Transform;

pub type GoalEventStream = BoxStream<'static, ExecutiveResult<GoalEvent>>;
pub type ObjectSnapshotStream = BoxStream<'static, ExecutiveResult<JsonValue>>;
pub type ModeDocumentStream = BoxStream<'static, ExecutiveResult<Option<JsonValue>>>;

/// A discrete change to one document of the goal collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalEvent {
    Added { key: String, document: JsonValue },
    Changed { key: String, document: JsonValue },
    Removed { key: String, document: JsonValue },
}

impl GoalEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Added { key, .. } | Self::Changed { key, .. } | Self::Removed { key, .. } => key,
        }
    }

    pub fn document(&self) -> &JsonValue {
        match self {
            Self::Added { document, .. }
            | Self::Changed { document, .. }
            | Self::Removed { document, .. } => document,
        }
    }
}

#[async_trait]
pub trait GoalStorePort: Send + Sync {
    /// Replace the goal-type manifest advertised for this robot.
    async fn publish_goal_types(&self, robot: &RobotPath, manifest: JsonValue)
    -> ExecutiveResult<()>;

    async fn put_goal(&self, robot: &RobotPath, key: &str, document: JsonValue)
    -> ExecutiveResult<()>;

    /// Merge `patch` into the goal document, creating it if absent.
    async fn update_goal(
        &self,
        robot: &RobotPath,
        key: &str,
        patch: JsonMap<String, JsonValue>,
    ) -> ExecutiveResult<()>;

    /// Single-shot read of the full goal collection.
    async fn read_goals(&self, robot: &RobotPath) -> ExecutiveResult<BTreeMap<String, JsonValue>>;

    async fn archive_goal(
        &self,
        robot: &RobotPath,
        key: &str,
        document: JsonValue,
    ) -> ExecutiveResult<()>;

    /// Delete the goal only if its current value equals `expected`. Returns
    /// whether the delete committed.
    async fn delete_goal_if_unchanged(
        &self,
        robot: &RobotPath,
        key: &str,
        expected: &JsonValue,
    ) -> ExecutiveResult<bool>;

    async fn set_executive_mode(&self, robot: &RobotPath, document: JsonValue)
    -> ExecutiveResult<()>;

    /// Yields an `Added` event per existing goal, then live changes.
    async fn subscribe_goals(&self, robot: &RobotPath) -> ExecutiveResult<GoalEventStream>;

    /// Yields the current snapshot of a map's objects, then every new snapshot.
    async fn subscribe_world_objects(
        &self,
        robot: &RobotPath,
        map: &MapId,
    ) -> ExecutiveResult<ObjectSnapshotStream>;

    /// Yields the current mode document (`None` when absent), then changes.
    async fn subscribe_executive_mode(&self, robot: &RobotPath)
    -> ExecutiveResult<ModeDocumentStream>;
}

/// A motion or behaviour request for the action mediator.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Drive { target: Transform, rotation: bool },
    VacuumSpiral { duration_ms: i64 },
    Animation { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionCommand {
    pub id: ActionId,
    pub action: Action,
}

impl ActionCommand {
    pub fn new(action: Action) -> Self {
        Self {
            id: ActionId::new_uuid(),
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Queued,
    Executing,
    Rejected,
    Completed,
}

/// Executes at most one action at a time.
pub trait ActionMediator: Send + Sync {
    /// Replace the active action. `None` stops the robot.
    fn set_action(&self, command: Option<ActionCommand>);
    /// State of a previously set action, `None` if the mediator no longer
    /// knows it.
    fn action_state(&self, id: &ActionId) -> Option<ActionState>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSound {
    StartedGoal,
    CompletedGoal,
    RejectedGoal,
    Alarm,
    YouAreWelcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u64);

pub trait SoundManager: Send + Sync {
    fn play_goal_sound(&self, sound: GoalSound, priority: u8) -> Option<SoundHandle>;
    fn is_playing(&self, handle: SoundHandle) -> bool;
    fn stop(&self, handle: SoundHandle);
}

pub trait AnimationManager: Send + Sync {
    fn has_animation(&self, name: &str) -> bool;
}

/// Receives named pose markers for the navigation stack.
pub trait NavigationPublisher: Send + Sync {
    fn publish_points_of_interest(&self, points: &[(String, Transform)]);
}

/// The robot subsystems reachable from the executive.
#[derive(Clone)]
pub struct Collaborators {
    pub actions: Arc<dyn ActionMediator>,
    pub sounds: Arc<dyn SoundManager>,
    pub animations: Arc<dyn AnimationManager>,
    pub navigation: Arc<dyn NavigationPublisher>,
}
