//! Fire-and-forget writes to the goal store.
//!
//! The executive queues writes while holding its lock; a writer task applies
//! them in order. Failed writes are logged and dropped.

use std::sync::Arc;

use goalex_protocol::{ExecutiveResult, GoalStorePort, RobotPath};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    PutGoal {
        key: String,
        document: JsonValue,
    },
    UpdateGoal {
        key: String,
        patch: JsonMap<String, JsonValue>,
    },
    SetExecutiveMode {
        document: JsonValue,
    },
}

impl StoreCommand {
    /// `{<flag>: "true", <flag>_timestamp: now}` for an outcome flag.
    pub fn outcome(key: impl Into<String>, flag: &str, now_ms: i64) -> Self {
        let mut patch = JsonMap::new();
        patch.insert(flag.to_owned(), json!("true"));
        patch.insert(format!("{flag}_timestamp"), json!(now_ms));
        Self::UpdateGoal {
            key: key.into(),
            patch,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::PutGoal { .. } => "put_goal",
            Self::UpdateGoal { .. } => "update_goal",
            Self::SetExecutiveMode { .. } => "set_executive_mode",
        }
    }

    async fn apply(self, store: &dyn GoalStorePort, robot: &RobotPath) -> ExecutiveResult<()> {
        match self {
            Self::PutGoal { key, document } => store.put_goal(robot, &key, document).await,
            Self::UpdateGoal { key, patch } => store.update_goal(robot, &key, patch).await,
            Self::SetExecutiveMode { document } => store.set_executive_mode(robot, document).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<StoreCommand>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StoreCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Never blocks.
    pub fn send(&self, command: StoreCommand) {
        let kind = command.kind();
        if self.sender.send(command).is_err() {
            warn!(command = kind, "store writer stopped, write dropped");
        }
    }
}

/// Apply queued writes in order. Once `shutdown` fires (or its sender is
/// dropped) the queue is closed and what is already queued is flushed.
/// Returns the number of writes that succeeded.
#[instrument(skip(store, receiver, shutdown), fields(robot = %robot))]
pub async fn run_writer(
    store: Arc<dyn GoalStorePort>,
    robot: RobotPath,
    mut receiver: mpsc::UnboundedReceiver<StoreCommand>,
    mut shutdown: oneshot::Receiver<()>,
) -> usize {
    let mut written = 0;
    let mut closing = false;
    loop {
        let command = tokio::select! {
            biased;
            command = receiver.recv() => command,
            _ = &mut shutdown, if !closing => {
                closing = true;
                receiver.close();
                continue;
            }
        };
        let Some(command) = command else {
            break;
        };
        let kind = command.kind();
        match command.apply(store.as_ref(), &robot).await {
            Ok(()) => {
                written += 1;
                debug!(command = kind, "store write applied");
            }
            Err(error) => warn!(command = kind, %error, "store write failed"),
        }
    }
    debug!(written, "store writer drained");
    written
}
