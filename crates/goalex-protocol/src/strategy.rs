//! The contract between the executive core and pluggable execution strategies.

use serde::{Deserialize, Serialize};

use crate::goal::{Goal, GoalTypeSet};
use crate::ports::{ActionMediator, AnimationManager, SoundManager};
use crate::world::WorldState;

/// Outcome of one processing step of the current goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    Running,
    Preempted,
    Completed,
    Rejected,
}

/// Flags passed to a strategy for one step of the current goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepRequest {
    /// First step since the goal became current.
    pub is_new: bool,
    pub cancel: bool,
    pub preempt: bool,
}

/// What processors may do while the executive lock is held.
pub trait ExecutiveDelegate {
    /// Add a goal to the live set. Remote goals are also written to the store.
    fn add_goal(&mut self, goal: Goal);
    fn next_sequence(&mut self) -> i64;
    fn actions(&self) -> &dyn ActionMediator;
    fn sounds(&self) -> &dyn SoundManager;
    fn animations(&self) -> &dyn AnimationManager;
}

/// A goal execution strategy. Every method runs under the executive lock and
/// must not block.
pub trait ExecutiveStrategy: Send {
    /// Goal types accepted from the remote store.
    fn goal_types(&self) -> &GoalTypeSet;

    /// Seed singleton background goals at startup.
    fn bootstrap(&mut self, _delegate: &mut dyn ExecutiveDelegate) {}

    /// Admission check for goals whose type is a query type.
    fn query(&self, goal: &Goal, world: &WorldState) -> bool;

    fn process_goal(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        goal: &Goal,
        request: StepRequest,
    ) -> GoalState;

    /// Runs after every tick that got past the readiness checks.
    fn on_update(&mut self, _delegate: &mut dyn ExecutiveDelegate, _world: &WorldState) {}

    fn on_shutdown(&mut self, _delegate: &mut dyn ExecutiveDelegate) {}
}
