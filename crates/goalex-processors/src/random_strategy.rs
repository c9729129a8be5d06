use goalex_protocol::{
    Action, ActionCommand, ActionId, ActionState, ExecutiveDelegate, ExecutiveStrategy, Goal,
    GoalState, GoalTypeSet, StepRequest, WorldState,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::catalog::RANDOM_SEED;

/// Strategy that ignores goals and wanders between surveyed poses.
///
/// It accepts no goal types, so remote goals are dropped at validation;
/// anything that still reaches it completes on its first step.
#[derive(Debug)]
pub struct RandomDriverStrategy {
    goal_types: GoalTypeSet,
    rng: StdRng,
    action: Option<ActionId>,
}

impl Default for RandomDriverStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomDriverStrategy {
    pub fn new() -> Self {
        Self {
            goal_types: GoalTypeSet::default(),
            rng: StdRng::seed_from_u64(RANDOM_SEED),
            action: None,
        }
    }
}

impl ExecutiveStrategy for RandomDriverStrategy {
    fn goal_types(&self) -> &GoalTypeSet {
        &self.goal_types
    }

    fn query(&self, _goal: &Goal, _world: &WorldState) -> bool {
        true
    }

    fn process_goal(
        &mut self,
        _delegate: &mut dyn ExecutiveDelegate,
        _world: &WorldState,
        _goal: &Goal,
        _request: StepRequest,
    ) -> GoalState {
        GoalState::Completed
    }

    fn on_update(&mut self, delegate: &mut dyn ExecutiveDelegate, world: &WorldState) {
        let idle = self.action.as_ref().is_none_or(|id| {
            matches!(
                delegate.actions().action_state(id),
                None | Some(ActionState::Completed | ActionState::Rejected)
            )
        });
        if !idle {
            return;
        }
        let waypoints = world.world.waypoints();
        if waypoints.is_empty() {
            return;
        }
        let target = waypoints[self.rng.gen_range(0..waypoints.len())];
        debug!(x = target.px, y = target.py, "random drive");
        let command = ActionCommand::new(Action::Drive {
            target,
            rotation: false,
        });
        self.action = Some(command.id.clone());
        delegate.actions().set_action(Some(command));
    }
}
