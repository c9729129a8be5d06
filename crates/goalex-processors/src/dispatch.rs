use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use goalex_protocol::{
    ExecutiveDelegate, ExecutiveStrategy, Goal, GoalDraft, GoalId, GoalState, GoalTypeSet,
    RobotPath, StepRequest, WorldState,
};
use tracing::{debug, info, warn};

use crate::{BootstrapGoal, Processor, ProcessorFactory};

/// Strategy that runs each goal through the processor registered for its
/// type. A fresh processor is created whenever a goal becomes current.
pub struct DispatchStrategy {
    goal_types: GoalTypeSet,
    factories: HashMap<String, Arc<dyn ProcessorFactory>>,
    bootstrap: Vec<BootstrapGoal>,
    owner: RobotPath,
    current: Option<(GoalId, Box<dyn Processor>)>,
}

impl fmt::Debug for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchStrategy")
            .field("goal_types", &self.goal_types.len())
            .field("owner", &self.owner)
            .field("current", &self.current.as_ref().map(|(uuid, _)| uuid))
            .finish()
    }
}

impl DispatchStrategy {
    pub(crate) fn new(
        goal_types: GoalTypeSet,
        factories: HashMap<String, Arc<dyn ProcessorFactory>>,
        bootstrap: Vec<BootstrapGoal>,
        owner: RobotPath,
    ) -> Self {
        Self {
            goal_types,
            factories,
            bootstrap,
            owner,
            current: None,
        }
    }

    pub fn owner(&self) -> &RobotPath {
        &self.owner
    }
}

impl ExecutiveStrategy for DispatchStrategy {
    fn goal_types(&self) -> &GoalTypeSet {
        &self.goal_types
    }

    fn bootstrap(&mut self, delegate: &mut dyn ExecutiveDelegate) {
        for seed in &self.bootstrap {
            let Some(goal_type) = self.goal_types.get(&seed.goal_type) else {
                warn!(goal_type = %seed.goal_type, "bootstrap goal type not declared");
                continue;
            };
            let sequence = delegate.next_sequence();
            let goal = GoalDraft::new(goal_type, self.owner.clone())
                .sequence(sequence)
                .priority(seed.priority)
                .into_local(seed.uuid.clone());
            info!(
                goal_id = %seed.uuid,
                goal_type = %seed.goal_type,
                priority = seed.priority,
                "background goal seeded"
            );
            delegate.add_goal(goal);
        }
    }

    fn query(&self, goal: &Goal, world: &WorldState) -> bool {
        match self
            .factories
            .get(goal.goal_type())
            .and_then(|factory| factory.as_query())
        {
            Some(query) => query.query(goal, world),
            None => {
                warn!(goal_type = %goal.goal_type(), "query on goal type without admission check");
                false
            }
        }
    }

    fn process_goal(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        goal: &Goal,
        request: StepRequest,
    ) -> GoalState {
        let stale = self
            .current
            .as_ref()
            .is_none_or(|(uuid, _)| uuid != goal.uuid());
        if request.is_new || stale {
            let Some(factory) = self.factories.get(goal.goal_type()) else {
                warn!(goal_id = %goal.uuid(), goal_type = %goal.goal_type(), "no processor for goal");
                return GoalState::Rejected;
            };
            debug!(goal_id = %goal.uuid(), goal_type = %goal.goal_type(), "processor created");
            self.current = Some((goal.uuid().clone(), factory.create(goal)));
        }
        let Some((_, processor)) = self.current.as_mut() else {
            return GoalState::Rejected;
        };
        let state = processor.step(delegate, world, request);
        if state != GoalState::Running {
            self.current = None;
        }
        state
    }

    fn on_shutdown(&mut self, delegate: &mut dyn ExecutiveDelegate) {
        if self.current.take().is_some() {
            delegate.actions().set_action(None);
        }
    }
}
