use goalex_protocol::{
    Action, ActionCommand, ActionId, ActionState, ExecutiveDelegate, Goal, GoalState, StepRequest,
    Value, WorldState,
};
use tracing::debug;

use crate::{Processor, ProcessorFactory};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnimationFactory;

impl ProcessorFactory for AnimationFactory {
    fn create(&self, goal: &Goal) -> Box<dyn Processor> {
        Box::new(AnimationProcessor {
            animation: goal
                .parameter("animation")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_owned),
            action: None,
        })
    }
}

/// Plays one named animation through the action mediator. Preemption is not
/// honoured; the animation runs to completion.
#[derive(Debug)]
pub struct AnimationProcessor {
    animation: Option<String>,
    action: Option<ActionId>,
}

impl Processor for AnimationProcessor {
    fn step(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        _world: &WorldState,
        request: StepRequest,
    ) -> GoalState {
        let action = match &self.action {
            Some(action) => action.clone(),
            None => {
                let Some(name) = self
                    .animation
                    .clone()
                    .filter(|name| delegate.animations().has_animation(name))
                else {
                    debug!(animation = ?self.animation, "unknown animation");
                    delegate.actions().set_action(None);
                    return GoalState::Rejected;
                };
                let command = ActionCommand::new(Action::Animation { name });
                let id = command.id.clone();
                delegate.actions().set_action(Some(command));
                self.action = Some(id.clone());
                id
            }
        };

        if request.cancel {
            delegate.actions().set_action(None);
            return GoalState::Rejected;
        }
        match delegate.actions().action_state(&action) {
            Some(ActionState::Completed) => {
                delegate.actions().set_action(None);
                GoalState::Completed
            }
            Some(ActionState::Rejected) => {
                delegate.actions().set_action(None);
                GoalState::Rejected
            }
            _ => GoalState::Running,
        }
    }
}
