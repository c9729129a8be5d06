use goalex_protocol::{
    Action, ActionCommand, ActionId, ActionState, ExecutiveDelegate, Goal, GoalSound, GoalState,
    SoundHandle, StepRequest, Transform, Value, WorldState,
};
use tracing::{debug, warn};

use crate::{GOAL_SOUND_PRIORITY, Processor, ProcessorFactory};

/// What a drive goal does once the robot has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishAction {
    None,
    /// Stay at the target for `time` milliseconds.
    Wait,
    /// Run a vacuum spiral for `time` milliseconds.
    VacuumSpiral,
}

/// Where a goal's target pose comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSource {
    /// `location` and `map` parameters.
    Transform,
    /// A point of interest named by the `target` parameter.
    PointOfInterest,
}

impl PoseSource {
    /// Target pose and map uuid of a goal, `None` if either is unresolvable.
    pub(crate) fn resolve(self, goal: &Goal, world: &WorldState) -> Option<(Transform, String)> {
        match self {
            Self::Transform => {
                let location = goal.parameter("location").and_then(Value::as_transform)?;
                let map = goal.parameter("map").and_then(Value::as_str)?;
                Some((*location, map.to_owned()))
            }
            Self::PointOfInterest => {
                let target = goal.parameter("target").and_then(Value::as_str)?;
                let object = world.object(target)?;
                Some((*object.location()?, object.map_uuid().to_string()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriveFactory {
    finish: FinishAction,
    source: PoseSource,
    rotation: bool,
}

impl DriveFactory {
    pub fn new(finish: FinishAction, source: PoseSource, rotation: bool) -> Self {
        Self {
            finish,
            source,
            rotation,
        }
    }
}

impl ProcessorFactory for DriveFactory {
    fn create(&self, goal: &Goal) -> Box<dyn Processor> {
        Box::new(DriveProcessor {
            goal: goal.clone(),
            finish: self.finish,
            source: self.source,
            rotation: self.rotation,
            phase: Phase::Init,
            start_sound: None,
            finish_sound: None,
        })
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Init,
    Drive(ActionId),
    Wait { deadline_ms: i64 },
    Vacuum(ActionId),
}

/// Drives to the goal's target, then optionally waits or vacuums there.
#[derive(Debug)]
pub struct DriveProcessor {
    goal: Goal,
    finish: FinishAction,
    source: PoseSource,
    rotation: bool,
    phase: Phase,
    start_sound: Option<SoundHandle>,
    finish_sound: Option<SoundHandle>,
}

impl DriveProcessor {
    fn duration_ms(&self) -> i64 {
        self.goal
            .parameter("time")
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    fn start_sound_playing(&self, delegate: &dyn ExecutiveDelegate) -> bool {
        self.start_sound
            .is_some_and(|handle| delegate.sounds().is_playing(handle))
    }

    fn reject(&mut self, delegate: &mut dyn ExecutiveDelegate) -> GoalState {
        delegate.actions().set_action(None);
        if self.finish_sound.is_none() && !self.start_sound_playing(delegate) {
            self.finish_sound = delegate
                .sounds()
                .play_goal_sound(GoalSound::RejectedGoal, GOAL_SOUND_PRIORITY);
        }
        GoalState::Rejected
    }

    fn start(&mut self, delegate: &mut dyn ExecutiveDelegate, world: &WorldState) -> Option<GoalState> {
        let Some((target, map)) = self.source.resolve(&self.goal, world) else {
            debug!(goal_id = %self.goal.uuid(), "drive target unresolved");
            delegate.actions().set_action(None);
            return Some(GoalState::Rejected);
        };
        if map != world.map_uuid().as_str() {
            debug!(goal_id = %self.goal.uuid(), goal_map = %map, "goal rejected for wrong map");
            delegate.actions().set_action(None);
            return Some(GoalState::Rejected);
        }
        let command = ActionCommand::new(Action::Drive {
            target,
            rotation: self.rotation,
        });
        self.phase = Phase::Drive(command.id.clone());
        delegate.actions().set_action(Some(command));
        self.start_sound = delegate
            .sounds()
            .play_goal_sound(GoalSound::StartedGoal, GOAL_SOUND_PRIORITY);
        None
    }
}

impl Processor for DriveProcessor {
    fn step(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        request: StepRequest,
    ) -> GoalState {
        if matches!(self.phase, Phase::Init)
            && let Some(outcome) = self.start(delegate, world)
        {
            return outcome;
        }

        if let Phase::Drive(id) = self.phase.clone() {
            match delegate.actions().action_state(&id) {
                Some(ActionState::Completed) => match self.finish {
                    FinishAction::None => {
                        delegate.actions().set_action(None);
                        return GoalState::Completed;
                    }
                    FinishAction::Wait => {
                        self.phase = Phase::Wait {
                            deadline_ms: world.timestamp_ms + self.duration_ms(),
                        };
                    }
                    FinishAction::VacuumSpiral => {
                        let command = ActionCommand::new(Action::VacuumSpiral {
                            duration_ms: self.duration_ms(),
                        });
                        self.phase = Phase::Vacuum(command.id.clone());
                        delegate.actions().set_action(Some(command));
                    }
                },
                Some(ActionState::Rejected) => {
                    debug!(goal_id = %self.goal.uuid(), "drive action rejected");
                    return self.reject(delegate);
                }
                None => {
                    warn!(goal_id = %self.goal.uuid(), "drive action unknown to mediator");
                    return self.reject(delegate);
                }
                Some(ActionState::Queued | ActionState::Executing) => {}
            }
        }

        if let Phase::Wait { deadline_ms } = self.phase {
            if world.timestamp_ms >= deadline_ms {
                delegate.actions().set_action(None);
                return GoalState::Completed;
            }
            if self.finish_sound.is_none() && !self.start_sound_playing(delegate) {
                self.finish_sound = delegate
                    .sounds()
                    .play_goal_sound(GoalSound::CompletedGoal, GOAL_SOUND_PRIORITY);
            }
        }

        if let Phase::Vacuum(id) = &self.phase {
            match delegate.actions().action_state(id) {
                Some(ActionState::Completed) => {
                    delegate.actions().set_action(None);
                    return GoalState::Completed;
                }
                Some(ActionState::Rejected) | None => {
                    warn!(goal_id = %self.goal.uuid(), "vacuum action failed");
                    delegate.actions().set_action(None);
                    return GoalState::Rejected;
                }
                Some(ActionState::Queued | ActionState::Executing) => {}
            }
        }

        if request.preempt {
            delegate.actions().set_action(None);
            return GoalState::Preempted;
        }
        if request.cancel {
            delegate.actions().set_action(None);
            return GoalState::Rejected;
        }
        GoalState::Running
    }
}
