use goalex_protocol::{
    ExecutiveDelegate, Goal, GoalSound, GoalState, SoundHandle, StepRequest, Value, WorldState,
};

use crate::{GOAL_SOUND_PRIORITY, Processor, ProcessorFactory};

/// Plays one goal sound. With a stop parameter, playback ends at the
/// absolute time (ms since the epoch) the parameter names.
#[derive(Debug, Clone)]
pub struct SoundFactory {
    sound: GoalSound,
    stop_parameter: Option<&'static str>,
}

impl SoundFactory {
    pub fn new(sound: GoalSound, stop_parameter: Option<&'static str>) -> Self {
        Self {
            sound,
            stop_parameter,
        }
    }

    pub fn alarm() -> Self {
        Self::new(GoalSound::Alarm, Some("time"))
    }

    pub fn you_are_welcome() -> Self {
        Self::new(GoalSound::YouAreWelcome, None)
    }
}

impl ProcessorFactory for SoundFactory {
    fn create(&self, goal: &Goal) -> Box<dyn Processor> {
        let stop_at_ms = self.stop_parameter.map(|name| {
            goal.parameter(name)
                .and_then(Value::as_i64)
                .unwrap_or_default()
        });
        Box::new(SoundProcessor {
            sound: self.sound,
            stop_at_ms,
            handle: None,
            started: false,
        })
    }
}

#[derive(Debug)]
pub struct SoundProcessor {
    sound: GoalSound,
    stop_at_ms: Option<i64>,
    handle: Option<SoundHandle>,
    started: bool,
}

impl Processor for SoundProcessor {
    fn step(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        request: StepRequest,
    ) -> GoalState {
        if !self.started {
            self.started = true;
            self.handle = delegate
                .sounds()
                .play_goal_sound(self.sound, GOAL_SOUND_PRIORITY);
        }
        let Some(handle) = self
            .handle
            .filter(|handle| delegate.sounds().is_playing(*handle))
        else {
            return GoalState::Completed;
        };
        if self.stop_at_ms.is_some_and(|stop| world.timestamp_ms > stop) {
            delegate.sounds().stop(handle);
            return GoalState::Completed;
        }
        if request.cancel || request.preempt {
            delegate.sounds().stop(handle);
            return if request.cancel {
                GoalState::Rejected
            } else {
                GoalState::Preempted
            };
        }
        GoalState::Running
    }
}

#[cfg(test)]
mod tests {
    use goalex_protocol::{GoalDraft, GoalType, RobotPath, Transform, VariableType, World};

    use super::*;
    use crate::sim::{SimRobot, world_state};

    fn at(now_ms: i64) -> WorldState {
        world_state(World::new("map-1", "home"), Transform::default(), now_ms)
    }

    fn alarm(stop_at_ms: i64) -> Goal {
        let goal_type = GoalType::new("alarm", "1.0.0").parameter("time", VariableType::Int64);
        GoalDraft::new(&goal_type, RobotPath::new("u", "r"))
            .parameter("time", stop_at_ms)
            .into_remote()
    }

    #[test]
    fn alarm_stops_at_absolute_time() {
        let robot = SimRobot::new();
        let mut delegate = robot.delegate();
        let mut processor = SoundFactory::alarm().create(&alarm(5_000));
        let step = StepRequest::default();

        assert_eq!(processor.step(&mut delegate, &at(4_000), step), GoalState::Running);
        assert_eq!(processor.step(&mut delegate, &at(5_000), step), GoalState::Running);
        assert_eq!(processor.step(&mut delegate, &at(5_001), step), GoalState::Completed);
        assert_eq!(robot.sounds.played(), [GoalSound::Alarm]);
        assert_eq!(robot.sounds.stopped().len(), 1);
    }

    #[test]
    fn completes_when_playback_ends() {
        let robot = SimRobot::new();
        let mut delegate = robot.delegate();
        let goal = GoalDraft::new(&GoalType::new("you_are_welcome", "1.0.0"), RobotPath::new("u", "r"))
            .into_remote();
        let mut processor = SoundFactory::you_are_welcome().create(&goal);
        let step = StepRequest::default();

        assert_eq!(processor.step(&mut delegate, &at(0), step), GoalState::Running);
        robot.sounds.finish_all();
        assert_eq!(processor.step(&mut delegate, &at(1), step), GoalState::Completed);
        assert_eq!(robot.sounds.played(), [GoalSound::YouAreWelcome]);
    }

    #[test]
    fn cancel_stops_playback_and_rejects() {
        let robot = SimRobot::new();
        let mut delegate = robot.delegate();
        let mut processor = SoundFactory::alarm().create(&alarm(i64::MAX));
        processor.step(&mut delegate, &at(0), StepRequest::default());
        let cancel = StepRequest {
            cancel: true,
            ..StepRequest::default()
        };
        assert_eq!(processor.step(&mut delegate, &at(1), cancel), GoalState::Rejected);
        assert_eq!(robot.sounds.stopped().len(), 1);
    }
}
