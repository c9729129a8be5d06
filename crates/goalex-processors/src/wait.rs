use goalex_protocol::{ExecutiveDelegate, Goal, GoalState, StepRequest, Value, WorldState};

use crate::{Processor, ProcessorFactory};

#[derive(Debug, Clone, Copy, Default)]
pub struct WaitFactory;

impl ProcessorFactory for WaitFactory {
    fn create(&self, goal: &Goal) -> Box<dyn Processor> {
        Box::new(WaitProcessor {
            duration_ms: goal
                .parameter("time")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
            started_at_ms: None,
        })
    }
}

/// Completes `time` milliseconds after its first step.
#[derive(Debug)]
pub struct WaitProcessor {
    duration_ms: i64,
    started_at_ms: Option<i64>,
}

impl Processor for WaitProcessor {
    fn step(
        &mut self,
        _delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        request: StepRequest,
    ) -> GoalState {
        let started = *self.started_at_ms.get_or_insert(world.timestamp_ms);
        if world.timestamp_ms >= started + self.duration_ms {
            return GoalState::Completed;
        }
        if request.cancel {
            return GoalState::Rejected;
        }
        if request.preempt {
            return GoalState::Preempted;
        }
        GoalState::Running
    }
}
