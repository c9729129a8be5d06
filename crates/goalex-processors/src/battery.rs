use goalex_protocol::{ExecutiveDelegate, Goal, GoalState, StepRequest, WorldState};

use crate::{GoalQuery, Processor, ProcessorFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    /// Admitted when the battery is low or critical.
    Low,
    Critical,
}

/// Background goals that only become admissible on a low battery.
#[derive(Debug, Clone, Copy)]
pub struct BatteryMonitorFactory {
    level: BatteryLevel,
}

impl BatteryMonitorFactory {
    pub fn low() -> Self {
        Self {
            level: BatteryLevel::Low,
        }
    }

    pub fn critical() -> Self {
        Self {
            level: BatteryLevel::Critical,
        }
    }
}

impl GoalQuery for BatteryMonitorFactory {
    fn query(&self, _goal: &Goal, world: &WorldState) -> bool {
        match self.level {
            BatteryLevel::Low => world.battery_low || world.battery_critical,
            BatteryLevel::Critical => world.battery_critical,
        }
    }
}

impl ProcessorFactory for BatteryMonitorFactory {
    fn create(&self, _goal: &Goal) -> Box<dyn Processor> {
        Box::new(BatteryMonitorProcessor)
    }

    fn as_query(&self) -> Option<&dyn GoalQuery> {
        Some(self)
    }
}

/// Holds the robot while the battery is low. Docking is not implemented, so
/// the goal runs until it is cancelled or preempted.
#[derive(Debug)]
pub struct BatteryMonitorProcessor;

impl Processor for BatteryMonitorProcessor {
    fn step(
        &mut self,
        _delegate: &mut dyn ExecutiveDelegate,
        _world: &WorldState,
        request: StepRequest,
    ) -> GoalState {
        if request.cancel {
            return GoalState::Rejected;
        }
        if request.preempt {
            return GoalState::Preempted;
        }
        GoalState::Running
    }
}
