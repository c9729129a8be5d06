//! Goal processors: the per-goal state machines that advance goals toward an
//! outcome, the registry that binds them to goal types, and the strategies
//! built from them.

pub mod animation;
pub mod battery;
pub mod catalog;
pub mod dispatch;
pub mod drive;
pub mod random_driver;
pub mod random_strategy;
pub mod sim;
pub mod sound;
pub mod wait;

use std::collections::HashMap;
use std::sync::Arc;

use goalex_protocol::{
    ExecutiveDelegate, ExecutiveError, ExecutiveResult, Goal, GoalId, GoalState, GoalType,
    GoalTypeSet, RobotPath, StepRequest, WorldState,
};
use tracing::debug;

pub use dispatch::DispatchStrategy;
pub use random_strategy::RandomDriverStrategy;

/// Sound priority used by every reference processor.
pub(crate) const GOAL_SOUND_PRIORITY: u8 = 100;

/// Advances one goal instance. Created when the goal becomes current.
pub trait Processor: Send {
    fn step(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        request: StepRequest,
    ) -> GoalState;
}

/// Admission check evaluated before a processor exists for the goal.
pub trait GoalQuery: Send + Sync {
    fn query(&self, goal: &Goal, world: &WorldState) -> bool;
}

pub trait ProcessorFactory: Send + Sync {
    fn create(&self, goal: &Goal) -> Box<dyn Processor>;

    /// Factories of query goal types must expose their admission check.
    fn as_query(&self) -> Option<&dyn GoalQuery> {
        None
    }
}

/// A singleton goal seeded locally at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapGoal {
    pub uuid: GoalId,
    pub goal_type: String,
    pub priority: i64,
}

/// Goal types and the factories that process them.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    goal_types: Vec<GoalType>,
    factories: HashMap<String, Arc<dyn ProcessorFactory>>,
    bootstrap: Vec<BootstrapGoal>,
}

impl ProcessorRegistry {
    /// Declare a goal type and bind its factory.
    pub fn register(&mut self, goal_type: GoalType, factory: Arc<dyn ProcessorFactory>) {
        self.bind(goal_type.name(), factory);
        self.declare(goal_type);
    }

    pub fn declare(&mut self, goal_type: GoalType) {
        self.goal_types.push(goal_type);
    }

    pub fn bind(&mut self, goal_type: &str, factory: Arc<dyn ProcessorFactory>) {
        self.factories.insert(goal_type.to_owned(), factory);
    }

    pub fn bootstrap_goal(&mut self, uuid: impl Into<GoalId>, goal_type: &str, priority: i64) {
        self.bootstrap.push(BootstrapGoal {
            uuid: uuid.into(),
            goal_type: goal_type.to_owned(),
            priority,
        });
    }

    pub fn goal_types(&self) -> impl Iterator<Item = &GoalType> {
        self.goal_types.iter()
    }

    pub fn factory(&self, goal_type: &str) -> Option<&Arc<dyn ProcessorFactory>> {
        self.factories.get(goal_type)
    }

    /// Every reference goal type with its processor, plus the random driver
    /// and battery monitor background goals.
    pub fn with_reference_processors() -> Self {
        let mut registry = Self::default();
        catalog::register_reference_processors(&mut registry);
        registry
    }

    /// Check that every declared type can be dispatched, then build the
    /// strategy for the robot at `owner`.
    pub fn into_strategy(self, owner: RobotPath) -> ExecutiveResult<DispatchStrategy> {
        self.validate()?;
        let goal_types = GoalTypeSet::new(self.goal_types)?;
        debug!(
            goal_types = goal_types.len(),
            bootstrap = self.bootstrap.len(),
            "processor registry validated"
        );
        Ok(DispatchStrategy::new(
            goal_types,
            self.factories,
            self.bootstrap,
            owner,
        ))
    }

    fn validate(&self) -> ExecutiveResult<()> {
        for goal_type in &self.goal_types {
            let factory = self
                .factories
                .get(goal_type.name())
                .ok_or_else(|| ExecutiveError::MissingProcessor(goal_type.name().to_owned()))?;
            if goal_type.is_query() && factory.as_query().is_none() {
                return Err(ExecutiveError::QueryCapabilityMissing(
                    goal_type.name().to_owned(),
                ));
            }
        }
        if let Some(orphan) = self
            .factories
            .keys()
            .find(|name| !self.goal_types.iter().any(|ty| ty.name() == name.as_str()))
        {
            return Err(ExecutiveError::InvalidGoalType(format!(
                "processor bound to undeclared goal type `{orphan}`"
            )));
        }
        if let Some(seed) = self
            .bootstrap
            .iter()
            .find(|seed| !self.factories.contains_key(&seed.goal_type))
        {
            return Err(ExecutiveError::MissingProcessor(format!(
                "{} (bootstrap goal {})",
                seed.goal_type, seed.uuid
            )));
        }
        Ok(())
    }
}
