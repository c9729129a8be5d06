//! Processors that keep the robot moving by spawning `drivePoint` goals.

use std::sync::Arc;

use goalex_protocol::{
    ExecutiveDelegate, Goal, GoalDraft, GoalState, GoalType, MapId, StepRequest, Transform,
    VariableType, WorldState,
};
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::catalog::{DRIVE_POINT, GOAL_TYPE_VERSION};
use crate::drive::PoseSource;
use crate::{Processor, ProcessorFactory};

/// Radius around the patrol target within which waypoints are chosen.
pub const PATROL_RADIUS: f64 = 3.0;

/// Spawned drive goals outrank their spawner by this much.
const SPAWN_PRIORITY_BOOST: i64 = 10;

fn drive_point_type() -> GoalType {
    GoalType::new(DRIVE_POINT, GOAL_TYPE_VERSION)
        .parameter("location", VariableType::Transform)
        .parameter("map", VariableType::MapRef)
}

/// Emit a remote `drivePoint` goal on the current map, outranking `parent`.
fn spawn_drive_point(
    delegate: &mut dyn ExecutiveDelegate,
    parent: &Goal,
    map: &MapId,
    location: Transform,
) {
    let sequence = delegate.next_sequence();
    let goal = GoalDraft::new(&drive_point_type(), parent.owner().clone())
        .parameter("location", location)
        .parameter("map", map.as_str())
        .sequence(sequence)
        .priority(parent.priority() + SPAWN_PRIORITY_BOOST)
        .into_remote();
    debug!(
        parent = %parent.uuid(),
        goal_id = %goal.uuid(),
        x = location.px,
        y = location.py,
        "spawning drive goal"
    );
    delegate.add_goal(goal);
}

fn choose(rng: &Mutex<StdRng>, candidates: &[Transform]) -> Option<Transform> {
    if candidates.is_empty() {
        return None;
    }
    let index = rng.lock().gen_range(0..candidates.len());
    candidates.get(index).copied()
}

#[derive(Debug, Clone)]
pub struct RandomDriverFactory {
    rng: Arc<Mutex<StdRng>>,
}

impl RandomDriverFactory {
    pub fn new(rng: Arc<Mutex<StdRng>>) -> Self {
        Self { rng }
    }
}

impl ProcessorFactory for RandomDriverFactory {
    fn create(&self, goal: &Goal) -> Box<dyn Processor> {
        Box::new(RandomDriverProcessor {
            goal: goal.clone(),
            rng: self.rng.clone(),
        })
    }
}

/// Sends the robot to a random point of interest, or a random surveyed pose
/// when the map has none.
#[derive(Debug)]
pub struct RandomDriverProcessor {
    goal: Goal,
    rng: Arc<Mutex<StdRng>>,
}

impl Processor for RandomDriverProcessor {
    fn step(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        request: StepRequest,
    ) -> GoalState {
        if request.cancel {
            return GoalState::Rejected;
        }
        if request.preempt {
            return GoalState::Preempted;
        }

        let points: Vec<Transform> = world
            .points_of_interest()
            .filter_map(|object| object.location().copied())
            .collect();
        let candidates = if points.is_empty() {
            world.world.waypoints()
        } else {
            points.as_slice()
        };
        let Some(location) = choose(&self.rng, candidates) else {
            debug!(goal_id = %self.goal.uuid(), "nowhere to drive");
            return GoalState::Rejected;
        };
        spawn_drive_point(delegate, &self.goal, world.map_uuid(), location);
        GoalState::Running
    }
}

#[derive(Debug, Clone)]
pub struct PatrolDriverFactory {
    source: PoseSource,
    rng: Arc<Mutex<StdRng>>,
}

impl PatrolDriverFactory {
    pub fn new(source: PoseSource, rng: Arc<Mutex<StdRng>>) -> Self {
        Self { source, rng }
    }
}

impl ProcessorFactory for PatrolDriverFactory {
    fn create(&self, goal: &Goal) -> Box<dyn Processor> {
        Box::new(PatrolDriverProcessor {
            goal: goal.clone(),
            source: self.source,
            rng: self.rng.clone(),
        })
    }
}

/// Wanders between surveyed poses near a target point.
#[derive(Debug)]
pub struct PatrolDriverProcessor {
    goal: Goal,
    source: PoseSource,
    rng: Arc<Mutex<StdRng>>,
}

impl Processor for PatrolDriverProcessor {
    fn step(
        &mut self,
        delegate: &mut dyn ExecutiveDelegate,
        world: &WorldState,
        request: StepRequest,
    ) -> GoalState {
        if request.cancel {
            return GoalState::Rejected;
        }
        if request.preempt {
            return GoalState::Preempted;
        }

        let Some((target, map)) = self.source.resolve(&self.goal, world) else {
            return GoalState::Rejected;
        };
        if map != world.map_uuid().as_str() {
            debug!(goal_id = %self.goal.uuid(), goal_map = %map, "patrol on another map");
            return GoalState::Rejected;
        }

        let radius_squared = PATROL_RADIUS * PATROL_RADIUS;
        let nearby: Vec<Transform> = world
            .world
            .waypoints()
            .iter()
            .filter(|pose| pose.planar_distance_squared(&target) < radius_squared)
            .copied()
            .collect();
        let Some(location) = choose(&self.rng, &nearby) else {
            debug!(goal_id = %self.goal.uuid(), "no waypoints near patrol target");
            return GoalState::Rejected;
        };
        spawn_drive_point(delegate, &self.goal, world.map_uuid(), location);
        GoalState::Running
    }
}

#[cfg(test)]
mod tests {
    use goalex_protocol::{
        MapId, ObjectId, POINT_OF_INTEREST, RobotPath, Value, World, WorldObject,
        WorldObjectType,
    };
    use serde_json::json;

    use super::*;
    use crate::catalog::seeded_rng;
    use crate::sim::{SimRobot, with_objects, world_state};

    fn parent(name: &str, priority: i64) -> Goal {
        GoalDraft::new(&GoalType::new(name, "1.0.0"), RobotPath::new("u", "r"))
            .priority(priority)
            .into_local("PARENT")
    }

    fn surveyed_world() -> World {
        let mut world = World::new("map-1", "home");
        world.smoothed_transforms = vec![Transform::at(0.0, 0.0), Transform::at(10.0, 0.0)];
        world
    }

    #[test]
    fn random_driver_spawns_drive_point_above_its_priority() {
        let robot = SimRobot::new();
        let mut delegate = robot.delegate();
        let mut processor = RandomDriverFactory::new(seeded_rng()).create(&parent("randomDriver", 0));
        let world = world_state(surveyed_world(), Transform::default(), 0);

        assert_eq!(
            processor.step(&mut delegate, &world, StepRequest::default()),
            GoalState::Running
        );
        let spawned = &delegate.added[0];
        assert_eq!(spawned.goal_type(), "drivePoint");
        assert_eq!(spawned.priority(), 10);
        assert_eq!(spawned.sequence(), 1);
        assert!(!spawned.is_local());
        assert_eq!(spawned.parameter("map").and_then(Value::as_str), Some("map-1"));
        let location = spawned.parameter("location").and_then(Value::as_transform).unwrap();
        assert!(surveyed_world().smoothed_transforms.contains(location));
    }

    #[test]
    fn random_driver_prefers_points_of_interest() {
        let robot = SimRobot::new();
        let mut delegate = robot.delegate();
        let mut processor = RandomDriverFactory::new(seeded_rng()).create(&parent("randomDriver", 0));
        let poi = WorldObject::from_wire(
            ObjectId::from_string("desk"),
            MapId::from_string("map-1"),
            &WorldObjectType::point_of_interest(),
            &json!({"type": POINT_OF_INTEREST, "variables": {"location": {"px": 7.0}, "name": "Desk"}}),
        )
        .unwrap();
        let world = with_objects(world_state(surveyed_world(), Transform::default(), 0), [poi]);

        processor.step(&mut delegate, &world, StepRequest::default());
        let location = delegate.added[0]
            .parameter("location")
            .and_then(Value::as_transform)
            .copied();
        assert_eq!(location.map(|tf| tf.px), Some(7.0));
    }

    #[test]
    fn random_driver_rejects_an_empty_world() {
        let mut delegate = SimRobot::new().delegate();
        let mut processor = RandomDriverFactory::new(seeded_rng()).create(&parent("randomDriver", 0));
        let world = world_state(World::new("map-1", "home"), Transform::default(), 0);
        assert_eq!(
            processor.step(&mut delegate, &world, StepRequest::default()),
            GoalState::Rejected
        );
        assert!(delegate.added.is_empty());
    }

    #[test]
    fn patrol_only_picks_waypoints_near_target() {
        let mut delegate = SimRobot::new().delegate();
        let goal_type = GoalType::new("patrolDriver", "1.0.0")
            .parameter("location", VariableType::Transform)
            .parameter("map", VariableType::MapRef);
        let goal = GoalDraft::new(&goal_type, RobotPath::new("u", "r"))
            .parameter("location", Transform::at(9.0, 1.0))
            .parameter("map", "map-1")
            .priority(100)
            .into_remote();
        let mut processor = PatrolDriverFactory::new(PoseSource::Transform, seeded_rng()).create(&goal);
        let world = world_state(surveyed_world(), Transform::default(), 0);

        for _ in 0..5 {
            assert_eq!(
                processor.step(&mut delegate, &world, StepRequest::default()),
                GoalState::Running
            );
        }
        assert!(delegate.added.iter().all(|spawned| {
            spawned.priority() == 110
                && spawned.parameter("location").and_then(Value::as_transform)
                    == Some(&Transform::at(10.0, 0.0))
        }));
    }

    #[test]
    fn patrol_rejects_target_on_other_map() {
        let mut delegate = SimRobot::new().delegate();
        let goal_type = GoalType::new("patrolDriver", "1.0.0")
            .parameter("location", VariableType::Transform)
            .parameter("map", VariableType::MapRef);
        let goal = GoalDraft::new(&goal_type, RobotPath::new("u", "r"))
            .parameter("location", Transform::at(9.0, 1.0))
            .parameter("map", "map-2")
            .into_remote();
        let mut processor = PatrolDriverFactory::new(PoseSource::Transform, seeded_rng()).create(&goal);
        let world = world_state(surveyed_world(), Transform::default(), 0);
        assert_eq!(
            processor.step(&mut delegate, &world, StepRequest::default()),
            GoalState::Rejected
        );
    }
}
