//! The reference goal types and their processors.

use std::sync::Arc;

use goalex_protocol::{GoalType, POINT_OF_INTEREST, VariableType};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::ProcessorRegistry;
use crate::animation::AnimationFactory;
use crate::battery::BatteryMonitorFactory;
use crate::drive::{DriveFactory, FinishAction, PoseSource};
use crate::random_driver::{PatrolDriverFactory, RandomDriverFactory};
use crate::sound::SoundFactory;
use crate::wait::WaitFactory;

pub const GOAL_TYPE_VERSION: &str = "1.0.0";

pub const DRIVE_POINT: &str = "drivePoint";
pub const RANDOM_DRIVER: &str = "randomDriver";
pub const BATTERY_MONITOR_LOW: &str = "batteryMonitorLow";
pub const BATTERY_MONITOR_CRITICAL: &str = "batteryMonitorCritical";

/// Fixed uuids of the background goals seeded at startup.
pub const RANDOM_DRIVER_GOAL: &str = "RANDOM_DRIVER";
pub const BATTERY_LOW_GOAL: &str = "BATTERY_LOW";
pub const BATTERY_CRITICAL_GOAL: &str = "BATTERY_CRITICAL";

/// Seed shared by every random choice a processor makes.
pub const RANDOM_SEED: u64 = 1337;

pub(crate) fn seeded_rng() -> Arc<Mutex<StdRng>> {
    Arc::new(Mutex::new(StdRng::seed_from_u64(RANDOM_SEED)))
}

fn goal_type(name: &str) -> GoalType {
    GoalType::new(name, GOAL_TYPE_VERSION)
}

fn located(name: &str) -> GoalType {
    goal_type(name)
        .parameter("location", VariableType::Transform)
        .parameter("map", VariableType::MapRef)
}

fn targeted(name: &str) -> GoalType {
    goal_type(name).parameter("target", VariableType::object(POINT_OF_INTEREST))
}

pub(crate) fn register_reference_processors(registry: &mut ProcessorRegistry) {
    let drives = [
        ("drive", FinishAction::None, PoseSource::Transform, true),
        (DRIVE_POINT, FinishAction::None, PoseSource::Transform, false),
        ("drivePOI", FinishAction::None, PoseSource::PointOfInterest, false),
        ("driveWait", FinishAction::Wait, PoseSource::Transform, true),
        ("driveWaitPoint", FinishAction::Wait, PoseSource::Transform, false),
        ("driveWaitPOI", FinishAction::Wait, PoseSource::PointOfInterest, false),
        ("vacuumSpiral", FinishAction::VacuumSpiral, PoseSource::Transform, false),
    ];
    for (name, finish, source, rotation) in drives {
        let mut declared = match source {
            PoseSource::Transform => located(name),
            PoseSource::PointOfInterest => targeted(name),
        };
        if finish != FinishAction::None {
            declared = declared.parameter("time", VariableType::Int64);
        }
        registry.register(
            declared,
            Arc::new(DriveFactory::new(finish, source, rotation)),
        );
    }

    registry.register(
        goal_type("wait").parameter("time", VariableType::Int64),
        Arc::new(WaitFactory),
    );
    registry.register(
        goal_type("animation").parameter("animation", VariableType::AnimationRef),
        Arc::new(AnimationFactory),
    );
    registry.register(
        goal_type("alarm").parameter("time", VariableType::Int64),
        Arc::new(SoundFactory::alarm()),
    );
    registry.register(
        goal_type("you_are_welcome"),
        Arc::new(SoundFactory::you_are_welcome()),
    );

    let rng = seeded_rng();
    registry.register(
        goal_type(RANDOM_DRIVER).hidden(),
        Arc::new(RandomDriverFactory::new(rng)),
    );
    let rng = seeded_rng();
    registry.register(
        located("patrolDriver"),
        Arc::new(PatrolDriverFactory::new(PoseSource::Transform, rng.clone())),
    );
    registry.register(
        targeted("patrolDriverPOI"),
        Arc::new(PatrolDriverFactory::new(PoseSource::PointOfInterest, rng)),
    );

    registry.register(
        goal_type(BATTERY_MONITOR_LOW).queried().hidden(),
        Arc::new(BatteryMonitorFactory::low()),
    );
    registry.register(
        goal_type(BATTERY_MONITOR_CRITICAL).queried().hidden(),
        Arc::new(BatteryMonitorFactory::critical()),
    );

    registry.bootstrap_goal(RANDOM_DRIVER_GOAL, RANDOM_DRIVER, 0);
    registry.bootstrap_goal(BATTERY_LOW_GOAL, BATTERY_MONITOR_LOW, 20);
    registry.bootstrap_goal(BATTERY_CRITICAL_GOAL, BATTERY_MONITOR_CRITICAL, 250);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::ProcessorRegistry;

    #[test]
    fn manifest_matches_published_schema() {
        let registry = ProcessorRegistry::with_reference_processors();
        let types = goalex_protocol::GoalTypeSet::new(registry.goal_types().cloned()).unwrap();
        let manifest = types.to_manifest();

        assert_eq!(
            manifest["driveWaitPOI"]["parameters"],
            json!({"target": "OBJECT:point_of_interest", "time": "LONG"})
        );
        assert_eq!(
            manifest["vacuumSpiral"]["parameters"],
            json!({"location": "TRANSFORM", "map": "MAP", "time": "LONG"})
        );
        assert_eq!(manifest["animation"]["parameters"], json!({"animation": "ANIMATION"}));
        assert_eq!(manifest["randomDriver"]["userVisible"], json!(false));
        assert_eq!(manifest["you_are_welcome"]["parameters"], json!({}));
        assert_eq!(manifest["batteryMonitorCritical"]["version"], json!("1.0.0"));
    }

    #[test]
    fn query_flags_only_on_battery_monitors() {
        let registry = ProcessorRegistry::with_reference_processors();
        let queried: Vec<_> = registry
            .goal_types()
            .filter(|ty| ty.is_query())
            .map(|ty| ty.name().to_owned())
            .collect();
        assert_eq!(queried, ["batteryMonitorLow", "batteryMonitorCritical"]);
    }
}
