//! The executive core: live goal bookkeeping and the tick state machine.
//!
//! Every entry point takes the one core lock. Store writes never happen under
//! it; they are queued on the [`Outbox`] and applied by the writer task.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use goalex_protocol::{
    ActionMediator, AnimationManager, Collaborators, ExecutiveDelegate, ExecutiveError,
    ExecutiveMode, ExecutiveModeDocument, ExecutiveResult, ExecutiveStrategy, Goal, GoalEvent,
    GoalId, GoalState, GoalType, MapId, ObjectId, RobotPath, SoundManager, StepRequest,
    Transform, World, WorldObject, WorldObjectType, WorldState, default_object_types,
    parse_object_snapshot, validate_and_parse,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ExecutiveConfig;
use crate::outbox::{Outbox, StoreCommand};

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTransform,
    /// Mapping mode. The pending action is cleared.
    NoWorld,
    Disabled,
    ObjectsNotLoaded,
    ModeNotSynced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Skipped(SkipReason),
    /// Nothing admissible to run.
    Idle,
    /// The best goal is a background goal and the executive is stopped.
    Holding,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub status: TickStatus,
    pub current_goal: Option<GoalId>,
    /// Processor steps taken during the tick.
    pub steps: usize,
}

/// Point-in-time view of the executive's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutiveSnapshot {
    /// Live goals in admission order.
    pub goals: Vec<GoalId>,
    pub current: Option<GoalId>,
    pub cancelled: BTreeSet<GoalId>,
    pub completed: BTreeSet<GoalId>,
    pub rejected: BTreeSet<GoalId>,
    pub objects_loaded: bool,
    pub mode: Option<ExecutiveMode>,
    pub next_sequence: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Rejected,
}

impl Outcome {
    fn flag(self) -> &'static str {
        match self {
            Self::Completed => "complete",
            Self::Rejected => "reject",
        }
    }
}

#[derive(Debug, Default)]
struct LiveState {
    goals: HashMap<GoalId, Goal>,
    cancelled: HashMap<GoalId, i64>,
    completed: HashMap<GoalId, i64>,
    rejected: HashMap<GoalId, i64>,
    /// Goals admitted from the remote collection.
    observed: BTreeSet<GoalId>,
    current: Option<Goal>,
    sequence: i64,
}

impl LiveState {
    /// Drop finished goals from the live set and expire old bookkeeping.
    /// Cancellations are remembered for the life of the process.
    fn prune(&mut self, now_ms: i64, retention_ms: i64) {
        let goals = &mut self.goals;
        let observed = &mut self.observed;
        for finished in [&mut self.rejected, &mut self.completed] {
            finished.retain(|uuid, recorded_ms| {
                goals.remove(uuid);
                observed.remove(uuid);
                now_ms - *recorded_ms <= retention_ms
            });
        }
    }

    fn has_outcome(&self, uuid: &GoalId) -> bool {
        self.completed.contains_key(uuid) || self.rejected.contains_key(uuid)
    }

    fn ranked(&self) -> Vec<&Goal> {
        let mut ranked: Vec<&Goal> = self.goals.values().collect();
        ranked.sort_by(|a, b| a.cmp_priority(b).then_with(|| a.uuid().cmp(b.uuid())));
        ranked
    }

    /// First goal in admission order that is not a query type, or whose
    /// query admits it against `world`.
    fn select_best(&self, strategy: &dyn ExecutiveStrategy, world: &WorldState) -> Option<Goal> {
        self.ranked()
            .into_iter()
            .find(|goal| {
                let queried = strategy
                    .goal_types()
                    .get(goal.goal_type())
                    .is_some_and(GoalType::is_query);
                !queried || strategy.query(goal, world)
            })
            .cloned()
    }

    fn apply_outcome_flags(&mut self, key: &str, document: &JsonValue, now_ms: i64) {
        let present = |field: &str| document.get(field).is_some_and(|value| !value.is_null());
        let uuid = GoalId::from_string(key);
        if present("cancel") && document.get("cancel") != Some(&JsonValue::Bool(false)) {
            info!(goal_id = %uuid, "goal cancelled");
            self.cancelled.insert(uuid.clone(), now_ms);
        }
        if present("complete") {
            debug!(goal_id = %uuid, "goal marked complete remotely");
            self.completed.insert(uuid.clone(), now_ms);
        }
        if present("reject") {
            debug!(goal_id = %uuid, "goal marked rejected remotely");
            self.rejected.insert(uuid, now_ms);
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeInputs {
    transform: Option<Transform>,
    world: Option<Arc<World>>,
    battery_low: bool,
    battery_critical: bool,
    robot_name: String,
    enabled: bool,
    objects: Option<Arc<BTreeMap<ObjectId, WorldObject>>>,
    /// `None` until the first mode document (or its absence) is observed.
    mode: Option<ExecutiveModeDocument>,
}

impl RuntimeInputs {
    fn world_state(&self, now_ms: i64) -> Result<WorldState, SkipReason> {
        let location = self.transform.ok_or(SkipReason::NoTransform)?;
        let world = self.world.clone().ok_or(SkipReason::NoWorld)?;
        if !self.enabled {
            return Err(SkipReason::Disabled);
        }
        let objects = self.objects.clone().ok_or(SkipReason::ObjectsNotLoaded)?;
        let mode = self.mode.ok_or(SkipReason::ModeNotSynced)?;
        Ok(WorldState {
            world,
            location,
            battery_low: self.battery_low,
            battery_critical: self.battery_critical,
            robot_name: self.robot_name.clone(),
            mode: mode.mode,
            objects,
            timestamp_ms: now_ms,
        })
    }
}

struct ExecutiveCore {
    live: LiveState,
    inputs: RuntimeInputs,
    strategy: Box<dyn ExecutiveStrategy>,
}

/// Delegate handed to strategies while the core lock is held.
struct TickDelegate<'a> {
    live: &'a mut LiveState,
    collaborators: &'a Collaborators,
    outbox: &'a Outbox,
    now_ms: i64,
}

impl<'a> TickDelegate<'a> {
    fn new(
        live: &'a mut LiveState,
        collaborators: &'a Collaborators,
        outbox: &'a Outbox,
        now_ms: i64,
    ) -> Self {
        Self {
            live,
            collaborators,
            outbox,
            now_ms,
        }
    }
}

impl ExecutiveDelegate for TickDelegate<'_> {
    fn add_goal(&mut self, goal: Goal) {
        debug!(
            goal_id = %goal.uuid(),
            goal_type = goal.goal_type(),
            priority = goal.priority(),
            local = goal.is_local(),
            "goal added by executive"
        );
        if !goal.is_local() {
            self.outbox.send(StoreCommand::PutGoal {
                key: goal.uuid().to_string(),
                document: goal.to_wire(self.now_ms),
            });
        }
        self.live.goals.insert(goal.uuid().clone(), goal);
    }

    fn next_sequence(&mut self) -> i64 {
        let sequence = self.live.sequence;
        self.live.sequence += 1;
        sequence
    }

    fn actions(&self) -> &dyn ActionMediator {
        self.collaborators.actions.as_ref()
    }

    fn sounds(&self) -> &dyn SoundManager {
        self.collaborators.sounds.as_ref()
    }

    fn animations(&self) -> &dyn AnimationManager {
        self.collaborators.animations.as_ref()
    }
}

/// A goal executive for one robot.
pub struct Executive {
    robot: RobotPath,
    config: ExecutiveConfig,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    object_types: BTreeMap<String, WorldObjectType>,
    outbox: Outbox,
    world_tx: watch::Sender<Option<MapId>>,
    core: Mutex<ExecutiveCore>,
}

impl Executive {
    pub fn new(
        robot: RobotPath,
        config: ExecutiveConfig,
        strategy: Box<dyn ExecutiveStrategy>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        outbox: Outbox,
    ) -> Self {
        let (world_tx, _) = watch::channel(None);
        Self {
            robot,
            config,
            clock,
            collaborators,
            object_types: default_object_types(),
            outbox,
            world_tx,
            core: Mutex::new(ExecutiveCore {
                live: LiveState::default(),
                inputs: RuntimeInputs::default(),
                strategy,
            }),
        }
    }

    pub fn robot(&self) -> &RobotPath {
        &self.robot
    }

    pub fn config(&self) -> &ExecutiveConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Follows the active map. The object listener resubscribes on change.
    pub fn watch_world(&self) -> watch::Receiver<Option<MapId>> {
        self.world_tx.subscribe()
    }

    pub fn goal_type_manifest(&self) -> JsonValue {
        self.core.lock().strategy.goal_types().to_manifest()
    }

    /// Let the strategy seed its background goals.
    pub fn bootstrap(&self) {
        let now_ms = self.clock.now_ms();
        let mut core = self.core.lock();
        let ExecutiveCore { live, strategy, .. } = &mut *core;
        strategy.bootstrap(&mut TickDelegate::new(
            live,
            &self.collaborators,
            &self.outbox,
            now_ms,
        ));
        info!(robot = %self.robot, goals = live.goals.len(), "executive bootstrapped");
    }

    pub fn shutdown_strategy(&self) {
        let now_ms = self.clock.now_ms();
        let mut core = self.core.lock();
        let ExecutiveCore { live, strategy, .. } = &mut *core;
        strategy.on_shutdown(&mut TickDelegate::new(
            live,
            &self.collaborators,
            &self.outbox,
            now_ms,
        ));
        live.current = None;
    }

    pub fn set_transform(&self, transform: Transform) {
        self.core.lock().inputs.transform = Some(transform);
    }

    /// Set the active map, or `None` while mapping. Objects of the previous
    /// map are unloaded when the map changes.
    pub fn set_world(&self, world: Option<World>) {
        let map = world.as_ref().map(|world| world.uuid.clone());
        {
            let mut core = self.core.lock();
            let previous = core.inputs.world.as_ref().map(|world| &world.uuid);
            if previous != map.as_ref() {
                core.inputs.objects = None;
                info!(map = ?map, "active world changed");
            }
            core.inputs.world = world.map(Arc::new);
        }
        self.world_tx.send_if_modified(|current| {
            if *current == map {
                return false;
            }
            *current = map;
            true
        });
    }

    pub fn set_battery(&self, low: bool, critical: bool) {
        let mut core = self.core.lock();
        core.inputs.battery_low = low;
        core.inputs.battery_critical = critical;
    }

    pub fn set_robot_name(&self, name: impl Into<String>) {
        self.core.lock().inputs.robot_name = name.into();
    }

    pub fn enable(&self) {
        self.core.lock().inputs.enabled = true;
    }

    /// Ticks skip until the next snapshot arrives.
    pub fn mark_objects_unloaded(&self) {
        self.core.lock().inputs.objects = None;
    }

    /// Replace the live object set with a snapshot of `map`'s collection.
    /// Snapshots for any map other than the active one are ignored. Returns
    /// the number of objects admitted.
    pub fn replace_objects(&self, map: &MapId, snapshot: &JsonValue) -> Option<usize> {
        let mut core = self.core.lock();
        if core.inputs.world.as_ref().map(|world| &world.uuid) != Some(map) {
            debug!(map = %map, "object snapshot for inactive map ignored");
            return None;
        }
        let (objects, dropped) = parse_object_snapshot(map, snapshot, &self.object_types);
        for (key, error) in &dropped {
            debug!(object_key = %key, %error, "world object dropped");
        }
        let points: Vec<(String, Transform)> = objects
            .values()
            .filter(|object| object.is_point_of_interest())
            .filter_map(|object| Some((object.display_name()?.to_owned(), *object.location()?)))
            .collect();
        let admitted = objects.len();
        core.inputs.objects = Some(Arc::new(objects));
        info!(
            map = %map,
            objects = admitted,
            dropped = dropped.len(),
            points_of_interest = points.len(),
            "world objects replaced"
        );
        self.collaborators
            .navigation
            .publish_points_of_interest(&points);
        Some(admitted)
    }

    /// Apply the remote mode document. `None` means the document is absent.
    pub fn apply_mode_document(&self, document: Option<&JsonValue>) {
        let document = document.filter(|document| !document.is_null());
        let decoded = ExecutiveModeDocument::from_wire(document);
        let previous = self.core.lock().inputs.mode.replace(decoded);
        if previous.map(|previous| previous.mode) != Some(decoded.mode) {
            info!(mode = decoded.mode.as_str(), "executive mode synchronized");
        }
        if document.is_none() && self.config.default_mode_on_missing {
            info!("executive mode document missing, writing default");
            self.outbox.send(StoreCommand::SetExecutiveMode {
                document: ExecutiveModeDocument::new(ExecutiveMode::default(), self.now_ms())
                    .to_wire(),
            });
        }
    }

    /// Fold one remote goal collection event into the live state.
    pub fn apply_goal_event(&self, event: &GoalEvent) {
        let now_ms = self.clock.now_ms();
        let mut core = self.core.lock();
        let ExecutiveCore { live, strategy, .. } = &mut *core;
        match event {
            GoalEvent::Added { key, document } => {
                let parsed = validate_and_parse(
                    Some(key.as_str()),
                    document,
                    strategy.goal_types(),
                    &self.robot,
                );
                match parsed {
                    Ok(goal) => {
                        debug!(
                            goal_id = %goal.uuid(),
                            goal_type = goal.goal_type(),
                            priority = goal.priority(),
                            "goal admitted"
                        );
                        live.observed.insert(goal.uuid().clone());
                        live.goals.entry(goal.uuid().clone()).or_insert(goal);
                        live.apply_outcome_flags(key, document, now_ms);
                    }
                    Err(rejection) if rejection.is_silent() => {
                        debug!(goal_key = %key, %rejection, "goal ignored");
                    }
                    Err(rejection) => {
                        warn!(goal_key = %key, error = %rejection, "goal format error");
                        if !key.is_empty() {
                            self.record_outcome(
                                live,
                                &GoalId::from_string(key.as_str()),
                                Outcome::Rejected,
                                true,
                                now_ms,
                            );
                        }
                    }
                }
            }
            GoalEvent::Changed { key, document } => {
                live.apply_outcome_flags(key, document, now_ms);
            }
            GoalEvent::Removed { key, .. } => {
                info!(goal_id = %key, "goal removed remotely, cancelling");
                let uuid = GoalId::from_string(key.as_str());
                live.observed.remove(&uuid);
                live.cancelled.insert(uuid, now_ms);
            }
        }
    }

    /// Cancel every goal admitted from the store whose document is missing
    /// from `present`, the keys the store holds right now. A resubscription
    /// replays only surviving goals, so removals lost while the listener was
    /// behind are recovered here. Returns the number of goals cancelled.
    pub fn reconcile_goals(&self, present: &BTreeSet<String>) -> usize {
        let now_ms = self.clock.now_ms();
        let mut core = self.core.lock();
        let live = &mut core.live;
        let vanished: Vec<GoalId> = live
            .observed
            .iter()
            .filter(|uuid| !present.contains(uuid.as_str()))
            .cloned()
            .collect();
        for uuid in &vanished {
            info!(goal_id = %uuid, "goal missing from the store, cancelling");
            live.observed.remove(uuid);
            live.cancelled.entry(uuid.clone()).or_insert(now_ms);
        }
        vanished.len()
    }

    fn record_outcome(
        &self,
        live: &mut LiveState,
        uuid: &GoalId,
        outcome: Outcome,
        write_back: bool,
        now_ms: i64,
    ) {
        let finished = match outcome {
            Outcome::Completed => &mut live.completed,
            Outcome::Rejected => &mut live.rejected,
        };
        finished.insert(uuid.clone(), now_ms);
        if write_back {
            self.outbox
                .send(StoreCommand::outcome(uuid.as_str(), outcome.flag(), now_ms));
        }
    }

    /// One scheduling pass. Keeps stepping goals until one is running or
    /// nothing can start.
    ///
    /// Returns [`ExecutiveError::ContractViolation`] when a processor
    /// yields without being asked to.
    pub fn tick(&self) -> ExecutiveResult<TickReport> {
        let now_ms = self.clock.now_ms();
        let mut core = self.core.lock();
        let ExecutiveCore {
            live,
            inputs,
            strategy,
        } = &mut *core;

        let world = match inputs.world_state(now_ms) {
            Ok(world) => world,
            Err(reason) => {
                if reason == SkipReason::NoWorld {
                    self.collaborators.actions.set_action(None);
                }
                return Ok(TickReport {
                    status: TickStatus::Skipped(reason),
                    current_goal: live.current.as_ref().map(|goal| goal.uuid().clone()),
                    steps: 0,
                });
            }
        };

        let threshold = self.config.user_priority_threshold;
        let stopped = world.mode == ExecutiveMode::Stop;
        let mut steps = 0;
        let status = loop {
            live.prune(now_ms, self.config.outcome_retention_ms);
            let best = live.select_best(strategy.as_ref(), &world);

            if let Some(best) = &best
                && live.cancelled.contains_key(best.uuid())
            {
                info!(goal_id = %best.uuid(), goal_type = best.goal_type(), "cancelled goal rejected");
                self.record_outcome(live, best.uuid(), Outcome::Rejected, !best.is_local(), now_ms);
                continue;
            }

            let (current, is_new) = match live.current.clone() {
                Some(current) => (current, false),
                None => {
                    let Some(best) = best.clone() else {
                        self.collaborators.actions.set_action(None);
                        break TickStatus::Idle;
                    };
                    if stopped && best.priority() < threshold {
                        self.collaborators.actions.set_action(None);
                        debug!(goal_id = %best.uuid(), priority = best.priority(), "background goal held while stopped");
                        break TickStatus::Holding;
                    }
                    info!(
                        goal_id = %best.uuid(),
                        goal_type = best.goal_type(),
                        priority = best.priority(),
                        "goal started"
                    );
                    live.current = Some(best.clone());
                    (best, true)
                }
            };

            let outranked = best.as_ref().is_some_and(|best| {
                best != &current && best.priority() > current.priority()
            });
            let request = StepRequest {
                is_new,
                cancel: live.cancelled.contains_key(current.uuid()),
                preempt: (!is_new && outranked) || (stopped && current.priority() < threshold),
            };

            steps += 1;
            let state = strategy.process_goal(
                &mut TickDelegate::new(live, &self.collaborators, &self.outbox, now_ms),
                &world,
                &current,
                request,
            );
            match state {
                GoalState::Running => break TickStatus::Running,
                GoalState::Preempted if !request.preempt => {
                    error!(
                        goal_id = %current.uuid(),
                        goal_type = current.goal_type(),
                        "processor yielded without a preemption request"
                    );
                    return Err(ExecutiveError::ContractViolation {
                        goal_id: current.uuid().to_string(),
                        goal_type: current.goal_type().to_owned(),
                    });
                }
                GoalState::Preempted => {
                    info!(goal_id = %current.uuid(), goal_type = current.goal_type(), "goal preempted");
                    live.current = None;
                }
                GoalState::Completed | GoalState::Rejected => {
                    let outcome = if state == GoalState::Completed {
                        Outcome::Completed
                    } else {
                        Outcome::Rejected
                    };
                    info!(
                        goal_id = %current.uuid(),
                        goal_type = current.goal_type(),
                        outcome = outcome.flag(),
                        "goal finished"
                    );
                    // A cancelled goal is rejected as soon as it is picked, so
                    // its processor may finish after the outcome is recorded.
                    if !live.has_outcome(current.uuid()) {
                        self.record_outcome(live, current.uuid(), outcome, !current.is_local(), now_ms);
                    }
                    live.current = None;
                }
            }
        };

        strategy.on_update(
            &mut TickDelegate::new(live, &self.collaborators, &self.outbox, now_ms),
            &world,
        );
        Ok(TickReport {
            status,
            current_goal: live.current.as_ref().map(|goal| goal.uuid().clone()),
            steps,
        })
    }

    pub fn snapshot(&self) -> ExecutiveSnapshot {
        let core = self.core.lock();
        let live = &core.live;
        ExecutiveSnapshot {
            goals: live.ranked().into_iter().map(|goal| goal.uuid().clone()).collect(),
            current: live.current.as_ref().map(|goal| goal.uuid().clone()),
            cancelled: live.cancelled.keys().cloned().collect(),
            completed: live.completed.keys().cloned().collect(),
            rejected: live.rejected.keys().cloned().collect(),
            objects_loaded: core.inputs.objects.is_some(),
            mode: core.inputs.mode.map(|document| document.mode),
            next_sequence: live.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use goalex_processors::sim::SimRobot;
    use goalex_processors::ProcessorRegistry;
    use goalex_protocol::{Action, GoalTypeSet, VariableType};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DEFAULT_OUTCOME_RETENTION_MS;

    const START_MS: i64 = 1_700_000_000_000;
    const MAP: &str = "map-1";

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        /// Honours cancel and preempt, otherwise keeps running.
        Cooperative,
        Stubborn,
        Finish(GoalState),
        /// Yields whether asked to or not.
        Rogue,
    }

    #[derive(Default)]
    struct Script {
        behaviors: HashMap<String, Behavior>,
        admitted: HashSet<String>,
        steps: Vec<(String, StepRequest)>,
        updates: usize,
        shutdowns: usize,
    }

    struct ScriptedStrategy {
        goal_types: GoalTypeSet,
        script: Arc<Mutex<Script>>,
    }

    impl ExecutiveStrategy for ScriptedStrategy {
        fn goal_types(&self) -> &GoalTypeSet {
            &self.goal_types
        }

        fn query(&self, goal: &Goal, _world: &WorldState) -> bool {
            self.script.lock().admitted.contains(goal.uuid().as_str())
        }

        fn process_goal(
            &mut self,
            _delegate: &mut dyn ExecutiveDelegate,
            _world: &WorldState,
            goal: &Goal,
            request: StepRequest,
        ) -> GoalState {
            let mut script = self.script.lock();
            script.steps.push((goal.uuid().to_string(), request));
            let behavior = script
                .behaviors
                .get(goal.uuid().as_str())
                .copied()
                .unwrap_or(Behavior::Cooperative);
            match behavior {
                Behavior::Cooperative if request.cancel => GoalState::Rejected,
                Behavior::Cooperative if request.preempt => GoalState::Preempted,
                Behavior::Cooperative | Behavior::Stubborn => GoalState::Running,
                Behavior::Finish(state) => state,
                Behavior::Rogue => GoalState::Preempted,
            }
        }

        fn on_update(&mut self, _delegate: &mut dyn ExecutiveDelegate, _world: &WorldState) {
            self.script.lock().updates += 1;
        }

        fn on_shutdown(&mut self, delegate: &mut dyn ExecutiveDelegate) {
            self.script.lock().shutdowns += 1;
            delegate.actions().set_action(None);
        }
    }

    struct Harness {
        executive: Executive,
        clock: Arc<ManualClock>,
        writes: mpsc::UnboundedReceiver<StoreCommand>,
        robot: SimRobot,
        script: Arc<Mutex<Script>>,
    }

    impl Harness {
        fn new(config: ExecutiveConfig) -> Self {
            let script = Arc::new(Mutex::new(Script::default()));
            let goal_types = GoalTypeSet::new([
                GoalType::new("task", "1.0.0").parameter("label", VariableType::Text),
                GoalType::new("gated", "1.0.0").queried(),
            ])
            .unwrap();
            let strategy = ScriptedStrategy {
                goal_types,
                script: script.clone(),
            };
            Self::with_strategy(config, Box::new(strategy), script)
        }

        fn with_strategy(
            config: ExecutiveConfig,
            strategy: Box<dyn ExecutiveStrategy>,
            script: Arc<Mutex<Script>>,
        ) -> Self {
            let robot = SimRobot::new();
            let clock = Arc::new(ManualClock::new(START_MS));
            let (outbox, writes) = Outbox::channel();
            let executive = Executive::new(
                RobotPath::new("user-1", "robot-1"),
                config,
                strategy,
                robot.collaborators(),
                clock.clone(),
                outbox,
            );
            Self {
                executive,
                clock,
                writes,
                robot,
                script,
            }
        }

        fn ready(mode: ExecutiveMode) -> Self {
            let harness = Self::new(ExecutiveConfig::default());
            harness.make_ready(World::new(MAP, "home"), mode);
            harness
        }

        fn make_ready(&self, world: World, mode: ExecutiveMode) {
            self.executive.set_transform(Transform::at(0.0, 0.0));
            self.executive.set_world(Some(world));
            self.executive.enable();
            self.executive
                .replace_objects(&MapId::from(MAP), &json!({}))
                .unwrap();
            self.set_mode(mode);
        }

        fn set_mode(&self, mode: ExecutiveMode) {
            let document = ExecutiveModeDocument::new(mode, 1).to_wire();
            self.executive.apply_mode_document(Some(&document));
        }

        fn add(&self, key: &str, document: JsonValue) {
            self.executive.apply_goal_event(&GoalEvent::Added {
                key: key.to_owned(),
                document,
            });
        }

        fn change(&self, key: &str, document: JsonValue) {
            self.executive.apply_goal_event(&GoalEvent::Changed {
                key: key.to_owned(),
                document,
            });
        }

        fn behave(&self, key: &str, behavior: Behavior) {
            self.script
                .lock()
                .behaviors
                .insert(key.to_owned(), behavior);
        }

        fn stepped(&self) -> Vec<String> {
            self.script
                .lock()
                .steps
                .iter()
                .map(|(key, _)| key.clone())
                .collect()
        }

        fn last_request(&self) -> StepRequest {
            self.script.lock().steps.last().map(|(_, request)| *request).unwrap()
        }

        fn drain_writes(&mut self) -> Vec<StoreCommand> {
            let mut writes = Vec::new();
            while let Ok(command) = self.writes.try_recv() {
                writes.push(command);
            }
            writes
        }
    }

    fn task(priority: i64, timestamp: i64) -> JsonValue {
        json!({
            "type": "task",
            "version": "1.0.0",
            "timestamp": timestamp,
            "priority": priority,
            "parameters": {"label": "tidy"},
        })
    }

    fn gated(priority: i64) -> JsonValue {
        json!({"type": "gated", "version": "1.0.0", "timestamp": 1, "priority": priority})
    }

    fn id(key: &str) -> GoalId {
        GoalId::from_string(key)
    }

    #[test]
    fn tick_skips_until_every_input_is_ready() {
        let harness = Harness::new(ExecutiveConfig::default());
        let executive = &harness.executive;
        let status = |harness: &Harness| harness.executive.tick().unwrap().status;

        assert_eq!(status(&harness), TickStatus::Skipped(SkipReason::NoTransform));
        executive.set_transform(Transform::at(1.0, 2.0));
        assert_eq!(status(&harness), TickStatus::Skipped(SkipReason::NoWorld));
        assert_eq!(harness.robot.actions.history(), vec![None]);

        executive.set_world(Some(World::new(MAP, "home")));
        assert_eq!(status(&harness), TickStatus::Skipped(SkipReason::Disabled));
        executive.enable();
        assert_eq!(status(&harness), TickStatus::Skipped(SkipReason::ObjectsNotLoaded));
        executive.replace_objects(&MapId::from(MAP), &json!({}));
        assert_eq!(status(&harness), TickStatus::Skipped(SkipReason::ModeNotSynced));
        executive.apply_mode_document(None);
        assert_eq!(status(&harness), TickStatus::Idle);

        // Skipped ticks never reach the post-update hook.
        assert_eq!(harness.script.lock().updates, 1);
        assert_eq!(executive.snapshot().mode, Some(ExecutiveMode::Stop));
    }

    #[test]
    fn goals_run_in_priority_then_timestamp_order() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("A", task(200, 100));
        harness.add("B", task(200, 50));
        harness.add("C", task(300, 999));
        for key in ["A", "B", "C"] {
            harness.behave(key, Behavior::Finish(GoalState::Completed));
        }

        let report = harness.executive.tick().unwrap();
        assert_eq!(report.status, TickStatus::Idle);
        assert_eq!(report.steps, 3);
        assert_eq!(harness.stepped(), vec!["C", "B", "A"]);
        let snapshot = harness.executive.snapshot();
        assert_eq!(snapshot.completed, [id("A"), id("B"), id("C")].into_iter().collect());
        assert!(snapshot.goals.is_empty());
    }

    #[test]
    fn equal_priority_and_timestamp_fall_back_to_sequence() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        let mut late = task(10, 5);
        late["sequence"] = json!(2);
        let mut early = task(10, 5);
        early["sequence"] = json!(1);
        harness.add("late", late);
        harness.add("early", early);

        let report = harness.executive.tick().unwrap();
        assert_eq!(report.current_goal, Some(id("early")));
        assert_eq!(
            harness.executive.snapshot().goals,
            vec![id("early"), id("late")]
        );
    }

    #[test]
    fn query_goals_wait_for_admission_without_being_dropped() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("gate", gated(300));
        harness.add("work", task(100, 1));

        let report = harness.executive.tick().unwrap();
        assert_eq!(report.current_goal, Some(id("work")));
        assert!(harness.executive.snapshot().goals.contains(&id("gate")));

        harness.script.lock().admitted.insert("gate".to_owned());
        let report = harness.executive.tick().unwrap();
        assert_eq!(report.current_goal, Some(id("gate")));
        let steps = harness.script.lock().steps.clone();
        assert_eq!(steps[1].0, "work");
        assert!(steps[1].1.preempt);
        assert_eq!(steps[2].0, "gate");
        assert!(steps[2].1.is_new);
    }

    #[test]
    fn preemption_is_only_a_request() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("low", task(100, 1));
        harness.behave("low", Behavior::Stubborn);
        harness.executive.tick().unwrap();

        harness.add("high", task(200, 1));
        let report = harness.executive.tick().unwrap();
        assert_eq!(report.current_goal, Some(id("low")));
        assert!(harness.last_request().preempt);
        assert_eq!(report.steps, 1);
    }

    #[test]
    fn yielding_without_a_request_is_a_contract_violation() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("rogue", task(100, 1));
        harness.behave("rogue", Behavior::Rogue);

        let error = harness.executive.tick().unwrap_err();
        assert!(matches!(
            error,
            ExecutiveError::ContractViolation { ref goal_id, .. } if goal_id == "rogue"
        ));
        assert_eq!(harness.script.lock().updates, 0);
    }

    #[test]
    fn finished_goals_never_run_again() {
        let mut harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("once", task(100, 1));
        harness.behave("once", Behavior::Finish(GoalState::Completed));
        harness.executive.tick().unwrap();

        // The store replays the document, now carrying the outcome flags.
        let mut replay = task(100, 1);
        replay["complete"] = json!("true");
        replay["complete_timestamp"] = json!(START_MS);
        harness.add("once", replay);
        harness.executive.tick().unwrap();
        assert_eq!(harness.stepped(), vec!["once"]);

        harness.add("remote", task(500, 1));
        harness.change("remote", json!({"reject": "true"}));
        let report = harness.executive.tick().unwrap();
        assert_eq!(report.status, TickStatus::Idle);
        assert_eq!(harness.stepped(), vec!["once"]);

        assert_eq!(
            harness.drain_writes(),
            vec![StoreCommand::outcome("once", "complete", START_MS)]
        );
    }

    #[test]
    fn stop_mode_holds_background_goals_and_starts_user_goals() {
        let harness = Harness::ready(ExecutiveMode::Stop);
        harness.add("patrol", task(0, 1));

        let report = harness.executive.tick().unwrap();
        assert_eq!(report.status, TickStatus::Holding);
        assert!(harness.stepped().is_empty());
        assert_eq!(harness.robot.actions.history(), vec![None]);

        harness.add("user", task(150, 2));
        let report = harness.executive.tick().unwrap();
        assert_eq!(report.status, TickStatus::Running);
        assert_eq!(report.current_goal, Some(id("user")));
    }

    #[test]
    fn entering_stop_mode_preempts_the_running_background_goal() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("patrol", task(0, 1));
        assert_eq!(harness.executive.tick().unwrap().status, TickStatus::Running);

        harness.set_mode(ExecutiveMode::Stop);
        let report = harness.executive.tick().unwrap();
        assert_eq!(report.status, TickStatus::Holding);
        assert_eq!(report.current_goal, None);
        assert!(harness.last_request().preempt);
        assert!(harness.executive.snapshot().goals.contains(&id("patrol")));
    }

    #[test]
    fn cancellation_is_passed_to_the_running_processor() {
        let mut harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("job", task(100, 1));
        harness.executive.tick().unwrap();

        harness.change("job", json!({"cancel": false}));
        harness.executive.tick().unwrap();
        assert!(!harness.last_request().cancel);

        harness.change("job", json!({"cancel": true}));
        let report = harness.executive.tick().unwrap();
        assert!(harness.last_request().cancel);
        assert_eq!(report.status, TickStatus::Idle);
        assert_eq!(
            harness.drain_writes(),
            vec![StoreCommand::outcome("job", "reject", START_MS)]
        );
    }

    #[test]
    fn cancelled_running_goal_is_rejected_even_if_its_processor_keeps_going() {
        let mut harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("job", task(100, 1));
        harness.behave("job", Behavior::Stubborn);
        harness.executive.tick().unwrap();

        harness.change("job", json!({"cancel": true}));
        for _ in 0..3 {
            let report = harness.executive.tick().unwrap();
            assert_eq!(report.status, TickStatus::Running);
            assert!(harness.last_request().cancel);
        }
        let snapshot = harness.executive.snapshot();
        assert!(snapshot.rejected.contains(&id("job")));
        assert_eq!(snapshot.current, Some(id("job")));
        assert_eq!(
            harness.drain_writes(),
            vec![StoreCommand::outcome("job", "reject", START_MS)]
        );

        harness.behave("job", Behavior::Finish(GoalState::Completed));
        let report = harness.executive.tick().unwrap();
        assert_eq!(report.status, TickStatus::Idle);
        assert!(!harness.executive.snapshot().completed.contains(&id("job")));
        assert!(harness.drain_writes().is_empty());
    }

    #[test]
    fn cancelled_waiting_goals_are_rejected_without_a_step() {
        let mut harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("queued", task(100, 1));
        harness.add("next", task(50, 2));
        harness.executive.apply_goal_event(&GoalEvent::Removed {
            key: "queued".to_owned(),
            document: task(100, 1),
        });

        let report = harness.executive.tick().unwrap();
        assert_eq!(report.status, TickStatus::Running);
        assert_eq!(report.current_goal, Some(id("next")));
        assert_eq!(harness.stepped(), vec!["next".to_owned()]);
        let snapshot = harness.executive.snapshot();
        assert!(snapshot.rejected.contains(&id("queued")));
        assert!(snapshot.cancelled.contains(&id("queued")));
        assert_eq!(
            harness.drain_writes(),
            vec![StoreCommand::outcome("queued", "reject", START_MS)]
        );
    }

    #[test]
    fn reconcile_cancels_remote_goals_missing_from_the_store() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("kept", task(50, 1));
        harness.add("deleted", task(100, 2));

        let present = BTreeSet::from(["kept".to_owned()]);
        assert_eq!(harness.executive.reconcile_goals(&present), 1);
        assert_eq!(harness.executive.reconcile_goals(&present), 0);
        let snapshot = harness.executive.snapshot();
        assert_eq!(snapshot.cancelled, BTreeSet::from([id("deleted")]));

        let report = harness.executive.tick().unwrap();
        assert_eq!(report.current_goal, Some(id("kept")));
        assert!(!harness.stepped().contains(&"deleted".to_owned()));
    }

    #[test]
    fn unloaded_objects_hold_ticks_until_the_next_snapshot() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.executive.mark_objects_unloaded();
        assert_eq!(
            harness.executive.tick().unwrap().status,
            TickStatus::Skipped(SkipReason::ObjectsNotLoaded)
        );
        harness
            .executive
            .replace_objects(&MapId::from(MAP), &json!({}))
            .unwrap();
        assert_eq!(harness.executive.tick().unwrap().status, TickStatus::Idle);
    }

    #[test]
    fn outcome_bookkeeping_expires_but_cancellations_do_not() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("done", task(100, 1));
        harness.behave("done", Behavior::Finish(GoalState::Completed));
        harness.change("gone", json!({"cancel": true}));
        harness.executive.tick().unwrap();
        assert!(harness.executive.snapshot().completed.contains(&id("done")));

        harness.clock.advance(DEFAULT_OUTCOME_RETENTION_MS);
        harness.executive.tick().unwrap();
        assert!(harness.executive.snapshot().completed.contains(&id("done")));

        harness.clock.advance(1);
        harness.executive.tick().unwrap();
        let snapshot = harness.executive.snapshot();
        assert!(snapshot.completed.is_empty());
        assert!(snapshot.cancelled.contains(&id("gone")));
    }

    #[test]
    fn malformed_goals_are_rejected_and_unknown_goals_ignored() {
        let mut harness = Harness::ready(ExecutiveMode::RandomDriver);
        let mut missing = task(100, 1);
        missing["parameters"] = json!({});
        harness.add("missing", missing);
        let mut undeclared = task(100, 1);
        undeclared["parameters"]["speed"] = json!(3);
        harness.add("undeclared", undeclared);
        harness.add("alien", json!({"type": "dance", "version": "1.0.0", "timestamp": 1}));
        let mut stale = task(100, 1);
        stale["version"] = json!("0.9.0");
        harness.add("stale", stale);

        let snapshot = harness.executive.snapshot();
        assert!(snapshot.goals.is_empty());
        assert_eq!(
            snapshot.rejected,
            [id("missing"), id("undeclared")].into_iter().collect()
        );
        assert_eq!(
            harness.drain_writes(),
            vec![
                StoreCommand::outcome("missing", "reject", START_MS),
                StoreCommand::outcome("undeclared", "reject", START_MS),
            ]
        );
    }

    #[test]
    fn object_snapshots_follow_the_active_map() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        let snapshot = json!({
            "dock": {"type": "point_of_interest", "variables": {"location": {"px": 2.0, "py": 1.0, "qw": 1.0}, "name": "dock"}},
            "broken": {"type": "point_of_interest", "variables": {"name": "broken"}},
        });
        assert_eq!(harness.executive.replace_objects(&MapId::from(MAP), &snapshot), Some(1));
        assert_eq!(harness.executive.replace_objects(&MapId::from("other"), &snapshot), None);

        let publications = harness.robot.navigation.publications();
        assert_eq!(publications.len(), 2);
        assert_eq!(publications[1], vec![("dock".to_owned(), Transform::at(2.0, 1.0))]);

        let watch = harness.executive.watch_world();
        harness.executive.set_world(Some(World::new("map-2", "garage")));
        assert_eq!(*watch.borrow(), Some(MapId::from("map-2")));
        assert!(!harness.executive.snapshot().objects_loaded);
        assert_eq!(
            harness.executive.tick().unwrap().status,
            TickStatus::Skipped(SkipReason::ObjectsNotLoaded)
        );
    }

    #[test]
    fn missing_mode_document_is_defaulted_when_configured() {
        let mut harness = Harness::new(ExecutiveConfig {
            default_mode_on_missing: true,
            ..ExecutiveConfig::default()
        });
        harness.executive.apply_mode_document(None);
        assert_eq!(
            harness.drain_writes(),
            vec![StoreCommand::SetExecutiveMode {
                document: json!({"executive_mode": "STOP", "timestamp": START_MS}),
            }]
        );

        harness
            .executive
            .apply_mode_document(Some(&json!({"executive_mode": "RANDOM_DRIVER"})));
        assert!(harness.drain_writes().is_empty());
        assert_eq!(
            harness.executive.snapshot().mode,
            Some(ExecutiveMode::RandomDriver)
        );
    }

    #[test]
    fn shutdown_runs_the_strategy_hook() {
        let harness = Harness::ready(ExecutiveMode::RandomDriver);
        harness.add("job", task(100, 1));
        harness.executive.tick().unwrap();
        harness.executive.shutdown_strategy();
        assert_eq!(harness.script.lock().shutdowns, 1);
        assert_eq!(harness.executive.snapshot().current, None);
        assert_eq!(harness.robot.actions.current(), None);
    }

    #[test]
    fn dispatch_strategy_spawns_remote_drive_goals_from_the_random_driver() {
        let strategy = ProcessorRegistry::with_reference_processors()
            .into_strategy(RobotPath::new("user-1", "robot-1"))
            .unwrap();
        let mut harness = Harness::with_strategy(
            ExecutiveConfig::default(),
            Box::new(strategy),
            Arc::new(Mutex::new(Script::default())),
        );
        let mut world = World::new(MAP, "home");
        world.custom_transforms = vec![Transform::at(1.0, 0.0), Transform::at(2.0, 0.0)];
        harness.make_ready(world, ExecutiveMode::RandomDriver);

        harness.executive.bootstrap();
        let bootstrapped = harness.executive.snapshot();
        assert_eq!(bootstrapped.goals.len(), 3);
        assert_eq!(bootstrapped.next_sequence, 3);
        assert!(harness.drain_writes().is_empty());

        harness.executive.tick().unwrap();
        let writes = harness.drain_writes();
        assert_eq!(writes.len(), 1);
        let StoreCommand::PutGoal { key, document } = &writes[0] else {
            panic!("unexpected write {writes:?}");
        };
        assert_eq!(document["type"], json!("drivePoint"));
        assert_eq!(document["timestamp"], json!(START_MS));

        let report = harness.executive.tick().unwrap();
        assert_eq!(report.current_goal.as_ref().map(GoalId::as_str), Some(key.as_str()));
        assert!(matches!(
            harness.robot.actions.current().map(|command| command.action),
            Some(Action::Drive { .. })
        ));
    }
}
