//! Simulated robot collaborators.
//!
//! They record every call and let the caller drive action and sound
//! outcomes, which is what tests and the demo daemon need from a robot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use goalex_protocol::{
    ActionCommand, ActionId, ActionMediator, ActionState, AnimationManager, Collaborators,
    ExecutiveDelegate, ExecutiveMode, Goal, GoalSound, NavigationPublisher, SoundHandle,
    SoundManager, Transform, World, WorldObject, WorldState,
};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct ActionLog {
    current: Option<ActionCommand>,
    states: HashMap<ActionId, ActionState>,
    polls: HashMap<ActionId, u32>,
    history: Vec<Option<ActionCommand>>,
}

/// Action mediator whose action states are set by the caller, or that
/// reports every action as arrived after one poll.
#[derive(Debug, Default)]
pub struct SimActionMediator {
    arriving: bool,
    log: Mutex<ActionLog>,
}

impl SimActionMediator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each action reports `Executing` on its first poll and `Completed`
    /// afterwards.
    pub fn arriving() -> Self {
        Self {
            arriving: true,
            log: Mutex::default(),
        }
    }

    pub fn current(&self) -> Option<ActionCommand> {
        self.log.lock().current.clone()
    }

    /// Every `set_action` call, in order.
    pub fn history(&self) -> Vec<Option<ActionCommand>> {
        self.log.lock().history.clone()
    }

    pub fn set_state(&self, id: &ActionId, state: ActionState) {
        self.log.lock().states.insert(id.clone(), state);
    }

    /// Set the state of the current action, if any.
    pub fn finish_current(&self, state: ActionState) -> bool {
        let mut log = self.log.lock();
        let Some(id) = log.current.as_ref().map(|command| command.id.clone()) else {
            return false;
        };
        log.states.insert(id, state);
        true
    }

    /// Drop all knowledge of an action, as a restarted mediator would.
    pub fn forget(&self, id: &ActionId) {
        self.log.lock().states.remove(id);
    }
}

impl ActionMediator for SimActionMediator {
    fn set_action(&self, command: Option<ActionCommand>) {
        let mut log = self.log.lock();
        if let Some(command) = &command {
            log.states.insert(command.id.clone(), ActionState::Queued);
        }
        log.history.push(command.clone());
        log.current = command;
    }

    fn action_state(&self, id: &ActionId) -> Option<ActionState> {
        let mut log = self.log.lock();
        let state = *log.states.get(id)?;
        if !self.arriving || matches!(state, ActionState::Completed | ActionState::Rejected) {
            return Some(state);
        }
        let polls = log.polls.entry(id.clone()).or_default();
        *polls += 1;
        let next = if *polls > 1 {
            ActionState::Completed
        } else {
            ActionState::Executing
        };
        log.states.insert(id.clone(), next);
        Some(next)
    }
}

#[derive(Debug, Default)]
struct SoundLog {
    next_handle: u64,
    playing: BTreeSet<u64>,
    played: Vec<GoalSound>,
    stopped: Vec<SoundHandle>,
}

/// Sound manager that keeps sounds playing until finished by the caller,
/// or that finishes them immediately.
#[derive(Debug, Default)]
pub struct SimSoundManager {
    instant: bool,
    log: Mutex<SoundLog>,
}

impl SimSoundManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instant() -> Self {
        Self {
            instant: true,
            log: Mutex::default(),
        }
    }

    pub fn played(&self) -> Vec<GoalSound> {
        self.log.lock().played.clone()
    }

    pub fn stopped(&self) -> Vec<SoundHandle> {
        self.log.lock().stopped.clone()
    }

    pub fn finish_all(&self) {
        self.log.lock().playing.clear();
    }
}

impl SoundManager for SimSoundManager {
    fn play_goal_sound(&self, sound: GoalSound, _priority: u8) -> Option<SoundHandle> {
        let mut log = self.log.lock();
        log.next_handle += 1;
        let handle = log.next_handle;
        log.played.push(sound);
        if !self.instant {
            log.playing.insert(handle);
        }
        Some(SoundHandle(handle))
    }

    fn is_playing(&self, handle: SoundHandle) -> bool {
        self.log.lock().playing.contains(&handle.0)
    }

    fn stop(&self, handle: SoundHandle) {
        let mut log = self.log.lock();
        log.playing.remove(&handle.0);
        log.stopped.push(handle);
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimAnimationCatalog {
    names: BTreeSet<String>,
}

impl SimAnimationCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl AnimationManager for SimAnimationCatalog {
    fn has_animation(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[derive(Debug, Default)]
pub struct NavigationRecorder {
    publications: Mutex<Vec<Vec<(String, Transform)>>>,
}

impl NavigationRecorder {
    pub fn publications(&self) -> Vec<Vec<(String, Transform)>> {
        self.publications.lock().clone()
    }
}

impl NavigationPublisher for NavigationRecorder {
    fn publish_points_of_interest(&self, points: &[(String, Transform)]) {
        self.publications.lock().push(points.to_vec());
    }
}

/// A full set of simulated collaborators.
#[derive(Debug, Clone)]
pub struct SimRobot {
    pub actions: Arc<SimActionMediator>,
    pub sounds: Arc<SimSoundManager>,
    pub animations: Arc<SimAnimationCatalog>,
    pub navigation: Arc<NavigationRecorder>,
}

impl Default for SimRobot {
    fn default() -> Self {
        Self::with_mediator(SimActionMediator::new())
    }
}

impl SimRobot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A robot whose actions all complete, with sounds that end at once.
    pub fn arriving() -> Self {
        Self {
            sounds: Arc::new(SimSoundManager::instant()),
            ..Self::with_mediator(SimActionMediator::arriving())
        }
    }

    fn with_mediator(actions: SimActionMediator) -> Self {
        Self {
            actions: Arc::new(actions),
            sounds: Arc::new(SimSoundManager::new()),
            animations: Arc::new(SimAnimationCatalog::new(["wave", "dance"])),
            navigation: Arc::new(NavigationRecorder::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            actions: self.actions.clone(),
            sounds: self.sounds.clone(),
            animations: self.animations.clone(),
            navigation: self.navigation.clone(),
        }
    }

    pub fn delegate(&self) -> RecordingDelegate {
        RecordingDelegate {
            robot: self.clone(),
            added: Vec::new(),
            sequence: 0,
        }
    }
}

/// Delegate that collects added goals instead of scheduling them.
#[derive(Debug)]
pub struct RecordingDelegate {
    robot: SimRobot,
    pub added: Vec<Goal>,
    pub sequence: i64,
}

impl ExecutiveDelegate for RecordingDelegate {
    fn add_goal(&mut self, goal: Goal) {
        self.added.push(goal);
    }

    fn next_sequence(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    fn actions(&self) -> &dyn ActionMediator {
        self.robot.actions.as_ref()
    }

    fn sounds(&self) -> &dyn SoundManager {
        self.robot.sounds.as_ref()
    }

    fn animations(&self) -> &dyn AnimationManager {
        self.robot.animations.as_ref()
    }
}

/// A localized world state on `world` at `location`, in random driver mode.
pub fn world_state(world: World, location: Transform, timestamp_ms: i64) -> WorldState {
    WorldState {
        world: Arc::new(world),
        location,
        battery_low: false,
        battery_critical: false,
        robot_name: "sim".to_owned(),
        mode: ExecutiveMode::RandomDriver,
        objects: Arc::new(BTreeMap::new()),
        timestamp_ms,
    }
}

/// Replace the object set of a world state.
pub fn with_objects(
    mut state: WorldState,
    objects: impl IntoIterator<Item = WorldObject>,
) -> WorldState {
    state.objects = Arc::new(
        objects
            .into_iter()
            .map(|object| (object.uuid().clone(), object))
            .collect(),
    );
    state
}
