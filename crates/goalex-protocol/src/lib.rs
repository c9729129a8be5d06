//! # goalex-protocol: goal executive contracts
//!
//! This crate defines the shared types, schemas and trait interfaces of the
//! goal executive: the typed variable system, goals and their types, world
//! objects, the per-tick world state, and the ports to the remote store and
//! robot subsystems.
//!
//! It is intentionally dependency-light (no tokio) so it can be used as a
//! pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (GoalId, MapId, ObjectId, RobotPath, etc.)
//! - [`variable`]: VariableType, Value and the wire coercion rules
//! - [`transform`]: Poses and their wire encoding
//! - [`mode`]: ExecutiveMode and the remote mode document
//! - [`goal`]: GoalType, Goal, and the remote document validation pipeline
//! - [`world`]: WorldObjectType, WorldObject, World, WorldState
//! - [`strategy`]: ExecutiveStrategy, ExecutiveDelegate, GoalState
//! - [`ports`]: Remote goal store and robot collaborator ports
//! - [`error`]: ExecutiveError, ExecutiveResult

pub mod error;
pub mod goal;
pub mod ids;
pub mod mode;
pub mod ports;
pub mod strategy;
pub mod transform;
pub mod variable;
pub mod world;

// Re-export the most commonly used types at the crate root.
pub use error::{ExecutiveError, ExecutiveResult};
pub use goal::{
    FormatError, Goal, GoalDraft, GoalRejection, GoalType, GoalTypeSet, validate_and_parse,
};
pub use ids::{ActionId, GoalId, MapId, ObjectId, RobotId, RobotPath, UserId};
pub use mode::{EXECUTIVE_MODE_FIELD, ExecutiveMode, ExecutiveModeDocument};
pub use ports::{
    Action, ActionCommand, ActionMediator, ActionState, AnimationManager, Collaborators,
    GoalEvent, GoalEventStream, GoalSound, GoalStorePort, ModeDocumentStream,
    NavigationPublisher, ObjectSnapshotStream, SoundHandle, SoundManager,
};
pub use strategy::{ExecutiveDelegate, ExecutiveStrategy, GoalState, StepRequest};
pub use transform::Transform;
pub use variable::{UnknownVariableType, Value, VariableType};
pub use world::{
    ObjectFormatError, POINT_OF_INTEREST, World, WorldObject, WorldObjectType, WorldState,
    WorldStateKey, default_object_types, parse_object_snapshot,
};
