//! Typed identifiers for goals, robots, maps and world objects.
//!
//! IDs are opaque String wrappers (serde-transparent). Remote documents are
//! keyed by UUID strings, while singleton background goals use fixed
//! well-known keys such as `RANDOM_DRIVER`.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new ID using UUID v4 (random).
            pub fn new_uuid() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Key of a goal document. Equality and hashing of goals use this alone.
    GoalId
);
typed_id!(
    /// Owner of a robot.
    UserId
);
typed_id!(
    /// Identifier of a robot.
    RobotId
);
typed_id!(
    /// Identifier of a map (the "world" the robot is localized in).
    MapId
);
typed_id!(
    /// Key of a world object document.
    ObjectId
);
typed_id!(
    /// Identifier of a command handed to the action mediator.
    ActionId
);

/// Address of one robot's documents in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RobotPath {
    pub user: UserId,
    pub robot: RobotId,
}

impl RobotPath {
    pub fn new(user: impl Into<UserId>, robot: impl Into<RobotId>) -> Self {
        Self {
            user: user.into(),
            robot: robot.into(),
        }
    }
}

impl fmt::Display for RobotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.robot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_id_new_is_unique() {
        let a = GoalId::new_uuid();
        let b = GoalId::new_uuid();
        assert_ne!(a, b);
    }

    #[test]
    fn goal_id_from_string() {
        let id = GoalId::from_string("RANDOM_DRIVER");
        assert_eq!(id.as_str(), "RANDOM_DRIVER");
        assert_eq!(id.to_string(), "RANDOM_DRIVER");
    }

    #[test]
    fn typed_id_serializes_as_plain_string() {
        let id = MapId::from_string("map-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"map-1\"");
    }

    #[test]
    fn robot_path_display() {
        let path = RobotPath::new("user-a", "robot-b");
        assert_eq!(path.to_string(), "user-a/robot-b");
    }
}
