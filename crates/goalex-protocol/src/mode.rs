//! Executive mode and the remote mode document.
//!
//! The executive mode is a remotely controlled scheduling policy. In `Stop`
//! mode background goals (priority below the user threshold) are held in
//! the queue instead of being started.

use crate::variable::VariableType;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

/// Field of the mode document holding the mode name.
pub const EXECUTIVE_MODE_FIELD: &str = "executive_mode";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutiveMode {
    /// Background goals may run.
    RandomDriver,
    /// Only user goals may run.
    #[default]
    Stop,
}

impl ExecutiveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RandomDriver => "RANDOM_DRIVER",
            Self::Stop => "STOP",
        }
    }

    /// Exact wire name lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RANDOM_DRIVER" => Some(Self::RandomDriver),
            "STOP" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// The small per-robot document that selects the executive mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutiveModeDocument {
    pub mode: ExecutiveMode,
    pub timestamp: i64,
}

impl ExecutiveModeDocument {
    pub fn new(mode: ExecutiveMode, timestamp: i64) -> Self {
        Self { mode, timestamp }
    }

    /// Decode a mode document. An absent document yields the default mode.
    pub fn from_wire(raw: Option<&JsonValue>) -> Self {
        let Some(raw) = raw.filter(|raw| !raw.is_null()) else {
            return Self::default();
        };
        let mode = VariableType::ExecutiveMode
            .from_wire(raw.get(EXECUTIVE_MODE_FIELD))
            .as_mode()
            .unwrap_or_default();
        let timestamp = VariableType::Int64
            .from_wire(raw.get("timestamp"))
            .as_i64()
            .unwrap_or_default();
        Self { mode, timestamp }
    }

    pub fn to_wire(&self) -> JsonValue {
        json!({
            EXECUTIVE_MODE_FIELD: self.mode,
            "timestamp": self.timestamp,
        })
    }
}
