//! Goal types (schemas) and goals (validated instances).
//!
//! Remote goal documents are untrusted. [`validate_and_parse`] is the only way
//! a remote document becomes a [`Goal`]; it distinguishes rejections that must
//! be dropped silently (unknown type, stale schema version) from malformed
//! documents that the caller must reject explicitly.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use thiserror::Error;

use crate::error::{ExecutiveError, ExecutiveResult};
use crate::ids::{GoalId, RobotId, RobotPath, UserId};
use crate::variable::{Value, VariableType, wire_text};

/// Schema of a goal: its parameters and their types.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalType {
    name: String,
    version: String,
    user_visible: bool,
    query: bool,
    parameters: BTreeSet<String>,
    variable_types: BTreeMap<String, VariableType>,
}

impl GoalType {
    /// A user-visible, non-query goal type with no parameters.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            user_visible: true,
            query: false,
            parameters: BTreeSet::new(),
            variable_types: BTreeMap::new(),
        }
    }

    /// Declare a parameter every goal of this type must supply.
    pub fn parameter(mut self, name: impl Into<String>, ty: VariableType) -> Self {
        let name = name.into();
        self.variable_types.insert(name.clone(), ty);
        self.parameters.insert(name);
        self
    }

    /// Declare a typed variable that goals do not supply.
    pub fn variable(mut self, name: impl Into<String>, ty: VariableType) -> Self {
        self.variable_types.insert(name.into(), ty);
        self
    }

    /// Goals of this type must pass an admission query before they start.
    pub fn queried(mut self) -> Self {
        self.query = true;
        self
    }

    /// Not offered to users for manual creation.
    pub fn hidden(mut self) -> Self {
        self.user_visible = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_user_visible(&self) -> bool {
        self.user_visible
    }

    pub fn is_query(&self) -> bool {
        self.query
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &VariableType)> {
        self.parameters.iter().filter_map(|name| {
            self.variable_types
                .get(name)
                .map(|ty| (name.as_str(), ty))
        })
    }

    pub fn parameter_type(&self, name: &str) -> Option<&VariableType> {
        if self.parameters.contains(name) {
            self.variable_types.get(name)
        } else {
            None
        }
    }

    pub fn variable_type(&self, name: &str) -> Option<&VariableType> {
        self.variable_types.get(name)
    }

    /// Extension point for per-type validation beyond parameter presence and
    /// typing. Currently accepts every goal.
    pub fn goal_valid(&self, _goal: &Goal) -> bool {
        true
    }

    /// Entry advertised in the goal-type manifest.
    pub fn to_manifest_entry(&self) -> JsonValue {
        let parameters: JsonMap<String, JsonValue> = self
            .parameters()
            .map(|(name, ty)| (name.to_owned(), JsonValue::String(ty.to_string())))
            .collect();
        json!({
            "name": self.name,
            "version": self.version,
            "parameters": parameters,
            "userVisible": self.user_visible,
        })
    }
}

/// The goal types an executive accepts, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct GoalTypeSet {
    types: IndexMap<String, GoalType>,
}

impl GoalTypeSet {
    /// Fails if two goal types share a name.
    pub fn new(types: impl IntoIterator<Item = GoalType>) -> ExecutiveResult<Self> {
        let mut set = IndexMap::new();
        for goal_type in types {
            let name = goal_type.name.clone();
            if set.insert(name.clone(), goal_type).is_some() {
                return Err(ExecutiveError::InvalidGoalType(format!(
                    "duplicate goal type `{name}`"
                )));
            }
        }
        Ok(Self { types: set })
    }

    pub fn get(&self, name: &str) -> Option<&GoalType> {
        self.types.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoalType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// `{name: manifest entry}` for every type.
    pub fn to_manifest(&self) -> JsonValue {
        let entries: JsonMap<String, JsonValue> = self
            .types
            .iter()
            .map(|(name, goal_type)| (name.clone(), goal_type.to_manifest_entry()))
            .collect();
        JsonValue::Object(entries)
    }
}

/// A validated, typed task request.
///
/// Equality and hashing use the uuid only.
#[derive(Debug, Clone)]
pub struct Goal {
    uuid: GoalId,
    goal_type: String,
    version: String,
    timestamp: i64,
    sequence: i64,
    priority: i64,
    owner: RobotPath,
    parameters: BTreeMap<String, Value>,
    local: bool,
}

impl PartialEq for Goal {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for Goal {}

impl Hash for Goal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl Goal {
    pub fn uuid(&self) -> &GoalId {
        &self.uuid
    }

    pub fn goal_type(&self) -> &str {
        &self.goal_type
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn owner(&self) -> &RobotPath {
        &self.owner
    }

    pub fn user_uuid(&self) -> &UserId {
        &self.owner.user
    }

    pub fn robot_uuid(&self) -> &RobotId {
        &self.owner.robot
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Local goals are synthesized by the executive and never written remotely.
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Admission order: priority descending, then timestamp ascending, then
    /// sequence ascending.
    pub fn cmp_priority(&self, other: &Goal) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }

    /// Remote document for this goal. A non-positive timestamp is replaced by
    /// `now_ms`.
    pub fn to_wire(&self, now_ms: i64) -> JsonValue {
        let parameters: JsonMap<String, JsonValue> = self
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.to_wire()))
            .collect();
        let timestamp = if self.timestamp < 1 {
            now_ms
        } else {
            self.timestamp
        };
        json!({
            "name": self.goal_type,
            "type": self.goal_type,
            "version": self.version,
            "timestamp": timestamp,
            "sequence": self.sequence,
            "priority": self.priority,
            "parameters": parameters,
        })
    }
}

/// Builder for goals synthesized by the executive or its processors.
#[derive(Debug, Clone)]
pub struct GoalDraft {
    goal_type: String,
    version: String,
    owner: RobotPath,
    timestamp: i64,
    sequence: i64,
    priority: i64,
    parameters: BTreeMap<String, Value>,
}

impl GoalDraft {
    pub fn new(goal_type: &GoalType, owner: RobotPath) -> Self {
        Self {
            goal_type: goal_type.name.clone(),
            version: goal_type.version.clone(),
            owner,
            timestamp: 0,
            sequence: 0,
            priority: 0,
            parameters: BTreeMap::new(),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// A goal with a fresh random uuid, mirrored to the remote store.
    pub fn into_remote(self) -> Goal {
        self.build(GoalId::new_uuid(), false)
    }

    /// A goal with a fixed well-known uuid that stays local.
    pub fn into_local(self, uuid: impl Into<GoalId>) -> Goal {
        self.build(uuid.into(), true)
    }

    fn build(self, uuid: GoalId, local: bool) -> Goal {
        Goal {
            uuid,
            goal_type: self.goal_type,
            version: self.version,
            timestamp: self.timestamp,
            sequence: self.sequence,
            priority: self.priority,
            owner: self.owner,
            parameters: self.parameters,
            local,
        }
    }
}

/// A goal document that is structurally invalid for its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("goal document is not a map")]
    NotAMap,
    #[error("goal document has no key")]
    MissingKey,
    #[error("goal document has no `{0}` field")]
    MissingField(&'static str),
    #[error("goal parameters are not a map")]
    ParametersNotAMap,
    #[error("missing parameter `{0}`")]
    MissingParameter(String),
    #[error("invalid parameter `{0}`")]
    UndeclaredParameter(String),
    #[error("goal {0} rejected by its goal type")]
    InvalidGoal(String),
}

/// Why a remote goal document did not become a [`Goal`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GoalRejection {
    #[error("unknown goal type `{0}`")]
    UnknownType(String),
    #[error("goal type `{goal_type}` has version `{expected}`, document has `{found}`")]
    StaleVersion {
        goal_type: String,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Malformed(#[from] FormatError),
}

impl GoalRejection {
    /// Unknown and stale goals may belong to another executive version; they
    /// are dropped without a remote reject.
    pub fn is_silent(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

/// Turn an untrusted remote goal document into a [`Goal`].
pub fn validate_and_parse(
    key: Option<&str>,
    raw: &JsonValue,
    types: &GoalTypeSet,
    owner: &RobotPath,
) -> Result<Goal, GoalRejection> {
    let document = raw.as_object().ok_or(FormatError::NotAMap)?;
    let key = key
        .filter(|key| !key.is_empty())
        .ok_or(FormatError::MissingKey)?;

    let type_name = non_null(document, "type")
        .or_else(|| non_null(document, "name"))
        .map(wire_text)
        .ok_or(FormatError::MissingField("type"))?;
    let version = non_null(document, "version").ok_or(FormatError::MissingField("version"))?;

    let goal_type = types
        .get(&type_name)
        .ok_or_else(|| GoalRejection::UnknownType(type_name.clone()))?;
    if version.as_str() != Some(goal_type.version()) {
        return Err(GoalRejection::StaleVersion {
            goal_type: type_name,
            expected: goal_type.version().to_owned(),
            found: wire_text(version),
        });
    }

    let timestamp = non_null(document, "timestamp").ok_or(FormatError::MissingField("timestamp"))?;
    let parameters = parse_parameters(goal_type, document.get("parameters"))?;

    let goal = Goal {
        uuid: GoalId::from_string(key),
        goal_type: type_name,
        version: goal_type.version().to_owned(),
        timestamp: int_field(Some(timestamp)),
        sequence: int_field(document.get("sequence")),
        priority: int_field(document.get("priority")),
        owner: owner.clone(),
        parameters,
        local: false,
    };
    if !goal_type.goal_valid(&goal) {
        return Err(FormatError::InvalidGoal(key.to_owned()).into());
    }
    Ok(goal)
}

fn parse_parameters(
    goal_type: &GoalType,
    raw: Option<&JsonValue>,
) -> Result<BTreeMap<String, Value>, FormatError> {
    let empty = JsonMap::new();
    let supplied = match raw {
        None | Some(JsonValue::Null) => &empty,
        Some(JsonValue::Object(map)) => map,
        Some(_) => return Err(FormatError::ParametersNotAMap),
    };

    if let Some(undeclared) = supplied
        .keys()
        .find(|name| goal_type.parameter_type(name).is_none())
    {
        return Err(FormatError::UndeclaredParameter(undeclared.clone()));
    }

    let mut parameters = BTreeMap::new();
    for (name, ty) in goal_type.parameters() {
        let value = supplied
            .get(name)
            .filter(|value| !value.is_null())
            .ok_or_else(|| FormatError::MissingParameter(name.to_owned()))?;
        parameters.insert(name.to_owned(), ty.from_wire(Some(value)));
    }
    Ok(parameters)
}

fn non_null<'a>(document: &'a JsonMap<String, JsonValue>, field: &str) -> Option<&'a JsonValue> {
    document.get(field).filter(|value| !value.is_null())
}

fn int_field(raw: Option<&JsonValue>) -> i64 {
    VariableType::Int64
        .from_wire(raw)
        .as_i64()
        .unwrap_or_default()
}
