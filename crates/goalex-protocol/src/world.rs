//! World objects and the per-tick world state snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::ids::{MapId, ObjectId};
use crate::mode::ExecutiveMode;
use crate::transform::Transform;
use crate::variable::{Value, VariableType, wire_text};

/// Object type name of points of interest.
pub const POINT_OF_INTEREST: &str = "point_of_interest";

/// Schema of a world object.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObjectType {
    name: String,
    variables: BTreeMap<String, VariableType>,
}

impl WorldObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn variable(mut self, name: impl Into<String>, ty: VariableType) -> Self {
        self.variables.insert(name.into(), ty);
        self
    }

    /// A named location on a map.
    pub fn point_of_interest() -> Self {
        Self::new(POINT_OF_INTEREST)
            .variable("location", VariableType::Transform)
            .variable("name", VariableType::Text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &VariableType)> {
        self.variables.iter().map(|(name, ty)| (name.as_str(), ty))
    }
}

/// Object types understood by the executive, keyed by name.
pub fn default_object_types() -> BTreeMap<String, WorldObjectType> {
    [WorldObjectType::point_of_interest()]
        .into_iter()
        .map(|object_type| (object_type.name.clone(), object_type))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectFormatError {
    #[error("object document is not a map")]
    NotAMap,
    #[error("object document has no type")]
    MissingType,
    #[error("unknown object type `{0}`")]
    UnknownType(String),
    #[error("object variables are missing or not a map")]
    MissingVariables,
    #[error("missing variable `{0}`")]
    MissingVariable(String),
}

/// A typed entity on a map.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    uuid: ObjectId,
    map_uuid: MapId,
    object_type: String,
    variables: BTreeMap<String, Value>,
}

impl WorldObject {
    /// Parse an object document. Every declared variable must be present.
    pub fn from_wire(
        uuid: ObjectId,
        map_uuid: MapId,
        object_type: &WorldObjectType,
        raw: &JsonValue,
    ) -> Result<Self, ObjectFormatError> {
        let document = raw.as_object().ok_or(ObjectFormatError::NotAMap)?;
        let supplied = document
            .get("variables")
            .and_then(JsonValue::as_object)
            .ok_or(ObjectFormatError::MissingVariables)?;

        let mut variables = BTreeMap::new();
        for (name, ty) in object_type.variables() {
            let value = supplied
                .get(name)
                .filter(|value| !value.is_null())
                .ok_or_else(|| ObjectFormatError::MissingVariable(name.to_owned()))?;
            variables.insert(name.to_owned(), ty.from_wire(Some(value)));
        }

        Ok(Self {
            uuid,
            map_uuid,
            object_type: object_type.name.clone(),
            variables,
        })
    }

    pub fn uuid(&self) -> &ObjectId {
        &self.uuid
    }

    pub fn map_uuid(&self) -> &MapId {
        &self.map_uuid
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn is_point_of_interest(&self) -> bool {
        self.object_type == POINT_OF_INTEREST
    }

    pub fn location(&self) -> Option<&Transform> {
        self.value("location").and_then(Value::as_transform)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.value("name").and_then(Value::as_str)
    }
}

/// Parse a full snapshot of one map's object collection. Documents with an
/// unknown type or missing variables are dropped whole.
pub fn parse_object_snapshot(
    map_uuid: &MapId,
    snapshot: &JsonValue,
    types: &BTreeMap<String, WorldObjectType>,
) -> (BTreeMap<ObjectId, WorldObject>, Vec<(String, ObjectFormatError)>) {
    let mut objects = BTreeMap::new();
    let mut dropped = Vec::new();
    let Some(children) = snapshot.as_object() else {
        return (objects, dropped);
    };
    for (key, raw) in children {
        let parsed = raw
            .get("type")
            .filter(|value| !value.is_null())
            .map(wire_text)
            .ok_or(ObjectFormatError::MissingType)
            .and_then(|type_name| {
                types
                    .get(&type_name)
                    .ok_or(ObjectFormatError::UnknownType(type_name))
            })
            .and_then(|object_type| {
                WorldObject::from_wire(
                    ObjectId::from_string(key.as_str()),
                    map_uuid.clone(),
                    object_type,
                    raw,
                )
            });
        match parsed {
            Ok(object) => {
                objects.insert(object.uuid.clone(), object);
            }
            Err(error) => dropped.push((key.clone(), error)),
        }
    }
    (objects, dropped)
}

/// The map the robot is localized in, with its surveyed poses.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub uuid: MapId,
    pub name: String,
    pub custom_transforms: Vec<Transform>,
    pub smoothed_transforms: Vec<Transform>,
}

impl World {
    pub fn new(uuid: impl Into<MapId>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            custom_transforms: Vec::new(),
            smoothed_transforms: Vec::new(),
        }
    }

    /// Custom transforms when any were recorded, otherwise the smoothed path.
    pub fn waypoints(&self) -> &[Transform] {
        if self.custom_transforms.is_empty() {
            &self.smoothed_transforms
        } else {
            &self.custom_transforms
        }
    }
}

/// Keys of the fixed world state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldStateKey {
    Location,
    Map,
    BatteryLow,
    BatteryCritical,
    Name,
    ExecutiveMode,
}

impl WorldStateKey {
    pub const ALL: [WorldStateKey; 6] = [
        Self::Location,
        Self::Map,
        Self::BatteryLow,
        Self::BatteryCritical,
        Self::Name,
        Self::ExecutiveMode,
    ];

    pub fn variable_type(self) -> VariableType {
        match self {
            Self::Location => VariableType::Transform,
            Self::Map => VariableType::MapRef,
            Self::BatteryLow | Self::BatteryCritical => VariableType::Bool,
            Self::Name => VariableType::Text,
            Self::ExecutiveMode => VariableType::ExecutiveMode,
        }
    }
}

/// One tick's snapshot of pose, map, battery, mode and objects.
///
/// The object set is an immutable snapshot shared with the live store; the
/// live store replaces it wholesale and never mutates it in place.
#[derive(Debug, Clone)]
pub struct WorldState {
    pub world: Arc<World>,
    pub location: Transform,
    pub battery_low: bool,
    pub battery_critical: bool,
    pub robot_name: String,
    pub mode: ExecutiveMode,
    pub objects: Arc<BTreeMap<ObjectId, WorldObject>>,
    /// Wall clock of the tick that built this snapshot, in milliseconds.
    pub timestamp_ms: i64,
}

impl WorldState {
    pub fn map_uuid(&self) -> &MapId {
        &self.world.uuid
    }

    pub fn state(&self, key: WorldStateKey) -> Value {
        match key {
            WorldStateKey::Location => Value::Transform(self.location),
            WorldStateKey::Map => Value::Text(self.world.uuid.to_string()),
            WorldStateKey::BatteryLow => Value::Bool(self.battery_low),
            WorldStateKey::BatteryCritical => Value::Bool(self.battery_critical),
            WorldStateKey::Name => Value::Text(self.robot_name.clone()),
            WorldStateKey::ExecutiveMode => Value::ExecutiveMode(self.mode),
        }
    }

    pub fn object(&self, uuid: &str) -> Option<&WorldObject> {
        self.objects.get(&ObjectId::from_string(uuid))
    }

    pub fn points_of_interest(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects
            .values()
            .filter(|object| object.is_point_of_interest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn poi(name: &str, x: f64) -> JsonValue {
        json!({
            "type": POINT_OF_INTEREST,
            "variables": {"location": {"px": x, "py": 0.0}, "name": name},
        })
    }

    #[test]
    fn snapshot_keeps_only_complete_objects() {
        let snapshot = json!({
            "kitchen": poi("kitchen", 1.0),
            "hall": {"type": POINT_OF_INTEREST, "variables": {"name": "hall"}},
            "chair": {"type": "furniture", "variables": {}},
            "junk": 5,
        });
        let map = MapId::from_string("map-1");
        let (objects, dropped) = parse_object_snapshot(&map, &snapshot, &default_object_types());

        assert_eq!(objects.len(), 1);
        let kitchen = &objects[&ObjectId::from_string("kitchen")];
        assert_eq!(kitchen.display_name(), Some("kitchen"));
        assert_eq!(kitchen.location().map(|tf| tf.px), Some(1.0));
        assert_eq!(kitchen.map_uuid(), &map);

        assert_eq!(dropped.len(), 3);
        assert!(dropped.contains(&(
            "hall".to_owned(),
            ObjectFormatError::MissingVariable("location".to_owned())
        )));
        assert!(dropped.contains(&(
            "chair".to_owned(),
            ObjectFormatError::UnknownType("furniture".to_owned())
        )));
        assert!(dropped.contains(&("junk".to_owned(), ObjectFormatError::MissingType)));
    }

    #[test]
    fn non_map_snapshot_is_empty() {
        let (objects, dropped) = parse_object_snapshot(
            &MapId::from_string("map-1"),
            &JsonValue::Null,
            &default_object_types(),
        );
        assert!(objects.is_empty());
        assert!(dropped.is_empty());
    }

    #[test]
    fn world_state_table_matches_declared_types() {
        let state = WorldState {
            world: Arc::new(World::new("map-1", "home")),
            location: Transform::at(1.0, 2.0),
            battery_low: true,
            battery_critical: false,
            robot_name: "rosie".to_owned(),
            mode: ExecutiveMode::RandomDriver,
            objects: Arc::new(BTreeMap::new()),
            timestamp_ms: 0,
        };
        for key in WorldStateKey::ALL {
            assert!(key.variable_type().check(&state.state(key)), "{key:?}");
        }
        assert_eq!(state.state(WorldStateKey::Map), Value::from("map-1"));
        assert_eq!(state.state(WorldStateKey::BatteryLow), Value::Bool(true));
    }

    #[test]
    fn waypoints_prefer_custom_transforms() {
        let mut world = World::new("map-1", "home");
        world.smoothed_transforms = vec![Transform::at(1.0, 0.0)];
        assert_eq!(world.waypoints().len(), 1);
        world.custom_transforms = vec![Transform::at(2.0, 0.0), Transform::at(3.0, 0.0)];
        assert_eq!(world.waypoints().len(), 2);
    }
}
