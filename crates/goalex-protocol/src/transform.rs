//! Robot and target poses.

use serde_json::{Map as JsonMap, Value as JsonValue};

const POSITION_KEYS: [&str; 3] = ["px", "py", "pz"];
const ROTATION_KEYS: [&str; 4] = ["qx", "qy", "qz", "qw"];

/// A timestamped pose: position, rotation quaternion and capture time in
/// seconds (`-1.0` when unknown).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
    pub ts: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            px: 0.0,
            py: 0.0,
            pz: 0.0,
            qx: 0.0,
            qy: 0.0,
            qz: 0.0,
            qw: 0.0,
            ts: -1.0,
        }
    }
}

impl Transform {
    pub fn new(position: [f64; 3], rotation: [f64; 4], ts: f64) -> Self {
        Self {
            px: position[0],
            py: position[1],
            pz: position[2],
            qx: rotation[0],
            qy: rotation[1],
            qz: rotation[2],
            qw: rotation[3],
            ts,
        }
    }

    /// Identity rotation at the given planar position.
    pub fn at(x: f64, y: f64) -> Self {
        Self::new([x, y, 0.0], [0.0, 0.0, 0.0, 1.0], -1.0)
    }

    pub fn position(&self) -> [f64; 3] {
        [self.px, self.py, self.pz]
    }

    pub fn rotation(&self) -> [f64; 4] {
        [self.qx, self.qy, self.qz, self.qw]
    }

    /// Decode from the wire map. Missing or non-numeric entries take their
    /// default, and anything that is not a map decodes to the default pose.
    pub fn from_wire(raw: &JsonValue) -> Self {
        let Some(map) = raw.as_object() else {
            return Self::default();
        };
        let read = |key: &str, fallback: f64| {
            map.get(key)
                .and_then(JsonValue::as_f64)
                .unwrap_or(fallback)
        };
        let [px, py, pz] = POSITION_KEYS.map(|key| read(key, 0.0));
        let [qx, qy, qz, qw] = ROTATION_KEYS.map(|key| read(key, 0.0));
        Self {
            px,
            py,
            pz,
            qx,
            qy,
            qz,
            qw,
            ts: read("ts", -1.0),
        }
    }

    pub fn to_wire(&self) -> JsonValue {
        let mut map = JsonMap::new();
        for (key, value) in POSITION_KEYS.iter().zip(self.position()) {
            map.insert((*key).to_owned(), value.into());
        }
        for (key, value) in ROTATION_KEYS.iter().zip(self.rotation()) {
            map.insert((*key).to_owned(), value.into());
        }
        map.insert("ts".to_owned(), self.ts.into());
        JsonValue::Object(map)
    }

    /// Squared distance in the x/y plane.
    pub fn planar_distance_squared(&self, other: &Transform) -> f64 {
        let dx = self.px - other.px;
        let dy = self.py - other.py;
        dx * dx + dy * dy
    }

    pub fn planar_distance(&self, other: &Transform) -> f64 {
        self.planar_distance_squared(other).sqrt()
    }
}
