use std::collections::BTreeMap;

use crate::coords::{dot, parse_vec3, to_engine, Vec3};

pub const WORLDSPAWN: &str = "worldspawn";
pub const PLAYER_START: &str = "info_player_start";

/// `dot(normal, X) = d`; points with `dot(normal, X) <= d` are inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn distance(&self, point: Vec3) -> f32 {
        dot(self.normal, point) - self.d
    }
}

/// One half-space of a brush. Spatial fields are already in engine (Y-up) space.
#[derive(Clone, Debug, PartialEq)]
pub struct Face {
    /// Plane samples as written in the file; they do not bound the face.
    pub points: [Vec3; 3],
    pub texture: String,
    pub u_axis: Vec3,
    pub u_offset: f32,
    pub v_axis: Vec3,
    pub v_offset: f32,
    pub rotation: f32,
    pub scale: [f32; 2],
    /// Unit outward normal.
    pub normal: Vec3,
}

impl Face {
    pub fn plane(&self) -> Plane {
        Plane {
            normal: self.normal,
            d: dot(self.normal, self.points[0]),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Brush {
    pub faces: Vec<Face>,
}

impl Brush {
    /// Fewer than three faces cannot bound a solid.
    pub fn is_degenerate(&self) -> bool {
        self.faces.len() < 3
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entity {
    pub properties: BTreeMap<String, String>,
    pub brushes: Vec<Brush>,
}

impl Entity {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn classname(&self) -> &str {
        self.get("classname").unwrap_or("")
    }

    /// The `origin` property converted to engine space.
    pub fn origin(&self) -> Option<Vec3> {
        self.get("origin").and_then(parse_vec3).map(to_engine)
    }

    pub fn angle(&self) -> Option<f32> {
        self.get("angle")
            .and_then(|value| value.trim().parse::<f32>().ok())
            .filter(|angle| angle.is_finite())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerStart {
    pub position: Vec3,
    /// Yaw in degrees, when the entity carries an `angle` key.
    pub angle: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Map {
    pub entities: Vec<Entity>,
}

impl Map {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn worldspawn(&self) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|entity| entity.classname() == WORLDSPAWN)
    }

    pub fn entities_of_class<'a>(&'a self, classname: &'a str) -> impl Iterator<Item = &'a Entity> {
        self.entities
            .iter()
            .filter(move |entity| entity.classname() == classname)
    }

    /// Every `info_player_start` with a readable origin, in file order.
    pub fn player_starts(&self) -> Vec<PlayerStart> {
        self.entities_of_class(PLAYER_START)
            .filter_map(|entity| {
                entity.origin().map(|position| PlayerStart {
                    position,
                    angle: entity.angle(),
                })
            })
            .collect()
    }

    pub fn brush_count(&self) -> usize {
        self.entities.iter().map(|entity| entity.brushes.len()).sum()
    }

    pub fn face_count(&self) -> usize {
        self.entities
            .iter()
            .flat_map(|entity| entity.brushes.iter())
            .map(|brush| brush.faces.len())
            .sum()
    }
}
