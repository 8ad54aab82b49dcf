use engine_core::logging;
use map_format::document::WORLDSPAWN;
use map_format::{Entity, Map};
use physics_rapier::{CollisionType, HullBody, PhysicsWorld};
use rapier3d::math::{Point, Vector};
use rapier3d::prelude::Real;

use crate::brush::{reconstruct_brush, remove_duplicate_points, BrushBuildConfig};
use crate::mesh::MeshBatch;

/// Classname substring rules, checked in order after the exact worldspawn match.
const CLASS_RULES: [(&str, CollisionType); 3] = [
    ("trigger_once", CollisionType::Trigger),
    ("func_physics", CollisionType::Dynamic),
    ("func_detail", CollisionType::NoCollide),
];

pub fn entity_collision_type(entity: &Entity) -> CollisionType {
    classname_collision_type(entity.classname())
}

pub fn classname_collision_type(classname: &str) -> CollisionType {
    if classname == WORLDSPAWN {
        return CollisionType::Static;
    }
    CLASS_RULES
        .iter()
        .find(|(pattern, _)| classname.contains(pattern))
        .map(|(_, collision_type)| *collision_type)
        .unwrap_or(CollisionType::Unknown)
}

/// Deduplicated hull points of one brush (or one render batch).
#[derive(Clone, Debug, PartialEq)]
pub struct MeshCollisionData {
    pub label: String,
    pub collision_type: CollisionType,
    pub points: Vec<Point<Real>>,
}

/// One entry per brush that reconstructs to a solid. No-collide brushes are kept
/// here and only dropped when bodies are built.
pub fn extract_collision_data(map: &Map, config: &BrushBuildConfig) -> Vec<MeshCollisionData> {
    let mut out = Vec::new();
    for (entity_index, entity) in map.entities.iter().enumerate() {
        let collision_type = entity_collision_type(entity);
        for (brush_index, brush) in entity.brushes.iter().enumerate() {
            let label = format!("entity {} brush {}", entity_index, brush_index);
            match reconstruct_brush(brush, config) {
                Ok(solid) => out.push(MeshCollisionData {
                    label,
                    collision_type,
                    points: solid
                        .vertices(config.epsilon)
                        .into_iter()
                        .map(Point::from)
                        .collect(),
                }),
                Err(err) => logging::debug(format!("{} has no collision: {}", label, err)),
            }
        }
    }
    out
}

/// Rebuilds a point cloud from an already triangulated batch.
pub fn collision_data_from_batch(
    batch: &MeshBatch,
    collision_type: CollisionType,
    epsilon: Real,
) -> MeshCollisionData {
    let positions: Vec<Vector<Real>> = batch
        .indices
        .iter()
        .filter_map(|index| batch.positions.get(*index as usize))
        .map(|p| Vector::from(*p))
        .collect();
    MeshCollisionData {
        label: format!("batch {}", batch.texture),
        collision_type,
        points: remove_duplicate_points(&positions, epsilon)
            .into_iter()
            .map(Point::from)
            .collect(),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapPhysicsReport {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bodies: Vec<(String, CollisionType, HullBody)>,
}

/// Inserts one convex hull body per collision entry. Entries without a physics
/// layer are skipped; hull failures are logged and skipped.
pub fn build_map_physics(world: &mut PhysicsWorld, data: &[MeshCollisionData]) -> MapPhysicsReport {
    let mut report = MapPhysicsReport::default();
    for entry in data {
        if entry.collision_type.layer().is_none() {
            logging::debug(format!(
                "{} ({}) has no physics body",
                entry.label, entry.collision_type
            ));
            report.skipped += 1;
            continue;
        }
        match world.insert_convex_hull(&entry.points, entry.collision_type) {
            Ok(body) => {
                report.created += 1;
                report
                    .bodies
                    .push((entry.label.clone(), entry.collision_type, body));
            }
            Err(err) => {
                logging::warn(format!("{} hull failed: {}", entry.label, err));
                report.failed += 1;
            }
        }
    }
    world.update_queries();
    logging::info(format!(
        "physics built: {} bodies, {} skipped, {} failed",
        report.created, report.skipped, report.failed
    ));
    report
}
