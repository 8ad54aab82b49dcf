//! Map cooking: brush solids from half-spaces, textured render batches, and convex
//! collision hulls.
#![forbid(unsafe_code)]

pub mod brush;
pub mod collision;
pub mod mesh;

pub use brush::{
    intersect_planes, polygon_normal, reconstruct_brush, reconstruct_planes,
    remove_duplicate_points, solid_volume, sort_polygon_vertices, BrushBuildConfig, BrushSolid,
    FacePolygon,
};
pub use collision::{
    build_map_physics, classname_collision_type, collision_data_from_batch,
    entity_collision_type, extract_collision_data, MapPhysicsReport, MeshCollisionData,
};
pub use mesh::{
    build_map_model, compute_uv, draw_model, upload_model, MapModel, MeshBatch, MeshBuildConfig,
    ModelStats, RenderBackend, TextureProjection, UploadedModel,
};

#[cfg(test)]
pub(crate) mod test_maps {
    /// Axis-aligned brush in authoring coordinates, faces wound the way TrenchBroom writes them.
    pub fn box_brush(min: [i32; 3], max: [i32; 3], texture: &str) -> String {
        let [x0, y0, z0] = min;
        let [x1, y1, z1] = max;
        let faces = [
            [[x0, y0, z0], [x0, y0 + 1, z0], [x0, y0, z0 + 1]],
            [[x0, y0, z0], [x0, y0, z0 + 1], [x0 + 1, y0, z0]],
            [[x0, y0, z0], [x0 + 1, y0, z0], [x0, y0 + 1, z0]],
            [[x1, y1, z1], [x1, y1 + 1, z1], [x1 + 1, y1, z1]],
            [[x1, y1, z1], [x1 + 1, y1, z1], [x1, y1, z1 + 1]],
            [[x1, y1, z1], [x1, y1, z1 + 1], [x1, y1 + 1, z1]],
        ];
        let mut text = String::from("{\n");
        for points in faces {
            for [x, y, z] in points {
                text.push_str(&format!("( {} {} {} ) ", x, y, z));
            }
            text.push_str(&format!(
                "{} [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1\n",
                texture
            ));
        }
        text.push_str("}\n");
        text
    }

    pub fn map_with(entities: &[(&str, Vec<String>)]) -> String {
        let mut text = String::from("// Game: Quake\n// Format: Valve\n");
        for (classname, brushes) in entities {
            text.push_str(&format!("{{\n\"classname\" \"{}\"\n", classname));
            for brush in brushes {
                text.push_str(brush);
            }
            text.push_str("}\n");
        }
        text
    }
}
