use std::collections::BTreeMap;

use engine_core::logging;
use engine_core::{Texture, TextureManager, TextureSource};
use map_format::{Face, Map};
use physics_rapier::CollisionType;
use rapier3d::math::{Isometry, Vector};
use rapier3d::prelude::Real;

use crate::brush::{reconstruct_brush, BrushBuildConfig, FacePolygon};
use crate::collision::entity_collision_type;

/// Planar texture projection parameters of one face, in engine space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureProjection {
    pub u_axis: Vector<Real>,
    pub u_offset: Real,
    pub v_axis: Vector<Real>,
    pub v_offset: Real,
    /// Degrees.
    pub rotation: Real,
    pub scale: [Real; 2],
}

impl From<&Face> for TextureProjection {
    fn from(face: &Face) -> Self {
        Self {
            u_axis: Vector::from(face.u_axis),
            u_offset: face.u_offset,
            v_axis: Vector::from(face.v_axis),
            v_offset: face.v_offset,
            rotation: face.rotation,
            scale: face.scale,
        }
    }
}

/// Texture coordinate of `position` in texture-repeat units.
///
/// Offsets are subtracted after rotation, and both axes are mirrored (`1 - x`) to match
/// how Valve 220 textures appear in the editor.
pub fn compute_uv(
    position: &Vector<Real>,
    projection: &TextureProjection,
    width: u32,
    height: u32,
) -> [Real; 2] {
    let scale_u = nonzero(projection.scale[0]);
    let scale_v = nonzero(projection.scale[1]);
    let s = position.dot(&projection.u_axis) / scale_u;
    let t = position.dot(&projection.v_axis) / scale_v;
    let (sin, cos) = projection.rotation.to_radians().sin_cos();
    let rotated_s = s * cos - t * sin;
    let rotated_t = s * sin + t * cos;
    [
        1.0 - (rotated_s - projection.u_offset) / width.max(1) as Real,
        1.0 - (rotated_t - projection.v_offset) / height.max(1) as Real,
    ]
}

fn nonzero(scale: Real) -> Real {
    if scale == 0.0 {
        1.0
    } else {
        scale
    }
}

/// Flat triangle arrays for one texture.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshBatch {
    pub texture: String,
    pub width: u32,
    pub height: u32,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl MeshBatch {
    pub fn new(texture: &Texture) -> Self {
        Self {
            texture: texture.name.clone(),
            width: texture.width,
            height: texture.height,
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Appends a convex polygon as a triangle fan.
    pub fn push_polygon(&mut self, polygon: &FacePolygon, projection: &TextureProjection) {
        if polygon.vertices.len() < 3 {
            return;
        }
        let base = self.positions.len() as u32;
        let normal = [polygon.normal.x, polygon.normal.y, polygon.normal.z];
        for vertex in &polygon.vertices {
            self.positions.push([vertex.x, vertex.y, vertex.z]);
            self.normals.push(normal);
            self.uvs
                .push(compute_uv(vertex, projection, self.width, self.height));
        }
        for [a, b, c] in polygon.fan() {
            self.indices
                .extend_from_slice(&[base + a as u32, base + b as u32, base + c as u32]);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshBuildConfig {
    pub brush: BrushBuildConfig,
    /// Trigger volumes are invisible in game.
    pub skip_triggers: bool,
}

impl Default for MeshBuildConfig {
    fn default() -> Self {
        Self {
            brush: BrushBuildConfig::default(),
            skip_triggers: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub brushes: usize,
    pub skipped_brushes: usize,
    pub hidden_brushes: usize,
    pub dropped_faces: usize,
    pub triangles: usize,
}

/// Render batches keyed by the texture they resolved to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapModel {
    pub batches: BTreeMap<String, MeshBatch>,
    pub stats: ModelStats,
}

impl MapModel {
    pub fn batch(&self, texture: &str) -> Option<&MeshBatch> {
        self.batches.get(texture)
    }

    pub fn triangle_count(&self) -> usize {
        self.batches.values().map(MeshBatch::triangle_count).sum()
    }
}

pub fn build_map_model<S: TextureSource>(
    map: &Map,
    textures: &mut TextureManager<S>,
    config: &MeshBuildConfig,
) -> MapModel {
    let mut model = MapModel::default();
    for (entity_index, entity) in map.entities.iter().enumerate() {
        if config.skip_triggers && entity_collision_type(entity) == CollisionType::Trigger {
            model.stats.hidden_brushes += entity.brushes.len();
            continue;
        }
        for (brush_index, brush) in entity.brushes.iter().enumerate() {
            let solid = match reconstruct_brush(brush, &config.brush) {
                Ok(solid) => solid,
                Err(err) => {
                    logging::warn(format!(
                        "entity {} brush {} skipped: {}",
                        entity_index, brush_index, err
                    ));
                    model.stats.skipped_brushes += 1;
                    continue;
                }
            };
            for face in &solid.dropped_faces {
                logging::debug(format!(
                    "entity {} brush {} face {} has no area",
                    entity_index, brush_index, face
                ));
            }
            model.stats.brushes += 1;
            model.stats.dropped_faces += solid.dropped_faces.len();
            for polygon in &solid.polygons {
                let face = &brush.faces[polygon.face];
                let texture = textures.load_by_name(&face.texture);
                model
                    .batches
                    .entry(texture.name.clone())
                    .or_insert_with(|| MeshBatch::new(&texture))
                    .push_polygon(polygon, &TextureProjection::from(face));
            }
        }
    }
    model.batches.retain(|_, batch| !batch.is_empty());
    model.stats.triangles = model.triangle_count();
    logging::info(format!(
        "model built: {} batches, {} triangles from {} brushes ({} skipped)",
        model.batches.len(),
        model.stats.triangles,
        model.stats.brushes,
        model.stats.skipped_brushes
    ));
    model
}

/// GPU side of the renderer. The core only hands over finished batches.
pub trait RenderBackend {
    type Mesh;

    fn upload(&mut self, batch: &MeshBatch) -> Result<Self::Mesh, String>;
    fn draw(&mut self, mesh: &Self::Mesh, transform: &Isometry<Real>);
}

pub struct UploadedModel<M> {
    pub meshes: Vec<(String, M)>,
}

/// Uploads every batch and drops the CPU copies.
pub fn upload_model<B: RenderBackend>(
    backend: &mut B,
    model: MapModel,
) -> Result<UploadedModel<B::Mesh>, String> {
    let mut meshes = Vec::with_capacity(model.batches.len());
    for (name, batch) in model.batches {
        let mesh = backend
            .upload(&batch)
            .map_err(|err| format!("upload of '{}' failed: {}", name, err))?;
        meshes.push((name, mesh));
    }
    Ok(UploadedModel { meshes })
}

pub fn draw_model<B: RenderBackend>(
    backend: &mut B,
    model: &UploadedModel<B::Mesh>,
    transform: &Isometry<Real>,
) {
    for (_, mesh) in &model.meshes {
        backend.draw(mesh, transform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_maps::{box_brush, map_with};
    use map_format::parse_map;
    use std::sync::Arc;

    struct Library(Vec<(&'static str, u32, u32)>);

    impl TextureSource for Library {
        fn load(&self, name: &str) -> Result<Texture, String> {
            let (_, width, height) = self
                .0
                .iter()
                .find(|(known, _, _)| *known == name)
                .ok_or_else(|| format!("no texture named {}", name))?;
            Ok(Texture {
                name: name.to_string(),
                width: *width,
                height: *height,
                rgba: Arc::new(vec![0; (*width * *height * 4) as usize]),
            })
        }
    }

    fn projection(u: [Real; 3], v: [Real; 3]) -> TextureProjection {
        TextureProjection {
            u_axis: Vector::from(u),
            u_offset: 0.0,
            v_axis: Vector::from(v),
            v_offset: 0.0,
            rotation: 0.0,
            scale: [1.0, 1.0],
        }
    }

    #[test]
    fn uv_projects_scales_and_offsets() {
        let point = Vector::new(32.0, 0.0, 16.0);
        let mut proj = projection([1.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        assert_eq!(compute_uv(&point, &proj, 64, 64), [0.5, 0.75]);

        proj.scale = [2.0, 0.0];
        proj.u_offset = 16.0;
        assert_eq!(compute_uv(&point, &proj, 64, 64), [1.0, 0.75]);

        proj.scale = [1.0, 1.0];
        proj.u_offset = 0.0;
        proj.rotation = 90.0;
        let [u, v] = compute_uv(&point, &proj, 64, 64);
        assert!((u - 1.25).abs() < 1.0e-5);
        assert!((v - 0.5).abs() < 1.0e-5);
    }

    #[test]
    fn uv_offset_shifts_against_the_axis_and_mirrors() {
        let mut proj = projection([1.0, 0.0, 0.0], [0.0, 0.0, 1.0]);
        proj.u_offset = 8.0;
        let us: Vec<Real> = [0.0, 16.0, 32.0]
            .iter()
            .map(|x| compute_uv(&Vector::new(*x, 0.0, 0.0), &proj, 64, 64)[0])
            .collect();
        assert_eq!(us, vec![1.125, 0.875, 0.625]);
        // u falls as the position moves along the axis.
        assert!(us[0] > us[1] && us[1] > us[2]);
    }

    #[test]
    fn uv_is_deterministic() {
        let mut proj = projection([0.0, 0.6, 0.8], [1.0, 0.0, 0.0]);
        proj.rotation = 33.0;
        proj.scale = [0.37, 1.9];
        proj.v_offset = 7.5;
        let point = Vector::new(-311.25, 17.5, 1022.125);
        let first = compute_uv(&point, &proj, 128, 32);
        let second = compute_uv(&point, &proj, 128, 32);
        assert_eq!(first[0].to_bits(), second[0].to_bits());
        assert_eq!(first[1].to_bits(), second[1].to_bits());
    }

    #[test]
    fn batches_by_texture_with_fan_indices() {
        let text = map_with(&[(
            "worldspawn",
            vec![
                box_brush([0, 0, 0], [64, 64, 64], "stone"),
                box_brush([128, 0, 0], [192, 64, 64], "metal"),
            ],
        )]);
        let map = parse_map(&text).map;
        let mut textures = TextureManager::new(Library(vec![("stone", 64, 64), ("metal", 32, 128)]));
        let model = build_map_model(&map, &mut textures, &MeshBuildConfig::default());

        assert_eq!(
            model.batches.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["metal", "stone"]
        );
        let stone = model.batch("stone").expect("stone batch");
        assert_eq!(stone.vertex_count(), 24);
        assert_eq!(stone.triangle_count(), 12);
        assert_eq!(&stone.indices[..6], &[0, 1, 2, 0, 2, 3]);
        assert_eq!(stone.uvs.len(), stone.positions.len());
        assert_eq!(model.batch("metal").map(|b| b.height), Some(128));
        assert_eq!(model.stats.brushes, 2);
        assert_eq!(model.stats.triangles, 24);
    }

    #[test]
    fn missing_texture_lands_in_default_batch() {
        let text = map_with(&[(
            "worldspawn",
            vec![box_brush([0, 0, 0], [32, 32, 32], "nonexistent")],
        )]);
        let map = parse_map(&text).map;
        let mut textures = TextureManager::new(Library(Vec::new()));
        let model = build_map_model(&map, &mut textures, &MeshBuildConfig::default());
        assert_eq!(
            model.batches.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["default"]
        );
        assert_eq!(model.triangle_count(), 12);
        assert!(textures.is_missing("nonexistent"));
    }

    #[test]
    fn degenerate_and_trigger_brushes_are_not_drawn() {
        let two_faces = "{\n\
            ( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) stone [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1\n\
            ( 8 8 8 ) ( 8 8 9 ) ( 8 9 8 ) stone [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1\n}\n"
            .to_string();
        let text = map_with(&[
            ("worldspawn", vec![two_faces]),
            ("trigger_once", vec![box_brush([0, 0, 0], [32, 32, 32], "trigger")]),
        ]);
        let map = parse_map(&text).map;
        let mut textures = TextureManager::new(Library(vec![("stone", 64, 64)]));
        let model = build_map_model(&map, &mut textures, &MeshBuildConfig::default());
        assert!(model.batches.is_empty());
        assert_eq!(model.stats.skipped_brushes, 1);
        assert_eq!(model.stats.hidden_brushes, 1);

        let config = MeshBuildConfig {
            skip_triggers: false,
            ..MeshBuildConfig::default()
        };
        let model = build_map_model(&map, &mut textures, &config);
        assert_eq!(model.triangle_count(), 12);
    }

    #[derive(Default)]
    struct Recorder {
        uploads: Vec<usize>,
        draws: usize,
    }

    impl RenderBackend for Recorder {
        type Mesh = usize;

        fn upload(&mut self, batch: &MeshBatch) -> Result<usize, String> {
            self.uploads.push(batch.triangle_count());
            Ok(self.uploads.len() - 1)
        }

        fn draw(&mut self, _mesh: &usize, _transform: &Isometry<Real>) {
            self.draws += 1;
        }
    }

    #[test]
    fn upload_hands_every_batch_to_the_backend() {
        let text = map_with(&[(
            "worldspawn",
            vec![
                box_brush([0, 0, 0], [64, 64, 64], "stone"),
                box_brush([128, 0, 0], [192, 64, 64], "metal"),
            ],
        )]);
        let map = parse_map(&text).map;
        let mut textures = TextureManager::new(Library(Vec::new()));
        let model = build_map_model(&map, &mut textures, &MeshBuildConfig::default());
        let mut backend = Recorder::default();
        let uploaded = upload_model(&mut backend, model).expect("upload");
        draw_model(&mut backend, &uploaded, &Isometry::identity());
        assert_eq!(backend.uploads, vec![24]);
        assert_eq!(backend.draws, 1);
    }
}
