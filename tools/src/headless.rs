use map_cook::{MeshBatch, RenderBackend};
use rapier3d::math::Isometry;
use rapier3d::prelude::Real;

/// What a GPU would have received for one batch.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedMesh {
    pub texture: String,
    pub vertices: usize,
    pub triangles: usize,
}

/// Render backend that keeps counts instead of GPU buffers.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    pub meshes: Vec<RecordedMesh>,
    pub draw_calls: usize,
}

impl RenderBackend for HeadlessBackend {
    type Mesh = usize;

    fn upload(&mut self, batch: &MeshBatch) -> Result<usize, String> {
        if batch.positions.len() != batch.uvs.len() || batch.positions.len() != batch.normals.len()
        {
            return Err(format!(
                "batch '{}' has mismatched attribute arrays",
                batch.texture
            ));
        }
        if batch
            .indices
            .iter()
            .any(|index| *index as usize >= batch.positions.len())
        {
            return Err(format!("batch '{}' indexes past its vertices", batch.texture));
        }
        self.meshes.push(RecordedMesh {
            texture: batch.texture.clone(),
            vertices: batch.vertex_count(),
            triangles: batch.triangle_count(),
        });
        Ok(self.meshes.len() - 1)
    }

    fn draw(&mut self, _mesh: &usize, _transform: &Isometry<Real>) {
        self.draw_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_indices() {
        let mut backend = HeadlessBackend::default();
        let batch = MeshBatch {
            texture: "stone".to_string(),
            positions: vec![[0.0; 3]; 3],
            normals: vec![[0.0, 1.0, 0.0]; 3],
            uvs: vec![[0.0; 2]; 3],
            indices: vec![0, 1, 3],
            ..MeshBatch::default()
        };
        assert!(backend.upload(&batch).is_err());

        let batch = MeshBatch {
            indices: vec![0, 1, 2],
            ..batch
        };
        assert_eq!(backend.upload(&batch), Ok(0));
        backend.draw(&0, &Isometry::identity());
        assert_eq!(backend.meshes[0].triangles, 1);
        assert_eq!(backend.draw_calls, 1);
    }
}
