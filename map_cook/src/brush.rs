use map_format::{Brush, Plane};
use rapier3d::math::Vector;
use rapier3d::prelude::Real;

/// Tolerances for turning half-spaces into polygons.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushBuildConfig {
    /// Governs both degenerate-intersection rejection and vertex merging. Tune it
    /// against the map's unit scale.
    pub epsilon: Real,
}

impl Default for BrushBuildConfig {
    fn default() -> Self {
        Self { epsilon: 1.0e-3 }
    }
}

/// One reconstructed face: a convex loop wound counter-clockwise around `normal`.
#[derive(Clone, Debug, PartialEq)]
pub struct FacePolygon {
    /// Index into the brush's face list.
    pub face: usize,
    pub normal: Vector<Real>,
    pub vertices: Vec<Vector<Real>>,
}

impl FacePolygon {
    pub fn triangle_count(&self) -> usize {
        self.vertices.len().saturating_sub(2)
    }

    /// Fan from the first vertex.
    pub fn fan(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        (1..self.vertices.len().saturating_sub(1)).map(|t| [0, t, t + 1])
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BrushSolid {
    pub polygons: Vec<FacePolygon>,
    /// Faces that ended with fewer than three vertices.
    pub dropped_faces: Vec<usize>,
}

impl BrushSolid {
    pub fn triangle_count(&self) -> usize {
        self.polygons.iter().map(FacePolygon::triangle_count).sum()
    }

    /// Corner points shared between faces, merged once.
    pub fn vertices(&self, epsilon: Real) -> Vec<Vector<Real>> {
        let all: Vec<Vector<Real>> = self
            .polygons
            .iter()
            .flat_map(|polygon| polygon.vertices.iter().copied())
            .collect();
        remove_duplicate_points(&all, epsilon)
    }
}

#[derive(Clone, Copy, Debug)]
struct HalfSpace {
    normal: Vector<Real>,
    d: Real,
}

impl HalfSpace {
    fn distance(&self, point: &Vector<Real>) -> Real {
        self.normal.dot(point) - self.d
    }
}

impl From<&Plane> for HalfSpace {
    fn from(plane: &Plane) -> Self {
        Self {
            normal: Vector::from(plane.normal),
            d: plane.d,
        }
    }
}

/// Point shared by three planes, or `None` when they have no unique intersection.
pub fn intersect_planes(a: &Plane, b: &Plane, c: &Plane, epsilon: Real) -> Option<Vector<Real>> {
    let (a, b, c) = (HalfSpace::from(a), HalfSpace::from(b), HalfSpace::from(c));
    let jk = b.normal.cross(&c.normal);
    let det = a.normal.dot(&jk);
    if det.abs() < epsilon {
        return None;
    }
    let ki = c.normal.cross(&a.normal);
    let ij = a.normal.cross(&b.normal);
    Some((jk * a.d + ki * b.d + ij * c.d) / det)
}

/// Keeps the first of every group of points closer than `epsilon`.
pub fn remove_duplicate_points(points: &[Vector<Real>], epsilon: Real) -> Vec<Vector<Real>> {
    let threshold = epsilon * epsilon;
    let mut unique: Vec<Vector<Real>> = Vec::with_capacity(points.len());
    for point in points {
        if unique
            .iter()
            .all(|kept| (kept - point).norm_squared() >= threshold)
        {
            unique.push(*point);
        }
    }
    unique
}

/// Newell normal of a loop; its direction follows the winding.
pub fn polygon_normal(points: &[Vector<Real>]) -> Vector<Real> {
    let mut normal = Vector::zeros();
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        normal.x += (a.y - b.y) * (a.z + b.z);
        normal.y += (a.z - b.z) * (a.x + b.x);
        normal.z += (a.x - b.x) * (a.y + b.y);
    }
    normal
}

/// Orders coplanar points by angle around their centroid so they wind
/// counter-clockwise when viewed from the side `normal` points to.
pub fn sort_polygon_vertices(points: &mut [Vector<Real>], normal: &Vector<Real>) {
    if points.len() < 3 {
        return;
    }
    let centroid = points
        .iter()
        .fold(Vector::zeros(), |acc: Vector<Real>, p| acc + p)
        / points.len() as Real;
    let arbitrary = if normal.x.abs() > 0.9 {
        Vector::y()
    } else {
        Vector::x()
    };
    let u = normal.cross(&arbitrary).normalize();
    let v = normal.cross(&u);
    let angle = |p: &Vector<Real>| {
        let offset = p - centroid;
        offset.dot(&v).atan2(offset.dot(&u))
    };
    points.sort_by(|a, b| angle(a).total_cmp(&angle(b)));
    if polygon_normal(points).dot(normal) < 0.0 {
        points.reverse();
    }
}

/// Brute-force plane-triplet reconstruction. Faces without a bounded region are
/// reported in `dropped_faces`.
pub fn reconstruct_planes(planes: &[Plane], config: &BrushBuildConfig) -> BrushSolid {
    let epsilon = config.epsilon;
    let spaces: Vec<HalfSpace> = planes.iter().map(HalfSpace::from).collect();
    let mut loops: Vec<Vec<Vector<Real>>> = vec![Vec::new(); planes.len()];

    for i in 0..planes.len() {
        for j in i + 1..planes.len() {
            for k in j + 1..planes.len() {
                let Some(point) = intersect_planes(&planes[i], &planes[j], &planes[k], epsilon)
                else {
                    continue;
                };
                if spaces.iter().any(|space| space.distance(&point) > epsilon) {
                    continue;
                }
                loops[i].push(point);
                loops[j].push(point);
                loops[k].push(point);
            }
        }
    }

    let mut solid = BrushSolid::default();
    for (face, points) in loops.into_iter().enumerate() {
        let mut vertices = remove_duplicate_points(&points, epsilon);
        if vertices.len() < 3 {
            solid.dropped_faces.push(face);
            continue;
        }
        let normal = spaces[face].normal;
        sort_polygon_vertices(&mut vertices, &normal);
        solid.polygons.push(FacePolygon {
            face,
            normal,
            vertices,
        });
    }
    solid
}

pub fn reconstruct_brush(brush: &Brush, config: &BrushBuildConfig) -> Result<BrushSolid, String> {
    if brush.is_degenerate() {
        return Err(format!(
            "brush has {} faces, at least 3 are required",
            brush.faces.len()
        ));
    }
    let planes: Vec<Plane> = brush.faces.iter().map(|face| face.plane()).collect();
    let solid = reconstruct_planes(&planes, config);
    if solid.polygons.is_empty() {
        return Err("brush does not bound a solid".to_string());
    }
    Ok(solid)
}

/// Divergence-theorem volume over the fan triangulation, taken about the first
/// vertex to keep far-from-origin brushes precise.
pub fn solid_volume(solid: &BrushSolid) -> Real {
    let Some(origin) = solid
        .polygons
        .first()
        .and_then(|polygon| polygon.vertices.first().copied())
    else {
        return 0.0;
    };
    let mut volume = 0.0;
    for polygon in &solid.polygons {
        for [a, b, c] in polygon.fan() {
            let (a, b, c) = (
                polygon.vertices[a] - origin,
                polygon.vertices[b] - origin,
                polygon.vertices[c] - origin,
            );
            volume += a.dot(&b.cross(&c));
        }
    }
    volume / 6.0
}
