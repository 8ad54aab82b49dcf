//! Conversion from TrenchBroom's Z-up authoring space to the engine's Y-up space.
//!
//! The conversion is an axis swap `(x, y, z) -> (x, z, y)`. It is its own inverse and
//! preserves dot products, so plane equations survive it unchanged.

pub type Vec3 = [f32; 3];

pub fn to_engine(v: Vec3) -> Vec3 {
    [v[0], v[2], v[1]]
}

pub fn parse_vec3(text: &str) -> Option<Vec3> {
    let mut parts = text.split_whitespace();
    let x = parts.next()?.parse::<f32>().ok()?;
    let y = parts.next()?.parse::<f32>().ok()?;
    let z = parts.next()?.parse::<f32>().ok()?;
    if parts.next().is_some() || !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }
    Some([x, y, z])
}

pub(crate) fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn normalize(v: Vec3) -> Option<Vec3> {
    let len = dot(v, v).sqrt();
    if !len.is_finite() || len <= f32::EPSILON {
        return None;
    }
    Some([v[0] / len, v[1] / len, v[2] / len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_moves_up_axis() {
        assert_eq!(to_engine([1.0, 2.0, 3.0]), [1.0, 3.0, 2.0]);
        assert_eq!(to_engine(to_engine([4.0, -5.0, 6.0])), [4.0, -5.0, 6.0]);
    }

    #[test]
    fn swap_preserves_dot_product() {
        let a = [0.3, -1.2, 4.0];
        let b = [2.0, 0.5, -0.25];
        assert_eq!(dot(a, b), dot(to_engine(a), to_engine(b)));
    }

    #[test]
    fn parse_vec3_rejects_partial_input() {
        assert_eq!(parse_vec3("1 2.5 -3"), Some([1.0, 2.5, -3.0]));
        assert_eq!(parse_vec3("1 2"), None);
        assert_eq!(parse_vec3("1 2 3 4"), None);
        assert_eq!(parse_vec3("1 x 3"), None);
        assert_eq!(parse_vec3("nan 0 0"), None);
    }
}
