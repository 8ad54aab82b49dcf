//! Camera derivation from player pose. Output only; nothing here feeds back into movement.
#![forbid(unsafe_code)]

use rapier3d::math::Vector;
use rapier3d::prelude::Real;

pub const DEFAULT_EYE_HEIGHT: Real = 16.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    pub eye: Vector<Real>,
    pub target: Vector<Real>,
    pub up: Vector<Real>,
    /// Degrees.
    pub yaw: Real,
    /// Degrees.
    pub pitch: Real,
}

impl CameraPose {
    pub fn forward(&self) -> Vector<Real> {
        self.target - self.eye
    }
}

/// Unit view direction for yaw/pitch in degrees.
pub fn look_direction(yaw: Real, pitch: Real) -> Vector<Real> {
    let (sin_yaw, cos_yaw) = yaw.to_radians().sin_cos();
    let (sin_pitch, cos_pitch) = pitch.to_radians().sin_cos();
    Vector::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw)
}

#[derive(Clone, Copy, Debug)]
pub struct PlayerCamera {
    eye_height: Real,
}

impl Default for PlayerCamera {
    fn default() -> Self {
        Self::new(DEFAULT_EYE_HEIGHT)
    }
}

impl PlayerCamera {
    pub fn new(eye_height: Real) -> Self {
        Self { eye_height }
    }

    pub fn eye_height(&self) -> Real {
        self.eye_height
    }

    pub fn pose(&self, position: Vector<Real>, yaw: Real, pitch: Real) -> CameraPose {
        let eye = position + Vector::new(0.0, self.eye_height, 0.0);
        CameraPose {
            eye,
            target: eye + look_direction(yaw, pitch),
            up: Vector::y(),
            yaw,
            pitch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_sits_above_position() {
        let camera = PlayerCamera::new(16.0);
        let pose = camera.pose(Vector::new(1.0, 28.0, -3.0), 0.0, 0.0);
        assert_eq!(pose.eye, Vector::new(1.0, 44.0, -3.0));
        assert!((pose.forward() - Vector::x()).norm() < 1.0e-6);
    }

    #[test]
    fn pitch_tilts_target() {
        let camera = PlayerCamera::default();
        let up = camera.pose(Vector::zeros(), 90.0, 45.0);
        let dir = up.forward();
        assert!((dir.norm() - 1.0).abs() < 1.0e-5);
        assert!(dir.y > 0.7 && dir.z > 0.7 && dir.x.abs() < 1.0e-5);
        let down = camera.pose(Vector::zeros(), 90.0, -45.0);
        assert!(down.forward().y < 0.0);
    }
}
