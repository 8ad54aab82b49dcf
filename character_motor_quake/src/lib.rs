//! Quake-style movement motor (look, wish, friction, acceleration, slopes).
//!
//! Units are map units and degrees. The motor only edits `CharacterState`; collision
//! and ground detection belong to the character it drives.
#![forbid(unsafe_code)]

use rapier3d::math::Vector;
use rapier3d::prelude::Real;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuakeMotorConfig {
    pub max_speed: Real,
    pub ground_accel: Real,
    pub air_accel: Real,
    /// Wish speed cap while airborne; this is what makes air strafing work.
    pub air_wish_cap: Real,
    pub friction: Real,
    pub stop_speed: Real,
    pub gravity: Real,
    pub jump_speed: Real,
    /// Steepest walkable slope, radians.
    pub max_slope_angle: Real,
    pub overbounce: Real,
    pub stop_epsilon: Real,
    /// Degrees per pointer unit.
    pub look_sensitivity: Real,
    pub pitch_limit: Real,
}

impl Default for QuakeMotorConfig {
    fn default() -> Self {
        Self {
            max_speed: 320.0,
            ground_accel: 10.0,
            air_accel: 10.0,
            air_wish_cap: 30.0,
            friction: 4.0,
            stop_speed: 100.0,
            gravity: 800.0,
            jump_speed: 270.0,
            max_slope_angle: 45.0_f32.to_radians(),
            overbounce: 1.001,
            stop_epsilon: 0.1,
            look_sensitivity: 0.5,
            pitch_limit: 89.0,
        }
    }
}

impl QuakeMotorConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let positive = [
            ("max_speed", self.max_speed),
            ("ground_accel", self.ground_accel),
            ("air_accel", self.air_accel),
            ("air_wish_cap", self.air_wish_cap),
            ("stop_speed", self.stop_speed),
            ("jump_speed", self.jump_speed),
            ("overbounce", self.overbounce),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                errors.push(format!("{} must be positive, got {}", name, value));
            }
        }
        for (name, value) in [
            ("friction", self.friction),
            ("gravity", self.gravity),
            ("stop_epsilon", self.stop_epsilon),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                errors.push(format!("{} must not be negative, got {}", name, value));
            }
        }
        if !(self.max_slope_angle > 0.0 && self.max_slope_angle < std::f32::consts::FRAC_PI_2) {
            errors.push("max_slope_angle must be between 0 and 90 degrees".to_string());
        }
        if !(self.pitch_limit > 0.0 && self.pitch_limit < 90.0) {
            errors.push("pitch_limit must be between 0 and 90 degrees".to_string());
        }
        errors
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GroundState {
    Walkable { normal: Vector<Real> },
    Steep { normal: Vector<Real> },
    Airborne,
}

impl GroundState {
    pub fn normal(&self) -> Option<Vector<Real>> {
        match *self {
            GroundState::Walkable { normal } | GroundState::Steep { normal } => Some(normal),
            GroundState::Airborne => None,
        }
    }

    pub fn is_walkable(&self) -> bool {
        matches!(self, GroundState::Walkable { .. })
    }
}

/// Walkable when the normal leans no more than `max_slope_angle` away from up.
pub fn classify_ground(
    normal: Option<Vector<Real>>,
    up: Vector<Real>,
    max_slope_angle: Real,
) -> GroundState {
    match normal {
        Some(normal) if normal.dot(&up) >= max_slope_angle.cos() => {
            GroundState::Walkable { normal }
        }
        Some(normal) => GroundState::Steep { normal },
        None => GroundState::Airborne,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CharacterState {
    pub position: Vector<Real>,
    pub velocity: Vector<Real>,
    /// Degrees; zero looks down +X, 90 looks down +Z.
    pub yaw: Real,
    /// Degrees; positive looks up.
    pub pitch: Real,
    pub ground: GroundState,
}

impl CharacterState {
    pub fn new(position: Vector<Real>, yaw: Real) -> Self {
        Self {
            position,
            velocity: Vector::zeros(),
            yaw,
            pitch: 0.0,
            ground: GroundState::Airborne,
        }
    }

    pub fn grounded(&self) -> bool {
        self.ground.is_walkable()
    }

    pub fn ground_normal(&self) -> Option<Vector<Real>> {
        self.ground.normal()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MoveInput {
    /// Pointer delta since last tick, x right and y down.
    pub look_delta: [Real; 2],
    /// `[right, forward]`, each usually in -1..=1.
    pub move_axis: [Real; 2],
    pub jump: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wish {
    pub dir: Vector<Real>,
    pub speed: Real,
}

impl Wish {
    pub fn none() -> Self {
        Self {
            dir: Vector::zeros(),
            speed: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorStep {
    pub wish: Wish,
    pub jumped: bool,
}

pub fn apply_look(state: &mut CharacterState, delta: [Real; 2], config: &QuakeMotorConfig) {
    state.yaw = (state.yaw + delta[0] * config.look_sensitivity).rem_euclid(360.0);
    state.pitch = (state.pitch - delta[1] * config.look_sensitivity)
        .clamp(-config.pitch_limit, config.pitch_limit);
}

/// Yaw-only forward and right vectors.
pub fn basis(yaw: Real) -> (Vector<Real>, Vector<Real>) {
    let (sin, cos) = yaw.to_radians().sin_cos();
    (Vector::new(cos, 0.0, sin), Vector::new(-sin, 0.0, cos))
}

/// The combined raw input is capped at length 1 before scaling, so diagonals are
/// no faster than straight lines.
pub fn build_wish(yaw: Real, axis: [Real; 2], max_speed: Real) -> Wish {
    let (forward, right) = basis(yaw);
    let raw = right * axis[0] + forward * axis[1];
    let len = raw.norm();
    if !len.is_finite() || len <= 1.0e-6 {
        return Wish::none();
    }
    Wish {
        dir: raw / len,
        speed: len.min(1.0) * max_speed,
    }
}

/// Slows the part of `velocity` lying in the ground plane; the normal part is kept.
pub fn apply_friction(
    velocity: Vector<Real>,
    ground_normal: Vector<Real>,
    friction: Real,
    stop_speed: Real,
    dt: Real,
) -> Vector<Real> {
    let normal_part = ground_normal * velocity.dot(&ground_normal);
    let tangential = velocity - normal_part;
    let speed = tangential.norm();
    if speed <= 0.0 || friction <= 0.0 {
        return velocity;
    }
    let control = speed.max(stop_speed);
    let drop = control * friction * dt;
    let new_speed = (speed - drop).max(0.0);
    normal_part + tangential * (new_speed / speed)
}

pub fn accelerate(
    velocity: Vector<Real>,
    wish_dir: Vector<Real>,
    wish_speed: Real,
    accel: Real,
    dt: Real,
) -> Vector<Real> {
    if wish_speed <= 0.0 {
        return velocity;
    }
    let current_speed = velocity.dot(&wish_dir);
    let add_speed = wish_speed - current_speed;
    if add_speed <= 0.0 {
        return velocity;
    }
    let accel_speed = (accel * dt * wish_speed).min(add_speed);
    velocity + wish_dir * accel_speed
}

/// Like `accelerate`, but the target speed along `wish_dir` is capped at `wish_cap`
/// while the acceleration still scales with the full wish speed.
pub fn air_accelerate(
    velocity: Vector<Real>,
    wish_dir: Vector<Real>,
    wish_speed: Real,
    accel: Real,
    wish_cap: Real,
    dt: Real,
) -> Vector<Real> {
    if wish_speed <= 0.0 {
        return velocity;
    }
    let capped = wish_speed.min(wish_cap);
    let current_speed = velocity.dot(&wish_dir);
    let add_speed = capped - current_speed;
    if add_speed <= 0.0 {
        return velocity;
    }
    let accel_speed = (accel * wish_speed * dt).min(add_speed);
    velocity + wish_dir * accel_speed
}

/// `v - n * dot(v, n) * overbounce`, with components inside `stop_epsilon` zeroed.
pub fn clip_velocity(
    velocity: Vector<Real>,
    normal: Vector<Real>,
    overbounce: Real,
    stop_epsilon: Real,
) -> Vector<Real> {
    let backoff = velocity.dot(&normal) * overbounce;
    let mut out = velocity - normal * backoff;
    for component in out.iter_mut() {
        if component.abs() < stop_epsilon {
            *component = 0.0;
        }
    }
    out
}

pub struct QuakeMotor {
    config: QuakeMotorConfig,
}

impl QuakeMotor {
    pub fn new(config: QuakeMotorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> QuakeMotorConfig {
        self.config
    }

    pub fn config_mut(&mut self) -> &mut QuakeMotorConfig {
        &mut self.config
    }

    /// Look, wish, jump, gravity and the ground-state branch for one tick.
    pub fn step(&self, state: &mut CharacterState, input: &MoveInput, dt: Real) -> MotorStep {
        let dt = dt.max(0.0);
        let config = &self.config;
        let up = Vector::y();
        apply_look(state, input.look_delta, config);
        let wish = build_wish(state.yaw, input.move_axis, config.max_speed);

        let mut jumped = false;
        if input.jump && state.grounded() {
            state.velocity.y = config.jump_speed;
            state.ground = GroundState::Airborne;
            jumped = true;
        }

        if !state.grounded() {
            state.velocity -= up * (config.gravity * dt);
        }

        match state.ground {
            GroundState::Walkable { normal } => {
                let into = state.velocity.dot(&normal);
                if into < 0.0 {
                    state.velocity -= normal * into;
                }
                state.velocity = apply_friction(
                    state.velocity,
                    normal,
                    config.friction,
                    config.stop_speed,
                    dt,
                );
                let along = wish.dir - normal * wish.dir.dot(&normal);
                if along.norm_squared() > 1.0e-8 {
                    state.velocity = accelerate(
                        state.velocity,
                        along.normalize(),
                        wish.speed,
                        config.ground_accel,
                        dt,
                    );
                }
            }
            GroundState::Steep { normal } => {
                if state.velocity.dot(&normal) < 0.0 {
                    state.velocity = clip_velocity(
                        state.velocity,
                        normal,
                        config.overbounce,
                        config.stop_epsilon,
                    );
                }
                let mut steer = wish.dir - normal * wish.dir.dot(&normal);
                if steer.dot(&up) > 0.0 {
                    steer -= up * steer.dot(&up);
                }
                if steer.norm_squared() > 1.0e-8 {
                    state.velocity = air_accelerate(
                        state.velocity,
                        steer.normalize(),
                        wish.speed,
                        config.air_accel,
                        config.air_wish_cap,
                        dt,
                    );
                }
            }
            GroundState::Airborne => {
                state.velocity = air_accelerate(
                    state.velocity,
                    wish.dir,
                    wish.speed,
                    config.air_accel,
                    config.air_wish_cap,
                    dt,
                );
            }
        }

        MotorStep { wish, jumped }
    }
}
