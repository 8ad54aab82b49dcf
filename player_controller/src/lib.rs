//! Player controller composition (input + motor + virtual character + camera).
#![forbid(unsafe_code)]

use character_collision::{
    CharacterSettings, CharacterUpdate, ContactKind, ExtendedUpdateSettings, GroundState as Support,
    VirtualCharacter,
};
use character_motor_quake::{
    CharacterState, GroundState, MotorStep, MoveInput, QuakeMotor, QuakeMotorConfig,
};
use engine_core::logging;
use physics_rapier::{CollisionType, PhysicsWorld};
use player_camera::{CameraPose, PlayerCamera, DEFAULT_EYE_HEIGHT};
use rapier3d::math::Vector;
use rapier3d::prelude::{ColliderHandle, Real};

#[derive(Clone, Copy, Debug, Default)]
pub struct RawInput {
    pub move_x: Real,
    pub move_y: Real,
    pub jump: bool,
    pub look_delta: [Real; 2],
}

pub trait InputAdapter {
    fn intent(&mut self, raw: RawInput) -> MoveInput;
}

/// Passes keys through untouched; the motor caps the combined magnitude.
#[derive(Default)]
pub struct DirectInputAdapter;

impl InputAdapter for DirectInputAdapter {
    fn intent(&mut self, raw: RawInput) -> MoveInput {
        MoveInput {
            look_delta: raw.look_delta,
            move_axis: [raw.move_x, raw.move_y],
            jump: raw.jump,
        }
    }
}

pub trait Motor {
    fn step(&mut self, state: &mut CharacterState, input: &MoveInput, dt: Real) -> MotorStep;
    fn gravity(&self) -> Real;
}

impl Motor for QuakeMotor {
    fn step(&mut self, state: &mut CharacterState, input: &MoveInput, dt: Real) -> MotorStep {
        QuakeMotor::step(self, state, input, dt)
    }

    fn gravity(&self) -> Real {
        self.config().gravity
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PlayerConfig {
    pub motor: QuakeMotorConfig,
    pub character: CharacterSettings,
    pub update: ExtendedUpdateSettings,
    pub eye_height: Real,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            motor: QuakeMotorConfig::default(),
            character: CharacterSettings::default(),
            update: ExtendedUpdateSettings::default(),
            eye_height: DEFAULT_EYE_HEIGHT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlayerFrame {
    pub state: CharacterState,
    pub update: CharacterUpdate,
    pub camera: CameraPose,
    pub jumped: bool,
    pub landed: bool,
    pub triggers_entered: Vec<ColliderHandle>,
}

pub struct PlayerController<A: InputAdapter, M: Motor> {
    input: A,
    motor: M,
    character: VirtualCharacter,
    camera: PlayerCamera,
    update: ExtendedUpdateSettings,
    state: CharacterState,
}

impl PlayerController<DirectInputAdapter, QuakeMotor> {
    /// Quake motor with direct input, standing at `position` looking along `yaw` degrees.
    pub fn spawn(config: PlayerConfig, position: Vector<Real>, yaw: Real) -> Self {
        Self::new(
            DirectInputAdapter,
            QuakeMotor::new(config.motor),
            VirtualCharacter::new(config.character, position),
            PlayerCamera::new(config.eye_height),
            config.update,
            yaw,
        )
    }
}

impl<A: InputAdapter, M: Motor> PlayerController<A, M> {
    pub fn new(
        input: A,
        motor: M,
        character: VirtualCharacter,
        camera: PlayerCamera,
        update: ExtendedUpdateSettings,
        yaw: Real,
    ) -> Self {
        let state = CharacterState::new(character.position(), yaw);
        Self {
            input,
            motor,
            character,
            camera,
            update,
            state,
        }
    }

    pub fn state(&self) -> &CharacterState {
        &self.state
    }

    pub fn character(&self) -> &VirtualCharacter {
        &self.character
    }

    pub fn character_mut(&mut self) -> &mut VirtualCharacter {
        &mut self.character
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn motor_mut(&mut self) -> &mut M {
        &mut self.motor
    }

    pub fn camera(&self) -> &PlayerCamera {
        &self.camera
    }

    pub fn camera_pose(&self) -> CameraPose {
        self.camera
            .pose(self.state.position, self.state.yaw, self.state.pitch)
    }

    pub fn tick(&mut self, world: &mut PhysicsWorld, raw: RawInput, dt: Real) -> PlayerFrame {
        let input = self.input.intent(raw);

        self.state.position = self.character.position();
        self.state.velocity = self.character.linear_velocity();
        self.state.ground = motor_ground(
            self.character.ground_state(),
            self.character.ground_normal(),
        );

        let step = self.motor.step(&mut self.state, &input, dt);

        // Landing this tick keeps its momentum; drift cancel waits one tick.
        let suppress_drift = matches!(self.state.ground, GroundState::Airborne);
        let idle = step.wish.speed <= 0.0;
        let walkable_dot = self.character.settings().max_slope_angle.cos();
        let up = self.character.up();
        let mut triggers_entered = Vec::new();

        self.character.set_linear_velocity(self.state.velocity);
        let gravity = -up * self.motor.gravity();
        let update = self.character.extended_update(
            world,
            dt,
            gravity,
            &self.update,
            |contact, settings| {
                if contact.is_sensor || contact.collision_type == CollisionType::Trigger {
                    settings.can_push_character = false;
                    settings.can_receive_impulses = false;
                    if contact.kind == ContactKind::Added {
                        logging::info(format!("trigger entered: {:?}", contact.collider));
                        triggers_entered.push(contact.collider);
                    }
                    return;
                }
                if contact.is_dynamic {
                    settings.can_push_character = false;
                } else if contact.collision_type == CollisionType::Static
                    && idle
                    && !suppress_drift
                    && contact.normal.dot(&up) >= walkable_dot
                {
                    settings.cancel_slope_drift = true;
                }
            },
        );

        self.state.position = self.character.position();
        self.state.velocity = self.character.linear_velocity();
        self.state.ground = motor_ground(update.ground_state, update.ground_normal);
        let landed = suppress_drift && self.state.ground.is_walkable();
        if landed {
            logging::debug(format!(
                "landed at {:.1} {:.1} {:.1}",
                self.state.position.x, self.state.position.y, self.state.position.z
            ));
        }

        PlayerFrame {
            state: self.state,
            update,
            camera: self.camera_pose(),
            jumped: step.jumped,
            landed,
            triggers_entered,
        }
    }
}

fn motor_ground(support: Support, normal: Option<Vector<Real>>) -> GroundState {
    match (support, normal) {
        (Support::OnGround, Some(normal)) => GroundState::Walkable { normal },
        (Support::OnSteepGround, Some(normal)) => GroundState::Steep { normal },
        _ => GroundState::Airborne,
    }
}
