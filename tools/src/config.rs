use std::path::{Path, PathBuf};

use engine_core::logging::LogLevel;
use map_cook::{BrushBuildConfig, MeshBuildConfig};
use player_controller::PlayerConfig;
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub map: MapSection,
    pub geometry: GeometrySection,
    pub movement: MovementSection,
    pub character: CharacterSection,
    pub log: LogSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MapSection {
    pub path: Option<PathBuf>,
    pub textures_dir: PathBuf,
    pub texture_extension: String,
}

impl Default for MapSection {
    fn default() -> Self {
        Self {
            path: None,
            textures_dir: PathBuf::from("textures"),
            texture_extension: "png".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GeometrySection {
    pub epsilon: Option<f32>,
    pub skip_triggers: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MovementSection {
    pub max_speed: Option<f32>,
    pub ground_accel: Option<f32>,
    pub air_accel: Option<f32>,
    pub air_wish_cap: Option<f32>,
    pub friction: Option<f32>,
    pub stop_speed: Option<f32>,
    pub gravity: Option<f32>,
    pub jump_speed: Option<f32>,
    pub max_slope_deg: Option<f32>,
    pub look_sensitivity: Option<f32>,
    pub eye_height: Option<f32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CharacterSection {
    pub capsule_radius: Option<f32>,
    pub capsule_half_height: Option<f32>,
    pub mass: Option<f32>,
    pub step_up: Option<f32>,
    pub step_down: Option<f32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct EngineConfigValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl EngineConfigValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl EngineConfig {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;
        Self::parse_toml(&text)
    }

    pub fn brush_config(&self) -> BrushBuildConfig {
        let mut config = BrushBuildConfig::default();
        if let Some(epsilon) = self.geometry.epsilon {
            config.epsilon = epsilon;
        }
        config
    }

    pub fn mesh_config(&self) -> MeshBuildConfig {
        let mut config = MeshBuildConfig {
            brush: self.brush_config(),
            ..MeshBuildConfig::default()
        };
        if let Some(skip) = self.geometry.skip_triggers {
            config.skip_triggers = skip;
        }
        config
    }

    pub fn player_config(&self) -> PlayerConfig {
        let mut config = PlayerConfig::default();
        let movement = &self.movement;
        let motor = &mut config.motor;
        for (slot, value) in [
            (&mut motor.max_speed, movement.max_speed),
            (&mut motor.ground_accel, movement.ground_accel),
            (&mut motor.air_accel, movement.air_accel),
            (&mut motor.air_wish_cap, movement.air_wish_cap),
            (&mut motor.friction, movement.friction),
            (&mut motor.stop_speed, movement.stop_speed),
            (&mut motor.gravity, movement.gravity),
            (&mut motor.jump_speed, movement.jump_speed),
            (&mut motor.look_sensitivity, movement.look_sensitivity),
        ] {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if let Some(degrees) = movement.max_slope_deg {
            motor.max_slope_angle = degrees.to_radians();
            config.character.max_slope_angle = degrees.to_radians();
        }
        if let Some(eye_height) = movement.eye_height {
            config.eye_height = eye_height;
        }

        let character = &self.character;
        for (slot, value) in [
            (&mut config.character.capsule_radius, character.capsule_radius),
            (
                &mut config.character.capsule_half_height,
                character.capsule_half_height,
            ),
            (&mut config.character.mass, character.mass),
            (&mut config.update.step_up, character.step_up),
            (&mut config.update.step_down, character.step_down),
        ] {
            if let Some(value) = value {
                *slot = value;
            }
        }
        config
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.log.level.as_deref().and_then(LogLevel::parse)
    }

    pub fn validate(&self) -> EngineConfigValidation {
        let mut validation = EngineConfigValidation::default();
        if self.map.texture_extension.trim().is_empty() {
            validation
                .errors
                .push("map.texture_extension must not be empty".to_string());
        }
        if let Some(epsilon) = self.geometry.epsilon {
            if !epsilon.is_finite() || epsilon <= 0.0 {
                validation
                    .errors
                    .push("geometry.epsilon must be finite and > 0".to_string());
            } else if !(1.0e-5..=1.0e-2).contains(&epsilon) {
                validation.warnings.push(format!(
                    "geometry.epsilon {} is outside the usual 1e-5..1e-2 range",
                    epsilon
                ));
            }
        }
        if let Some(degrees) = self.movement.max_slope_deg {
            if !(degrees > 0.0 && degrees < 90.0) {
                validation
                    .errors
                    .push("movement.max_slope_deg must be between 0 and 90".to_string());
            }
        }
        if let Some(eye_height) = self.movement.eye_height {
            if !eye_height.is_finite() {
                validation
                    .errors
                    .push("movement.eye_height must be finite".to_string());
            }
        }

        let player = self.player_config();
        for error in player.motor.validate() {
            validation.errors.push(format!("movement.{}", error));
        }
        for (name, value) in [
            ("capsule_radius", player.character.capsule_radius),
            ("capsule_half_height", player.character.capsule_half_height),
            ("mass", player.character.mass),
        ] {
            if !(value.is_finite() && value > 0.0) {
                validation
                    .errors
                    .push(format!("character.{} must be finite and > 0", name));
            }
        }
        for (name, value) in [
            ("step_up", player.update.step_up),
            ("step_down", player.update.step_down),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                validation
                    .errors
                    .push(format!("character.{} must be finite and >= 0", name));
            }
        }

        if let Some(level) = &self.log.level {
            if LogLevel::parse(level).is_none() {
                validation
                    .errors
                    .push(format!("log.level '{}' is not a known level", level));
            }
        }
        if self.map.path.is_none() {
            validation
                .warnings
                .push("map.path not set; --map is required".to_string());
        }
        validation
    }
}
