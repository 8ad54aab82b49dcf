//! Virtual character on top of the Rapier kinematic character controller.
//!
//! Policy: sweeps, stepping and floor snapping are Rapier KCC's job; this crate adds
//! ground classification, velocity resolution against contacts and contact reporting.
#![forbid(unsafe_code)]

use physics_rapier::{character_sensor_filter, character_sweep_filter, CollisionType, PhysicsWorld};
use rapier3d::control::{
    CharacterAutostep, CharacterCollision, CharacterLength, KinematicCharacterController,
};
use rapier3d::math::{Isometry, Point, UnitVector, Vector};
use rapier3d::prelude::{Capsule, ColliderHandle, Ray, Real};

/// Contacts whose normal leans less than this toward up never support the character.
const SUPPORT_DOT: Real = 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CharacterSettings {
    /// Capsule radius in map units.
    pub capsule_radius: Real,
    /// Half the distance between the capsule's sphere centers.
    pub capsule_half_height: Real,
    /// Steepest walkable slope, radians.
    pub max_slope_angle: Real,
    /// Mass used when pushing dynamic bodies.
    pub mass: Real,
    /// Skin kept between the capsule and the world.
    pub offset: Real,
    pub normal_nudge_factor: Real,
    /// Extra reach of the ground probe below a resting capsule.
    pub ground_probe_distance: Real,
    /// Speed along up above which the character is leaving the ground.
    pub leave_ground_speed: Real,
    /// Velocity components smaller than this are zeroed after a collision.
    pub stop_epsilon: Real,
}

impl Default for CharacterSettings {
    fn default() -> Self {
        Self {
            capsule_radius: 16.0,
            capsule_half_height: 12.0,
            max_slope_angle: 45.0_f32.to_radians(),
            mass: 80.0,
            offset: 0.25,
            normal_nudge_factor: 1.0e-4,
            ground_probe_distance: 2.0,
            leave_ground_speed: 1.0,
            stop_epsilon: 0.1,
        }
    }
}

impl CharacterSettings {
    pub fn capsule(&self) -> Capsule {
        Capsule::new_y(self.capsule_half_height, self.capsule_radius)
    }

    /// Distance from the capsule center to its lowest point.
    pub fn foot_offset(&self) -> Real {
        self.capsule_half_height + self.capsule_radius
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtendedUpdateSettings {
    /// Highest ledge climbed automatically; zero disables stepping.
    pub step_up: Real,
    pub step_min_width: Real,
    /// Floor snap distance while walking; zero disables snapping.
    pub step_down: Real,
}

impl Default for ExtendedUpdateSettings {
    fn default() -> Self {
        Self {
            step_up: 18.0,
            step_min_width: 2.0,
            step_down: 8.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroundState {
    OnGround,
    OnSteepGround,
    InAir,
}

impl GroundState {
    pub fn is_supported(self) -> bool {
        !matches!(self, GroundState::InAir)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactKind {
    Added,
    Persisted,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CharacterContact {
    pub collider: ColliderHandle,
    pub collision_type: CollisionType,
    /// Surface normal pointing toward the character; zero for sensor overlaps.
    pub normal: Vector<Real>,
    pub is_sensor: bool,
    pub is_dynamic: bool,
    pub kind: ContactKind,
}

/// Per-contact decisions made by the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContactSettings {
    pub can_push_character: bool,
    pub can_receive_impulses: bool,
    pub cancel_slope_drift: bool,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            can_push_character: true,
            can_receive_impulses: true,
            cancel_slope_drift: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CharacterUpdate {
    pub translation: Vector<Real>,
    pub ground_state: GroundState,
    pub ground_normal: Option<Vector<Real>>,
    pub contacts: Vec<CharacterContact>,
    /// Colliders touched last update but not this one.
    pub removed: Vec<ColliderHandle>,
}

pub struct VirtualCharacter {
    settings: CharacterSettings,
    controller: KinematicCharacterController,
    capsule: Capsule,
    position: Vector<Real>,
    velocity: Vector<Real>,
    up: UnitVector<Real>,
    ground_state: GroundState,
    ground_normal: Option<Vector<Real>>,
    touching: Vec<ColliderHandle>,
}

impl VirtualCharacter {
    pub fn new(settings: CharacterSettings, position: Vector<Real>) -> Self {
        let mut controller = KinematicCharacterController::default();
        apply_settings(&settings, &mut controller);
        Self {
            settings,
            controller,
            capsule: settings.capsule(),
            position,
            velocity: Vector::zeros(),
            up: Vector::y_axis(),
            ground_state: GroundState::InAir,
            ground_normal: None,
            touching: Vec::new(),
        }
    }

    pub fn settings(&self) -> &CharacterSettings {
        &self.settings
    }

    pub fn capsule(&self) -> &Capsule {
        &self.capsule
    }

    pub fn position(&self) -> Vector<Real> {
        self.position
    }

    /// Teleports the character; ground state is re-evaluated on the next update.
    pub fn set_position(&mut self, position: Vector<Real>) {
        self.position = position;
        self.ground_state = GroundState::InAir;
        self.ground_normal = None;
    }

    pub fn linear_velocity(&self) -> Vector<Real> {
        self.velocity
    }

    pub fn set_linear_velocity(&mut self, velocity: Vector<Real>) {
        self.velocity = velocity;
    }

    pub fn ground_state(&self) -> GroundState {
        self.ground_state
    }

    pub fn ground_normal(&self) -> Option<Vector<Real>> {
        self.ground_normal
    }

    pub fn up(&self) -> Vector<Real> {
        self.up.into_inner()
    }

    /// Moves by `velocity * dt` with stepping and floor snapping, resolves velocity
    /// against what was hit, then reports every touched collider to `listener`.
    pub fn extended_update<F>(
        &mut self,
        world: &mut PhysicsWorld,
        dt: Real,
        gravity: Vector<Real>,
        update: &ExtendedUpdateSettings,
        mut listener: F,
    ) -> CharacterUpdate
    where
        F: FnMut(&CharacterContact, &mut ContactSettings),
    {
        if gravity.norm_squared() > 1.0e-6 {
            self.up = UnitVector::new_normalize(-gravity);
        }
        self.controller.up = self.up;
        let up = self.up.into_inner();
        let rising = self.velocity.dot(&up) > self.settings.leave_ground_speed;

        self.controller.autostep = (update.step_up > 0.0).then(|| CharacterAutostep {
            max_height: CharacterLength::Absolute(update.step_up),
            min_width: CharacterLength::Absolute(update.step_min_width),
            include_dynamic_bodies: false,
        });
        self.controller.snap_to_ground =
            if update.step_down > 0.0 && self.ground_state == GroundState::OnGround && !rising {
                Some(CharacterLength::Absolute(update.step_down))
            } else {
                None
            };

        let start = isometry_at(self.position);
        let mut hits: Vec<CharacterCollision> = Vec::new();
        let output = self.controller.move_shape(
            dt,
            world.bodies(),
            world.colliders(),
            world.query_pipeline(),
            &self.capsule,
            &start,
            self.velocity * dt,
            character_sweep_filter(),
            |collision| hits.push(collision),
        );
        self.position += output.translation;
        let mut translation = output.translation;

        let walkable_dot = self.settings.max_slope_angle.cos();
        let probed = if rising { None } else { self.probe_ground(world) };
        if let Some(probe) = probed {
            if probe.gap > 0.0 && probe.normal.dot(&up) >= walkable_dot {
                let settle = self.settle(world, dt, probe.gap, &mut hits);
                self.position += settle;
                translation += settle;
            }
        }

        self.velocity = clip_against(
            self.velocity,
            hits.iter().map(|hit| hit.hit.normal1.into_inner()),
            self.settings.stop_epsilon,
        );
        let ground = if rising {
            None
        } else {
            probed.map(|probe| (probe.collider, probe.normal)).or_else(|| {
                hits.iter()
                    .map(|hit| (hit.handle, hit.hit.normal1.into_inner()))
                    .filter(|(_, normal)| normal.dot(&up) > SUPPORT_DOT)
                    .max_by(|a, b| a.1.dot(&up).total_cmp(&b.1.dot(&up)))
            })
        };
        match ground {
            Some((_, normal)) => {
                self.ground_state = if normal.dot(&up) >= walkable_dot {
                    GroundState::OnGround
                } else {
                    GroundState::OnSteepGround
                };
                self.ground_normal = Some(normal);
            }
            None => {
                self.ground_state = GroundState::InAir;
                self.ground_normal = None;
            }
        }

        let mut contacts: Vec<CharacterContact> = Vec::new();
        for (handle, normal) in hits
            .iter()
            .map(|hit| (hit.handle, hit.hit.normal1.into_inner()))
            .chain(ground)
        {
            self.push_contact(world, &mut contacts, handle, normal);
        }
        for handle in self.sensor_overlaps(world) {
            self.push_contact(world, &mut contacts, handle, Vector::zeros());
        }

        let mut impulses: Vec<CharacterCollision> = Vec::new();
        let mut drift_normal = None;
        for contact in &contacts {
            let mut settings = ContactSettings::default();
            listener(contact, &mut settings);
            if contact.is_dynamic {
                if settings.can_push_character {
                    self.absorb_push(world, contact);
                }
                if settings.can_receive_impulses {
                    impulses.extend(
                        hits.iter()
                            .filter(|hit| hit.handle == contact.collider)
                            .cloned(),
                    );
                }
            }
            if settings.cancel_slope_drift && contact.normal.norm_squared() > 0.0 {
                drift_normal = Some(contact.normal);
            }
        }
        if let Some(normal) = drift_normal {
            self.cancel_slope_drift(normal);
        }
        world.apply_character_impulses(
            &self.controller,
            dt,
            &self.capsule,
            self.settings.mass,
            &impulses,
        );

        let removed = self
            .touching
            .iter()
            .copied()
            .filter(|handle| !contacts.iter().any(|c| c.collider == *handle))
            .collect();
        self.touching = contacts.iter().map(|c| c.collider).collect();

        CharacterUpdate {
            translation,
            ground_state: self.ground_state,
            ground_normal: self.ground_normal,
            contacts,
            removed,
        }
    }

    fn push_contact(
        &self,
        world: &PhysicsWorld,
        contacts: &mut Vec<CharacterContact>,
        collider: ColliderHandle,
        normal: Vector<Real>,
    ) {
        if contacts.iter().any(|c| c.collider == collider) {
            return;
        }
        let is_sensor = world
            .colliders()
            .get(collider)
            .map(|c| c.is_sensor())
            .unwrap_or(false);
        let kind = if self.touching.contains(&collider) {
            ContactKind::Persisted
        } else {
            ContactKind::Added
        };
        contacts.push(CharacterContact {
            collider,
            collision_type: world.collision_type(collider),
            normal,
            is_sensor,
            is_dynamic: world.is_dynamic(collider),
            kind,
        });
    }

    /// Sensors the capsule touches or sits inside. The center point query covers volumes
    /// that contain the whole capsule, which a surface intersection test can miss.
    fn sensor_overlaps(&self, world: &PhysicsWorld) -> Vec<ColliderHandle> {
        let mut overlaps = Vec::new();
        world.query_pipeline().intersections_with_shape(
            world.bodies(),
            world.colliders(),
            &isometry_at(self.position),
            &self.capsule,
            character_sensor_filter(),
            |handle| {
                overlaps.push(handle);
                true
            },
        );
        world.query_pipeline().intersections_with_point(
            world.bodies(),
            world.colliders(),
            &Point::from(self.position),
            character_sensor_filter(),
            |handle| {
                if !overlaps.contains(&handle) {
                    overlaps.push(handle);
                }
                true
            },
        );
        overlaps.retain(|handle| {
            world
                .colliders()
                .get(*handle)
                .map(|c| c.is_sensor())
                .unwrap_or(false)
        });
        overlaps
    }

    /// Casts down from the lower sphere center. A hit counts as ground when it is
    /// within `ground_probe_distance` of where a resting capsule would sit on that slope.
    fn probe_ground(&self, world: &PhysicsWorld) -> Option<GroundProbe> {
        let up = self.up.into_inner();
        let clearance = self.settings.capsule_radius + self.settings.offset;
        let foot = self.position - up * self.settings.capsule_half_height;
        let ray = Ray::new(Point::from(foot), -up);
        let reach = self.settings.ground_probe_distance;
        let max_toi = clearance / SUPPORT_DOT.max(0.2) + reach;
        let (handle, hit) = world.query_pipeline().cast_ray_and_get_normal(
            world.bodies(),
            world.colliders(),
            &ray,
            max_toi,
            true,
            character_sweep_filter(),
        )?;
        let up_dot = hit.normal.dot(&up);
        if up_dot <= SUPPORT_DOT {
            return None;
        }
        let gap = hit.time_of_impact - clearance / up_dot;
        if gap > reach {
            return None;
        }
        Some(GroundProbe {
            collider: handle,
            normal: hit.normal,
            gap,
        })
    }

    /// Moves down by up to `gap` so a probed floor is touched instead of hovered over.
    fn settle(
        &mut self,
        world: &PhysicsWorld,
        dt: Real,
        gap: Real,
        hits: &mut Vec<CharacterCollision>,
    ) -> Vector<Real> {
        let autostep = self.controller.autostep.take();
        let snap = self.controller.snap_to_ground.take();
        let output = self.controller.move_shape(
            dt,
            world.bodies(),
            world.colliders(),
            world.query_pipeline(),
            &self.capsule,
            &isometry_at(self.position),
            -self.up.into_inner() * gap,
            character_sweep_filter(),
            |collision| hits.push(collision),
        );
        self.controller.autostep = autostep;
        self.controller.snap_to_ground = snap;
        output.translation
    }

    fn absorb_push(&mut self, world: &PhysicsWorld, contact: &CharacterContact) {
        let Some(body_velocity) = world.collider_linvel(contact.collider) else {
            return;
        };
        let push = body_velocity.dot(&contact.normal);
        let current = self.velocity.dot(&contact.normal);
        if push > current {
            self.velocity += contact.normal * (push - current);
        }
    }

    /// Removes the into-surface and downhill parts of the velocity.
    fn cancel_slope_drift(&mut self, normal: Vector<Real>) {
        let into = self.velocity.dot(&normal);
        if into < 0.0 {
            self.velocity -= normal * into;
        }
        let down = -self.up.into_inner();
        let downhill = down - normal * down.dot(&normal);
        if downhill.norm_squared() > 1.0e-8 {
            let downhill = downhill.normalize();
            let along = self.velocity.dot(&downhill);
            if along > 0.0 {
                self.velocity -= downhill * along;
            }
        }
    }
}

/// Removes the into-surface part of `velocity` for each normal. When anything was hit,
/// components smaller than `stop_epsilon` are zeroed.
fn clip_against<I>(mut velocity: Vector<Real>, normals: I, stop_epsilon: Real) -> Vector<Real>
where
    I: IntoIterator<Item = Vector<Real>>,
{
    let mut clipped = false;
    for normal in normals {
        clipped = true;
        let into = velocity.dot(&normal);
        if into < 0.0 {
            velocity -= normal * into;
        }
    }
    if clipped {
        for component in velocity.iter_mut() {
            if component.abs() < stop_epsilon {
                *component = 0.0;
            }
        }
    }
    velocity
}

#[derive(Clone, Copy, Debug)]
struct GroundProbe {
    collider: ColliderHandle,
    normal: Vector<Real>,
    /// Distance left before the capsule rests on the hit surface.
    gap: Real,
}

fn isometry_at(position: Vector<Real>) -> Isometry<Real> {
    Isometry::translation(position.x, position.y, position.z)
}

fn apply_settings(settings: &CharacterSettings, controller: &mut KinematicCharacterController) {
    controller.max_slope_climb_angle = settings.max_slope_angle;
    controller.min_slope_slide_angle = settings.max_slope_angle;
    controller.offset = CharacterLength::Absolute(settings.offset);
    controller.normal_nudge_factor = settings.normal_nudge_factor;
    controller.slide = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use physics_rapier::CollisionLayer;
    use rapier3d::prelude::*;

    const DT: Real = 1.0 / 60.0;

    fn gravity() -> Vector<Real> {
        vector![0.0, -800.0, 0.0]
    }

    fn world_with_floor() -> PhysicsWorld {
        let mut world = PhysicsWorld::new(gravity());
        let floor = ColliderBuilder::cuboid(512.0, 8.0, 512.0)
            .translation(vector![0.0, -8.0, 0.0])
            .collision_groups(CollisionLayer::Static.groups())
            .user_data(CollisionType::Static.to_user_data())
            .build();
        world.insert_static_collider(floor);
        world.update_queries();
        world
    }

    fn run<F>(
        character: &mut VirtualCharacter,
        world: &mut PhysicsWorld,
        ticks: usize,
        mut listener: F,
    ) -> Vec<CharacterUpdate>
    where
        F: FnMut(&CharacterContact, &mut ContactSettings),
    {
        (0..ticks)
            .map(|_| {
                character.extended_update(
                    world,
                    DT,
                    gravity(),
                    &ExtendedUpdateSettings::default(),
                    &mut listener,
                )
            })
            .collect()
    }

    #[test]
    fn lands_on_floor_and_stops_falling() {
        let mut world = world_with_floor();
        let settings = CharacterSettings::default();
        let mut character = VirtualCharacter::new(settings, vector![0.0, 60.0, 0.0]);
        character.set_linear_velocity(vector![0.0, -400.0, 0.0]);
        run(&mut character, &mut world, 30, |_, _| {});

        assert_eq!(character.ground_state(), GroundState::OnGround);
        let normal = character.ground_normal().expect("ground normal");
        assert!(normal.y > 0.99);
        assert!(character.linear_velocity().y.abs() < 1.0e-3);
        let rest = settings.foot_offset();
        assert!(character.position().y >= rest - 0.01);
        assert!(character.position().y <= rest + settings.offset + 0.1);
    }

    #[test]
    fn hovering_inside_probe_reach_settles_onto_floor() {
        let mut world = world_with_floor();
        let settings = CharacterSettings::default();
        let start = settings.foot_offset() + settings.offset + 1.5;
        let mut character = VirtualCharacter::new(settings, vector![0.0, start, 0.0]);
        let updates = run(&mut character, &mut world, 1, |_, _| {});

        assert_eq!(updates[0].ground_state, GroundState::OnGround);
        assert!(updates[0].translation.y < -1.0);
        let rest = settings.foot_offset();
        assert!(character.position().y >= rest - 0.01);
        assert!(character.position().y <= rest + settings.offset + 0.1);
    }

    #[test]
    fn floor_beyond_probe_reach_is_air() {
        let mut world = world_with_floor();
        let settings = CharacterSettings::default();
        let start = settings.foot_offset() + settings.offset + settings.ground_probe_distance + 1.0;
        let mut character = VirtualCharacter::new(settings, vector![0.0, start, 0.0]);
        let updates = run(&mut character, &mut world, 1, |_, _| {});

        assert_eq!(updates[0].ground_state, GroundState::InAir);
        assert!((character.position().y - start).abs() < 1.0e-3);
    }

    #[test]
    fn steep_ramp_is_not_walkable() {
        let mut world = PhysicsWorld::new(gravity());
        let ramp = ColliderBuilder::cuboid(512.0, 2.0, 512.0)
            .rotation(vector![0.0, 0.0, 60.0_f32.to_radians()])
            .build();
        world.insert_static_collider(ramp);
        world.update_queries();

        let mut character = VirtualCharacter::new(CharacterSettings::default(), vector![0.0, 120.0, 0.0]);
        character.set_linear_velocity(vector![0.0, -600.0, 0.0]);
        let mut state = GroundState::InAir;
        for _ in 0..60 {
            let update = character.extended_update(
                &mut world,
                DT,
                gravity(),
                &ExtendedUpdateSettings::default(),
                |_, _| {},
            );
            state = update.ground_state;
            if state != GroundState::InAir {
                break;
            }
        }
        assert_eq!(state, GroundState::OnSteepGround);
    }

    #[test]
    fn wall_removes_velocity_into_it() {
        let mut world = PhysicsWorld::new(gravity());
        let wall = ColliderBuilder::cuboid(2.0, 256.0, 256.0)
            .translation(vector![52.0, 0.0, 0.0])
            .build();
        world.insert_static_collider(wall);
        world.update_queries();

        let mut character = VirtualCharacter::new(CharacterSettings::default(), vector![0.0, 0.0, 0.0]);
        character.set_linear_velocity(vector![600.0, 0.0, 50.0]);
        run(&mut character, &mut world, 30, |_, _| {});

        assert_eq!(character.linear_velocity().x, 0.0);
        assert_eq!(character.linear_velocity().y, 0.0);
        assert!(character.linear_velocity().z > 49.0);
        assert!(character.position().x < 34.5);
    }

    #[test]
    fn trigger_overlap_reports_added_persisted_removed() {
        let mut world = world_with_floor();
        let mut points = Vec::new();
        for x in [-64.0, 64.0] {
            for y in [0.0, 128.0] {
                for z in [-64.0, 64.0] {
                    points.push(point![x, y, z]);
                }
            }
        }
        let trigger = world
            .insert_convex_hull(&points, CollisionType::Trigger)
            .expect("trigger hull");
        world.update_queries();

        let mut character = VirtualCharacter::new(CharacterSettings::default(), vector![0.0, 28.5, 0.0]);
        let mut seen = Vec::new();
        let updates = run(&mut character, &mut world, 2, |contact, settings| {
            if contact.collision_type == CollisionType::Trigger {
                settings.can_push_character = false;
                settings.can_receive_impulses = false;
                seen.push(contact.kind);
            }
        });
        assert_eq!(seen, vec![ContactKind::Added, ContactKind::Persisted]);
        assert!(updates[1]
            .contacts
            .iter()
            .any(|c| c.collider == trigger.collider && c.is_sensor));

        character.set_position(vector![300.0, 28.5, 0.0]);
        let updates = run(&mut character, &mut world, 1, |_, _| {});
        assert!(updates[0].removed.contains(&trigger.collider));
    }

    #[test]
    fn clipping_zeroes_tiny_leftover_components() {
        let wall = vector![-1.0, 0.0, 0.0005].normalize();
        let out = clip_against(vector![600.0, 0.05, 50.0], [wall], 0.1);
        assert_eq!(out.x, 0.0);
        assert_eq!(out.y, 0.0);
        assert!(out.z > 49.0);

        let untouched = clip_against(vector![0.05, 0.0, 0.0], std::iter::empty(), 0.1);
        assert_eq!(untouched.x, 0.05);
    }

    #[test]
    fn trigger_containing_the_capsule_is_reported_every_tick() {
        let mut world = world_with_floor();
        let mut points = Vec::new();
        for x in [-256.0, 256.0] {
            for y in [0.0, 512.0] {
                for z in [-256.0, 256.0] {
                    points.push(point![x, y, z]);
                }
            }
        }
        let trigger = world
            .insert_convex_hull(&points, CollisionType::Trigger)
            .expect("trigger hull");
        world.update_queries();

        let mut character = VirtualCharacter::new(CharacterSettings::default(), vector![0.0, 200.0, 0.0]);
        let mut seen = Vec::new();
        let updates = run(&mut character, &mut world, 4, |contact, _| {
            if contact.collider == trigger.collider {
                seen.push(contact.kind);
            }
        });
        assert_eq!(
            seen,
            vec![
                ContactKind::Added,
                ContactKind::Persisted,
                ContactKind::Persisted,
                ContactKind::Persisted
            ]
        );
        assert!(updates.iter().all(|update| update.removed.is_empty()));
    }

    #[test]
    fn slope_drift_cancel_keeps_uphill_motion() {
        let mut character = VirtualCharacter::new(CharacterSettings::default(), Vector::zeros());
        let normal = vector![0.0, 1.0, 1.0].normalize();
        character.set_linear_velocity(vector![5.0, -10.0, 10.0]);
        character.cancel_slope_drift(normal);
        let v = character.linear_velocity();
        assert!(v.dot(&normal) >= -1.0e-4);
        assert!((v.x - 5.0).abs() < 1.0e-4);
        let downhill = vector![0.0, -1.0, 1.0].normalize();
        assert!(v.dot(&downhill) <= 1.0e-4);
    }
}
