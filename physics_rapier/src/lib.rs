//! Owned Rapier world, collision layers and brush body construction.
#![forbid(unsafe_code)]

use rapier3d::control::{CharacterCollision, KinematicCharacterController};
use rapier3d::prelude::*;

/// Classification stored on every map collider's user data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollisionType {
    Static,
    Dynamic,
    Trigger,
    NoCollide,
    Unknown,
}

impl CollisionType {
    pub const ALL: [CollisionType; 5] = [
        CollisionType::Static,
        CollisionType::Dynamic,
        CollisionType::Trigger,
        CollisionType::NoCollide,
        CollisionType::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollisionType::Static => "static",
            CollisionType::Dynamic => "dynamic",
            CollisionType::Trigger => "trigger",
            CollisionType::NoCollide => "no_collide",
            CollisionType::Unknown => "unknown",
        }
    }

    pub fn to_user_data(self) -> u128 {
        match self {
            CollisionType::Unknown => 0,
            CollisionType::Static => 1,
            CollisionType::Dynamic => 2,
            CollisionType::Trigger => 3,
            CollisionType::NoCollide => 4,
        }
    }

    pub fn from_user_data(data: u128) -> Self {
        match data {
            1 => CollisionType::Static,
            2 => CollisionType::Dynamic,
            3 => CollisionType::Trigger,
            4 => CollisionType::NoCollide,
            _ => CollisionType::Unknown,
        }
    }

    /// Body layer for types that get a physics body at all.
    pub fn layer(self) -> Option<CollisionLayer> {
        match self {
            CollisionType::Static => Some(CollisionLayer::Static),
            CollisionType::Dynamic => Some(CollisionLayer::Dynamic),
            CollisionType::Trigger => Some(CollisionLayer::Sensor),
            CollisionType::NoCollide | CollisionType::Unknown => None,
        }
    }
}

impl std::fmt::Display for CollisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollisionLayer {
    Static,
    Dynamic,
    Sensor,
    Character,
}

impl CollisionLayer {
    pub fn membership(self) -> Group {
        match self {
            CollisionLayer::Static => Group::GROUP_1,
            CollisionLayer::Dynamic => Group::GROUP_2,
            CollisionLayer::Sensor => Group::GROUP_3,
            CollisionLayer::Character => Group::GROUP_4,
        }
    }

    /// Static and sensor geometry never touch each other or themselves.
    pub fn filter(self) -> Group {
        match self {
            CollisionLayer::Static => Group::GROUP_2 | Group::GROUP_4,
            CollisionLayer::Dynamic => {
                Group::GROUP_1 | Group::GROUP_2 | Group::GROUP_3 | Group::GROUP_4
            }
            CollisionLayer::Sensor => Group::GROUP_2 | Group::GROUP_4,
            CollisionLayer::Character => Group::GROUP_1 | Group::GROUP_2 | Group::GROUP_3,
        }
    }

    pub fn groups(self) -> InteractionGroups {
        InteractionGroups::new(self.membership(), self.filter())
    }
}

/// Filter for character sweeps: everything the character layer hits, minus sensors.
pub fn character_sweep_filter<'a>() -> QueryFilter<'a> {
    QueryFilter::default()
        .groups(CollisionLayer::Character.groups())
        .exclude_sensors()
}

/// Filter for trigger overlap queries.
pub fn character_sensor_filter<'a>() -> QueryFilter<'a> {
    QueryFilter::default().groups(CollisionLayer::Character.groups())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HullBody {
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
}

impl PhysicsWorld {
    pub fn new(gravity: Vector<Real>) -> Self {
        Self {
            gravity,
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    /// Scales Rapier's internal tolerances for worlds not authored in meters.
    pub fn set_length_unit(&mut self, length_unit: Real) {
        if length_unit.is_finite() && length_unit > 0.0 {
            self.integration_parameters.length_unit = length_unit;
        }
    }

    pub fn bodies(&self) -> &RigidBodySet {
        &self.bodies
    }

    pub fn colliders(&self) -> &ColliderSet {
        &self.colliders
    }

    pub fn query_pipeline(&self) -> &QueryPipeline {
        &self.query_pipeline
    }

    pub fn step(&mut self, dt: Real) {
        self.integration_parameters.dt = dt;
        let physics_hooks = ();
        let event_handler = ();
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &physics_hooks,
            &event_handler,
        );
        self.query_pipeline.update(&self.colliders);
    }

    /// Refreshes scene queries after inserting colliders without stepping.
    pub fn update_queries(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }

    pub fn insert_static_collider(&mut self, collider: Collider) -> ColliderHandle {
        self.colliders.insert(collider)
    }

    /// Builds a convex hull body from world-space points. The body sits at the
    /// centroid so dynamic hulls rotate about their own center.
    pub fn insert_convex_hull(
        &mut self,
        points: &[Point<Real>],
        collision_type: CollisionType,
    ) -> Result<HullBody, String> {
        let layer = collision_type
            .layer()
            .ok_or_else(|| format!("{} geometry has no physics body", collision_type))?;
        check_hull_points(points)?;

        let centroid = points
            .iter()
            .fold(Vector::zeros(), |acc, p| acc + p.coords)
            / points.len() as Real;
        let local: Vec<Point<Real>> = points
            .iter()
            .map(|p| Point::from(p.coords - centroid))
            .collect();

        let collider = ColliderBuilder::convex_hull(&local)
            .ok_or_else(|| "convex hull construction failed".to_string())?
            .collision_groups(layer.groups())
            .sensor(collision_type == CollisionType::Trigger)
            .user_data(collision_type.to_user_data())
            .build();
        let body = match collision_type {
            CollisionType::Dynamic => RigidBodyBuilder::dynamic(),
            _ => RigidBodyBuilder::fixed(),
        }
        .translation(centroid)
        .build();

        let body = self.bodies.insert(body);
        let collider = self
            .colliders
            .insert_with_parent(collider, body, &mut self.bodies);
        Ok(HullBody { body, collider })
    }

    pub fn collision_type(&self, collider: ColliderHandle) -> CollisionType {
        self.colliders
            .get(collider)
            .map(|c| CollisionType::from_user_data(c.user_data))
            .unwrap_or(CollisionType::Unknown)
    }

    pub fn is_dynamic(&self, collider: ColliderHandle) -> bool {
        self.colliders
            .get(collider)
            .and_then(|c| c.parent())
            .and_then(|body| self.bodies.get(body))
            .map(|body| body.is_dynamic())
            .unwrap_or(false)
    }

    /// Linear velocity of the body owning `collider`; `None` for parentless colliders.
    pub fn collider_linvel(&self, collider: ColliderHandle) -> Option<Vector<Real>> {
        let parent = self.colliders.get(collider)?.parent()?;
        self.bodies.get(parent).map(|body| *body.linvel())
    }

    pub fn body_translation(&self, body: RigidBodyHandle) -> Option<Vector<Real>> {
        self.bodies.get(body).map(|b| *b.translation())
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// Lets the character push the dynamic bodies it touched this tick.
    pub fn apply_character_impulses(
        &mut self,
        controller: &KinematicCharacterController,
        dt: Real,
        shape: &dyn Shape,
        mass: Real,
        collisions: &[CharacterCollision],
    ) {
        if collisions.is_empty() {
            return;
        }
        controller.solve_character_collision_impulses(
            dt,
            &mut self.bodies,
            &self.colliders,
            &self.query_pipeline,
            shape,
            mass,
            collisions,
            character_sweep_filter(),
        );
    }
}

fn check_hull_points(points: &[Point<Real>]) -> Result<(), String> {
    if points.len() < 4 {
        return Err(format!("hull needs 4 points, got {}", points.len()));
    }
    let origin = points[0];
    let far = points
        .iter()
        .copied()
        .max_by(|a, b| {
            (a - origin)
                .norm_squared()
                .total_cmp(&(b - origin).norm_squared())
        })
        .unwrap_or(origin);
    let axis = far - origin;
    let normal = points
        .iter()
        .map(|p| axis.cross(&(p - origin)))
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))
        .unwrap_or_else(Vector::zeros);
    let scale = axis.norm().max(1.0);
    if normal.norm() <= 1.0e-6 * scale * scale {
        return Err("hull points are collinear".to_string());
    }
    let normal = normal.normalize();
    let spread = points
        .iter()
        .map(|p| normal.dot(&(p - origin)).abs())
        .fold(0.0, Real::max);
    if spread <= 1.0e-4 * scale {
        return Err("hull points are coplanar".to_string());
    }
    Ok(())
}
