//! Fleet demo
//!
//! Headless run of the scene core: a few ships carrying turrets and lights
//! fly through an asteroid field. Asteroids that drift out of range are
//! destroyed through deferred commands and respawned; each frame ends with an
//! instance buffer flush against an in-memory GPU.
//!
//! Usage: `fleet_demo [scene.toml|scene.ron]`

use std::cell::Cell;
use std::rc::Rc;

use rand::Rng;
use scene_engine::foundation::logging;
use scene_engine::prelude::*;

const SHIP_COUNT: usize = 4;
const TURRETS_PER_SHIP: usize = 2;
const ASTEROID_COUNT: usize = 200;
const FIELD_RADIUS: f32 = 50.0;
const FRAMES: usize = 120;
const FRAME_TIME: f32 = 1.0 / 60.0;

struct Asteroid {
    entity: Entity,
    velocity: Vec3,
}

struct FleetDemo {
    scene: Scene,
    assets: AssetRegistry,
    gpu: HeadlessGpu,
    ships: Vec<Entity>,
    asteroids: Vec<Asteroid>,
    asteroid_mesh: MeshId,
    destroyed: Rc<Cell<usize>>,
}

impl FleetDemo {
    fn new(config: SceneConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let bus = EventManager::shared();
        let mut scene = Scene::new("fleet", Rc::clone(&bus), config);

        let destroyed = Rc::new(Cell::new(0));
        let counter = Rc::clone(&destroyed);
        bus.subscribe(
            EventKind::EntityDestroyed,
            SceneFilter::Scene(scene.id()),
            move |_: &Event| counter.set(counter.get() + 1),
        );

        let mut assets = AssetRegistry::new();
        let hull = assets.insert_mesh("hull", 2)?;
        let turret = assets.insert_mesh("turret", 1)?;
        let asteroid_mesh = assets.insert_mesh("asteroid", 1)?;
        let paint = assets.insert_material(Material::new("hull_paint", [0.2, 0.3, 0.8, 1.0]));

        let mut ships = Vec::with_capacity(SHIP_COUNT);
        for i in 0..SHIP_COUNT {
            let ship = scene.create_entity(format!("ship{i}"));
            scene.assign_mesh(ship, hull, &assets)?;
            scene.set_material(ship, 0, paint);
            scene.set_position(ship, Vec3::new(i as f32 * 8.0, 0.0, 0.0));

            for t in 0..TURRETS_PER_SHIP {
                let mount = scene.create_entity(format!("ship{i}_turret{t}"));
                scene.assign_mesh(mount, turret, &assets)?;
                let side = if t % 2 == 0 { 1.0 } else { -1.0 };
                scene.set_position(mount, Vec3::new(side * 1.5, 0.5, 0.0));
                scene.set_parent(mount, ship);
            }

            let lamp = scene.create_entity(format!("ship{i}_lamp"));
            scene.add_component(lamp, LightFactory::spot(Vec3::new(1.0, 0.9, 0.7), 3.0, 30.0, 0.3, 0.5));
            scene.set_position(lamp, Vec3::new(0.0, 0.0, -2.0));
            scene.set_parent(lamp, ship);
            ships.push(ship);
        }

        let mut demo = Self {
            scene,
            assets,
            gpu: HeadlessGpu::new(),
            ships,
            asteroids: Vec::with_capacity(ASTEROID_COUNT),
            asteroid_mesh,
            destroyed,
        };
        for _ in 0..ASTEROID_COUNT {
            demo.spawn_asteroid()?;
        }
        Ok(demo)
    }

    fn spawn_asteroid(&mut self) -> Result<(), AssetError> {
        let mut rng = rand::thread_rng();
        let entity = self.scene.create_entity("asteroid");
        self.scene.assign_mesh(entity, self.asteroid_mesh, &self.assets)?;
        self.scene.set_local_transform(
            entity,
            Transform::new(
                Vec3::new(
                    rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
                ),
                Quat::identity(),
                Vec3::repeat(rng.gen_range(0.5..2.0)),
            ),
        );
        let velocity = Vec3::new(rng.gen_range(-4.0..4.0), 0.0, rng.gen_range(-4.0..4.0));
        self.asteroids.push(Asteroid { entity, velocity });
        Ok(())
    }

    fn update(&mut self, frame: usize) -> Result<FrameStats, Box<dyn std::error::Error>> {
        let heading = frame as f32 * FRAME_TIME;
        for (i, &ship) in self.ships.iter().enumerate() {
            let angle = heading + i as f32;
            self.scene.set_orientation(ship, Quat::from_axis_angle(&Vec3::y_axis(), angle));
        }

        let mut survivors = Vec::with_capacity(self.asteroids.len());
        for asteroid in std::mem::take(&mut self.asteroids) {
            let Some(position) = self.scene.transform(asteroid.entity).map(TransformComponent::position) else {
                continue;
            };
            let next = position + asteroid.velocity * FRAME_TIME;
            if next.xz().norm() > FIELD_RADIUS {
                self.scene.defer_destroy(asteroid.entity);
            } else {
                self.scene.set_position(asteroid.entity, next);
                survivors.push(asteroid);
            }
        }
        self.asteroids = survivors;
        while self.asteroids.len() < ASTEROID_COUNT {
            self.spawn_asteroid()?;
        }

        Ok(self.scene.end_frame(&mut self.gpu)?)
    }

    fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for frame in 0..FRAMES {
            let stats = self.update(frame)?;
            if frame % 30 == 0 {
                log::info!(
                    "Frame {frame}: {} entities, {} groups, {} ranges / {} bytes uploaded",
                    stats.entity_count,
                    stats.group_count,
                    stats.upload.ranges,
                    stats.upload.bytes
                );
            }
        }

        for draw in self.scene.draw_list(&self.assets) {
            log::info!(
                "Draw '{}' {:?} x{} from buffer {:?}",
                draw.mesh_name,
                draw.materials,
                draw.instance_count,
                draw.instance_buffer
            );
        }
        for light in self.scene.collect_lights() {
            log::debug!("{:?} light at {:?} facing {:?}", light.kind, light.position, light.direction);
        }
        log::info!(
            "Destroyed {} asteroids; GPU holds {} buffers ({} bytes)",
            self.destroyed.get(),
            self.gpu.live_buffers(),
            self.gpu.allocated_bytes()
        );
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => SceneConfig::load_from_file(&path)?,
        None => SceneConfig::default(),
    };
    logging::init_with_config(&config.logging);
    config.validate()?;

    log::info!("Starting fleet demo");
    let mut demo = FleetDemo::new(config)?;

    match demo.run() {
        Ok(()) => {
            log::info!("Fleet demo completed successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Fleet demo failed: {e}");
            Err(e)
        }
    }
}
