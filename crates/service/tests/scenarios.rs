//! End-to-end raycasts through the service against a reference world.

use std::sync::Arc;
use std::time::Duration;

use blockray_common::{CellCoord, HitResult, QueryError, ResultEvent};
use blockray_index::{IndexConfig, IndexGuard, PositionSync};
use blockray_kernel::World;
use blockray_service::{ChannelSink, Config, QueryService, ServiceError};
use crossbeam_channel::Receiver;
use glam::DVec3;
use parking_lot::RwLock;

struct Harness {
    world: Arc<RwLock<World>>,
    sync: PositionSync,
    service: QueryService,
    results: Receiver<ResultEvent>,
}

impl Harness {
    fn new() -> Self {
        let mut config = Config::default();
        config.index = IndexConfig {
            min: [-1024, -1024, -1024],
            depth: 11,
            leaf_capacity: 64,
        };
        config.service.workers = 2;
        let index = Arc::new(IndexGuard::new(config.index.clone()).unwrap());
        let world = World::new().into_shared();
        let (sink, results) = ChannelSink::new();
        let service = QueryService::startup(
            &config,
            Arc::clone(&index),
            world.clone(),
            world.clone(),
            Arc::new(sink),
        )
        .unwrap();
        Self {
            world,
            sync: PositionSync::new(index),
            service,
            results,
        }
    }

    /// Apply the world's pending lifecycle events to the index.
    fn tick(&mut self) {
        let events = {
            let mut world = self.world.write();
            world.step();
            world.drain_events()
        };
        self.sync.apply_all(&events);
    }

    fn cast(&self, origin: [f64; 3], direction: [f64; 3], range: f64) -> HitResult {
        let id = self
            .service
            .submit(DVec3::from_array(origin), DVec3::from_array(direction), range, "script:scout")
            .unwrap();
        let event = self.results.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.correlation_id, id);
        event.hit
    }
}

#[test]
fn entity_ahead_is_hit_at_its_distance() {
    let mut h = Harness::new();
    h.world
        .write()
        .spawn_entity("minecraft:zombie", "Zombie", DVec3::new(10.0, 64.0, 10.0));
    h.tick();

    match h.cast([0.0, 64.0, 10.0], [1.0, 0.0, 0.0], 50.0) {
        HitResult::Entity {
            distance,
            category,
            x,
            y,
            z,
            health,
            max_health,
            ..
        } => {
            assert_eq!(distance, 10.0);
            assert_eq!(category, "minecraft:zombie");
            assert_eq!((x, y, z), (10.0, 64.0, 10.0));
            assert!(health > 0.0 && health <= max_health);
        }
        other => panic!("expected entity, got {other:?}"),
    }
}

#[test]
fn removed_entity_is_a_miss() {
    let mut h = Harness::new();
    let zombie = h
        .world
        .write()
        .spawn_entity("minecraft:zombie", "Zombie", DVec3::new(10.0, 64.0, 10.0));
    h.tick();
    h.world.write().despawn(zombie);
    h.tick();

    assert_eq!(h.cast([0.0, 64.0, 10.0], [1.0, 0.0, 0.0], 50.0), HitResult::Miss);
}

#[test]
fn zero_direction_is_rejected_before_dispatch() {
    let h = Harness::new();
    let err = h
        .service
        .submit(DVec3::new(0.0, 64.0, 10.0), DVec3::ZERO, 50.0, "script:scout")
        .unwrap_err();
    assert_eq!(err, ServiceError::Query(QueryError::InvalidDirection));
    assert_eq!(h.service.stats().submitted, 0);
    assert!(h.results.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn non_finite_input_is_rejected() {
    let h = Harness::new();
    assert_eq!(
        h.service
            .submit(DVec3::new(f64::NAN, 0.0, 0.0), DVec3::X, 10.0, "script:scout"),
        Err(ServiceError::Query(QueryError::InvalidOrigin))
    );
    assert_eq!(
        h.service.submit(DVec3::ZERO, DVec3::X, f64::NAN, "script:scout"),
        Err(ServiceError::Query(QueryError::InvalidRange))
    );
    assert_eq!(
        h.service
            .submit(DVec3::ZERO, DVec3::new(f64::INFINITY, 0.0, 0.0), 10.0, "script:scout"),
        Err(ServiceError::Query(QueryError::InvalidDirection))
    );
}

#[test]
fn nearer_block_hides_entity() {
    let mut h = Harness::new();
    {
        let mut w = h.world.write();
        w.spawn_entity("minecraft:zombie", "Zombie", DVec3::new(10.0, 64.0, 10.0));
        w.set_block(CellCoord::new(5, 64, 10), "minecraft:stone");
    }
    h.tick();

    let hit = h.cast([0.0, 64.0, 10.0], [1.0, 0.0, 0.0], 50.0);
    assert_eq!(
        hit,
        HitResult::Block {
            distance: 5.0,
            x: 5,
            y: 64,
            z: 10,
            namespace: "minecraft:stone".into(),
        }
    );
}

#[test]
fn block_and_entity_at_same_distance_resolves_to_block() {
    let mut h = Harness::new();
    {
        let mut w = h.world.write();
        w.spawn_entity("minecraft:zombie", "Zombie", DVec3::new(10.0, 64.0, 10.0));
        w.set_block(CellCoord::new(10, 64, 10), "minecraft:oak_leaves");
    }
    h.tick();

    let hit = h.cast([0.0, 64.0, 10.0], [1.0, 0.0, 0.0], 50.0);
    assert_eq!(hit.kind(), "Block");
    assert_eq!(hit.distance(), Some(10.0));
}

#[test]
fn range_is_clamped_to_limits() {
    let mut h = Harness::new();
    h.world
        .write()
        .spawn_entity("minecraft:ghast", "Ghast", DVec3::new(0.5, 64.0, 600.5));
    h.tick();

    // A requested range of 0 is raised to the minimum of 1 block.
    assert!(h.cast([0.5, 64.5, 0.0], [0.0, 0.0, 1.0], 0.0).is_miss());
    // A huge range is capped at 2048, which still reaches the ghast.
    let hit = h.cast([0.5, 64.5, 0.0], [0.0, 0.0, 1.0], 1.0e9);
    assert_eq!(hit.distance(), Some(600.0));
}

#[test]
fn moving_entity_is_found_at_its_new_cell() {
    let mut h = Harness::new();
    let zombie = h
        .world
        .write()
        .spawn_entity("minecraft:zombie", "Zombie", DVec3::new(10.5, 64.0, 10.5));
    h.tick();
    h.world
        .write()
        .move_entity(zombie, DVec3::new(20.5, 64.0, 10.5));
    h.tick();

    assert_eq!(h.cast([0.0, 64.0, 10.0], [1.0, 0.0, 0.0], 50.0).distance(), Some(20.0));
}

#[test]
fn ship_block_carries_ship_identity() {
    let h = Harness::new();
    let ship = {
        let mut w = h.world.write();
        let ship = w.add_ship(DVec3::new(30.0, 60.0, 6.0));
        w.set_ship_block(ship, CellCoord::new(0, 4, 4), "create:brass_casing");
        w.set_ship_block(ship, CellCoord::new(1, 4, 4), "create:brass_casing");
        ship
    };

    match h.cast([0.0, 64.5, 10.5], [1.0, 0.0, 0.0], 100.0) {
        HitResult::ShipBlock {
            distance,
            ship_id,
            ship_bounds,
            x,
            y,
            z,
            namespace,
        } => {
            assert_eq!(distance, 30.0);
            assert_eq!(ship_id, ship.0);
            assert_eq!(ship_bounds.min, DVec3::new(30.0, 64.0, 10.0));
            assert_eq!(ship_bounds.max, DVec3::new(32.0, 65.0, 11.0));
            assert_eq!((x, y, z), (0, 4, 4));
            assert_eq!(namespace, "create:brass_casing");
        }
        other => panic!("expected ship block, got {other:?}"),
    }
}

#[test]
fn player_payload_serializes_with_stable_fields() {
    let mut h = Harness::new();
    h.world
        .write()
        .spawn_player("Alex", DVec3::new(6.5, 64.0, 10.5));
    h.tick();

    let id = h
        .service
        .submit(DVec3::new(0.0, 64.5, 10.5), DVec3::X, 32.0, "script:scout")
        .unwrap();
    let event = h.results.recv_timeout(Duration::from_secs(5)).unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["correlation_id"], id.to_string());
    assert_eq!(json["result_kind"], "Player");
    assert_eq!(json["name"], "Alex");
    assert_eq!(json["distance"], 6.0);
    for field in ["x", "y", "z", "health", "max_health", "armor"] {
        assert!(json.get(field).is_some(), "missing {field}");
    }
}
