use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use blockray_common::{CellCoord, CorrelationId, ResultEvent};
use blockray_index::{IndexGuard, PositionSync};
use blockray_kernel::World;
use blockray_service::{ChannelSink, Config, QueryService, ServiceError};
use clap::{Parser, Subcommand};
use glam::DVec3;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockray-cli", about = "CLI tool for the blockray raycast service")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info and the effective config
    Info,
    /// Run the canonical queries against a small reference world
    Scenario,
    /// Fire concurrent queries while the host moves entities
    Stress {
        /// Number of submitting threads
        #[arg(short, long, default_value = "4")]
        readers: usize,
        /// Number of host ticks that move the population
        #[arg(short, long, default_value = "1000")]
        moves: usize,
        /// Entities in the moving population
        #[arg(short, long, default_value = "256")]
        entities: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("blockray-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", blockray_common::crate_info());
            println!("index: {}", blockray_index::crate_info());
            println!("raycast: {}", blockray_raycast::crate_info());
            println!("service: {}", blockray_service::crate_info());
            println!("\neffective config:\n{}", config.to_yaml()?);
        }
        Commands::Scenario => run_scenario(&config)?,
        Commands::Stress {
            readers,
            moves,
            entities,
        } => run_stress(&config, readers, moves, entities)?,
    }

    Ok(())
}

/// Index, sync and service wired to a reference world.
fn start(
    config: &Config,
    world: World,
) -> anyhow::Result<(
    Arc<parking_lot::RwLock<World>>,
    PositionSync,
    QueryService,
    crossbeam_channel::Receiver<ResultEvent>,
)> {
    let index = Arc::new(IndexGuard::new(config.index.clone())?);
    let mut world = world;
    let mut sync = PositionSync::new(Arc::clone(&index));
    sync.apply_all(&world.drain_events());
    let world = world.into_shared();
    let (sink, results) = ChannelSink::new();
    let service = QueryService::startup(
        config,
        index,
        world.clone(),
        world.clone(),
        Arc::new(sink),
    )?;
    Ok((world, sync, service, results))
}

fn await_result(
    results: &crossbeam_channel::Receiver<ResultEvent>,
    id: CorrelationId,
) -> anyhow::Result<ResultEvent> {
    let event = results
        .recv_timeout(Duration::from_secs(5))
        .context("no result within 5s")?;
    anyhow::ensure!(event.correlation_id == id, "result for unexpected query {}", event.correlation_id);
    Ok(event)
}

fn run_scenario(config: &Config) -> anyhow::Result<()> {
    let mut world = World::new();
    let zombie = world.spawn_entity("minecraft:zombie", "Zombie", DVec3::new(10.0, 64.0, 10.0));
    world.spawn_player("Alex", DVec3::new(0.5, 64.0, 20.5));
    let ship = world.add_ship(DVec3::new(40.0, 60.0, 6.0));
    world.set_ship_block(ship, CellCoord::new(0, 4, 4), "create:brass_casing");
    let (world, mut sync, service, results) = start(config, world)?;

    let cases: [(&str, DVec3, DVec3); 3] = [
        ("entity ahead", DVec3::new(0.0, 64.0, 10.0), DVec3::X),
        ("player ahead", DVec3::new(0.5, 64.5, 0.0), DVec3::Z),
        ("zero direction", DVec3::new(0.0, 64.0, 10.0), DVec3::ZERO),
    ];
    for (label, origin, direction) in cases {
        report(&service, &results, label, origin, direction)?;
    }

    world.write().set_block(CellCoord::new(5, 64, 10), "minecraft:stone");
    report(&service, &results, "block before entity", DVec3::new(0.0, 64.0, 10.0), DVec3::X)?;

    world.write().clear_block(CellCoord::new(5, 64, 10));
    world.write().set_block(CellCoord::new(10, 64, 10), "minecraft:glass");
    report(&service, &results, "block and entity tie", DVec3::new(0.0, 64.0, 10.0), DVec3::X)?;
    world.write().clear_block(CellCoord::new(10, 64, 10));

    let events = {
        let mut w = world.write();
        w.despawn(zombie);
        w.step();
        w.drain_events()
    };
    sync.apply_all(&events);
    report(&service, &results, "entity removed", DVec3::new(0.0, 64.0, 10.0), DVec3::X)?;
    report(&service, &results, "ship hull", DVec3::new(0.0, 64.5, 10.5), DVec3::X)?;

    service.shutdown();
    println!("\nservice: {:?}", service.stats());
    println!("sync: {:?}", sync.stats());
    Ok(())
}

fn report(
    service: &QueryService,
    results: &crossbeam_channel::Receiver<ResultEvent>,
    label: &str,
    origin: DVec3,
    direction: DVec3,
) -> anyhow::Result<()> {
    match service.submit(origin, direction, 64.0, "script:scenario") {
        Ok(id) => {
            let event = await_result(results, id)?;
            println!("{label}: {}", serde_json::to_string(&event)?);
        }
        Err(err) => println!("{label}: rejected ({err})"),
    }
    Ok(())
}

fn run_stress(config: &Config, readers: usize, moves: usize, entities: usize) -> anyhow::Result<()> {
    anyhow::ensure!(readers > 0, "need at least one reader");
    let mut world = World::new();
    let crowd: Vec<_> = (0..entities)
        .map(|i| {
            let lane = (i % 16) as f64;
            world.spawn_entity(
                "minecraft:sheep",
                format!("Sheep {i}"),
                DVec3::new(4.5 + (i / 16) as f64, 64.0, lane + 0.5),
            )
        })
        .collect();
    let (world, mut sync, service, results) = start(config, world)?;
    println!("Stress: readers={readers}, moves={moves}, entities={entities}");

    let started = Instant::now();
    let stop = AtomicBool::new(false);
    let (accepted, busy) = thread::scope(|s| {
        let stop = &stop;
        let service = &service;
        let submitters: Vec<_> = (0..readers)
            .map(|r| {
                s.spawn(move || {
                    let requester = format!("script:stress-{r}");
                    let mut accepted = 0_u64;
                    let mut busy = 0_u64;
                    let mut n = 0_u64;
                    while !stop.load(Ordering::Relaxed) {
                        n += 1;
                        let lane = (n % 16) as f64 + 0.5;
                        match service.submit(DVec3::new(0.0, 64.5, lane), DVec3::X, 256.0, &requester) {
                            Ok(_) => accepted += 1,
                            Err(ServiceError::Busy) => {
                                busy += 1;
                                thread::yield_now();
                            }
                            Err(err) => {
                                tracing::warn!(%err, "submit failed");
                                break;
                            }
                        }
                    }
                    (accepted, busy)
                })
            })
            .collect();

        for step in 0..moves {
            let events = {
                let mut w = world.write();
                for (i, h) in crowd.iter().enumerate() {
                    let lane = ((i + step) % 16) as f64;
                    w.move_entity(*h, DVec3::new(4.5 + (i / 16) as f64, 64.0, lane + 0.5));
                }
                w.step();
                w.drain_events()
            };
            sync.apply_all(&events);
        }
        stop.store(true, Ordering::Relaxed);

        submitters
            .into_iter()
            .filter_map(|h| h.join().ok())
            .fold((0_u64, 0_u64), |(a, b), (x, y)| (a + x, b + y))
    });
    service.shutdown();
    let elapsed = started.elapsed();

    let delivered = results.try_iter().count();
    let stats = service.stats();
    println!("elapsed: {elapsed:?}");
    println!("accepted: {accepted}, busy: {busy}, delivered: {delivered}");
    println!(
        "throughput: {:.0} queries/s",
        stats.completed as f64 / elapsed.as_secs_f64()
    );
    println!("service: {stats:?}");
    println!("sync: {:?}", sync.stats());
    println!("index generation: {}", sync.index().generation());
    anyhow::ensure!(
        delivered as u64 + stats.dropped + stats.delivery_failures == accepted,
        "lost results: accepted {accepted}, delivered {delivered}"
    );
    Ok(())
}
