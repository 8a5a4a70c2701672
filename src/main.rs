mod backend;
mod config;
mod geo;
mod map;
mod tracker;
mod web;

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use crate::backend::{Backend, HttpBackend, Route};
use crate::config::{Config, RelayConfig, SimulatorConfig};
use crate::geo::polyline::{self, LineString};
use crate::map::LogMapView;
use crate::tracker::location::open_provider;
use crate::tracker::{FeedSource, SessionSettings, SimulationPlan, SpectatorTracker, TripSession};

#[derive(Parser)]
#[command(name = "trip-tracker")]
#[command(about = "Live tracking for collection trips")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "trip-tracker.yaml")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a trip, reporting positions until the route ends or Ctrl-C
    Drive {
        #[arg(long)]
        route: String,
        #[arg(long)]
        vehicle: String,
        /// Animate the route polyline instead of reading the location source
        #[arg(long)]
        simulate: bool,
    },
    /// Follow another trip's recorded positions
    Watch {
        #[arg(long)]
        trip: String,
    },
    /// List routes known to the backend
    Routes,
    /// List vehicles known to the backend
    Vehicles,
    /// Normalize a route geometry file and show how it would be simulated
    CheckRoute { file: String },
    /// Run the in-memory rehearsal backend
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckRoute { file } => check_route(&cli.config, &file),
        command => {
            let config = match Config::from_file(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error loading {}: {}", cli.config, e);
                    return ExitCode::FAILURE;
                }
            };
            match command {
                Commands::Drive {
                    route,
                    vehicle,
                    simulate,
                } => drive(&config, &route, &vehicle, simulate).await,
                Commands::Watch { trip } => watch(&config, &trip).await,
                Commands::Routes => routes(&config).await,
                Commands::Vehicles => vehicles(&config).await,
                Commands::Serve => serve(config).await,
                Commands::CheckRoute { .. } => unreachable!(),
            }
        }
    }
}

fn connect(config: &Config) -> Option<Arc<dyn Backend>> {
    match HttpBackend::new(&config.api) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            eprintln!("Error creating backend client: {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn find_route(backend: &dyn Backend, id: &str) -> Result<Route, String> {
    let routes = backend
        .list_routes()
        .await
        .map_err(|e| format!("Error listing routes: {e}"))?;
    routes
        .into_iter()
        .find(|r| r.id == id || r.external_id.as_deref() == Some(id))
        .ok_or_else(|| format!("Route {id} not found"))
}

async fn drive(config: &Config, route_id: &str, vehicle_id: &str, simulate: bool) -> ExitCode {
    let Some(backend) = connect(config) else {
        return ExitCode::FAILURE;
    };

    let route = match find_route(backend.as_ref(), route_id).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let feed = if simulate {
        FeedSource::Simulated
    } else {
        match open_provider(&config.geolocation).await {
            Ok(provider) => FeedSource::Gps(provider),
            Err(e) => {
                eprintln!("Error opening location source: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    let mut session = TripSession::new(
        backend,
        Arc::new(LogMapView),
        SessionSettings::from_config(config),
    );
    let trip = match session.start(&route, vehicle_id, feed).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Could not start trip: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("Trip {} started on route '{}'", trip.id, route.name);

    match session.run_until(shutdown_signal()).await {
        Ok(reason) => {
            println!("Trip {} closed ({})", trip.id, reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error stopping trip: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn watch(config: &Config, trip_id: &str) -> ExitCode {
    let Some(backend) = connect(config) else {
        return ExitCode::FAILURE;
    };

    let mut spectator = SpectatorTracker::new(
        backend,
        Arc::new(LogMapView),
        config.spectator.poll_interval,
    );
    spectator.watch(trip_id).await;
    shutdown_signal().await;
    spectator.unwatch().await;

    println!("Saw {} positions", spectator.path().len());
    ExitCode::SUCCESS
}

async fn routes(config: &Config) -> ExitCode {
    let Some(backend) = connect(config) else {
        return ExitCode::FAILURE;
    };

    match backend.list_routes().await {
        Ok(routes) => {
            println!("{} routes", routes.len());
            for route in routes {
                println!(
                    "  {}: {} ({} points){}",
                    route.id,
                    route.name,
                    route.polyline.len(),
                    route
                        .external_id
                        .map(|ext| format!(", backend ref {ext}"))
                        .unwrap_or_default()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error listing routes: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn vehicles(config: &Config) -> ExitCode {
    let Some(backend) = connect(config) else {
        return ExitCode::FAILURE;
    };

    match backend.list_vehicles().await {
        Ok(vehicles) => {
            println!("{} vehicles", vehicles.len());
            for vehicle in vehicles {
                let state = if vehicle.active { "active" } else { "inactive" };
                println!("  {}: {} ({})", vehicle.id, vehicle.plate, state);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error listing vehicles: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn check_route(config_path: &str, path: &str) -> ExitCode {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error reading file: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let raw: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let points = match polyline::normalize(&raw) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Unusable geometry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // timing only; a missing config file falls back to defaults
    let (simulator, relay) = match Config::from_file(config_path) {
        Ok(config) => (config.simulator, config.relay),
        Err(e) => {
            log::debug!("Using default timing ({})", e);
            (SimulatorConfig::default(), RelayConfig::default())
        }
    };

    println!("{} points", points.len());
    for (i, p) in points.iter().enumerate() {
        println!("  {}: {:.6}, {:.6}", i + 1, p.lat, p.lng);
    }
    match serde_json::to_string(&LineString::from_points(&points)) {
        Ok(wire) => println!("Wire form: {}", wire),
        Err(e) => log::warn!("Could not encode wire form: {}", e),
    }

    match SimulationPlan::new(points, &simulator, relay.throttle) {
        Ok(plan) => {
            println!(
                "Simulation: {} ticks of {:?}, {:?} in total",
                plan.total_ticks(),
                plan.tick(),
                plan.duration()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Cannot simulate: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> ExitCode {
    match web::run_server(config.server).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
