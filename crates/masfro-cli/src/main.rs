use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use masfro_core::SpatialIndex;
use masfro_geo::{FloodRasterService, ReturnPeriod, TerrainService};
use masfro_hazard::{FusionConfig, HazardFusion};
use masfro_io::{load_evacuation_centers, load_road_network};
use masfro_routing::{
    EvacuationDirectory, RoutePreferences, Router, RouterConfig, RouteType,
};
use masfro_scenarios::SimulationMode;
use masfro_sim::{Engine, Orchestrator, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "masfro", about = "Flood-aware evacuation routing core", version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Road network statistics
    GraphStats {
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long)]
        edges: PathBuf,
    },
    /// Flood raster metadata for one scenario slice
    RasterInfo {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value = "rr01")]
        return_period: String,
        #[arg(long, default_value_t = 1)]
        time_step: u8,
    },
    /// One-shot risk-aware route on the current (dry) graph
    Route {
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long)]
        edges: PathBuf,
        /// "lat,lon"
        #[arg(long)]
        from: String,
        /// "lat,lon"
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "safest")]
        mode: String,
    },
    /// Run the tick simulation for a fixed number of ticks and print the
    /// final status and network stats
    Simulate {
        #[arg(long)]
        nodes: PathBuf,
        #[arg(long)]
        edges: PathBuf,
        #[arg(long)]
        rasters: PathBuf,
        #[arg(long)]
        dem: Option<PathBuf>,
        #[arg(long)]
        centers: Option<PathBuf>,
        #[arg(long)]
        scenario_dir: Option<PathBuf>,
        #[arg(long, default_value = "light")]
        mode: String,
        #[arg(long, default_value_t = 5)]
        ticks: u32,
    },
}

fn parse_latlon(spec: &str) -> anyhow::Result<(f64, f64)> {
    let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        anyhow::bail!("expected \"lat,lon\", got '{}'", spec);
    }
    let (lat, lon): (f64, f64) = (parts[0].parse()?, parts[1].parse()?);
    if !masfro_core::geo::valid_coordinates(lat, lon) {
        return Err(masfro_core::MasfroError::InvalidCoordinates { lat, lon }.into());
    }
    Ok((lat, lon))
}

fn route_prefs(mode: &str) -> anyhow::Result<RoutePreferences> {
    let route_type = match mode.to_ascii_lowercase().as_str() {
        "safest" => RouteType::Safest,
        "balanced" => RouteType::Balanced,
        "fastest" => RouteType::Fastest,
        "baseline" => RouteType::Baseline,
        other => anyhow::bail!("unknown route mode '{}'", other),
    };
    Ok(RoutePreferences {
        route_type: Some(route_type),
        ..RoutePreferences::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    match cli.command {
        Commands::GraphStats { nodes, edges } => {
            let (network, diag) = load_road_network(&nodes, &edges)?;
            if diag.has_errors() {
                warn!("{}", diag.summary());
            }
            println!("{}", network.stats());
        }

        Commands::RasterInfo {
            data_dir,
            return_period,
            time_step,
        } => {
            let service = FloodRasterService::new(&data_dir);
            let rp = ReturnPeriod::parse(&return_period)?;
            let metadata = service.metadata(rp, time_step)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }

        Commands::Route {
            nodes,
            edges,
            from,
            to,
            mode,
        } => {
            let (network, diag) = load_road_network(&nodes, &edges)?;
            if diag.has_errors() {
                warn!("{}", diag.summary());
            }
            let index = SpatialIndex::build(&network);
            let router = Router::new(RouterConfig::default());
            let result = router.route(
                &network,
                &index,
                parse_latlon(&from)?,
                parse_latlon(&to)?,
                &route_prefs(&mode)?,
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Simulate {
            nodes,
            edges,
            rasters,
            dem,
            centers,
            scenario_dir,
            mode,
            ticks,
        } => {
            let mode = SimulationMode::parse(&mode)?;
            let (network, diag) = load_road_network(&nodes, &edges)?;
            if diag.has_errors() {
                warn!("{}", diag.summary());
            }
            let terrain = match dem {
                Some(path) => Some(TerrainService::open(&path)?),
                None => None,
            };
            let directory = match centers {
                Some(path) => {
                    let (list, diag) = load_evacuation_centers(&path)?;
                    if diag.has_errors() {
                        warn!("{}", diag.summary());
                    }
                    EvacuationDirectory::new(list)
                }
                None => EvacuationDirectory::default(),
            };

            let engine = Engine::new(
                network,
                FloodRasterService::new(&rasters),
                terrain,
                HazardFusion::new(FusionConfig::default()),
                Router::new(RouterConfig::default()),
                directory,
            );
            let config = OrchestratorConfig {
                scenario_dir,
                ..OrchestratorConfig::default()
            };
            let sim = Orchestrator::new(engine, config);

            let start = sim.start(mode).await?;
            info!(
                mode = %start.mode,
                return_period = %start.return_period,
                events = start.events_loaded,
                "simulation started"
            );
            for _ in 0..ticks {
                let report = sim.run_tick(None)?;
                info!(
                    tick = report.tick,
                    time_step = report.time_step,
                    events = report.events_processed,
                    edges_updated = report.fusion.as_ref().map(|f| f.edges_updated).unwrap_or(0),
                    "tick complete"
                );
            }
            sim.stop().await?;

            println!("{}", serde_json::to_string_pretty(&sim.get_status())?);
            println!("{}", sim.network_stats());
            for center in sim.list_evacuation_centers(false) {
                info!(
                    center = %center.name,
                    occupancy = center.current_occupancy,
                    capacity = center.capacity,
                    status = %center.status,
                    "evacuation center"
                );
            }
        }
    }
    Ok(())
}
