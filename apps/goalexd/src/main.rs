use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use goalex_kernel::ExecutiveBuilder;
use goalex_processors::sim::SimRobot;
use goalex_protocol::{
    ExecutiveMode, ExecutiveModeDocument, GoalStorePort, MapId, RobotPath, Transform, World,
};
use goalex_runtime::ExecutiveConfig;
use goalex_store::MemoryGoalStore;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_MAP: &str = "demo-map";

#[derive(Debug, Parser)]
#[command(name = "goalexd")]
#[command(about = "Goal executive demo daemon on an in-memory store and a simulated robot")]
struct Cli {
    /// TOML file with executive settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_filter: String,
    #[arg(long)]
    json_logs: bool,
    #[arg(long, default_value = "demo-user")]
    user: String,
    #[arg(long, default_value = "demo-robot")]
    robot: String,
    /// How long to run before shutting down.
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,
    #[arg(long)]
    tick_ms: Option<u64>,
    /// Start in stop mode, which holds background goals.
    #[arg(long)]
    stop_mode: bool,
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_filter));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

async fn load_config(path: Option<&Path>) -> Result<ExecutiveConfig> {
    let Some(path) = path else {
        return Ok(ExecutiveConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

/// Seed the demo map's points of interest, the mode document and two user
/// goals.
async fn seed_store(store: &MemoryGoalStore, robot: &RobotPath, mode: ExecutiveMode) -> Result<()> {
    let map = MapId::from(DEMO_MAP);
    let points = [
        ("poi-kitchen", "kitchen", 4.0, 1.0),
        ("poi-dock", "dock", 0.0, 0.0),
    ];
    for (key, name, x, y) in points {
        store.put_world_object(
            robot,
            &map,
            key,
            json!({
                "type": "point_of_interest",
                "variables": {"location": Transform::at(x, y).to_wire(), "name": name},
            }),
        );
    }
    store
        .set_executive_mode(robot, ExecutiveModeDocument::new(mode, 1).to_wire())
        .await
        .context("failed to seed executive mode")?;
    store
        .put_goal(
            robot,
            "demo-visit-kitchen",
            json!({
                "type": "driveWaitPOI",
                "version": "1.0.0",
                "timestamp": 1,
                "priority": 150,
                "parameters": {"target": "poi-kitchen", "time": 500},
            }),
        )
        .await
        .context("failed to seed demo goal")?;
    store
        .put_goal(
            robot,
            "demo-alarm",
            json!({
                "type": "alarm",
                "version": "1.0.0",
                "timestamp": 2,
                "priority": 120,
                "parameters": {"time": 300},
            }),
        )
        .await
        .context("failed to seed demo goal")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = load_config(cli.config.as_deref()).await?;
    if let Some(tick_ms) = cli.tick_ms {
        config.tick_period_ms = tick_ms;
    }
    let robot = RobotPath::new(cli.user.as_str(), cli.robot.as_str());
    let store = Arc::new(MemoryGoalStore::new(config.notification_buffer));
    let mode = if cli.stop_mode {
        ExecutiveMode::Stop
    } else {
        ExecutiveMode::RandomDriver
    };
    seed_store(&store, &robot, mode).await?;

    let sim = SimRobot::arriving();
    let handle = ExecutiveBuilder::new(store.clone(), robot.clone(), sim.collaborators())
        .config(config)
        .start()
        .await?;

    let mut world = World::new(DEMO_MAP, "demo");
    world.custom_transforms = vec![
        Transform::at(1.0, 0.0),
        Transform::at(2.0, 2.0),
        Transform::at(-1.0, 3.0),
    ];
    let executive = handle.executive();
    executive.set_transform(Transform::at(0.0, 0.0));
    executive.set_world(Some(world));
    executive.set_robot_name(cli.robot.as_str());
    executive.set_battery(false, false);
    executive.enable();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(cli.duration_secs);
    let mut report = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = report.tick() => {
                let snapshot = executive.snapshot();
                info!(
                    current = ?snapshot.current.as_ref().map(|goal| goal.as_str()),
                    live = snapshot.goals.len(),
                    completed = snapshot.completed.len(),
                    rejected = snapshot.rejected.len(),
                    actions = sim.actions.history().len(),
                    "executive status"
                );
            }
        }
    }

    handle.shutdown().await?;
    let remaining = store.read_goals(&robot).await?.len();
    info!(
        remaining,
        archived = store.archived_goals(&robot).len(),
        sounds = sim.sounds.played().len(),
        "demo finished"
    );
    Ok(())
}
