use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use arm_control::{
    ArmBus, ArmDescriptor, ControlConfig, HardwareConsumer, HardwareProducer, RemoteConsumer,
    RemoteProducer, RobotManager,
};
use relay_client::MemoryRelay;
use servo_transport::ServoBus;

#[derive(Parser, Debug)]
#[command(
    name = "arm",
    version,
    about = "Armlink servo arm CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Arm description JSON; defaults to the stock six-servo arm
    #[arg(long, global = true)]
    descriptor: Option<PathBuf>,

    /// Control config JSON overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List candidate serial ports
    Ports,
    /// Record a calibration preset by moving the arm through its travel
    Calibrate {
        /// Serial port of the arm
        #[arg(long)]
        port: String,
        /// Seconds to sample before completing
        #[arg(long, default_value_t = 20)]
        duration_secs: u64,
        /// Where to write the preset JSON
        #[arg(long, default_value = "calibration.json")]
        out: PathBuf,
    },
    /// Mirror a leader arm onto a follower arm
    Teleop {
        /// Serial port of the leader (moved by hand)
        #[arg(long)]
        leader_port: String,
        /// Serial port of the follower (torque-locked)
        #[arg(long)]
        follower_port: String,
        /// Calibration preset for the leader
        #[arg(long)]
        leader_preset: Option<PathBuf>,
        /// Calibration preset for the follower
        #[arg(long)]
        follower_preset: Option<PathBuf>,
        /// Assume full servo range instead of a preset
        #[arg(long, action = ArgAction::SetTrue)]
        skip_calibration: bool,
        /// Route commands through a relay room instead of wiring directly
        #[arg(long, action = ArgAction::SetTrue)]
        via_relay: bool,
    },
    /// End-to-end loop on mock hardware and the in-process relay
    Demo {
        /// Seconds to run
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let descriptor = match &cli.descriptor {
        Some(path) => ArmDescriptor::load(path)?,
        None => ArmDescriptor::six_dof(),
    };
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).context("parsing control config")?
        }
        None => ControlConfig::default(),
    };

    match cli.command {
        Commands::Ports => ports(),
        Commands::Calibrate {
            port,
            duration_secs,
            out,
        } => calibrate(&descriptor, config, &port, duration_secs, &out).await,
        Commands::Teleop {
            leader_port,
            follower_port,
            leader_preset,
            follower_preset,
            skip_calibration,
            via_relay,
        } => {
            teleop(
                &descriptor,
                config,
                &leader_port,
                &follower_port,
                leader_preset.as_deref(),
                follower_preset.as_deref(),
                skip_calibration,
                via_relay,
            )
            .await
        }
        Commands::Demo { duration_secs } => demo(&descriptor, config, duration_secs).await,
    }
}

fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(feature = "serial")]
fn ports() -> Result<()> {
    let ports = servo_transport::SerialBus::list()?;
    if ports.is_empty() {
        println!("no serial ports found");
        return Ok(());
    }
    for port in ports {
        println!("{}\t{}", port.name, port.driver);
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn ports() -> Result<()> {
    println!("built without the `serial` feature; only mock hardware is available");
    Ok(())
}

#[cfg(feature = "serial")]
async fn calibrate(
    descriptor: &ArmDescriptor,
    config: ControlConfig,
    port: &str,
    duration_secs: u64,
    out: &std::path::Path,
) -> Result<()> {
    let bus = ArmBus::open::<servo_transport::SerialBus>(port, descriptor, config)?;
    info!(port, "starting calibration; move every joint through its full travel");

    let session = bus.start_calibration().await?;
    let progress = session.progress();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                println!("progress: {:5.1}%", *progress.borrow());
            }
        }
    }

    let outcome = session.complete().await?;
    for joint in &outcome.below_threshold {
        tracing::warn!(joint = joint.as_str(), "range too small; joint left uncalibrated");
    }
    outcome.calibrations.save(out)?;
    info!(path = %out.display(), "calibration preset written");
    Ok(())
}

#[cfg(feature = "serial")]
#[allow(clippy::too_many_arguments)]
async fn teleop(
    descriptor: &ArmDescriptor,
    config: ControlConfig,
    leader_port: &str,
    follower_port: &str,
    leader_preset: Option<&std::path::Path>,
    follower_preset: Option<&std::path::Path>,
    skip_calibration: bool,
    via_relay: bool,
) -> Result<()> {
    let leader = ArmBus::open::<servo_transport::SerialBus>(leader_port, descriptor, config.clone())?;
    let follower =
        ArmBus::open::<servo_transport::SerialBus>(follower_port, descriptor, config.clone())?;
    apply_calibration(&leader, leader_preset, skip_calibration)?;
    apply_calibration(&follower, follower_preset, skip_calibration)?;

    if via_relay {
        return teleop_via_relay(descriptor, config, leader, follower).await;
    }

    let robot = arm_control::Robot::new("teleop", descriptor, config);
    robot
        .add_producer(Box::new(HardwareProducer::new(follower)))
        .await?;
    robot
        .set_consumer(Box::new(HardwareConsumer::new(leader)))
        .await?;
    info!("teleoperation active; move the leader arm, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("stopping");
    robot.shutdown().await;
    Ok(())
}

/// Same leader/follower pairing, but bridged through a relay room: the
/// leader publishes joint updates into the room and the follower consumes
/// them, exactly as two arms on different hosts would.
#[cfg(feature = "serial")]
async fn teleop_via_relay(
    descriptor: &ArmDescriptor,
    config: ControlConfig,
    leader_bus: Arc<ArmBus>,
    follower_bus: Arc<ArmBus>,
) -> Result<()> {
    use relay_client::RoomRegistry;

    let relay = MemoryRelay::new();
    let room = relay.create_room("teleop", Some("arm".into())).await?;
    info!(room = room.room_id.as_str(), "bridging through relay room");

    let leader = arm_control::Robot::new("teleop-leader", descriptor, config.clone());
    leader
        .add_producer(Box::new(RemoteProducer::new(
            Box::new(relay.producer()),
            room.workspace_id.as_str(),
            room.room_id.as_str(),
            "leader",
            config.state_sync_interval(),
        )))
        .await?;
    leader
        .set_consumer(Box::new(HardwareConsumer::new(leader_bus)))
        .await?;

    let follower = arm_control::Robot::new("teleop-follower", descriptor, config.clone());
    follower
        .add_producer(Box::new(HardwareProducer::new(follower_bus)))
        .await?;
    follower
        .set_consumer(Box::new(RemoteConsumer::new(
            Box::new(relay.consumer()),
            room.workspace_id.as_str(),
            room.room_id.as_str(),
            "follower",
            config.message_timeout(),
        )))
        .await?;
    info!("teleoperation active; move the leader arm, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("stopping");
    leader.shutdown().await;
    follower.shutdown().await;
    Ok(())
}

#[cfg(feature = "serial")]
fn apply_calibration(
    bus: &Arc<ArmBus>,
    preset: Option<&std::path::Path>,
    skip_calibration: bool,
) -> Result<()> {
    match preset {
        Some(path) => {
            bus.apply_preset(arm_control::CalibrationSet::load(path)?);
            Ok(())
        }
        None if skip_calibration => {
            bus.skip_calibration();
            Ok(())
        }
        None => anyhow::bail!("no preset given; pass --skip-calibration to assume full range"),
    }
}

#[cfg(not(feature = "serial"))]
async fn calibrate(
    _descriptor: &ArmDescriptor,
    _config: ControlConfig,
    _port: &str,
    _duration_secs: u64,
    _out: &std::path::Path,
) -> Result<()> {
    anyhow::bail!("calibrate requires the `serial` feature")
}

#[cfg(not(feature = "serial"))]
#[allow(clippy::too_many_arguments)]
async fn teleop(
    _descriptor: &ArmDescriptor,
    _config: ControlConfig,
    _leader_port: &str,
    _follower_port: &str,
    _leader_preset: Option<&std::path::Path>,
    _follower_preset: Option<&std::path::Path>,
    _skip_calibration: bool,
    _via_relay: bool,
) -> Result<()> {
    anyhow::bail!("teleop requires the `serial` feature")
}

/// Mock leader arm -> robot -> relay room -> second robot -> mock follower.
/// The same wiring works against a real relay backend and real serial buses.
async fn demo(descriptor: &ArmDescriptor, config: ControlConfig, duration_secs: u64) -> Result<()> {
    use servo_transport::MockBus;

    let relay = MemoryRelay::new();
    let manager = RobotManager::new(Arc::new(relay.clone()));
    let room = manager.create_room("demo", Some("arm".into())).await?;
    info!(room = room.room_id.as_str(), "demo room created");

    // Leader side: a mock arm someone "moves by hand".
    let leader_mock = MockBus::open("mock-leader", config.baud_rate)?;
    let leader_hand = leader_mock.handle();
    let leader_bus = ArmBus::new(Box::new(leader_mock), descriptor, config.clone());
    leader_bus.skip_calibration();

    let leader = manager.create_robot("leader", descriptor, config.clone())?;
    leader
        .add_producer(Box::new(RemoteProducer::new(
            Box::new(relay.producer()),
            room.workspace_id.as_str(),
            room.room_id.as_str(),
            "leader",
            config.state_sync_interval(),
        )))
        .await?;
    leader
        .set_consumer(Box::new(HardwareConsumer::new(Arc::clone(&leader_bus))))
        .await?;

    // Follower side: a second robot driven from the room.
    let follower_mock = MockBus::open("mock-follower", config.baud_rate)?;
    let follower_servos = follower_mock.handle();
    let follower_bus = ArmBus::new(Box::new(follower_mock), descriptor, config.clone());
    follower_bus.skip_calibration();

    let follower = manager.create_robot("follower", descriptor, config.clone())?;
    follower
        .add_producer(Box::new(HardwareProducer::new(Arc::clone(&follower_bus))))
        .await?;
    follower
        .set_consumer(Box::new(RemoteConsumer::new(
            Box::new(relay.consumer()),
            room.workspace_id.as_str(),
            room.room_id.as_str(),
            "follower",
            config.message_timeout(),
        )))
        .await?;

    let _watch = follower.observe_joints(|change| {
        info!(joint = change.name.as_str(), value = change.value, "follower moved");
    });

    // Sweep the leader's first servo back and forth.
    info!("running demo loop for {duration_secs}s");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    let mut raw: u16 = 1000;
    let mut step: i32 = 200;
    while tokio::time::Instant::now() < deadline {
        leader_hand.set_position(1, raw);
        let next = i32::from(raw) + step;
        if !(1000..=3000).contains(&next) {
            step = -step;
        }
        raw = (i32::from(raw) + step).clamp(0, 4095) as u16;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mirrored = follower_servos.position(1);
    info!(mirrored, "follower's first servo after the sweep");

    manager.remove_robot("leader").await?;
    manager.remove_robot("follower").await?;
    Ok(())
}
