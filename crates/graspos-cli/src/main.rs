//! `graspos-cli` – GraspOS command line entry point
//!
//! This binary wires the stack together and runs one pick-and-place
//! session.  It:
//!
//! 1. Loads `~/.graspos/config.toml`, writing the defaults on first run.
//! 2. Connects to the manipulator (telemetry + command ports) and the
//!    gripper.
//! 3. Listens for operator signals on the loopback intake socket.
//! 4. Reads perception cycles as JSON lines on **stdin** and drives the
//!    servo loop until the feed ends or **Ctrl-C** is pressed.
//! 5. Prints the session statistics.

mod config;

use std::sync::Arc;

use colored::Colorize;
use tokio::io::BufReader;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use graspos_hal::gripper::{DisabledGripper, Gripper, ScriptGripper};
use graspos_hal::{Backoff, CommandChannel, TelemetryDecoder};
use graspos_kernel::MotionSupervisor;
use graspos_middleware::{CommandIntake, EventBus, JsonLinesFeed, Topic};
use graspos_runtime::{SearchScheduler, SequenceEngine, ServoLoop, SessionStats};
use graspos_types::{ArmError, EventPayload};

fn main() {
    // The runtime is built after tracing so the OTLP exporter never needs one.
    let _tracing = graspos_runtime::init_tracing("graspos");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing the current step …".yellow().bold());
        shutdown_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the feed to end the session");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run_session(cfg, shutdown_rx));
    // A pending stdin read would otherwise block exit until the next line.
    runtime.shutdown_background();

    match result {
        Ok(stats) => print_stats(&stats),
        Err(e) => {
            println!("{}: {}", "Session failed".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn first_run() -> config::Config {
    let mut cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} No config found; defaults written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

async fn run_session(
    cfg: config::Config,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionStats, ArmError> {
    let robot = &cfg.robot;
    let telemetry = Arc::new(TelemetryDecoder::new(robot.telemetry_endpoint(), robot.telemetry_timeout()));
    let commands = Arc::new(
        CommandChannel::new(robot.command_endpoint(), robot.connect_timeout())
            .with_ack_timeout(robot.ack_timeout())
            .with_backoff(Backoff::new(
                std::time::Duration::from_millis(100),
                std::time::Duration::from_secs(1),
                robot.connect_attempts,
            )),
    );

    println!("\n  Connecting to manipulator at {} …", robot.ip.bold());
    let supervisor = Arc::new(MotionSupervisor::new(telemetry, commands, cfg.motion));
    let pose = supervisor.connect().await?;
    println!(
        "  {} connected, tool at ({:.1}, {:.1}, {:.1}) mm",
        "✓".green().bold(),
        pose.x * 1000.0,
        pose.y * 1000.0,
        pose.z * 1000.0
    );

    let gripper: Arc<dyn Gripper> = if cfg.gripper.enabled {
        Arc::new(ScriptGripper::new(
            cfg.gripper.id.clone(),
            supervisor.command_sink(),
            cfg.gripper.open_script.clone(),
            cfg.gripper.close_script.clone(),
        ))
    } else {
        Arc::new(DisabledGripper)
    };
    if let Err(e) = gripper.connect().await {
        println!("  {} gripper unavailable ({e}); continuing without it", "⚠".yellow());
    }

    let bus = EventBus::default();
    spawn_alert_printer(&bus);

    let engine = Arc::new(SequenceEngine::new(
        Arc::clone(&supervisor),
        Arc::clone(&gripper),
        bus.clone(),
        cfg.sequence,
    ));
    let search = SearchScheduler::new(
        Arc::clone(&supervisor),
        bus.clone(),
        std::time::Duration::from_millis(cfg.search.dwell_ms),
    );
    let mut servo = ServoLoop::new(Arc::clone(&supervisor), engine, search, bus.clone(), cfg.servo)
        .with_calibration(cfg.calibration)
        .with_filter(&cfg.perception)
        .with_placement(cfg.placement.clone())
        .with_grip_forces(cfg.grip_force.clone())
        .with_grid(cfg.search.grid.clone());

    if cfg.intake.enabled {
        match CommandIntake::bind(&cfg.intake.addr).await {
            Ok(intake) => {
                let intake = intake.with_read_timeout(cfg.intake.read_timeout());
                let (signals, _task) = intake.spawn(cfg.intake.queue_capacity);
                servo = servo.with_signals(signals);
                println!("  Operator signals on {}", cfg.intake.addr.bold());
            }
            Err(e) => warn!(error = %e, "operator intake disabled"),
        }
    }

    println!("  Reading detections from {} (one JSON array per line)\n", "stdin".bold());
    info!(auto_pick = cfg.servo.auto_pick, auto_place = cfg.servo.auto_place, "session started");

    let mut feed = JsonLinesFeed::new(BufReader::new(tokio::io::stdin()));
    let stats = servo.run(&mut feed, shutdown).await;

    if let Err(e) = gripper.disconnect().await {
        warn!(error = %e, "gripper disconnect failed");
    }
    supervisor.disconnect();
    Ok(stats)
}

/// Echo faults to the console as they are published.
fn spawn_alert_printer(bus: &EventBus) {
    let mut alerts = bus.subscribe_to(Topic::Alerts);
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(event) => {
                    if let EventPayload::Fault { component, message } = event.payload {
                        println!("  {} {}: {}", "✗".red().bold(), component.bold(), message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_stats(stats: &SessionStats) {
    let runtime = stats.runtime();
    println!();
    println!("{}", "  Session statistics".bold().cyan());
    println!("    Objects processed : {}", stats.objects_processed.to_string().bold());
    println!("    Perception cycles : {}", stats.cycles);
    println!("    Runtime           : {:.1} s", runtime.num_milliseconds() as f64 / 1000.0);
    println!();
}

fn print_banner() {
    println!();
    println!("{}", r#"   ______                      ____  _____"#.bold().cyan());
    println!("{}", r#"  / ____/________ __________  / __ \/ ___/"#.bold().cyan());
    println!("{}", r#" / / __/ ___/ __ `/ ___/ __ \/ / / /\__ \ "#.bold().cyan());
    println!("{}", r#"/ /_/ / /  / /_/ (__  ) /_/ / /_/ /___/ / "#.bold().cyan());
    println!("{}", r#"\____/_/   \__,_/____/ .___/\____//____/  "#.bold().cyan());
    println!("{}", r#"                    /_/                   "#.bold().cyan());
    println!();
    println!("  {} {}", "GraspOS".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Closed-loop visual pick and place");
    println!();
}
