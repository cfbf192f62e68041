//! `wayhub-cli` – the hub's entry point.
//!
//! Wires the four I/O actors to the dispatcher:
//!
//! 1. Loads `~/.wayhub/config.toml` (with `WAYHUB_*` env overrides), falling
//!    back to defaults when absent.
//! 2. Probes the planning service and reports its status.
//! 3. Binds the operator WebSocket link, opens the motion controller port
//!    (or the loopback port when `serial_port = "sim"`), and spawns the
//!    dispatcher on one serialized hub event channel.
//! 4. Intercepts **Ctrl-C** to halt the motion controller and exit safely.

mod config;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use wayhub_core::{
    forward_operator_events, CaptureWorker, Dispatcher, DispatcherConfig, HubEvent,
};
use wayhub_hal::SimCamera;
use wayhub_link::{
    LoopbackPort, MotionHandle, MotionLink, MotionLinkConfig, OperatorLink, SerialMotionPort,
};
use wayhub_planner::{HttpPlanner, Planner};

#[tokio::main]
async fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info"); WAYHUB_LOG_FORMAT=json
    // switches to newline-delimited JSON for log aggregators.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("WAYHUB_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!("  No config file found, using defaults.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Planning service probe ────────────────────────────────────────────
    let planner = Arc::new(HttpPlanner::new(&cfg.api_url));
    print!("  Probing planning service at {} … ", cfg.api_url.dimmed());
    if planner.check_alive().await {
        println!("{}", "online".green());
    } else {
        println!("{}", "offline".yellow());
        warn!(api_url = %cfg.api_url, "planning service unreachable at startup");
    }

    // ── Hub event channel ─────────────────────────────────────────────────
    let (events_tx, events_rx) = mpsc::channel::<HubEvent>(256);

    // ── Operator link ─────────────────────────────────────────────────────
    let (operator_events_tx, operator_events_rx) = mpsc::channel(64);
    let operator = match OperatorLink::bind(&cfg.operator_addr, operator_events_tx).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(addr = %cfg.operator_addr, error = %e, "cannot bind operator link");
            std::process::exit(1);
        }
    };
    let _operator_adapter = forward_operator_events(operator_events_rx, events_tx.clone());

    // ── Motion link ───────────────────────────────────────────────────────
    let motion_config = MotionLinkConfig {
        ack_timeout: Duration::from_millis(cfg.ack_timeout_ms),
    };
    let motion = open_motion_link(&cfg, motion_config);

    // ── Dispatcher ────────────────────────────────────────────────────────
    // The physical still-camera driver ships separately; the sim camera
    // keeps the capture path operational in the meantime.
    let capture = Arc::new(CaptureWorker::new(
        Box::new(SimCamera::new("front_still")),
        Arc::clone(&planner) as Arc<dyn Planner>,
        cfg.capture_attempts,
    ));
    let dispatcher = Dispatcher::new(
        operator,
        motion,
        Arc::clone(&planner) as Arc<dyn Planner>,
        capture,
        events_tx.clone(),
        DispatcherConfig {
            recovery: cfg.recovery_policy(),
            ..DispatcherConfig::default()
        },
    );

    // ── Ctrl-C → halt ─────────────────────────────────────────────────────
    let shutdown_tx = events_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!(
                "{}",
                "⚠  Ctrl-C received – halting motion controller …".yellow().bold()
            );
            let _ = shutdown_tx.send(HubEvent::Shutdown).await;
        }
    });

    info!(
        operator_addr = %cfg.operator_addr,
        serial_port = %cfg.serial_port,
        "hub running"
    );
    dispatcher.run(events_rx).await;
    println!("{}", "  ✓ Exiting WayHub.".green());
}

fn open_motion_link(cfg: &config::Config, motion_config: MotionLinkConfig) -> MotionHandle {
    if cfg.serial_port == "sim" {
        warn!("motion link in loopback mode, frames are auto-acknowledged");
        return MotionLink::spawn(LoopbackPort::default(), motion_config);
    }
    match SerialMotionPort::open(&cfg.serial_port, cfg.baud_rate) {
        Ok(port) => MotionLink::spawn(port, motion_config),
        Err(e) => {
            error!(port = %cfg.serial_port, error = %e, "cannot open motion controller port");
            std::process::exit(1);
        }
    }
}

fn print_banner() {
    println!();
    println!("  {}", "WayHub".bold());
    println!("  {}", "obstacle-course orchestration hub".dimmed());
    println!();
}
