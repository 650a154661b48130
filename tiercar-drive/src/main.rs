/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use tiercar_core::config::VehicleConfig;
use tiercar_drive::maneuver::{self, Maneuver, FORWARD_STEER_AFTER};
use tiercar_drive::{Gripper, Pca9685, SimulatedPwm};

/// Default gripper channel when the config names none.
const GRIPPER_CHANNEL: u8 = 2;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Drives the "move forward" maneuver on a PCA9685-equipped car.
///
/// Example:
///   tiercar-drive --config car.yaml --rate-hz 20 --verbose
#[derive(Debug, Parser)]
#[command(
    name = "tiercar-drive",
    about = "TierCar drive – move-forward maneuver on PCA9685 actuators",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML vehicle configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Loop rate in Hz (overrides the config file).
    #[arg(short = 'r', long = "rate-hz")]
    rate_hz: Option<f64>,

    /// Stop after this many ticks (overrides the config file).
    #[arg(short = 'm', long = "max-loops")]
    max_loops: Option<u64>,

    /// Report jitter and part timings.
    #[arg(short = 'v', long = "verbose", default_value_t = false)]
    verbose: bool,

    /// Skip the loop: throttle, wait one second, steer.
    #[arg(long = "direct", default_value_t = false)]
    direct: bool,

    /// Finish with a gripper pick.
    #[arg(long = "pick", default_value_t = false)]
    pick: bool,
}

impl Cli {
    /// Command-line flags win over the config file.
    fn apply_overrides(&self, config: &mut VehicleConfig) {
        if let Some(rate) = self.rate_hz {
            config.drive_loop.rate_hz = rate;
        }
        if let Some(max) = self.max_loops {
            config.drive_loop.max_loop_count = Some(max);
        }
        if self.verbose {
            config.drive_loop.verbose = true;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        config = ?cli.config,
        rate_hz = ?cli.rate_hz,
        max_loops = ?cli.max_loops,
        direct = cli.direct,
        pick = cli.pick,
        "TierCar drive starting up..."
    );

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // ── Load vehicle configuration ────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading vehicle configuration from: {}", path.display());
            VehicleConfig::load_from_file(path)?
        }
        None => {
            warn!("No configuration file provided, using default wiring");
            VehicleConfig::default()
        }
    };
    cli.apply_overrides(&mut config);

    // ── Drive ─────────────────────────────────────────────────────────────────
    if cli.direct {
        let cfg = config.clone();
        tokio::task::spawn_blocking(move || drive_direct(&cfg))
            .await
            .context("direct maneuver task")??;
    } else {
        drive_loop(&config).await?;
    }

    if cli.pick {
        let cfg = config.clone();
        tokio::task::spawn_blocking(move || pick(&cfg))
            .await
            .context("gripper task")??;
    }

    info!("TierCar drive shut down cleanly");
    Ok(())
}

async fn drive_loop(config: &VehicleConfig) -> anyhow::Result<()> {
    let maneuver = Maneuver::move_forward(config.drive_loop.rate_hz);
    let mut vehicle = maneuver::build_vehicle(config, maneuver, SimulatedPwm::open)?;
    let handle = vehicle.stop_handle();
    let loop_config = config.drive_loop.clone();

    let mut drive = tokio::task::spawn_blocking(move || vehicle.start_from_config(&loop_config));
    let joined = tokio::select! {
        joined = &mut drive => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping vehicle");
            handle.interrupt();
            drive.await
        }
    };
    let summary = joined.context("drive loop task")??;

    info!(
        ticks = summary.ticks,
        jitter_reports = summary.jitter_reports,
        exit = %summary.exit,
        "Vehicle stopped"
    );
    for failure in &summary.shutdown.failures {
        warn!(part = failure.part(), "{}", failure);
    }
    Ok(())
}

fn drive_direct(config: &VehicleConfig) -> anyhow::Result<()> {
    let throttle_cfg = config.actuator_or_default("throttle", 0);
    let steering_cfg = config.actuator_or_default("steering", 1);
    let mut throttle = Pca9685::new(
        SimulatedPwm::open(throttle_cfg.address, throttle_cfg.busnum)?,
        &throttle_cfg,
    )?;
    let mut steering = Pca9685::new(
        SimulatedPwm::open(steering_cfg.address, steering_cfg.busnum)?,
        &steering_cfg,
    )?;
    maneuver::drive_direct(&mut throttle, &mut steering, FORWARD_STEER_AFTER)?;
    Ok(())
}

fn pick(config: &VehicleConfig) -> anyhow::Result<()> {
    let wiring = config.actuator_or_default("gripper", GRIPPER_CHANNEL);
    let mut gripper = Gripper::new(SimulatedPwm::open(wiring.address, wiring.busnum)?, &wiring)?;
    gripper.pick()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn flags_override_config_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"drive_loop:\n  rate_hz: 20\n  max_loop_count: 100\n")
            .unwrap();

        let cli = Cli::parse_from([
            "tiercar-drive",
            "--config",
            f.path().to_str().unwrap(),
            "--max-loops",
            "5",
            "--verbose",
        ]);
        let mut config = VehicleConfig::load_from_file(cli.config.as_ref().unwrap()).unwrap();
        cli.apply_overrides(&mut config);

        assert_eq!(config.drive_loop.rate_hz, 20.0);
        assert_eq!(config.drive_loop.max_loop_count, Some(5));
        assert!(config.drive_loop.verbose);
    }

    #[test]
    fn defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["tiercar-drive"]);
        let mut config = VehicleConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config, VehicleConfig::default());
        assert!(!cli.direct && !cli.pick);
    }

    #[tokio::test]
    async fn loop_run_finishes_on_its_own() {
        let cli = Cli::parse_from(["tiercar-drive", "--rate-hz", "100", "--max-loops", "3"]);
        let mut config = VehicleConfig::default();
        cli.apply_overrides(&mut config);
        drive_loop(&config).await.unwrap();
    }
}
