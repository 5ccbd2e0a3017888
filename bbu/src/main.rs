//! Halcyon Baseband Unit
//!
//! Main entry point for the massive-MIMO base station's baseband processor.

use anyhow::{Context, Result};
use clap::Parser;
use layers::Station;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
use config::BbuConfig;

/// Halcyon massive-MIMO baseband unit
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: String,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = BbuConfig::from_yaml_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let log_level = args.log_level.as_ref().unwrap_or(&config.log.level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("starting Halcyon baseband unit");
    info!("configuration loaded from {}", args.config);
    info!("cell configuration:");
    info!("  BS antennas: {}", config.station.bs_ant_num);
    info!("  UE antennas: {}", config.station.ue_ant_num);
    info!(
        "  OFDM: {} data / {} total subcarriers, {} samples per symbol",
        config.station.ofdm_data_num,
        config.station.ofdm_ca_num,
        config.station.samps_per_symbol
    );
    info!(
        "  frame: {} pilot, {} UL, {} DL symbols",
        config.station.frame.num_pilot_syms(),
        config.station.frame.num_ul_syms(),
        config.station.frame.num_dl_syms()
    );
    info!(
        "  threads: {} workers, {} socket, core offset {}",
        config.station.worker_thread_num,
        config.station.socket_thread_num,
        config.station.core_offset
    );
    info!("  frames to test: {}", config.station.frames_to_test);
    if config.station.enable_mac {
        info!("  MAC thread enabled");
    }
    if config.station.bigstation_mode {
        info!("  bigstation worker partitioning enabled");
    }

    let data_dir = PathBuf::from(&config.net.data_dir);
    let mut station = Station::with_transport(
        config.station,
        config.net.bind_addr,
        config.net.base_port,
        config.net.remote_addr,
    )?;
    station.set_data_dir(data_dir);

    // SIGINT sets the shared exit flag; the master observes it between
    // event batches and drains cleanly.
    let running = station.running_flag();
    ctrlc::set_handler(move || {
        warn!("received interrupt, shutting down");
        running.store(false, Ordering::Relaxed);
    })
    .context("installing signal handler")?;

    station.start()?;

    info!("baseband unit exited cleanly");
    Ok(())
}
