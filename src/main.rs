use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fanbridge_lib::device::{Active, RotationDirection};
use fanbridge_lib::session::SimulatedFan;
use fanbridge_lib::{FanAccessory, FanConfig, FanDevice};

/// Drive a simulated ceiling fan through the accessory bindings
#[derive(Debug, Parser)]
#[command(name = "fanbridge", version)]
struct Args {
    /// JSON fan configuration; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of status reads the simulated fan drops partway through the run
    #[arg(long, default_value_t = 3)]
    dropped_reads: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FanConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => FanConfig::default(),
    };

    let fan = SimulatedFan::new(&config.data_points);
    let device = FanDevice::start(config, fan.factory()).context("invalid fan configuration")?;
    let device = Arc::new(device);
    let accessory = FanAccessory::new(device.clone());

    let mut state = device.watch_state();
    state
        .wait_for(|s| s.valid)
        .await
        .context("state cache closed before the first read")?;
    log::info!("first read: {:?}", device.state());

    accessory.set_active(Active::Active).await?;
    for raw in [42, 45, 58] {
        accessory.set_rotation_speed(raw).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    accessory
        .set_rotation_direction(RotationDirection::Clockwise)
        .await?;
    if accessory.has_light() {
        accessory.set_light_on(true).await?;
    }

    tokio::time::sleep(device.config().debounce() * 2).await;
    device.refresh().await;
    log::info!(
        "after commands: active={:?} speed={:?} direction={:?}",
        accessory.get_active(),
        accessory.get_rotation_speed(),
        accessory.get_rotation_direction()
    );

    fan.fail_reads(args.dropped_reads);
    device.refresh().await;
    log::info!("while dropping reads: active={:?}", accessory.get_active());

    state
        .wait_for(|s| s.valid)
        .await
        .context("state cache closed while recovering")?;
    log::info!("recovered: {:?}", device.state());

    device.shutdown().await;
    Ok(())
}
