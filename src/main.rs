use std::path::PathBuf;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use quadroll_runtime::config::{IMU_BUS, MOTOR_BAUDRATE, MOTOR_PORT, RobotConfig};
use quadroll_runtime::runtime::{self, RuntimeOptions};

/// Motion runtime for the rolling quadruped
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port of the servo bus
    #[arg(long, default_value = MOTOR_PORT)]
    port: String,

    #[arg(long, default_value_t = MOTOR_BAUDRATE)]
    baud: u32,

    /// I2C bus of the IMU
    #[arg(long, default_value = IMU_BUS)]
    i2c: String,

    /// Robot config JSON (calibration, classifier, gait, poses)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against simulated servos and IMU
    #[arg(long)]
    simulate: bool,

    /// Start with orientation-driven propulsion enabled
    #[arg(long)]
    propel: bool,

    /// Seed for the ambiguous-orientation tie-break
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match RobotConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => RobotConfig::default(),
    };

    let options = RuntimeOptions {
        port: args.port,
        baudrate: args.baud,
        i2c: args.i2c,
        config,
        simulate: args.simulate,
        propel: args.propel,
        seed: args.seed,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
