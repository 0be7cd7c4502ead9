// One-shot command publisher: send a command, print replies until it finishes
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use quadroll_runtime::config::{TOPIC_CMD, TOPIC_REPLY};
use quadroll_runtime::messages::{Command, CommandRequest, Reply};
use quadroll_runtime::motion::choreography::{PoseName, SequenceName};

/// Send one command to the quadroll runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Give up waiting for the final reply after this long
    #[arg(long, default_value = "15000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read back every servo position
    Positions,
    /// Move to a named pose, e.g. perfect_circle
    Move {
        #[arg(value_parser = parse_name::<PoseName>)]
        pose: PoseName,
        /// Interpolate instead of jumping
        #[arg(long)]
        smooth: bool,
    },
    /// Run a named sequence, e.g. circle_to_walk
    Sequence {
        #[arg(value_parser = parse_name::<SequenceName>)]
        name: SequenceName,
    },
    /// Enable torque (all servos when no IDs are given)
    TorqueOn {
        #[arg(value_delimiter = ',')]
        ids: Vec<u8>,
    },
    /// Disable torque (all servos when no IDs are given)
    TorqueOff {
        #[arg(value_delimiter = ',')]
        ids: Vec<u8>,
    },
    PropelStart,
    PropelStop,
    Stop,
    Orientation,
}

/// Parse a snake_case name the same way the runtime does
fn parse_name<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

impl From<Cmd> for Command {
    fn from(cmd: Cmd) -> Self {
        match cmd {
            Cmd::Positions => Command::ReportPositions,
            Cmd::Move { pose, smooth } => Command::MoveTo { pose, smooth },
            Cmd::Sequence { name } => Command::RunSequence { sequence: name },
            Cmd::TorqueOn { ids } => Command::SetTorque { ids, enabled: true },
            Cmd::TorqueOff { ids } => Command::SetTorque { ids, enabled: false },
            Cmd::PropelStart => Command::StartPropulsion,
            Cmd::PropelStop => Command::StopPropulsion,
            Cmd::Stop => Command::Stop,
            Cmd::Orientation => Command::QueryOrientation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let replies = session.declare_subscriber(TOPIC_REPLY).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    let request = CommandRequest {
        id: rand::random::<u32>() as u64,
        command: args.command.into(),
    };
    let json = serde_json::to_string(&request)?;
    info!("Sending {}", json);
    publisher.put(json).await?;

    let deadline = tokio::time::sleep(Duration::from_millis(args.timeout_ms));
    tokio::pin!(deadline);
    loop {
        let sample = tokio::select! {
            _ = &mut deadline => {
                warn!("No final reply within {} ms", args.timeout_ms);
                break;
            }
            sample = replies.recv_async() => sample?,
        };
        let payload = sample.payload().to_bytes();
        let reply: Reply = match serde_json::from_slice(&payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Unreadable reply: {}", e);
                continue;
            }
        };
        if reply.request() != request.id {
            continue;
        }
        println!("{}", serde_json::to_string_pretty(&reply)?);
        if reply.is_final() {
            break;
        }
    }

    session.close().await?;
    Ok(())
}
