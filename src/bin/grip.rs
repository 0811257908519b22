//! grip - command-line client for the gripd daemon
//!
//! One-shot protocol commands over the daemon's Unix socket.
//!
//! # Usage
//!
//! ```bash
//! grip list
//! grip checkout 0x40-15121314
//! grip operate 0x40-15121314 --token <TOKEN> move:0,170,25 grab move:0,200,40 release
//! grip position 0x40-15121314
//! grip checkin 0x40-15121314 --token <TOKEN>
//! ```
//!
//! Move targets are `move:x,y,z` (Cartesian millimetres) or
//! `polar:r,lat,lng` (degrees); `grab`, `release` and `test` take no
//! arguments.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use grip_protocol::{
    ClientRequest, DaemonResponse, Operation, PointDto, RequestKind, Target,
};

/// grip - gripper arm remote control
#[derive(Parser, Debug)]
#[command(name = "grip", version, about)]
struct Args {
    /// Daemon socket path
    #[arg(short, long, env = "GRIPD_SOCKET", default_value = "/tmp/gripd.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all arms known to the daemon
    List,
    /// Show an arm's session and position snapshot
    Status { arm: String },
    /// Show an arm's current gripper position
    Position { arm: String },
    /// Take exclusive control of an arm
    Checkout { arm: String },
    /// Release an arm and print the session accounting
    Checkin {
        arm: String,
        #[arg(long)]
        token: String,
    },
    /// Run a batch of operations (max 25)
    Operate {
        arm: String,
        #[arg(long)]
        token: String,
        /// Operations: move:x,y,z | polar:r,lat,lng | grab | release | test
        #[arg(required = true)]
        operations: Vec<String>,
    },
    /// Check daemon liveness
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let request = match &args.command {
        Command::List => RequestKind::ListArms,
        Command::Status { arm } => RequestKind::GetArm {
            arm: arm.as_str().into(),
        },
        Command::Position { arm } => RequestKind::GetPosition {
            arm: arm.as_str().into(),
        },
        Command::Checkout { arm } => RequestKind::Checkout {
            arm: arm.as_str().into(),
        },
        Command::Checkin { arm, token } => RequestKind::Checkin {
            arm: arm.as_str().into(),
            token: token.clone(),
        },
        Command::Operate {
            arm,
            token,
            operations,
        } => {
            let operations = operations
                .iter()
                .map(|op| parse_operation(op))
                .collect::<Result<Vec<_>>>()?;
            RequestKind::Operate {
                arm: arm.as_str().into(),
                token: token.clone(),
                operations,
            }
        }
        Command::Ping => RequestKind::Ping { seq: 1 },
    };

    let response = send_request(&args.socket, ClientRequest::new(request)).await?;
    print_response(response)
}

/// Parses one operation argument.
fn parse_operation(op: &str) -> Result<Operation> {
    match op {
        "grab" => return Ok(Operation::Grab),
        "release" => return Ok(Operation::Release),
        "test" => return Ok(Operation::Test),
        _ => {}
    }

    if let Some(coords) = op.strip_prefix("move:") {
        let [x, y, z] = parse_triple(coords)
            .with_context(|| format!("invalid move target '{op}', expected move:x,y,z"))?;
        return Ok(Operation::MoveTo {
            target: Target::Cartesian { x, y, z },
        });
    }
    if let Some(coords) = op.strip_prefix("polar:") {
        let [r, lat, lng] = parse_triple(coords)
            .with_context(|| format!("invalid polar target '{op}', expected polar:r,lat,lng"))?;
        return Ok(Operation::MoveTo {
            target: Target::Polar { r, lat, lng },
        });
    }

    bail!("unknown operation '{op}', expected move:x,y,z | polar:r,lat,lng | grab | release | test")
}

fn parse_triple(coords: &str) -> Result<[f64; 3]> {
    let parts: Vec<&str> = coords.split(',').collect();
    let [a, b, c] = parts.as_slice() else {
        bail!("expected three comma-separated values, got '{coords}'");
    };
    Ok([
        a.trim().parse::<f64>()?,
        b.trim().parse::<f64>()?,
        c.trim().parse::<f64>()?,
    ])
}

/// Sends one request and reads one response line.
async fn send_request(socket: &PathBuf, request: ClientRequest) -> Result<DaemonResponse> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("failed to connect to {} (is gripd running?)", socket.display()))?;
    let (reader, mut writer) = stream.into_split();

    let json = serde_json::to_string(&request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut line = String::new();
    let mut reader = BufReader::new(reader);
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        bail!("daemon closed the connection without responding");
    }
    Ok(serde_json::from_str(line.trim())?)
}

fn format_point(p: &PointDto) -> String {
    format!(
        "x={:.1} y={:.1} z={:.1} (r={:.1} lat={:.1} lng={:.1})",
        p.x, p.y, p.z, p.r, p.lat, p.lng
    )
}

fn print_response(response: DaemonResponse) -> Result<()> {
    match response {
        DaemonResponse::CheckedOut { token } => {
            println!("checked out, token: {token}");
        }
        DaemonResponse::CheckedIn {
            duration_seconds,
            movement_count,
        } => {
            println!("checked in after {duration_seconds:.1}s, {movement_count} movements");
        }
        DaemonResponse::Operated {
            operation_count,
            elapsed_seconds,
            position,
        } => {
            println!(
                "{operation_count} operations in {elapsed_seconds:.1}s, now at {}",
                format_point(&position)
            );
        }
        DaemonResponse::ArmStatus {
            arm,
            powered,
            position,
            session,
        } => {
            println!("arm:      {arm}");
            println!("power:    {}", if powered { "on" } else { "off" });
            println!("position: {}", format_point(&position));
            match session {
                Some(session) => println!(
                    "session:  checked out {} ({} movements)",
                    session.checked_out_at, session.movement_count
                ),
                None => println!("session:  free"),
            }
        }
        DaemonResponse::Position { position } => {
            println!("{}", format_point(&position));
        }
        DaemonResponse::ArmList { arms } => {
            if arms.is_empty() {
                println!("no arms configured");
            }
            for arm in arms {
                println!("{arm}");
            }
        }
        DaemonResponse::Pong { seq } => {
            println!("pong (seq {seq})");
        }
        DaemonResponse::Error { code, message } => {
            eprintln!("error {code}: {message}");
            std::process::exit(1);
        }
    }
    Ok(())
}
