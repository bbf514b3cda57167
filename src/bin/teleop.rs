// Keyboard teleop: W/S drive, A/D steer, arrows pan/tilt, R/F speed, Space stop, Q quit
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use picarx_runtime::config::{CAMERA_PAN_RANGE, CAMERA_TILT_RANGE, CONTROL_PORT, STEERING_RANGE};

const SPEEDS: [i64; 3] = [30, 60, 90]; // percent
const CAMERA_STEP: f64 = 10.0; // degrees per key press
const INPUT_TIMEOUT_MS: u64 = 600; // Longer than the terminal key-repeat delay

#[derive(Debug, Parser)]
#[command(name = "teleop", about = "Drive the PiCar-X from the keyboard")]
struct Args {
    /// Control server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Control server port
    #[arg(short, long, default_value_t = CONTROL_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    info!("Connecting to {}:{}...", args.host, args.port);
    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    let (reader, mut writer) = stream.into_split();
    tokio::spawn(log_replies(reader));

    info!("Controls: W/S=drive, A/D=steer, arrows=camera, R/F=speed, Space=stop, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&mut writer).await;
    disable_raw_mode()?;

    // Leave the robot parked whatever happened above
    send(&mut writer, json!({"command": "stop"})).await?;
    result
}

async fn send(writer: &mut OwnedWriteHalf, cmd: Value) -> std::io::Result<()> {
    writer.write_all(cmd.to_string().as_bytes()).await?;
    writer.write_all(b"\n").await
}

async fn log_replies(reader: OwnedReadHalf) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<Value>(&line) {
            Ok(msg) if msg["type"] == "error" => warn!("Server error: {}", msg["message"]),
            Ok(msg) if msg["type"] == "welcome" => info!("{}", msg["message"]),
            Ok(msg) => debug!("Reply: {}", msg),
            Err(e) => warn!("Unreadable reply: {}", e),
        }
    }
    info!("Server closed the connection");
}

async fn run_teleop(
    writer: &mut OwnedWriteHalf,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent drive state
    let mut direction = "stop";
    let mut steering = 0.0;
    let mut pan = 0.0;
    let mut tilt = 0.0;
    let mut last_movement_input = Instant::now();
    let mut last_sent: Option<(&str, i64, f64)> = None;

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Drive - update direction and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        direction = "forward";
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        direction = "backward";
                        last_movement_input = Instant::now();
                    }

                    // Steering
                    KeyCode::Char('a') if pressed => {
                        steering = STEERING_RANGE.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        steering = STEERING_RANGE.1;
                        last_movement_input = Instant::now();
                    }

                    // Camera
                    KeyCode::Left | KeyCode::Right | KeyCode::Up | KeyCode::Down if pressed => {
                        match code {
                            KeyCode::Left => pan -= CAMERA_STEP,
                            KeyCode::Right => pan += CAMERA_STEP,
                            KeyCode::Up => tilt += CAMERA_STEP,
                            _ => tilt -= CAMERA_STEP,
                        }
                        pan = f64::clamp(pan, CAMERA_PAN_RANGE.0, CAMERA_PAN_RANGE.1);
                        tilt = f64::clamp(tilt, CAMERA_TILT_RANGE.0, CAMERA_TILT_RANGE.1);
                        send(writer, json!({"command": "camera", "pan": pan, "tilt": tilt})).await?;
                    }

                    KeyCode::Char(' ') if pressed => {
                        direction = "stop";
                        steering = 0.0;
                        send(writer, json!({"command": "stop"})).await?;
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if controls_released(last_movement_input.elapsed()) {
            direction = "stop";
            steering = 0.0;
        }

        // Only send when the drive state changes
        let current = (direction, SPEEDS[speed_idx], steering);
        if last_sent != Some(current) {
            if last_sent.map(|(_, _, s)| s) != Some(steering) {
                send(writer, json!({"command": "steering", "angle": steering})).await?;
            }
            send(
                writer,
                json!({"command": "move", "direction": direction, "speed": SPEEDS[speed_idx]}),
            )
            .await?;
            last_sent = Some(current);
        }
    }

    Ok(())
}

/// No movement input for INPUT_TIMEOUT_MS
fn controls_released(idle: Duration) -> bool {
    idle > Duration::from_millis(INPUT_TIMEOUT_MS)
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
