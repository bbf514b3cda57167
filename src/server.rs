// TCP servers for the control channel and the camera channel
//
// Each connection gets a reader loop and a writer task fed by a bounded queue.
// Robot calls run on the blocking pool under the robot mutex; the guard never
// crosses an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::camera::StreamHandle;
use crate::config::{SESSION_QUEUE, STATUS_HZ, VIEWER_QUEUE};
use crate::messages::{timestamp, Command, Message, MoveDirection, ViewerCommand};
use crate::robot::{self, Robot, RobotError};

pub type SharedRobot = Arc<Mutex<Robot>>;

const WELCOME: &str = "Connected to PiCar-X control server";

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lock the robot, recovering the guard if a previous holder panicked
pub fn lock_robot(robot: &SharedRobot) -> MutexGuard<'_, Robot> {
    robot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a closure against the robot on the blocking pool
async fn with_robot<T, F>(robot: &SharedRobot, f: F) -> robot::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Robot) -> robot::Result<T> + Send + 'static,
{
    let robot = robot.clone();
    match tokio::task::spawn_blocking(move || f(&mut lock_robot(&robot))).await {
        Ok(result) => result,
        Err(e) => {
            error!("Robot task failed: {}", e);
            Err(RobotError::Task(e.to_string()))
        }
    }
}

/// Apply one command and build its reply
fn execute(robot: &mut Robot, command: Command) -> robot::Result<Message> {
    match command {
        Command::Move { direction, speed } => {
            match direction {
                MoveDirection::Forward => robot.forward(speed as f64)?,
                MoveDirection::Backward => robot.backward(speed as f64)?,
                MoveDirection::Stop => robot.stop()?,
            }
            Ok(Message::MoveResponse {
                direction,
                speed,
                success: true,
            })
        }
        Command::Steering { angle } => {
            robot.set_steering_angle(angle)?;
            Ok(Message::SteeringResponse {
                angle,
                success: true,
            })
        }
        Command::Camera { pan, tilt } => {
            if let Some(pan) = pan {
                robot.set_camera_pan(pan)?;
            }
            if let Some(tilt) = tilt {
                robot.set_camera_tilt(tilt)?;
            }
            Ok(Message::CameraResponse {
                pan,
                tilt,
                success: true,
            })
        }
        Command::Stop => {
            robot.stop()?;
            Ok(Message::StopResponse { success: true })
        }
        Command::Status => Ok(Message::StatusResponse {
            telemetry: robot.telemetry()?,
            timestamp: timestamp(),
        }),
        Command::Reset => {
            robot.reset()?;
            Ok(Message::ResetResponse { success: true })
        }
    }
}

/// Wait for the next connection. A failed accept is logged and retried after
/// a short pause; it never ends the server.
async fn next_connection<T, A, Fut>(server: &str, mut accept: A) -> T
where
    A: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!("{} accept failed: {}", server, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Forward queued lines to the socket until the queue closes or the peer goes away
async fn write_lines(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        let sent = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await
        };
        if let Err(e) = sent.await {
            debug!("Writer closed: {}", e);
            break;
        }
    }
}

/// Command/telemetry server
#[derive(Clone)]
pub struct ControlServer {
    robot: SharedRobot,
    sessions: Arc<Mutex<HashMap<u64, mpsc::Sender<String>>>>,
    next_id: Arc<AtomicU64>,
}

impl ControlServer {
    pub fn new(robot: SharedRobot) -> Self {
        Self {
            robot,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn robot(&self) -> &SharedRobot {
        &self.robot
    }

    /// Sessions currently registered for broadcast
    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<String>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept connections until the future is dropped. Dropping it aborts
    /// every session and the broadcast task.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!("Control server listening on {}", listener.local_addr()?);
        let mut tasks = JoinSet::new();
        tasks.spawn(self.clone().broadcast_status());

        loop {
            tokio::select! {
                (stream, peer) = next_connection("Control", || listener.accept()) => {
                    tasks.spawn(self.clone().handle_session(stream, peer));
                }
                Some(done) = tasks.join_next() => {
                    if let Err(e) = done {
                        error!("Control task failed: {}", e);
                    }
                }
            }
        }
    }

    async fn handle_session(self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("Client {} connected from {}", id, peer);

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel::<String>(SESSION_QUEUE);
        let writer_task = tokio::spawn(write_lines(writer, rx));

        let welcome = Message::Welcome {
            message: WELCOME.to_string(),
            timestamp: timestamp(),
        };
        if tx.send(welcome.to_line()).await.is_ok() {
            self.lock_sessions().insert(id, tx.clone());

            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let reply = self.handle_line(&line).await;
                        if tx.send(reply.to_line()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Client {} read error: {}", id, e);
                        break;
                    }
                }
            }
        }

        self.lock_sessions().remove(&id);
        writer_task.abort();
        info!("Client {} disconnected", id);

        // Fail-safe: a lost operator must not leave the wheels turning
        match with_robot(&self.robot, |r| r.stop()).await {
            Ok(()) | Err(RobotError::Released) => {}
            Err(e) => error!("Failed to stop robot after client {} left: {}", id, e),
        }
    }

    /// Parse and execute one inbound line. Failures become `error` replies.
    pub async fn handle_line(&self, line: &str) -> Message {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected message: {}", e);
                return Message::error(e.to_string());
            }
        };
        debug!("Received command: {:?}", command);
        match with_robot(&self.robot, move |r| execute(r, command)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Command failed: {}", e);
                Message::error(e.to_string())
            }
        }
    }

    /// Queue a line on every session. A full queue skips that session this
    /// round; a closed one is dropped from the set.
    fn fan_out(&self, line: &str) {
        self.lock_sessions()
            .retain(|id, tx| match tx.try_send(line.to_string()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Client {} is behind, status skipped", id);
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    info!("Client {} gone, removing from broadcast", id);
                    false
                }
            });
    }

    async fn broadcast_status(self) {
        let mut tick = interval(Duration::from_millis(1000 / STATUS_HZ));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if self.session_count() == 0 {
                continue;
            }
            let telemetry = match with_robot(&self.robot, |r| r.telemetry()).await {
                Ok(telemetry) => telemetry,
                Err(RobotError::Released) => continue,
                Err(e) => {
                    warn!("Status read failed: {}", e);
                    continue;
                }
            };
            let line = Message::StatusBroadcast {
                telemetry,
                timestamp: timestamp(),
            }
            .to_line();
            self.fan_out(&line);
        }
    }
}

/// Video server: attached viewers receive `video_frame` lines and may ask
/// for a `snapshot`
#[derive(Clone)]
pub struct ViewerServer {
    stream: StreamHandle,
}

impl ViewerServer {
    pub fn new(stream: StreamHandle) -> Self {
        Self { stream }
    }

    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!("Camera server listening on {}", listener.local_addr()?);
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                (stream, peer) = next_connection("Camera", || listener.accept()) => {
                    tasks.spawn(self.clone().handle_viewer(stream, peer));
                }
                Some(done) = tasks.join_next() => {
                    if let Err(e) = done {
                        error!("Viewer task failed: {}", e);
                    }
                }
            }
        }
    }

    async fn handle_viewer(self, stream: TcpStream, peer: SocketAddr) {
        let id = self.stream.next_viewer_id();
        info!("Viewer {} connected from {}", id, peer);

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel::<String>(VIEWER_QUEUE);
        let writer_task = tokio::spawn(write_lines(writer, rx));
        self.stream.add_viewer(id, tx.clone());

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = self.handle_line(&line).await;
                    if tx.send(reply.to_line()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Viewer {} read error: {}", id, e);
                    break;
                }
            }
        }

        self.stream.remove_viewer(id);
        writer_task.abort();
        info!("Viewer {} disconnected", id);
    }

    async fn handle_line(&self, line: &str) -> Message {
        match serde_json::from_str::<ViewerCommand>(line) {
            Ok(ViewerCommand::Snapshot) => self.snapshot().await,
            Err(_) => Message::error("Unknown camera command"),
        }
    }

    async fn snapshot(&self) -> Message {
        let stream = self.stream.clone();
        match tokio::task::spawn_blocking(move || stream.snapshot()).await {
            Ok(Ok(Some((captured_at, jpeg)))) => Message::Snapshot {
                data: STANDARD.encode(jpeg),
                timestamp: captured_at,
            },
            Ok(Ok(None)) => Message::error("No frame captured yet"),
            Ok(Err(e)) => Message::error(format!("Snapshot failed: {}", e)),
            Err(e) => Message::error(format!("Snapshot failed: {}", e)),
        }
    }
}
