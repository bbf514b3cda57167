// Process wiring: robot, camera, both servers, Ctrl-C shutdown
//
// Shutdown order: stop accepting (drop the server futures), release actuators
// and sensors before the board, then stop the capture thread.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::camera::CameraStreamer;
use crate::config::{Args, STATUS_HZ};
use crate::robot::Robot;
use crate::server::{lock_robot, ControlServer, SharedRobot, ViewerServer};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Robot opened, camera started (if it could be), listeners bound
pub struct Runtime {
    robot: SharedRobot,
    streamer: CameraStreamer,
    control_listener: TcpListener,
    camera_listener: TcpListener,
}

impl Runtime {
    /// Open everything `args` asks for. A camera that fails to start is
    /// logged and the runtime comes up without video.
    pub async fn start(args: &Args) -> Result<Self, BoxError> {
        let config = args.robot_config()?;

        info!("Opening robot ({:?} backend requested)...", config.backend);
        let robot = tokio::task::spawn_blocking({
            let config = config.clone();
            move || Robot::open(&config)
        })
        .await??;
        info!("Robot ready on {:?} capabilities", robot.backend());
        let robot = Arc::new(Mutex::new(robot));

        let mut streamer = CameraStreamer::new(config.camera.clone());
        if args.no_camera {
            info!("Camera disabled");
        } else if let Err(e) = streamer.start_streaming() {
            warn!("Camera unavailable, running without video: {}", e);
        }

        let control_listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
        let camera_listener = TcpListener::bind((args.host.as_str(), args.camera_port)).await?;

        Ok(Self {
            robot,
            streamer,
            control_listener,
            camera_listener,
        })
    }

    pub fn robot(&self) -> &SharedRobot {
        &self.robot
    }

    pub fn is_streaming(&self) -> bool {
        self.streamer.is_streaming()
    }

    pub fn control_addr(&self) -> std::io::Result<SocketAddr> {
        self.control_listener.local_addr()
    }

    pub fn camera_addr(&self) -> std::io::Result<SocketAddr> {
        self.camera_listener.local_addr()
    }

    /// Serve both channels until `shutdown` resolves, then release the robot
    /// and stop the camera
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let Self {
            robot,
            mut streamer,
            control_listener,
            camera_listener,
        } = self;

        let control = ControlServer::new(robot.clone());
        let viewers = ViewerServer::new(streamer.handle());

        info!(
            "Runtime started: control on {}, camera on {}, {}Hz status",
            control_listener.local_addr()?,
            camera_listener.local_addr()?,
            STATUS_HZ
        );

        let outcome = tokio::select! {
            result = control.serve(control_listener) => result.map_err(|e| {
                error!("Control server stopped: {}", e);
                e
            }),
            result = viewers.serve(camera_listener) => result.map_err(|e| {
                error!("Camera server stopped: {}", e);
                e
            }),
            signal = shutdown => {
                info!("Shutdown requested");
                signal
            }
        };

        // The robot shares nothing with the capture thread; release it first
        // so a stuck camera cannot hold the motors
        tokio::task::spawn_blocking(move || lock_robot(&robot).cleanup()).await?;
        streamer.stop_streaming();
        info!("Shutdown complete");

        outcome.map_err(Into::into)
    }
}

pub async fn run(args: Args) -> Result<(), BoxError> {
    Runtime::start(&args)
        .await?
        .serve_until(tokio::signal::ctrl_c())
        .await
}
