// Camera streamer
//
// A dedicated capture thread paces itself to the granted frame rate, keeps the
// latest frame in a shared slot and, when viewers are attached, encodes the
// frame once and queues the `video_frame` line to every viewer. The tokio side
// only touches the frame slot and the viewer map.

pub mod pattern;
#[cfg(all(feature = "camera", target_os = "linux"))]
pub mod v4l;

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::messages::{timestamp, Message};

/// How many device indices to probe after the configured one
const PROBE_INDICES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("could not open any camera (tried: {tried})")]
    NoCamera { tried: String },

    #[error("camera backend unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(String),

    #[error("frame buffer is {got} bytes, expected {expected} for {width}x{height} RGB")]
    BadFrame {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },

    #[error("camera is already streaming")]
    AlreadyStreaming,

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("camera I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CameraError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    V4l2,
    TestPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// One captured image, 8-bit RGB, row-major
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    captured_at: f64,
}

impl Frame {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(CameraError::BadFrame {
                width,
                height,
                expected,
                got: rgb.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgb,
            captured_at: timestamp(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    pub fn captured_at(&self) -> f64 {
        self.captured_at
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut output = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut output, quality);
        encoder.write_image(&self.rgb, self.width, self.height, ExtendedColorType::Rgb8)?;
        Ok(output.into_inner())
    }
}

/// An opened capture device
pub trait CameraDevice: Send {
    fn name(&self) -> String;

    /// Settings the device actually granted
    fn settings(&self) -> CaptureSettings;

    /// Block until the next frame is available
    fn capture(&mut self) -> Result<Frame>;
}

/// Ordered (backend, index) pairs to try: the configured index first, then
/// the low device indices.
pub fn candidates(config: &CameraConfig) -> Vec<(CameraBackend, usize)> {
    match config.backend {
        CameraBackend::TestPattern => vec![(CameraBackend::TestPattern, 0)],
        CameraBackend::V4l2 => {
            let mut list = vec![(CameraBackend::V4l2, config.index)];
            list.extend(
                (0..PROBE_INDICES)
                    .filter(|&i| i != config.index)
                    .map(|i| (CameraBackend::V4l2, i)),
            );
            list
        }
    }
}

fn open_device(
    backend: CameraBackend,
    index: usize,
    requested: CaptureSettings,
) -> Result<Box<dyn CameraDevice>> {
    match backend {
        CameraBackend::TestPattern => Ok(Box::new(pattern::TestPatternCamera::open(requested))),
        CameraBackend::V4l2 => open_v4l(index, requested),
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn open_v4l(index: usize, requested: CaptureSettings) -> Result<Box<dyn CameraDevice>> {
    Ok(Box::new(v4l::V4lCamera::open(index, requested)?))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn open_v4l(_index: usize, _requested: CaptureSettings) -> Result<Box<dyn CameraDevice>> {
    Err(CameraError::Unavailable(
        "built without the `camera` feature".to_string(),
    ))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the capture thread and the network side
struct Shared {
    current: Mutex<Option<Arc<Frame>>>,
    viewers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_viewer: AtomicU64,
    quality: u8,
}

impl Shared {
    fn broadcast(&self, frame: &Frame) {
        let jpeg = match frame.encode_jpeg(self.quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!("Failed to encode frame: {}", e);
                return;
            }
        };
        let line = Message::VideoFrame {
            data: STANDARD.encode(jpeg),
            timestamp: frame.captured_at(),
        }
        .to_line();

        let mut viewers = lock(&self.viewers);
        viewers.retain(|id, tx| match tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Viewer {} is behind, frame skipped", id);
                true
            }
            Err(TrySendError::Closed(_)) => {
                info!("Viewer {} disconnected, removing", id);
                false
            }
        });
    }
}

/// Cloneable access to the frame slot and viewer set
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

impl StreamHandle {
    pub fn next_viewer_id(&self) -> u64 {
        self.shared.next_viewer.fetch_add(1, Ordering::Relaxed)
    }

    /// Attach a viewer. Returns false if `id` was already attached (its queue is replaced).
    pub fn add_viewer(&self, id: u64, tx: mpsc::Sender<String>) -> bool {
        let mut viewers = lock(&self.shared.viewers);
        let added = viewers.insert(id, tx).is_none();
        debug!("Camera viewer {} added: {} total", id, viewers.len());
        added
    }

    /// Detach a viewer. Returns false if it was not attached.
    pub fn remove_viewer(&self, id: u64) -> bool {
        let mut viewers = lock(&self.shared.viewers);
        let removed = viewers.remove(&id).is_some();
        debug!("Camera viewer {} removed: {} total", id, viewers.len());
        removed
    }

    pub fn viewer_count(&self) -> usize {
        lock(&self.shared.viewers).len()
    }

    /// Latest frame, shared with the capture thread
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        lock(&self.shared.current).clone()
    }

    /// Latest frame re-encoded as JPEG, or `None` before the first capture
    pub fn get_current_frame(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot()?.map(|(_, jpeg)| jpeg))
    }

    /// Capture time and JPEG of the latest frame
    pub fn snapshot(&self) -> Result<Option<(f64, Vec<u8>)>> {
        // Encode outside the lock so capture is never held up
        match self.current_frame() {
            Some(frame) => Ok(Some((
                frame.captured_at(),
                frame.encode_jpeg(self.shared.quality)?,
            ))),
            None => Ok(None),
        }
    }
}

pub struct CameraStreamer {
    config: CameraConfig,
    device: Option<Box<dyn CameraDevice>>,
    settings: Option<CaptureSettings>,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Box<dyn CameraDevice>>>,
}

impl CameraStreamer {
    pub fn new(config: CameraConfig) -> Self {
        info!(
            "Camera streamer initialized: {}x{} @ {}fps",
            config.width, config.height, config.fps
        );
        let shared = Arc::new(Shared {
            current: Mutex::new(None),
            viewers: Mutex::new(HashMap::new()),
            next_viewer: AtomicU64::new(1),
            quality: config.jpeg_quality,
        });
        Self {
            config,
            device: None,
            settings: None,
            shared,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            shared: self.shared.clone(),
        }
    }

    /// Settings granted by the opened device
    pub fn settings(&self) -> Option<CaptureSettings> {
        self.settings
    }

    pub fn is_streaming(&self) -> bool {
        self.worker.is_some()
    }

    /// Open the first candidate device that works
    pub fn start_camera(&mut self) -> Result<CaptureSettings> {
        let requested = CaptureSettings {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
        };
        let mut tried = Vec::new();
        for (backend, index) in candidates(&self.config) {
            match open_device(backend, index, requested) {
                Ok(device) => {
                    let granted = device.settings();
                    info!(
                        "Camera opened: {} ({}x{} @ {}fps)",
                        device.name(),
                        granted.width,
                        granted.height,
                        granted.fps
                    );
                    self.device = Some(device);
                    self.settings = Some(granted);
                    return Ok(granted);
                }
                Err(e) => {
                    debug!("Camera {:?}/{} failed: {}", backend, index, e);
                    tried.push(format!("{:?}/{}: {}", backend, index, e));
                }
            }
        }
        error!("Could not open camera");
        Err(CameraError::NoCamera {
            tried: tried.join("; "),
        })
    }

    /// Start the capture thread, opening the camera first if needed
    pub fn start_streaming(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(CameraError::AlreadyStreaming);
        }
        let device = match self.device.take() {
            Some(device) => device,
            None => {
                self.start_camera()?;
                self.device.take().ok_or_else(|| CameraError::NoCamera {
                    tried: "none".to_string(),
                })?
            }
        };
        let fps = device.settings().fps.max(1);

        self.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let running = self.running.clone();
        let worker = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_loop(device, shared, running, fps));
        match worker {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("Camera streaming started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop the capture thread and release the device
    pub fn stop_streaming(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                // Dropping the device closes it
                Ok(device) => drop(device),
                Err(_) => error!("Camera capture thread panicked"),
            }
            info!("Camera streaming stopped");
        }
        self.device = None;
    }
}

impl Drop for CameraStreamer {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

fn capture_loop(
    mut device: Box<dyn CameraDevice>,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    fps: u32,
) -> Box<dyn CameraDevice> {
    let period = Duration::from_secs_f64(1.0 / f64::from(fps));
    let mut next_frame = Instant::now();

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < next_frame {
            thread::sleep(next_frame - now);
            continue;
        }
        next_frame = now + period;

        match device.capture() {
            Ok(frame) => {
                let frame = Arc::new(frame);
                *lock(&shared.current) = Some(frame.clone());
                let has_viewers = !lock(&shared.viewers).is_empty();
                if has_viewers {
                    shared.broadcast(&frame);
                }
            }
            Err(e) => warn!("Failed to capture frame: {}", e),
        }
    }
    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JPEG_QUALITY;

    fn pattern_config(fps: u32) -> CameraConfig {
        CameraConfig {
            backend: CameraBackend::TestPattern,
            width: 32,
            height: 24,
            fps,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn test_candidate_order() {
        let config = CameraConfig {
            index: 1,
            ..CameraConfig::default()
        };
        assert_eq!(
            candidates(&config),
            vec![
                (CameraBackend::V4l2, 1),
                (CameraBackend::V4l2, 0),
                (CameraBackend::V4l2, 2)
            ]
        );
        assert_eq!(
            candidates(&pattern_config(30)),
            vec![(CameraBackend::TestPattern, 0)]
        );
    }

    #[test]
    fn test_frame_rejects_wrong_size() {
        assert!(matches!(
            Frame::new(2, 2, vec![0; 11]),
            Err(CameraError::BadFrame { expected: 12, .. })
        ));
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = Frame::new(8, 8, vec![128; 8 * 8 * 3]).unwrap();
        let jpeg = frame.encode_jpeg(JPEG_QUALITY).unwrap();
        // SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_start_camera_records_granted_settings() {
        let mut streamer = CameraStreamer::new(pattern_config(30));
        let granted = streamer.start_camera().unwrap();
        assert_eq!(granted.width, 32);
        assert_eq!(streamer.settings(), Some(granted));
    }

    #[cfg(not(all(feature = "camera", target_os = "linux")))]
    #[test]
    fn test_start_camera_fails_when_no_candidate_opens() {
        let mut streamer = CameraStreamer::new(CameraConfig::default());
        let err = streamer.start_camera().unwrap_err();
        match err {
            CameraError::NoCamera { tried } => assert_eq!(tried.matches("V4l2/").count(), 3),
            other => panic!("unexpected error: {}", other),
        }
        assert!(streamer.start_streaming().is_err());
        assert!(!streamer.is_streaming());
    }

    #[test]
    fn test_viewers_are_idempotent() {
        let streamer = CameraStreamer::new(pattern_config(30));
        let handle = streamer.handle();
        let (tx, _rx) = mpsc::channel(1);
        let id = handle.next_viewer_id();
        assert!(handle.add_viewer(id, tx.clone()));
        assert!(!handle.add_viewer(id, tx));
        assert_eq!(handle.viewer_count(), 1);
        assert!(handle.remove_viewer(id));
        assert!(!handle.remove_viewer(id));
        assert_eq!(handle.viewer_count(), 0);
    }

    #[test]
    fn test_no_frame_before_capture() {
        let streamer = CameraStreamer::new(pattern_config(30));
        assert!(streamer.handle().get_current_frame().unwrap().is_none());
    }

    #[test]
    fn test_streaming_fans_out_and_drops_closed_viewers() {
        let mut streamer = CameraStreamer::new(pattern_config(50));
        let handle = streamer.handle();

        let (tx, mut rx) = mpsc::channel(8);
        handle.add_viewer(handle.next_viewer_id(), tx);
        let (closed_tx, closed_rx) = mpsc::channel(8);
        handle.add_viewer(handle.next_viewer_id(), closed_tx);
        drop(closed_rx);

        streamer.start_streaming().unwrap();
        assert!(matches!(
            streamer.start_streaming(),
            Err(CameraError::AlreadyStreaming)
        ));

        let line = rx.blocking_recv().expect("frame delivered");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "video_frame");
        let jpeg = STANDARD.decode(value["data"].as_str().unwrap()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(value["timestamp"].as_f64().unwrap() > 0.0);

        // The closed viewer is gone after the first broadcast
        assert_eq!(handle.viewer_count(), 1);
        assert!(handle.get_current_frame().unwrap().is_some());

        streamer.stop_streaming();
        assert!(!streamer.is_streaming());
    }
}
