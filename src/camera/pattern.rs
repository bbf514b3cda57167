// Synthetic camera: scrolling color bars at whatever size was requested

use super::{CameraDevice, CaptureSettings, Frame, Result};

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

// Keep generated frames within what a small board can encode at speed
const MAX_WIDTH: u32 = 1920;
const MAX_HEIGHT: u32 = 1080;
const MIN_SIDE: u32 = 16;
const MAX_FPS: u32 = 60;

pub struct TestPatternCamera {
    settings: CaptureSettings,
    frame_index: u64,
}

impl TestPatternCamera {
    /// Grants the requested settings, clamped to the generator's limits
    pub fn open(requested: CaptureSettings) -> Self {
        let settings = CaptureSettings {
            width: requested.width.clamp(MIN_SIDE, MAX_WIDTH),
            height: requested.height.clamp(MIN_SIDE, MAX_HEIGHT),
            fps: requested.fps.clamp(1, MAX_FPS),
        };
        Self {
            settings,
            frame_index: 0,
        }
    }
}

impl CameraDevice for TestPatternCamera {
    fn name(&self) -> String {
        "test pattern".to_string()
    }

    fn settings(&self) -> CaptureSettings {
        self.settings
    }

    fn capture(&mut self) -> Result<Frame> {
        let CaptureSettings { width, height, .. } = self.settings;
        let bar_width = (width as usize / BARS.len()).max(1);
        let shift = self.frame_index as usize % width as usize;

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..height {
            for x in 0..width as usize {
                let bar = ((x + shift) / bar_width) % BARS.len();
                rgb.extend_from_slice(&BARS[bar]);
            }
        }
        self.frame_index = self.frame_index.wrapping_add(1);
        Frame::new(width, height, rgb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_clamped() {
        let cam = TestPatternCamera::open(CaptureSettings {
            width: 4000,
            height: 2,
            fps: 0,
        });
        assert_eq!(
            cam.settings(),
            CaptureSettings {
                width: MAX_WIDTH,
                height: MIN_SIDE,
                fps: 1
            }
        );
    }

    #[test]
    fn test_frames_scroll() {
        let mut cam = TestPatternCamera::open(CaptureSettings {
            width: 64,
            height: 16,
            fps: 30,
        });
        let a = cam.capture().unwrap();
        let b = cam.capture().unwrap();
        assert_eq!(a.width(), 64);
        assert_eq!(a.height(), 16);
        assert_eq!(a.rgb().len(), 64 * 16 * 3);
        assert_ne!(a.rgb(), b.rgb());
        // First pixel of the first frame is the white bar
        assert_eq!(&a.rgb()[..3], &[255, 255, 255]);
    }
}
