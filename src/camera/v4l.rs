// Video4Linux capture through the v4l crate (mmap streaming)
//
// Asks for MJPG and decodes it; devices that only offer YUYV are converted.

use std::time::Duration;

use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{CameraDevice, CameraError, CaptureSettings, Frame, Result};

const BUFFER_COUNT: u32 = 4;

/// Shortest wait for a frame before `capture` gives up
const MIN_CAPTURE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
enum PixelFormat {
    Mjpg,
    Yuyv,
}

pub struct V4lCamera {
    index: usize,
    settings: CaptureSettings,
    format: PixelFormat,
    // Buffers are mapped from the device handle, which the stream keeps alive
    stream: Stream<'static>,
}

impl V4lCamera {
    pub fn open(index: usize, requested: CaptureSettings) -> Result<Self> {
        let device = Device::new(index)?;

        let mut fmt = device.format()?;
        fmt.width = requested.width;
        fmt.height = requested.height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let granted = device.set_format(&fmt)?;

        let format = match &granted.fourcc.repr {
            b"MJPG" => PixelFormat::Mjpg,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(CameraError::UnsupportedFormat(
                    String::from_utf8_lossy(other).into_owned(),
                ));
            }
        };

        let params = device.set_params(&Parameters::with_fps(requested.fps))?;
        let fps = if params.interval.numerator == 0 {
            requested.fps
        } else {
            params.interval.denominator / params.interval.numerator
        };

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
        // A stalled or unplugged device must not pin the capture thread
        stream.set_timeout(capture_timeout(fps));

        Ok(Self {
            index,
            settings: CaptureSettings {
                width: granted.width,
                height: granted.height,
                fps,
            },
            format,
            stream,
        })
    }
}

impl CameraDevice for V4lCamera {
    fn name(&self) -> String {
        format!("/dev/video{}", self.index)
    }

    fn settings(&self) -> CaptureSettings {
        self.settings
    }

    fn capture(&mut self) -> Result<Frame> {
        let (buf, meta) = self.stream.next()?;
        let data = &buf[..(meta.bytesused as usize).min(buf.len())];
        let CaptureSettings { width, height, .. } = self.settings;

        match self.format {
            PixelFormat::Mjpg => {
                let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?
                    .to_rgb8();
                let (w, h) = img.dimensions();
                Frame::new(w, h, img.into_raw())
            }
            PixelFormat::Yuyv => Frame::new(width, height, yuyv_to_rgb(data)),
        }
    }
}

/// Convert packed YUYV 4:2:2 to RGB24 (BT.601, limited range)
pub fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for chunk in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (i32::from(y) - 16).max(0) * 298;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
    ]
}

/// Two frame periods, never less than `MIN_CAPTURE_TIMEOUT`
fn capture_timeout(fps: u32) -> Duration {
    let two_frames = Duration::from_secs_f64(2.0 / f64::from(fps.max(1)));
    two_frames.max(MIN_CAPTURE_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_timeout() {
        assert_eq!(capture_timeout(10), Duration::from_millis(200));
        assert_eq!(capture_timeout(30), MIN_CAPTURE_TIMEOUT);
        assert_eq!(capture_timeout(0), Duration::from_secs(2));
    }

    #[test]
    fn test_yuyv_black_and_white() {
        let rgb = yuyv_to_rgb(&[16, 128, 235, 128]);
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_ignores_trailing_bytes() {
        assert_eq!(yuyv_to_rgb(&[16, 128, 16, 128, 99]).len(), 6);
    }
}
