//! V4L2 webcam capture via the `v4l` crate.
//!
//! A [`FrameSource`] hands out [`VideoTrack`]s; a track owns the open device
//! until it is stopped (explicitly or by drop).

use crate::frame::{self, Frame};
use image::GrayImage;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
/// Raw captures allowed per usable (non-dark) frame.
const ATTEMPTS_PER_FRAME: usize = 3;
/// Longest wait for a single buffer before the capture fails.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("only dark frames captured")]
    NoUsableFrame,
}

/// Something that can open a live video track.
pub trait FrameSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn VideoTrack>, CameraError>;

    /// Cheap availability check that does not claim the device.
    fn probe(&self) -> Result<(), CameraError> {
        Ok(())
    }
}

/// An open video track. Dropping the track releases the device.
pub trait VideoTrack: Send {
    /// Capture one usable (non-dark) grayscale frame.
    fn capture(&mut self) -> Result<Frame, CameraError>;

    /// Release the device.
    fn stop(self: Box<Self>);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; the Y channel is kept.
    Yuyv,
    /// Motion-JPEG; each buffer is a complete JPEG.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Webcam identified by its device path.
#[derive(Debug, Clone)]
pub struct V4lSource {
    pub device_path: String,
    /// Frames discarded after each stream start (auto exposure settling).
    pub warmup_frames: usize,
}

impl V4lSource {
    pub fn new(device_path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
        }
    }
}

impl FrameSource for V4lSource {
    fn open(&self) -> Result<Box<dyn VideoTrack>, CameraError> {
        Ok(Box::new(Camera::open(&self.device_path, self.warmup_frames)?))
    }

    fn probe(&self) -> Result<(), CameraError> {
        if Path::new(&self.device_path).exists() {
            Ok(())
        } else {
            Err(CameraError::DeviceNotFound(self.device_path.clone()))
        }
    }
}

/// Open V4L2 device.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    warmup_frames: usize,
}

impl Camera {
    /// Open a webcam (e.g. "/dev/video0") and negotiate 640x480.
    pub fn open(device_path: &str, warmup_frames: usize) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(device_path.to_string())
            }
            _ if e.raw_os_error() == Some(libc::EBUSY) => CameraError::DeviceBusy,
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format {:?} (need YUYV, MJPG or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
            warmup_frames,
        })
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<GrayImage, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_grayscale(buf),
        };
        converted.map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// List V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

impl VideoTrack for Camera {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        for _ in 0..self.warmup_frames {
            stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("warmup dequeue failed: {e}")))?;
        }

        for _ in 0..ATTEMPTS_PER_FRAME {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let gray = self.to_grayscale(buf)?;

            if frame::is_dark_frame(gray.as_raw(), frame::DARK_FRAME_RATIO) {
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }
            return Ok(Frame::new(gray, meta.sequence));
        }

        Err(CameraError::NoUsableFrame)
    }

    fn stop(self: Box<Self>) {
        tracing::debug!(device = %self.device_path, "camera released");
    }
}
