//! Live-capture frame pipeline for continuous image analysis.
//!
//! [`CameraSource`] opens a camera through a [`CameraBackend`], negotiates
//! resolution, frame rate, and rotation against what the hardware
//! advertises, and feeds preview frames to a [`FrameConsumer`] on a
//! dedicated worker thread. Capture never blocks on the consumer: a
//! single-slot mailbox keeps only the latest undelivered frame and
//! recycles the rest, so a slow consumer costs staleness, not memory.

pub mod capture;
pub mod device;
pub mod error;
pub mod overlay;
pub mod select;

use serde::{Deserialize, Serialize};

pub use crate::capture::frame::{
    DisplayRotation, Facing, FpsRange, Frame, PixelFormat, PreviewConfiguration, Size,
    PREVIEW_FORMAT,
};
pub use crate::capture::pool::{BufferTag, FramePool, PooledBuffer, FRAME_POOL_SIZE};
pub use crate::capture::slot::{StatsSnapshot, SubmitOutcome};
pub use crate::capture::source::{CameraSource, CameraSourceBuilder, Lifecycle};
pub use crate::device::{
    CameraBackend, CameraDevice, DeviceCapabilities, FrameConsumer, FrameSink, ZoomState,
};
pub use crate::error::CameraError;

/// Requested capture parameters. Hardware limitations may push the
/// negotiated values off these exact numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub display_rotation: DisplayRotation,
}

impl CaptureSettings {
    /// Reject requests no camera could sensibly serve.
    pub fn validate(&self) -> Result<(), CameraError> {
        const MAX_DIMENSION: u32 = 1_000_000;
        if self.fps <= 0.0 {
            return Err(CameraError::InvalidRequest(format!(
                "invalid fps: {}",
                self.fps
            )));
        }
        if self.width == 0
            || self.width > MAX_DIMENSION
            || self.height == 0
            || self.height > MAX_DIMENSION
        {
            return Err(CameraError::InvalidRequest(format!(
                "invalid preview size: {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            facing: Facing::Back,
            width: 1024,
            height: 768,
            fps: 30.0,
            display_rotation: DisplayRotation::Deg0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(CaptureSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_fps_is_rejected() {
        let settings = CaptureSettings {
            fps: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(CameraError::InvalidRequest(_))
        ));
    }

    #[test]
    fn absurd_dimensions_are_rejected() {
        let settings = CaptureSettings {
            width: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = CaptureSettings {
            height: 1_000_001,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
