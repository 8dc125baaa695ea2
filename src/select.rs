//! Capability negotiation against the option sets a device advertises.
//!
//! All selections are pure functions over discrete hardware capabilities;
//! ties keep the first candidate in hardware enumeration order.

use tracing::warn;

use crate::capture::frame::{DisplayRotation, Facing, FpsRange, PreviewConfiguration, Size};
use crate::device::DeviceCapabilities;
use crate::error::CameraError;
use crate::CaptureSettings;

/// Largest aspect-ratio difference still considered the same shape
const ASPECT_RATIO_TOLERANCE: f32 = 0.01;

/// A preview size paired with a picture size of the same aspect ratio.
///
/// The picture size has to match the preview's aspect ratio or some
/// devices distort the preview between still captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePair {
    pub preview: Size,
    pub picture: Option<Size>,
}

/// Pick the candidate pair whose preview is closest to `desired`, measured
/// as the sum of absolute width and height differences.
pub fn select_size_pair(
    preview_sizes: &[Size],
    picture_sizes: &[Size],
    desired: Size,
) -> Option<SizePair> {
    let mut selected = None;
    let mut min_diff = i64::MAX;
    for pair in valid_size_pairs(preview_sizes, picture_sizes) {
        let diff = (pair.preview.width as i64 - desired.width as i64).abs()
            + (pair.preview.height as i64 - desired.height as i64).abs();
        if diff < min_diff {
            selected = Some(pair);
            min_diff = diff;
        }
    }
    selected
}

/// Pair every preview size with the first picture size of matching aspect
/// ratio. Previews without a partner are dropped; if that empties the
/// list, fall back to bare previews so capture can still run.
fn valid_size_pairs(preview_sizes: &[Size], picture_sizes: &[Size]) -> Vec<SizePair> {
    let mut pairs = Vec::new();
    for &preview in preview_sizes {
        let preview_ratio = preview.aspect_ratio();
        for &picture in picture_sizes {
            if (preview_ratio - picture.aspect_ratio()).abs() < ASPECT_RATIO_TOLERANCE {
                pairs.push(SizePair {
                    preview,
                    picture: Some(picture),
                });
                break;
            }
        }
    }
    if pairs.is_empty() {
        warn!("no preview size has a same-aspect-ratio picture size");
        pairs = preview_sizes
            .iter()
            .map(|&preview| SizePair {
                preview,
                picture: None,
            })
            .collect();
    }
    pairs
}

/// Pick the range closest to `desired_fps`, measured as the sum of
/// distances to both endpoints. Favors tight ranges around the target over
/// wide ones that merely contain it.
pub fn select_fps_range(ranges: &[FpsRange], desired_fps: f32) -> Option<FpsRange> {
    let desired_scaled = (desired_fps * 1000.0) as i32;
    let mut selected = None;
    let mut min_diff = i32::MAX;
    for &range in ranges {
        let diff = (desired_scaled - range.min).abs() + (desired_scaled - range.max).abs();
        if diff < min_diff {
            selected = Some(range);
            min_diff = diff;
        }
    }
    selected
}

/// How captured pixels have to be turned to come out upright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPlan {
    /// Clockwise rotation applied to captured pixel data, degrees
    pub rotation_degrees: u32,
    /// Rotation of the on-screen preview; differs from `rotation_degrees`
    /// for front sensors, whose preview is mirrored
    pub display_degrees: u32,
    /// Quarter turns tagged onto every delivered frame
    pub quarter_turns: u8,
}

/// Combine the sensor's mounting angle with the display rotation.
///
/// Front sensors add the two angles and un-mirror the display; back
/// sensors subtract.
pub fn rotation_plan(
    sensor_orientation: u32,
    display_rotation: DisplayRotation,
    facing: Facing,
) -> RotationPlan {
    let display = display_rotation.degrees();
    let (angle, display_degrees) = match facing {
        Facing::Front => {
            let angle = (sensor_orientation + display) % 360;
            (angle, (360 - angle) % 360)
        }
        Facing::Back => {
            let angle = (sensor_orientation + 360 - display) % 360;
            (angle, angle)
        }
    };
    RotationPlan {
        rotation_degrees: angle,
        display_degrees,
        quarter_turns: (angle / 90) as u8,
    }
}

/// Resolve a full preview configuration for `settings` against `caps`.
pub fn resolve(
    caps: &DeviceCapabilities,
    settings: &CaptureSettings,
) -> Result<PreviewConfiguration, CameraError> {
    let desired = Size::new(settings.width, settings.height);
    let pair = select_size_pair(&caps.preview_sizes, &caps.picture_sizes, desired)
        .ok_or(CameraError::NoViableResolution)?;
    let fps = select_fps_range(&caps.fps_ranges, settings.fps)
        .ok_or(CameraError::NoViableFrameRate)?;
    let plan = rotation_plan(
        caps.sensor_orientation,
        settings.display_rotation,
        settings.facing,
    );
    Ok(PreviewConfiguration {
        preview: pair.preview,
        picture: pair.picture,
        fps,
        rotation_degrees: plan.rotation_degrees,
    })
}
