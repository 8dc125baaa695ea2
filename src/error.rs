use std::io;

use thiserror::Error;

use crate::capture::frame::Facing;
use crate::capture::source::Lifecycle;

/// Errors surfaced by [`CameraSource`](crate::CameraSource) and the
/// device seam.
///
/// Per-frame trouble (unrecognized buffers, consumer failures) never shows
/// up here; those are logged, counted, and skipped so the stream keeps
/// flowing.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No connected camera points the requested way
    #[error("no camera with facing {0:?}")]
    NoMatchingDevice(Facing),

    /// The hardware advertised no usable preview size
    #[error("could not find a suitable preview size")]
    NoViableResolution,

    /// The hardware advertised no frame-rate range at all
    #[error("could not find a suitable preview frame-rate range")]
    NoViableFrameRate,

    /// Operation not permitted in the current lifecycle state
    #[error("cannot {op} while {state:?}")]
    InvalidState { op: &'static str, state: Lifecycle },

    /// The capture request itself is malformed
    #[error("invalid capture request: {0}")]
    InvalidRequest(String),

    /// The backend rejected an open, configure, or preview call
    #[error("camera backend: {0}")]
    Backend(String),

    /// The dedicated capture worker thread could not be spawned
    #[error("failed to spawn capture worker")]
    WorkerSpawn(#[source] io::Error),
}
