//! Thread-safe registry of graphics drawn above the camera preview.
//!
//! The detection consumer mutates the set from the capture worker while a
//! renderer iterates it on its own schedule, so rendering works on a
//! snapshot, never the live set.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::capture::frame::{Facing, Size};

/// Maps preview-space coordinates onto an output surface
#[derive(Debug, Clone, Copy)]
pub struct OverlayTransform {
    width_scale: f32,
    height_scale: f32,
    mirror: bool,
    surface_width: f32,
}

impl OverlayTransform {
    /// Horizontal length in surface units
    pub fn scale_x(&self, x: f32) -> f32 {
        x * self.width_scale
    }

    /// Vertical length in surface units
    pub fn scale_y(&self, y: f32) -> f32 {
        y * self.height_scale
    }

    /// Surface x of a preview x; front-facing previews are mirrored
    pub fn translate_x(&self, x: f32) -> f32 {
        if self.mirror {
            self.surface_width - self.scale_x(x)
        } else {
            self.scale_x(x)
        }
    }

    /// Surface y of a preview y
    pub fn translate_y(&self, y: f32) -> f32 {
        self.scale_y(y)
    }
}

struct RegistryState<G> {
    graphics: HashSet<G>,
    preview_size: Option<Size>,
    facing: Facing,
}

/// Set of externally owned renderable items above the camera preview.
///
/// All access goes through one lock; [`snapshot`](Self::snapshot) hands a
/// renderer a point-in-time copy so mutation and drawing never
/// interleave.
pub struct OverlayRegistry<G> {
    state: Mutex<RegistryState<G>>,
}

impl<G> OverlayRegistry<G> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                graphics: HashSet::new(),
                preview_size: None,
                facing: Facing::Back,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState<G>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the preview geometry so overlay coordinates can be mapped
    /// onto an output surface later.
    pub fn set_camera_info(&self, preview_size: Size, facing: Facing) {
        let mut state = self.lock_state();
        state.preview_size = Some(preview_size);
        state.facing = facing;
    }

    /// Transform for a surface of the given size; `None` until camera
    /// info is known
    pub fn transform_for(&self, surface: Size) -> Option<OverlayTransform> {
        let state = self.lock_state();
        let preview = state.preview_size?;
        Some(OverlayTransform {
            width_scale: surface.width as f32 / preview.width as f32,
            height_scale: surface.height as f32 / preview.height as f32,
            mirror: state.facing == Facing::Front,
            surface_width: surface.width as f32,
        })
    }

    pub fn len(&self) -> usize {
        self.lock_state().graphics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().graphics.is_empty()
    }
}

impl<G: Clone + Eq + Hash> OverlayRegistry<G> {
    /// Add a graphic; re-adding an equal one is a no-op.
    pub fn add(&self, graphic: G) {
        self.lock_state().graphics.insert(graphic);
    }

    /// Remove a graphic if present.
    pub fn remove(&self, graphic: &G) {
        self.lock_state().graphics.remove(graphic);
    }

    /// Drop all graphics.
    pub fn clear(&self) {
        self.lock_state().graphics.clear();
    }

    /// Point-in-time copy of the registered graphics, in no particular
    /// order
    pub fn snapshot(&self) -> Vec<G> {
        self.lock_state().graphics.iter().cloned().collect()
    }
}

impl<G> Default for OverlayRegistry<G> {
    fn default() -> Self {
        Self::new()
    }
}
