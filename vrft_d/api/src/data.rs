use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::UnifiedExpressions;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSingleEyeData {
    pub gaze: Vec3,
    pub pupil_diameter_mm: f32,
    pub openness: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedEyeData {
    pub left: UnifiedSingleEyeData,
    pub right: UnifiedSingleEyeData,
    pub max_dilation: f32,
    pub min_dilation: f32,
    pub left_diameter: f32,
    pub right_diameter: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnifiedExpressionShape {
    pub weight: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedHeadData {
    pub head_yaw: f32,
    pub head_pitch: f32,
    pub head_roll: f32,
    pub head_pos_x: f32,
    pub head_pos_y: f32,
    pub head_pos_z: f32,
}

/// Aggregated output of every running module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTrackingData {
    pub eye: UnifiedEyeData,
    pub shapes: Vec<UnifiedExpressionShape>,
    pub head: UnifiedHeadData,
}

impl Default for UnifiedTrackingData {
    fn default() -> Self {
        Self {
            eye: UnifiedEyeData::default(),
            shapes: vec![UnifiedExpressionShape::default(); UnifiedExpressions::COUNT],
            head: UnifiedHeadData::default(),
        }
    }
}

impl UnifiedTrackingData {
    pub fn shape(&self, expression: UnifiedExpressions) -> f32 {
        self.shapes
            .get(expression as usize)
            .map(|s| s.weight)
            .unwrap_or_default()
    }

    pub fn set_shape(&mut self, expression: UnifiedExpressions, weight: f32) {
        if let Some(shape) = self.shapes.get_mut(expression as usize) {
            shape.weight = weight;
        }
    }
}

/// Process-wide tracking sink.
///
/// Every accepted module gets a clone of the same handle and writes whatever
/// it produced from its own thread. There is no per-slot ownership: when two
/// modules write the same shape, the last write wins.
#[derive(Debug, Clone, Default)]
pub struct SharedTrackingData {
    inner: Arc<RwLock<UnifiedTrackingData>>,
}

impl SharedTrackingData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access. Keep the closure short: readers and
    /// other modules block while it runs.
    pub fn write<R>(&self, f: impl FnOnce(&mut UnifiedTrackingData) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn read<R>(&self, f: impl FnOnce(&UnifiedTrackingData) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn snapshot(&self) -> UnifiedTrackingData {
        self.read(|data| data.clone())
    }

    pub fn reset(&self) {
        self.write(|data| *data = UnifiedTrackingData::default());
    }
}
