//! Synchronizer configuration.

use serde::{Deserialize, Serialize};

/// Pass-wide options, owned by the caller and fixed for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Sample transforms/deformations over the shutter interval.
    pub motion_blur: bool,
    /// Default motion segment count; objects may override per-entity.
    pub motion_segments: u32,
    /// Skip re-exporting entities whose version has not advanced past the
    /// stamp recorded at their last successful export.
    pub lazy_export: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            motion_blur: false,
            motion_segments: 2,
            lazy_export: true,
        }
    }
}
