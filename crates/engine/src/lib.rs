//! # Verdelta Engine
//!
//! Raster change detection over spectral index imagery.
//!
//! ## Pipeline stages
//!
//! - **align**: resample one grid onto another's geometry
//! - **algebra**: normalized-difference indices and formula evaluation
//! - **change**: temporal differencing and threshold classification
//! - **vectorize**: mask regions to polygon features
//! - **zonal**: per-zone statistics over a value grid
//! - **clip**: clip grids to geometries, sample at points
//! - **ops**: request-level entry points tying the stages together

pub mod algebra;
pub mod align;
pub mod change;
pub mod clip;
pub mod ops;
pub mod vectorize;
pub mod zonal;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::algebra::{grid_calc, ndvi, normalized_difference};
    pub use crate::align::{align, ensure_aligned, Resampling};
    pub use crate::change::{
        classify, detect_gain, detect_loss, difference, CompareOp, GainParams, LossParams,
        MASK_BACKGROUND, MASK_FOREGROUND, MASK_NODATA,
    };
    pub use crate::clip::{clip, sample_at_points};
    pub use crate::ops::{
        run_change_detection, run_zonal_stats, ChangeDetectionRequest, GridSource,
        ZonalStatsRequest,
    };
    pub use crate::vectorize::{filter_min_region, vectorize, Connectivity};
    pub use crate::zonal::{attach_zone_stats, zone_summaries, ZonalStatistic, ZoneSummary};
    pub use verdelta_core::prelude::*;
}
