//! psfpatch collects point-source stamps from astronomical images and fits
//! point-spread-function models to them.
//!
//! The pipeline runs one way: images and corner coordinates go through
//! [`PatchStore::extract`], the resulting store can be stacked into
//! spatially binned templates with [`PatchStore::average`], and any store
//! can be fitted patch by patch with [`PatchStore::fit`]. Fitting runs on
//! the rayon pool when the `rayon` feature is enabled; spans and events are
//! emitted through `tracing` when that feature is enabled.

mod trace;

pub mod average;
pub mod detect;
mod extract;
pub mod fit;
pub mod image;
pub mod patch;
pub mod psf;
pub mod util;

pub use average::{regular_corners, AverageMode};
pub use detect::{DetectConfig, Detections, Source, SourceDetector, ThresholdDetector};
pub use extract::corner_from_centroid;
pub use fit::{FitConfig, FitResult};
pub use patch::{CoordinateId, Patch, PatchKey, PatchStore, SpatialKey};
pub use psf::{Gaussian2d, Moffat2d, PsfModel, SimplePsf};
pub use util::{PsfPatchError, PsfPatchResult};

#[cfg(feature = "image-io")]
pub use crate::image::io;
