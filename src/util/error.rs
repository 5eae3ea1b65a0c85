//! Error types for psfpatch.

use thiserror::Error;

/// Result alias for psfpatch operations.
pub type PsfPatchResult<T> = std::result::Result<T, PsfPatchError>;

/// Errors that can occur when extracting, aggregating or fitting patches.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PsfPatchError {
    /// The input data or parameters are invalid.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// No patch is stored under the requested identifier.
    #[error("{key} is not used to identify a patch in this collection")]
    NotFound { key: String },
    /// The aggregation mode string is not recognized.
    #[error("found a mode of {found:?} but it must be one of {valid:?}")]
    InvalidMode {
        found: String,
        valid: &'static [&'static str],
    },
    /// A patch side does not match the size shared by the collection.
    #[error("patch size {found} does not fit the expected size {expected}")]
    SizeMismatch { expected: usize, found: usize },
    /// The requested aggregation size is smaller than the current patch size.
    #[error("average window size {requested} is smaller than the patch size {current}")]
    TargetTooSmall { requested: usize, current: usize },
    /// The requested aggregation size differs from the patch size by an odd amount.
    #[error("average window size {requested} must have the same parity as the patch size {current}")]
    ParityMismatch { requested: usize, current: usize },
    /// A patch is not square.
    #[error("patch must be square, found {rows}x{cols}")]
    NonSquarePatch { rows: usize, cols: usize },
    /// Dimensions are zero or overflow.
    #[error("invalid dimensions {rows}x{cols}")]
    InvalidDimensions { rows: usize, cols: usize },
    /// A coordinate names an image that was not supplied.
    #[error("image index {index} out of range for {count} images")]
    ImageIndexOutOfRange { index: usize, count: usize },
    /// A coordinate used for extraction carries no image index.
    #[error("coordinate ({x}, {y}) does not name a source image")]
    MissingImageIndex { x: i64, y: i64 },
    /// The operation needs at least one patch to derive the patch size.
    #[error("collection is empty")]
    EmptyCollection,
    /// A model parameter has no starting value.
    #[error("no initial guess provided for parameter {parameter:?}")]
    MissingInitialGuess { parameter: String },
    /// The least-squares solver could not produce a result for a patch.
    #[error("solver failure: {reason}")]
    SolverFailure { reason: String },
    /// Saving or loading a collection failed.
    #[error("persistence failure: {reason}")]
    Persistence { reason: String },
    /// Image decoding or encoding failed.
    #[error("image io error: {reason}")]
    ImageIo { reason: String },
    /// Placeholder for declared but unfinished features.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}
