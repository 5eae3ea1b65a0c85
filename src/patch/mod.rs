//! Identifier-keyed patch collections.
//!
//! A `PatchStore` maps identifiers to square `Array2<f64>` stamps that all
//! share one side length. The side length is fixed by the first inserted
//! patch; later inserts must be square and of the same size, and a rejected
//! insert leaves the store untouched. Re-adding an identifier replaces the
//! stored patch, returns the old one and emits a warning event.

mod io;

use crate::trace::trace_warn;
use crate::util::{PsfPatchError, PsfPatchResult};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A square stamp of samples; axis 0 is rows, axis 1 is columns.
pub type Patch = Array2<f64>;

/// Key type usable by a [`PatchStore`].
pub trait PatchKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync
{
}

impl<T> PatchKey for T where
    T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync
{
}

/// Key that locates its patch by a corner offset, so it can be binned spatially.
pub trait SpatialKey: PatchKey {
    /// Corner offset `(x, y)` of the patch in its source frame.
    fn corner(&self) -> (i64, i64);

    /// Key for a derived patch anchored at an aggregation bin corner.
    fn from_corner(x: i64, y: i64) -> Self;
}

/// Identifier of a patch cut from a list of images.
///
/// `x` offsets along axis 0 (rows) and `y` along axis 1 (columns) of the
/// unpadded source image. Aggregated patches carry no image index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoordinateId {
    /// Source image index, `None` for derived patches.
    pub image_index: Option<usize>,
    /// Row offset of the patch corner.
    pub x: i64,
    /// Column offset of the patch corner.
    pub y: i64,
}

impl CoordinateId {
    /// Identifier for a patch cut from image `image_index`.
    pub fn new(image_index: usize, x: i64, y: i64) -> Self {
        Self {
            image_index: Some(image_index),
            x,
            y,
        }
    }

    /// Identifier for an aggregated patch anchored at `(x, y)`.
    pub fn derived(x: i64, y: i64) -> Self {
        Self {
            image_index: None,
            x,
            y,
        }
    }
}

impl fmt::Display for CoordinateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.image_index {
            Some(index) => write!(f, "(image {index}, x {}, y {})", self.x, self.y),
            None => write!(f, "(none, x {}, y {})", self.x, self.y),
        }
    }
}

impl SpatialKey for CoordinateId {
    fn corner(&self) -> (i64, i64) {
        (self.x, self.y)
    }

    fn from_corner(x: i64, y: i64) -> Self {
        Self::derived(x, y)
    }
}

/// Collection of equally sized square patches keyed by identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchStore<K: PatchKey> {
    patches: HashMap<K, Patch>,
    size: Option<usize>,
}

impl<K: PatchKey> Default for PatchStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PatchKey> PatchStore<K> {
    /// Creates an empty store; the patch size is set by the first insert.
    pub fn new() -> Self {
        Self {
            patches: HashMap::new(),
            size: None,
        }
    }

    /// Builds a store from preloaded patches, validating shape agreement.
    pub fn from_patches<I>(patches: I) -> PsfPatchResult<Self>
    where
        I: IntoIterator<Item = (K, Patch)>,
    {
        let mut store = Self::new();
        for (key, patch) in patches {
            store.add(key, patch)?;
        }
        Ok(store)
    }

    /// Side length shared by every patch, `None` while the store is empty.
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Number of distinct identifiers.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Returns true if no patch is stored.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Returns true if `key` identifies a stored patch.
    pub fn contains(&self, key: &K) -> bool {
        self.patches.contains_key(key)
    }

    /// Looks up the patch stored under `key`.
    pub fn get(&self, key: &K) -> PsfPatchResult<&Patch> {
        self.patches.get(key).ok_or_else(|| PsfPatchError::NotFound {
            key: key.to_string(),
        })
    }

    /// Inserts `patch` under `key`, returning the patch it replaced.
    ///
    /// A replaced patch is also reported as a warning event.
    pub fn add(&mut self, key: K, patch: Patch) -> PsfPatchResult<Option<Patch>> {
        let (rows, cols) = patch.dim();
        if rows == 0 || cols == 0 {
            return Err(PsfPatchError::InvalidDimensions { rows, cols });
        }
        if rows != cols {
            return Err(PsfPatchError::NonSquarePatch { rows, cols });
        }
        if let Some(expected) = self.size {
            if rows != expected {
                return Err(PsfPatchError::SizeMismatch {
                    expected,
                    found: rows,
                });
            }
        }

        let replaced = self.patches.insert(key.clone(), patch);
        if replaced.is_some() {
            trace_warn!(
                "patch is being overwritten in this collection",
                key = key.to_string().as_str()
            );
        }
        if self.size.is_none() {
            self.size = Some(rows);
        }
        Ok(replaced)
    }

    /// Removes and returns the patch stored under `key`.
    ///
    /// The size stays fixed even when the last patch is removed.
    pub fn remove(&mut self, key: &K) -> PsfPatchResult<Patch> {
        self.patches.remove(key).ok_or_else(|| PsfPatchError::NotFound {
            key: key.to_string(),
        })
    }

    /// Iterates over identifiers.
    pub fn keys(&self) -> hash_map::Keys<'_, K, Patch> {
        self.patches.keys()
    }

    /// Iterates over patches.
    pub fn values(&self) -> hash_map::Values<'_, K, Patch> {
        self.patches.values()
    }

    /// Iterates over `(identifier, patch)` pairs.
    pub fn iter(&self) -> hash_map::Iter<'_, K, Patch> {
        self.patches.iter()
    }

    /// Consumes the store and returns the underlying map.
    pub fn into_inner(self) -> HashMap<K, Patch> {
        self.patches
    }
}

impl<'a, K: PatchKey> IntoIterator for &'a PatchStore<K> {
    type Item = (&'a K, &'a Patch);
    type IntoIter = hash_map::Iter<'a, K, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
