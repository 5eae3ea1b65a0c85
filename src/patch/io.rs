//! Whole-collection persistence through `bincode`.
//!
//! Samples are stored row-major as raw `f64`, so a saved collection loads
//! back bit-identical, NaN payloads included.

use super::{Patch, PatchKey, PatchStore};
use crate::trace::{trace_event, trace_span};
use crate::util::{PsfPatchError, PsfPatchResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredPatch<K> {
    key: K,
    size: usize,
    data: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct StoredCollection<K> {
    version: u32,
    patches: Vec<StoredPatch<K>>,
}

fn io_error(err: std::io::Error) -> PsfPatchError {
    PsfPatchError::Persistence {
        reason: err.to_string(),
    }
}

fn codec_error(err: impl ToString) -> PsfPatchError {
    PsfPatchError::Persistence {
        reason: err.to_string(),
    }
}

impl<K: PatchKey> PatchStore<K> {
    /// Writes every patch of the collection to `path`, replacing the file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PsfPatchResult<()> {
        let _span = trace_span!("patch_store_save", patches = self.len()).entered();
        let stored = StoredCollection {
            version: FORMAT_VERSION,
            patches: self
                .iter()
                .map(|(key, patch)| StoredPatch {
                    key: key.clone(),
                    size: patch.nrows(),
                    data: patch.iter().copied().collect(),
                })
                .collect(),
        };

        let file = File::create(path.as_ref()).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        let written =
            bincode::serde::encode_into_std_write(&stored, &mut writer, bincode::config::standard())
                .map_err(codec_error)?;
        writer.flush().map_err(io_error)?;
        trace_event!("patch_store_saved", bytes = written);
        Ok(())
    }

    /// Reconstructs a collection previously written by [`PatchStore::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> PsfPatchResult<Self> {
        let _span = trace_span!("patch_store_load").entered();
        let file = File::open(path.as_ref()).map_err(io_error)?;
        let mut reader = BufReader::new(file);
        let stored: StoredCollection<K> =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(codec_error)?;
        if stored.version != FORMAT_VERSION {
            return Err(PsfPatchError::Persistence {
                reason: format!("unsupported format version {}", stored.version),
            });
        }

        let mut store = Self::new();
        for record in stored.patches {
            let patch = Patch::from_shape_vec((record.size, record.size), record.data)
                .map_err(codec_error)?;
            store.add(record.key, patch)?;
        }
        trace_event!("patch_store_loaded", patches = store.len());
        Ok(store)
    }
}
