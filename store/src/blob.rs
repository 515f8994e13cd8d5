//! Gzip-compressed JSON blob files.
//!
//! Blobs are always rewritten whole: the new content goes to a sibling
//! `.tmp` file which is then renamed over the target, so a crash mid-save
//! leaves the previous version intact.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::StoreError;

/// Serialize `value` as JSON and write it gzip-compressed to `path`.
pub fn write_compressed_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&compressed)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and decode a blob written by [`write_compressed_json`].
pub fn read_compressed_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.display().to_string()));
    }
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| StoreError::Corruption(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Like [`read_compressed_json`] but any failure yields `T::default()`.
///
/// Missing files are normal on first start and are not logged.
pub fn read_compressed_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_compressed_json(path) {
        Ok(v) => v,
        Err(StoreError::NotFound(_)) => T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load blob, using default");
            T::default()
        }
    }
}
