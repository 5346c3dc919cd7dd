/// File-backed storage under the configured data directory.
///
///   <data_dir>/reference_stats/state=XX/data.parquet   baseline partitions
///   <data_dir>/live_output/current_status.json          latest aggregate document
///   <data_dir>/live_output/history/*.json               one copy per cycle
///
/// `baselines` owns the partition format; `archive` is the in-memory rolling
/// snapshot window the classifier rebuilds from the history copies each
/// cycle. The live output files themselves are written by `publish`.

pub mod archive;
pub mod baselines;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::StoreError;

/// Replace `path` with `bytes` so readers see either the old or the new file,
/// never a partial one: write a sibling temporary, flush it, rename over.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}
