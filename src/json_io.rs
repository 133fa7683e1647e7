//! Small JSON file helpers shared by the record-writing modules.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PipelineError;

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes `value` as pretty JSON via a temp file in the same directory and a
/// rename, so readers see either the old or the new record, never a torn one.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| PipelineError::JsonWrite {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(PipelineError::Io)?;

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let tmp = parent.join(format!(
        ".{name}.tmp.{}.{}.{}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = fs::File::create(&tmp).map_err(PipelineError::Io)?;
    file.write_all(&bytes).map_err(PipelineError::Io)?;
    file.sync_all().map_err(PipelineError::Io)?;
    drop(file);

    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(PipelineError::Io(err));
    }
    Ok(())
}

/// Reads a JSON record. Callers check for existence first when a missing
/// file has its own meaning.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let data = fs::read(path).map_err(PipelineError::Io)?;
    serde_json::from_slice(&data).map_err(|source| PipelineError::JsonParse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_files() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("record.json");

        let mut first = BTreeMap::new();
        first.insert("k", 1);
        write_json_atomic(&path, &first).unwrap();

        let mut second = BTreeMap::new();
        second.insert("k", 2);
        write_json_atomic(&path, &second).unwrap();

        let read: BTreeMap<String, i32> = read_json(&path).unwrap();
        assert_eq!(read.get("k"), Some(&2));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn read_json_reports_parse_errors_with_path() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("bad.json");
        fs::write(&path, b"{not json").unwrap();

        let err = read_json::<BTreeMap<String, i32>>(&path).unwrap_err();
        assert!(matches!(err, PipelineError::JsonParse { .. }));
    }
}
