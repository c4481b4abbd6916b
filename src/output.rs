//! Writing run artifacts.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Writes `value` as 2-space indented UTF-8 JSON, creating parent
/// directories as needed. Non-ASCII text is written as-is.
pub fn write_json<T, P>(path: P, value: &T) -> std::io::Result<()>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()
}
