use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// @module: File and directory utilities

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.as_os_str().is_empty() && !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        // Ensure the parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Write a value as pretty-printed JSON
    pub fn write_json_pretty<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialize JSON for {:?}", path.as_ref()))?;
        Self::write_to_file(path, &content)
    }

    // @returns: Short random tag keeping staging names unique across runs
    pub fn short_tag() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    // @generates: Staging path `<dir>/<prefix>_<batch>[_retry<n>]_<tag>.<ext>`
    pub fn staging_path<P: AsRef<Path>>(
        dir: P,
        prefix: &str,
        batch_index: usize,
        retry: u32,
        tag: &str,
        extension: &str,
    ) -> PathBuf {
        let name = if retry == 0 {
            format!("{}_{}_{}.{}", prefix, batch_index, tag, extension)
        } else {
            format!("{}_{}_retry{}_{}.{}", prefix, batch_index, retry, tag, extension)
        };
        dir.as_ref().join(name)
    }

    // @generates: Sibling path with a suffix appended to the full file name
    pub fn with_suffix<P: AsRef<Path>>(path: P, suffix: &str) -> PathBuf {
        let path = path.as_ref();
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(suffix);
        path.with_file_name(name)
    }
}
