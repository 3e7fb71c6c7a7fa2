//! File-backed driver
//!
//! Stores one JSON document per key under a root directory. Key strings are
//! escaped into safe file names; `get_all_keys` is a directory scan. This is
//! a set-only backend: `merge_item` persists the pre-merged snapshot.

use crate::driver::StorageDriver;
use async_trait::async_trait;
use reflow_core::{apply_merge, Result, Value};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;

const FILE_SUFFIX: &str = ".json";

/// Storage driver persisting each key as a JSON file
pub struct FileDriver {
    root: PathBuf,
}

impl FileDriver {
    /// Create a driver rooted at `root`. The directory is created by `init`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", encode_key(key), FILE_SUFFIX))
    }

    async fn write_value(&self, key: &str, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        tokio::fs::write(self.path_for(key), bytes).await?;
        Ok(())
    }

    async fn remove_file(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Escape a key into a file-system-safe name.
///
/// Alphanumerics, `-` and `_` pass through; every other byte becomes `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(name.len());
    let mut chars = name.bytes();
    while let Some(byte) = chars.next() {
        if byte == b'%' {
            let hi = chars.next()?;
            let lo = chars.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}

#[async_trait]
impl StorageDriver for FileDriver {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)?;
                Ok(if value.is_null() { None } else { Some(value) })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_keys(&self) -> Result<HashSet<String>> {
        let mut keys = HashSet::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(FILE_SUFFIX) else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    async fn set_item(&self, key: &str, value: &Value) -> Result<()> {
        self.write_value(key, value).await
    }

    async fn multi_set(&self, pairs: &[(String, Value)]) -> Result<()> {
        for (key, value) in pairs {
            self.write_value(key, value).await?;
        }
        Ok(())
    }

    async fn merge_item(
        &self,
        key: &str,
        _delta: &Value,
        pre_merged: &Value,
        _should_set_value: bool,
    ) -> Result<()> {
        // Set-only backend: always persist the materialized form.
        self.write_value(key, pre_merged).await
    }

    async fn multi_merge(&self, pairs: &[(String, Value)]) -> Result<()> {
        for (key, delta) in pairs {
            let existing = self.get_item(key).await?;
            let next = apply_merge(existing, vec![delta.clone()], true);
            if next.is_null() {
                self.remove_file(key).await?;
            } else {
                self.write_value(key, &next).await?;
            }
        }
        Ok(())
    }

    async fn remove_items(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove_file(key).await?;
        }
        Ok(())
    }
}
