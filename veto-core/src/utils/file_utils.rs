//! Small async filesystem helpers shared across the crate.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Create a directory and all parents if missing.
pub async fn ensure_dir_exists(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {:?}", dir))?;
    Ok(())
}

/// Read and deserialize a JSON file.
pub async fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse JSON in {:?}", path))
}

/// Serialize and write a JSON file, creating parent directories as needed.
pub async fn write_json_file<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        ensure_dir_exists(parent).await?;
    }
    let raw = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn json_round_trip_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/state.json");

        let mut value = BTreeMap::new();
        value.insert("port".to_string(), 4242u16);

        write_json_file(&path, &value).await.unwrap();
        let back: BTreeMap<String, u16> = read_json_file(&path).await.unwrap();
        assert_eq!(back, value);
    }
}
