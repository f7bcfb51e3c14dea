// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! Filesystem-backed [`CatalogFetcher`] (§1 "the catalog registration
//! workflow beyond content fetch" is out of scope — resolving a
//! `catalog_id` to playbook text is not). Entries are listed in a
//! `manifest.json` sitting next to the playbook YAML files; a real
//! deployment's catalog registration workflow is expected to write both.

use noetl_playbook::catalog::{CatalogEntry, CatalogError, CatalogFetcher, CatalogId};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    catalog_id: i64,
    path: String,
    version: String,
    file: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse manifest {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("failed to read playbook file {0}: {1}")]
    ReadPlaybook(PathBuf, std::io::Error),
}

/// Loads `{base_dir}/manifest.json` (a JSON array of
/// `{catalog_id, path, version, file}`) once at startup and serves
/// content from an in-memory map thereafter. `file` is resolved relative
/// to `base_dir`.
pub struct FileCatalogFetcher {
    entries: RwLock<HashMap<CatalogId, CatalogEntry>>,
    by_path_version: RwLock<HashMap<(String, String), CatalogId>>,
}

impl FileCatalogFetcher {
    pub fn load(base_dir: &Path) -> Result<Self, ManifestError> {
        let manifest_path = base_dir.join("manifest.json");
        let raw = std::fs::read_to_string(&manifest_path).map_err(|e| ManifestError::Read(manifest_path.clone(), e))?;
        let manifest: Vec<ManifestEntry> = serde_json::from_str(&raw).map_err(|e| ManifestError::Parse(manifest_path.clone(), e))?;

        let mut entries = HashMap::new();
        let mut by_path_version = HashMap::new();
        for entry in manifest {
            let playbook_path = base_dir.join(&entry.file);
            let yaml = std::fs::read_to_string(&playbook_path).map_err(|e| ManifestError::ReadPlaybook(playbook_path, e))?;
            let catalog_id = CatalogId(entry.catalog_id);
            by_path_version.insert((entry.path.clone(), entry.version.clone()), catalog_id);
            entries.insert(catalog_id, CatalogEntry { catalog_id, path: entry.path, version: entry.version, yaml });
        }

        Ok(Self { entries: RwLock::new(entries), by_path_version: RwLock::new(by_path_version) })
    }

    pub fn empty() -> Self {
        Self { entries: RwLock::new(HashMap::new()), by_path_version: RwLock::new(HashMap::new()) }
    }
}

impl CatalogFetcher for FileCatalogFetcher {
    fn fetch(&self, catalog_id: CatalogId) -> Result<CatalogEntry, CatalogError> {
        self.entries.read().get(&catalog_id).cloned().ok_or(CatalogError::NotFound(catalog_id))
    }

    fn resolve(&self, path: &str, version: &str) -> Option<CatalogId> {
        self.by_path_version.read().get(&(path.to_string(), version.to_string())).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_entries_from_manifest_and_resolves_by_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("demo.yaml"), "entry_step: start\nsteps:\n  start:\n    is_end: true\n").unwrap();
        let manifest = serde_json::json!([
            {"catalog_id": 1, "path": "demo.yaml", "version": "1", "file": "demo.yaml"}
        ]);
        let mut f = std::fs::File::create(dir.path().join("manifest.json")).unwrap();
        f.write_all(manifest.to_string().as_bytes()).unwrap();

        let fetcher = FileCatalogFetcher::load(dir.path()).unwrap();
        let entry = fetcher.fetch(CatalogId(1)).unwrap();
        assert_eq!(entry.path, "demo.yaml");
        assert_eq!(fetcher.resolve("demo.yaml", "1"), Some(CatalogId(1)));
        assert!(fetcher.resolve("demo.yaml", "2").is_none());
    }

    #[test]
    fn missing_catalog_id_is_not_found() {
        let fetcher = FileCatalogFetcher::empty();
        assert!(matches!(fetcher.fetch(CatalogId(99)), Err(CatalogError::NotFound(_))));
    }
}
