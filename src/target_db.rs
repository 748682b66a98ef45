//! Persisted index of produced target resources.
//!
//! Same shape as the source database, but entries record which compiler
//! produced the resource and every file it wrote. No dependency tracking
//! lives here; that stays with the sources.

use crate::error::{PipelineError, Result};
use crate::resource::ResourcePath;
use crate::source_db::relative_key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntry {
    pub relative_path: String,
    pub resource_name: String,
    pub resource_type: String,
    /// Originating source file, relative to the package source root.
    pub source_path: String,
    pub platform: String,
    pub compiler_name: String,
    pub compiler_version: u32,
    pub properties: Vec<String>,
    /// Absolute paths of every file the compiler wrote.
    pub outputs: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDatabaseFile {
    bundle_name: String,
    platform: String,
    entries: Vec<TargetEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetDatabaseFileRef<'a> {
    bundle_name: &'a str,
    platform: &'a str,
    entries: &'a [TargetEntry],
}

#[derive(Debug)]
pub struct TargetDatabase {
    pub bundle_name: String,
    pub platform: String,
    entries: Vec<TargetEntry>,
    index: HashMap<String, usize>,
    dirty: bool,
}

impl TargetDatabase {
    pub fn new(bundle_name: &str, platform: &str) -> TargetDatabase {
        TargetDatabase {
            bundle_name: bundle_name.to_string(),
            platform: platform.to_string(),
            entries: Vec::new(),
            index: HashMap::new(),
            dirty: true,
        }
    }

    /// Load from `path`; an absent file yields an empty, dirty database.
    pub fn load(path: &Path, bundle_name: &str, platform: &str) -> Result<TargetDatabase> {
        if !path.exists() {
            debug!(path = %path.display(), "no target database on disk, starting empty");
            return Ok(TargetDatabase::new(bundle_name, platform));
        }
        let text = fs::read_to_string(path).map_err(|source| PipelineError::io(path, source))?;
        let file: TargetDatabaseFile =
            serde_json::from_str(&text).map_err(|source| PipelineError::format(path, source))?;
        let mut database = TargetDatabase {
            bundle_name: file.bundle_name,
            platform: file.platform,
            entries: file.entries,
            index: HashMap::new(),
            dirty: false,
        };
        database.rebuild_index(0);
        Ok(database)
    }

    /// Persist to `path` and clear the dirty flag.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let file = TargetDatabaseFileRef {
            bundle_name: &self.bundle_name,
            platform: &self.platform,
            entries: &self.entries,
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|source| PipelineError::format(path, source))?;
        fs::write(path, text).map_err(|source| PipelineError::io(path, source))?;
        self.dirty = false;
        Ok(())
    }

    pub fn query(&self, root: &Path, path: &Path) -> Option<&TargetEntry> {
        let key = relative_key(root, path);
        self.index.get(&key).map(|&at| &self.entries[at])
    }

    /// Insert or overwrite the entry for `target_path` (keyed relative to
    /// `target_root`). Resource metadata derives from the source filename;
    /// `source_path` is recorded relative to the package source root.
    pub fn create(
        &mut self,
        target_root: &Path,
        target_path: &Path,
        source_root: &Path,
        source_path: &Path,
        compiler_name: &str,
        compiler_version: u32,
        declared_platforms: &[String],
        outputs: Vec<String>,
    ) -> Result<&mut TargetEntry> {
        let key = relative_key(target_root, target_path);
        let source_key = relative_key(source_root, source_path);
        let parsed = ResourcePath::parse(&source_key);
        let platform = parsed.platform(declared_platforms.iter().map(String::as_str));

        let entry = TargetEntry {
            relative_path: key.clone(),
            resource_name: parsed.resource_name,
            resource_type: parsed.resource_type,
            source_path: source_key,
            platform,
            compiler_name: compiler_name.to_string(),
            compiler_version,
            properties: parsed.properties,
            outputs,
        };

        let at = match self.index.get(&key) {
            Some(&at) => {
                self.entries[at] = entry;
                at
            }
            None => {
                self.entries.push(entry);
                let at = self.entries.len() - 1;
                self.index.insert(key, at);
                at
            }
        };
        self.dirty = true;
        Ok(&mut self.entries[at])
    }

    /// Remove the entry for `path`, splicing and reindexing.
    pub fn remove(&mut self, root: &Path, path: &Path) {
        let key = relative_key(root, path);
        if let Some(at) = self.index.remove(&key) {
            self.entries.remove(at);
            self.rebuild_index(at);
            self.dirty = true;
        }
    }

    fn rebuild_index(&mut self, from: usize) {
        for (at, entry) in self.entries.iter().enumerate().skip(from) {
            self.index.insert(entry.relative_path.clone(), at);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TargetEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
