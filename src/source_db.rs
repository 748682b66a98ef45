//! Persisted index of known source files.
//!
//! One entry per file under a package's source root, keyed by root-relative
//! path, recording the stat snapshot from the last successful build together
//! with the dependency edges the file's compiler reported. The in-memory
//! index always satisfies `index[entry.relative_path] == position(entry)`.

use crate::error::{PipelineError, Result};
use crate::resource::ResourcePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Serde adapter pinning `writeTime` to RFC 3339 with millisecond precision.
///
/// Timestamps are compared numerically after a round trip through disk, so
/// both directions must agree on the stored resolution.
pub(crate) mod write_time_format {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(stamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&stamp.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|stamp| stamp.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) fn truncate_millis(stamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(stamp.timestamp_millis()).unwrap_or(stamp)
}

/// Modification time of `meta`, truncated to the millisecond the database
/// stores.
pub fn mtime_millis(path: &Path, meta: &fs::Metadata) -> Result<DateTime<Utc>> {
    let modified = meta
        .modified()
        .map_err(|source| PipelineError::io(path, source))?;
    Ok(truncate_millis(modified.into()))
}

/// Compute the key a file is stored under: its path relative to the root.
pub(crate) fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEntry {
    pub relative_path: String,
    pub resource_name: String,
    pub resource_type: String,
    pub platform: String,
    pub properties: Vec<String>,
    /// Absolute paths of sources whose builds read this file.
    pub references: Vec<String>,
    /// Absolute paths of sources this file's compiler reads as inputs.
    pub dependencies: Vec<String>,
    #[serde(with = "write_time_format")]
    pub write_time: DateTime<Utc>,
    pub file_size: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceDatabaseFile {
    bundle_name: String,
    entries: Vec<SourceEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceDatabaseFileRef<'a> {
    bundle_name: &'a str,
    entries: &'a [SourceEntry],
}

#[derive(Debug)]
pub struct SourceDatabase {
    pub bundle_name: String,
    entries: Vec<SourceEntry>,
    index: HashMap<String, usize>,
    dirty: bool,
}

impl SourceDatabase {
    /// A fresh, empty database. Dirty until first persisted.
    pub fn new(bundle_name: &str) -> SourceDatabase {
        SourceDatabase {
            bundle_name: bundle_name.to_string(),
            entries: Vec::new(),
            index: HashMap::new(),
            dirty: true,
        }
    }

    /// Load from `path`. An absent file is not an error: the returned
    /// database starts empty and dirty.
    pub fn load(path: &Path, bundle_name: &str) -> Result<SourceDatabase> {
        if !path.exists() {
            debug!(path = %path.display(), "no source database on disk, starting empty");
            return Ok(SourceDatabase::new(bundle_name));
        }
        let text = fs::read_to_string(path).map_err(|source| PipelineError::io(path, source))?;
        let file: SourceDatabaseFile =
            serde_json::from_str(&text).map_err(|source| PipelineError::format(path, source))?;
        let mut database = SourceDatabase {
            bundle_name: file.bundle_name,
            entries: file.entries,
            index: HashMap::new(),
            dirty: false,
        };
        database.rebuild_index(0);
        Ok(database)
    }

    /// Persist to `path` and clear the dirty flag.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let file = SourceDatabaseFileRef {
            bundle_name: &self.bundle_name,
            entries: &self.entries,
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|source| PipelineError::format(path, source))?;
        fs::write(path, text).map_err(|source| PipelineError::io(path, source))?;
        self.dirty = false;
        Ok(())
    }

    /// Look up the entry for `path` relative to `root`. Never fails.
    pub fn query(&self, root: &Path, path: &Path) -> Option<&SourceEntry> {
        let key = relative_key(root, path);
        self.index.get(&key).map(|&at| &self.entries[at])
    }

    pub fn query_mut(&mut self, root: &Path, path: &Path) -> Option<&mut SourceEntry> {
        let key = relative_key(root, path);
        match self.index.get(&key) {
            Some(&at) => {
                self.dirty = true;
                Some(&mut self.entries[at])
            }
            None => None,
        }
    }

    /// Stat `path` and insert or overwrite its entry.
    ///
    /// `dependencies` and `references` come back empty; the caller
    /// repopulates them after a successful build.
    pub fn create(
        &mut self,
        root: &Path,
        path: &Path,
        declared_platforms: &[String],
    ) -> Result<&mut SourceEntry> {
        let meta = fs::metadata(path).map_err(|source| PipelineError::io(path, source))?;
        let write_time = mtime_millis(path, &meta)?;
        let key = relative_key(root, path);
        let parsed = ResourcePath::parse(&key);
        let platform = parsed.platform(declared_platforms.iter().map(String::as_str));

        let entry = SourceEntry {
            relative_path: key.clone(),
            resource_name: parsed.resource_name,
            resource_type: parsed.resource_type,
            platform,
            properties: parsed.properties,
            references: Vec::new(),
            dependencies: Vec::new(),
            write_time,
            file_size: meta.len(),
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

    /// Remove the entry for `path`, splicing the entry array and rebuilding
    /// the index for the entries that shifted.
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

    pub fn entries(&self) -> impl Iterator<Item = &SourceEntry> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = root.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn absent_file_loads_empty_and_dirty() {
        let tmp = TempDir::new().unwrap();
        let db = SourceDatabase::load(&tmp.path().join("missing.json"), "foo").unwrap();
        assert!(db.is_empty());
        assert!(db.is_dirty());
        assert_eq!(db.bundle_name, "foo");
    }

    #[test]
    fn create_then_query() {
        let tmp = TempDir::new().unwrap();
        let path = touch(tmp.path(), "bar.txt", "hello");
        let mut db = SourceDatabase::new("foo");

        db.create(tmp.path(), &path, &[]).unwrap();
        let entry = db.query(tmp.path(), &path).unwrap();
        assert_eq!(entry.relative_path, "bar.txt");
        assert_eq!(entry.resource_name, "bar");
        assert_eq!(entry.resource_type, "txt");
        assert_eq!(entry.platform, "generic");
        assert_eq!(entry.file_size, 5);
        assert!(entry.dependencies.is_empty());
    }

    #[test]
    fn create_overwrites_in_place() {
        let tmp = TempDir::new().unwrap();
        let path = touch(tmp.path(), "bar.txt", "hello");
        let mut db = SourceDatabase::new("foo");

        let entry = db.create(tmp.path(), &path, &[]).unwrap();
        entry.dependencies.push("/abs/baz.dep".to_string());

        db.create(tmp.path(), &path, &[]).unwrap();
        assert_eq!(db.len(), 1);
        let entry = db.query(tmp.path(), &path).unwrap();
        assert!(entry.dependencies.is_empty());
    }

    #[test]
    fn remove_splices_and_reindexes() {
        let tmp = TempDir::new().unwrap();
        let a = touch(tmp.path(), "a.txt", "a");
        let b = touch(tmp.path(), "b.txt", "b");
        let c = touch(tmp.path(), "c.txt", "c");
        let mut db = SourceDatabase::new("foo");
        db.create(tmp.path(), &a, &[]).unwrap();
        db.create(tmp.path(), &b, &[]).unwrap();
        db.create(tmp.path(), &c, &[]).unwrap();

        db.remove(tmp.path(), &b);
        assert_eq!(db.len(), 2);
        assert!(db.query(tmp.path(), &b).is_none());
        assert_eq!(db.query(tmp.path(), &a).unwrap().resource_name, "a");
        assert_eq!(db.query(tmp.path(), &c).unwrap().resource_name, "c");
    }

    #[test]
    fn save_load_round_trips_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let path = touch(tmp.path(), "bar.txt", "hello");
        let db_path = tmp.path().join("foo.source.json");

        let mut db = SourceDatabase::new("foo");
        let entry = db.create(tmp.path(), &path, &[]).unwrap();
        entry.dependencies.push("/abs/baz.dep".to_string());
        db.save(&db_path).unwrap();
        assert!(!db.is_dirty());
        let first = fs::read_to_string(&db_path).unwrap();

        let mut reloaded = SourceDatabase::load(&db_path, "foo").unwrap();
        assert!(!reloaded.is_dirty());
        let reread = reloaded.query(tmp.path(), &path).unwrap();
        assert_eq!(
            reread.write_time,
            db.query(tmp.path(), &path).unwrap().write_time
        );

        reloaded.save(&db_path).unwrap();
        let second = fs::read_to_string(&db_path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_json_is_a_format_error() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("broken.json");
        fs::write(&db_path, "{ not json").unwrap();
        let err = SourceDatabase::load(&db_path, "foo").unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }
}
