//! A named, directory-scoped collection of source content.

use crate::error::{PipelineError, Result};
use crate::resource::GENERIC_PLATFORM;
use crate::source_db::SourceDatabase;
use crate::target::Target;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A package owns one source tree, its source database, and one target per
/// platform it has been built (or discovered on disk) for.
#[derive(Debug)]
pub struct Package {
    pub project_name: String,
    pub package_name: String,
    pub source_path: PathBuf,
    pub database_path: PathBuf,
    pub database: SourceDatabase,
    pub targets: HashMap<String, Target>,
    packages_root: PathBuf,
    database_root: PathBuf,
}

impl Package {
    /// Ensure the source directory exists and load (or initialise) the
    /// source database.
    pub fn create(
        packages_root: &Path,
        database_root: &Path,
        project_name: &str,
        package_name: &str,
    ) -> Result<Package> {
        let source_path = packages_root.join(format!("{}.source", package_name));
        fs::create_dir_all(&source_path)
            .map_err(|source| PipelineError::io(&source_path, source))?;
        let database_path = database_root.join(format!("{}.source.json", package_name));
        let database = SourceDatabase::load(&database_path, package_name)?;
        debug!(package = package_name, path = %source_path.display(), "package ready");

        Ok(Package {
            project_name: project_name.to_string(),
            package_name: package_name.to_string(),
            source_path,
            database_path,
            database,
            targets: HashMap::new(),
            packages_root: packages_root.to_path_buf(),
            database_root: database_root.to_path_buf(),
        })
    }

    /// Get or create the target for `platform` ("" maps to `"generic"`).
    pub fn target_platform(&mut self, platform: &str) -> Result<&mut Target> {
        let platform = if platform.is_empty() {
            GENERIC_PLATFORM
        } else {
            platform
        };
        match self.targets.entry(platform.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let target = Target::create(
                    &self.packages_root,
                    &self.database_root,
                    &self.package_name,
                    platform,
                )?;
                Ok(vacant.insert(target))
            }
        }
    }

    /// Instantiate a target for every `{package}.{platform}.target`
    /// directory already on disk (platform `"generic"` when the middle
    /// segment is absent).
    pub fn cache_targets(&mut self) -> Result<()> {
        let prefix = format!("{}.", self.package_name);
        let read = fs::read_dir(&self.packages_root)
            .map_err(|source| PipelineError::io(&self.packages_root, source))?;
        for entry in read {
            let entry = entry.map_err(|source| PipelineError::io(&self.packages_root, source))?;
            let file_type = entry
                .file_type()
                .map_err(|source| PipelineError::io(entry.path(), source))?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let platform = if rest == "target" {
                GENERIC_PLATFORM
            } else if let Some(platform) = rest.strip_suffix(".target") {
                platform
            } else {
                continue;
            };
            if platform.is_empty() || platform.contains('.') {
                continue;
            }
            self.target_platform(platform)?;
        }
        Ok(())
    }

    /// Names of every platform this package currently has a target for.
    pub fn platform_names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    /// Persist the source database and every target database that diverged
    /// from disk.
    pub fn save_databases(&mut self) -> Result<()> {
        if self.database.is_dirty() {
            self.database.save(&self.database_path)?;
        }
        for target in self.targets.values_mut() {
            target.save_database()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roots(tmp: &TempDir) -> (PathBuf, PathBuf) {
        let packages = tmp.path().join("packages");
        let database = tmp.path().join("database");
        fs::create_dir_all(&packages).unwrap();
        fs::create_dir_all(&database).unwrap();
        (packages, database)
    }

    #[test]
    fn create_makes_source_directory() {
        let tmp = TempDir::new().unwrap();
        let (packages, database) = roots(&tmp);
        let package = Package::create(&packages, &database, "game", "foo").unwrap();
        assert!(packages.join("foo.source").is_dir());
        assert_eq!(package.package_name, "foo");
        assert!(package.targets.is_empty());
    }

    #[test]
    fn target_platform_is_get_or_insert() {
        let tmp = TempDir::new().unwrap();
        let (packages, database) = roots(&tmp);
        let mut package = Package::create(&packages, &database, "game", "foo").unwrap();

        package.target_platform("ios").unwrap();
        package.target_platform("ios").unwrap();
        package.target_platform("").unwrap();

        assert_eq!(package.targets.len(), 2);
        assert!(packages.join("foo.ios.target").is_dir());
        assert!(packages.join("foo.generic.target").is_dir());
    }

    #[test]
    fn cache_targets_discovers_existing_directories() {
        let tmp = TempDir::new().unwrap();
        let (packages, database) = roots(&tmp);
        fs::create_dir_all(packages.join("foo.android.target")).unwrap();
        fs::create_dir_all(packages.join("foo.target")).unwrap();
        fs::create_dir_all(packages.join("other.ios.target")).unwrap();

        let mut package = Package::create(&packages, &database, "game", "foo").unwrap();
        package.cache_targets().unwrap();

        let mut platforms = package.platform_names();
        platforms.sort();
        assert_eq!(platforms, vec!["android".to_string(), "generic".to_string()]);
    }
}
