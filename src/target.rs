//! Per-package, per-platform output descriptor.

use crate::error::{PipelineError, Result};
use crate::resource::GENERIC_PLATFORM;
use crate::target_db::TargetDatabase;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Deterministic filename stem for a resource name.
///
/// Rotating 32-bit accumulator over the UTF-16 code units of `name`,
/// rendered as lowercase hex. Existing on-disk databases depend on this
/// exact sequence; do not change it.
pub fn hashed_stem(name: &str) -> String {
    let mut hash: u32 = 0;
    for unit in name.encode_utf16() {
        hash = hash.rotate_left(7).wrapping_add(u32::from(unit));
    }
    format!("{:x}", hash)
}

/// Output descriptor for one package on one platform. Owns the target
/// database the builder records compiled outputs in.
#[derive(Debug)]
pub struct Target {
    pub package_name: String,
    pub platform_name: String,
    /// Directory that target-relative entry keys are computed against.
    pub root_path: PathBuf,
    /// Directory compiled resources are written beneath.
    pub target_path: PathBuf,
    pub database_path: PathBuf,
    pub database: TargetDatabase,
}

impl Target {
    /// Ensure the output directory exists and load (or initialise) the
    /// target database. An empty platform name maps to `"generic"`.
    pub fn create(
        packages_root: &Path,
        database_root: &Path,
        package_name: &str,
        platform_name: &str,
    ) -> Result<Target> {
        let platform = if platform_name.is_empty() {
            GENERIC_PLATFORM
        } else {
            platform_name
        };
        let target_path = packages_root.join(format!("{}.{}.target", package_name, platform));
        fs::create_dir_all(&target_path)
            .map_err(|source| PipelineError::io(&target_path, source))?;
        let database_path = database_root.join(format!("{}.{}.target.json", package_name, platform));
        let database = TargetDatabase::load(&database_path, package_name, platform)?;
        debug!(package = package_name, platform, path = %target_path.display(), "target ready");

        Ok(Target {
            package_name: package_name.to_string(),
            platform_name: platform.to_string(),
            root_path: target_path.clone(),
            target_path,
            database_path,
            database,
        })
    }

    /// Extension-less output path for `resource_name`. Depends only on the
    /// resource name, so it is stable across runs and platforms; the
    /// compiler appends the resource type to form the final output path.
    pub fn target_path_for(&self, resource_name: &str) -> PathBuf {
        self.target_path.join(hashed_stem(resource_name))
    }

    /// Persist the target database if it diverged from disk.
    pub fn save_database(&mut self) -> Result<()> {
        if self.database.is_dirty() {
            self.database.save(&self.database_path)?;
        }
        Ok(())
    }
}
