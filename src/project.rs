//! Project container and pipeline definition.

use crate::error::{PipelineError, Result};
use crate::package::Package;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How to launch the data compiler for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerDef {
    /// Executable to spawn, resolved against the project's processor root
    /// when relative.
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Resource type to compiler mapping, as read from `pipeline.json`.
pub type Pipeline = BTreeMap<String, CompilerDef>;

/// Read the pipeline definition; an absent file yields an empty mapping.
pub fn load_pipeline(path: &Path) -> Result<Pipeline> {
    if !path.exists() {
        debug!(path = %path.display(), "no pipeline definition, no compilers available");
        return Ok(Pipeline::new());
    }
    let text = fs::read_to_string(path).map_err(|source| PipelineError::io(path, source))?;
    serde_json::from_str(&text).map_err(|source| PipelineError::format(path, source))
}

/// A project gathers content packages under one root, alongside the
/// processors they are compiled with and the databases that make builds
/// incremental.
#[derive(Debug)]
pub struct Project {
    pub project_name: String,
    pub root_path: PathBuf,
    pub package_root: PathBuf,
    pub database_root: PathBuf,
    pub processor_root: PathBuf,
    pub pipeline_path: PathBuf,
    pub pipeline: Pipeline,
    pub packages: HashMap<String, Package>,
}

impl Project {
    /// Open (or lay out) the project at `{project_root}/{project_name}`,
    /// creating the `processors/`, `packages/` and `database/`
    /// subdirectories when missing, and load the pipeline definition.
    pub fn create(project_root: &Path, project_name: &str) -> Result<Project> {
        let root_path = project_root.join(project_name);
        let processor_root = root_path.join("processors");
        let package_root = root_path.join("packages");
        let database_root = root_path.join("database");
        for dir in [&processor_root, &package_root, &database_root] {
            fs::create_dir_all(dir).map_err(|source| PipelineError::io(dir.as_path(), source))?;
        }
        let pipeline_path = root_path.join("pipeline.json");
        let pipeline = load_pipeline(&pipeline_path)?;
        info!(
            project = project_name,
            compilers = pipeline.len(),
            root = %root_path.display(),
            "project opened"
        );

        Ok(Project {
            project_name: project_name.to_string(),
            root_path,
            package_root,
            database_root,
            processor_root,
            pipeline_path,
            pipeline,
            packages: HashMap::new(),
        })
    }

    /// Get or create the package named `name`.
    pub fn content_package(&mut self, name: &str) -> Result<&mut Package> {
        match self.packages.entry(name.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let package = Package::create(
                    &self.package_root,
                    &self.database_root,
                    &self.project_name,
                    name,
                )?;
                Ok(vacant.insert(package))
            }
        }
    }

    /// Instantiate a package for every `{name}.source` directory under the
    /// package root, then discover each package's existing targets.
    pub fn cache_packages(&mut self) -> Result<()> {
        let read = fs::read_dir(&self.package_root)
            .map_err(|source| PipelineError::io(&self.package_root, source))?;
        for entry in read {
            let entry = entry.map_err(|source| PipelineError::io(&self.package_root, source))?;
            let file_type = entry
                .file_type()
                .map_err(|source| PipelineError::io(entry.path(), source))?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(package_name) = name.strip_suffix(".source") {
                if !package_name.is_empty() {
                    self.content_package(package_name)?;
                }
            }
        }
        for package in self.packages.values_mut() {
            package.cache_targets()?;
        }
        Ok(())
    }
}
