//! Build driver: change detection and package orchestration.
//!
//! `build_project` walks every package of a project, decides per source
//! file whether a rebuild is required (stat drift, transitively modified
//! dependencies, or missing outputs), hands stale files to the compiler
//! cache, folds the results back into the databases, and persists them at
//! package boundaries. Scheduling is a single cooperative task; the only
//! parallelism is the worker subprocesses behind the cache.

use crate::cache::{BuildInput, CacheEvent, CompilerCache};
use crate::error::Result;
use crate::event::{BuildEvent, EventSender, SkipReason};
use crate::ipc::BuildResult;
use crate::package::Package;
use crate::project::Project;
use crate::resource::{platform_for_properties, GENERIC_PLATFORM};
use crate::source_db::{mtime_millis, SourceEntry};
use crate::target::Target;
use crate::walk;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Totals for one project build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub packages: usize,
    pub built: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// True when the file on disk no longer matches the entry's stat snapshot.
/// Timestamps compare at millisecond resolution on both sides.
pub fn source_file_modified(entry: &SourceEntry, path: &Path, meta: &fs::Metadata) -> bool {
    match mtime_millis(path, meta) {
        Err(_) => true,
        Ok(stamp) => entry.write_time != stamp || entry.file_size != meta.len(),
    }
}

/// Depth-first check over the entry and everything reachable through its
/// `dependencies` edges. A dependency with no database entry, or any stat
/// failure along the way, forces a rebuild. The graph may contain cycles
/// (`dependencies` and `references` are mutual); the visited set treats a
/// revisit as unmodified along that path so the walk terminates.
pub fn dependencies_modified(package: &Package, entry: &SourceEntry) -> bool {
    let mut visited = HashSet::new();
    dependencies_modified_inner(package, entry, &mut visited)
}

fn dependencies_modified_inner(
    package: &Package,
    entry: &SourceEntry,
    visited: &mut HashSet<String>,
) -> bool {
    if !visited.insert(entry.relative_path.clone()) {
        return false;
    }
    let path = package.source_path.join(&entry.relative_path);
    match fs::metadata(&path) {
        Err(_) => return true,
        Ok(meta) => {
            if source_file_modified(entry, &path, &meta) {
                return true;
            }
        }
    }
    for dependency in &entry.dependencies {
        match package.database.query(&package.source_path, Path::new(dependency)) {
            None => return true,
            Some(dep_entry) => {
                if dependencies_modified_inner(package, dep_entry, visited) {
                    return true;
                }
            }
        }
    }
    false
}

/// True when there is nothing recorded to verify, or every recorded output
/// still exists on disk.
pub fn build_outputs_exist(target: &Target, target_path: &Path) -> bool {
    match target.database.query(&target.root_path, target_path) {
        None => true,
        Some(entry) => entry.outputs.iter().all(|output| Path::new(output).exists()),
    }
}

pub fn requires_rebuild(
    package: &Package,
    target: &Target,
    target_path: &Path,
    entry: &SourceEntry,
) -> bool {
    dependencies_modified(package, entry) || !build_outputs_exist(target, target_path)
}

#[derive(Debug, Default)]
struct PackageState {
    pending_files: usize,
    error_count: usize,
    submit_complete: bool,
    finalized: bool,
}

/// Build every package of `project` for `platform` (empty means generic),
/// reporting progress on `events`.
pub async fn build_project(
    project: &mut Project,
    platform: &str,
    events: &EventSender,
) -> Result<BuildSummary> {
    let platform = if platform.is_empty() {
        GENERIC_PLATFORM
    } else {
        platform
    };
    let cache = CompilerCache::new(&project.processor_root, &project.pipeline).await?;
    let mut build = ProjectBuild {
        project,
        cache,
        platform: platform.to_string(),
        events: events.clone(),
        states: HashMap::new(),
        summary: BuildSummary::default(),
    };
    build.run().await
}

struct ProjectBuild<'a> {
    project: &'a mut Project,
    cache: CompilerCache,
    platform: String,
    events: EventSender,
    states: HashMap<String, PackageState>,
    summary: BuildSummary,
}

impl ProjectBuild<'_> {
    async fn run(&mut self) -> Result<BuildSummary> {
        // No request goes out before every worker finished its handshake.
        loop {
            match self.cache.next_event().await? {
                CacheEvent::Ready => break,
                event => debug!(?event, "cache event before ready"),
            }
        }
        let _ = self.events.send(BuildEvent::Ready);

        self.project.cache_packages()?;
        let mut package_names: Vec<String> = self.project.packages.keys().cloned().collect();
        package_names.sort();
        self.summary.packages = package_names.len();
        info!(
            packages = self.summary.packages,
            platform = %self.platform,
            "project build started"
        );

        for name in &package_names {
            self.build_package(name).await?;
        }

        while self.states.values().any(|state| !state.finalized) {
            match self.cache.next_event().await? {
                CacheEvent::Started { input } => {
                    let _ = self.events.send(BuildEvent::FileStarted {
                        package: input.bundle.clone(),
                        source_path: input.source_path.clone(),
                    });
                }
                CacheEvent::Skipped { input, reason } => {
                    let _ = self.events.send(BuildEvent::FileSkipped {
                        package: input.bundle.clone(),
                        source_path: input.source_path.clone(),
                        reason,
                    });
                    self.summary.skipped += 1;
                    self.file_done(&input.bundle)?;
                }
                CacheEvent::Complete { input, result } => {
                    self.handle_complete(&input, result)?;
                    self.file_done(&input.bundle)?;
                }
                CacheEvent::Ready | CacheEvent::Terminated => {}
            }
        }

        self.cache.shutdown().await?;
        loop {
            match self.cache.next_event().await? {
                CacheEvent::Terminated => break,
                event => debug!(?event, "cache event during shutdown"),
            }
        }
        let _ = self.events.send(BuildEvent::ProjectComplete {
            error_count: self.summary.errors,
        });
        info!(
            built = self.summary.built,
            skipped = self.summary.skipped,
            errors = self.summary.errors,
            "project build complete"
        );
        Ok(self.summary.clone())
    }

    async fn build_package(&mut self, name: &str) -> Result<()> {
        let _ = self.events.send(BuildEvent::PackageStarted {
            package: name.to_string(),
        });

        let platform = self.platform.clone();
        let mut inputs = Vec::new();
        {
            let package = self.project.content_package(name)?;
            package.target_platform(&platform)?;
            let declared = declared_platforms(package, &platform);
            let files = walk::source_files(&package.source_path);
            debug!(package = name, files = files.len(), "walking source tree");

            for path in files {
                // Query before create: an existing entry keeps the stat
                // snapshot from its last successful build, which is the
                // baseline change detection compares against. `create`
                // overwrites in place and is applied again only once a
                // build succeeds.
                let is_new = package
                    .database
                    .query(&package.source_path, &path)
                    .is_none();
                if is_new {
                    package
                        .database
                        .create(&package.source_path, &path, &declared)?;
                }
                let Some(entry) = package.database.query(&package.source_path, &path) else {
                    continue;
                };

                let file_platform = platform_for_properties(
                    &entry.properties,
                    declared.iter().map(String::as_str),
                );
                if file_platform != platform {
                    let _ = self.events.send(BuildEvent::FileSkipped {
                        package: name.to_string(),
                        source_path: path.clone(),
                        reason: SkipReason::PlatformMismatch,
                    });
                    self.summary.skipped += 1;
                    continue;
                }

                let Some(target) = package.targets.get(&platform) else {
                    continue;
                };
                let target_path = target.target_path_for(&entry.resource_name);

                if is_new || requires_rebuild(package, target, &target_path, entry) {
                    inputs.push(BuildInput {
                        bundle: name.to_string(),
                        target: platform.clone(),
                        source_path: path.clone(),
                        target_path,
                        resource_name: entry.resource_name.clone(),
                        resource_type: entry.resource_type.clone(),
                        platform: file_platform,
                    });
                } else {
                    let _ = self.events.send(BuildEvent::FileSkipped {
                        package: name.to_string(),
                        source_path: path.clone(),
                        reason: SkipReason::UpToDate,
                    });
                    self.summary.skipped += 1;
                }
            }
        }

        let state = PackageState {
            pending_files: inputs.len(),
            submit_complete: true,
            ..PackageState::default()
        };
        let finalize_now = state.pending_files == 0;
        self.states.insert(name.to_string(), state);

        for input in inputs {
            self.cache.build(input).await?;
        }
        if finalize_now {
            self.finalize_package(name)?;
        }
        Ok(())
    }

    fn handle_complete(&mut self, input: &BuildInput, result: BuildResult) -> Result<()> {
        if !result.success {
            if let Some(state) = self.states.get_mut(&input.bundle) {
                state.error_count += 1;
            }
            self.summary.errors += 1;
            let _ = self.events.send(BuildEvent::FileError {
                package: input.bundle.clone(),
                source_path: input.source_path.clone(),
                errors: result.errors.clone(),
            });
            return Ok(());
        }

        let compiler_name = self
            .cache
            .compiler_name(&input.resource_type)
            .unwrap_or("unknown")
            .to_string();
        let compiler_version = self
            .cache
            .compiler_version(&input.resource_type)
            .unwrap_or(0);

        let Some(package) = self.project.packages.get_mut(&input.bundle) else {
            warn!(bundle = %input.bundle, "completion for unknown package");
            return Ok(());
        };
        let declared = declared_platforms(package, &self.platform);
        let source_abs = input.source_path.display().to_string();

        // Refresh the built entry's stat snapshot, then repopulate its
        // links from the compiler's reported references.
        let prior_references = package
            .database
            .query(&package.source_path, &input.source_path)
            .map(|entry| entry.references.clone())
            .unwrap_or_default();
        {
            let entry =
                package
                    .database
                    .create(&package.source_path, &input.source_path, &declared)?;
            entry.references = prior_references;
            entry.dependencies = result.references.clone();
        }
        for reference in &result.references {
            if let Err(err) = refresh_reference(package, reference, &source_abs, &declared) {
                warn!(%reference, error = %err, "could not record reference");
            }
        }

        let source_root = package.source_path.clone();
        let target = package.target_platform(&input.target)?;
        let target_root = target.root_path.clone();
        target.database.create(
            &target_root,
            &input.target_path,
            &source_root,
            &input.source_path,
            &compiler_name,
            compiler_version,
            &declared,
            result.outputs.clone(),
        )?;

        self.summary.built += 1;
        let _ = self.events.send(BuildEvent::FileSuccess {
            package: input.bundle.clone(),
            source_path: input.source_path.clone(),
        });
        Ok(())
    }

    fn file_done(&mut self, bundle: &str) -> Result<()> {
        let finalize = {
            let Some(state) = self.states.get_mut(bundle) else {
                warn!(%bundle, "file event for unknown package");
                return Ok(());
            };
            state.pending_files = state.pending_files.saturating_sub(1);
            state.submit_complete && state.pending_files == 0 && !state.finalized
        };
        if finalize {
            self.finalize_package(bundle)?;
        }
        Ok(())
    }

    fn finalize_package(&mut self, name: &str) -> Result<()> {
        let error_count = self
            .states
            .get(name)
            .map(|state| state.error_count)
            .unwrap_or(0);
        if let Some(package) = self.project.packages.get_mut(name) {
            package.save_databases()?;
        }
        if let Some(state) = self.states.get_mut(name) {
            state.finalized = true;
        }
        let _ = self.events.send(BuildEvent::PackageComplete {
            package: name.to_string(),
            error_count,
        });
        info!(package = name, error_count, "package complete");
        Ok(())
    }
}

/// Platforms a file's properties may legitimately name: every target this
/// package already has, plus the platform being built.
fn declared_platforms(package: &Package, build_platform: &str) -> Vec<String> {
    let mut platforms = package.platform_names();
    if !platforms.iter().any(|name| name == build_platform) {
        platforms.push(build_platform.to_string());
    }
    platforms
}

/// Make sure a referenced source has a fresh entry carrying a back-link to
/// the file whose build read it. Accumulated links survive the refresh;
/// only the stat snapshot is rebuilt.
fn refresh_reference(
    package: &mut Package,
    reference: &str,
    dependent: &str,
    declared: &[String],
) -> Result<()> {
    let path = Path::new(reference);
    let (dependencies, mut references) =
        match package.database.query(&package.source_path, path) {
            Some(existing) => (existing.dependencies.clone(), existing.references.clone()),
            None => (Vec::new(), Vec::new()),
        };
    if !references.iter().any(|existing| existing == dependent) {
        references.push(dependent.to_string());
    }
    let entry = package.database.create(&package.source_path, path, declared)?;
    entry.dependencies = dependencies;
    entry.references = references;
    Ok(())
}
