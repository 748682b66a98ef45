//! Incremental content build pipeline for game assets.
//!
//! A project declares content packages; each package owns a source tree on
//! disk and one target per platform it is built for. The builder walks each
//! package, detects which sources changed (directly or transitively through
//! recorded dependencies), hands the stale ones to long-lived data compiler
//! subprocesses keyed by resource type, and records the results in
//! persistent source and target databases so the next run only touches what
//! it must.
//!
//! ## Architecture
//!
//! 1. **Resource parsing**: [`resource`] derives `{name, type, properties}`
//!    from filenames; properties double as platform tags.
//! 2. **Databases**: [`source_db`] and [`target_db`] persist what was seen
//!    and what was produced.
//! 3. **Model**: [`project`] / [`package`] / [`target`] mirror the on-disk
//!    layout and own the databases.
//! 4. **Execution**: [`cache`] owns one [`worker`] subprocess per resource
//!    type and speaks the [`ipc`] protocol with it.
//! 5. **Driver**: [`builder`] orchestrates change detection, dispatch and
//!    persistence, reporting progress as [`event`] values.

pub mod builder;
pub mod cache;
pub mod error;
pub mod event;
pub mod ipc;
pub mod package;
pub mod project;
pub mod resource;
pub mod source_db;
pub mod target;
pub mod target_db;
pub mod walk;
pub mod worker;

pub use builder::{build_project, BuildSummary};
pub use cache::{BuildInput, CacheEvent, CompilerCache};
pub use error::{PipelineError, Result};
pub use event::{channel, BuildEvent, EventReceiver, EventSender, SkipReason};
pub use package::Package;
pub use project::{load_pipeline, CompilerDef, Pipeline, Project};
pub use resource::{ResourcePath, GENERIC_PLATFORM};
pub use source_db::{SourceDatabase, SourceEntry};
pub use target::{hashed_stem, Target};
pub use target_db::{TargetDatabase, TargetEntry};
